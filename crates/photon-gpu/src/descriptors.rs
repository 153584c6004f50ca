//! Shader-visible descriptor table.
//!
//! All resource views live in one host-visible descriptor buffer holding a
//! single array of mutable descriptors. Slots are handed out by a bump
//! allocator and never freed.

use crate::context::GpuContext;
use crate::error::{GpuError, Result};
use crate::memory::{GpuAllocator, GpuBuffer};
use ash::vk;
use gpu_allocator::MemoryLocation;
use std::sync::Arc;

/// A slot in the descriptor table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorSlot {
    /// Index relative to the start of the table.
    pub index: u32,
    /// Host address of the slot inside the mapped descriptor buffer.
    pub cpu: usize,
    /// Device address of the slot.
    pub gpu: vk::DeviceAddress,
}

/// Bump allocator over a fixed-capacity descriptor table.
#[derive(Debug, Clone)]
pub struct DescriptorAllocator {
    cpu_base: usize,
    gpu_base: vk::DeviceAddress,
    stride: u64,
    capacity: u32,
    allocated: u32,
}

impl DescriptorAllocator {
    /// Create an allocator for a table starting at the given handles.
    pub fn new(cpu_base: usize, gpu_base: vk::DeviceAddress, stride: u64, capacity: u32) -> Self {
        Self {
            cpu_base,
            gpu_base,
            stride,
            capacity,
            allocated: 0,
        }
    }

    /// Hand out the next free slot.
    pub fn allocate(&mut self) -> Result<DescriptorSlot> {
        if self.allocated >= self.capacity {
            return Err(GpuError::CapacityExceeded {
                capacity: self.capacity,
            });
        }
        let slot = self.slot(self.allocated);
        self.allocated += 1;
        Ok(slot)
    }

    /// Handles of a slot by index, allocated or not.
    pub fn slot(&self, index: u32) -> DescriptorSlot {
        let offset = u64::from(index) * self.stride;
        DescriptorSlot {
            index,
            cpu: self.cpu_base + offset as usize,
            gpu: self.gpu_base + offset,
        }
    }

    /// Number of slots handed out so far.
    pub fn allocated(&self) -> u32 {
        self.allocated
    }

    /// Fixed number of slots in the table.
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Distance in bytes between consecutive slots.
    pub fn stride(&self) -> u64 {
        self.stride
    }
}

/// Descriptor types a table slot may hold.
const MUTABLE_TYPES: [vk::DescriptorType; 4] = [
    vk::DescriptorType::STORAGE_IMAGE,
    vk::DescriptorType::SAMPLED_IMAGE,
    vk::DescriptorType::STORAGE_BUFFER,
    vk::DescriptorType::UNIFORM_BUFFER,
];

/// Descriptor buffer backing the table, plus the embedded sampler set.
pub struct DescriptorHeap {
    buffer: GpuBuffer,
    allocator: DescriptorAllocator,
    resource_layout: vk::DescriptorSetLayout,
    sampler_layout: vk::DescriptorSetLayout,
    sampler: vk::Sampler,
    context: Arc<GpuContext>,
}

impl DescriptorHeap {
    /// Create a table of `capacity` mutable descriptors.
    pub fn new(allocator: &GpuAllocator, capacity: u32) -> Result<Self> {
        let context = allocator.context().clone();
        let device = &context.device;
        let properties = context.capabilities.descriptor_buffer;

        let resource_layout = unsafe { create_resource_layout(device, capacity) }?;
        let sampler = match unsafe { create_linear_wrap_sampler(device) } {
            Ok(sampler) => sampler,
            Err(e) => {
                unsafe { device.destroy_descriptor_set_layout(resource_layout, None) };
                return Err(e);
            }
        };
        let sampler_layout = match unsafe { create_sampler_layout(device, sampler) } {
            Ok(layout) => layout,
            Err(e) => {
                unsafe {
                    device.destroy_sampler(sampler, None);
                    device.destroy_descriptor_set_layout(resource_layout, None);
                }
                return Err(e);
            }
        };

        let loader = &context.descriptor_buffer;
        let (layout_size, binding_offset) = unsafe {
            (
                loader.get_descriptor_set_layout_size(resource_layout),
                loader.get_descriptor_set_layout_binding_offset(resource_layout, 0),
            )
        };

        let buffer = allocator.create_buffer(
            layout_size.max(1),
            vk::BufferUsageFlags::RESOURCE_DESCRIPTOR_BUFFER_EXT
                | vk::BufferUsageFlags::SAMPLER_DESCRIPTOR_BUFFER_EXT
                | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
            MemoryLocation::CpuToGpu,
            "descriptor_heap",
        );
        let buffer = match buffer {
            Ok(buffer) => buffer,
            Err(e) => {
                unsafe {
                    device.destroy_descriptor_set_layout(sampler_layout, None);
                    device.destroy_sampler(sampler, None);
                    device.destroy_descriptor_set_layout(resource_layout, None);
                }
                return Err(e);
            }
        };

        // Owns the layouts from here; early returns release them
        let mut heap = Self {
            allocator: DescriptorAllocator::new(0, 0, 0, 0),
            buffer,
            resource_layout,
            sampler_layout,
            sampler,
            context: context.clone(),
        };

        let cpu_base = heap.buffer.mapped_ptr().ok_or_else(|| {
            GpuError::ResourceCreation("Descriptor buffer is not host-visible".to_string())
        })? as usize;
        let stride = properties.mutable_descriptor_size() as u64;

        heap.allocator = DescriptorAllocator::new(
            cpu_base + binding_offset as usize,
            heap.buffer.device_address() + binding_offset,
            stride,
            capacity,
        );

        tracing::info!(
            "Descriptor heap: {capacity} slots, {stride} byte stride, {layout_size} bytes"
        );
        Ok(heap)
    }

    /// Allocate the next free slot.
    pub fn allocate(&mut self) -> Result<DescriptorSlot> {
        self.allocator.allocate()
    }

    /// The slot bookkeeping.
    pub fn allocator(&self) -> &DescriptorAllocator {
        &self.allocator
    }

    /// Layouts for set 0 (resource table) and set 1 (embedded sampler).
    pub fn set_layouts(&self) -> [vk::DescriptorSetLayout; 2] {
        [self.resource_layout, self.sampler_layout]
    }

    /// Write a storage image view into a slot.
    pub fn write_storage_image(&self, slot: &DescriptorSlot, view: vk::ImageView) -> Result<()> {
        let image_info = vk::DescriptorImageInfo::default()
            .image_view(view)
            .image_layout(vk::ImageLayout::GENERAL);
        let info = vk::DescriptorGetInfoEXT::default()
            .ty(vk::DescriptorType::STORAGE_IMAGE)
            .data(vk::DescriptorDataEXT {
                p_storage_image: &image_info,
            });
        self.write(
            slot,
            &info,
            self.context.capabilities.descriptor_buffer.storage_image_size,
        )
    }

    /// Write a sampled image view into a slot.
    pub fn write_sampled_image(&self, slot: &DescriptorSlot, view: vk::ImageView) -> Result<()> {
        let image_info = vk::DescriptorImageInfo::default()
            .image_view(view)
            .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        let info = vk::DescriptorGetInfoEXT::default()
            .ty(vk::DescriptorType::SAMPLED_IMAGE)
            .data(vk::DescriptorDataEXT {
                p_sampled_image: &image_info,
            });
        self.write(
            slot,
            &info,
            self.context.capabilities.descriptor_buffer.sampled_image_size,
        )
    }

    /// Write a structured (storage) buffer view into a slot.
    pub fn write_storage_buffer(
        &self,
        slot: &DescriptorSlot,
        address: vk::DeviceAddress,
        range: u64,
    ) -> Result<()> {
        let address_info = vk::DescriptorAddressInfoEXT::default()
            .address(address)
            .range(range);
        let info = vk::DescriptorGetInfoEXT::default()
            .ty(vk::DescriptorType::STORAGE_BUFFER)
            .data(vk::DescriptorDataEXT {
                p_storage_buffer: &address_info,
            });
        self.write(
            slot,
            &info,
            self.context.capabilities.descriptor_buffer.storage_buffer_size,
        )
    }

    /// Write a constant (uniform) buffer view into a slot.
    pub fn write_uniform_buffer(
        &self,
        slot: &DescriptorSlot,
        address: vk::DeviceAddress,
        range: u64,
    ) -> Result<()> {
        let address_info = vk::DescriptorAddressInfoEXT::default()
            .address(address)
            .range(range);
        let info = vk::DescriptorGetInfoEXT::default()
            .ty(vk::DescriptorType::UNIFORM_BUFFER)
            .data(vk::DescriptorDataEXT {
                p_uniform_buffer: &address_info,
            });
        self.write(
            slot,
            &info,
            self.context.capabilities.descriptor_buffer.uniform_buffer_size,
        )
    }

    fn write(
        &self,
        slot: &DescriptorSlot,
        info: &vk::DescriptorGetInfoEXT<'_>,
        size: usize,
    ) -> Result<()> {
        if slot.index >= self.allocator.allocated() {
            return Err(GpuError::InvalidData(format!(
                "Descriptor slot {} was never allocated",
                slot.index
            )));
        }
        let expected = self.allocator.slot(slot.index);
        if expected.cpu != slot.cpu {
            return Err(GpuError::InvalidData(format!(
                "Descriptor slot {} belongs to another heap",
                slot.index
            )));
        }

        // Slots are `stride` bytes apart and stride is at least `size`
        let descriptor = unsafe { std::slice::from_raw_parts_mut(slot.cpu as *mut u8, size) };
        unsafe {
            self.context
                .descriptor_buffer
                .get_descriptor(info, descriptor);
        }
        Ok(())
    }

    /// Bind the table and the embedded sampler for ray-tracing dispatch.
    pub fn bind(&self, cmd: vk::CommandBuffer, layout: vk::PipelineLayout) {
        let binding = vk::DescriptorBufferBindingInfoEXT::default()
            .address(self.buffer.device_address())
            .usage(
                vk::BufferUsageFlags::RESOURCE_DESCRIPTOR_BUFFER_EXT
                    | vk::BufferUsageFlags::SAMPLER_DESCRIPTOR_BUFFER_EXT,
            );
        let loader = &self.context.descriptor_buffer;
        unsafe {
            loader.cmd_bind_descriptor_buffers(cmd, std::slice::from_ref(&binding));
            loader.cmd_set_descriptor_buffer_offsets(
                cmd,
                vk::PipelineBindPoint::RAY_TRACING_KHR,
                layout,
                0,
                &[0],
                &[0],
            );
            loader.cmd_bind_descriptor_buffer_embedded_samplers(
                cmd,
                vk::PipelineBindPoint::RAY_TRACING_KHR,
                layout,
                1,
            );
        }
    }
}

impl Drop for DescriptorHeap {
    fn drop(&mut self) {
        unsafe {
            let device = &self.context.device;
            device.destroy_descriptor_set_layout(self.sampler_layout, None);
            device.destroy_sampler(self.sampler, None);
            device.destroy_descriptor_set_layout(self.resource_layout, None);
        }
    }
}

/// Set 0: one partially bound array of mutable descriptors.
unsafe fn create_resource_layout(
    device: &ash::Device,
    capacity: u32,
) -> Result<vk::DescriptorSetLayout> {
    let type_list = vk::MutableDescriptorTypeListEXT::default().descriptor_types(&MUTABLE_TYPES);
    let mut mutable_info = vk::MutableDescriptorTypeCreateInfoEXT::default()
        .mutable_descriptor_type_lists(std::slice::from_ref(&type_list));

    let binding_flags = [vk::DescriptorBindingFlags::PARTIALLY_BOUND];
    let mut flags_info =
        vk::DescriptorSetLayoutBindingFlagsCreateInfo::default().binding_flags(&binding_flags);

    let binding = vk::DescriptorSetLayoutBinding::default()
        .binding(0)
        .descriptor_type(vk::DescriptorType::MUTABLE_EXT)
        .descriptor_count(capacity)
        .stage_flags(vk::ShaderStageFlags::ALL);

    let layout_info = vk::DescriptorSetLayoutCreateInfo::default()
        .flags(vk::DescriptorSetLayoutCreateFlags::DESCRIPTOR_BUFFER_EXT)
        .bindings(std::slice::from_ref(&binding))
        .push_next(&mut mutable_info)
        .push_next(&mut flags_info);

    let layout = unsafe { device.create_descriptor_set_layout(&layout_info, None) }?;
    Ok(layout)
}

/// Set 1: the embedded linear-wrap sampler.
unsafe fn create_sampler_layout(
    device: &ash::Device,
    sampler: vk::Sampler,
) -> Result<vk::DescriptorSetLayout> {
    let samplers = [sampler];
    let binding = vk::DescriptorSetLayoutBinding::default()
        .binding(0)
        .descriptor_type(vk::DescriptorType::SAMPLER)
        .descriptor_count(1)
        .stage_flags(vk::ShaderStageFlags::ALL)
        .immutable_samplers(&samplers);

    let layout_info = vk::DescriptorSetLayoutCreateInfo::default()
        .flags(
            vk::DescriptorSetLayoutCreateFlags::DESCRIPTOR_BUFFER_EXT
                | vk::DescriptorSetLayoutCreateFlags::EMBEDDED_IMMUTABLE_SAMPLERS_EXT,
        )
        .bindings(std::slice::from_ref(&binding));

    let layout = unsafe { device.create_descriptor_set_layout(&layout_info, None) }?;
    Ok(layout)
}

unsafe fn create_linear_wrap_sampler(device: &ash::Device) -> Result<vk::Sampler> {
    let info = vk::SamplerCreateInfo::default()
        .mag_filter(vk::Filter::LINEAR)
        .min_filter(vk::Filter::LINEAR)
        .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
        .address_mode_u(vk::SamplerAddressMode::REPEAT)
        .address_mode_v(vk::SamplerAddressMode::REPEAT)
        .address_mode_w(vk::SamplerAddressMode::REPEAT)
        .max_lod(vk::LOD_CLAMP_NONE);
    let sampler = unsafe { device.create_sampler(&info, None) }?;
    Ok(sampler)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequential_slots_are_stride_apart() {
        let mut allocator = DescriptorAllocator::new(0x1000, 0xdead_0000, 64, 16);

        let first = allocator.allocate().unwrap();
        assert_eq!(first.index, 0);
        assert_eq!(first.cpu, 0x1000);
        assert_eq!(first.gpu, 0xdead_0000);

        let mut previous = first;
        for expected in 1..16 {
            let slot = allocator.allocate().unwrap();
            assert_eq!(slot.index, expected);
            assert_eq!(slot.cpu - previous.cpu, 64);
            assert_eq!(slot.gpu - previous.gpu, 64);
            previous = slot;
        }
        assert_eq!(allocator.allocated(), 16);
    }

    #[test]
    fn allocation_past_capacity_fails() {
        let mut allocator = DescriptorAllocator::new(0, 0, 32, 3);
        for _ in 0..3 {
            allocator.allocate().unwrap();
        }
        assert!(matches!(
            allocator.allocate(),
            Err(GpuError::CapacityExceeded { capacity: 3 })
        ));
        // A failed allocation does not move the cursor
        assert_eq!(allocator.allocated(), 3);
    }

    #[test]
    fn slot_lookup_matches_allocation() {
        let mut allocator = DescriptorAllocator::new(256, 4096, 48, 8);
        allocator.allocate().unwrap();
        let second = allocator.allocate().unwrap();
        assert_eq!(allocator.slot(1), second);
        assert_eq!(allocator.slot(5).gpu, 4096 + 5 * 48);
    }
}
