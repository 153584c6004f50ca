//! Shared Vulkan context.
//!
//! [`GpuContext`] owns the instance, logical device, memory allocator and
//! extension loaders. Every GPU resource keeps an `Arc` to it so the device is
//! destroyed only after the last resource has released itself.

use crate::capabilities::{required_device_extensions, GpuCapabilities};
use crate::error::{GpuError, Result};
use crate::instance::{create_instance, select_physical_device};
use ash::vk;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use parking_lot::Mutex;
use raw_window_handle::RawDisplayHandle;
use std::collections::HashSet;
use std::ffi::c_char;

/// Queue family indices.
#[derive(Debug, Clone, Copy)]
pub struct QueueFamilyIndices {
    pub graphics: u32,
    pub compute: u32,
    pub transfer: u32,
}

/// Instance, device and allocator shared by every GPU resource.
pub struct GpuContext {
    // Entry must be kept alive for the lifetime of the context
    pub(crate) entry: ash::Entry,
    pub(crate) instance: ash::Instance,
    pub(crate) physical_device: vk::PhysicalDevice,
    pub(crate) device: ash::Device,
    pub(crate) capabilities: GpuCapabilities,
    pub(crate) allocator: Mutex<Option<Allocator>>,
    pub(crate) queue_families: QueueFamilyIndices,

    pub(crate) acceleration_structure: ash::khr::acceleration_structure::Device,
    pub(crate) ray_tracing_pipeline: ash::khr::ray_tracing_pipeline::Device,
    pub(crate) descriptor_buffer: ash::ext::descriptor_buffer::Device,
}

impl GpuContext {
    /// Create the instance, pick an adapter and create the logical device.
    ///
    /// `display` enables the surface extensions for windowed rendering.
    pub fn new(
        app_name: &str,
        enable_validation: bool,
        display: Option<RawDisplayHandle>,
    ) -> Result<Self> {
        let windowed = display.is_some();

        let entry = unsafe { ash::Entry::load() }
            .map_err(|e| GpuError::Other(format!("Failed to load Vulkan: {e}")))?;

        let instance = unsafe { create_instance(&entry, app_name, enable_validation, display) }?;

        let (physical_device, capabilities) =
            match unsafe { select_physical_device(&instance, windowed) } {
                Ok(selected) => selected,
                Err(e) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(e);
                }
            };

        tracing::info!("Selected GPU: {}", capabilities.summary());

        let created = unsafe {
            find_queue_families(&instance, physical_device).and_then(|families| {
                create_device(&instance, physical_device, &families, windowed)
                    .map(|device| (families, device))
            })
        };
        let (queue_families, device) = match created {
            Ok(created) => created,
            Err(e) => {
                unsafe { instance.destroy_instance(None) };
                return Err(e);
            }
        };

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: device.clone(),
            physical_device,
            debug_settings: gpu_allocator::AllocatorDebugSettings {
                log_memory_information: cfg!(debug_assertions),
                log_leaks_on_shutdown: true,
                store_stack_traces: false,
                log_allocations: false,
                log_frees: false,
                log_stack_traces: false,
            },
            buffer_device_address: true,
            allocation_sizes: gpu_allocator::AllocationSizes::default(),
        });
        let allocator = match allocator {
            Ok(allocator) => allocator,
            Err(e) => {
                unsafe {
                    device.destroy_device(None);
                    instance.destroy_instance(None);
                }
                return Err(GpuError::ResourceCreation(e.to_string()));
            }
        };

        let acceleration_structure = ash::khr::acceleration_structure::Device::new(&instance, &device);
        let ray_tracing_pipeline = ash::khr::ray_tracing_pipeline::Device::new(&instance, &device);
        let descriptor_buffer = ash::ext::descriptor_buffer::Device::new(&instance, &device);

        Ok(Self {
            entry,
            instance,
            physical_device,
            device,
            capabilities,
            allocator: Mutex::new(Some(allocator)),
            queue_families,
            acceleration_structure,
            ray_tracing_pipeline,
            descriptor_buffer,
        })
    }

    /// Get the Vulkan device handle.
    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    /// Get the Vulkan instance handle.
    pub fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    /// Get the Vulkan entry point.
    pub fn entry(&self) -> &ash::Entry {
        &self.entry
    }

    /// Get the physical device handle.
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    /// Get GPU capabilities.
    pub fn capabilities(&self) -> &GpuCapabilities {
        &self.capabilities
    }

    /// Get the queue family indices.
    pub fn queue_families(&self) -> QueueFamilyIndices {
        self.queue_families
    }

    /// Acceleration structure extension loader.
    pub fn acceleration_structure(&self) -> &ash::khr::acceleration_structure::Device {
        &self.acceleration_structure
    }

    /// Ray tracing pipeline extension loader.
    pub fn ray_tracing_pipeline(&self) -> &ash::khr::ray_tracing_pipeline::Device {
        &self.ray_tracing_pipeline
    }

    /// Descriptor buffer extension loader.
    pub fn descriptor_buffer(&self) -> &ash::ext::descriptor_buffer::Device {
        &self.descriptor_buffer
    }

    /// Device address of a buffer.
    pub fn buffer_address(&self, buffer: vk::Buffer) -> vk::DeviceAddress {
        let info = vk::BufferDeviceAddressInfo::default().buffer(buffer);
        unsafe { self.device.get_buffer_device_address(&info) }
    }

    /// Wait for device to be idle.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn wait_idle(&self) -> Result<()> {
        unsafe {
            self.device.device_wait_idle()?;
        }
        Ok(())
    }
}

impl Drop for GpuContext {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();

            // The allocator frees its VkDeviceMemory blocks and must go before the device
            drop(self.allocator.lock().take());

            self.device.destroy_device(None);
            self.instance.destroy_instance(None);
        }
    }
}

/// Find queue families for graphics, compute, and transfer.
///
/// # Safety
/// The instance and physical device must be valid.
unsafe fn find_queue_families(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
) -> Result<QueueFamilyIndices> {
    let queue_families =
        unsafe { instance.get_physical_device_queue_family_properties(physical_device) };

    let mut graphics_family = None;
    let mut compute_family = None;
    let mut transfer_family = None;

    for (i, family) in (0u32..).zip(queue_families.iter()) {
        // Dedicated compute queue (no graphics)
        if family.queue_flags.contains(vk::QueueFlags::COMPUTE)
            && !family.queue_flags.contains(vk::QueueFlags::GRAPHICS)
            && compute_family.is_none()
        {
            compute_family = Some(i);
        }

        // Dedicated copy queue (no graphics or compute)
        if family.queue_flags.contains(vk::QueueFlags::TRANSFER)
            && !family.queue_flags.contains(vk::QueueFlags::GRAPHICS)
            && !family.queue_flags.contains(vk::QueueFlags::COMPUTE)
            && transfer_family.is_none()
        {
            transfer_family = Some(i);
        }

        if family.queue_flags.contains(vk::QueueFlags::GRAPHICS) && graphics_family.is_none() {
            graphics_family = Some(i);
        }
    }

    let graphics = graphics_family.ok_or(GpuError::NoSuitableDevice)?;
    let compute = compute_family.unwrap_or(graphics);
    let transfer = transfer_family.unwrap_or(compute);

    Ok(QueueFamilyIndices {
        graphics,
        compute,
        transfer,
    })
}

/// Create the logical device with the ray tracing feature set.
///
/// # Safety
/// The instance and physical device must be valid.
unsafe fn create_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    queue_families: &QueueFamilyIndices,
    windowed: bool,
) -> Result<ash::Device> {
    let mut unique_families = HashSet::new();
    unique_families.insert(queue_families.graphics);
    unique_families.insert(queue_families.compute);
    unique_families.insert(queue_families.transfer);

    let queue_priority = 1.0_f32;
    let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = unique_families
        .iter()
        .map(|&family| {
            vk::DeviceQueueCreateInfo::default()
                .queue_family_index(family)
                .queue_priorities(std::slice::from_ref(&queue_priority))
        })
        .collect();

    let extension_names: Vec<*const c_char> = required_device_extensions(windowed)
        .iter()
        .map(|ext| ext.as_ptr())
        .collect();

    let mut vulkan_1_3_features = vk::PhysicalDeviceVulkan13Features::default()
        .synchronization2(true)
        .maintenance4(true);

    let mut vulkan_1_2_features = vk::PhysicalDeviceVulkan12Features::default()
        .buffer_device_address(true)
        .timeline_semaphore(true)
        .descriptor_indexing(true)
        .runtime_descriptor_array(true)
        .descriptor_binding_partially_bound(true)
        .shader_sampled_image_array_non_uniform_indexing(true)
        .scalar_block_layout(true);

    let mut acceleration_structure_features =
        vk::PhysicalDeviceAccelerationStructureFeaturesKHR::default().acceleration_structure(true);
    let mut ray_tracing_features =
        vk::PhysicalDeviceRayTracingPipelineFeaturesKHR::default().ray_tracing_pipeline(true);
    let mut descriptor_buffer_features =
        vk::PhysicalDeviceDescriptorBufferFeaturesEXT::default().descriptor_buffer(true);
    let mut mutable_descriptor_features =
        vk::PhysicalDeviceMutableDescriptorTypeFeaturesEXT::default().mutable_descriptor_type(true);

    let features = vk::PhysicalDeviceFeatures::default()
        .shader_int64(true)
        .shader_uniform_buffer_array_dynamic_indexing(true)
        .shader_sampled_image_array_dynamic_indexing(true)
        .shader_storage_image_array_dynamic_indexing(true);

    let mut features2 = vk::PhysicalDeviceFeatures2::default()
        .features(features)
        .push_next(&mut vulkan_1_3_features)
        .push_next(&mut vulkan_1_2_features)
        .push_next(&mut acceleration_structure_features)
        .push_next(&mut ray_tracing_features)
        .push_next(&mut descriptor_buffer_features)
        .push_next(&mut mutable_descriptor_features);

    let device_create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_create_infos)
        .enabled_extension_names(&extension_names)
        .push_next(&mut features2);

    let device = unsafe { instance.create_device(physical_device, &device_create_info, None) }?;

    Ok(device)
}
