//! GPU memory management.
//!
//! Buffers and images own their allocation and a handle to the shared
//! context; dropping them returns the memory to the allocator.

use crate::context::GpuContext;
use crate::error::{GpuError, Result};
use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;
use std::sync::Arc;

/// Cloneable allocation front-end over the context's allocator.
#[derive(Clone)]
pub struct GpuAllocator {
    context: Arc<GpuContext>,
}

impl GpuAllocator {
    /// Create an allocator handle for the context.
    pub fn new(context: Arc<GpuContext>) -> Self {
        Self { context }
    }

    /// The shared context this allocator allocates from.
    pub fn context(&self) -> &Arc<GpuContext> {
        &self.context
    }

    fn allocate(
        &self,
        name: &str,
        requirements: vk::MemoryRequirements,
        location: MemoryLocation,
        linear: bool,
    ) -> Result<Allocation> {
        self.context
            .allocator
            .lock()
            .as_mut()
            .ok_or_else(|| GpuError::InvalidState("Allocator already shut down".to_string()))?
            .allocate(&AllocationCreateDesc {
                name,
                requirements,
                location,
                linear,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .map_err(|e| GpuError::ResourceCreation(format!("{name}: {e}")))
    }

    /// Allocate a buffer.
    pub fn create_buffer(
        &self,
        size: u64,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
        name: &str,
    ) -> Result<GpuBuffer> {
        if size == 0 {
            return Err(GpuError::InvalidData(format!(
                "{name}: buffers cannot be zero-sized"
            )));
        }

        let device = &self.context.device;
        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.create_buffer(&buffer_info, None) }?;
        let requirements = unsafe { device.get_buffer_memory_requirements(buffer) };

        let allocation = match self.allocate(name, requirements, location, true) {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        // From here on the buffer cleans up after itself
        let gpu_buffer = GpuBuffer {
            buffer,
            allocation: Some(allocation),
            size,
            context: self.context.clone(),
        };
        if let Some(allocation) = &gpu_buffer.allocation {
            unsafe { device.bind_buffer_memory(buffer, allocation.memory(), allocation.offset()) }?;
        }

        tracing::debug!("Created buffer {name} ({size} bytes, {location:?})");
        Ok(gpu_buffer)
    }

    /// Allocate a 2D color image with a matching view.
    pub fn create_image(
        &self,
        create_info: &vk::ImageCreateInfo,
        location: MemoryLocation,
        name: &str,
    ) -> Result<GpuImage> {
        let device = &self.context.device;
        let image = unsafe { device.create_image(create_info, None) }?;
        let requirements = unsafe { device.get_image_memory_requirements(image) };

        let allocation = match self.allocate(name, requirements, location, false) {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.destroy_image(image, None) };
                return Err(e);
            }
        };

        let mut gpu_image = GpuImage {
            image,
            view: vk::ImageView::null(),
            allocation: Some(allocation),
            format: create_info.format,
            extent: create_info.extent,
            context: self.context.clone(),
        };
        if let Some(allocation) = &gpu_image.allocation {
            unsafe { device.bind_image_memory(image, allocation.memory(), allocation.offset()) }?;
        }

        let view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(create_info.format)
            .subresource_range(color_subresource_range());
        gpu_image.view = unsafe { device.create_image_view(&view_info, None) }
            .map_err(|e| GpuError::ResourceCreation(format!("{name} view: {e}")))?;

        tracing::debug!(
            "Created image {name} ({}x{}, {:?})",
            create_info.extent.width,
            create_info.extent.height,
            create_info.format
        );
        Ok(gpu_image)
    }
}

/// Full subresource range of a single-mip, single-layer color image.
pub fn color_subresource_range() -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    }
}

/// A GPU buffer with its allocation.
pub struct GpuBuffer {
    pub buffer: vk::Buffer,
    allocation: Option<Allocation>,
    pub size: u64,
    context: Arc<GpuContext>,
}

impl GpuBuffer {
    /// Get the device address of this buffer.
    pub fn device_address(&self) -> vk::DeviceAddress {
        self.context.buffer_address(self.buffer)
    }

    /// Host pointer to the buffer memory, if host-visible.
    pub fn mapped_ptr(&self) -> Option<*mut u8> {
        self.allocation
            .as_ref()
            .and_then(Allocation::mapped_ptr)
            .map(|p| p.as_ptr().cast::<u8>())
    }

    /// Mapped memory as a byte slice, if host-visible.
    pub fn mapped_slice(&self) -> Option<&[u8]> {
        let size = usize::try_from(self.size).ok()?;
        self.mapped_ptr()
            .map(|ptr| unsafe { std::slice::from_raw_parts(ptr, size) })
    }

    /// Write raw bytes to the buffer at the given offset (must be host-visible).
    pub fn write_bytes(&self, offset: u64, data: &[u8]) -> Result<()> {
        let ptr = self
            .mapped_ptr()
            .ok_or_else(|| GpuError::InvalidState("Buffer not mapped".to_string()))?;

        let end = offset
            .checked_add(data.len() as u64)
            .ok_or_else(|| GpuError::InvalidState("Offset overflow".to_string()))?;
        if end > self.size {
            return Err(GpuError::InvalidData(format!(
                "Write of {} bytes at {offset} exceeds buffer size {}",
                data.len(),
                self.size
            )));
        }

        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.add(offset as usize), data.len());
        }

        Ok(())
    }

    /// Write plain-old-data values to the start of the buffer (must be host-visible).
    pub fn write<T: bytemuck::Pod>(&self, data: &[T]) -> Result<()> {
        self.write_bytes(0, bytemuck::cast_slice(data))
    }
}

impl Drop for GpuBuffer {
    fn drop(&mut self) {
        if let Some(allocation) = self.allocation.take() {
            if let Some(allocator) = self.context.allocator.lock().as_mut() {
                if let Err(e) = allocator.free(allocation) {
                    tracing::error!("Failed to free buffer allocation: {e}");
                }
            }
        }
        unsafe {
            self.context.device.destroy_buffer(self.buffer, None);
        }
    }
}

/// A GPU image, its default view and its allocation.
pub struct GpuImage {
    pub image: vk::Image,
    pub view: vk::ImageView,
    allocation: Option<Allocation>,
    pub format: vk::Format,
    pub extent: vk::Extent3D,
    context: Arc<GpuContext>,
}

impl Drop for GpuImage {
    fn drop(&mut self) {
        unsafe {
            if self.view != vk::ImageView::null() {
                self.context.device.destroy_image_view(self.view, None);
            }
        }
        if let Some(allocation) = self.allocation.take() {
            if let Some(allocator) = self.context.allocator.lock().as_mut() {
                if let Err(e) = allocator.free(allocation) {
                    tracing::error!("Failed to free image allocation: {e}");
                }
            }
        }
        unsafe {
            self.context.device.destroy_image(self.image, None);
        }
    }
}
