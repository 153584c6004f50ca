//! Storage image the ray-generation shader writes into.

use crate::descriptors::{DescriptorHeap, DescriptorSlot};
use crate::error::Result;
use crate::memory::{GpuAllocator, GpuImage};
use ash::vk;
use gpu_allocator::MemoryLocation;

/// Format of the render target.
pub const RENDER_TARGET_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;

/// Render target image and the descriptor slot holding its storage view.
pub struct RenderTarget {
    image: GpuImage,
    slot: DescriptorSlot,
}

impl RenderTarget {
    /// Create the image and write its storage view into `slot`.
    ///
    /// The image starts out undefined; the caller transitions it to unordered access.
    pub fn new(
        allocator: &GpuAllocator,
        heap: &DescriptorHeap,
        slot: DescriptorSlot,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        let create_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(RENDER_TARGET_FORMAT)
            .extent(vk::Extent3D {
                width: width.max(1),
                height: height.max(1),
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(vk::ImageUsageFlags::STORAGE | vk::ImageUsageFlags::TRANSFER_SRC)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = allocator.create_image(&create_info, MemoryLocation::GpuOnly, "render_target")?;
        heap.write_storage_image(&slot, image.view)?;

        Ok(Self { image, slot })
    }

    /// Raw image handle.
    pub fn image(&self) -> vk::Image {
        self.image.image
    }

    /// Descriptor slot of the storage view.
    pub fn slot(&self) -> DescriptorSlot {
        self.slot
    }

    /// Size in pixels.
    pub fn extent(&self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.image.extent.width,
            height: self.image.extent.height,
        }
    }
}
