//! Swapchain management.

use crate::error::{GpuError, Result};
use ash::vk;

/// Number of presentation buffers.
pub const BACK_BUFFER_COUNT: u32 = 2;

/// Swapchain images, written only by transfer commands.
pub struct Swapchain {
    pub swapchain: vk::SwapchainKHR,
    pub images: Vec<vk::Image>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
}

impl Swapchain {
    /// Create a new FIFO swapchain.
    ///
    /// # Safety
    /// All handles must be valid.
    pub unsafe fn new(
        swapchain_loader: &ash::khr::swapchain::Device,
        surface: vk::SurfaceKHR,
        surface_capabilities: &vk::SurfaceCapabilitiesKHR,
        surface_format: vk::SurfaceFormatKHR,
        extent: vk::Extent2D,
        old_swapchain: vk::SwapchainKHR,
    ) -> Result<Self> {
        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface)
            .min_image_count(select_image_count(surface_capabilities))
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::TRANSFER_DST)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(surface_capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(vk::PresentModeKHR::FIFO)
            .clipped(true)
            .old_swapchain(old_swapchain);

        let swapchain = unsafe { swapchain_loader.create_swapchain(&create_info, None) }
            .map_err(|e| GpuError::SwapchainCreation(e.to_string()))?;

        let images = match unsafe { swapchain_loader.get_swapchain_images(swapchain) } {
            Ok(images) => images,
            Err(e) => {
                unsafe { swapchain_loader.destroy_swapchain(swapchain, None) };
                return Err(e.into());
            }
        };

        tracing::debug!(
            "Created swapchain: {}x{} {:?}, {} images",
            extent.width,
            extent.height,
            surface_format.format,
            images.len()
        );

        Ok(Self {
            swapchain,
            images,
            format: surface_format.format,
            extent,
        })
    }

    /// Destroy the swapchain.
    ///
    /// # Safety
    /// The swapchain must not be in use.
    pub unsafe fn destroy(&self, swapchain_loader: &ash::khr::swapchain::Device) {
        unsafe { swapchain_loader.destroy_swapchain(self.swapchain, None) };
    }
}

/// Select the surface format, preferring 8-bit UNORM so the render target can be copied as is.
pub fn select_surface_format(available: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    [vk::Format::R8G8B8A8_UNORM, vk::Format::B8G8R8A8_UNORM]
        .iter()
        .find_map(|&wanted| {
            available.iter().copied().find(|format| {
                format.format == wanted && format.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
            })
        })
        .or_else(|| available.first().copied())
}

/// Double buffering within the surface's limits.
pub fn select_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let count = BACK_BUFFER_COUNT.max(capabilities.min_image_count);
    if capabilities.max_image_count > 0 {
        count.min(capabilities.max_image_count)
    } else {
        count
    }
}

/// Calculate swapchain extent.
pub fn calculate_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    desired_width: u32,
    desired_height: u32,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        capabilities.current_extent
    } else {
        vk::Extent2D {
            width: desired_width.clamp(
                capabilities.min_image_extent.width,
                capabilities.max_image_extent.width,
            ),
            height: desired_height.clamp(
                capabilities.min_image_extent.height,
                capabilities.max_image_extent.height,
            ),
        }
    }
}
