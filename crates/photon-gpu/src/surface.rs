//! Presentation of the render target to a window.

use crate::barrier::{ResourceBarrier, ResourceState};
use crate::context::GpuContext;
use crate::error::{GpuError, Result};
use crate::swapchain::{calculate_extent, select_surface_format, Swapchain};
use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::sync::Arc;

/// Window surface, its swapchain and per-image state.
pub struct Presenter {
    surface: vk::SurfaceKHR,
    surface_loader: ash::khr::surface::Instance,
    swapchain_loader: ash::khr::swapchain::Device,
    swapchain: Swapchain,
    /// Current state of every swapchain image.
    image_states: Vec<ResourceState>,
    acquire_fence: vk::Fence,
    context: Arc<GpuContext>,
}

impl Presenter {
    /// Create the surface and a double-buffered swapchain for a window.
    pub fn new<W>(context: Arc<GpuContext>, window: &W, width: u32, height: u32) -> Result<Self>
    where
        W: HasDisplayHandle + HasWindowHandle,
    {
        let display = window
            .display_handle()
            .map_err(|e| GpuError::SurfaceCreation(format!("Failed to get display handle: {e}")))?;
        let window_handle = window
            .window_handle()
            .map_err(|e| GpuError::SurfaceCreation(format!("Failed to get window handle: {e}")))?;

        let surface = unsafe {
            ash_window::create_surface(
                &context.entry,
                &context.instance,
                display.as_raw(),
                window_handle.as_raw(),
                None,
            )
        }
        .map_err(|e| GpuError::SurfaceCreation(e.to_string()))?;

        let surface_loader = ash::khr::surface::Instance::new(&context.entry, &context.instance);
        let swapchain_loader = ash::khr::swapchain::Device::new(&context.instance, &context.device);

        let supported = unsafe {
            surface_loader.get_physical_device_surface_support(
                context.physical_device,
                context.queue_families.graphics,
                surface,
            )
        }
        .unwrap_or(false);
        if !supported {
            unsafe { surface_loader.destroy_surface(surface, None) };
            return Err(GpuError::SurfaceCreation(
                "Graphics queue cannot present to this surface".to_string(),
            ));
        }

        let acquire_fence =
            match unsafe { context.device.create_fence(&vk::FenceCreateInfo::default(), None) } {
                Ok(fence) => fence,
                Err(e) => {
                    unsafe { surface_loader.destroy_surface(surface, None) };
                    return Err(e.into());
                }
            };

        let swapchain = unsafe {
            create_swapchain(
                &context,
                &surface_loader,
                &swapchain_loader,
                surface,
                width,
                height,
                vk::SwapchainKHR::null(),
            )
        };
        let swapchain = match swapchain {
            Ok(swapchain) => swapchain,
            Err(e) => {
                unsafe {
                    context.device.destroy_fence(acquire_fence, None);
                    surface_loader.destroy_surface(surface, None);
                }
                return Err(e);
            }
        };

        Ok(Self {
            image_states: vec![ResourceState::Undefined; swapchain.images.len()],
            surface,
            surface_loader,
            swapchain_loader,
            swapchain,
            acquire_fence,
            context,
        })
    }

    /// Current swapchain extent.
    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent
    }

    /// Current swapchain format.
    pub fn format(&self) -> vk::Format {
        self.swapchain.format
    }

    /// Acquire the next backbuffer, blocking until it is available.
    ///
    /// Returns `None` when the swapchain is out of date.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn acquire(&mut self) -> Result<Option<u32>> {
        let device = &self.context.device;
        let result = unsafe {
            self.swapchain_loader.acquire_next_image(
                self.swapchain.swapchain,
                u64::MAX,
                vk::Semaphore::null(),
                self.acquire_fence,
            )
        };
        let index = match result {
            Ok((index, _suboptimal)) => index,
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        unsafe {
            device.wait_for_fences(&[self.acquire_fence], true, u64::MAX)?;
            device.reset_fences(&[self.acquire_fence])?;
        }
        Ok(Some(index))
    }

    /// Record a copy of `source` into backbuffer `index`, leaving it ready to present.
    ///
    /// `source` must be in the copy-source state.
    pub fn record_copy(
        &mut self,
        cmd: vk::CommandBuffer,
        source: vk::Image,
        source_extent: vk::Extent2D,
        index: u32,
    ) -> Result<()> {
        let device = &self.context.device;
        let slot = index as usize;
        let (Some(&target), Some(state)) = (
            self.swapchain.images.get(slot),
            self.image_states.get_mut(slot),
        ) else {
            return Err(GpuError::InvalidData(format!(
                "Backbuffer {index} does not exist"
            )));
        };

        ResourceBarrier::transition_image(
            device,
            cmd,
            target,
            *state,
            ResourceState::CopyDestination,
        );

        let subresource = vk::ImageSubresourceLayers {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            mip_level: 0,
            base_array_layer: 0,
            layer_count: 1,
        };
        let region = blit_region(subresource, source_extent, self.swapchain.extent);
        let blit = vk::BlitImageInfo2::default()
            .src_image(source)
            .src_image_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
            .dst_image(target)
            .dst_image_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .regions(std::slice::from_ref(&region))
            .filter(vk::Filter::NEAREST);
        unsafe { device.cmd_blit_image2(cmd, &blit) };

        ResourceBarrier::transition_image(
            device,
            cmd,
            target,
            ResourceState::CopyDestination,
            ResourceState::Present,
        );
        *state = ResourceState::Present;
        Ok(())
    }

    /// Present backbuffer `index`. Returns `true` if the swapchain should be recreated.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn present(&self, queue: vk::Queue, index: u32) -> Result<bool> {
        let swapchains = [self.swapchain.swapchain];
        let image_indices = [index];
        let present_info = vk::PresentInfoKHR::default()
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        match unsafe { self.swapchain_loader.queue_present(queue, &present_info) } {
            Ok(suboptimal) => Ok(suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(true),
            Err(e) => Err(e.into()),
        }
    }

    /// Recreate the swapchain at a new size. The device must be idle.
    pub fn recreate(&mut self, width: u32, height: u32) -> Result<()> {
        let swapchain = unsafe {
            create_swapchain(
                &self.context,
                &self.surface_loader,
                &self.swapchain_loader,
                self.surface,
                width,
                height,
                self.swapchain.swapchain,
            )
        }?;
        let old = std::mem::replace(&mut self.swapchain, swapchain);
        unsafe { old.destroy(&self.swapchain_loader) };
        self.image_states = vec![ResourceState::Undefined; self.swapchain.images.len()];
        Ok(())
    }
}

impl Drop for Presenter {
    fn drop(&mut self) {
        unsafe {
            let _ = self.context.device.device_wait_idle();
            self.swapchain.destroy(&self.swapchain_loader);
            self.context.device.destroy_fence(self.acquire_fence, None);
            self.surface_loader.destroy_surface(self.surface, None);
        }
    }
}

unsafe fn create_swapchain(
    context: &GpuContext,
    surface_loader: &ash::khr::surface::Instance,
    swapchain_loader: &ash::khr::swapchain::Device,
    surface: vk::SurfaceKHR,
    width: u32,
    height: u32,
    old_swapchain: vk::SwapchainKHR,
) -> Result<Swapchain> {
    let (capabilities, formats) = unsafe {
        (
            surface_loader
                .get_physical_device_surface_capabilities(context.physical_device, surface)?,
            surface_loader.get_physical_device_surface_formats(context.physical_device, surface)?,
        )
    };
    let format = select_surface_format(&formats)
        .ok_or_else(|| GpuError::SwapchainCreation("Surface reports no formats".to_string()))?;
    let extent = calculate_extent(&capabilities, width, height);

    unsafe {
        Swapchain::new(
            swapchain_loader,
            surface,
            &capabilities,
            format,
            extent,
            old_swapchain,
        )
    }
}

/// Whole-image blit from `source` to `target`, scaling when the extents differ.
fn blit_region(
    subresource: vk::ImageSubresourceLayers,
    source: vk::Extent2D,
    target: vk::Extent2D,
) -> vk::ImageBlit2<'static> {
    let corner = |extent: vk::Extent2D| vk::Offset3D {
        x: i32::try_from(extent.width).unwrap_or(i32::MAX),
        y: i32::try_from(extent.height).unwrap_or(i32::MAX),
        z: 1,
    };
    vk::ImageBlit2::default()
        .src_subresource(subresource)
        .src_offsets([vk::Offset3D::default(), corner(source)])
        .dst_subresource(subresource)
        .dst_offsets([vk::Offset3D::default(), corner(target)])
}
