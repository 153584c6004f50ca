//! The rendering device and command submission.

use crate::barrier::{ResourceBarrier, ResourceState};
use crate::capabilities::GpuCapabilities;
use crate::command::CommandList;
use crate::context::GpuContext;
use crate::descriptors::{DescriptorHeap, DescriptorSlot};
use crate::error::{GpuError, Result};
use crate::memory::GpuAllocator;
use crate::render_target::RenderTarget;
use crate::surface::Presenter;
use crate::sync::Fence;
use ash::vk;
use photon_core::constants::DESCRIPTOR_CAPACITY;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::sync::Arc;

/// Builder for creating a [`Device`].
pub struct DeviceBuilder {
    app_name: String,
    enable_validation: bool,
    descriptor_capacity: u32,
}

impl Default for DeviceBuilder {
    fn default() -> Self {
        Self {
            app_name: "Photon".to_string(),
            enable_validation: cfg!(debug_assertions),
            descriptor_capacity: DESCRIPTOR_CAPACITY,
        }
    }
}

impl DeviceBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the application name.
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = name.into();
        self
    }

    /// Enable or disable validation layers.
    pub fn validation(mut self, enable: bool) -> Self {
        self.enable_validation = enable;
        self
    }

    /// Set the number of descriptor table slots.
    pub fn descriptor_capacity(mut self, capacity: u32) -> Self {
        self.descriptor_capacity = capacity;
        self
    }

    /// Build a device presenting to `window`.
    pub fn build<W>(self, window: &W, width: u32, height: u32) -> Result<Device>
    where
        W: HasDisplayHandle + HasWindowHandle,
    {
        let display = window
            .display_handle()
            .map_err(|e| GpuError::SurfaceCreation(format!("Failed to get display handle: {e}")))?
            .as_raw();
        let context = Arc::new(GpuContext::new(
            &self.app_name,
            self.enable_validation,
            Some(display),
        )?);
        let presenter = Presenter::new(context.clone(), window, width, height)?;
        Device::new(context, self.descriptor_capacity, width, height, Some(presenter))
    }

    /// Build an off-screen device.
    pub fn build_headless(self, width: u32, height: u32) -> Result<Device> {
        let context = Arc::new(GpuContext::new(
            &self.app_name,
            self.enable_validation,
            None,
        )?);
        Device::new(context, self.descriptor_capacity, width, height, None)
    }
}

/// Owner of the queues, the command list, the fence, the descriptor table,
/// the render target and the presentation surface.
///
/// All recording goes through the single command list; every operation that
/// needs its results before returning submits and flushes.
pub struct Device {
    presenter: Option<Presenter>,
    render_target: RenderTarget,
    heap: DescriptorHeap,
    fence: Fence,
    command_list: CommandList,
    graphics_queue: vk::Queue,
    compute_queue: vk::Queue,
    copy_queue: vk::Queue,
    allocator: GpuAllocator,
    context: Arc<GpuContext>,
}

impl Device {
    fn new(
        context: Arc<GpuContext>,
        descriptor_capacity: u32,
        width: u32,
        height: u32,
        presenter: Option<Presenter>,
    ) -> Result<Self> {
        let families = context.queue_families;
        let (graphics_queue, compute_queue, copy_queue) = unsafe {
            (
                context.device.get_device_queue(families.graphics, 0),
                context.device.get_device_queue(families.compute, 0),
                context.device.get_device_queue(families.transfer, 0),
            )
        };

        let allocator = GpuAllocator::new(context.clone());
        let command_list = CommandList::new(context.clone(), families.graphics)?;
        let fence = Fence::new(context.clone())?;
        let mut heap = DescriptorHeap::new(&allocator, descriptor_capacity)?;

        // The render target always owns the first slot
        let slot = heap.allocate()?;
        let render_target = RenderTarget::new(&allocator, &heap, slot, width, height)?;

        let mut device = Self {
            presenter,
            render_target,
            heap,
            fence,
            command_list,
            graphics_queue,
            compute_queue,
            copy_queue,
            allocator,
            context,
        };
        device.initialize_render_target()?;

        tracing::info!(
            "Device ready: {}x{} render target, {}",
            width,
            height,
            if device.presenter.is_some() {
                "windowed"
            } else {
                "headless"
            }
        );
        Ok(device)
    }

    fn initialize_render_target(&mut self) -> Result<()> {
        let image = self.render_target.image();
        self.record_and_flush(|device, cmd| {
            ResourceBarrier::transition_image(
                device,
                cmd,
                image,
                ResourceState::Undefined,
                ResourceState::UnorderedAccess,
            );
            Ok(())
        })
    }

    /// Shared Vulkan context.
    pub fn context(&self) -> &Arc<GpuContext> {
        &self.context
    }

    /// Memory allocator.
    pub fn allocator(&self) -> &GpuAllocator {
        &self.allocator
    }

    /// Raw logical device.
    pub fn raw(&self) -> &ash::Device {
        &self.context.device
    }

    /// GPU capabilities.
    pub fn capabilities(&self) -> &GpuCapabilities {
        &self.context.capabilities
    }

    /// Graphics queue; all recorded work is submitted here.
    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    /// Compute queue.
    pub fn compute_queue(&self) -> vk::Queue {
        self.compute_queue
    }

    /// Copy queue.
    pub fn copy_queue(&self) -> vk::Queue {
        self.copy_queue
    }

    /// The command buffer currently being recorded.
    pub fn command_buffer(&self) -> vk::CommandBuffer {
        self.command_list.handle()
    }

    /// Whether the command list is mid-recording.
    pub fn is_recording(&self) -> bool {
        self.command_list.is_recording()
    }

    /// Descriptor table.
    pub fn heap(&self) -> &DescriptorHeap {
        &self.heap
    }

    /// Allocate a descriptor table slot.
    pub fn allocate_descriptor(&mut self) -> Result<DescriptorSlot> {
        self.heap.allocate()
    }

    /// The render target.
    pub fn render_target(&self) -> &RenderTarget {
        &self.render_target
    }

    /// Render target width and height.
    pub fn size(&self) -> (u32, u32) {
        let extent = self.render_target.extent();
        (extent.width, extent.height)
    }

    /// Last value signalled on the device fence.
    pub fn fence_value(&self) -> u64 {
        self.fence.value()
    }

    /// Begin a recording scope.
    pub fn reset_command_list(&mut self) -> Result<()> {
        self.command_list.reset()
    }

    /// End the recording scope and submit it without waiting.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn finish_and_submit(&mut self) -> Result<()> {
        self.command_list.close()?;
        self.command_list.submit(self.graphics_queue)
    }

    /// Block until all submitted work has completed.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn flush(&mut self) -> Result<()> {
        self.fence.signal(self.graphics_queue)
    }

    /// Record `f`, then submit everything recorded so far and wait for it.
    ///
    /// Opens the command list if needed; a list that was open before is
    /// reopened afterwards so recording can continue.
    pub fn record_and_flush<F>(&mut self, f: F) -> Result<()>
    where
        F: FnOnce(&ash::Device, vk::CommandBuffer) -> Result<()>,
    {
        let was_recording = self.command_list.is_recording();
        if !was_recording {
            self.command_list.reset()?;
        }
        f(&self.context.device, self.command_list.handle())?;
        self.finish_and_submit()?;
        self.flush()?;
        if was_recording {
            self.command_list.reset()?;
        }
        Ok(())
    }

    /// Copy the render target to the next backbuffer and present it.
    ///
    /// Ends the current recording scope; a headless device only submits and flushes.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn present_frame(&mut self) -> Result<()> {
        if !self.command_list.is_recording() {
            return Err(GpuError::InvalidState(
                "present_frame requires an open command list".to_string(),
            ));
        }

        let Some(presenter) = self.presenter.as_mut() else {
            self.finish_and_submit()?;
            return self.flush();
        };

        let Some(index) = presenter.acquire()? else {
            tracing::debug!("Swapchain out of date, skipping present");
            self.finish_and_submit()?;
            self.flush()?;
            let (width, height) = self.size();
            return self.recreate_swapchain(width, height);
        };

        let device = &self.context.device;
        let cmd = self.command_list.handle();
        let image = self.render_target.image();

        ResourceBarrier::transition_image(
            device,
            cmd,
            image,
            ResourceState::UnorderedAccess,
            ResourceState::CopySource,
        );
        presenter.record_copy(cmd, image, self.render_target.extent(), index)?;
        ResourceBarrier::transition_image(
            device,
            cmd,
            image,
            ResourceState::CopySource,
            ResourceState::UnorderedAccess,
        );

        self.finish_and_submit()?;
        self.flush()?;

        let outdated = match self.presenter.as_ref() {
            Some(presenter) => presenter.present(self.graphics_queue, index)?,
            None => false,
        };
        if outdated {
            let (width, height) = self.size();
            self.recreate_swapchain(width, height)?;
        }
        Ok(())
    }

    fn recreate_swapchain(&mut self, width: u32, height: u32) -> Result<()> {
        if let Some(presenter) = self.presenter.as_mut() {
            self.context.wait_idle()?;
            presenter.recreate(width, height)?;
        }
        Ok(())
    }

    /// Recreate the render target and swapchain at a new size.
    ///
    /// The render target keeps its descriptor slot.
    pub fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        if self.command_list.is_recording() {
            return Err(GpuError::InvalidState(
                "Cannot resize while a command list is recording".to_string(),
            ));
        }
        if width == 0 || height == 0 {
            return Ok(());
        }

        self.context.wait_idle()?;
        let slot = self.render_target.slot();
        self.render_target = RenderTarget::new(&self.allocator, &self.heap, slot, width, height)?;
        self.initialize_render_target()?;
        self.recreate_swapchain(width, height)?;

        tracing::debug!("Resized to {width}x{height}");
        Ok(())
    }

    /// Wait for the device to be idle.
    pub fn wait_idle(&self) -> Result<()> {
        self.context.wait_idle()
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        if let Err(e) = self.context.wait_idle() {
            tracing::error!("Failed to wait for device idle on shutdown: {e}");
        }
    }
}
