//! The device's single reusable command list.

use crate::context::GpuContext;
use crate::error::{GpuError, Result};
use ash::vk;
use std::sync::Arc;

/// One command pool and one primary command buffer, recorded from a single thread.
pub struct CommandList {
    pool: vk::CommandPool,
    buffer: vk::CommandBuffer,
    recording: bool,
    context: Arc<GpuContext>,
}

impl CommandList {
    /// Create a command list for the given queue family.
    pub fn new(context: Arc<GpuContext>, queue_family: u32) -> Result<Self> {
        let device = &context.device;
        let create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let pool = unsafe { device.create_command_pool(&create_info, None) }?;

        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let buffer = match unsafe { device.allocate_command_buffers(&alloc_info) } {
            Ok(buffers) => buffers.into_iter().next(),
            Err(e) => {
                unsafe { device.destroy_command_pool(pool, None) };
                return Err(e.into());
            }
        };
        let Some(buffer) = buffer else {
            unsafe { device.destroy_command_pool(pool, None) };
            return Err(GpuError::ResourceCreation(
                "No command buffer allocated".to_string(),
            ));
        };

        Ok(Self {
            pool,
            buffer,
            recording: false,
            context,
        })
    }

    /// Raw command buffer handle.
    pub fn handle(&self) -> vk::CommandBuffer {
        self.buffer
    }

    /// Whether commands are currently being recorded.
    pub fn is_recording(&self) -> bool {
        self.recording
    }

    /// Reset the buffer and begin recording.
    pub fn reset(&mut self) -> Result<()> {
        let device = &self.context.device;
        unsafe {
            device.reset_command_buffer(self.buffer, vk::CommandBufferResetFlags::empty())?;
            let begin_info = vk::CommandBufferBeginInfo::default()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            device.begin_command_buffer(self.buffer, &begin_info)?;
        }
        self.recording = true;
        Ok(())
    }

    /// End recording.
    pub fn close(&mut self) -> Result<()> {
        if !self.recording {
            return Err(GpuError::InvalidState(
                "Command list is not recording".to_string(),
            ));
        }
        unsafe { self.context.device.end_command_buffer(self.buffer) }?;
        self.recording = false;
        Ok(())
    }

    /// Submit the closed buffer to `queue` without waiting.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn submit(&self, queue: vk::Queue) -> Result<()> {
        if self.recording {
            return Err(GpuError::InvalidState(
                "Command list must be closed before submission".to_string(),
            ));
        }
        let buffer_info = vk::CommandBufferSubmitInfo::default().command_buffer(self.buffer);
        let submit_info =
            vk::SubmitInfo2::default().command_buffer_infos(std::slice::from_ref(&buffer_info));
        unsafe {
            self.context
                .device
                .queue_submit2(queue, &[submit_info], vk::Fence::null())
        }?;
        Ok(())
    }
}

impl Drop for CommandList {
    fn drop(&mut self) {
        unsafe {
            // Freed together with the pool
            self.context.device.destroy_command_pool(self.pool, None);
        }
    }
}
