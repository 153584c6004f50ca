//! Synchronization primitives.

use crate::context::GpuContext;
use crate::error::Result;
use ash::vk;
use std::sync::Arc;

/// Monotonic CPU/GPU fence backed by a timeline semaphore.
///
/// Every [`signal`](Self::signal) bumps the counter, has the queue signal the
/// new value once all previously submitted work finished, and blocks until
/// the GPU gets there.
pub struct Fence {
    semaphore: vk::Semaphore,
    value: u64,
    context: Arc<GpuContext>,
}

impl Fence {
    /// Create a fence with its counter at zero.
    pub fn new(context: Arc<GpuContext>) -> Result<Self> {
        let mut type_info = vk::SemaphoreTypeCreateInfo::default()
            .semaphore_type(vk::SemaphoreType::TIMELINE)
            .initial_value(0);
        let create_info = vk::SemaphoreCreateInfo::default().push_next(&mut type_info);
        let semaphore = unsafe { context.device.create_semaphore(&create_info, None) }?;

        Ok(Self {
            semaphore,
            value: 0,
            context,
        })
    }

    /// Last value signalled on the fence.
    pub fn value(&self) -> u64 {
        self.value
    }

    /// Value the GPU has reached so far.
    pub fn completed_value(&self) -> Result<u64> {
        let value = unsafe {
            self.context
                .device
                .get_semaphore_counter_value(self.semaphore)
        }?;
        Ok(value)
    }

    /// Signal the next counter value on `queue` and wait for it.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn signal(&mut self, queue: vk::Queue) -> Result<()> {
        let target = self.value + 1;
        let device = &self.context.device;

        let signal_info = vk::SemaphoreSubmitInfo::default()
            .semaphore(self.semaphore)
            .value(target)
            .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS);
        let submit_info =
            vk::SubmitInfo2::default().signal_semaphore_infos(std::slice::from_ref(&signal_info));

        unsafe { device.queue_submit2(queue, &[submit_info], vk::Fence::null()) }?;
        self.value = target;

        let semaphores = [self.semaphore];
        let values = [target];
        let wait_info = vk::SemaphoreWaitInfo::default()
            .semaphores(&semaphores)
            .values(&values);
        unsafe { device.wait_semaphores(&wait_info, u64::MAX) }?;

        Ok(())
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe {
            self.context.device.destroy_semaphore(self.semaphore, None);
        }
    }
}
