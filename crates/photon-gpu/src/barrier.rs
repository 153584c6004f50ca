//! Resource state transitions.
//!
//! Nothing tracks resource states: callers name both the current and the
//! next state of every transition they record.

use crate::memory::color_subresource_range;
use ash::vk;

/// Role a resource plays between two barriers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceState {
    Undefined,
    CopySource,
    CopyDestination,
    ShaderResource,
    UnorderedAccess,
    Present,
    AccelerationStructureBuild,
}

/// Pipeline stage, access mask and image layout of a state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateAccess {
    pub stage: vk::PipelineStageFlags2,
    pub access: vk::AccessFlags2,
    pub layout: vk::ImageLayout,
}

impl ResourceState {
    /// Synchronization scope of the state.
    pub fn access(self) -> StateAccess {
        let (stage, access, layout) = match self {
            Self::Undefined => (
                vk::PipelineStageFlags2::TOP_OF_PIPE,
                vk::AccessFlags2::NONE,
                vk::ImageLayout::UNDEFINED,
            ),
            Self::CopySource => (
                vk::PipelineStageFlags2::TRANSFER,
                vk::AccessFlags2::TRANSFER_READ,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            ),
            Self::CopyDestination => (
                vk::PipelineStageFlags2::TRANSFER,
                vk::AccessFlags2::TRANSFER_WRITE,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            ),
            Self::ShaderResource => (
                vk::PipelineStageFlags2::RAY_TRACING_SHADER_KHR,
                vk::AccessFlags2::SHADER_READ,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            ),
            Self::UnorderedAccess => (
                vk::PipelineStageFlags2::RAY_TRACING_SHADER_KHR,
                vk::AccessFlags2::SHADER_STORAGE_READ | vk::AccessFlags2::SHADER_STORAGE_WRITE,
                vk::ImageLayout::GENERAL,
            ),
            Self::Present => (
                vk::PipelineStageFlags2::ALL_COMMANDS,
                vk::AccessFlags2::NONE,
                vk::ImageLayout::PRESENT_SRC_KHR,
            ),
            Self::AccelerationStructureBuild => (
                vk::PipelineStageFlags2::ACCELERATION_STRUCTURE_BUILD_KHR,
                vk::AccessFlags2::ACCELERATION_STRUCTURE_READ_KHR
                    | vk::AccessFlags2::ACCELERATION_STRUCTURE_WRITE_KHR,
                vk::ImageLayout::UNDEFINED,
            ),
        };
        StateAccess {
            stage,
            access,
            layout,
        }
    }
}

/// Stateless helpers recording transitions into a command buffer.
pub struct ResourceBarrier;

impl ResourceBarrier {
    /// Barrier moving a color image between two states.
    pub fn image(
        image: vk::Image,
        from: ResourceState,
        to: ResourceState,
    ) -> vk::ImageMemoryBarrier2<'static> {
        let src = from.access();
        let dst = to.access();
        vk::ImageMemoryBarrier2::default()
            .src_stage_mask(src.stage)
            .src_access_mask(src.access)
            .dst_stage_mask(dst.stage)
            .dst_access_mask(dst.access)
            .old_layout(src.layout)
            .new_layout(dst.layout)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image)
            .subresource_range(color_subresource_range())
    }

    /// Barrier moving a whole buffer between two states.
    pub fn buffer(
        buffer: vk::Buffer,
        from: ResourceState,
        to: ResourceState,
    ) -> vk::BufferMemoryBarrier2<'static> {
        let src = from.access();
        let dst = to.access();
        vk::BufferMemoryBarrier2::default()
            .src_stage_mask(src.stage)
            .src_access_mask(src.access)
            .dst_stage_mask(dst.stage)
            .dst_access_mask(dst.access)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .buffer(buffer)
            .offset(0)
            .size(vk::WHOLE_SIZE)
    }

    /// Record an image transition.
    pub fn transition_image(
        device: &ash::Device,
        cmd: vk::CommandBuffer,
        image: vk::Image,
        from: ResourceState,
        to: ResourceState,
    ) {
        let barrier = Self::image(image, from, to);
        let dependency =
            vk::DependencyInfo::default().image_memory_barriers(std::slice::from_ref(&barrier));
        unsafe { device.cmd_pipeline_barrier2(cmd, &dependency) };
    }

    /// Record a buffer transition.
    pub fn transition_buffer(
        device: &ash::Device,
        cmd: vk::CommandBuffer,
        buffer: vk::Buffer,
        from: ResourceState,
        to: ResourceState,
    ) {
        let barrier = Self::buffer(buffer, from, to);
        let dependency =
            vk::DependencyInfo::default().buffer_memory_barriers(std::slice::from_ref(&barrier));
        unsafe { device.cmd_pipeline_barrier2(cmd, &dependency) };
    }

    /// Make finished acceleration structure builds visible to later builds and to tracing.
    pub fn acceleration_structure_built(device: &ash::Device, cmd: vk::CommandBuffer) {
        let build = ResourceState::AccelerationStructureBuild.access();
        let barrier = vk::MemoryBarrier2::default()
            .src_stage_mask(build.stage)
            .src_access_mask(vk::AccessFlags2::ACCELERATION_STRUCTURE_WRITE_KHR)
            .dst_stage_mask(build.stage | vk::PipelineStageFlags2::RAY_TRACING_SHADER_KHR)
            .dst_access_mask(vk::AccessFlags2::ACCELERATION_STRUCTURE_READ_KHR);
        let dependency =
            vk::DependencyInfo::default().memory_barriers(std::slice::from_ref(&barrier));
        unsafe { device.cmd_pipeline_barrier2(cmd, &dependency) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_transition_layouts() {
        let barrier = ResourceBarrier::image(
            vk::Image::null(),
            ResourceState::CopyDestination,
            ResourceState::ShaderResource,
        );
        assert_eq!(barrier.old_layout, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
        assert_eq!(barrier.new_layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        assert_eq!(barrier.src_access_mask, vk::AccessFlags2::TRANSFER_WRITE);
        assert_eq!(barrier.dst_access_mask, vk::AccessFlags2::SHADER_READ);
    }

    #[test]
    fn present_copy_round_trip() {
        let to_copy = ResourceBarrier::image(
            vk::Image::null(),
            ResourceState::Present,
            ResourceState::CopyDestination,
        );
        let back = ResourceBarrier::image(
            vk::Image::null(),
            ResourceState::CopyDestination,
            ResourceState::Present,
        );
        assert_eq!(to_copy.old_layout, back.new_layout);
        assert_eq!(to_copy.new_layout, back.old_layout);
        assert_eq!(back.new_layout, vk::ImageLayout::PRESENT_SRC_KHR);
    }

    #[test]
    fn render_target_uses_general_layout() {
        let access = ResourceState::UnorderedAccess.access();
        assert_eq!(access.layout, vk::ImageLayout::GENERAL);
        assert!(access.access.contains(vk::AccessFlags2::SHADER_STORAGE_WRITE));
    }

    #[test]
    fn buffer_barrier_covers_whole_buffer() {
        let barrier = ResourceBarrier::buffer(
            vk::Buffer::null(),
            ResourceState::CopyDestination,
            ResourceState::ShaderResource,
        );
        assert_eq!(barrier.offset, 0);
        assert_eq!(barrier.size, vk::WHOLE_SIZE);
        assert_eq!(
            barrier.dst_stage_mask,
            vk::PipelineStageFlags2::RAY_TRACING_SHADER_KHR
        );
    }
}
