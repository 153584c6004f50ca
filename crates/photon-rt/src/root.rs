//! Per-dispatch root arguments, pushed as push constants.

use ash::vk;

/// Maximum number of constant buffers a pipeline may bind.
pub const MAX_CONSTANT_BUFFERS: usize = 4;

/// Shader stages that see the root arguments.
pub const ROOT_STAGES: vk::ShaderStageFlags = vk::ShaderStageFlags::from_raw(
    vk::ShaderStageFlags::RAYGEN_KHR.as_raw()
        | vk::ShaderStageFlags::MISS_KHR.as_raw()
        | vk::ShaderStageFlags::CLOSEST_HIT_KHR.as_raw(),
);

/// Root arguments, mirrored by `RootArguments` in the shader header.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct RootArguments {
    pub tlas: u64,
    pub vertices: u64,
    pub indices: u64,
    pub instances: u64,
    /// Zero when the scene has no area lights.
    pub lights: u64,
    pub render_target: u32,
    pub texture_base: u32,
    pub environment_map: u32,
    pub light_count: u32,
    /// Descriptor slots of the pipeline's constant buffers, in reflection order.
    pub constant_buffers: [u32; MAX_CONSTANT_BUFFERS],
}

impl RootArguments {
    /// Size of the push constant range.
    pub const SIZE: u32 = std::mem::size_of::<Self>() as u32;

    /// The push constant range covering the root arguments.
    pub fn push_constant_range() -> vk::PushConstantRange {
        vk::PushConstantRange::default()
            .stage_flags(ROOT_STAGES)
            .offset(0)
            .size(Self::SIZE)
    }

    /// Record the push.
    pub fn push(&self, device: &ash::Device, cmd: vk::CommandBuffer, layout: vk::PipelineLayout) {
        unsafe {
            device.cmd_push_constants(cmd, layout, ROOT_STAGES, 0, bytemuck::bytes_of(self));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::offset_of;

    #[test]
    fn root_arguments_layout() {
        assert_eq!(RootArguments::SIZE, 72);
        assert_eq!(offset_of!(RootArguments, tlas), 0);
        assert_eq!(offset_of!(RootArguments, lights), 32);
        assert_eq!(offset_of!(RootArguments, render_target), 40);
        assert_eq!(offset_of!(RootArguments, light_count), 52);
        assert_eq!(offset_of!(RootArguments, constant_buffers), 56);
    }

    #[test]
    fn fits_guaranteed_push_constant_space() {
        // Every Vulkan device offers at least 128 bytes
        assert!(RootArguments::push_constant_range().size <= 128);
    }
}
