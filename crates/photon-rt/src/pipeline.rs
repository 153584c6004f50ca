//! Ray tracing pipeline with reflected constant buffers.

use crate::constants::ConstantBuffer;
use crate::reflect::{self, ConstantBufferLayout, ExecutionModel};
use crate::root::{RootArguments, MAX_CONSTANT_BUFFERS};
use crate::sbt::ShaderTable;
use ash::vk;
use gpu_allocator::MemoryLocation;
use photon_core::constants::CONSTANT_BUFFER_ALIGNMENT;
use photon_gpu::{Device, GpuContext, GpuError, Result};
use std::ffi::CString;
use std::sync::Arc;

/// Ray payload: color, throughput, depth, flags and RNG state.
pub const MAX_PAYLOAD_SIZE: u32 = 36;
/// Barycentric hit attributes with room to spare.
pub const MAX_ATTRIBUTE_SIZE: u32 = 16;
/// Requested trace recursion depth before clamping to the device limit.
pub const MAX_RECURSION_DEPTH: u32 = 8;

/// Where one pipeline stage comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageSource {
    /// Index into the module list.
    pub module: usize,
    /// Entry point name.
    pub entry: String,
}

/// Validated pipeline contents, gathered from module reflection alone.
#[derive(Debug, Clone)]
pub struct PipelinePlan {
    pub ray_generation: StageSource,
    pub miss: StageSource,
    pub closest_hit: StageSource,
    /// Constant buffers merged by block name, in discovery order.
    pub constant_buffers: Vec<ConstantBufferLayout>,
}

impl PipelinePlan {
    /// Reflect every module and check the pipeline's fixed contract.
    pub fn from_modules(modules: &[&[u32]]) -> Result<Self> {
        let mut ray_generation = None;
        let mut miss = None;
        let mut closest_hit = None;
        let mut constant_buffers: Vec<ConstantBufferLayout> = Vec::new();

        for (module, words) in modules.iter().enumerate() {
            let reflection = reflect::reflect(words)?;

            if reflection.max_payload_size > MAX_PAYLOAD_SIZE {
                return Err(GpuError::Compile(format!(
                    "Module {module}: ray payload of {} bytes exceeds {MAX_PAYLOAD_SIZE}",
                    reflection.max_payload_size
                )));
            }
            if reflection.max_attribute_size > MAX_ATTRIBUTE_SIZE {
                return Err(GpuError::Compile(format!(
                    "Module {module}: hit attributes of {} bytes exceed {MAX_ATTRIBUTE_SIZE}",
                    reflection.max_attribute_size
                )));
            }

            for entry in reflection.entry_points {
                let slot = match entry.model {
                    ExecutionModel::RayGeneration => &mut ray_generation,
                    ExecutionModel::Miss => &mut miss,
                    ExecutionModel::ClosestHit => &mut closest_hit,
                    other => {
                        return Err(GpuError::Compile(format!(
                            "Unsupported export {} ({other:?})",
                            entry.name
                        )))
                    }
                };
                if slot.is_some() {
                    return Err(GpuError::Compile(format!(
                        "Duplicate {:?} export {}",
                        entry.model, entry.name
                    )));
                }
                *slot = Some(StageSource {
                    module,
                    entry: entry.name,
                });
            }

            for layout in reflection.constant_buffers {
                match constant_buffers.iter().find(|c| c.name == layout.name) {
                    Some(existing) if *existing != layout => {
                        return Err(GpuError::Compile(format!(
                            "Constant buffer {} declared with different layouts",
                            layout.name
                        )));
                    }
                    Some(_) => {}
                    None => constant_buffers.push(layout),
                }
            }
        }

        if constant_buffers.len() > MAX_CONSTANT_BUFFERS {
            return Err(GpuError::Compile(format!(
                "{} constant buffers, at most {MAX_CONSTANT_BUFFERS} are supported",
                constant_buffers.len()
            )));
        }

        let missing = |what: &str| GpuError::Compile(format!("No {what} export"));
        Ok(Self {
            ray_generation: ray_generation.ok_or_else(|| missing("ray generation"))?,
            miss: miss.ok_or_else(|| missing("miss"))?,
            closest_hit: closest_hit.ok_or_else(|| missing("closest hit"))?,
            constant_buffers,
        })
    }
}

/// Constant buffer allocation size: reflected size rounded up to the alignment.
pub fn constant_buffer_size(reflected: u32) -> u64 {
    u64::from(reflected.max(1).next_multiple_of(CONSTANT_BUFFER_ALIGNMENT))
}

/// The path tracing pipeline, its constant buffers and its shader table.
pub struct ShaderPipeline {
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
    constant_buffers: Vec<ConstantBuffer>,
    shader_table: Option<ShaderTable>,
    context: Arc<GpuContext>,
}

impl ShaderPipeline {
    /// Build the pipeline from SPIR-V modules holding one ray generation,
    /// one miss and one closest hit entry point between them.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn load(device: &mut Device, modules: &[&[u32]]) -> Result<Self> {
        let plan = PipelinePlan::from_modules(modules)?;
        let context = device.context().clone();
        let raw = context.device();

        let set_layouts = device.heap().set_layouts();
        let push_constant_range = RootArguments::push_constant_range();
        let layout_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(&set_layouts)
            .push_constant_ranges(std::slice::from_ref(&push_constant_range));
        let layout = unsafe { raw.create_pipeline_layout(&layout_info, None) }?;

        let pipeline = match create_pipeline(&context, device, &plan, modules, layout) {
            Ok(pipeline) => pipeline,
            Err(e) => {
                unsafe { raw.destroy_pipeline_layout(layout, None) };
                return Err(e);
            }
        };

        let mut shader_pipeline = Self {
            pipeline,
            layout,
            constant_buffers: Vec::with_capacity(plan.constant_buffers.len()),
            shader_table: None,
            context: context.clone(),
        };

        for cb_layout in plan.constant_buffers {
            let size = constant_buffer_size(cb_layout.size);
            let buffer = device.allocator().create_buffer(
                size,
                vk::BufferUsageFlags::UNIFORM_BUFFER | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
                MemoryLocation::CpuToGpu,
                &cb_layout.name,
            )?;
            buffer.write_bytes(0, &vec![0; size as usize])?;
            let slot = device.allocate_descriptor()?;
            device
                .heap()
                .write_uniform_buffer(&slot, buffer.device_address(), size)?;
            tracing::debug!(
                "Constant buffer {}: {} variables, {size} bytes in slot {}",
                cb_layout.name,
                cb_layout.variables.len(),
                slot.index
            );
            shader_pipeline
                .constant_buffers
                .push(ConstantBuffer::new(cb_layout, buffer, slot.index));
        }

        tracing::info!(
            "Ray tracing pipeline loaded from {} modules with {} constant buffers",
            modules.len(),
            shader_pipeline.constant_buffers.len()
        );
        Ok(shader_pipeline)
    }

    /// Write the shader binding table for this pipeline.
    pub fn build_shader_table(&mut self, device: &Device) -> Result<()> {
        self.shader_table = Some(ShaderTable::new(device, self.pipeline)?);
        Ok(())
    }

    /// The shader table, once built.
    pub fn shader_table(&self) -> Result<&ShaderTable> {
        self.shader_table
            .as_ref()
            .ok_or_else(|| GpuError::InvalidState("Shader table not built".to_string()))
    }

    /// Write raw bytes to `variable` of constant buffer `buffer`.
    pub fn update_constant(&mut self, buffer: &str, variable: &str, data: &[u8]) -> Result<()> {
        self.constant_buffers
            .iter_mut()
            .find(|cb| cb.name() == buffer)
            .ok_or_else(|| GpuError::NotFound(format!("Constant buffer {buffer}")))?
            .update(variable, data)
    }

    /// Write a plain-old-data value to `variable` of constant buffer `buffer`.
    pub fn update_constant_value<T: bytemuck::Pod>(
        &mut self,
        buffer: &str,
        variable: &str,
        value: &T,
    ) -> Result<()> {
        self.update_constant(buffer, variable, bytemuck::bytes_of(value))
    }

    /// Copy every dirty constant buffer to the GPU.
    ///
    /// When anything was copied while commands are being recorded, the open
    /// list is submitted and flushed, then reopened.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn upload(&mut self, device: &mut Device) -> Result<()> {
        let mut uploaded = false;
        for buffer in &mut self.constant_buffers {
            uploaded |= buffer.upload()?;
        }
        if uploaded && device.is_recording() {
            device.record_and_flush(|_, _| Ok(()))?;
        }
        Ok(())
    }

    /// Make this pipeline current for the next dispatch.
    pub fn apply(&mut self, device: &mut Device) -> Result<()> {
        if !device.is_recording() {
            return Err(GpuError::InvalidState(
                "apply requires an open command list".to_string(),
            ));
        }
        self.upload(device)?;

        let cmd = device.command_buffer();
        device.heap().bind(cmd, self.layout);
        unsafe {
            device
                .raw()
                .cmd_bind_pipeline(cmd, vk::PipelineBindPoint::RAY_TRACING_KHR, self.pipeline);
        }
        Ok(())
    }

    /// Pipeline layout used for pushes and descriptor binding.
    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }

    /// Descriptor slots of the constant buffers, zero-filled past the last one.
    pub fn constant_buffer_slots(&self) -> [u32; MAX_CONSTANT_BUFFERS] {
        let mut slots = [0; MAX_CONSTANT_BUFFERS];
        for (slot, buffer) in slots.iter_mut().zip(&self.constant_buffers) {
            *slot = buffer.slot();
        }
        slots
    }

    pub fn constant_buffers(&self) -> &[ConstantBuffer] {
        &self.constant_buffers
    }
}

impl Drop for ShaderPipeline {
    fn drop(&mut self) {
        unsafe {
            let device = self.context.device();
            device.destroy_pipeline(self.pipeline, None);
            device.destroy_pipeline_layout(self.layout, None);
        }
    }
}

fn create_pipeline(
    context: &GpuContext,
    device: &Device,
    plan: &PipelinePlan,
    modules: &[&[u32]],
    layout: vk::PipelineLayout,
) -> Result<vk::Pipeline> {
    let raw = context.device();

    let mut shader_modules = Vec::with_capacity(modules.len());
    for code in modules {
        let create_info = vk::ShaderModuleCreateInfo::default().code(code);
        match unsafe { raw.create_shader_module(&create_info, None) } {
            Ok(module) => shader_modules.push(module),
            Err(e) => {
                destroy_modules(raw, &shader_modules);
                return Err(GpuError::Compile(format!("Shader module creation: {e}")));
            }
        }
    }

    let result = create_with_modules(context, device, plan, &shader_modules, layout);
    destroy_modules(raw, &shader_modules);
    result
}

fn create_with_modules(
    context: &GpuContext,
    device: &Device,
    plan: &PipelinePlan,
    shader_modules: &[vk::ShaderModule],
    layout: vk::PipelineLayout,
) -> Result<vk::Pipeline> {
    let entry = |source: &StageSource| {
        CString::new(source.entry.as_str())
            .map_err(|_| GpuError::Compile(format!("Invalid entry name {}", source.entry)))
    };
    let names = [
        entry(&plan.ray_generation)?,
        entry(&plan.miss)?,
        entry(&plan.closest_hit)?,
    ];

    let stages = [
        vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::RAYGEN_KHR)
            .module(shader_modules[plan.ray_generation.module])
            .name(&names[0]),
        vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::MISS_KHR)
            .module(shader_modules[plan.miss.module])
            .name(&names[1]),
        vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::CLOSEST_HIT_KHR)
            .module(shader_modules[plan.closest_hit.module])
            .name(&names[2]),
    ];

    let general = |stage: u32| {
        vk::RayTracingShaderGroupCreateInfoKHR::default()
            .ty(vk::RayTracingShaderGroupTypeKHR::GENERAL)
            .general_shader(stage)
            .closest_hit_shader(vk::SHADER_UNUSED_KHR)
            .any_hit_shader(vk::SHADER_UNUSED_KHR)
            .intersection_shader(vk::SHADER_UNUSED_KHR)
    };
    let groups = [
        general(0),
        general(1),
        vk::RayTracingShaderGroupCreateInfoKHR::default()
            .ty(vk::RayTracingShaderGroupTypeKHR::TRIANGLES_HIT_GROUP)
            .general_shader(vk::SHADER_UNUSED_KHR)
            .closest_hit_shader(2)
            .any_hit_shader(vk::SHADER_UNUSED_KHR)
            .intersection_shader(vk::SHADER_UNUSED_KHR),
    ];

    let device_limit = device.capabilities().ray_tracing.max_ray_recursion_depth;
    let recursion = MAX_RECURSION_DEPTH.min(device_limit);
    if recursion < MAX_RECURSION_DEPTH {
        tracing::warn!(
            "Trace recursion depth clamped from {MAX_RECURSION_DEPTH} to {recursion}"
        );
    }

    let pipeline_info = vk::RayTracingPipelineCreateInfoKHR::default()
        .flags(vk::PipelineCreateFlags::DESCRIPTOR_BUFFER_EXT)
        .stages(&stages)
        .groups(&groups)
        .max_pipeline_ray_recursion_depth(recursion)
        .layout(layout);

    let pipelines = unsafe {
        context.ray_tracing_pipeline().create_ray_tracing_pipelines(
            vk::DeferredOperationKHR::null(),
            vk::PipelineCache::null(),
            std::slice::from_ref(&pipeline_info),
            None,
        )
    }
    .map_err(|(_, e)| GpuError::Compile(format!("Ray tracing pipeline: {e}")))?;

    pipelines
        .into_iter()
        .next()
        .ok_or_else(|| GpuError::Compile("No pipeline returned".to_string()))
}

fn destroy_modules(device: &ash::Device, modules: &[vk::ShaderModule]) {
    for &module in modules {
        unsafe { device.destroy_shader_module(module, None) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reflect::tests::path_tracer_like;

    const RAYGEN: u32 = 5313;
    const CLOSEST_HIT: u32 = 5316;
    const MISS: u32 = 5317;

    #[test]
    fn plan_finds_one_export_per_stage() {
        let raygen = path_tracer_like(RAYGEN, "main", "CBuffer");
        let miss = path_tracer_like(MISS, "main", "CBuffer");
        let hit = path_tracer_like(CLOSEST_HIT, "main", "CBuffer");

        let plan = PipelinePlan::from_modules(&[raygen.as_slice(), miss.as_slice(), hit.as_slice()]).unwrap();
        assert_eq!(plan.ray_generation.module, 0);
        assert_eq!(plan.miss.module, 1);
        assert_eq!(plan.closest_hit.module, 2);
        assert_eq!(plan.closest_hit.entry, "main");
        // The same block in every module merges into one buffer
        assert_eq!(plan.constant_buffers.len(), 1);
        assert_eq!(plan.constant_buffers[0].name, "CBuffer");
    }

    #[test]
    fn missing_or_duplicate_exports_are_compile_errors() {
        let raygen = path_tracer_like(RAYGEN, "main", "CBuffer");
        let miss = path_tracer_like(MISS, "main", "CBuffer");

        assert!(matches!(
            PipelinePlan::from_modules(&[raygen.as_slice(), miss.as_slice()]),
            Err(GpuError::Compile(_))
        ));
        assert!(matches!(
            PipelinePlan::from_modules(&[raygen.as_slice(), raygen.as_slice(), miss.as_slice()]),
            Err(GpuError::Compile(_))
        ));
    }

    #[test]
    fn distinct_blocks_become_separate_buffers() {
        let raygen = path_tracer_like(RAYGEN, "main", "Camera");
        let miss = path_tracer_like(MISS, "main", "Sky");
        let hit = path_tracer_like(CLOSEST_HIT, "main", "Camera");

        let plan = PipelinePlan::from_modules(&[raygen.as_slice(), miss.as_slice(), hit.as_slice()]).unwrap();
        let names: Vec<_> = plan.constant_buffers.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["Camera", "Sky"]);
    }

    #[test]
    fn constant_buffer_sizes_round_to_alignment() {
        assert_eq!(constant_buffer_size(140), 256);
        assert_eq!(constant_buffer_size(256), 256);
        assert_eq!(constant_buffer_size(257), 512);
        assert_eq!(constant_buffer_size(0), 256);
    }
}
