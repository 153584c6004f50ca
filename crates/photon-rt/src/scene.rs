//! Scene aggregation, top-level acceleration structure and dispatch.

use crate::blas::{MeshId, MeshLibrary};
use crate::pipeline::ShaderPipeline;
use crate::root::RootArguments;
use crate::sbt::{ShaderTable, ShaderTableRegions};
use crate::tlas::{build_instance_descs, Tlas};
use hashbrown::HashMap;
use photon_core::{AreaLight, InstanceData, Matrix, StaticVertex};
use photon_gpu::{Device, GpuError, Result, StructuredBuffer};

/// Location of one mesh inside the combined index array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeshRange {
    pub index_offset: u32,
    pub index_count: u32,
}

/// CPU-side scene tables, filled by the loader before the GPU build.
#[derive(Debug, Default)]
pub struct SceneContents {
    vertices: Vec<StaticVertex>,
    indices: Vec<u32>,
    ranges: HashMap<String, MeshRange>,
    instances: Vec<InstanceData>,
    meshes: Vec<(MeshId, Matrix)>,
    lights: Vec<AreaLight>,
}

impl SceneContents {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a mesh to the combined arrays once per key.
    ///
    /// Indices are rebased onto the combined vertex array. Returns the
    /// mesh's range, whether it was just added or already present.
    pub fn add_mesh_data(
        &mut self,
        key: &str,
        vertices: &[StaticVertex],
        indices: &[u32],
    ) -> Result<MeshRange> {
        if let Some(range) = self.ranges.get(key) {
            return Ok(*range);
        }

        let too_large = || GpuError::CapacityExceeded { capacity: u32::MAX };
        let vertex_offset = u32::try_from(self.vertices.len()).map_err(|_| too_large())?;
        let index_offset = u32::try_from(self.indices.len()).map_err(|_| too_large())?;
        let index_count = u32::try_from(indices.len()).map_err(|_| too_large())?;

        let rebased = indices
            .iter()
            .map(|&index| {
                if index as usize >= vertices.len() {
                    return Err(GpuError::InvalidData(format!(
                        "Mesh {key}: index {index} out of range for {} vertices",
                        vertices.len()
                    )));
                }
                index.checked_add(vertex_offset).ok_or_else(|| {
                    GpuError::InvalidData(format!("Mesh {key}: rebased index overflows"))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        self.vertices.extend_from_slice(vertices);
        self.indices.extend(rebased);

        let range = MeshRange {
            index_offset,
            index_count,
        };
        self.ranges.insert(key.to_string(), range);
        Ok(range)
    }

    /// Append an instance record, stamped with the start of its mesh's indices.
    pub fn add_instance(&mut self, key: &str, mut data: InstanceData) -> Result<()> {
        let range = self
            .ranges
            .get(key)
            .ok_or_else(|| GpuError::NotFound(format!("Mesh data {key}")))?;
        data.start_index = range.index_offset;
        self.instances.push(data);
        Ok(())
    }

    /// Append a mesh placement; its position is the instance id.
    pub fn add_mesh(&mut self, mesh: MeshId, transform: Matrix) {
        self.meshes.push((mesh, transform));
    }

    pub fn add_light(&mut self, light: AreaLight) {
        self.lights.push(light);
    }

    pub fn mesh_range(&self, key: &str) -> Option<MeshRange> {
        self.ranges.get(key).copied()
    }

    pub fn vertices(&self) -> &[StaticVertex] {
        &self.vertices
    }

    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    pub fn instances(&self) -> &[InstanceData] {
        &self.instances
    }

    pub fn meshes(&self) -> &[(MeshId, Matrix)] {
        &self.meshes
    }

    pub fn lights(&self) -> &[AreaLight] {
        &self.lights
    }
}

struct SceneBuffers {
    vertices: StructuredBuffer,
    indices: StructuredBuffer,
    instances: StructuredBuffer,
    lights: Option<StructuredBuffer>,
}

#[derive(Debug, Clone, Copy)]
struct Dispatch {
    regions: ShaderTableRegions,
    width: u32,
    height: u32,
}

/// A renderable scene: contents, acceleration structure and shader buffers.
pub struct Scene {
    contents: SceneContents,
    tlas: Tlas,
    buffers: Option<SceneBuffers>,
    texture_base: u32,
    environment_map: u32,
    environment_luminance: f32,
    dispatch: Option<Dispatch>,
}

impl Scene {
    /// Preallocate the top-level structure for up to `max_instances`.
    pub fn new(device: &Device, max_instances: u32) -> Result<Self> {
        Ok(Self {
            contents: SceneContents::new(),
            tlas: Tlas::new(device, max_instances)?,
            buffers: None,
            texture_base: 0,
            environment_map: 0,
            environment_luminance: 0.0,
            dispatch: None,
        })
    }

    pub fn contents(&self) -> &SceneContents {
        &self.contents
    }

    pub fn contents_mut(&mut self) -> &mut SceneContents {
        &mut self.contents
    }

    /// Slot of the first texture; instance texture ids are relative to it.
    pub fn set_texture_table(&mut self, base: u32) {
        self.texture_base = base;
    }

    /// Attach the environment map; a zero luminance disables it.
    pub fn set_environment_map(&mut self, slot: u32, luminance: f32) {
        self.environment_map = slot;
        self.environment_luminance = luminance;
    }

    pub fn uses_environment_map(&self) -> bool {
        self.environment_luminance > 0.0
    }

    /// Build the top-level structure and the shader-visible buffers.
    ///
    /// May only be called once, after every mesh and instance was added.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn build(&mut self, device: &mut Device, library: &MeshLibrary) -> Result<()> {
        if self.buffers.is_some() {
            return Err(GpuError::InvalidState("Scene already built".to_string()));
        }
        let contents = &self.contents;
        if contents.meshes.is_empty() {
            return Err(GpuError::InvalidData("Scene has no meshes".to_string()));
        }
        if contents.meshes.len() > self.tlas.max_instances() as usize {
            return Err(GpuError::CapacityExceeded {
                capacity: self.tlas.max_instances(),
            });
        }
        if contents.instances.len() != contents.meshes.len() {
            return Err(GpuError::InvalidData(format!(
                "{} instance records for {} meshes",
                contents.instances.len(),
                contents.meshes.len()
            )));
        }

        let mut addresses = Vec::with_capacity(contents.meshes.len());
        let mut transforms = Vec::with_capacity(contents.meshes.len());
        for (id, transform) in &contents.meshes {
            addresses.push(library.get(*id)?.blas_address());
            transforms.push(*transform);
        }
        let descs = build_instance_descs(&addresses, &transforms)?;
        self.tlas.build(device, &descs)?;

        let vertices = StructuredBuffer::from_slice(device, &contents.vertices, "scene_vertices")?;
        let indices = StructuredBuffer::from_slice(device, &contents.indices, "scene_indices")?;
        let instances =
            StructuredBuffer::from_slice(device, &contents.instances, "scene_instances")?;
        let lights = if contents.lights.is_empty() {
            None
        } else {
            Some(StructuredBuffer::from_slice(
                device,
                &contents.lights,
                "scene_lights",
            )?)
        };

        tracing::info!(
            "Scene built: {} instances, {} vertices, {} triangles, {} area lights",
            self.tlas.instance_count(),
            contents.vertices.len(),
            contents.indices.len() / 3,
            contents.lights.len()
        );

        self.buffers = Some(SceneBuffers {
            vertices,
            indices,
            instances,
            lights,
        });
        Ok(())
    }

    /// Record the shader table regions and the dispatch extent.
    pub fn update_dispatch_parameters(&mut self, table: &ShaderTable, width: u32, height: u32) {
        self.dispatch = Some(Dispatch {
            regions: table.regions(),
            width,
            height,
        });
    }

    /// Push the root arguments and dispatch one ray per pixel.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn draw(&self, device: &Device, pipeline: &ShaderPipeline) -> Result<()> {
        let buffers = self
            .buffers
            .as_ref()
            .ok_or_else(|| GpuError::InvalidState("Scene drawn before build".to_string()))?;
        let dispatch = self.dispatch.ok_or_else(|| {
            GpuError::InvalidState("Dispatch parameters not set".to_string())
        })?;
        if !device.is_recording() {
            return Err(GpuError::InvalidState(
                "draw requires an open command list".to_string(),
            ));
        }

        let arguments = RootArguments {
            tlas: self.tlas.device_address(),
            vertices: buffers.vertices.device_address(),
            indices: buffers.indices.device_address(),
            instances: buffers.instances.device_address(),
            lights: buffers
                .lights
                .as_ref()
                .map_or(0, StructuredBuffer::device_address),
            render_target: device.render_target().slot().index,
            texture_base: self.texture_base,
            environment_map: self.environment_map,
            light_count: self.light_count(),
            constant_buffers: pipeline.constant_buffer_slots(),
        };

        let cmd = device.command_buffer();
        arguments.push(device.raw(), cmd, pipeline.layout());
        unsafe {
            device.context().ray_tracing_pipeline().cmd_trace_rays(
                cmd,
                &dispatch.regions.raygen,
                &dispatch.regions.miss,
                &dispatch.regions.hit,
                &dispatch.regions.callable,
                dispatch.width,
                dispatch.height,
                1,
            );
        }
        Ok(())
    }

    /// Instances in the built top-level structure.
    pub fn instance_count(&self) -> u32 {
        self.tlas.instance_count()
    }

    pub fn light_count(&self) -> u32 {
        self.contents.lights.len() as u32
    }
}
