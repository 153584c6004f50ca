//! Per-mesh geometry and bottom-level acceleration structures.

use crate::acceleration::{AccelerationStructure, ScratchBuffer};
use ash::vk;
use gpu_allocator::MemoryLocation;
use photon_core::StaticVertex;
use photon_gpu::{Device, GpuBuffer, GpuError, ResourceBarrier, Result};

/// Description of one opaque triangle list, fixed before any GPU work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriangleGeometry {
    pub vertex_count: u32,
    pub index_count: u32,
    pub vertex_stride: u64,
    pub vertex_format: vk::Format,
    pub index_type: vk::IndexType,
}

impl TriangleGeometry {
    /// Describe a triangle list over `vertices` indexed by `indices`.
    pub fn new(vertices: &[StaticVertex], indices: &[u32]) -> Result<Self> {
        if vertices.is_empty() || indices.is_empty() {
            return Err(GpuError::InvalidData("Mesh has no geometry".to_string()));
        }
        if indices.len() % 3 != 0 {
            return Err(GpuError::InvalidData(format!(
                "Index count {} is not a multiple of 3",
                indices.len()
            )));
        }
        let vertex_count = u32::try_from(vertices.len())
            .map_err(|_| GpuError::InvalidData("Too many vertices".to_string()))?;
        let index_count = u32::try_from(indices.len())
            .map_err(|_| GpuError::InvalidData("Too many indices".to_string()))?;
        if let Some(&index) = indices.iter().find(|&&i| i >= vertex_count) {
            return Err(GpuError::InvalidData(format!(
                "Index {index} out of range for {vertex_count} vertices"
            )));
        }

        Ok(Self {
            vertex_count,
            index_count,
            vertex_stride: StaticVertex::STRIDE,
            vertex_format: vk::Format::R32G32B32_SFLOAT,
            index_type: vk::IndexType::UINT32,
        })
    }

    /// Number of triangles.
    pub fn primitive_count(&self) -> u32 {
        self.index_count / 3
    }

    fn triangles_data(
        &self,
        vertex_address: vk::DeviceAddress,
        index_address: vk::DeviceAddress,
    ) -> vk::AccelerationStructureGeometryKHR<'static> {
        vk::AccelerationStructureGeometryKHR::default()
            .geometry_type(vk::GeometryTypeKHR::TRIANGLES)
            .flags(vk::GeometryFlagsKHR::OPAQUE)
            .geometry(vk::AccelerationStructureGeometryDataKHR {
                triangles: vk::AccelerationStructureGeometryTrianglesDataKHR::default()
                    .vertex_format(self.vertex_format)
                    .vertex_data(vk::DeviceOrHostAddressConstKHR {
                        device_address: vertex_address,
                    })
                    .vertex_stride(self.vertex_stride)
                    .max_vertex(self.vertex_count - 1)
                    .index_type(self.index_type)
                    .index_data(vk::DeviceOrHostAddressConstKHR {
                        device_address: index_address,
                    }),
            })
    }
}

/// Vertex and index buffers plus their built bottom-level acceleration structure.
///
/// Immutable once built.
pub struct Mesh {
    geometry: TriangleGeometry,
    blas: AccelerationStructure,
    vertex_buffer: GpuBuffer,
    index_buffer: GpuBuffer,
}

impl Mesh {
    /// Create the buffers, build the acceleration structure and wait for it.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn build(device: &mut Device, vertices: &[StaticVertex], indices: &[u32]) -> Result<Self> {
        let geometry = TriangleGeometry::new(vertices, indices)?;

        let input_usage = vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR
            | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS
            | vk::BufferUsageFlags::STORAGE_BUFFER;
        let vertex_buffer = device.allocator().create_buffer(
            std::mem::size_of_val(vertices) as u64,
            input_usage,
            MemoryLocation::CpuToGpu,
            "mesh_vertices",
        )?;
        vertex_buffer.write(vertices)?;
        let index_buffer = device.allocator().create_buffer(
            std::mem::size_of_val(indices) as u64,
            input_usage,
            MemoryLocation::CpuToGpu,
            "mesh_indices",
        )?;
        index_buffer.write(indices)?;

        let triangles = geometry.triangles_data(
            vertex_buffer.device_address(),
            index_buffer.device_address(),
        );
        let mut build_info = vk::AccelerationStructureBuildGeometryInfoKHR::default()
            .ty(vk::AccelerationStructureTypeKHR::BOTTOM_LEVEL)
            .flags(vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_TRACE)
            .mode(vk::BuildAccelerationStructureModeKHR::BUILD)
            .geometries(std::slice::from_ref(&triangles));

        let primitive_count = geometry.primitive_count();
        let mut build_sizes = vk::AccelerationStructureBuildSizesInfoKHR::default();
        unsafe {
            device
                .context()
                .acceleration_structure()
                .get_acceleration_structure_build_sizes(
                    vk::AccelerationStructureBuildTypeKHR::DEVICE,
                    &build_info,
                    &[primitive_count],
                    &mut build_sizes,
                );
        }

        let blas = AccelerationStructure::new(
            device,
            vk::AccelerationStructureTypeKHR::BOTTOM_LEVEL,
            build_sizes.acceleration_structure_size,
            "blas",
        )?;
        let scratch = ScratchBuffer::new(device, build_sizes.build_scratch_size, "blas_scratch")?;

        build_info = build_info
            .dst_acceleration_structure(blas.handle())
            .scratch_data(vk::DeviceOrHostAddressKHR {
                device_address: scratch.address(),
            });
        let build_range =
            vk::AccelerationStructureBuildRangeInfoKHR::default().primitive_count(primitive_count);

        let context = device.context().clone();
        device.record_and_flush(|raw, cmd| {
            unsafe {
                context
                    .acceleration_structure()
                    .cmd_build_acceleration_structures(
                        cmd,
                        std::slice::from_ref(&build_info),
                        &[std::slice::from_ref(&build_range)],
                    );
            }
            ResourceBarrier::acceleration_structure_built(raw, cmd);
            Ok(())
        })?;

        tracing::debug!(
            "Built BLAS: {} vertices, {} triangles, {} bytes",
            geometry.vertex_count,
            primitive_count,
            blas.size()
        );

        Ok(Self {
            geometry,
            blas,
            vertex_buffer,
            index_buffer,
        })
    }

    /// Geometry the acceleration structure was built from.
    pub fn geometry(&self) -> &TriangleGeometry {
        &self.geometry
    }

    /// Device address of the bottom-level acceleration structure.
    pub fn blas_address(&self) -> vk::DeviceAddress {
        self.blas.device_address()
    }

    /// Per-mesh vertex buffer.
    pub fn vertex_buffer(&self) -> &GpuBuffer {
        &self.vertex_buffer
    }

    /// Per-mesh index buffer.
    pub fn index_buffer(&self) -> &GpuBuffer {
        &self.index_buffer
    }
}

/// Stable index of a mesh inside a [`MeshLibrary`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MeshId(pub u32);

/// Owner of every built mesh of a scene.
#[derive(Default)]
pub struct MeshLibrary {
    meshes: Vec<Mesh>,
}

impl MeshLibrary {
    /// Create an empty library.
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of a mesh.
    pub fn add(&mut self, mesh: Mesh) -> MeshId {
        let id = MeshId(self.meshes.len() as u32);
        self.meshes.push(mesh);
        id
    }

    /// Look up a mesh.
    pub fn get(&self, id: MeshId) -> Result<&Mesh> {
        self.meshes
            .get(id.0 as usize)
            .ok_or_else(|| GpuError::NotFound(format!("mesh {}", id.0)))
    }

    pub fn len(&self) -> usize {
        self.meshes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.meshes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quad() -> (Vec<StaticVertex>, Vec<u32>) {
        let vertex = |x: f32, y: f32| StaticVertex {
            position: [x, y, 0.0],
            normal: [0.0, 0.0, 1.0],
            ..Default::default()
        };
        (
            vec![vertex(0.0, 0.0), vertex(1.0, 0.0), vertex(1.0, 1.0), vertex(0.0, 1.0)],
            vec![0, 1, 2, 0, 2, 3],
        )
    }

    #[test]
    fn geometry_preserves_counts_and_stride() {
        let (vertices, indices) = quad();
        let geometry = TriangleGeometry::new(&vertices, &indices).unwrap();
        assert_eq!(geometry.vertex_count, 4);
        assert_eq!(geometry.index_count, 6);
        assert_eq!(geometry.vertex_stride, 44);
        assert_eq!(geometry.primitive_count(), 2);
        assert_eq!(geometry.vertex_format, vk::Format::R32G32B32_SFLOAT);
        assert_eq!(geometry.index_type, vk::IndexType::UINT32);
    }

    #[test]
    fn geometry_rejects_bad_input() {
        let (vertices, _) = quad();
        assert!(TriangleGeometry::new(&vertices, &[]).is_err());
        assert!(TriangleGeometry::new(&[], &[0, 1, 2]).is_err());
        assert!(TriangleGeometry::new(&vertices, &[0, 1]).is_err());
        assert!(TriangleGeometry::new(&vertices, &[0, 1, 4]).is_err());
    }

    #[test]
    fn unknown_mesh_id_is_not_found() {
        let library = MeshLibrary::new();
        assert!(library.is_empty());
        assert!(matches!(library.get(MeshId(0)), Err(GpuError::NotFound(_))));
    }
}
