//! Top-level acceleration structure over the scene's instances.

use crate::acceleration::{AccelerationStructure, ScratchBuffer};
use ash::vk;
use gpu_allocator::MemoryLocation;
use photon_core::Matrix;
use photon_gpu::{Device, GpuBuffer, GpuError, ResourceBarrier, Result};

/// Visibility mask written into every instance.
pub const INSTANCE_MASK: u8 = 1;

/// Instance descriptors in table order; `id` is the position in the table.
pub fn build_instance_descs(
    blas_addresses: &[vk::DeviceAddress],
    transforms: &[Matrix],
) -> Result<Vec<vk::AccelerationStructureInstanceKHR>> {
    if blas_addresses.len() != transforms.len() {
        return Err(GpuError::InvalidData(format!(
            "{} acceleration structures for {} transforms",
            blas_addresses.len(),
            transforms.len()
        )));
    }

    let flags = vk::GeometryInstanceFlagsKHR::TRIANGLE_FACING_CULL_DISABLE.as_raw() as u8;
    Ok(blas_addresses
        .iter()
        .zip(transforms)
        .enumerate()
        .map(|(id, (&address, transform))| vk::AccelerationStructureInstanceKHR {
            transform: vk::TransformMatrixKHR {
                matrix: transform.to_transform_3x4(),
            },
            instance_custom_index_and_mask: vk::Packed24_8::new(id as u32, INSTANCE_MASK),
            instance_shader_binding_table_record_offset_and_flags: vk::Packed24_8::new(0, flags),
            acceleration_structure_reference: vk::AccelerationStructureReferenceKHR {
                device_handle: address,
            },
        })
        .collect())
}

/// Preallocated top-level acceleration structure.
///
/// Built with `ALLOW_UPDATE` but only ever rebuilt in full.
pub struct Tlas {
    structure: AccelerationStructure,
    instance_buffer: GpuBuffer,
    scratch: ScratchBuffer,
    max_instances: u32,
    instance_count: u32,
}

impl Tlas {
    const FLAGS: vk::BuildAccelerationStructureFlagsKHR = vk::BuildAccelerationStructureFlagsKHR::from_raw(
        vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_TRACE.as_raw()
            | vk::BuildAccelerationStructureFlagsKHR::ALLOW_UPDATE.as_raw(),
    );

    /// Allocate instance, scratch and result storage for up to `max_instances`.
    pub fn new(device: &Device, max_instances: u32) -> Result<Self> {
        if max_instances == 0 {
            return Err(GpuError::InvalidData(
                "A scene needs room for at least one instance".to_string(),
            ));
        }

        let instance_size = std::mem::size_of::<vk::AccelerationStructureInstanceKHR>() as u64;
        let instance_buffer = device.allocator().create_buffer(
            instance_size * u64::from(max_instances),
            vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR
                | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
            MemoryLocation::CpuToGpu,
            "tlas_instances",
        )?;

        let geometry = instances_geometry(instance_buffer.device_address());
        let build_info = vk::AccelerationStructureBuildGeometryInfoKHR::default()
            .ty(vk::AccelerationStructureTypeKHR::TOP_LEVEL)
            .flags(Self::FLAGS)
            .mode(vk::BuildAccelerationStructureModeKHR::BUILD)
            .geometries(std::slice::from_ref(&geometry));

        let mut build_sizes = vk::AccelerationStructureBuildSizesInfoKHR::default();
        unsafe {
            device
                .context()
                .acceleration_structure()
                .get_acceleration_structure_build_sizes(
                    vk::AccelerationStructureBuildTypeKHR::DEVICE,
                    &build_info,
                    &[max_instances],
                    &mut build_sizes,
                );
        }

        let structure = AccelerationStructure::new(
            device,
            vk::AccelerationStructureTypeKHR::TOP_LEVEL,
            build_sizes.acceleration_structure_size,
            "tlas",
        )?;
        let scratch = ScratchBuffer::new(device, build_sizes.build_scratch_size, "tlas_scratch")?;

        tracing::debug!(
            "TLAS storage for {max_instances} instances: {} bytes",
            build_sizes.acceleration_structure_size
        );

        Ok(Self {
            structure,
            instance_buffer,
            scratch,
            max_instances,
            instance_count: 0,
        })
    }

    /// Write the instance descriptors, build and wait for completion.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn build(
        &mut self,
        device: &mut Device,
        instances: &[vk::AccelerationStructureInstanceKHR],
    ) -> Result<()> {
        let count = u32::try_from(instances.len()).unwrap_or(u32::MAX);
        if count > self.max_instances {
            return Err(GpuError::CapacityExceeded {
                capacity: self.max_instances,
            });
        }

        let bytes = unsafe {
            std::slice::from_raw_parts(
                instances.as_ptr().cast::<u8>(),
                std::mem::size_of_val(instances),
            )
        };
        self.instance_buffer.write_bytes(0, bytes)?;

        let geometry = instances_geometry(self.instance_buffer.device_address());
        let build_info = vk::AccelerationStructureBuildGeometryInfoKHR::default()
            .ty(vk::AccelerationStructureTypeKHR::TOP_LEVEL)
            .flags(Self::FLAGS)
            .mode(vk::BuildAccelerationStructureModeKHR::BUILD)
            .dst_acceleration_structure(self.structure.handle())
            .geometries(std::slice::from_ref(&geometry))
            .scratch_data(vk::DeviceOrHostAddressKHR {
                device_address: self.scratch.address(),
            });
        let build_range =
            vk::AccelerationStructureBuildRangeInfoKHR::default().primitive_count(count);

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

        self.instance_count = count;
        tracing::debug!("Built TLAS with {count} instances");
        Ok(())
    }

    /// Device address bound for tracing.
    pub fn device_address(&self) -> vk::DeviceAddress {
        self.structure.device_address()
    }

    /// Number of instances in the last build.
    pub fn instance_count(&self) -> u32 {
        self.instance_count
    }

    /// Capacity the storage was sized for.
    pub fn max_instances(&self) -> u32 {
        self.max_instances
    }
}

fn instances_geometry(address: vk::DeviceAddress) -> vk::AccelerationStructureGeometryKHR<'static> {
    vk::AccelerationStructureGeometryKHR::default()
        .geometry_type(vk::GeometryTypeKHR::INSTANCES)
        .flags(vk::GeometryFlagsKHR::OPAQUE)
        .geometry(vk::AccelerationStructureGeometryDataKHR {
            instances: vk::AccelerationStructureGeometryInstancesDataKHR::default()
                .array_of_pointers(false)
                .data(vk::DeviceOrHostAddressConstKHR {
                    device_address: address,
                }),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use photon_core::Matrix;

    #[test]
    fn instance_size_matches_vulkan() {
        assert_eq!(
            std::mem::size_of::<vk::AccelerationStructureInstanceKHR>(),
            64
        );
    }

    #[test]
    fn ids_follow_insertion_order() {
        let mut translated = Matrix::IDENTITY;
        translated.m[3] = 5.0;
        translated.m[7] = -2.0;
        translated.m[11] = 0.5;
        let transforms = [Matrix::IDENTITY, translated, Matrix::IDENTITY];
        let addresses = [0x1000, 0x2000, 0x1000];

        let descs = build_instance_descs(&addresses, &transforms).unwrap();
        assert_eq!(descs.len(), 3);
        for (i, desc) in descs.iter().enumerate() {
            assert_eq!(desc.instance_custom_index_and_mask.low_24(), i as u32);
            assert_eq!(desc.instance_custom_index_and_mask.high_8(), INSTANCE_MASK);
            let handle = unsafe { desc.acceleration_structure_reference.device_handle };
            assert_eq!(handle, addresses[i]);
        }

        let expected = translated.to_transform_3x4();
        for (got, want) in descs[1].transform.matrix.iter().zip(expected) {
            assert_relative_eq!(*got, want);
        }
        assert_relative_eq!(descs[1].transform.matrix[3], 5.0);
        assert_relative_eq!(descs[1].transform.matrix[7], -2.0);
        assert_relative_eq!(descs[1].transform.matrix[11], 0.5);
    }

    #[test]
    fn mismatched_inputs_rejected() {
        assert!(build_instance_descs(&[0x1000], &[]).is_err());
    }
}
