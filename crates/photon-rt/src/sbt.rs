//! Shader binding table.
//!
//! Three records of one stride each, in this order:
//! - Ray generation
//! - Miss
//! - Hit group (closest-hit, triangles)

use ash::vk;
use gpu_allocator::MemoryLocation;
use photon_gpu::capabilities::RayTracingProperties;
use photon_gpu::{Device, GpuBuffer, GpuError, Result};

/// Number of shader groups in the path tracing pipeline.
pub const GROUP_COUNT: u32 = 3;

/// Byte layout of the table, derived only from device limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShaderTableLayout {
    pub handle_size: u32,
    /// Distance between records; every record starts base-aligned.
    pub stride: u64,
}

impl ShaderTableLayout {
    /// Layout for the device's handle size and alignments.
    pub fn new(properties: &RayTracingProperties) -> Self {
        let alignment = properties
            .shader_group_handle_alignment
            .max(properties.shader_group_base_alignment)
            .max(1);
        Self {
            handle_size: properties.shader_group_handle_size,
            stride: u64::from(align_up(properties.shader_group_handle_size, alignment)),
        }
    }

    /// Offset of record `group` from the start of the table.
    pub fn record_offset(&self, group: u32) -> u64 {
        u64::from(group) * self.stride
    }

    /// Table size in bytes.
    pub fn total_size(&self) -> u64 {
        self.record_offset(GROUP_COUNT)
    }

    /// Ray generation, miss and hit regions of a table at `base`.
    ///
    /// The ray generation region's size must equal its stride.
    pub fn regions(&self, base: vk::DeviceAddress) -> ShaderTableRegions {
        let region = |group: u32| vk::StridedDeviceAddressRegionKHR {
            device_address: base + self.record_offset(group),
            stride: self.stride,
            size: self.stride,
        };
        ShaderTableRegions {
            raygen: region(0),
            miss: region(1),
            hit: region(2),
            callable: vk::StridedDeviceAddressRegionKHR::default(),
        }
    }

    /// Copy the packed group handles into table records.
    pub fn write_records(&self, handles: &[u8], table: &mut [u8]) -> Result<()> {
        let handle_size = self.handle_size as usize;
        if handles.len() < handle_size * GROUP_COUNT as usize
            || (table.len() as u64) < self.total_size()
        {
            return Err(GpuError::InvalidData(
                "Shader group handles do not fit the table layout".to_string(),
            ));
        }
        for group in 0..GROUP_COUNT {
            let src = group as usize * handle_size;
            let dst = self.record_offset(group) as usize;
            table[dst..dst + handle_size].copy_from_slice(&handles[src..src + handle_size]);
        }
        Ok(())
    }
}

/// Address regions passed to `vkCmdTraceRaysKHR`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShaderTableRegions {
    pub raygen: vk::StridedDeviceAddressRegionKHR,
    pub miss: vk::StridedDeviceAddressRegionKHR,
    pub hit: vk::StridedDeviceAddressRegionKHR,
    /// Always empty.
    pub callable: vk::StridedDeviceAddressRegionKHR,
}

/// Shader binding table buffer.
pub struct ShaderTable {
    buffer: GpuBuffer,
    layout: ShaderTableLayout,
}

impl ShaderTable {
    /// Fetch the pipeline's group handles and write the three records.
    pub fn new(device: &Device, pipeline: vk::Pipeline) -> Result<Self> {
        let layout = ShaderTableLayout::new(&device.capabilities().ray_tracing);

        let handles = unsafe {
            device
                .context()
                .ray_tracing_pipeline()
                .get_ray_tracing_shader_group_handles(
                    pipeline,
                    0,
                    GROUP_COUNT,
                    layout.handle_size as usize * GROUP_COUNT as usize,
                )
        }?;

        let mut records = vec![0u8; layout.total_size() as usize];
        layout.write_records(&handles, &mut records)?;

        let buffer = device.allocator().create_buffer(
            layout.total_size(),
            vk::BufferUsageFlags::SHADER_BINDING_TABLE_KHR
                | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
            MemoryLocation::CpuToGpu,
            "shader_binding_table",
        )?;
        buffer.write_bytes(0, &records)?;

        tracing::debug!(
            "Shader binding table: {} byte handles, {} byte stride",
            layout.handle_size,
            layout.stride
        );

        Ok(Self { buffer, layout })
    }

    /// Record layout.
    pub fn layout(&self) -> &ShaderTableLayout {
        &self.layout
    }

    /// Dispatch regions of this table.
    pub fn regions(&self) -> ShaderTableRegions {
        self.layout.regions(self.buffer.device_address())
    }
}

/// Align a value up to the given power-of-two alignment.
fn align_up(value: u32, alignment: u32) -> u32 {
    (value + alignment - 1) & !(alignment - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn properties(handle: u32, handle_alignment: u32, base_alignment: u32) -> RayTracingProperties {
        RayTracingProperties {
            shader_group_handle_size: handle,
            shader_group_handle_alignment: handle_alignment,
            shader_group_base_alignment: base_alignment,
            ..Default::default()
        }
    }

    #[test]
    fn align_up_test() {
        assert_eq!(align_up(32, 64), 64);
        assert_eq!(align_up(64, 64), 64);
        assert_eq!(align_up(65, 64), 128);
        assert_eq!(align_up(1, 4), 4);
        assert_eq!(align_up(4, 4), 4);
    }

    #[test]
    fn stride_uses_larger_alignment() {
        // Typical desktop limits: 32 byte handles, 32 byte handle and 64 byte base alignment
        let layout = ShaderTableLayout::new(&properties(32, 32, 64));
        assert_eq!(layout.stride, 64);
        assert_eq!(layout.record_offset(1), 64);
        assert_eq!(layout.record_offset(2), 128);
        assert_eq!(layout.total_size(), 192);

        let layout = ShaderTableLayout::new(&properties(32, 32, 16));
        assert_eq!(layout.stride, 32);
    }

    #[test]
    fn regions_follow_group_order() {
        let layout = ShaderTableLayout::new(&properties(32, 32, 64));
        let regions = layout.regions(0x10_000);
        assert_eq!(regions.raygen.device_address, 0x10_000);
        assert_eq!(regions.raygen.size, regions.raygen.stride);
        assert_eq!(regions.miss.device_address, 0x10_040);
        assert_eq!(regions.hit.device_address, 0x10_080);
        assert_eq!(regions.callable.size, 0);
    }

    #[test]
    fn records_hold_handles_in_order() {
        let layout = ShaderTableLayout::new(&properties(4, 4, 8));
        let handles = [1u8, 1, 1, 1, 2, 2, 2, 2, 3, 3, 3, 3];
        let mut table = vec![0u8; layout.total_size() as usize];
        layout.write_records(&handles, &mut table).unwrap();
        assert_eq!(
            table,
            [1, 1, 1, 1, 0, 0, 0, 0, 2, 2, 2, 2, 0, 0, 0, 0, 3, 3, 3, 3, 0, 0, 0, 0]
        );
        assert!(layout.write_records(&handles[..8], &mut table).is_err());
    }
}
