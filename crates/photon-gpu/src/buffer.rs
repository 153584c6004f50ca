//! Device-local buffers filled through a staging copy.

use crate::barrier::{ResourceBarrier, ResourceState};
use crate::descriptors::DescriptorSlot;
use crate::device::Device;
use crate::error::{GpuError, Result};
use crate::memory::GpuBuffer;
use ash::vk;
use gpu_allocator::MemoryLocation;

/// Usage of every buffer shaders read through a structured view.
pub const STRUCTURED_USAGE: vk::BufferUsageFlags = vk::BufferUsageFlags::from_raw(
    vk::BufferUsageFlags::STORAGE_BUFFER.as_raw()
        | vk::BufferUsageFlags::TRANSFER_DST.as_raw()
        | vk::BufferUsageFlags::TRANSFER_SRC.as_raw()
        | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS.as_raw(),
);

/// Create a device-local buffer holding `data`.
///
/// Stages through a host-visible buffer, copies, transitions the destination
/// to shader-readable, then submits and flushes before the staging buffer is
/// released. Load-time only.
#[cfg_attr(
    feature = "profiling-tracy",
    tracing::instrument(level = "trace", skip_all)
)]
pub fn upload_buffer(
    device: &mut Device,
    data: &[u8],
    usage: vk::BufferUsageFlags,
    name: &str,
) -> Result<GpuBuffer> {
    if data.is_empty() {
        return Err(GpuError::InvalidData(format!(
            "{name}: cannot upload an empty buffer"
        )));
    }
    let size = data.len() as u64;

    let staging = device.allocator().create_buffer(
        size,
        vk::BufferUsageFlags::TRANSFER_SRC,
        MemoryLocation::CpuToGpu,
        &format!("{name}_staging"),
    )?;
    staging.write_bytes(0, data)?;

    let buffer = device.allocator().create_buffer(
        size,
        usage | vk::BufferUsageFlags::TRANSFER_DST,
        MemoryLocation::GpuOnly,
        name,
    )?;

    device.record_and_flush(|raw, cmd| {
        let region = vk::BufferCopy::default().size(size);
        unsafe { raw.cmd_copy_buffer(cmd, staging.buffer, buffer.buffer, &[region]) };
        ResourceBarrier::transition_buffer(
            raw,
            cmd,
            buffer.buffer,
            ResourceState::CopyDestination,
            ResourceState::ShaderResource,
        );
        Ok(())
    })?;

    Ok(buffer)
}

/// Copy a device buffer into host memory.
pub fn read_back_buffer(device: &mut Device, buffer: &GpuBuffer) -> Result<Vec<u8>> {
    let readback = device.allocator().create_buffer(
        buffer.size,
        vk::BufferUsageFlags::TRANSFER_DST,
        MemoryLocation::GpuToCpu,
        "readback",
    )?;

    let size = buffer.size;
    device.record_and_flush(|raw, cmd| {
        ResourceBarrier::transition_buffer(
            raw,
            cmd,
            buffer.buffer,
            ResourceState::ShaderResource,
            ResourceState::CopySource,
        );
        let region = vk::BufferCopy::default().size(size);
        unsafe { raw.cmd_copy_buffer(cmd, buffer.buffer, readback.buffer, &[region]) };
        ResourceBarrier::transition_buffer(
            raw,
            cmd,
            buffer.buffer,
            ResourceState::CopySource,
            ResourceState::ShaderResource,
        );
        Ok(())
    })?;

    readback
        .mapped_slice()
        .map(<[u8]>::to_vec)
        .ok_or_else(|| GpuError::InvalidState("Readback buffer not mapped".to_string()))
}

/// A device-local buffer with a structured view in the descriptor table.
pub struct StructuredBuffer {
    buffer: GpuBuffer,
    slot: DescriptorSlot,
    element_size: u32,
    element_count: u32,
}

impl StructuredBuffer {
    /// Upload `data` and expose it as `element_count` elements of `element_size` bytes.
    pub fn init(
        device: &mut Device,
        element_size: u32,
        element_count: u32,
        data: &[u8],
        name: &str,
    ) -> Result<Self> {
        let expected = u64::from(element_size) * u64::from(element_count);
        if expected != data.len() as u64 {
            return Err(GpuError::InvalidData(format!(
                "{name}: {element_count} elements of {element_size} bytes need {expected} bytes, got {}",
                data.len()
            )));
        }

        let buffer = upload_buffer(device, data, STRUCTURED_USAGE, name)?;
        let slot = device.allocate_descriptor()?;
        device
            .heap()
            .write_storage_buffer(&slot, buffer.device_address(), buffer.size)?;

        tracing::debug!(
            "Structured buffer {name}: {element_count} x {element_size} bytes in slot {}",
            slot.index
        );

        Ok(Self {
            buffer,
            slot,
            element_size,
            element_count,
        })
    }

    /// Upload a slice of plain-old-data elements.
    pub fn from_slice<T: bytemuck::Pod>(device: &mut Device, data: &[T], name: &str) -> Result<Self> {
        let element_size = u32::try_from(std::mem::size_of::<T>())
            .map_err(|_| GpuError::InvalidData(format!("{name}: element too large")))?;
        let element_count = u32::try_from(data.len())
            .map_err(|_| GpuError::InvalidData(format!("{name}: too many elements")))?;
        Self::init(
            device,
            element_size,
            element_count,
            bytemuck::cast_slice(data),
            name,
        )
    }

    /// Descriptor slot of the structured view.
    pub fn slot(&self) -> DescriptorSlot {
        self.slot
    }

    /// Index of the structured view in the descriptor table.
    pub fn slot_index(&self) -> u32 {
        self.slot.index
    }

    /// Device address of the buffer.
    pub fn device_address(&self) -> vk::DeviceAddress {
        self.buffer.device_address()
    }

    /// Bytes per element.
    pub fn element_size(&self) -> u32 {
        self.element_size
    }

    /// Number of elements.
    pub fn element_count(&self) -> u32 {
        self.element_count
    }

    /// The underlying buffer.
    pub fn buffer(&self) -> &GpuBuffer {
        &self.buffer
    }

    /// Copy the buffer contents back to the host.
    pub fn read_back(&self, device: &mut Device) -> Result<Vec<u8>> {
        read_back_buffer(device, &self.buffer)
    }
}
