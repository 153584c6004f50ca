//! Acceleration structure storage shared by the bottom and top levels.

use ash::vk;
use gpu_allocator::MemoryLocation;
use photon_gpu::{Device, GpuBuffer, GpuContext, Result};
use std::sync::Arc;

/// An acceleration structure and the buffer backing it.
pub struct AccelerationStructure {
    handle: vk::AccelerationStructureKHR,
    device_address: vk::DeviceAddress,
    buffer: GpuBuffer,
    context: Arc<GpuContext>,
}

impl AccelerationStructure {
    /// Allocate storage for an acceleration structure of `size` bytes.
    pub fn new(
        device: &Device,
        ty: vk::AccelerationStructureTypeKHR,
        size: u64,
        name: &str,
    ) -> Result<Self> {
        let buffer = device.allocator().create_buffer(
            size,
            vk::BufferUsageFlags::ACCELERATION_STRUCTURE_STORAGE_KHR
                | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
            MemoryLocation::GpuOnly,
            name,
        )?;

        let loader = device.context().acceleration_structure();
        let create_info = vk::AccelerationStructureCreateInfoKHR::default()
            .buffer(buffer.buffer)
            .offset(0)
            .size(size)
            .ty(ty);
        let handle = unsafe { loader.create_acceleration_structure(&create_info, None) }?;

        let address_info =
            vk::AccelerationStructureDeviceAddressInfoKHR::default().acceleration_structure(handle);
        let device_address =
            unsafe { loader.get_acceleration_structure_device_address(&address_info) };

        Ok(Self {
            handle,
            device_address,
            buffer,
            context: device.context().clone(),
        })
    }

    /// Raw handle.
    pub fn handle(&self) -> vk::AccelerationStructureKHR {
        self.handle
    }

    /// Device address used by instance descriptors and shaders.
    pub fn device_address(&self) -> vk::DeviceAddress {
        self.device_address
    }

    /// Size of the backing storage in bytes.
    pub fn size(&self) -> u64 {
        self.buffer.size
    }
}

impl Drop for AccelerationStructure {
    fn drop(&mut self) {
        unsafe {
            self.context
                .acceleration_structure()
                .destroy_acceleration_structure(self.handle, None);
        }
    }
}

/// Build scratch memory, offset to the device's scratch alignment.
pub struct ScratchBuffer {
    buffer: GpuBuffer,
    address: vk::DeviceAddress,
}

impl ScratchBuffer {
    /// Allocate at least `size` bytes of aligned scratch memory.
    pub fn new(device: &Device, size: u64, name: &str) -> Result<Self> {
        let alignment = u64::from(
            device
                .capabilities()
                .ray_tracing
                .min_scratch_offset_alignment
                .max(1),
        );
        let buffer = device.allocator().create_buffer(
            size + alignment,
            vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
            MemoryLocation::GpuOnly,
            name,
        )?;
        let address = buffer.device_address().next_multiple_of(alignment);
        Ok(Self { buffer, address })
    }

    /// Aligned device address of the scratch memory.
    pub fn address(&self) -> vk::DeviceAddress {
        self.address
    }

    /// Usable size in bytes.
    pub fn size(&self) -> u64 {
        self.buffer.size - (self.address - self.buffer.device_address())
    }
}
