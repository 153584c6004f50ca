//! GPU capability detection.

use ash::vk;
use std::collections::HashSet;
use std::ffi::CStr;

/// GPU vendor identification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GpuVendor {
    Nvidia,
    Amd,
    Intel,
    Other(u32),
}

impl GpuVendor {
    /// Identify vendor from PCI vendor ID.
    pub const fn from_vendor_id(id: u32) -> Self {
        match id {
            0x10DE => Self::Nvidia,
            0x1002 => Self::Amd,
            0x8086 => Self::Intel,
            other => Self::Other(other),
        }
    }
}

/// Device extensions the renderer cannot run without.
pub fn required_device_extensions(windowed: bool) -> Vec<&'static CStr> {
    let mut extensions = vec![
        ash::khr::acceleration_structure::NAME,
        ash::khr::ray_tracing_pipeline::NAME,
        ash::khr::deferred_host_operations::NAME,
        ash::ext::descriptor_buffer::NAME,
        ash::ext::mutable_descriptor_type::NAME,
    ];
    if windowed {
        extensions.push(ash::khr::swapchain::NAME);
    }
    extensions
}

/// Shader binding table and acceleration structure limits.
#[derive(Debug, Clone, Copy, Default)]
pub struct RayTracingProperties {
    pub shader_group_handle_size: u32,
    pub shader_group_handle_alignment: u32,
    pub shader_group_base_alignment: u32,
    pub max_ray_recursion_depth: u32,
    pub min_scratch_offset_alignment: u32,
}

/// Descriptor sizes used to lay out the descriptor buffer.
#[derive(Debug, Clone, Copy, Default)]
pub struct DescriptorBufferProperties {
    pub storage_image_size: usize,
    pub sampled_image_size: usize,
    pub storage_buffer_size: usize,
    pub uniform_buffer_size: usize,
    pub offset_alignment: u64,
}

impl DescriptorBufferProperties {
    /// Size of one mutable descriptor: the largest of the types it may hold.
    pub fn mutable_descriptor_size(&self) -> usize {
        self.storage_image_size
            .max(self.sampled_image_size)
            .max(self.storage_buffer_size)
            .max(self.uniform_buffer_size)
    }
}

/// Detected GPU capabilities.
#[derive(Debug, Clone)]
pub struct GpuCapabilities {
    /// GPU vendor
    pub vendor: GpuVendor,
    /// Device name
    pub device_name: String,
    /// Vulkan API version
    pub api_version: u32,
    /// Driver version
    pub driver_version: u32,
    /// Dedicated (device-local) memory in bytes
    pub dedicated_memory: u64,

    pub ray_tracing: RayTracingProperties,
    pub descriptor_buffer: DescriptorBufferProperties,

    // Available extensions
    pub available_extensions: HashSet<String>,
}

impl GpuCapabilities {
    /// Query capabilities from a physical device.
    ///
    /// # Safety
    /// The instance and physical device must be valid.
    pub unsafe fn query(instance: &ash::Instance, physical_device: vk::PhysicalDevice) -> Self {
        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        let memory_properties =
            unsafe { instance.get_physical_device_memory_properties(physical_device) };

        let extensions = unsafe { instance.enumerate_device_extension_properties(physical_device) }
            .unwrap_or_default();

        let available_extensions: HashSet<String> = extensions
            .iter()
            .filter_map(|ext| {
                ext.extension_name_as_c_str()
                    .ok()
                    .and_then(|name| name.to_str().ok())
                    .map(String::from)
            })
            .collect();

        let device_name = properties
            .device_name_as_c_str()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        let dedicated_memory: u64 = memory_properties
            .memory_heaps
            .iter()
            .take(memory_properties.memory_heap_count as usize)
            .filter(|heap| heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
            .map(|heap| heap.size)
            .sum();

        let mut capabilities = Self {
            vendor: GpuVendor::from_vendor_id(properties.vendor_id),
            device_name,
            api_version: properties.api_version,
            driver_version: properties.driver_version,
            dedicated_memory,
            ray_tracing: RayTracingProperties::default(),
            descriptor_buffer: DescriptorBufferProperties::default(),
            available_extensions,
        };

        // Extension property structs may only be chained when the extension exists.
        if capabilities.missing_extensions(false).is_empty() {
            let mut rt_properties = vk::PhysicalDeviceRayTracingPipelinePropertiesKHR::default();
            let mut as_properties = vk::PhysicalDeviceAccelerationStructurePropertiesKHR::default();
            let mut db_properties = vk::PhysicalDeviceDescriptorBufferPropertiesEXT::default();
            let mut properties2 = vk::PhysicalDeviceProperties2::default()
                .push_next(&mut rt_properties)
                .push_next(&mut as_properties)
                .push_next(&mut db_properties);
            unsafe { instance.get_physical_device_properties2(physical_device, &mut properties2) };

            capabilities.ray_tracing = RayTracingProperties {
                shader_group_handle_size: rt_properties.shader_group_handle_size,
                shader_group_handle_alignment: rt_properties.shader_group_handle_alignment,
                shader_group_base_alignment: rt_properties.shader_group_base_alignment,
                max_ray_recursion_depth: rt_properties.max_ray_recursion_depth,
                min_scratch_offset_alignment: as_properties
                    .min_acceleration_structure_scratch_offset_alignment,
            };
            capabilities.descriptor_buffer = DescriptorBufferProperties {
                storage_image_size: db_properties.storage_image_descriptor_size,
                sampled_image_size: db_properties.sampled_image_descriptor_size,
                storage_buffer_size: db_properties.storage_buffer_descriptor_size,
                uniform_buffer_size: db_properties.uniform_buffer_descriptor_size,
                offset_alignment: db_properties.descriptor_buffer_offset_alignment,
            };
        }

        capabilities
    }

    /// Whether the device reports at least Vulkan 1.3.
    pub fn has_vulkan_1_3(&self) -> bool {
        let major = vk::api_version_major(self.api_version);
        let minor = vk::api_version_minor(self.api_version);
        major > 1 || (major == 1 && minor >= 3)
    }

    /// Required extensions this device does not expose.
    pub fn missing_extensions(&self, windowed: bool) -> Vec<&'static CStr> {
        required_device_extensions(windowed)
            .into_iter()
            .filter(|ext| {
                ext.to_str()
                    .map_or(true, |name| !self.available_extensions.contains(name))
            })
            .collect()
    }

    /// Check if the GPU can run the path tracer.
    pub fn meets_requirements(&self, windowed: bool) -> bool {
        self.has_vulkan_1_3() && self.missing_extensions(windowed).is_empty()
    }

    /// Get a human-readable summary of capabilities.
    pub fn summary(&self) -> String {
        format!(
            "{} ({:?}) - Vulkan {}.{}.{} - {} MB VRAM",
            self.device_name,
            self.vendor,
            vk::api_version_major(self.api_version),
            vk::api_version_minor(self.api_version),
            vk::api_version_patch(self.api_version),
            self.dedicated_memory / (1024 * 1024),
        )
    }
}
