//! Vulkan instance creation and adapter selection.

use crate::capabilities::GpuCapabilities;
use crate::error::{GpuError, Result};
use ash::vk;
use raw_window_handle::RawDisplayHandle;
use std::ffi::{c_char, CStr, CString};

/// Validation layers to enable in debug builds.
pub fn validation_layers() -> Vec<&'static CStr> {
    vec![c"VK_LAYER_KHRONOS_validation"]
}

/// Create a Vulkan instance.
///
/// When `display` is given, the surface extensions it needs are enabled.
///
/// # Safety
/// The entry must be a valid Vulkan entry point.
pub unsafe fn create_instance(
    entry: &ash::Entry,
    app_name: &str,
    enable_validation: bool,
    display: Option<RawDisplayHandle>,
) -> Result<ash::Instance> {
    let app_name = CString::new(app_name)
        .map_err(|e| GpuError::Other(format!("Invalid application name: {e}")))?;

    let app_info = vk::ApplicationInfo::default()
        .application_name(&app_name)
        .application_version(vk::make_api_version(0, 0, 1, 0))
        .engine_name(c"Photon")
        .engine_version(vk::make_api_version(0, 0, 1, 0))
        .api_version(vk::API_VERSION_1_3);

    let extension_names: Vec<*const c_char> = match display {
        Some(display) => ash_window::enumerate_required_extensions(display)
            .map_err(|e| GpuError::SurfaceCreation(e.to_string()))?
            .to_vec(),
        None => Vec::new(),
    };

    let layers = if enable_validation {
        validation_layers()
    } else {
        vec![]
    };

    // Missing layers are reported but do not stop instance creation
    let available_layers = unsafe { entry.enumerate_instance_layer_properties() }?;
    let mut layer_names: Vec<*const c_char> = Vec::with_capacity(layers.len());
    for layer in &layers {
        let found = available_layers
            .iter()
            .any(|props| props.layer_name_as_c_str().ok() == Some(*layer));
        if found {
            layer_names.push(layer.as_ptr());
        } else {
            tracing::warn!("Validation layer {} not available", layer.to_string_lossy());
        }
    }

    let create_info = vk::InstanceCreateInfo::default()
        .application_info(&app_info)
        .enabled_extension_names(&extension_names)
        .enabled_layer_names(&layer_names);

    let instance = unsafe { entry.create_instance(&create_info, None) }?;

    Ok(instance)
}

/// Selection record for one enumerated adapter.
#[derive(Debug, Clone)]
pub struct AdapterInfo {
    pub name: String,
    /// Dedicated (device-local) memory in bytes.
    pub dedicated_memory: u64,
    /// Whether the adapter has every feature the renderer needs.
    pub suitable: bool,
}

/// Pick the suitable adapter with the most dedicated memory.
///
/// A later adapter must have strictly more memory to replace an earlier one,
/// so ties resolve to enumeration order.
pub fn select_adapter(adapters: &[AdapterInfo]) -> Option<usize> {
    let mut best: Option<(usize, u64)> = None;
    for (index, adapter) in adapters.iter().enumerate() {
        if !adapter.suitable {
            continue;
        }
        match best {
            Some((_, memory)) if adapter.dedicated_memory <= memory => {}
            _ => best = Some((index, adapter.dedicated_memory)),
        }
    }
    best.map(|(index, _)| index)
}

/// Select the physical device to render with.
///
/// # Safety
/// The instance must be valid.
pub unsafe fn select_physical_device(
    instance: &ash::Instance,
    windowed: bool,
) -> Result<(vk::PhysicalDevice, GpuCapabilities)> {
    let devices = unsafe { instance.enumerate_physical_devices() }?;

    if devices.is_empty() {
        return Err(GpuError::NoSuitableDevice);
    }

    let mut candidates: Vec<(vk::PhysicalDevice, GpuCapabilities)> = devices
        .into_iter()
        .map(|device| (device, unsafe { GpuCapabilities::query(instance, device) }))
        .collect();

    let adapters: Vec<AdapterInfo> = candidates
        .iter()
        .map(|(_, caps)| {
            let suitable = caps.meets_requirements(windowed);
            if !suitable {
                tracing::debug!(
                    "Skipping {}: missing {:?}",
                    caps.device_name,
                    caps.missing_extensions(windowed)
                );
            }
            AdapterInfo {
                name: caps.device_name.clone(),
                dedicated_memory: caps.dedicated_memory,
                suitable,
            }
        })
        .collect();

    let index = select_adapter(&adapters).ok_or(GpuError::NoSuitableDevice)?;
    Ok(candidates.swap_remove(index))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter(name: &str, memory_gb: u64, suitable: bool) -> AdapterInfo {
        AdapterInfo {
            name: name.to_string(),
            dedicated_memory: memory_gb << 30,
            suitable,
        }
    }

    #[test]
    fn largest_memory_wins() {
        let adapters = [
            adapter("integrated", 1, true),
            adapter("discrete", 8, true),
            adapter("small", 4, true),
        ];
        assert_eq!(select_adapter(&adapters), Some(1));
    }

    #[test]
    fn ties_resolve_to_enumeration_order() {
        let adapters = [adapter("first", 8, true), adapter("second", 8, true)];
        assert_eq!(select_adapter(&adapters), Some(0));
    }

    #[test]
    fn unsuitable_adapters_skipped() {
        let adapters = [adapter("no-rt", 24, false), adapter("rt", 8, true)];
        assert_eq!(select_adapter(&adapters), Some(1));
        assert_eq!(select_adapter(&[adapter("no-rt", 24, false)]), None);
        assert_eq!(select_adapter(&[]), None);
    }
}
