//! Vulkan instance creation and physical device selection.

use crate::capabilities::GpuCapabilities;
use crate::error::{GpuError, Result};
use crate::wsi::{DeviceCandidate, Wsi};
use ash::vk;
use std::borrow::Cow;
use std::ffi::{c_char, c_void, CStr, CString};

/// Validation layers to enable in debug builds.
pub fn validation_layers() -> Vec<&'static CStr> {
    vec![c"VK_LAYER_KHRONOS_validation"]
}

/// Device extensions the engine cannot run without.
pub fn required_device_extensions() -> Vec<&'static CStr> {
    vec![
        ash::khr::swapchain::NAME,
        #[cfg(target_os = "macos")]
        ash::khr::portability_subset::NAME,
    ]
}

/// Debug messenger, present when validation was requested and available.
pub struct DebugMessenger {
    pub(crate) loader: ash::ext::debug_utils::Instance,
    pub(crate) messenger: vk::DebugUtilsMessengerEXT,
}

/// Create a Vulkan instance.
///
/// Returns the instance and whether validation ended up enabled.
///
/// # Safety
/// The entry must be a valid Vulkan entry point.
pub unsafe fn create_instance(
    entry: &ash::Entry,
    app_name: &str,
    enable_validation: bool,
    wsi: &dyn Wsi,
) -> Result<(ash::Instance, bool)> {
    let app_name = CString::new(app_name)
        .map_err(|e| GpuError::InvalidState(format!("Invalid application name: {e}")))?;

    let app_info = vk::ApplicationInfo::default()
        .application_name(&app_name)
        .application_version(vk::make_api_version(0, 0, 1, 0))
        .engine_name(c"Ember")
        .engine_version(vk::make_api_version(0, 0, 1, 0))
        .api_version(vk::API_VERSION_1_3);

    let mut extension_names = wsi.required_instance_extensions()?;

    #[cfg(target_os = "macos")]
    {
        extension_names.push(ash::khr::portability_enumeration::NAME.as_ptr());
        extension_names.push(ash::khr::get_physical_device_properties2::NAME.as_ptr());
    }

    // Only enable layers that are actually installed
    let available_layers = entry.enumerate_instance_layer_properties()?;
    let layers: Vec<&CStr> = if enable_validation {
        validation_layers()
            .into_iter()
            .filter(|layer| {
                let found = available_layers
                    .iter()
                    .any(|props| CStr::from_ptr(props.layer_name.as_ptr()) == *layer);
                if !found {
                    tracing::warn!("Validation layer {layer:?} not available");
                }
                found
            })
            .collect()
    } else {
        Vec::new()
    };
    let validation = !layers.is_empty();
    if validation {
        extension_names.push(ash::ext::debug_utils::NAME.as_ptr());
    }

    let layer_names: Vec<*const c_char> = layers.iter().map(|l| l.as_ptr()).collect();

    // Required for MoltenVK on macOS
    #[cfg(target_os = "macos")]
    let create_flags = vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR;
    #[cfg(not(target_os = "macos"))]
    let create_flags = vk::InstanceCreateFlags::empty();

    let create_info = vk::InstanceCreateInfo::default()
        .application_info(&app_info)
        .enabled_extension_names(&extension_names)
        .enabled_layer_names(&layer_names)
        .flags(create_flags);

    let instance = entry.create_instance(&create_info, None)?;

    Ok((instance, validation))
}

/// Route validation messages into `tracing`.
///
/// # Safety
/// The instance must have been created with `VK_EXT_debug_utils` enabled.
pub unsafe fn create_debug_messenger(
    entry: &ash::Entry,
    instance: &ash::Instance,
) -> Result<DebugMessenger> {
    let loader = ash::ext::debug_utils::Instance::new(entry, instance);

    let create_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::INFO,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(debug_callback));

    let messenger = loader.create_debug_utils_messenger(&create_info, None)?;
    Ok(DebugMessenger { loader, messenger })
}

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user_data: *mut c_void,
) -> vk::Bool32 {
    let message = if callback_data.is_null() || (*callback_data).p_message.is_null() {
        Cow::Borrowed("<no message>")
    } else {
        CStr::from_ptr((*callback_data).p_message).to_string_lossy()
    };

    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        tracing::error!(target: "vulkan", ?message_type, "{message}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        tracing::warn!(target: "vulkan", ?message_type, "{message}");
    } else {
        tracing::debug!(target: "vulkan", ?message_type, "{message}");
    }

    vk::FALSE
}

/// Physical device chosen for rendering.
pub struct SelectedDevice {
    pub physical_device: vk::PhysicalDevice,
    pub queue_family: u32,
    pub capabilities: GpuCapabilities,
}

/// Select the physical device to render with.
///
/// Devices without Vulkan 1.3, without a graphics+transfer family that can
/// present to `surface`, or without the required extensions are discarded;
/// the WSI ranks the rest.
///
/// # Safety
/// The instance and surface must be valid.
pub unsafe fn select_physical_device(
    instance: &ash::Instance,
    surface_loader: &ash::khr::surface::Instance,
    surface: vk::SurfaceKHR,
    wsi: &dyn Wsi,
) -> Result<SelectedDevice> {
    let devices = instance.enumerate_physical_devices()?;

    let mut eligible = Vec::new();
    for device in devices {
        let capabilities = GpuCapabilities::query(instance, device);

        if !capabilities.supports_vulkan_1_3() {
            tracing::debug!("Skipping {}: Vulkan 1.3 not supported", capabilities.device_name);
            continue;
        }

        if let Some(missing) = required_device_extensions()
            .into_iter()
            .find(|ext| !capabilities.has_extension(ext))
        {
            tracing::debug!("Skipping {}: missing {missing:?}", capabilities.device_name);
            continue;
        }

        let Some(queue_family) = find_queue_family(instance, surface_loader, surface, device)
        else {
            tracing::debug!(
                "Skipping {}: no graphics queue that can present",
                capabilities.device_name
            );
            continue;
        };

        eligible.push(SelectedDevice {
            physical_device: device,
            queue_family,
            capabilities,
        });
    }

    let candidates: Vec<DeviceCandidate> = eligible
        .iter()
        .map(|selected| DeviceCandidate {
            name: selected.capabilities.device_name.clone(),
            device_type: selected.capabilities.device_type,
            api_version: selected.capabilities.api_version,
            device_local_memory_mb: selected.capabilities.device_local_memory_mb,
        })
        .collect();

    let index = wsi
        .select_device(&candidates)
        .filter(|&index| index < eligible.len())
        .ok_or(GpuError::NoSuitableDevice)?;

    Ok(eligible.swap_remove(index))
}

/// Find a queue family supporting graphics, transfer and presentation.
unsafe fn find_queue_family(
    instance: &ash::Instance,
    surface_loader: &ash::khr::surface::Instance,
    surface: vk::SurfaceKHR,
    device: vk::PhysicalDevice,
) -> Option<u32> {
    let families = instance.get_physical_device_queue_family_properties(device);

    families.iter().enumerate().find_map(|(index, family)| {
        let index = index as u32;
        let flags_ok = is_render_queue(family.queue_flags);
        let present_ok = surface_loader
            .get_physical_device_surface_support(device, index, surface)
            .unwrap_or(false);
        (flags_ok && present_ok).then_some(index)
    })
}

/// Whether the queue flags satisfy the engine's single-queue model.
pub fn is_render_queue(flags: vk::QueueFlags) -> bool {
    flags.contains(vk::QueueFlags::GRAPHICS) && flags.contains(vk::QueueFlags::TRANSFER)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_requirements() {
        assert!(is_render_queue(
            vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER | vk::QueueFlags::COMPUTE
        ));
        assert!(!is_render_queue(vk::QueueFlags::GRAPHICS));
        assert!(!is_render_queue(vk::QueueFlags::TRANSFER | vk::QueueFlags::COMPUTE));
    }

    #[test]
    fn swapchain_extension_is_always_required() {
        assert!(required_device_extensions().contains(&ash::khr::swapchain::NAME));
    }
}
