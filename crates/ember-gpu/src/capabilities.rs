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
    Apple,
    Arm,
    Qualcomm,
    Other(u32),
}

impl GpuVendor {
    /// Identify vendor from PCI vendor ID.
    pub const fn from_vendor_id(id: u32) -> Self {
        match id {
            0x10DE => Self::Nvidia,
            0x1002 => Self::Amd,
            0x8086 => Self::Intel,
            0x106B => Self::Apple,
            0x13B5 => Self::Arm,
            0x5143 => Self::Qualcomm,
            other => Self::Other(other),
        }
    }
}

/// Detected GPU capabilities.
#[derive(Debug, Clone)]
pub struct GpuCapabilities {
    /// GPU vendor
    pub vendor: GpuVendor,
    /// Device name
    pub device_name: String,
    /// Device type
    pub device_type: vk::PhysicalDeviceType,
    /// Vulkan API version
    pub api_version: u32,
    /// Driver version
    pub driver_version: u32,
    /// Device-local memory in MB
    pub device_local_memory_mb: u64,
    /// Whether line widths other than 1.0 are supported.
    pub wide_lines: bool,
    /// Supported line width range.
    pub line_width_range: [f32; 2],
    /// Whether wireframe/point polygon modes are supported.
    pub fill_mode_non_solid: bool,
    /// Maximum sampler anisotropy, `None` when unsupported.
    pub max_anisotropy: Option<f32>,
    /// Available device extensions
    pub available_extensions: HashSet<String>,
}

impl GpuCapabilities {
    /// Query capabilities from a physical device.
    ///
    /// # Safety
    /// The instance and physical device must be valid.
    pub unsafe fn query(instance: &ash::Instance, physical_device: vk::PhysicalDevice) -> Self {
        let properties = instance.get_physical_device_properties(physical_device);
        let features = instance.get_physical_device_features(physical_device);
        let memory_properties = instance.get_physical_device_memory_properties(physical_device);

        let available_extensions: HashSet<String> = instance
            .enumerate_device_extension_properties(physical_device)
            .unwrap_or_default()
            .iter()
            .filter_map(|ext| {
                CStr::from_ptr(ext.extension_name.as_ptr())
                    .to_str()
                    .ok()
                    .map(String::from)
            })
            .collect();

        let device_local_memory_mb: u64 = memory_properties
            .memory_heaps
            .iter()
            .take(memory_properties.memory_heap_count as usize)
            .filter(|heap| heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
            .map(|heap| heap.size / (1024 * 1024))
            .sum();

        Self {
            vendor: GpuVendor::from_vendor_id(properties.vendor_id),
            device_name: CStr::from_ptr(properties.device_name.as_ptr())
                .to_string_lossy()
                .into_owned(),
            device_type: properties.device_type,
            api_version: properties.api_version,
            driver_version: properties.driver_version,
            device_local_memory_mb,
            wide_lines: features.wide_lines == vk::TRUE,
            line_width_range: properties.limits.line_width_range,
            fill_mode_non_solid: features.fill_mode_non_solid == vk::TRUE,
            max_anisotropy: (features.sampler_anisotropy == vk::TRUE)
                .then_some(properties.limits.max_sampler_anisotropy),
            available_extensions,
        }
    }

    /// Whether the device reports at least Vulkan 1.3.
    pub fn supports_vulkan_1_3(&self) -> bool {
        api_at_least_1_3(self.api_version)
    }

    /// Whether an extension is advertised.
    pub fn has_extension(&self, name: &CStr) -> bool {
        name.to_str()
            .is_ok_and(|name| self.available_extensions.contains(name))
    }

    /// Clamp a requested line width to what the device can rasterize.
    pub fn clamp_line_width(&self, width: f32) -> f32 {
        if self.wide_lines {
            width.clamp(self.line_width_range[0], self.line_width_range[1])
        } else {
            1.0
        }
    }

    /// Get a human-readable summary of capabilities.
    pub fn summary(&self) -> String {
        format!(
            "{} ({:?}, {:?}) - Vulkan {}.{}.{} - {} MB VRAM",
            self.device_name,
            self.vendor,
            self.device_type,
            vk::api_version_major(self.api_version),
            vk::api_version_minor(self.api_version),
            vk::api_version_patch(self.api_version),
            self.device_local_memory_mb,
        )
    }
}

/// Whether a packed API version is 1.3 or newer.
pub const fn api_at_least_1_3(api_version: u32) -> bool {
    let major = vk::api_version_major(api_version);
    let minor = vk::api_version_minor(api_version);
    major > 1 || (major == 1 && minor >= 3)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(wide_lines: bool) -> GpuCapabilities {
        GpuCapabilities {
            vendor: GpuVendor::Amd,
            device_name: "test".to_string(),
            device_type: vk::PhysicalDeviceType::DISCRETE_GPU,
            api_version: vk::API_VERSION_1_3,
            driver_version: 0,
            device_local_memory_mb: 8192,
            wide_lines,
            line_width_range: [1.0, 8.0],
            fill_mode_non_solid: true,
            max_anisotropy: Some(16.0),
            available_extensions: HashSet::from(["VK_KHR_swapchain".to_string()]),
        }
    }

    #[test]
    fn vendor_identification() {
        assert_eq!(GpuVendor::from_vendor_id(0x10DE), GpuVendor::Nvidia);
        assert_eq!(GpuVendor::from_vendor_id(0x1002), GpuVendor::Amd);
        assert_eq!(GpuVendor::from_vendor_id(0x8086), GpuVendor::Intel);
        assert_eq!(GpuVendor::from_vendor_id(0x1234), GpuVendor::Other(0x1234));
    }

    #[test]
    fn api_version_gate() {
        assert!(api_at_least_1_3(vk::API_VERSION_1_3));
        assert!(api_at_least_1_3(vk::make_api_version(0, 1, 4, 0)));
        assert!(!api_at_least_1_3(vk::API_VERSION_1_2));
    }

    #[test]
    fn line_width_clamping() {
        assert_eq!(caps(true).clamp_line_width(2.0), 2.0);
        assert_eq!(caps(true).clamp_line_width(20.0), 8.0);
        assert_eq!(caps(false).clamp_line_width(2.0), 1.0);
    }

    #[test]
    fn extension_lookup() {
        assert!(caps(true).has_extension(ash::khr::swapchain::NAME));
        assert!(!caps(true).has_extension(ash::khr::portability_subset::NAME));
    }
}
