//! Window-system integration boundary.
//!
//! The core never talks to a windowing toolkit directly. A platform layer
//! implements [`Wsi`] and hands it to [`crate::GpuContextBuilder::build`].
//! The context keeps it alive until the surface has been destroyed.

use crate::error::Result;
use ash::vk;
use std::ffi::c_char;

/// A physical device that passed the core's hard requirements and is up for
/// ranking.
#[derive(Debug, Clone)]
pub struct DeviceCandidate {
    /// Device name as reported by the driver.
    pub name: String,
    /// Discrete, integrated, virtual, CPU, ...
    pub device_type: vk::PhysicalDeviceType,
    /// Vulkan API version supported by the device.
    pub api_version: u32,
    /// Total device-local heap size in MB.
    pub device_local_memory_mb: u64,
}

/// Platform services the core needs.
pub trait Wsi: Send + Sync {
    /// Instance extensions required to create a surface on this platform.
    fn required_instance_extensions(&self) -> Result<Vec<*const c_char>>;

    /// Create the presentation surface.
    ///
    /// # Safety
    /// `instance` must have been created with the extensions returned by
    /// [`Wsi::required_instance_extensions`].
    unsafe fn create_surface(
        &self,
        entry: &ash::Entry,
        instance: &ash::Instance,
    ) -> Result<vk::SurfaceKHR>;

    /// Current framebuffer size in pixels. Zero while minimized.
    fn framebuffer_extent(&self) -> vk::Extent2D;

    /// Pick one of the eligible devices. Returns an index into `candidates`.
    fn select_device(&self, candidates: &[DeviceCandidate]) -> Option<usize> {
        candidates
            .iter()
            .enumerate()
            .max_by_key(|(_, candidate)| default_device_score(candidate))
            .map(|(index, _)| index)
    }
}

/// Default device ranking: discrete first, then by memory.
pub fn default_device_score(candidate: &DeviceCandidate) -> i64 {
    let type_score = match candidate.device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 100,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 50,
        vk::PhysicalDeviceType::CPU => 10,
        _ => 0,
    };

    // +1 per GB
    type_score + (candidate.device_local_memory_mb / 1024) as i64
}

/// Whether an extent has zero area.
pub const fn is_zero_extent(extent: vk::Extent2D) -> bool {
    extent.width == 0 || extent.height == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoWindow;

    impl Wsi for NoWindow {
        fn required_instance_extensions(&self) -> Result<Vec<*const c_char>> {
            Ok(Vec::new())
        }

        unsafe fn create_surface(
            &self,
            _entry: &ash::Entry,
            _instance: &ash::Instance,
        ) -> Result<vk::SurfaceKHR> {
            Ok(vk::SurfaceKHR::null())
        }

        fn framebuffer_extent(&self) -> vk::Extent2D {
            vk::Extent2D::default()
        }
    }

    fn candidate(device_type: vk::PhysicalDeviceType, memory_mb: u64) -> DeviceCandidate {
        DeviceCandidate {
            name: format!("{device_type:?}"),
            device_type,
            api_version: vk::API_VERSION_1_3,
            device_local_memory_mb: memory_mb,
        }
    }

    #[test]
    fn default_selection_prefers_discrete() {
        let candidates = [
            candidate(vk::PhysicalDeviceType::INTEGRATED_GPU, 16 * 1024),
            candidate(vk::PhysicalDeviceType::DISCRETE_GPU, 4 * 1024),
            candidate(vk::PhysicalDeviceType::CPU, 64 * 1024),
        ];
        assert_eq!(NoWindow.select_device(&candidates), Some(1));
    }

    #[test]
    fn memory_breaks_ties() {
        let candidates = [
            candidate(vk::PhysicalDeviceType::DISCRETE_GPU, 4 * 1024),
            candidate(vk::PhysicalDeviceType::DISCRETE_GPU, 12 * 1024),
        ];
        assert_eq!(NoWindow.select_device(&candidates), Some(1));
    }

    #[test]
    fn no_candidates_selects_nothing() {
        assert_eq!(NoWindow.select_device(&[]), None);
    }

    #[test]
    fn zero_extent_detection() {
        assert!(is_zero_extent(vk::Extent2D { width: 0, height: 0 }));
        assert!(is_zero_extent(vk::Extent2D { width: 640, height: 0 }));
        assert!(!is_zero_extent(vk::Extent2D { width: 1, height: 1 }));
    }
}
