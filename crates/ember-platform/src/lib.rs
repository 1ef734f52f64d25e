//! Platform layer for the Ember engine.
//!
//! Implements the core's [`Wsi`] boundary on top of winit windows.

use std::ffi::c_char;
use std::sync::Arc;

use ash::vk;
use ember_gpu::wsi::{default_device_score, DeviceCandidate, Wsi};
use ember_gpu::GpuError;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use thiserror::Error;
use winit::dpi::PhysicalSize;
use winit::event_loop::ActiveEventLoop;
use winit::window::Window;

#[derive(Error, Debug)]
pub enum PlatformError {
    #[error("Window creation failed: {0}")]
    WindowCreation(String),
}

pub type Result<T> = std::result::Result<T, PlatformError>;

/// Platform configuration.
#[derive(Debug, Clone)]
pub struct PlatformConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub resizable: bool,
    /// Substring of the device name to prefer over the default ranking.
    pub preferred_device: Option<String>,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            title: "Ember".to_string(),
            width: 1280,
            height: 720,
            resizable: true,
            preferred_device: None,
        }
    }
}

/// Create a window described by `config`.
pub fn create_window(event_loop: &ActiveEventLoop, config: &PlatformConfig) -> Result<Arc<Window>> {
    let attributes = Window::default_attributes()
        .with_title(&config.title)
        .with_inner_size(PhysicalSize::new(config.width, config.height))
        .with_resizable(config.resizable);

    let window = event_loop
        .create_window(attributes)
        .map_err(|e| PlatformError::WindowCreation(e.to_string()))?;
    Ok(Arc::new(window))
}

/// [`Wsi`] for a winit window.
pub struct WinitWsi {
    window: Arc<Window>,
    preferred_device: Option<String>,
}

impl WinitWsi {
    pub fn new(window: Arc<Window>) -> Self {
        Self {
            window,
            preferred_device: None,
        }
    }

    /// Prefer devices whose name contains `name` (case-insensitive).
    #[must_use]
    pub fn with_preferred_device(mut self, name: Option<String>) -> Self {
        self.preferred_device = name;
        self
    }

    pub fn window(&self) -> &Arc<Window> {
        &self.window
    }
}

impl Wsi for WinitWsi {
    fn required_instance_extensions(&self) -> ember_gpu::Result<Vec<*const c_char>> {
        let display = self
            .window
            .display_handle()
            .map_err(|e| GpuError::SurfaceCreation(format!("Failed to get display handle: {e}")))?;
        let extensions = ash_window::enumerate_required_extensions(display.as_raw())?;
        Ok(extensions.to_vec())
    }

    unsafe fn create_surface(
        &self,
        entry: &ash::Entry,
        instance: &ash::Instance,
    ) -> ember_gpu::Result<vk::SurfaceKHR> {
        let display = self
            .window
            .display_handle()
            .map_err(|e| GpuError::SurfaceCreation(format!("Failed to get display handle: {e}")))?;
        let window_handle = self
            .window
            .window_handle()
            .map_err(|e| GpuError::SurfaceCreation(format!("Failed to get window handle: {e}")))?;

        ash_window::create_surface(
            entry,
            instance,
            display.as_raw(),
            window_handle.as_raw(),
            None,
        )
        .map_err(|e| GpuError::SurfaceCreation(e.to_string()))
    }

    fn framebuffer_extent(&self) -> vk::Extent2D {
        let size = self.window.inner_size();
        vk::Extent2D {
            width: size.width,
            height: size.height,
        }
    }

    fn select_device(&self, candidates: &[DeviceCandidate]) -> Option<usize> {
        pick_device(candidates, self.preferred_device.as_deref())
    }
}

/// A device matching `preferred` by name if there is one, otherwise the
/// best by [`default_device_score`].
pub fn pick_device(candidates: &[DeviceCandidate], preferred: Option<&str>) -> Option<usize> {
    if let Some(preferred) = preferred {
        let preferred = preferred.to_lowercase();
        let found = candidates
            .iter()
            .position(|candidate| candidate.name.to_lowercase().contains(&preferred));
        if found.is_some() {
            return found;
        }
        tracing::warn!("No GPU matching {preferred:?}; using default ranking");
    }

    candidates
        .iter()
        .enumerate()
        .max_by_key(|(_, candidate)| default_device_score(candidate))
        .map(|(index, _)| index)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(name: &str, device_type: vk::PhysicalDeviceType, memory: u64) -> DeviceCandidate {
        DeviceCandidate {
            name: name.to_string(),
            device_type,
            api_version: vk::API_VERSION_1_3,
            device_local_memory_mb: memory,
        }
    }

    fn candidates() -> Vec<DeviceCandidate> {
        vec![
            candidate("Intel Iris Xe", vk::PhysicalDeviceType::INTEGRATED_GPU, 2048),
            candidate("NVIDIA GeForce RTX 4070", vk::PhysicalDeviceType::DISCRETE_GPU, 12288),
            candidate("llvmpipe", vk::PhysicalDeviceType::CPU, 0),
        ]
    }

    #[test]
    fn default_ranking_prefers_discrete() {
        assert_eq!(pick_device(&candidates(), None), Some(1));
    }

    #[test]
    fn preferred_name_overrides_ranking() {
        assert_eq!(pick_device(&candidates(), Some("iris")), Some(0));
        assert_eq!(pick_device(&candidates(), Some("LLVMPIPE")), Some(2));
    }

    #[test]
    fn unknown_preference_falls_back() {
        assert_eq!(pick_device(&candidates(), Some("radeon")), Some(1));
        assert_eq!(pick_device(&[], Some("radeon")), None);
    }
}
