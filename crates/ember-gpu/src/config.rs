//! Renderer configuration.

use crate::descriptors::DescriptorConfig;
use ash::vk;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for [`crate::FrameRenderer`].
#[derive(Debug, Clone)]
pub struct RendererConfig {
    /// Longest wait on a frame fence before the GPU is considered hung.
    pub fence_timeout: Duration,
    /// Synchronize presentation with the display.
    pub vsync: bool,
    /// Explicit present mode; overrides `vsync` when set.
    pub present_mode: Option<vk::PresentModeKHR>,
    /// Descriptor pool sizing.
    pub descriptors: DescriptorConfig,
    /// GLSL compiler executable, `None` to only use precompiled binaries.
    pub shader_compiler: Option<PathBuf>,
    /// Directory shader URIs are resolved against.
    pub shader_root: PathBuf,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            fence_timeout: Duration::from_secs(3),
            vsync: true,
            present_mode: None,
            descriptors: DescriptorConfig::default(),
            shader_compiler: Some(PathBuf::from("glslc")),
            shader_root: PathBuf::from("."),
        }
    }
}

impl RendererConfig {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn fence_timeout(mut self, timeout: Duration) -> Self {
        self.fence_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn vsync(mut self, vsync: bool) -> Self {
        self.vsync = vsync;
        self
    }

    #[must_use]
    pub const fn present_mode(mut self, mode: vk::PresentModeKHR) -> Self {
        self.present_mode = Some(mode);
        self
    }

    #[must_use]
    pub fn descriptors(mut self, descriptors: DescriptorConfig) -> Self {
        self.descriptors = descriptors;
        self
    }

    #[must_use]
    pub fn shader_compiler(mut self, compiler: Option<PathBuf>) -> Self {
        self.shader_compiler = compiler;
        self
    }

    #[must_use]
    pub fn shader_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.shader_root = root.into();
        self
    }

    /// Present mode to request at startup. Without vsync the tearing
    /// immediate mode is asked for; otherwise the swapchain's own fallback
    /// order decides.
    pub fn requested_present_mode(&self) -> Option<vk::PresentModeKHR> {
        self.present_mode
            .or_else(|| (!self.vsync).then_some(vk::PresentModeKHR::IMMEDIATE))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = RendererConfig::default();
        assert_eq!(config.fence_timeout, Duration::from_secs(3));
        assert!(config.vsync);
        assert_eq!(config.requested_present_mode(), None);
    }

    #[test]
    fn present_mode_request() {
        assert_eq!(
            RendererConfig::new().vsync(false).requested_present_mode(),
            Some(vk::PresentModeKHR::IMMEDIATE)
        );
        assert_eq!(
            RendererConfig::new()
                .vsync(false)
                .present_mode(vk::PresentModeKHR::MAILBOX)
                .requested_present_mode(),
            Some(vk::PresentModeKHR::MAILBOX)
        );
    }
}
