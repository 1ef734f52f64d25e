//! GPU error types.
//!
//! Every `GpuError` except [`GpuError::InvalidState`] is fatal for the frame
//! loop. Recoverable conditions (stale swapchain, minimized window, missing
//! shader, rejected pipeline) are reported through `Option`/`bool` return
//! values instead.

use ash::vk;
use thiserror::Error;

/// GPU-related errors.
#[derive(Error, Debug)]
pub enum GpuError {
    /// Vulkan error.
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] vk::Result),

    /// The Vulkan loader could not be found.
    #[error("Failed to load Vulkan: {0}")]
    Loading(String),

    /// No suitable GPU found.
    #[error("No suitable GPU found")]
    NoSuitableDevice,

    /// Required extension not supported.
    #[error("Required extension not supported: {0}")]
    ExtensionNotSupported(String),

    /// Memory allocation failed.
    #[error("Memory allocation failed: {0}")]
    AllocationFailed(String),

    /// Surface creation failed.
    #[error("Surface creation failed: {0}")]
    SurfaceCreation(String),

    /// Swapchain creation failed.
    #[error("Swapchain creation failed: {0}")]
    SwapchainCreation(String),

    /// Pipeline creation failed.
    #[error("Pipeline creation failed: {0}")]
    PipelineCreation(String),

    /// A frame fence was not signaled within the configured timeout.
    #[error("Timed out after {0:?} waiting for frame fence")]
    FenceTimeout(std::time::Duration),

    /// Descriptor sets could not be allocated even from fresh pools.
    #[error("Descriptor set allocation failed after {attempts} attempts")]
    DescriptorExhausted { attempts: u32 },

    /// The caller broke a usage rule, such as opening a frame twice or
    /// uploading a texture with the wrong byte count.
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl GpuError {
    /// Whether the device or context can no longer be trusted. Misuse
    /// errors leave both intact.
    pub const fn is_fatal(&self) -> bool {
        !matches!(self, Self::InvalidState(_))
    }
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, GpuError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn only_misuse_is_recoverable() {
        assert!(!GpuError::InvalidState("frame already open".to_string()).is_fatal());
        assert!(GpuError::FenceTimeout(Duration::from_secs(3)).is_fatal());
        assert!(GpuError::Vulkan(vk::Result::ERROR_DEVICE_LOST).is_fatal());
        assert!(GpuError::DescriptorExhausted { attempts: 5 }.is_fatal());
    }
}
