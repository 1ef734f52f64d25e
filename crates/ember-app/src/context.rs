//! Application context.

use std::sync::Arc;

use ember_gpu::{FrameRenderer, GpuContext};
use winit::window::Window;

/// Application context shared across all app methods.
///
/// Fields drop in declaration order: the renderer's swapchain goes first,
/// then the context and its surface, and the window last.
pub struct AppContext {
    /// Frame renderer and resource caches.
    pub renderer: FrameRenderer,
    /// GPU context with device and queue.
    pub gpu: Arc<GpuContext>,
    /// The window handle.
    pub window: Arc<Window>,
}

impl AppContext {
    pub(crate) fn new(window: Arc<Window>, gpu: Arc<GpuContext>, renderer: FrameRenderer) -> Self {
        Self {
            renderer,
            gpu,
            window,
        }
    }

    /// Get the swapchain width.
    pub fn width(&self) -> u32 {
        self.renderer.extent().width
    }

    /// Get the swapchain height.
    pub fn height(&self) -> u32 {
        self.renderer.extent().height
    }

    /// Get the aspect ratio (width / height).
    pub fn aspect_ratio(&self) -> f32 {
        let extent = self.renderer.extent();
        extent.width as f32 / extent.height.max(1) as f32
    }

    /// Frames presented so far.
    pub fn frame_count(&self) -> u64 {
        self.renderer.frame_number()
    }
}
