//! Per-frame context for rendering.

use ember_gpu::Frame;

/// Context for the frame being rendered.
#[derive(Debug, Clone, Copy)]
pub struct FrameContext {
    /// The open frame.
    pub frame: Frame,
    /// Delta time since last frame in seconds.
    pub dt: f32,
}

impl FrameContext {
    pub(crate) const fn new(frame: Frame, dt: f32) -> Self {
        Self { frame, dt }
    }

    pub const fn width(&self) -> u32 {
        self.frame.extent.width
    }

    pub const fn height(&self) -> u32 {
        self.frame.extent.height
    }

    /// Frames presented before this one.
    pub const fn number(&self) -> u64 {
        self.frame.number
    }
}
