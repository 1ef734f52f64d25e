//! `EmberApp` trait definition.

use crate::context::AppContext;
use crate::frame::FrameContext;
use winit::event::WindowEvent;

/// Trait for Ember applications.
///
/// The framework owns the window, GPU context and [`ember_gpu::FrameRenderer`];
/// an application only updates its state and submits draws.
pub trait EmberApp: Sized {
    /// Initialize the application.
    ///
    /// Called once, after the window, GPU context and renderer exist.
    fn init(ctx: &mut AppContext) -> anyhow::Result<Self>;

    /// Update application state. `dt` is the time since the last frame in
    /// seconds.
    fn update(&mut self, ctx: &AppContext, dt: f32);

    /// Colour the frame is cleared to.
    fn clear_colour(&self) -> [f32; 4] {
        [0.0, 0.0, 0.0, 1.0]
    }

    /// Submit draws for a frame.
    ///
    /// Called between `start_render` and `finish_render`; draw through
    /// `ctx.renderer`. Not called for skipped frames.
    fn render(&mut self, ctx: &mut AppContext, frame: &FrameContext) -> anyhow::Result<()>;

    /// Handle window resize. The swapchain follows on the next frame.
    #[allow(unused_variables)]
    fn on_resize(&mut self, ctx: &mut AppContext, width: u32, height: u32) -> anyhow::Result<()> {
        Ok(())
    }

    /// Handle window events. Return `true` to stop further processing.
    #[allow(unused_variables)]
    fn on_event(&mut self, ctx: &mut AppContext, event: &WindowEvent) -> bool {
        false
    }

    /// Release resources before shutdown. The GPU is idle.
    #[allow(unused_variables)]
    fn cleanup(&mut self, ctx: &mut AppContext) {}
}
