//! Application framework for the Ember engine.
//!
//! This crate handles the boilerplate around the core renderer:
//! - Logging setup
//! - Window creation and the winit event loop
//! - GPU context and [`FrameRenderer`] initialization
//! - Driving `start_render` / `finish_render` every frame
//! - Stopping the loop on fatal GPU errors
//!
//! # Example
//!
//! ```no_run
//! use ember_app::{run_app, AppConfig, AppContext, EmberApp, FrameContext};
//!
//! struct MyApp;
//!
//! impl EmberApp for MyApp {
//!     fn init(_ctx: &mut AppContext) -> anyhow::Result<Self> {
//!         Ok(MyApp)
//!     }
//!
//!     fn update(&mut self, _ctx: &AppContext, _dt: f32) {}
//!
//!     fn render(&mut self, _ctx: &mut AppContext, _frame: &FrameContext) -> anyhow::Result<()> {
//!         Ok(())
//!     }
//! }
//!
//! fn main() -> anyhow::Result<()> {
//!     run_app::<MyApp>(AppConfig::default())
//! }
//! ```

mod app;
mod context;
mod frame;
mod runner;

pub use app::EmberApp;
pub use context::AppContext;
pub use frame::FrameContext;
pub use runner::{is_fatal, run_app, AppConfig};

// Re-export commonly used types for convenience
pub use ember_gpu::{FrameRenderer, GpuContext, GpuContextBuilder, GpuError};
pub use winit::event::WindowEvent;
