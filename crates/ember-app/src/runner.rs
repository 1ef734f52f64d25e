//! Application runner and event loop.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use ember_gpu::{FrameRenderer, GpuContextBuilder, GpuError, RendererConfig, Wsi};
use ember_platform::{create_window, PlatformConfig, WinitWsi};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use winit::application::ApplicationHandler;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::WindowId;

use crate::app::EmberApp;
use crate::context::AppContext;
use crate::frame::FrameContext;

/// Application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Window title.
    pub title: String,
    /// Initial window width.
    pub width: u32,
    /// Initial window height.
    pub height: u32,
    /// Target frames per second (None for unlimited).
    pub target_fps: Option<u32>,
    /// Enable vsync.
    pub vsync: bool,
    /// Enable Vulkan validation layers (default: debug builds only).
    pub validation: bool,
    /// Directory shader URIs are resolved against.
    pub shader_root: PathBuf,
    /// Substring of the GPU name to prefer.
    pub preferred_device: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            title: "Ember".to_string(),
            width: 1280,
            height: 720,
            target_fps: None,
            vsync: true,
            validation: cfg!(debug_assertions),
            shader_root: PathBuf::from("."),
            preferred_device: None,
        }
    }
}

impl AppConfig {
    /// Create a new config with the given title.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    /// Set the window dimensions.
    #[must_use]
    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Set the target FPS.
    #[must_use]
    pub fn with_target_fps(mut self, fps: u32) -> Self {
        self.target_fps = Some(fps);
        self
    }

    /// Enable or disable vsync.
    #[must_use]
    pub fn with_vsync(mut self, vsync: bool) -> Self {
        self.vsync = vsync;
        self
    }

    /// Enable or disable validation layers.
    #[must_use]
    pub fn with_validation(mut self, validation: bool) -> Self {
        self.validation = validation;
        self
    }

    /// Set the shader directory.
    #[must_use]
    pub fn with_shader_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.shader_root = root.into();
        self
    }

    /// Prefer a GPU whose name contains `name`.
    #[must_use]
    pub fn with_preferred_device(mut self, name: impl Into<String>) -> Self {
        self.preferred_device = Some(name.into());
        self
    }

    /// Window settings.
    pub fn platform_config(&self) -> PlatformConfig {
        PlatformConfig {
            title: self.title.clone(),
            width: self.width,
            height: self.height,
            preferred_device: self.preferred_device.clone(),
            ..PlatformConfig::default()
        }
    }

    /// Renderer settings.
    pub fn renderer_config(&self) -> RendererConfig {
        RendererConfig::new()
            .vsync(self.vsync)
            .shader_root(self.shader_root.clone())
    }

    /// Minimum duration of a frame, if the frame rate is capped.
    pub fn target_frame_time(&self) -> Option<Duration> {
        self.target_fps
            .filter(|&fps| fps > 0)
            .map(|fps| Duration::from_nanos(1_000_000_000 / u64::from(fps)))
    }
}

/// Whether an error must stop the frame loop.
///
/// A [`GpuError`] anywhere in the chain is fatal unless it only reports
/// misuse of the renderer (see [`GpuError::is_fatal`]).
pub fn is_fatal(error: &anyhow::Error) -> bool {
    error
        .chain()
        .filter_map(|cause| cause.downcast_ref::<GpuError>())
        .any(GpuError::is_fatal)
}

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

/// Run an [`EmberApp`] with the given configuration.
///
/// Initializes logging, creates the window, GPU context and renderer, and
/// runs the event loop until the window closes or a fatal error occurs. A
/// fatal error is returned.
pub fn run_app<A: EmberApp + 'static>(config: AppConfig) -> anyhow::Result<()> {
    init_logging();

    info!("{} starting...", config.title);

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut runner = AppRunner::<A> {
        config,
        state: None,
        fatal: None,
    };

    event_loop.run_app(&mut runner)?;

    match runner.fatal.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Internal application runner that implements winit's `ApplicationHandler`.
struct AppRunner<A: EmberApp> {
    config: AppConfig,
    state: Option<AppState<A>>,
    fatal: Option<anyhow::Error>,
}

/// Internal application state.
struct AppState<A: EmberApp> {
    // Dropped before the context so app-held GPU resources go first.
    app: A,
    ctx: AppContext,
    target_frame_time: Option<Duration>,
    last_frame_time: Instant,
    // FPS tracking
    min_fps: f64,
    max_fps: f64,
    fps_sum: f64,
    fps_samples: u64,
}

impl<A: EmberApp + 'static> ApplicationHandler for AppRunner<A> {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.state.is_some() {
            return;
        }

        info!("Creating application state...");

        match self.create_state(event_loop) {
            Ok(state) => {
                self.state = Some(state);
                info!("Application ready!");
            }
            Err(e) => {
                error!("Failed to initialize application: {e:#}");
                self.fatal = Some(e);
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        let Some(state) = &mut self.state else {
            return;
        };

        // Let the app handle the event first
        if state.app.on_event(&mut state.ctx, &event) {
            return;
        }

        let result = match event {
            WindowEvent::CloseRequested => {
                info!("Close requested");
                self.shutdown();
                event_loop.exit();
                return;
            }
            WindowEvent::RedrawRequested => {
                let result = state.render_frame();
                state.ctx.window.request_redraw();
                result
            }
            WindowEvent::Resized(size) => state.handle_resize(size.width, size.height),
            _ => Ok(()),
        };

        if let Err(e) = result {
            if is_fatal(&e) {
                error!("Fatal GPU error: {e:#}");
                self.shutdown();
                self.fatal = Some(e);
                event_loop.exit();
            } else {
                error!("Frame error: {e:#}");
            }
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(state) = &self.state {
            state.ctx.window.request_redraw();
        }
    }
}

impl<A: EmberApp + 'static> AppRunner<A> {
    fn create_state(&self, event_loop: &ActiveEventLoop) -> anyhow::Result<AppState<A>> {
        let platform = self.config.platform_config();
        let window = create_window(event_loop, &platform)?;

        let wsi: Arc<dyn Wsi> = Arc::new(
            WinitWsi::new(Arc::clone(&window)).with_preferred_device(platform.preferred_device),
        );

        let gpu = GpuContextBuilder::new()
            .app_name(&self.config.title)
            .validation(self.config.validation)
            .build(wsi)?;

        info!("GPU: {}", gpu.capabilities().summary());

        let renderer = FrameRenderer::new(&gpu, self.config.renderer_config())?;
        let mut ctx = AppContext::new(window, gpu, renderer);

        let app = A::init(&mut ctx)?;

        Ok(AppState {
            app,
            ctx,
            target_frame_time: self.config.target_frame_time(),
            last_frame_time: Instant::now(),
            min_fps: f64::MAX,
            max_fps: 0.0,
            fps_sum: 0.0,
            fps_samples: 0,
        })
    }

    fn shutdown(&mut self) {
        if let Some(mut state) = self.state.take() {
            state.cleanup();
        }
    }
}

impl<A: EmberApp> AppState<A> {
    fn render_frame(&mut self) -> anyhow::Result<()> {
        let frame_start = Instant::now();

        let dt = frame_start
            .duration_since(self.last_frame_time)
            .as_secs_f32();
        self.last_frame_time = frame_start;
        self.track_fps(dt);

        self.app.update(&self.ctx, dt);

        let clear_colour = self.app.clear_colour();
        if let Some(frame) = self.ctx.renderer.start_render(clear_colour)? {
            let frame_ctx = FrameContext::new(frame, dt);
            let rendered = self.app.render(&mut self.ctx, &frame_ctx);
            // Close the frame even if the app failed part-way through.
            self.ctx.renderer.finish_render()?;
            rendered?;
        }

        // Frame pacing
        if let Some(target) = self.target_frame_time {
            let elapsed = frame_start.elapsed();
            if elapsed < target {
                thread::sleep(target - elapsed);
            }
        }

        Ok(())
    }

    fn track_fps(&mut self, dt: f32) {
        if dt > 0.0 {
            let fps = 1.0 / f64::from(dt);
            self.min_fps = self.min_fps.min(fps);
            self.max_fps = self.max_fps.max(fps);
            self.fps_sum += fps;
            self.fps_samples += 1;
        }
    }

    fn handle_resize(&mut self, width: u32, height: u32) -> anyhow::Result<()> {
        if width == 0 || height == 0 {
            return Ok(());
        }

        // The renderer notices the new size on its next frame.
        self.app.on_resize(&mut self.ctx, width, height)?;

        info!("Resized to {width}x{height}");
        Ok(())
    }

    fn cleanup(&mut self) {
        if self.fps_samples > 0 {
            let avg_fps = self.fps_sum / self.fps_samples as f64;
            info!("FPS Statistics:");
            info!("  Min: {:.1}", self.min_fps);
            info!("  Max: {:.1}", self.max_fps);
            info!("  Avg: {avg_fps:.1}");
            info!("  Total frames: {}", self.ctx.frame_count());
        }

        info!("Starting cleanup...");
        if let Err(e) = self.ctx.gpu.wait_idle() {
            error!("Failed to wait idle: {e}");
        }

        self.app.cleanup(&mut self.ctx);
        info!("Cleanup complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_time_from_target_fps() {
        let config = AppConfig::new("test");
        assert_eq!(config.target_frame_time(), None);
        assert_eq!(
            config.clone().with_target_fps(50).target_frame_time(),
            Some(Duration::from_millis(20))
        );
        assert_eq!(config.with_target_fps(0).target_frame_time(), None);
    }

    #[test]
    fn configs_are_derived() {
        let config = AppConfig::new("demo")
            .with_size(800, 600)
            .with_vsync(false)
            .with_shader_root("assets")
            .with_preferred_device("radeon");

        let platform = config.platform_config();
        assert_eq!(platform.title, "demo");
        assert_eq!((platform.width, platform.height), (800, 600));
        assert_eq!(platform.preferred_device.as_deref(), Some("radeon"));

        let renderer = config.renderer_config();
        assert!(!renderer.vsync);
        assert_eq!(renderer.shader_root, PathBuf::from("assets"));
    }

    #[test]
    fn only_gpu_errors_are_fatal() {
        let fatal = anyhow::Error::new(GpuError::FenceTimeout(Duration::from_secs(3)));
        assert!(is_fatal(&fatal));
        assert!(is_fatal(&fatal.context("rendering frame 12")));
        assert!(!is_fatal(&anyhow::anyhow!("texture missing")));
    }

    #[test]
    fn renderer_misuse_is_not_fatal() {
        let misuse = anyhow::Error::new(GpuError::InvalidState(
            "start_render called while a frame is open".to_string(),
        ));
        assert!(!is_fatal(&misuse));
        assert!(!is_fatal(&misuse.context("drawing overlay")));
    }
}
