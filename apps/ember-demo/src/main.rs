//! Ember Engine Demo
//!
//! Draws a grid of instanced, textured quads and a wireframe ring through
//! the frame renderer.
//!
//! ## Usage
//!
//! ```bash
//! cargo run -p ember-demo -- [OPTIONS]
//! ```
//!
//! ## Options
//!
//! - `--no-vsync`: Start with an uncapped present mode
//! - `--gpu <NAME>`: Prefer the GPU whose name contains NAME
//! - `--shaders <DIR>`: Shader directory (default: the crate's `shaders/`)
//! - `--fps <N>`: Frame rate cap
//! - `-h, --help`: Print help message
//!
//! ## Keys
//!
//! - `R`: Reload shaders
//! - `W`: Toggle wireframe
//! - `V`: Toggle vsync
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: Set log level (e.g., info, debug, trace)

mod app;

use ember_app::{run_app, AppConfig};

use crate::app::{Demo, DemoOptions};

const WIDTH: u32 = 1280;
const HEIGHT: u32 = 720;

fn main() -> anyhow::Result<()> {
    if std::env::args().any(|arg| arg == "-h" || arg == "--help") {
        print_help();
        return Ok(());
    }

    let options = DemoOptions::from_args(std::env::args().skip(1));

    let mut config = AppConfig::new("Ember Engine - Demo")
        .with_size(WIDTH, HEIGHT)
        .with_vsync(options.vsync)
        .with_shader_root(options.shader_root);
    if let Some(gpu) = options.gpu {
        config = config.with_preferred_device(gpu);
    }
    if let Some(fps) = options.fps {
        config = config.with_target_fps(fps);
    }

    run_app::<Demo>(config)
}

fn print_help() {
    eprintln!(
        "Ember Engine Demo

USAGE:
    ember-demo [OPTIONS]

OPTIONS:
    --no-vsync          Start with an uncapped present mode
    --gpu <NAME>        Prefer the GPU whose name contains NAME
    --shaders <DIR>     Shader directory [default: {}]
    --fps <N>           Frame rate cap
    -h, --help          Print help message

KEYS:
    R                   Reload shaders
    W                   Toggle wireframe
    V                   Toggle vsync",
        app::DEFAULT_SHADER_ROOT
    );
}
