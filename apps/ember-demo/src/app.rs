//! Demo application state and drawing.

use std::f32::consts::TAU;
use std::path::PathBuf;

use ash::vk;
use ember_app::{AppContext, EmberApp, FrameContext, WindowEvent};
use ember_gpu::{
    DrawRequest, DrawState, FilterMode, GpuImage, InstanceData, Lease, SamplerDesc,
    TextureBinding, Vertex, ViewProjection, WrapMode,
};
use glam::{Mat4, Quat, Vec3, Vec4};
use tracing::{debug, info, warn};
use winit::event::ElementState;
use winit::keyboard::Key;

pub const DEFAULT_SHADER_ROOT: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/shaders");

const QUAD_VERTEX_SHADER: &str = "quad.vert";
const TEXTURED_FRAGMENT_SHADER: &str = "textured.frag";
const FLAT_FRAGMENT_SHADER: &str = "flat.frag";

const CHECKER_SIZE: u32 = 64;
const CHECKER_CELL: u32 = 8;
const GRID_COLUMNS: u32 = 4;
const GRID_ROWS: u32 = 3;
const RING_SEGMENTS: u32 = 96;

/// Command-line options.
#[derive(Debug, Clone, PartialEq)]
pub struct DemoOptions {
    pub vsync: bool,
    pub gpu: Option<String>,
    pub shader_root: PathBuf,
    pub fps: Option<u32>,
}

impl Default for DemoOptions {
    fn default() -> Self {
        Self {
            vsync: true,
            gpu: None,
            shader_root: PathBuf::from(DEFAULT_SHADER_ROOT),
            fps: None,
        }
    }
}

impl DemoOptions {
    /// Parse options, ignoring anything unrecognized.
    pub fn from_args(args: impl IntoIterator<Item = String>) -> Self {
        let mut options = Self::default();
        let mut args = args.into_iter();

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--no-vsync" => options.vsync = false,
                "--gpu" => options.gpu = args.next(),
                "--shaders" => {
                    if let Some(dir) = args.next() {
                        options.shader_root = PathBuf::from(dir);
                    }
                }
                "--fps" => {
                    options.fps = args.next().and_then(|v| v.parse().ok());
                }
                _ => {}
            }
        }

        options
    }
}

/// Unit quad centred on the origin, as two indexed triangles.
pub fn quad_geometry() -> ([Vertex; 4], [u32; 6]) {
    let white = [1.0; 4];
    let vertices = [
        Vertex::new([-0.5, -0.5], [0.0, 0.0], white),
        Vertex::new([0.5, -0.5], [1.0, 0.0], white),
        Vertex::new([0.5, 0.5], [1.0, 1.0], white),
        Vertex::new([-0.5, 0.5], [0.0, 1.0], white),
    ];
    (vertices, [0, 1, 2, 2, 3, 0])
}

/// Unit circle as a line list, two vertices per segment.
pub fn ring_geometry(segments: u32) -> Vec<Vertex> {
    let point = |i: u32| {
        let angle = TAU * i as f32 / segments as f32;
        let colour = [0.5 + 0.5 * angle.cos(), 0.5 + 0.5 * angle.sin(), 1.0, 1.0];
        Vertex::new([angle.cos(), angle.sin()], [0.0, 0.0], colour)
    };
    (0..segments).flat_map(|i| [point(i), point(i + 1)]).collect()
}

/// Two-tone RGBA8 checkerboard.
pub fn checker_pixels(size: u32, cell: u32) -> Vec<u8> {
    let cell = cell.max(1);
    (0..size * size)
        .flat_map(|i| {
            let (x, y) = (i % size, i / size);
            if (x / cell + y / cell) % 2 == 0 {
                [235, 235, 235, 255]
            } else {
                [40, 40, 48, 255]
            }
        })
        .collect()
}

/// One spinning quad per grid cell, filling `width` x `height` pixels.
pub fn grid_instances(width: u32, height: u32, time: f32) -> Vec<InstanceData> {
    let cell_w = width as f32 / GRID_COLUMNS as f32;
    let cell_h = height as f32 / GRID_ROWS as f32;
    let size = cell_w.min(cell_h) * 0.6;

    (0..GRID_ROWS)
        .flat_map(|row| (0..GRID_COLUMNS).map(move |column| (row, column)))
        .map(|(row, column)| {
            let index = (row * GRID_COLUMNS + column) as f32;
            let centre = Vec3::new(
                (column as f32 + 0.5) * cell_w,
                (row as f32 + 0.5) * cell_h,
                0.0,
            );
            let spin = Quat::from_rotation_z(time * 0.5 + index * 0.4);
            let hue = index / (GRID_ROWS * GRID_COLUMNS) as f32;
            InstanceData {
                transform: Mat4::from_scale_rotation_translation(
                    Vec3::new(size, size, 1.0),
                    spin,
                    centre,
                ),
                colour: Vec4::new(0.6 + 0.4 * hue, 0.8, 1.0 - 0.4 * hue, 1.0),
            }
        })
        .collect()
}

pub struct Demo {
    texture: Option<Lease<GpuImage>>,
    quad: ([Vertex; 4], [u32; 6]),
    ring: Vec<Vertex>,
    time: f32,
    wireframe: bool,
    vsync: bool,
}

impl Demo {
    fn toggle_vsync(&mut self, ctx: &mut AppContext) {
        let candidates: &[vk::PresentModeKHR] = if self.vsync {
            &[vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE]
        } else {
            &[vk::PresentModeKHR::FIFO]
        };

        if candidates
            .iter()
            .any(|&mode| ctx.renderer.request_present_mode(mode))
        {
            self.vsync = !self.vsync;
            info!("Vsync {}", if self.vsync { "on" } else { "off" });
        } else {
            warn!("No alternative present mode available");
        }
    }

    fn draw_quads(&self, ctx: &mut AppContext, frame: &FrameContext) -> anyhow::Result<()> {
        let Some(texture) = &self.texture else {
            return Ok(());
        };

        let (vertices, indices) = &self.quad;
        let instances = grid_instances(frame.width(), frame.height(), self.time);
        let pulse = 0.85 + 0.15 * (self.time * 2.0).sin();
        let tint = Vec4::new(pulse, pulse, pulse, 1.0);

        let state = DrawState {
            polygon_mode: if self.wireframe {
                vk::PolygonMode::LINE
            } else {
                vk::PolygonMode::FILL
            },
            ..DrawState::default()
        };

        let request = DrawRequest::new(QUAD_VERTEX_SHADER, TEXTURED_FRAGMENT_SHADER, vertices)
            .indices(indices)
            .state(state)
            .view_projection(ViewProjection::screen(frame.frame.extent))
            .instances(&instances)
            .texture(
                0,
                TextureBinding {
                    view: texture.view,
                    sampler: SamplerDesc::new(WrapMode::Repeat, FilterMode::Nearest),
                },
            )
            .user_data(Some(bytemuck::bytes_of(&tint)), None);

        if !ctx.renderer.draw(&request)? {
            debug!("Quad draw skipped");
        }
        Ok(())
    }

    fn draw_ring(&self, ctx: &mut AppContext, frame: &FrameContext) -> anyhow::Result<()> {
        let (width, height) = (frame.width() as f32, frame.height() as f32);
        let radius = width.min(height) * 0.45;
        let ring = InstanceData {
            transform: Mat4::from_scale_rotation_translation(
                Vec3::new(radius, radius, 1.0),
                Quat::from_rotation_z(-self.time),
                Vec3::new(width * 0.5, height * 0.5, 0.0),
            ),
            colour: Vec4::ONE,
        };

        let request = DrawRequest::new(QUAD_VERTEX_SHADER, FLAT_FRAGMENT_SHADER, &self.ring)
            .state(DrawState {
                topology: vk::PrimitiveTopology::LINE_LIST,
                line_width: 2.0,
                ..DrawState::default()
            })
            .view_projection(ViewProjection::screen(frame.frame.extent))
            .instances(std::slice::from_ref(&ring));

        if !ctx.renderer.draw(&request)? {
            debug!("Ring draw skipped");
        }
        Ok(())
    }
}

impl EmberApp for Demo {
    fn init(ctx: &mut AppContext) -> anyhow::Result<Self> {
        let options = DemoOptions::from_args(std::env::args().skip(1));

        let pixels = checker_pixels(CHECKER_SIZE, CHECKER_CELL);
        let texture = ctx
            .renderer
            .images()
            .upload_rgba8(CHECKER_SIZE, CHECKER_SIZE, &pixels)?;

        info!(
            "Demo ready: {}x{}, shaders from {}",
            ctx.width(),
            ctx.height(),
            options.shader_root.display()
        );

        Ok(Self {
            texture: Some(texture),
            quad: quad_geometry(),
            ring: ring_geometry(RING_SEGMENTS),
            time: 0.0,
            wireframe: false,
            vsync: options.vsync,
        })
    }

    fn update(&mut self, _ctx: &AppContext, dt: f32) {
        self.time += dt;
    }

    fn clear_colour(&self) -> [f32; 4] {
        [0.02, 0.02, 0.05, 1.0]
    }

    fn render(&mut self, ctx: &mut AppContext, frame: &FrameContext) -> anyhow::Result<()> {
        self.draw_quads(ctx, frame)?;
        self.draw_ring(ctx, frame)?;
        Ok(())
    }

    fn on_resize(&mut self, _ctx: &mut AppContext, width: u32, height: u32) -> anyhow::Result<()> {
        debug!("Demo layout follows {width}x{height}");
        Ok(())
    }

    fn on_event(&mut self, ctx: &mut AppContext, event: &WindowEvent) -> bool {
        let WindowEvent::KeyboardInput { event, .. } = event else {
            return false;
        };
        if event.state != ElementState::Pressed || event.repeat {
            return false;
        }

        match event.logical_key.as_ref() {
            Key::Character("r" | "R") => {
                match ctx.renderer.reload_shaders() {
                    Ok(true) => info!("Shaders reloaded"),
                    Ok(false) => {}
                    Err(e) => warn!("Shader reload failed: {e}"),
                }
                true
            }
            Key::Character("w" | "W") => {
                self.wireframe = !self.wireframe;
                info!("Wireframe {}", if self.wireframe { "on" } else { "off" });
                true
            }
            Key::Character("v" | "V") => {
                self.toggle_vsync(ctx);
                true
            }
            _ => false,
        }
    }

    fn cleanup(&mut self, _ctx: &mut AppContext) {
        self.texture = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn options_default_without_args() {
        assert_eq!(DemoOptions::from_args(Vec::new()), DemoOptions::default());
    }

    #[test]
    fn options_parse_known_flags() {
        let options = DemoOptions::from_args(args(&[
            "--no-vsync",
            "--gpu",
            "nvidia",
            "--shaders",
            "/tmp/shaders",
            "--fps",
            "144",
            "--unknown",
        ]));

        assert!(!options.vsync);
        assert_eq!(options.gpu.as_deref(), Some("nvidia"));
        assert_eq!(options.shader_root, PathBuf::from("/tmp/shaders"));
        assert_eq!(options.fps, Some(144));
    }

    #[test]
    fn bad_fps_is_ignored() {
        let options = DemoOptions::from_args(args(&["--fps", "fast"]));
        assert_eq!(options.fps, None);
    }

    #[test]
    fn quad_indices_stay_in_range() {
        let (vertices, indices) = quad_geometry();
        assert!(indices.iter().all(|&i| (i as usize) < vertices.len()));
    }

    #[test]
    fn ring_closes() {
        let ring = ring_geometry(8);
        assert_eq!(ring.len(), 16);

        let first = ring[0].position;
        let last = ring[15].position;
        assert!((first[0] - last[0]).abs() < 1e-5);
        assert!((first[1] - last[1]).abs() < 1e-5);
    }

    #[test]
    fn checker_alternates_cells() {
        let pixels = checker_pixels(4, 2);
        assert_eq!(pixels.len(), 4 * 4 * 4);

        let texel = |x: usize, y: usize| pixels[(y * 4 + x) * 4];
        assert_eq!(texel(0, 0), texel(1, 1));
        assert_ne!(texel(0, 0), texel(2, 0));
        assert_ne!(texel(0, 0), texel(0, 2));
        assert_eq!(texel(0, 0), texel(2, 2));
    }

    #[test]
    fn grid_fills_every_cell() {
        let instances = grid_instances(800, 600, 0.0);
        assert_eq!(instances.len(), (GRID_COLUMNS * GRID_ROWS) as usize);

        let first = instances[0].transform.w_axis;
        assert!((first.x - 100.0).abs() < 1e-3);
        assert!((first.y - 100.0).abs() < 1e-3);
    }
}
