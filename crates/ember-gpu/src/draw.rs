//! Draw submission types.

use crate::descriptors::IMAGE_SLOTS;
use crate::pipeline::{PipelineKey, Vertex};
use crate::samplers::SamplerDesc;
use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec4};

/// Set 0, binding 0.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct ViewProjection {
    pub view: Mat4,
    pub projection: Mat4,
}

impl Default for ViewProjection {
    fn default() -> Self {
        Self {
            view: Mat4::IDENTITY,
            projection: Mat4::IDENTITY,
        }
    }
}

impl ViewProjection {
    /// Pixel coordinates with the origin at the top left.
    pub fn screen(extent: vk::Extent2D) -> Self {
        Self {
            view: Mat4::IDENTITY,
            projection: Mat4::orthographic_rh(
                0.0,
                extent.width as f32,
                0.0,
                extent.height as f32,
                -1.0,
                1.0,
            ),
        }
    }
}

/// Set 0, binding 1: one entry per instance.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct InstanceData {
    pub transform: Mat4,
    pub colour: Vec4,
}

impl Default for InstanceData {
    fn default() -> Self {
        Self {
            transform: Mat4::IDENTITY,
            colour: Vec4::ONE,
        }
    }
}

/// An image bound to one of the texture slots of set 1.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextureBinding {
    pub view: vk::ImageView,
    pub sampler: SamplerDesc,
}

/// Fixed-function state of a draw.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawState {
    pub topology: vk::PrimitiveTopology,
    pub polygon_mode: vk::PolygonMode,
    pub depth_compare: vk::CompareOp,
    pub depth_test: bool,
    pub depth_write: bool,
    pub line_width: f32,
}

impl Default for DrawState {
    fn default() -> Self {
        Self {
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            polygon_mode: vk::PolygonMode::FILL,
            depth_compare: vk::CompareOp::LESS_OR_EQUAL,
            depth_test: false,
            depth_write: false,
            line_width: 1.0,
        }
    }
}

impl DrawState {
    /// Pipeline key for this state and shader pair.
    pub fn key(&self, vertex: vk::ShaderModule, fragment: vk::ShaderModule) -> PipelineKey {
        PipelineKey::new(vertex, fragment)
            .topology(self.topology)
            .polygon_mode(self.polygon_mode)
            .depth(self.depth_compare, self.depth_test, self.depth_write)
            .line_width(self.line_width)
    }
}

/// Everything one draw call needs.
#[derive(Debug, Clone)]
pub struct DrawRequest<'a> {
    pub vertex_shader: &'a str,
    pub fragment_shader: &'a str,
    pub state: DrawState,
    pub vertices: &'a [Vertex],
    pub indices: &'a [u32],
    pub view_projection: ViewProjection,
    pub instances: &'a [InstanceData],
    pub textures: [Option<TextureBinding>; IMAGE_SLOTS as usize],
    pub user_uniform: Option<&'a [u8]>,
    pub user_storage: Option<&'a [u8]>,
}

impl<'a> DrawRequest<'a> {
    pub fn new(vertex_shader: &'a str, fragment_shader: &'a str, vertices: &'a [Vertex]) -> Self {
        Self {
            vertex_shader,
            fragment_shader,
            state: DrawState::default(),
            vertices,
            indices: &[],
            view_projection: ViewProjection::default(),
            instances: &[],
            textures: [None; IMAGE_SLOTS as usize],
            user_uniform: None,
            user_storage: None,
        }
    }

    #[must_use]
    pub const fn state(mut self, state: DrawState) -> Self {
        self.state = state;
        self
    }

    #[must_use]
    pub const fn indices(mut self, indices: &'a [u32]) -> Self {
        self.indices = indices;
        self
    }

    #[must_use]
    pub const fn view_projection(mut self, view_projection: ViewProjection) -> Self {
        self.view_projection = view_projection;
        self
    }

    #[must_use]
    pub const fn instances(mut self, instances: &'a [InstanceData]) -> Self {
        self.instances = instances;
        self
    }

    /// Bind `texture` to `slot`; slots past the last are ignored.
    #[must_use]
    pub fn texture(mut self, slot: usize, texture: TextureBinding) -> Self {
        if let Some(binding) = self.textures.get_mut(slot) {
            *binding = Some(texture);
        } else {
            tracing::warn!("Texture slot {slot} out of range");
        }
        self
    }

    #[must_use]
    pub const fn user_data(mut self, uniform: Option<&'a [u8]>, storage: Option<&'a [u8]>) -> Self {
        self.user_uniform = uniform;
        self.user_storage = storage;
        self
    }

    /// Number of instances drawn; an empty instance list draws one default
    /// instance.
    pub fn instance_count(&self) -> u32 {
        u32::try_from(self.instances.len().max(1)).unwrap_or(u32::MAX)
    }

    /// Whether there is anything to rasterize.
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gpu_layouts_match_std430() {
        assert_eq!(std::mem::size_of::<ViewProjection>(), 128);
        assert_eq!(std::mem::size_of::<InstanceData>(), 80);
    }

    #[test]
    fn screen_projection_maps_corners() {
        let vp = ViewProjection::screen(vk::Extent2D {
            width: 800,
            height: 600,
        });
        let top_left = vp.projection * glam::Vec4::new(0.0, 0.0, 0.0, 1.0);
        let bottom_right = vp.projection * glam::Vec4::new(800.0, 600.0, 0.0, 1.0);

        assert!((top_left.x + 1.0).abs() < 1e-6);
        assert!((top_left.y + 1.0).abs() < 1e-6);
        assert!((bottom_right.x - 1.0).abs() < 1e-6);
        assert!((bottom_right.y - 1.0).abs() < 1e-6);
    }

    #[test]
    fn state_feeds_pipeline_key() {
        let state = DrawState {
            topology: vk::PrimitiveTopology::LINE_LIST,
            line_width: 2.0,
            ..DrawState::default()
        };
        let key = state.key(vk::ShaderModule::null(), vk::ShaderModule::null());
        assert_eq!(key.topology, vk::PrimitiveTopology::LINE_LIST);
        assert_eq!(key.width(), 2.0);
        assert_ne!(key, DrawState::default().key(vk::ShaderModule::null(), vk::ShaderModule::null()));
    }

    #[test]
    fn empty_instances_draw_once() {
        let vertices = [Vertex::default(); 3];
        let request = DrawRequest::new("a.vert", "a.frag", &vertices);
        assert_eq!(request.instance_count(), 1);

        let instances = [InstanceData::default(); 4];
        assert_eq!(request.instances(&instances).instance_count(), 4);
    }

    #[test]
    fn out_of_range_texture_slot_is_ignored() {
        let binding = TextureBinding {
            view: vk::ImageView::null(),
            sampler: SamplerDesc::default(),
        };
        let request = DrawRequest::new("a.vert", "a.frag", &[]).texture(9, binding);
        assert!(request.textures.iter().all(Option::is_none));
        assert!(request.is_empty());
    }
}
