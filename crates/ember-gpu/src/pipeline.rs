//! Graphics pipeline creation and caching.

use crate::context::GpuContext;
use crate::error::{GpuError, Result};
use crate::images::DEPTH_FORMAT;
use crate::resource::Owned;
use crate::shader::{ShaderBackend, ShaderCache};
use ash::vk;
use bytemuck::{Pod, Zeroable};
use hashbrown::{HashMap, HashSet};
use std::sync::Arc;

/// The single vertex format every pipeline consumes.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 2],
    pub uv: [f32; 2],
    pub colour: [f32; 4],
}

impl Vertex {
    pub const fn new(position: [f32; 2], uv: [f32; 2], colour: [f32; 4]) -> Self {
        Self {
            position,
            uv,
            colour,
        }
    }

    /// Byte stride of one vertex.
    pub const STRIDE: u32 = std::mem::size_of::<Self>() as u32;

    pub fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription::default()
            .binding(0)
            .stride(Self::STRIDE)
            .input_rate(vk::VertexInputRate::VERTEX)
    }

    pub fn attribute_descriptions() -> [vk::VertexInputAttributeDescription; 3] {
        [
            vk::VertexInputAttributeDescription::default()
                .location(0)
                .binding(0)
                .format(vk::Format::R32G32_SFLOAT)
                .offset(std::mem::offset_of!(Self, position) as u32),
            vk::VertexInputAttributeDescription::default()
                .location(1)
                .binding(0)
                .format(vk::Format::R32G32_SFLOAT)
                .offset(std::mem::offset_of!(Self, uv) as u32),
            vk::VertexInputAttributeDescription::default()
                .location(2)
                .binding(0)
                .format(vk::Format::R32G32B32A32_SFLOAT)
                .offset(std::mem::offset_of!(Self, colour) as u32),
        ]
    }
}

/// Everything that distinguishes one cached pipeline from another.
///
/// The line width is stored as its bit pattern so the key can be hashed;
/// two keys are equal only when every field is bit-identical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipelineKey {
    pub vertex: vk::ShaderModule,
    pub fragment: vk::ShaderModule,
    pub topology: vk::PrimitiveTopology,
    pub polygon_mode: vk::PolygonMode,
    pub depth_compare: vk::CompareOp,
    pub depth_test: bool,
    pub depth_write: bool,
    line_width_bits: u32,
}

impl PipelineKey {
    /// Filled triangle lists without depth testing.
    pub fn new(vertex: vk::ShaderModule, fragment: vk::ShaderModule) -> Self {
        Self {
            vertex,
            fragment,
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            polygon_mode: vk::PolygonMode::FILL,
            depth_compare: vk::CompareOp::LESS_OR_EQUAL,
            depth_test: false,
            depth_write: false,
            line_width_bits: 1.0_f32.to_bits(),
        }
    }

    #[must_use]
    pub const fn topology(mut self, topology: vk::PrimitiveTopology) -> Self {
        self.topology = topology;
        self
    }

    #[must_use]
    pub const fn polygon_mode(mut self, polygon_mode: vk::PolygonMode) -> Self {
        self.polygon_mode = polygon_mode;
        self
    }

    #[must_use]
    pub const fn depth(mut self, compare: vk::CompareOp, test: bool, write: bool) -> Self {
        self.depth_compare = compare;
        self.depth_test = test;
        self.depth_write = write;
        self
    }

    #[must_use]
    pub fn line_width(mut self, width: f32) -> Self {
        self.line_width_bits = width.to_bits();
        self
    }

    pub fn width(&self) -> f32 {
        f32::from_bits(self.line_width_bits)
    }
}

/// Builds pipelines for keys.
pub trait PipelineBackend {
    type Pipeline;

    fn create_pipeline(&mut self, key: &PipelineKey) -> Result<Self::Pipeline>;

    fn raw(pipeline: &Self::Pipeline) -> vk::Pipeline;
}

/// Vulkan graphics pipelines using dynamic rendering against the standard
/// descriptor layouts.
pub struct DevicePipelines {
    ctx: Arc<GpuContext>,
    layout: Owned<vk::PipelineLayout>,
    colour_format: vk::Format,
}

impl DevicePipelines {
    pub fn new(
        ctx: &Arc<GpuContext>,
        set_layouts: &[vk::DescriptorSetLayout],
        colour_format: vk::Format,
    ) -> Result<Self> {
        let layout_info = vk::PipelineLayoutCreateInfo::default().set_layouts(set_layouts);
        let layout = unsafe {
            let layout = ctx
                .device()
                .create_pipeline_layout(&layout_info, None)
                .map_err(|e| GpuError::PipelineCreation(e.to_string()))?;
            Owned::from_raw(ctx, layout)
        };

        Ok(Self {
            ctx: Arc::clone(ctx),
            layout,
            colour_format,
        })
    }

    /// Layout shared by every pipeline.
    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout.raw()
    }

    pub fn colour_format(&self) -> vk::Format {
        self.colour_format
    }

    /// Target a different swapchain format. Existing pipelines must be
    /// cleared by the caller.
    pub fn set_colour_format(&mut self, format: vk::Format) {
        self.colour_format = format;
    }
}

impl PipelineBackend for DevicePipelines {
    type Pipeline = Owned<vk::Pipeline>;

    fn create_pipeline(&mut self, key: &PipelineKey) -> Result<Self::Pipeline> {
        let shader_stages = [
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(key.vertex)
                .name(c"main"),
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(key.fragment)
                .name(c"main"),
        ];

        let bindings = [Vertex::binding_description()];
        let attributes = Vertex::attribute_descriptions();
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&bindings)
            .vertex_attribute_descriptions(&attributes);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(key.topology)
            .primitive_restart_enable(false);

        // Viewport (dynamic)
        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);

        let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(key.polygon_mode)
            .cull_mode(vk::CullModeFlags::NONE)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .depth_bias_enable(false)
            .line_width(1.0);

        let multisampling = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1)
            .sample_shading_enable(false);

        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(key.depth_test)
            .depth_write_enable(key.depth_write)
            .depth_compare_op(key.depth_compare)
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false);

        // Straight alpha, src-over
        let blend_attachment = vk::PipelineColorBlendAttachmentState::default()
            .blend_enable(true)
            .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
            .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .color_blend_op(vk::BlendOp::ADD)
            .src_alpha_blend_factor(vk::BlendFactor::ONE)
            .dst_alpha_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .alpha_blend_op(vk::BlendOp::ADD)
            .color_write_mask(vk::ColorComponentFlags::RGBA);

        let color_blending = vk::PipelineColorBlendStateCreateInfo::default()
            .logic_op_enable(false)
            .attachments(std::slice::from_ref(&blend_attachment));

        let dynamic_states = [
            vk::DynamicState::VIEWPORT,
            vk::DynamicState::SCISSOR,
            vk::DynamicState::LINE_WIDTH,
        ];
        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let colour_formats = [self.colour_format];
        let mut rendering_info = vk::PipelineRenderingCreateInfo::default()
            .color_attachment_formats(&colour_formats)
            .depth_attachment_format(DEPTH_FORMAT);

        let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization)
            .multisample_state(&multisampling)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blending)
            .dynamic_state(&dynamic_state)
            .layout(self.layout.raw())
            .push_next(&mut rendering_info);

        unsafe {
            let pipelines = self
                .ctx
                .device()
                .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
                .map_err(|(_pipelines, e)| GpuError::PipelineCreation(e.to_string()))?;
            Ok(Owned::from_raw(&self.ctx, pipelines[0]))
        }
    }

    fn raw(pipeline: &Self::Pipeline) -> vk::Pipeline {
        pipeline.raw()
    }
}

/// Pipelines memoized by [`PipelineKey`].
///
/// Entries, and keys that failed to build, are only evicted by
/// [`PipelineCache::clear_loaded`].
pub struct PipelineCache<B: PipelineBackend> {
    backend: B,
    pipelines: HashMap<PipelineKey, B::Pipeline>,
    failed: HashSet<PipelineKey>,
}

impl<B: PipelineBackend> PipelineCache<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            pipelines: HashMap::new(),
            failed: HashSet::new(),
        }
    }

    /// Pipeline for `key`, built on first use.
    pub fn load_pipeline(&mut self, key: &PipelineKey) -> Result<vk::Pipeline> {
        if let Some(pipeline) = self.pipelines.get(key) {
            return Ok(B::raw(pipeline));
        }

        let pipeline = self.backend.create_pipeline(key)?;
        let raw = B::raw(&pipeline);
        self.pipelines.insert(*key, pipeline);
        tracing::debug!("Built pipeline {} for {key:?}", self.pipelines.len());
        Ok(raw)
    }

    /// Pipeline for `key`, or `None` when the driver rejected it.
    ///
    /// A rejected key is logged once and not rebuilt until the next
    /// [`PipelineCache::clear_loaded`]. Errors other than a failed build
    /// are returned.
    pub fn load_for_draw(&mut self, key: &PipelineKey) -> Result<Option<vk::Pipeline>> {
        if self.failed.contains(key) {
            return Ok(None);
        }
        match self.load_pipeline(key) {
            Ok(pipeline) => Ok(Some(pipeline)),
            Err(GpuError::PipelineCreation(reason)) => {
                tracing::warn!("Skipping draws with {key:?}: {reason}");
                self.failed.insert(*key);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Drop every pipeline and every shader module they were built from.
    ///
    /// The device must be idle.
    pub fn clear_loaded<S: ShaderBackend>(&mut self, shaders: &mut ShaderCache<S>) {
        let count = self.pipelines.len();
        self.pipelines.clear();
        self.failed.clear();
        shaders.clear();
        tracing::info!("Cleared {count} pipelines and all shader modules");
    }

    /// Number of cached pipelines.
    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    #[derive(Default)]
    struct CountingBackend {
        built: u64,
    }

    impl PipelineBackend for CountingBackend {
        type Pipeline = vk::Pipeline;

        fn create_pipeline(&mut self, _key: &PipelineKey) -> Result<Self::Pipeline> {
            self.built += 1;
            Ok(vk::Pipeline::from_raw(self.built))
        }

        fn raw(pipeline: &Self::Pipeline) -> vk::Pipeline {
            *pipeline
        }
    }

    /// Rejects every key drawn with `rejected` as polygon mode.
    struct RejectingBackend {
        rejected: vk::PolygonMode,
        error: fn() -> GpuError,
        attempts: usize,
    }

    impl PipelineBackend for RejectingBackend {
        type Pipeline = vk::Pipeline;

        fn create_pipeline(&mut self, key: &PipelineKey) -> Result<Self::Pipeline> {
            self.attempts += 1;
            if key.polygon_mode == self.rejected {
                Err((self.error)())
            } else {
                Ok(vk::Pipeline::from_raw(self.attempts as u64))
            }
        }

        fn raw(pipeline: &Self::Pipeline) -> vk::Pipeline {
            *pipeline
        }
    }

    fn rejecting_lines(error: fn() -> GpuError) -> PipelineCache<RejectingBackend> {
        PipelineCache::new(RejectingBackend {
            rejected: vk::PolygonMode::LINE,
            error,
            attempts: 0,
        })
    }

    fn base() -> PipelineKey {
        PipelineKey::new(vk::ShaderModule::from_raw(1), vk::ShaderModule::from_raw(2))
    }

    #[test]
    fn vertex_layout_is_tightly_packed() {
        assert_eq!(Vertex::STRIDE, 32);
        let offsets: Vec<u32> = Vertex::attribute_descriptions()
            .iter()
            .map(|a| a.offset)
            .collect();
        assert_eq!(offsets, [0, 8, 16]);
    }

    #[test]
    fn identical_keys_share_a_pipeline() {
        let mut cache = PipelineCache::new(CountingBackend::default());
        let first = cache.load_pipeline(&base()).unwrap();
        let second = cache.load_pipeline(&base()).unwrap();

        assert_eq!(first, second);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn every_key_field_distinguishes_pipelines() {
        let mut cache = PipelineCache::new(CountingBackend::default());
        let base_pipeline = cache.load_pipeline(&base()).unwrap();

        let variants = [
            PipelineKey {
                vertex: vk::ShaderModule::from_raw(3),
                ..base()
            },
            PipelineKey {
                fragment: vk::ShaderModule::from_raw(4),
                ..base()
            },
            base().topology(vk::PrimitiveTopology::LINE_LIST),
            base().polygon_mode(vk::PolygonMode::LINE),
            base().depth(vk::CompareOp::GREATER, false, false),
            base().depth(vk::CompareOp::LESS_OR_EQUAL, true, false),
            base().depth(vk::CompareOp::LESS_OR_EQUAL, false, true),
            base().line_width(3.0),
        ];

        let mut seen = vec![base_pipeline];
        for key in &variants {
            let pipeline = cache.load_pipeline(key).unwrap();
            assert!(!seen.contains(&pipeline), "{key:?} reused a pipeline");
            seen.push(pipeline);
        }
        assert_eq!(cache.len(), variants.len() + 1);
    }

    #[test]
    fn line_width_adds_exactly_one_entry() {
        let mut cache = PipelineCache::new(CountingBackend::default());
        let lines = base().topology(vk::PrimitiveTopology::LINE_LIST);

        cache.load_pipeline(&lines.line_width(1.0)).unwrap();
        let before = cache.len();
        cache.load_pipeline(&lines.line_width(2.0)).unwrap();

        assert_eq!(cache.len(), before + 1);
        assert_eq!(lines.line_width(2.0).width(), 2.0);
    }

    #[test]
    fn clear_loaded_drops_pipelines_and_shaders() {
        use crate::shader::{DataStore, ShaderCompiler};

        struct Empty;
        impl DataStore for Empty {
            fn read_bytes(&self, _uri: &str) -> Option<Vec<u8>> {
                None
            }
        }
        struct NoModules;
        impl ShaderBackend for NoModules {
            type Module = vk::ShaderModule;
            fn create_module(&mut self, _uri: &str, _code: &[u32]) -> Result<Self::Module> {
                Ok(vk::ShaderModule::null())
            }
            fn raw(module: &Self::Module) -> vk::ShaderModule {
                *module
            }
        }

        let mut shaders = ShaderCache::new(NoModules, Arc::new(Empty), ShaderCompiler::disabled());
        shaders.load("missing.vert");
        let mut cache = PipelineCache::new(CountingBackend::default());
        cache.load_pipeline(&base()).unwrap();

        cache.clear_loaded(&mut shaders);
        assert!(cache.is_empty());
        assert!(shaders.is_empty());

        let rebuilt = cache.load_pipeline(&base()).unwrap();
        assert_eq!(rebuilt, vk::Pipeline::from_raw(2));
    }

    #[test]
    fn rejected_pipeline_skips_the_draw() {
        let mut cache = rejecting_lines(|| {
            GpuError::PipelineCreation("interface mismatch".to_string())
        });
        let wireframe = base().polygon_mode(vk::PolygonMode::LINE);

        assert_eq!(cache.load_for_draw(&wireframe).unwrap(), None);
        assert!(cache.load_for_draw(&base()).unwrap().is_some());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn rejected_key_is_not_rebuilt_until_cleared() {
        use crate::shader::{DataStore, ShaderCompiler};

        struct Empty;
        impl DataStore for Empty {
            fn read_bytes(&self, _uri: &str) -> Option<Vec<u8>> {
                None
            }
        }
        struct NoModules;
        impl ShaderBackend for NoModules {
            type Module = vk::ShaderModule;
            fn create_module(&mut self, _uri: &str, _code: &[u32]) -> Result<Self::Module> {
                Ok(vk::ShaderModule::null())
            }
            fn raw(module: &Self::Module) -> vk::ShaderModule {
                *module
            }
        }

        let mut cache = rejecting_lines(|| GpuError::PipelineCreation("bad".to_string()));
        let wireframe = base().polygon_mode(vk::PolygonMode::LINE);
        for _ in 0..5 {
            assert_eq!(cache.load_for_draw(&wireframe).unwrap(), None);
        }
        assert_eq!(cache.backend().attempts, 1);

        let mut shaders = ShaderCache::new(NoModules, Arc::new(Empty), ShaderCompiler::disabled());
        cache.clear_loaded(&mut shaders);
        assert_eq!(cache.load_for_draw(&wireframe).unwrap(), None);
        assert_eq!(cache.backend().attempts, 2);
    }

    #[test]
    fn device_errors_still_propagate_from_draw_loads() {
        let mut cache = rejecting_lines(|| GpuError::Vulkan(vk::Result::ERROR_DEVICE_LOST));
        let wireframe = base().polygon_mode(vk::PolygonMode::LINE);

        assert!(matches!(
            cache.load_for_draw(&wireframe),
            Err(GpuError::Vulkan(vk::Result::ERROR_DEVICE_LOST))
        ));
    }
}
