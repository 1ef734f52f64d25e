//! Frame orchestration.
//!
//! [`FrameRenderer`] drives one frame at a time through
//! `start_render -> draw* -> finish_render`. Each of the [`BUFFERING`]
//! frame slots owns its command buffer, synchronization objects and scratch
//! buffers; a slot is only touched again after its fence has signaled, or
//! when its last frame was abandoned without a submission. The bookkeeping
//! behind those decisions lives in [`FrameCycle`].
//!
//! [`BUFFERING`]: crate::BUFFERING

use crate::buffering::{FrameIndex, PerFrame};
use crate::buffers::{upload_scratch, BufferCache};
use crate::command::{transition_image, CommandRecorder};
use crate::config::RendererConfig;
use crate::context::GpuContext;
use crate::cycle::{FrameCycle, FramePlan, RenderState};
use crate::deferred::DeferredDestructionQueue;
use crate::descriptors::{
    write_sampled_image, write_storage_buffer, write_uniform_buffer, DescriptorCache,
    StandardLayouts, VkDescriptorBackend,
};
use crate::draw::{DrawRequest, DrawState, InstanceData};
use crate::error::{GpuError, Result};
use crate::images::{ImageCache, ImageRequest};
use crate::memory::{GpuBuffer, GpuImage};
use crate::pipeline::{DevicePipelines, PipelineCache};
use crate::pool::{Lease, ScratchArena};
use crate::samplers::{SamplerCache, SamplerDesc};
use crate::shader::{DataStore, FileStore, ShaderCache, ShaderCompiler, VkShaderBackend};
use crate::swapchain::Swapchain;
use crate::sync::FrameSync;
use crate::wsi::is_zero_extent;
use ash::vk;
use std::sync::Arc;

/// Bound to set 2 when the caller supplies no data of its own.
const EMPTY_USER_DATA: [u8; 16] = [0; 16];

/// Per-slot resources.
struct FrameSlot {
    commands: CommandRecorder,
    sync: FrameSync,
    scratch: ScratchArena<GpuBuffer>,
}

impl FrameSlot {
    fn new(ctx: &Arc<GpuContext>) -> Result<Self> {
        Ok(Self {
            commands: CommandRecorder::new(ctx)?,
            sync: FrameSync::new(ctx)?,
            scratch: ScratchArena::new(),
        })
    }
}

/// A frame handed out by [`FrameRenderer::start_render`].
#[derive(Debug, Clone, Copy)]
pub struct Frame {
    /// Slot the frame records into.
    pub index: FrameIndex,
    /// Acquired swapchain image.
    pub image_index: u32,
    /// Render area.
    pub extent: vk::Extent2D,
    /// Command buffer with rendering already begun.
    pub command_buffer: vk::CommandBuffer,
    /// Frames presented before this one.
    pub number: u64,
}

/// Double-buffered frame renderer and owner of every resource cache.
///
/// The window is reached through [`GpuContext::wsi`], which outlives every
/// swapchain built on its surface.
pub struct FrameRenderer {
    ctx: Arc<GpuContext>,
    config: RendererConfig,
    slots: PerFrame<FrameSlot>,
    cycle: FrameCycle,
    deferred: DeferredDestructionQueue,
    descriptors: DescriptorCache<VkDescriptorBackend>,
    pipelines: PipelineCache<DevicePipelines>,
    shaders: ShaderCache<VkShaderBackend>,
    layouts: StandardLayouts,
    buffers: BufferCache,
    images: Arc<ImageCache>,
    samplers: SamplerCache,
    depth: Option<Lease<GpuImage>>,
    swapchain: Swapchain,
}

impl FrameRenderer {
    /// Create a renderer whose shaders are read from `config.shader_root`.
    pub fn new(ctx: &Arc<GpuContext>, config: RendererConfig) -> Result<Self> {
        let store = Arc::new(FileStore::new(config.shader_root.clone()));
        Self::with_data_store(ctx, config, store)
    }

    /// Create a renderer reading shaders through `store`.
    pub fn with_data_store(
        ctx: &Arc<GpuContext>,
        config: RendererConfig,
        store: Arc<dyn DataStore>,
    ) -> Result<Self> {
        let window_extent = ctx.wsi().framebuffer_extent();
        // A minimized window still gets a valid swapchain; it is rebuilt on
        // the first frame with a real size.
        let initial_extent = vk::Extent2D {
            width: window_extent.width.max(1),
            height: window_extent.height.max(1),
        };
        let swapchain = Swapchain::new(ctx, initial_extent, config.requested_present_mode())?;

        let layouts = StandardLayouts::new(ctx)?;
        let pipelines = PipelineCache::new(DevicePipelines::new(
            ctx,
            &layouts.raw(),
            swapchain.format(),
        )?);
        let compiler = config
            .shader_compiler
            .clone()
            .map_or_else(ShaderCompiler::disabled, ShaderCompiler::new);
        let shaders = ShaderCache::new(VkShaderBackend::new(ctx), store, compiler);
        let descriptors =
            DescriptorCache::new(VkDescriptorBackend::new(ctx), config.descriptors.clone());
        let slots = PerFrame::try_from_fn(|_| FrameSlot::new(ctx))?;

        tracing::info!(
            "Frame renderer ready: {:?}, fence timeout {:?}",
            swapchain.present_mode(),
            config.fence_timeout
        );

        Ok(Self {
            ctx: Arc::clone(ctx),
            config,
            slots,
            cycle: FrameCycle::new(),
            deferred: DeferredDestructionQueue::new(),
            descriptors,
            pipelines,
            shaders,
            layouts,
            buffers: BufferCache::new(ctx),
            images: Arc::new(ImageCache::new(ctx)),
            samplers: SamplerCache::new(ctx),
            depth: None,
            swapchain,
        })
    }

    /// Begin a frame cleared to `clear_colour`.
    ///
    /// Returns `None` when no frame can be drawn this tick: the window is
    /// minimized, or the swapchain was stale and has just been rebuilt. The
    /// caller skips drawing and tries again next tick.
    pub fn start_render(&mut self, clear_colour: [f32; 4]) -> Result<Option<Frame>> {
        let window_extent = self.ctx.wsi().framebuffer_extent();
        let plan = self
            .cycle
            .plan(window_extent, self.swapchain.needs_recreate(window_extent))?;
        if plan == FramePlan::Skip {
            return Ok(None);
        }

        let slot = self.cycle.index();
        if self.cycle.must_wait() {
            self.slots[slot].sync.wait(self.config.fence_timeout)?;
        }

        // The slot's previous submission is complete from here on.
        if self.cycle.slot_idle() {
            self.deferred.next_frame();
        }
        self.descriptors.next_frame(slot)?;
        self.slots[slot].scratch.reset();

        if plan == FramePlan::Recreate {
            self.recreate_swapchain()?;
            return Ok(None);
        }

        let acquired = unsafe {
            self.swapchain.acquire(
                self.slots[slot].sync.image_acquired.raw(),
                self.config.fence_timeout,
            )?
        };
        let Some(image_index) = acquired else {
            tracing::debug!("Swapchain out of date on acquire");
            self.recreate_swapchain()?;
            return Ok(None);
        };

        // Only now is a submission guaranteed to signal the fence again.
        self.slots[slot].sync.reset()?;
        self.cycle.fence_reset();

        let extent = self.swapchain.extent();
        let command_buffer = match self.open_frame(slot, image_index, extent, clear_colour) {
            Ok(command_buffer) => command_buffer,
            Err(e) => {
                self.abandon_acquired(slot)?;
                return Err(e);
            }
        };

        self.cycle.begin(image_index);
        Ok(Some(Frame {
            index: slot,
            image_index,
            extent,
            command_buffer,
            number: self.cycle.presented_count(),
        }))
    }

    /// Prepare the depth attachment and begin recording into the slot.
    fn open_frame(
        &mut self,
        slot: FrameIndex,
        image_index: u32,
        extent: vk::Extent2D,
        clear_colour: [f32; 4],
    ) -> Result<vk::CommandBuffer> {
        self.ensure_depth(extent)?;
        let command_buffer = unsafe { self.slots[slot].commands.begin()? };
        unsafe { self.begin_rendering(command_buffer, image_index, extent, clear_colour)? };
        Ok(command_buffer)
    }

    /// Replace the depth attachment when the target extent has changed.
    fn ensure_depth(&mut self, extent: vk::Extent2D) -> Result<()> {
        if self
            .depth
            .as_ref()
            .is_some_and(|depth| depth.extent_2d() == extent)
        {
            return Ok(());
        }

        let depth = self.images.allocate(&ImageRequest::depth(extent))?;
        if let Some(old) = self.depth.replace(depth) {
            // The other slot may still be rendering into it.
            self.deferred.push_owned(old);
        }
        tracing::debug!("Depth attachment {}x{}", extent.width, extent.height);
        Ok(())
    }

    /// Transition the attachments and open dynamic rendering.
    ///
    /// # Safety
    /// `cmd` must be recording and `image_index` freshly acquired.
    unsafe fn begin_rendering(
        &self,
        cmd: vk::CommandBuffer,
        image_index: u32,
        extent: vk::Extent2D,
        clear_colour: [f32; 4],
    ) -> Result<()> {
        let device = self.ctx.device();
        let target = self.swapchain.target(image_index).ok_or_else(|| {
            GpuError::InvalidState(format!("No swapchain image {image_index}"))
        })?;
        let depth = self
            .depth
            .as_ref()
            .ok_or_else(|| GpuError::InvalidState("Depth attachment missing".to_string()))?;

        let depth_stages = vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS
            | vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS;

        transition_image(
            device,
            cmd,
            target.image,
            colour_range(),
            (
                vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
                vk::AccessFlags2::NONE,
            ),
            (
                vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
                vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
            ),
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        );
        // Shared by both slots; this also orders against the previous
        // frame's depth writes.
        transition_image(
            device,
            cmd,
            depth.image,
            depth.full_range(),
            (depth_stages, vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE),
            (
                depth_stages,
                vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ
                    | vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE,
            ),
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL,
        );

        let colour_attachment = vk::RenderingAttachmentInfo::default()
            .image_view(target.view.raw())
            .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .clear_value(vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: clear_colour,
                },
            });
        let depth_attachment = vk::RenderingAttachmentInfo::default()
            .image_view(depth.view)
            .image_layout(vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::DONT_CARE)
            .clear_value(vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            });

        let render_area = vk::Rect2D {
            offset: vk::Offset2D::default(),
            extent,
        };
        let rendering_info = vk::RenderingInfo::default()
            .render_area(render_area)
            .layer_count(1)
            .color_attachments(std::slice::from_ref(&colour_attachment))
            .depth_attachment(&depth_attachment);
        device.cmd_begin_rendering(cmd, &rendering_info);

        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        device.cmd_set_viewport(cmd, 0, &[viewport]);
        device.cmd_set_scissor(cmd, 0, &[render_area]);
        device.cmd_set_line_width(cmd, 1.0);
        Ok(())
    }

    /// Record one draw into the open frame.
    ///
    /// Returns `false` when the draw was skipped: no frame is open, there
    /// are no vertices, or a shader or pipeline failed to build.
    pub fn draw(&mut self, request: &DrawRequest<'_>) -> Result<bool> {
        if !self.cycle.state().is_recording() {
            tracing::warn!("draw called without an open frame");
            return Ok(false);
        }
        if request.is_empty() {
            return Ok(false);
        }

        let vertex = self.shaders.load(request.vertex_shader);
        let fragment = self.shaders.load(request.fragment_shader);
        let (Some(vertex), Some(fragment)) = (vertex, fragment) else {
            tracing::trace!(
                "Skipping draw with {} / {}",
                request.vertex_shader,
                request.fragment_shader
            );
            return Ok(false);
        };

        let caps = self.ctx.capabilities();
        let state = DrawState {
            line_width: caps.clamp_line_width(request.state.line_width),
            polygon_mode: if caps.fill_mode_non_solid {
                request.state.polygon_mode
            } else {
                vk::PolygonMode::FILL
            },
            ..request.state
        };
        let Some(pipeline) = self.pipelines.load_for_draw(&state.key(vertex, fragment))? else {
            return Ok(false);
        };

        let slot = self.cycle.index();
        let cmd = self.slots[slot].commands.buffer();
        let sets = self.write_descriptor_sets(request)?;

        let scratch = &mut self.slots[slot].scratch;
        let vertex_buffer = upload_scratch(&self.ctx, scratch, bytemuck::cast_slice(request.vertices))?;
        let index_buffer = if request.indices.is_empty() {
            None
        } else {
            Some(upload_scratch(
                &self.ctx,
                scratch,
                bytemuck::cast_slice(request.indices),
            )?)
        };

        let vertex_count = count(request.vertices.len())?;
        let index_count = count(request.indices.len())?;
        let instance_count = request.instance_count();
        let device = self.ctx.device();

        unsafe {
            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, pipeline);
            device.cmd_set_line_width(cmd, state.line_width);
            device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                self.pipelines.backend().layout(),
                0,
                &sets,
                &[],
            );
            device.cmd_bind_vertex_buffers(cmd, 0, &[vertex_buffer], &[0]);
            match index_buffer {
                Some(index_buffer) => {
                    device.cmd_bind_index_buffer(cmd, index_buffer, 0, vk::IndexType::UINT32);
                    device.cmd_draw_indexed(cmd, index_count, instance_count, 0, 0, 0);
                }
                None => device.cmd_draw(cmd, vertex_count, instance_count, 0, 0),
            }
        }
        Ok(true)
    }

    /// Allocate and fill the three descriptor sets of a draw.
    fn write_descriptor_sets(&mut self, request: &DrawRequest<'_>) -> Result<[vk::DescriptorSet; 3]> {
        let slot = self.cycle.index();
        let default_instance = [InstanceData::default()];
        let instances = if request.instances.is_empty() {
            &default_instance[..]
        } else {
            request.instances
        };

        let view_projection = bytemuck::bytes_of(&request.view_projection);
        let instance_bytes: &[u8] = bytemuck::cast_slice(instances);
        let user_uniform = request.user_uniform.unwrap_or(&EMPTY_USER_DATA);
        let user_storage = request.user_storage.unwrap_or(&EMPTY_USER_DATA);

        let scratch = &mut self.slots[slot].scratch;
        let view_projection_buffer = upload_scratch(&self.ctx, scratch, view_projection)?;
        let instance_buffer = upload_scratch(&self.ctx, scratch, instance_bytes)?;
        let user_uniform_buffer = upload_scratch(&self.ctx, scratch, user_uniform)?;
        let user_storage_buffer = upload_scratch(&self.ctx, scratch, user_storage)?;

        let frame_set = self.descriptors.allocate(self.layouts.frame.raw())?;
        let texture_set = self.descriptors.allocate(self.layouts.textures.raw())?;
        let user_set = self.descriptors.allocate(self.layouts.user.raw())?;

        let white = self.images.white_texture()?;
        let mut textures = Vec::with_capacity(request.textures.len());
        for binding in &request.textures {
            let (view, desc) = match binding {
                Some(binding) => (binding.view, binding.sampler),
                None => (white.view, SamplerDesc::default()),
            };
            textures.push((view, self.samplers.get(desc)?));
        }

        let device = self.ctx.device();
        unsafe {
            write_uniform_buffer(
                device,
                frame_set,
                0,
                view_projection_buffer,
                byte_len(view_projection),
            );
            write_storage_buffer(device, frame_set, 1, instance_buffer, byte_len(instance_bytes));
            for (binding, (view, sampler)) in (0u32..).zip(textures) {
                write_sampled_image(device, texture_set, binding, view, sampler);
            }
            write_uniform_buffer(device, user_set, 0, user_uniform_buffer, byte_len(user_uniform));
            write_storage_buffer(device, user_set, 1, user_storage_buffer, byte_len(user_storage));
        }

        Ok([frame_set, texture_set, user_set])
    }

    /// Submit and present the open frame.
    ///
    /// Returns `false`, without submitting or presenting, when the window has
    /// been minimized since `start_render`. The recorded commands are
    /// discarded and the frame index does not advance.
    pub fn finish_render(&mut self) -> Result<bool> {
        let RenderState::Recording { image_index } = self.cycle.state() else {
            tracing::warn!("finish_render called without an open frame");
            return Ok(false);
        };
        let slot = self.cycle.index();

        if is_zero_extent(self.ctx.wsi().framebuffer_extent()) {
            tracing::debug!(
                "Window minimized; dropping frame {}",
                self.cycle.presented_count()
            );
            self.abandon_acquired(slot)?;
            return Ok(false);
        }

        let Some(target_image) = self.swapchain.target(image_index).map(|target| target.image)
        else {
            self.abandon_acquired(slot)?;
            return Err(GpuError::InvalidState(format!(
                "No swapchain image {image_index}"
            )));
        };
        let sync = &self.slots[slot].sync;
        let cmd = self.slots[slot].commands.buffer();
        let device = self.ctx.device();

        unsafe {
            device.cmd_end_rendering(cmd);
            transition_image(
                device,
                cmd,
                target_image,
                colour_range(),
                (
                    vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
                    vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
                ),
                (vk::PipelineStageFlags2::BOTTOM_OF_PIPE, vk::AccessFlags2::NONE),
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                vk::ImageLayout::PRESENT_SRC_KHR,
            );
            self.slots[slot].commands.end()?;

            let wait_semaphores = [sync.image_acquired.raw()];
            let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
            let command_buffers = [cmd];
            let signal_semaphores = [sync.ready_to_present.raw()];
            let submit_info = vk::SubmitInfo::default()
                .wait_semaphores(&wait_semaphores)
                .wait_dst_stage_mask(&wait_stages)
                .command_buffers(&command_buffers)
                .signal_semaphores(&signal_semaphores);
            self.ctx.submit(&[submit_info], sync.frame_drawn.raw())?;
        }
        self.cycle.submitted();

        let swapchains = [self.swapchain.handle()];
        let image_indices = [image_index];
        let wait_semaphores = [self.slots[slot].sync.ready_to_present.raw()];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);
        if unsafe { self.ctx.present(&present_info)? } {
            self.swapchain.mark_stale();
        }

        self.cycle.presented();
        Ok(true)
    }

    /// Give up on an acquired image without submitting anything.
    ///
    /// The acquire semaphore may still be pending, so the slot gets a fresh
    /// one and the old one waits in the deferred queue. The image stays
    /// acquired until the swapchain, marked stale here, is replaced.
    fn abandon_acquired(&mut self, slot: FrameIndex) -> Result<()> {
        self.cycle.abandon();
        self.swapchain.mark_stale();
        let spent = self.slots[slot].sync.replace_image_acquired()?;
        self.deferred.push_owned(spent);
        Ok(())
    }

    /// Rebuild the swapchain for the current window size.
    ///
    /// Returns `false` when a frame is open or the window has no area.
    pub fn recreate_swapchain(&mut self) -> Result<bool> {
        if !self.cycle.can_rebuild() {
            tracing::warn!("Swapchain recreation rejected: a frame is being recorded");
            return Ok(false);
        }
        let extent = self.ctx.wsi().framebuffer_extent();
        if is_zero_extent(extent) {
            return Ok(false);
        }

        self.ctx.wait_idle()?;
        let old_format = self.swapchain.format();
        self.swapchain.recreate(extent)?;

        let format = self.swapchain.format();
        if format != old_format {
            tracing::info!("Surface format changed to {format:?}; rebuilding pipelines");
            self.pipelines.clear_loaded(&mut self.shaders);
            self.pipelines.backend_mut().set_colour_format(format);
        }
        Ok(true)
    }

    /// Ask for `mode` from the next swapchain recreation on. Returns `false`
    /// when the surface does not support it.
    pub fn request_present_mode(&mut self, mode: vk::PresentModeKHR) -> bool {
        self.swapchain.request_present_mode(mode)
    }

    /// Drop every pipeline and shader module so sources are reloaded (and
    /// recompiled when stale) on next use. Returns `false` while a frame is
    /// open.
    pub fn reload_shaders(&mut self) -> Result<bool> {
        if !self.cycle.can_rebuild() {
            tracing::warn!("Shader reload rejected: a frame is being recorded");
            return Ok(false);
        }
        self.ctx.wait_idle()?;
        self.pipelines.clear_loaded(&mut self.shaders);
        Ok(true)
    }

    pub fn context(&self) -> &Arc<GpuContext> {
        &self.ctx
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    pub fn swapchain(&self) -> &Swapchain {
        &self.swapchain
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent()
    }

    pub fn state(&self) -> RenderState {
        self.cycle.state()
    }

    /// Slot the next frame records into.
    pub fn frame_index(&self) -> FrameIndex {
        self.cycle.index()
    }

    /// Frames presented so far.
    pub fn frame_number(&self) -> u64 {
        self.cycle.presented_count()
    }

    /// Shared image cache; loaders on other threads may hold a clone.
    pub fn images(&self) -> &Arc<ImageCache> {
        &self.images
    }

    pub fn buffers_mut(&mut self) -> &mut BufferCache {
        &mut self.buffers
    }

    pub fn samplers_mut(&mut self) -> &mut SamplerCache {
        &mut self.samplers
    }

    /// Queue for resources that submitted frames may still read.
    pub fn deferred_mut(&mut self) -> &mut DeferredDestructionQueue {
        &mut self.deferred
    }

    pub fn pipeline_count(&self) -> usize {
        self.pipelines.len()
    }
}

impl Drop for FrameRenderer {
    fn drop(&mut self) {
        if let Err(e) = self.ctx.wait_idle() {
            tracing::error!("Failed to wait idle before renderer shutdown: {e}");
        }
        self.depth.take();
        self.deferred.flush();
        tracing::info!(
            "Frame renderer destroyed after {} frames",
            self.cycle.presented_count()
        );
    }
}

fn colour_range() -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange::default()
        .aspect_mask(vk::ImageAspectFlags::COLOR)
        .base_mip_level(0)
        .level_count(1)
        .base_array_layer(0)
        .layer_count(1)
}

fn byte_len(bytes: &[u8]) -> vk::DeviceSize {
    bytes.len() as vk::DeviceSize
}

fn count(len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| GpuError::InvalidState(format!("{len} elements in one draw")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn draw_counts_fit_u32() {
        assert_eq!(count(6).unwrap(), 6);
        assert!(count(usize::MAX).is_err());
    }

    #[test]
    fn draw_byte_lengths() {
        assert_eq!(byte_len(&EMPTY_USER_DATA), 16);
        assert_eq!(byte_len(&[]), 0);
    }
}
