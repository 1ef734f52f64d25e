//! Pooled images, texture upload and the default white texture.

use crate::command::transition_image;
use crate::context::GpuContext;
use crate::error::{GpuError, Result};
use crate::memory::{GpuBuffer, GpuImage};
use crate::pool::{Lease, PoolFactory, ResourcePool};
use ash::vk;
use gpu_allocator::MemoryLocation;
use parking_lot::Mutex;
use std::sync::Arc;

/// Depth attachment format used by every pipeline.
pub const DEPTH_FORMAT: vk::Format = vk::Format::D32_SFLOAT;

/// Format of uploaded RGBA8 textures.
pub const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_SRGB;

/// Sampling by earlier submissions. A pooled image may come back from a
/// lease that a frame in flight still reads, so an upload waits for it.
const PRIOR_SAMPLING: (vk::PipelineStageFlags2, vk::AccessFlags2) =
    (vk::PipelineStageFlags2::FRAGMENT_SHADER, vk::AccessFlags2::NONE);

const COPY_WRITE: (vk::PipelineStageFlags2, vk::AccessFlags2) = (
    vk::PipelineStageFlags2::COPY,
    vk::AccessFlags2::TRANSFER_WRITE,
);

const SAMPLED_READ: (vk::PipelineStageFlags2, vk::AccessFlags2) = (
    vk::PipelineStageFlags2::FRAGMENT_SHADER,
    vk::AccessFlags2::SHADER_SAMPLED_READ,
);

/// Full description of a pooled image. Images are only reused for an
/// identical request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageRequest {
    pub width: u32,
    pub height: u32,
    pub format: vk::Format,
    pub usage: vk::ImageUsageFlags,
    pub aspect: vk::ImageAspectFlags,
    pub mip_levels: u32,
}

impl ImageRequest {
    /// A sampled RGBA8 texture that can be written by transfers.
    pub const fn texture(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            format: TEXTURE_FORMAT,
            usage: vk::ImageUsageFlags::from_raw(
                vk::ImageUsageFlags::SAMPLED.as_raw() | vk::ImageUsageFlags::TRANSFER_DST.as_raw(),
            ),
            aspect: vk::ImageAspectFlags::COLOR,
            mip_levels: 1,
        }
    }

    /// A depth attachment matching `extent`.
    pub const fn depth(extent: vk::Extent2D) -> Self {
        Self {
            width: extent.width,
            height: extent.height,
            format: DEPTH_FORMAT,
            usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            aspect: vk::ImageAspectFlags::DEPTH,
            mip_levels: 1,
        }
    }

    pub const fn extent(&self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.width,
            height: self.height,
        }
    }

    /// Byte length of tightly packed RGBA8 pixels for this request.
    pub const fn rgba8_len(&self) -> usize {
        self.width as usize * self.height as usize * 4
    }
}

struct ImageFactory<'a> {
    ctx: &'a Arc<GpuContext>,
}

impl PoolFactory<ImageRequest, GpuImage> for ImageFactory<'_> {
    fn create(&mut self, request: &ImageRequest) -> Result<GpuImage> {
        let create_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(request.format)
            .extent(vk::Extent3D {
                width: request.width.max(1),
                height: request.height.max(1),
                depth: 1,
            })
            .mip_levels(request.mip_levels.max(1))
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(request.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        GpuImage::new(self.ctx, &create_info, request.aspect, "pooled image")
    }

    fn reinit(&mut self, _image: &mut GpuImage, _request: &ImageRequest) -> Result<()> {
        // Contents are discarded by the next UNDEFINED-layout transition.
        Ok(())
    }
}

/// Pool of images keyed by their full request.
///
/// Unlike the other caches this one is internally locked, so texture loaders
/// running on other threads can allocate and upload.
///
/// As with [`crate::BufferCache`], a lease that submitted frames may still
/// sample belongs in the deferred destruction queue, not a direct drop.
/// Uploads additionally wait on earlier fragment-shader reads.
pub struct ImageCache {
    ctx: Arc<GpuContext>,
    pool: Mutex<ResourcePool<ImageRequest, GpuImage>>,
    white: Mutex<Option<Arc<Lease<GpuImage>>>>,
}

impl ImageCache {
    pub fn new(ctx: &Arc<GpuContext>) -> Self {
        Self {
            ctx: Arc::clone(ctx),
            pool: Mutex::new(ResourcePool::new("image")),
            white: Mutex::new(None),
        }
    }

    /// Lease an image matching `request`.
    pub fn allocate(&self, request: &ImageRequest) -> Result<Lease<GpuImage>> {
        let mut factory = ImageFactory { ctx: &self.ctx };
        self.pool.lock().allocate(request, &mut factory)
    }

    /// Upload tightly packed RGBA8 pixels into a new sampled texture.
    ///
    /// Blocks until the copy has executed.
    pub fn upload_rgba8(&self, width: u32, height: u32, pixels: &[u8]) -> Result<Lease<GpuImage>> {
        let request = ImageRequest::texture(width, height);
        if width == 0 || height == 0 || pixels.len() != request.rgba8_len() {
            return Err(GpuError::InvalidState(format!(
                "Expected {} bytes for a {width}x{height} RGBA8 texture, got {}",
                request.rgba8_len(),
                pixels.len()
            )));
        }

        let image = self.allocate(&request)?;
        let staging = GpuBuffer::new(
            &self.ctx,
            pixels.len() as u64,
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryLocation::CpuToGpu,
            "texture staging",
        )?;
        staging.write_bytes(0, pixels)?;

        let range = image.full_range();
        self.ctx.one_shot(|device, cmd| unsafe {
            transition_image(
                device,
                cmd,
                image.image,
                range,
                PRIOR_SAMPLING,
                COPY_WRITE,
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            );

            let region = vk::BufferImageCopy::default()
                .image_subresource(
                    vk::ImageSubresourceLayers::default()
                        .aspect_mask(vk::ImageAspectFlags::COLOR)
                        .mip_level(0)
                        .base_array_layer(0)
                        .layer_count(1),
                )
                .image_extent(vk::Extent3D {
                    width,
                    height,
                    depth: 1,
                });
            device.cmd_copy_buffer_to_image(
                cmd,
                staging.buffer,
                image.image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );

            transition_image(
                device,
                cmd,
                image.image,
                range,
                COPY_WRITE,
                SAMPLED_READ,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            );
        })?;

        Ok(image)
    }

    /// The 1x1 white texture bound to unused image slots.
    pub fn white_texture(&self) -> Result<Arc<Lease<GpuImage>>> {
        let mut white = self.white.lock();
        if let Some(texture) = white.as_ref() {
            return Ok(Arc::clone(texture));
        }
        let texture = Arc::new(self.upload_rgba8(1, 1, &[0xFF; 4])?);
        tracing::debug!("Created default white texture");
        *white = Some(Arc::clone(&texture));
        Ok(texture)
    }

    /// Number of images owned by the cache.
    pub fn total(&self) -> usize {
        self.pool.lock().total()
    }

    /// Drop idle images and the white texture. Only valid after the device
    /// has gone idle.
    pub fn clear(&self) {
        self.white.lock().take();
        self.pool.lock().clear();
    }
}
