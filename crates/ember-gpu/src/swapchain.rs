//! Swapchain management.

use crate::context::GpuContext;
use crate::error::{GpuError, Result};
use crate::resource::Owned;
use crate::sync::timeout_ns;
use ash::vk;
use std::sync::Arc;
use std::time::Duration;

/// Whether mailbox may be picked without an explicit request. Mobile
/// compositors behave poorly with it.
pub const IS_DESKTOP: bool = !cfg!(any(target_os = "android", target_os = "ios"));

/// One presentable image.
pub struct RenderTarget {
    pub image: vk::Image,
    pub view: Owned<vk::ImageView>,
    pub extent: vk::Extent2D,
    pub format: vk::Format,
}

/// Present-mode bookkeeping: the surface's supported modes, the mode the
/// swapchain currently uses, and the mode requested for the next recreation.
#[derive(Debug, Clone)]
pub struct PresentModes {
    supported: Vec<vk::PresentModeKHR>,
    active: vk::PresentModeKHR,
    desired: Option<vk::PresentModeKHR>,
    desktop: bool,
}

impl PresentModes {
    pub fn new(supported: Vec<vk::PresentModeKHR>, desktop: bool) -> Self {
        let active = fallback_present_mode(&supported, desktop);
        Self {
            supported,
            active,
            desired: None,
            desktop,
        }
    }

    /// Ask for `mode` at the next recreation. Unsupported modes are logged
    /// and ignored.
    pub fn request(&mut self, mode: vk::PresentModeKHR) -> bool {
        if !self.supported.contains(&mode) {
            tracing::warn!(
                "Present mode {mode:?} not supported (supported: {:?}); keeping {:?}",
                self.supported,
                self.active
            );
            return false;
        }
        self.desired = Some(mode);
        true
    }

    /// Mode the next swapchain should use.
    pub fn select(&self) -> vk::PresentModeKHR {
        self.desired
            .filter(|mode| self.supported.contains(mode))
            .unwrap_or_else(|| fallback_present_mode(&self.supported, self.desktop))
    }

    /// Whether the next swapchain would use a different mode.
    pub fn pending(&self) -> bool {
        self.select() != self.active
    }

    pub fn active(&self) -> vk::PresentModeKHR {
        self.active
    }

    pub fn supported(&self) -> &[vk::PresentModeKHR] {
        &self.supported
    }

    /// Replace the supported list after re-querying the surface.
    pub fn set_supported(&mut self, supported: Vec<vk::PresentModeKHR>) {
        self.supported = supported;
    }

    /// Record the mode a new swapchain was created with.
    pub fn commit(&mut self, mode: vk::PresentModeKHR) {
        self.active = mode;
    }
}

/// Relaxed FIFO, then mailbox on desktop, then FIFO (always supported).
pub fn fallback_present_mode(
    supported: &[vk::PresentModeKHR],
    desktop: bool,
) -> vk::PresentModeKHR {
    if supported.contains(&vk::PresentModeKHR::FIFO_RELAXED) {
        vk::PresentModeKHR::FIFO_RELAXED
    } else if desktop && supported.contains(&vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// Composite alpha by preference: opaque, inherit, pre-multiplied,
/// post-multiplied.
pub fn select_composite_alpha(supported: vk::CompositeAlphaFlagsKHR) -> vk::CompositeAlphaFlagsKHR {
    [
        vk::CompositeAlphaFlagsKHR::OPAQUE,
        vk::CompositeAlphaFlagsKHR::INHERIT,
        vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED,
        vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED,
    ]
    .into_iter()
    .find(|&mode| supported.contains(mode))
    .unwrap_or(vk::CompositeAlphaFlagsKHR::OPAQUE)
}

/// One more than the minimum, capped by the maximum when there is one.
pub fn select_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let mut image_count = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 && image_count > capabilities.max_image_count {
        image_count = capabilities.max_image_count;
    }
    image_count
}

/// Select the best surface format.
pub fn select_surface_format(available: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    // Prefer SRGB
    available
        .iter()
        .find(|format| {
            format.format == vk::Format::B8G8R8A8_SRGB
                && format.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| available.first())
        .copied()
}

/// Calculate swapchain extent.
pub fn calculate_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    desired: vk::Extent2D,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        capabilities.current_extent
    } else {
        vk::Extent2D {
            width: desired.width.clamp(
                capabilities.min_image_extent.width,
                capabilities.max_image_extent.width,
            ),
            height: desired.height.clamp(
                capabilities.min_image_extent.height,
                capabilities.max_image_extent.height,
            ),
        }
    }
}

/// Swapchain wrapper.
pub struct Swapchain {
    ctx: Arc<GpuContext>,
    handle: vk::SwapchainKHR,
    targets: Vec<RenderTarget>,
    surface_format: vk::SurfaceFormatKHR,
    extent: vk::Extent2D,
    requested_extent: vk::Extent2D,
    present_modes: PresentModes,
    stale: bool,
}

impl Swapchain {
    /// Create a swapchain for `extent`. When `present_mode` is given it is
    /// requested before creation.
    pub fn new(
        ctx: &Arc<GpuContext>,
        extent: vk::Extent2D,
        present_mode: Option<vk::PresentModeKHR>,
    ) -> Result<Self> {
        let supported = unsafe {
            ctx.surface_loader()
                .get_physical_device_surface_present_modes(ctx.physical_device(), ctx.surface())?
        };
        let mut present_modes = PresentModes::new(supported, IS_DESKTOP);
        if let Some(mode) = present_mode {
            present_modes.request(mode);
        }

        let mut swapchain = Self {
            ctx: Arc::clone(ctx),
            handle: vk::SwapchainKHR::null(),
            targets: Vec::new(),
            surface_format: vk::SurfaceFormatKHR::default(),
            extent,
            requested_extent: extent,
            present_modes,
            stale: true,
        };
        swapchain.recreate(extent)?;
        Ok(swapchain)
    }

    /// Rebuild the presentable images for `extent`.
    ///
    /// The caller guarantees no render pass is open and no submitted work
    /// still uses the current images.
    pub fn recreate(&mut self, extent: vk::Extent2D) -> Result<()> {
        let ctx = Arc::clone(&self.ctx);
        let surface_loader = ctx.surface_loader();
        let (capabilities, formats, modes) = unsafe {
            (
                surface_loader
                    .get_physical_device_surface_capabilities(ctx.physical_device(), ctx.surface())?,
                surface_loader
                    .get_physical_device_surface_formats(ctx.physical_device(), ctx.surface())?,
                surface_loader
                    .get_physical_device_surface_present_modes(ctx.physical_device(), ctx.surface())?,
            )
        };
        self.present_modes.set_supported(modes);

        let surface_format = select_surface_format(&formats).ok_or_else(|| {
            GpuError::SwapchainCreation("Surface reports no formats".to_string())
        })?;
        let present_mode = self.present_modes.select();
        let image_extent = calculate_extent(&capabilities, extent);
        let image_count = select_image_count(&capabilities);
        let composite_alpha = select_composite_alpha(capabilities.supported_composite_alpha);

        let queue_families = [ctx.queue_family()];
        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(ctx.surface())
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(image_extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .queue_family_indices(&queue_families)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(composite_alpha)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(self.handle);

        let swapchain_loader = ctx.swapchain_loader();
        let handle = unsafe {
            swapchain_loader
                .create_swapchain(&create_info, None)
                .map_err(|e| GpuError::SwapchainCreation(e.to_string()))?
        };

        let targets = match unsafe { create_targets(&ctx, handle, surface_format.format, image_extent) } {
            Ok(targets) => targets,
            Err(e) => {
                unsafe { swapchain_loader.destroy_swapchain(handle, None) };
                return Err(e);
            }
        };

        // Views of the retired images go before the swapchain that owns them.
        self.targets = targets;
        let old = std::mem::replace(&mut self.handle, handle);
        if old != vk::SwapchainKHR::null() {
            unsafe { swapchain_loader.destroy_swapchain(old, None) };
        }

        self.surface_format = surface_format;
        self.extent = image_extent;
        self.requested_extent = extent;
        self.present_modes.commit(present_mode);
        self.stale = false;

        tracing::info!(
            "Swapchain created: {}x{} {:?} {:?}, {} images, {:?}",
            image_extent.width,
            image_extent.height,
            surface_format.format,
            present_mode,
            self.targets.len(),
            composite_alpha,
        );
        Ok(())
    }

    /// Request a present mode for the next recreation. Returns `false`, and
    /// leaves the active mode in force, when the surface does not support it.
    pub fn request_present_mode(&mut self, mode: vk::PresentModeKHR) -> bool {
        self.present_modes.request(mode)
    }

    /// Whether the swapchain no longer matches the window or the requested
    /// present mode.
    pub fn needs_recreate(&self, window_extent: vk::Extent2D) -> bool {
        self.stale || self.requested_extent != window_extent || self.present_modes.pending()
    }

    /// Force recreation before the next acquire.
    pub fn mark_stale(&mut self) {
        self.stale = true;
    }

    /// Acquire the next image, signalling `semaphore`.
    ///
    /// Returns `None` when the swapchain is out of date; no image was
    /// acquired and the semaphore is untouched.
    ///
    /// # Safety
    /// `semaphore` must be valid and unsignaled.
    pub unsafe fn acquire(
        &mut self,
        semaphore: vk::Semaphore,
        timeout: Duration,
    ) -> Result<Option<u32>> {
        let result = self.ctx.swapchain_loader().acquire_next_image(
            self.handle,
            timeout_ns(timeout),
            semaphore,
            vk::Fence::null(),
        );

        match result {
            Ok((index, suboptimal)) => {
                if suboptimal {
                    self.stale = true;
                }
                Ok(Some(index))
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                self.stale = true;
                Ok(None)
            }
            Err(vk::Result::TIMEOUT | vk::Result::NOT_READY) => {
                Err(GpuError::FenceTimeout(timeout))
            }
            Err(e) => Err(GpuError::from(e)),
        }
    }

    pub fn handle(&self) -> vk::SwapchainKHR {
        self.handle
    }

    pub fn target(&self, index: u32) -> Option<&RenderTarget> {
        self.targets.get(index as usize)
    }

    pub fn targets(&self) -> &[RenderTarget] {
        &self.targets
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn format(&self) -> vk::Format {
        self.surface_format.format
    }

    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_modes.active()
    }

    pub fn present_modes(&self) -> &PresentModes {
        &self.present_modes
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        self.targets.clear();
        unsafe {
            self.ctx
                .swapchain_loader()
                .destroy_swapchain(self.handle, None);
        }
    }
}

/// Create a view for every swapchain image.
///
/// # Safety
/// `swapchain` must be valid.
unsafe fn create_targets(
    ctx: &Arc<GpuContext>,
    swapchain: vk::SwapchainKHR,
    format: vk::Format,
    extent: vk::Extent2D,
) -> Result<Vec<RenderTarget>> {
    let images = ctx.swapchain_loader().get_swapchain_images(swapchain)?;

    images
        .into_iter()
        .map(|image| {
            let view_info = vk::ImageViewCreateInfo::default()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(format)
                .components(vk::ComponentMapping::default())
                .subresource_range(
                    vk::ImageSubresourceRange::default()
                        .aspect_mask(vk::ImageAspectFlags::COLOR)
                        .base_mip_level(0)
                        .level_count(1)
                        .base_array_layer(0)
                        .layer_count(1),
                );

            let view = ctx.device().create_image_view(&view_info, None)?;
            Ok(RenderTarget {
                image,
                view: Owned::from_raw(ctx, view),
                extent,
                format,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(min: u32, max: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            ..Default::default()
        }
    }

    #[test]
    fn unsupported_request_keeps_active_mode() {
        let mut modes = PresentModes::new(
            vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::FIFO_RELAXED],
            true,
        );
        let active = modes.active();

        assert!(!modes.request(vk::PresentModeKHR::MAILBOX));
        assert_eq!(modes.active(), active);
        assert!(!modes.pending());
    }

    #[test]
    fn supported_request_applies_on_recreation() {
        let mut modes = PresentModes::new(
            vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE],
            true,
        );
        assert_eq!(modes.active(), vk::PresentModeKHR::FIFO);

        assert!(modes.request(vk::PresentModeKHR::IMMEDIATE));
        assert_eq!(modes.active(), vk::PresentModeKHR::FIFO);
        assert!(modes.pending());

        modes.commit(modes.select());
        assert_eq!(modes.active(), vk::PresentModeKHR::IMMEDIATE);
        assert!(!modes.pending());
    }

    #[test]
    fn fallback_order() {
        use vk::PresentModeKHR as M;
        let all = [M::FIFO, M::MAILBOX, M::FIFO_RELAXED, M::IMMEDIATE];
        assert_eq!(fallback_present_mode(&all, true), M::FIFO_RELAXED);
        assert_eq!(fallback_present_mode(&[M::FIFO, M::MAILBOX], true), M::MAILBOX);
        assert_eq!(fallback_present_mode(&[M::FIFO, M::MAILBOX], false), M::FIFO);
        assert_eq!(fallback_present_mode(&[M::FIFO], true), M::FIFO);
    }

    #[test]
    fn composite_alpha_preference() {
        use vk::CompositeAlphaFlagsKHR as A;
        assert_eq!(select_composite_alpha(A::OPAQUE | A::INHERIT), A::OPAQUE);
        assert_eq!(select_composite_alpha(A::INHERIT | A::PRE_MULTIPLIED), A::INHERIT);
        assert_eq!(
            select_composite_alpha(A::POST_MULTIPLIED | A::PRE_MULTIPLIED),
            A::PRE_MULTIPLIED
        );
        assert_eq!(select_composite_alpha(A::POST_MULTIPLIED), A::POST_MULTIPLIED);
    }

    #[test]
    fn image_count_is_clamped() {
        assert_eq!(select_image_count(&caps(2, 0)), 3);
        assert_eq!(select_image_count(&caps(2, 8)), 3);
        assert_eq!(select_image_count(&caps(3, 3)), 3);
    }

    #[test]
    fn extent_follows_surface_when_defined() {
        let mut capabilities = caps(2, 0);
        let desired = vk::Extent2D {
            width: 9000,
            height: 600,
        };
        assert_eq!(
            calculate_extent(&capabilities, desired),
            vk::Extent2D {
                width: 4096,
                height: 600
            }
        );

        capabilities.current_extent = vk::Extent2D {
            width: 1280,
            height: 720,
        };
        assert_eq!(calculate_extent(&capabilities, desired), capabilities.current_extent);
    }

    #[test]
    fn surface_format_prefers_srgb() {
        let unorm = vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        let srgb = vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_SRGB,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        assert_eq!(select_surface_format(&[unorm, srgb]), Some(srgb));
        assert_eq!(select_surface_format(&[unorm]), Some(unorm));
        assert_eq!(select_surface_format(&[]), None);
    }
}
