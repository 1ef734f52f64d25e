//! Sampler cache.
//!
//! Samplers are immutable and an application needs only a handful of them,
//! so they are memoized forever by description.

use crate::context::GpuContext;
use crate::error::Result;
use crate::resource::Owned;
use ash::vk;
use hashbrown::HashMap;
use std::sync::Arc;

/// Texture coordinate wrapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum WrapMode {
    #[default]
    Repeat,
    MirroredRepeat,
    ClampToEdge,
    ClampToBorder,
}

/// Minification/magnification filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FilterMode {
    Nearest,
    #[default]
    Linear,
}

/// Colour returned outside the texture with [`WrapMode::ClampToBorder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BorderColour {
    #[default]
    TransparentBlack,
    OpaqueBlack,
    OpaqueWhite,
}

/// Full sampler description; the cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SamplerDesc {
    pub wrap: WrapMode,
    pub filter: FilterMode,
    pub border: BorderColour,
}

impl SamplerDesc {
    pub const fn new(wrap: WrapMode, filter: FilterMode) -> Self {
        Self {
            wrap,
            filter,
            border: BorderColour::TransparentBlack,
        }
    }

    #[must_use]
    pub const fn with_border(mut self, border: BorderColour) -> Self {
        self.border = border;
        self
    }

    /// Vulkan create info for this description. Linear samplers use
    /// anisotropic filtering when the device offers it.
    pub fn create_info(&self, max_anisotropy: Option<f32>) -> vk::SamplerCreateInfo<'static> {
        let address = match self.wrap {
            WrapMode::Repeat => vk::SamplerAddressMode::REPEAT,
            WrapMode::MirroredRepeat => vk::SamplerAddressMode::MIRRORED_REPEAT,
            WrapMode::ClampToEdge => vk::SamplerAddressMode::CLAMP_TO_EDGE,
            WrapMode::ClampToBorder => vk::SamplerAddressMode::CLAMP_TO_BORDER,
        };
        let (filter, mipmap) = match self.filter {
            FilterMode::Nearest => (vk::Filter::NEAREST, vk::SamplerMipmapMode::NEAREST),
            FilterMode::Linear => (vk::Filter::LINEAR, vk::SamplerMipmapMode::LINEAR),
        };
        let border = match self.border {
            BorderColour::TransparentBlack => vk::BorderColor::FLOAT_TRANSPARENT_BLACK,
            BorderColour::OpaqueBlack => vk::BorderColor::FLOAT_OPAQUE_BLACK,
            BorderColour::OpaqueWhite => vk::BorderColor::FLOAT_OPAQUE_WHITE,
        };
        let anisotropy = max_anisotropy.filter(|_| self.filter == FilterMode::Linear);

        vk::SamplerCreateInfo::default()
            .mag_filter(filter)
            .min_filter(filter)
            .mipmap_mode(mipmap)
            .address_mode_u(address)
            .address_mode_v(address)
            .address_mode_w(address)
            .mip_lod_bias(0.0)
            .min_lod(0.0)
            .max_lod(vk::LOD_CLAMP_NONE)
            .border_color(border)
            .anisotropy_enable(anisotropy.is_some())
            .max_anisotropy(anisotropy.unwrap_or(1.0))
            .compare_enable(false)
            .compare_op(vk::CompareOp::ALWAYS)
            .unnormalized_coordinates(false)
    }
}

/// Memoized samplers.
pub struct SamplerCache {
    ctx: Arc<GpuContext>,
    samplers: HashMap<SamplerDesc, Owned<vk::Sampler>>,
}

impl SamplerCache {
    pub fn new(ctx: &Arc<GpuContext>) -> Self {
        Self {
            ctx: Arc::clone(ctx),
            samplers: HashMap::new(),
        }
    }

    /// Get or create the sampler for `desc`.
    pub fn get(&mut self, desc: SamplerDesc) -> Result<vk::Sampler> {
        if let Some(sampler) = self.samplers.get(&desc) {
            return Ok(sampler.raw());
        }

        let create_info = desc.create_info(self.ctx.capabilities().max_anisotropy);
        let sampler = unsafe {
            let raw = self.ctx.device().create_sampler(&create_info, None)?;
            Owned::from_raw(&self.ctx, raw)
        };
        let raw = sampler.raw();
        self.samplers.insert(desc, sampler);
        tracing::debug!("Created sampler {desc:?} ({} cached)", self.samplers.len());
        Ok(raw)
    }

    /// Number of cached samplers.
    pub fn len(&self) -> usize {
        self.samplers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samplers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_modes_map_to_address_modes() {
        let info = SamplerDesc::new(WrapMode::ClampToEdge, FilterMode::Nearest).create_info(None);
        assert_eq!(info.address_mode_u, vk::SamplerAddressMode::CLAMP_TO_EDGE);
        assert_eq!(info.address_mode_v, vk::SamplerAddressMode::CLAMP_TO_EDGE);
        assert_eq!(info.mag_filter, vk::Filter::NEAREST);
    }

    #[test]
    fn anisotropy_only_for_linear_filtering() {
        let linear = SamplerDesc::new(WrapMode::Repeat, FilterMode::Linear).create_info(Some(16.0));
        assert_eq!(linear.anisotropy_enable, vk::TRUE);
        assert_eq!(linear.max_anisotropy, 16.0);

        let nearest =
            SamplerDesc::new(WrapMode::Repeat, FilterMode::Nearest).create_info(Some(16.0));
        assert_eq!(nearest.anisotropy_enable, vk::FALSE);

        let unsupported = SamplerDesc::default().create_info(None);
        assert_eq!(unsupported.anisotropy_enable, vk::FALSE);
    }

    #[test]
    fn border_is_part_of_the_key() {
        let black = SamplerDesc::new(WrapMode::ClampToBorder, FilterMode::Linear);
        let white = black.with_border(BorderColour::OpaqueWhite);
        assert_ne!(black, white);
        assert_eq!(
            white.create_info(None).border_color,
            vk::BorderColor::FLOAT_OPAQUE_WHITE
        );
    }
}
