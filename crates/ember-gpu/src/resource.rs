//! Owned device objects.
//!
//! [`Owned`] pairs a raw Vulkan handle with the context that created it and
//! calls the matching `vkDestroy*` when dropped. Dropping an `Owned` while
//! the GPU may still use the handle is a bug; route such objects through the
//! [`crate::DeferredDestructionQueue`] instead.

use crate::context::GpuContext;
use ash::vk;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

/// A Vulkan handle type that knows how to destroy itself.
pub trait DeviceObject: Copy + Send + Sync + 'static {
    /// Destroy the handle.
    ///
    /// # Safety
    /// The handle must have been created from `device` and not be in use.
    unsafe fn destroy(self, device: &ash::Device);
}

macro_rules! device_object {
    ($($ty:ty => $destroy:ident),* $(,)?) => {
        $(
            impl DeviceObject for $ty {
                unsafe fn destroy(self, device: &ash::Device) {
                    device.$destroy(self, None);
                }
            }
        )*
    };
}

device_object! {
    vk::Sampler => destroy_sampler,
    vk::ShaderModule => destroy_shader_module,
    vk::Pipeline => destroy_pipeline,
    vk::PipelineLayout => destroy_pipeline_layout,
    vk::ImageView => destroy_image_view,
    vk::DescriptorPool => destroy_descriptor_pool,
    vk::DescriptorSetLayout => destroy_descriptor_set_layout,
    vk::Semaphore => destroy_semaphore,
    vk::Fence => destroy_fence,
    vk::CommandPool => destroy_command_pool,
}

/// A device object destroyed on drop.
pub struct Owned<T: DeviceObject> {
    ctx: Arc<GpuContext>,
    raw: T,
}

impl<T: DeviceObject> Owned<T> {
    /// Take ownership of `raw`.
    ///
    /// # Safety
    /// `raw` must have been created from `ctx`'s device and must not be
    /// destroyed elsewhere.
    pub unsafe fn from_raw(ctx: &Arc<GpuContext>, raw: T) -> Self {
        Self {
            ctx: Arc::clone(ctx),
            raw,
        }
    }

    /// The raw handle.
    pub fn raw(&self) -> T {
        self.raw
    }

    /// The context this object belongs to.
    pub fn context(&self) -> &Arc<GpuContext> {
        &self.ctx
    }
}

impl<T: DeviceObject> Deref for Owned<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.raw
    }
}

impl<T: DeviceObject + fmt::Debug> fmt::Debug for Owned<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Owned").field(&self.raw).finish()
    }
}

impl<T: DeviceObject> Drop for Owned<T> {
    fn drop(&mut self) {
        unsafe { self.raw.destroy(self.ctx.device()) }
    }
}
