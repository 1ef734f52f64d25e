//! Synchronization primitives.

use crate::context::GpuContext;
use crate::error::{GpuError, Result};
use crate::resource::Owned;
use ash::vk;
use std::sync::Arc;
use std::time::Duration;

/// Create a semaphore.
pub fn create_semaphore(ctx: &Arc<GpuContext>) -> Result<Owned<vk::Semaphore>> {
    let create_info = vk::SemaphoreCreateInfo::default();
    unsafe {
        let semaphore = ctx.device().create_semaphore(&create_info, None)?;
        Ok(Owned::from_raw(ctx, semaphore))
    }
}

/// Create a fence.
pub fn create_fence(ctx: &Arc<GpuContext>, signaled: bool) -> Result<Owned<vk::Fence>> {
    let flags = if signaled {
        vk::FenceCreateFlags::SIGNALED
    } else {
        vk::FenceCreateFlags::empty()
    };

    let create_info = vk::FenceCreateInfo::default().flags(flags);
    unsafe {
        let fence = ctx.device().create_fence(&create_info, None)?;
        Ok(Owned::from_raw(ctx, fence))
    }
}

/// Convert a timeout into the nanosecond count Vulkan expects.
pub fn timeout_ns(timeout: Duration) -> u64 {
    u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX)
}

/// Frame synchronization resources.
pub struct FrameSync {
    /// Semaphore signaled when image is available
    pub image_acquired: Owned<vk::Semaphore>,
    /// Semaphore signaled when rendering is complete
    pub ready_to_present: Owned<vk::Semaphore>,
    /// Fence to wait for frame completion
    pub frame_drawn: Owned<vk::Fence>,
}

impl FrameSync {
    /// Create frame synchronization resources. The fence starts signaled so
    /// the first wait on a fresh slot returns immediately.
    pub fn new(ctx: &Arc<GpuContext>) -> Result<Self> {
        Ok(Self {
            image_acquired: create_semaphore(ctx)?,
            ready_to_present: create_semaphore(ctx)?,
            frame_drawn: create_fence(ctx, true)?,
        })
    }

    /// Block until the slot's previous submission has completed.
    pub fn wait(&self, timeout: Duration) -> Result<()> {
        let device = self.frame_drawn.context().device();
        match unsafe { device.wait_for_fences(&[self.frame_drawn.raw()], true, timeout_ns(timeout)) }
        {
            Ok(()) => Ok(()),
            Err(vk::Result::TIMEOUT) => Err(GpuError::FenceTimeout(timeout)),
            Err(e) => Err(e.into()),
        }
    }

    /// Swap in a fresh acquire semaphore and return the old one.
    ///
    /// Used when an acquired image is abandoned: the old semaphore may still
    /// have a pending signal and cannot be waited on or reused.
    pub fn replace_image_acquired(&mut self) -> Result<Owned<vk::Semaphore>> {
        let fresh = create_semaphore(self.image_acquired.context())?;
        Ok(std::mem::replace(&mut self.image_acquired, fresh))
    }

    /// Reset the fence for the next submission.
    pub fn reset(&self) -> Result<()> {
        let device = self.frame_drawn.context().device();
        unsafe { device.reset_fences(&[self.frame_drawn.raw()])? };
        Ok(())
    }
}
