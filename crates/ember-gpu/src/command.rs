//! Command buffer management.

use crate::context::GpuContext;
use crate::error::Result;
use crate::resource::Owned;
use ash::vk;
use std::sync::Arc;

/// A command pool with a single primary command buffer.
///
/// Each frame slot owns one. The pool is reset as a whole before the buffer
/// is re-recorded, which is only legal once the slot's fence has signaled.
pub struct CommandRecorder {
    pool: Owned<vk::CommandPool>,
    buffer: vk::CommandBuffer,
}

impl CommandRecorder {
    /// Create a pool on the context's queue family and allocate its buffer.
    pub fn new(ctx: &Arc<GpuContext>) -> Result<Self> {
        let device = ctx.device();
        let create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(ctx.queue_family())
            .flags(vk::CommandPoolCreateFlags::TRANSIENT);

        let pool = unsafe { Owned::from_raw(ctx, device.create_command_pool(&create_info, None)?) };

        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool.raw())
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let buffer = unsafe { device.allocate_command_buffers(&alloc_info)? }[0];

        Ok(Self { pool, buffer })
    }

    /// The primary command buffer.
    pub fn buffer(&self) -> vk::CommandBuffer {
        self.buffer
    }

    /// Reset the pool and begin recording the buffer for one submission.
    ///
    /// # Safety
    /// No submission of this buffer may still be executing.
    pub unsafe fn begin(&self) -> Result<vk::CommandBuffer> {
        let device = self.pool.context().device();
        device.reset_command_pool(self.pool.raw(), vk::CommandPoolResetFlags::empty())?;
        begin_command_buffer(device, self.buffer, vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)?;
        Ok(self.buffer)
    }

    /// Finish recording.
    ///
    /// # Safety
    /// The buffer must be in the recording state.
    pub unsafe fn end(&self) -> Result<()> {
        end_command_buffer(self.pool.context().device(), self.buffer)
    }
}

/// Begin recording a command buffer.
///
/// # Safety
/// The device and command buffer must be valid.
pub unsafe fn begin_command_buffer(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    flags: vk::CommandBufferUsageFlags,
) -> Result<()> {
    let begin_info = vk::CommandBufferBeginInfo::default().flags(flags);
    device.begin_command_buffer(cmd, &begin_info)?;
    Ok(())
}

/// End recording a command buffer.
///
/// # Safety
/// The device and command buffer must be valid.
pub unsafe fn end_command_buffer(device: &ash::Device, cmd: vk::CommandBuffer) -> Result<()> {
    device.end_command_buffer(cmd)?;
    Ok(())
}

/// Record a layout transition for a whole image with synchronization2.
///
/// # Safety
/// The command buffer must be recording and `image` must be valid.
#[allow(clippy::too_many_arguments)]
pub unsafe fn transition_image(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    range: vk::ImageSubresourceRange,
    (src_stage, src_access): (vk::PipelineStageFlags2, vk::AccessFlags2),
    (dst_stage, dst_access): (vk::PipelineStageFlags2, vk::AccessFlags2),
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
) {
    let barrier = vk::ImageMemoryBarrier2::default()
        .src_stage_mask(src_stage)
        .src_access_mask(src_access)
        .dst_stage_mask(dst_stage)
        .dst_access_mask(dst_access)
        .old_layout(old_layout)
        .new_layout(new_layout)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(range);

    let dependency_info =
        vk::DependencyInfo::default().image_memory_barriers(std::slice::from_ref(&barrier));
    device.cmd_pipeline_barrier2(cmd, &dependency_info);
}
