//! GPU memory management.

use crate::context::GpuContext;
use crate::error::{GpuError, Result};
use ash::vk;
use gpu_allocator::vulkan::{
    Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc,
};
use gpu_allocator::MemoryLocation;
use std::sync::Arc;

/// GPU memory allocator wrapper.
pub struct GpuAllocator {
    allocator: Option<Allocator>,
}

impl GpuAllocator {
    /// Create a new allocator.
    ///
    /// # Safety
    /// The instance, device, and physical device must be valid.
    pub unsafe fn new(
        instance: &ash::Instance,
        device: &ash::Device,
        physical_device: vk::PhysicalDevice,
    ) -> Result<Self> {
        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: device.clone(),
            physical_device,
            debug_settings: gpu_allocator::AllocatorDebugSettings {
                log_memory_information: cfg!(debug_assertions),
                log_leaks_on_shutdown: true,
                store_stack_traces: false,
                log_allocations: false,
                log_frees: false,
                log_stack_traces: false,
            },
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })
        .map_err(|e| GpuError::AllocationFailed(e.to_string()))?;

        Ok(Self {
            allocator: Some(allocator),
        })
    }

    /// Allocate memory for the given requirements.
    pub fn allocate(
        &mut self,
        name: &str,
        requirements: vk::MemoryRequirements,
        location: MemoryLocation,
        linear: bool,
    ) -> Result<Allocation> {
        self.allocator
            .as_mut()
            .ok_or_else(|| GpuError::InvalidState("Allocator not initialized".to_string()))?
            .allocate(&AllocationCreateDesc {
                name,
                requirements,
                location,
                linear,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .map_err(|e| GpuError::AllocationFailed(e.to_string()))
    }

    /// Return memory to the allocator.
    pub fn free(&mut self, allocation: Allocation) -> Result<()> {
        self.allocator
            .as_mut()
            .ok_or_else(|| GpuError::InvalidState("Allocator not initialized".to_string()))?
            .free(allocation)
            .map_err(|e| GpuError::AllocationFailed(e.to_string()))
    }

    /// Shutdown the allocator, freeing all GPU memory.
    ///
    /// This must be called before the Vulkan device is destroyed.
    /// Any remaining allocations will be freed (and logged as leaks).
    pub fn shutdown(&mut self) {
        // gpu_allocator::Allocator::drop calls vkFreeMemory
        if let Some(allocator) = self.allocator.take() {
            drop(allocator);
        }
    }
}

impl Drop for GpuAllocator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// A GPU buffer with its allocation, destroyed on drop.
pub struct GpuBuffer {
    ctx: Arc<GpuContext>,
    pub buffer: vk::Buffer,
    allocation: Option<Allocation>,
    pub size: u64,
    pub usage: vk::BufferUsageFlags,
    pub location: MemoryLocation,
}

impl GpuBuffer {
    /// Create a buffer and bind fresh memory to it.
    pub fn new(
        ctx: &Arc<GpuContext>,
        size: u64,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
        name: &str,
    ) -> Result<Self> {
        let device = ctx.device();
        let buffer_info = vk::BufferCreateInfo::default()
            .size(size.max(1))
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.create_buffer(&buffer_info, None)? };
        let requirements = unsafe { device.get_buffer_memory_requirements(buffer) };

        let allocation = match ctx
            .allocator()
            .lock()
            .allocate(name, requirements, location, true)
        {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        if let Err(e) =
            unsafe { device.bind_buffer_memory(buffer, allocation.memory(), allocation.offset()) }
        {
            let _ = ctx.allocator().lock().free(allocation);
            unsafe { device.destroy_buffer(buffer, None) };
            return Err(e.into());
        }

        Ok(Self {
            ctx: Arc::clone(ctx),
            buffer,
            allocation: Some(allocation),
            size,
            usage,
            location,
        })
    }

    /// Map the buffer memory for CPU access.
    pub fn mapped_ptr(&self) -> Option<*mut u8> {
        self.allocation
            .as_ref()
            .and_then(Allocation::mapped_ptr)
            .map(|p| p.as_ptr().cast::<u8>())
    }

    /// Write data to the buffer (must be host-visible).
    pub fn write<T: bytemuck::Pod>(&self, data: &[T]) -> Result<()> {
        self.write_bytes(0, bytemuck::cast_slice(data))
    }

    /// Write raw bytes to the buffer at the given offset (must be host-visible).
    pub fn write_bytes(&self, offset: u64, data: &[u8]) -> Result<()> {
        let ptr = self
            .mapped_ptr()
            .ok_or_else(|| GpuError::InvalidState("Buffer not mapped".to_string()))?;

        let end = offset
            .checked_add(data.len() as u64)
            .ok_or_else(|| GpuError::InvalidState("Offset overflow".to_string()))?;
        if end > self.size {
            return Err(GpuError::InvalidState(format!(
                "Write of {} bytes at {offset} exceeds buffer of {} bytes",
                data.len(),
                self.size
            )));
        }

        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.add(offset as usize), data.len());
        }

        Ok(())
    }
}

impl Drop for GpuBuffer {
    fn drop(&mut self) {
        if let Some(allocation) = self.allocation.take() {
            if let Err(e) = self.ctx.allocator().lock().free(allocation) {
                tracing::warn!("Failed to free buffer memory: {e}");
            }
        }
        unsafe { self.ctx.device().destroy_buffer(self.buffer, None) };
    }
}

/// A GPU image with its allocation and default view, destroyed on drop.
pub struct GpuImage {
    ctx: Arc<GpuContext>,
    pub image: vk::Image,
    pub view: vk::ImageView,
    allocation: Option<Allocation>,
    pub format: vk::Format,
    pub extent: vk::Extent3D,
    pub aspect: vk::ImageAspectFlags,
    pub mip_levels: u32,
}

impl GpuImage {
    /// Create a 2D image, bind memory, and create a view over all mips.
    pub fn new(
        ctx: &Arc<GpuContext>,
        create_info: &vk::ImageCreateInfo<'_>,
        aspect: vk::ImageAspectFlags,
        name: &str,
    ) -> Result<Self> {
        let device = ctx.device();
        let image = unsafe { device.create_image(create_info, None)? };
        let requirements = unsafe { device.get_image_memory_requirements(image) };

        let allocation = match ctx.allocator().lock().allocate(
            name,
            requirements,
            MemoryLocation::GpuOnly,
            false,
        ) {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.destroy_image(image, None) };
                return Err(e);
            }
        };

        let bound =
            unsafe { device.bind_image_memory(image, allocation.memory(), allocation.offset()) };

        let view = bound.and_then(|()| {
            let view_info = vk::ImageViewCreateInfo::default()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(create_info.format)
                .subresource_range(
                    vk::ImageSubresourceRange::default()
                        .aspect_mask(aspect)
                        .base_mip_level(0)
                        .level_count(create_info.mip_levels)
                        .base_array_layer(0)
                        .layer_count(1),
                );
            unsafe { device.create_image_view(&view_info, None) }
        });

        let view = match view {
            Ok(view) => view,
            Err(e) => {
                let _ = ctx.allocator().lock().free(allocation);
                unsafe { device.destroy_image(image, None) };
                return Err(e.into());
            }
        };

        Ok(Self {
            ctx: Arc::clone(ctx),
            image,
            view,
            allocation: Some(allocation),
            format: create_info.format,
            extent: create_info.extent,
            aspect,
            mip_levels: create_info.mip_levels,
        })
    }

    /// Width and height.
    pub fn extent_2d(&self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.extent.width,
            height: self.extent.height,
        }
    }

    /// Subresource range covering the whole image.
    pub fn full_range(&self) -> vk::ImageSubresourceRange {
        vk::ImageSubresourceRange::default()
            .aspect_mask(self.aspect)
            .base_mip_level(0)
            .level_count(self.mip_levels)
            .base_array_layer(0)
            .layer_count(1)
    }
}

impl Drop for GpuImage {
    fn drop(&mut self) {
        let device = self.ctx.device();
        unsafe { device.destroy_image_view(self.view, None) };
        if let Some(allocation) = self.allocation.take() {
            if let Err(e) = self.ctx.allocator().lock().free(allocation) {
                tracing::warn!("Failed to free image memory: {e}");
            }
        }
        unsafe { device.destroy_image(self.image, None) };
    }
}
