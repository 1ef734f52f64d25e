//! Pooled and per-frame scratch buffers.

use crate::context::GpuContext;
use crate::error::Result;
use crate::memory::GpuBuffer;
use crate::pool::{Lease, PoolFactory, ResourcePool, ScratchArena};
use ash::vk;
use gpu_allocator::MemoryLocation;
use std::sync::Arc;

/// Usage of every scratch buffer, so any entry can serve any claim.
pub const SCRATCH_USAGE: vk::BufferUsageFlags = vk::BufferUsageFlags::from_raw(
    vk::BufferUsageFlags::VERTEX_BUFFER.as_raw()
        | vk::BufferUsageFlags::INDEX_BUFFER.as_raw()
        | vk::BufferUsageFlags::UNIFORM_BUFFER.as_raw()
        | vk::BufferUsageFlags::STORAGE_BUFFER.as_raw(),
);

/// Smallest scratch allocation.
pub const MIN_SCRATCH_SIZE: u64 = 256;

/// Reuse class for pooled buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferKey {
    pub usage: vk::BufferUsageFlags,
    pub location: MemoryLocation,
}

struct BufferFactory<'a> {
    ctx: &'a Arc<GpuContext>,
    size: u64,
}

impl PoolFactory<BufferKey, GpuBuffer> for BufferFactory<'_> {
    fn create(&mut self, key: &BufferKey) -> Result<GpuBuffer> {
        GpuBuffer::new(self.ctx, self.size, key.usage, key.location, "pooled")
    }

    fn reinit(&mut self, buffer: &mut GpuBuffer, key: &BufferKey) -> Result<()> {
        if buffer.size < self.size {
            *buffer = self.create(key)?;
        }
        Ok(())
    }
}

/// Pool of persistent buffers reused by usage and memory location.
///
/// A leased buffer that GPU work may still read must be released through
/// the deferred destruction queue rather than dropped directly.
pub struct BufferCache {
    ctx: Arc<GpuContext>,
    pool: ResourcePool<BufferKey, GpuBuffer>,
}

impl BufferCache {
    pub fn new(ctx: &Arc<GpuContext>) -> Self {
        Self {
            ctx: Arc::clone(ctx),
            pool: ResourcePool::new("buffer"),
        }
    }

    /// Lease a buffer of at least `size` bytes.
    pub fn allocate(
        &mut self,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
        size: u64,
    ) -> Result<Lease<GpuBuffer>> {
        let mut factory = BufferFactory {
            ctx: &self.ctx,
            size,
        };
        self.pool
            .allocate(&BufferKey { usage, location }, &mut factory)
    }

    /// Number of buffers owned by the cache.
    pub fn total(&self) -> usize {
        self.pool.total()
    }

    /// Drop idle buffers. Only valid after the device has gone idle.
    pub fn clear(&mut self) {
        self.pool.clear();
    }
}

/// Capacity reserved for a scratch claim of `len` bytes.
pub fn scratch_capacity(len: usize) -> u64 {
    (len as u64).max(MIN_SCRATCH_SIZE).next_power_of_two()
}

/// Copy `data` into the next scratch buffer of `arena`.
pub fn upload_scratch(
    ctx: &Arc<GpuContext>,
    arena: &mut ScratchArena<GpuBuffer>,
    data: &[u8],
) -> Result<vk::Buffer> {
    let needed = data.len() as u64;
    let buffer = arena.claim(
        |buffer| buffer.size >= needed,
        || {
            GpuBuffer::new(
                ctx,
                scratch_capacity(data.len()),
                SCRATCH_USAGE,
                MemoryLocation::CpuToGpu,
                "scratch",
            )
        },
    )?;
    buffer.write_bytes(0, data)?;
    Ok(buffer.buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scratch_capacity_rounds_up() {
        assert_eq!(scratch_capacity(0), MIN_SCRATCH_SIZE);
        assert_eq!(scratch_capacity(100), MIN_SCRATCH_SIZE);
        assert_eq!(scratch_capacity(257), 512);
        assert_eq!(scratch_capacity(4096), 4096);
    }

    #[test]
    fn scratch_usage_covers_all_draw_inputs() {
        for usage in [
            vk::BufferUsageFlags::VERTEX_BUFFER,
            vk::BufferUsageFlags::INDEX_BUFFER,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            vk::BufferUsageFlags::STORAGE_BUFFER,
        ] {
            assert!(SCRATCH_USAGE.contains(usage));
        }
    }

    #[test]
    fn keys_distinguish_location() {
        let gpu = BufferKey {
            usage: vk::BufferUsageFlags::VERTEX_BUFFER,
            location: MemoryLocation::GpuOnly,
        };
        let host = BufferKey {
            location: MemoryLocation::CpuToGpu,
            ..gpu
        };
        assert_ne!(gpu, host);
    }
}
