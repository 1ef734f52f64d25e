//! Descriptor set management.
//!
//! Descriptor sets are allocated per draw from pools owned by the current
//! frame slot. Pools are never freed set by set: once a slot's fence has
//! signaled, every pool the slot used is reset in bulk and recycled.

use crate::buffering::{FrameIndex, PerFrame};
use crate::context::GpuContext;
use crate::error::{GpuError, Result};
use crate::resource::Owned;
use ash::vk;
use std::sync::Arc;

/// Attempts made by [`DescriptorCache::allocate`] before giving up.
pub const MAX_ALLOCATION_ATTEMPTS: u32 = 5;

/// Number of combined image samplers in the texture set.
pub const IMAGE_SLOTS: u32 = 4;

/// Descriptor set layout builder.
pub struct DescriptorSetLayoutBuilder<'a> {
    bindings: Vec<vk::DescriptorSetLayoutBinding<'a>>,
}

impl DescriptorSetLayoutBuilder<'_> {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            bindings: Vec::new(),
        }
    }

    /// Add a binding.
    #[must_use]
    pub fn binding(
        mut self,
        binding: u32,
        descriptor_type: vk::DescriptorType,
        count: u32,
        stage_flags: vk::ShaderStageFlags,
    ) -> Self {
        self.bindings.push(
            vk::DescriptorSetLayoutBinding::default()
                .binding(binding)
                .descriptor_type(descriptor_type)
                .descriptor_count(count)
                .stage_flags(stage_flags),
        );
        self
    }

    /// Add a storage buffer binding.
    #[must_use]
    pub fn storage_buffer(self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.binding(binding, vk::DescriptorType::STORAGE_BUFFER, 1, stage_flags)
    }

    /// Add a uniform buffer binding.
    #[must_use]
    pub fn uniform_buffer(self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.binding(binding, vk::DescriptorType::UNIFORM_BUFFER, 1, stage_flags)
    }

    /// Add a sampled image binding.
    #[must_use]
    pub fn sampled_image(self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.binding(
            binding,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            1,
            stage_flags,
        )
    }

    /// Number of bindings added so far.
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Build the descriptor set layout.
    pub fn build(self, ctx: &Arc<GpuContext>) -> Result<Owned<vk::DescriptorSetLayout>> {
        let layout_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&self.bindings);

        unsafe {
            let layout = ctx
                .device()
                .create_descriptor_set_layout(&layout_info, None)?;
            Ok(Owned::from_raw(ctx, layout))
        }
    }
}

impl Default for DescriptorSetLayoutBuilder<'_> {
    fn default() -> Self {
        Self::new()
    }
}

/// The three fixed set layouts every pipeline is built against.
///
/// - set 0: view/projection uniform buffer, per-instance storage buffer
/// - set 1: [`IMAGE_SLOTS`] combined image samplers
/// - set 2: caller uniform buffer, caller storage buffer
pub struct StandardLayouts {
    pub frame: Owned<vk::DescriptorSetLayout>,
    pub textures: Owned<vk::DescriptorSetLayout>,
    pub user: Owned<vk::DescriptorSetLayout>,
}

impl StandardLayouts {
    pub fn new(ctx: &Arc<GpuContext>) -> Result<Self> {
        let stages = vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT;

        let frame = DescriptorSetLayoutBuilder::new()
            .uniform_buffer(0, stages)
            .storage_buffer(1, stages)
            .build(ctx)?;

        let textures = (0..IMAGE_SLOTS)
            .fold(DescriptorSetLayoutBuilder::new(), |builder, slot| {
                builder.sampled_image(slot, vk::ShaderStageFlags::FRAGMENT)
            })
            .build(ctx)?;

        let user = DescriptorSetLayoutBuilder::new()
            .uniform_buffer(0, stages)
            .storage_buffer(1, stages)
            .build(ctx)?;

        Ok(Self {
            frame,
            textures,
            user,
        })
    }

    /// Layouts in set order.
    pub fn raw(&self) -> [vk::DescriptorSetLayout; 3] {
        [self.frame.raw(), self.textures.raw(), self.user.raw()]
    }
}

/// Sizing of descriptor pools.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorConfig {
    /// Sets a single pool can hand out.
    pub max_sets_per_pool: u32,
    /// Reset pools kept per slot; extras are destroyed on rotation.
    pub max_free_pools: usize,
    /// Descriptors of each type reserved per set.
    pub descriptors_per_set: Vec<(vk::DescriptorType, u32)>,
}

impl Default for DescriptorConfig {
    fn default() -> Self {
        Self {
            max_sets_per_pool: 64,
            max_free_pools: 8,
            descriptors_per_set: vec![
                (vk::DescriptorType::UNIFORM_BUFFER, 1),
                (vk::DescriptorType::STORAGE_BUFFER, 1),
                (vk::DescriptorType::COMBINED_IMAGE_SAMPLER, IMAGE_SLOTS),
            ],
        }
    }
}

impl DescriptorConfig {
    #[must_use]
    pub const fn max_sets_per_pool(mut self, max_sets: u32) -> Self {
        self.max_sets_per_pool = max_sets;
        self
    }

    #[must_use]
    pub const fn max_free_pools(mut self, max_free: usize) -> Self {
        self.max_free_pools = max_free;
        self
    }

    /// Pool sizes for one pool.
    pub fn pool_sizes(&self) -> Vec<vk::DescriptorPoolSize> {
        self.descriptors_per_set
            .iter()
            .map(|&(ty, per_set)| vk::DescriptorPoolSize {
                ty,
                descriptor_count: per_set.saturating_mul(self.max_sets_per_pool).max(1),
            })
            .collect()
    }
}

/// Creates, allocates from and resets descriptor pools.
pub trait DescriptorBackend {
    type Pool;

    fn create_pool(&mut self, config: &DescriptorConfig) -> Result<Self::Pool>;

    /// Allocate one set. `Ok(None)` means the pool is exhausted.
    fn allocate(
        &mut self,
        pool: &Self::Pool,
        layout: vk::DescriptorSetLayout,
    ) -> Result<Option<vk::DescriptorSet>>;

    /// Return every set of `pool` to it.
    fn reset(&mut self, pool: &Self::Pool) -> Result<()>;
}

/// Vulkan descriptor pools.
pub struct VkDescriptorBackend {
    ctx: Arc<GpuContext>,
}

impl VkDescriptorBackend {
    pub fn new(ctx: &Arc<GpuContext>) -> Self {
        Self {
            ctx: Arc::clone(ctx),
        }
    }
}

impl DescriptorBackend for VkDescriptorBackend {
    type Pool = Owned<vk::DescriptorPool>;

    fn create_pool(&mut self, config: &DescriptorConfig) -> Result<Self::Pool> {
        let pool_sizes = config.pool_sizes();
        let create_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(config.max_sets_per_pool)
            .pool_sizes(&pool_sizes);

        unsafe {
            let pool = self.ctx.device().create_descriptor_pool(&create_info, None)?;
            Ok(Owned::from_raw(&self.ctx, pool))
        }
    }

    fn allocate(
        &mut self,
        pool: &Self::Pool,
        layout: vk::DescriptorSetLayout,
    ) -> Result<Option<vk::DescriptorSet>> {
        let layouts = [layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(pool.raw())
            .set_layouts(&layouts);

        match unsafe { self.ctx.device().allocate_descriptor_sets(&alloc_info) } {
            Ok(sets) => Ok(sets.first().copied()),
            Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY | vk::Result::ERROR_FRAGMENTED_POOL) => {
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn reset(&mut self, pool: &Self::Pool) -> Result<()> {
        unsafe {
            self.ctx
                .device()
                .reset_descriptor_pool(pool.raw(), vk::DescriptorPoolResetFlags::empty())?;
        }
        Ok(())
    }
}

struct PoolSet<P> {
    active: Option<P>,
    used: Vec<P>,
    free: Vec<P>,
}

impl<P> Default for PoolSet<P> {
    fn default() -> Self {
        Self {
            active: None,
            used: Vec::new(),
            free: Vec::new(),
        }
    }
}

/// Per-slot rotating descriptor pools.
pub struct DescriptorCache<B: DescriptorBackend> {
    backend: B,
    config: DescriptorConfig,
    slots: PerFrame<PoolSet<B::Pool>>,
    current: FrameIndex,
    pools_created: usize,
}

impl<B: DescriptorBackend> DescriptorCache<B> {
    pub fn new(backend: B, config: DescriptorConfig) -> Self {
        Self {
            backend,
            config,
            slots: PerFrame::from_fn(|_| PoolSet::default()),
            current: FrameIndex::FIRST,
            pools_created: 0,
        }
    }

    fn create_pool(&mut self) -> Result<B::Pool> {
        let pool = self.backend.create_pool(&self.config)?;
        self.pools_created += 1;
        tracing::debug!("Created descriptor pool ({} total)", self.pools_created);
        Ok(pool)
    }

    /// Allocate a set for `layout` from the current slot.
    pub fn allocate(&mut self, layout: vk::DescriptorSetLayout) -> Result<vk::DescriptorSet> {
        for _ in 0..MAX_ALLOCATION_ATTEMPTS {
            if self.slots[self.current].active.is_none() {
                let pool = match self.slots[self.current].free.pop() {
                    Some(pool) => pool,
                    None => self.create_pool()?,
                };
                self.slots[self.current].active = Some(pool);
            }

            let slot = &mut self.slots[self.current];
            if let Some(pool) = slot.active.as_ref() {
                if let Some(set) = self.backend.allocate(pool, layout)? {
                    return Ok(set);
                }
            }

            // Exhausted; retire it and retry from a fresh pool.
            if let Some(pool) = slot.active.take() {
                slot.used.push(pool);
            }
        }

        Err(GpuError::DescriptorExhausted {
            attempts: MAX_ALLOCATION_ATTEMPTS,
        })
    }

    /// Switch to `slot` and recycle every pool it used last time.
    ///
    /// Must only be called once the slot's fence has signaled.
    pub fn next_frame(&mut self, slot: FrameIndex) -> Result<()> {
        self.current = slot;
        let max_free = self.config.max_free_pools;
        let set = &mut self.slots[slot];

        if let Some(pool) = set.active.take() {
            set.used.push(pool);
        }
        for pool in set.used.drain(..) {
            self.backend.reset(&pool)?;
            set.free.push(pool);
        }
        if set.free.len() > max_free {
            let excess = set.free.len() - max_free;
            set.free.truncate(max_free);
            self.pools_created -= excess;
            tracing::debug!("Destroyed {excess} surplus descriptor pools");
        }

        set.active = set.free.pop();
        if set.active.is_none() {
            let pool = self.create_pool()?;
            self.slots[slot].active = Some(pool);
        }
        Ok(())
    }

    /// Slot currently allocated from.
    pub fn current_slot(&self) -> FrameIndex {
        self.current
    }

    /// Pools alive across all slots.
    pub fn pool_count(&self) -> usize {
        self.pools_created
    }

    pub fn config(&self) -> &DescriptorConfig {
        &self.config
    }
}

/// Write a uniform buffer descriptor for the first `range` bytes of
/// `buffer`.
///
/// # Safety
/// Device and buffer must be valid.
pub unsafe fn write_uniform_buffer(
    device: &ash::Device,
    dst_set: vk::DescriptorSet,
    binding: u32,
    buffer: vk::Buffer,
    range: vk::DeviceSize,
) {
    write_buffer(
        device,
        dst_set,
        binding,
        (buffer, range),
        vk::DescriptorType::UNIFORM_BUFFER,
    );
}

/// Write a storage buffer descriptor for the first `range` bytes of
/// `buffer`. Pass [`vk::WHOLE_SIZE`] to expose all of it.
///
/// # Safety
/// Device and buffer must be valid.
pub unsafe fn write_storage_buffer(
    device: &ash::Device,
    dst_set: vk::DescriptorSet,
    binding: u32,
    buffer: vk::Buffer,
    range: vk::DeviceSize,
) {
    write_buffer(
        device,
        dst_set,
        binding,
        (buffer, range),
        vk::DescriptorType::STORAGE_BUFFER,
    );
}

unsafe fn write_buffer(
    device: &ash::Device,
    dst_set: vk::DescriptorSet,
    binding: u32,
    (buffer, range): (vk::Buffer, vk::DeviceSize),
    descriptor_type: vk::DescriptorType,
) {
    let buffer_info = vk::DescriptorBufferInfo::default()
        .buffer(buffer)
        .offset(0)
        .range(range);

    let write = vk::WriteDescriptorSet::default()
        .dst_set(dst_set)
        .dst_binding(binding)
        .descriptor_type(descriptor_type)
        .buffer_info(std::slice::from_ref(&buffer_info));

    device.update_descriptor_sets(&[write], &[]);
}

/// Write a combined image sampler descriptor.
///
/// # Safety
/// Device, view and sampler must be valid.
pub unsafe fn write_sampled_image(
    device: &ash::Device,
    dst_set: vk::DescriptorSet,
    binding: u32,
    image_view: vk::ImageView,
    sampler: vk::Sampler,
) {
    let image_info = vk::DescriptorImageInfo::default()
        .image_view(image_view)
        .sampler(sampler)
        .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);

    let write = vk::WriteDescriptorSet::default()
        .dst_set(dst_set)
        .dst_binding(binding)
        .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
        .image_info(std::slice::from_ref(&image_info));

    device.update_descriptor_sets(&[write], &[]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;
    use std::collections::HashMap;

    /// Pools hand out `max_sets_per_pool` sets until reset.
    #[derive(Default)]
    struct MockBackend {
        next_id: u64,
        used: HashMap<u64, u32>,
        created: usize,
        resets: usize,
        always_exhausted: bool,
    }

    impl DescriptorBackend for MockBackend {
        type Pool = (u64, u32);

        fn create_pool(&mut self, config: &DescriptorConfig) -> Result<Self::Pool> {
            self.next_id += 1;
            self.created += 1;
            self.used.insert(self.next_id, 0);
            Ok((self.next_id, config.max_sets_per_pool))
        }

        fn allocate(
            &mut self,
            &(id, capacity): &Self::Pool,
            _layout: vk::DescriptorSetLayout,
        ) -> Result<Option<vk::DescriptorSet>> {
            let used = self.used.entry(id).or_default();
            if self.always_exhausted || *used >= capacity {
                return Ok(None);
            }
            *used += 1;
            Ok(Some(vk::DescriptorSet::from_raw((id << 32) | u64::from(*used))))
        }

        fn reset(&mut self, &(id, _): &Self::Pool) -> Result<()> {
            self.resets += 1;
            self.used.insert(id, 0);
            Ok(())
        }
    }

    fn config() -> DescriptorConfig {
        DescriptorConfig::default()
            .max_sets_per_pool(4)
            .max_free_pools(3)
    }

    #[test]
    fn fills_every_free_pool_within_one_slot() {
        let config = config();
        let total = config.max_sets_per_pool as usize * config.max_free_pools;
        let mut cache = DescriptorCache::new(MockBackend::default(), config);

        let sets: Vec<_> = (0..total)
            .map(|_| cache.allocate(vk::DescriptorSetLayout::null()).unwrap())
            .collect();

        let unique: std::collections::HashSet<_> = sets.iter().collect();
        assert_eq!(unique.len(), total);
        assert_eq!(cache.pool_count(), 3);
    }

    #[test]
    fn rotation_recycles_used_pools() {
        let mut cache = DescriptorCache::new(MockBackend::default(), config());
        let mut slot = FrameIndex::FIRST;

        for _ in 0..4 {
            cache.next_frame(slot).unwrap();
            for _ in 0..12 {
                cache.allocate(vk::DescriptorSetLayout::null()).unwrap();
            }
            slot.advance();
        }

        // Three full pools per slot, reused on every later visit.
        assert_eq!(cache.pool_count(), 6);
        assert_eq!(cache.backend.created, 6);
        assert_eq!(cache.backend.resets, 6);
    }

    #[test]
    fn surplus_free_pools_are_destroyed() {
        let mut cache = DescriptorCache::new(
            MockBackend::default(),
            DescriptorConfig::default()
                .max_sets_per_pool(1)
                .max_free_pools(2),
        );

        for _ in 0..5 {
            cache.allocate(vk::DescriptorSetLayout::null()).unwrap();
        }
        assert_eq!(cache.pool_count(), 5);

        cache.next_frame(FrameIndex::FIRST).unwrap();
        // Two kept as free, one of them promoted to active.
        assert_eq!(cache.pool_count(), 2);
    }

    #[test]
    fn exhaustion_is_fatal_after_bounded_attempts() {
        let backend = MockBackend {
            always_exhausted: true,
            ..MockBackend::default()
        };
        let mut cache = DescriptorCache::new(backend, config());

        let err = cache.allocate(vk::DescriptorSetLayout::null()).unwrap_err();
        assert!(matches!(
            err,
            GpuError::DescriptorExhausted {
                attempts: MAX_ALLOCATION_ATTEMPTS
            }
        ));
        assert_eq!(cache.backend.created, MAX_ALLOCATION_ATTEMPTS as usize);
    }

    #[test]
    fn slots_keep_separate_pools() {
        let mut cache = DescriptorCache::new(MockBackend::default(), config());
        cache.next_frame(FrameIndex::FIRST).unwrap();
        cache.allocate(vk::DescriptorSetLayout::null()).unwrap();

        cache.next_frame(FrameIndex::FIRST.next()).unwrap();
        assert_eq!(cache.current_slot(), FrameIndex::FIRST.next());
        assert_eq!(cache.pool_count(), 2);
        assert_eq!(cache.backend.resets, 0);
    }

    #[test]
    fn pool_sizes_scale_with_sets() {
        let sizes = DescriptorConfig::default().pool_sizes();
        let samplers = sizes
            .iter()
            .find(|size| size.ty == vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .unwrap();
        assert_eq!(samplers.descriptor_count, IMAGE_SLOTS * 64);
    }
}
