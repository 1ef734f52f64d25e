//! Lease-based resource pooling.
//!
//! [`ResourcePool::allocate`] hands out a [`Lease`] that owns the resource
//! exclusively. Dropping the lease sends the resource to the pool's return
//! bin; it becomes reusable on the *next* `allocate` call, which is when the
//! bin is harvested. A resource still held through a lease is never handed
//! out twice.
//!
//! [`ScratchArena`] covers the per-frame case: entries live for one use of a
//! frame slot and are recycled by resetting a bump index.

use crate::error::Result;
use parking_lot::Mutex;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

/// Creates and recycles pooled resources.
pub trait PoolFactory<K, R> {
    /// Build a fresh resource for `key`.
    fn create(&mut self, key: &K) -> Result<R>;

    /// Prepare an idle resource previously created for `key` for reuse.
    fn reinit(&mut self, resource: &mut R, key: &K) -> Result<()>;
}

type ReturnBin<R> = Arc<Mutex<Vec<(usize, R)>>>;

struct Entry<K, R> {
    key: K,
    idle: Option<R>,
}

/// Pool of resources keyed by their reuse class.
pub struct ResourcePool<K, R> {
    label: &'static str,
    entries: Vec<Entry<K, R>>,
    returned: ReturnBin<R>,
}

impl<K: PartialEq + Clone, R> ResourcePool<K, R> {
    /// Create an empty pool. `label` names the pool in logs.
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            entries: Vec::new(),
            returned: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Lease a resource for `key`, reusing an idle entry with the same key
    /// when one exists.
    pub fn allocate<F>(&mut self, key: &K, factory: &mut F) -> Result<Lease<R>>
    where
        F: PoolFactory<K, R>,
    {
        self.harvest();

        let reusable = self
            .entries
            .iter()
            .position(|entry| entry.idle.is_some() && entry.key == *key);

        if let Some(index) = reusable {
            let entry = &mut self.entries[index];
            if let Some(mut resource) = entry.idle.take() {
                if let Err(e) = factory.reinit(&mut resource, key) {
                    entry.idle = Some(resource);
                    return Err(e);
                }
                return Ok(self.lease(index, resource));
            }
        }

        let resource = factory.create(key)?;
        let index = self.entries.len();
        self.entries.push(Entry {
            key: key.clone(),
            idle: None,
        });
        tracing::debug!("{} pool grew to {} entries", self.label, self.entries.len());

        Ok(self.lease(index, resource))
    }

    fn lease(&self, index: usize, resource: R) -> Lease<R> {
        Lease {
            index,
            resource: Some(resource),
            bin: Arc::clone(&self.returned),
        }
    }

    /// Move resources released since the last call back into their slots.
    fn harvest(&mut self) {
        let returned = std::mem::take(&mut *self.returned.lock());
        for (index, resource) in returned {
            if let Some(entry) = self.entries.get_mut(index) {
                entry.idle = Some(resource);
            }
        }
    }

    /// Total number of entries ever created and still owned by the pool.
    pub fn total(&self) -> usize {
        self.entries.len()
    }

    /// Entries currently available for reuse, counting ones released but
    /// not yet harvested.
    pub fn idle(&self) -> usize {
        let idle = self.entries.iter().filter(|e| e.idle.is_some()).count();
        idle + self.returned.lock().len()
    }

    /// Entries currently held through leases.
    pub fn in_use(&self) -> usize {
        self.total() - self.idle()
    }

    /// Drop every idle entry. Leased entries are dropped when their lease
    /// is released after this call.
    pub fn clear(&mut self) {
        self.entries.clear();
        // Outstanding leases keep the old bin alive and release into it.
        self.returned = Arc::new(Mutex::new(Vec::new()));
    }
}

/// Exclusive handle to a pooled resource.
pub struct Lease<R> {
    index: usize,
    resource: Option<R>,
    bin: ReturnBin<R>,
}

impl<R> Lease<R> {
    /// Index of the pool entry backing this lease.
    pub fn slot(&self) -> usize {
        self.index
    }
}

impl<R> Deref for Lease<R> {
    type Target = R;

    fn deref(&self) -> &R {
        // Only `Drop` takes the resource.
        self.resource.as_ref().unwrap_or_else(|| unreachable!())
    }
}

impl<R> DerefMut for Lease<R> {
    fn deref_mut(&mut self) -> &mut R {
        self.resource.as_mut().unwrap_or_else(|| unreachable!())
    }
}

impl<R: fmt::Debug> fmt::Debug for Lease<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease")
            .field("slot", &self.index)
            .field("resource", &self.resource)
            .finish()
    }
}

impl<R> Drop for Lease<R> {
    fn drop(&mut self) {
        if let Some(resource) = self.resource.take() {
            self.bin.lock().push((self.index, resource));
        }
    }
}

/// Per-frame bump allocator over reusable entries.
///
/// Entries claimed during a frame stay untouched until [`reset`] is called
/// the next time the same frame slot starts, after its fence has signaled.
///
/// [`reset`]: ScratchArena::reset
pub struct ScratchArena<R> {
    entries: Vec<R>,
    next: usize,
}

impl<R> Default for ScratchArena<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> ScratchArena<R> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            next: 0,
        }
    }

    /// Claim the next entry. It is reused if `fits` accepts it, otherwise
    /// replaced by a fresh one from `create`.
    pub fn claim(
        &mut self,
        fits: impl FnOnce(&R) -> bool,
        create: impl FnOnce() -> Result<R>,
    ) -> Result<&mut R> {
        let index = self.next;
        if index < self.entries.len() {
            if !fits(&self.entries[index]) {
                self.entries[index] = create()?;
            }
        } else {
            self.entries.push(create()?);
        }
        self.next += 1;
        Ok(&mut self.entries[index])
    }

    /// Make every entry claimable again.
    pub fn reset(&mut self) {
        self.next = 0;
    }

    /// Entries claimed since the last reset.
    pub fn claimed(&self) -> usize {
        self.next
    }

    /// Entries owned by the arena.
    pub fn capacity(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[derive(Debug)]
    struct Fake {
        id: usize,
        size: u64,
    }

    #[derive(Default)]
    struct FakeFactory {
        created: usize,
        reinits: usize,
        size: u64,
    }

    impl PoolFactory<&'static str, Fake> for FakeFactory {
        fn create(&mut self, _key: &&'static str) -> Result<Fake> {
            self.created += 1;
            Ok(Fake {
                id: self.created,
                size: self.size,
            })
        }

        fn reinit(&mut self, resource: &mut Fake, _key: &&'static str) -> Result<()> {
            self.reinits += 1;
            resource.size = resource.size.max(self.size);
            Ok(())
        }
    }

    #[test]
    fn held_leases_are_never_shared() {
        let mut pool = ResourcePool::new("test");
        let mut factory = FakeFactory::default();

        let leases: Vec<_> = (0..8)
            .map(|_| pool.allocate(&"vertex", &mut factory).unwrap())
            .collect();
        let ids: HashSet<usize> = leases.iter().map(|l| l.id).collect();

        assert_eq!(ids.len(), 8);
        assert_eq!(pool.total(), 8);
        assert_eq!(pool.in_use(), 8);
    }

    #[test]
    fn released_entries_are_reused_on_next_allocate() {
        let mut pool = ResourcePool::new("test");
        let mut factory = FakeFactory::default();

        let first = pool.allocate(&"vertex", &mut factory).unwrap();
        let first_id = first.id;
        drop(first);
        assert_eq!(pool.idle(), 1);

        let second = pool.allocate(&"vertex", &mut factory).unwrap();
        assert_eq!(second.id, first_id);
        assert_eq!(factory.created, 1);
        assert_eq!(factory.reinits, 1);
        assert_eq!(pool.total(), 1);
    }

    #[test]
    fn distinct_keys_never_share_entries() {
        let mut pool = ResourcePool::new("test");
        let mut factory = FakeFactory::default();

        drop(pool.allocate(&"vertex", &mut factory).unwrap());
        let index = pool.allocate(&"index", &mut factory).unwrap();

        assert_eq!(index.id, 2);
        assert_eq!(pool.total(), 2);
        assert_eq!(factory.reinits, 0);
    }

    #[test]
    fn reinit_sees_the_new_request() {
        let mut pool = ResourcePool::new("test");
        let mut factory = FakeFactory {
            size: 64,
            ..FakeFactory::default()
        };

        drop(pool.allocate(&"uniform", &mut factory).unwrap());
        factory.size = 256;
        let grown = pool.allocate(&"uniform", &mut factory).unwrap();
        assert_eq!(grown.size, 256);
        assert_eq!(grown.slot(), 0);
    }

    #[test]
    fn leases_can_be_released_from_other_threads() {
        let mut pool = ResourcePool::new("test");
        let mut factory = FakeFactory::default();
        let lease = pool.allocate(&"vertex", &mut factory).unwrap();

        std::thread::spawn(move || drop(lease)).join().unwrap();

        let again = pool.allocate(&"vertex", &mut factory).unwrap();
        assert_eq!(again.id, 1);
    }

    #[test]
    fn clear_orphans_outstanding_leases() {
        let mut pool = ResourcePool::new("test");
        let mut factory = FakeFactory::default();
        let stale = pool.allocate(&"vertex", &mut factory).unwrap();

        pool.clear();
        drop(stale);

        let fresh = pool.allocate(&"index", &mut factory).unwrap();
        assert_eq!(fresh.id, 2);
        drop(fresh);
        assert_eq!(pool.total(), 1);
        assert_eq!(pool.idle(), 1);
    }

    #[test]
    fn scratch_entries_recycle_on_reset() {
        let mut arena: ScratchArena<Fake> = ScratchArena::new();
        let mut created = 0;

        for frame in 0..3 {
            arena.reset();
            for size in [16, 32] {
                let entry = arena
                    .claim(
                        |e| e.size >= size,
                        || {
                            created += 1;
                            Ok(Fake { id: created, size })
                        },
                    )
                    .unwrap();
                assert!(entry.size >= size, "frame {frame}");
            }
            assert_eq!(arena.claimed(), 2);
        }

        assert_eq!(created, 2);
        assert_eq!(arena.capacity(), 2);
    }

    #[test]
    fn scratch_entry_is_replaced_when_too_small() {
        let mut arena: ScratchArena<Fake> = ScratchArena::new();
        arena.claim(|_| true, || Ok(Fake { id: 1, size: 16 })).unwrap();
        arena.reset();

        let entry = arena
            .claim(|e| e.size >= 1024, || Ok(Fake { id: 2, size: 1024 }))
            .unwrap();
        assert_eq!(entry.id, 2);
        assert_eq!(arena.capacity(), 1);
    }
}
