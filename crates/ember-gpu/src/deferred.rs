//! Deferred resource destruction for multi-frame-in-flight rendering.
//!
//! A resource replaced mid-frame (a resized buffer, a recreated depth
//! attachment) may still be read by GPU work that was already submitted. It
//! is parked here instead of dropped, and released once enough frames have
//! been rotated through that every submission referencing it has completed.

use crate::buffering::BUFFERING;
use std::any::Any;
use std::collections::VecDeque;
use std::sync::Arc;

type Doomed = Box<dyn Any + Send + Sync>;

/// Ring of buckets holding type-erased resources awaiting destruction.
///
/// Resources are pushed into the newest bucket. Each [`next_frame`] appends
/// a fresh bucket and drops the oldest ones until at most [`BUFFERING`]
/// remain, so a pushed resource outlives the first rotation after the push
/// and is dropped during the second.
///
/// [`next_frame`]: DeferredDestructionQueue::next_frame
pub struct DeferredDestructionQueue {
    buckets: VecDeque<Vec<Doomed>>,
}

impl Default for DeferredDestructionQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl DeferredDestructionQueue {
    /// Create a queue with a single, current bucket.
    pub fn new() -> Self {
        let mut buckets = VecDeque::with_capacity(BUFFERING + 1);
        buckets.push_back(Vec::new());
        Self { buckets }
    }

    /// Park a shared handle. The resource is freed once this and every
    /// other clone have been dropped.
    pub fn push<T: Send + Sync + 'static>(&mut self, resource: Arc<T>) {
        self.current().push(Box::new(resource));
    }

    /// Park an owned resource.
    pub fn push_owned<T: Send + Sync + 'static>(&mut self, resource: T) {
        self.current().push(Box::new(resource));
    }

    fn current(&mut self) -> &mut Vec<Doomed> {
        if self.buckets.is_empty() {
            self.buckets.push_back(Vec::new());
        }
        let last = self.buckets.len() - 1;
        &mut self.buckets[last]
    }

    /// Rotate to a fresh bucket, destroying buckets that have aged out.
    ///
    /// Call once per frame slot activation, after the slot's fence wait.
    pub fn next_frame(&mut self) {
        self.buckets.push_back(Vec::new());
        while self.buckets.len() > BUFFERING {
            if let Some(bucket) = self.buckets.pop_front() {
                if !bucket.is_empty() {
                    tracing::debug!("Destroying {} deferred resources", bucket.len());
                }
            }
        }
    }

    /// Destroy everything immediately.
    ///
    /// Only valid after the device has gone idle.
    pub fn flush(&mut self) {
        let count = self.pending_count();
        self.buckets.clear();
        self.buckets.push_back(Vec::new());
        if count > 0 {
            tracing::debug!("Flushed {count} deferred resources");
        }
    }

    /// Number of resources still waiting.
    pub fn pending_count(&self) -> usize {
        self.buckets.iter().map(Vec::len).sum()
    }

    /// Number of buckets currently held.
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }
}

impl Drop for DeferredDestructionQueue {
    fn drop(&mut self) {
        let count = self.pending_count();
        if count > 0 {
            tracing::debug!("Dropping {count} deferred resources with queue");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Tracked(Arc<AtomicUsize>);

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn survives_buffering_rotations() {
        let dropped = Arc::new(AtomicUsize::new(0));
        let mut queue = DeferredDestructionQueue::new();
        queue.push_owned(Tracked(Arc::clone(&dropped)));

        queue.next_frame();
        assert_eq!(dropped.load(Ordering::SeqCst), 0);
        assert_eq!(queue.pending_count(), 1);

        queue.next_frame();
        assert_eq!(dropped.load(Ordering::SeqCst), 1);
        assert_eq!(queue.pending_count(), 0);

        queue.next_frame();
        assert_eq!(dropped.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn steady_state_lifetime_is_the_same() {
        let dropped = Arc::new(AtomicUsize::new(0));
        let mut queue = DeferredDestructionQueue::new();
        for _ in 0..5 {
            queue.next_frame();
        }
        assert_eq!(queue.bucket_count(), BUFFERING);

        queue.push_owned(Tracked(Arc::clone(&dropped)));
        queue.next_frame();
        assert_eq!(dropped.load(Ordering::SeqCst), 0);
        queue.next_frame();
        assert_eq!(dropped.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn shared_handles_outlive_the_queue_reference() {
        let dropped = Arc::new(AtomicUsize::new(0));
        let mut queue = DeferredDestructionQueue::new();
        let shared = Arc::new(Tracked(Arc::clone(&dropped)));
        queue.push(Arc::clone(&shared));

        queue.next_frame();
        queue.next_frame();
        assert_eq!(dropped.load(Ordering::SeqCst), 0);
        assert_eq!(Arc::strong_count(&shared), 1);

        drop(shared);
        assert_eq!(dropped.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn flush_destroys_everything() {
        let dropped = Arc::new(AtomicUsize::new(0));
        let mut queue = DeferredDestructionQueue::new();
        queue.push_owned(Tracked(Arc::clone(&dropped)));
        queue.next_frame();
        queue.push_owned(Tracked(Arc::clone(&dropped)));

        queue.flush();
        assert_eq!(dropped.load(Ordering::SeqCst), 2);
        assert_eq!(queue.pending_count(), 0);
        assert_eq!(queue.bucket_count(), 1);
    }
}
