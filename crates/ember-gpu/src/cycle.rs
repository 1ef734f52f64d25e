//! Frame-slot bookkeeping.
//!
//! [`FrameCycle`] holds every decision [`crate::FrameRenderer`] makes about
//! which slot records next, whether its fence must be waited on, when the
//! deferred queue rotates and whether a frame is open. It owns no GPU
//! objects; the renderer performs the matching Vulkan calls.

use crate::buffering::{FrameIndex, PerFrame};
use crate::error::{GpuError, Result};
use crate::wsi::is_zero_extent;
use ash::vk;

/// What `start_render` should do, decided before any GPU object is touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramePlan {
    /// The window has no area; nothing is waited on, acquired or submitted.
    Skip,
    /// The swapchain no longer matches the window; rebuild and skip.
    Recreate,
    /// Acquire an image and record.
    Acquire,
}

/// Decide how to handle the next frame for a window of `extent`.
pub fn plan_frame(extent: vk::Extent2D, needs_recreate: bool) -> FramePlan {
    if is_zero_extent(extent) {
        FramePlan::Skip
    } else if needs_recreate {
        FramePlan::Recreate
    } else {
        FramePlan::Acquire
    }
}

/// Whether a frame is open.
///
/// Acquisition and submission happen entirely inside `start_render` and
/// `finish_render`, so only the resting states are observable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RenderState {
    #[default]
    Idle,
    Recording { image_index: u32 },
}

impl RenderState {
    pub const fn is_recording(self) -> bool {
        matches!(self, Self::Recording { .. })
    }
}

/// Slot index, open-frame state and fence bookkeeping of the renderer.
#[derive(Debug, Clone)]
pub struct FrameCycle {
    index: FrameIndex,
    state: RenderState,
    presented: u64,
    /// Set when the index advances; consumed by the next fence wait.
    rotation_due: bool,
    /// Slots whose fence was reset with no submission left to signal it.
    unsignaled: PerFrame<bool>,
}

impl Default for FrameCycle {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameCycle {
    pub fn new() -> Self {
        Self {
            index: FrameIndex::FIRST,
            state: RenderState::Idle,
            presented: 0,
            rotation_due: true,
            unsignaled: PerFrame::default(),
        }
    }

    /// Plan the next frame. Opening a frame while one is recording is
    /// caller misuse.
    pub fn plan(&self, extent: vk::Extent2D, needs_recreate: bool) -> Result<FramePlan> {
        if self.state.is_recording() {
            return Err(GpuError::InvalidState(
                "start_render called while a frame is open".to_string(),
            ));
        }
        Ok(plan_frame(extent, needs_recreate))
    }

    /// Whether the current slot's fence will be signaled by an earlier
    /// submission and must be waited on before the slot is reused.
    pub fn must_wait(&self) -> bool {
        !self.unsignaled[self.index]
    }

    /// Called once the current slot is known to be idle. Returns `true` when
    /// the deferred queue should rotate, which happens once per presented
    /// frame.
    pub fn slot_idle(&mut self) -> bool {
        std::mem::take(&mut self.rotation_due)
    }

    /// The slot's fence has been reset; only a submission signals it again.
    pub fn fence_reset(&mut self) {
        self.unsignaled[self.index] = true;
    }

    /// Rendering into `image_index` has begun.
    pub fn begin(&mut self, image_index: u32) {
        self.state = RenderState::Recording { image_index };
    }

    /// The open frame was submitted with the slot's fence.
    pub fn submitted(&mut self) {
        self.unsignaled[self.index] = false;
        self.state = RenderState::Idle;
    }

    /// The submitted frame was handed to presentation; move to the next slot.
    pub fn presented(&mut self) {
        self.index.advance();
        self.rotation_due = true;
        self.presented += 1;
    }

    /// Drop the open frame without submitting it. The slot is reused next
    /// frame and, since nothing will signal its fence, is not waited on.
    pub fn abandon(&mut self) {
        self.state = RenderState::Idle;
    }

    /// Whether the swapchain or shaders may be rebuilt right now.
    pub fn can_rebuild(&self) -> bool {
        !self.state.is_recording()
    }

    /// Slot the next frame records into.
    pub fn index(&self) -> FrameIndex {
        self.index
    }

    pub fn state(&self) -> RenderState {
        self.state
    }

    /// Frames presented so far.
    pub fn presented_count(&self) -> u64 {
        self.presented
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: vk::Extent2D = vk::Extent2D {
        width: 1280,
        height: 720,
    };

    /// Drive one complete frame the way the renderer does. Returns whether
    /// the fence was waited on and whether the deferred queue rotated.
    fn present_one(cycle: &mut FrameCycle, image_index: u32) -> (bool, bool) {
        assert_eq!(cycle.plan(WINDOW, false).unwrap(), FramePlan::Acquire);
        let waited = cycle.must_wait();
        let rotated = cycle.slot_idle();
        cycle.fence_reset();
        cycle.begin(image_index);
        cycle.submitted();
        cycle.presented();
        (waited, rotated)
    }

    #[test]
    fn minimized_window_skips_before_anything_else() {
        for extent in [
            vk::Extent2D::default(),
            vk::Extent2D {
                width: 0,
                height: 720,
            },
            vk::Extent2D {
                width: 1280,
                height: 0,
            },
        ] {
            assert_eq!(plan_frame(extent, true), FramePlan::Skip);
            assert_eq!(plan_frame(extent, false), FramePlan::Skip);
        }
    }

    #[test]
    fn stale_swapchain_is_rebuilt_instead_of_acquired() {
        assert_eq!(plan_frame(WINDOW, true), FramePlan::Recreate);
        assert_eq!(plan_frame(WINDOW, false), FramePlan::Acquire);
    }

    #[test]
    fn render_state_defaults_to_idle() {
        assert_eq!(RenderState::default(), RenderState::Idle);
        assert!(!RenderState::Idle.is_recording());
        assert!(RenderState::Recording { image_index: 2 }.is_recording());
    }

    #[test]
    fn skipped_frames_leave_the_cycle_untouched() {
        let mut cycle = FrameCycle::new();
        present_one(&mut cycle, 0);
        let before = cycle.clone();

        for _ in 0..3 {
            assert_eq!(
                cycle.plan(vk::Extent2D::default(), true).unwrap(),
                FramePlan::Skip
            );
        }

        assert_eq!(cycle.index(), before.index());
        assert_eq!(cycle.must_wait(), before.must_wait());
        assert_eq!(cycle.presented_count(), 1);
        // The rotation earned by the presented frame is still pending.
        assert!(cycle.slot_idle());
    }

    #[test]
    fn deferred_queue_rotates_once_per_presented_frame() {
        let mut cycle = FrameCycle::new();
        let mut rotations = 0;

        for frame in 0..6 {
            let (_, rotated) = present_one(&mut cycle, frame % 3);
            rotations += usize::from(rotated);
        }
        assert_eq!(rotations, 6);

        // Recreate frames wait on the slot but never present, so they add
        // no rotation of their own.
        assert_eq!(cycle.plan(WINDOW, true).unwrap(), FramePlan::Recreate);
        assert!(cycle.slot_idle());
        assert_eq!(cycle.plan(WINDOW, true).unwrap(), FramePlan::Recreate);
        assert!(!cycle.slot_idle());
        let (_, rotated) = present_one(&mut cycle, 0);
        assert!(!rotated);
    }

    #[test]
    fn slots_alternate_and_are_waited_on_after_submission() {
        let mut cycle = FrameCycle::new();
        let mut slots = Vec::new();
        for frame in 0..4 {
            slots.push(cycle.index().get());
            let (waited, _) = present_one(&mut cycle, frame);
            assert!(waited);
        }
        assert_eq!(slots, [0, 1, 0, 1]);
        assert_eq!(cycle.presented_count(), 4);
    }

    #[test]
    fn abandoned_frame_keeps_its_slot_and_skips_the_next_wait() {
        let mut cycle = FrameCycle::new();
        present_one(&mut cycle, 0);
        let slot = cycle.index();

        assert_eq!(cycle.plan(WINDOW, false).unwrap(), FramePlan::Acquire);
        assert!(cycle.must_wait());
        assert!(cycle.slot_idle());
        cycle.fence_reset();
        cycle.begin(1);
        cycle.abandon();

        assert_eq!(cycle.state(), RenderState::Idle);
        assert_eq!(cycle.index(), slot);
        assert_eq!(cycle.presented_count(), 1);
        // Nothing was submitted, so waiting on the reset fence would hang.
        assert!(!cycle.must_wait());
        assert!(!cycle.slot_idle());

        // The next real frame uses the same slot, then waits normally.
        let (waited, _) = present_one(&mut cycle, 1);
        assert!(!waited);
        assert_eq!(cycle.index(), slot.next());
        assert!(cycle.must_wait());
    }

    #[test]
    fn recording_blocks_rebuilds_and_new_frames() {
        let mut cycle = FrameCycle::new();
        assert!(cycle.can_rebuild());

        cycle.fence_reset();
        cycle.begin(2);
        assert!(!cycle.can_rebuild());
        assert_eq!(cycle.state(), RenderState::Recording { image_index: 2 });
        assert!(matches!(
            cycle.plan(WINDOW, false),
            Err(GpuError::InvalidState(_))
        ));

        cycle.submitted();
        assert!(cycle.can_rebuild());
    }
}
