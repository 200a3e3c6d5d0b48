//! GPU synchronization primitives.
//!
//! The compiler expresses all cross-queue and cross-graph ordering through
//! [`SyncPoint`]s attached to submission batches. Fences only guard frame
//! slot reuse on the CPU side: every queue a frame touched ends with a fenced
//! submission, and the slot keeps all of those fences.

use framegraph_core::pool::Poolable;

use crate::backend::TransientHandle;
use crate::types::PipelineStages;

/// A GPU-side synchronization point a batch can wait on or signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SyncPoint {
    /// Binary semaphore linking two batches of the same graph.
    Semaphore(u32),
    /// The swapchain image for this frame has been acquired.
    ImageAcquired,
    /// Rendering to the swapchain image is finished; present may proceed.
    RenderFinished,
    /// External timeline semaphore value.
    Timeline {
        /// Timeline id.
        timeline: u64,
        /// Timeline value.
        value: u64,
    },
}

/// A wait on a sync point, blocking the given stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SemaphoreWait {
    /// What to wait on.
    pub point: SyncPoint,
    /// Stages that may not start before the wait is satisfied.
    pub stages: PipelineStages,
}

impl SemaphoreWait {
    /// Create a wait.
    pub fn new(point: SyncPoint, stages: PipelineStages) -> Self {
        Self { point, stages }
    }
}

/// CPU-visible fence returned by a submission.
///
/// Opaque to the executor; the device maps it to its own fence object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FenceHandle(u64);

impl FenceHandle {
    /// Wrap a backend fence id.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Backend fence id.
    pub fn id(&self) -> u64 {
        self.0
    }
}

/// Transient allocations owned by one frame slot.
#[derive(Debug, Default)]
pub struct TransientSet {
    /// Backend handles, released once every fence of the slot signals.
    pub handles: Vec<TransientHandle>,
}

impl Poolable for TransientSet {
    fn new_empty() -> Self {
        Self::default()
    }

    fn reset(&mut self) {
        self.handles.clear();
    }
}

/// Per frame-in-flight state.
#[derive(Debug, Default)]
pub struct FrameSlot {
    /// One fence per queue the slot's last frame submitted to.
    pub fences: Vec<FenceHandle>,
    /// Transients allocated for that submission.
    pub transients: Option<TransientSet>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fence_handle_id() {
        let fence = FenceHandle::new(9);
        assert_eq!(fence.id(), 9);
    }

    #[test]
    fn test_transient_set_reset_keeps_capacity() {
        let mut set = TransientSet::new_empty();
        set.handles.push(TransientHandle::new(1));
        set.handles.push(TransientHandle::new(2));
        let capacity = set.handles.capacity();
        set.reset();
        assert!(set.handles.is_empty());
        assert_eq!(set.handles.capacity(), capacity);
    }

    #[test]
    fn test_sync_points_order_semaphores_first() {
        let mut points = vec![
            SyncPoint::RenderFinished,
            SyncPoint::Semaphore(1),
            SyncPoint::ImageAcquired,
            SyncPoint::Semaphore(0),
        ];
        points.sort();
        assert_eq!(points[0], SyncPoint::Semaphore(0));
        assert_eq!(points[1], SyncPoint::Semaphore(1));
    }
}
