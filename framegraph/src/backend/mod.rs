//! Backend collaborator interfaces.
//!
//! The compiler and executor never call a graphics API directly. They talk
//! to these traits, with one implementation per backend chosen at startup:
//!
//! - [`Device`] - command recording, transient allocation, submission, fences
//! - [`CommandRecorder`] - barriers and pass brackets for one batch
//! - [`Swapchain`] - image acquisition and presentation
//! - [`BindlessRegistry`] - stable descriptor indices for bindless resources
//!
//! The [`dummy`] backend implements all of them in memory for tests.

#[cfg(feature = "dummy")]
pub mod dummy;
pub mod error;

#[cfg(feature = "dummy")]
pub use dummy::{DummyBackend, DummyBindless, DummySwapchain};
pub use error::{BackendError, BackendResult};

use std::time::Duration;

use crate::compiler::{AttachmentOp, Barrier};
use crate::executor::sync::{FenceHandle, SemaphoreWait, SyncPoint};
use crate::graph::ResourceNode;
use crate::types::QueueType;

/// Recorded commands of one submission batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommandList {
    /// Queue the commands were recorded for.
    pub queue: QueueType,
    /// Batch index in the plan.
    pub batch: usize,
    /// Backend-specific handle.
    pub handle: u64,
}

/// Backend allocation of a transient resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransientHandle(u64);

impl TransientHandle {
    /// Wrap a backend allocation id.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Backend allocation id.
    pub fn id(&self) -> u64 {
        self.0
    }
}

/// Records one batch. Created on the frame thread, may be sent to a worker.
pub trait CommandRecorder: Send {
    /// Record a barrier on the acquiring side: plain transitions and the
    /// acquire half of an ownership transfer.
    fn acquire_barrier(&mut self, barrier: &Barrier);

    /// Record the release half of an ownership transfer.
    fn release_barrier(&mut self, barrier: &Barrier);

    /// Open a pass. Attachments carry folded layout transitions.
    fn begin_pass(&mut self, name: &str, attachments: &[AttachmentOp]);

    /// Close the current pass.
    fn end_pass(&mut self);

    /// Debug label for capture tools.
    fn insert_marker(&mut self, _label: &str) {}

    /// Finish recording.
    fn finish(self: Box<Self>) -> BackendResult<CommandList>;
}

/// One queue submission.
#[derive(Debug, Clone, Copy)]
pub struct Submission<'a> {
    /// Target queue.
    pub queue: QueueType,
    /// Batch index, for diagnostics.
    pub batch: usize,
    /// Commands to execute. `None` for an empty submission.
    pub commands: Option<CommandList>,
    /// Sync points to wait on.
    pub waits: &'a [SemaphoreWait],
    /// Sync points to signal.
    pub signals: &'a [SyncPoint],
    /// Whether to signal a fence the CPU can wait on.
    pub signal_fence: bool,
}

/// Result of a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SubmitResult {
    /// Fence, if one was requested.
    pub fence: Option<FenceHandle>,
}

/// Device and queue collaborator.
pub trait Device: Send + Sync {
    /// Backend name.
    fn name(&self) -> &'static str;

    /// Start recording a batch for `queue`.
    fn create_recorder(&self, queue: QueueType, batch: usize) -> BackendResult<Box<dyn CommandRecorder>>;

    /// Allocate a transient resource for a frame slot. Resources with the
    /// same alias slot may share memory.
    fn create_transient(
        &self,
        resource: &ResourceNode,
        alias_slot: Option<u32>,
        frame_slot: usize,
    ) -> BackendResult<TransientHandle>;

    /// Release a transient once its frame slot's fence has signaled.
    fn release_transient(&self, handle: TransientHandle);

    /// Submit work to a queue.
    fn submit(&self, submission: Submission<'_>) -> BackendResult<SubmitResult>;

    /// Wait for a fence. Returns `false` on timeout.
    fn fence_wait(&self, fence: FenceHandle, timeout: Duration) -> bool;
}

/// Swapchain collaborator.
pub trait Swapchain {
    /// Acquire the next image. Execution waits on
    /// [`SyncPoint::ImageAcquired`] before touching it.
    fn acquire_image(&mut self) -> BackendResult<u32>;

    /// Present an image after [`SyncPoint::RenderFinished`].
    fn present(&mut self, image: u32) -> BackendResult<()>;

    /// Whether the swapchain was recreated (e.g. resized) since the last
    /// frame. Cached graphs built for the old size must be dropped.
    fn was_recreated(&self) -> bool;
}

/// Bindless descriptor collaborator.
pub trait BindlessRegistry {
    /// Stable small index for a bindless resource. Called once per resource.
    fn bindless_index(&mut self, resource: &ResourceNode) -> u32;
}
