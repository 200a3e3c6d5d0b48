//! Dummy backend for testing and development.
//!
//! Performs no GPU work. Everything the executor asks for is recorded in
//! memory so tests can inspect submissions, barriers and allocations.
//! Fences signal immediately unless the backend is told to hang.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use crate::compiler::{AttachmentOp, Barrier};
use crate::executor::sync::{FenceHandle, SemaphoreWait, SyncPoint};
use crate::graph::ResourceNode;
use crate::types::QueueType;

use super::{
    BackendError, BackendResult, BindlessRegistry, CommandList, CommandRecorder, Device,
    Submission, SubmitResult, Swapchain, TransientHandle,
};

/// A command captured by a [`DummyBackend`] recorder.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCommand {
    /// `acquire_barrier` call.
    AcquireBarrier(Barrier),
    /// `release_barrier` call.
    ReleaseBarrier(Barrier),
    /// `begin_pass` call.
    BeginPass {
        /// Pass name.
        name: String,
        /// Attachment metadata.
        attachments: Vec<AttachmentOp>,
    },
    /// `end_pass` call.
    EndPass,
    /// Free-form marker written by a pass callback.
    Marker(String),
}

/// A submission captured by a [`DummyBackend`].
#[derive(Debug, Clone, PartialEq)]
pub struct DummySubmission {
    /// Target queue.
    pub queue: QueueType,
    /// Batch index.
    pub batch: usize,
    /// Commands, empty for a dummy submit.
    pub commands: Vec<RecordedCommand>,
    /// Waited sync points.
    pub waits: Vec<SemaphoreWait>,
    /// Signaled sync points.
    pub signals: Vec<SyncPoint>,
    /// Fence returned, if requested.
    pub fence: Option<FenceHandle>,
}

#[derive(Debug, Default)]
struct DummyState {
    next_id: u64,
    lists: HashMap<u64, Vec<RecordedCommand>>,
    submissions: Vec<DummySubmission>,
    live_transients: HashMap<u64, String>,
    allocations: Vec<(String, Option<u32>, usize)>,
    fence_waits: usize,
    fail_submit_batch: Option<usize>,
}

impl DummyState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Dummy device.
///
/// Cheap to clone; clones share the recorded state.
#[derive(Debug, Clone, Default)]
pub struct DummyBackend {
    state: Arc<Mutex<DummyState>>,
    hung: Arc<AtomicBool>,
    fail_allocations: Arc<AtomicBool>,
}

impl DummyBackend {
    /// Create a new dummy backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every fence wait time out.
    pub fn set_hung(&self, hung: bool) {
        self.hung.store(hung, Ordering::Release);
    }

    /// Make transient allocation fail.
    pub fn set_fail_allocations(&self, fail: bool) {
        self.fail_allocations.store(fail, Ordering::Release);
    }

    /// Make the submission of the given batch's command list fail. Empty
    /// submissions still go through.
    pub fn set_fail_submit(&self, batch: Option<usize>) {
        self.state.lock().fail_submit_batch = batch;
    }

    /// Submissions so far, in order.
    pub fn submissions(&self) -> Vec<DummySubmission> {
        self.state.lock().submissions.clone()
    }

    /// Drain recorded submissions.
    pub fn take_submissions(&self) -> Vec<DummySubmission> {
        std::mem::take(&mut self.state.lock().submissions)
    }

    /// Transients allocated and not yet released.
    pub fn live_transients(&self) -> usize {
        self.state.lock().live_transients.len()
    }

    /// Every allocation as (resource name, alias slot, frame slot).
    pub fn allocations(&self) -> Vec<(String, Option<u32>, usize)> {
        self.state.lock().allocations.clone()
    }

    /// Number of `fence_wait` calls.
    pub fn fence_waits(&self) -> usize {
        self.state.lock().fence_waits
    }
}

impl Device for DummyBackend {
    fn name(&self) -> &'static str {
        "Dummy"
    }

    fn create_recorder(&self, queue: QueueType, batch: usize) -> BackendResult<Box<dyn CommandRecorder>> {
        Ok(Box::new(DummyRecorder {
            state: Arc::clone(&self.state),
            queue,
            batch,
            commands: Vec::new(),
        }))
    }

    fn create_transient(
        &self,
        resource: &ResourceNode,
        alias_slot: Option<u32>,
        frame_slot: usize,
    ) -> BackendResult<TransientHandle> {
        if self.fail_allocations.load(Ordering::Acquire) {
            return Err(BackendError::TransientAllocationFailed {
                resource: resource.name().to_string(),
                reason: "allocation failure requested".into(),
            });
        }
        let mut state = self.state.lock();
        let id = state.next_id();
        state.live_transients.insert(id, resource.name().to_string());
        state
            .allocations
            .push((resource.name().to_string(), alias_slot, frame_slot));
        log::trace!(
            "DummyBackend: allocating transient '{}' (alias slot {alias_slot:?}, frame slot {frame_slot})",
            resource.name()
        );
        Ok(TransientHandle::new(id))
    }

    fn release_transient(&self, handle: TransientHandle) {
        let released = self.state.lock().live_transients.remove(&handle.id());
        log::trace!("DummyBackend: releasing transient {released:?}");
    }

    fn submit(&self, submission: Submission<'_>) -> BackendResult<SubmitResult> {
        let mut state = self.state.lock();
        let commands = match submission.commands {
            Some(list) => state.lists.remove(&list.handle).ok_or_else(|| {
                BackendError::SubmitFailed(format!("unknown command list {}", list.handle))
            })?,
            None => Vec::new(),
        };
        if submission.commands.is_some() && state.fail_submit_batch == Some(submission.batch) {
            return Err(BackendError::SubmitFailed(format!(
                "submit failure requested for batch {}",
                submission.batch
            )));
        }
        let fence = submission
            .signal_fence
            .then(|| FenceHandle::new(state.next_id()));

        log::trace!(
            "DummyBackend: submit batch {} on {} ({} commands, {} waits, {} signals)",
            submission.batch,
            submission.queue.name(),
            commands.len(),
            submission.waits.len(),
            submission.signals.len()
        );
        state.submissions.push(DummySubmission {
            queue: submission.queue,
            batch: submission.batch,
            commands,
            waits: submission.waits.to_vec(),
            signals: submission.signals.to_vec(),
            fence,
        });
        Ok(SubmitResult { fence })
    }

    fn fence_wait(&self, fence: FenceHandle, timeout: Duration) -> bool {
        self.state.lock().fence_waits += 1;
        let hung = self.hung.load(Ordering::Acquire);
        log::trace!("DummyBackend: waiting on fence {} ({timeout:?}), hung: {hung}", fence.id());
        !hung
    }
}

struct DummyRecorder {
    state: Arc<Mutex<DummyState>>,
    queue: QueueType,
    batch: usize,
    commands: Vec<RecordedCommand>,
}

impl CommandRecorder for DummyRecorder {
    fn acquire_barrier(&mut self, barrier: &Barrier) {
        self.commands.push(RecordedCommand::AcquireBarrier(*barrier));
    }

    fn release_barrier(&mut self, barrier: &Barrier) {
        self.commands.push(RecordedCommand::ReleaseBarrier(*barrier));
    }

    fn begin_pass(&mut self, name: &str, attachments: &[AttachmentOp]) {
        self.commands.push(RecordedCommand::BeginPass {
            name: name.to_string(),
            attachments: attachments.to_vec(),
        });
    }

    fn end_pass(&mut self) {
        self.commands.push(RecordedCommand::EndPass);
    }

    fn insert_marker(&mut self, label: &str) {
        self.commands.push(RecordedCommand::Marker(label.to_string()));
    }

    fn finish(self: Box<Self>) -> BackendResult<CommandList> {
        let DummyRecorder {
            state,
            queue,
            batch,
            commands,
        } = *self;
        let mut state = state.lock();
        let handle = state.next_id();
        state.lists.insert(handle, commands);
        Ok(CommandList {
            queue,
            batch,
            handle,
        })
    }
}

/// Dummy swapchain cycling through a fixed number of images.
#[derive(Debug, Clone, Default)]
pub struct DummySwapchain {
    image_count: u32,
    next_image: u32,
    acquired: Vec<u32>,
    presented: Vec<u32>,
    recreated: bool,
    fail_acquire: bool,
}

impl DummySwapchain {
    /// Create a swapchain with `image_count` images (at least 1).
    pub fn new(image_count: u32) -> Self {
        Self {
            image_count: image_count.max(1),
            ..Default::default()
        }
    }

    /// Simulate a resize.
    pub fn recreate(&mut self) {
        self.recreated = true;
        self.next_image = 0;
    }

    /// Make the next acquisitions fail.
    pub fn set_fail_acquire(&mut self, fail: bool) {
        self.fail_acquire = fail;
    }

    /// Acquired image indices, in order.
    pub fn acquired(&self) -> &[u32] {
        &self.acquired
    }

    /// Presented image indices, in order.
    pub fn presented(&self) -> &[u32] {
        &self.presented
    }
}

impl Swapchain for DummySwapchain {
    fn acquire_image(&mut self) -> BackendResult<u32> {
        if self.fail_acquire {
            return Err(BackendError::AcquireFailed("acquire failure requested".into()));
        }
        let image = self.next_image;
        self.next_image = (self.next_image + 1) % self.image_count;
        self.acquired.push(image);
        Ok(image)
    }

    fn present(&mut self, image: u32) -> BackendResult<()> {
        self.presented.push(image);
        // The new swapchain has been seen once it presents.
        self.recreated = false;
        Ok(())
    }

    fn was_recreated(&self) -> bool {
        self.recreated
    }
}

/// Dummy bindless registry handing out sequential indices.
#[derive(Debug, Clone, Default)]
pub struct DummyBindless {
    next: u32,
    requests: Vec<String>,
}

impl DummyBindless {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of resources indices were requested for, in order.
    pub fn requests(&self) -> &[String] {
        &self.requests
    }
}

impl BindlessRegistry for DummyBindless {
    fn bindless_index(&mut self, resource: &ResourceNode) -> u32 {
        let index = self.next;
        self.next += 1;
        self.requests.push(resource.name().to_string());
        index
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dummy_backend_name() {
        let backend = DummyBackend::new();
        assert_eq!(backend.name(), "Dummy");
    }

    #[test]
    fn test_recorder_roundtrip_through_submit() {
        let backend = DummyBackend::new();
        let mut recorder = backend.create_recorder(QueueType::Graphics, 0).unwrap();
        recorder.begin_pass("clear", &[]);
        recorder.end_pass();
        let list = recorder.finish().unwrap();

        let result = backend
            .submit(Submission {
                queue: QueueType::Graphics,
                batch: 0,
                commands: Some(list),
                waits: &[],
                signals: &[],
                signal_fence: true,
            })
            .unwrap();
        assert!(result.fence.is_some());

        let submissions = backend.submissions();
        assert_eq!(submissions.len(), 1);
        assert_eq!(submissions[0].commands.len(), 2);
    }

    #[test]
    fn test_hung_fence_times_out() {
        let backend = DummyBackend::new();
        let fence = FenceHandle::new(1);
        assert!(backend.fence_wait(fence, Duration::from_millis(1)));
        backend.set_hung(true);
        assert!(!backend.fence_wait(fence, Duration::from_millis(1)));
        assert_eq!(backend.fence_waits(), 2);
    }

    #[test]
    fn test_swapchain_cycles_images() {
        let mut swapchain = DummySwapchain::new(2);
        assert_eq!(swapchain.acquire_image().unwrap(), 0);
        assert_eq!(swapchain.acquire_image().unwrap(), 1);
        assert_eq!(swapchain.acquire_image().unwrap(), 0);

        swapchain.recreate();
        assert!(swapchain.was_recreated());
        swapchain.present(0).unwrap();
        assert!(!swapchain.was_recreated());
    }
}
