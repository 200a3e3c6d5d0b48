//! Command recording for submission batches.
//!
//! Batches are recorded either inline on the frame thread or by a
//! [`RecordingPool`]. Recording order across batches does not matter:
//! ordering between dependent passes comes from the barriers and semaphores
//! the compiler attached to the plan.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};
use framegraph_core::{profile_scope, set_thread_name};

use crate::backend::{BackendResult, CommandList, CommandRecorder};
use crate::compiler::{AttachmentOp, Barrier, BarrierKind, ScheduledPass, SubmissionBatch};
use crate::error::ExecuteError;
use crate::graph::{FrameGraph, PassHandle, PassNode, ResourceHandle, ResourceUsage};

/// What a pass callback sees while its commands are recorded.
pub struct PassContext<'a> {
    graph: &'a FrameGraph,
    pass: &'a PassNode,
    scheduled: &'a ScheduledPass,
    recorder: &'a mut dyn CommandRecorder,
    frame_slot: usize,
}

impl<'a> PassContext<'a> {
    /// Pass name.
    pub fn name(&self) -> &str {
        self.pass.name()
    }

    /// Pass handle.
    pub fn handle(&self) -> PassHandle {
        self.pass.handle()
    }

    /// Per-frame data set through `set_user_data`.
    pub fn user_data(&self) -> u64 {
        self.pass.user_data()
    }

    /// Frame-in-flight slot being recorded.
    pub fn frame_slot(&self) -> usize {
        self.frame_slot
    }

    /// Attachment load/store metadata of this pass.
    pub fn attachments(&self) -> &[AttachmentOp] {
        &self.scheduled.attachments
    }

    /// Position of the pass in the plan.
    pub fn order(&self) -> usize {
        self.scheduled.order
    }

    /// The backend recorder.
    pub fn recorder(&mut self) -> &mut dyn CommandRecorder {
        &mut *self.recorder
    }

    /// Input usage declared under `name`.
    pub fn input(&self, name: &str) -> Option<&ResourceUsage> {
        self.pass.input(name)
    }

    /// Output usage declared under `name`.
    pub fn output(&self, name: &str) -> Option<&ResourceUsage> {
        self.pass.output(name)
    }

    /// Bindless index of a resource, if one was assigned.
    pub fn bindless_index(&self, resource: ResourceHandle) -> Option<u32> {
        self.graph.resource(resource)?.bindless_index()
    }

    /// The graph being executed.
    pub fn graph(&self) -> &FrameGraph {
        self.graph
    }
}

fn record_barrier(recorder: &mut dyn CommandRecorder, barrier: &Barrier) {
    match barrier.kind {
        BarrierKind::Release => recorder.release_barrier(barrier),
        BarrierKind::Transition | BarrierKind::Acquire => recorder.acquire_barrier(barrier),
    }
}

/// Record every pass of one batch, in plan order.
pub(crate) fn record_batch(
    graph: &FrameGraph,
    batch: &SubmissionBatch,
    mut recorder: Box<dyn CommandRecorder>,
    frame_slot: usize,
) -> BackendResult<CommandList> {
    profile_scope!("framegraph: record batch");

    for barrier in &batch.begin_barriers {
        record_barrier(recorder.as_mut(), barrier);
    }

    for scheduled in graph.batch_passes(batch) {
        let Some(pass) = graph.pass(scheduled.pass) else {
            continue;
        };
        for barrier in &scheduled.barriers {
            record_barrier(recorder.as_mut(), barrier);
        }

        log::trace!("recording pass '{}' (batch {})", pass.name(), batch.index);
        recorder.begin_pass(pass.name(), &scheduled.attachments);
        if let Some(callback) = pass.callback() {
            let mut ctx = PassContext {
                graph,
                pass,
                scheduled,
                recorder: recorder.as_mut(),
                frame_slot,
            };
            callback(&mut ctx);
        }
        recorder.end_pass();
    }

    for barrier in &batch.end_barriers {
        record_barrier(recorder.as_mut(), barrier);
    }

    recorder.finish()
}

type RecordOutcome = thread::Result<BackendResult<CommandList>>;

struct RecordJob {
    graph: Arc<FrameGraph>,
    batch: usize,
    recorder: Box<dyn CommandRecorder>,
    frame_slot: usize,
}

struct RecordDone {
    batch: usize,
    outcome: RecordOutcome,
}

/// Fixed pool of threads recording batches in parallel.
///
/// Jobs go through a bounded channel, so the frame thread blocks when every
/// worker is busy and the queue is full. On drop the shutdown flag is set,
/// queued jobs are discarded and the workers are joined.
pub struct RecordingPool {
    jobs: Option<Sender<RecordJob>>,
    results: Receiver<RecordDone>,
    shutdown: Arc<AtomicBool>,
    workers: Vec<JoinHandle<()>>,
}

impl RecordingPool {
    /// Spawn `workers` threads (at least one) fed by a queue of `capacity` jobs.
    pub fn new(workers: usize, capacity: usize) -> Result<Self, ExecuteError> {
        let (job_tx, job_rx) = crossbeam_channel::bounded::<RecordJob>(capacity.max(1));
        let (done_tx, done_rx) = crossbeam_channel::unbounded::<RecordDone>();
        let shutdown = Arc::new(AtomicBool::new(false));

        let mut handles = Vec::with_capacity(workers.max(1));
        for index in 0..workers.max(1) {
            let jobs = job_rx.clone();
            let done = done_tx.clone();
            let shutdown = Arc::clone(&shutdown);
            let handle = thread::Builder::new()
                .name(format!("framegraph-record-{index}"))
                .spawn(move || worker_loop(jobs, done, shutdown))
                .map_err(|e| {
                    log::error!("failed to spawn recording worker {index}: {e}");
                    ExecuteError::RecordingPoolClosed
                })?;
            handles.push(handle);
        }
        log::debug!("recording pool started with {} workers", handles.len());

        Ok(Self {
            jobs: Some(job_tx),
            results: done_rx,
            shutdown,
            workers: handles,
        })
    }

    /// Number of worker threads.
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Record the given batches and return their command lists in the order
    /// of `recorders`.
    ///
    /// Every result is collected before the first error is returned. A
    /// panic inside a pass callback is resumed on the calling thread.
    pub(crate) fn record(
        &self,
        graph: &Arc<FrameGraph>,
        recorders: Vec<(usize, Box<dyn CommandRecorder>)>,
        frame_slot: usize,
    ) -> Result<Vec<CommandList>, ExecuteError> {
        profile_scope!("framegraph: parallel record");

        let jobs = self.jobs.as_ref().ok_or(ExecuteError::RecordingPoolClosed)?;
        let order: Vec<usize> = recorders.iter().map(|(batch, _)| *batch).collect();

        let mut sent = 0;
        for (batch, recorder) in recorders {
            let job = RecordJob {
                graph: Arc::clone(graph),
                batch,
                recorder,
                frame_slot,
            };
            if jobs.send(job).is_err() {
                break;
            }
            sent += 1;
        }

        let mut lists: Vec<Option<CommandList>> = vec![None; order.len()];
        let mut first_error: Option<ExecuteError> = None;
        let mut panic_payload: Option<Box<dyn Any + Send>> = None;
        for _ in 0..sent {
            let Ok(done) = self.results.recv() else {
                first_error.get_or_insert(ExecuteError::RecordingPoolClosed);
                break;
            };
            match done.outcome {
                Ok(Ok(list)) => {
                    if let Some(slot) = order.iter().position(|b| *b == done.batch) {
                        lists[slot] = Some(list);
                    }
                }
                Ok(Err(error)) => {
                    first_error.get_or_insert(error.into());
                }
                Err(payload) => {
                    panic_payload.get_or_insert(payload);
                }
            }
        }

        if let Some(payload) = panic_payload {
            panic::resume_unwind(payload);
        }
        if let Some(error) = first_error {
            return Err(error);
        }
        if sent < order.len() {
            return Err(ExecuteError::RecordingPoolClosed);
        }
        lists
            .into_iter()
            .map(|list| list.ok_or(ExecuteError::RecordingPoolClosed))
            .collect()
    }
}

fn worker_loop(jobs: Receiver<RecordJob>, done: Sender<RecordDone>, shutdown: Arc<AtomicBool>) {
    set_thread_name!("framegraph-record");

    while let Ok(job) = jobs.recv() {
        if shutdown.load(Ordering::Acquire) {
            log::trace!("discarding batch {} during shutdown", job.batch);
            continue;
        }

        let RecordJob {
            graph,
            batch,
            recorder,
            frame_slot,
        } = job;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| match graph.batches().get(batch) {
            Some(plan_batch) => record_batch(&graph, plan_batch, recorder, frame_slot),
            None => recorder.finish(),
        }));
        if done.send(RecordDone { batch, outcome }).is_err() {
            break;
        }
    }
}

impl Drop for RecordingPool {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        // Workers leave their loop once the job channel disconnects.
        self.jobs = None;

        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                log::error!("recording worker panicked during shutdown");
            }
        }
        log::debug!("recording pool stopped");
    }
}

impl std::fmt::Debug for RecordingPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingPool")
            .field("workers", &self.workers.len())
            .field("shutdown", &self.shutdown.load(Ordering::Relaxed))
            .finish()
    }
}
