//! Frame graph execution.
//!
//! The [`Executor`] drives a compiled [`FrameGraph`] through one frame:
//!
//! 1. Wait for the fence of the frame slot being reused and release the
//!    transients allocated the last time that slot ran.
//! 2. Assign bindless indices, allocate transients.
//! 3. Record every batch, inline or on the [`RecordingPool`].
//! 4. Acquire the swapchain image if the plan presents.
//! 5. Submit batches in plan order; the last batch of each queue signals a
//!    fence kept by the slot.
//! 6. Present.
//!
//! When a submission fails, the queues that already received work get an
//! empty fenced submission, an acquired image is presented anyway, and the
//! slot keeps the transients until those fences signal.
//!
//! A graph that compiled to [`GraphError::NoWorkToDo`] still advances the
//! swapchain through an empty "dummy" submission.

pub mod recorder;
pub mod sync;

pub use recorder::{PassContext, RecordingPool};
pub use sync::{FenceHandle, FrameSlot, SemaphoreWait, SyncPoint, TransientSet};

use std::sync::Arc;
use std::time::Instant;

use framegraph_core::pool::FramePool;
use framegraph_core::{frame_mark, profile_function, profile_plot, profile_scope};

use crate::backend::{BackendError, BindlessRegistry, CommandList, Device, Submission, Swapchain};
use crate::compiler::SubmissionBatch;
use crate::config::FrameGraphConfig;
use crate::error::{ExecuteError, GraphError};
use crate::graph::{FrameGraph, GraphState, ResourceFlags};
use crate::types::{PipelineStages, QueueType};

/// Outcome of one executed frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutedFrame {
    /// Monotonic frame counter at the time of execution.
    pub frame_index: u64,
    /// Frame-in-flight slot used.
    pub slot: usize,
    /// Swapchain image rendered and presented, if any.
    pub image: Option<u32>,
    /// Queue submissions made.
    pub submissions: usize,
    /// The frame had no GPU work and only advanced the swapchain.
    pub dummy_submit: bool,
}

/// Runs compiled graphs on a [`Device`].
pub struct Executor {
    device: Arc<dyn Device>,
    config: FrameGraphConfig,
    slots: Vec<FrameSlot>,
    transients: FramePool<TransientSet>,
    pool: Option<RecordingPool>,
    frame_index: u64,
}

impl Executor {
    /// Create an executor. Spawns the recording pool when
    /// `config.recording_workers` is non-zero.
    pub fn new(device: Arc<dyn Device>, config: FrameGraphConfig) -> Result<Self, ExecuteError> {
        let frames = config.frames_in_flight.max(1);
        let pool = match config.recording_workers {
            0 => None,
            workers => Some(RecordingPool::new(workers, config.recording_queue_capacity)?),
        };
        log::debug!(
            "executor on '{}' backend: {frames} frames in flight, {} recording workers",
            device.name(),
            config.recording_workers
        );

        Ok(Self {
            device,
            slots: (0..frames).map(|_| FrameSlot::default()).collect(),
            transients: FramePool::new(frames),
            pool,
            frame_index: 0,
            config,
        })
    }

    /// Number of frames executed so far.
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// Slot the next frame will use.
    pub fn current_slot(&self) -> usize {
        (self.frame_index % self.slots.len() as u64) as usize
    }

    /// Per-slot state.
    pub fn slots(&self) -> &[FrameSlot] {
        &self.slots
    }

    /// The device.
    pub fn device(&self) -> &Arc<dyn Device> {
        &self.device
    }

    /// Execute one frame of `graph`.
    ///
    /// `swapchain` is required when the plan presents or the graph has no
    /// work to do. `bindless` is asked once per `BINDLESS` resource.
    ///
    /// The swapchain image is acquired only once everything that can fail on
    /// the CPU side succeeded. If a submission fails afterwards, the image is
    /// still presented and every queue that received work is fenced, so the
    /// slot's transients are released only after the GPU is done with them.
    pub fn execute(
        &mut self,
        graph: &Arc<FrameGraph>,
        swapchain: Option<&mut dyn Swapchain>,
        bindless: Option<&mut dyn BindlessRegistry>,
    ) -> Result<ExecutedFrame, ExecuteError> {
        profile_function!();

        let slot = self.current_slot();
        match graph.result() {
            Ok(()) => {}
            Err(GraphError::NoWorkToDo) => {
                if let Some(swapchain) = swapchain {
                    return self.dummy_submit(slot, swapchain);
                }
                log::debug!("graph '{}' has no work and no swapchain, skipping frame", graph.name());
                return Err(GraphError::NoWorkToDo.into());
            }
            Err(error) => return Err(ExecuteError::GraphFailed(error.clone())),
        }

        self.recycle_slot(slot)?;

        let mut swapchain = match (graph.presents(), swapchain) {
            (true, None) => {
                return Err(BackendError::AcquireFailed(format!(
                    "graph '{}' presents but no swapchain was given",
                    graph.name()
                ))
                .into());
            }
            (true, Some(swapchain)) => Some(swapchain),
            (false, _) => None,
        };

        if let Some(registry) = bindless {
            assign_bindless(graph, registry);
        }

        let transients = self.allocate_transients(graph, slot)?;

        let lists = match self.record(graph, slot) {
            Ok(lists) => lists,
            Err(error) => {
                self.release_now(slot, transients);
                return Err(error);
            }
        };

        let image = match swapchain.as_deref_mut().map(|swapchain| swapchain.acquire_image()) {
            None => None,
            Some(Ok(image)) => Some(image),
            Some(Err(error)) => {
                self.release_now(slot, transients);
                return Err(error.into());
            }
        };

        let batches = graph.batches();
        let mut progress = SubmitProgress::default();
        for (index, (batch, list)) in batches.iter().zip(lists).enumerate() {
            // Each queue's last batch fences everything earlier on that queue.
            let signal_fence = batches[index + 1..].iter().all(|later| later.queue != batch.queue);
            let result = self.device.submit(Submission {
                queue: batch.queue,
                batch: batch.index,
                commands: Some(list),
                waits: &batch.waits,
                signals: &batch.signals,
                signal_fence,
            });
            match result {
                Ok(submitted) => progress.submitted(batch, submitted.fence),
                Err(error) => {
                    log::error!(
                        "graph '{}': submission of batch {} failed: {error}",
                        graph.name(),
                        batch.index
                    );
                    let returned = image.zip(swapchain.as_deref_mut());
                    self.abandon_frame(slot, batch.index, transients, progress, returned);
                    return Err(error.into());
                }
            }
        }

        self.slots[slot].fences = progress.fences;
        self.slots[slot].transients = Some(transients);
        graph.set_state(GraphState::Executed);

        let executed = ExecutedFrame {
            frame_index: self.frame_index,
            slot,
            image,
            submissions: batches.len(),
            dummy_submit: false,
        };
        self.frame_index += 1;

        if let (Some(image), Some(swapchain)) = (image, swapchain) {
            swapchain.present(image)?;
        }
        frame_mark!();
        log::trace!(
            "executed graph '{}' in slot {slot}: {} submissions",
            graph.name(),
            executed.submissions
        );
        Ok(executed)
    }

    /// Wait for every in-flight frame and release all transients.
    pub fn wait_idle(&mut self) -> Result<(), ExecuteError> {
        for slot in 0..self.slots.len() {
            self.recycle_slot(slot)?;
        }
        Ok(())
    }

    fn dummy_submit(&mut self, slot: usize, swapchain: &mut dyn Swapchain) -> Result<ExecutedFrame, ExecuteError> {
        self.recycle_slot(slot)?;

        let image = swapchain.acquire_image()?;
        let submitted = self.device.submit(Submission {
            queue: QueueType::Graphics,
            batch: 0,
            commands: None,
            waits: &[SemaphoreWait::new(
                SyncPoint::ImageAcquired,
                PipelineStages::COLOR_ATTACHMENT_OUTPUT,
            )],
            signals: &[SyncPoint::RenderFinished],
            signal_fence: true,
        })?;
        swapchain.present(image)?;

        self.slots[slot].fences.extend(submitted.fence);
        let executed = ExecutedFrame {
            frame_index: self.frame_index,
            slot,
            image: Some(image),
            submissions: 1,
            dummy_submit: true,
        };
        self.frame_index += 1;
        frame_mark!();
        log::debug!("no work to do, dummy submit on slot {slot}");
        Ok(executed)
    }

    /// Clean up after a submission failed part way through a frame.
    ///
    /// The acquired image goes back to the swapchain through an empty
    /// graphics submission, and every queue with unfenced work gets an empty
    /// fenced submission. The transients stay with the slot until those
    /// fences signal, unless nothing of the frame reached the GPU.
    fn abandon_frame<'s>(
        &mut self,
        slot: usize,
        failed_batch: usize,
        transients: TransientSet,
        mut progress: SubmitProgress,
        returned: Option<(u32, &mut (dyn Swapchain + 's))>,
    ) {
        let reached_gpu = progress.reached_gpu();

        if let Some((image, swapchain)) = returned {
            let waits: Vec<SemaphoreWait> = (!progress.image_wait_consumed)
                .then(|| SemaphoreWait::new(SyncPoint::ImageAcquired, PipelineStages::COLOR_ATTACHMENT_OUTPUT))
                .into_iter()
                .collect();
            let signals: Vec<SyncPoint> = (!progress.render_finished)
                .then_some(SyncPoint::RenderFinished)
                .into_iter()
                .collect();
            let flushed = self.device.submit(Submission {
                queue: QueueType::Graphics,
                batch: failed_batch,
                commands: None,
                waits: &waits,
                signals: &signals,
                signal_fence: true,
            });
            match flushed {
                Ok(submitted) => {
                    progress.fences.extend(submitted.fence);
                    progress.unfenced.retain(|queue| *queue != QueueType::Graphics);
                    if let Err(error) = swapchain.present(image) {
                        log::warn!("frame slot {slot}: returning image {image} failed: {error}");
                    }
                }
                Err(error) => log::error!("frame slot {slot}: image {image} not returned: {error}"),
            }
        }

        for queue in std::mem::take(&mut progress.unfenced) {
            let flushed = self.device.submit(Submission {
                queue,
                batch: failed_batch,
                commands: None,
                waits: &[],
                signals: &[],
                signal_fence: true,
            });
            match flushed {
                Ok(submitted) => progress.fences.extend(submitted.fence),
                Err(error) => log::error!("frame slot {slot}: could not fence {} queue: {error}", queue.name()),
            }
        }

        self.slots[slot].fences = progress.fences;
        if reached_gpu {
            self.slots[slot].transients = Some(transients);
        } else {
            self.release_now(slot, transients);
        }
    }

    /// Wait for the slot's fences, then release what the slot still holds.
    fn recycle_slot(&mut self, slot: usize) -> Result<(), ExecuteError> {
        while let Some(&fence) = self.slots[slot].fences.last() {
            profile_scope!("framegraph: fence wait");

            let start = Instant::now();
            let mut attempts = 0u32;
            while !self.device.fence_wait(fence, self.config.fence_timeout) {
                attempts += 1;
                let waited = start.elapsed().max(self.config.fence_timeout * attempts);
                if waited >= self.config.fence_hard_timeout {
                    log::error!("frame slot {slot}: fence not signaled after {waited:?}, device hung");
                    return Err(ExecuteError::DeviceHung { slot, waited });
                }
                log::warn!("frame slot {slot}: still waiting on fence after {waited:?}");
            }
            self.slots[slot].fences.pop();
        }

        if let Some(transients) = self.slots[slot].transients.take() {
            self.release_now(slot, transients);
        }
        Ok(())
    }

    fn release_now(&mut self, slot: usize, mut transients: TransientSet) {
        for handle in transients.handles.drain(..) {
            self.device.release_transient(handle);
        }
        self.transients.recycle(slot, transients);
    }

    fn allocate_transients(&mut self, graph: &FrameGraph, slot: usize) -> Result<TransientSet, ExecuteError> {
        profile_scope!("framegraph: allocate transients");

        let mut transients = self.transients.take(slot);
        for lifetime in graph.lifetimes() {
            let Some(resource) = graph.resource(lifetime.resource) else {
                continue;
            };
            match self.device.create_transient(resource, lifetime.alias_slot, slot) {
                Ok(handle) => transients.handles.push(handle),
                Err(error) => {
                    log::error!("graph '{}': {error}", graph.name());
                    self.release_now(slot, transients);
                    return Err(error.into());
                }
            }
        }
        profile_plot!("framegraph: transients", transients.handles.len());
        Ok(transients)
    }

    fn record(&self, graph: &Arc<FrameGraph>, slot: usize) -> Result<Vec<CommandList>, ExecuteError> {
        let mut recorders = Vec::with_capacity(graph.batches().len());
        for batch in graph.batches() {
            recorders.push((batch.index, self.device.create_recorder(batch.queue, batch.index)?));
        }

        match &self.pool {
            Some(pool) => pool.record(graph, recorders, slot),
            None => {
                profile_scope!("framegraph: inline record");
                graph
                    .batches()
                    .iter()
                    .zip(recorders)
                    .map(|(batch, (_, recorder))| {
                        recorder::record_batch(graph, batch, recorder, slot).map_err(ExecuteError::from)
                    })
                    .collect()
            }
        }
    }
}

/// What reached the GPU during the submission loop.
#[derive(Debug, Default)]
struct SubmitProgress {
    fences: Vec<FenceHandle>,
    /// Queues holding submitted work no fence covers yet.
    unfenced: Vec<QueueType>,
    image_wait_consumed: bool,
    render_finished: bool,
}

impl SubmitProgress {
    fn submitted(&mut self, batch: &SubmissionBatch, fence: Option<FenceHandle>) {
        match fence {
            Some(fence) => {
                self.fences.push(fence);
                self.unfenced.retain(|queue| *queue != batch.queue);
            }
            None if !self.unfenced.contains(&batch.queue) => self.unfenced.push(batch.queue),
            None => {}
        }
        self.image_wait_consumed |= batch.waits.iter().any(|w| w.point == SyncPoint::ImageAcquired);
        self.render_finished |= batch.signals.contains(&SyncPoint::RenderFinished);
    }

    fn reached_gpu(&self) -> bool {
        !self.fences.is_empty() || !self.unfenced.is_empty()
    }
}

fn assign_bindless(graph: &FrameGraph, registry: &mut dyn BindlessRegistry) {
    for resource in graph.resources() {
        if !resource.flags().contains(ResourceFlags::BINDLESS) || resource.is_culled() {
            continue;
        }
        let index = *resource
            .bindless_index
            .get_or_init(|| registry.bindless_index(resource));
        log::trace!("resource '{}' bindless index {index}", resource.name());
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        if let Err(error) = self.wait_idle() {
            log::error!("executor dropped with frames in flight: {error}");
        }
        self.transients.clear();
    }
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("device", &self.device.name())
            .field("frame_index", &self.frame_index)
            .field("slots", &self.slots)
            .field("pool", &self.pool)
            .finish()
    }
}
