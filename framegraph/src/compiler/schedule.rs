//! Level assignment, submission batches and queue synchronization.

use std::collections::BTreeMap;

use fixedbitset::FixedBitSet;
use framegraph_core::profile_scope;

use crate::config::FrameGraphConfig;
use crate::executor::sync::{SemaphoreWait, SyncPoint};
use crate::graph::pass::PassHandle;
use crate::graph::GraphNodes;
use crate::types::{PipelineStages, QueueType};

use super::barriers::{AttachmentOp, Barrier};
use super::validate::DependencyGraph;

/// A live pass in schedule order.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledPass {
    /// The pass.
    pub pass: PassHandle,
    /// Position in the flattened schedule.
    pub order: usize,
    /// Submission batch index.
    pub batch: usize,
    /// Topological level (wave).
    pub level: u32,
    /// Barriers recorded right before the pass.
    pub barriers: Vec<Barrier>,
    /// Attachment load/store metadata for render pass backends.
    pub attachments: Vec<AttachmentOp>,
}

/// Same-level passes destined for one queue.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmissionBatch {
    /// Index in submission order.
    pub index: usize,
    /// Wave this batch belongs to.
    pub level: u32,
    /// Target queue.
    pub queue: QueueType,
    /// Queue family of the target queue.
    pub queue_family: u32,
    /// Passes in recording order.
    pub passes: Vec<PassHandle>,
    /// Position of the first pass in the flattened schedule.
    pub first_pass: usize,
    /// Sync points waited on before the batch starts.
    pub waits: Vec<SemaphoreWait>,
    /// Sync points signaled when the batch completes.
    pub signals: Vec<SyncPoint>,
    /// Ownership acquire barriers recorded at the start of the batch.
    pub begin_barriers: Vec<Barrier>,
    /// Ownership release and present barriers recorded at the end.
    pub end_barriers: Vec<Barrier>,
    /// The batch is the first to touch the swapchain image.
    pub acquires_swapchain: bool,
    /// The swapchain image is presented after this batch.
    pub presents: bool,
}

impl SubmissionBatch {
    fn new(index: usize, level: u32, queue: QueueType, queue_family: u32, first_pass: usize) -> Self {
        Self {
            index,
            level,
            queue,
            queue_family,
            passes: Vec::new(),
            first_pass,
            waits: Vec::new(),
            signals: Vec::new(),
            begin_barriers: Vec::new(),
            end_barriers: Vec::new(),
            acquires_swapchain: false,
            presents: false,
        }
    }
}

/// Batches sharing a topological level; they may run concurrently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Wave {
    /// Level of every pass in the wave.
    pub level: u32,
    /// Batch indices, at most one per queue type.
    pub batches: Vec<usize>,
}

/// Scheduler output, refined in place by the barrier synthesizer.
#[derive(Debug, Default)]
pub(crate) struct Schedule {
    pub pass_order: Vec<ScheduledPass>,
    pub batches: Vec<SubmissionBatch>,
    pub waves: Vec<Wave>,
    pub pass_slots: Vec<Option<usize>>,
    pub semaphore_count: u32,
    links: BTreeMap<(usize, usize), u32>,
}

impl Schedule {
    /// Make `dst` wait on `src` through a binary semaphore.
    ///
    /// Batches on the same queue are ordered by submission already.
    pub(crate) fn link(&mut self, src: usize, dst: usize, stages: PipelineStages) {
        if src == dst || self.batches[src].queue == self.batches[dst].queue {
            return;
        }
        if let Some(&id) = self.links.get(&(src, dst)) {
            if let Some(wait) = self.batches[dst]
                .waits
                .iter_mut()
                .find(|w| w.point == SyncPoint::Semaphore(id))
            {
                wait.stages |= stages;
            }
            return;
        }

        let id = self.semaphore_count;
        self.semaphore_count += 1;
        self.links.insert((src, dst), id);
        self.batches[src].signals.push(SyncPoint::Semaphore(id));
        self.batches[dst]
            .waits
            .push(SemaphoreWait::new(SyncPoint::Semaphore(id), stages));
        log::trace!("semaphore {id}: batch {src} -> batch {dst}");
    }

    /// Batch index of a live pass.
    pub(crate) fn batch_of(&self, pass: usize) -> Option<usize> {
        self.pass_slots[pass].map(|order| self.pass_order[order].batch)
    }
}

/// Assign levels and build per-queue batches for the live passes.
pub(crate) fn schedule(
    nodes: &GraphNodes,
    deps: &DependencyGraph,
    live: &FixedBitSet,
    config: &FrameGraphConfig,
) -> Schedule {
    profile_scope!("framegraph: schedule");

    let passes = &nodes.passes;
    let mut levels = vec![0u32; passes.len()];
    for &pass in deps.topo_order() {
        if !live.contains(pass) {
            continue;
        }
        levels[pass] = deps
            .predecessors(pass)
            .iter()
            .filter(|&&p| live.contains(p))
            .map(|&p| levels[p] + 1)
            .max()
            .unwrap_or(0);
    }

    let mut ordered: Vec<usize> = live.ones().collect();
    ordered.sort_by_key(|&p| (levels[p], passes[p].queue.index(), p));

    let mut schedule = Schedule {
        pass_slots: vec![None; passes.len()],
        ..Default::default()
    };

    for &pass in &ordered {
        let level = levels[pass];
        let queue = passes[pass].queue;
        let order = schedule.pass_order.len();

        let same_batch = schedule
            .batches
            .last()
            .is_some_and(|b| b.level == level && b.queue == queue);
        if !same_batch {
            let index = schedule.batches.len();
            schedule.batches.push(SubmissionBatch::new(
                index,
                level,
                queue,
                config.queue_families.family(queue),
                order,
            ));
            match schedule.waves.last_mut() {
                Some(wave) if wave.level == level => wave.batches.push(index),
                _ => schedule.waves.push(Wave {
                    level,
                    batches: vec![index],
                }),
            }
        }

        let batch = schedule.batches.len() - 1;
        schedule.batches[batch].passes.push(PassHandle::new(pass as u32));
        schedule.pass_slots[pass] = Some(order);
        schedule.pass_order.push(ScheduledPass {
            pass: PassHandle::new(pass as u32),
            order,
            batch,
            level,
            barriers: Vec::new(),
            attachments: Vec::new(),
        });
    }

    link_queues(&mut schedule, nodes, deps, live);
    schedule_swapchain(&mut schedule, nodes);
    merge_timelines(&mut schedule, nodes);

    log::debug!(
        "scheduled {} passes into {} batches over {} waves",
        schedule.pass_order.len(),
        schedule.batches.len(),
        schedule.waves.len()
    );
    schedule
}

/// Every dependency edge crossing queues becomes a semaphore.
fn link_queues(schedule: &mut Schedule, nodes: &GraphNodes, deps: &DependencyGraph, live: &FixedBitSet) {
    for pass in live.ones() {
        let Some(src) = schedule.batch_of(pass) else {
            continue;
        };
        for &succ in deps.successors(pass) {
            let Some(dst) = schedule.batch_of(succ) else {
                continue;
            };
            schedule.link(src, dst, nodes.passes[succ].stages());
        }
    }
}

/// The first swapchain user waits for acquisition; the last one presents.
fn schedule_swapchain(schedule: &mut Schedule, nodes: &GraphNodes) {
    let Some(swapchain) = nodes.swapchain else {
        return;
    };
    let users: Vec<(usize, PipelineStages)> = schedule
        .pass_order
        .iter()
        .filter_map(|scheduled| {
            let stages = nodes.passes[scheduled.pass.index()]
                .usages()
                .filter(|u| u.resource == swapchain)
                .fold(PipelineStages::empty(), |acc, u| acc | u.stages);
            (!stages.is_empty()).then_some((scheduled.batch, stages))
        })
        .collect();

    let (Some(&(first, stages)), Some(&(last, _))) = (users.first(), users.last()) else {
        return;
    };

    let first_batch = &mut schedule.batches[first];
    first_batch.acquires_swapchain = true;
    first_batch
        .waits
        .push(SemaphoreWait::new(SyncPoint::ImageAcquired, stages));

    let last_batch = &mut schedule.batches[last];
    last_batch.presents = true;
    last_batch.signals.push(SyncPoint::RenderFinished);
}

/// Attach external timeline waits/signals to the owning batches.
fn merge_timelines(schedule: &mut Schedule, nodes: &GraphNodes) {
    let mut orphaned = Vec::new();

    for pass in &nodes.passes {
        match schedule.batch_of(pass.handle.index()) {
            Some(batch) => {
                let batch = &mut schedule.batches[batch];
                for wait in &pass.timeline_waits {
                    batch.waits.push(SemaphoreWait::new(
                        SyncPoint::Timeline {
                            timeline: wait.timeline,
                            value: wait.value,
                        },
                        wait.stages,
                    ));
                }
                for signal in &pass.timeline_signals {
                    batch.signals.push(SyncPoint::Timeline {
                        timeline: signal.timeline,
                        value: signal.value,
                    });
                }
            }
            None => {
                for wait in &pass.timeline_waits {
                    log::warn!(
                        "dropping timeline wait {}:{} of culled pass '{}'",
                        wait.timeline,
                        wait.value,
                        pass.name
                    );
                }
                orphaned.extend(pass.timeline_signals.iter().copied());
            }
        }
    }

    if orphaned.is_empty() {
        return;
    }
    // External waiters must still make progress.
    if let Some(last) = schedule.batches.last_mut() {
        log::debug!(
            "moving {} timeline signals of culled passes to batch {}",
            orphaned.len(),
            last.index
        );
        last.signals
            .extend(orphaned.into_iter().map(|signal| SyncPoint::Timeline {
                timeline: signal.timeline,
                value: signal.value,
            }));
    }
}
