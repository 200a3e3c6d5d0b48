//! Barrier synthesis over resource journeys.
//!
//! Each resource's live usages are walked in schedule order. Between two
//! adjacent usages a barrier is needed when the image layout changes, when
//! either side writes, or when the queue family changes. Runs of reads in
//! the same layout share one accumulated source state, so the next writer
//! waits on all of them with a single barrier.
//!
//! With native render passes, an attachment's layout change is folded into
//! the pass when nothing else needs ordering. Any read/write hazard keeps an
//! explicit barrier.

use framegraph_core::profile_scope;

use crate::config::FrameGraphConfig;
use crate::graph::pass::PassNode;
use crate::graph::resource::{JourneyEntry, ResourceHandle, ResourceNode, ResourceState};
use crate::graph::GraphNodes;
use crate::types::{
    AccessFlags, AspectMask, ClearValue, LoadOp, PipelineStages, StoreOp, TextureLayout,
};

use super::lifetime::TransientLifetime;
use super::schedule::{Schedule, ScheduledPass};

/// How the backend must record a barrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BarrierKind {
    /// Plain transition on one queue.
    Transition,
    /// Release half of an ownership transfer, on the source queue.
    Release,
    /// Acquire half of an ownership transfer, on the destination queue.
    Acquire,
}

/// A resource transition between two usages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Barrier {
    /// The resource.
    pub resource: ResourceHandle,
    /// Recording side.
    pub kind: BarrierKind,
    /// Stages that must complete.
    pub src_stages: PipelineStages,
    /// Stages that must wait.
    pub dst_stages: PipelineStages,
    /// Access made available.
    pub src_access: AccessFlags,
    /// Access made visible.
    pub dst_access: AccessFlags,
    /// Layout before ([`TextureLayout::Undefined`] for buffers).
    pub old_layout: TextureLayout,
    /// Layout after ([`TextureLayout::Undefined`] for buffers).
    pub new_layout: TextureLayout,
    /// Queue family releasing the resource.
    pub src_queue_family: u32,
    /// Queue family acquiring the resource.
    pub dst_queue_family: u32,
    /// Image aspects, empty for buffers.
    pub aspect: AspectMask,
}

impl Barrier {
    /// Whether the barrier changes the image layout.
    pub fn is_layout_transition(&self) -> bool {
        self.old_layout != self.new_layout
    }

    /// Whether the barrier transfers queue family ownership.
    pub fn is_ownership_transfer(&self) -> bool {
        self.src_queue_family != self.dst_queue_family
    }
}

/// Attachment metadata for backends with native render passes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AttachmentOp {
    /// The attachment resource.
    pub resource: ResourceHandle,
    /// Layout at render pass begin. Differs from `layout` when the
    /// transition was folded into the render pass.
    pub initial_layout: TextureLayout,
    /// Layout used during the pass.
    pub layout: TextureLayout,
    /// Load operation.
    pub load_op: LoadOp,
    /// Store operation.
    pub store_op: StoreOp,
    /// Clear value for [`LoadOp::Clear`].
    pub clear_value: Option<ClearValue>,
    /// Image aspects.
    pub aspect: AspectMask,
}

/// Build the journey of every live resource and record its usage span.
pub(crate) fn build_journeys(nodes: &mut GraphNodes, schedule: &Schedule, config: &FrameGraphConfig) {
    let GraphNodes { passes, resources, .. } = nodes;
    for resource in resources.iter_mut().filter(|r| !r.culled) {
        resource.journey = build_journey(resource.handle, passes, &schedule.pass_order);
        for entry in resource.journey.iter_mut() {
            entry.queue_family = config.queue_families.family(entry.queue);
        }
        resource.first_usage = resource.journey.first().map(|e| e.order);
        resource.last_usage = resource.journey.last().map(|e| e.order);
    }
}

/// Place barriers for every live resource.
///
/// A transient that takes over an alias slot starts from the final scope of
/// the previous owner, so its first usage waits for the old contents to be
/// done with the memory. Resources are walked in order of first usage so the
/// previous owner's final state is known by then.
pub(crate) fn synthesize(
    nodes: &mut GraphNodes,
    schedule: &mut Schedule,
    config: &FrameGraphConfig,
    lifetimes: &[TransientLifetime],
) {
    profile_scope!("framegraph: barriers");

    let GraphNodes { resources, swapchain, .. } = nodes;
    let predecessors = alias_predecessors(resources.len(), lifetimes);
    let mut order: Vec<usize> = (0..resources.len()).collect();
    order.sort_by_key(|&i| (resources[i].first_usage.is_none(), resources[i].first_usage, i));

    let mut barrier_count = 0usize;
    for index in order {
        let initial = match predecessors[index] {
            Some(previous) => resources[previous.index()].final_state.map(|state| {
                log::trace!(
                    "'{}' takes over memory of '{}'",
                    resources[index].name,
                    resources[previous.index()].name
                );
                ResourceState {
                    layout: TextureLayout::Undefined,
                    ..state
                }
            }),
            None => resources[index].initial_state(|queue| config.queue_families.family(queue)),
        };
        let resource = &mut resources[index];
        if resource.culled {
            resource.final_state = initial;
            continue;
        }
        let presents = *swapchain == Some(resource.handle);
        barrier_count += walk_journey(resource, initial, schedule, config, presents);
    }

    log::debug!("synthesized {barrier_count} barriers");
}

/// For every resource, the transient that used its alias slot right before it.
fn alias_predecessors(resource_count: usize, lifetimes: &[TransientLifetime]) -> Vec<Option<ResourceHandle>> {
    let mut aliased: Vec<&TransientLifetime> = lifetimes.iter().filter(|l| l.alias_slot.is_some()).collect();
    aliased.sort_by_key(|l| (l.alias_slot, l.create_point));

    let mut predecessors = vec![None; resource_count];
    for pair in aliased.windows(2) {
        if pair[0].alias_slot == pair[1].alias_slot {
            predecessors[pair[1].resource.index()] = Some(pair[0].resource);
        }
    }
    predecessors
}

/// Merge each scheduled pass's usages of `resource` into one entry.
fn build_journey(
    resource: ResourceHandle,
    passes: &[PassNode],
    pass_order: &[ScheduledPass],
) -> Vec<JourneyEntry> {
    let mut journey = Vec::new();
    for scheduled in pass_order {
        let pass = &passes[scheduled.pass.index()];
        let mut entry: Option<JourneyEntry> = None;
        for usage in pass.usages().filter(|u| u.resource == resource) {
            match entry.as_mut() {
                None => {
                    entry = Some(JourneyEntry {
                        pass: scheduled.pass,
                        order: scheduled.order,
                        batch: scheduled.batch,
                        queue: pass.queue,
                        queue_family: 0,
                        stages: usage.stages,
                        access: usage.access,
                        layout: usage.layout,
                        load_op: usage.load_op,
                        store_op: usage.store_op,
                        clear_value: usage.clear_value,
                    });
                }
                Some(entry) => {
                    entry.stages |= usage.stages;
                    entry.access |= usage.access;
                    // Outputs come last and decide the layout and attachment ops.
                    if usage.is_output {
                        entry.layout = usage.layout;
                        entry.load_op = usage.load_op;
                        entry.store_op = usage.store_op;
                        entry.clear_value = usage.clear_value;
                    }
                }
            }
        }
        journey.extend(entry);
    }
    journey
}

/// Place barriers for one resource. Returns how many were emitted.
fn walk_journey(
    resource: &mut ResourceNode,
    initial: Option<ResourceState>,
    schedule: &mut Schedule,
    config: &FrameGraphConfig,
    presents: bool,
) -> usize {
    let is_image = resource.kind.is_image();
    let aspect = resource.aspect_mask();

    let Some(first) = resource.journey.first() else {
        resource.final_state = initial;
        return 0;
    };

    let mut state = initial.unwrap_or(ResourceState {
        layout: TextureLayout::Undefined,
        access: AccessFlags::empty(),
        stages: PipelineStages::empty(),
        queue_family: first.queue_family,
    });
    let mut last_batch: Option<usize> = None;
    let mut emitted = 0;

    for entry in &resource.journey {
        let layout = if is_image {
            entry.layout
        } else {
            TextureLayout::Undefined
        };
        let layout_change = is_image && state.layout != layout;
        let family_change = state.queue_family != entry.queue_family;
        let hazard =
            !state.access.is_empty() && (state.access.has_writes() || entry.access.has_writes());
        let attachment = is_image && layout.is_attachment();

        if !(layout_change || family_change || hazard) {
            // Read after read in the same layout: widen the source scope.
            state.access |= entry.access;
            state.stages |= entry.stages;
            last_batch = Some(entry.batch);
            if attachment {
                push_attachment(schedule, entry, resource.handle, layout, layout, aspect);
            }
            continue;
        }

        let barrier = Barrier {
            resource: resource.handle,
            kind: BarrierKind::Transition,
            src_stages: if state.stages.is_empty() {
                PipelineStages::TOP_OF_PIPE
            } else {
                state.stages
            },
            dst_stages: entry.stages,
            src_access: state.access,
            dst_access: entry.access,
            old_layout: state.layout,
            new_layout: layout,
            src_queue_family: state.queue_family,
            dst_queue_family: entry.queue_family,
            aspect,
        };

        let mut initial_layout = layout;
        if family_change {
            // Without a source batch the caller released ownership before the graph.
            if let Some(src) = last_batch {
                schedule.batches[src].end_barriers.push(Barrier {
                    kind: BarrierKind::Release,
                    ..barrier
                });
                schedule.link(src, entry.batch, entry.stages);
            }
            schedule.batches[entry.batch].begin_barriers.push(Barrier {
                kind: BarrierKind::Acquire,
                ..barrier
            });
            emitted += 1;
        } else if config.native_render_passes && attachment && !hazard {
            // Only a pure layout change folds; the render pass carries no
            // memory dependency.
            initial_layout = state.layout;
            log::trace!(
                "folded {:?} -> {:?} of '{}' into render pass",
                state.layout,
                layout,
                resource.name
            );
        } else {
            schedule.pass_order[entry.order].barriers.push(barrier);
            emitted += 1;
        }
        if attachment {
            push_attachment(schedule, entry, resource.handle, initial_layout, layout, aspect);
        }

        state = ResourceState {
            layout,
            access: entry.access,
            stages: entry.stages,
            queue_family: entry.queue_family,
        };
        last_batch = Some(entry.batch);
    }

    if presents && let Some(batch) = last_batch {
        schedule.batches[batch].end_barriers.push(Barrier {
            resource: resource.handle,
            kind: BarrierKind::Transition,
            src_stages: state.stages,
            dst_stages: PipelineStages::BOTTOM_OF_PIPE,
            src_access: state.access,
            dst_access: AccessFlags::empty(),
            old_layout: state.layout,
            new_layout: TextureLayout::PresentSrc,
            src_queue_family: state.queue_family,
            dst_queue_family: state.queue_family,
            aspect,
        });
        emitted += 1;
        state = ResourceState {
            layout: TextureLayout::PresentSrc,
            access: AccessFlags::empty(),
            stages: PipelineStages::BOTTOM_OF_PIPE,
            queue_family: state.queue_family,
        };
    }

    resource.final_state = Some(state);
    emitted
}

fn push_attachment(
    schedule: &mut Schedule,
    entry: &JourneyEntry,
    resource: ResourceHandle,
    initial_layout: TextureLayout,
    layout: TextureLayout,
    aspect: AspectMask,
) {
    schedule.pass_order[entry.order].attachments.push(AttachmentOp {
        resource,
        initial_layout,
        layout,
        load_op: entry.load_op,
        store_op: entry.store_op,
        clear_value: entry.clear_value,
        aspect,
    });
}
