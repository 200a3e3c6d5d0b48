//! Transient resource lifetimes and memory aliasing.

use framegraph_core::profile_scope;

use crate::graph::resource::{ResourceFlags, ResourceHandle, ResourceNode};
use crate::types::{QueueType, ResourceKind};

use super::schedule::Schedule;

/// Creation and release points of a transient resource.
///
/// Points are positions in the flattened schedule, inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransientLifetime {
    /// The transient resource.
    pub resource: ResourceHandle,
    /// Allocate before this pass.
    pub create_point: usize,
    /// Release after this pass.
    pub free_point: usize,
    /// Shared memory slot, if the resource may alias others.
    pub alias_slot: Option<u32>,
}

impl TransientLifetime {
    /// Whether two lifetimes share at least one pass.
    pub fn overlaps(&self, other: &TransientLifetime) -> bool {
        self.create_point <= other.free_point && other.create_point <= self.free_point
    }
}

struct AliasSlot {
    kind: ResourceKind,
    queue: QueueType,
    free_point: usize,
}

/// Compute lifetimes of live transients and assign alias slots.
pub(crate) fn compute_lifetimes(resources: &[ResourceNode], schedule: &Schedule) -> Vec<TransientLifetime> {
    profile_scope!("framegraph: lifetimes");

    let graph_end = schedule.pass_order.len().saturating_sub(1);
    let mut lifetimes: Vec<TransientLifetime> = resources
        .iter()
        .filter(|r| r.is_transient() && !r.culled)
        .filter_map(|resource| {
            let create_point = resource.first_usage?;
            let last_usage = resource.last_usage?;
            let keep_alive = resource.is_essential()
                && !resource.flags.contains(ResourceFlags::RELEASE_AFTER_USE);
            Some(TransientLifetime {
                resource: resource.handle,
                create_point,
                free_point: if keep_alive { graph_end } else { last_usage },
                alias_slot: None,
            })
        })
        .collect();

    let mut candidates: Vec<usize> = (0..lifetimes.len())
        .filter(|&i| can_alias(&resources[lifetimes[i].resource.index()]))
        .collect();
    candidates.sort_by_key(|&i| (lifetimes[i].create_point, lifetimes[i].resource));

    let mut slots: Vec<AliasSlot> = Vec::new();
    for index in candidates {
        let resource = &resources[lifetimes[index].resource.index()];
        let Some(queue) = single_queue(resource) else {
            continue;
        };
        let lifetime = &mut lifetimes[index];

        let reuse = slots.iter().position(|slot| {
            slot.kind == resource.kind && slot.queue == queue && slot.free_point < lifetime.create_point
        });
        let slot = match reuse {
            Some(slot) => {
                slots[slot].free_point = lifetime.free_point;
                slot
            }
            None => {
                slots.push(AliasSlot {
                    kind: resource.kind,
                    queue,
                    free_point: lifetime.free_point,
                });
                slots.len() - 1
            }
        };
        lifetime.alias_slot = Some(slot as u32);
        log::trace!("transient '{}' -> alias slot {slot}", resource.name);
    }

    log::debug!(
        "{} transient lifetimes, {} alias slots",
        lifetimes.len(),
        slots.len()
    );
    lifetimes
}

/// Essential outputs are observed after the graph and never share memory.
fn can_alias(resource: &ResourceNode) -> bool {
    resource.flags.contains(ResourceFlags::ALIASABLE) && !resource.is_essential()
}

/// Queues may overlap in time, so only single-queue resources alias.
fn single_queue(resource: &ResourceNode) -> Option<QueueType> {
    let first = resource.journey.first()?.queue;
    resource
        .journey
        .iter()
        .all(|entry| entry.queue == first)
        .then_some(first)
}
