//! Dead pass and resource elimination.
//!
//! Reference counts live on resource versions. A pass whose outputs are all
//! unreferenced is removed, which releases the versions it reads, which may
//! in turn orphan their writers. The worklist runs to a fixed point.

use std::collections::{BTreeSet, VecDeque};
use std::fmt;

use fixedbitset::FixedBitSet;
use framegraph_core::profile_scope;

use crate::error::{GraphError, GraphResult};
use crate::graph::pass::{PassFlags, PassHandle, PassNode};
use crate::graph::resource::{ResourceHandle, ResourceNode};
use crate::graph::GraphNodes;
use crate::types::ResourceKind;

/// Why a pass or resource was removed from the plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CullReason {
    /// The pass declares no outputs.
    NoOutputs,
    /// The pass has no recording callback.
    NoWork,
    /// Nothing consumes what the pass or resource produces.
    NotConsumed,
    /// Disabled by the caller.
    Disabled,
}

impl fmt::Display for CullReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoOutputs => write!(f, "no outputs"),
            Self::NoWork => write!(f, "no work"),
            Self::NotConsumed => write!(f, "no consumer"),
            Self::Disabled => write!(f, "disabled"),
        }
    }
}

/// Culled nodes with reasons, in culling order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct CullDiagnostics {
    pub passes: Vec<(PassHandle, CullReason)>,
    pub resources: Vec<(ResourceHandle, CullReason)>,
}

/// Run culling. Returns the set of live pass indices.
pub(crate) fn cull(
    nodes: &mut GraphNodes,
    diagnostics: &mut CullDiagnostics,
) -> GraphResult<FixedBitSet> {
    profile_scope!("framegraph: cull");

    check_swapchain_producers(nodes)?;

    let GraphNodes {
        passes, resources, ..
    } = nodes;

    init_reference_counts(resources);

    let mut live = FixedBitSet::with_capacity(passes.len());
    live.insert_range(..);

    let mut worklist: VecDeque<(PassHandle, CullReason)> = passes
        .iter()
        .filter_map(|pass| candidate_reason(pass, resources).map(|r| (pass.handle, r)))
        .collect();

    let mut reasons: Vec<Option<CullReason>> = vec![None; passes.len()];

    while let Some((handle, reason)) = worklist.pop_front() {
        let index = handle.index();
        if !live.contains(index) {
            continue;
        }
        live.set(index, false);
        passes[index].flags.insert(PassFlags::CULLED);
        reasons[index] = Some(reason);
        diagnostics.passes.push((handle, reason));
        log::trace!("culled pass '{}' ({reason})", passes[index].name);

        for input in &passes[index].inputs {
            let resource = &mut resources[input.usage.resource.index()];
            let name = &resource.name;
            let version = &mut resource.versions[input.usage.version as usize];
            let Some(count) = version.reference_count.checked_sub(1) else {
                debug_assert!(false, "reference count underflow on '{name}'");
                log::error!("reference count underflow on '{name}'");
                return Err(GraphError::InvalidReferenceCounts {
                    resource: name.clone(),
                });
            };
            version.reference_count = count;
            if count > 0 {
                continue;
            }

            let Some(writer) = version.writer else {
                continue;
            };
            if live.contains(writer.index())
                && let Some(reason) = candidate_reason(&passes[writer.index()], resources)
            {
                worklist.push_back((writer, reason));
            }
        }
    }

    for resource in resources.iter_mut() {
        let touched = resource.versions.iter().any(|v| {
            v.writer.is_some_and(|w| live.contains(w.index()))
                || v.readers.iter().any(|r| live.contains(r.index()))
        });
        if touched {
            continue;
        }
        resource.culled = true;
        let reason = resource
            .versions
            .iter()
            .filter_map(|v| v.writer)
            .chain(resource.versions.iter().flat_map(|v| v.readers.iter().copied()))
            .find_map(|p| reasons[p.index()])
            .unwrap_or(CullReason::NotConsumed);
        diagnostics.resources.push((resource.handle, reason));
        log::trace!("culled resource '{}' ({reason})", resource.name);
    }

    log::debug!(
        "culling removed {} passes and {} resources",
        diagnostics.passes.len(),
        diagnostics.resources.len()
    );
    framegraph_core::profile_plot!("framegraph culled passes", diagnostics.passes.len());

    if live.count_ones(..) == 0 {
        return Err(GraphError::NoWorkToDo);
    }
    Ok(live)
}

/// Readers per version, plus pins on what must survive the graph.
///
/// Every swapchain version is pinned: independent swapchain writers with
/// equal outputs form one group and none of them may be culled.
fn init_reference_counts(resources: &mut [ResourceNode]) {
    for resource in resources.iter_mut() {
        for version in resource.versions.iter_mut() {
            version.reference_count = version.readers.len() as u32;
        }

        if resource.kind == ResourceKind::SwapchainImage {
            for version in resource.versions.iter_mut().skip(1) {
                version.reference_count += 1;
            }
        } else if resource.is_essential() || resource.is_imported() {
            if let Some(last) = resource.versions.last_mut() {
                last.reference_count += 1;
            }
        }
    }
}

fn candidate_reason(pass: &PassNode, resources: &[ResourceNode]) -> Option<CullReason> {
    if pass.flags.contains(PassFlags::DISABLED) {
        return Some(CullReason::Disabled);
    }
    if pass.callback.is_none() {
        return Some(CullReason::NoWork);
    }
    if pass.flags.contains(PassFlags::DO_NOT_CULL) {
        return None;
    }
    if pass.outputs.is_empty() {
        return Some(CullReason::NoOutputs);
    }
    let unreferenced = pass.outputs.iter().all(|output| {
        resources[output.usage.resource.index()].versions[output.usage.version as usize]
            .reference_count
            == 0
    });
    unreferenced.then_some(CullReason::NotConsumed)
}

/// Independent swapchain producers must agree on their other outputs.
fn check_swapchain_producers(nodes: &GraphNodes) -> GraphResult<()> {
    let Some(swapchain) = nodes.swapchain else {
        return Ok(());
    };
    let resource = &nodes.resources[swapchain.index()];
    let producers: Vec<PassHandle> = resource
        .versions
        .iter()
        .filter(|v| !v.read_modify_write)
        .filter_map(|v| v.writer)
        .collect();

    let Some((first, rest)) = producers.split_first() else {
        return Ok(());
    };
    let other_outputs = |pass: &PassNode| -> BTreeSet<ResourceHandle> {
        pass.outputs
            .iter()
            .map(|o| o.usage.resource)
            .filter(|r| *r != swapchain)
            .collect()
    };

    let expected = other_outputs(&nodes.passes[first.index()]);
    for producer in rest {
        let pass = &nodes.passes[producer.index()];
        if other_outputs(pass) != expected {
            return Err(GraphError::MultipleSwapchainUsage {
                pass: pass.name.clone(),
            });
        }
        log::trace!(
            "swapchain writer '{}' merged with '{}'",
            pass.name,
            nodes.passes[first.index()].name
        );
    }
    Ok(())
}
