//! Frame graph compiler.
//!
//! Turns the declarations collected by
//! [`FrameGraphBuilder`](crate::graph::FrameGraphBuilder) into an execution
//! plan. Stages run in a fixed order and each one only reads what the
//! previous ones produced:
//!
//! | Stage | Module | Output |
//! |-------|--------|--------|
//! | Validate | [`validate`] | dependency edges, topological order |
//! | Cull | [`cull`] | live pass set, culled nodes with reasons |
//! | Schedule | [`schedule`] | levels, waves, per-queue batches, semaphores |
//! | Journeys | [`barriers`] | per-resource usage sequences |
//! | Lifetimes | [`lifetime`] | transient create/free points, alias slots |
//! | Barriers | [`barriers`] | barriers, aliasing hand-overs, attachment ops, final states |
//!
//! Any stage may fail; the error ends compilation of that graph only.

pub mod barriers;
pub mod cull;
pub mod lifetime;
pub mod schedule;
pub(crate) mod validate;

pub use barriers::{AttachmentOp, Barrier, BarrierKind};
pub use cull::CullReason;
pub use lifetime::TransientLifetime;
pub use schedule::{ScheduledPass, SubmissionBatch, Wave};

use framegraph_core::profile_scope;

use crate::config::FrameGraphConfig;
use crate::error::GraphResult;
use crate::graph::GraphNodes;

pub(crate) use cull::CullDiagnostics;

/// The compiled execution plan of a frame graph.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompiledPlan {
    pub(crate) pass_order: Vec<ScheduledPass>,
    pub(crate) batches: Vec<SubmissionBatch>,
    pub(crate) waves: Vec<Wave>,
    pub(crate) pass_slots: Vec<Option<usize>>,
    pub(crate) lifetimes: Vec<TransientLifetime>,
    pub(crate) semaphore_count: u32,
}

impl CompiledPlan {
    /// Live passes in recording order.
    pub fn pass_order(&self) -> &[ScheduledPass] {
        &self.pass_order
    }

    /// Submission batches in submission order.
    pub fn batches(&self) -> &[SubmissionBatch] {
        &self.batches
    }

    /// Waves in level order.
    pub fn waves(&self) -> &[Wave] {
        &self.waves
    }

    /// Transient lifetimes.
    pub fn lifetimes(&self) -> &[TransientLifetime] {
        &self.lifetimes
    }

    /// Number of binary semaphores linking batches.
    pub fn semaphore_count(&self) -> u32 {
        self.semaphore_count
    }

    /// Every barrier in the plan, in recording order.
    pub fn barriers(&self) -> impl Iterator<Item = &Barrier> {
        self.batches.iter().flat_map(move |batch| {
            let passes = &self.pass_order[batch.first_pass..batch.first_pass + batch.passes.len()];
            batch
                .begin_barriers
                .iter()
                .chain(passes.iter().flat_map(|p| p.barriers.iter()))
                .chain(batch.end_barriers.iter())
        })
    }
}

/// Run every stage over the declared nodes.
pub(crate) fn compile(
    nodes: &mut GraphNodes,
    config: &FrameGraphConfig,
    diagnostics: &mut CullDiagnostics,
) -> GraphResult<CompiledPlan> {
    profile_scope!("framegraph: compile");

    let deps = validate::validate(nodes)?;
    let live = cull::cull(nodes, diagnostics)?;
    let mut schedule = schedule::schedule(nodes, &deps, &live, config);
    barriers::build_journeys(nodes, &schedule, config);
    let lifetimes = lifetime::compute_lifetimes(&nodes.resources, &schedule);
    barriers::synthesize(nodes, &mut schedule, config, &lifetimes);

    Ok(CompiledPlan {
        pass_order: schedule.pass_order,
        batches: schedule.batches,
        waves: schedule.waves,
        pass_slots: schedule.pass_slots,
        lifetimes,
        semaphore_count: schedule.semaphore_count,
    })
}
