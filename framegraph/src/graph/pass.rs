//! Pass nodes.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bitflags::bitflags;

use crate::executor::PassContext;
use crate::types::{PipelineStages, QueueType};

use super::resource::ResourceHandle;
use super::usage::{NamedUsage, ResourceUsage};

/// Handle to a pass within a frame graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PassHandle(u32);

impl PassHandle {
    /// Create a new pass handle with the given index.
    pub fn new(index: u32) -> Self {
        Self(index)
    }

    /// Get the index of this handle.
    pub fn index(&self) -> usize {
        self.0 as usize
    }

    /// Raw id.
    pub fn id(&self) -> u32 {
        self.0
    }
}

bitflags! {
    /// Pass state flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PassFlags: u8 {
        /// Excluded from this frame by the caller.
        const DISABLED = 1 << 0;
        /// Kept even when no output is consumed (side effects).
        const DO_NOT_CULL = 1 << 1;
        /// Removed by the culler.
        const CULLED = 1 << 2;
    }
}

/// DFS marking used by cycle detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VisitState {
    #[default]
    Unvisited,
    Visiting,
    Visited,
}

/// Recording callback of a pass.
pub type PassCallback = Arc<dyn Fn(&mut PassContext<'_>) + Send + Sync>;

/// Wait on an external timeline value before the pass's batch starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimelineWait {
    /// Timeline semaphore id.
    pub timeline: u64,
    /// Value to wait for.
    pub value: u64,
    /// Stages blocked by the wait.
    pub stages: PipelineStages,
}

/// Signal an external timeline value when the pass's batch completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimelineSignal {
    /// Timeline semaphore id.
    pub timeline: u64,
    /// Value to signal.
    pub value: u64,
}

/// A unit of GPU work with declared inputs and outputs.
pub struct PassNode {
    pub(crate) handle: PassHandle,
    pub(crate) name: String,
    pub(crate) queue: QueueType,
    pub(crate) inputs: Vec<NamedUsage>,
    pub(crate) outputs: Vec<NamedUsage>,
    pub(crate) callback: Option<PassCallback>,
    pub(crate) user_data: AtomicU64,
    pub(crate) flags: PassFlags,
    pub(crate) visit: VisitState,
    pub(crate) timeline_waits: Vec<TimelineWait>,
    pub(crate) timeline_signals: Vec<TimelineSignal>,
}

impl PassNode {
    pub(crate) fn new(handle: PassHandle, name: impl Into<String>, queue: QueueType) -> Self {
        Self {
            handle,
            name: name.into(),
            queue,
            inputs: Vec::new(),
            outputs: Vec::new(),
            callback: None,
            user_data: AtomicU64::new(0),
            flags: PassFlags::empty(),
            visit: VisitState::Unvisited,
            timeline_waits: Vec::new(),
            timeline_signals: Vec::new(),
        }
    }

    /// Handle of this pass.
    pub fn handle(&self) -> PassHandle {
        self.handle
    }

    /// Debug name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queue the pass is submitted to.
    pub fn queue(&self) -> QueueType {
        self.queue
    }

    /// Declared inputs.
    pub fn inputs(&self) -> &[NamedUsage] {
        &self.inputs
    }

    /// Declared outputs.
    pub fn outputs(&self) -> &[NamedUsage] {
        &self.outputs
    }

    /// Look up an input usage by name.
    pub fn input(&self, name: &str) -> Option<&ResourceUsage> {
        self.inputs.iter().find(|u| u.name == name).map(|u| &u.usage)
    }

    /// Look up an output usage by name.
    pub fn output(&self, name: &str) -> Option<&ResourceUsage> {
        self.outputs.iter().find(|u| u.name == name).map(|u| &u.usage)
    }

    /// All usages, inputs first.
    pub fn usages(&self) -> impl Iterator<Item = &ResourceUsage> {
        self.inputs
            .iter()
            .chain(self.outputs.iter())
            .map(|u| &u.usage)
    }

    /// Whether the pass reads `resource` at `version`.
    pub fn reads_version(&self, resource: ResourceHandle, version: u32) -> bool {
        self.inputs
            .iter()
            .any(|u| u.usage.resource == resource && u.usage.version == version)
    }

    /// Whether the pass writes `resource`.
    pub fn writes(&self, resource: ResourceHandle) -> bool {
        self.outputs.iter().any(|u| u.usage.resource == resource)
    }

    /// Whether a recording callback is set.
    pub fn has_callback(&self) -> bool {
        self.callback.is_some()
    }

    /// Recording callback.
    pub fn callback(&self) -> Option<&PassCallback> {
        self.callback.as_ref()
    }

    /// Opaque per-frame data. Refreshable on cached graphs.
    pub fn user_data(&self) -> u64 {
        self.user_data.load(Ordering::Acquire)
    }

    pub(crate) fn set_user_data(&self, data: u64) {
        self.user_data.store(data, Ordering::Release);
    }

    /// Pass flags.
    pub fn flags(&self) -> PassFlags {
        self.flags
    }

    /// Whether the culler removed this pass.
    pub fn is_culled(&self) -> bool {
        self.flags.contains(PassFlags::CULLED)
    }

    /// External timeline waits.
    pub fn timeline_waits(&self) -> &[TimelineWait] {
        &self.timeline_waits
    }

    /// External timeline signals.
    pub fn timeline_signals(&self) -> &[TimelineSignal] {
        &self.timeline_signals
    }

    /// Union of stages over all usages, `ALL_COMMANDS` if the pass has none.
    pub fn stages(&self) -> PipelineStages {
        let stages = self
            .usages()
            .fold(PipelineStages::empty(), |acc, u| acc | u.stages);
        if stages.is_empty() {
            PipelineStages::ALL_COMMANDS
        } else {
            stages
        }
    }
}

impl fmt::Debug for PassNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PassNode")
            .field("handle", &self.handle)
            .field("name", &self.name)
            .field("queue", &self.queue)
            .field("inputs", &self.inputs.len())
            .field("outputs", &self.outputs.len())
            .field("has_callback", &self.callback.is_some())
            .field("flags", &self.flags)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::usage::TextureAccessMode;

    #[test]
    fn test_pass_handle_index() {
        let handle = PassHandle::new(7);
        assert_eq!(handle.index(), 7);
    }

    #[test]
    fn test_new_pass_is_taskless() {
        let pass = PassNode::new(PassHandle::new(0), "clear", QueueType::Graphics);
        assert!(!pass.has_callback());
        assert!(!pass.is_culled());
        assert_eq!(pass.stages(), PipelineStages::ALL_COMMANDS);
    }

    #[test]
    fn test_usage_lookup() {
        let mut pass = PassNode::new(PassHandle::new(0), "blit", QueueType::Graphics);
        let src = ResourceHandle::new(0);
        let mut usage = ResourceUsage::texture(src, TextureAccessMode::ShaderRead);
        usage.version = 1;
        pass.inputs.push(NamedUsage {
            name: "source".into(),
            usage,
        });

        assert!(pass.input("source").is_some());
        assert!(pass.output("source").is_none());
        assert!(pass.reads_version(src, 1));
        assert!(!pass.reads_version(src, 0));
        assert!(!pass.writes(src));
        assert_eq!(pass.stages(), PipelineStages::FRAGMENT_SHADER);
    }

    #[test]
    fn test_user_data_refresh() {
        let pass = PassNode::new(PassHandle::new(0), "p", QueueType::Compute);
        pass.set_user_data(42);
        assert_eq!(pass.user_data(), 42);
    }
}
