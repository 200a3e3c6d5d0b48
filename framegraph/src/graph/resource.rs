//! Resource nodes and their per-version bookkeeping.

use std::sync::OnceLock;

use bitflags::bitflags;

use crate::types::{
    AccessFlags, AspectMask, ClearValue, LoadOp, PipelineStages, QueueType, ResourceDesc,
    ResourceKind, StoreOp, TextureLayout,
};

use super::pass::PassHandle;

/// Handle to a resource within a frame graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceHandle(u32);

impl ResourceHandle {
    /// Create a new resource handle with the given index.
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
    /// Lifetime and binding flags of a resource.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ResourceFlags: u8 {
        /// Contents are observable after the graph ends; never culled or aliased.
        const ESSENTIAL_OUTPUT = 1 << 0;
        /// Backing memory may be shared with transients of disjoint lifetime.
        const ALIASABLE = 1 << 1;
        /// Free at the last usage even when essential.
        const RELEASE_AFTER_USE = 1 << 2;
        /// Gets a slot in the bindless descriptor array.
        const BINDLESS = 1 << 3;
    }
}

/// Externally tracked state of an imported resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImportedState {
    /// Layout the image is in when the graph starts.
    pub layout: TextureLayout,
    /// Last access performed outside the graph.
    pub access: AccessFlags,
    /// Stages of that access.
    pub stages: PipelineStages,
    /// Queue that currently owns the resource.
    pub queue: QueueType,
}

impl ImportedState {
    /// Imported state with a known layout and no pending access.
    pub fn new(layout: TextureLayout) -> Self {
        Self {
            layout,
            access: AccessFlags::empty(),
            stages: PipelineStages::empty(),
            queue: QueueType::Graphics,
        }
    }

    /// Set the previous access and its stages.
    pub fn with_access(mut self, access: AccessFlags, stages: PipelineStages) -> Self {
        self.access = access;
        self.stages = stages;
        self
    }

    /// Set the owning queue.
    pub fn with_queue(mut self, queue: QueueType) -> Self {
        self.queue = queue;
        self
    }
}

impl Default for ImportedState {
    fn default() -> Self {
        Self::new(TextureLayout::Undefined)
    }
}

/// Who owns a resource's memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    /// Allocated by the graph for its lifetime.
    Transient,
    /// Owned by the caller; the graph only tracks state.
    Imported(ImportedState),
}

/// Synchronization state of a resource at a point in the plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceState {
    /// Current layout.
    pub layout: TextureLayout,
    /// Accumulated access since the last barrier.
    pub access: AccessFlags,
    /// Stages of that access.
    pub stages: PipelineStages,
    /// Owning queue family.
    pub queue_family: u32,
}

/// One immutable version of a resource.
///
/// Version 0 is the content the resource has when the graph starts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceVersion {
    /// Pass that wrote this version (`None` for version 0).
    pub writer: Option<PassHandle>,
    /// Passes that read this version, once per usage.
    pub readers: Vec<PassHandle>,
    /// Whether the writer also read the previous version.
    pub read_modify_write: bool,
    /// Live readers plus pins, maintained by the culler.
    pub reference_count: u32,
}

/// One use of a resource by a live pass, in schedule order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JourneyEntry {
    /// The pass.
    pub pass: PassHandle,
    /// Position of the pass in the flattened schedule.
    pub order: usize,
    /// Submission batch index.
    pub batch: usize,
    /// Queue the pass runs on.
    pub queue: QueueType,
    /// Queue family of that queue.
    pub queue_family: u32,
    /// Stages touching the resource.
    pub stages: PipelineStages,
    /// Combined access of all the pass's usages of the resource.
    pub access: AccessFlags,
    /// Layout required by the pass.
    pub layout: TextureLayout,
    /// Load op of an attachment usage.
    pub load_op: LoadOp,
    /// Store op of an attachment usage.
    pub store_op: StoreOp,
    /// Clear value of an attachment usage.
    pub clear_value: Option<ClearValue>,
}

/// A resource tracked by the frame graph.
#[derive(Debug)]
pub struct ResourceNode {
    pub(crate) handle: ResourceHandle,
    pub(crate) name: String,
    pub(crate) kind: ResourceKind,
    pub(crate) desc: ResourceDesc,
    pub(crate) ownership: Ownership,
    pub(crate) flags: ResourceFlags,
    pub(crate) versions: Vec<ResourceVersion>,
    pub(crate) first_usage: Option<usize>,
    pub(crate) last_usage: Option<usize>,
    pub(crate) journey: Vec<JourneyEntry>,
    pub(crate) final_state: Option<ResourceState>,
    pub(crate) culled: bool,
    pub(crate) external_handle: Option<u64>,
    pub(crate) bindless_index: OnceLock<u32>,
}

impl ResourceNode {
    pub(crate) fn new(
        handle: ResourceHandle,
        name: impl Into<String>,
        kind: ResourceKind,
        desc: ResourceDesc,
        ownership: Ownership,
    ) -> Self {
        Self {
            handle,
            name: name.into(),
            kind,
            desc,
            ownership,
            flags: ResourceFlags::empty(),
            versions: vec![ResourceVersion::default()],
            first_usage: None,
            last_usage: None,
            journey: Vec::new(),
            final_state: None,
            culled: false,
            external_handle: None,
            bindless_index: OnceLock::new(),
        }
    }

    /// Handle of this resource.
    pub fn handle(&self) -> ResourceHandle {
        self.handle
    }

    /// Debug name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Resource kind.
    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// Image or buffer description.
    pub fn desc(&self) -> &ResourceDesc {
        &self.desc
    }

    /// Transient or imported.
    pub fn ownership(&self) -> Ownership {
        self.ownership
    }

    /// Whether the graph allocates this resource.
    pub fn is_transient(&self) -> bool {
        matches!(self.ownership, Ownership::Transient)
    }

    /// Whether the caller owns this resource.
    pub fn is_imported(&self) -> bool {
        matches!(self.ownership, Ownership::Imported(_))
    }

    /// Resource flags.
    pub fn flags(&self) -> ResourceFlags {
        self.flags
    }

    /// Whether contents must survive the graph.
    ///
    /// The swapchain image is always essential.
    pub fn is_essential(&self) -> bool {
        self.kind == ResourceKind::SwapchainImage
            || self.flags.contains(ResourceFlags::ESSENTIAL_OUTPUT)
    }

    /// Current (latest declared) version.
    pub fn version(&self) -> u32 {
        (self.versions.len() - 1) as u32
    }

    /// All versions, index = version number.
    pub fn versions(&self) -> &[ResourceVersion] {
        &self.versions
    }

    /// First graph pass that wrote the resource, `None` if only written externally.
    pub fn producer(&self) -> Option<PassHandle> {
        self.versions.iter().find_map(|v| v.writer)
    }

    /// Every pass that reads some version of the resource.
    pub fn consumers(&self) -> impl Iterator<Item = PassHandle> + '_ {
        self.versions.iter().flat_map(|v| v.readers.iter().copied())
    }

    /// Reference count of the latest version after culling.
    pub fn reference_count(&self) -> u32 {
        self.versions
            .last()
            .map(|v| v.reference_count)
            .unwrap_or(0)
    }

    /// Schedule position of the first live usage.
    pub fn first_usage(&self) -> Option<usize> {
        self.first_usage
    }

    /// Schedule position of the last live usage.
    pub fn last_usage(&self) -> Option<usize> {
        self.last_usage
    }

    /// Ordered live usages the barriers were derived from.
    pub fn journey(&self) -> &[JourneyEntry] {
        &self.journey
    }

    /// State after the graph executes. `None` until compiled.
    pub fn final_state(&self) -> Option<ResourceState> {
        self.final_state
    }

    /// Whether no live pass touches this resource.
    pub fn is_culled(&self) -> bool {
        self.culled
    }

    /// Caller-provided backend handle of an imported resource.
    pub fn external_handle(&self) -> Option<u64> {
        self.external_handle
    }

    /// Bindless index, assigned on first execution.
    pub fn bindless_index(&self) -> Option<u32> {
        self.bindless_index.get().copied()
    }

    /// Aspect mask for image barriers, empty for buffers.
    pub fn aspect_mask(&self) -> AspectMask {
        if self.kind.is_image() {
            self.desc.format().aspect_mask()
        } else {
            AspectMask::empty()
        }
    }

    /// State before the first usage in the graph.
    pub(crate) fn initial_state(&self, imported_family: impl Fn(QueueType) -> u32) -> Option<ResourceState> {
        match self.ownership {
            Ownership::Transient => None,
            Ownership::Imported(state) => Some(ResourceState {
                layout: state.layout,
                access: state.access,
                stages: state.stages,
                queue_family: imported_family(state.queue),
            }),
        }
    }
}
