//! Frame graph construction.
//!
//! A frame graph is declared every frame through [`FrameGraphBuilder`]:
//! resources (transient or imported), passes, and the usages connecting
//! them. [`FrameGraphBuilder::end_graph`] compiles the declarations into a
//! [`FrameGraph`] and stores it in the [`GraphCache`] so that the next frame
//! with the same [`CacheKey`] skips compilation altogether.
//!
//! Nodes live in plain vectors and reference each other by index
//! ([`PassHandle`], [`ResourceHandle`]), so handles stay valid while the
//! tables grow.
//!
//! # Example
//!
//! ```
//! use framegraph::{FrameGraphBuilder, FrameGraphConfig, ImageDesc, QueueType, TextureFormat};
//! use framegraph::graph::{ResourceUsage, TextureAccessMode};
//!
//! let mut builder = FrameGraphBuilder::new("frame", FrameGraphConfig::default());
//! let color = builder.add_transient_image("color", ImageDesc::new_2d(640, 480, TextureFormat::Rgba8Unorm));
//! let backbuffer = builder
//!     .import_swapchain("backbuffer", ImageDesc::new_2d(640, 480, TextureFormat::Bgra8UnormSrgb))
//!     .unwrap();
//!
//! let clear = builder.add_pass("clear", QueueType::Graphics);
//! builder.set_callback(clear, |_ctx| {}).unwrap();
//! builder
//!     .connect_output(clear, "color", ResourceUsage::texture(color, TextureAccessMode::RenderTargetWrite))
//!     .unwrap();
//!
//! let blit = builder.add_pass("blit", QueueType::Graphics);
//! builder.set_callback(blit, |_ctx| {}).unwrap();
//! builder
//!     .connect_input(blit, "source", ResourceUsage::texture(color, TextureAccessMode::ShaderRead))
//!     .unwrap();
//! builder
//!     .connect_output(blit, "target", ResourceUsage::texture(backbuffer, TextureAccessMode::RenderTargetWrite))
//!     .unwrap();
//!
//! let graph = builder.build();
//! assert!(graph.is_ok());
//! assert_eq!(graph.waves().len(), 2);
//! ```

pub mod pass;
pub mod resource;
pub mod usage;

pub use pass::{PassCallback, PassFlags, PassHandle, PassNode, TimelineSignal, TimelineWait};
pub use resource::{
    ImportedState, JourneyEntry, Ownership, ResourceFlags, ResourceHandle, ResourceNode,
    ResourceState, ResourceVersion,
};
pub use usage::{BufferAccessMode, NamedUsage, ResourceUsage, TextureAccessMode};

use std::fmt::Write as _;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::cache::{CacheKey, GraphCache};
use crate::compiler::{
    self, Barrier, CompiledPlan, CullDiagnostics, CullReason, ScheduledPass, SubmissionBatch,
    TransientLifetime, Wave,
};
use crate::config::FrameGraphConfig;
use crate::error::{GraphError, GraphReport, GraphResult};
use crate::executor::PassContext;
use crate::types::{
    BufferDesc, ImageDesc, PipelineStages, QueueType, ResourceDesc, ResourceKind, TextureLayout,
};

/// Node tables shared by the builder, the compiler and the compiled graph.
#[derive(Debug, Default)]
pub(crate) struct GraphNodes {
    pub passes: Vec<PassNode>,
    pub resources: Vec<ResourceNode>,
    pub swapchain: Option<ResourceHandle>,
}

/// Lifecycle of a frame graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GraphState {
    /// Declarations are still being collected.
    Building,
    /// Compilation failed; the graph carries the error.
    Failed,
    /// Compiled and ready to execute.
    Compiled,
    /// Compiled and held by the cache for replay.
    Cached,
    /// Submitted at least once since it was last handed out.
    Executed,
}

/// Outcome of [`GraphCache::begin_graph`].
#[derive(Debug)]
pub enum GraphBegin {
    /// A compiled graph for the key already exists. Refresh per-frame data
    /// through [`FrameGraph::set_user_data`] and execute it.
    Cached(Arc<FrameGraph>),
    /// No cached graph; declare the frame and call
    /// [`FrameGraphBuilder::end_graph`].
    Build(FrameGraphBuilder),
}

/// Declarative per-frame graph builder.
///
/// Errors from individual calls are returned immediately and also
/// remembered; the first one becomes the result of the built graph.
#[derive(Debug)]
pub struct FrameGraphBuilder {
    name: String,
    key: Option<CacheKey>,
    config: FrameGraphConfig,
    nodes: GraphNodes,
    error: Option<GraphError>,
}

impl FrameGraphBuilder {
    /// Start declaring a graph that is not cached.
    pub fn new(name: impl Into<String>, config: FrameGraphConfig) -> Self {
        Self {
            name: name.into(),
            key: None,
            config,
            nodes: GraphNodes::default(),
            error: None,
        }
    }

    pub(crate) fn with_key(mut self, key: CacheKey) -> Self {
        self.key = Some(key);
        self
    }

    /// Graph name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Cache key the graph will be stored under.
    pub fn key(&self) -> Option<CacheKey> {
        self.key
    }

    /// First error recorded so far.
    pub fn error(&self) -> Option<&GraphError> {
        self.error.as_ref()
    }

    // ---------------------------------------------------------------
    // Passes
    // ---------------------------------------------------------------

    /// Add a pass on the given queue. Without a callback it is culled.
    pub fn add_pass(&mut self, name: impl Into<String>, queue: QueueType) -> PassHandle {
        let handle = PassHandle::new(self.nodes.passes.len() as u32);
        self.nodes.passes.push(PassNode::new(handle, name, queue));
        handle
    }

    /// Set the recording callback of a pass.
    pub fn set_callback<F>(&mut self, pass: PassHandle, callback: F) -> GraphResult<()>
    where
        F: Fn(&mut PassContext<'_>) + Send + Sync + 'static,
    {
        let result = self
            .pass_mut(pass)
            .map(|node| node.callback = Some(Arc::new(callback)));
        self.track(result)
    }

    /// Set the opaque per-frame data of a pass.
    pub fn set_user_data(&mut self, pass: PassHandle, data: u64) -> GraphResult<()> {
        let result = self.pass_mut(pass).map(|node| node.set_user_data(data));
        self.track(result)
    }

    /// Enable or disable a pass for this frame.
    pub fn set_disabled(&mut self, pass: PassHandle, disabled: bool) -> GraphResult<()> {
        let result = self
            .pass_mut(pass)
            .map(|node| node.flags.set(PassFlags::DISABLED, disabled));
        self.track(result)
    }

    /// Keep a pass even when none of its outputs is consumed.
    pub fn set_do_not_cull(&mut self, pass: PassHandle, do_not_cull: bool) -> GraphResult<()> {
        let result = self
            .pass_mut(pass)
            .map(|node| node.flags.set(PassFlags::DO_NOT_CULL, do_not_cull));
        self.track(result)
    }

    /// Make the pass's batch wait for an external timeline value.
    pub fn wait_on_timeline(
        &mut self,
        pass: PassHandle,
        timeline: u64,
        value: u64,
        stages: PipelineStages,
    ) -> GraphResult<()> {
        let result = self.pass_mut(pass).map(|node| {
            node.timeline_waits.push(TimelineWait {
                timeline,
                value,
                stages,
            })
        });
        self.track(result)
    }

    /// Make the pass's batch signal an external timeline value.
    pub fn signal_timeline(&mut self, pass: PassHandle, timeline: u64, value: u64) -> GraphResult<()> {
        let result = self
            .pass_mut(pass)
            .map(|node| node.timeline_signals.push(TimelineSignal { timeline, value }));
        self.track(result)
    }

    // ---------------------------------------------------------------
    // Resources
    // ---------------------------------------------------------------

    /// Add a graph-owned image. Depth formats become [`ResourceKind::Depth`].
    pub fn add_transient_image(&mut self, name: impl Into<String>, desc: ImageDesc) -> ResourceHandle {
        let kind = image_kind(&desc);
        self.push_resource(name, kind, ResourceDesc::Image(desc), Ownership::Transient)
    }

    /// Add a graph-owned buffer.
    pub fn add_transient_buffer(&mut self, name: impl Into<String>, desc: BufferDesc) -> ResourceHandle {
        self.push_resource(
            name,
            ResourceKind::Buffer,
            ResourceDesc::Buffer(desc),
            Ownership::Transient,
        )
    }

    /// Import an externally owned image in a known state.
    pub fn import_image(
        &mut self,
        name: impl Into<String>,
        desc: ImageDesc,
        state: ImportedState,
    ) -> ResourceHandle {
        let kind = image_kind(&desc);
        self.push_resource(name, kind, ResourceDesc::Image(desc), Ownership::Imported(state))
    }

    /// Import an externally owned buffer.
    pub fn import_buffer(
        &mut self,
        name: impl Into<String>,
        desc: BufferDesc,
        state: ImportedState,
    ) -> ResourceHandle {
        self.push_resource(
            name,
            ResourceKind::Buffer,
            ResourceDesc::Buffer(desc),
            Ownership::Imported(state),
        )
    }

    /// Import the swapchain image. At most one per graph.
    pub fn import_swapchain(&mut self, name: impl Into<String>, desc: ImageDesc) -> GraphResult<ResourceHandle> {
        if self.nodes.swapchain.is_some() {
            return self.track(Err(GraphError::MultipleSwapchains));
        }
        let handle = self.push_resource(
            name,
            ResourceKind::SwapchainImage,
            ResourceDesc::Image(desc),
            Ownership::Imported(ImportedState::new(TextureLayout::Undefined)),
        );
        self.nodes.swapchain = Some(handle);
        Ok(handle)
    }

    /// Replace the flags of a resource.
    pub fn set_resource_flags(&mut self, resource: ResourceHandle, flags: ResourceFlags) -> GraphResult<()> {
        let result = self.resource_mut(resource).map(|node| node.flags = flags);
        self.track(result)
    }

    /// Attach the caller's backend handle to an imported resource.
    pub fn set_external_handle(&mut self, resource: ResourceHandle, handle: u64) -> GraphResult<()> {
        let result = self
            .resource_mut(resource)
            .map(|node| node.external_handle = Some(handle));
        self.track(result)
    }

    // ---------------------------------------------------------------
    // Usages
    // ---------------------------------------------------------------

    /// Declare that `pass` reads `usage.resource`.
    ///
    /// The usage binds to the resource version current at this call, so a
    /// pass that reads and writes the same resource must connect the input
    /// first.
    pub fn connect_input(&mut self, pass: PassHandle, name: &str, usage: ResourceUsage) -> GraphResult<()> {
        let result = self.connect(pass, name, usage, false);
        self.track(result)
    }

    /// Declare that `pass` writes `usage.resource`, creating a new version.
    ///
    /// Fails with [`GraphError::DuplicateOutput`] when the resource already
    /// has a producer and `pass` does not read its current version. The
    /// swapchain is exempt; its writers are checked during culling.
    pub fn connect_output(&mut self, pass: PassHandle, name: &str, usage: ResourceUsage) -> GraphResult<()> {
        let result = self.connect(pass, name, usage, true);
        self.track(result)
    }

    fn connect(&mut self, pass: PassHandle, name: &str, mut usage: ResourceUsage, is_output: bool) -> GraphResult<()> {
        let GraphNodes {
            passes, resources, ..
        } = &mut self.nodes;
        let node = passes
            .get_mut(pass.index())
            .ok_or(GraphError::InvalidPassHandle(pass.id()))?;
        let resource = resources
            .get_mut(usage.resource.index())
            .ok_or(GraphError::InvalidResourceHandle(usage.resource.id()))?;

        let slots = if is_output { &node.outputs } else { &node.inputs };
        if slots.iter().any(|u| u.name == name) {
            return Err(GraphError::DuplicateUsageName {
                pass: node.name.clone(),
                name: name.to_string(),
            });
        }

        if !resource.kind.is_image() {
            usage.layout = TextureLayout::Undefined;
        }
        usage.is_output = is_output;
        let current = resource.version();
        let version = if is_output { current + 1 } else { current };
        usage.version = version;

        if is_output {
            let read_modify_write = node.reads_version(usage.resource, current);
            let has_producer = resource.versions.iter().any(|v| v.writer.is_some());
            let second_producer = !read_modify_write
                && has_producer
                && resource.kind != ResourceKind::SwapchainImage;
            if node.writes(usage.resource) || second_producer {
                return Err(GraphError::DuplicateOutput {
                    resource: resource.name.clone(),
                    pass: node.name.clone(),
                });
            }
            resource.versions.push(ResourceVersion {
                writer: Some(pass),
                readers: Vec::new(),
                read_modify_write,
                reference_count: 0,
            });
            node.outputs.push(NamedUsage {
                name: name.to_string(),
                usage,
            });
        } else {
            resource.versions[current as usize].readers.push(pass);
            node.inputs.push(NamedUsage {
                name: name.to_string(),
                usage,
            });
        }

        log::trace!(
            "'{}' {} '{}' v{} as '{name}'",
            node.name,
            if is_output { "writes" } else { "reads" },
            resource.name,
            version
        );
        Ok(())
    }

    // ---------------------------------------------------------------
    // Compilation
    // ---------------------------------------------------------------

    /// Compile without touching any cache.
    ///
    /// A failed compile still returns a graph; check [`FrameGraph::result`].
    pub fn build(self) -> FrameGraph {
        let Self {
            name,
            key,
            config,
            mut nodes,
            error,
        } = self;

        let mut diagnostics = CullDiagnostics::default();
        let compiled = match error {
            Some(error) => Err(error),
            None => compiler::compile(&mut nodes, &config, &mut diagnostics),
        };

        let (plan, result, report, state) = match compiled {
            Ok(plan) => {
                log::debug!(
                    "compiled graph '{name}': {} passes, {} batches, {} waves",
                    plan.pass_order.len(),
                    plan.batches.len(),
                    plan.waves.len()
                );
                (plan, Ok(()), None, GraphState::Compiled)
            }
            Err(error) => {
                let report = GraphReport::new(&name, &error);
                if error.is_no_work() {
                    log::debug!("{report}");
                } else {
                    log::error!("{report}");
                }
                (
                    CompiledPlan::default(),
                    Err(error),
                    Some(report),
                    GraphState::Failed,
                )
            }
        };

        FrameGraph {
            name,
            key,
            nodes,
            plan,
            culled_passes: diagnostics.passes,
            culled_resources: diagnostics.resources,
            result,
            report,
            state: Mutex::new(state),
        }
    }

    /// Compile and store the graph in `cache` under the builder's key.
    ///
    /// Failed graphs are returned but never cached.
    pub fn end_graph(self, cache: &mut GraphCache) -> Arc<FrameGraph> {
        let key = self.key;
        let graph = Arc::new(self.build());
        if let (Some(key), true) = (key, graph.is_ok()) {
            cache.insert(key, Arc::clone(&graph));
        }
        graph
    }

    fn push_resource(
        &mut self,
        name: impl Into<String>,
        kind: ResourceKind,
        desc: ResourceDesc,
        ownership: Ownership,
    ) -> ResourceHandle {
        let handle = ResourceHandle::new(self.nodes.resources.len() as u32);
        self.nodes
            .resources
            .push(ResourceNode::new(handle, name, kind, desc, ownership));
        handle
    }

    fn pass_mut(&mut self, pass: PassHandle) -> GraphResult<&mut PassNode> {
        self.nodes
            .passes
            .get_mut(pass.index())
            .ok_or(GraphError::InvalidPassHandle(pass.id()))
    }

    fn resource_mut(&mut self, resource: ResourceHandle) -> GraphResult<&mut ResourceNode> {
        self.nodes
            .resources
            .get_mut(resource.index())
            .ok_or(GraphError::InvalidResourceHandle(resource.id()))
    }

    fn track<T>(&mut self, result: GraphResult<T>) -> GraphResult<T> {
        if let Err(error) = &result
            && self.error.is_none()
        {
            self.error = Some(error.clone());
        }
        result
    }
}

fn image_kind(desc: &ImageDesc) -> ResourceKind {
    if desc.format.is_depth_stencil() {
        ResourceKind::Depth
    } else {
        ResourceKind::Image
    }
}

/// A compiled (or failed) frame graph.
///
/// Read-only once built, so it can be shared with recording workers and
/// kept in the cache. Only per-pass user data and the lifecycle state
/// change afterwards.
#[derive(Debug)]
pub struct FrameGraph {
    name: String,
    key: Option<CacheKey>,
    nodes: GraphNodes,
    plan: CompiledPlan,
    culled_passes: Vec<(PassHandle, CullReason)>,
    culled_resources: Vec<(ResourceHandle, CullReason)>,
    result: Result<(), GraphError>,
    report: Option<GraphReport>,
    state: Mutex<GraphState>,
}

static_assertions::assert_impl_all!(FrameGraph: Send, Sync);

impl FrameGraph {
    /// Graph name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Cache key, if the graph was built through the cache.
    pub fn key(&self) -> Option<CacheKey> {
        self.key
    }

    /// Compile result.
    pub fn result(&self) -> Result<(), &GraphError> {
        self.result.as_ref().map(|_| ())
    }

    /// Whether compilation succeeded.
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }

    /// Compile error, if any.
    pub fn error(&self) -> Option<&GraphError> {
        self.result.as_ref().err()
    }

    /// Structured report of a failed compile.
    pub fn report(&self) -> Option<&GraphReport> {
        self.report.as_ref()
    }

    /// Lifecycle state.
    pub fn state(&self) -> GraphState {
        *self.state.lock()
    }

    pub(crate) fn set_state(&self, state: GraphState) {
        *self.state.lock() = state;
    }

    /// All declared passes, including culled ones.
    pub fn passes(&self) -> &[PassNode] {
        &self.nodes.passes
    }

    /// Pass by handle.
    pub fn pass(&self, pass: PassHandle) -> Option<&PassNode> {
        self.nodes.passes.get(pass.index())
    }

    /// Find a pass by name.
    pub fn find_pass(&self, name: &str) -> Option<PassHandle> {
        self.nodes
            .passes
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.handle)
    }

    /// All declared resources, including culled ones.
    pub fn resources(&self) -> &[ResourceNode] {
        &self.nodes.resources
    }

    /// Resource by handle.
    pub fn resource(&self, resource: ResourceHandle) -> Option<&ResourceNode> {
        self.nodes.resources.get(resource.index())
    }

    /// Find a resource by name.
    pub fn find_resource(&self, name: &str) -> Option<ResourceHandle> {
        self.nodes
            .resources
            .iter()
            .find(|r| r.name == name)
            .map(|r| r.handle)
    }

    /// The swapchain resource, if one was imported.
    pub fn swapchain(&self) -> Option<ResourceHandle> {
        self.nodes.swapchain
    }

    /// Whether a live pass uses the swapchain, i.e. execution presents.
    pub fn presents(&self) -> bool {
        self.plan.batches.iter().any(|b| b.presents)
    }

    /// Refresh per-frame data of a pass without recompiling.
    pub fn set_user_data(&self, pass: PassHandle, data: u64) -> GraphResult<()> {
        let node = self
            .pass(pass)
            .ok_or(GraphError::InvalidPassHandle(pass.id()))?;
        node.set_user_data(data);
        Ok(())
    }

    /// The compiled plan. Empty if compilation failed.
    pub fn plan(&self) -> &CompiledPlan {
        &self.plan
    }

    /// Live passes in recording order.
    pub fn pass_order(&self) -> &[ScheduledPass] {
        &self.plan.pass_order
    }

    /// Schedule entry of a live pass.
    pub fn scheduled(&self, pass: PassHandle) -> Option<&ScheduledPass> {
        let order = (*self.plan.pass_slots.get(pass.index())?)?;
        self.plan.pass_order.get(order)
    }

    /// Submission batches in submission order.
    pub fn batches(&self) -> &[SubmissionBatch] {
        &self.plan.batches
    }

    /// Scheduled passes of a batch.
    pub fn batch_passes(&self, batch: &SubmissionBatch) -> &[ScheduledPass] {
        &self.plan.pass_order[batch.first_pass..batch.first_pass + batch.passes.len()]
    }

    /// Waves in level order.
    pub fn waves(&self) -> &[Wave] {
        &self.plan.waves
    }

    /// Transient lifetimes.
    pub fn lifetimes(&self) -> &[TransientLifetime] {
        &self.plan.lifetimes
    }

    /// Barriers touching `resource`, in recording order.
    pub fn barriers_for(&self, resource: ResourceHandle) -> Vec<&Barrier> {
        self.plan
            .barriers()
            .filter(|b| b.resource == resource)
            .collect()
    }

    /// Culled passes with reasons.
    pub fn culled_passes(&self) -> &[(PassHandle, CullReason)] {
        &self.culled_passes
    }

    /// Culled resources with reasons.
    pub fn culled_resources(&self) -> &[(ResourceHandle, CullReason)] {
        &self.culled_resources
    }

    /// Number of culled resources.
    pub fn culled_resources_count(&self) -> usize {
        self.culled_resources.len()
    }

    /// Human-readable plan for debugging.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        let _ = self.write_dump(&mut out);
        out
    }

    fn write_dump(&self, out: &mut String) -> std::fmt::Result {
        let resource_name = |handle: ResourceHandle| {
            self.resource(handle).map(|r| r.name.as_str()).unwrap_or("?")
        };
        let pass_name = |handle: PassHandle| self.pass(handle).map(|p| p.name.as_str()).unwrap_or("?");

        writeln!(out, "frame graph '{}' ({:?})", self.name, self.state())?;
        if let Some(report) = &self.report {
            writeln!(out, "  {report}")?;
        }

        for wave in &self.plan.waves {
            writeln!(out, "wave {}:", wave.level)?;
            for &index in &wave.batches {
                let batch = &self.plan.batches[index];
                writeln!(
                    out,
                    "  batch {} [{} family {}] waits {:?} signals {:?}{}",
                    batch.index,
                    batch.queue.name(),
                    batch.queue_family,
                    batch.waits.iter().map(|w| w.point).collect::<Vec<_>>(),
                    batch.signals,
                    if batch.presents { " present" } else { "" }
                )?;
                for barrier in &batch.begin_barriers {
                    writeln!(out, "    begin {:?} '{}'", barrier.kind, resource_name(barrier.resource))?;
                }
                for scheduled in self.batch_passes(batch) {
                    for barrier in &scheduled.barriers {
                        writeln!(
                            out,
                            "    barrier '{}' {:?} -> {:?}",
                            resource_name(barrier.resource),
                            barrier.old_layout,
                            barrier.new_layout
                        )?;
                    }
                    writeln!(out, "    pass '{}'", pass_name(scheduled.pass))?;
                    for attachment in &scheduled.attachments {
                        writeln!(
                            out,
                            "      attachment '{}' {:?} -> {:?} load {:?} store {:?}",
                            resource_name(attachment.resource),
                            attachment.initial_layout,
                            attachment.layout,
                            attachment.load_op,
                            attachment.store_op
                        )?;
                    }
                }
                for barrier in &batch.end_barriers {
                    writeln!(
                        out,
                        "    end {:?} '{}' {:?} -> {:?}",
                        barrier.kind,
                        resource_name(barrier.resource),
                        barrier.old_layout,
                        barrier.new_layout
                    )?;
                }
            }
        }

        for (pass, reason) in &self.culled_passes {
            writeln!(out, "culled pass '{}' ({reason})", pass_name(*pass))?;
        }
        for (resource, reason) in &self.culled_resources {
            writeln!(out, "culled resource '{}' ({reason})", resource_name(*resource))?;
        }
        Ok(())
    }
}
