//! # Frame Graph
//!
//! Per-frame GPU work described as a graph of passes and the resources they
//! read and write, compiled into an execution plan.
//!
//! ## Overview
//!
//! This crate provides:
//! - [`FrameGraphBuilder`] - Declarative description of passes, resources and usages
//! - [`compiler`] - Validation, culling, multi-queue scheduling, barrier synthesis
//!   and transient lifetimes
//! - [`GraphCache`] - Compiled graphs reused across frames with the same [`CacheKey`]
//! - [`Executor`] - Recording, submission, frame-in-flight fences and presentation
//! - [`backend`] - Collaborator traits, plus a recording Dummy backend for testing
//!
//! ## Example
//!
//! ```ignore
//! use framegraph::{CacheKey, Executor, GraphBegin, GraphCache, GraphFingerprint};
//!
//! cache.refresh_for_swapchain(&swapchain);
//! let key = CacheKey::new(&GraphFingerprint::new(w, h, format), b"main");
//! let graph = match cache.begin_graph("main", key) {
//!     GraphBegin::Cached(graph) => graph,
//!     GraphBegin::Build(mut builder) => {
//!         declare_passes(&mut builder);
//!         builder.end_graph(&mut cache)
//!     }
//! };
//! executor.execute(&graph, Some(&mut swapchain), None)?;
//! ```

pub mod backend;
pub mod cache;
pub mod compiler;
pub mod config;
pub mod error;
pub mod executor;
pub mod graph;
pub mod types;

// Re-export main types for convenience
pub use backend::{BackendError, BindlessRegistry, CommandRecorder, Device, Swapchain};
#[cfg(feature = "dummy")]
pub use backend::{DummyBackend, DummyBindless, DummySwapchain};
pub use cache::{CacheKey, CacheStats, GraphCache, GraphFingerprint};
pub use compiler::{Barrier, BarrierKind, CompiledPlan, CullReason, SubmissionBatch, Wave};
pub use config::{FrameGraphConfig, QueueFamilies};
pub use error::{ErrorCategory, ExecuteError, GraphError, GraphReport, GraphResult};
pub use executor::{ExecutedFrame, Executor, PassContext};
pub use graph::{
    FrameGraph, FrameGraphBuilder, GraphBegin, GraphState, PassHandle, ResourceFlags, ResourceHandle,
};
pub use types::{
    AccessFlags, BufferDesc, ClearValue, ImageDesc, LoadOp, PipelineStages, QueueType, ResourceKind,
    StoreOp, TextureFormat, TextureLayout,
};

/// Frame graph library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_empty_graph_has_no_work() {
        let graph = FrameGraphBuilder::new("empty", FrameGraphConfig::default()).build();
        assert_eq!(graph.error(), Some(&GraphError::NoWorkToDo));
        assert!(graph.passes().is_empty());
    }

    #[cfg(feature = "dummy")]
    #[test]
    fn test_dummy_backend() {
        let backend = DummyBackend::new();
        assert_eq!(backend.name(), "Dummy");
    }
}
