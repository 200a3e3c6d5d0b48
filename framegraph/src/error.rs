//! Error types for graph compilation and execution.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::backend::BackendError;

/// Broad class of a compile failure.
///
/// Callers branch on this: declaration and structural errors mean the
/// frame's graph is malformed, invariant errors mean the compiler itself is
/// broken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// The caller declared something inconsistent.
    Declaration,
    /// The declarations are consistent but form an unschedulable graph.
    Structural,
    /// An internal compiler invariant was violated.
    Invariant,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Declaration => write!(f, "declaration"),
            Self::Structural => write!(f, "structural"),
            Self::Invariant => write!(f, "invariant"),
        }
    }
}

/// Errors produced while building or compiling a frame graph.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// A resource gained a second independent producer.
    #[error("resource '{resource}' added as output more than once (pass '{pass}')")]
    DuplicateOutput { resource: String, pass: String },

    /// A second pass writes the swapchain with a different set of outputs.
    #[error("pass '{pass}' writes the swapchain but its other outputs differ from the first writer")]
    MultipleSwapchainUsage { pass: String },

    /// More than one swapchain resource was imported.
    #[error("graph already has a swapchain resource")]
    MultipleSwapchains,

    /// A usage reads a transient resource no pass has written yet.
    #[error("pass '{pass}' usage '{name}' reads a transient resource before any pass writes it")]
    DanglingUsage { pass: String, name: String },

    /// A pass handle does not belong to this graph.
    #[error("invalid pass handle {0}")]
    InvalidPassHandle(u32),

    /// A resource handle does not belong to this graph.
    #[error("invalid resource handle {0}")]
    InvalidResourceHandle(u32),

    /// The same usage name was registered twice on one side of a pass.
    #[error("pass '{pass}' already has a usage named '{name}'")]
    DuplicateUsageName { pass: String, name: String },

    /// The dependency graph contains a cycle through the named pass.
    #[error("cyclic dependency through pass '{pass}'")]
    CyclicDependency { pass: String },

    /// Culling drove a reference count below zero. Compiler bug.
    #[error("invalid reference counts on resource '{resource}'")]
    InvalidReferenceCounts { resource: String },

    /// Every pass was culled.
    #[error("no work to do: every pass was culled")]
    NoWorkToDo,
}

impl GraphError {
    /// Category of this error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::DuplicateOutput { .. }
            | Self::MultipleSwapchainUsage { .. }
            | Self::MultipleSwapchains
            | Self::DanglingUsage { .. }
            | Self::InvalidPassHandle(_)
            | Self::InvalidResourceHandle(_)
            | Self::DuplicateUsageName { .. } => ErrorCategory::Declaration,
            Self::CyclicDependency { .. } | Self::NoWorkToDo => ErrorCategory::Structural,
            Self::InvalidReferenceCounts { .. } => ErrorCategory::Invariant,
        }
    }

    /// Name of the pass or resource the error points at, if any.
    pub fn location(&self) -> Option<&str> {
        match self {
            Self::DuplicateOutput { pass, .. }
            | Self::MultipleSwapchainUsage { pass }
            | Self::DanglingUsage { pass, .. }
            | Self::DuplicateUsageName { pass, .. }
            | Self::CyclicDependency { pass } => Some(pass),
            Self::InvalidReferenceCounts { resource } => Some(resource),
            _ => None,
        }
    }

    /// Whether this is the benign "culled to nothing" result.
    pub fn is_no_work(&self) -> bool {
        matches!(self, Self::NoWorkToDo)
    }
}

/// Structured report of a failed compile, logged and kept on the graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphReport {
    /// Graph name.
    pub graph: String,
    /// Error category.
    pub category: ErrorCategory,
    /// Human-readable message.
    pub message: String,
    /// Offending pass or resource.
    pub location: Option<String>,
}

impl GraphReport {
    /// Build a report for `error` raised while compiling `graph`.
    pub fn new(graph: &str, error: &GraphError) -> Self {
        Self {
            graph: graph.to_string(),
            category: error.category(),
            message: error.to_string(),
            location: error.location().map(str::to_string),
        }
    }
}

impl fmt::Display for GraphReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] graph '{}': {}", self.category, self.graph, self.message)?;
        if let Some(location) = &self.location {
            write!(f, " (at '{location}')")?;
        }
        Ok(())
    }
}

/// Errors produced while executing a compiled graph.
#[derive(Error, Debug)]
pub enum ExecuteError {
    /// The graph failed to compile and cannot be executed.
    #[error("graph failed to compile: {0}")]
    GraphFailed(#[from] GraphError),

    /// A backend call failed.
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// The fence guarding a frame slot never signaled.
    #[error("device hung: frame slot {slot} fence not signaled after {waited:?}")]
    DeviceHung { slot: usize, waited: Duration },

    /// The recording pool shut down while work was outstanding.
    #[error("recording pool closed")]
    RecordingPoolClosed,
}

/// Result alias for graph building operations.
pub type GraphResult<T> = Result<T, GraphError>;
