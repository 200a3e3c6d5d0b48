//! Backend error types.

use thiserror::Error;

/// Errors reported by device, swapchain and allocator collaborators.
///
/// Distinct from [`GraphError`](crate::GraphError): these are runtime
/// failures of a well-formed graph, not declaration mistakes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("failed to acquire swapchain image: {0}")]
    AcquireFailed(String),
    #[error("failed to present: {0}")]
    PresentFailed(String),
    #[error("queue submission failed: {0}")]
    SubmitFailed(String),
    #[error("failed to allocate transient '{resource}': {reason}")]
    TransientAllocationFailed { resource: String, reason: String },
    #[error("out of GPU memory")]
    OutOfMemory,
    #[error("GPU device lost")]
    DeviceLost,
    #[error("surface outdated, swapchain must be recreated")]
    SurfaceOutdated,
}

impl BackendError {
    /// Presentation hiccups the caller can retry next frame.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::AcquireFailed(_) | Self::PresentFailed(_) | Self::SurfaceOutdated
        )
    }
}

/// Result alias for backend calls.
pub type BackendResult<T> = Result<T, BackendError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable() {
        assert!(BackendError::SurfaceOutdated.is_recoverable());
        assert!(BackendError::AcquireFailed("timeout".into()).is_recoverable());
        assert!(!BackendError::DeviceLost.is_recoverable());
        assert!(!BackendError::OutOfMemory.is_recoverable());
    }

    #[test]
    fn test_display() {
        let err = BackendError::TransientAllocationFailed {
            resource: "gbuffer".into(),
            reason: "heap full".into(),
        };
        assert_eq!(
            err.to_string(),
            "failed to allocate transient 'gbuffer': heap full"
        );
    }
}
