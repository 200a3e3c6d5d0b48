//! # Frame Graph Core
//!
//! Basic utilities shared by the frame graph crates: frame-slot pooling and
//! optional Tracy instrumentation.

pub mod pool;
pub mod profiling;

/// Core library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
