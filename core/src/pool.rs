//! Frame-slot pooling for allocation reuse.
//!
//! Frame graphs are rebuilt every frame. Their node tables are plain `Vec`s,
//! so dropping and reallocating them each frame is pure churn. This module
//! keeps those allocations alive across frames:
//!
//! - [`Poolable`] - a value that can be cleared without losing capacity
//! - [`FramePool<T>`] - one free list per frame-in-flight slot, recycled
//!   wholesale when the slot comes around again
//!
//! # Example
//!
//! ```
//! use framegraph_core::pool::{FramePool, Poolable};
//!
//! #[derive(Debug, Default)]
//! struct Nodes {
//!     items: Vec<u32>,
//! }
//!
//! impl Poolable for Nodes {
//!     fn new_empty() -> Self {
//!         Self::default()
//!     }
//!     fn reset(&mut self) {
//!         self.items.clear();
//!     }
//! }
//!
//! let mut pool = FramePool::<Nodes>::new(2);
//! let mut nodes = pool.take(0);
//! nodes.items.extend_from_slice(&[1, 2, 3]);
//! pool.recycle(0, nodes);
//!
//! // Next use of slot 0 gets the cleared value with its capacity intact.
//! let nodes = pool.take(0);
//! assert!(nodes.items.is_empty());
//! assert!(nodes.items.capacity() >= 3);
//! ```

/// Trait for types that can be pooled and reused.
///
/// Implementors must be able to create an empty instance and clear their
/// contents while preserving allocated capacity.
pub trait Poolable {
    /// Create a new empty instance for pool initialization.
    fn new_empty() -> Self;

    /// Reset the value to an empty state, preserving allocated capacity.
    ///
    /// For example, call `Vec::clear()` rather than replacing with a new `Vec`.
    fn reset(&mut self);
}

/// Per-frame-in-flight free lists of reusable values.
///
/// Values handed out by [`take`](Self::take) for slot `n` are expected to be
/// returned to slot `n` once the GPU has finished with that slot. Values that
/// are never returned (for example because a cache retained them) are simply
/// dropped by their owner; the pool only loses the allocation reuse.
#[derive(Debug)]
pub struct FramePool<T: Poolable> {
    slots: Vec<Vec<T>>,
}

impl<T: Poolable> FramePool<T> {
    /// Create a pool with `slot_count` frame slots (at least one).
    pub fn new(slot_count: usize) -> Self {
        let slot_count = slot_count.max(1);
        Self {
            slots: (0..slot_count).map(|_| Vec::new()).collect(),
        }
    }

    /// Number of frame slots.
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Take a cleared value for `slot`, reusing a recycled one when available.
    pub fn take(&mut self, slot: usize) -> T {
        let index = slot % self.slots.len();
        self.slots[index].pop().unwrap_or_else(T::new_empty)
    }

    /// Return a value to `slot`. It is reset immediately, keeping its capacity.
    pub fn recycle(&mut self, slot: usize, mut value: T) {
        value.reset();
        let index = slot % self.slots.len();
        self.slots[index].push(value);
    }

    /// Number of values waiting for reuse in `slot`.
    pub fn available(&self, slot: usize) -> usize {
        self.slots[slot % self.slots.len()].len()
    }

    /// Drop every pooled value of every slot.
    pub fn clear(&mut self) {
        log::trace!(
            "FramePool: dropping {} pooled values",
            self.slots.iter().map(Vec::len).sum::<usize>()
        );
        for slot in &mut self.slots {
            slot.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default, PartialEq)]
    struct TestBuffer {
        data: Vec<u32>,
    }

    impl Poolable for TestBuffer {
        fn new_empty() -> Self {
            Self::default()
        }
        fn reset(&mut self) {
            self.data.clear();
        }
    }

    #[test]
    fn test_frame_pool_slots_are_independent() {
        let mut pool = FramePool::<TestBuffer>::new(2);
        pool.recycle(0, TestBuffer { data: vec![1, 2] });

        assert_eq!(pool.available(0), 1);
        assert_eq!(pool.available(1), 0);

        let from_other = pool.take(1);
        assert_eq!(from_other.data.capacity(), 0);

        let reused = pool.take(0);
        assert!(reused.data.is_empty());
        assert!(reused.data.capacity() >= 2);
        assert_eq!(pool.available(0), 0);
    }

    #[test]
    fn test_frame_pool_wraps_slot_index() {
        let mut pool = FramePool::<TestBuffer>::new(3);
        pool.recycle(4, TestBuffer::default());
        assert_eq!(pool.available(1), 1);
    }

    #[test]
    fn test_frame_pool_zero_slots_clamped() {
        let mut pool = FramePool::<TestBuffer>::new(0);
        assert_eq!(pool.slot_count(), 1);
        pool.recycle(0, TestBuffer::default());
        pool.clear();
        assert_eq!(pool.available(0), 0);
    }
}
