//! Frame graph configuration.

use std::time::Duration;

use crate::types::QueueType;

/// Queue family index used for each queue type.
///
/// Two queue types sharing a family never need ownership transfers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueueFamilies {
    /// Family of the graphics queue.
    pub graphics: u32,
    /// Family of the async compute queue.
    pub compute: u32,
    /// Family of the transfer queue.
    pub transfer: u32,
}

impl QueueFamilies {
    /// All queue types on one family (no ownership transfers at all).
    pub fn unified(family: u32) -> Self {
        Self {
            graphics: family,
            compute: family,
            transfer: family,
        }
    }

    /// Family index of the given queue type.
    pub fn family(&self, queue: QueueType) -> u32 {
        match queue {
            QueueType::Graphics => self.graphics,
            QueueType::Compute => self.compute,
            QueueType::Transfer => self.transfer,
        }
    }
}

impl Default for QueueFamilies {
    fn default() -> Self {
        Self {
            graphics: 0,
            compute: 1,
            transfer: 2,
        }
    }
}

/// Configuration shared by the compiler, cache and executor.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameGraphConfig {
    /// Number of frames that may be in flight on the GPU at once.
    pub frames_in_flight: usize,
    /// Single fence wait before a warning is logged and the wait retried.
    pub fence_timeout: Duration,
    /// Total fence wait after which the device is treated as hung.
    pub fence_hard_timeout: Duration,
    /// Recording worker threads. 0 records inline on the calling thread.
    pub recording_workers: usize,
    /// Capacity of the bounded recording job queue.
    pub recording_queue_capacity: usize,
    /// Fold attachment layout transitions into render pass load/store ops.
    pub native_render_passes: bool,
    /// Queue family mapping.
    pub queue_families: QueueFamilies,
    /// Maximum number of compiled graphs kept in the cache.
    pub cache_capacity: usize,
}

impl Default for FrameGraphConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: 2,
            fence_timeout: Duration::from_millis(100),
            fence_hard_timeout: Duration::from_secs(5),
            recording_workers: 0,
            recording_queue_capacity: 16,
            native_render_passes: true,
            queue_families: QueueFamilies::default(),
            cache_capacity: 32,
        }
    }
}

impl FrameGraphConfig {
    /// Create the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of frames in flight (at least 1).
    pub fn with_frames_in_flight(mut self, frames: usize) -> Self {
        self.frames_in_flight = frames.max(1);
        self
    }

    /// Set the per-wait and hard fence timeouts.
    pub fn with_fence_timeouts(mut self, timeout: Duration, hard_timeout: Duration) -> Self {
        self.fence_timeout = timeout;
        self.fence_hard_timeout = hard_timeout.max(timeout);
        self
    }

    /// Set the number of recording worker threads.
    pub fn with_recording_workers(mut self, workers: usize) -> Self {
        self.recording_workers = workers;
        self
    }

    /// Set the recording job queue capacity (at least 1).
    pub fn with_recording_queue_capacity(mut self, capacity: usize) -> Self {
        self.recording_queue_capacity = capacity.max(1);
        self
    }

    /// Enable or disable native render pass folding.
    pub fn with_native_render_passes(mut self, enabled: bool) -> Self {
        self.native_render_passes = enabled;
        self
    }

    /// Set the queue family mapping.
    pub fn with_queue_families(mut self, families: QueueFamilies) -> Self {
        self.queue_families = families;
        self
    }

    /// Set the cache capacity (at least 1).
    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity.max(1);
        self
    }
}
