//! Compiled graph cache.
//!
//! Steady-state frames declare the same graph over and over. The cache maps
//! a [`CacheKey`] to the compiled [`FrameGraph`] so those frames skip every
//! compiler stage; the caller only refreshes per-pass user data.
//!
//! The key is derived from a structural [`GraphFingerprint`] (render target
//! size and format, bindless layout) combined with an opaque caller blob.
//! The cache trusts the key: if the caller leaves something structural out
//! of it, a stale graph is returned.

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::backend::Swapchain;
use crate::config::FrameGraphConfig;
use crate::graph::{FrameGraph, FrameGraphBuilder, GraphBegin, GraphState};
use crate::types::TextureFormat;

/// Structural inputs that change the shape of a graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GraphFingerprint {
    /// Render target width.
    pub width: u32,
    /// Render target height.
    pub height: u32,
    /// Render target format.
    pub format: TextureFormat,
    /// Identity of the bindless descriptor layout.
    pub bindless_layout: u64,
}

impl GraphFingerprint {
    /// Fingerprint for a render target size and format.
    pub fn new(width: u32, height: u32, format: TextureFormat) -> Self {
        Self {
            width,
            height,
            format,
            bindless_layout: 0,
        }
    }

    /// Set the bindless layout identity.
    pub fn with_bindless_layout(mut self, layout: u64) -> Self {
        self.bindless_layout = layout;
        self
    }
}

/// Key of a cached graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(u64);

impl CacheKey {
    /// Combine a fingerprint with an opaque caller blob.
    pub fn new(fingerprint: &GraphFingerprint, blob: &[u8]) -> Self {
        let mut hasher = DefaultHasher::new();
        fingerprint.hash(&mut hasher);
        let structural = hasher.finish();

        let mut hasher = DefaultHasher::new();
        blob.hash(&mut hasher);
        Self(structural ^ hasher.finish())
    }

    /// Use a precomputed key.
    pub fn from_raw(value: u64) -> Self {
        Self(value)
    }

    /// Raw key value.
    pub fn value(&self) -> u64 {
        self.0
    }
}

/// Hit/miss counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups that returned a graph.
    pub hits: u64,
    /// Lookups that found nothing.
    pub misses: u64,
    /// Entries dropped to make room.
    pub evictions: u64,
}

#[derive(Debug)]
struct CacheEntry {
    graph: Arc<FrameGraph>,
    last_used: u64,
}

/// Least-recently-used cache of compiled graphs.
///
/// Owned by the frame-loop thread; lookups and inserts are not synchronized.
#[derive(Debug)]
pub struct GraphCache {
    config: FrameGraphConfig,
    entries: HashMap<CacheKey, CacheEntry>,
    clock: u64,
    stats: CacheStats,
}

impl GraphCache {
    /// Create an empty cache. Graphs it builds use `config`.
    pub fn new(config: FrameGraphConfig) -> Self {
        Self {
            entries: HashMap::with_capacity(config.cache_capacity),
            config,
            clock: 0,
            stats: CacheStats::default(),
        }
    }

    /// Configuration handed to builders.
    pub fn config(&self) -> &FrameGraphConfig {
        &self.config
    }

    /// Begin a frame's graph.
    ///
    /// Returns the cached graph for `key` if there is one, otherwise a
    /// builder that stores its result under `key`.
    pub fn begin_graph(&mut self, name: &str, key: CacheKey) -> GraphBegin {
        match self.get(key) {
            Some(graph) => {
                log::trace!("graph '{name}' cache hit ({key:?})");
                graph.set_state(GraphState::Cached);
                GraphBegin::Cached(graph)
            }
            None => {
                log::debug!("graph '{name}' cache miss ({key:?}), compiling");
                GraphBegin::Build(FrameGraphBuilder::new(name, self.config.clone()).with_key(key))
            }
        }
    }

    /// Look up a graph, marking it most recently used.
    pub fn get(&mut self, key: CacheKey) -> Option<Arc<FrameGraph>> {
        self.clock += 1;
        match self.entries.get_mut(&key) {
            Some(entry) => {
                entry.last_used = self.clock;
                self.stats.hits += 1;
                Some(Arc::clone(&entry.graph))
            }
            None => {
                self.stats.misses += 1;
                None
            }
        }
    }

    /// Whether a graph is cached under `key`.
    pub fn contains(&self, key: CacheKey) -> bool {
        self.entries.contains_key(&key)
    }

    /// Store a compiled graph, evicting the least recently used one if full.
    pub fn insert(&mut self, key: CacheKey, graph: Arc<FrameGraph>) {
        if !self.entries.contains_key(&key) && self.entries.len() >= self.config.cache_capacity {
            self.evict_lru();
        }
        self.clock += 1;
        graph.set_state(GraphState::Cached);
        self.entries.insert(
            key,
            CacheEntry {
                graph,
                last_used: self.clock,
            },
        );
    }

    /// Drop the graph cached under `key`.
    pub fn invalidate(&mut self, key: CacheKey) -> bool {
        self.entries.remove(&key).is_some()
    }

    /// Drop every cached graph.
    pub fn invalidate_all(&mut self) {
        if !self.entries.is_empty() {
            log::debug!("invalidating {} cached graphs", self.entries.len());
        }
        self.entries.clear();
    }

    /// Invalidate everything if the swapchain was recreated since last frame.
    pub fn refresh_for_swapchain(&mut self, swapchain: &dyn Swapchain) -> bool {
        if swapchain.was_recreated() {
            self.invalidate_all();
            true
        } else {
            false
        }
    }

    /// Number of cached graphs.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Hit/miss counters.
    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    fn evict_lru(&mut self) {
        let Some(oldest) = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_used)
            .map(|(key, _)| *key)
        else {
            return;
        };
        self.entries.remove(&oldest);
        self.stats.evictions += 1;
        log::trace!("evicted cached graph {oldest:?}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(name: &str) -> Arc<FrameGraph> {
        Arc::new(FrameGraphBuilder::new(name, FrameGraphConfig::default()).build())
    }

    #[test]
    fn test_key_depends_on_fingerprint_and_blob() {
        let fp = GraphFingerprint::new(1920, 1080, TextureFormat::Bgra8UnormSrgb);
        let a = CacheKey::new(&fp, b"scene");
        assert_eq!(a, CacheKey::new(&fp, b"scene"));
        assert_ne!(a, CacheKey::new(&fp, b"scene+ui"));

        let resized = GraphFingerprint::new(1280, 720, TextureFormat::Bgra8UnormSrgb);
        assert_ne!(a, CacheKey::new(&resized, b"scene"));
        assert_ne!(a, CacheKey::new(&fp.with_bindless_layout(7), b"scene"));
    }

    #[test]
    fn test_lru_eviction() {
        let config = FrameGraphConfig::default().with_cache_capacity(2);
        let mut cache = GraphCache::new(config);
        let (k1, k2, k3) = (CacheKey::from_raw(1), CacheKey::from_raw(2), CacheKey::from_raw(3));

        cache.insert(k1, graph("a"));
        cache.insert(k2, graph("b"));
        assert!(cache.get(k1).is_some());
        cache.insert(k3, graph("c"));

        assert!(cache.contains(k1));
        assert!(!cache.contains(k2));
        assert!(cache.contains(k3));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_stats_and_invalidate() {
        let mut cache = GraphCache::new(FrameGraphConfig::default());
        let key = CacheKey::from_raw(42);
        assert!(cache.get(key).is_none());
        cache.insert(key, graph("a"));
        assert!(cache.get(key).is_some());
        assert_eq!(cache.stats().hits, 1);
        assert_eq!(cache.stats().misses, 1);

        assert!(cache.invalidate(key));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_begin_graph_miss_returns_keyed_builder() {
        let mut cache = GraphCache::new(FrameGraphConfig::default());
        let key = CacheKey::from_raw(5);
        match cache.begin_graph("main", key) {
            GraphBegin::Build(builder) => assert_eq!(builder.key(), Some(key)),
            GraphBegin::Cached(_) => panic!("empty cache returned a graph"),
        }
    }
}
