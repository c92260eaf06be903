//! Generation-stamped lookup cache.
//!
//! Walking an MRO is linear in hierarchy depth. This cache memoizes the
//! answer per (type, name, root) together with the generation of the type at
//! the time of the walk. An entry is only trusted while that generation is
//! still current, so registering a method on the type or any ancestor, or
//! including a bundle anywhere above it, turns the entry into a miss without
//! any explicit flush.
//!
//! # Cache Hierarchy
//!
//! 1. **Inline Cache** - per call site, skips lookup and overload resolution
//! 2. **Lookup Cache (this)** - per (type, name), skips the MRO walk
//! 3. **MRO Walk** - full lookup, populates this cache
//!
//! # Thread Safety
//!
//! Entries live in a `DashMap`. Racing writers may store the same answer
//! twice; the last store wins. A stored answer is stamped with the
//! generation read *before* the walk, so a write that lands mid-walk can
//! only make the entry look stale, never fresh.

use dashmap::DashMap;
use mosaic_core::{ModuleId, Symbol};
use mosaic_runtime::{LookupRoot, MethodLookup, TypeGraph};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{debug, trace};

// =============================================================================
// Cache Key and Entry
// =============================================================================

/// Cache key: (starting module, method name, lookup root).
type CacheKey = (ModuleId, Symbol, LookupRoot);

/// A memoized lookup.
#[derive(Debug, Clone)]
pub struct CachedLookup {
    pub lookup: MethodLookup,
    /// Generation of the starting module when the walk began.
    pub generation: u64,
}

// =============================================================================
// Method Cache
// =============================================================================

/// Lookup cache shared by every call site of one dispatcher.
///
/// Only positive answers are cached. An unbound name is recomputed every
/// time, which keeps the cache bounded by the number of names that actually
/// resolve.
#[derive(Debug)]
pub struct MethodCache {
    entries: DashMap<CacheKey, CachedLookup>,
    enabled: AtomicBool,
    hits: AtomicU64,
    misses: AtomicU64,
    /// Entries found but discarded because their stamp was stale.
    invalidations: AtomicU64,
}

impl MethodCache {
    /// Create a new empty, enabled cache.
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            enabled: AtomicBool::new(true),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
        }
    }

    /// Create a cache that always walks.
    pub fn disabled() -> Self {
        let cache = Self::new();
        cache.enabled.store(false, Ordering::Relaxed);
        cache
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Look up `name` from `start`, consulting the cache first.
    ///
    /// # Performance
    ///
    /// - Hit: one shard read plus one generation load
    /// - Miss: a full walk of the chain, then one shard write
    pub fn lookup(&self, graph: &TypeGraph, start: ModuleId, name: Symbol, root: LookupRoot) -> Option<MethodLookup> {
        let generation = graph.generation(start);
        let key = (start, name, root);

        if self.is_enabled() {
            // Clone out so no shard guard is held across the insert below.
            let cached = self.entries.get(&key).map(|e| e.value().clone());
            match cached {
                Some(cached) if cached.generation == generation => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    trace!(?start, %name, ?root, "lookup cache hit");
                    return Some(cached.lookup);
                }
                Some(stale) => {
                    self.invalidations.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        ?start,
                        %name,
                        cached = stale.generation,
                        current = generation,
                        "lookup cache entry stale"
                    );
                }
                None => {}
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let found = graph.find_method(start, name, root);

        match &found {
            Some(lookup) if self.is_enabled() => {
                debug!(?start, %name, owner = ?lookup.owner, generation, "lookup cache fill");
                self.entries.insert(
                    key,
                    CachedLookup {
                        lookup: lookup.clone(),
                        generation,
                    },
                );
            }
            Some(_) => {}
            None => {
                if self.entries.remove(&key).is_some() {
                    self.invalidations.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        found
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.entries.clear();
        self.invalidations.fetch_add(1, Ordering::Relaxed);
    }

    /// Get cache statistics for profiling.
    ///
    /// # Returns
    ///
    /// Tuple of (hits, misses, invalidations)
    pub fn stats(&self) -> (u64, u64, u64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
            self.invalidations.load(Ordering::Relaxed),
        )
    }

    /// Hit rate as a percentage. 0.0 before any lookup.
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let total = hits + self.misses.load(Ordering::Relaxed);
        if total == 0 {
            0.0
        } else {
            (hits as f64 / total as f64) * 100.0
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for MethodCache {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================
