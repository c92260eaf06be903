//! Registry of call-site inline caches.
//!
//! Compiled code identifies each send by a [`CallSiteId`]. The manager hands
//! out one [`CallSiteCache`] per id, creating it on first use, and aggregates
//! statistics across all of them.
//!
//! # Performance Characteristics
//!
//! - **Monomorphic**: one key comparison plus the stamp check
//! - **Polymorphic**: linear scan of at most `ic_entries` entries
//! - **Megamorphic**: full slow-path dispatch (no caching)
//!
//! # Thread Safety
//!
//! Sites live in a `DashMap` and are shared as `Arc`s, so the same call site
//! may execute on several threads at once.

use crate::inline_cache::CallSiteCache;
use dashmap::DashMap;
use std::sync::Arc;

// =============================================================================
// Call Site Identifier
// =============================================================================

/// Unique identifier of a send within compiled code.
///
/// Combines the code object id with the instruction offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallSiteId {
    pub code_id: u32,
    pub offset: u32,
}

impl CallSiteId {
    #[inline]
    pub const fn new(code_id: u32, offset: u32) -> Self {
        Self { code_id, offset }
    }
}

// =============================================================================
// IC Classification
// =============================================================================

/// Classification of a call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ICClassification {
    /// Never recorded.
    Uninitialized,
    /// Single receiver/shape.
    Monomorphic,
    /// Two entries.
    Bimorphic,
    /// Three or more entries, within capacity.
    Polymorphic,
    /// Too many keys - always the slow path.
    Megamorphic,
}

// =============================================================================
// IC Manager
// =============================================================================

/// Every call-site cache of one dispatcher.
#[derive(Debug)]
pub struct ICManager {
    sites: DashMap<CallSiteId, Arc<CallSiteCache>>,
    /// Capacity given to newly created sites.
    capacity: usize,
}

impl ICManager {
    /// Create a manager whose sites hold up to `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self {
            sites: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The cache for `id`, created empty on first use.
    pub fn site(&self, id: CallSiteId) -> Arc<CallSiteCache> {
        if let Some(site) = self.sites.get(&id) {
            return site.value().clone();
        }
        self.sites
            .entry(id)
            .or_insert_with(|| Arc::new(CallSiteCache::new(self.capacity)))
            .value()
            .clone()
    }

    /// The cache for `id` if it was ever used.
    pub fn get(&self, id: CallSiteId) -> Option<Arc<CallSiteCache>> {
        self.sites.get(&id).map(|site| site.value().clone())
    }

    /// Get the classification of a call site.
    pub fn classification(&self, id: CallSiteId) -> ICClassification {
        self.get(id)
            .map(|site| site.classification())
            .unwrap_or(ICClassification::Uninitialized)
    }

    // =========================================================================
    // Statistics
    // =========================================================================

    /// Get number of call sites.
    pub fn site_count(&self) -> usize {
        self.sites.len()
    }

    /// Hit rate across all sites as a percentage.
    pub fn global_hit_rate(&self) -> f64 {
        let (hits, misses) = self.sites.iter().fold((0u64, 0u64), |(h, m), site| {
            let (hits, misses) = site.value().stats();
            (h + hits, m + misses)
        });
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            (hits as f64 / total as f64) * 100.0
        }
    }

    /// Get breakdown of site classifications.
    pub fn classification_breakdown(&self) -> ICStats {
        let mut stats = ICStats::default();
        for site in self.sites.iter() {
            match site.value().classification() {
                ICClassification::Uninitialized => stats.uninitialized += 1,
                ICClassification::Monomorphic => stats.monomorphic += 1,
                ICClassification::Bimorphic => stats.bimorphic += 1,
                ICClassification::Polymorphic => stats.polymorphic += 1,
                ICClassification::Megamorphic => stats.megamorphic += 1,
            }
        }
        stats
    }

    /// Forget every site.
    pub fn clear(&self) {
        self.sites.clear();
    }
}

impl Default for ICManager {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_IC_ENTRIES)
    }
}

// =============================================================================
// IC Statistics
// =============================================================================

/// Statistics about call-site classifications.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ICStats {
    pub uninitialized: usize,
    pub monomorphic: usize,
    pub bimorphic: usize,
    pub polymorphic: usize,
    pub megamorphic: usize,
}

impl ICStats {
    /// Total call sites.
    pub fn total(&self) -> usize {
        self.uninitialized + self.monomorphic + self.bimorphic + self.polymorphic + self.megamorphic
    }

    /// Percentage that are monomorphic.
    pub fn monomorphic_percentage(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            0.0
        } else {
            (self.monomorphic as f64 / total as f64) * 100.0
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
