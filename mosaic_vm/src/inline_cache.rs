//! Per-call-site inline caches for message sends.
//!
//! A call site remembers the resolutions it produced, keyed by receiver and
//! call shape. A hit skips lookup and overload resolution entirely; only the
//! conversion plan is replayed against the new arguments.
//!
//! # State Machine
//!
//! ```text
//! Empty ──first record──▶ Monomorphic ──other key──▶ Polymorphic (≤ capacity)
//!                                                        │ one more key
//!                                                        ▼
//!                                                   Megamorphic (terminal)
//! ```
//!
//! Re-recording a key that is already cached replaces that entry in place,
//! which is how stale entries are refreshed.
//!
//! # Thread Safety
//!
//! The state is an immutable record behind an `Arc`. Readers clone the `Arc`
//! under a short read lock; writers build a complete new record and swap it
//! in. A reader never observes a half-written entry.

use crate::call_shape::CallShape;
use crate::ic_manager::ICClassification;
use crate::ops::method_dispatch::{ReceiverKey, ResolvedCall, Stamps, stamps_current};
use mosaic_runtime::{SiteStorage, TypeGraph};
use parking_lot::RwLock;
use smallvec::SmallVec;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace};

// =============================================================================
// Cache Entries
// =============================================================================

/// One remembered resolution.
#[derive(Debug, Clone)]
pub struct IcEntry {
    pub receiver: ReceiverKey,
    pub shape: CallShape,
    /// Generations that must still be current for the entry to be valid.
    pub stamps: Stamps,
    /// Converter registry epoch at resolution time.
    pub converter_epoch: u64,
    pub resolved: Arc<ResolvedCall>,
}

impl IcEntry {
    #[inline]
    fn matches(&self, receiver: ReceiverKey, shape: &CallShape) -> bool {
        self.receiver == receiver && self.shape == *shape
    }

    #[inline]
    fn is_valid(&self, graph: &TypeGraph, converter_epoch: u64) -> bool {
        self.converter_epoch == converter_epoch && stamps_current(graph, &self.stamps)
    }
}

/// Cache state of one call site.
#[derive(Debug, Clone, Default)]
pub enum IcState {
    #[default]
    Empty,
    Monomorphic(IcEntry),
    Polymorphic(SmallVec<[IcEntry; 4]>),
    /// Too many keys; the site always takes the slow path.
    Megamorphic,
}

impl IcState {
    fn entries(&self) -> &[IcEntry] {
        match self {
            IcState::Monomorphic(entry) => std::slice::from_ref(entry),
            IcState::Polymorphic(entries) => entries.as_slice(),
            IcState::Empty | IcState::Megamorphic => &[],
        }
    }

    fn name(&self) -> &'static str {
        match self {
            IcState::Empty => "empty",
            IcState::Monomorphic(_) => "monomorphic",
            IcState::Polymorphic(_) => "polymorphic",
            IcState::Megamorphic => "megamorphic",
        }
    }
}

/// Result of consulting a call site.
#[derive(Debug, Clone)]
pub enum IcLookup {
    /// A valid entry for this receiver and shape.
    Hit(Arc<ResolvedCall>),
    /// Resolve on the slow path, then record.
    Miss,
    /// Resolve on the slow path; recording is pointless.
    Megamorphic,
}

impl IcLookup {
    #[inline]
    pub fn is_hit(&self) -> bool {
        matches!(self, IcLookup::Hit(_))
    }
}

// =============================================================================
// Call Site Cache
// =============================================================================

/// Inline cache and scratch storage of one call site.
#[derive(Debug)]
pub struct CallSiteCache {
    state: RwLock<Arc<IcState>>,
    storage: SiteStorage,
    /// Entries held before the site goes megamorphic.
    capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CallSiteCache {
    /// Create an empty cache holding up to `capacity` entries (at least one).
    pub fn new(capacity: usize) -> Self {
        Self {
            state: RwLock::new(Arc::new(IcState::Empty)),
            storage: SiteStorage::new(),
            capacity: capacity.max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Snapshot of the current state.
    #[inline]
    pub fn state(&self) -> Arc<IcState> {
        self.state.read().clone()
    }

    /// Per-site storage handed to natives with an `Implicit(SiteStorage)` slot.
    #[inline]
    pub fn storage(&self) -> &SiteStorage {
        &self.storage
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Look for a still-valid entry for `receiver` and `shape`.
    ///
    /// This is the hot path.
    pub fn lookup(
        &self,
        graph: &TypeGraph,
        receiver: ReceiverKey,
        shape: &CallShape,
        converter_epoch: u64,
    ) -> IcLookup {
        let state = self.state();
        if matches!(*state, IcState::Megamorphic) {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return IcLookup::Megamorphic;
        }

        let hit = state
            .entries()
            .iter()
            .find(|e| e.matches(receiver, shape))
            .filter(|e| e.is_valid(graph, converter_epoch));

        match hit {
            Some(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                trace!(?receiver, %shape, "inline cache hit");
                IcLookup::Hit(entry.resolved.clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                IcLookup::Miss
            }
        }
    }

    /// Remember a slow-path resolution.
    pub fn record(&self, entry: IcEntry) {
        let mut guard = self.state.write();
        let next = self.transition(&guard, entry);
        if guard.name() != next.name() {
            debug!(from = guard.name(), to = next.name(), capacity = self.capacity, "inline cache transition");
        }
        *guard = Arc::new(next);
    }

    fn transition(&self, current: &IcState, entry: IcEntry) -> IcState {
        match current {
            IcState::Empty => IcState::Monomorphic(entry),

            IcState::Monomorphic(existing) if existing.matches(entry.receiver, &entry.shape) => {
                IcState::Monomorphic(entry)
            }
            IcState::Monomorphic(existing) => {
                if self.capacity < 2 {
                    return IcState::Megamorphic;
                }
                let mut entries = SmallVec::new();
                entries.push(existing.clone());
                entries.push(entry);
                IcState::Polymorphic(entries)
            }

            IcState::Polymorphic(entries) => {
                let mut entries = entries.clone();
                if let Some(slot) = entries.iter_mut().find(|e| e.matches(entry.receiver, &entry.shape)) {
                    *slot = entry;
                } else if entries.len() < self.capacity {
                    entries.push(entry);
                } else {
                    return IcState::Megamorphic;
                }
                IcState::Polymorphic(entries)
            }

            IcState::Megamorphic => IcState::Megamorphic,
        }
    }

    /// Number of cached entries. Zero when megamorphic.
    pub fn entry_count(&self) -> usize {
        self.state().entries().len()
    }

    #[inline]
    pub fn is_megamorphic(&self) -> bool {
        matches!(*self.state(), IcState::Megamorphic)
    }

    /// Current classification of this site.
    pub fn classification(&self) -> ICClassification {
        match &*self.state() {
            IcState::Empty => ICClassification::Uninitialized,
            IcState::Monomorphic(_) => ICClassification::Monomorphic,
            IcState::Polymorphic(entries) if entries.len() <= 2 => ICClassification::Bimorphic,
            IcState::Polymorphic(_) => ICClassification::Polymorphic,
            IcState::Megamorphic => ICClassification::Megamorphic,
        }
    }

    /// Tuple of (hits, misses).
    pub fn stats(&self) -> (u64, u64) {
        (self.hits.load(Ordering::Relaxed), self.misses.load(Ordering::Relaxed))
    }

    /// Get hit rate as a percentage (0.0-100.0).
    pub fn hit_rate(&self) -> f64 {
        let (hits, misses) = self.stats();
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            (hits as f64 / total as f64) * 100.0
        }
    }

    /// Return to the empty state, even from megamorphic.
    pub fn reset(&self) {
        *self.state.write() = Arc::new(IcState::Empty);
    }
}

// =============================================================================
// Tests
// =============================================================================
