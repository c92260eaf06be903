//! Type descriptors and capability bundles.
//!
//! A [`ModuleObject`] is either a class (one superclass edge plus an ordered
//! list of included bundles) or a capability bundle (a mixin: its own table
//! plus the bundles it includes, no superclass).
//!
//! # Architecture
//!
//! ```text
//! ModuleObject
//! ├── id: ModuleId          (dense index in the graph)
//! ├── name: Symbol          (qualified name, unique in the graph)
//! ├── kind: Class | Bundle
//! ├── superclass: Option<ModuleId>   (classes only; None only for the root)
//! ├── mixins: SmallVec<ModuleId; 4>  (inclusion order)
//! ├── table: MethodTable             (own methods only)
//! ├── generation: AtomicU64          (bumped on table/ancestry change)
//! ├── mro: MroCache                  (generation-stamped linearization)
//! └── dependents: FxHashSet<ModuleId> (subclasses and includers)
//! ```
//!
//! # Ownership
//!
//! The graph owns every module through an `Arc`. Edges between modules are
//! ids, so a subclass never keeps its superclass alive and a bundle lives as
//! long as the graph regardless of how many types include it.
//!
//! # Thread Safety
//!
//! Table and mixin list sit behind `parking_lot` locks and are only written
//! under the graph's hierarchy lock. The generation counter is bumped with
//! release ordering after the write completes and read with acquire ordering,
//! so a reader that sees the new generation also sees the new table.

use super::method_table::{MethodEntry, MethodTable};
use super::mro::MroCache;
use mosaic_core::{ModuleId, Symbol};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use rustc_hash::FxHashSet;
use smallvec::SmallVec;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

// =============================================================================
// Module Kind and Flags
// =============================================================================

/// Whether a module is a class or a bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleKind {
    /// Type descriptor with a superclass.
    Class,
    /// Capability bundle (mixin module).
    Bundle,
}

bitflags::bitflags! {
    /// Flags describing module provenance.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ModuleFlags: u32 {
        /// The root of every superclass chain.
        const ROOT = 1 << 0;
        /// Installed by the runtime rather than guest code.
        const BUILTIN = 1 << 1;
    }
}

/// Included bundles in inclusion order. Most types include a handful.
pub type Mixins = SmallVec<[ModuleId; 4]>;

// =============================================================================
// Module Object
// =============================================================================

/// A class or capability bundle.
#[derive(Debug)]
pub struct ModuleObject {
    id: ModuleId,
    name: Symbol,
    kind: ModuleKind,
    flags: ModuleFlags,
    superclass: Option<ModuleId>,
    mixins: RwLock<Mixins>,
    table: RwLock<MethodTable>,
    generation: AtomicU64,
    mro: MroCache,
    dependents: RwLock<FxHashSet<ModuleId>>,
}

impl ModuleObject {
    pub(crate) fn new(
        id: ModuleId,
        name: Symbol,
        kind: ModuleKind,
        flags: ModuleFlags,
        superclass: Option<ModuleId>,
        mixins: Mixins,
    ) -> Self {
        Self {
            id,
            name,
            kind,
            flags,
            superclass,
            mixins: RwLock::new(mixins),
            table: RwLock::new(MethodTable::new()),
            generation: AtomicU64::new(1),
            mro: MroCache::new(),
            dependents: RwLock::new(FxHashSet::default()),
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    #[inline]
    pub fn id(&self) -> ModuleId {
        self.id
    }

    #[inline]
    pub fn name(&self) -> Symbol {
        self.name
    }

    #[inline]
    pub fn kind(&self) -> ModuleKind {
        self.kind
    }

    #[inline]
    pub fn flags(&self) -> ModuleFlags {
        self.flags
    }

    #[inline]
    pub fn is_class(&self) -> bool {
        self.kind == ModuleKind::Class
    }

    #[inline]
    pub fn is_bundle(&self) -> bool {
        self.kind == ModuleKind::Bundle
    }

    #[inline]
    pub fn is_root(&self) -> bool {
        self.flags.contains(ModuleFlags::ROOT)
    }

    /// Direct superclass. `None` for the root and for bundles.
    #[inline]
    pub fn superclass(&self) -> Option<ModuleId> {
        self.superclass
    }

    /// Directly included bundles, in inclusion order.
    pub fn mixins(&self) -> Mixins {
        self.mixins.read().clone()
    }

    // =========================================================================
    // Generation
    // =========================================================================

    /// Current generation stamp.
    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Publish a change. Must be called after the change is written.
    #[inline]
    pub(crate) fn bump_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::AcqRel) + 1
    }

    #[inline]
    pub(crate) fn mro_cache(&self) -> &MroCache {
        &self.mro
    }

    // =========================================================================
    // Method Table
    // =========================================================================

    /// Own entry for `name`, ignoring ancestors.
    #[inline]
    pub fn own_method(&self, name: Symbol) -> Option<Arc<MethodEntry>> {
        self.table.read().get(name).cloned()
    }

    /// Shared view of the own method table.
    #[inline]
    pub fn table(&self) -> RwLockReadGuard<'_, MethodTable> {
        self.table.read()
    }

    #[inline]
    pub(crate) fn table_mut(&self) -> RwLockWriteGuard<'_, MethodTable> {
        self.table.write()
    }

    #[inline]
    pub(crate) fn push_mixin(&self, bundle: ModuleId) {
        self.mixins.write().push(bundle);
    }

    // =========================================================================
    // Dependents
    // =========================================================================

    /// Record that `dependent` has this module in its ancestry.
    pub(crate) fn add_dependent(&self, dependent: ModuleId) {
        self.dependents.write().insert(dependent);
    }

    /// Direct subclasses and includers.
    pub fn dependents(&self) -> Vec<ModuleId> {
        let mut ids: Vec<_> = self.dependents.read().iter().copied().collect();
        ids.sort_unstable();
        ids
    }
}

// =============================================================================
// Tests
// =============================================================================
