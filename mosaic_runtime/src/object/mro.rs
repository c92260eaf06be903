//! Method resolution order.
//!
//! Ancestry is single inheritance plus mixins, so the order is fixed by a
//! simple walk rather than C3 merging:
//!
//! 1. the module itself;
//! 2. its directly included bundles, last included first, each followed
//!    depth-first by the bundles *it* includes (again last first);
//! 3. the superclass's own linearization.
//!
//! A bundle already placed is never placed again (first occurrence wins), so
//! including a bundle twice, directly or through two paths, has no effect.
//!
//! # Example
//!
//! ```text
//! class Animal            ; speak
//! module Loud             ; speak
//! class Dog < Animal
//!   include Loud
//!
//! MRO(Dog) = [Dog, Loud, Animal, Object]
//! ```

use super::module::{Mixins, ModuleObject};
use mosaic_core::ModuleId;
use parking_lot::RwLock;
use rustc_hash::FxHashSet;
use smallvec::SmallVec;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// A computed linearization. Immutable and freely shared.
pub type Mro = Arc<[ModuleId]>;

// =============================================================================
// Linearization
// =============================================================================

/// Linearize `target`.
///
/// * `resolve` - fetch a module by id (for walking bundle includes)
/// * `superclass_mro` - linearization of the superclass, usually from its cache
pub fn linearize<R, S>(target: &ModuleObject, resolve: R, superclass_mro: S) -> Mro
where
    R: Fn(ModuleId) -> Option<Arc<ModuleObject>>,
    S: FnOnce(ModuleId) -> Mro,
{
    let mut order: SmallVec<[ModuleId; 8]> = SmallVec::new();
    let mut seen: FxHashSet<ModuleId> = FxHashSet::default();

    order.push(target.id());
    seen.insert(target.id());

    push_bundles(&target.mixins(), &resolve, &mut order, &mut seen);

    if let Some(superclass) = target.superclass() {
        for &id in superclass_mro(superclass).iter() {
            if seen.insert(id) {
                order.push(id);
            }
        }
    }

    Arc::from(order.as_slice())
}

fn push_bundles<R>(
    mixins: &Mixins,
    resolve: &R,
    order: &mut SmallVec<[ModuleId; 8]>,
    seen: &mut FxHashSet<ModuleId>,
) where
    R: Fn(ModuleId) -> Option<Arc<ModuleObject>>,
{
    for &bundle in mixins.iter().rev() {
        if !seen.insert(bundle) {
            continue;
        }
        order.push(bundle);
        if let Some(module) = resolve(bundle) {
            push_bundles(&module.mixins(), resolve, order, seen);
        }
    }
}

// =============================================================================
// Generation-Stamped Cache
// =============================================================================

/// Per-module cache of its linearization.
///
/// Valid only for the generation it was computed at. Concurrent writers may
/// race to store equal results; the last store wins.
#[derive(Debug, Default)]
pub struct MroCache {
    slot: RwLock<Option<(u64, Mro)>>,
    computations: AtomicU64,
}

impl MroCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The cached order, if it was computed at `generation`.
    #[inline]
    pub fn get(&self, generation: u64) -> Option<Mro> {
        match &*self.slot.read() {
            Some((stamp, mro)) if *stamp == generation => Some(mro.clone()),
            _ => None,
        }
    }

    /// Store a freshly computed order.
    pub fn store(&self, generation: u64, mro: Mro) {
        self.computations.fetch_add(1, Ordering::Relaxed);
        *self.slot.write() = Some((generation, mro));
    }

    /// How many times the order was (re)computed.
    pub fn computations(&self) -> u64 {
        self.computations.load(Ordering::Relaxed)
    }
}

// =============================================================================
// Tests
// =============================================================================
