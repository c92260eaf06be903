//! LoadMethod: resolve a name on a receiver and check that the caller may see it.
//!
//! # Lookup Roots
//!
//! ```text
//! instance receiver   -> MRO of its class            (InstanceLevel, DualLevel)
//! type/bundle value   -> its superclass chain        (TypeLevel, DualLevel)
//!                        then instance methods of the builtin Module class
//! ```
//!
//! # Staleness Stamps
//!
//! Every successful load carries the generations of the modules whose
//! changes could alter the answer. They are read *before* the walk, so a
//! racing registration makes the stamps stale rather than the answer.

use crate::error::{DispatchError, DispatchResult};
use crate::ops::method_dispatch::method_cache::MethodCache;
use mosaic_core::{ModuleId, Symbol};
use mosaic_runtime::{LookupRoot, MethodLookup, TypeGraph, Visibility};
use smallvec::SmallVec;

// =============================================================================
// Receiver Key
// =============================================================================

/// Where a lookup starts: the receiver's class for instances, the receiver
/// itself for type values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReceiverKey {
    pub id: ModuleId,
    pub root: LookupRoot,
}

impl ReceiverKey {
    #[inline]
    pub const fn instance(class: ModuleId) -> Self {
        Self {
            id: class,
            root: LookupRoot::Instance,
        }
    }

    #[inline]
    pub const fn type_level(module: ModuleId) -> Self {
        Self {
            id: module,
            root: LookupRoot::Type,
        }
    }
}

/// `(module, generation)` pairs that must still be current for a load to
/// stay valid.
pub type Stamps = SmallVec<[(ModuleId, u64); 2]>;

/// Whether every stamp still matches the graph.
#[inline]
pub fn stamps_current(graph: &TypeGraph, stamps: &[(ModuleId, u64)]) -> bool {
    stamps.iter().all(|&(id, generation)| graph.generation(id) == generation)
}

// =============================================================================
// Caller Context
// =============================================================================

/// How the send was written at the call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallerContext {
    /// Receiver-less call (`foo(1)`): every visibility is reachable.
    ImplicitSelf,
    /// Explicit receiver (`obj.foo(1)`). `caller` is the class of `self` at
    /// the call site, if any; it decides protected access.
    Explicit { caller: Option<ModuleId> },
}

impl Default for CallerContext {
    fn default() -> Self {
        CallerContext::Explicit { caller: None }
    }
}

// =============================================================================
// Load
// =============================================================================

/// A resolved name plus the stamps that guard it.
#[derive(Debug, Clone)]
pub struct LoadedMethod {
    pub lookup: MethodLookup,
    pub stamps: Stamps,
}

/// Resolve `name` for `key` through the lookup cache.
///
/// Type receivers that define nothing under `name` fall back to the
/// instance methods of `module_class`.
pub fn load_method(
    graph: &TypeGraph,
    cache: &MethodCache,
    module_class: ModuleId,
    key: ReceiverKey,
    name: Symbol,
) -> Option<LoadedMethod> {
    let mut stamps = Stamps::new();
    stamps.push((key.id, graph.generation(key.id)));

    if let Some(lookup) = cache.lookup(graph, key.id, name, key.root) {
        return Some(LoadedMethod { lookup, stamps });
    }
    if key.root == LookupRoot::Instance || key.id == module_class {
        return None;
    }

    stamps.push((module_class, graph.generation(module_class)));
    cache
        .lookup(graph, module_class, name, LookupRoot::Instance)
        .map(|lookup| LoadedMethod { lookup, stamps })
}

/// Fail if `caller` may not invoke a method of `visibility` owned by
/// `owner` on a receiver keyed by `key`.
///
/// Protected methods are reachable from callers whose class has `owner` in
/// its MRO.
pub fn check_visibility(
    graph: &TypeGraph,
    key: ReceiverKey,
    name: Symbol,
    owner: ModuleId,
    visibility: Visibility,
    caller: CallerContext,
) -> DispatchResult<()> {
    let allowed = match (visibility, caller) {
        (Visibility::Public, _) | (_, CallerContext::ImplicitSelf) => true,
        (Visibility::Private, CallerContext::Explicit { .. }) => false,
        (Visibility::Protected, CallerContext::Explicit { caller }) => {
            caller.is_some_and(|c| graph.is_ancestor(c, owner))
        }
    };
    if allowed {
        return Ok(());
    }

    let receiver = graph.display_name(key.id);
    Err(match visibility {
        Visibility::Protected => DispatchError::ProtectedMethod { receiver, name },
        _ => DispatchError::PrivateMethod { receiver, name },
    })
}

// =============================================================================
// Tests
// =============================================================================
