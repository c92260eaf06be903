//! Read-only introspection for tooling and diagnostics.
//!
//! None of this is on the send path. Lookups go through the lookup cache so
//! they agree with what a send would find.

use crate::dispatcher::Dispatcher;
use crate::ops::method_dispatch::ReceiverKey;
use mosaic_core::{ModuleId, Symbol};
use mosaic_runtime::{LookupRoot, NativeOverload};
use std::sync::Arc;

impl Dispatcher {
    /// MRO of `id`: itself, its bundles, then its superclass chain.
    ///
    /// Empty for unknown ids.
    pub fn ancestors(&self, id: ModuleId) -> Vec<ModuleId> {
        self.graph().ancestors(id)
    }

    /// `ancestors` rendered as names.
    pub fn ancestor_names(&self, id: ModuleId) -> Vec<Symbol> {
        self.ancestors(id)
            .into_iter()
            .map(|m| self.graph().display_name(m))
            .collect()
    }

    /// Module whose table answers an instance send of `name` on `id`.
    pub fn method_owner(&self, id: ModuleId, name: impl Into<Symbol>) -> Option<ModuleId> {
        self.method_cache()
            .lookup(self.graph(), id, name.into(), LookupRoot::Instance)
            .map(|lookup| lookup.owner)
    }

    /// Module answering a type-level send of `name` to `id` itself.
    pub fn type_method_owner(&self, id: ModuleId, name: impl Into<Symbol>) -> Option<ModuleId> {
        crate::ops::method_dispatch::load_method(
            self.graph(),
            self.method_cache(),
            self.builtins().module,
            ReceiverKey::type_level(id),
            name.into(),
        )
        .map(|loaded| loaded.lookup.owner)
    }

    /// Overloads an instance send of `name` on `id` chooses from, in
    /// declaration order.
    pub fn overloads(&self, id: ModuleId, name: impl Into<Symbol>) -> Vec<Arc<NativeOverload>> {
        self.method_cache()
            .lookup(self.graph(), id, name.into(), LookupRoot::Instance)
            .map(|lookup| lookup.entry.overloads().to_vec())
            .unwrap_or_default()
    }

    /// Rendered signatures of [`overloads`](Self::overloads).
    pub fn overload_signatures(&self, id: ModuleId, name: impl Into<Symbol>) -> Vec<String> {
        let graph = self.graph();
        self.overloads(id, name)
            .iter()
            .map(|o| o.signature(|ty| graph.display_name(ty)))
            .collect()
    }

    /// Public and protected instance methods of `id`.
    pub fn instance_methods(&self, id: ModuleId, inherited: bool) -> Vec<Symbol> {
        self.graph().instance_methods(id, inherited)
    }
}
