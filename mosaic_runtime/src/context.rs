//! Values injected into implicit parameter slots.
//!
//! Native overloads never receive these from the caller. The dispatcher
//! supplies a [`CallContext`] for [`ImplicitSlot::Context`] and the call
//! site's [`SiteStorage`] for [`ImplicitSlot::SiteStorage`].
//!
//! [`ImplicitSlot::Context`]: crate::object::overload::ImplicitSlot::Context
//! [`ImplicitSlot::SiteStorage`]: crate::object::overload::ImplicitSlot::SiteStorage

use crate::object::registry::TypeGraph;
use mosaic_core::{ModuleId, NativeError, Symbol, Value};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

/// Handle back into the running dispatcher.
pub trait CallContext: Send + Sync {
    /// The type graph being dispatched over.
    fn graph(&self) -> &TypeGraph;

    /// Runtime type of a value.
    fn class_of(&self, value: &Value) -> ModuleId;

    /// Send `name` to `receiver` with public visibility.
    fn send(&self, receiver: &Value, name: Symbol, args: &[Value]) -> Result<Value, NativeError>;
}

/// Scratch storage owned by one call site.
///
/// Natives use it to memoize per-site work such as nested conversion sends.
/// Losing it only costs recomputation.
#[derive(Debug, Default)]
pub struct SiteStorage {
    slots: Mutex<FxHashMap<Symbol, Value>>,
}

impl SiteStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: Symbol) -> Option<Value> {
        self.slots.lock().get(&key).cloned()
    }

    pub fn insert(&self, key: Symbol, value: Value) {
        self.slots.lock().insert(key, value);
    }

    /// Return the stored value, computing and storing it on first use.
    pub fn get_or_insert_with<F>(&self, key: Symbol, init: F) -> Value
    where
        F: FnOnce() -> Value,
    {
        self.slots.lock().entry(key).or_insert_with(init).clone()
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
