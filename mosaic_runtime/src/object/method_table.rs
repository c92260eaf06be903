//! Per-module method tables.
//!
//! A [`MethodTable`] maps a method name to a shared [`MethodEntry`]. Entries
//! are immutable once published: adding overloads or changing visibility
//! builds a new entry and swaps it in, so a reader holding an `Arc` never sees
//! a half-updated overload list.

use super::overload::NativeOverload;
use mosaic_core::Symbol;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use std::sync::Arc;

// =============================================================================
// Entry Metadata
// =============================================================================

/// Guest-level visibility of a method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Visibility {
    Public,
    Protected,
    Private,
}

/// Which lookup roots see an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DispatchKind {
    /// Found when the receiver is an instance.
    InstanceLevel,
    /// Found when the receiver is the type itself.
    TypeLevel,
    /// Module-function pattern: private instance method and public type method,
    /// both backed by this one entry.
    DualLevel,
}

/// The root a lookup starts from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LookupRoot {
    /// Walk the MRO of the receiver's class.
    Instance,
    /// Walk the superclass chain of a receiver that is itself a type.
    Type,
}

bitflags::bitflags! {
    /// Entry state flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct EntryFlags: u8 {
        /// Tombstone installed by `undefine_method`; stops the MRO walk.
        const UNDEFINED = 1 << 0;
    }
}

// =============================================================================
// Method Entry
// =============================================================================

/// The set of native overloads registered under one name in one module.
#[derive(Debug, Clone)]
pub struct MethodEntry {
    name: Symbol,
    visibility: Visibility,
    kind: DispatchKind,
    flags: EntryFlags,
    overloads: SmallVec<[Arc<NativeOverload>; 2]>,
}

impl MethodEntry {
    /// Create an entry from overloads in declaration order.
    pub fn new(
        name: Symbol,
        visibility: Visibility,
        kind: DispatchKind,
        overloads: impl IntoIterator<Item = NativeOverload>,
    ) -> Self {
        Self {
            name,
            visibility,
            kind,
            flags: EntryFlags::empty(),
            overloads: overloads.into_iter().map(Arc::new).collect(),
        }
    }

    /// Tombstone that hides every ancestor definition of `name` reachable
    /// through the roots `kind` covers.
    pub fn undefined(name: Symbol, kind: DispatchKind) -> Self {
        Self {
            name,
            visibility: Visibility::Public,
            kind,
            flags: EntryFlags::UNDEFINED,
            overloads: SmallVec::new(),
        }
    }

    /// Name the entry was originally registered under.
    #[inline]
    pub fn name(&self) -> Symbol {
        self.name
    }

    #[inline]
    pub fn visibility(&self) -> Visibility {
        self.visibility
    }

    #[inline]
    pub fn kind(&self) -> DispatchKind {
        self.kind
    }

    #[inline]
    pub fn flags(&self) -> EntryFlags {
        self.flags
    }

    #[inline]
    pub fn is_undefined(&self) -> bool {
        self.flags.contains(EntryFlags::UNDEFINED)
    }

    /// Overloads in declaration order.
    #[inline]
    pub fn overloads(&self) -> &[Arc<NativeOverload>] {
        &self.overloads
    }

    /// Whether a lookup from `root` can see this entry.
    #[inline]
    pub fn visible_from(&self, root: LookupRoot) -> bool {
        matches!(
            (self.kind, root),
            (DispatchKind::DualLevel, _)
                | (DispatchKind::InstanceLevel, LookupRoot::Instance)
                | (DispatchKind::TypeLevel, LookupRoot::Type)
        )
    }

    /// Visibility as exposed through `root`.
    ///
    /// A dual-level entry is private on instances and public on the type.
    #[inline]
    pub fn visibility_from(&self, root: LookupRoot) -> Visibility {
        match (self.kind, root) {
            (DispatchKind::DualLevel, LookupRoot::Instance) => Visibility::Private,
            (DispatchKind::DualLevel, LookupRoot::Type) => Visibility::Public,
            _ => self.visibility,
        }
    }

    /// Copy with more overloads appended after the existing ones.
    pub fn with_appended(&self, visibility: Visibility, more: impl IntoIterator<Item = NativeOverload>) -> Self {
        let mut entry = self.clone();
        entry.visibility = visibility;
        entry.overloads.extend(more.into_iter().map(Arc::new));
        entry
    }

    /// Copy with a different visibility.
    pub fn with_visibility(&self, visibility: Visibility) -> Self {
        let mut entry = self.clone();
        entry.visibility = visibility;
        entry
    }
}

// =============================================================================
// Method Table
// =============================================================================

/// Name → entry map owned by one module.
///
/// Lookup is by hash; definition order is kept separately for listings and
/// diagnostics.
#[derive(Debug, Default, Clone)]
pub struct MethodTable {
    entries: FxHashMap<Symbol, Arc<MethodEntry>>,
    order: Vec<Symbol>,
}

impl MethodTable {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn get(&self, name: Symbol) -> Option<&Arc<MethodEntry>> {
        self.entries.get(&name)
    }

    #[inline]
    pub fn contains(&self, name: Symbol) -> bool {
        self.entries.contains_key(&name)
    }

    /// Insert or replace, returning the previous entry.
    pub fn insert(&mut self, name: Symbol, entry: Arc<MethodEntry>) -> Option<Arc<MethodEntry>> {
        let previous = self.entries.insert(name, entry);
        if previous.is_none() {
            self.order.push(name);
        }
        previous
    }

    pub fn remove(&mut self, name: Symbol) -> Option<Arc<MethodEntry>> {
        let removed = self.entries.remove(&name);
        if removed.is_some() {
            self.order.retain(|n| *n != name);
        }
        removed
    }

    /// Entries in definition order.
    pub fn iter(&self) -> impl Iterator<Item = (Symbol, &Arc<MethodEntry>)> + '_ {
        self.order
            .iter()
            .filter_map(move |name| self.entries.get(name).map(|e| (*name, e)))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// =============================================================================
// Tests
// =============================================================================
