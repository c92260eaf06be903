//! The type graph.
//!
//! [`TypeGraph`] owns every class and bundle, hands out dense [`ModuleId`]s,
//! and answers uncached lookups by walking a module's linearization.
//!
//! # Architecture
//!
//! ```text
//! TypeGraph
//! ├── modules: Vec<Arc<ModuleObject>>   (indexed by ModuleId, root at 0)
//! ├── names:   Symbol -> ModuleId       (unique qualified names)
//! └── hierarchy: ReentrantMutex<()>     (serializes every structural write)
//! ```
//!
//! Every write that can change what a lookup returns (a new method, a new
//! include, a visibility change) bumps the generation of the changed module
//! and of every module that has it as an ancestor. Dependents are tracked as
//! reverse edges on each module, so propagation is a breadth-first walk that
//! visits each dependent once.
//!
//! # Thread Safety
//!
//! Writers take the hierarchy lock, mutate, then bump generations. The lock
//! is reentrant so [`TypeGraph::write_batch`] can hold it across a sequence of
//! writes made on the same thread, as manifest loading does. Readers
//! take no graph-wide lock beyond short reads of the module vector; they
//! compare generation stamps to decide whether a cached answer is fresh.

use super::method_table::{DispatchKind, LookupRoot, MethodEntry, Visibility};
use super::module::{Mixins, ModuleFlags, ModuleKind, ModuleObject};
use super::mro::{Mro, linearize};
use super::overload::NativeOverload;
use crate::error::{RegistrationError, RegistrationResult};
use mosaic_core::{ModuleId, Symbol, intern};
use parking_lot::{ReentrantMutex, ReentrantMutexGuard, RwLock};
use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

// =============================================================================
// Configuration
// =============================================================================

/// Graph construction options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphConfig {
    /// Name of the root of every superclass chain.
    pub root_name: String,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            root_name: "Object".to_string(),
        }
    }
}

// =============================================================================
// Lookup Result
// =============================================================================

/// The answer to a name lookup.
#[derive(Debug, Clone)]
pub struct MethodLookup {
    /// Class or bundle whose table held the entry.
    pub owner: ModuleId,
    pub entry: Arc<MethodEntry>,
    /// Visibility as seen from the lookup root.
    pub visibility: Visibility,
}

/// Superclass chain used for type-level lookups.
pub type TypeChain = SmallVec<[ModuleId; 8]>;

// =============================================================================
// Type Graph
// =============================================================================

/// Registry of every class and capability bundle.
pub struct TypeGraph {
    modules: RwLock<Vec<Arc<ModuleObject>>>,
    names: RwLock<FxHashMap<Symbol, ModuleId>>,
    hierarchy: ReentrantMutex<()>,
}

impl TypeGraph {
    /// Create a graph holding only the root class `Object`.
    pub fn new() -> Self {
        Self::with_config(&GraphConfig::default())
    }

    /// Create a graph holding only the configured root class.
    pub fn with_config(config: &GraphConfig) -> Self {
        let name = intern(&config.root_name);
        let root = ModuleObject::new(
            ModuleId::ROOT,
            name,
            ModuleKind::Class,
            ModuleFlags::ROOT | ModuleFlags::BUILTIN,
            None,
            Mixins::new(),
        );
        let mut names = FxHashMap::default();
        names.insert(name, ModuleId::ROOT);
        Self {
            modules: RwLock::new(vec![Arc::new(root)]),
            names: RwLock::new(names),
            hierarchy: ReentrantMutex::new(()),
        }
    }

    /// Hold the writer lock across several writes.
    ///
    /// Writes made on this thread while the guard lives proceed as usual;
    /// writers on other threads wait until it is dropped.
    pub fn write_batch(&self) -> ReentrantMutexGuard<'_, ()> {
        self.hierarchy.lock()
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// The root class.
    #[inline]
    pub fn root(&self) -> ModuleId {
        ModuleId::ROOT
    }

    #[inline]
    pub fn get(&self, id: ModuleId) -> Option<Arc<ModuleObject>> {
        self.modules.read().get(id.index()).cloned()
    }

    /// Like [`get`](Self::get) but failing with `UnknownModule`.
    pub fn module(&self, id: ModuleId) -> RegistrationResult<Arc<ModuleObject>> {
        self.get(id).ok_or(RegistrationError::UnknownModule(id))
    }

    /// Find a class or bundle by qualified name.
    pub fn find(&self, name: &str) -> Option<ModuleId> {
        self.names.read().get(&intern(name)).copied()
    }

    pub fn name_of(&self, id: ModuleId) -> Option<Symbol> {
        self.get(id).map(|m| m.name())
    }

    /// Name for diagnostics; unknown ids render as their raw index.
    pub fn display_name(&self, id: ModuleId) -> Symbol {
        self.name_of(id)
            .unwrap_or_else(|| intern(&format!("#<module {}>", id.raw())))
    }

    /// Number of classes and bundles, root included.
    pub fn len(&self) -> usize {
        self.modules.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current generation of a module. Zero for unknown ids.
    #[inline]
    pub fn generation(&self, id: ModuleId) -> u64 {
        self.get(id).map_or(0, |m| m.generation())
    }

    // =========================================================================
    // Definition
    // =========================================================================

    /// Define a class.
    ///
    /// A missing superclass means the root. `bundles` are included in order.
    #[tracing::instrument(skip(self, bundles), level = "debug")]
    pub fn define_type(
        &self,
        name: &str,
        superclass: Option<ModuleId>,
        bundles: &[ModuleId],
    ) -> RegistrationResult<ModuleId> {
        self.define_class_with_flags(name, superclass, bundles, ModuleFlags::empty())
    }

    pub(crate) fn define_class_with_flags(
        &self,
        name: &str,
        superclass: Option<ModuleId>,
        bundles: &[ModuleId],
        flags: ModuleFlags,
    ) -> RegistrationResult<ModuleId> {
        let name = intern(name);
        let _guard = self.hierarchy.lock();

        self.check_unique(name)?;
        let parent = self.module(superclass.unwrap_or(ModuleId::ROOT))?;
        if !parent.is_class() {
            return Err(RegistrationError::NotAClass { name: parent.name() });
        }
        self.check_superclass_chain(name, &parent)?;
        let mixins = self.check_bundles(bundles)?;

        let id = self.insert(name, ModuleKind::Class, flags, Some(parent.id()), mixins.clone());
        parent.add_dependent(id);
        self.link_includes(id, &mixins);

        debug!(%name, ?id, superclass = %parent.name(), "defined type");
        Ok(id)
    }

    /// Define a capability bundle that includes `included` in order.
    #[tracing::instrument(skip(self, included), level = "debug")]
    pub fn define_bundle(&self, name: &str, included: &[ModuleId]) -> RegistrationResult<ModuleId> {
        let name = intern(name);
        let _guard = self.hierarchy.lock();

        self.check_unique(name)?;
        let mixins = self.check_bundles(included)?;

        let id = self.insert(name, ModuleKind::Bundle, ModuleFlags::empty(), None, mixins.clone());
        self.link_includes(id, &mixins);

        debug!(%name, ?id, "defined bundle");
        Ok(id)
    }

    /// Append `bundle` to `target`'s include list.
    ///
    /// Returns `false` when `bundle` is already in `target`'s MRO, whether
    /// included directly, through another bundle or by a superclass. Nothing
    /// changes in that case.
    #[tracing::instrument(skip(self), level = "debug")]
    pub fn include_bundle(&self, target: ModuleId, bundle: ModuleId) -> RegistrationResult<bool> {
        let _guard = self.hierarchy.lock();

        let module = self.module(target)?;
        let mixin = self.module(bundle)?;
        if !mixin.is_bundle() {
            return Err(RegistrationError::NotABundle { name: mixin.name() });
        }
        if target == bundle || self.bundle_reaches(bundle, target) {
            return Err(RegistrationError::CyclicAncestry {
                module: module.name(),
                ancestor: mixin.name(),
            });
        }
        if self.is_ancestor(target, bundle) {
            debug!(target = %module.name(), bundle = %mixin.name(), "bundle already in MRO");
            return Ok(false);
        }

        module.push_mixin(bundle);
        mixin.add_dependent(target);
        let touched = self.propagate(target);

        debug!(target = %module.name(), bundle = %mixin.name(), touched, "included bundle");
        Ok(true)
    }

    fn insert(
        &self,
        name: Symbol,
        kind: ModuleKind,
        flags: ModuleFlags,
        superclass: Option<ModuleId>,
        mixins: Mixins,
    ) -> ModuleId {
        let mut modules = self.modules.write();
        let id = ModuleId::from_raw(modules.len() as u32);
        modules.push(Arc::new(ModuleObject::new(id, name, kind, flags, superclass, mixins)));
        drop(modules);
        self.names.write().insert(name, id);
        id
    }

    fn link_includes(&self, id: ModuleId, mixins: &Mixins) {
        for &bundle in mixins.iter() {
            if let Some(module) = self.get(bundle) {
                module.add_dependent(id);
            }
        }
    }

    fn check_unique(&self, name: Symbol) -> RegistrationResult<()> {
        if self.names.read().contains_key(&name) {
            return Err(RegistrationError::DuplicateType { name });
        }
        Ok(())
    }

    /// Every id must be a bundle; direct repeats collapse to one entry.
    fn check_bundles(&self, bundles: &[ModuleId]) -> RegistrationResult<Mixins> {
        let mut mixins = Mixins::new();
        for &bundle in bundles {
            let module = self.module(bundle)?;
            if !module.is_bundle() {
                return Err(RegistrationError::NotABundle { name: module.name() });
            }
            if !mixins.contains(&bundle) {
                mixins.push(bundle);
            }
        }
        Ok(mixins)
    }

    /// The chain above a new class must reach the root without meeting the
    /// new name.
    fn check_superclass_chain(&self, name: Symbol, parent: &ModuleObject) -> RegistrationResult<()> {
        let limit = self.len();
        let mut current = Some(parent.id());
        let mut steps = 0;
        while let Some(id) = current {
            let module = self.module(id)?;
            if module.name() == name || steps > limit {
                return Err(RegistrationError::CyclicAncestry {
                    module: name,
                    ancestor: parent.name(),
                });
            }
            current = module.superclass();
            steps += 1;
        }
        Ok(())
    }

    /// Whether `from` includes `target`, directly or through nested bundles.
    fn bundle_reaches(&self, from: ModuleId, target: ModuleId) -> bool {
        let mut visited = FxHashSet::default();
        let mut pending: SmallVec<[ModuleId; 8]> = SmallVec::new();
        pending.push(from);
        while let Some(id) = pending.pop() {
            if !visited.insert(id) {
                continue;
            }
            let Some(module) = self.get(id) else { continue };
            for bundle in module.mixins() {
                if bundle == target {
                    return true;
                }
                pending.push(bundle);
            }
        }
        false
    }

    // =========================================================================
    // Method Registration
    // =========================================================================

    /// Register overloads under `name` in `owner`'s own table.
    ///
    /// If `owner` already has an entry of the same dispatch kind the overloads
    /// are appended after the existing ones and the entry takes the new
    /// visibility. An entry of a different kind is replaced.
    #[tracing::instrument(skip(self, overloads), level = "debug")]
    pub fn register_method(
        &self,
        owner: ModuleId,
        name: Symbol,
        visibility: Visibility,
        kind: DispatchKind,
        overloads: Vec<NativeOverload>,
    ) -> RegistrationResult<Arc<MethodEntry>> {
        if overloads.is_empty() {
            return Err(RegistrationError::NoOverloads { name });
        }
        let _guard = self.hierarchy.lock();
        let module = self.module(owner)?;

        let count = overloads.len();
        let entry = {
            let mut table = module.table_mut();
            let entry = match table.get(name) {
                Some(existing) if !existing.is_undefined() && existing.kind() == kind => {
                    existing.with_appended(visibility, overloads)
                }
                _ => MethodEntry::new(name, visibility, kind, overloads),
            };
            let entry = Arc::new(entry);
            table.insert(name, entry.clone());
            entry
        };
        let touched = self.propagate(owner);

        debug!(owner = %module.name(), %name, count, touched, "registered method");
        Ok(entry)
    }

    /// Store the entry `old` resolves to from `owner` under `new` in `owner`.
    #[tracing::instrument(skip(self), level = "debug")]
    pub fn alias_method(&self, owner: ModuleId, new: Symbol, old: Symbol) -> RegistrationResult<()> {
        let _guard = self.hierarchy.lock();
        let module = self.module(owner)?;
        let found = self
            .find_method(owner, old, LookupRoot::Instance)
            .ok_or(RegistrationError::UndefinedMethod {
                module: module.name(),
                name: old,
            })?;

        module.table_mut().insert(new, found.entry);
        self.propagate(owner);
        Ok(())
    }

    /// Hide `name` from instance lookups on `owner` and everything below it,
    /// even where an ancestor defines it.
    #[tracing::instrument(skip(self), level = "debug")]
    pub fn undefine_method(&self, owner: ModuleId, name: Symbol) -> RegistrationResult<()> {
        let _guard = self.hierarchy.lock();
        let module = self.module(owner)?;
        if self.find_method(owner, name, LookupRoot::Instance).is_none() {
            return Err(RegistrationError::UndefinedMethod {
                module: module.name(),
                name,
            });
        }
        let tombstone = Arc::new(MethodEntry::undefined(name, DispatchKind::InstanceLevel));
        module.table_mut().insert(name, tombstone);
        self.propagate(owner);
        Ok(())
    }

    /// Delete `owner`'s own entry for `name`, exposing any ancestor's.
    ///
    /// Returns whether an entry was removed.
    #[tracing::instrument(skip(self), level = "debug")]
    pub fn remove_method(&self, owner: ModuleId, name: Symbol) -> RegistrationResult<bool> {
        let _guard = self.hierarchy.lock();
        let module = self.module(owner)?;
        let removed = module.table_mut().remove(name).is_some();
        if removed {
            self.propagate(owner);
        }
        Ok(removed)
    }

    /// Change the visibility of `name` as seen from `owner`.
    ///
    /// An inherited entry is copied into `owner`'s table so the change stays
    /// local to `owner` and its dependents.
    #[tracing::instrument(skip(self), level = "debug")]
    pub fn set_visibility(&self, owner: ModuleId, name: Symbol, visibility: Visibility) -> RegistrationResult<()> {
        let _guard = self.hierarchy.lock();
        let module = self.module(owner)?;
        let found = self
            .find_method(owner, name, LookupRoot::Instance)
            .ok_or(RegistrationError::UndefinedMethod {
                module: module.name(),
                name,
            })?;

        module
            .table_mut()
            .insert(name, Arc::new(found.entry.with_visibility(visibility)));
        self.propagate(owner);
        Ok(())
    }

    // =========================================================================
    // Invalidation
    // =========================================================================

    /// Bump `origin` and every transitive dependent exactly once.
    ///
    /// Returns the number of modules touched.
    fn propagate(&self, origin: ModuleId) -> usize {
        let mut visited: FxHashSet<ModuleId> = FxHashSet::default();
        let mut queue: VecDeque<ModuleId> = VecDeque::new();
        queue.push_back(origin);

        while let Some(id) = queue.pop_front() {
            if !visited.insert(id) {
                continue;
            }
            let Some(module) = self.get(id) else { continue };
            let generation = module.bump_generation();
            trace!(module = %module.name(), generation, "generation bumped");
            queue.extend(module.dependents());
        }

        visited.len()
    }

    // =========================================================================
    // Linearization
    // =========================================================================

    /// Method resolution order of `id`, from its generation-stamped cache.
    pub fn mro(&self, id: ModuleId) -> Option<Mro> {
        let module = self.get(id)?;
        let generation = module.generation();
        if let Some(mro) = module.mro_cache().get(generation) {
            return Some(mro);
        }

        let mro = linearize(
            &module,
            |bundle| self.get(bundle),
            |superclass| self.mro(superclass).unwrap_or_else(|| Arc::from([])),
        );
        debug!(module = %module.name(), generation, len = mro.len(), "computed MRO");
        module.mro_cache().store(generation, mro.clone());
        Some(mro)
    }

    /// `mro` as an owned list.
    pub fn ancestors(&self, id: ModuleId) -> Vec<ModuleId> {
        self.mro(id).map(|mro| mro.to_vec()).unwrap_or_default()
    }

    /// Whether `ancestor` appears in `id`'s MRO.
    pub fn is_ancestor(&self, id: ModuleId, ancestor: ModuleId) -> bool {
        self.mro(id).is_some_and(|mro| mro.contains(&ancestor))
    }

    /// Chain walked for type-level lookups: the superclass chain for a class,
    /// just the bundle itself for a bundle.
    pub fn type_chain(&self, id: ModuleId) -> Option<TypeChain> {
        let module = self.get(id)?;
        let mut chain = TypeChain::new();
        chain.push(id);
        if module.is_bundle() {
            return Some(chain);
        }
        let mut current = module.superclass();
        while let Some(next) = current {
            chain.push(next);
            current = self.get(next).and_then(|m| m.superclass());
        }
        Some(chain)
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    /// Uncached lookup of `name` starting at `id` from `root`.
    ///
    /// The first table along the chain holding a visible entry answers. A
    /// tombstone answers "unbound".
    pub fn find_method(&self, id: ModuleId, name: Symbol, root: LookupRoot) -> Option<MethodLookup> {
        match root {
            LookupRoot::Instance => self.search(self.mro(id)?.iter().copied(), name, root),
            LookupRoot::Type => self.search(self.type_chain(id)?.into_iter(), name, root),
        }
    }

    /// Lookup along `id`'s chain strictly after `after`.
    ///
    /// `None` when `after` is not on the chain.
    pub fn find_super_method(
        &self,
        id: ModuleId,
        after: ModuleId,
        name: Symbol,
        root: LookupRoot,
    ) -> Option<MethodLookup> {
        let chain: TypeChain = match root {
            LookupRoot::Instance => self.mro(id)?.iter().copied().collect(),
            LookupRoot::Type => self.type_chain(id)?,
        };
        let start = chain.iter().position(|&m| m == after)? + 1;
        self.search(chain[start..].iter().copied(), name, root)
    }

    fn search(
        &self,
        chain: impl Iterator<Item = ModuleId>,
        name: Symbol,
        root: LookupRoot,
    ) -> Option<MethodLookup> {
        for owner in chain {
            let Some(module) = self.get(owner) else { continue };
            let Some(entry) = module.own_method(name) else { continue };
            if !entry.visible_from(root) {
                continue;
            }
            if entry.is_undefined() {
                return None;
            }
            return Some(MethodLookup {
                owner,
                visibility: entry.visibility_from(root),
                entry,
            });
        }
        None
    }

    /// Public and protected instance methods of `id`.
    ///
    /// Own methods come first in definition order, then each ancestor's in
    /// MRO order when `inherited` is set. Names hidden by a nearer private or
    /// undefined entry are skipped.
    pub fn instance_methods(&self, id: ModuleId, inherited: bool) -> Vec<Symbol> {
        let chain: Vec<ModuleId> = if inherited {
            self.ancestors(id)
        } else {
            vec![id]
        };

        let mut seen: FxHashSet<Symbol> = FxHashSet::default();
        let mut names = Vec::new();
        for owner in chain {
            let Some(module) = self.get(owner) else { continue };
            let table = module.table();
            for (name, entry) in table.iter() {
                if !entry.visible_from(LookupRoot::Instance) || !seen.insert(name) {
                    continue;
                }
                if !entry.is_undefined() && entry.visibility_from(LookupRoot::Instance) != Visibility::Private {
                    names.push(name);
                }
            }
        }
        names
    }
}

impl Default for TypeGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TypeGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeGraph")
            .field("modules", &self.len())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Tests
// =============================================================================
