//! Startup registration manifests.
//!
//! A [`Manifest`] collects declarations by *name*: bundles, types, includes,
//! methods and converters. [`Manifest::load`] checks the whole manifest
//! against the graph (plus the manifest's own earlier declarations) before
//! touching anything, so a bad manifest fails without leaving half of itself
//! registered. The graph's writer lock is held from validation through the
//! last applied declaration, so a concurrent writer cannot slip a conflicting
//! name in between.
//!
//! # Example
//!
//! ```ignore
//! let manifest = Manifest::new()
//!     .class("Animal", None, &[])
//!     .bundle("Loud", &[])
//!     .class("Dog", Some("Animal"), &["Loud"])
//!     .method("Loud", "speak", Visibility::Public, DispatchKind::InstanceLevel,
//!             vec![OverloadDecl::new(speak)]);
//! manifest.load(&graph, &converters)?;
//! ```

use crate::convert::{ConvertFn, Converter, ConverterRegistry};
use crate::error::{RegistrationError, RegistrationResult};
use crate::object::method_table::{DispatchKind, Visibility};
use crate::object::module::ModuleKind;
use crate::object::overload::{
    BlockRequirement, ConversionStrategy, ImplicitSlot, NativeFn, NativeOverload, OverloadBuilder, ParamKind,
};
use crate::object::registry::TypeGraph;
use mosaic_core::{ConvertError, ModuleId, Symbol, Value, intern};
use rustc_hash::FxHashMap;
use std::sync::Arc;
use tracing::debug;

// =============================================================================
// Overload Declarations
// =============================================================================

#[derive(Debug, Clone)]
enum SlotDecl {
    Implicit(ImplicitSlot),
    /// `ty == None` means any value.
    Explicit {
        ty: Option<Symbol>,
        strategy: ConversionStrategy,
        kind: ParamKind,
    },
}

/// An overload whose parameter types are given by name.
#[derive(Clone)]
pub struct OverloadDecl {
    slots: Vec<SlotDecl>,
    block: BlockRequirement,
    callable: NativeFn,
}

impl OverloadDecl {
    pub fn new(callable: NativeFn) -> Self {
        Self {
            slots: Vec::new(),
            block: BlockRequirement::Never,
            callable,
        }
    }

    fn explicit(mut self, ty: Option<&str>, strategy: ConversionStrategy, kind: ParamKind) -> Self {
        self.slots.push(SlotDecl::Explicit {
            ty: ty.map(intern),
            strategy,
            kind,
        });
        self
    }

    pub fn required(self, ty: &str, strategy: ConversionStrategy) -> Self {
        self.explicit(Some(ty), strategy, ParamKind::Required)
    }

    pub fn optional(self, ty: &str, strategy: ConversionStrategy) -> Self {
        self.explicit(Some(ty), strategy, ParamKind::Optional)
    }

    pub fn rest(self, ty: &str, strategy: ConversionStrategy) -> Self {
        self.explicit(Some(ty), strategy, ParamKind::Rest)
    }

    pub fn options(self, hash_type: &str) -> Self {
        self.explicit(Some(hash_type), ConversionStrategy::ExactOnly, ParamKind::Options)
    }

    pub fn any(self) -> Self {
        self.explicit(None, ConversionStrategy::AcceptAny, ParamKind::Required)
    }

    pub fn implicit(mut self, slot: ImplicitSlot) -> Self {
        self.slots.push(SlotDecl::Implicit(slot));
        self
    }

    pub fn block(mut self, requirement: BlockRequirement) -> Self {
        self.block = requirement;
        self
    }

    fn type_names(&self) -> impl Iterator<Item = Symbol> + '_ {
        self.slots.iter().filter_map(|slot| match slot {
            SlotDecl::Explicit { ty, .. } => *ty,
            SlotDecl::Implicit(_) => None,
        })
    }

    /// Build against real ids, resolving names through `resolve`.
    fn build<R>(&self, method: Symbol, resolve: R) -> RegistrationResult<NativeOverload>
    where
        R: Fn(Symbol) -> RegistrationResult<ModuleId>,
    {
        let mut builder = OverloadBuilder::default().block(self.block);
        for slot in &self.slots {
            builder = match *slot {
                SlotDecl::Implicit(kind) => builder.implicit(kind),
                SlotDecl::Explicit { ty, strategy, kind } => {
                    let expected = match ty {
                        Some(name) => resolve(name)?,
                        None => ModuleId::ROOT,
                    };
                    match kind {
                        ParamKind::Required => builder.required(expected, strategy),
                        ParamKind::Optional => builder.optional(expected, strategy),
                        ParamKind::Rest => builder.rest(expected, strategy),
                        ParamKind::Options => builder.options(expected),
                    }
                }
            };
        }
        builder
            .build_shared(self.callable.clone())
            .map_err(|source| RegistrationError::InvalidOverload { name: method, source })
    }
}

// =============================================================================
// Declarations
// =============================================================================

enum Declaration {
    Bundle {
        name: Symbol,
        includes: Vec<Symbol>,
    },
    Class {
        name: Symbol,
        superclass: Option<Symbol>,
        includes: Vec<Symbol>,
    },
    Include {
        target: Symbol,
        bundle: Symbol,
    },
    Method {
        owner: Symbol,
        name: Symbol,
        visibility: Visibility,
        kind: DispatchKind,
        overloads: Vec<OverloadDecl>,
    },
    Converter {
        from: Symbol,
        to: Symbol,
        body: Arc<ConvertFn>,
    },
}

fn symbols(names: &[&str]) -> Vec<Symbol> {
    names.iter().map(|n| intern(n)).collect()
}

/// Ordered startup declarations.
#[derive(Default)]
pub struct Manifest {
    declarations: Vec<Declaration>,
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.declarations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.declarations.is_empty()
    }

    pub fn bundle(mut self, name: &str, includes: &[&str]) -> Self {
        self.declarations.push(Declaration::Bundle {
            name: intern(name),
            includes: symbols(includes),
        });
        self
    }

    /// Declare a class. `None` as superclass means the root.
    pub fn class(mut self, name: &str, superclass: Option<&str>, includes: &[&str]) -> Self {
        self.declarations.push(Declaration::Class {
            name: intern(name),
            superclass: superclass.map(intern),
            includes: symbols(includes),
        });
        self
    }

    pub fn include(mut self, target: &str, bundle: &str) -> Self {
        self.declarations.push(Declaration::Include {
            target: intern(target),
            bundle: intern(bundle),
        });
        self
    }

    pub fn method(
        mut self,
        owner: &str,
        name: &str,
        visibility: Visibility,
        kind: DispatchKind,
        overloads: Vec<OverloadDecl>,
    ) -> Self {
        self.declarations.push(Declaration::Method {
            owner: intern(owner),
            name: intern(name),
            visibility,
            kind,
            overloads,
        });
        self
    }

    pub fn converter<F>(mut self, from: &str, to: &str, body: F) -> Self
    where
        F: Fn(&Value) -> Result<Value, ConvertError> + Send + Sync + 'static,
    {
        self.declarations.push(Declaration::Converter {
            from: intern(from),
            to: intern(to),
            body: Arc::new(body),
        });
        self
    }

    // =========================================================================
    // Loading
    // =========================================================================

    /// Validate everything, then apply in declaration order.
    ///
    /// Returns the number of declarations applied.
    #[tracing::instrument(skip_all, fields(declarations = self.declarations.len()))]
    pub fn load(&self, graph: &TypeGraph, converters: &ConverterRegistry) -> RegistrationResult<usize> {
        let _batch = graph.write_batch();
        self.validate(graph)?;
        for declaration in &self.declarations {
            self.apply(declaration, graph, converters)?;
        }
        debug!(count = self.declarations.len(), "manifest loaded");
        Ok(self.declarations.len())
    }

    fn validate(&self, graph: &TypeGraph) -> RegistrationResult<()> {
        let mut view = GraphView::new(graph);

        for declaration in &self.declarations {
            match declaration {
                Declaration::Bundle { name, includes } => {
                    view.check_unique(*name)?;
                    for &bundle in includes {
                        view.expect_kind(bundle, ModuleKind::Bundle)?;
                    }
                    view.declare(*name, ModuleKind::Bundle, includes.clone());
                }
                Declaration::Class {
                    name,
                    superclass,
                    includes,
                } => {
                    view.check_unique(*name)?;
                    if let Some(superclass) = superclass {
                        view.expect_kind(*superclass, ModuleKind::Class)?;
                    }
                    for &bundle in includes {
                        view.expect_kind(bundle, ModuleKind::Bundle)?;
                    }
                    view.declare(*name, ModuleKind::Class, includes.clone());
                }
                Declaration::Include { target, bundle } => {
                    view.kind(*target)?;
                    view.expect_kind(*bundle, ModuleKind::Bundle)?;
                    if target == bundle || view.reaches(*bundle, *target) {
                        return Err(RegistrationError::CyclicAncestry {
                            module: *target,
                            ancestor: *bundle,
                        });
                    }
                    view.add_include(*target, *bundle);
                }
                Declaration::Method {
                    owner, name, overloads, ..
                } => {
                    view.kind(*owner)?;
                    if overloads.is_empty() {
                        return Err(RegistrationError::NoOverloads { name: *name });
                    }
                    for overload in overloads {
                        for ty in overload.type_names() {
                            view.kind(ty)?;
                        }
                        overload.build(*name, |_| Ok(ModuleId::ROOT))?;
                    }
                }
                Declaration::Converter { from, to, .. } => {
                    view.kind(*from)?;
                    view.kind(*to)?;
                }
            }
        }
        Ok(())
    }

    fn apply(
        &self,
        declaration: &Declaration,
        graph: &TypeGraph,
        converters: &ConverterRegistry,
    ) -> RegistrationResult<()> {
        let resolve = |name: Symbol| {
            graph
                .find(&name.as_str())
                .ok_or(RegistrationError::UnknownName(name))
        };
        let resolve_all = |names: &[Symbol]| names.iter().map(|&n| resolve(n)).collect::<RegistrationResult<Vec<_>>>();

        match declaration {
            Declaration::Bundle { name, includes } => {
                graph.define_bundle(&name.as_str(), &resolve_all(includes)?)?;
            }
            Declaration::Class {
                name,
                superclass,
                includes,
            } => {
                let superclass = (*superclass).map(resolve).transpose()?;
                graph.define_type(&name.as_str(), superclass, &resolve_all(includes)?)?;
            }
            Declaration::Include { target, bundle } => {
                graph.include_bundle(resolve(*target)?, resolve(*bundle)?)?;
            }
            Declaration::Method {
                owner,
                name,
                visibility,
                kind,
                overloads,
            } => {
                let built = overloads
                    .iter()
                    .map(|o| o.build(*name, resolve))
                    .collect::<RegistrationResult<Vec<_>>>()?;
                graph.register_method(resolve(*owner)?, *name, *visibility, *kind, built)?;
            }
            Declaration::Converter { from, to, body } => {
                let body = body.clone();
                converters.insert(Converter::new(resolve(*from)?, resolve(*to)?, move |v| body(v)));
            }
        }
        Ok(())
    }
}

// =============================================================================
// Validation View
// =============================================================================

/// The graph as it will look once the declarations seen so far are applied.
struct GraphView<'a> {
    graph: &'a TypeGraph,
    declared: FxHashMap<Symbol, ModuleKind>,
    includes: FxHashMap<Symbol, Vec<Symbol>>,
}

impl<'a> GraphView<'a> {
    fn new(graph: &'a TypeGraph) -> Self {
        Self {
            graph,
            declared: FxHashMap::default(),
            includes: FxHashMap::default(),
        }
    }

    fn kind(&self, name: Symbol) -> RegistrationResult<ModuleKind> {
        if let Some(kind) = self.declared.get(&name) {
            return Ok(*kind);
        }
        self.graph
            .find(&name.as_str())
            .and_then(|id| self.graph.get(id))
            .map(|m| m.kind())
            .ok_or(RegistrationError::UnknownName(name))
    }

    fn expect_kind(&self, name: Symbol, expected: ModuleKind) -> RegistrationResult<()> {
        match (self.kind(name)?, expected) {
            (ModuleKind::Class, ModuleKind::Bundle) => Err(RegistrationError::NotABundle { name }),
            (ModuleKind::Bundle, ModuleKind::Class) => Err(RegistrationError::NotAClass { name }),
            _ => Ok(()),
        }
    }

    fn check_unique(&self, name: Symbol) -> RegistrationResult<()> {
        if self.declared.contains_key(&name) || self.graph.find(&name.as_str()).is_some() {
            return Err(RegistrationError::DuplicateType { name });
        }
        Ok(())
    }

    fn declare(&mut self, name: Symbol, kind: ModuleKind, includes: Vec<Symbol>) {
        self.declared.insert(name, kind);
        self.includes.insert(name, includes);
    }

    fn add_include(&mut self, target: Symbol, bundle: Symbol) {
        let current = self.mixins(target);
        self.includes.insert(target, current);
        if let Some(list) = self.includes.get_mut(&target) {
            list.push(bundle);
        }
    }

    fn mixins(&self, name: Symbol) -> Vec<Symbol> {
        if let Some(list) = self.includes.get(&name) {
            return list.clone();
        }
        self.graph
            .find(&name.as_str())
            .and_then(|id| self.graph.get(id))
            .map(|m| m.mixins().iter().filter_map(|&b| self.graph.name_of(b)).collect())
            .unwrap_or_default()
    }

    fn reaches(&self, from: Symbol, target: Symbol) -> bool {
        let mut pending = vec![from];
        let mut visited = Vec::new();
        while let Some(name) = pending.pop() {
            if visited.contains(&name) {
                continue;
            }
            visited.push(name);
            for bundle in self.mixins(name) {
                if bundle == target {
                    return true;
                }
                pending.push(bundle);
            }
        }
        false
    }
}

// =============================================================================
// Tests
// =============================================================================
