//! The dispatcher: message sends over a type graph.
//!
//! # Architecture
//!
//! ```text
//! Message ──▶ ReceiverKey + CallShape
//!               │
//!               ├─ call site given ──▶ CallSiteCache::lookup ──hit──▶ call_method
//!               │                              │ miss
//!               ▼                              ▼
//!          load_method (lookup cache) ─▶ check_visibility ─▶ OverloadResolver
//!                                                               │
//!                                                  record ◀─────┤
//!                                                               ▼
//!                                                          call_method
//! ```
//!
//! # Thread Safety
//!
//! `Dispatcher` is `Send + Sync`. Lookups and resolutions only read the
//! graph; caches tolerate racing writers. Registration through
//! [`Dispatcher::graph`] may run concurrently with sends.

use crate::call_shape::CallShape;
use crate::config::DispatchConfig;
use crate::error::{CallFailure, DispatchError, DispatchResult};
use crate::ic_manager::{CallSiteId, ICManager};
use crate::inline_cache::{CallSiteCache, IcEntry, IcLookup};
use crate::ops::method_dispatch::{
    CallArgs, CallerContext, MethodCache, OverloadPolicy, OverloadResolver, ReceiverKey, ResolutionFailure,
    ResolvedCall, Stamps, call_method, check_visibility, load_method,
};
use mosaic_core::{Block, ConvertError, ModuleId, NativeError, Symbol, Value};
use mosaic_runtime::{
    BuiltinTypes, CallContext, ConverterRegistry, Manifest, MethodEntry, MethodLookup, RegistrationResult,
    SiteStorage, TypeGraph, Visibility,
};
use std::sync::Arc;
use tracing::debug;

// =============================================================================
// Message
// =============================================================================

/// One message send: receiver, name and arguments.
#[derive(Clone, Copy)]
pub struct Message<'a> {
    pub receiver: &'a Value,
    pub name: Symbol,
    pub args: &'a [Value],
    pub block: Option<&'a Block>,
    /// Trailing options bag.
    pub options: Option<&'a Value>,
    pub caller: CallerContext,
}

impl<'a> Message<'a> {
    /// A send with no arguments from an explicit receiver.
    pub fn new(receiver: &'a Value, name: impl Into<Symbol>) -> Self {
        Self {
            receiver,
            name: name.into(),
            args: &[],
            block: None,
            options: None,
            caller: CallerContext::default(),
        }
    }

    pub fn args(mut self, args: &'a [Value]) -> Self {
        self.args = args;
        self
    }

    pub fn block(mut self, block: &'a Block) -> Self {
        self.block = Some(block);
        self
    }

    pub fn options(mut self, options: &'a Value) -> Self {
        self.options = Some(options);
        self
    }

    pub fn caller(mut self, caller: CallerContext) -> Self {
        self.caller = caller;
        self
    }

    /// Mark as a receiver-less call, which may reach private methods.
    pub fn from_self(self) -> Self {
        self.caller(CallerContext::ImplicitSelf)
    }

    #[inline]
    fn call_args(&self) -> CallArgs<'a> {
        CallArgs {
            receiver: self.receiver,
            args: self.args,
            block: self.block,
            options: self.options,
        }
    }
}

// =============================================================================
// Dispatcher
// =============================================================================

/// Owns the caches and resolver for one type graph.
pub struct Dispatcher {
    graph: Arc<TypeGraph>,
    builtins: BuiltinTypes,
    converters: Arc<ConverterRegistry>,
    method_cache: MethodCache,
    inline_caches: ICManager,
    resolver: OverloadResolver,
    config: DispatchConfig,
}

impl Dispatcher {
    /// Create a dispatcher over a fresh graph with the builtin types installed.
    pub fn new(config: DispatchConfig) -> RegistrationResult<Self> {
        Self::with_graph(Arc::new(TypeGraph::new()), config)
    }

    /// Create a dispatcher over `graph`, installing the builtin types into it.
    pub fn with_graph(graph: Arc<TypeGraph>, config: DispatchConfig) -> RegistrationResult<Self> {
        let builtins = BuiltinTypes::install(&graph)?;
        let method_cache = if config.method_cache {
            MethodCache::new()
        } else {
            MethodCache::disabled()
        };
        debug!(?config, "dispatcher created");
        Ok(Self {
            graph,
            builtins,
            converters: Arc::new(ConverterRegistry::new()),
            method_cache,
            inline_caches: ICManager::new(config.ic_entries),
            resolver: OverloadResolver::new(config.block_policy),
            config,
        })
    }

    /// Replace the overload selection policy.
    pub fn with_policy(mut self, policy: Arc<dyn OverloadPolicy>) -> Self {
        self.resolver = OverloadResolver::with_policy(policy, self.config.block_policy);
        self.inline_caches.clear();
        self
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    #[inline]
    pub fn graph(&self) -> &TypeGraph {
        &self.graph
    }

    /// A shared handle to the graph.
    pub fn shared_graph(&self) -> Arc<TypeGraph> {
        self.graph.clone()
    }

    #[inline]
    pub fn builtins(&self) -> &BuiltinTypes {
        &self.builtins
    }

    #[inline]
    pub fn converters(&self) -> &ConverterRegistry {
        &self.converters
    }

    #[inline]
    pub fn method_cache(&self) -> &MethodCache {
        &self.method_cache
    }

    #[inline]
    pub fn ic_manager(&self) -> &ICManager {
        &self.inline_caches
    }

    #[inline]
    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Runtime type of a value.
    #[inline]
    pub fn class_of(&self, value: &Value) -> ModuleId {
        self.builtins.class_of(value)
    }

    /// Lookup start for a receiver: type values use the type-level root.
    #[inline]
    pub fn receiver_key(&self, receiver: &Value) -> ReceiverKey {
        match receiver {
            Value::Module(id) => ReceiverKey::type_level(*id),
            other => ReceiverKey::instance(self.class_of(other)),
        }
    }

    /// Fingerprint of the arguments of `message`.
    pub fn shape_of(&self, message: &Message<'_>) -> CallShape {
        CallShape::of(message.args, message.block.is_some(), message.options, |v| self.class_of(v))
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Register (or replace) the implicit conversion `from -> to`.
    ///
    /// Every inline cache entry resolved before this call is treated as stale.
    pub fn register_converter<F>(&self, from: ModuleId, to: ModuleId, body: F)
    where
        F: Fn(&Value) -> Result<Value, ConvertError> + Send + Sync + 'static,
    {
        self.converters.register(from, to, body);
    }

    /// Apply a startup manifest to this dispatcher's graph and converters.
    pub fn load_manifest(&self, manifest: &Manifest) -> RegistrationResult<usize> {
        manifest.load(&self.graph, &self.converters)
    }

    // =========================================================================
    // Sends
    // =========================================================================

    /// Send without a call site: lookup cache only, fresh site storage.
    pub fn dispatch(&self, message: &Message<'_>) -> DispatchResult<Value> {
        let resolved = self.resolve(message)?;
        self.invoke(&resolved, message, &SiteStorage::new())
    }

    /// Send from a compiled call site, using and updating its inline cache.
    pub fn dispatch_at(&self, site: CallSiteId, message: &Message<'_>) -> DispatchResult<Value> {
        let cache = self.inline_caches.site(site);
        let resolved = self.resolve_with(&cache, message)?;
        self.invoke(&resolved, message, cache.storage())
    }

    /// The fast-path entry point for compiled call sites: resolve without
    /// invoking.
    pub fn resolve_at_call_site(&self, site: CallSiteId, message: &Message<'_>) -> DispatchResult<Arc<ResolvedCall>> {
        let cache = self.inline_caches.site(site);
        self.resolve_with(&cache, message)
    }

    /// Resolve on the slow path, bypassing inline caches.
    pub fn resolve(&self, message: &Message<'_>) -> DispatchResult<ResolvedCall> {
        let key = self.receiver_key(message.receiver);
        let shape = self.shape_of(message);
        self.resolve_slow(key, message, &shape).map(|(resolved, _)| resolved)
    }

    /// Run a previously resolved call with the values in `message`.
    pub fn invoke(&self, resolved: &ResolvedCall, message: &Message<'_>, storage: &SiteStorage) -> DispatchResult<Value> {
        call_method(&self.graph, message.name, resolved, message.call_args(), self, storage)
    }

    /// Send `message` to the next definition after `current_owner` in the
    /// receiver's lookup chain.
    ///
    /// Visibility is not checked: a super call always targets `self`.
    pub fn dispatch_super(&self, message: &Message<'_>, current_owner: ModuleId) -> DispatchResult<Value> {
        let key = self.receiver_key(message.receiver);
        let shape = self.shape_of(message);
        let lookup = self
            .graph
            .find_super_method(key.id, current_owner, message.name, key.root)
            .ok_or_else(|| self.unbound(key, message.name))?;
        let resolved = self.select(key, message.name, &shape, lookup)?;
        self.invoke(&resolved, message, &SiteStorage::new())
    }

    /// Whether `receiver` answers `name`. Private and protected methods only
    /// count with `include_private`.
    pub fn responds_to(&self, receiver: &Value, name: impl Into<Symbol>, include_private: bool) -> bool {
        let key = self.receiver_key(receiver);
        load_method(&self.graph, &self.method_cache, self.builtins.module, key, name.into())
            .is_some_and(|loaded| include_private || loaded.lookup.visibility == Visibility::Public)
    }

    // =========================================================================
    // Resolution
    // =========================================================================

    fn resolve_with(&self, cache: &CallSiteCache, message: &Message<'_>) -> DispatchResult<Arc<ResolvedCall>> {
        let key = self.receiver_key(message.receiver);
        let shape = self.shape_of(message);
        if !self.config.inline_caching {
            return self.resolve_slow(key, message, &shape).map(|(resolved, _)| Arc::new(resolved));
        }

        // Read before resolving so a racing registration leaves the entry stale.
        let epoch = self.converters.epoch();
        let record = match cache.lookup(&self.graph, key, &shape, epoch) {
            IcLookup::Hit(resolved) => {
                check_visibility(&self.graph, key, message.name, resolved.owner, resolved.visibility, message.caller)?;
                return Ok(resolved);
            }
            IcLookup::Miss => true,
            IcLookup::Megamorphic => false,
        };

        let (resolved, stamps) = self.resolve_slow(key, message, &shape)?;
        let resolved = Arc::new(resolved);
        if record {
            cache.record(IcEntry {
                receiver: key,
                shape,
                stamps,
                converter_epoch: epoch,
                resolved: resolved.clone(),
            });
        }
        Ok(resolved)
    }

    fn resolve_slow(
        &self,
        key: ReceiverKey,
        message: &Message<'_>,
        shape: &CallShape,
    ) -> DispatchResult<(ResolvedCall, Stamps)> {
        let loaded = load_method(&self.graph, &self.method_cache, self.builtins.module, key, message.name)
            .ok_or_else(|| self.unbound(key, message.name))?;
        let lookup = loaded.lookup;
        check_visibility(&self.graph, key, message.name, lookup.owner, lookup.visibility, message.caller)?;
        let resolved = self.select(key, message.name, shape, lookup)?;
        Ok((resolved, loaded.stamps))
    }

    fn select(&self, key: ReceiverKey, name: Symbol, shape: &CallShape, lookup: MethodLookup) -> DispatchResult<ResolvedCall> {
        let selection = self
            .resolver
            .resolve(&lookup.entry, shape, &self.converters)
            .map_err(|failure| self.resolution_error(failure, key, name, shape, &lookup.entry))?;
        Ok(ResolvedCall {
            owner: lookup.owner,
            entry: lookup.entry,
            visibility: lookup.visibility,
            overload: selection.overload,
            index: selection.index,
            score: selection.score,
            plan: selection.plan,
        })
    }

    fn unbound(&self, key: ReceiverKey, name: Symbol) -> DispatchError {
        DispatchError::Unbound {
            receiver: self.graph.display_name(key.id),
            name,
        }
    }

    fn resolution_error(
        &self,
        failure: ResolutionFailure,
        key: ReceiverKey,
        name: Symbol,
        shape: &CallShape,
        entry: &MethodEntry,
    ) -> DispatchError {
        let graph = &self.graph;
        let details = Box::new(CallFailure {
            receiver: graph.display_name(key.id),
            name,
            shape: shape.clone(),
            argument_types: shape.effective_types().map(|ty| graph.display_name(ty)).collect(),
            candidates: entry
                .overloads()
                .iter()
                .map(|o| o.signature(|ty| graph.display_name(ty)))
                .collect(),
        });
        match failure {
            ResolutionFailure::ArgumentCount => DispatchError::ArgumentCountMismatch(details),
            ResolutionFailure::NoApplicable => DispatchError::NoApplicableOverload(details),
            ResolutionFailure::BlockRequired => DispatchError::BlockRequired(details),
            ResolutionFailure::UnexpectedBlock => DispatchError::UnexpectedBlock(details),
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("modules", &self.graph.len())
            .field("converters", &self.converters.len())
            .field("call_sites", &self.inline_caches.site_count())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Callback Context
// =============================================================================

impl CallContext for Dispatcher {
    fn graph(&self) -> &TypeGraph {
        &self.graph
    }

    fn class_of(&self, value: &Value) -> ModuleId {
        self.builtins.class_of(value)
    }

    fn send(&self, receiver: &Value, name: Symbol, args: &[Value]) -> Result<Value, NativeError> {
        self.dispatch(&Message::new(receiver, name).args(args))
            .map_err(|err| match err {
                DispatchError::Native(native) => native,
                other => NativeError::Dispatch(other.to_string()),
            })
    }
}

// =============================================================================
// Tests
// =============================================================================
