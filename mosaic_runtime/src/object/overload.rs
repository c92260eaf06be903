//! Native overloads registered under a guest-visible method name.
//!
//! A [`NativeOverload`] describes one statically-typed host implementation:
//! its caller-visible arity, its block requirement, and the ordered parameter
//! slots the host function expects. Slots are either *explicit* (filled from
//! caller arguments, with an expected type and conversion strategy) or
//! *implicit* (filled by the runtime and invisible to the caller).
//!
//! # Slot Layout
//!
//! ```text
//! [Implicit]* Required* Optional* (Rest | Options)?
//!              └──────── caller-visible, counted in arity ────────┘
//! ```
//!
//! Implicit slots may appear anywhere in call order; they never count toward
//! `min_positional`/`max_positional`.

use crate::context::{CallContext, SiteStorage};
use mosaic_core::{Block, ModuleId, NativeError, Symbol, Value};
use smallvec::SmallVec;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

// =============================================================================
// Slot Descriptions
// =============================================================================

/// Whether an overload wants a trailing block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockRequirement {
    /// The host function has no block parameter; a passed block is dropped.
    Never,
    /// A block may be passed.
    Optional,
    /// Calling without a block is an error.
    Required,
}

/// How an explicit parameter accepts an argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConversionStrategy {
    /// Argument type must be identical to the expected type.
    ExactOnly,
    /// Identical type, or a registered converter from the argument's type.
    ImplicitConvert,
    /// Anything goes; the argument is passed through untouched.
    AcceptAny,
}

/// Runtime-injected parameter kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImplicitSlot {
    /// Handle back into the dispatcher.
    Context,
    /// Per-call-site scratch storage (conversion and nested-call caches).
    SiteStorage,
}

/// Position class of an explicit parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamKind {
    Required,
    Optional,
    /// Variadic tail; every remaining argument is scored against it.
    Rest,
    /// Trailing options-like slot that absorbs an options bag.
    Options,
}

/// A caller-visible parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExplicitParam {
    pub expected: ModuleId,
    pub strategy: ConversionStrategy,
    pub kind: ParamKind,
}

/// One parameter of the host function, in call order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterSlot {
    Implicit(ImplicitSlot),
    Explicit(ExplicitParam),
}

// =============================================================================
// Native Callable
// =============================================================================

/// Arguments handed to a native body after conversion.
pub struct NativeArgs<'a> {
    /// The receiver (`self`).
    pub receiver: &'a Value,
    /// Converted caller arguments, one per explicit argument position.
    pub args: &'a [Value],
    /// The block, unless the overload never takes one.
    pub block: Option<&'a Block>,
    /// Present iff the overload declares an [`ImplicitSlot::Context`] slot.
    pub context: Option<&'a dyn CallContext>,
    /// Present iff the overload declares an [`ImplicitSlot::SiteStorage`] slot.
    pub storage: Option<&'a SiteStorage>,
}

impl<'a> NativeArgs<'a> {
    /// Argument at `index`, or nil if the caller omitted an optional one.
    #[inline]
    pub fn arg(&self, index: usize) -> &Value {
        static NIL: Value = Value::Nil;
        self.args.get(index).unwrap_or(&NIL)
    }

    /// Yield to the block, failing like the guest language does without one.
    pub fn yield_block(&self, args: &[Value]) -> Result<Value, NativeError> {
        match self.block {
            Some(block) => block.call(args),
            None => Err(NativeError::raised("LocalJumpError", "no block given (yield)")),
        }
    }
}

/// Opaque host implementation.
pub type NativeFn = Arc<dyn Fn(&NativeArgs<'_>) -> Result<Value, NativeError> + Send + Sync>;

// =============================================================================
// Native Overload
// =============================================================================

/// Malformed slot layout.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct OverloadShapeError(pub String);

/// One statically-typed implementation registered under a method name.
#[derive(Clone)]
pub struct NativeOverload {
    min_positional: usize,
    /// `None` for a variadic tail.
    max_positional: Option<usize>,
    block: BlockRequirement,
    slots: SmallVec<[ParameterSlot; 4]>,
    explicit: SmallVec<[ExplicitParam; 4]>,
    implicit: SmallVec<[ImplicitSlot; 2]>,
    callable: NativeFn,
}

impl NativeOverload {
    /// Start describing an overload.
    pub fn builder() -> OverloadBuilder {
        OverloadBuilder::default()
    }

    #[inline]
    pub fn min_positional(&self) -> usize {
        self.min_positional
    }

    #[inline]
    pub fn max_positional(&self) -> Option<usize> {
        self.max_positional
    }

    #[inline]
    pub fn is_variadic(&self) -> bool {
        self.max_positional.is_none()
    }

    #[inline]
    pub fn block(&self) -> BlockRequirement {
        self.block
    }

    /// All slots in call order.
    #[inline]
    pub fn slots(&self) -> &[ParameterSlot] {
        &self.slots
    }

    /// Caller-visible parameters in order.
    #[inline]
    pub fn explicit_params(&self) -> &[ExplicitParam] {
        &self.explicit
    }

    /// Runtime-injected slots in order.
    #[inline]
    pub fn implicit_slots(&self) -> &[ImplicitSlot] {
        &self.implicit
    }

    #[inline]
    pub fn wants(&self, slot: ImplicitSlot) -> bool {
        self.implicit.contains(&slot)
    }

    /// Whether `count` caller arguments fit the declared arity.
    #[inline]
    pub fn accepts_arity(&self, count: usize) -> bool {
        count >= self.min_positional && self.max_positional.is_none_or(|max| count <= max)
    }

    /// The parameter that receives argument `index`.
    pub fn param_for_arg(&self, index: usize) -> Option<&ExplicitParam> {
        match self.explicit.iter().position(|p| p.kind == ParamKind::Rest) {
            Some(rest) if index >= rest => self.explicit.get(rest),
            _ => self.explicit.get(index),
        }
    }

    /// Argument index of the trailing options-like parameter, if declared.
    ///
    /// An options bag passed by the caller lands here even when optional
    /// parameters before it were omitted.
    pub fn options_slot(&self) -> Option<usize> {
        self.explicit.iter().position(|p| p.kind == ParamKind::Options)
    }

    /// Call the host implementation.
    #[inline]
    pub fn invoke(&self, args: &NativeArgs<'_>) -> Result<Value, NativeError> {
        (self.callable)(args)
    }

    /// Whether two overloads share one host implementation.
    #[inline]
    pub fn same_callable(&self, other: &NativeOverload) -> bool {
        Arc::ptr_eq(&self.callable, &other.callable)
    }

    /// Human-readable signature, e.g. `(Integer, ~Float?, *Any) &block`.
    pub fn signature<F>(&self, type_name: F) -> String
    where
        F: Fn(ModuleId) -> Symbol,
    {
        let params: Vec<String> = self
            .explicit
            .iter()
            .map(|p| {
                let ty = match p.strategy {
                    ConversionStrategy::AcceptAny => "Any".to_string(),
                    ConversionStrategy::ExactOnly => type_name(p.expected).to_string(),
                    ConversionStrategy::ImplicitConvert => format!("~{}", type_name(p.expected)),
                };
                match p.kind {
                    ParamKind::Required => ty,
                    ParamKind::Optional => format!("{}?", ty),
                    ParamKind::Rest => format!("*{}", ty),
                    ParamKind::Options => format!("**{}", ty),
                }
            })
            .collect();

        let block = match self.block {
            BlockRequirement::Never => "",
            BlockRequirement::Optional => " &block?",
            BlockRequirement::Required => " &block",
        };
        format!("({}){}", params.join(", "), block)
    }
}

impl fmt::Debug for NativeOverload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeOverload")
            .field("min_positional", &self.min_positional)
            .field("max_positional", &self.max_positional)
            .field("block", &self.block)
            .field("slots", &self.slots)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Incremental description of a [`NativeOverload`].
#[derive(Debug, Clone)]
pub struct OverloadBuilder {
    slots: SmallVec<[ParameterSlot; 4]>,
    block: BlockRequirement,
}

impl Default for OverloadBuilder {
    fn default() -> Self {
        Self {
            slots: SmallVec::new(),
            block: BlockRequirement::Never,
        }
    }
}

impl OverloadBuilder {
    fn explicit(mut self, expected: ModuleId, strategy: ConversionStrategy, kind: ParamKind) -> Self {
        self.slots.push(ParameterSlot::Explicit(ExplicitParam {
            expected,
            strategy,
            kind,
        }));
        self
    }

    pub fn required(self, expected: ModuleId, strategy: ConversionStrategy) -> Self {
        self.explicit(expected, strategy, ParamKind::Required)
    }

    pub fn optional(self, expected: ModuleId, strategy: ConversionStrategy) -> Self {
        self.explicit(expected, strategy, ParamKind::Optional)
    }

    pub fn rest(self, expected: ModuleId, strategy: ConversionStrategy) -> Self {
        self.explicit(expected, strategy, ParamKind::Rest)
    }

    /// Options-like trailing slot of type `hash_type`.
    pub fn options(self, hash_type: ModuleId) -> Self {
        self.explicit(hash_type, ConversionStrategy::ExactOnly, ParamKind::Options)
    }

    /// Required parameter accepting any value.
    pub fn any(self) -> Self {
        self.explicit(ModuleId::ROOT, ConversionStrategy::AcceptAny, ParamKind::Required)
    }

    pub fn implicit(mut self, slot: ImplicitSlot) -> Self {
        self.slots.push(ParameterSlot::Implicit(slot));
        self
    }

    pub fn block(mut self, requirement: BlockRequirement) -> Self {
        self.block = requirement;
        self
    }

    /// Validate the slot layout and attach the host implementation.
    pub fn build<F>(self, callable: F) -> Result<NativeOverload, OverloadShapeError>
    where
        F: Fn(&NativeArgs<'_>) -> Result<Value, NativeError> + Send + Sync + 'static,
    {
        self.build_shared(Arc::new(callable))
    }

    /// Like [`build`](Self::build) but reusing an existing callable.
    pub fn build_shared(self, callable: NativeFn) -> Result<NativeOverload, OverloadShapeError> {
        let mut explicit: SmallVec<[ExplicitParam; 4]> = SmallVec::new();
        let mut implicit: SmallVec<[ImplicitSlot; 2]> = SmallVec::new();

        for slot in &self.slots {
            match slot {
                ParameterSlot::Implicit(kind) => implicit.push(*kind),
                ParameterSlot::Explicit(param) => {
                    if let Some(prev) = explicit.last() {
                        check_order(prev.kind, param.kind)?;
                    }
                    explicit.push(*param);
                }
            }
        }

        let min_positional = explicit
            .iter()
            .filter(|p| p.kind == ParamKind::Required)
            .count();
        let max_positional = if explicit.iter().any(|p| p.kind == ParamKind::Rest) {
            None
        } else {
            Some(explicit.len())
        };

        Ok(NativeOverload {
            min_positional,
            max_positional,
            block: self.block,
            slots: self.slots,
            explicit,
            implicit,
            callable,
        })
    }
}

fn check_order(prev: ParamKind, next: ParamKind) -> Result<(), OverloadShapeError> {
    use ParamKind::*;
    let ok = match (prev, next) {
        (Required, _) => true,
        (Optional, Optional | Rest | Options) => true,
        (Optional, Required) => false,
        (Rest, Options) | (Options, Rest) => {
            return Err(OverloadShapeError(
                "a rest parameter cannot be combined with an options parameter".to_string(),
            ));
        }
        (Rest, _) | (Options, _) => false,
    };
    if ok {
        Ok(())
    } else {
        Err(OverloadShapeError(format!(
            "{:?} parameter cannot follow a {:?} parameter",
            next, prev
        )))
    }
}

// =============================================================================
// Tests
// =============================================================================
