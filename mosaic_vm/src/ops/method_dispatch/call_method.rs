//! CallMethod: run a resolved overload against concrete arguments.
//!
//! The conversion plan chosen at resolution time is replayed on every call,
//! including inline-cache hits: converters see the new values, and a
//! converter that refuses a particular value fails the call with
//! [`DispatchError::Conversion`] rather than falling back to another
//! overload.

use crate::error::{DispatchError, DispatchResult};
use crate::ops::method_dispatch::overload_resolution::{ArgConversion, ConversionPlan};
use mosaic_core::{Block, ModuleId, Symbol, Value};
use mosaic_runtime::{
    CallContext, ImplicitSlot, MethodEntry, NativeArgs, NativeOverload, SiteStorage, TypeGraph, Visibility,
};
use smallvec::SmallVec;
use std::sync::Arc;

// =============================================================================
// Resolved Call
// =============================================================================

/// Everything needed to invoke a call without repeating lookup or resolution.
#[derive(Debug, Clone)]
pub struct ResolvedCall {
    /// Module whose table answered the lookup.
    pub owner: ModuleId,
    pub entry: Arc<MethodEntry>,
    /// Visibility as seen from the lookup root.
    pub visibility: Visibility,
    pub overload: Arc<NativeOverload>,
    /// Position of `overload` in the entry's declaration order.
    pub index: usize,
    pub score: u32,
    pub plan: ConversionPlan,
}

/// Concrete values of one invocation.
#[derive(Clone, Copy)]
pub struct CallArgs<'a> {
    pub receiver: &'a Value,
    pub args: &'a [Value],
    pub block: Option<&'a Block>,
    pub options: Option<&'a Value>,
}

// =============================================================================
// Invocation
// =============================================================================

/// Convert the arguments and invoke the selected native.
///
/// `context` and `storage` are only handed to overloads that declare the
/// matching implicit slot.
pub fn call_method(
    graph: &TypeGraph,
    name: Symbol,
    resolved: &ResolvedCall,
    call: CallArgs<'_>,
    context: &dyn CallContext,
    storage: &SiteStorage,
) -> DispatchResult<Value> {
    let converted = apply_plan(graph, name, &resolved.plan, call.args, call.options)?;
    let overload = &resolved.overload;

    let native = NativeArgs {
        receiver: call.receiver,
        args: &converted,
        block: if resolved.plan.passes_block() { call.block } else { None },
        context: overload.wants(ImplicitSlot::Context).then_some(context),
        storage: overload.wants(ImplicitSlot::SiteStorage).then_some(storage),
    };
    Ok(overload.invoke(&native)?)
}

/// Run each step of `plan` over the positional arguments, then place the
/// options bag at the index the plan chose for it.
fn apply_plan(
    graph: &TypeGraph,
    name: Symbol,
    plan: &ConversionPlan,
    args: &[Value],
    options: Option<&Value>,
) -> DispatchResult<SmallVec<[Value; 4]>> {
    let convert = |position: usize, value: &Value, step: &ArgConversion| match step {
        ArgConversion::Identity | ArgConversion::Passthrough => Ok(value.clone()),
        ArgConversion::Convert(converter) => converter.convert(value).map_err(|reason| DispatchError::Conversion {
            name,
            position,
            from: graph.display_name(converter.from()),
            to: graph.display_name(converter.to()),
            reason,
        }),
    };

    let mut converted = SmallVec::with_capacity(plan.steps().len());
    for (position, (value, step)) in args.iter().zip(plan.steps()).enumerate() {
        converted.push(convert(position, value, step)?);
    }

    if let (Some(bag), Some(index), Some(step)) = (options, plan.options_index(), plan.steps().get(args.len())) {
        // Omitted optionals before the options slot.
        converted.resize(index, Value::Nil);
        converted.push(convert(index, bag, step)?);
    }
    Ok(converted)
}

// =============================================================================
// Tests
// =============================================================================
