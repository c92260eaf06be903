//! Message dispatch for the Mosaic dispatch core.
//!
//! This crate provides:
//! - A generation-stamped lookup cache per (type, name)
//! - Overload resolution with a pluggable selection policy
//! - Per-call-site inline caches with mono/poly/megamorphic states
//! - The [`Dispatcher`], which ties them together behind `dispatch`
//!   and `resolve_at_call_site`

pub mod call_shape;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod ic_manager;
pub mod inline_cache;
pub mod introspect;
pub mod ops;

pub use call_shape::CallShape;
pub use config::{BlockPolicy, ConfigError, DispatchConfig};
pub use dispatcher::{Dispatcher, Message};
pub use error::{CallFailure, DispatchError, DispatchResult};
pub use ic_manager::{CallSiteId, ICClassification, ICManager, ICStats};
pub use inline_cache::{CallSiteCache, IcEntry, IcLookup, IcState};
pub use ops::method_dispatch::{
    ArgConversion, CallerContext, ConversionPlan, DeclarationOrder, MethodCache, OverloadPolicy, OverloadResolver,
    ReceiverKey, ResolutionFailure, ResolvedCall, ScoredCandidate, Selection,
};
