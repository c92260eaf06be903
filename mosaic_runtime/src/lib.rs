//! Type graph and method tables for the Mosaic dispatch core.
//!
//! This crate provides:
//! - Classes and capability bundles with single inheritance plus mixins
//! - Method resolution order with generation-stamped caching
//! - Per-module method tables holding native overloads
//! - Implicit conversion registry and builtin classes
//! - Startup manifests validated before they are applied

pub mod builtins;
pub mod context;
pub mod convert;
pub mod error;
pub mod manifest;
pub mod object;

// Re-export commonly used items
pub use builtins::BuiltinTypes;
pub use context::{CallContext, SiteStorage};
pub use convert::{Converter, ConverterRegistry};
pub use error::{RegistrationError, RegistrationResult};
pub use manifest::{Manifest, OverloadDecl};
pub use object::method_table::{DispatchKind, LookupRoot, MethodEntry, MethodTable, Visibility};
pub use object::module::{ModuleKind, ModuleObject};
pub use object::mro::Mro;
pub use object::overload::{
    BlockRequirement, ConversionStrategy, ExplicitParam, ImplicitSlot, NativeArgs, NativeFn, NativeOverload,
    OverloadBuilder, OverloadShapeError, ParamKind, ParameterSlot,
};
pub use object::registry::{GraphConfig, MethodLookup, TypeGraph};
