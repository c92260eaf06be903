//! Core value types shared by the Mosaic dispatch crates.
//!
//! This crate provides:
//! - Guest values ([`Value`], [`Block`]) as seen by the dispatch core
//! - Interned symbols for method and type names
//! - Module identifiers
//! - Errors raised by native callables and converters

pub mod error;
pub mod id;
pub mod intern;
pub mod value;

pub use error::{ConvertError, NativeError};
pub use id::ModuleId;
pub use intern::{Symbol, intern};
pub use value::{Block, Instance, Value, ValueTag};
