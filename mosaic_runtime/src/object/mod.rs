//! The guest object model as seen by dispatch.
//!
//! - [`module`]: classes and capability bundles
//! - [`registry`]: the type graph that owns them
//! - [`mro`]: linearization and its generation-stamped cache
//! - [`method_table`]: per-module name → entry tables
//! - [`overload`]: native overloads and their parameter slots

pub mod method_table;
pub mod module;
pub mod mro;
pub mod overload;
pub mod registry;
