//! Dispatch operations.

pub mod method_dispatch;
