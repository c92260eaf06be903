//! Registered implicit conversions between types.
//!
//! An overload parameter declared `ImplicitConvert` accepts an argument of a
//! different type when a converter from the argument's type to the expected
//! type is registered here. Converters run at call time and may still refuse
//! a particular value with [`ConvertError::NotApplicable`].
//!
//! # Thread Safety
//!
//! Registration may happen while calls are in flight. Every registration
//! bumps [`ConverterRegistry::epoch`]; caches that remember a resolution
//! stamp the epoch and treat a mismatch as a miss, because a new converter
//! can change which overload is best.

use dashmap::DashMap;
use mosaic_core::{ConvertError, ModuleId, Value};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Host conversion function.
pub type ConvertFn = dyn Fn(&Value) -> Result<Value, ConvertError> + Send + Sync;

/// A registered conversion from one type to another.
#[derive(Clone)]
pub struct Converter {
    from: ModuleId,
    to: ModuleId,
    body: Arc<ConvertFn>,
}

impl Converter {
    pub fn new<F>(from: ModuleId, to: ModuleId, body: F) -> Self
    where
        F: Fn(&Value) -> Result<Value, ConvertError> + Send + Sync + 'static,
    {
        Self {
            from,
            to,
            body: Arc::new(body),
        }
    }

    #[inline]
    pub fn from(&self) -> ModuleId {
        self.from
    }

    #[inline]
    pub fn to(&self) -> ModuleId {
        self.to
    }

    /// Run the conversion.
    #[inline]
    pub fn convert(&self, value: &Value) -> Result<Value, ConvertError> {
        (self.body)(value)
    }

    /// Whether both handles share one host function.
    #[inline]
    pub fn ptr_eq(&self, other: &Converter) -> bool {
        Arc::ptr_eq(&self.body, &other.body)
    }
}

impl fmt::Debug for Converter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Converter")
            .field("from", &self.from)
            .field("to", &self.to)
            .finish_non_exhaustive()
    }
}

/// `(from, to) -> Converter` table.
#[derive(Debug)]
pub struct ConverterRegistry {
    converters: DashMap<(ModuleId, ModuleId), Converter>,
    epoch: AtomicU64,
}

impl ConverterRegistry {
    pub fn new() -> Self {
        Self {
            converters: DashMap::new(),
            epoch: AtomicU64::new(1),
        }
    }

    /// Register (or replace) the conversion `from -> to`.
    pub fn register<F>(&self, from: ModuleId, to: ModuleId, body: F)
    where
        F: Fn(&Value) -> Result<Value, ConvertError> + Send + Sync + 'static,
    {
        self.insert(Converter::new(from, to, body));
    }

    /// Register a prebuilt converter.
    pub fn insert(&self, converter: Converter) {
        let key = (converter.from(), converter.to());
        let replaced = self.converters.insert(key, converter).is_some();
        let epoch = self.epoch.fetch_add(1, Ordering::AcqRel) + 1;
        debug!(from = ?key.0, to = ?key.1, replaced, epoch, "registered converter");
    }

    #[inline]
    pub fn get(&self, from: ModuleId, to: ModuleId) -> Option<Converter> {
        self.converters.get(&(from, to)).map(|c| c.value().clone())
    }

    #[inline]
    pub fn contains(&self, from: ModuleId, to: ModuleId) -> bool {
        self.converters.contains_key(&(from, to))
    }

    /// Bumped on every registration.
    #[inline]
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.converters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.converters.is_empty()
    }
}

impl Default for ConverterRegistry {
    fn default() -> Self {
        Self::new()
    }
}
