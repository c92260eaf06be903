//! Guest runtime values.
//!
//! The dispatch core never looks inside values beyond their tag: it only needs
//! to know which type a receiver or argument belongs to. Heap payloads are
//! reference counted so values are cheap to clone into argument vectors.

use crate::error::NativeError;
use crate::id::ModuleId;
use crate::intern::Symbol;
use std::fmt;
use std::sync::Arc;

// =============================================================================
// Value Tag
// =============================================================================

/// Coarse classification of a value.
///
/// Every tag except [`ValueTag::Module`] and [`ValueTag::Object`] maps onto one
/// builtin type; objects carry their own class id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueTag {
    Nil,
    Bool,
    Int,
    Float,
    Str,
    Symbol,
    Array,
    Hash,
    Proc,
    Module,
    Object,
}

// =============================================================================
// Block
// =============================================================================

/// Signature of a block body.
pub type BlockFn = dyn Fn(&[Value]) -> Result<Value, NativeError> + Send + Sync;

/// A trailing block argument (or a proc value).
#[derive(Clone)]
pub struct Block {
    body: Arc<BlockFn>,
}

impl Block {
    /// Wrap a closure as a block.
    pub fn new<F>(body: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value, NativeError> + Send + Sync + 'static,
    {
        Self {
            body: Arc::new(body),
        }
    }

    /// Yield to the block.
    #[inline]
    pub fn call(&self, args: &[Value]) -> Result<Value, NativeError> {
        (self.body)(args)
    }

    /// Whether two handles refer to the same block body.
    #[inline]
    pub fn ptr_eq(&self, other: &Block) -> bool {
        Arc::ptr_eq(&self.body, &other.body)
    }
}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Block({:p})", Arc::as_ptr(&self.body))
    }
}

// =============================================================================
// Instance
// =============================================================================

/// An instance of a guest class.
#[derive(Debug)]
pub struct Instance {
    class: ModuleId,
}

impl Instance {
    /// The instance's class.
    #[inline]
    pub fn class(&self) -> ModuleId {
        self.class
    }
}

// =============================================================================
// Value
// =============================================================================

/// A guest value.
#[derive(Debug, Clone)]
pub enum Value {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Arc<str>),
    Symbol(Symbol),
    Array(Arc<[Value]>),
    /// Ordered key/value pairs. Also the shape of a trailing options bag.
    Hash(Arc<[(Value, Value)]>),
    Proc(Block),
    /// A type or bundle used as a receiver (`Math.sqrt`, `Dog.new`).
    Module(ModuleId),
    Object(Arc<Instance>),
}

impl Value {
    /// Create a string value.
    pub fn str(s: &str) -> Self {
        Value::Str(Arc::from(s))
    }

    /// Create an array value.
    pub fn array(items: Vec<Value>) -> Self {
        Value::Array(items.into())
    }

    /// Create a hash value from pairs.
    pub fn hash(pairs: Vec<(Value, Value)>) -> Self {
        Value::Hash(pairs.into())
    }

    /// Allocate a new instance of `class`.
    pub fn object(class: ModuleId) -> Self {
        Value::Object(Arc::new(Instance { class }))
    }

    /// Coarse tag of this value.
    #[inline]
    pub fn tag(&self) -> ValueTag {
        match self {
            Value::Nil => ValueTag::Nil,
            Value::Bool(_) => ValueTag::Bool,
            Value::Int(_) => ValueTag::Int,
            Value::Float(_) => ValueTag::Float,
            Value::Str(_) => ValueTag::Str,
            Value::Symbol(_) => ValueTag::Symbol,
            Value::Array(_) => ValueTag::Array,
            Value::Hash(_) => ValueTag::Hash,
            Value::Proc(_) => ValueTag::Proc,
            Value::Module(_) => ValueTag::Module,
            Value::Object(_) => ValueTag::Object,
        }
    }

    #[inline]
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    #[inline]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    #[inline]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    #[inline]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    #[inline]
    pub fn as_module(&self) -> Option<ModuleId> {
        match self {
            Value::Module(id) => Some(*id),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Symbol(a), Value::Symbol(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Hash(a), Value::Hash(b)) => a == b,
            (Value::Proc(a), Value::Proc(b)) => a.ptr_eq(b),
            (Value::Module(a), Value::Module(b)) => a == b,
            // Objects have identity semantics.
            (Value::Object(a), Value::Object(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::str(s)
    }
}

impl From<Symbol> for Value {
    fn from(s: Symbol) -> Self {
        Value::Symbol(s)
    }
}

// =============================================================================
// Tests
// =============================================================================
