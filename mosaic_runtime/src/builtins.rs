//! Builtin classes for the value tags.
//!
//! Every [`Value`] variant except objects maps onto one of these classes.
//! They are ordinary classes under the root: guest code and startup
//! manifests can add methods to them or include bundles into them.

use crate::error::RegistrationResult;
use crate::object::module::ModuleFlags;
use crate::object::registry::TypeGraph;
use mosaic_core::{ModuleId, Value};

/// Ids of the builtin classes in one graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuiltinTypes {
    pub object: ModuleId,
    pub nil: ModuleId,
    pub boolean: ModuleId,
    pub integer: ModuleId,
    pub float: ModuleId,
    pub string: ModuleId,
    pub symbol: ModuleId,
    pub array: ModuleId,
    pub hash: ModuleId,
    pub proc: ModuleId,
    /// Class of every type and bundle used as a value.
    pub module: ModuleId,
}

impl BuiltinTypes {
    /// Define the builtin classes in `graph`.
    ///
    /// Fails with `DuplicateType` if any of the names is already taken.
    pub fn install(graph: &TypeGraph) -> RegistrationResult<Self> {
        let define = |name: &str| {
            graph.define_class_with_flags(name, None, &[], ModuleFlags::BUILTIN)
        };
        Ok(Self {
            object: graph.root(),
            nil: define("NilClass")?,
            boolean: define("Boolean")?,
            integer: define("Integer")?,
            float: define("Float")?,
            string: define("String")?,
            symbol: define("Symbol")?,
            array: define("Array")?,
            hash: define("Hash")?,
            proc: define("Proc")?,
            module: define("Module")?,
        })
    }

    /// Runtime class of `value`.
    #[inline]
    pub fn class_of(&self, value: &Value) -> ModuleId {
        match value {
            Value::Nil => self.nil,
            Value::Bool(_) => self.boolean,
            Value::Int(_) => self.integer,
            Value::Float(_) => self.float,
            Value::Str(_) => self.string,
            Value::Symbol(_) => self.symbol,
            Value::Array(_) => self.array,
            Value::Hash(_) => self.hash,
            Value::Proc(_) => self.proc,
            Value::Module(_) => self.module,
            Value::Object(instance) => instance.class(),
        }
    }
}
