//! Call shapes.
//!
//! A [`CallShape`] fingerprints one invocation: how many positional
//! arguments, whether a block and an options bag were passed, and the
//! runtime type of each argument. Overload resolution is a pure function of
//! (method entry, shape), so the shape is also the inline cache key.

use mosaic_core::{ModuleId, Value};
use smallvec::SmallVec;
use std::fmt;

/// Argument fingerprint of one call.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallShape {
    arg_types: SmallVec<[ModuleId; 4]>,
    options: Option<ModuleId>,
    has_block: bool,
}

impl CallShape {
    /// Build from already-classified argument types.
    pub fn new(arg_types: impl IntoIterator<Item = ModuleId>, has_block: bool, options: Option<ModuleId>) -> Self {
        Self {
            arg_types: arg_types.into_iter().collect(),
            options,
            has_block,
        }
    }

    /// Fingerprint concrete arguments using `class_of`.
    pub fn of<F>(args: &[Value], has_block: bool, options: Option<&Value>, class_of: F) -> Self
    where
        F: Fn(&Value) -> ModuleId,
    {
        Self {
            arg_types: args.iter().map(&class_of).collect(),
            options: options.map(&class_of),
            has_block,
        }
    }

    /// Positional argument count, excluding the options bag.
    #[inline]
    pub fn positional(&self) -> usize {
        self.arg_types.len()
    }

    #[inline]
    pub fn has_block(&self) -> bool {
        self.has_block
    }

    #[inline]
    pub fn has_options(&self) -> bool {
        self.options.is_some()
    }

    /// Type of the options bag, if one was passed.
    #[inline]
    pub fn options_type(&self) -> Option<ModuleId> {
        self.options
    }

    #[inline]
    pub fn arg_types(&self) -> &[ModuleId] {
        &self.arg_types
    }

    /// Count used for arity checks: an options bag is one more trailing
    /// positional.
    #[inline]
    pub fn effective_count(&self) -> usize {
        self.positional() + usize::from(self.has_options())
    }

    /// Positional types followed by the options bag type.
    pub fn effective_types(&self) -> impl Iterator<Item = ModuleId> + '_ {
        self.arg_types.iter().copied().chain(self.options)
    }
}

impl fmt::Display for CallShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} positional", self.positional())?;
        if self.has_options() {
            f.write_str(", options")?;
        }
        if self.has_block {
            f.write_str(", block")?;
        }
        Ok(())
    }
}
