//! Global symbol interning.
//!
//! Method names, type names and guest symbols are interned once and then
//! compared as 4-byte ids. Every lookup key in the dispatch core is a
//! [`Symbol`], so hashing and equality never touch string bytes on the hot path.
//!
//! # Thread Safety
//!
//! The interner is append-only. Reads take a shared `parking_lot` lock; the
//! write lock is only taken the first time a string is seen.

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

// =============================================================================
// Symbol
// =============================================================================

/// An interned string.
///
/// Two symbols are equal iff their strings are equal (case- and
/// punctuation-sensitive: `empty?`, `empty` and `Empty` are three symbols).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol(u32);

impl Symbol {
    /// Raw interner index.
    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Resolve the symbol back to its string.
    pub fn as_str(self) -> Arc<str> {
        interner().resolve(self)
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, ":{}", self.as_str())
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_str())
    }
}

impl From<&str> for Symbol {
    fn from(s: &str) -> Self {
        intern(s)
    }
}

// =============================================================================
// Interner
// =============================================================================

#[derive(Default)]
struct Interner {
    ids: RwLock<FxHashMap<Arc<str>, Symbol>>,
    strings: RwLock<Vec<Arc<str>>>,
}

impl Interner {
    fn intern(&self, s: &str) -> Symbol {
        if let Some(&sym) = self.ids.read().get(s) {
            return sym;
        }

        let mut ids = self.ids.write();
        // Another thread may have won the race between the two locks.
        if let Some(&sym) = ids.get(s) {
            return sym;
        }

        let mut strings = self.strings.write();
        let sym = Symbol(strings.len() as u32);
        let owned: Arc<str> = Arc::from(s);
        strings.push(owned.clone());
        ids.insert(owned, sym);
        sym
    }

    fn resolve(&self, sym: Symbol) -> Arc<str> {
        self.strings
            .read()
            .get(sym.0 as usize)
            .cloned()
            .unwrap_or_else(|| Arc::from("<unknown symbol>"))
    }
}

static INTERNER: OnceLock<Interner> = OnceLock::new();

#[inline]
fn interner() -> &'static Interner {
    INTERNER.get_or_init(Interner::default)
}

/// Intern a string, returning its symbol.
#[inline]
pub fn intern(s: &str) -> Symbol {
    interner().intern(s)
}

// =============================================================================
// Tests
// =============================================================================
