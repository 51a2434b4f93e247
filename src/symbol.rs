//! Name interning.
//!
//! `Context::lookup_name` (`spec.md` §4.2) needs to turn an operation or
//! debug name into a canonical handle so that two interned calls with the
//! same spelling compare equal by pointer rather than by string content.
//! This mirrors a `Symbol`/`Interner` split seen in compiler crates that
//! intern a fixed keyword set (`crate::{Symbol, intern, symbol::Interner}`),
//! generalized here to arbitrary caller-supplied names.

use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;

/// An interned name. Cheap to clone (a refcount bump) and cheap to
/// compare (pointer equality on the backing `Rc<str>` once interned
/// through the same [`Interner`]).
#[derive(Clone, Eq)]
pub struct Symbol(Rc<str>);

impl Symbol {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl PartialEq for Symbol {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0) || *self.0 == *other.0
    }
}

impl std::hash::Hash for Symbol {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        (*self.0).hash(state);
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Deduplicating string interner. Owned by [`crate::context::Context`];
/// every `lookup_name` call goes through the single interner so that
/// identical names always yield `Symbol`s whose backing `Rc<str>` is the
/// same allocation.
#[derive(Default)]
pub struct Interner {
    names: RefCell<HashSet<Rc<str>>>,
}

impl Interner {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern `name`, returning the canonical handle. Amortized O(1) plus
    /// the cost of hashing `name` once.
    pub fn intern(&self, name: &str) -> Symbol {
        if let Some(existing) = self.names.borrow().get(name) {
            return Symbol(existing.clone());
        }
        let rc: Rc<str> = Rc::from(name);
        self.names.borrow_mut().insert(rc.clone());
        Symbol(rc)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.names.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_idempotent_and_shares_storage() {
        let interner = Interner::new();
        let a = interner.intern("array_el");
        let b = interner.intern("array_el");
        assert_eq!(a, b);
        assert!(Rc::ptr_eq(&a.0, &b.0));
        assert_eq!(interner.len(), 1);
    }

    #[test]
    fn distinct_names_are_distinct() {
        let interner = Interner::new();
        let a = interner.intern("add");
        let b = interner.intern("sub");
        assert_ne!(a, b);
        assert_eq!(interner.len(), 2);
    }
}
