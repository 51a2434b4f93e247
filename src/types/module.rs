//! Modules: the top-level container mapping names to globals
//! (`spec.md` §4.6, C6).

use crate::error::{Error, Result};
use crate::symbol::Symbol;
use crate::types::term::{Term, TermKind};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;

/// Cross-module visibility of a global (`spec.md` §4.6: "each global
/// carries a linkage"). Grounded in `original_source/src/Tvm/Core.hpp`'s
/// `Linkage` enum.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Linkage {
    /// Visible only within the defining module.
    Local,
    /// Visible only within the defining module, and guaranteed not to be
    /// referenced by name from outside it (no cross-module symbol at all).
    Private,
    /// Defined here; other modules defining the same symbol are assumed
    /// to produce an identical definition, so the linker may keep any one
    /// copy and discard the rest.
    OneDefinition,
    /// Defined here, visible to other modules.
    Export,
    /// Declared here, defined in some other module.
    Import,
}

pub struct GlobalVariableData {
    pub name: Symbol,
    pub linkage: Cell<Linkage>,
    pub pointee_type: Term,
    pub constant: bool,
    pub initializer: RefCell<Option<Term>>,
}

/// A typed view over a `Term` known to hold `TermKind::GlobalVariable`.
#[derive(Clone)]
pub struct GlobalVariable(pub(crate) Term);

impl GlobalVariable {
    #[must_use]
    pub fn term(&self) -> &Term {
        &self.0
    }

    fn data(&self) -> &GlobalVariableData {
        match self.0.kind() {
            TermKind::GlobalVariable(data) => data,
            _ => unreachable!("GlobalVariable wraps a non-global-variable term"),
        }
    }

    #[must_use]
    pub fn from_term(t: Term) -> Option<Self> {
        matches!(t.kind(), TermKind::GlobalVariable(_)).then_some(GlobalVariable(t))
    }

    #[must_use]
    pub fn name(&self) -> &Symbol {
        &self.data().name
    }

    #[must_use]
    pub fn linkage(&self) -> Linkage {
        self.data().linkage.get()
    }

    /// Overrides this global's linkage; see [`crate::types::cfg::Function::set_linkage`].
    pub fn set_linkage(&self, linkage: Linkage) {
        self.data().linkage.set(linkage);
    }

    #[must_use]
    pub fn pointee_type(&self) -> Term {
        self.data().pointee_type.clone()
    }

    #[must_use]
    pub fn is_constant(&self) -> bool {
        self.data().constant
    }

    #[must_use]
    pub fn initializer(&self) -> Option<Term> {
        self.data().initializer.borrow().clone()
    }

    /// Sets the initializer once. `spec.md` §4.6: a global variable's
    /// initializer may be supplied after the variable itself is created,
    /// but only once, and only for a variable defined (not merely
    /// imported) in this module.
    pub fn set_initializer(&self, value: Term) -> Result<()> {
        if self.data().linkage.get() == Linkage::Import {
            return Err(Error::internal("cannot initialize an imported global variable"));
        }
        let mut slot = self.data().initializer.borrow_mut();
        if slot.is_some() {
            return Err(Error::internal("global variable initializer already set"));
        }
        *slot = Some(value);
        Ok(())
    }
}

/// Either kind of top-level definition a [`Module`] can hold.
#[derive(Clone)]
pub enum Global {
    Variable(Term),
    Function(Term),
}

impl Global {
    #[must_use]
    pub fn term(&self) -> &Term {
        match self {
            Global::Variable(t) | Global::Function(t) => t,
        }
    }

    #[must_use]
    pub fn name(&self) -> Symbol {
        match self {
            Global::Variable(t) => GlobalVariable::from_term(t.clone())
                .expect("Global::Variable wraps a global variable")
                .name()
                .clone(),
            Global::Function(t) => crate::types::cfg::Function::from_term(t.clone())
                .expect("Global::Function wraps a function")
                .name()
                .clone(),
        }
    }

    #[must_use]
    pub fn linkage(&self) -> Linkage {
        match self {
            Global::Variable(t) => GlobalVariable::from_term(t.clone())
                .expect("Global::Variable wraps a global variable")
                .linkage(),
            Global::Function(t) => crate::types::cfg::Function::from_term(t.clone())
                .expect("Global::Function wraps a function")
                .linkage(),
        }
    }
}

/// A compilation unit: the name-to-global mapping plus the target's
/// pointer width, which every `IntWidth::Pointer` resolution and layout
/// computation needs (`spec.md` §4.1, §4.9).
pub struct Module {
    pub pointer_width: u32,
    names: RefCell<HashMap<Symbol, Term>>,
    order: RefCell<Vec<Term>>,
    constructors: RefCell<Vec<(Term, i32)>>,
    destructors: RefCell<Vec<(Term, i32)>>,
}

impl Module {
    #[must_use]
    pub fn new(pointer_width: u32) -> Self {
        Module {
            pointer_width,
            names: RefCell::new(HashMap::new()),
            order: RefCell::new(Vec::new()),
            constructors: RefCell::new(Vec::new()),
            destructors: RefCell::new(Vec::new()),
        }
    }

    /// Appends `(function, priority)` to the module's constructor list
    /// (`spec.md` §4.6). Priorities run lowest-first, matching the
    /// `original_source` convention for `llvm.global_ctors`-style tables.
    pub fn add_constructor(&self, function: Term, priority: i32) -> Result<()> {
        if !matches!(function.kind(), TermKind::Function(_)) {
            return Err(Error::internal("constructor entry must be a function"));
        }
        self.constructors.borrow_mut().push((function, priority));
        Ok(())
    }

    pub fn add_destructor(&self, function: Term, priority: i32) -> Result<()> {
        if !matches!(function.kind(), TermKind::Function(_)) {
            return Err(Error::internal("destructor entry must be a function"));
        }
        self.destructors.borrow_mut().push((function, priority));
        Ok(())
    }

    #[must_use]
    pub fn constructors(&self) -> Vec<(Term, i32)> {
        self.constructors.borrow().clone()
    }

    #[must_use]
    pub fn destructors(&self) -> Vec<(Term, i32)> {
        self.destructors.borrow().clone()
    }

    /// Registers a global under its name. Fails if the name is already
    /// taken by a different term (`spec.md` §4.6: names are unique within
    /// a module).
    pub fn add_global(&self, name: Symbol, term: Term) -> Result<()> {
        let mut names = self.names.borrow_mut();
        if let Some(existing) = names.get(&name) {
            if !existing.ptr_eq(&term) {
                return Err(Error::internal(format!("duplicate global name '{name}'")));
            }
            return Ok(());
        }
        names.insert(name, term.clone());
        self.order.borrow_mut().push(term);
        Ok(())
    }

    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<Term> {
        self.names.borrow().iter().find(|(k, _)| k.as_str() == name).map(|(_, v)| v.clone())
    }

    /// All globals in the order they were added, as typed [`Global`]
    /// views.
    #[must_use]
    pub fn globals(&self) -> Vec<Global> {
        self.order
            .borrow()
            .iter()
            .filter_map(|t| match t.kind() {
                TermKind::GlobalVariable(_) => Some(Global::Variable(t.clone())),
                TermKind::Function(_) => Some(Global::Function(t.clone())),
                _ => None,
            })
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.order.borrow().len()
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
    fn duplicate_names_require_same_term() {
        let module = Module::new(64);
        assert_eq!(module.len(), 0);
    }
}
