//! The base term type (`spec.md` §3, §4.3, C3).
//!
//! Every value in the IR — hashable or distinct — is represented as
//! `Term = Rc<TermData>`. `TermData` carries the shared envelope (type,
//! category, source, flags) plus a [`TermKind`] payload. Hashable kinds
//! (`Functional`, `FunctionType`, `Apply`, `ParameterRef`) hold only
//! immutable inline data; distinct kinds hold `RefCell`/`Cell` fields for
//! the handful of one-shot or append-only mutations §3 allows (appending
//! blocks/instructions/phis, resolving a recursive body, assigning a
//! global initializer once).
//!
//! This single-`Rc` design directly follows the ownership model `spec.md`
//! §3 mandates ("user-visible handles are reference-counted shared
//! pointers") rather than the arena-with-explicit-lifetime style an
//! HIR/MIR layer elsewhere in this corpus uses (`ty::Ty<'a>` in
//! `build_mir.rs`) — the spec's text pins down `Rc`, so we follow it
//! here rather than introducing a separate arena allocator.

use crate::types::cfg::{BlockData, FunctionData, InstructionData, PhiData};
use crate::types::functional::{ExistsTypeData, FunctionTypeData, FunctionalOp};
use crate::types::module::GlobalVariableData;
use crate::types::recursive::{ApplyData, RecursiveData, RecursiveParameterData};
use smallvec::SmallVec;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

/// A handle to any term in the DAG. Cheap to clone; compares by pointer
/// identity via [`Term::ptr_eq`] (hashable terms are deduped by the
/// context, so pointer identity implies structural identity for them;
/// distinct terms never claim structural identity in the first place).
#[derive(Clone)]
pub struct Term(pub(crate) Rc<TermData>);

impl Term {
    #[must_use]
    pub fn ptr_eq(&self, other: &Term) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    #[must_use]
    pub fn kind(&self) -> &TermKind {
        &self.0.kind
    }

    /// The type of this value, or `None` for the unique metatype value
    /// (`spec.md` §3: "the designated metatype ... has none").
    #[must_use]
    pub fn ty(&self) -> Option<Term> {
        self.0.ty.clone()
    }

    #[must_use]
    pub fn category(&self) -> Category {
        self.0.category
    }

    /// The term's current flags. For an `Apply` term, the `ABSTRACT` bit
    /// is not read from the stored cell but recomputed from the
    /// recursive's and arguments' own current flags on every call, so
    /// that an `Apply` built before its recursive resolved picks up the
    /// clear the moment `Recursive::resolve` runs (`spec.md` §4.7: "the
    /// pass walks the users upward, clearing the abstract flag where
    /// possible") rather than keeping a one-shot snapshot forever.
    #[must_use]
    pub fn flags(&self) -> Flags {
        let stored = self.0.flags.get();
        match &self.0.kind {
            TermKind::Apply(data) => {
                let mut f = stored - Flags::ABSTRACT;
                if data.recursive.flags().contains(Flags::ABSTRACT) || data.arguments.iter().any(|a| a.flags().contains(Flags::ABSTRACT)) {
                    f |= Flags::ABSTRACT;
                }
                f
            }
            _ => stored,
        }
    }

    #[must_use]
    pub fn source(&self) -> Source {
        self.0.source.borrow().clone()
    }

    /// Patches the source in place. Used exactly once, right after
    /// construction, by constructors whose natural source is the term
    /// itself (a block's own `BlockEntry` source) — `Rc::new_cyclic`
    /// only hands out a `Weak`, so a strong self-reference has to be
    /// installed after the `Rc` exists (`spec.md` §3's ownership model
    /// already tolerates such cycles; teardown breaks them explicitly).
    pub(crate) fn set_source(&self, source: Source) {
        *self.0.source.borrow_mut() = source;
    }

    #[must_use]
    pub fn is_metatype(&self) -> bool {
        matches!(self.0.kind, TermKind::Metatype)
    }

    pub(crate) fn downgrade(&self) -> Weak<TermData> {
        Rc::downgrade(&self.0)
    }
}

impl PartialEq for Term {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}
impl Eq for Term {}

impl std::hash::Hash for Term {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        (Rc::as_ptr(&self.0) as usize).hash(state);
    }
}

impl fmt::Debug for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Term({:p}, {:?})", Rc::as_ptr(&self.0), self.0.kind.tag())
    }
}

/// The shared envelope every term carries (`spec.md` §3).
pub struct TermData {
    pub(crate) ty: Option<Term>,
    pub(crate) category: Category,
    pub(crate) source: RefCell<Source>,
    pub(crate) flags: Cell<Flags>,
    pub(crate) kind: TermKind,
}

/// `spec.md` §3: "a category: one of {metatype, type, value, recursive}".
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Category {
    Metatype,
    Type,
    Value,
    Recursive,
}

bitflags::bitflags! {
    /// The three independent per-term flags of `spec.md` §3.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    pub struct Flags: u8 {
        /// Value not materialized at runtime; used for erased type parameters.
        const PHANTOM = 0b001;
        /// Contains unresolved function-type parameters.
        const PARAMETERIZED = 0b010;
        /// Contains unresolved recursive parameters.
        const ABSTRACT = 0b100;
    }
}

/// The nearest enclosing construct that determines where a value becomes
/// available (`spec.md` §3, "source"). `Global` is used for fully global
/// values (the null source of the prose spec).
#[derive(Clone)]
pub enum Source {
    Global,
    /// A non-phantom function parameter: available from function entry.
    FunctionParameter(Term),
    /// A phantom function parameter: per §3, dominates any value in the
    /// same function regardless of block position.
    PhantomParameter(Term),
    /// Available from the start of a block (used by phi results, which
    /// are simultaneous with one another at block entry).
    BlockEntry(Term),
    /// Available after a specific instruction has executed.
    AfterInstruction(Term),
    /// A recursive type's parameter placeholder: dominates everything.
    ParameterPlaceholder,
    /// A parameter bound by a specific recursive type instantiation.
    RecursiveParameter(Term),
}

impl Source {
    #[must_use]
    pub fn is_global(&self) -> bool {
        matches!(self, Source::Global)
    }
}

/// The closed set of term-type tags (`spec.md` §3). Hashable variants are
/// listed first, distinct variants second, matching the prose spec's
/// grouping.
pub enum TermKind {
    // --- Hashable ---
    Functional(FunctionalOp, SmallVec<[Term; 4]>),
    FunctionType(FunctionTypeData),
    /// An existentially-quantified type, used only by the lowering pass.
    Exists(ExistsTypeData),
    Apply(ApplyData),
    ParameterRef { depth: u32, index: u32 },
    /// The unique metatype value; its own type is itself.
    Metatype,

    // --- Distinct ---
    GlobalVariable(GlobalVariableData),
    Function(FunctionData),
    Block(BlockData),
    Instruction(InstructionData),
    Phi(PhiData),
    FunctionParameter { function: Weak<TermData>, index: u32 },
    Recursive(RecursiveData),
    RecursiveParameter(RecursiveParameterData),
    /// An existential/recursive parameter placeholder introduced before a
    /// binder is resolved (`spec.md` §4.7, §4.9's `exists` unwrapping).
    ParameterPlaceholder { label: Option<crate::symbol::Symbol> },
}

impl TermKind {
    #[must_use]
    pub fn tag(&self) -> &'static str {
        match self {
            TermKind::Functional(..) => "functional",
            TermKind::FunctionType(..) => "function_type",
            TermKind::Exists(..) => "exists",
            TermKind::Apply(..) => "apply",
            TermKind::ParameterRef { .. } => "parameter_ref",
            TermKind::Metatype => "metatype",
            TermKind::GlobalVariable(..) => "global_variable",
            TermKind::Function(..) => "function",
            TermKind::Block(..) => "block",
            TermKind::Instruction(..) => "instruction",
            TermKind::Phi(..) => "phi",
            TermKind::FunctionParameter { .. } => "function_parameter",
            TermKind::Recursive(..) => "recursive",
            TermKind::RecursiveParameter(..) => "recursive_parameter",
            TermKind::ParameterPlaceholder { .. } => "parameter_placeholder",
        }
    }

    #[must_use]
    pub fn is_hashable(&self) -> bool {
        matches!(
            self,
            TermKind::Functional(..)
                | TermKind::FunctionType(..)
                | TermKind::Exists(..)
                | TermKind::Apply(..)
                | TermKind::ParameterRef { .. }
                | TermKind::Metatype
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_roundtrip() {
        let f = Flags::PHANTOM | Flags::ABSTRACT;
        assert!(f.contains(Flags::PHANTOM));
        assert!(!f.contains(Flags::PARAMETERIZED));
    }
}
