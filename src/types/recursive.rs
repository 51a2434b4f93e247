//! Abstract recursive types (`spec.md` §3, §4.7, C7).
//!
//! A recursive type is created before its body is known (so the body
//! can refer back to the type itself), then closed with [`Recursive::resolve`].
//! [`Apply`] instantiates a resolved (or still-abstract) recursive type
//! with concrete arguments for its parameters; [`Apply::unpack`] performs
//! the one-step substitution spec.md §4.7 calls "unpacking an abstract
//! type".

use crate::error::{Error, Result};
use crate::types::term::{Category, Flags, Source, Term, TermData, TermKind};
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

pub struct RecursiveParameterData {
    pub recursive: Weak<TermData>,
    pub index: u32,
}

/// A typed view over a `Term` known to hold `TermKind::RecursiveParameter`.
#[derive(Clone)]
pub struct RecursiveParameter(pub(crate) Term);

impl RecursiveParameter {
    #[must_use]
    pub fn term(&self) -> &Term {
        &self.0
    }

    #[must_use]
    pub fn from_term(t: Term) -> Option<Self> {
        matches!(t.kind(), TermKind::RecursiveParameter(_)).then_some(RecursiveParameter(t))
    }

    #[must_use]
    pub fn index(&self) -> u32 {
        match self.0.kind() {
            TermKind::RecursiveParameter(data) => data.index,
            _ => unreachable!(),
        }
    }

    #[must_use]
    pub fn recursive(&self) -> Option<Recursive> {
        match self.0.kind() {
            TermKind::RecursiveParameter(data) => data.recursive.upgrade().map(|rc| Recursive(Term(rc))),
            _ => None,
        }
    }
}

pub struct RecursiveData {
    pub parameters: RefCell<Vec<Term>>,
    pub body: RefCell<Option<Term>>,
}

/// A typed view over a `Term` known to hold `TermKind::Recursive`.
#[derive(Clone)]
pub struct Recursive(pub(crate) Term);

impl Recursive {
    #[must_use]
    pub fn term(&self) -> &Term {
        &self.0
    }

    fn data(&self) -> &RecursiveData {
        match self.0.kind() {
            TermKind::Recursive(data) => data,
            _ => unreachable!("Recursive wraps a non-recursive term"),
        }
    }

    #[must_use]
    pub fn from_term(t: Term) -> Option<Self> {
        matches!(t.kind(), TermKind::Recursive(_)).then_some(Recursive(t))
    }

    /// Creates a new, unresolved recursive type with `n_params`
    /// parameter placeholders. Returns the recursive term plus its
    /// parameters, bound so the caller can build the body referring back
    /// to them before calling [`Recursive::resolve`]. `metatype` must be
    /// the owning context's single metatype term.
    #[must_use]
    pub fn new(category: Category, n_params: u32, metatype: Term) -> (Recursive, Vec<Term>) {
        let rec = Term(Rc::new(TermData {
            ty: Some(metatype.clone()),
            category,
            source: RefCell::new(Source::Global),
            flags: Cell::new(Flags::ABSTRACT),
            kind: TermKind::Recursive(RecursiveData { parameters: RefCell::new(Vec::new()), body: RefCell::new(None) }),
        }));
        let weak_rec = rec.downgrade();
        let params: Vec<Term> = (0..n_params)
            .map(|index| {
                Term(Rc::new(TermData {
                    ty: Some(metatype.clone()),
                    category: Category::Type,
                    source: RefCell::new(Source::RecursiveParameter(rec.clone())),
                    flags: Cell::new(Flags::empty()),
                    kind: TermKind::RecursiveParameter(RecursiveParameterData {
                        recursive: weak_rec.clone(),
                        index,
                    }),
                }))
            })
            .collect();
        if let TermKind::Recursive(data) = rec.kind() {
            *data.parameters.borrow_mut() = params.clone();
        }
        (Recursive(rec), params)
    }

    #[must_use]
    pub fn parameters(&self) -> Vec<Term> {
        self.data().parameters.borrow().clone()
    }

    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.data().body.borrow().is_some()
    }

    #[must_use]
    pub fn body(&self) -> Option<Term> {
        self.data().body.borrow().clone()
    }

    /// Closes the recursion. `spec.md` §4.7: resolving clears the
    /// abstractness of the recursive term itself (but not of `Apply`
    /// terms created against it before resolution; see `Apply::new`).
    pub fn resolve(&self, body: Term) -> Result<()> {
        let mut slot = self.data().body.borrow_mut();
        if slot.is_some() {
            return Err(Error::internal("recursive type already resolved"));
        }
        *slot = Some(body);
        drop(slot);
        let mut flags = self.0.flags();
        flags.remove(Flags::ABSTRACT);
        self.0 .0.flags.set(flags);
        Ok(())
    }
}

pub struct ApplyData {
    pub recursive: Term,
    pub arguments: Vec<Term>,
}

/// A typed view over a `Term` known to hold `TermKind::Apply`.
#[derive(Clone)]
pub struct Apply(pub(crate) Term);

impl Apply {
    #[must_use]
    pub fn term(&self) -> &Term {
        &self.0
    }

    #[must_use]
    pub fn from_term(t: Term) -> Option<Self> {
        matches!(t.kind(), TermKind::Apply(_)).then_some(Apply(t))
    }

    #[must_use]
    pub fn recursive(&self) -> Recursive {
        match self.0.kind() {
            TermKind::Apply(data) => Recursive::from_term(data.recursive.clone()).expect("Apply.recursive is a recursive term"),
            _ => unreachable!(),
        }
    }

    #[must_use]
    pub fn arguments(&self) -> &[Term] {
        match self.0.kind() {
            TermKind::Apply(data) => &data.arguments,
            _ => unreachable!(),
        }
    }

    /// One-step substitution: replaces each `RecursiveParameter` in the
    /// resolved body with the corresponding argument (`spec.md` §4.7,
    /// "unpacking an abstract type"). Fails if the recursive type has no
    /// body yet.
    pub fn unpack(&self) -> Result<Term> {
        let recursive = self.recursive();
        let body = recursive.body().ok_or(Error::UnresolvedRecursive)?;
        let params = recursive.parameters();
        let args = self.arguments().to_vec();
        Ok(substitute_recursive_params(&body, &params, &args))
    }
}

fn substitute_recursive_params(term: &Term, params: &[Term], args: &[Term]) -> Term {
    if let Some(idx) = params.iter().position(|p| p.ptr_eq(term)) {
        return args[idx].clone();
    }
    match term.kind() {
        TermKind::Functional(op, operands) => {
            let new_operands: smallvec::SmallVec<[Term; 4]> =
                operands.iter().map(|o| substitute_recursive_params(o, params, args)).collect();
            Term(Rc::new(TermData {
                ty: term.ty(),
                category: term.category(),
                source: RefCell::new(term.source()),
                flags: Cell::new(term.flags()),
                kind: TermKind::Functional(clone_op(op), new_operands),
            }))
        }
        _ => term.clone(),
    }
}

fn clone_op(op: &crate::types::functional::FunctionalOp) -> crate::types::functional::FunctionalOp {
    use crate::types::functional::FunctionalOp::*;
    match op {
        EmptyType => EmptyType,
        BlockType => BlockType,
        ByteType => ByteType,
        BooleanType => BooleanType,
        IntegerType { width, signed } => IntegerType { width: *width, signed: *signed },
        FloatType { width } => FloatType { width: *width },
        PointerType => PointerType,
        ArrayType => ArrayType,
        StructType => StructType,
        UnionType => UnionType,
        EmptyValue => EmptyValue,
        BooleanValue(b) => BooleanValue(*b),
        IntegerValue(v) => IntegerValue(v.clone()),
        FloatValue { bits } => FloatValue { bits: *bits },
        UndefValue => UndefValue,
        ArrayValue => ArrayValue,
        StructValue => StructValue,
        UnionValue => UnionValue,
        ArrayElement => ArrayElement,
        ArrayElementPtr => ArrayElementPtr,
        StructElement { index } => StructElement { index: *index },
        StructElementPtr { index } => StructElementPtr { index: *index },
        StructElementOffset { index } => StructElementOffset { index: *index },
        UnionElement => UnionElement,
        UnionElementPtr => UnionElementPtr,
        Sizeof => Sizeof,
        Alignof => Alignof,
        TypeV => TypeV,
        PointerCast => PointerCast,
        PointerOffset => PointerOffset,
        IntBinary(o) => IntBinary(*o),
        IntUnary(o) => IntUnary(*o),
        FloatBinary(o) => FloatBinary(*o),
        Compare(p) => Compare(*p),
        FunctionSpecialize => FunctionSpecialize,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_metatype() -> Term {
        Term(Rc::new(TermData {
            ty: None,
            category: Category::Metatype,
            source: RefCell::new(Source::Global),
            flags: Cell::new(Flags::empty()),
            kind: TermKind::Metatype,
        }))
    }

    #[test]
    fn new_recursive_starts_abstract_and_unresolved() {
        let (rec, params) = Recursive::new(Category::Type, 1, dummy_metatype());
        assert!(!rec.is_resolved());
        assert!(rec.term().flags().contains(Flags::ABSTRACT));
        assert_eq!(params.len(), 1);
        assert_eq!(rec.parameters().len(), 1);
    }

    #[test]
    fn resolve_clears_abstract_flag_and_rejects_twice() {
        let (rec, _params) = Recursive::new(Category::Type, 0, dummy_metatype());
        let body = Term(Rc::new(TermData {
            ty: None,
            category: Category::Type,
            source: RefCell::new(Source::Global),
            flags: Cell::new(Flags::empty()),
            kind: TermKind::Metatype,
        }));
        rec.resolve(body.clone()).unwrap();
        assert!(rec.is_resolved());
        assert!(!rec.term().flags().contains(Flags::ABSTRACT));
        assert!(rec.resolve(body).is_err());
    }
}
