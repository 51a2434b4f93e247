//! The term store: hash-consing, typing rules, dominance checks, and the
//! constructors that bring every term kind into existence (`spec.md` §4,
//! C2).
//!
//! Hashable terms (`spec.md` §3) are deduplicated here by structural key;
//! distinct terms (functions, blocks, global variables, ...) are simply
//! allocated fresh and handed to their owning [`crate::types::module::Module`]
//! or [`crate::types::cfg::Function`]. Every public constructor enforces
//! the relevant typing rule and the dominance rule (`source_dominated`)
//! before a term is allowed to exist at all, so a caller never observes a
//! half-valid term (`spec.md` §7).

use crate::bigint::BigInteger;
use crate::error::{Error, Result};
use crate::symbol::Symbol;
use crate::types::cfg::Function;
use crate::types::functional::{
    as_array_type, as_integer_type, as_pointer_type, as_struct_type, as_union_type, FunctionTypeData, FunctionalOp,
};
use crate::types::module::{GlobalVariableData, Linkage};
use crate::types::recursive::{Apply, ApplyData, Recursive};
use crate::types::term::{Category, Flags, Source, Term, TermData, TermKind};
use crate::types::CallingConvention;
use hashbrown::HashMap;
use log::{debug, trace};
use smallvec::SmallVec;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// Owns the hash-consing tables and the metatype singleton. One `Context`
/// per module (`spec.md` never requires sharing terms across modules).
pub struct Context {
    metatype: Term,
    /// The target's pointer width in bits, used to resolve
    /// `IntWidth::Pointer` in width-matching typing rules.
    pointer_width: u32,
    functional: RefCell<HashMap<FunctionalKey, Term>>,
    function_types: RefCell<HashMap<FunctionTypeKey, Term>>,
    applies: RefCell<HashMap<ApplyKey, Term>>,
    interner: crate::symbol::Interner,
}

impl Context {
    #[must_use]
    pub fn new(pointer_width: u32) -> Self {
        Context {
            metatype: build_metatype(),
            pointer_width,
            functional: RefCell::new(HashMap::new()),
            function_types: RefCell::new(HashMap::new()),
            applies: RefCell::new(HashMap::new()),
            interner: crate::symbol::Interner::new(),
        }
    }

    #[must_use]
    pub fn metatype(&self) -> Term {
        self.metatype.clone()
    }

    /// The target's pointer width in bits, as given to [`Context::new`].
    #[must_use]
    pub fn pointer_width(&self) -> u32 {
        self.pointer_width
    }

    #[must_use]
    pub fn intern_symbol(&self, name: &str) -> Symbol {
        self.interner.intern(name)
    }

    // -----------------------------------------------------------------
    // Dominance
    // -----------------------------------------------------------------

    /// Returns the block a source is defined "within", if any. `None`
    /// means the source is transparent (dominates, or is dominated by,
    /// everything — `Global`, `ParameterPlaceholder`, `RecursiveParameter`).
    fn defining_block(source: &Source) -> Option<Term> {
        match source {
            Source::Global | Source::ParameterPlaceholder | Source::RecursiveParameter(_) => None,
            Source::FunctionParameter(f) | Source::PhantomParameter(f) => {
                Function::from_term(f.clone()).and_then(|f| f.entry_block())
            }
            Source::BlockEntry(b) => Some(b.clone()),
            Source::AfterInstruction(instr) => match instr.kind() {
                TermKind::Instruction(data) => data.block.upgrade().map(Term),
                _ => None,
            },
        }
    }

    /// True iff a value with source `value_source` is available at
    /// `use_site` (`spec.md` §3's dominance rule).
    #[must_use]
    pub fn source_dominated(value_source: &Source, use_site: &Source) -> bool {
        match value_source {
            Source::Global | Source::ParameterPlaceholder | Source::RecursiveParameter(_) => true,
            _ => {}
        }
        let Some(value_block) = Self::defining_block(value_source) else { return true };
        let Some(use_block) = Self::defining_block(use_site) else {
            // use site is itself transparent (e.g. building a recursive
            // body): only a transparent value may appear there.
            return false;
        };
        if !crate::types::cfg::block_dominates(&value_block, &use_block) {
            return false;
        }
        if !value_block.ptr_eq(&use_block) {
            return true;
        }
        // Same block: compare instruction position, or treat parameters
        // and block-entry values (phis) as preceding every instruction.
        match (value_source, use_site) {
            (Source::AfterInstruction(vi), Source::AfterInstruction(ui)) => {
                position_of(vi) < position_of(ui)
            }
            (Source::AfterInstruction(_), Source::BlockEntry(_)) => false,
            (Source::BlockEntry(_), _) => true,
            _ => true,
        }
    }

    /// Checks that `value`'s source dominates `use_site`, producing a
    /// `SourceMismatch` error naming both if not.
    pub fn check_dominated(&self, value: &Term, use_site: &Source) -> Result<()> {
        if Self::source_dominated(&value.source(), use_site) {
            Ok(())
        } else {
            Err(Error::source_mismatch("operand's source does not dominate its use site"))
        }
    }

    /// The join of two sources: the nearest point at which both are
    /// available. Used to assign a hashable term's own source from its
    /// operands' sources.
    pub fn common_source(&self, a: &Source, b: &Source) -> Result<Source> {
        if matches!(a, Source::Global) {
            return Ok(b.clone());
        }
        if matches!(b, Source::Global) {
            return Ok(a.clone());
        }
        if Self::source_dominated(a, b) {
            return Ok(b.clone());
        }
        if Self::source_dominated(b, a) {
            return Ok(a.clone());
        }
        let (Some(ba), Some(bb)) = (Self::defining_block(a), Self::defining_block(b)) else {
            return Ok(Source::Global);
        };
        match crate::types::cfg::nearest_common_dominator(&ba, &bb) {
            Some(block) => Ok(Source::BlockEntry(block)),
            None => Err(Error::source_mismatch("operands belong to unrelated functions")),
        }
    }

    fn common_source_of(&self, terms: &[Term]) -> Result<Source> {
        let mut acc = Source::Global;
        for t in terms {
            acc = self.common_source(&acc, &t.source())?;
        }
        Ok(acc)
    }

    // -----------------------------------------------------------------
    // Functional operations
    // -----------------------------------------------------------------

    /// Interns a functional operation, computing (and validating) its
    /// result type per the typing rules of `spec.md` §4.4.
    pub fn intern_functional(&self, op: FunctionalOp, operands: &[Term]) -> Result<Term> {
        let key = FunctionalKey::new(&op, operands);
        if let Some(existing) = self.functional.borrow().get(&key) {
            trace!("intern_functional: hit for {}", op.name());
            return Ok(existing.clone());
        }
        trace!("intern_functional: miss for {}, {} operand(s)", op.name(), operands.len());
        let (result_ty, category) = self.type_check_functional(&op, operands).map_err(|e| {
            debug!("intern_functional: {} rejected: {e}", op.name());
            e
        })?;
        let source = self.common_source_of(operands)?;
        let mut flags = Flags::empty();
        for o in operands {
            flags |= o.flags() & (Flags::PARAMETERIZED | Flags::ABSTRACT);
        }
        let operands_sv: SmallVec<[Term; 4]> = operands.iter().cloned().collect();
        let term = Term(Rc::new(TermData {
            ty: Some(result_ty),
            category,
            source: RefCell::new(source),
            flags: Cell::new(flags),
            kind: TermKind::Functional(op, operands_sv),
        }));
        self.functional.borrow_mut().insert(key, term.clone());
        Ok(term)
    }

    fn type_check_functional(&self, op: &FunctionalOp, ops: &[Term]) -> Result<(Term, Category)> {
        let metatype = self.metatype();
        match op {
            FunctionalOp::EmptyType
            | FunctionalOp::BlockType
            | FunctionalOp::ByteType
            | FunctionalOp::BooleanType
            | FunctionalOp::IntegerType { .. }
            | FunctionalOp::FloatType { .. } => Ok((metatype, Category::Type)),

            FunctionalOp::PointerType => {
                expect_arity(op, ops, 1)?;
                expect_type(&ops[0])?;
                Ok((metatype, Category::Type))
            }
            FunctionalOp::ArrayType => {
                expect_arity(op, ops, 2)?;
                expect_type(&ops[0])?;
                self.expect_integer(&ops[1])?;
                Ok((metatype, Category::Type))
            }
            FunctionalOp::StructType | FunctionalOp::UnionType => {
                for o in ops {
                    expect_type(o)?;
                }
                Ok((metatype, Category::Type))
            }

            FunctionalOp::EmptyValue => {
                Ok((self.intern_functional(FunctionalOp::EmptyType, &[])?, Category::Value))
            }
            FunctionalOp::BooleanValue(_) => {
                Ok((self.intern_functional(FunctionalOp::BooleanType, &[])?, Category::Value))
            }
            FunctionalOp::IntegerValue(value) => {
                expect_arity(op, ops, 1)?;
                let (width, _signed) = as_integer_type(&ops[0])
                    .ok_or_else(|| Error::bad_type("integer_value requires an integer type operand"))?;
                let expected = width.bits(self.pointer_width);
                if value.bits() != expected {
                    return Err(Error::BadWidth { expected, found: value.bits() });
                }
                Ok((ops[0].clone(), Category::Value))
            }
            FunctionalOp::FloatValue { .. } => {
                expect_arity(op, ops, 1)?;
                if crate::types::functional::as_float_type(&ops[0]).is_none() {
                    return Err(Error::bad_type("float_value requires a float type operand"));
                }
                Ok((ops[0].clone(), Category::Value))
            }
            FunctionalOp::UndefValue => {
                expect_arity(op, ops, 1)?;
                expect_type(&ops[0])?;
                Ok((ops[0].clone(), Category::Value))
            }
            FunctionalOp::ArrayValue => {
                let elem_ty = ops.first().ok_or_else(|| Error::bad_type("array_value requires an element type"))?;
                expect_type(elem_ty)?;
                for v in &ops[1..] {
                    same_type(&v.ty(), Some(elem_ty))?;
                }
                let len = BigInteger::from_u64(64, (ops.len() - 1) as u64);
                let len_ty = self.intern_functional(FunctionalOp::IntegerType { width: crate::types::functional::IntWidth::W64, signed: false }, &[])?;
                let len_value = self.intern_functional(FunctionalOp::IntegerValue(len), &[len_ty])?;
                let array_ty = self.intern_functional(FunctionalOp::ArrayType, &[elem_ty.clone(), len_value])?;
                Ok((array_ty, Category::Value))
            }
            FunctionalOp::StructValue => {
                let member_types: Vec<Term> = ops.iter().map(|o| o.ty().expect("value has a type")).collect();
                let struct_ty = self.intern_functional(FunctionalOp::StructType, &member_types)?;
                Ok((struct_ty, Category::Value))
            }
            FunctionalOp::UnionValue => {
                expect_arity(op, ops, 2)?;
                expect_type(&ops[0])?;
                Ok((ops[0].clone(), Category::Value))
            }

            FunctionalOp::ArrayElement => {
                expect_arity(op, ops, 2)?;
                let (elem_ty, _len) = as_array_type(&ops[0].ty().ok_or_else(|| Error::bad_type("array_el requires an array-typed aggregate"))?)
                    .ok_or_else(|| Error::bad_type("array_el requires an array-typed aggregate"))?;
                self.expect_integer(&ops[1])?;
                Ok((elem_ty, Category::Value))
            }
            FunctionalOp::ArrayElementPtr => {
                expect_arity(op, ops, 2)?;
                let pointee = as_pointer_type(&ops[0].ty().ok_or_else(|| Error::bad_type("array_el_ptr requires a pointer"))?)
                    .ok_or_else(|| Error::bad_type("array_el_ptr requires a pointer operand"))?;
                let (elem_ty, _len) =
                    as_array_type(&pointee).ok_or_else(|| Error::bad_type("array_el_ptr requires a pointer to an array"))?;
                self.expect_integer(&ops[1])?;
                let ptr_ty = self.intern_functional(FunctionalOp::PointerType, &[elem_ty])?;
                Ok((ptr_ty, Category::Value))
            }
            FunctionalOp::StructElement { index } => {
                expect_arity(op, ops, 1)?;
                let members = as_struct_type(&ops[0].ty().ok_or_else(|| Error::bad_type("struct_el requires a struct-typed aggregate"))?)
                    .ok_or_else(|| Error::bad_type("struct_el requires a struct-typed aggregate"))?;
                let member = members
                    .get(*index as usize)
                    .ok_or_else(|| Error::bad_type("struct_el index out of range"))?
                    .clone();
                Ok((member, Category::Value))
            }
            FunctionalOp::StructElementPtr { index } => {
                expect_arity(op, ops, 1)?;
                let pointee = as_pointer_type(&ops[0].ty().ok_or_else(|| Error::bad_type("struct_el_ptr requires a pointer"))?)
                    .ok_or_else(|| Error::bad_type("struct_el_ptr requires a pointer operand"))?;
                let members = as_struct_type(&pointee)
                    .ok_or_else(|| Error::bad_type("struct_el_ptr requires a pointer to a struct"))?;
                let member = members
                    .get(*index as usize)
                    .ok_or_else(|| Error::bad_type("struct_el_ptr index out of range"))?
                    .clone();
                let ptr_ty = self.intern_functional(FunctionalOp::PointerType, &[member])?;
                Ok((ptr_ty, Category::Value))
            }
            FunctionalOp::StructElementOffset { index } => {
                expect_arity(op, ops, 1)?;
                let members =
                    as_struct_type(&ops[0]).ok_or_else(|| Error::bad_type("struct_el_offset requires a struct type operand"))?;
                if *index as usize >= members.len() {
                    return Err(Error::bad_type("struct_el_offset index out of range"));
                }
                let size_ty = self.size_type()?;
                Ok((size_ty, Category::Value))
            }
            FunctionalOp::UnionElement => {
                expect_arity(op, ops, 2)?;
                let members = as_union_type(&ops[0].ty().ok_or_else(|| Error::bad_type("union_el requires a union-typed aggregate"))?)
                    .ok_or_else(|| Error::bad_type("union_el requires a union-typed aggregate"))?;
                expect_type(&ops[1])?;
                if !members.iter().any(|m| m.ptr_eq(&ops[1])) {
                    return Err(Error::bad_type("union_el member type is not a member of the union"));
                }
                Ok((ops[1].clone(), Category::Value))
            }
            FunctionalOp::UnionElementPtr => {
                expect_arity(op, ops, 2)?;
                let pointee = as_pointer_type(&ops[0].ty().ok_or_else(|| Error::bad_type("union_el_ptr requires a pointer"))?)
                    .ok_or_else(|| Error::bad_type("union_el_ptr requires a pointer operand"))?;
                let members = as_union_type(&pointee).ok_or_else(|| Error::bad_type("union_el_ptr requires a pointer to a union"))?;
                expect_type(&ops[1])?;
                if !members.iter().any(|m| m.ptr_eq(&ops[1])) {
                    return Err(Error::bad_type("union_el_ptr member type is not a member of the union"));
                }
                let ptr_ty = self.intern_functional(FunctionalOp::PointerType, &[ops[1].clone()])?;
                Ok((ptr_ty, Category::Value))
            }

            FunctionalOp::Sizeof | FunctionalOp::Alignof => {
                expect_arity(op, ops, 1)?;
                expect_type(&ops[0])?;
                Ok((self.size_type()?, Category::Value))
            }
            FunctionalOp::TypeV => {
                expect_arity(op, ops, 2)?;
                self.expect_integer(&ops[0])?;
                self.expect_integer(&ops[1])?;
                Ok((metatype, Category::Type))
            }

            FunctionalOp::PointerCast => {
                expect_arity(op, ops, 2)?;
                if as_pointer_type(&ops[0].ty().ok_or_else(|| Error::bad_type("pointer_cast requires a pointer operand"))?).is_none() {
                    return Err(Error::bad_type("pointer_cast requires a pointer operand"));
                }
                expect_type(&ops[1])?;
                let ptr_ty = self.intern_functional(FunctionalOp::PointerType, &[ops[1].clone()])?;
                Ok((ptr_ty, Category::Value))
            }
            FunctionalOp::PointerOffset => {
                expect_arity(op, ops, 2)?;
                let ty0 = ops[0].ty().ok_or_else(|| Error::bad_type("pointer_offset requires a pointer operand"))?;
                if as_pointer_type(&ty0).is_none() {
                    return Err(Error::bad_type("pointer_offset requires a pointer operand"));
                }
                self.expect_integer(&ops[1])?;
                Ok((ty0, Category::Value))
            }

            FunctionalOp::IntBinary(_) => {
                expect_arity(op, ops, 2)?;
                let (w0, _s0) = self.expect_integer(&ops[0])?;
                let (w1, _s1) = self.expect_integer(&ops[1])?;
                if w0 != w1 {
                    return Err(Error::BadWidth { expected: w0, found: w1 });
                }
                Ok((ops[0].ty().unwrap(), Category::Value))
            }
            FunctionalOp::IntUnary(_) => {
                expect_arity(op, ops, 1)?;
                self.expect_integer(&ops[0])?;
                Ok((ops[0].ty().unwrap(), Category::Value))
            }
            FunctionalOp::FloatBinary(_) => {
                expect_arity(op, ops, 2)?;
                if crate::types::functional::as_float_type(&ops[0].ty().ok_or_else(|| Error::bad_type("float op requires a float operand"))?).is_none() {
                    return Err(Error::bad_type("float op requires a float operand"));
                }
                same_type(&ops[0].ty(), ops[1].ty().as_ref())?;
                Ok((ops[0].ty().unwrap(), Category::Value))
            }
            FunctionalOp::Compare(_) => {
                expect_arity(op, ops, 2)?;
                same_type(&ops[0].ty(), ops[1].ty().as_ref())?;
                Ok((self.intern_functional(FunctionalOp::BooleanType, &[])?, Category::Value))
            }

            FunctionalOp::FunctionSpecialize => {
                if ops.is_empty() {
                    return Err(Error::bad_type("function_specialize requires a callee operand"));
                }
                Ok((ops[0].ty().ok_or_else(|| Error::bad_type("function_specialize callee has no type"))?, Category::Value))
            }
        }
    }

    fn expect_integer(&self, t: &Term) -> Result<(u32, bool)> {
        let ty = t.ty().ok_or_else(|| Error::bad_type("operand has no type"))?;
        let (width, signed) = as_integer_type(&ty).ok_or_else(|| Error::bad_type("operand must be an integer"))?;
        Ok((width.bits(self.pointer_width), signed))
    }

    fn size_type(&self) -> Result<Term> {
        self.intern_functional(
            FunctionalOp::IntegerType { width: crate::types::functional::IntWidth::Pointer, signed: false },
            &[],
        )
    }

    // -----------------------------------------------------------------
    // Function types
    // -----------------------------------------------------------------

    pub fn intern_function_type(
        &self,
        cc: CallingConvention,
        result: Term,
        params: Vec<Term>,
        n_phantom: u32,
        sret: bool,
    ) -> Result<Term> {
        expect_type(&result)?;
        for p in &params {
            expect_type(p)?;
        }
        let key = FunctionTypeKey { cc, result: result.clone(), params: params.clone(), n_phantom, sret };
        if let Some(existing) = self.function_types.borrow().get(&key) {
            return Ok(existing.clone());
        }
        let mut flags = Flags::empty();
        for p in params.iter().chain(std::iter::once(&result)) {
            flags |= p.flags() & Flags::ABSTRACT;
        }
        flags |= Flags::PARAMETERIZED;
        let term = Term(Rc::new(TermData {
            ty: Some(self.metatype()),
            category: Category::Type,
            source: RefCell::new(Source::Global),
            flags: Cell::new(flags),
            kind: TermKind::FunctionType(FunctionTypeData { cc, result, params, n_phantom, sret }),
        }));
        self.function_types.borrow_mut().insert(key, term.clone());
        Ok(term)
    }

    /// Helper for `Function::add_parameter`: the phantom count and
    /// parameter types of a function's type.
    pub fn function_type_params(&self, fn_ty: &Term) -> Result<(u32, Vec<Term>)> {
        match fn_ty.kind() {
            TermKind::FunctionType(data) => Ok((data.n_phantom, data.params.clone())),
            _ => Err(Error::bad_type("expected a function type")),
        }
    }

    // -----------------------------------------------------------------
    // Recursive types
    // -----------------------------------------------------------------

    #[must_use]
    pub fn new_recursive(&self, category: Category, n_params: u32) -> (Term, Vec<Term>) {
        let (rec, params) = Recursive::new(category, n_params, self.metatype());
        (rec.0, params)
    }

    pub fn resolve_recursive(&self, recursive: &Term, body: Term) -> Result<()> {
        Recursive::from_term(recursive.clone())
            .ok_or_else(|| Error::internal("expected a recursive term"))?
            .resolve(body)
    }

    pub fn apply_recursive(&self, recursive: Term, arguments: Vec<Term>) -> Result<Term> {
        let rec_view =
            Recursive::from_term(recursive.clone()).ok_or_else(|| Error::internal("expected a recursive term"))?;
        if arguments.len() != rec_view.parameters().len() {
            return Err(Error::bad_type("apply_recursive argument count mismatch"));
        }
        let key = ApplyKey { recursive: recursive.clone(), arguments: arguments.clone() };
        if let Some(existing) = self.applies.borrow().get(&key) {
            return Ok(existing.clone());
        }
        // `Flags::ABSTRACT` is intentionally left unset here: `Term::flags`
        // recomputes it live from `recursive`'s and `arguments`' current
        // flags on every read, so an `Apply` built before its recursive
        // resolves still reports concrete afterward (`spec.md` §4.7).
        let mut flags = Flags::empty();
        for a in &arguments {
            flags |= a.flags() & Flags::PARAMETERIZED;
        }
        let term = Term(Rc::new(TermData {
            ty: Some(self.metatype()),
            category: recursive.category(),
            source: RefCell::new(Source::Global),
            flags: Cell::new(flags),
            kind: TermKind::Apply(ApplyData { recursive, arguments }),
        }));
        self.applies.borrow_mut().insert(key, term.clone());
        Ok(term)
    }

    #[must_use]
    pub fn unpack(&self, apply: &Term) -> Result<Term> {
        Apply::from_term(apply.clone()).ok_or_else(|| Error::internal("expected an apply term"))?.unpack()
    }

    // -----------------------------------------------------------------
    // Globals
    // -----------------------------------------------------------------

    pub fn new_function(&self, ty: Term, name: Symbol, linkage: Linkage) -> Result<Term> {
        if !matches!(ty.kind(), TermKind::FunctionType(_)) {
            return Err(Error::bad_type("new_function requires a function type"));
        }
        Ok(Term(Rc::new(TermData {
            ty: Some(ty),
            category: Category::Value,
            source: RefCell::new(Source::Global),
            flags: Cell::new(Flags::empty()),
            kind: TermKind::Function(crate::types::cfg::FunctionData {
                name,
                linkage: Cell::new(linkage),
                parameters: RefCell::new(Vec::new()),
                blocks: RefCell::new(Vec::new()),
                debug_names: RefCell::new(std::collections::HashMap::new()),
            }),
        })))
    }

    pub fn new_global_variable(
        &self,
        pointee_type: Term,
        name: Symbol,
        linkage: Linkage,
        constant: bool,
    ) -> Result<Term> {
        expect_type(&pointee_type)?;
        let ptr_ty = self.intern_functional(FunctionalOp::PointerType, &[pointee_type.clone()])?;
        Ok(Term(Rc::new(TermData {
            ty: Some(ptr_ty),
            category: Category::Value,
            source: RefCell::new(Source::Global),
            flags: Cell::new(Flags::empty()),
            kind: TermKind::GlobalVariable(GlobalVariableData {
                name,
                linkage: Cell::new(linkage),
                pointee_type,
                constant,
                initializer: RefCell::new(None),
            }),
        })))
    }
}

impl Default for Context {
    /// Defaults to a 64-bit pointer width, the common case for tests and
    /// quick prototyping; real callers should call [`Context::new`]
    /// with the target's actual pointer width.
    fn default() -> Self {
        Self::new(64)
    }
}

/// The unique metatype value. Per `Term::ty`'s contract, it has no type
/// of its own rather than a literal self-reference (`spec.md` §3: "the
/// designated metatype ... has none").
fn build_metatype() -> Term {
    Term(Rc::new(TermData {
        ty: None,
        category: Category::Metatype,
        source: RefCell::new(Source::Global),
        flags: Cell::new(Flags::empty()),
        kind: TermKind::Metatype,
    }))
}

fn position_of(instr: &Term) -> usize {
    match instr.kind() {
        TermKind::Instruction(data) => data.position.get(),
        _ => 0,
    }
}

fn expect_arity(op: &FunctionalOp, ops: &[Term], n: usize) -> Result<()> {
    if ops.len() != n {
        return Err(Error::bad_type(format!("{} expects {} operand(s), found {}", op.name(), n, ops.len())));
    }
    Ok(())
}

fn expect_type(t: &Term) -> Result<()> {
    if crate::types::functional::is_type(t) {
        Ok(())
    } else {
        Err(Error::bad_type("operand must be a type"))
    }
}


fn same_type(a: &Option<Term>, b: Option<&Term>) -> Result<()> {
    match (a, b) {
        (Some(a), Some(b)) if a.ptr_eq(b) => Ok(()),
        _ => Err(Error::bad_type("operand types do not match")),
    }
}

#[derive(Clone, PartialEq, Eq, Hash)]
struct FunctionalKey {
    tag: &'static str,
    discriminant: String,
    operands: Vec<usize>,
}

impl FunctionalKey {
    fn new(op: &FunctionalOp, operands: &[Term]) -> Self {
        let discriminant = match op {
            FunctionalOp::IntegerType { width, signed } => format!("{width:?}:{signed}"),
            FunctionalOp::FloatType { width } => format!("{width:?}"),
            FunctionalOp::BooleanValue(b) => format!("{b}"),
            FunctionalOp::IntegerValue(v) => format!("{v:?}"),
            FunctionalOp::FloatValue { bits } => format!("{bits}"),
            FunctionalOp::StructElement { index }
            | FunctionalOp::StructElementPtr { index }
            | FunctionalOp::StructElementOffset { index } => format!("{index}"),
            FunctionalOp::IntBinary(o) => format!("{o:?}"),
            FunctionalOp::IntUnary(o) => format!("{o:?}"),
            FunctionalOp::FloatBinary(o) => format!("{o:?}"),
            FunctionalOp::Compare(p) => format!("{p:?}"),
            _ => String::new(),
        };
        FunctionalKey {
            tag: op.name(),
            discriminant,
            operands: operands.iter().map(|t| Rc::as_ptr(&t.0) as usize).collect(),
        }
    }
}

#[derive(Clone, PartialEq, Eq, Hash)]
struct FunctionTypeKey {
    cc: CallingConvention,
    result: Term,
    params: Vec<Term>,
    n_phantom: u32,
    sret: bool,
}

#[derive(Clone, PartialEq, Eq, Hash)]
struct ApplyKey {
    recursive: Term,
    arguments: Vec<Term>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::functional::{IntWidth, FunctionalOp::*};

    #[test]
    fn interning_is_idempotent() {
        let ctx = Context::new(64);
        let a = ctx.intern_functional(ByteType, &[]).unwrap();
        let b = ctx.intern_functional(ByteType, &[]).unwrap();
        assert!(a.ptr_eq(&b));
    }

    #[test]
    fn integer_binop_requires_matching_widths() {
        let ctx = Context::new(64);
        let i32_ty = ctx.intern_functional(IntegerType { width: IntWidth::W32, signed: true }, &[]).unwrap();
        let i64_ty = ctx.intern_functional(IntegerType { width: IntWidth::W64, signed: true }, &[]).unwrap();
        let a = ctx.intern_functional(IntegerValue(BigInteger::from_i64(32, 1)), &[i32_ty]).unwrap();
        let b = ctx.intern_functional(IntegerValue(BigInteger::from_i64(64, 1)), &[i64_ty]).unwrap();
        let err = ctx.intern_functional(IntBinary(crate::types::functional::IntBinop::Add), &[a, b]).unwrap_err();
        assert_eq!(err.kind(), "bad-width");
    }

    #[test]
    fn pointer_type_requires_a_type_operand() {
        let ctx = Context::new(64);
        let byte = ctx.intern_functional(ByteType, &[]).unwrap();
        let ptr = ctx.intern_functional(PointerType, &[byte]).unwrap();
        assert!(crate::types::functional::as_pointer_type(&ptr).is_some());
    }

    #[test]
    fn metatype_has_no_type_of_its_own() {
        let ctx = Context::new(64);
        let mt = ctx.metatype();
        assert!(mt.ty().is_none());
    }
}
