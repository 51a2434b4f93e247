//! Lowered types (`spec.md` §4.9.1, §9 "Lowered-value variants").
//!
//! Every source type maps to a [`LoweredType`] in one of three modes.
//! Grounded in `original_source/src/Tvm/AggregateLowering.hpp`'s
//! `LoweredType`, which stores `m_size`/`m_alignment` as `ValuePtr<>` (IR
//! values in the *target* context) rather than host integers, precisely
//! so a type whose layout depends on a non-constant array length still
//! has a size expressible in the lowered module. We keep that shape:
//! `size`/`alignment` are [`Term`]s in the lowered module, not `u64`.
//!
//! Per the design note on pointer handling (`AggregateLowering.hpp`'s
//! class comment): pointer *pointee* types are never recursively
//! lowered, since a recursive type can refer to itself only through a
//! pointer indirection and following it here would diverge. Every
//! pointer type therefore lowers to the same opaque `pointer(byte)`
//! register type regardless of what it points to.

use crate::context::Context;
use crate::error::{Error, Result};
use crate::lower::TargetCallback;
use crate::types::functional::{
    as_array_type, as_pointer_type, as_struct_type, as_union_type, FunctionalOp, IntWidth,
};
use crate::types::recursive::{Apply, Recursive};
use crate::types::term::{Term, TermKind};
use std::collections::HashMap;

/// How a [`LoweredType`] is represented after lowering.
#[derive(Clone)]
pub enum LoweredTypeMode {
    /// A single scalar the back end understands directly: an integer,
    /// float, or opaque pointer type, already interned in the lowered
    /// module.
    Register(Term),
    /// A composite the back end handles component-wise: each entry is
    /// itself a fully lowered type.
    Split(Vec<LoweredType>),
    /// An opaque byte sequence of known size/alignment that the back end
    /// cannot represent directly; only byte-copy operations apply to it.
    Blob,
}

/// The per-type result of the lowering pass (`spec.md` §4.9.1). `size`
/// and `alignment` are pointer-width integer values *in the lowered
/// module*, so a caller can use them directly in further lowered-IR
/// arithmetic (e.g. a dynamic `alloca` byte count).
#[derive(Clone)]
pub struct LoweredType {
    /// The pre-lowering type this was computed from.
    pub origin: Term,
    /// True iff every part of this type's layout is statically known
    /// (no dependency on a non-constant array length).
    pub global: bool,
    pub size: Term,
    pub alignment: Term,
    pub mode: LoweredTypeMode,
}

impl LoweredType {
    #[must_use]
    pub fn is_register(&self) -> bool {
        matches!(self.mode, LoweredTypeMode::Register(_))
    }

    #[must_use]
    pub fn is_split(&self) -> bool {
        matches!(self.mode, LoweredTypeMode::Split(_))
    }

    #[must_use]
    pub fn is_blob(&self) -> bool {
        matches!(self.mode, LoweredTypeMode::Blob)
    }

    #[must_use]
    pub fn register_type(&self) -> Option<&Term> {
        match &self.mode {
            LoweredTypeMode::Register(t) => Some(t),
            _ => None,
        }
    }

    #[must_use]
    pub fn entries(&self) -> Option<&[LoweredType]> {
        match &self.mode {
            LoweredTypeMode::Split(entries) => Some(entries),
            _ => None,
        }
    }

    /// Extracts the constant byte size, when `size` happens to be an
    /// interned integer constant (true whenever `global` is set, since
    /// this pass only ever builds non-constant sizes for dynamically
    /// sized arrays).
    #[must_use]
    pub fn const_size(&self) -> Option<u64> {
        const_u64(&self.size)
    }

    #[must_use]
    pub fn const_alignment(&self) -> Option<u64> {
        const_u64(&self.alignment)
    }
}

fn const_u64(t: &Term) -> Option<u64> {
    match t.kind() {
        TermKind::Functional(FunctionalOp::IntegerValue(v), _) => v.to_u64(),
        _ => None,
    }
}

/// Shared across the module-level and function-level rewriters: types
/// are always global values, so one cache keyed by source-type identity
/// serves both (`spec.md` §4.9.3's two rewriters "share" type lowering
/// implicitly by both calling down into this).
#[derive(Default)]
pub struct TypeCache(HashMap<Term, LoweredType>);

impl TypeCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

/// Computes (and caches) the lowered form of `ty`. This is the single
/// entry point both rewriters use for `rewrite_type`.
pub fn rewrite_type(
    ctx: &Context,
    target: &mut dyn TargetCallback,
    config: &crate::lower::Config,
    cache: &mut TypeCache,
    ty: &Term,
) -> Result<LoweredType> {
    if let Some(existing) = cache.0.get(ty) {
        return Ok(existing.clone());
    }
    let computed = compute_lowered_type(ctx, target, config, cache, ty)?;
    cache.0.insert(ty.clone(), computed.clone());
    Ok(computed)
}

fn primitive(ctx: &Context, target: &mut dyn TargetCallback, origin: &Term, register_ty: Term) -> Result<LoweredType> {
    let (size, alignment) = target.type_size_alignment(ctx, origin)?;
    Ok(LoweredType {
        origin: origin.clone(),
        global: true,
        size: const_term(ctx, size)?,
        alignment: const_term(ctx, alignment)?,
        mode: LoweredTypeMode::Register(register_ty),
    })
}

fn const_term(ctx: &Context, value: u64) -> Result<Term> {
    let size_ty = ctx.intern_functional(FunctionalOp::IntegerType { width: IntWidth::Pointer, signed: false }, &[])?;
    ctx.intern_functional(
        FunctionalOp::IntegerValue(crate::bigint::BigInteger::from_u64(pointer_bits(ctx), value)),
        &[size_ty],
    )
}

fn pointer_bits(ctx: &Context) -> u32 {
    ctx.pointer_width()
}

fn align_up(ctx: &Context, offset: &Term, alignment: &Term) -> Result<Term> {
    match (const_u64(offset), const_u64(alignment)) {
        (Some(o), Some(a)) if a > 0 => const_term(ctx, (o + a - 1) / a * a),
        _ => {
            // Non-constant: `((offset + alignment - 1) / alignment) * alignment`,
            // expressed as lowered-module functional arithmetic so the
            // result stays a valid (non-global) size/alignment term.
            let one = const_term(ctx, 1)?;
            let minus_one = ctx.intern_functional(
                FunctionalOp::IntBinary(crate::types::functional::IntBinop::Sub),
                &[alignment.clone(), one],
            )?;
            let sum = ctx.intern_functional(
                FunctionalOp::IntBinary(crate::types::functional::IntBinop::Add),
                &[offset.clone(), minus_one],
            )?;
            let div = ctx.intern_functional(
                FunctionalOp::IntBinary(crate::types::functional::IntBinop::DivUnsigned),
                &[sum, alignment.clone()],
            )?;
            ctx.intern_functional(FunctionalOp::IntBinary(crate::types::functional::IntBinop::Mul), &[div, alignment.clone()])
        }
    }
}

fn add_terms(ctx: &Context, a: &Term, b: &Term) -> Result<Term> {
    match (const_u64(a), const_u64(b)) {
        (Some(x), Some(y)) => const_term(ctx, x + y),
        _ => ctx.intern_functional(FunctionalOp::IntBinary(crate::types::functional::IntBinop::Add), &[a.clone(), b.clone()]),
    }
}

fn mul_terms(ctx: &Context, a: &Term, b: &Term) -> Result<Term> {
    match (const_u64(a), const_u64(b)) {
        (Some(x), Some(y)) => const_term(ctx, x * y),
        _ => ctx.intern_functional(FunctionalOp::IntBinary(crate::types::functional::IntBinop::Mul), &[a.clone(), b.clone()]),
    }
}

fn max_terms(ctx: &Context, a: &Term, b: &Term) -> Result<Term> {
    match (const_u64(a), const_u64(b)) {
        (Some(x), Some(y)) => const_term(ctx, x.max(y)),
        _ => {
            // Non-constant alignments only arise from dynamically-sized
            // array elements, whose alignment is in practice always
            // constant even when their length is not; treat an
            // unexpected non-constant pair as a pass bug.
            Err(Error::internal("max_terms requires at least one constant operand in practice"))
        }
    }
}

fn compute_lowered_type(
    ctx: &Context,
    target: &mut dyn TargetCallback,
    config: &crate::lower::Config,
    cache: &mut TypeCache,
    ty: &Term,
) -> Result<LoweredType> {
    match ty.kind() {
        TermKind::Functional(op, _operands) => match op {
            FunctionalOp::ByteType | FunctionalOp::BooleanType => {
                let reg = ctx.intern_functional(FunctionalOp::IntegerType { width: IntWidth::W8, signed: false }, &[])?;
                primitive(ctx, target, ty, reg)
            }
            FunctionalOp::IntegerType { .. } | FunctionalOp::FloatType { .. } => primitive(ctx, target, ty, ty.clone()),
            FunctionalOp::PointerType => {
                let byte_ty = ctx.intern_functional(FunctionalOp::ByteType, &[])?;
                let ptr_ty = ctx.intern_functional(FunctionalOp::PointerType, &[byte_ty])?;
                primitive(ctx, target, ty, ptr_ty)
            }
            FunctionalOp::EmptyType => lower_struct_like(ctx, target, config, cache, ty, &[]),
            FunctionalOp::TypeV => {
                // An opaque type of known size/alignment but no further
                // structure (used where only layout, not shape, is known
                // — e.g. behind an existential). Always a blob: there is
                // nothing to split into.
                let (size_op, alignment_op) = (_operands[0].clone(), _operands[1].clone());
                Ok(LoweredType { origin: ty.clone(), global: const_u64(&size_op).is_some() && const_u64(&alignment_op).is_some(), size: size_op, alignment: alignment_op, mode: LoweredTypeMode::Blob })
            }
            FunctionalOp::ArrayType => {
                let (elem_ty, len) = as_array_type(ty).expect("ArrayType operands");
                let elem = rewrite_type(ctx, target, config, cache, &elem_ty)?;
                let stride = align_up(ctx, &elem.size, &elem.alignment)?;
                let len_value = len.clone();
                let global = elem.global && const_u64(&len_value).is_some();
                let count = const_u64(&len_value)
                    .map(|n| const_term(ctx, n))
                    .transpose()?
                    .unwrap_or(len_value);
                let size = mul_terms(ctx, &stride, &count)?;
                if config.split_arrays {
                    if let Some(n) = const_u64(&count) {
                        let entries = vec![elem.clone(); n as usize];
                        return Ok(LoweredType { origin: ty.clone(), global, size, alignment: elem.alignment.clone(), mode: LoweredTypeMode::Split(entries) });
                    }
                }
                Ok(LoweredType { origin: ty.clone(), global, size, alignment: elem.alignment, mode: LoweredTypeMode::Blob })
            }
            FunctionalOp::StructType => {
                let members = as_struct_type(ty).expect("StructType operands").to_vec();
                lower_struct_like(ctx, target, config, cache, ty, &members)
            }
            FunctionalOp::UnionType => {
                let members = as_union_type(ty).expect("UnionType operands");
                if members.is_empty() {
                    return Err(Error::bad_type("union of zero types is not a valid type"));
                }
                let mut size = const_term(ctx, 0)?;
                let mut alignment = const_term(ctx, 1)?;
                let mut global = true;
                for m in members {
                    let lm = rewrite_type(ctx, target, config, cache, m)?;
                    size = max_terms(ctx, &size, &lm.size)?;
                    alignment = max_terms(ctx, &alignment, &lm.alignment)?;
                    global &= lm.global;
                }
                Ok(LoweredType { origin: ty.clone(), global, size, alignment, mode: LoweredTypeMode::Blob })
            }
            _ => Err(Error::bad_type(format!("{} is not a type-valued operation", op.name()))),
        },
        TermKind::FunctionType(_) => {
            let byte_ty = ctx.intern_functional(FunctionalOp::ByteType, &[])?;
            let ptr_ty = ctx.intern_functional(FunctionalOp::PointerType, &[byte_ty])?;
            primitive(ctx, target, ty, ptr_ty)
        }
        TermKind::Exists(data) => {
            // `spec.md` §3: exists types "are unwrapped by substituting
            // fresh placeholders before lowering". In practice an
            // existentially-quantified parameter can only be referenced
            // soundly behind a pointer indirection (its layout is by
            // definition unknown to anyone but the value's producer),
            // and pointer lowering never inspects its pointee (see the
            // module doc comment), so lowering the body directly already
            // has the same effect as substituting a placeholder type:
            // whatever stands in for the parameter is erased either way.
            rewrite_type(ctx, target, config, cache, &data.body)
        }
        TermKind::Apply(_) => {
            let apply = Apply::from_term(ty.clone()).expect("Apply kind");
            let body = apply.unpack()?;
            rewrite_type(ctx, target, config, cache, &body)
        }
        TermKind::Recursive(_) => {
            let rec = Recursive::from_term(ty.clone()).expect("Recursive kind");
            let body = rec.body().ok_or(Error::UnresolvedRecursive)?;
            rewrite_type(ctx, target, config, cache, &body)
        }
        _ => Err(Error::bad_type("value is not a type the lowering pass can represent")),
    }
}

fn lower_struct_like(
    ctx: &Context,
    target: &mut dyn TargetCallback,
    config: &crate::lower::Config,
    cache: &mut TypeCache,
    ty: &Term,
    members: &[Term],
) -> Result<LoweredType> {
    if members.is_empty() {
        let size = const_term(ctx, 0)?;
        let alignment = const_term(ctx, 1)?;
        return Ok(LoweredType { origin: ty.clone(), global: true, size, alignment, mode: LoweredTypeMode::Split(vec![]) });
    }
    let mut lowered = Vec::with_capacity(members.len());
    for m in members {
        lowered.push(rewrite_type(ctx, target, config, cache, m)?);
    }
    let mut offset = const_term(ctx, 0)?;
    let mut alignment = const_term(ctx, 1)?;
    let mut global = true;
    for lm in &lowered {
        offset = align_up(ctx, &offset, &lm.alignment)?;
        offset = add_terms(ctx, &offset, &lm.size)?;
        alignment = max_terms(ctx, &alignment, &lm.alignment)?;
        global &= lm.global;
    }
    let size = align_up(ctx, &offset, &alignment)?;
    if config.split_structs {
        Ok(LoweredType { origin: ty.clone(), global, size, alignment, mode: LoweredTypeMode::Split(lowered) })
    } else {
        Ok(LoweredType { origin: ty.clone(), global, size, alignment, mode: LoweredTypeMode::Blob })
    }
}
