//! Global layout construction (`spec.md` §4.9.3, §4.9.7's `flatten_globals`).
//!
//! Grounded in `original_source/src/Tvm/AggregateLowering.hpp`'s private
//! `GlobalBuildStatus` plus `AggregateLowering.cpp`'s `global_append`/
//! `global_pad_to_size`/`global_group`: a running accumulator of lowered
//! primitive elements plus the running byte size/alignment, used to
//! flatten a source-level aggregate initializer into either a single
//! struct of primitives (`flatten_globals`) or a nested structure that
//! mirrors the source shape.

use crate::context::Context;
use crate::error::Result;
use crate::types::functional::FunctionalOp;
use crate::types::term::Term;

use super::types::{LoweredType, LoweredTypeMode, TypeCache};
use super::value::{LoweredValue, LoweredValueMode};
use super::{Config, TargetCallback};

/// Running accumulator while building one global's flattened layout.
pub struct GlobalBuildStatus {
    pub elements: Vec<Term>,
    pub elements_size: u64,
    pub max_element_alignment: u64,
    pub size: u64,
    pub alignment: u64,
}

impl GlobalBuildStatus {
    #[must_use]
    pub fn empty() -> Self {
        GlobalBuildStatus { elements: Vec::new(), elements_size: 0, max_element_alignment: 1, size: 0, alignment: 1 }
    }

    /// Appends one more lowered primitive element, padding to its
    /// alignment first (`AggregateLowering.cpp`'s `global_append`).
    pub fn append(&mut self, ctx: &Context, target: &mut dyn TargetCallback, element: Term, element_size: u64, element_alignment: u64) -> Result<()> {
        let padded = (self.elements_size + element_alignment - 1) / element_alignment * element_alignment;
        if padded > self.elements_size {
            self.pad_to(ctx, target, padded)?;
        }
        self.elements.push(element);
        self.elements_size = padded + element_size;
        self.max_element_alignment = self.max_element_alignment.max(element_alignment);
        self.size = self.size.max(self.elements_size);
        self.alignment = self.alignment.max(element_alignment);
        Ok(())
    }

    /// Absorbs another status's elements wholesale (used when flattening
    /// a nested aggregate's own elements into the parent's sequence).
    pub fn append_all(&mut self, ctx: &Context, target: &mut dyn TargetCallback, other: GlobalBuildStatus) -> Result<()> {
        let start_alignment = other.elements.first().map_or(1, |_| other.alignment);
        let padded = (self.elements_size + start_alignment - 1) / start_alignment * start_alignment;
        if padded > self.elements_size {
            self.pad_to(ctx, target, padded)?;
        }
        self.elements_size = padded;
        self.elements.extend(other.elements);
        self.elements_size += other.elements_size;
        self.max_element_alignment = self.max_element_alignment.max(other.max_element_alignment);
        self.size = self.size.max(self.elements_size).max(other.size);
        self.alignment = self.alignment.max(other.alignment);
        Ok(())
    }

    fn pad_to(&mut self, ctx: &Context, target: &mut dyn TargetCallback, target_size: u64) -> Result<()> {
        let mut remaining = target_size - self.elements_size;
        while remaining > 0 {
            let chunk_align = largest_pow2_le(remaining);
            let pad_ty = target.type_from_alignment(ctx, chunk_align)?;
            let pad_value = ctx.intern_functional(FunctionalOp::UndefValue, &[pad_ty])?;
            self.elements.push(pad_value);
            remaining -= chunk_align;
        }
        self.elements_size = target_size;
        Ok(())
    }

    /// Pads the sequence up to `size` and sets the final declared
    /// size/alignment (`global_pad_to_size`).
    pub fn finish(&mut self, ctx: &Context, target: &mut dyn TargetCallback, size: u64, alignment: u64) -> Result<()> {
        if size > self.elements_size {
            self.pad_to(ctx, target, size)?;
        }
        self.size = size;
        self.alignment = self.alignment.max(alignment);
        Ok(())
    }

    /// Groups the accumulated elements into a single struct value, or
    /// `empty_value` if there were none.
    pub fn into_value(self, ctx: &Context) -> Result<Term> {
        if self.elements.is_empty() {
            ctx.intern_functional(FunctionalOp::EmptyValue, &[])
        } else if self.elements.len() == 1 {
            Ok(self.elements.into_iter().next().unwrap())
        } else {
            ctx.intern_functional(FunctionalOp::StructValue, &self.elements)
        }
    }
}

fn largest_pow2_le(n: u64) -> u64 {
    let mut p = 1u64;
    while p * 2 <= n && p < 16 {
        p *= 2;
    }
    p
}

/// Builds the lowered constant value for a global-sourced term, flattening
/// nested aggregates into a sequence of primitive elements when
/// `config.flatten_globals` is set, or preserving the nested struct/array
/// shape otherwise. Both paths produce a value whose type matches
/// `lowered_ty`.
pub fn build_global_value(
    ctx: &Context,
    target: &mut dyn TargetCallback,
    config: &Config,
    type_cache: &mut TypeCache,
    globals: &std::collections::HashMap<Term, Term>,
    value: &Term,
    lowered_ty: &LoweredType,
) -> Result<LoweredValue> {
    use crate::types::term::TermKind;

    if let Some(lowered) = globals.get(value) {
        return Ok(LoweredValue::register(value.clone(), true, lowered.clone()));
    }

    match value.kind() {
        TermKind::Functional(FunctionalOp::ArrayValue, operands) if operands.len() > 1 => {
            let elems = &operands[1..];
            lower_aggregate_elements(ctx, target, config, type_cache, globals, elems, lowered_ty)
        }
        TermKind::Functional(FunctionalOp::StructValue, operands) => {
            lower_aggregate_elements(ctx, target, config, type_cache, globals, operands, lowered_ty)
        }
        TermKind::Functional(FunctionalOp::UnionValue, operands) if operands.len() == 2 => {
            // A union value's representation is just its active member's
            // bytes; lower the member directly and let the surrounding
            // type's (blob) size/alignment absorb any extra padding.
            let member_ty = super::types::rewrite_type(ctx, target, config, type_cache, &operands[0])?;
            build_global_value(ctx, target, config, type_cache, globals, &operands[1], &member_ty)
        }
        _ => {
            // A genuinely primitive constant (an integer/float/boolean
            // literal, `empty_value`, `undef_value`, or a reference to
            // another global already declared): register-mode, unchanged.
            Ok(LoweredValue::register(value.clone(), true, value.clone()))
        }
    }
}

fn lower_aggregate_elements(
    ctx: &Context,
    target: &mut dyn TargetCallback,
    config: &Config,
    type_cache: &mut TypeCache,
    globals: &std::collections::HashMap<Term, Term>,
    elements: &[Term],
    lowered_ty: &LoweredType,
) -> Result<LoweredValue> {
    let member_types: Vec<LoweredType> = match &lowered_ty.mode {
        LoweredTypeMode::Split(entries) => entries.clone(),
        _ => {
            let mut out = Vec::with_capacity(elements.len());
            for e in elements {
                let ety = e.ty().expect("aggregate element has a type");
                out.push(super::types::rewrite_type(ctx, target, config, type_cache, &ety)?);
            }
            out
        }
    };

    if config.flatten_globals {
        let mut status = GlobalBuildStatus::empty();
        for (elem, ety) in elements.iter().zip(member_types.iter()) {
            let lowered = build_global_value(ctx, target, config, type_cache, globals, elem, ety)?;
            append_value_to_status(ctx, target, &mut status, &lowered, ety)?;
        }
        if let (Some(size), Some(align)) = (lowered_ty.const_size(), lowered_ty.const_alignment()) {
            status.finish(ctx, target, size, align)?;
        }
        let value = status.into_value(ctx)?;
        Ok(LoweredValue::register(lowered_ty.origin.clone(), true, value))
    } else {
        let mut entries = Vec::with_capacity(elements.len());
        for (elem, ety) in elements.iter().zip(member_types.iter()) {
            entries.push(build_global_value(ctx, target, config, type_cache, globals, elem, ety)?);
        }
        Ok(LoweredValue::split(lowered_ty.origin.clone(), true, entries))
    }
}

fn append_value_to_status(
    ctx: &Context,
    target: &mut dyn TargetCallback,
    status: &mut GlobalBuildStatus,
    value: &LoweredValue,
    ty: &LoweredType,
) -> Result<()> {
    match &value.mode {
        LoweredValueMode::Register(t) => {
            let size = ty.const_size().unwrap_or(0);
            let align = ty.const_alignment().unwrap_or(1);
            status.append(ctx, target, t.clone(), size, align)
        }
        LoweredValueMode::Split(entries) => {
            let member_types = ty.entries().unwrap_or(&[]);
            let mut inner = GlobalBuildStatus::empty();
            for (entry, entry_ty) in entries.iter().zip(member_types.iter()) {
                append_value_to_status(ctx, target, &mut inner, entry, entry_ty)?;
            }
            if let (Some(size), Some(align)) = (ty.const_size(), ty.const_alignment()) {
                inner.finish(ctx, target, size, align)?;
            }
            status.append_all(ctx, target, inner)
        }
        LoweredValueMode::Zero | LoweredValueMode::Undefined | LoweredValueMode::Empty => {
            let size = ty.const_size().unwrap_or(0);
            let align = ty.const_alignment().unwrap_or(1);
            if size == 0 {
                return Ok(());
            }
            let pad_ty = target.type_from_alignment(ctx, align.min(largest_pow2_le(size).max(1)))?;
            let filler = ctx.intern_functional(FunctionalOp::UndefValue, &[pad_ty])?;
            status.append(ctx, target, filler, size, align)
        }
        LoweredValueMode::Stack(_) => Err(crate::error::Error::internal(
            "a global initializer cannot contain a stack-allocated value",
        )),
    }
}
