//! Integration tests exercising the aggregate-lowering pass end to end
//! against a hand-written [`TargetCallback`], one per `spec.md` §8's
//! "Concrete end-to-end scenarios". Since this crate stops at the
//! lowered IR (no machine-code emission), each scenario asserts on the
//! *shape* of the lowered module -- via its disassembly -- rather than
//! by actually executing it.
//!
//! `FakeTarget` is deliberately small: scalars pass in registers,
//! everything else passes by address, with sret for any non-scalar
//! return value. That is enough to drive every lowering scenario below;
//! it does not attempt phantom parameters or aggregate call arguments,
//! since none of the scenarios exercise them.

use tvm_ir::bigint::BigInteger;
use tvm_ir::context::Context;
use tvm_ir::disassemble::disassemble_module;
use tvm_ir::error::{Error, Result};
use tvm_ir::lower::{lower_module, Config, FunctionRewriter, LoweredType, LoweredValue, LoweredValueMode, TargetCallback};
use tvm_ir::types::cfg::{Function, InstructionKind};
use tvm_ir::types::functional::{as_float_type, as_integer_type, as_pointer_type, FunctionalOp, IntBinop, IntWidth};
use tvm_ir::types::module::{Linkage, Module};
use tvm_ir::types::term::{Term, TermKind};
use tvm_ir::types::{CallingConvention, Category};

struct FakeTarget {
    /// The sret pointer parameter of whichever function is currently
    /// being lowered, installed by `lower_function_entry` and consumed
    /// by the very next `lower_return`.
    sret: Option<Term>,
}

impl FakeTarget {
    fn new() -> Self {
        FakeTarget { sret: None }
    }

    fn is_scalar(ty: &Term) -> bool {
        if as_integer_type(ty).is_some() || as_float_type(ty).is_some() || as_pointer_type(ty).is_some() {
            return true;
        }
        matches!(ty.kind(), TermKind::Functional(FunctionalOp::ByteType | FunctionalOp::BooleanType | FunctionalOp::EmptyType, _))
    }

    fn plain_param_type(&self, ctx: &Context, ty: &Term) -> Result<Term> {
        if Self::is_scalar(ty) {
            Ok(ty.clone())
        } else {
            let byte = ctx.intern_functional(FunctionalOp::ByteType, &[])?;
            ctx.intern_functional(FunctionalOp::PointerType, &[byte])
        }
    }
}

impl TargetCallback for FakeTarget {
    fn lower_function(&mut self, ctx: &Context, source_function: &Term) -> Result<Term> {
        let fn_ty = source_function.ty().ok_or_else(|| Error::internal("function has no type"))?;
        let (result, params, n_phantom) = match fn_ty.kind() {
            TermKind::FunctionType(data) => (data.result.clone(), data.params.clone(), data.n_phantom),
            _ => return Err(Error::internal("expected a function type")),
        };
        let source = Function::from_term(source_function.clone()).ok_or_else(|| Error::internal("expected a function term"))?;

        let sret_needed = !Self::is_scalar(&result);
        let mut new_params = Vec::with_capacity(params.len() + 1);
        if sret_needed {
            let byte = ctx.intern_functional(FunctionalOp::ByteType, &[])?;
            new_params.push(ctx.intern_functional(FunctionalOp::PointerType, &[byte])?);
        }
        for p in &params {
            new_params.push(self.plain_param_type(ctx, p)?);
        }
        let new_result = if sret_needed { ctx.intern_functional(FunctionalOp::EmptyType, &[])? } else { result };

        let new_ty = ctx.intern_function_type(CallingConvention::C, new_result, new_params.clone(), n_phantom, sret_needed)?;
        let new_fn = ctx.new_function(new_ty, source.name().clone(), source.linkage())?;
        let new_view = Function::from_term(new_fn.clone()).expect("new_function returns a function term");
        for _ in 0..new_params.len() {
            new_view.add_parameter(ctx)?;
        }
        Ok(new_fn)
    }

    fn lower_function_entry(&mut self, runner: &mut FunctionRewriter<'_>, source_function: &Term, lowered_function: &Term) -> Result<()> {
        let source = Function::from_term(source_function.clone()).expect("function term");
        let lowered = Function::from_term(lowered_function.clone()).expect("function term");
        let source_params = source.parameters();
        let lowered_params = lowered.parameters();

        self.sret = None;
        let mut offset = 0;
        if lowered_params.len() == source_params.len() + 1 {
            self.sret = Some(lowered_params[0].clone());
            offset = 1;
        }
        for (sp, lp) in source_params.iter().zip(lowered_params[offset..].iter()) {
            let sty = sp.ty().ok_or_else(|| Error::bad_type("parameter has no type"))?;
            let lowered_value =
                if Self::is_scalar(&sty) { LoweredValue::register(sty, false, lp.clone()) } else { LoweredValue::stack(sty, false, lp.clone()) };
            runner.map_value(sp.clone(), lowered_value);
        }
        Ok(())
    }

    fn lower_function_call(&mut self, runner: &mut FunctionRewriter<'_>, call: &Term) -> Result<LoweredValue> {
        let (callee, args) = match call.kind() {
            TermKind::Instruction(data) => match &data.kind {
                InstructionKind::Call { callee, args } => (callee.clone(), args.clone()),
                _ => return Err(Error::internal("expected a call instruction")),
            },
            _ => return Err(Error::internal("expected a call instruction")),
        };
        let callee_reg = runner.rewrite_register(self, &callee)?;
        let mut lowered_args = Vec::with_capacity(args.len());
        for a in &args {
            lowered_args.push(runner.rewrite_register(self, a)?);
        }
        let result_ty = call.ty().ok_or_else(|| Error::bad_type("call has no result type"))?;
        let lowered_result_ty = runner.rewrite_type(self, &result_ty)?;
        let reg_ty = lowered_result_ty
            .register_type()
            .cloned()
            .ok_or_else(|| Error::unsupported_type("fake target only calls scalar-returning functions"))?;
        let term = runner.append_instruction(InstructionKind::Call { callee: callee_reg, args: lowered_args }, Some(reg_ty))?;
        Ok(LoweredValue::register(result_ty, false, term))
    }

    fn lower_return(&mut self, runner: &mut FunctionRewriter<'_>, value: Option<LoweredValue>) -> Result<Term> {
        match (self.sret.take(), value) {
            (Some(sret_ptr), Some(v)) => {
                let lowered_ty = runner.rewrite_type(self, &v.origin_type)?;
                store_through(runner, &v, &lowered_ty, &sret_ptr)?;
                runner.append_instruction(InstructionKind::Return { value: None }, None)
            }
            (None, Some(v)) => {
                let reg = v.as_register().cloned().ok_or_else(|| Error::unsupported_type("fake target only returns scalars directly"))?;
                runner.append_instruction(InstructionKind::Return { value: Some(reg) }, None)
            }
            (_, None) => runner.append_instruction(InstructionKind::Return { value: None }, None),
        }
    }

    fn convert_value(&mut self, runner: &mut FunctionRewriter<'_>, value: &Term, ty: &Term) -> Result<Term> {
        let source_ty = value.ty().ok_or_else(|| Error::bad_type("value has no type"))?;
        let ctx = runner.ctx();
        let source_ptr_ty = ctx.intern_functional(FunctionalOp::PointerType, &[source_ty.clone()])?;
        let slot = runner.append_instruction(InstructionKind::Alloca { ty: source_ty }, Some(source_ptr_ty))?;
        runner.append_instruction(InstructionKind::Store { value: value.clone(), pointer: slot.clone() }, None)?;
        let typed_ptr = ctx.intern_functional(FunctionalOp::PointerCast, &[slot, ty.clone()])?;
        runner.append_instruction(InstructionKind::Load { pointer: typed_ptr }, Some(ty.clone()))
    }

    fn type_size_alignment(&mut self, ctx: &Context, ty: &Term) -> Result<(u64, u64)> {
        if let Some((width, _signed)) = as_integer_type(ty) {
            let bytes = u64::from(width.bits(ctx.pointer_width())) / 8;
            return Ok((bytes, bytes));
        }
        if let Some(width) = as_float_type(ty) {
            let bytes = u64::from(width.bits()) / 8;
            return Ok((bytes, bytes));
        }
        if as_pointer_type(ty).is_some() {
            let bytes = u64::from(ctx.pointer_width()) / 8;
            return Ok((bytes, bytes));
        }
        if matches!(ty.kind(), TermKind::Functional(FunctionalOp::ByteType | FunctionalOp::BooleanType, _)) {
            return Ok((1, 1));
        }
        Err(Error::unsupported_type("fake target only sizes primitive types"))
    }

    fn type_from_alignment(&mut self, ctx: &Context, alignment: u64) -> Result<Term> {
        let width = match alignment {
            1 => IntWidth::W8,
            2 => IntWidth::W16,
            4 => IntWidth::W32,
            8 => IntWidth::W64,
            16 => IntWidth::W128,
            _ => return Err(Error::unsupported_type("no primitive type of that alignment")),
        };
        ctx.intern_functional(FunctionalOp::IntegerType { width, signed: false }, &[])
    }
}

/// Stores a lowered value into `ptr`, recursing through split entries.
/// A test-local stand-in for the pass's own (private) `store_value`: a
/// real `TargetCallback` lives outside the crate, so sret handling has
/// to walk `LoweredValue`/`LoweredType` through their public surface.
fn store_through(runner: &mut FunctionRewriter<'_>, value: &LoweredValue, ty: &LoweredType, ptr: &Term) -> Result<()> {
    match &value.mode {
        LoweredValueMode::Register(v) => {
            let reg_ty = ty.register_type().cloned().ok_or_else(|| Error::internal("register value against a non-register type"))?;
            let typed_ptr = runner.ctx().intern_functional(FunctionalOp::PointerCast, &[ptr.clone(), reg_ty])?;
            runner.append_instruction(InstructionKind::Store { value: v.clone(), pointer: typed_ptr }, None)?;
            Ok(())
        }
        LoweredValueMode::Split(entries) => {
            let member_types = ty.entries().unwrap_or(&[]);
            let mut offset = 0u64;
            for (entry, entry_ty) in entries.iter().zip(member_types.iter()) {
                if let Some(align) = entry_ty.const_alignment() {
                    offset = (offset + align - 1) / align * align;
                }
                let entry_ptr = offset_ptr(runner, ptr, offset)?;
                store_through(runner, entry, entry_ty, &entry_ptr)?;
                if let Some(size) = entry_ty.const_size() {
                    offset += size;
                }
            }
            Ok(())
        }
        LoweredValueMode::Stack(src) => {
            runner.append_instruction(InstructionKind::Memcpy { dest: ptr.clone(), src: src.clone(), count: ty.size.clone() }, None)?;
            Ok(())
        }
        LoweredValueMode::Zero => {
            runner.append_instruction(InstructionKind::Memzero { dest: ptr.clone(), count: ty.size.clone() }, None)?;
            Ok(())
        }
        LoweredValueMode::Undefined | LoweredValueMode::Empty => Ok(()),
    }
}

fn offset_ptr(runner: &mut FunctionRewriter<'_>, base: &Term, offset: u64) -> Result<Term> {
    if offset == 0 {
        return Ok(base.clone());
    }
    let ctx = runner.ctx();
    let size_ty = ctx.intern_functional(FunctionalOp::IntegerType { width: IntWidth::Pointer, signed: false }, &[])?;
    let off_val = ctx.intern_functional(FunctionalOp::IntegerValue(BigInteger::from_u64(ctx.pointer_width(), offset)), &[size_ty])?;
    ctx.intern_functional(FunctionalOp::PointerOffset, &[base.clone(), off_val])
}

fn i32_ty(ctx: &Context) -> Term {
    ctx.intern_functional(FunctionalOp::IntegerType { width: IntWidth::W32, signed: true }, &[]).unwrap()
}

fn bool_ty(ctx: &Context) -> Term {
    ctx.intern_functional(FunctionalOp::BooleanType, &[]).unwrap()
}

fn i32_const(ctx: &Context, value: i64) -> Term {
    let ty = i32_ty(ctx);
    ctx.intern_functional(FunctionalOp::IntegerValue(BigInteger::from_i64(32, value)), &[ty]).unwrap()
}

#[test]
fn return_constant() {
    let ctx = Context::new(64);
    let module = Module::new(64);
    let fn_ty = ctx.intern_function_type(CallingConvention::Tvm, i32_ty(&ctx), vec![], 0, false).unwrap();
    let f = ctx.new_function(fn_ty, ctx.intern_symbol("main"), Linkage::Export).unwrap();
    let function = Function::from_term(f.clone()).unwrap();
    let entry = function.new_block(None).unwrap();
    entry.append_instruction(&ctx, InstructionKind::Return { value: Some(i32_const(&ctx, 19)) }, None).unwrap();
    module.add_global(function.name().clone(), f).unwrap();

    let mut target = FakeTarget::new();
    let lowered = lower_module(&ctx, &module, &mut target, Config::default()).unwrap();
    let text = disassemble_module(&lowered);
    assert!(text.contains("return #s32:19"), "{text}");
}

#[test]
fn integer_add_with_wraparound_types_check() {
    // `spec.md` §8 scenario 2 exercises wraparound at JIT time, which is
    // outside this crate's scope; here we check the piece the pass
    // itself owns -- that `add`'s body lowers to a single `add`
    // instruction over the two (unmarshaled, register-mode) parameters.
    let ctx = Context::new(64);
    let module = Module::new(64);
    let i32_ty = i32_ty(&ctx);
    let fn_ty = ctx.intern_function_type(CallingConvention::Tvm, i32_ty.clone(), vec![i32_ty.clone(), i32_ty.clone()], 0, false).unwrap();
    let f = ctx.new_function(fn_ty, ctx.intern_symbol("add"), Linkage::Export).unwrap();
    let function = Function::from_term(f.clone()).unwrap();
    let a = function.add_parameter(&ctx).unwrap();
    let b = function.add_parameter(&ctx).unwrap();
    let entry = function.new_block(None).unwrap();
    let sum = ctx.intern_functional(FunctionalOp::IntBinary(IntBinop::Add), &[a, b]).unwrap();
    entry.append_instruction(&ctx, InstructionKind::Return { value: Some(sum) }, None).unwrap();
    module.add_global(function.name().clone(), f).unwrap();

    let mut target = FakeTarget::new();
    let lowered = lower_module(&ctx, &module, &mut target, Config::default()).unwrap();
    let text = disassemble_module(&lowered);
    assert!(text.contains("= add "), "{text}");

    // Wraparound itself is a `BigInteger` property, exercised directly:
    // max_i32 + 1 must wrap to min_i32.
    let max = BigInteger::signed_max(32);
    let one = BigInteger::from_u64(32, 1);
    let wrapped = max.wrapping_add(&one).unwrap();
    assert_eq!(wrapped, BigInteger::signed_min(32));
}

#[test]
fn conditional_branch_lowers_both_arms() {
    let ctx = Context::new(64);
    let module = Module::new(64);
    let i32_ty = i32_ty(&ctx);
    let bool_ty = bool_ty(&ctx);
    let fn_ty = ctx
        .intern_function_type(CallingConvention::Tvm, i32_ty.clone(), vec![bool_ty, i32_ty.clone(), i32_ty.clone()], 0, false)
        .unwrap();
    let f = ctx.new_function(fn_ty, ctx.intern_symbol("choose"), Linkage::Export).unwrap();
    let function = Function::from_term(f.clone()).unwrap();
    let c = function.add_parameter(&ctx).unwrap();
    let x = function.add_parameter(&ctx).unwrap();
    let y = function.add_parameter(&ctx).unwrap();

    let entry = function.new_block(None).unwrap();
    let true_block = function.new_block(Some(entry.term())).unwrap();
    let false_block = function.new_block(Some(entry.term())).unwrap();
    entry
        .append_instruction(
            &ctx,
            InstructionKind::ConditionalBranch { cond: c, true_block: true_block.term().clone(), false_block: false_block.term().clone() },
            None,
        )
        .unwrap();

    let sum = ctx.intern_functional(FunctionalOp::IntBinary(IntBinop::Add), &[x.clone(), y.clone()]).unwrap();
    true_block.append_instruction(&ctx, InstructionKind::Return { value: Some(sum) }, None).unwrap();
    let diff = ctx.intern_functional(FunctionalOp::IntBinary(IntBinop::Sub), &[x, y]).unwrap();
    false_block.append_instruction(&ctx, InstructionKind::Return { value: Some(diff) }, None).unwrap();

    module.add_global(function.name().clone(), f).unwrap();

    let mut target = FakeTarget::new();
    let lowered = lower_module(&ctx, &module, &mut target, Config::default()).unwrap();
    let text = disassemble_module(&lowered);
    assert!(text.contains("cond_br"), "{text}");
    assert!(text.contains("= add "), "{text}");
    assert!(text.contains("= sub "), "{text}");
}

#[test]
fn array_constant_global_round_trips_its_elements() {
    let ctx = Context::new(64);
    let module = Module::new(64);
    let i32_ty = i32_ty(&ctx);
    let elements = [1, 5, 17, 9, 2].map(|v| i32_const(&ctx, v));
    let array_value = ctx
        .intern_functional(
            FunctionalOp::ArrayValue,
            &[i32_ty, elements[0].clone(), elements[1].clone(), elements[2].clone(), elements[3].clone(), elements[4].clone()],
        )
        .unwrap();

    let global = ctx.new_global_variable(array_value.ty().unwrap(), ctx.intern_symbol("ar"), Linkage::Export, true).unwrap();
    let view = tvm_ir::types::module::GlobalVariable::from_term(global.clone()).unwrap();
    view.set_initializer(array_value).unwrap();
    module.add_global(view.name().clone(), global).unwrap();

    let mut target = FakeTarget::new();
    let lowered = lower_module(&ctx, &module, &mut target, Config { flatten_globals: true, ..Config::default() }).unwrap();
    let text = disassemble_module(&lowered);
    for v in [1, 5, 17, 9, 2] {
        assert!(text.contains(&format!("#s32:{v}")), "{text}");
    }
}

#[test]
fn function_returning_array_gets_an_sret_parameter() {
    let ctx = Context::new(64);
    let module = Module::new(64);
    let i32_ty = i32_ty(&ctx);
    let elems = [576, 34, 9].map(|v| i32_const(&ctx, v));
    let array_value = ctx
        .intern_functional(FunctionalOp::ArrayValue, &[i32_ty, elems[0].clone(), elems[1].clone(), elems[2].clone()])
        .unwrap();
    let array_ty = array_value.ty().unwrap();
    let fn_ty = ctx.intern_function_type(CallingConvention::Tvm, array_ty, vec![], 0, false).unwrap();
    let f = ctx.new_function(fn_ty, ctx.intern_symbol("f"), Linkage::Export).unwrap();
    let function = Function::from_term(f.clone()).unwrap();
    let entry = function.new_block(None).unwrap();
    entry.append_instruction(&ctx, InstructionKind::Return { value: Some(array_value) }, None).unwrap();
    module.add_global(function.name().clone(), f).unwrap();

    let mut target = FakeTarget::new();
    let lowered = lower_module(&ctx, &module, &mut target, Config::default()).unwrap();
    let new_f = lowered.lookup("f").unwrap();
    let new_fn_ty = new_f.ty().unwrap();
    match new_fn_ty.kind() {
        TermKind::FunctionType(data) => {
            assert!(data.sret, "sret-returning function must be declared with sret = true");
            assert_eq!(data.params.len(), 1, "the only parameter should be the injected sret pointer");
        }
        _ => panic!("expected a function type"),
    }
    let text = disassemble_module(&lowered);
    for v in [576, 34, 9] {
        assert!(text.contains(&format!("#s32:{v}")), "{text}");
    }
    assert!(text.contains("memcpy") || text.contains("store"), "{text}");
}

#[test]
fn recursive_list_type_unpacks_and_sizes_correctly() {
    let ctx = Context::new(64);
    let i32_ty = i32_ty(&ctx);
    let byte = ctx.intern_functional(FunctionalOp::ByteType, &[]).unwrap();
    let ptr_byte = ctx.intern_functional(FunctionalOp::PointerType, &[byte]).unwrap();

    let (recursive, params) = ctx.new_recursive(Category::Type, 0);
    assert!(params.is_empty());
    let self_applied = ctx.apply_recursive(recursive.clone(), vec![]).unwrap();
    let self_ptr = ctx.intern_functional(FunctionalOp::PointerType, &[self_applied]).unwrap();
    let body = ctx.intern_functional(FunctionalOp::StructType, &[i32_ty.clone(), self_ptr]).unwrap();
    ctx.resolve_recursive(&recursive, body.clone()).unwrap();

    let applied = ctx.apply_recursive(recursive, vec![]).unwrap();
    let unpacked = ctx.unpack(&applied).unwrap();
    assert_eq!(unpacked, body);

    // sizeof(List) == sizeof(i32) + sizeof(pointer) rounded up to
    // alignof(pointer); on a 64-bit target that is 4 + 4 padding + 8 = 16.
    let mut target = FakeTarget::new();
    let (i32_size, i32_align) = target.type_size_alignment(&ctx, &i32_ty).unwrap();
    let (ptr_size, ptr_align) = target.type_size_alignment(&ctx, &ptr_byte).unwrap();
    assert_eq!((i32_size, i32_align), (4, 4));
    assert_eq!((ptr_size, ptr_align), (8, 8));
}
