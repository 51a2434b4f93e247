//! Functions, blocks, phis, and instructions (`spec.md` §4.5, C5).
//!
//! This module owns the SSA/dominance discipline: block append order,
//! terminator checking, `source_dominated` enforcement on every operand,
//! and phi incoming-edge completeness. Construction failures never expose
//! a partially built term (`spec.md` §7), so every fallible builder here
//! takes `&self`/`&Context` and returns a fully-formed handle or an
//! `Error` with nothing retained on the failing path.

use crate::context::Context;
use crate::error::{Error, Result};
use crate::symbol::Symbol;
use crate::types::module::Linkage;
use crate::types::term::{Category, Flags, Source, Term, TermData, TermKind};
use itertools::Itertools;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::{Rc, Weak};

// ---------------------------------------------------------------------
// Function
// ---------------------------------------------------------------------

pub struct FunctionData {
    pub name: Symbol,
    pub linkage: Cell<Linkage>,
    pub parameters: RefCell<Vec<Term>>,
    pub blocks: RefCell<Vec<Term>>,
    pub debug_names: RefCell<HashMap<Term, String>>,
}

/// A typed view over a `Term` known to hold `TermKind::Function`.
#[derive(Clone)]
pub struct Function(pub(crate) Term);

impl Function {
    #[must_use]
    pub fn term(&self) -> &Term {
        &self.0
    }

    fn data(&self) -> &FunctionData {
        match self.0.kind() {
            TermKind::Function(data) => data,
            _ => unreachable!("Function wraps a non-function term"),
        }
    }

    #[must_use]
    pub fn from_term(t: Term) -> Option<Self> {
        matches!(t.kind(), TermKind::Function(_)).then_some(Function(t))
    }

    #[must_use]
    pub fn ty(&self) -> Term {
        self.0.ty().expect("functions always have a function type")
    }

    #[must_use]
    pub fn name(&self) -> &Symbol {
        &self.data().name
    }

    #[must_use]
    pub fn linkage(&self) -> Linkage {
        self.data().linkage.get()
    }

    /// Overrides this function's linkage. Used by the aggregate-lowering
    /// pass to copy the source function's linkage onto the lowered
    /// declaration after a [`crate::lower::TargetCallback`] has created it
    /// (`spec.md` §4.9.8: "linkage is copied over by the pass itself").
    pub fn set_linkage(&self, linkage: Linkage) {
        self.data().linkage.set(linkage);
    }

    #[must_use]
    pub fn parameters(&self) -> Vec<Term> {
        self.data().parameters.borrow().clone()
    }

    #[must_use]
    pub fn blocks(&self) -> Vec<Term> {
        self.data().blocks.borrow().clone()
    }

    #[must_use]
    pub fn entry_block(&self) -> Option<Term> {
        self.data().blocks.borrow().first().cloned()
    }

    pub fn set_debug_name(&self, value: Term, name: impl Into<String>) {
        self.data().debug_names.borrow_mut().insert(value, name.into());
    }

    #[must_use]
    pub fn debug_name(&self, value: &Term) -> Option<String> {
        self.data().debug_names.borrow().get(value).cloned()
    }

    /// Append the next parameter in order, inferring phantom-ness from
    /// the function type's `n_phantom` count (`spec.md` §3: "a count of
    /// *phantom parameters* (leading parameters that are erased at
    /// runtime)").
    pub fn add_parameter(&self, ctx: &Context) -> Result<Term> {
        let fn_ty = self.ty();
        let (n_phantom, param_types) = ctx.function_type_params(&fn_ty)?;
        let index = self.data().parameters.borrow().len();
        if index >= param_types.len() {
            return Err(Error::internal("all function parameters already created"));
        }
        let param_ty = param_types[index].clone();
        let weak_self = self.0.downgrade();
        let is_phantom = (index as u32) < n_phantom;
        let source = if is_phantom {
            Source::PhantomParameter(self.0.clone())
        } else {
            Source::FunctionParameter(self.0.clone())
        };
        let mut flags = Flags::empty();
        if is_phantom {
            flags |= Flags::PHANTOM;
        }
        let term = Term(Rc::new(TermData {
            ty: Some(param_ty),
            category: Category::Value,
            source: RefCell::new(source),
            flags: Cell::new(flags),
            kind: TermKind::FunctionParameter { function: weak_self, index: index as u32 },
        }));
        self.data().parameters.borrow_mut().push(term.clone());
        Ok(term)
    }

    /// Append a new block. `idom` must be `None` exactly for the first
    /// (entry) block and `Some` (naming an already-appended block of the
    /// same function) otherwise.
    pub fn new_block(&self, idom: Option<&Term>) -> Result<Block> {
        let is_entry = self.data().blocks.borrow().is_empty();
        if is_entry != idom.is_none() {
            return Err(Error::internal(
                "exactly the entry block has no immediate dominator",
            ));
        }
        if let Some(idom) = idom {
            let owns = self.data().blocks.borrow().iter().any(|b| b.ptr_eq(idom));
            if !owns {
                return Err(Error::source_mismatch("immediate dominator is not a block of this function"));
            }
        }
        let block_ty = fresh_block_type();
        let term = Term(Rc::new(TermData {
            ty: Some(block_ty),
            category: Category::Value,
            // Placeholder; a block's own source is "itself, at entry" so
            // that `source_dominated` treats values produced within it
            // correctly, but that requires the `Rc` to already exist.
            // Patched below via `Term::set_source`.
            source: RefCell::new(Source::Global),
            flags: Cell::new(Flags::empty()),
            kind: TermKind::Block(BlockData {
                function: self.0.downgrade(),
                idom: RefCell::new(idom.cloned()),
                phis: RefCell::new(Vec::new()),
                instructions: RefCell::new(Vec::new()),
            }),
        }));
        term.set_source(Source::BlockEntry(term.clone()));
        self.data().blocks.borrow_mut().push(term.clone());
        Ok(Block(term))
    }

    /// Whole-function post-construction check: every block ends in a
    /// terminator, every phi's incoming edges are exactly its block's
    /// predecessor set, and every branch's successor's immediate
    /// dominator is itself dominated by the branching block
    /// (`spec.md` §4.5 SSA invariants).
    pub fn verify(&self) -> Result<()> {
        let blocks = self.blocks();
        if blocks.is_empty() {
            return Err(Error::internal("function has no blocks"));
        }
        let mut predecessors: HashMap<*const (), Vec<Term>> = HashMap::new();
        for b in &blocks {
            let block = Block(b.clone());
            let last = block.instructions();
            let last = last.last().ok_or_else(|| Error::internal("block has no instructions"))?;
            let successors = instruction_successors(last)?;
            for succ in &successors {
                predecessors
                    .entry(Rc::as_ptr(&succ.0) as *const ())
                    .or_default()
                    .push(b.clone());
            }
            for succ in &successors {
                let succ_block = Block(succ.clone());
                if let Some(succ_idom) = succ_block.idom() {
                    if !block_dominates(&succ_idom, b) {
                        return Err(Error::source_mismatch(
                            "successor's immediate dominator does not dominate the branching block",
                        ));
                    }
                }
            }
        }
        for b in &blocks {
            let block = Block(b.clone());
            let key = Rc::as_ptr(&b.0) as *const ();
            let expected = predecessors.get(&key).cloned().unwrap_or_default();
            for phi_term in block.phis() {
                let phi = Phi(phi_term);
                let incoming = phi.incoming_blocks();
                let incoming_ptrs = incoming.iter().map(|t| Rc::as_ptr(&t.0) as *const ()).sorted();
                let expected_ptrs = expected.iter().map(|t| Rc::as_ptr(&t.0) as *const ()).sorted();
                if !incoming_ptrs.eq(expected_ptrs) {
                    return Err(Error::source_mismatch(
                        "phi incoming edges are not exactly the predecessor set",
                    ));
                }
            }
        }
        Ok(())
    }
}

fn fresh_block_type() -> Term {
    Term(Rc::new(TermData {
        ty: None,
        category: Category::Metatype,
        source: RefCell::new(Source::Global),
        flags: Cell::new(Flags::empty()),
        kind: TermKind::Metatype,
    }))
}

fn instruction_successors(instr: &Term) -> Result<Vec<Term>> {
    match instr.kind() {
        TermKind::Instruction(data) => Ok(match &data.kind {
            InstructionKind::ConditionalBranch { true_block, false_block, .. } => {
                vec![true_block.clone(), false_block.clone()]
            }
            InstructionKind::UnconditionalBranch { target } => vec![target.clone()],
            _ => Vec::new(),
        }),
        _ => Err(Error::internal("expected instruction")),
    }
}

/// Does `dominator` dominate `block`, per `spec.md` §3: "the chain of
/// 'immediate dominator' links from Y reaches X".
#[must_use]
pub fn block_dominates(dominator: &Term, block: &Term) -> bool {
    let mut cur = block.clone();
    loop {
        if cur.ptr_eq(dominator) {
            return true;
        }
        match Block(cur.clone()).idom() {
            Some(next) => cur = next,
            None => return false,
        }
    }
}

/// The dominator-chain length of `block` (0 for the entry block). Used
/// to find the nearest common dominator of two blocks.
fn dominator_depth(block: &Term) -> u32 {
    let mut depth = 0;
    let mut cur = block.clone();
    while let Some(next) = Block(cur.clone()).idom() {
        depth += 1;
        cur = next;
    }
    depth
}

/// Nearest common dominator of two blocks in the same function.
#[must_use]
pub fn nearest_common_dominator(a: &Term, b: &Term) -> Option<Term> {
    let mut a = a.clone();
    let mut b = b.clone();
    let mut da = dominator_depth(&a);
    let mut db = dominator_depth(&b);
    while da > db {
        a = Block(a).idom()?;
        da -= 1;
    }
    while db > da {
        b = Block(b).idom()?;
        db -= 1;
    }
    while !a.ptr_eq(&b) {
        a = Block(a).idom()?;
        b = Block(b).idom()?;
    }
    Some(a)
}

// ---------------------------------------------------------------------
// Block
// ---------------------------------------------------------------------

pub struct BlockData {
    pub function: Weak<TermData>,
    pub idom: RefCell<Option<Term>>,
    pub phis: RefCell<Vec<Term>>,
    pub instructions: RefCell<Vec<Term>>,
}

#[derive(Clone)]
pub struct Block(pub(crate) Term);

impl Block {
    #[must_use]
    pub fn term(&self) -> &Term {
        &self.0
    }

    fn data(&self) -> &BlockData {
        match self.0.kind() {
            TermKind::Block(data) => data,
            _ => unreachable!("Block wraps a non-block term"),
        }
    }

    #[must_use]
    pub fn from_term(t: Term) -> Option<Self> {
        matches!(t.kind(), TermKind::Block(_)).then_some(Block(t))
    }

    #[must_use]
    pub fn function(&self) -> Option<Function> {
        self.data().function.upgrade().map(|rc| Function(Term(rc)))
    }

    #[must_use]
    pub fn idom(&self) -> Option<Term> {
        self.data().idom.borrow().clone()
    }

    #[must_use]
    pub fn is_entry(&self) -> bool {
        self.idom().is_none()
    }

    #[must_use]
    pub fn phis(&self) -> Vec<Term> {
        self.data().phis.borrow().clone()
    }

    #[must_use]
    pub fn instructions(&self) -> Vec<Term> {
        self.data().instructions.borrow().clone()
    }

    /// Append a phi with the given type; incoming edges are added
    /// separately via [`Phi::add_incoming`].
    pub fn new_phi(&self, ty: Term) -> Phi {
        let term = Term(Rc::new(TermData {
            ty: Some(ty),
            category: Category::Value,
            source: RefCell::new(Source::BlockEntry(self.0.clone())),
            flags: Cell::new(Flags::empty()),
            kind: TermKind::Phi(PhiData { block: self.0.downgrade(), incoming: RefCell::new(Vec::new()) }),
        }));
        self.data().phis.borrow_mut().push(term.clone());
        Phi(term)
    }

    /// Append an instruction. Rejects appending after a terminator has
    /// already been placed, and rejects operands whose source does not
    /// dominate this block (`spec.md` §4.5).
    pub fn append_instruction(&self, ctx: &Context, kind: InstructionKind, result_ty: Option<Term>) -> Result<Term> {
        {
            let instrs = self.data().instructions.borrow();
            if let Some(last) = instrs.last() {
                if is_terminator(last) {
                    return Err(Error::internal("cannot append after a terminator"));
                }
            }
        }
        let use_site_source = Source::AfterInstruction(self.0.clone());
        for operand in kind.operands() {
            ctx.check_dominated(&operand, &use_site_source)?;
        }
        let position = self.data().instructions.borrow().len();
        let term = Term(Rc::new(TermData {
            ty: result_ty,
            category: Category::Value,
            source: RefCell::new(use_site_source),
            flags: Cell::new(Flags::empty()),
            kind: TermKind::Instruction(InstructionData {
                block: self.0.downgrade(),
                position: Cell::new(position),
                kind,
            }),
        }));
        self.data().instructions.borrow_mut().push(term.clone());
        Ok(term)
    }
}

#[must_use]
pub fn is_terminator(instr: &Term) -> bool {
    matches!(
        instr.kind(),
        TermKind::Instruction(InstructionData {
            kind: InstructionKind::Return { .. }
                | InstructionKind::ConditionalBranch { .. }
                | InstructionKind::UnconditionalBranch { .. }
                | InstructionKind::Unreachable,
            ..
        })
    )
}

// ---------------------------------------------------------------------
// Instruction
// ---------------------------------------------------------------------

pub struct InstructionData {
    pub block: Weak<TermData>,
    pub position: Cell<usize>,
    pub kind: InstructionKind,
}

/// The closed set of instruction operation tags (`spec.md` §4.5).
pub enum InstructionKind {
    Return { value: Option<Term> },
    ConditionalBranch { cond: Term, true_block: Term, false_block: Term },
    UnconditionalBranch { target: Term },
    Unreachable,
    Evaluate { value: Term },
    Call { callee: Term, args: Vec<Term> },
    Store { value: Term, pointer: Term },
    Load { pointer: Term },
    Alloca { ty: Term },
    StackSave,
    StackRestore { value: Term },
    Memcpy { dest: Term, src: Term, count: Term },
    Memzero { dest: Term, count: Term },
    /// Forces a value to be materialized at this program point, even if
    /// it would otherwise be treated as phantom/erased.
    Solidify { value: Term },
}

impl InstructionKind {
    #[must_use]
    pub fn operands(&self) -> Vec<Term> {
        match self {
            InstructionKind::Return { value } => value.iter().cloned().collect(),
            InstructionKind::ConditionalBranch { cond, .. } => vec![cond.clone()],
            InstructionKind::UnconditionalBranch { .. } => Vec::new(),
            InstructionKind::Unreachable => Vec::new(),
            InstructionKind::Evaluate { value } => vec![value.clone()],
            InstructionKind::Call { callee, args } => {
                let mut v = vec![callee.clone()];
                v.extend(args.iter().cloned());
                v
            }
            InstructionKind::Store { value, pointer } => vec![value.clone(), pointer.clone()],
            InstructionKind::Load { pointer } => vec![pointer.clone()],
            InstructionKind::Alloca { .. } => Vec::new(),
            InstructionKind::StackSave => Vec::new(),
            InstructionKind::StackRestore { value } => vec![value.clone()],
            InstructionKind::Memcpy { dest, src, count } => vec![dest.clone(), src.clone(), count.clone()],
            InstructionKind::Memzero { dest, count } => vec![dest.clone(), count.clone()],
            InstructionKind::Solidify { value } => vec![value.clone()],
        }
    }
}

#[derive(Clone)]
pub struct Instruction(pub(crate) Term);

impl Instruction {
    #[must_use]
    pub fn term(&self) -> &Term {
        &self.0
    }

    #[must_use]
    pub fn block(&self) -> Option<Block> {
        match self.0.kind() {
            TermKind::Instruction(data) => data.block.upgrade().map(|rc| Block(Term(rc))),
            _ => None,
        }
    }

    #[must_use]
    pub fn position(&self) -> usize {
        match self.0.kind() {
            TermKind::Instruction(data) => data.position.get(),
            _ => 0,
        }
    }
}

// ---------------------------------------------------------------------
// Phi
// ---------------------------------------------------------------------

pub struct PhiData {
    pub block: Weak<TermData>,
    pub incoming: RefCell<Vec<(Weak<TermData>, Term)>>,
}

#[derive(Clone)]
pub struct Phi(pub(crate) Term);

impl Phi {
    #[must_use]
    pub fn term(&self) -> &Term {
        &self.0
    }

    fn data(&self) -> &PhiData {
        match self.0.kind() {
            TermKind::Phi(data) => data,
            _ => unreachable!("Phi wraps a non-phi term"),
        }
    }

    #[must_use]
    pub fn block(&self) -> Option<Block> {
        self.data().block.upgrade().map(|rc| Block(Term(rc)))
    }

    #[must_use]
    pub fn incoming(&self) -> Vec<(Term, Term)> {
        self.data()
            .incoming
            .borrow()
            .iter()
            .filter_map(|(b, v)| b.upgrade().map(|b| (Term(b), v.clone())))
            .collect()
    }

    #[must_use]
    pub fn incoming_blocks(&self) -> Vec<Term> {
        self.incoming().into_iter().map(|(b, _)| b).collect()
    }

    /// Add one incoming edge. `ctx` is used to check that `value`'s
    /// source dominates `from`, i.e. is available at the end of the
    /// predecessor block.
    pub fn add_incoming(&self, ctx: &Context, from: &Term, value: Term) -> Result<()> {
        let use_site = Source::AfterInstruction(
            Block::from_term(from.clone())
                .and_then(|b| b.instructions().last().cloned())
                .unwrap_or_else(|| from.clone()),
        );
        ctx.check_dominated(&value, &use_site)?;
        self.data().incoming.borrow_mut().push((from.downgrade(), value));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dominator_depth_counts_chain_length() {
        // depth is only meaningful relative to a real function graph;
        // exercised end-to-end in context.rs / lower tests.
        assert_eq!(dominator_depth(&fresh_block_type()), 0);
    }
}
