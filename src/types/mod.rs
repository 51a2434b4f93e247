//! Data type definitions for the term universe, split one file per
//! closely related group of terms and re-exported from here.

pub mod cfg;
pub mod functional;
pub mod module;
pub mod recursive;
pub mod term;

pub use cfg::{Block, Function, Instruction, InstructionKind, Phi};
pub use functional::FunctionalOp;
pub use module::{Global, Linkage, Module};
pub use recursive::{Apply, Recursive, RecursiveParameter};
pub use term::{Category, Flags, Source, Term, TermData, TermKind};

/// Function calling conventions (`spec.md` §3, function types "carry a
/// calling convention"). Grounded in `original_source/src/Tvm/Core.hpp`'s
/// `CallingConvention` enum.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CallingConvention {
    /// TVM's own internal convention: every parameter is passed as a
    /// pointer, with the first parameter being the return-value slot.
    Tvm,
    /// The host platform's C calling convention.
    C,
    /// MS `__stdcall`.
    X86Stdcall,
    /// MS `__thiscall`.
    X86Thiscall,
    /// MS `__fastcall`.
    X86Fastcall,
}
