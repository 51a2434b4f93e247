//! The aggregate-lowering pass (`spec.md` §4.9, C9) and the
//! [`TargetCallback`] seam ABI knowledge crosses through it (§4.9.8, C10).
//!
//! This is the central rewrite: it consumes a [`Module`] built against
//! the full term universe (arrays, structs, unions, `sizeof`/`alignof`,
//! ABI-opaque calls) and produces a second module, in the same
//! [`Context`], whose functions and globals use only scalar and
//! byte-granular operations plus whatever shape a back end approves
//! through `target`.
//!
//! The pass is split the way `spec.md` §4.9.3 describes it: a
//! module-level rewriter ([`module::ModuleRewriter`]) handling constants,
//! globals, and global-sourced functional expressions, and a
//! function-level rewriter ([`function::FunctionRewriter`]) replaying one
//! function's block graph at a time. Both share the type-lowering logic
//! in [`types`] and the value representation in [`value`]; global layout
//! arithmetic lives in [`global`].
//!
//! Grounded throughout on `original_source/src/Tvm/AggregateLowering.hpp`
//! and `.cpp`, adapted the way a two-stage lowering pass (MIR -> VCode,
//! `build_vcode.rs`) separates "what the target wants" from "how the
//! rewrite is replayed": `TargetCallback` here plays the role an `arch`/
//! `PReg` ABI table plays for such a pass, except the ABI policy is a
//! runtime trait object rather than a compile-time architecture module,
//! since `spec.md` §4.9.8 specifies it as an injectable seam rather than
//! a fixed backend.

mod function;
mod global;
mod module;
mod types;
mod value;

pub use function::FunctionRewriter;
pub use module::ModuleRewriter;
pub use types::{LoweredType, LoweredTypeMode};
pub use value::{LoweredValue, LoweredValueMode};

use crate::context::Context;
use crate::error::Result;
use crate::types::module::Module;

/// The six independent policy bits of `spec.md` §4.9.7, queried by name
/// rather than combined into a bitflags set (each is semantically
/// unrelated to the others, unlike [`crate::types::term::Flags`]).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Config {
    /// Represent array types/values as [`LoweredTypeMode::Split`] instead
    /// of an opaque byte blob, when the length is statically known.
    pub split_arrays: bool,
    /// Represent struct types/values as [`LoweredTypeMode::Split`]
    /// instead of an opaque byte blob.
    pub split_structs: bool,
    /// Lower every union access through [`TargetCallback::convert_value`]
    /// (a store+reload bitcast) instead of any direct representation.
    pub remove_unions: bool,
    /// Replace `sizeof`/`alignof` on non-primitive types with the
    /// constant-folded integers computed from the lowered-type tree, even
    /// when the operand would otherwise be left as a register-mode type.
    pub remove_sizeof: bool,
    /// Rewrite every `pointer_offset` to scale its offset by the lowered
    /// pointee size at lowering time, eagerly folding the multiply where
    /// the size is a compile-time constant.
    pub pointer_arithmetic_to_bytes: bool,
    /// Collapse a global's nested struct/array initializer structure into
    /// a single flat struct of primitive elements (`spec.md` §4.9.7's
    /// recommended conservative behavior: always emit one top-level
    /// aggregate, never a bare sequence).
    pub flatten_globals: bool,
}

/// The narrow seam through which ABI knowledge crosses the pass
/// (`spec.md` §4.9.8, C10). An implementation exists per target ABI;
/// this pass calls it exactly where the prose spec says to and nowhere
/// else — "avoid embedding ABI logic anywhere else in the pass" (§9).
pub trait TargetCallback {
    /// Creates the lowered function declaration with the target-chosen
    /// signature. Linkage is copied over by the pass itself afterward.
    fn lower_function(&mut self, ctx: &Context, source_function: &crate::types::term::Term) -> Result<crate::types::term::Term>;

    /// Installs parameter mappings into the lowered function's entry
    /// (prolog) block, using `runner` to append whatever marshaling
    /// instructions are required.
    fn lower_function_entry(
        &mut self,
        runner: &mut FunctionRewriter<'_>,
        source_function: &crate::types::term::Term,
        lowered_function: &crate::types::term::Term,
    ) -> Result<()>;

    /// Emits the lowered call, including any stack spill/reload for
    /// by-reference arguments, and returns the lowered result.
    fn lower_function_call(&mut self, runner: &mut FunctionRewriter<'_>, call: &crate::types::term::Term) -> Result<LoweredValue>;

    /// Emits the lowered return (a value return, an sret store + void
    /// return, or a multi-register split return), returning the
    /// terminator instruction appended.
    fn lower_return(
        &mut self,
        runner: &mut FunctionRewriter<'_>,
        value: Option<LoweredValue>,
    ) -> Result<crate::types::term::Term>;

    /// Simulates a store-then-reload bitcast at the machine level; used
    /// for union member access when `Config::remove_unions` is set.
    fn convert_value(&mut self, runner: &mut FunctionRewriter<'_>, value: &crate::types::term::Term, ty: &crate::types::term::Term) -> Result<crate::types::term::Term>;

    /// Returns `(size, alignment)` in bytes for a primitive type (an
    /// integer, float, byte, boolean, or pointer type). Never called for
    /// aggregate types — those are sized by this pass itself.
    fn type_size_alignment(&mut self, ctx: &Context, ty: &crate::types::term::Term) -> Result<(u64, u64)>;

    /// Returns a primitive type whose alignment is at most `alignment`
    /// and whose size equals its own alignment, suitable for padding
    /// bytes that reach a desired stride.
    fn type_from_alignment(&mut self, ctx: &Context, alignment: u64) -> Result<crate::types::term::Term>;
}

/// Runs the aggregate-lowering pass over `module`, producing a new
/// module in the same context (`spec.md` §6.2). Globals are lowered in
/// two passes: first every function/global-variable declaration is
/// created (so mutual references resolve), then bodies/initializers are
/// filled in. Per §7's propagation policy, the first error in a
/// function aborts that function but leaves previously lowered globals
/// intact — so this returns the first error together with the
/// partially-lowered module via the error itself is not modeled; callers
/// that want partial results should lower globals one at a time through
/// [`ModuleRewriter`] directly.
pub fn lower_module(ctx: &Context, module: &Module, target: &mut dyn TargetCallback, config: Config) -> Result<Module> {
    let mut rewriter = ModuleRewriter::new(ctx, config);
    rewriter.run(module, target)
}
