//! `tvm-ir`: a hash-consed, typed SSA intermediate representation for a
//! low-level target virtual machine, plus the aggregate-lowering pass
//! that rewrites its array/struct/union/metatype operations down to
//! word- and byte-level primitives for handoff to a machine back end.
//!
//! The crate is organized the way a compiler's IR/codegen crate
//! typically lays itself out: a `types` module holding the term
//! universe, a `context` module owning term lifetimes and interning, and
//! top-level passes (`lower`) operating over those types. This crate
//! stops at the lowered IR: there is no machine-code emission here, only
//! the contract a back end would consume (see [`lower::TargetCallback`]).
//!
//! # Layout
//!
//! - [`bigint`] — fixed-bit-width two's-complement arithmetic for IR
//!   integer constants (C1).
//! - [`symbol`] — name interning shared by [`context::Context`] and the
//!   disassembler (C12).
//! - [`error`] — the closed [`error::Error`] kind set every fallible
//!   entry point returns (C11).
//! - [`types`] — the term universe: functions/blocks/instructions
//!   (C5), the functional-operation catalogue (C4), modules (C6), and
//!   abstract recursive types (C7).
//! - [`context`] — the term store: hash-consing and the typed/dominance
//!   -checked constructors that bring every term into existence (C2,
//!   C3).
//! - [`lower`] — the aggregate-lowering pass (C9) and the
//!   [`lower::TargetCallback`] seam ABI knowledge crosses through (C10).
//! - [`disassemble`] — deterministic textual rendering of a module or
//!   term (C8).

pub mod bigint;
pub mod context;
pub mod disassemble;
pub mod error;
pub mod lower;
pub mod symbol;
pub mod types;

pub use context::Context;
pub use error::{Error, Result};
pub use symbol::Symbol;
pub use types::module::Module;
