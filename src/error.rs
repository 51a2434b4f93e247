//! The closed error-kind catalogue used throughout the crate.
//!
//! Every fallible entry point in [`crate::context`], [`crate::types`] and
//! [`crate::lower`] returns [`Result<T>`], which is a thin alias over
//! `std::result::Result<T, Error>`. The kind set is closed and small by
//! design (see `spec.md` §7): callers match on it exhaustively rather than
//! probing a boxed `dyn std::error::Error`.

use std::fmt;

/// A source location usable for diagnostics produced by the textual
/// surface or by any client API that wants to blame a specific place.
///
/// This is deliberately minimal: line/column plus an optional file label.
/// The disassembler and any parser collaborator are expected to carry
/// richer spans of their own and only translate down to this type at the
/// error-reporting boundary.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Location {
    /// A human-readable label for the source (file name, "<repl>", ...).
    pub file: Option<String>,
    pub line: u32,
    pub column: u32,
}

impl Location {
    #[must_use]
    pub fn new(file: impl Into<Option<String>>, line: u32, column: u32) -> Self {
        Self { file: file.into(), line, column }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(file) = &self.file {
            write!(f, "{file}:{}:{}", self.line, self.column)
        } else {
            write!(f, "{}:{}", self.line, self.column)
        }
    }
}

/// The closed set of error kinds described in `spec.md` §7.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Error {
    /// Operand types do not satisfy an operation's typing rule.
    BadType(String),
    /// An integer operation was given mismatched (or zero) bit widths.
    BadWidth { expected: u32, found: u32 },
    /// Integer division where the divisor is statically known to be zero.
    DivideByZero,
    /// Operands do not have a common source, or an operand's source does
    /// not dominate its use site.
    SourceMismatch(String),
    /// A term still references an unresolved recursive type where a
    /// concrete operation required otherwise.
    UnresolvedRecursive,
    /// A back-end-opaque blob type reached an operation that requires a
    /// register or split type.
    UnsupportedType(String),
    /// An invariant violation detected by an assertion. Not recoverable;
    /// indicates a bug in this crate or in a `TargetCallback` implementor.
    Internal(String),
    /// Malformed input from the textual surface or a client API, wrapping
    /// one of the other kinds with a source location.
    User { location: Location, source: Box<Error> },
}

impl Error {
    #[must_use]
    pub fn bad_type(msg: impl Into<String>) -> Self {
        Error::BadType(msg.into())
    }

    #[must_use]
    pub fn source_mismatch(msg: impl Into<String>) -> Self {
        Error::SourceMismatch(msg.into())
    }

    #[must_use]
    pub fn unsupported_type(msg: impl Into<String>) -> Self {
        Error::UnsupportedType(msg.into())
    }

    #[must_use]
    pub fn internal(msg: impl Into<String>) -> Self {
        Error::Internal(msg.into())
    }

    /// Wrap this error with a textual-surface location, producing a
    /// [`Error::User`]. Wrapping an existing `User` error re-wraps it
    /// rather than nesting, so `location()` always reflects the most
    /// recent wrap.
    #[must_use]
    pub fn at(self, location: Location) -> Self {
        match self {
            Error::User { source, .. } => Error::User { location, source },
            other => Error::User { location, source: Box::new(other) },
        }
    }

    /// The kind discriminant, ignoring any `User` wrapping. Used by tests
    /// that want to assert "this failed with bad-type" without caring
    /// about the message text.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Error::BadType(_) => "bad-type",
            Error::BadWidth { .. } => "bad-width",
            Error::DivideByZero => "divide-by-zero",
            Error::SourceMismatch(_) => "source-mismatch",
            Error::UnresolvedRecursive => "unresolved-recursive",
            Error::UnsupportedType(_) => "unsupported-type",
            Error::Internal(_) => "internal",
            Error::User { source, .. } => source.kind(),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::BadType(msg) => write!(f, "bad-type: {msg}"),
            Error::BadWidth { expected, found } =>
                write!(f, "bad-width: expected {expected}-bit operand, found {found}-bit"),
            Error::DivideByZero => write!(f, "divide-by-zero"),
            Error::SourceMismatch(msg) => write!(f, "source-mismatch: {msg}"),
            Error::UnresolvedRecursive =>
                write!(f, "unresolved-recursive: recursive type body has not been resolved"),
            Error::UnsupportedType(msg) => write!(f, "unsupported-type: {msg}"),
            Error::Internal(msg) => write!(f, "internal error: {msg}"),
            Error::User { location, source } => write!(f, "{location}: {source}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::User { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_wraps_and_unwraps_kind() {
        let e = Error::bad_type("mismatched operand").at(Location::new(None, 3, 8));
        assert_eq!(e.kind(), "bad-type");
        assert_eq!(e.to_string(), "3:8: bad-type: mismatched operand");
    }

    #[test]
    fn re_wrapping_does_not_nest() {
        let e = Error::DivideByZero
            .at(Location::new(Some("a.tvm".into()), 1, 1))
            .at(Location::new(Some("b.tvm".into()), 2, 2));
        match &e {
            Error::User { location, source } => {
                assert_eq!(location.file.as_deref(), Some("b.tvm"));
                assert!(matches!(**source, Error::DivideByZero));
            }
            _ => panic!("expected User"),
        }
    }
}
