//! Harness defect errors.
//!
//! Everything in this module means the synthesizer or the input generator is
//! broken on some structured input. These are never the expected "the compiler
//! under test rejected the source" outcome; that one is recorded on the
//! generation record and never raised.

use std::fmt;

use thiserror::Error;

pub use difftest_types::UnsupportedTypeError;

/// What was wrong with a structured-input node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConversionFault {
    UnknownVariable,
    TypeMismatch,
    ArityMismatch,
    InvalidLiteral,
    ReturnMismatch,
    InvalidType,
}

impl fmt::Display for ConversionFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConversionFault::UnknownVariable => "unknown variable",
            ConversionFault::TypeMismatch => "type mismatch",
            ConversionFault::ArityMismatch => "arity mismatch",
            ConversionFault::InvalidLiteral => "invalid literal",
            ConversionFault::ReturnMismatch => "return mismatch",
            ConversionFault::InvalidType => "invalid type",
        };
        f.write_str(s)
    }
}

/// A malformed node in the structured input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot convert `{node}` node: {fault}: {detail}")]
pub struct ConversionError {
    /// Kind tag of the offending node (`binary`, `declare`, ...).
    pub node: &'static str,
    pub fault: ConversionFault,
    pub detail: String,
}

impl ConversionError {
    pub fn new(node: &'static str, fault: ConversionFault, detail: impl Into<String>) -> Self {
        Self {
            node,
            fault,
            detail: detail.into(),
        }
    }
}

/// A call site referencing a function index that does not exist.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("`{caller}` calls undefined function index {callee}")]
pub struct DependencyError {
    pub caller: String,
    pub callee: usize,
}

/// The "harness itself is broken" class of failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HarnessError {
    #[error(transparent)]
    Conversion(#[from] ConversionError),
    #[error(transparent)]
    UnsupportedType(#[from] UnsupportedTypeError),
    #[error(transparent)]
    Dependency(#[from] DependencyError),
}

impl HarnessError {
    /// Stable error kind persisted to the harness-failure log.
    pub fn kind(&self) -> &'static str {
        match self {
            HarnessError::Conversion(_) => "ConversionError",
            HarnessError::UnsupportedType(_) => "UnsupportedTypeError",
            HarnessError::Dependency(_) => "DependencyError",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversion_error_display() {
        let err = ConversionError::new("binary", ConversionFault::TypeMismatch, "uint8 vs bool");
        assert_eq!(
            err.to_string(),
            "cannot convert `binary` node: type mismatch: uint8 vs bool"
        );
    }

    #[test]
    fn test_harness_error_kind() {
        let err: HarnessError = DependencyError {
            caller: "func_0".into(),
            callee: 9,
        }
        .into();
        assert_eq!(err.kind(), "DependencyError");
        assert_eq!(err.to_string(), "`func_0` calls undefined function index 9");
    }
}
