//! Export/import error types.
//!
//! [`ImportError`] covers all anticipated failure modes when rebuilding a
//! context from a flat container: cyclic or missing type dependencies,
//! dangling method/block/value references, malformed records, and
//! verification failures surfaced from the core builder.

use gpuir_core::IrError;
use thiserror::Error;

/// Errors produced while importing a flat container.
#[derive(Debug, Error)]
pub enum ImportError {
    /// The type records form a dependency cycle.
    #[error("type cycle involving type {0}")]
    TypeCycle(i64),

    /// A record references a type id that is not in the container.
    #[error("missing type {0}")]
    MissingType(i64),

    /// A type record is internally inconsistent.
    #[error("malformed type record {id}: {reason}")]
    MalformedType { id: i64, reason: String },

    /// A value record references a method that is not in the container.
    #[error("missing method {0}")]
    MissingMethod(i64),

    /// A record references a block id that is not in the container.
    #[error("missing block {0}")]
    MissingBlock(i64),

    /// A value operand id does not resolve to any exported value.
    #[error("missing value {0}")]
    MissingValue(i64),

    /// A value record is internally inconsistent.
    #[error("malformed value record {id}: {reason}")]
    MalformedValue { id: i64, reason: String },

    /// Two records share an id.
    #[error("duplicate record id {0}")]
    DuplicateId(i64),

    /// The rebuilt method failed construction or verification.
    #[error(transparent)]
    Ir(#[from] IrError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_forms() {
        assert_eq!(ImportError::TypeCycle(3).to_string(), "type cycle involving type 3");
        assert_eq!(ImportError::MissingValue(9).to_string(), "missing value 9");
        let err = ImportError::MalformedValue {
            id: 2,
            reason: "phi nodes must pair".into(),
        };
        assert_eq!(
            err.to_string(),
            "malformed value record 2: phi nodes must pair"
        );
    }
}
