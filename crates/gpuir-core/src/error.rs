//! Core error types.
//!
//! Uses `thiserror` for structured, matchable error variants. The taxonomy
//! separates unrecoverable construction failures (`InvalidProgram`) from
//! target-capability gaps (`NotSupported`), API misuse (`InvalidOperation`),
//! malformed arguments (`ArgumentOutOfRange`), and the collected findings of
//! the post-build verifier (`VerificationFailed`).

use thiserror::Error;

use crate::id::NodeId;
use crate::location::Location;

/// A single finding of the structural verifier.
#[derive(Debug, Clone, PartialEq)]
pub struct VerificationFailure {
    /// The offending node.
    pub node: NodeId,
    pub location: Location,
    pub message: String,
}

impl VerificationFailure {
    pub fn new(node: NodeId, location: Location, message: impl Into<String>) -> Self {
        VerificationFailure {
            node,
            location,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for VerificationFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "node {}: {}",
            self.node,
            self.location.format_error_message(&self.message)
        )
    }
}

/// Errors produced by the IR core.
#[derive(Debug, Error)]
pub enum IrError {
    /// The requested construction would violate an SSA or typing invariant.
    /// The active builder session must be aborted.
    #[error("invalid program: {message}")]
    InvalidProgram { message: String },

    /// The feature is unavailable in the requested configuration; the caller
    /// may retry with a different target.
    #[error("not supported: {feature}")]
    NotSupported { feature: String },

    /// API misuse: builder already open, operating on a released builder, or
    /// a mismatched generation.
    #[error("invalid operation: {message}")]
    InvalidOperation { message: String },

    /// Malformed input argument.
    #[error("argument out of range: {message}")]
    ArgumentOutOfRange { message: String },

    /// The post-build verifier found structural violations. All findings are
    /// collected before returning.
    #[error("verification failed with {} finding(s)", failures.len())]
    VerificationFailed { failures: Vec<VerificationFailure> },
}

impl IrError {
    /// An `InvalidProgram` whose message is routed through the location's
    /// error formatting, so inlined contexts print the compilation stack.
    pub fn invalid_program(location: &Location, message: impl AsRef<str>) -> Self {
        IrError::InvalidProgram {
            message: location.format_error_message(message.as_ref()),
        }
    }

    pub fn not_supported(feature: impl Into<String>) -> Self {
        IrError::NotSupported {
            feature: feature.into(),
        }
    }

    pub fn invalid_operation(message: impl Into<String>) -> Self {
        IrError::InvalidOperation {
            message: message.into(),
        }
    }

    pub fn argument_out_of_range(message: impl Into<String>) -> Self {
        IrError::ArgumentOutOfRange {
            message: message.into(),
        }
    }
}
