//! Client error types.

use coedit_core::TransformationError;
use coedit_proto::{ProtoError, ResourcePath};
use thiserror::Error;

/// Errors from client operations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Document is not open on this participant.
    #[error("unknown document: {path}")]
    UnknownDocument {
        /// The path that was not found.
        path: ResourcePath,
    },

    /// Document is already open.
    #[error("document already open: {path}")]
    DocumentAlreadyOpen {
        /// The path that is already open.
        path: ResourcePath,
    },

    /// Operation does not apply to the local content.
    #[error("invalid operation on {path}: {source}")]
    InvalidOperation {
        /// Target document.
        path: ResourcePath,
        /// Why the operation did not apply.
        source: ProtoError,
    },

    /// Local edits are blocked until the running recovery finishes.
    #[error("recovery in progress")]
    RecoveryInProgress,

    /// Remote edit could not be integrated.
    #[error("transformation failed on {path}: {source}")]
    Transformation {
        /// Affected document.
        path: ResourcePath,
        /// Underlying error.
        source: TransformationError,
    },
}
