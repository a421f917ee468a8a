//! Transformation errors.

use coedit_proto::{ParticipantId, ResourcePath};
use thiserror::Error;

/// The vector clock of an incoming activity contradicts buffered history.
///
/// Never retried locally: the affected replica has to be healed by the
/// checksum-driven recovery protocol.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransformationError {
    /// Operation arrived with a sequence number other than the next expected.
    #[error("operation out of order: expected seq {expected}, got {actual}")]
    OutOfOrder {
        /// Next sequence number this side expects.
        expected: u64,
        /// Sequence number carried by the operation.
        actual: u64,
    },

    /// Operation acknowledges operations that were never generated.
    #[error("acknowledges {acked} operations but only {generated} were generated")]
    UnknownAcknowledgement {
        /// Acknowledged count carried by the operation.
        acked: u64,
        /// Operations this side has generated.
        generated: u64,
    },

    /// Acknowledged count went backwards.
    #[error("acknowledgement regressed from {previous} to {actual}")]
    AcknowledgementRegressed {
        /// Highest acknowledgement seen so far.
        previous: u64,
        /// Acknowledgement carried by the operation.
        actual: u64,
    },

    /// Sender is not registered for the document.
    #[error("{participant} is not registered for {path}")]
    UnknownParticipant {
        /// The unregistered sender.
        participant: ParticipantId,
        /// The document.
        path: ResourcePath,
    },
}
