//! Server error types.

use coedit_proto::ParticipantId;
use thiserror::Error;

use crate::replay::ReplayError;

/// Errors from session coordinator hooks.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// Coordinator constructed on a process that does not coordinate.
    #[error("session coordinator requires the coordinating role")]
    NotCoordinator,

    /// A negotiation is already in flight for this participant.
    #[error("{participant} is already in a negotiation")]
    NegotiationConflict {
        /// Participant with the pending negotiation.
        participant: ParticipantId,
    },

    /// Resource reported for a participant that is not negotiating.
    #[error("{participant} is not in a negotiation")]
    NotInNegotiation {
        /// Participant the resource was reported for.
        participant: ParticipantId,
    },
}

/// Errors surfaced by the server binary.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Invalid command line or configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Trace replay failed.
    #[error("replay failed: {0}")]
    Replay(#[from] ReplayError),

    /// Session setup failed.
    #[error("session error: {0}")]
    Session(#[from] SessionError),
}
