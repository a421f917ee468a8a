//! Jupiter two-party synchronization.
//!
//! One `Jupiter` instance sits at each end of a client/coordinator pair for a
//! single document. Each side counts the operations it generated and the
//! operations it received; every outgoing operation carries both counts as a
//! [`Timestamp`]. On receipt, the operation is transformed against every
//! local operation the peer had not yet seen when it generated it.
//!
//! # Invariants
//!
//! - Sequence numbers are 1-based: the n-th generated operation carries
//!   `seq == n`
//! - Pending operations are exactly the generated operations the peer has
//!   not acknowledged yet, oldest first
//! - Acknowledgements never go backwards
//!
//! Checksums reuse the clock without advancing it: a checksum taken after
//! `n` local operations carries `seq == n`, see [`Jupiter::is_current`].

use std::collections::VecDeque;

use coedit_proto::{Operation, ParticipantId, Timestamp};

use crate::{TransformationError, transform::transform};

/// Which end of the pair this instance represents.
///
/// Breaks ties between operations authored by the same participant: the
/// operation generated on the client side wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// Instance on a participant's machine.
    Client,
    /// Per-participant proxy on the coordinator.
    Coordinator,
}

#[derive(Debug, Clone)]
struct PendingOperation {
    seq: u64,
    origin: ParticipantId,
    operation: Operation,
}

/// Two-party vector-clock state machine for one document.
#[derive(Debug, Clone)]
pub struct Jupiter {
    side: Side,
    generated: u64,
    received: u64,
    acknowledged: u64,
    pending: VecDeque<PendingOperation>,
}

impl Jupiter {
    /// Fresh state with both counters at zero.
    pub fn new(side: Side) -> Self {
        Self { side, generated: 0, received: 0, acknowledged: 0, pending: VecDeque::new() }
    }

    /// End of the pair this instance represents.
    pub fn side(&self) -> Side {
        self.side
    }

    /// Record a locally generated operation and stamp it for sending.
    ///
    /// `origin` is the participant who authored the edit. On the coordinator
    /// this differs from the peer when relaying another participant's edit.
    pub fn generate(&mut self, operation: Operation, origin: ParticipantId) -> Timestamp {
        self.generated += 1;
        self.pending.push_back(PendingOperation { seq: self.generated, origin, operation });
        Timestamp::new(self.generated, self.received)
    }

    /// Accept an operation from the peer, returning it transformed into the
    /// local document state.
    ///
    /// # Errors
    ///
    /// - `OutOfOrder` if `timestamp.seq` is not the next expected sequence
    /// - `UnknownAcknowledgement` if it acknowledges more than was generated
    /// - `AcknowledgementRegressed` if it acknowledges less than a previous
    ///   operation did
    ///
    /// State is left untouched on error.
    pub fn receive(
        &mut self,
        operation: Operation,
        origin: ParticipantId,
        timestamp: Timestamp,
    ) -> Result<Operation, TransformationError> {
        let expected = self.received + 1;
        if timestamp.seq != expected {
            return Err(TransformationError::OutOfOrder { expected, actual: timestamp.seq });
        }
        if timestamp.ack > self.generated {
            return Err(TransformationError::UnknownAcknowledgement {
                acked: timestamp.ack,
                generated: self.generated,
            });
        }
        if timestamp.ack < self.acknowledged {
            return Err(TransformationError::AcknowledgementRegressed {
                previous: self.acknowledged,
                actual: timestamp.ack,
            });
        }

        self.acknowledged = timestamp.ack;
        while self.pending.front().is_some_and(|p| p.seq <= timestamp.ack) {
            self.pending.pop_front();
        }

        let mut incoming = operation;
        for pending in &mut self.pending {
            let incoming_first = if origin == pending.origin {
                self.side == Side::Coordinator
            } else {
                origin < pending.origin
            };
            let (transformed, rebased) = transform(&incoming, &pending.operation, incoming_first);
            incoming = transformed;
            pending.operation = rebased;
        }

        self.received += 1;
        Ok(incoming)
    }

    /// Clock value for a checksum of the current local state.
    pub fn timestamp(&self) -> Timestamp {
        Timestamp::new(self.generated, self.received)
    }

    /// True iff a checksum stamped `timestamp` by the peer describes the
    /// same history this side currently holds.
    pub fn is_current(&self, timestamp: Timestamp) -> bool {
        timestamp.seq == self.received && timestamp.ack == self.generated
    }

    /// Operations generated so far.
    pub fn generated(&self) -> u64 {
        self.generated
    }

    /// Operations received so far.
    pub fn received(&self) -> u64 {
        self.received
    }

    /// Generated operations the peer has not acknowledged yet.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}
