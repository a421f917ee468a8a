//! Jupiter vector time.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Two-party vector clock attached to edits and checksum reports.
///
/// For an edit, `seq` is the 1-based number of the operation among those its
/// sender generated for this document pair, and `ack` counts the operations
/// the sender had received from the other side when generating it.
///
/// For a checksum report, `seq` is the number of operations generated so far
/// (no increment), so a report is current for a receiver exactly when both
/// counters match the receiver's own view.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Timestamp {
    /// Sender-side operation count.
    pub seq: u64,
    /// Operations received from the other side.
    pub ack: u64,
}

impl Timestamp {
    /// Create a timestamp.
    pub fn new(seq: u64, ack: u64) -> Self {
        Self { seq, ack }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{})", self.seq, self.ack)
    }
}
