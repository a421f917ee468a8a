//! Session activities.
//!
//! An [`Activity`] is any discrete event a participant emits into the
//! session. The coordinator dispatches on the variant exactly once, at its
//! entry point; everything downstream works with the concrete payload types.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::{Operation, ParticipantId, ProtoError, RecoveryId, ResourcePath, Timestamp};

/// A text edit on one shared document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditActivity {
    /// Author of the edit. Relayed copies keep the original author.
    pub source: ParticipantId,
    /// Document the edit applies to.
    pub path: ResourcePath,
    /// The mutation, in the coordinates of the receiving side.
    pub operation: Operation,
    /// Vector time of the sending side of the Jupiter pair.
    pub timestamp: Timestamp,
}

/// SHA-256 digest of a document's UTF-8 content.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash(pub [u8; 32]);

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({self})")
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0[..8] {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Checksum of one document as seen by `source`.
///
/// The payload (`hash`, `length`, `recovery_id`) is never altered in transit;
/// only `timestamp` is restamped per recipient by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecksumReport {
    /// Participant whose content was hashed.
    pub source: ParticipantId,
    /// Document the checksum covers.
    pub path: ResourcePath,
    /// Content digest.
    pub hash: ContentHash,
    /// Content length in chars.
    pub length: u64,
    /// Recovery session this report belongs to, if any.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub recovery_id: Option<RecoveryId>,
    /// Vector time at which the checksum was taken.
    pub timestamp: Timestamp,
}

impl ChecksumReport {
    /// Copy of this report carrying a different timestamp.
    pub fn with_timestamp(&self, timestamp: Timestamp) -> Self {
        Self { timestamp, ..self.clone() }
    }
}

/// What happened to a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileKind {
    /// File was created with the given content.
    Created {
        /// Initial content.
        content: String,
    },
    /// File was removed from the session.
    Removed,
    /// Content was replaced wholesale as part of a recovery.
    Replaced {
        /// Authoritative content.
        content: String,
        /// Recovery session this replacement belongs to.
        recovery_id: RecoveryId,
    },
}

/// File lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileActivity {
    /// Participant that caused the event.
    pub source: ParticipantId,
    /// Affected file.
    pub path: ResourcePath,
    /// Event kind.
    pub kind: FileKind,
}

impl FileActivity {
    /// True for file removals.
    pub fn is_removal(&self) -> bool {
        matches!(self.kind, FileKind::Removed)
    }
}

/// Participant asks the coordinator to resend authoritative content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryRequest {
    /// Participant that detected the inconsistency.
    pub source: ParticipantId,
    /// Coordinating participant.
    pub target: ParticipantId,
    /// Documents to recover.
    pub paths: Vec<ResourcePath>,
    /// Identifier correlating the whole exchange.
    pub recovery_id: RecoveryId,
}

/// Coordinator signals that every replacement of a recovery has been sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryComplete {
    /// Coordinating participant.
    pub source: ParticipantId,
    /// Participant being recovered.
    pub target: ParticipantId,
    /// Recovery session that finished.
    pub recovery_id: RecoveryId,
}

/// Progress notification for a long-running remote task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressActivity {
    /// Participant reporting progress.
    pub source: ParticipantId,
    /// Addressee; `None` broadcasts to the session.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub target: Option<ParticipantId>,
    /// Identifier of the task.
    pub progress_id: String,
    /// Units completed.
    pub worked: u32,
    /// Units in total.
    pub total: u32,
    /// Human-readable status line.
    pub message: String,
}

/// Any session event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Activity {
    /// Text edit.
    Edit(EditActivity),
    /// Document checksum.
    Checksum(ChecksumReport),
    /// File lifecycle event.
    File(FileActivity),
    /// Recovery request from a participant.
    RecoveryRequest(RecoveryRequest),
    /// Recovery finished.
    RecoveryComplete(RecoveryComplete),
    /// Progress notification.
    Progress(ProgressActivity),
}

impl Activity {
    /// Participant that emitted the activity.
    pub fn source(&self) -> ParticipantId {
        match self {
            Self::Edit(a) => a.source,
            Self::Checksum(a) => a.source,
            Self::File(a) => a.source,
            Self::RecoveryRequest(a) => a.source,
            Self::RecoveryComplete(a) => a.source,
            Self::Progress(a) => a.source,
        }
    }

    /// Resource the activity refers to, for resource activities.
    pub fn path(&self) -> Option<&ResourcePath> {
        match self {
            Self::Edit(a) => Some(&a.path),
            Self::Checksum(a) => Some(&a.path),
            Self::File(a) => Some(&a.path),
            Self::RecoveryRequest(_) | Self::RecoveryComplete(_) | Self::Progress(_) => None,
        }
    }

    /// Addressee of targeted activities.
    pub fn target(&self) -> Option<ParticipantId> {
        match self {
            Self::RecoveryRequest(a) => Some(a.target),
            Self::RecoveryComplete(a) => Some(a.target),
            Self::Progress(a) => a.target,
            Self::Edit(_) | Self::Checksum(_) | Self::File(_) => None,
        }
    }

    /// Short name of the variant, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Edit(_) => "edit",
            Self::Checksum(_) => "checksum",
            Self::File(_) => "file",
            Self::RecoveryRequest(_) => "recovery-request",
            Self::RecoveryComplete(_) => "recovery-complete",
            Self::Progress(_) => "progress",
        }
    }

    /// Encode as CBOR.
    pub fn encode(&self) -> Result<Bytes, ProtoError> {
        let mut buf = Vec::new();
        ciborium::ser::into_writer(self, &mut buf).map_err(|e| ProtoError::Encode(e.to_string()))?;
        Ok(Bytes::from(buf))
    }

    /// Decode from CBOR.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtoError> {
        ciborium::de::from_reader(bytes).map_err(|e| ProtoError::Decode(e.to_string()))
    }
}

impl From<EditActivity> for Activity {
    fn from(activity: EditActivity) -> Self {
        Self::Edit(activity)
    }
}

impl From<ChecksumReport> for Activity {
    fn from(report: ChecksumReport) -> Self {
        Self::Checksum(report)
    }
}

impl From<FileActivity> for Activity {
    fn from(activity: FileActivity) -> Self {
        Self::File(activity)
    }
}
