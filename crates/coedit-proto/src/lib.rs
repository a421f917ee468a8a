//! coedit protocol types
//!
//! Wire-level vocabulary shared by the coordinator, the participants and the
//! tooling around them. Everything here is plain data: identities, resource
//! paths, text operations, Jupiter timestamps and the [`Activity`] sum type
//! that travels between session members.
//!
//! # Encoding
//!
//! Activities are encoded as CBOR (via `ciborium`). The encoding is
//! self-describing so a captured session trace can be replayed by tooling
//! built against a newer version of this crate.
//!
//! # Offsets
//!
//! All text offsets count Unicode scalar values (Rust `char`s), never bytes.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod activity;
mod error;
mod ids;
mod operation;
mod timestamp;

pub use activity::{
    Activity, ChecksumReport, ContentHash, EditActivity, FileActivity, FileKind, ProgressActivity,
    RecoveryComplete, RecoveryRequest,
};
pub use error::ProtoError;
pub use ids::{ParticipantId, RecoveryId, ResourcePath};
pub use operation::Operation;
pub use timestamp::Timestamp;
