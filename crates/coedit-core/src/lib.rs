//! coedit core
//!
//! Pure, I/O-free building blocks of a Jupiter-style operational
//! transformation session.
//!
//! ## Architecture
//!
//! ```text
//! coedit-core
//!   ├─ transform           (inclusion transformation of text operations)
//!   ├─ Jupiter             (two-party vector-clock state machine)
//!   ├─ DocumentCoordinator (one Jupiter per participant for one path)
//!   ├─ ResourceGate        (order-preserving deferral of activities)
//!   ├─ ConsistencyWatchdog (checksum comparison + recovery bookkeeping)
//!   └─ Environment         (time and randomness)
//! ```
//!
//! Nothing in this crate touches the network or the disk. Callers feed
//! activities in and route whatever comes out.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod consistency;
pub mod document;
pub mod env;
pub mod error;
pub mod gate;
pub mod jupiter;
pub mod transform;

pub use consistency::{ConsistencyWatchdog, Recovery, RecoveryOutcome, Verdict};
pub use document::DocumentCoordinator;
pub use env::Environment;
pub use error::TransformationError;
pub use gate::ResourceGate;
pub use jupiter::{Jupiter, Side};
