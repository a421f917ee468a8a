//! coedit coordinating role.
//!
//! This crate runs on the participant that coordinates a session:
//! - Routing and transformation of every incoming activity
//! - Document coordinator lifecycle and participant onboarding
//! - The coordinator half of checksum-driven recovery
//! - Offline replay of captured session traces
//!
//! ## Architecture
//!
//! ```text
//! coedit-server
//!   ├─ SessionCoordinator  (routing + membership hooks)
//!   │    └─ DocumentCoordinator per path (coedit-core)
//!   ├─ RecoveryCoordinator (replacement content + tagged checksums)
//!   ├─ SessionRoster       (in-memory SessionMembership)
//!   └─ replay              (trace → routed output)
//! ```
//!
//! The coordinator performs no I/O. Callers deliver its [`Outgoing`] items
//! over per-participant FIFO links.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod error;
pub mod membership;
pub mod recovery;
pub mod replay;
pub mod session;

pub use error::{ServerError, SessionError};
pub use membership::{SessionMembership, SessionRoster};
pub use recovery::{ContentSource, RecoveryCoordinator};
pub use replay::{ReplayConfig, ReplayError, ReplaySummary, TraceEvent};
pub use session::{Outgoing, ParticipantState, SessionCoordinator};
