//! coedit participant
//!
//! Action-based state machine for a participant of a coedit session.
//!
//! ## Architecture
//!
//! ```text
//! Client
//!   ├─ Replica per document (content + client-side Jupiter)
//!   ├─ ResourceGate        (holds activities while joining)
//!   └─ ConsistencyWatchdog (checksums, recovery)
//! ```
//!
//! The client performs no I/O. Drivers feed [`ClientEvent`]s and execute the
//! returned [`ClientAction`]s, sending activities to the coordinator in order.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod client;
mod error;
mod event;

pub use client::Client;
pub use coedit_core::Environment;
pub use error::ClientError;
pub use event::{ClientAction, ClientConfig, ClientEvent};
