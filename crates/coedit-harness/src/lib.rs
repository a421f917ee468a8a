//! Deterministic simulation harness for coedit sessions.
//!
//! A [`World`] wires one host (running the coordinating role) and any number
//! of guest [`Client`](coedit_client::Client)s together over FIFO links.
//! Delivery order is drawn from a seeded RNG and time is virtual, so every
//! failing interleaving is reproducible from its seed.
//!
//! # Model-Based Testing
//!
//! [`Operation`] derives `Arbitrary`. Property tests and the fuzzer turn raw
//! bytes into operation sequences, apply them to a world, drain every link,
//! and check convergence, per-sender ordering, and the absence of spurious
//! inconsistency flags.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod operation;
pub mod sim_env;
pub mod world;

pub use operation::{Operation, SmallText};
pub use sim_env::SimEnv;
pub use world::{HOST, Link, PROJECT, World};
