//! Fuzz target for whole simulated sessions
//!
//! # Strategy
//!
//! - Operation sequences: inserts, deletes, deliveries, checksum publication
//!   and time advances decoded from the corpus
//! - Participant count and seed also come from the corpus
//!
//! # Invariants
//!
//! - Every replica holds identical content once all links are drained
//! - Each participant receives edits in the coordinator's order
//! - Matching checksums NEVER flag a document
//! - NEVER panic on any operation sequence

#![no_main]

use arbitrary::Arbitrary;
use coedit_harness::{Operation, World};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct Session {
    seed: u64,
    guests: u8,
    ops: Vec<Operation>,
}

fuzz_target!(|session: Session| {
    let guests = usize::from(session.guests % 4) + 1;
    let Ok(mut world) = World::new(session.seed, guests, &[("a.txt", "fuzz"), ("b.txt", "")]) else {
        return;
    };

    for op in &session.ops {
        world.apply(op);
    }
    world.run_until_quiescent();

    assert!(world.divergent_documents().is_empty(), "replicas diverged");
    assert!(world.fifo_holds(), "per-sender order violated");
    assert!(world.inconsistent_participants().is_empty(), "spurious inconsistency");
});
