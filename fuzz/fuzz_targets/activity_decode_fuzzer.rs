//! Fuzz target for activity decoding and coordinator routing
//!
//! # Strategy
//!
//! - Raw bytes: arbitrary CBOR, truncated and malformed activities
//! - Decoded activities are routed through a live session coordinator
//!
//! # Invariants
//!
//! - Decoding NEVER panics; malformed input is an error
//! - A decoded activity re-encodes and decodes to itself
//! - Routing NEVER panics and never returns an untargeted activity to its
//!   source

#![no_main]

use coedit_proto::{Activity, ParticipantId};
use coedit_server::{SessionCoordinator, SessionRoster};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(activity) = Activity::decode(data) else {
        return;
    };

    let encoded = activity.encode().expect("decoded activity must re-encode");
    let decoded = Activity::decode(&encoded).expect("re-encoded activity must decode");
    assert_eq!(decoded, activity);

    let roster = SessionRoster::hosted_by(ParticipantId(1), ["proj".to_string()]);
    roster.add_participant(ParticipantId(2), ["proj".to_string()]);
    roster.add_participant(activity.source(), ["proj".to_string()]);
    let Ok(session) = SessionCoordinator::new(roster) else {
        return;
    };
    for participant in [ParticipantId(2), activity.source()] {
        session.participant_started_queuing(participant);
        session.participant_joined(participant);
    }

    let source = activity.source();
    let targeted = activity.target().is_some();
    for outgoing in session.transform_incoming(activity) {
        assert!(targeted || outgoing.recipient != source, "activity echoed to its source");
    }
});
