//! Session coordinator routing and membership tests.

use std::{sync::Arc, thread};

use coedit_proto::{
    Activity, EditActivity, FileActivity, FileKind, Operation, ParticipantId, ProgressActivity,
    RecoveryId, RecoveryRequest, ResourcePath, Timestamp,
};
use coedit_server::{
    Outgoing, ParticipantState, SessionCoordinator, SessionError, SessionRoster,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

const HOST: ParticipantId = ParticipantId(1);
const P1: ParticipantId = ParticipantId(2);
const P2: ParticipantId = ParticipantId(3);

fn roster() -> SessionRoster {
    let roster = SessionRoster::hosted_by(HOST, ["proj".to_string()]);
    roster.add_participant(P1, ["proj".to_string()]);
    roster.add_participant(P2, ["proj".to_string()]);
    roster
}

fn join(session: &SessionCoordinator<SessionRoster>, participants: &[ParticipantId]) {
    for &participant in participants {
        session.participant_started_queuing(participant);
        session.participant_joined(participant);
    }
}

fn session() -> SessionCoordinator<SessionRoster> {
    let session = SessionCoordinator::new(roster()).unwrap();
    join(&session, &[P1, P2]);
    session
}

fn path(name: &str) -> ResourcePath {
    ResourcePath::new("proj", name)
}

fn edit(source: ParticipantId, name: &str, operation: Operation, ts: (u64, u64)) -> Activity {
    Activity::Edit(EditActivity {
        source,
        path: path(name),
        operation,
        timestamp: Timestamp::new(ts.0, ts.1),
    })
}

fn edit_for(out: &[Outgoing], recipient: ParticipantId) -> Option<&EditActivity> {
    out.iter().find(|o| o.recipient == recipient).and_then(|o| match &o.activity {
        Activity::Edit(edit) => Some(edit),
        _ => None,
    })
}

fn recipients(out: &[Outgoing]) -> Vec<ParticipantId> {
    out.iter().map(|o| o.recipient).collect()
}

#[test]
fn concurrent_insert_and_delete_converge() {
    // Everyone starts with "ab". P1 inserts "X" at 0, P2 deletes "b" at 1,
    // both before seeing the other.
    let session = session();

    let from_p1 = session.transform_incoming(edit(P1, "a.txt", Operation::insert(0, "X"), (1, 0)));
    let from_p2 = session.transform_incoming(edit(P2, "a.txt", Operation::delete(1, "b"), (1, 0)));

    let to_p2 = edit_for(&from_p1, P2).unwrap();
    assert_eq!(to_p2.operation, Operation::insert(0, "X"));
    assert_eq!(to_p2.source, P1);

    let to_p1 = edit_for(&from_p2, P1).unwrap();
    assert_eq!(to_p1.operation, Operation::delete(2, "b"));
    assert_eq!(to_p1.timestamp, Timestamp::new(1, 1));

    // Replay at each site.
    let mut at_p1 = String::from("ab");
    Operation::insert(0, "X").apply(&mut at_p1).unwrap();
    to_p1.operation.apply(&mut at_p1).unwrap();

    let mut at_p2 = String::from("ab");
    Operation::delete(1, "b").apply(&mut at_p2).unwrap();
    to_p2.operation.apply(&mut at_p2).unwrap();

    let mut at_host = String::from("ab");
    edit_for(&from_p1, HOST).unwrap().operation.apply(&mut at_host).unwrap();
    edit_for(&from_p2, HOST).unwrap().operation.apply(&mut at_host).unwrap();

    assert_eq!(at_p1, "Xa");
    assert_eq!(at_p2, "Xa");
    assert_eq!(at_host, "Xa");
}

#[test]
fn second_negotiation_conflicts() {
    let session = session();
    session.add_user_in_negotiation(P1, [path("a.txt")]).unwrap();

    let err = session.add_user_in_negotiation(P1, [path("b.txt")]).unwrap_err();
    assert_eq!(err, SessionError::NegotiationConflict { participant: P1 });

    session.resource_received(P1, &path("a.txt")).unwrap();
    session.add_user_in_negotiation(P1, [path("b.txt")]).unwrap();
}

#[test]
fn resource_without_negotiation_is_rejected() {
    let session = session();
    let err = session.resource_received(P1, &path("a.txt")).unwrap_err();
    assert_eq!(err, SessionError::NotInNegotiation { participant: P1 });
}

#[test]
fn negotiating_participant_is_excluded_until_resource_arrives() {
    let session = session();
    session.add_user_in_negotiation(P1, [path("a.txt")]).unwrap();

    let out = session.transform_incoming(edit(HOST, "a.txt", Operation::insert(0, "x"), (1, 0)));
    assert_eq!(recipients(&out), vec![P2]);
    assert_eq!(session.document_participants(&path("a.txt")), vec![HOST, P2]);

    session.resource_received(P1, &path("a.txt")).unwrap();
    assert_eq!(session.document_participants(&path("a.txt")), vec![HOST, P1, P2]);
    assert_eq!(session.participant_state(P1), ParticipantState::FullyJoined);
}

#[test]
fn negotiation_registers_on_held_documents() {
    let roster = SessionRoster::hosted_by(HOST, ["proj".to_string()]);
    let session = SessionCoordinator::new(roster).unwrap();
    session.transform_incoming(edit(HOST, "a.txt", Operation::insert(0, "x"), (1, 0)));
    session.transform_incoming(edit(HOST, "b.txt", Operation::insert(0, "x"), (1, 0)));

    session.membership().add_participant(P1, ["proj".to_string()]);
    session.add_user_in_negotiation(P1, [path("b.txt")]).unwrap();

    assert_eq!(session.document_participants(&path("a.txt")), vec![HOST, P1]);
    assert_eq!(session.document_participants(&path("b.txt")), vec![HOST]);
}

#[test]
fn started_queuing_skips_missing_paths() {
    let roster = SessionRoster::hosted_by(HOST, ["proj".to_string()]);
    let session = SessionCoordinator::new(roster).unwrap();
    session.transform_incoming(edit(HOST, "a.txt", Operation::insert(0, "x"), (1, 0)));
    session.transform_incoming(edit(HOST, "b.txt", Operation::insert(0, "x"), (1, 0)));

    session.membership().add_participant(P1, ["proj".to_string()]);
    session.add_user_in_negotiation(P1, [path("a.txt"), path("b.txt")]).unwrap();
    session.participant_started_queuing(P1);

    assert_eq!(session.document_participants(&path("a.txt")), vec![HOST]);
    session.resource_received(P1, &path("b.txt")).unwrap();
    assert_eq!(session.document_participants(&path("b.txt")), vec![HOST, P1]);
    assert!(matches!(
        session.participant_state(P1),
        ParticipantState::InNegotiation { missing } if missing.len() == 1
    ));
}

#[test]
fn lazy_coordinator_skips_participants_without_the_project() {
    let roster = roster();
    roster.add_participant(ParticipantId(9), ["other".to_string()]);
    let session = SessionCoordinator::new(roster).unwrap();
    join(&session, &[P1, P2, ParticipantId(9)]);

    session.transform_incoming(edit(P1, "a.txt", Operation::insert(0, "x"), (1, 0)));
    assert_eq!(session.document_participants(&path("a.txt")), vec![HOST, P1, P2]);
}

#[test]
fn participants_still_outside_the_session_are_not_registered() {
    let session = SessionCoordinator::new(roster()).unwrap();
    join(&session, &[P1]);

    let out = session.transform_incoming(edit(P1, "a.txt", Operation::insert(0, "x"), (1, 0)));
    assert_eq!(recipients(&out), vec![HOST]);
    assert_eq!(session.participant_state(P2), ParticipantState::NotJoined);
    assert_eq!(session.document_participants(&path("a.txt")), vec![HOST, P1]);
}

#[test]
fn file_removal_drops_document_and_is_forwarded() {
    let session = session();
    session.transform_incoming(edit(P1, "a.txt", Operation::insert(0, "x"), (1, 0)));
    session.transform_incoming(edit(P1, "a.txt", Operation::insert(1, "y"), (2, 0)));
    assert!(session.has_document(&path("a.txt")));

    let removal = Activity::File(FileActivity { source: P1, path: path("a.txt"), kind: FileKind::Removed });
    let out = session.transform_incoming(removal.clone());
    assert_eq!(recipients(&out), vec![HOST, P2]);
    assert!(out.iter().all(|o| o.activity == removal));
    assert!(!session.has_document(&path("a.txt")));

    // A recreated file starts a fresh coordinator: sequence numbers restart.
    let out = session.transform_incoming(edit(P2, "a.txt", Operation::insert(0, "z"), (1, 0)));
    assert_eq!(edit_for(&out, P1).unwrap().timestamp, Timestamp::new(1, 0));
}

#[test]
fn targeted_activities_reach_only_their_target() {
    let session = session();

    let request = Activity::RecoveryRequest(RecoveryRequest {
        source: P1,
        target: HOST,
        paths: vec![path("a.txt")],
        recovery_id: RecoveryId(5),
    });
    assert_eq!(recipients(&session.transform_incoming(request)), vec![HOST]);

    let progress = |target| {
        Activity::Progress(ProgressActivity {
            source: P1,
            target,
            progress_id: "sync".into(),
            worked: 1,
            total: 3,
            message: "copying".into(),
        })
    };
    assert_eq!(recipients(&session.transform_incoming(progress(Some(P2)))), vec![P2]);
    assert_eq!(recipients(&session.transform_incoming(progress(None))), vec![HOST, P2]);
}

#[test]
fn departed_participant_leaves_every_document() {
    let session = session();
    session.transform_incoming(edit(HOST, "a.txt", Operation::insert(0, "x"), (1, 0)));
    session.transform_incoming(edit(HOST, "b.txt", Operation::insert(0, "x"), (1, 0)));

    session.participant_left(P2);
    assert_eq!(session.document_participants(&path("a.txt")), vec![HOST, P1]);
    assert_eq!(session.document_participants(&path("b.txt")), vec![HOST, P1]);
    assert_eq!(session.participant_state(P2), ParticipantState::Left);

    // Hooks on a departed participant change nothing.
    session.participant_started_queuing(P2);
    assert_eq!(session.document_participants(&path("a.txt")), vec![HOST, P1]);

    let out = session.transform_incoming(edit(P1, "a.txt", Operation::insert(0, "y"), (1, 1)));
    assert_eq!(recipients(&out), vec![HOST]);
}

#[test]
fn edits_on_distinct_documents_proceed_in_parallel() {
    let session = Arc::new(session());
    let writers = [HOST, P1, P2];

    thread::scope(|scope| {
        for (i, &writer) in writers.iter().enumerate() {
            let session = Arc::clone(&session);
            scope.spawn(move || {
                let mut rng = ChaCha8Rng::seed_from_u64(i as u64);
                let name = format!("doc-{i}.txt");
                let mut len = 0usize;
                for seq in 1..=50u64 {
                    let at = rng.gen_range(0..=len);
                    let out = session.transform_incoming(edit(writer, &name, Operation::insert(at, "k"), (seq, 0)));
                    assert_eq!(out.len(), writers.len() - 1);
                    len += 1;
                }
            });
        }
    });

    for i in 0..writers.len() {
        assert!(session.has_document(&path(&format!("doc-{i}.txt"))));
    }
}
