//! Star-topology convergence tests.
//!
//! Several client Jupiters talk to one `DocumentCoordinator` over FIFO links.
//! Edits, uplink deliveries and downlink deliveries are interleaved at random;
//! after every link drains, every replica must hold the same text.
//!
//! ```text
//!   client 0 ──up──▶ ┌─────────────┐ ──down──▶ client 0
//!   client 1 ──up──▶ │ coordinator │ ──down──▶ client 1
//!   client 2 ──up──▶ └─────────────┘ ──down──▶ client 2
//! ```

use std::collections::VecDeque;

use coedit_core::{DocumentCoordinator, Jupiter, Side};
use coedit_proto::{EditActivity, Operation, ParticipantId, ResourcePath};
use proptest::prelude::*;

const INITIAL: &str = "ab";

#[derive(Debug, Clone)]
enum Step {
    Insert { client: usize, at: usize, text: String },
    Delete { client: usize, at: usize, width: usize },
    DeliverUp { client: usize },
    DeliverDown { client: usize },
}

struct Replica {
    id: ParticipantId,
    jupiter: Jupiter,
    text: String,
    up: VecDeque<EditActivity>,
    down: VecDeque<EditActivity>,
}

struct Star {
    coordinator: DocumentCoordinator,
    replicas: Vec<Replica>,
}

fn path() -> ResourcePath {
    ResourcePath::new("proj", "doc.txt")
}

impl Star {
    fn new(clients: usize) -> Self {
        let ids: Vec<ParticipantId> = (1..=clients as u64).map(ParticipantId).collect();
        let replicas = ids
            .iter()
            .map(|&id| Replica {
                id,
                jupiter: Jupiter::new(Side::Client),
                text: INITIAL.to_string(),
                up: VecDeque::new(),
                down: VecDeque::new(),
            })
            .collect();
        Self { coordinator: DocumentCoordinator::with_participants(path(), ids), replicas }
    }

    fn local_edit(&mut self, client: usize, operation: Operation) {
        let replica = &mut self.replicas[client];
        operation.apply(&mut replica.text).unwrap();
        let timestamp = replica.jupiter.generate(operation.clone(), replica.id);
        replica.up.push_back(EditActivity { source: replica.id, path: path(), operation, timestamp });
    }

    fn step(&mut self, step: &Step) {
        match step {
            Step::Insert { client, at, text } => {
                let len = self.replicas[*client].text.chars().count();
                self.local_edit(*client, Operation::insert(at % (len + 1), text.clone()));
            },
            Step::Delete { client, at, width } => {
                let text = &self.replicas[*client].text;
                let len = text.chars().count();
                if len == 0 {
                    return;
                }
                let start = at % len;
                let removed: String = text.chars().skip(start).take(*width).collect();
                self.local_edit(*client, Operation::delete(start, removed));
            },
            Step::DeliverUp { client } => self.deliver_up(*client),
            Step::DeliverDown { client } => self.deliver_down(*client),
        }
    }

    fn deliver_up(&mut self, client: usize) {
        let Some(edit) = self.replicas[client].up.pop_front() else {
            return;
        };
        let relayed = self.coordinator.transform(&edit).unwrap();
        for replica in &mut self.replicas {
            if let Some(edit) = relayed.get(&replica.id) {
                replica.down.push_back(edit.clone());
            }
        }
    }

    fn deliver_down(&mut self, client: usize) {
        let replica = &mut self.replicas[client];
        let Some(edit) = replica.down.pop_front() else {
            return;
        };
        let operation = replica.jupiter.receive(edit.operation, edit.source, edit.timestamp).unwrap();
        operation.apply(&mut replica.text).unwrap();
    }

    fn drain(&mut self) {
        while self.replicas.iter().any(|r| !r.up.is_empty() || !r.down.is_empty()) {
            for client in 0..self.replicas.len() {
                self.deliver_up(client);
            }
            for client in 0..self.replicas.len() {
                self.deliver_down(client);
            }
        }
    }
}

fn step_strategy(clients: usize) -> impl Strategy<Value = Step> {
    prop_oneof![
        3 => (0..clients, 0usize..16, "[A-Z]{1,3}")
            .prop_map(|(client, at, text)| Step::Insert { client, at, text }),
        2 => (0..clients, 0usize..16, 1usize..4)
            .prop_map(|(client, at, width)| Step::Delete { client, at, width }),
        2 => (0..clients).prop_map(|client| Step::DeliverUp { client }),
        2 => (0..clients).prop_map(|client| Step::DeliverDown { client }),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn replicas_converge_after_quiescence(steps in prop::collection::vec(step_strategy(3), 0..60)) {
        let mut star = Star::new(3);
        for step in &steps {
            star.step(step);
        }
        star.drain();

        let reference = star.replicas[0].text.clone();
        for replica in &star.replicas {
            prop_assert_eq!(&replica.text, &reference);
            prop_assert!(replica.up.is_empty() && replica.down.is_empty());
        }
    }
}

#[test]
fn insert_inside_concurrently_deleted_range() {
    // Participant 1 inserts "X" between "a" and "b" while participant 2
    // deletes "b"; everyone ends with "aX".
    let mut star = Star::new(2);
    star.local_edit(0, Operation::insert(1, "X"));
    star.local_edit(1, Operation::delete(1, "b"));
    star.drain();

    assert_eq!(star.replicas[0].text, "aX");
    assert_eq!(star.replicas[1].text, "aX");
}

#[test]
fn delete_spanning_concurrent_insert() {
    let mut star = Star::new(2);
    star.local_edit(0, Operation::delete(0, "ab"));
    star.local_edit(1, Operation::insert(1, "X"));
    star.drain();

    assert_eq!(star.replicas[0].text, "X");
    assert_eq!(star.replicas[1].text, "X");
}

#[test]
fn concurrent_inserts_at_same_offset_order_by_participant() {
    let mut star = Star::new(3);
    star.local_edit(2, Operation::insert(0, "C"));
    star.local_edit(0, Operation::insert(0, "A"));
    star.local_edit(1, Operation::insert(0, "B"));
    star.drain();

    for replica in &star.replicas {
        assert_eq!(replica.text, "ABCab");
    }
}

#[test]
fn coordinator_history_stays_bounded_once_acknowledged() {
    let mut star = Star::new(2);
    for i in 0..10 {
        star.local_edit(0, Operation::insert(i, "x"));
    }
    star.drain();
    // Participant 2 acknowledges everything with its next edit.
    star.local_edit(1, Operation::insert(0, "y"));
    star.drain();

    assert_eq!(star.coordinator.pending_operations(ParticipantId(2)), Some(0));
    assert_eq!(star.replicas[0].text, star.replicas[1].text);
}
