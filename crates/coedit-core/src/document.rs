//! Per-document coordination.
//!
//! The coordinator keeps one [`Jupiter`] proxy per participant of a document.
//! An incoming edit is received on the sender's proxy, which rebases it onto
//! the coordinator's copy of the history; the result is then generated on
//! every other proxy, yielding one individually stamped edit per recipient.
//!
//! Recipients are kept in a `BTreeMap` so fan-out order is deterministic.

use std::collections::BTreeMap;

use coedit_proto::{ChecksumReport, EditActivity, ParticipantId, ResourcePath};

use crate::{
    TransformationError,
    jupiter::{Jupiter, Side},
};

/// Coordinator-side state for one shared document.
#[derive(Debug, Clone)]
pub struct DocumentCoordinator {
    path: ResourcePath,
    proxies: BTreeMap<ParticipantId, Jupiter>,
}

impl DocumentCoordinator {
    /// Coordinator with no participants.
    pub fn new(path: ResourcePath) -> Self {
        Self { path, proxies: BTreeMap::new() }
    }

    /// Coordinator with a fresh proxy for each of `participants`.
    pub fn with_participants(
        path: ResourcePath,
        participants: impl IntoIterator<Item = ParticipantId>,
    ) -> Self {
        let mut document = Self::new(path);
        for participant in participants {
            document.add_participant(participant);
        }
        document
    }

    /// The document this coordinator serves.
    pub fn path(&self) -> &ResourcePath {
        &self.path
    }

    /// Register `participant`. Existing proxy state is kept.
    ///
    /// Returns `true` if the participant was not registered before.
    pub fn add_participant(&mut self, participant: ParticipantId) -> bool {
        if self.proxies.contains_key(&participant) {
            return false;
        }
        self.proxies.insert(participant, Jupiter::new(Side::Coordinator));
        tracing::debug!(path = %self.path, %participant, "participant added to document");
        true
    }

    /// Unregister `participant` and drop its proxy.
    pub fn remove_participant(&mut self, participant: ParticipantId) -> bool {
        let removed = self.proxies.remove(&participant).is_some();
        if removed {
            tracing::debug!(path = %self.path, %participant, "participant removed from document");
        }
        removed
    }

    /// True if `participant` has a proxy on this document.
    pub fn contains(&self, participant: ParticipantId) -> bool {
        self.proxies.contains_key(&participant)
    }

    /// Registered participants in ascending id order.
    pub fn participants(&self) -> impl Iterator<Item = ParticipantId> + '_ {
        self.proxies.keys().copied()
    }

    /// Replace the proxy of `participant` with a fresh one.
    ///
    /// Used after the participant's copy was overwritten wholesale.
    /// Returns `false` if the participant is not registered.
    pub fn reset(&mut self, participant: ParticipantId) -> bool {
        match self.proxies.get_mut(&participant) {
            Some(proxy) => {
                *proxy = Jupiter::new(Side::Coordinator);
                tracing::debug!(path = %self.path, %participant, "document proxy reset");
                true
            },
            None => false,
        }
    }

    /// Unacknowledged operations buffered for `participant`.
    pub fn pending_operations(&self, participant: ParticipantId) -> Option<usize> {
        self.proxies.get(&participant).map(Jupiter::pending)
    }

    /// Rebase `edit` and produce one stamped copy for every other
    /// participant.
    ///
    /// The relayed edits keep the original author as `source`.
    ///
    /// # Errors
    ///
    /// - `UnknownParticipant` if the sender has no proxy
    /// - any error of [`Jupiter::receive`]; no proxy is modified
    pub fn transform(
        &mut self,
        edit: &EditActivity,
    ) -> Result<BTreeMap<ParticipantId, EditActivity>, TransformationError> {
        let source = edit.source;
        let proxy = self.proxies.get_mut(&source).ok_or_else(|| {
            TransformationError::UnknownParticipant { participant: source, path: self.path.clone() }
        })?;

        let operation = proxy.receive(edit.operation.clone(), source, edit.timestamp)?;

        let mut outgoing = BTreeMap::new();
        for (&participant, proxy) in &mut self.proxies {
            if participant == source {
                continue;
            }
            let timestamp = proxy.generate(operation.clone(), source);
            outgoing.insert(participant, EditActivity {
                source,
                path: self.path.clone(),
                operation: operation.clone(),
                timestamp,
            });
        }

        tracing::trace!(
            path = %self.path,
            %source,
            timestamp = %edit.timestamp,
            recipients = outgoing.len(),
            "edit transformed"
        );
        Ok(outgoing)
    }

    /// Restamp a checksum for every other participant.
    ///
    /// Returns an empty map if the report does not describe the state the
    /// sender's proxy currently holds; such a report would compare unequal
    /// content and must not be forwarded.
    ///
    /// # Errors
    ///
    /// - `UnknownParticipant` if the sender has no proxy
    pub fn timestamp(
        &self,
        report: &ChecksumReport,
    ) -> Result<BTreeMap<ParticipantId, ChecksumReport>, TransformationError> {
        let source = report.source;
        let proxy = self.proxies.get(&source).ok_or_else(|| {
            TransformationError::UnknownParticipant { participant: source, path: self.path.clone() }
        })?;

        if !proxy.is_current(report.timestamp) {
            tracing::trace!(
                path = %self.path,
                %source,
                timestamp = %report.timestamp,
                "stale checksum dropped"
            );
            return Ok(BTreeMap::new());
        }

        Ok(self
            .proxies
            .iter()
            .filter(|(participant, _)| **participant != source)
            .map(|(&participant, proxy)| {
                (participant, report.with_timestamp(proxy.timestamp()))
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use coedit_proto::{ContentHash, Operation, Timestamp};

    use super::*;

    const HOST: ParticipantId = ParticipantId(1);
    const ALICE: ParticipantId = ParticipantId(2);
    const BOB: ParticipantId = ParticipantId(3);

    fn path() -> ResourcePath {
        ResourcePath::new("proj", "notes.txt")
    }

    fn edit(source: ParticipantId, operation: Operation, timestamp: Timestamp) -> EditActivity {
        EditActivity { source, path: path(), operation, timestamp }
    }

    fn checksum(source: ParticipantId, timestamp: Timestamp) -> ChecksumReport {
        ChecksumReport {
            source,
            path: path(),
            hash: ContentHash([0; 32]),
            length: 0,
            recovery_id: None,
            timestamp,
        }
    }

    #[test]
    fn fans_out_to_everyone_but_the_sender() {
        let mut doc = DocumentCoordinator::with_participants(path(), [HOST, ALICE, BOB]);

        let out = doc.transform(&edit(ALICE, Operation::insert(0, "a"), Timestamp::new(1, 0))).unwrap();

        assert_eq!(out.keys().copied().collect::<Vec<_>>(), vec![HOST, BOB]);
        for relayed in out.values() {
            assert_eq!(relayed.source, ALICE);
            assert_eq!(relayed.operation, Operation::insert(0, "a"));
            assert_eq!(relayed.timestamp, Timestamp::new(1, 0));
        }
    }

    #[test]
    fn unknown_sender_is_rejected() {
        let mut doc = DocumentCoordinator::with_participants(path(), [HOST]);
        let err = doc.transform(&edit(BOB, Operation::NoOp, Timestamp::new(1, 0))).unwrap_err();
        assert!(matches!(err, TransformationError::UnknownParticipant { participant: BOB, .. }));
    }

    #[test]
    fn failed_receive_sends_nothing() {
        let mut doc = DocumentCoordinator::with_participants(path(), [HOST, ALICE]);
        let result = doc.transform(&edit(ALICE, Operation::insert(0, "a"), Timestamp::new(2, 0)));
        assert!(result.is_err());
        assert_eq!(doc.pending_operations(HOST), Some(0));
    }

    #[test]
    fn concurrent_edits_are_rebased() {
        let mut doc = DocumentCoordinator::with_participants(path(), [HOST, ALICE, BOB]);

        // Both start from "ab"; Alice's edit arrives first.
        let from_alice =
            doc.transform(&edit(ALICE, Operation::insert(0, "X"), Timestamp::new(1, 0))).unwrap();
        let from_bob = doc.transform(&edit(BOB, Operation::delete(0, "a"), Timestamp::new(1, 0))).unwrap();

        // Bob had not seen Alice's insert; his delete shifts right.
        assert_eq!(from_bob[&ALICE].operation, Operation::delete(1, "a"));
        assert_eq!(from_bob[&ALICE].timestamp, Timestamp::new(1, 1));
        assert_eq!(from_alice[&BOB].timestamp, Timestamp::new(1, 0));
    }

    #[test]
    fn add_participant_keeps_existing_state() {
        let mut doc = DocumentCoordinator::with_participants(path(), [HOST, ALICE]);
        doc.transform(&edit(HOST, Operation::insert(0, "a"), Timestamp::new(1, 0))).unwrap();

        assert!(!doc.add_participant(ALICE));
        assert_eq!(doc.pending_operations(ALICE), Some(1));

        assert!(doc.add_participant(BOB));
        assert_eq!(doc.pending_operations(BOB), Some(0));
    }

    #[test]
    fn reset_starts_a_fresh_clock() {
        let mut doc = DocumentCoordinator::with_participants(path(), [HOST, ALICE]);
        doc.transform(&edit(HOST, Operation::insert(0, "a"), Timestamp::new(1, 0))).unwrap();

        assert!(doc.reset(ALICE));
        let out = doc.transform(&edit(ALICE, Operation::NoOp, Timestamp::new(1, 0))).unwrap();
        // The host proxy keeps counting: it received one edit earlier.
        assert_eq!(out[&HOST].timestamp, Timestamp::new(1, 1));
        assert_eq!(doc.pending_operations(ALICE), Some(0));
        assert!(!doc.reset(BOB));
    }

    #[test]
    fn current_checksums_are_restamped_per_recipient() {
        let mut doc = DocumentCoordinator::with_participants(path(), [HOST, ALICE, BOB]);
        doc.transform(&edit(HOST, Operation::insert(0, "a"), Timestamp::new(1, 0))).unwrap();

        // Alice has received the host edit and generated nothing.
        let out = doc.timestamp(&checksum(ALICE, Timestamp::new(0, 1))).unwrap();
        assert_eq!(out.keys().copied().collect::<Vec<_>>(), vec![HOST, BOB]);
        assert_eq!(out[&HOST].timestamp, Timestamp::new(0, 1));
        assert_eq!(out[&BOB].timestamp, Timestamp::new(1, 0));
    }

    #[test]
    fn stale_checksum_is_dropped() {
        let mut doc = DocumentCoordinator::with_participants(path(), [HOST, ALICE]);
        doc.transform(&edit(HOST, Operation::insert(0, "a"), Timestamp::new(1, 0))).unwrap();

        // Alice reports before the host edit reached her.
        let out = doc.timestamp(&checksum(ALICE, Timestamp::new(0, 0))).unwrap();
        assert!(out.is_empty());
    }
}
