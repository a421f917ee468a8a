//! Session Synchronization Coordinator
//!
//! Entry point for every activity arriving at the coordinating participant.
//!
//! ## Responsibilities
//!
//! - Routing: edits and the coordinator's checksums go through their
//!   document's [`DocumentCoordinator`]; targeted activities go to their
//!   addressee; everything else is relayed to all other participants
//! - Document lifecycle: coordinators are created on first use and dropped
//!   when their file is removed
//! - Membership: participants are added to documents as they start queuing,
//!   finish negotiating resources, and removed when they leave
//!
//! ## Locking
//!
//! One registry mutex guards participant phases, negotiation records and the
//! path to coordinator map. Each document has its own mutex, so different
//! documents are transformed in parallel while one document's activities are
//! serialized. The registry lock is always taken before a document lock,
//! never the other way around.

use std::{
    collections::{BTreeSet, HashMap},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use coedit_core::DocumentCoordinator;
use coedit_proto::{Activity, ChecksumReport, EditActivity, FileActivity, ParticipantId, ResourcePath};
use serde::{Deserialize, Serialize};

use crate::{SessionError, membership::SessionMembership};

/// One activity addressed to one participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outgoing {
    /// Addressee.
    pub recipient: ParticipantId,
    /// Activity to deliver.
    pub activity: Activity,
}

impl Outgoing {
    /// Address `activity` to `recipient`.
    pub fn new(recipient: ParticipantId, activity: impl Into<Activity>) -> Self {
        Self { recipient, activity: activity.into() }
    }
}

/// Where a participant stands in the session lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParticipantState {
    /// No hook has been called for this participant yet.
    NotJoined,
    /// Participant buffers incoming activities while the project arrives.
    Queuing,
    /// Participant still lacks the listed resources.
    InNegotiation {
        /// Paths not received yet.
        missing: BTreeSet<ResourcePath>,
    },
    /// Participant holds everything and processes activities directly.
    FullyJoined,
    /// Participant left the session; terminal.
    Left,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Queuing,
    FullyJoined,
    Left,
}

#[derive(Debug, Default)]
struct Registry {
    phases: HashMap<ParticipantId, Phase>,
    negotiations: HashMap<ParticipantId, BTreeSet<ResourcePath>>,
    documents: HashMap<ResourcePath, Arc<Mutex<DocumentCoordinator>>>,
}

impl Registry {
    fn has_left(&self, participant: ParticipantId) -> bool {
        self.phases.get(&participant) == Some(&Phase::Left)
    }

    /// Started queuing and has not left.
    fn is_present(&self, participant: ParticipantId) -> bool {
        matches!(self.phases.get(&participant), Some(Phase::Queuing | Phase::FullyJoined))
    }

    fn is_missing(&self, participant: ParticipantId, path: &ResourcePath) -> bool {
        self.negotiations.get(&participant).is_some_and(|missing| missing.contains(path))
    }
}

/// Coordinator-side synchronization for a whole session.
pub struct SessionCoordinator<M> {
    membership: M,
    registry: Mutex<Registry>,
}

impl<M: SessionMembership> SessionCoordinator<M> {
    /// Create the coordinator.
    ///
    /// # Errors
    ///
    /// - `SessionError::NotCoordinator` if `membership` is not the
    ///   coordinating role
    pub fn new(membership: M) -> Result<Self, SessionError> {
        if !membership.is_coordinating_role() {
            return Err(SessionError::NotCoordinator);
        }
        tracing::info!(
            coordinator = %membership.coordinating_participant(),
            "session coordinator started"
        );
        Ok(Self { membership, registry: Mutex::new(Registry::default()) })
    }

    /// Membership collaborator.
    pub fn membership(&self) -> &M {
        &self.membership
    }

    /// Route one incoming activity.
    ///
    /// Never fails: activities that cannot be transformed are logged and
    /// dropped, leaving detection to the checksum protocol.
    pub fn transform_incoming(&self, activity: Activity) -> Vec<Outgoing> {
        match activity {
            Activity::File(file) if file.is_removal() => self.remove_document(file),
            Activity::Edit(edit) => self.transform_edit(&edit),
            Activity::Checksum(report) => self.timestamp_checksum(&report),
            other => match other.target() {
                Some(target) => vec![Outgoing::new(target, other)],
                None => self.relay(other),
            },
        }
    }

    fn transform_edit(&self, edit: &EditActivity) -> Vec<Outgoing> {
        let document = self.document(&edit.path);
        let mut document = lock(&document);
        match document.transform(edit) {
            Ok(relayed) => relayed.into_iter().map(|(to, edit)| Outgoing::new(to, edit)).collect(),
            Err(err) => {
                tracing::error!(
                    path = %edit.path,
                    participant = %edit.source,
                    timestamp = %edit.timestamp,
                    error = %err,
                    "failed to transform edit"
                );
                Vec::new()
            },
        }
    }

    /// Only the coordinating participant's content is authoritative, so
    /// reports from anyone else are dropped.
    fn timestamp_checksum(&self, report: &ChecksumReport) -> Vec<Outgoing> {
        if report.source != self.membership.coordinating_participant() {
            tracing::debug!(
                path = %report.path,
                participant = %report.source,
                "checksum from non-coordinator dropped"
            );
            return Vec::new();
        }
        let document = self.document(&report.path);
        let document = lock(&document);
        match document.timestamp(report) {
            Ok(stamped) => {
                stamped.into_iter().map(|(to, report)| Outgoing::new(to, report)).collect()
            },
            Err(err) => {
                tracing::error!(
                    path = %report.path,
                    participant = %report.source,
                    error = %err,
                    "failed to timestamp checksum"
                );
                Vec::new()
            },
        }
    }

    fn remove_document(&self, file: FileActivity) -> Vec<Outgoing> {
        if lock(&self.registry).documents.remove(&file.path).is_some() {
            tracing::debug!(path = %file.path, "document coordinator dropped");
        }
        self.relay(Activity::File(file))
    }

    /// Copy of `activity` for every present participant except its source.
    fn relay(&self, activity: Activity) -> Vec<Outgoing> {
        let source = activity.source();
        let registry = lock(&self.registry);
        self.membership
            .participants()
            .into_iter()
            .filter(|&participant| participant != source && !registry.has_left(participant))
            .map(|participant| Outgoing { recipient: participant, activity: activity.clone() })
            .collect()
    }

    /// Coordinator for `path`, created with every participant that is
    /// queuing or joined, holds the project and is not missing the path.
    fn document(&self, path: &ResourcePath) -> Arc<Mutex<DocumentCoordinator>> {
        let mut registry = lock(&self.registry);
        if let Some(document) = registry.documents.get(path) {
            return Arc::clone(document);
        }

        let coordinator = self.membership.coordinating_participant();
        let participants: Vec<ParticipantId> = self
            .membership
            .participants()
            .into_iter()
            .filter(|&participant| {
                participant == coordinator
                    || (self.membership.participant_has_project(participant, &path.project)
                        && registry.is_present(participant)
                        && !registry.is_missing(participant, path))
            })
            .chain(std::iter::once(coordinator))
            .collect();

        let document = DocumentCoordinator::with_participants(path.clone(), participants);
        tracing::debug!(
            %path,
            participants = document.participants().count(),
            "document coordinator created"
        );
        let document = Arc::new(Mutex::new(document));
        registry.documents.insert(path.clone(), Arc::clone(&document));
        document
    }

    /// Participant started buffering activities; register it on every
    /// document of its projects it already holds.
    pub fn participant_started_queuing(&self, participant: ParticipantId) {
        let mut registry = lock(&self.registry);
        if registry.has_left(participant) {
            tracing::warn!(%participant, "queuing hook for departed participant ignored");
            return;
        }
        registry.phases.insert(participant, Phase::Queuing);

        for (path, document) in &registry.documents {
            if registry.is_missing(participant, path)
                || !self.membership.participant_has_project(participant, &path.project)
            {
                continue;
            }
            lock(document).add_participant(participant);
        }
        tracing::info!(%participant, "participant started queuing");
    }

    /// Participant finished joining.
    pub fn participant_joined(&self, participant: ParticipantId) {
        let mut registry = lock(&self.registry);
        if registry.has_left(participant) {
            tracing::warn!(%participant, "join hook for departed participant ignored");
            return;
        }
        registry.phases.insert(participant, Phase::FullyJoined);
        tracing::info!(%participant, "participant joined");
    }

    /// Participant left; it is removed from every document.
    pub fn participant_left(&self, participant: ParticipantId) {
        let mut registry = lock(&self.registry);
        registry.phases.insert(participant, Phase::Left);
        registry.negotiations.remove(&participant);
        for document in registry.documents.values() {
            lock(document).remove_participant(participant);
        }
        tracing::info!(%participant, "participant left");
    }

    /// Participant is negotiating and still lacks `missing`.
    ///
    /// It is registered on every existing document of its projects it is not
    /// missing.
    ///
    /// # Errors
    ///
    /// - `SessionError::NegotiationConflict` if a negotiation for the
    ///   participant is still in flight
    pub fn add_user_in_negotiation(
        &self,
        participant: ParticipantId,
        missing: impl IntoIterator<Item = ResourcePath>,
    ) -> Result<(), SessionError> {
        let mut registry = lock(&self.registry);
        if registry.has_left(participant) {
            tracing::warn!(%participant, "negotiation for departed participant ignored");
            return Ok(());
        }
        if registry.negotiations.contains_key(&participant) {
            return Err(SessionError::NegotiationConflict { participant });
        }

        let missing: BTreeSet<ResourcePath> = missing.into_iter().collect();
        for (path, document) in &registry.documents {
            if !missing.contains(path)
                && self.membership.participant_has_project(participant, &path.project)
            {
                lock(document).add_participant(participant);
            }
        }
        tracing::info!(%participant, missing = missing.len(), "negotiation started");
        if !missing.is_empty() {
            registry.negotiations.insert(participant, missing);
        }
        Ok(())
    }

    /// Participant received `path`; it joins that path's document.
    ///
    /// # Errors
    ///
    /// - `SessionError::NotInNegotiation` if no negotiation is in flight
    pub fn resource_received(
        &self,
        participant: ParticipantId,
        path: &ResourcePath,
    ) -> Result<(), SessionError> {
        let mut registry = lock(&self.registry);
        let Some(missing) = registry.negotiations.get_mut(&participant) else {
            return Err(SessionError::NotInNegotiation { participant });
        };
        missing.remove(path);
        let finished = missing.is_empty();

        if let Some(document) = registry.documents.get(path) {
            lock(document).add_participant(participant);
        }
        if finished {
            registry.negotiations.remove(&participant);
            tracing::info!(%participant, "negotiation finished");
        }
        Ok(())
    }

    /// Give `participant` a fresh clock on `path`.
    ///
    /// Returns `false` if there is no such document or registration.
    pub fn reset(&self, participant: ParticipantId, path: &ResourcePath) -> bool {
        let registry = lock(&self.registry);
        registry.documents.get(path).is_some_and(|document| lock(document).reset(participant))
    }

    /// True if a coordinator for `path` exists.
    pub fn has_document(&self, path: &ResourcePath) -> bool {
        lock(&self.registry).documents.contains_key(path)
    }

    /// Participants registered on `path`, empty if there is no coordinator.
    pub fn document_participants(&self, path: &ResourcePath) -> Vec<ParticipantId> {
        let registry = lock(&self.registry);
        registry
            .documents
            .get(path)
            .map(|document| lock(document).participants().collect())
            .unwrap_or_default()
    }

    /// Lifecycle state of `participant`.
    pub fn participant_state(&self, participant: ParticipantId) -> ParticipantState {
        let registry = lock(&self.registry);
        match registry.phases.get(&participant) {
            Some(Phase::Left) => ParticipantState::Left,
            phase => match registry.negotiations.get(&participant) {
                Some(missing) => ParticipantState::InNegotiation { missing: missing.clone() },
                None => match phase {
                    Some(Phase::Queuing) => ParticipantState::Queuing,
                    Some(Phase::FullyJoined) => ParticipantState::FullyJoined,
                    Some(Phase::Left) | None => ParticipantState::NotJoined,
                },
            },
        }
    }
}

/// Lock ignoring poison: coordinator state stays usable after a panicking
/// caller.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use coedit_proto::{Operation, Timestamp};

    use super::*;
    use crate::membership::SessionRoster;

    const HOST: ParticipantId = ParticipantId(1);
    const GUEST: ParticipantId = ParticipantId(2);

    fn session() -> SessionCoordinator<SessionRoster> {
        let roster = SessionRoster::hosted_by(HOST, ["proj".to_string()]);
        roster.add_participant(GUEST, ["proj".to_string()]);
        SessionCoordinator::new(roster).unwrap()
    }

    fn joined_session() -> SessionCoordinator<SessionRoster> {
        let session = session();
        session.participant_started_queuing(GUEST);
        session.participant_joined(GUEST);
        session
    }

    fn path() -> ResourcePath {
        ResourcePath::new("proj", "a.txt")
    }

    fn checksum(source: ParticipantId, content: &str) -> Activity {
        Activity::Checksum(coedit_core::consistency::checksum_of(source, path(), content, Timestamp::default()))
    }

    #[test]
    fn requires_coordinating_role() {
        let roster = SessionRoster::new(GUEST, HOST, []);
        assert!(matches!(SessionCoordinator::new(roster), Err(SessionError::NotCoordinator)));
    }

    #[test]
    fn state_machine_walks_forward() {
        let session = session();
        assert_eq!(session.participant_state(GUEST), ParticipantState::NotJoined);

        session.participant_started_queuing(GUEST);
        assert_eq!(session.participant_state(GUEST), ParticipantState::Queuing);

        session.add_user_in_negotiation(GUEST, [path()]).unwrap();
        assert!(matches!(
            session.participant_state(GUEST),
            ParticipantState::InNegotiation { .. }
        ));

        session.resource_received(GUEST, &path()).unwrap();
        session.participant_joined(GUEST);
        assert_eq!(session.participant_state(GUEST), ParticipantState::FullyJoined);

        session.participant_left(GUEST);
        session.participant_joined(GUEST);
        assert_eq!(session.participant_state(GUEST), ParticipantState::Left);
    }

    #[test]
    fn broken_edit_is_dropped() {
        let session = joined_session();
        let edit = EditActivity {
            source: GUEST,
            path: path(),
            operation: Operation::insert(0, "x"),
            timestamp: Timestamp::new(3, 0),
        };
        assert!(session.transform_incoming(edit.into()).is_empty());
    }

    #[test]
    fn participant_not_yet_queuing_is_left_out_of_new_documents() {
        let session = session();
        let edit = EditActivity {
            source: HOST,
            path: path(),
            operation: Operation::insert(0, "x"),
            timestamp: Timestamp::new(1, 0),
        };
        assert!(session.transform_incoming(edit.into()).is_empty());
        assert_eq!(session.document_participants(&path()), vec![HOST]);

        session.participant_started_queuing(GUEST);
        assert_eq!(session.document_participants(&path()), vec![HOST, GUEST]);
    }

    #[test]
    fn coordinator_checksum_is_stamped_for_every_guest() {
        let session = joined_session();
        let out = session.transform_incoming(checksum(HOST, "ab"));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].recipient, GUEST);
    }

    #[test]
    fn guest_checksum_is_dropped() {
        let session = joined_session();
        assert!(session.transform_incoming(checksum(GUEST, "zz")).is_empty());
    }
}
