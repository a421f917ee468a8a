//! Session membership.
//!
//! The coordinator never owns the participant list; it asks a
//! [`SessionMembership`] implementation. [`SessionRoster`] is the in-memory
//! implementation used by the replay tool and the tests.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{PoisonError, RwLock},
};

use coedit_proto::ParticipantId;

/// Answers who takes part in the session and what they hold.
pub trait SessionMembership: Send + Sync {
    /// True on the process that coordinates the session.
    fn is_coordinating_role(&self) -> bool;

    /// Participant acting as coordinator.
    fn coordinating_participant(&self) -> ParticipantId;

    /// True if `participant` shares `project`.
    fn participant_has_project(&self, participant: ParticipantId, project: &str) -> bool;

    /// Current participants, coordinator included.
    fn participants(&self) -> Vec<ParticipantId>;
}

/// In-memory membership list.
#[derive(Debug)]
pub struct SessionRoster {
    local: ParticipantId,
    coordinator: ParticipantId,
    members: RwLock<BTreeMap<ParticipantId, BTreeSet<String>>>,
}

impl SessionRoster {
    /// Roster as seen by `local`, with `coordinator` sharing `projects`.
    pub fn new(
        local: ParticipantId,
        coordinator: ParticipantId,
        projects: impl IntoIterator<Item = String>,
    ) -> Self {
        let members = BTreeMap::from([(coordinator, projects.into_iter().collect())]);
        Self { local, coordinator, members: RwLock::new(members) }
    }

    /// Roster for the coordinating process itself.
    pub fn hosted_by(coordinator: ParticipantId, projects: impl IntoIterator<Item = String>) -> Self {
        Self::new(coordinator, coordinator, projects)
    }

    /// Add `participant` (or extend its projects).
    pub fn add_participant(
        &self,
        participant: ParticipantId,
        projects: impl IntoIterator<Item = String>,
    ) {
        let mut members = self.members.write().unwrap_or_else(PoisonError::into_inner);
        members.entry(participant).or_default().extend(projects);
    }

    /// Remove `participant`. The coordinator cannot be removed.
    pub fn remove_participant(&self, participant: ParticipantId) -> bool {
        if participant == self.coordinator {
            return false;
        }
        let mut members = self.members.write().unwrap_or_else(PoisonError::into_inner);
        members.remove(&participant).is_some()
    }
}

impl SessionMembership for SessionRoster {
    fn is_coordinating_role(&self) -> bool {
        self.local == self.coordinator
    }

    fn coordinating_participant(&self) -> ParticipantId {
        self.coordinator
    }

    fn participant_has_project(&self, participant: ParticipantId, project: &str) -> bool {
        let members = self.members.read().unwrap_or_else(PoisonError::into_inner);
        members.get(&participant).is_some_and(|projects| projects.contains(project))
    }

    fn participants(&self) -> Vec<ParticipantId> {
        let members = self.members.read().unwrap_or_else(PoisonError::into_inner);
        members.keys().copied().collect()
    }
}
