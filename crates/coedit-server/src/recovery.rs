//! Coordinator half of consistency recovery.
//!
//! A participant that detected diverged documents sends a
//! [`RecoveryRequest`]. For every requested path the coordinator answers, in
//! this order and over the same FIFO link:
//!
//! 1. `FileKind::Replaced` with its authoritative content (or
//!    `FileKind::Removed` if it no longer has the file)
//! 2. a checksum of that content tagged with the recovery id, stamped for
//!    the participant's freshly reset clock
//!
//! followed by a single [`RecoveryComplete`].

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::{Mutex, PoisonError},
};

use coedit_core::consistency::checksum_of;
use coedit_proto::{
    Activity, FileActivity, FileKind, ParticipantId, RecoveryComplete, RecoveryId, RecoveryRequest,
    ResourcePath, Timestamp,
};

use crate::{
    membership::SessionMembership,
    session::{Outgoing, SessionCoordinator},
};

/// Authoritative document content on the coordinating participant.
pub trait ContentSource {
    /// Current content of `path`, `None` if the file does not exist.
    fn content(&self, path: &ResourcePath) -> Option<String>;
}

impl ContentSource for HashMap<ResourcePath, String> {
    fn content(&self, path: &ResourcePath) -> Option<String> {
        self.get(path).cloned()
    }
}

impl ContentSource for BTreeMap<ResourcePath, String> {
    fn content(&self, path: &ResourcePath) -> Option<String> {
        self.get(path).cloned()
    }
}

/// Serves recovery requests; remembers which ones it already answered.
#[derive(Debug, Default)]
pub struct RecoveryCoordinator {
    served: Mutex<HashSet<(ParticipantId, RecoveryId)>>,
}

impl RecoveryCoordinator {
    /// Coordinator that has served nothing yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `request`.
    ///
    /// Resets the requester's clock on every replaced document. A request
    /// whose id was already served is ignored.
    pub fn handle_request<M: SessionMembership>(
        &self,
        session: &SessionCoordinator<M>,
        request: &RecoveryRequest,
        content: &impl ContentSource,
    ) -> Vec<Outgoing> {
        let participant = request.source;
        let id = request.recovery_id;
        let first_time = self
            .served
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((participant, id));
        if !first_time {
            tracing::warn!(%participant, recovery = %id, "duplicate recovery request ignored");
            return Vec::new();
        }

        let coordinator = session.membership().coordinating_participant();
        let mut outgoing = Vec::new();
        for path in &request.paths {
            match content.content(path) {
                Some(text) => {
                    outgoing.push(Outgoing::new(participant, FileActivity {
                        source: coordinator,
                        path: path.clone(),
                        kind: FileKind::Replaced { content: text.clone(), recovery_id: id },
                    }));
                    session.reset(participant, path);

                    let mut report = checksum_of(coordinator, path.clone(), &text, Timestamp::default());
                    report.recovery_id = Some(id);
                    outgoing.push(Outgoing::new(participant, report));
                },
                None => {
                    outgoing.push(Outgoing::new(participant, FileActivity {
                        source: coordinator,
                        path: path.clone(),
                        kind: FileKind::Removed,
                    }));
                },
            }
        }

        outgoing.push(Outgoing::new(
            participant,
            Activity::RecoveryComplete(RecoveryComplete {
                source: coordinator,
                target: participant,
                recovery_id: id,
            }),
        ));
        tracing::info!(
            %participant,
            recovery = %id,
            paths = request.paths.len(),
            "recovery served"
        );
        outgoing
    }
}
