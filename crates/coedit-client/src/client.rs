//! Client state machine.
//!
//! The `Client` holds the participant's replicas of every shared document,
//! one client-side Jupiter per document, a resource gate for the joining
//! phase, and the consistency watchdog. It talks to the coordinator only
//! through [`ClientAction::Send`].

use std::{
    collections::{BTreeMap, BTreeSet},
    time::Instant,
};

use coedit_core::{
    ConsistencyWatchdog, Environment, Jupiter, ResourceGate, Side, consistency::checksum_of,
};
use coedit_proto::{
    Activity, ChecksumReport, EditActivity, FileActivity, FileKind, Operation, ParticipantId,
    RecoveryId, RecoveryRequest, ResourcePath,
};

use crate::{
    error::ClientError,
    event::{ClientAction, ClientConfig, ClientEvent},
};

/// Local copy of one shared document.
#[derive(Debug, Clone)]
struct Replica {
    content: String,
    jupiter: Jupiter,
}

impl Replica {
    fn new(content: String) -> Self {
        Self { content, jupiter: Jupiter::new(Side::Client) }
    }
}

/// Participant state machine.
///
/// Pure state machine - returns actions, caller handles I/O.
///
/// # Type Parameters
///
/// - `E`: Environment implementation for time/randomness
pub struct Client<E: Environment> {
    /// Our identity.
    participant: ParticipantId,

    /// Participant that coordinates the session.
    coordinator: ParticipantId,

    config: ClientConfig,

    /// Open documents.
    documents: BTreeMap<ResourcePath, Replica>,

    /// Holds back activities for documents still being received.
    gate: ResourceGate,

    watchdog: ConsistencyWatchdog,

    /// When checksums were last published.
    last_checksums: Option<Instant>,

    /// Environment for time/randomness.
    env: E,
}

impl<E: Environment> Client<E> {
    /// Create a client for `participant` in a session coordinated by
    /// `coordinator`.
    pub fn new(
        env: E,
        participant: ParticipantId,
        coordinator: ParticipantId,
        config: ClientConfig,
    ) -> Self {
        Self {
            participant,
            coordinator,
            config,
            documents: BTreeMap::new(),
            gate: ResourceGate::default(),
            watchdog: ConsistencyWatchdog::new(),
            last_checksums: None,
            env,
        }
    }

    /// Our participant id.
    pub fn participant(&self) -> ParticipantId {
        self.participant
    }

    /// True if we coordinate the session and hold the authoritative copies.
    pub fn is_coordinator(&self) -> bool {
        self.participant == self.coordinator
    }

    /// Local content of `path`.
    pub fn content(&self, path: &ResourcePath) -> Option<&str> {
        self.documents.get(path).map(|replica| replica.content.as_str())
    }

    /// Open documents with their content, in path order.
    pub fn documents(&self) -> impl Iterator<Item = (&ResourcePath, &str)> {
        self.documents.iter().map(|(path, replica)| (path, replica.content.as_str()))
    }

    /// True if any document is flagged inconsistent.
    pub fn is_inconsistent(&self) -> bool {
        self.watchdog.is_inconsistent()
    }

    /// Documents flagged inconsistent.
    pub fn inconsistent_paths(&self) -> Vec<ResourcePath> {
        self.watchdog.inconsistent_paths().cloned().collect()
    }

    /// True while a recovery is running.
    pub fn is_recovering(&self) -> bool {
        self.watchdog.recovery().is_some()
    }

    /// Activities held back by the resource gate.
    pub fn queued(&self) -> usize {
        self.gate.queued()
    }

    /// Process an event and return resulting actions.
    ///
    /// # Errors
    ///
    /// Returns `ClientError` if a local request cannot be honored. Failures
    /// while integrating remote activities never surface here; they flag the
    /// document and produce a `Log` action.
    pub fn handle(&mut self, event: ClientEvent) -> Result<Vec<ClientAction>, ClientError> {
        match event {
            ClientEvent::OpenDocument { path, content } => self.handle_open(path, content),
            ClientEvent::CreateDocument { path, content } => self.handle_create(path, content),
            ClientEvent::LocalEdit { path, operation } => self.handle_local_edit(path, operation),
            ClientEvent::RemoveDocument { path } => self.handle_remove(path),
            ClientEvent::ActivityReceived(activity) => Ok(self.handle_incoming(vec![activity])),
            ClientEvent::BeginNegotiation { missing } => Ok(self.handle_begin_negotiation(missing)),
            ClientEvent::ResourceReceived { path, content } => self.handle_resource(path, content),
            ClientEvent::PublishChecksums => Ok(self.publish_checksums(self.env.now())),
            ClientEvent::StartRecovery => Ok(self.start_recovery()),
            ClientEvent::Tick { now } => Ok(self.handle_tick(now)),
        }
    }

    fn handle_open(
        &mut self,
        path: ResourcePath,
        content: String,
    ) -> Result<Vec<ClientAction>, ClientError> {
        if self.documents.contains_key(&path) {
            return Err(ClientError::DocumentAlreadyOpen { path });
        }
        let message = format!("Opened {path}");
        self.documents.insert(path, Replica::new(content));
        Ok(vec![ClientAction::Log { message }])
    }

    fn handle_create(
        &mut self,
        path: ResourcePath,
        content: String,
    ) -> Result<Vec<ClientAction>, ClientError> {
        if self.documents.contains_key(&path) {
            return Err(ClientError::DocumentAlreadyOpen { path });
        }
        self.documents.insert(path.clone(), Replica::new(content.clone()));

        let file = FileActivity { source: self.participant, path: path.clone(), kind: FileKind::Created { content } };
        Ok(vec![ClientAction::Send(Activity::File(file)), ClientAction::DocumentChanged { path }])
    }

    fn handle_local_edit(
        &mut self,
        path: ResourcePath,
        operation: Operation,
    ) -> Result<Vec<ClientAction>, ClientError> {
        if self.is_recovering() {
            return Err(ClientError::RecoveryInProgress);
        }
        let Some(replica) = self.documents.get_mut(&path) else {
            return Err(ClientError::UnknownDocument { path });
        };

        let mut content = replica.content.clone();
        if let Err(source) = operation.apply(&mut content) {
            return Err(ClientError::InvalidOperation { path, source });
        }
        replica.content = content;
        let timestamp = replica.jupiter.generate(operation.clone(), self.participant);

        let edit = EditActivity { source: self.participant, path: path.clone(), operation, timestamp };
        Ok(vec![ClientAction::Send(Activity::Edit(edit)), ClientAction::DocumentChanged { path }])
    }

    fn handle_remove(&mut self, path: ResourcePath) -> Result<Vec<ClientAction>, ClientError> {
        if self.documents.remove(&path).is_none() {
            return Err(ClientError::UnknownDocument { path });
        }
        let before = self.inconsistent_paths();
        self.watchdog.forget(&path);

        let mut actions = vec![
            ClientAction::Send(Activity::File(FileActivity {
                source: self.participant,
                path: path.clone(),
                kind: FileKind::Removed,
            })),
            ClientAction::DocumentRemoved { path },
        ];
        self.push_inconsistency_change(&before, &mut actions);
        Ok(actions)
    }

    fn handle_begin_negotiation(&mut self, missing: Vec<ResourcePath>) -> Vec<ClientAction> {
        if !self.gate.is_passthrough() {
            return vec![ClientAction::Log {
                message: "Negotiation already in progress, request ignored".to_string(),
            }];
        }
        let count = missing.len();
        self.gate = ResourceGate::new(missing);
        vec![ClientAction::Log { message: format!("Negotiating {count} missing resources") }]
    }

    fn handle_resource(
        &mut self,
        path: ResourcePath,
        content: String,
    ) -> Result<Vec<ClientAction>, ClientError> {
        if self.documents.contains_key(&path) {
            return Err(ClientError::DocumentAlreadyOpen { path });
        }
        self.documents.insert(path.clone(), Replica::new(content));
        self.gate.disable_queuing(&path);

        let mut actions = vec![ClientAction::DocumentChanged { path }];
        actions.extend(self.handle_incoming(Vec::new()));
        Ok(actions)
    }

    /// Run a batch through the gate and integrate whatever it releases.
    fn handle_incoming(&mut self, activities: Vec<Activity>) -> Vec<ClientAction> {
        let before = self.inconsistent_paths();
        let released = self.gate.process(activities);

        let mut actions = Vec::new();
        let mut checksums = Vec::new();
        for activity in released {
            match activity {
                Activity::Checksum(report) => checksums.push(report),
                other => {
                    self.check_reports(std::mem::take(&mut checksums), &mut actions);
                    if let Err(err) = self.apply_remote(other, &mut actions) {
                        self.record_failure(err, &mut actions);
                    }
                },
            }
        }
        self.check_reports(checksums, &mut actions);

        self.push_inconsistency_change(&before, &mut actions);
        actions
    }

    fn apply_remote(
        &mut self,
        activity: Activity,
        actions: &mut Vec<ClientAction>,
    ) -> Result<(), ClientError> {
        match activity {
            Activity::Edit(edit) => self.apply_remote_edit(edit, actions),
            Activity::File(file) => {
                self.apply_file(file, actions);
                Ok(())
            },
            Activity::RecoveryComplete(complete) => {
                let message = match self.watchdog.complete_recovery(complete.recovery_id) {
                    Some(outcome) => format!(
                        "Recovery {} complete: {} recovered, {} still inconsistent",
                        complete.recovery_id,
                        outcome.recovered.len(),
                        outcome.still_inconsistent.len()
                    ),
                    None => format!("Ignoring completion of unknown recovery {}", complete.recovery_id),
                };
                actions.push(ClientAction::Log { message });
                Ok(())
            },
            Activity::RecoveryRequest(request) => {
                actions.push(ClientAction::Log {
                    message: format!("Ignoring recovery request from {}", request.source),
                });
                Ok(())
            },
            Activity::Progress(progress) => {
                actions.push(ClientAction::Log {
                    message: format!(
                        "{} progress {}: {}/{} {}",
                        progress.source, progress.progress_id, progress.worked, progress.total, progress.message
                    ),
                });
                Ok(())
            },
            Activity::Checksum(report) => {
                self.check_reports(vec![report], actions);
                Ok(())
            },
        }
    }

    fn apply_remote_edit(
        &mut self,
        edit: EditActivity,
        actions: &mut Vec<ClientAction>,
    ) -> Result<(), ClientError> {
        let path = edit.path;
        let Some(replica) = self.documents.get_mut(&path) else {
            return Err(ClientError::UnknownDocument { path });
        };

        let operation = match replica.jupiter.receive(edit.operation, edit.source, edit.timestamp) {
            Ok(operation) => operation,
            Err(source) => return Err(ClientError::Transformation { path, source }),
        };

        let mut content = replica.content.clone();
        if let Err(source) = operation.apply(&mut content) {
            return Err(ClientError::InvalidOperation { path, source });
        }
        replica.content = content;
        actions.push(ClientAction::DocumentChanged { path });
        Ok(())
    }

    fn apply_file(&mut self, file: FileActivity, actions: &mut Vec<ClientAction>) {
        let path = file.path;
        match file.kind {
            FileKind::Created { content } => {
                self.documents.insert(path.clone(), Replica::new(content));
                actions.push(ClientAction::DocumentChanged { path });
            },
            FileKind::Removed => {
                self.watchdog.forget(&path);
                if self.documents.remove(&path).is_some() {
                    actions.push(ClientAction::DocumentRemoved { path });
                }
            },
            FileKind::Replaced { content, recovery_id } => {
                if self.watchdog.recovery().is_none_or(|recovery| recovery.id != recovery_id) {
                    actions.push(ClientAction::Log {
                        message: format!("Replacement of {path} belongs to unknown recovery {recovery_id}"),
                    });
                }
                // The coordinator restarted our clock for this path.
                self.documents.insert(path.clone(), Replica::new(content));
                actions.push(ClientAction::DocumentChanged { path });
            },
        }
    }

    /// Compare the coordinator's reports with our replicas.
    ///
    /// Only the coordinator's content is authoritative. Its own replica is
    /// never checked, and reports from anyone else are dropped.
    fn check_reports(&mut self, reports: Vec<ChecksumReport>, actions: &mut Vec<ClientAction>) {
        if reports.is_empty() || self.is_coordinator() {
            return;
        }
        let (authoritative, foreign): (Vec<_>, Vec<_>) =
            reports.into_iter().partition(|report| report.source == self.coordinator);
        for report in foreign {
            actions.push(ClientAction::Log {
                message: format!("Ignoring checksum of {} from {}", report.path, report.source),
            });
        }
        for report in ConsistencyWatchdog::latest_reports(authoritative) {
            let (local, current) = match self.documents.get(&report.path) {
                Some(replica) => (Some(replica.content.as_str()), replica.jupiter.is_current(report.timestamp)),
                // A document we do not hold yet (or anymore) says nothing.
                None => (None, false),
            };
            let verdict = self.watchdog.check(&report, local, current);
            if verdict == coedit_core::Verdict::Inconsistent {
                actions.push(ClientAction::Log {
                    message: format!("{} differs from {} ({})", report.path, report.source, report.hash),
                });
            }
        }
    }

    fn record_failure(&mut self, err: ClientError, actions: &mut Vec<ClientAction>) {
        match &err {
            ClientError::Transformation { path, .. } | ClientError::InvalidOperation { path, .. } => {
                self.watchdog.flag(path.clone());
            },
            ClientError::UnknownDocument { .. }
            | ClientError::DocumentAlreadyOpen { .. }
            | ClientError::RecoveryInProgress => {},
        }
        actions.push(ClientAction::Log { message: format!("Failed to apply remote activity: {err}") });
    }

    fn push_inconsistency_change(&self, before: &[ResourcePath], actions: &mut Vec<ClientAction>) {
        let after = self.inconsistent_paths();
        if after != before {
            actions.push(ClientAction::InconsistencyChanged { paths: after });
        }
    }

    fn publish_checksums(&mut self, now: Instant) -> Vec<ClientAction> {
        if !self.is_coordinator() {
            return vec![ClientAction::Log {
                message: "Only the coordinator publishes checksums".to_string(),
            }];
        }
        self.last_checksums = Some(now);
        self.documents
            .iter()
            .map(|(path, replica)| {
                ClientAction::Send(Activity::Checksum(checksum_of(
                    self.participant,
                    path.clone(),
                    &replica.content,
                    replica.jupiter.timestamp(),
                )))
            })
            .collect()
    }

    fn start_recovery(&mut self) -> Vec<ClientAction> {
        let recovery_id = RecoveryId(self.env.random_u64());
        let Some(paths) = self.watchdog.begin_recovery(recovery_id, self.env.now()) else {
            return Vec::new();
        };
        let count = paths.len();
        vec![
            ClientAction::Send(Activity::RecoveryRequest(RecoveryRequest {
                source: self.participant,
                target: self.coordinator,
                paths,
                recovery_id,
            })),
            ClientAction::Log { message: format!("Recovery {recovery_id} requested for {count} documents") },
        ]
    }

    fn handle_tick(&mut self, now: Instant) -> Vec<ClientAction> {
        let mut actions = Vec::new();

        let timed_out = self
            .watchdog
            .recovery()
            .is_some_and(|recovery| now.duration_since(recovery.started_at) >= self.config.recovery_timeout);
        if timed_out && let Some(recovery) = self.watchdog.abort_recovery() {
            actions.push(ClientAction::Log { message: format!("Recovery {} timed out", recovery.id) });
        }

        if self.is_coordinator()
            && let Some(interval) = self.config.checksum_interval
        {
            let due = self.last_checksums.is_none_or(|last| now.duration_since(last) >= interval);
            if due {
                actions.extend(self.publish_checksums(now));
            }
        }

        actions
    }

    /// Paths whose activities are still held back.
    pub fn unavailable(&self) -> BTreeSet<ResourcePath> {
        self.gate.unavailable().cloned().collect()
    }
}
