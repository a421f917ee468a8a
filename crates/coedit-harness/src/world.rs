//! Simulated session: one host, any number of guests.
//!
//! The host runs the coordinating role in-process, so its link to the
//! session coordinator is synchronous. Every guest has an uplink and a
//! downlink, each a FIFO queue. Which queued message moves next is decided
//! by a seeded RNG, so one seed is one reproducible interleaving.

use std::{
    collections::{BTreeMap, BTreeSet, VecDeque},
    time::Duration,
};

use coedit_client::{Client, ClientAction, ClientConfig, ClientError, ClientEvent};
use coedit_core::Environment;
use coedit_proto::{Activity, Operation as TextOperation, ParticipantId, ResourcePath};
use coedit_server::{
    Outgoing, RecoveryCoordinator, SessionCoordinator, SessionError, SessionRoster,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::{operation::Operation, sim_env::SimEnv};

/// The coordinating participant of every simulated session.
pub const HOST: ParticipantId = ParticipantId(1);

/// Project every simulated document belongs to.
pub const PROJECT: &str = "proj";

/// One direction of a guest's connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Link {
    /// Guest to coordinator.
    Up(ParticipantId),
    /// Coordinator to guest.
    Down(ParticipantId),
}

#[derive(Debug, Clone)]
enum Delivery {
    /// `origin` indexes the coordinator's arrival log for routed edits.
    Activity { activity: Activity, origin: Option<usize> },
    Resource { path: ResourcePath, content: String },
}

struct Guest {
    client: Client<SimEnv>,
    uplink: VecDeque<Activity>,
    downlink: VecDeque<Delivery>,
}

/// Record of one edit: who made it, where, and its sequence number.
type EditRecord = (ParticipantId, ResourcePath, u64);

/// A whole session under deterministic simulation.
pub struct World {
    env: SimEnv,
    /// Scheduling decisions only; clients draw from `env`.
    rng: ChaCha8Rng,
    config: ClientConfig,
    session: SessionCoordinator<SessionRoster>,
    recovery: RecoveryCoordinator,
    host: Client<SimEnv>,
    guests: BTreeMap<ParticipantId, Guest>,
    next_participant: u64,
    documents: Vec<ResourcePath>,

    /// Edits in the order each participant sent them.
    sent: Vec<EditRecord>,
    /// Edits in the order the coordinator transformed them.
    arrived: Vec<EditRecord>,
    /// Per participant, indices into `arrived` in the order received.
    received: BTreeMap<ParticipantId, Vec<usize>>,
}

impl World {
    /// Session of a host and `guests` fully joined guests, all holding
    /// `documents` (name, content) in [`PROJECT`].
    pub fn new(seed: u64, guests: usize, documents: &[(&str, &str)]) -> Result<Self, SessionError> {
        let config = ClientConfig { checksum_interval: Some(Duration::from_secs(1)), ..ClientConfig::default() };
        Self::with_config(seed, guests, documents, config)
    }

    /// Like [`World::new`] with explicit client tuning.
    pub fn with_config(
        seed: u64,
        guests: usize,
        documents: &[(&str, &str)],
        config: ClientConfig,
    ) -> Result<Self, SessionError> {
        let env = SimEnv::with_seed(seed);
        let roster = SessionRoster::hosted_by(HOST, [PROJECT.to_string()]);
        let session = SessionCoordinator::new(roster)?;

        let mut world = Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            host: Client::new(env.clone(), HOST, HOST, config.clone()),
            env,
            config,
            session,
            recovery: RecoveryCoordinator::new(),
            guests: BTreeMap::new(),
            next_participant: HOST.0 + 1,
            documents: Vec::new(),
            sent: Vec::new(),
            arrived: Vec::new(),
            received: BTreeMap::new(),
        };

        for &(name, content) in documents {
            let path = ResourcePath::new(PROJECT, name);
            world.open(HOST, &path, content);
            world.documents.push(path);
        }
        for _ in 0..guests {
            let participant = world.register_guest();
            let held: Vec<_> = world.host.documents().map(|(p, c)| (p.clone(), c.to_string())).collect();
            for (path, content) in held {
                world.open(participant, &path, &content);
            }
            world.session.participant_joined(participant);
        }
        Ok(world)
    }

    /// Shared environment.
    pub fn env(&self) -> &SimEnv {
        &self.env
    }

    /// The session coordinator.
    pub fn session(&self) -> &SessionCoordinator<SessionRoster> {
        &self.session
    }

    /// Every participant, host first.
    pub fn participants(&self) -> Vec<ParticipantId> {
        std::iter::once(HOST).chain(self.guests.keys().copied()).collect()
    }

    /// Documents the world was created with.
    pub fn documents(&self) -> &[ResourcePath] {
        &self.documents
    }

    /// Client of `participant`.
    pub fn client(&self, participant: ParticipantId) -> Option<&Client<SimEnv>> {
        if participant == HOST {
            Some(&self.host)
        } else {
            self.guests.get(&participant).map(|guest| &guest.client)
        }
    }

    /// Content of `path` at `participant`.
    pub fn content(&self, participant: ParticipantId, path: &ResourcePath) -> Option<String> {
        self.client(participant).and_then(|client| client.content(path)).map(str::to_string)
    }

    /// Participants whose watchdog flags any document.
    pub fn inconsistent_participants(&self) -> Vec<ParticipantId> {
        self.participants()
            .into_iter()
            .filter(|&participant| self.client(participant).is_some_and(Client::is_inconsistent))
            .collect()
    }

    /// Paths whose content differs between participants.
    pub fn divergent_documents(&self) -> Vec<ResourcePath> {
        let mut paths = BTreeSet::new();
        for participant in self.participants() {
            if let Some(client) = self.client(participant) {
                paths.extend(client.documents().map(|(path, _)| path.clone()));
            }
        }
        paths
            .into_iter()
            .filter(|path| {
                let host = self.content(HOST, path);
                self.guests.keys().any(|&guest| self.content(guest, path) != host)
            })
            .collect()
    }

    /// True if every participant received edits in the coordinator's order
    /// and the coordinator saw every sender's edits in the order sent.
    pub fn fifo_holds(&self) -> bool {
        let senders: BTreeSet<_> = self.sent.iter().map(|(source, _, _)| *source).collect();
        let sent_in_order = senders.iter().all(|&source| {
            let sent: Vec<_> = self.sent.iter().filter(|record| record.0 == source).collect();
            let arrived: Vec<_> = self.arrived.iter().filter(|record| record.0 == source).collect();
            sent.starts_with(&arrived)
        });

        let received_in_order = self.received.iter().all(|(&participant, received)| {
            received.windows(2).all(|pair| pair[0] < pair[1])
                && received.iter().all(|&index| self.arrived[index].0 != participant)
        });

        sent_in_order && received_in_order
    }

    /// Links with messages waiting.
    pub fn pending_links(&self) -> Vec<Link> {
        let mut links = Vec::new();
        for (&participant, guest) in &self.guests {
            if !guest.uplink.is_empty() {
                links.push(Link::Up(participant));
            }
            if !guest.downlink.is_empty() {
                links.push(Link::Down(participant));
            }
        }
        links
    }

    /// Messages waiting on every link.
    pub fn in_flight(&self) -> usize {
        self.guests.values().map(|guest| guest.uplink.len() + guest.downlink.len()).sum()
    }

    /// A participant edits a document.
    pub fn local_edit(
        &mut self,
        participant: ParticipantId,
        path: &ResourcePath,
        operation: TextOperation,
    ) -> Result<(), ClientError> {
        let event = ClientEvent::LocalEdit { path: path.clone(), operation };
        self.handle(participant, event)
    }

    /// Ask a participant to publish checksums now; only the host sends any.
    pub fn publish_checksums(&mut self, participant: ParticipantId) {
        let _ = self.handle(participant, ClientEvent::PublishChecksums);
    }

    /// A participant asks the coordinator to repair its flagged documents.
    pub fn start_recovery(&mut self, participant: ParticipantId) {
        let _ = self.handle(participant, ClientEvent::StartRecovery);
    }

    /// A participant creates and shares a new document.
    pub fn create_document(
        &mut self,
        participant: ParticipantId,
        name: &str,
        content: &str,
    ) -> Result<ResourcePath, ClientError> {
        let path = ResourcePath::new(PROJECT, name);
        self.handle(participant, ClientEvent::CreateDocument { path: path.clone(), content: content.to_string() })?;
        Ok(path)
    }

    /// A participant deletes a shared document.
    pub fn remove_document(
        &mut self,
        participant: ParticipantId,
        path: &ResourcePath,
    ) -> Result<(), ClientError> {
        self.handle(participant, ClientEvent::RemoveDocument { path: path.clone() })
    }

    /// Queue `activity` to `participant` as if the coordinator had sent it.
    ///
    /// Bypasses transformation; used to force divergence.
    pub fn inject(&mut self, participant: ParticipantId, activity: Activity) {
        self.route(vec![Outgoing::new(participant, activity)], None);
    }

    /// Advance virtual time and tick every participant.
    pub fn advance(&mut self, by: Duration) {
        self.env.advance(by);
        let now = self.env.now();
        for participant in self.participants() {
            let _ = self.handle(participant, ClientEvent::Tick { now });
        }
    }

    /// Deliver the oldest message on `link`. Returns false if it was empty.
    pub fn deliver(&mut self, link: Link) -> bool {
        match link {
            Link::Up(participant) => {
                let Some(activity) = self.guests.get_mut(&participant).and_then(|g| g.uplink.pop_front()) else {
                    return false;
                };
                self.arrive(activity);
                true
            },
            Link::Down(participant) => {
                let Some(delivery) = self.guests.get_mut(&participant).and_then(|g| g.downlink.pop_front()) else {
                    return false;
                };
                let event = match delivery {
                    Delivery::Activity { activity, origin } => {
                        self.record_received(participant, origin);
                        ClientEvent::ActivityReceived(activity)
                    },
                    Delivery::Resource { path, content } => ClientEvent::ResourceReceived { path, content },
                };
                let _ = self.handle(participant, event);
                true
            },
        }
    }

    /// Deliver one message on a randomly chosen link.
    pub fn step(&mut self) -> bool {
        let links = self.pending_links();
        if links.is_empty() {
            return false;
        }
        let link = links[self.rng.gen_range(0..links.len())];
        self.deliver(link)
    }

    /// Deliver until every link is empty.
    pub fn run_until_quiescent(&mut self) {
        while self.step() {}
    }

    /// Add a guest that still has to receive every document.
    ///
    /// The guest starts queuing immediately; documents arrive one by one
    /// through [`World::transfer_resource`].
    pub fn join_guest(&mut self) -> ParticipantId {
        let participant = self.register_guest();
        let missing: Vec<_> = self.host.documents().map(|(path, _)| path.clone()).collect();

        if let Err(err) = self.session.add_user_in_negotiation(participant, missing.clone()) {
            tracing::warn!(%participant, error = %err, "negotiation rejected");
        }
        let _ = self.handle(participant, ClientEvent::BeginNegotiation { missing });
        self.session.participant_started_queuing(participant);
        participant
    }

    /// Send the host's copy of `path` to a negotiating guest.
    pub fn transfer_resource(&mut self, participant: ParticipantId, path: &ResourcePath) -> bool {
        let Some(content) = self.content(HOST, path) else {
            return false;
        };
        if let Err(err) = self.session.resource_received(participant, path) {
            tracing::warn!(%participant, error = %err, "resource transfer rejected");
            return false;
        }
        let Some(guest) = self.guests.get_mut(&participant) else {
            return false;
        };
        guest.downlink.push_back(Delivery::Resource { path: path.clone(), content });
        true
    }

    /// Mark a guest as fully joined.
    pub fn finish_join(&mut self, participant: ParticipantId) {
        self.session.participant_joined(participant);
    }

    /// Apply a generated operation. Returns false if it did nothing.
    pub fn apply(&mut self, op: &Operation) -> bool {
        match op {
            Operation::Insert { participant, document, position, text } => {
                let Some((participant, path, content)) = self.pick(*participant, *document) else {
                    return false;
                };
                let len = content.chars().count();
                let offset = usize::from(*position) % (len + 1);
                self.local_edit(participant, &path, TextOperation::insert(offset, text.to_text())).is_ok()
            },
            Operation::Delete { participant, document, position, len } => {
                let Some((participant, path, content)) = self.pick(*participant, *document) else {
                    return false;
                };
                let chars = content.chars().count();
                if chars == 0 {
                    return false;
                }
                let offset = usize::from(*position) % chars;
                let count = 1 + usize::from(*len) % (chars - offset).min(4);
                let text: String = content.chars().skip(offset).take(count).collect();
                self.local_edit(participant, &path, TextOperation::delete(offset, text)).is_ok()
            },
            Operation::Deliver { link } => {
                let links = self.pending_links();
                if links.is_empty() {
                    return false;
                }
                self.deliver(links[usize::from(*link) % links.len()])
            },
            Operation::PublishChecksums { participant } => {
                let participant = self.participant_at(*participant);
                self.publish_checksums(participant);
                true
            },
            Operation::AdvanceTime { millis } => {
                self.advance(Duration::from_millis(u64::from(*millis)));
                true
            },
        }
    }

    fn participant_at(&self, index: u8) -> ParticipantId {
        let participants = self.participants();
        participants[usize::from(index) % participants.len()]
    }

    fn pick(&self, participant: u8, document: u8) -> Option<(ParticipantId, ResourcePath, String)> {
        if self.documents.is_empty() {
            return None;
        }
        let participant = self.participant_at(participant);
        let path = self.documents[usize::from(document) % self.documents.len()].clone();
        let content = self.content(participant, &path)?;
        Some((participant, path, content))
    }

    fn register_guest(&mut self) -> ParticipantId {
        let participant = ParticipantId(self.next_participant);
        self.next_participant += 1;
        self.session.membership().add_participant(participant, [PROJECT.to_string()]);

        let client = Client::new(self.env.clone(), participant, HOST, self.config.clone());
        self.guests.insert(participant, Guest { client, uplink: VecDeque::new(), downlink: VecDeque::new() });
        participant
    }

    fn open(&mut self, participant: ParticipantId, path: &ResourcePath, content: &str) {
        let event = ClientEvent::OpenDocument { path: path.clone(), content: content.to_string() };
        let _ = self.handle(participant, event);
    }

    fn handle(&mut self, participant: ParticipantId, event: ClientEvent) -> Result<(), ClientError> {
        let client = if participant == HOST {
            &mut self.host
        } else {
            match self.guests.get_mut(&participant) {
                Some(guest) => &mut guest.client,
                None => return Ok(()),
            }
        };
        match client.handle(event) {
            Ok(actions) => {
                self.perform(participant, actions);
                Ok(())
            },
            Err(err) => {
                tracing::debug!(%participant, error = %err, "event rejected");
                Err(err)
            },
        }
    }

    fn perform(&mut self, participant: ParticipantId, actions: Vec<ClientAction>) {
        for action in actions {
            match action {
                ClientAction::Send(activity) => self.send(participant, activity),
                ClientAction::Log { message } => tracing::debug!(%participant, "{message}"),
                ClientAction::InconsistencyChanged { paths } => {
                    tracing::info!(%participant, inconsistent = paths.len(), "inconsistency changed");
                },
                ClientAction::DocumentChanged { .. } | ClientAction::DocumentRemoved { .. } => {},
            }
        }
    }

    fn send(&mut self, participant: ParticipantId, activity: Activity) {
        if let Activity::Edit(edit) = &activity {
            self.sent.push((participant, edit.path.clone(), edit.timestamp.seq));
        }
        if participant == HOST {
            self.arrive(activity);
        } else if let Some(guest) = self.guests.get_mut(&participant) {
            guest.uplink.push_back(activity);
        }
    }

    /// An activity reaches the coordinator.
    fn arrive(&mut self, activity: Activity) {
        let origin = match &activity {
            Activity::Edit(edit) => {
                self.arrived.push((edit.source, edit.path.clone(), edit.timestamp.seq));
                Some(self.arrived.len() - 1)
            },
            _ => None,
        };
        let outgoing = self.session.transform_incoming(activity);
        self.route(outgoing, origin);
    }

    fn route(&mut self, outgoing: Vec<Outgoing>, origin: Option<usize>) {
        for Outgoing { recipient, activity } in outgoing {
            if recipient == HOST {
                self.deliver_to_host(activity, origin);
            } else if let Some(guest) = self.guests.get_mut(&recipient) {
                guest.downlink.push_back(Delivery::Activity { activity, origin });
            } else {
                tracing::warn!(participant = %recipient, kind = activity.kind(), "no such participant");
            }
        }
    }

    fn deliver_to_host(&mut self, activity: Activity, origin: Option<usize>) {
        if let Activity::RecoveryRequest(request) = &activity
            && request.target == HOST
        {
            let content: BTreeMap<ResourcePath, String> =
                self.host.documents().map(|(path, content)| (path.clone(), content.to_string())).collect();
            let served = self.recovery.handle_request(&self.session, request, &content);
            self.route(served, None);
            return;
        }

        self.record_received(HOST, origin);
        let _ = self.handle(HOST, ClientEvent::ActivityReceived(activity));
    }

    fn record_received(&mut self, participant: ParticipantId, origin: Option<usize>) {
        if let Some(index) = origin {
            self.received.entry(participant).or_default().push(index);
        }
    }
}
