//! Session trace replay.
//!
//! A trace is a CBOR sequence of [`TraceEvent`]s captured on a coordinating
//! participant. Replaying it through a fresh [`SessionCoordinator`] yields
//! the exact routing decisions, which are written out as a CBOR sequence of
//! [`Outgoing`] items. Useful to reproduce a divergence report offline.
//!
//! The trace carries no document content, so recovery requests addressed to
//! the coordinator are routed like any other targeted activity instead of
//! being served.

use std::{
    fs,
    io::{BufWriter, Write},
    path::PathBuf,
};

use coedit_proto::{Activity, ParticipantId, ResourcePath};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    SessionError,
    membership::SessionRoster,
    session::{Outgoing, SessionCoordinator},
};

/// One recorded coordinator input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TraceEvent {
    /// Session start; must be the first event.
    Start {
        /// Coordinating participant.
        coordinator: ParticipantId,
        /// Projects shared by the coordinator.
        projects: Vec<String>,
    },
    /// Participant joined the roster and started queuing.
    StartedQueuing {
        /// Participant.
        participant: ParticipantId,
        /// Projects it shares.
        projects: Vec<String>,
    },
    /// Participant finished joining.
    Joined {
        /// Participant.
        participant: ParticipantId,
    },
    /// Participant left.
    Left {
        /// Participant.
        participant: ParticipantId,
    },
    /// Participant started negotiating.
    Negotiation {
        /// Participant.
        participant: ParticipantId,
        /// Resources it does not hold yet.
        missing: Vec<ResourcePath>,
    },
    /// Participant received one resource.
    ResourceReceived {
        /// Participant.
        participant: ParticipantId,
        /// Received resource.
        path: ResourcePath,
    },
    /// Incoming activity.
    Activity(Activity),
}

/// Where to read the trace and write the routed output.
#[derive(Debug, Clone)]
pub struct ReplayConfig {
    /// CBOR sequence of trace events.
    pub trace_path: PathBuf,
    /// Destination for the routed CBOR sequence.
    pub output_path: PathBuf,
}

/// Counters reported after a replay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    /// Trace events read.
    pub events: usize,
    /// Activities fed to the coordinator.
    pub activities: usize,
    /// Outgoing items written.
    pub routed: usize,
    /// Hooks that returned an error.
    pub rejected_hooks: usize,
}

/// Errors from trace replay.
#[derive(Debug, Error)]
pub enum ReplayError {
    /// Reading or writing a file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Trace contents are not valid CBOR trace events.
    #[error("malformed trace event #{index}: {reason}")]
    Decode {
        /// Zero-based index of the offending event.
        index: usize,
        /// Decoder message.
        reason: String,
    },

    /// Output could not be encoded.
    #[error("failed to encode output: {0}")]
    Encode(String),

    /// Trace does not begin with `TraceEvent::Start`.
    #[error("trace must begin with a start event")]
    MissingStart,

    /// Coordinator could not be constructed.
    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Replay the trace at `config.trace_path` into `config.output_path`.
pub fn replay(config: &ReplayConfig) -> Result<ReplaySummary, ReplayError> {
    let trace = fs::read(&config.trace_path)?;
    let events = decode_trace(&trace)?;
    let output = fs::File::create(&config.output_path)?;
    let mut writer = BufWriter::new(output);

    let summary = replay_events(events, |item| {
        ciborium::ser::into_writer(item, &mut writer).map_err(|e| ReplayError::Encode(e.to_string()))
    })?;
    writer.flush()?;

    tracing::info!(
        events = summary.events,
        activities = summary.activities,
        routed = summary.routed,
        rejected_hooks = summary.rejected_hooks,
        "replay finished"
    );
    Ok(summary)
}

/// Decode a CBOR sequence of trace events.
pub fn decode_trace(mut bytes: &[u8]) -> Result<Vec<TraceEvent>, ReplayError> {
    let mut events = Vec::new();
    while !bytes.is_empty() {
        let event = ciborium::de::from_reader(&mut bytes)
            .map_err(|e| ReplayError::Decode { index: events.len(), reason: e.to_string() })?;
        events.push(event);
    }
    Ok(events)
}

/// Encode trace events as a CBOR sequence.
pub fn encode_trace(events: &[TraceEvent]) -> Result<Vec<u8>, ReplayError> {
    let mut bytes = Vec::new();
    for event in events {
        ciborium::ser::into_writer(event, &mut bytes).map_err(|e| ReplayError::Encode(e.to_string()))?;
    }
    Ok(bytes)
}

/// Feed `events` through a fresh coordinator, handing every routed item to
/// `sink` in order.
pub fn replay_events(
    events: Vec<TraceEvent>,
    mut sink: impl FnMut(&Outgoing) -> Result<(), ReplayError>,
) -> Result<ReplaySummary, ReplayError> {
    let mut events = events.into_iter();
    let Some(TraceEvent::Start { coordinator, projects }) = events.next() else {
        return Err(ReplayError::MissingStart);
    };

    let session = SessionCoordinator::new(SessionRoster::hosted_by(coordinator, projects))?;
    let mut summary = ReplaySummary { events: 1, ..ReplaySummary::default() };

    for event in events {
        summary.events += 1;
        let hook = match event {
            TraceEvent::Start { .. } => {
                tracing::warn!(index = summary.events - 1, "repeated start event ignored");
                Ok(())
            },
            TraceEvent::StartedQueuing { participant, projects } => {
                session.membership().add_participant(participant, projects);
                session.participant_started_queuing(participant);
                Ok(())
            },
            TraceEvent::Joined { participant } => {
                session.participant_joined(participant);
                Ok(())
            },
            TraceEvent::Left { participant } => {
                session.participant_left(participant);
                session.membership().remove_participant(participant);
                Ok(())
            },
            TraceEvent::Negotiation { participant, missing } => {
                session.add_user_in_negotiation(participant, missing)
            },
            TraceEvent::ResourceReceived { participant, path } => {
                session.resource_received(participant, &path)
            },
            TraceEvent::Activity(activity) => {
                summary.activities += 1;
                for item in session.transform_incoming(activity) {
                    sink(&item)?;
                    summary.routed += 1;
                }
                Ok(())
            },
        };

        if let Err(err) = hook {
            tracing::warn!(index = summary.events - 1, error = %err, "hook rejected");
            summary.rejected_hooks += 1;
        }
    }

    Ok(summary)
}
