//! Consistency checking and recovery bookkeeping.
//!
//! Participants periodically compare checksums of the coordinator's copies
//! with their own. A mismatch on a report that is current (same vector time)
//! flags the path as inconsistent. Flags are only cleared by a completed
//! recovery, never by a later matching report.
//!
//! A recovery replaces flagged documents with the coordinator's content and
//! then re-checks them with checksums tagged with the recovery id. While a
//! recovery is running, every untagged report is discarded: it was taken
//! against content that is about to be overwritten.

use std::{
    collections::{BTreeMap, BTreeSet},
    time::Instant,
};

use coedit_proto::{ChecksumReport, ContentHash, ParticipantId, RecoveryId, ResourcePath, Timestamp};
use sha2::{Digest, Sha256};

/// SHA-256 of the document content.
pub fn content_hash(content: &str) -> ContentHash {
    ContentHash(Sha256::digest(content.as_bytes()).into())
}

/// Checksum report describing `content`.
pub fn checksum_of(
    source: ParticipantId,
    path: ResourcePath,
    content: &str,
    timestamp: Timestamp,
) -> ChecksumReport {
    ChecksumReport {
        source,
        path,
        hash: content_hash(content),
        length: content.chars().count() as u64,
        recovery_id: None,
        timestamp,
    }
}

/// True if `report` describes exactly `content`.
pub fn matches(report: &ChecksumReport, content: &str) -> bool {
    report.length == content.chars().count() as u64 && report.hash == content_hash(content)
}

/// Outcome of checking one report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Local content matches.
    Consistent,
    /// Local content differs (or is missing); the path is flagged.
    Inconsistent,
    /// Vector times differ; the report says nothing about consistency.
    NotCurrent,
    /// Report belongs to no running recovery, or predates the running one.
    Discarded,
}

/// Recovery in flight.
#[derive(Debug, Clone)]
pub struct Recovery {
    /// Identifier tagging every activity of this recovery.
    pub id: RecoveryId,
    /// Paths being recovered.
    pub paths: BTreeSet<ResourcePath>,
    /// When the request was sent.
    pub started_at: Instant,
    failed: BTreeSet<ResourcePath>,
}

/// Result of finishing a recovery.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryOutcome {
    /// Paths whose flag was cleared.
    pub recovered: Vec<ResourcePath>,
    /// Paths whose post-recovery checksum still mismatched.
    pub still_inconsistent: Vec<ResourcePath>,
}

/// Participant-side consistency state.
#[derive(Debug, Clone, Default)]
pub struct ConsistencyWatchdog {
    inconsistent: BTreeSet<ResourcePath>,
    recovery: Option<Recovery>,
}

impl ConsistencyWatchdog {
    /// Watchdog with nothing flagged.
    pub fn new() -> Self {
        Self::default()
    }

    /// Compare `report` against `local` content.
    ///
    /// `current` tells whether the report's vector time matches the local
    /// Jupiter state; a report that is not current is never compared. A
    /// missing local document counts as a mismatch.
    pub fn check(&mut self, report: &ChecksumReport, local: Option<&str>, current: bool) -> Verdict {
        if let Some(recovery) = &mut self.recovery {
            if report.recovery_id != Some(recovery.id) {
                return Verdict::Discarded;
            }
            if !current {
                return Verdict::NotCurrent;
            }
            return if local.is_some_and(|content| matches(report, content)) {
                recovery.failed.remove(&report.path);
                Verdict::Consistent
            } else {
                tracing::warn!(
                    path = %report.path,
                    recovery = %recovery.id,
                    "document still inconsistent after replacement"
                );
                recovery.failed.insert(report.path.clone());
                Verdict::Inconsistent
            };
        }

        if report.recovery_id.is_some() {
            return Verdict::Discarded;
        }
        if !current {
            return Verdict::NotCurrent;
        }

        if local.is_some_and(|content| matches(report, content)) {
            return Verdict::Consistent;
        }

        if self.inconsistent.insert(report.path.clone()) {
            tracing::warn!(
                path = %report.path,
                expected = %hex::encode(report.hash.0),
                expected_len = report.length,
                "inconsistency detected"
            );
        }
        Verdict::Inconsistent
    }

    /// Flag `path` without a checksum, e.g. after a failed transformation.
    pub fn flag(&mut self, path: ResourcePath) -> bool {
        self.inconsistent.insert(path)
    }

    /// Forget `path`; used when the document was removed.
    pub fn forget(&mut self, path: &ResourcePath) -> bool {
        self.inconsistent.remove(path)
    }

    /// Keep only the last report per path (and recovery id) of a batch.
    ///
    /// Earlier reports of the same batch are superseded by later ones.
    /// Survivors keep the position of their last occurrence.
    pub fn latest_reports(reports: impl IntoIterator<Item = ChecksumReport>) -> Vec<ChecksumReport> {
        let indexed: Vec<ChecksumReport> = reports.into_iter().collect();
        let mut last: BTreeMap<(ResourcePath, Option<RecoveryId>), usize> = BTreeMap::new();
        for (i, report) in indexed.iter().enumerate() {
            last.insert((report.path.clone(), report.recovery_id), i);
        }
        let keep: BTreeSet<usize> = last.into_values().collect();
        indexed
            .into_iter()
            .enumerate()
            .filter(|(i, _)| keep.contains(i))
            .map(|(_, report)| report)
            .collect()
    }

    /// Start recovering every flagged path.
    ///
    /// Returns the paths to request, or `None` if nothing is flagged or a
    /// recovery is already running.
    pub fn begin_recovery(&mut self, id: RecoveryId, now: Instant) -> Option<Vec<ResourcePath>> {
        if self.recovery.is_some() || self.inconsistent.is_empty() {
            return None;
        }
        let paths = self.inconsistent.clone();
        tracing::info!(recovery = %id, paths = paths.len(), "recovery started");
        self.recovery = Some(Recovery { id, paths: paths.clone(), started_at: now, failed: BTreeSet::new() });
        Some(paths.into_iter().collect())
    }

    /// Finish recovery `id`.
    ///
    /// Flags are cleared for every recovered path whose tagged checksum did
    /// not mismatch. Returns `None` if `id` is not the running recovery.
    pub fn complete_recovery(&mut self, id: RecoveryId) -> Option<RecoveryOutcome> {
        if self.recovery.as_ref().is_none_or(|recovery| recovery.id != id) {
            return None;
        }
        let recovery = self.recovery.take()?;

        let mut outcome = RecoveryOutcome::default();
        for path in recovery.paths {
            if recovery.failed.contains(&path) {
                outcome.still_inconsistent.push(path);
            } else {
                self.inconsistent.remove(&path);
                outcome.recovered.push(path);
            }
        }
        tracing::info!(
            recovery = %id,
            recovered = outcome.recovered.len(),
            failed = outcome.still_inconsistent.len(),
            "recovery complete"
        );
        Some(outcome)
    }

    /// Give up on the running recovery, keeping every flag.
    pub fn abort_recovery(&mut self) -> Option<Recovery> {
        let recovery = self.recovery.take();
        if let Some(recovery) = &recovery {
            tracing::warn!(recovery = %recovery.id, "recovery aborted");
        }
        recovery
    }

    /// Running recovery, if any.
    pub fn recovery(&self) -> Option<&Recovery> {
        self.recovery.as_ref()
    }

    /// True if any path is flagged.
    pub fn is_inconsistent(&self) -> bool {
        !self.inconsistent.is_empty()
    }

    /// Flagged paths in order.
    pub fn inconsistent_paths(&self) -> impl Iterator<Item = &ResourcePath> {
        self.inconsistent.iter()
    }
}
