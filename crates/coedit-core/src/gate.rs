//! Deferral of activities for resources that are not available yet.
//!
//! While a joining participant is still receiving the project, activities
//! for paths it does not have yet must wait. The gate holds them back and
//! releases them once the path becomes available, without ever reordering
//! the stream: once anything is held, everything after it is held too.
//!
//! # Invariants
//!
//! - Every activity handed to [`ResourceGate::process`] is returned by some
//!   call exactly once
//! - Returned activities keep their input order
//! - With no unavailable paths and an empty backlog the gate is a
//!   pass-through

use std::collections::{BTreeSet, VecDeque};

use coedit_proto::{Activity, ResourcePath};

/// Order-preserving filter for activities on unavailable paths.
#[derive(Debug, Clone, Default)]
pub struct ResourceGate {
    unavailable: BTreeSet<ResourcePath>,
    backlog: VecDeque<Activity>,
}

impl ResourceGate {
    /// Gate holding back activities for `unavailable` paths.
    pub fn new(unavailable: impl IntoIterator<Item = ResourcePath>) -> Self {
        Self { unavailable: unavailable.into_iter().collect(), backlog: VecDeque::new() }
    }

    /// Mark `path` as available. Queued activities are released by the next
    /// [`process`](Self::process) call.
    ///
    /// Returns `false` if the path was not held back.
    pub fn disable_queuing(&mut self, path: &ResourcePath) -> bool {
        let removed = self.unavailable.remove(path);
        if removed {
            tracing::debug!(%path, queued = self.backlog.len(), "resource available");
        }
        removed
    }

    /// Filter a batch, returning what can be delivered now.
    pub fn process(&mut self, activities: Vec<Activity>) -> Vec<Activity> {
        if self.is_passthrough() {
            return activities;
        }

        let mut deliverable = Vec::new();
        while self.backlog.front().is_some_and(|activity| !self.is_blocked(activity)) {
            if let Some(activity) = self.backlog.pop_front() {
                deliverable.push(activity);
            }
        }

        for activity in activities {
            if !self.backlog.is_empty() || self.is_blocked(&activity) {
                tracing::trace!(kind = activity.kind(), "activity queued");
                self.backlog.push_back(activity);
            } else {
                deliverable.push(activity);
            }
        }

        deliverable
    }

    /// True if nothing is held back and nothing would be.
    pub fn is_passthrough(&self) -> bool {
        self.unavailable.is_empty() && self.backlog.is_empty()
    }

    /// Number of queued activities.
    pub fn queued(&self) -> usize {
        self.backlog.len()
    }

    /// Paths currently held back.
    pub fn unavailable(&self) -> impl Iterator<Item = &ResourcePath> {
        self.unavailable.iter()
    }

    fn is_blocked(&self, activity: &Activity) -> bool {
        activity.path().is_some_and(|path| self.unavailable.contains(path))
    }
}

#[cfg(test)]
mod tests {
    use coedit_proto::{
        EditActivity, FileActivity, FileKind, Operation, ParticipantId, ProgressActivity, Timestamp,
    };

    use super::*;

    fn edit(path: &str, text: &str) -> Activity {
        Activity::Edit(EditActivity {
            source: ParticipantId(1),
            path: ResourcePath::new("p", path),
            operation: Operation::insert(0, text),
            timestamp: Timestamp::new(1, 0),
        })
    }

    fn progress() -> Activity {
        Activity::Progress(ProgressActivity {
            source: ParticipantId(1),
            target: None,
            progress_id: "sync".into(),
            worked: 1,
            total: 2,
            message: "copying".into(),
        })
    }

    #[test]
    fn passthrough_without_unavailable_paths() {
        let mut gate = ResourceGate::default();
        let batch = vec![edit("a", "1"), progress()];
        assert_eq!(gate.process(batch.clone()), batch);
        assert!(gate.is_passthrough());
    }

    #[test]
    fn blocked_activity_holds_back_everything_after_it() {
        let mut gate = ResourceGate::new([ResourcePath::new("p", "x")]);

        let out = gate.process(vec![edit("a", "1"), edit("x", "2"), edit("a", "3"), progress()]);
        assert_eq!(out, vec![edit("a", "1")]);
        assert_eq!(gate.queued(), 3);
    }

    #[test]
    fn release_preserves_order() {
        let mut gate = ResourceGate::new([ResourcePath::new("p", "x")]);
        gate.process(vec![edit("x", "1"), edit("a", "2")]);

        assert!(gate.disable_queuing(&ResourcePath::new("p", "x")));
        let out = gate.process(vec![edit("a", "3")]);
        assert_eq!(out, vec![edit("x", "1"), edit("a", "2"), edit("a", "3")]);
        assert!(gate.is_passthrough());
    }

    #[test]
    fn empty_batch_flushes_released_backlog() {
        let mut gate = ResourceGate::new([ResourcePath::new("p", "a")]);
        assert!(gate.process(vec![]).is_empty());
        assert!(gate.process(vec![edit("a", "1")]).is_empty());
        let out = gate.process(vec![edit("b", "2"), edit("x", "3")]);
        assert!(out.is_empty());
        assert_eq!(gate.queued(), 3);

        gate.disable_queuing(&ResourcePath::new("p", "a"));
        let out = gate.process(vec![]);
        assert_eq!(out, vec![edit("a", "1"), edit("b", "2"), edit("x", "3")]);
        assert_eq!(gate.queued(), 0);
    }

    #[test]
    fn backlog_drains_up_to_the_first_blocked_entry() {
        let mut gate = ResourceGate::new([ResourcePath::new("p", "x"), ResourcePath::new("p", "y")]);
        gate.process(vec![edit("x", "1"), edit("a", "2"), edit("y", "3"), edit("a", "4")]);

        gate.disable_queuing(&ResourcePath::new("p", "x"));
        assert_eq!(gate.process(vec![]), vec![edit("x", "1"), edit("a", "2")]);
        assert_eq!(gate.queued(), 2);
        assert!(!gate.disable_queuing(&ResourcePath::new("p", "x")));
    }

    #[test]
    fn releases_follow_the_order_resources_arrive() {
        let (a, b) = (ResourcePath::new("p", "A"), ResourcePath::new("p", "B"));
        let mut gate = ResourceGate::new([a.clone(), b.clone()]);

        assert!(gate.process(vec![edit("A", "1"), edit("B", "2"), edit("X", "3")]).is_empty());

        gate.disable_queuing(&a);
        assert_eq!(gate.process(vec![]), vec![edit("A", "1")]);

        gate.disable_queuing(&b);
        assert_eq!(gate.process(vec![]), vec![edit("B", "2"), edit("X", "3")]);
        assert!(gate.is_passthrough());
    }

    #[test]
    fn pathless_activities_wait_behind_blocked_ones() {
        let removal = Activity::File(FileActivity {
            source: ParticipantId(1),
            path: ResourcePath::new("p", "x"),
            kind: FileKind::Removed,
        });
        let mut gate = ResourceGate::new([ResourcePath::new("p", "x")]);
        assert!(gate.process(vec![removal, progress()]).is_empty());
        assert_eq!(gate.queued(), 2);
    }
}
