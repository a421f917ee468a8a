//! Identity types.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Session-scoped participant identity.
///
/// The derived ordering is the fixed total order used to break insert ties
/// during transformation, so every replica resolves them identically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(pub u64);

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "participant-{}", self.0)
    }
}

/// Identifier of one recovery session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecoveryId(pub u64);

impl fmt::Display for RecoveryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// A shared file: project identifier plus project-relative path.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourcePath {
    /// Project the file belongs to.
    pub project: String,
    /// Path relative to the project root.
    pub path: String,
}

impl ResourcePath {
    /// Create a resource path.
    pub fn new(project: impl Into<String>, path: impl Into<String>) -> Self {
        Self { project: project.into(), path: path.into() }
    }
}

impl fmt::Display for ResourcePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.project, self.path)
    }
}
