//! Client events and actions.

use std::time::{Duration, Instant};

use coedit_proto::{Activity, Operation, ResourcePath};

/// Input fed to the client by its driver.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// Register a shared document that is already present locally.
    OpenDocument {
        /// Document path.
        path: ResourcePath,
        /// Current content.
        content: String,
    },

    /// The local user created a document to share.
    CreateDocument {
        /// Document path.
        path: ResourcePath,
        /// Initial content.
        content: String,
    },

    /// The local user changed a document.
    LocalEdit {
        /// Document path.
        path: ResourcePath,
        /// Operation against the current local content.
        operation: Operation,
    },

    /// The local user deleted a shared document.
    RemoveDocument {
        /// Document path.
        path: ResourcePath,
    },

    /// Activity arrived from the coordinator.
    ActivityReceived(Activity),

    /// Joining a session; activities for `missing` must wait.
    BeginNegotiation {
        /// Resources not received yet.
        missing: Vec<ResourcePath>,
    },

    /// One missing resource arrived.
    ResourceReceived {
        /// Document path.
        path: ResourcePath,
        /// Received content.
        content: String,
    },

    /// Publish checksums of every open document now. Only the coordinator
    /// publishes; on a guest this only logs.
    PublishChecksums,

    /// Ask the coordinator to replace every inconsistent document.
    StartRecovery,

    /// Time passed.
    Tick {
        /// Current time.
        now: Instant,
    },
}

/// Output the driver must execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientAction {
    /// Send to the coordinator.
    Send(Activity),

    /// Local content of `path` changed; editors should refresh.
    DocumentChanged {
        /// Document path.
        path: ResourcePath,
    },

    /// Document no longer exists.
    DocumentRemoved {
        /// Document path.
        path: ResourcePath,
    },

    /// The set of inconsistent documents changed.
    InconsistencyChanged {
        /// Currently inconsistent documents.
        paths: Vec<ResourcePath>,
    },

    /// Diagnostic for the driver's log.
    Log {
        /// Message.
        message: String,
    },
}

/// Client tuning.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Coordinator publishes checksums this often on `Tick`; `None` only on
    /// request.
    pub checksum_interval: Option<Duration>,
    /// Give up on a recovery that has not completed after this long.
    pub recovery_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self { checksum_interval: Some(Duration::from_secs(1)), recovery_timeout: Duration::from_secs(30) }
    }
}
