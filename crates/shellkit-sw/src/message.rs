//! Messages between pages and the worker.

use serde::{Deserialize, Serialize};

use crate::push::Notification;
use crate::ServiceWorkerError;

/// Page → worker message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerMessage {
    /// Activate the waiting worker now.
    SkipWaiting,
    /// Ask for the running version.
    GetVersion,
    /// Delete the current store.
    ClearCache,
}

impl WorkerMessage {
    /// Parse a message posted by a page.
    pub fn from_json(json: &str) -> Result<Self, ServiceWorkerError> {
        serde_json::from_str(json).map_err(|e| ServiceWorkerError::InvalidMessage(e.to_string()))
    }
}

/// Reply to [`WorkerMessage::GetVersion`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionReply {
    pub version: String,
}

/// What handling a message did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageOutcome {
    /// The registration should activate its waiting worker.
    SkipWaiting,
    /// Reply for the sender's port.
    Reply(VersionReply),
    /// The current store was deleted (`false` if it did not exist).
    Cleared(bool),
}

/// Worker → page event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PageEvent {
    /// A new worker installed while an older one controls the page.
    UpdateAvailable { version: String },
    /// A worker took control of a client.
    ControllerChange { client_id: String, version: String },
    /// A push notification was displayed.
    NotificationShown { notification: Notification },
    /// A notification click opened a new window.
    OpenWindow { client_id: String, url: String },
    /// A notification click focused an existing window.
    FocusClient { client_id: String, url: String },
}
