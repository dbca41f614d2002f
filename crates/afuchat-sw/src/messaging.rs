//! Control messages between pages and the worker.
//!
//! Pages post JSON objects tagged by `type`. Requests that expect an answer
//! (`GET_VERSION`) carry a [`ReplyPort`], the one-shot channel standing in for
//! a transferred `MessagePort`, so the caller can pair the reply with its
//! request.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use tokio::sync::oneshot;
use tracing::{debug, trace};

use crate::push::NotificationOptions;
use crate::{SwError, SwResult};

/// How long a page waits for a version reply before treating it as unknown.
pub const VERSION_QUERY_TIMEOUT: Duration = Duration::from_secs(1);

/// Page → worker message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
    /// Activate a waiting worker now.
    SkipWaiting,
    /// Ask for the worker version; answered over the reply port.
    GetVersion,
    /// Delete every cache bucket.
    ClearCache,
    /// Display a notification on behalf of the page.
    ShowNotification {
        title: String,
        #[serde(default)]
        options: NotificationOptions,
    },
}

impl ClientMessage {
    /// Parse a message posted by a page.
    pub fn parse(raw: &str) -> SwResult<Self> {
        serde_json::from_str(raw).map_err(|e| SwError::MessageError(e.to_string()))
    }

    pub fn to_json(&self) -> JsonValue {
        serde_json::to_value(self).unwrap_or(JsonValue::Null)
    }
}

/// Worker → page message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerMessage {
    /// The user clicked a notification; the page should navigate to `url`.
    NotificationClick { url: String },
}

/// What handling a message did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageEffect {
    /// The worker asks to be activated now.
    SkipWaiting,
    /// A reply was delivered (or its port was already closed).
    Replied,
    /// Every bucket was deleted.
    CachesCleared(Vec<String>),
    NotificationShown,
    /// Malformed or unknown message.
    Ignored,
}

/// Reply channel handed to the worker with a request.
#[derive(Debug)]
pub struct ReplyPort {
    tx: oneshot::Sender<JsonValue>,
}

impl ReplyPort {
    /// Create a reply port and the receiving end the caller keeps.
    pub fn channel() -> (Self, oneshot::Receiver<JsonValue>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx }, rx)
    }

    /// Send the reply. A caller that stopped waiting is not an error.
    pub fn reply(self, value: JsonValue) {
        if self.tx.send(value).is_err() {
            debug!("Reply port closed before the reply was sent");
        }
    }
}

/// Reply body for `GET_VERSION`.
pub fn version_reply(version: &str) -> JsonValue {
    json!({ "version": version })
}

/// Wait for a `GET_VERSION` reply. Silence, a dropped port or a malformed
/// reply all mean "unknown version".
pub async fn await_version(
    rx: oneshot::Receiver<JsonValue>,
    timeout: Duration,
) -> Option<String> {
    match tokio::time::timeout(timeout, rx).await {
        Ok(Ok(reply)) => reply
            .get("version")
            .and_then(JsonValue::as_str)
            .map(str::to_string),
        Ok(Err(_)) => {
            trace!("Version reply port dropped");
            None
        }
        Err(_) => {
            debug!(?timeout, "Version query timed out");
            None
        }
    }
}
