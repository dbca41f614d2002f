//! Push payloads and notifications.

use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use tracing::{debug, info};

use crate::config::NotificationDefaults;
use crate::SwResult;

/// Action ID that only closes the notification.
pub const DISMISS_ACTION: &str = "dismiss";

/// Action ID that opens the app.
pub const OPEN_ACTION: &str = "open";

/// Fields a push message may override. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PushPayload {
    pub title: Option<String>,
    pub body: Option<String>,
    pub icon: Option<String>,
    pub badge: Option<String>,
    pub url: Option<String>,
}

impl PushPayload {
    /// Decode push data. Anything that is not a JSON object becomes the body.
    pub fn parse(data: Option<&[u8]>) -> Self {
        let Some(data) = data else {
            return Self::default();
        };
        match serde_json::from_slice::<PushPayload>(data) {
            Ok(payload) => payload,
            Err(e) => {
                debug!(error = %e, "Push data is not a JSON payload, using it as text");
                let text = String::from_utf8_lossy(data).trim().to_string();
                Self {
                    body: (!text.is_empty()).then_some(text),
                    ..Self::default()
                }
            }
        }
    }
}

/// A notification button.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationAction {
    pub action: String,
    pub title: String,
}

impl NotificationAction {
    pub fn new(action: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            title: title.into(),
        }
    }
}

/// Options accepted by `showNotification`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NotificationOptions {
    pub body: Option<String>,
    pub icon: Option<String>,
    pub badge: Option<String>,
    pub tag: Option<String>,
    pub data: Option<JsonValue>,
    pub actions: Vec<NotificationAction>,
    pub require_interaction: bool,
}

/// A notification to display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    pub options: NotificationOptions,
}

impl Notification {
    pub fn new(title: impl Into<String>, options: NotificationOptions) -> Self {
        Self {
            title: title.into(),
            options,
        }
    }

    /// Build the notification for a push message, filling gaps from `defaults`.
    pub fn from_push(payload: PushPayload, defaults: &NotificationDefaults) -> Self {
        let url = payload.url.unwrap_or_else(|| defaults.url.clone());
        Self {
            title: payload.title.unwrap_or_else(|| defaults.title.clone()),
            options: NotificationOptions {
                body: Some(payload.body.unwrap_or_else(|| defaults.body.clone())),
                icon: Some(payload.icon.unwrap_or_else(|| defaults.icon.clone())),
                badge: Some(payload.badge.unwrap_or_else(|| defaults.badge.clone())),
                tag: None,
                data: Some(json!({ "url": url })),
                actions: vec![
                    NotificationAction::new(OPEN_ACTION, "Open"),
                    NotificationAction::new(DISMISS_ACTION, "Dismiss"),
                ],
                require_interaction: false,
            },
        }
    }

    /// URL the app should show when the notification is clicked.
    pub fn target_url(&self) -> Option<&str> {
        self.options
            .data
            .as_ref()
            .and_then(|data| data.get("url"))
            .and_then(JsonValue::as_str)
    }
}

/// Displays notifications. The platform notification API sits behind this.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn show(&self, notification: &Notification) -> SwResult<()>;
}

/// Sink that only logs.
#[derive(Debug, Default)]
pub struct LogNotificationSink;

#[async_trait]
impl NotificationSink for LogNotificationSink {
    async fn show(&self, notification: &Notification) -> SwResult<()> {
        info!(
            title = %notification.title,
            body = notification.options.body.as_deref().unwrap_or(""),
            "Showing notification"
        );
        Ok(())
    }
}

/// Sink that remembers every notification shown.
#[derive(Debug, Default)]
pub struct RecordingNotificationSink {
    shown: Mutex<Vec<Notification>>,
}

impl RecordingNotificationSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shown(&self) -> Vec<Notification> {
        self.shown
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl NotificationSink for RecordingNotificationSink {
    async fn show(&self, notification: &Notification) -> SwResult<()> {
        self.shown
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(notification.clone());
        Ok(())
    }
}

/// Result of a notification click.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickOutcome {
    /// The dismiss action: nothing happens beyond closing.
    Dismissed,
    /// An open window was focused and told to navigate.
    Focused { client_id: String, url: String },
    /// No window was open, so one was opened.
    Opened { client_id: String, url: String },
}
