//! Page-side half of the lifecycle.
//!
//! Reacts to registration events the way the app's main thread does: reload
//! once when the controlling worker changes, offer an update when a new
//! version is waiting, and ask the worker for its version.

use std::time::Duration;

use tracing::{debug, info};

use crate::lifecycle::{Registration, RegistrationEvent, WorkerSlot, WorkerState};
use crate::messaging::{await_version, ClientMessage, MessageEffect, ReplyPort};
use crate::SwResult;

pub use crate::messaging::VERSION_QUERY_TIMEOUT;

/// What the page should do after an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageAction {
    None,
    /// Reload to run under the new worker.
    Reload,
    /// Show an "update available" prompt.
    PromptUpdate { version: String },
}

/// Controller for one open page.
#[derive(Debug, Clone)]
pub struct PageController {
    client_id: String,
    reloading: bool,
}

impl PageController {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            reloading: false,
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Whether a reload has already been requested.
    pub fn is_reloading(&self) -> bool {
        self.reloading
    }

    /// React to a registration event.
    pub fn handle_event(
        &mut self,
        event: &RegistrationEvent,
        registration: &Registration,
    ) -> PageAction {
        match event {
            RegistrationEvent::ControllerChange { client_id, version }
                if *client_id == self.client_id =>
            {
                if self.reloading {
                    return PageAction::None;
                }
                self.reloading = true;
                info!(client = %self.client_id, version = %version, "Controller changed, reloading");
                PageAction::Reload
            }
            RegistrationEvent::StateChange {
                version,
                state: WorkerState::Installed,
            } => {
                let waiting = registration
                    .waiting()
                    .is_some_and(|handle| handle.version() == version);
                if waiting && registration.active().is_some() {
                    debug!(version = %version, "Update waiting");
                    PageAction::PromptUpdate {
                        version: version.clone(),
                    }
                } else {
                    PageAction::None
                }
            }
            _ => PageAction::None,
        }
    }

    /// The user accepted the update prompt: activate the waiting worker.
    pub async fn accept_update(&self, registration: &mut Registration) -> SwResult<MessageEffect> {
        registration
            .post_message(WorkerSlot::Waiting, ClientMessage::SkipWaiting, None)
            .await
    }

    /// Ask the active worker for its version. `None` means unknown: no active
    /// worker, or no reply within `timeout`.
    pub async fn query_version(
        &self,
        registration: &Registration,
        timeout: Duration,
    ) -> Option<String> {
        let worker = registration.active()?.worker().clone();
        let (port, rx) = ReplyPort::channel();
        let query = async move {
            if let Err(e) = worker.on_message(ClientMessage::GetVersion, Some(port)).await {
                debug!(error = %e, "Version query failed");
            }
        };
        let (_, version) = tokio::join!(query, await_version(rx, timeout));
        version
    }
}
