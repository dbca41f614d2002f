//! Worker lifecycle.
//!
//! A [`Registration`] owns the installing, waiting and active slots of one
//! scope and drives workers through
//! `installing → installed → activating → activated → redundant`. State
//! changes are published on an unbounded channel for the page side
//! ([`PageController`](crate::page::PageController)).

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use afuchat_net::Request;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, trace};
use url::Url;

use crate::messaging::{ClientMessage, MessageEffect, ReplyPort};
use crate::worker::{ActivateReport, FetchOutcome, InstallReport, OfflineWorker};
use crate::{SwError, SwResult};

/// Worker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerState {
    /// Running the install handler.
    Installing,
    /// Installed but waiting for activation.
    Installed,
    /// Running the activate handler.
    Activating,
    /// Active and controlling pages.
    Activated,
    /// Replaced or unregistered.
    Redundant,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkerState::Installing => "installing",
            WorkerState::Installed => "installed",
            WorkerState::Activating => "activating",
            WorkerState::Activated => "activated",
            WorkerState::Redundant => "redundant",
        };
        f.write_str(name)
    }
}

/// Registration slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerSlot {
    Installing,
    Waiting,
    Active,
}

/// A worker held by a registration.
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    worker: Arc<OfflineWorker>,
    state: WorkerState,
    state_changed_at: Instant,
}

impl WorkerHandle {
    fn new(worker: Arc<OfflineWorker>) -> Self {
        Self {
            worker,
            state: WorkerState::Installing,
            state_changed_at: Instant::now(),
        }
    }

    pub fn worker(&self) -> &Arc<OfflineWorker> {
        &self.worker
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn version(&self) -> &str {
        self.worker.version()
    }

    /// Time of the last state change.
    pub fn state_changed_at(&self) -> Instant {
        self.state_changed_at
    }
}

/// Registration events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationEvent {
    /// A worker changed state.
    StateChange { version: String, state: WorkerState },
    /// A new worker started installing.
    UpdateFound { version: String },
    /// A client is now controlled by a different worker.
    ControllerChange { client_id: String, version: String },
}

/// A worker registration for one scope.
#[derive(Debug)]
pub struct Registration {
    scope: Url,
    installing: Option<WorkerHandle>,
    waiting: Option<WorkerHandle>,
    active: Option<WorkerHandle>,
    event_tx: mpsc::UnboundedSender<RegistrationEvent>,
}

impl Registration {
    /// Create an empty registration and its event stream.
    pub fn new(scope: Url) -> (Self, mpsc::UnboundedReceiver<RegistrationEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        (
            Self {
                scope,
                installing: None,
                waiting: None,
                active: None,
                event_tx,
            },
            event_rx,
        )
    }

    pub fn scope(&self) -> &Url {
        &self.scope
    }

    pub fn installing(&self) -> Option<&WorkerHandle> {
        self.installing.as_ref()
    }

    pub fn waiting(&self) -> Option<&WorkerHandle> {
        self.waiting.as_ref()
    }

    pub fn active(&self) -> Option<&WorkerHandle> {
        self.active.as_ref()
    }

    pub fn slot(&self, slot: WorkerSlot) -> Option<&WorkerHandle> {
        match slot {
            WorkerSlot::Installing => self.installing(),
            WorkerSlot::Waiting => self.waiting(),
            WorkerSlot::Active => self.active(),
        }
    }

    /// Install a new worker version.
    ///
    /// The worker becomes active right away when it asks to skip waiting or
    /// nothing is active yet; otherwise it waits for `SKIP_WAITING`.
    pub async fn register(&mut self, worker: OfflineWorker) -> SwResult<InstallReport> {
        let worker = Arc::new(worker);
        info!(scope = %self.scope, version = %worker.version(), "Registering worker");

        let mut handle = WorkerHandle::new(worker.clone());
        self.emit(RegistrationEvent::UpdateFound {
            version: worker.version().to_string(),
        });
        self.emit_state(&handle);
        self.installing = Some(handle.clone());

        let report = worker.on_install().await;

        self.installing = None;
        self.set_state(&mut handle, WorkerState::Installed);
        if let Some(mut replaced) = self.waiting.take() {
            self.set_state(&mut replaced, WorkerState::Redundant);
        }
        self.waiting = Some(handle);

        if report.skip_waiting || self.active.is_none() {
            self.activate_waiting().await?;
        }
        Ok(report)
    }

    /// Promote the waiting worker. The previous active worker becomes redundant.
    pub async fn activate_waiting(&mut self) -> SwResult<ActivateReport> {
        let mut handle = self
            .waiting
            .take()
            .ok_or_else(|| SwError::StateError("no waiting worker".to_string()))?;

        self.set_state(&mut handle, WorkerState::Activating);
        if let Some(mut old) = self.active.take() {
            self.set_state(&mut old, WorkerState::Redundant);
        }

        let report = handle.worker.on_activate().await;
        self.set_state(&mut handle, WorkerState::Activated);

        let version = handle.version().to_string();
        for client_id in &report.claimed {
            self.emit(RegistrationEvent::ControllerChange {
                client_id: client_id.clone(),
                version: version.clone(),
            });
        }
        self.active = Some(handle);
        Ok(report)
    }

    /// Post a control message to the worker in `slot`.
    ///
    /// `SKIP_WAITING` sent to the waiting worker activates it.
    pub async fn post_message(
        &mut self,
        slot: WorkerSlot,
        message: ClientMessage,
        reply: Option<ReplyPort>,
    ) -> SwResult<MessageEffect> {
        let worker = self
            .slot(slot)
            .map(|handle| handle.worker.clone())
            .ok_or_else(|| SwError::NotFound(format!("no {slot:?} worker")))?;

        let effect = worker.on_message(message, reply).await?;
        if effect == MessageEffect::SkipWaiting && slot == WorkerSlot::Waiting {
            self.activate_waiting().await?;
        }
        Ok(effect)
    }

    /// Route a fetch to the active worker. Without one, requests pass through.
    pub async fn handle_fetch(&self, request: &Request) -> FetchOutcome {
        match &self.active {
            Some(handle) => handle.worker.on_fetch(request).await,
            None => {
                trace!(url = %request.url, "No active worker");
                FetchOutcome::Passthrough
            }
        }
    }

    /// Drop every worker.
    pub fn unregister(&mut self) {
        for slot in [
            self.installing.take(),
            self.waiting.take(),
            self.active.take(),
        ] {
            if let Some(mut handle) = slot {
                self.set_state(&mut handle, WorkerState::Redundant);
            }
        }
        info!(scope = %self.scope, "Unregistered");
    }

    fn set_state(&self, handle: &mut WorkerHandle, state: WorkerState) {
        debug!(version = %handle.version(), from = %handle.state, to = %state, "Worker state change");
        handle.state = state;
        handle.state_changed_at = Instant::now();
        self.emit_state(handle);
    }

    fn emit_state(&self, handle: &WorkerHandle) {
        self.emit(RegistrationEvent::StateChange {
            version: handle.version().to_string(),
            state: handle.state,
        });
    }

    fn emit(&self, event: RegistrationEvent) {
        if self.event_tx.send(event).is_err() {
            trace!("No listener for registration events");
        }
    }
}
