//! # AfuChat Offline Worker
//!
//! Offline caching and service-worker coordination for the AfuChat web client.
//!
//! ## Features
//!
//! - **Cache registry**: versioned bucket names and activate-time cleanup
//! - **Route classification**: an ordered, immutable rule list, first match wins
//! - **Strategies**: network-first, cache-first, stale-while-revalidate
//! - **Offline fallback**: every navigation ends in a renderable document
//! - **Lifecycle**: install, activate, skip-waiting, client claiming
//! - **Messaging**: control messages from pages, push notifications
//!
//! ## Architecture
//!
//! ```text
//! Registration (host driver)
//!     ├── installing ─┐
//!     ├── waiting     ├── OfflineWorker
//!     └── active ─────┘     ├── Router ──────── RouteRule[] (first match wins)
//!                           ├── StrategyExecutor ── CacheStorage (shared)
//!                           ├── OfflineFallback ─── OfflinePage
//!                           └── WorkerContext
//!                                   ├── Fetcher
//!                                   ├── Clients
//!                                   └── NotificationSink
//!
//! PageController (main thread)
//!     └── RegistrationEvent stream → reload / update prompt
//! ```

use afuchat_common::AfuError;
use afuchat_net::NetError;
use thiserror::Error;

pub mod cache;
pub mod clients;
pub mod config;
pub mod fallback;
pub mod lifecycle;
pub mod messaging;
pub mod offline_page;
pub mod page;
pub mod push;
pub mod registry;
pub mod router;
pub mod strategy;
pub mod worker;

pub use cache::{Cache, CacheEntry, CacheStorage, ExpirationPolicy, SharedStorage};
pub use clients::{Client, ClientMatchOptions, ClientType, Clients, SharedClients};
pub use config::{BackendConfig, NotificationDefaults, PrecacheEntry, RouteExpirations, SwConfig};
pub use lifecycle::{Registration, RegistrationEvent, WorkerSlot, WorkerState};
pub use messaging::{ClientMessage, MessageEffect, ReplyPort, WorkerMessage};
pub use offline_page::OfflinePage;
pub use page::{PageAction, PageController};
pub use push::{
    ClickOutcome, LogNotificationSink, Notification, NotificationAction, NotificationOptions,
    NotificationSink, PushPayload, RecordingNotificationSink,
};
pub use registry::{CachePurpose, CacheRegistry};
pub use router::{RouteMatcher, RouteRule, Router, StrategyKind};
pub use strategy::StrategyExecutor;
pub use worker::{ActivateReport, FetchOutcome, InstallReport, OfflineWorker, WorkerContext};

/// Errors that can occur in offline worker operations.
#[derive(Error, Debug)]
pub enum SwError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("State error: {0}")]
    StateError(String),

    #[error("Cache error: {0}")]
    CacheError(String),

    #[error("Message error: {0}")]
    MessageError(String),

    #[error("Notification error: {0}")]
    NotificationError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Network error: {0}")]
    Network(#[from] NetError),

    #[error(transparent)]
    Common(#[from] AfuError),
}

/// Result type alias for offline worker operations.
pub type SwResult<T> = Result<T, SwError>;
