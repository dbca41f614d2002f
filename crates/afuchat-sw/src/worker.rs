//! The offline worker.
//!
//! One [`OfflineWorker`] is one worker version. Platform events map onto its
//! handlers: `install` → [`OfflineWorker::on_install`], `activate` →
//! [`OfflineWorker::on_activate`], `fetch` → [`OfflineWorker::on_fetch`],
//! `message` → [`OfflineWorker::on_message`], `push` →
//! [`OfflineWorker::on_push`], `notificationclick` →
//! [`OfflineWorker::on_notification_click`]. The state those handlers share
//! (cache storage, clients, network, notifications) is passed in explicitly as
//! a [`WorkerContext`].

use std::sync::Arc;

use afuchat_net::{cache_key_for, Fetcher, Request, Response};
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::cache::{ExpirationPolicy, SharedStorage};
use crate::clients::{ClientMatchOptions, ClientType, SharedClients};
use crate::config::SwConfig;
use crate::fallback::OfflineFallback;
use crate::messaging::{version_reply, ClientMessage, MessageEffect, ReplyPort, WorkerMessage};
use crate::offline_page::OfflinePage;
use crate::push::{ClickOutcome, Notification, NotificationSink, PushPayload, DISMISS_ACTION};
use crate::registry::{CachePurpose, CacheRegistry};
use crate::router::Router;
use crate::strategy::StrategyExecutor;
use crate::SwResult;

/// Query parameter carrying a precache entry's revision.
const REVISION_PARAM: &str = "_rev";

/// Resources shared by every worker version of a registration.
#[derive(Clone)]
pub struct WorkerContext {
    pub storage: SharedStorage,
    pub fetcher: Arc<dyn Fetcher>,
    pub clients: SharedClients,
    pub notifications: Arc<dyn NotificationSink>,
}

impl WorkerContext {
    pub fn new(
        storage: SharedStorage,
        fetcher: Arc<dyn Fetcher>,
        clients: SharedClients,
        notifications: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            storage,
            fetcher,
            clients,
            notifications,
        }
    }
}

/// What `install` cached.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallReport {
    /// Cache keys written.
    pub cached: Vec<String>,
    /// URLs that could not be cached. Install still succeeds.
    pub failed: Vec<String>,
    /// Whether the worker asks to skip the waiting phase.
    pub skip_waiting: bool,
}

/// What `activate` cleaned up and claimed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivateReport {
    /// Buckets deleted because they belong to another version.
    pub deleted: Vec<String>,
    /// Clients whose controller changed to this worker.
    pub claimed: Vec<String>,
}

/// Result of a fetch event.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    /// Not intercepted; the platform performs the request.
    Passthrough,
    /// Intercepted and answered.
    Respond(Response),
}

impl FetchOutcome {
    pub fn response(&self) -> Option<&Response> {
        match self {
            FetchOutcome::Respond(response) => Some(response),
            FetchOutcome::Passthrough => None,
        }
    }

    pub fn into_response(self) -> Option<Response> {
        match self {
            FetchOutcome::Respond(response) => Some(response),
            FetchOutcome::Passthrough => None,
        }
    }
}

/// One version of the offline worker.
pub struct OfflineWorker {
    config: SwConfig,
    registry: CacheRegistry,
    router: Router,
    executor: StrategyExecutor,
    fallback: OfflineFallback,
    context: WorkerContext,
}

impl std::fmt::Debug for OfflineWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OfflineWorker")
            .field("version", &self.registry.version())
            .field("rules", &self.router.rules().len())
            .finish()
    }
}

impl OfflineWorker {
    /// Build a worker from a validated configuration.
    pub fn new(config: SwConfig, context: WorkerContext) -> SwResult<Self> {
        config.validate()?;
        let registry = CacheRegistry::from_config(&config);
        let router = Router::from_config(&config);
        let executor = StrategyExecutor::new(
            context.storage.clone(),
            context.fetcher.clone(),
            registry.clone(),
        );
        let fallback = OfflineFallback::new(&config, OfflinePage::new(&registry));
        debug!(version = %registry.version(), rules = router.rules().len(), "Created worker");

        Ok(Self {
            config,
            registry,
            router,
            executor,
            fallback,
            context,
        })
    }

    pub fn version(&self) -> &str {
        self.registry.version()
    }

    pub fn config(&self) -> &SwConfig {
        &self.config
    }

    pub fn registry(&self) -> &CacheRegistry {
        &self.registry
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn executor(&self) -> &StrategyExecutor {
        &self.executor
    }

    pub fn fallback(&self) -> &OfflineFallback {
        &self.fallback
    }

    pub fn context(&self) -> &WorkerContext {
        &self.context
    }

    /// Populate this version's buckets.
    ///
    /// Only the offline document is guaranteed; network failures while caching
    /// the precache manifest or the app shell are logged and reported.
    #[instrument(skip(self), fields(version = %self.version()))]
    pub async fn on_install(&self) -> InstallReport {
        let mut report = InstallReport {
            skip_waiting: self.config.skip_waiting_on_install,
            ..Default::default()
        };

        let offline_bucket = self.registry.bucket_name(CachePurpose::Offline);
        let offline_key = self.fallback.offline_key().to_string();
        if self
            .executor
            .store(
                &offline_bucket,
                &offline_key,
                &self.fallback.page().response(),
                &ExpirationPolicy::none(),
            )
            .await
        {
            report.cached.push(offline_key);
        }

        let precache_bucket = self.registry.bucket_name(CachePurpose::Precache);
        for entry in &self.config.precache {
            let url = match self.config.resolve(&entry.url) {
                Ok(url) => url,
                Err(e) => {
                    warn!(url = %entry.url, error = %e, "Skipping unresolvable precache entry");
                    report.failed.push(entry.url.clone());
                    continue;
                }
            };
            let mut fetch_url = url.clone();
            if let Some(revision) = &entry.revision {
                fetch_url
                    .query_pairs_mut()
                    .append_pair(REVISION_PARAM, revision);
            }
            self.cache_for_install(
                &precache_bucket,
                &cache_key_for(&url),
                fetch_url,
                &ExpirationPolicy::none(),
                &mut report,
            )
            .await;
        }

        let pages_bucket = self.registry.bucket_name(CachePurpose::Pages);
        for key in self.fallback.shell_keys().to_vec() {
            match Url::parse(&key) {
                Ok(url) => {
                    self.cache_for_install(
                        &pages_bucket,
                        &key,
                        url,
                        &self.config.expirations.pages,
                        &mut report,
                    )
                    .await
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "Invalid app shell key");
                    report.failed.push(key);
                }
            }
        }

        info!(
            cached = report.cached.len(),
            failed = report.failed.len(),
            skip_waiting = report.skip_waiting,
            "Install finished"
        );
        report
    }

    async fn cache_for_install(
        &self,
        bucket: &str,
        key: &str,
        url: Url,
        policy: &ExpirationPolicy,
        report: &mut InstallReport,
    ) {
        let request = Request::get(url);
        match self.context.fetcher.fetch(&request).await {
            Ok(response) if response.is_cacheable() => {
                self.executor.store(bucket, key, &response, policy).await;
                report.cached.push(key.to_string());
            }
            Ok(response) => {
                warn!(url = %request.url, status = response.status, "Not caching install resource");
                report.failed.push(request.url.to_string());
            }
            Err(e) => {
                warn!(url = %request.url, error = %e, "Failed to fetch install resource");
                report.failed.push(request.url.to_string());
            }
        }
    }

    /// Delete every bucket that is not this version's, then claim open pages.
    #[instrument(skip(self), fields(version = %self.version()))]
    pub async fn on_activate(&self) -> ActivateReport {
        let deleted = {
            let mut storage = self.context.storage.write().await;
            let stale: Vec<String> = storage
                .keys()
                .into_iter()
                .filter(|name| !self.registry.is_valid(name))
                .collect();
            for name in &stale {
                storage.delete(name);
                debug!(cache = %name, "Deleted stale cache");
            }
            stale
        };

        let claimed = self
            .context
            .clients
            .write()
            .await
            .claim(self.version());

        info!(deleted = deleted.len(), claimed = claimed.len(), "Activated");
        ActivateReport { deleted, claimed }
    }

    /// Route an intercepted request.
    pub async fn on_fetch(&self, request: &Request) -> FetchOutcome {
        let Some(rule) = self.router.classify(request) else {
            return FetchOutcome::Passthrough;
        };
        let response = if rule.offline_fallback {
            self.fallback.respond(&self.executor, rule, request).await
        } else {
            self.executor.execute(rule, request).await
        };
        FetchOutcome::Respond(response)
    }

    /// Handle a control message from a page.
    pub async fn on_message(
        &self,
        message: ClientMessage,
        reply: Option<ReplyPort>,
    ) -> SwResult<MessageEffect> {
        debug!(?message, "Received message");
        match message {
            ClientMessage::SkipWaiting => Ok(MessageEffect::SkipWaiting),
            ClientMessage::GetVersion => match reply {
                Some(port) => {
                    port.reply(version_reply(self.version()));
                    Ok(MessageEffect::Replied)
                }
                None => {
                    warn!("GET_VERSION without a reply port");
                    Ok(MessageEffect::Ignored)
                }
            },
            ClientMessage::ClearCache => {
                let cleared = self.context.storage.write().await.clear();
                info!(count = cleared.len(), "Cleared all caches");
                Ok(MessageEffect::CachesCleared(cleared))
            }
            ClientMessage::ShowNotification { title, options } => {
                self.context
                    .notifications
                    .show(&Notification::new(title, options))
                    .await?;
                Ok(MessageEffect::NotificationShown)
            }
        }
    }

    /// Handle a raw JSON message. Malformed messages and failed handlers are
    /// logged and ignored.
    pub async fn on_message_json(&self, raw: &str, reply: Option<ReplyPort>) -> MessageEffect {
        let message = match ClientMessage::parse(raw) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "Ignoring malformed message");
                return MessageEffect::Ignored;
            }
        };
        match self.on_message(message, reply).await {
            Ok(effect) => effect,
            Err(e) => {
                warn!(error = %e, "Message handler failed");
                MessageEffect::Ignored
            }
        }
    }

    /// Show a notification for a push message. Never fails.
    pub async fn on_push(&self, data: Option<&[u8]>) -> Notification {
        let payload = PushPayload::parse(data);
        let notification = Notification::from_push(payload, &self.config.notifications);
        if let Err(e) = self.context.notifications.show(&notification).await {
            warn!(error = %e, title = %notification.title, "Failed to show push notification");
        }
        notification
    }

    /// Handle a click on a notification (or one of its actions).
    ///
    /// Focuses an open window and tells it to navigate, or opens a new window
    /// when none is open, so at most one window follows the notification.
    pub async fn on_notification_click(
        &self,
        notification: &Notification,
        action: Option<&str>,
    ) -> SwResult<ClickOutcome> {
        if action == Some(DISMISS_ACTION) {
            return Ok(ClickOutcome::Dismissed);
        }
        let target = notification
            .target_url()
            .unwrap_or(&self.config.notifications.url);
        let url = self.config.resolve(target)?;

        let mut clients = self.context.clients.write().await;
        let window_id = clients
            .match_all(&ClientMatchOptions {
                include_uncontrolled: true,
                client_type: ClientType::Window,
            })
            .first()
            .map(|client| client.id.clone());

        let window = match window_id {
            Some(id) => clients.get_mut(&id),
            None => None,
        };
        match window {
            Some(client) => {
                client.focus()?;
                client.post_message(WorkerMessage::NotificationClick {
                    url: url.to_string(),
                });
                debug!(client = %client.id, url = %url, "Focused window for notification");
                Ok(ClickOutcome::Focused {
                    client_id: client.id.clone(),
                    url: url.to_string(),
                })
            }
            None => {
                let client = clients.open_window(url.clone());
                Ok(ClickOutcome::Opened {
                    client_id: client.id,
                    url: url.to_string(),
                })
            }
        }
    }

    /// Wait for background revalidation to finish.
    pub async fn wait_until_idle(&self) {
        self.executor.background().wait_idle().await;
    }
}
