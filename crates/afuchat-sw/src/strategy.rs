//! Strategy execution.
//!
//! Each strategy resolves a request against one named bucket, hitting the
//! network as its policy dictates. Writes go through the cacheable filter in
//! [`CacheStorage::put`](crate::cache::CacheStorage::put), so error responses
//! never reach a bucket. Writes are last-write-wins.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use afuchat_common::with_timeout;
use afuchat_net::{Fetcher, NetError, Request, Response};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::cache::{ExpirationPolicy, SharedStorage};
use crate::registry::CacheRegistry;
use crate::router::{RouteRule, StrategyKind};

/// Background work started by strategies (revalidation fetches).
#[derive(Debug, Clone, Default)]
pub struct BackgroundTasks {
    handles: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl BackgroundTasks {
    fn spawn<F>(&self, task: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(task);
        let mut handles = self.handles.lock().unwrap_or_else(|e| e.into_inner());
        handles.retain(|h| !h.is_finished());
        handles.push(handle);
    }

    /// Number of handles still held. Finished tasks are dropped on the next spawn.
    pub fn tracked(&self) -> usize {
        self.handles.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Wait until every task spawned so far (and any they spawn) has finished.
    pub async fn wait_idle(&self) {
        loop {
            let pending: Vec<JoinHandle<()>> = std::mem::take(
                &mut *self.handles.lock().unwrap_or_else(|e| e.into_inner()),
            );
            if pending.is_empty() {
                return;
            }
            for handle in pending {
                if let Err(e) = handle.await {
                    warn!(error = %e, "Background task failed");
                }
            }
        }
    }
}

/// Applies a route's strategy to a request.
#[derive(Clone)]
pub struct StrategyExecutor {
    storage: SharedStorage,
    fetcher: Arc<dyn Fetcher>,
    registry: CacheRegistry,
    background: BackgroundTasks,
}

impl StrategyExecutor {
    pub fn new(storage: SharedStorage, fetcher: Arc<dyn Fetcher>, registry: CacheRegistry) -> Self {
        Self {
            storage,
            fetcher,
            registry,
            background: BackgroundTasks::default(),
        }
    }

    pub fn storage(&self) -> &SharedStorage {
        &self.storage
    }

    pub fn registry(&self) -> &CacheRegistry {
        &self.registry
    }

    pub fn background(&self) -> &BackgroundTasks {
        &self.background
    }

    /// Resolve `request` with the rule's strategy.
    ///
    /// A network failure with nothing cached yields a network-error response.
    pub async fn execute(&self, rule: &RouteRule, request: &Request) -> Response {
        let bucket = self.registry.bucket_name(rule.purpose);
        debug!(url = %request.url, rule = rule.name, strategy = %rule.strategy, bucket = %bucket, "Applying strategy");

        let result = match rule.strategy {
            StrategyKind::CacheFirst => self.cache_first(&bucket, request, &rule.expiration).await,
            StrategyKind::NetworkFirst { timeout } => {
                self.network_first(&bucket, request, &rule.expiration, timeout)
                    .await
            }
            StrategyKind::StaleWhileRevalidate => {
                self.stale_while_revalidate(&bucket, request, &rule.expiration)
                    .await
            }
        };

        result.unwrap_or_else(|e| {
            warn!(url = %request.url, rule = rule.name, error = %e, "No response available");
            Response::network_error()
        })
    }

    async fn cache_first(
        &self,
        bucket: &str,
        request: &Request,
        policy: &ExpirationPolicy,
    ) -> Result<Response, NetError> {
        if let Some(hit) = self.lookup(bucket, &request.cache_key(), policy).await {
            trace!(url = %request.url, bucket, "Cache hit");
            return Ok(hit);
        }
        self.fetch_and_cache(bucket, request, policy).await
    }

    async fn network_first(
        &self,
        bucket: &str,
        request: &Request,
        policy: &ExpirationPolicy,
        timeout: Duration,
    ) -> Result<Response, NetError> {
        match self.fetch_within(bucket, request, policy, timeout).await {
            Ok(response) if response.ok() => return Ok(response),
            Ok(response) => {
                if let Some(hit) = self.lookup(bucket, &request.cache_key(), policy).await {
                    return Ok(hit);
                }
                Ok(response)
            }
            Err(e) => {
                debug!(url = %request.url, error = %e, "Network failed, trying cache");
                self.lookup(bucket, &request.cache_key(), policy)
                    .await
                    .ok_or(e)
            }
        }
    }

    async fn stale_while_revalidate(
        &self,
        bucket: &str,
        request: &Request,
        policy: &ExpirationPolicy,
    ) -> Result<Response, NetError> {
        match self.lookup(bucket, &request.cache_key(), policy).await {
            Some(hit) => {
                self.revalidate(bucket, request, policy);
                Ok(hit)
            }
            None => self.fetch_and_cache(bucket, request, policy).await,
        }
    }

    fn revalidate(&self, bucket: &str, request: &Request, policy: &ExpirationPolicy) {
        let executor = self.clone();
        let bucket = bucket.to_string();
        let request = request.clone();
        let policy = *policy;
        self.background.spawn(async move {
            match executor.fetch_and_cache(&bucket, &request, &policy).await {
                Ok(response) => {
                    trace!(url = %request.url, status = response.status, "Revalidated")
                }
                Err(e) => debug!(url = %request.url, error = %e, "Revalidation failed"),
            }
        });
    }

    /// Fresh cached response for `key` in `bucket`.
    pub async fn lookup(
        &self,
        bucket: &str,
        key: &str,
        policy: &ExpirationPolicy,
    ) -> Option<Response> {
        self.storage.write().await.match_in(bucket, key, policy)
    }

    /// Fetch and write the response back when it is cacheable.
    pub async fn fetch_and_cache(
        &self,
        bucket: &str,
        request: &Request,
        policy: &ExpirationPolicy,
    ) -> Result<Response, NetError> {
        let response = self.fetcher.fetch(request).await?;
        self.store(bucket, &request.cache_key(), &response, policy)
            .await;
        Ok(response)
    }

    /// [`Self::fetch_and_cache`] bounded by `timeout`.
    pub async fn fetch_within(
        &self,
        bucket: &str,
        request: &Request,
        policy: &ExpirationPolicy,
        timeout: Duration,
    ) -> Result<Response, NetError> {
        with_timeout(timeout, || self.fetch_and_cache(bucket, request, policy))
            .await
            .map_err(|_| NetError::Timeout(timeout))?
    }

    /// Write a response to `bucket`. Returns whether it was stored.
    pub async fn store(
        &self,
        bucket: &str,
        key: &str,
        response: &Response,
        policy: &ExpirationPolicy,
    ) -> bool {
        let stored = self.storage.write().await.put(bucket, key, response, policy);
        if stored {
            trace!(bucket, key, "Stored response");
        }
        stored
    }
}
