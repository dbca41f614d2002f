//! Offline fallback for navigations.
//!
//! Every navigation ends in a renderable document. Tiers are tried strictly in
//! order, each only after the previous one definitively failed:
//!
//! 1. network, within the navigation budget (written through to the pages bucket)
//! 2. the cached copy of this exact document
//! 3. the cached app shell, so client-side routing can take over
//! 4. the offline document
//!
//! Cached tiers ignore max-age: an old copy beats no page at all.

use afuchat_net::{cache_key_for, Request, Response};
use tracing::{debug, info, warn};

use crate::cache::ExpirationPolicy;
use crate::config::SwConfig;
use crate::offline_page::OfflinePage;
use crate::registry::CachePurpose;
use crate::router::{RouteRule, StrategyKind};
use crate::strategy::StrategyExecutor;

/// Navigation fallback chain.
#[derive(Debug, Clone)]
pub struct OfflineFallback {
    /// Cache keys of the app shell documents, in lookup order.
    shell_keys: Vec<String>,
    /// Key of the offline document in the offline bucket.
    offline_key: String,
    page: OfflinePage,
}

impl OfflineFallback {
    pub fn new(config: &SwConfig, page: OfflinePage) -> Self {
        let shell_keys = [&config.app_shell, &config.entry_document]
            .into_iter()
            .filter_map(|path| match config.resolve(path) {
                Ok(url) => Some(cache_key_for(&url)),
                Err(e) => {
                    warn!(path = %path, error = %e, "Ignoring unresolvable app shell path");
                    None
                }
            })
            .collect();
        let offline_key = match config.resolve(&config.offline_page_key) {
            Ok(url) => cache_key_for(&url),
            Err(_) => config.offline_page_key.clone(),
        };
        Self {
            shell_keys,
            offline_key,
            page,
        }
    }

    /// Cache keys of the app shell documents.
    pub fn shell_keys(&self) -> &[String] {
        &self.shell_keys
    }

    /// Key of the offline document in the offline bucket.
    pub fn offline_key(&self) -> &str {
        &self.offline_key
    }

    pub fn page(&self) -> &OfflinePage {
        &self.page
    }

    /// Resolve a navigation. Never fails.
    pub async fn respond(
        &self,
        executor: &StrategyExecutor,
        rule: &RouteRule,
        request: &Request,
    ) -> Response {
        let registry = executor.registry();
        let pages = registry.bucket_name(rule.purpose);
        let timeout = match rule.strategy {
            StrategyKind::NetworkFirst { timeout } => Some(timeout),
            _ => None,
        };

        let network = match timeout {
            Some(timeout) => {
                executor
                    .fetch_within(&pages, request, &rule.expiration, timeout)
                    .await
            }
            None => executor.fetch_and_cache(&pages, request, &rule.expiration).await,
        };
        match network {
            Ok(response) if response.ok() => return response,
            Ok(response) => {
                debug!(url = %request.url, status = response.status, "Navigation got non-success status")
            }
            Err(e) => debug!(url = %request.url, error = %e, "Navigation fetch failed"),
        }

        let any_age = ExpirationPolicy::none();
        if let Some(hit) = executor.lookup(&pages, &request.cache_key(), &any_age).await {
            debug!(url = %request.url, "Serving cached document");
            return hit;
        }

        let precache = registry.bucket_name(CachePurpose::Precache);
        for key in &self.shell_keys {
            for bucket in [&pages, &precache] {
                if let Some(shell) = executor.lookup(bucket, key, &any_age).await {
                    debug!(url = %request.url, shell = %key, "Serving cached app shell");
                    return shell;
                }
            }
        }

        let offline = registry.bucket_name(CachePurpose::Offline);
        if let Some(page) = executor.lookup(&offline, &self.offline_key, &any_age).await {
            info!(url = %request.url, "Serving offline page");
            return page;
        }

        info!(url = %request.url, "Serving built-in offline page");
        self.page.response()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use afuchat_common::ManualClock;
    use afuchat_net::ScriptedFetcher;
    use url::Url;

    use super::*;
    use crate::cache::CacheStorage;
    use crate::registry::CacheRegistry;
    use crate::router::Router;

    const CHAT: &str = "https://afuchat.com/chats/7";

    fn setup() -> (OfflineFallback, StrategyExecutor, Arc<ScriptedFetcher>, RouteRule) {
        let config = SwConfig::default();
        let registry = CacheRegistry::from_config(&config);
        let fetcher = Arc::new(ScriptedFetcher::new());
        let executor = StrategyExecutor::new(
            CacheStorage::new(Arc::new(ManualClock::new(0))).shared(),
            fetcher.clone(),
            registry.clone(),
        );
        let fallback = OfflineFallback::new(&config, OfflinePage::new(&registry));
        let navigation = Router::from_config(&config)
            .classify(&Request::navigate(Url::parse(CHAT).unwrap()))
            .cloned()
            .unwrap();
        (fallback, executor, fetcher, navigation)
    }

    fn navigate() -> Request {
        Request::navigate(Url::parse(CHAT).unwrap())
    }

    #[test]
    fn test_keys_resolve_against_scope() {
        let (fallback, ..) = setup();
        assert_eq!(
            fallback.shell_keys(),
            &["https://afuchat.com/", "https://afuchat.com/index.html"]
        );
        assert_eq!(fallback.offline_key(), "https://afuchat.com/offline.html");
    }

    #[tokio::test]
    async fn test_server_error_falls_through_to_cache() {
        let (fallback, executor, fetcher, rule) = setup();
        executor
            .store(
                "afuchat-pages-v1.0.0",
                CHAT,
                &Response::html("cached chat"),
                &ExpirationPolicy::none(),
            )
            .await;
        fetcher.respond(CHAT, Response::new(502, "bad gateway"));

        let response = fallback.respond(&executor, &rule, &navigate()).await;
        assert_eq!(response.text().unwrap(), "cached chat");
    }

    #[tokio::test]
    async fn test_precached_shell_is_used() {
        let (fallback, executor, fetcher, rule) = setup();
        executor
            .store(
                "afuchat-precache-v1.0.0",
                "https://afuchat.com/index.html",
                &Response::html("precached shell"),
                &ExpirationPolicy::none(),
            )
            .await;
        fetcher.set_online(false);

        let response = fallback.respond(&executor, &rule, &navigate()).await;
        assert_eq!(response.text().unwrap(), "precached shell");
    }

    #[tokio::test]
    async fn test_builtin_page_when_nothing_cached() {
        let (fallback, executor, fetcher, rule) = setup();
        fetcher.set_online(false);

        let response = fallback.respond(&executor, &rule, &navigate()).await;
        assert_eq!(response.status, 200);
        assert!(!response.from_cache);
        assert!(response.text().unwrap().contains("You're offline"));
    }
}
