//! Route classification.
//!
//! Rules are built once from the configuration into an ordered, immutable
//! list. [`Router::classify`] is a pure function of the request: the first
//! rule whose matcher accepts it wins, and a request no rule accepts is left
//! to the browser's own networking.

use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

use afuchat_net::{cache_key_for, Destination, Request};
use http::Method;
use tracing::{trace, warn};
use url::Url;

use crate::cache::ExpirationPolicy;
use crate::config::SwConfig;
use crate::registry::CachePurpose;

/// Caching strategy applied by a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    /// Serve from cache; fetch only on a miss.
    CacheFirst,
    /// Fetch within `timeout`; fall back to cache on failure.
    NetworkFirst { timeout: Duration },
    /// Serve from cache and refresh in the background.
    StaleWhileRevalidate,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategyKind::CacheFirst => write!(f, "cache-first"),
            StrategyKind::NetworkFirst { timeout } => {
                write!(f, "network-first ({}ms)", timeout.as_millis())
            }
            StrategyKind::StaleWhileRevalidate => write!(f, "stale-while-revalidate"),
        }
    }
}

/// Request predicate of a route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteMatcher {
    /// URL listed in the precache manifest (compared by cache key).
    Precached(HashSet<String>),
    /// Top-level navigation.
    Navigation,
    /// Any of the listed destinations.
    Destinations(Vec<Destination>),
    /// Font destination, or any request to one of the font origins.
    Fonts { origins: Vec<String> },
    /// Path under `prefix` on `origin`, unless the path contains an excluded segment.
    BackendPath {
        origin: String,
        prefix: String,
        exclude: Vec<String>,
    },
    /// Any request to one of the origins.
    Origins(Vec<String>),
}

impl RouteMatcher {
    pub fn matches(&self, request: &Request) -> bool {
        match self {
            RouteMatcher::Precached(keys) => keys.contains(&request.cache_key()),
            RouteMatcher::Navigation => request.is_navigation(),
            RouteMatcher::Destinations(destinations) => {
                destinations.contains(&request.destination)
            }
            RouteMatcher::Fonts { origins } => {
                request.destination == Destination::Font
                    || origins.contains(&origin_of(&request.url))
            }
            RouteMatcher::BackendPath {
                origin,
                prefix,
                exclude,
            } => {
                let path = request.url.path();
                origin_of(&request.url) == *origin
                    && path.starts_with(prefix.as_str())
                    && !exclude.iter().any(|segment| path.contains(segment.as_str()))
            }
            RouteMatcher::Origins(origins) => origins.contains(&origin_of(&request.url)),
        }
    }
}

/// A routing rule.
#[derive(Debug, Clone)]
pub struct RouteRule {
    /// Short name for logs.
    pub name: &'static str,
    pub matcher: RouteMatcher,
    pub strategy: StrategyKind,
    /// Bucket the rule reads and writes.
    pub purpose: CachePurpose,
    pub expiration: ExpirationPolicy,
    /// Whether failures end in the offline fallback chain.
    pub offline_fallback: bool,
}

impl RouteRule {
    fn new(
        name: &'static str,
        matcher: RouteMatcher,
        strategy: StrategyKind,
        purpose: CachePurpose,
        expiration: ExpirationPolicy,
    ) -> Self {
        Self {
            name,
            matcher,
            strategy,
            purpose,
            expiration,
            offline_fallback: false,
        }
    }
}

/// Ordered routing table.
#[derive(Debug, Clone)]
pub struct Router {
    rules: Vec<RouteRule>,
}

impl Router {
    /// Create a router from an explicit rule list.
    pub fn new(rules: Vec<RouteRule>) -> Self {
        Self { rules }
    }

    /// Build the AfuChat routing table.
    pub fn from_config(config: &SwConfig) -> Self {
        let expirations = &config.expirations;
        let backend_origin = origin_of(&config.backend.origin);
        let mut rules = Vec::with_capacity(8);

        let precached: HashSet<String> = config
            .precache
            .iter()
            .filter_map(|entry| match config.resolve(&entry.url) {
                Ok(url) => Some(cache_key_for(&url)),
                Err(e) => {
                    warn!(url = %entry.url, error = %e, "Skipping unresolvable precache entry");
                    None
                }
            })
            .collect();
        if !precached.is_empty() {
            rules.push(RouteRule::new(
                "precache",
                RouteMatcher::Precached(precached),
                StrategyKind::CacheFirst,
                CachePurpose::Precache,
                ExpirationPolicy::none(),
            ));
        }

        rules.push(RouteRule {
            offline_fallback: true,
            ..RouteRule::new(
                "navigation",
                RouteMatcher::Navigation,
                StrategyKind::NetworkFirst {
                    timeout: config.navigation_timeout(),
                },
                CachePurpose::Pages,
                expirations.pages,
            )
        });
        rules.push(RouteRule::new(
            "static-assets",
            RouteMatcher::Destinations(vec![Destination::Script, Destination::Style]),
            StrategyKind::CacheFirst,
            CachePurpose::Static,
            expirations.static_assets,
        ));
        rules.push(RouteRule::new(
            "images",
            RouteMatcher::Destinations(vec![Destination::Image]),
            StrategyKind::CacheFirst,
            CachePurpose::Images,
            expirations.images,
        ));
        rules.push(RouteRule::new(
            "fonts",
            RouteMatcher::Fonts {
                origins: normalize_origins(&config.font_origins),
            },
            StrategyKind::CacheFirst,
            CachePurpose::Fonts,
            expirations.fonts,
        ));
        rules.push(RouteRule::new(
            "backend-storage",
            RouteMatcher::BackendPath {
                origin: backend_origin.clone(),
                prefix: config.backend.storage_path.clone(),
                exclude: Vec::new(),
            },
            StrategyKind::StaleWhileRevalidate,
            CachePurpose::Images,
            expirations.media,
        ));
        rules.push(RouteRule::new(
            "backend-api",
            RouteMatcher::BackendPath {
                origin: backend_origin,
                prefix: config.backend.api_path.clone(),
                exclude: config.backend.excluded_paths.clone(),
            },
            StrategyKind::StaleWhileRevalidate,
            CachePurpose::Api,
            expirations.api,
        ));
        rules.push(RouteRule::new(
            "cdn",
            RouteMatcher::Origins(normalize_origins(&config.cdn_origins)),
            StrategyKind::CacheFirst,
            CachePurpose::Static,
            expirations.cdn,
        ));

        Self::new(rules)
    }

    /// First rule that owns `request`, or `None` to pass it through.
    pub fn classify(&self, request: &Request) -> Option<&RouteRule> {
        if request.method != Method::GET {
            trace!(url = %request.url, method = %request.method, "Non-GET request passes through");
            return None;
        }
        let rule = self.rules.iter().find(|rule| rule.matcher.matches(request));
        trace!(url = %request.url, rule = ?rule.map(|r| r.name), "Classified request");
        rule
    }

    pub fn rules(&self) -> &[RouteRule] {
        &self.rules
    }
}

fn origin_of(url: &Url) -> String {
    url.origin().ascii_serialization()
}

fn normalize_origins(origins: &[String]) -> Vec<String> {
    origins
        .iter()
        .map(|origin| match Url::parse(origin) {
            Ok(url) => origin_of(&url),
            Err(_) => origin.trim_end_matches('/').to_string(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PrecacheEntry;

    fn router() -> Router {
        Router::from_config(&SwConfig::default())
    }

    fn rule_for(router: &Router, request: Request) -> Option<&'static str> {
        router.classify(&request).map(|rule| rule.name)
    }

    fn get(url: &str) -> Request {
        Request::parse(url).unwrap()
    }

    #[test]
    fn test_rule_order_without_precache() {
        let names: Vec<_> = router().rules().iter().map(|r| r.name).collect();
        assert_eq!(
            names,
            vec![
                "navigation",
                "static-assets",
                "images",
                "fonts",
                "backend-storage",
                "backend-api",
                "cdn"
            ]
        );
    }

    #[test]
    fn test_navigation() {
        let router = router();
        let request = Request::navigate(Url::parse("https://afuchat.com/chats/42").unwrap());
        let rule = router.classify(&request).unwrap();
        assert_eq!(rule.name, "navigation");
        assert_eq!(rule.purpose, CachePurpose::Pages);
        assert!(rule.offline_fallback);
        assert_eq!(
            rule.strategy,
            StrategyKind::NetworkFirst {
                timeout: Duration::from_secs(3)
            }
        );
        assert_eq!(rule.expiration.max_entries, Some(50));
    }

    #[test]
    fn test_destinations() {
        let router = router();
        let js = get("https://afuchat.com/assets/index-3f2a.js").destination(Destination::Script);
        let css = get("https://afuchat.com/assets/index.css").destination(Destination::Style);
        let img = get("https://afuchat.com/logo.png").destination(Destination::Image);
        assert_eq!(rule_for(&router, js), Some("static-assets"));
        assert_eq!(rule_for(&router, css), Some("static-assets"));
        assert_eq!(rule_for(&router, img), Some("images"));
    }

    #[test]
    fn test_fonts_by_destination_or_origin() {
        let router = router();
        let by_destination = get("https://afuchat.com/fonts/inter.woff2").destination(Destination::Font);
        let stylesheet = get("https://fonts.googleapis.com/css2?family=Inter");
        let file = get("https://fonts.gstatic.com/s/inter/v12/x.woff2");
        assert_eq!(rule_for(&router, by_destination), Some("fonts"));
        assert_eq!(rule_for(&router, stylesheet), Some("fonts"));
        assert_eq!(rule_for(&router, file), Some("fonts"));
    }

    #[test]
    fn test_backend_storage_and_api() {
        let router = router();
        let media = get("https://afuchat.supabase.co/storage/v1/object/public/avatars/u1.jpg");
        let api = get("https://afuchat.supabase.co/rest/v1/posts?select=*");
        let rule = router.classify(&media).unwrap();
        assert_eq!(rule.name, "backend-storage");
        assert_eq!(rule.purpose, CachePurpose::Images);
        assert_eq!(rule.expiration.max_entries, Some(300));

        let rule = router.classify(&api).unwrap();
        assert_eq!(rule.name, "backend-api");
        assert_eq!(rule.strategy, StrategyKind::StaleWhileRevalidate);
        assert_eq!(rule.expiration.max_age(), Some(Duration::from_secs(300)));
    }

    #[test]
    fn test_realtime_and_auth_pass_through() {
        let router = router();
        assert_eq!(rule_for(&router, get("https://afuchat.supabase.co/realtime/v1/websocket")), None);
        assert_eq!(rule_for(&router, get("https://afuchat.supabase.co/auth/v1/token")), None);
        assert_eq!(rule_for(&router, get("https://afuchat.supabase.co/rest/auth/v1/user")), None);
        assert_eq!(rule_for(&router, get("https://afuchat.supabase.co/functions/v1/chat")), None);
    }

    #[test]
    fn test_cdn_origin() {
        let router = router();
        let rule = router
            .classify(&get("https://cdn.jsdelivr.net/npm/emoji-data@1/index.json"))
            .unwrap();
        assert_eq!(rule.name, "cdn");
        assert_eq!(rule.purpose, CachePurpose::Static);
        assert_eq!(rule.expiration.max_entries, Some(50));
    }

    #[test]
    fn test_unmatched_passes_through() {
        let router = router();
        assert_eq!(rule_for(&router, get("https://afuchat.com/api/health")), None);
        assert_eq!(rule_for(&router, get("https://example.org/")), None);
    }

    #[test]
    fn test_non_get_passes_through() {
        let router = router();
        let post = get("https://afuchat.supabase.co/rest/v1/posts").method(Method::POST);
        assert_eq!(rule_for(&router, post), None);
    }

    #[test]
    fn test_first_match_wins() {
        let router = router();
        // Script destination on the storage path: static-assets is registered first.
        let script = get("https://afuchat.supabase.co/storage/v1/object/public/widgets/embed.js")
            .destination(Destination::Script);
        assert_eq!(rule_for(&router, script), Some("static-assets"));

        // Image from a CDN origin: the image rule precedes the CDN rule.
        let image = get("https://cdn.jsdelivr.net/gh/twitter/twemoji/1f600.png")
            .destination(Destination::Image);
        assert_eq!(rule_for(&router, image), Some("images"));
    }

    #[test]
    fn test_precache_rule_goes_first() {
        let config = SwConfig {
            precache: vec![PrecacheEntry {
                url: "/assets/index-3f2a.js".to_string(),
                revision: None,
            }],
            ..Default::default()
        };
        let router = Router::from_config(&config);
        assert_eq!(router.rules()[0].name, "precache");

        let js = get("https://afuchat.com/assets/index-3f2a.js").destination(Destination::Script);
        assert_eq!(rule_for(&router, js), Some("precache"));
        let other = get("https://afuchat.com/assets/other.js").destination(Destination::Script);
        assert_eq!(rule_for(&router, other), Some("static-assets"));
    }

    #[test]
    fn test_custom_origins_are_normalized() {
        let config = SwConfig {
            cdn_origins: vec!["https://static.afuchat.com/".to_string()],
            ..Default::default()
        };
        let router = Router::from_config(&config);
        assert_eq!(rule_for(&router, get("https://static.afuchat.com/emoji.json")), Some("cdn"));
    }

    #[test]
    fn test_strategy_display() {
        assert_eq!(StrategyKind::CacheFirst.to_string(), "cache-first");
        assert_eq!(
            StrategyKind::NetworkFirst {
                timeout: Duration::from_secs(3)
            }
            .to_string(),
            "network-first (3000ms)"
        );
    }
}
