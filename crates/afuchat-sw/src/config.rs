//! Worker configuration.
//!
//! Everything the route table and lifecycle depend on lives here: bucket
//! naming, backend and CDN origins, per-route expiration, the navigation
//! timeout, the precache manifest and notification defaults. Every section
//! has defaults, so a JSON file only needs the keys it overrides.

use std::path::Path;
use std::time::Duration;

use afuchat_common::{AfuError, ResultExt};
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::cache::ExpirationPolicy;

const DAY: u64 = 24 * 60 * 60;

/// Offline worker configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwConfig {
    /// Prefix of every cache bucket name.
    pub cache_prefix: String,

    /// Worker version; bumped by hand for every release. Part of every bucket name.
    pub version: String,

    /// Registration scope. Relative URLs resolve against it.
    pub scope: Url,

    /// Root document of the single-page app.
    pub app_shell: String,

    /// HTML entry point cached next to the app shell.
    pub entry_document: String,

    /// Key of the offline document in the offline bucket.
    pub offline_page_key: String,

    /// Network budget for navigations before falling back to cache.
    pub navigation_timeout_ms: u64,

    /// Activate as soon as install finishes instead of waiting for open tabs.
    pub skip_waiting_on_install: bool,

    /// Hosted backend (database REST API + object storage).
    pub backend: BackendConfig,

    /// Web-font CDN origins.
    pub font_origins: Vec<String>,

    /// Script/style CDN origins.
    pub cdn_origins: Vec<String>,

    /// Expiration per route.
    pub expirations: RouteExpirations,

    /// Build-time asset manifest.
    pub precache: Vec<PrecacheEntry>,

    /// Notification defaults for push messages.
    pub notifications: NotificationDefaults,
}

/// Backend origin and the paths routed to the storage and API rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub origin: Url,
    /// Path prefix of user-uploaded objects.
    pub storage_path: String,
    /// Path prefix of the REST API.
    pub api_path: String,
    /// Path segments never cached even under the API prefix.
    pub excluded_paths: Vec<String>,
}

/// Expiration policy of every runtime route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouteExpirations {
    pub pages: ExpirationPolicy,
    pub static_assets: ExpirationPolicy,
    pub images: ExpirationPolicy,
    pub fonts: ExpirationPolicy,
    /// Backend storage objects.
    pub media: ExpirationPolicy,
    /// Backend REST API. Kept short: API data must not look stale for long.
    pub api: ExpirationPolicy,
    pub cdn: ExpirationPolicy,
}

/// One entry of the build-time asset manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrecacheEntry {
    pub url: String,
    #[serde(default)]
    pub revision: Option<String>,
}

/// Defaults for notifications built from push payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationDefaults {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub url: String,
}

impl Default for SwConfig {
    fn default() -> Self {
        Self {
            cache_prefix: "afuchat".to_string(),
            version: "1.0.0".to_string(),
            scope: Url::parse("https://afuchat.com/").expect("static URL"),
            app_shell: "/".to_string(),
            entry_document: "/index.html".to_string(),
            offline_page_key: "/offline.html".to_string(),
            navigation_timeout_ms: 3_000,
            skip_waiting_on_install: true,
            backend: BackendConfig::default(),
            font_origins: vec![
                "https://fonts.googleapis.com".to_string(),
                "https://fonts.gstatic.com".to_string(),
            ],
            cdn_origins: vec![
                "https://cdn.jsdelivr.net".to_string(),
                "https://unpkg.com".to_string(),
                "https://cdnjs.cloudflare.com".to_string(),
            ],
            expirations: RouteExpirations::default(),
            precache: Vec::new(),
            notifications: NotificationDefaults::default(),
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            origin: Url::parse("https://afuchat.supabase.co").expect("static URL"),
            storage_path: "/storage/v1/object/".to_string(),
            api_path: "/rest/".to_string(),
            excluded_paths: vec!["/realtime/".to_string(), "/auth/".to_string()],
        }
    }
}

impl Default for RouteExpirations {
    fn default() -> Self {
        Self {
            pages: ExpirationPolicy::new(50, Duration::from_secs(7 * DAY)),
            static_assets: ExpirationPolicy::new(100, Duration::from_secs(30 * DAY)),
            images: ExpirationPolicy::new(200, Duration::from_secs(30 * DAY)),
            fonts: ExpirationPolicy::new(30, Duration::from_secs(365 * DAY)),
            media: ExpirationPolicy::new(300, Duration::from_secs(7 * DAY)),
            api: ExpirationPolicy::new(100, Duration::from_secs(5 * 60)),
            cdn: ExpirationPolicy::new(50, Duration::from_secs(30 * DAY)),
        }
    }
}

impl Default for NotificationDefaults {
    fn default() -> Self {
        Self {
            title: "AfuChat".to_string(),
            body: "You have a new notification".to_string(),
            icon: "/favicon.png".to_string(),
            badge: "/favicon.png".to_string(),
            url: "/".to_string(),
        }
    }
}

impl SwConfig {
    /// Parse a configuration from JSON and validate it.
    pub fn from_json_str(json: &str) -> afuchat_common::Result<Self> {
        let config: SwConfig = serde_json::from_str(json).context("parsing worker config")?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file.
    pub fn load(path: impl AsRef<Path>) -> afuchat_common::Result<Self> {
        let path = path.as_ref();
        debug!(path = %path.display(), "Loading worker config");
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Check the invariants bucket naming and routing rely on.
    pub fn validate(&self) -> afuchat_common::Result<()> {
        if self.cache_prefix.trim().is_empty() {
            return Err(AfuError::config("cache_prefix must not be empty"));
        }
        if self.version.trim().is_empty() {
            return Err(AfuError::config("version must not be empty"));
        }
        if self.version.chars().any(char::is_whitespace) {
            return Err(AfuError::config("version must not contain whitespace"));
        }
        if self.navigation_timeout_ms == 0 {
            return Err(AfuError::config("navigation_timeout_ms must be positive"));
        }
        if !self.backend.storage_path.starts_with('/') || !self.backend.api_path.starts_with('/') {
            return Err(AfuError::config("backend paths must start with '/'"));
        }
        for origin in self.font_origins.iter().chain(&self.cdn_origins) {
            Url::parse(origin)
                .map_err(|e| AfuError::config_with_source(format!("invalid origin {origin}"), e))?;
        }
        Ok(())
    }

    /// Navigation network budget.
    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_millis(self.navigation_timeout_ms)
    }

    /// Resolve a scope-relative path (or absolute URL).
    pub fn resolve(&self, path: &str) -> afuchat_common::Result<Url> {
        self.scope
            .join(path)
            .map_err(|e| AfuError::InvalidArgument(format!("{path}: {e}")))
    }
}
