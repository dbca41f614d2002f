//! The synthesized offline document.
//!
//! The markup lives in `assets/offline.html` and is filled in per worker
//! version: the version string and the pages bucket the inline script lists
//! cached documents from.

use afuchat_net::Response;

use crate::registry::{CachePurpose, CacheRegistry};

const TEMPLATE: &str = include_str!("../assets/offline.html");

/// Number of cached document paths the page lists.
pub const MAX_LISTED_PAGES: usize = 5;

/// Offline page renderer.
#[derive(Debug, Clone)]
pub struct OfflinePage {
    version: String,
    pages_cache: String,
}

impl OfflinePage {
    pub fn new(registry: &CacheRegistry) -> Self {
        Self {
            version: registry.version().to_string(),
            pages_cache: registry.bucket_name(CachePurpose::Pages),
        }
    }

    /// Rendered HTML.
    pub fn render(&self) -> String {
        TEMPLATE
            .replace("{{version}}", &self.version)
            .replace("{{pages_cache}}", &self.pages_cache)
            .replace("{{max_listed}}", &MAX_LISTED_PAGES.to_string())
    }

    /// Rendered page as a 200 `text/html` response with `Cache-Control: no-cache`.
    pub fn response(&self) -> Response {
        Response::html(self.render())
    }
}
