//! # AfuChat Net
//!
//! Request/response model and network fetchers used by the AfuChat offline
//! worker.
//!
//! ## Design Goals
//!
//! 1. **Fetch-shaped types**: requests carry a mode and a destination, responses
//!    carry a response type, so caching rules can be expressed the way a
//!    browser worker sees traffic
//! 2. **Fetcher seam**: the worker only talks to the network through
//!    [`Fetcher`], so strategies can be exercised without a live network
//! 3. **Real HTTP**: [`HttpFetcher`] backs the seam with `reqwest`

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use http::header::{CACHE_CONTROL, CONTENT_TYPE};
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use thiserror::Error;
use url::Url;

pub mod fetcher;
pub mod scripted;

pub use fetcher::{Fetcher, HttpFetcher, LoaderConfig};
pub use scripted::ScriptedFetcher;

/// Errors that can occur in networking.
#[derive(Error, Debug)]
pub enum NetError {
    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Network unreachable: {0}")]
    Offline(String),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
}

/// Unique identifier for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(u64);

impl RequestId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

/// Request mode, as seen by a fetch handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestMode {
    /// Top-level document navigation.
    Navigate,
    SameOrigin,
    NoCors,
    #[default]
    Cors,
}

/// What the requested resource will be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Destination {
    /// fetch()/XHR and anything else without a destination.
    #[default]
    Empty,
    Document,
    Script,
    Style,
    Image,
    Font,
    Manifest,
    Worker,
}

impl std::str::FromStr for Destination {
    type Err = NetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "empty" => Ok(Self::Empty),
            "document" => Ok(Self::Document),
            "script" => Ok(Self::Script),
            "style" => Ok(Self::Style),
            "image" => Ok(Self::Image),
            "font" => Ok(Self::Font),
            "manifest" => Ok(Self::Manifest),
            "worker" => Ok(Self::Worker),
            other => Err(NetError::RequestFailed(format!(
                "unknown request destination: {other}"
            ))),
        }
    }
}

/// An intercepted request.
#[derive(Debug, Clone)]
pub struct Request {
    pub id: RequestId,
    pub url: Url,
    pub method: Method,
    pub headers: HeaderMap,
    pub mode: RequestMode,
    pub destination: Destination,
}

impl Request {
    /// Create a GET request with no destination (a plain `fetch()`).
    pub fn get(url: Url) -> Self {
        Self {
            id: RequestId::new(),
            url,
            method: Method::GET,
            headers: HeaderMap::new(),
            mode: RequestMode::Cors,
            destination: Destination::Empty,
        }
    }

    /// Create a document navigation request.
    pub fn navigate(url: Url) -> Self {
        Self {
            mode: RequestMode::Navigate,
            destination: Destination::Document,
            ..Self::get(url)
        }
    }

    /// Parse a URL and create a GET request.
    pub fn parse(url: &str) -> Result<Self, NetError> {
        let url = Url::parse(url).map_err(|e| NetError::InvalidUrl(e.to_string()))?;
        Ok(Self::get(url))
    }

    /// Set the destination.
    pub fn destination(mut self, destination: Destination) -> Self {
        self.destination = destination;
        self
    }

    /// Set the mode.
    pub fn mode(mut self, mode: RequestMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the method.
    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Add a header.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Whether this is a top-level navigation.
    pub fn is_navigation(&self) -> bool {
        self.mode == RequestMode::Navigate
    }

    /// Key under which this request is cached: the URL without its fragment.
    pub fn cache_key(&self) -> String {
        cache_key_for(&self.url)
    }
}

/// Cache key for a URL: the URL without its fragment.
pub fn cache_key_for(url: &Url) -> String {
    let mut url = url.clone();
    url.set_fragment(None);
    url.into()
}

/// Kind of response, as exposed by the fetch API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseType {
    #[default]
    Basic,
    Cors,
    /// Cross-origin no-cors response; status is always 0.
    Opaque,
    /// Network error; status is always 0.
    Error,
}

/// A response snapshot.
#[derive(Debug, Clone)]
pub struct Response {
    /// HTTP status. 0 for opaque and error responses.
    pub status: u16,
    pub status_text: String,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub response_type: ResponseType,
    /// Whether this response was served from a cache bucket.
    pub from_cache: bool,
}

impl Response {
    /// Create a basic response.
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        let status_text = http::StatusCode::from_u16(status)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or("")
            .to_string();
        Self {
            status,
            status_text,
            headers: HeaderMap::new(),
            body: body.into(),
            response_type: ResponseType::Basic,
            from_cache: false,
        }
    }

    /// Create a 200 response.
    pub fn ok_with_body(body: impl Into<Bytes>) -> Self {
        Self::new(200, body)
    }

    /// Create a 200 HTML document that must not be cached by the HTTP cache.
    pub fn html(body: impl Into<Bytes>) -> Self {
        Self::new(200, body)
            .with_header(CONTENT_TYPE, HeaderValue::from_static("text/html; charset=utf-8"))
            .with_header(CACHE_CONTROL, HeaderValue::from_static("no-cache"))
    }

    /// Create an opaque (no-cors) response.
    pub fn opaque(body: impl Into<Bytes>) -> Self {
        Self {
            status: 0,
            status_text: String::new(),
            response_type: ResponseType::Opaque,
            ..Self::new(200, body)
        }
    }

    /// Create a network error response.
    pub fn network_error() -> Self {
        Self {
            status: 0,
            status_text: "Network Error".to_string(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
            response_type: ResponseType::Error,
            from_cache: false,
        }
    }

    /// Add a header.
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Check if the response is successful (2xx).
    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Check if this is a network error.
    pub fn is_error(&self) -> bool {
        self.response_type == ResponseType::Error
    }

    /// Whether a cache bucket may store this response: status 200, or an
    /// opaque response (status 0).
    pub fn is_cacheable(&self) -> bool {
        match self.response_type {
            ResponseType::Error => false,
            ResponseType::Opaque => self.status == 0,
            ResponseType::Basic | ResponseType::Cors => self.status == 200,
        }
    }

    /// Get a header value as a string.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Get the body as text.
    pub fn text(&self) -> Result<String, NetError> {
        String::from_utf8(self.body.to_vec()).map_err(|e| NetError::RequestFailed(e.to_string()))
    }

    /// Mark this snapshot as served from cache.
    pub fn served_from_cache(mut self) -> Self {
        self.from_cache = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder() {
        let url = Url::parse("https://example.com").unwrap();
        let request = Request::get(url.clone())
            .header(
                HeaderName::from_static("accept"),
                HeaderValue::from_static("application/json"),
            )
            .destination(Destination::Image);

        assert_eq!(request.url, url);
        assert_eq!(request.method, Method::GET);
        assert!(request.headers.contains_key("accept"));
        assert_eq!(request.destination, Destination::Image);
        assert!(!request.is_navigation());
    }

    #[test]
    fn test_navigate_request() {
        let request = Request::navigate(Url::parse("https://afuchat.com/chats").unwrap());
        assert!(request.is_navigation());
        assert_eq!(request.destination, Destination::Document);
    }

    #[test]
    fn test_request_id_uniqueness() {
        let id1 = RequestId::new();
        let id2 = RequestId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_cache_key_drops_fragment() {
        let request = Request::parse("https://afuchat.com/feed?tab=new#post-3").unwrap();
        assert_eq!(request.cache_key(), "https://afuchat.com/feed?tab=new");
    }

    #[test]
    fn test_cacheable_statuses() {
        assert!(Response::new(200, "ok").is_cacheable());
        assert!(Response::opaque("").is_cacheable());
        assert!(!Response::new(404, "missing").is_cacheable());
        assert!(!Response::new(204, "").is_cacheable());
        assert!(!Response::new(500, "boom").is_cacheable());
        assert!(!Response::network_error().is_cacheable());
    }

    #[test]
    fn test_html_response_headers() {
        let response = Response::html("<p>offline</p>");
        assert_eq!(response.status, 200);
        assert_eq!(response.header("content-type"), Some("text/html; charset=utf-8"));
        assert_eq!(response.header("cache-control"), Some("no-cache"));
        assert_eq!(response.text().unwrap(), "<p>offline</p>");
    }

    #[test]
    fn test_status_text() {
        assert_eq!(Response::new(404, "").status_text, "Not Found");
        assert!(Response::new(200, "").ok());
        assert!(!Response::network_error().ok());
    }

    #[test]
    fn test_destination_parse() {
        assert_eq!("image".parse::<Destination>().unwrap(), Destination::Image);
        assert_eq!("".parse::<Destination>().unwrap(), Destination::Empty);
        assert!("audio-track".parse::<Destination>().is_err());
    }
}
