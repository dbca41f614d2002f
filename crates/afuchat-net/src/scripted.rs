//! A [`Fetcher`] that answers from a script instead of the network.
//!
//! Used to exercise caching strategies deterministically, and by the probe
//! tool to simulate an offline device.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tracing::trace;

use crate::{cache_key_for, Fetcher, NetError, Request, Response};

#[derive(Debug, Clone)]
enum Reply {
    Respond(Response),
    Fail,
    Delay(Duration, Response),
}

/// Scripted fetcher.
///
/// Unscripted URLs answer 404 while online. While offline every fetch fails.
#[derive(Debug)]
pub struct ScriptedFetcher {
    replies: Mutex<HashMap<String, Reply>>,
    online: AtomicBool,
    calls: Mutex<Vec<String>>,
}

impl ScriptedFetcher {
    /// Create an online fetcher with no scripted replies.
    pub fn new() -> Self {
        Self {
            replies: Mutex::new(HashMap::new()),
            online: AtomicBool::new(true),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Create a fetcher that fails every request.
    pub fn offline() -> Self {
        let fetcher = Self::new();
        fetcher.set_online(false);
        fetcher
    }

    fn script(&self, url: &str, reply: Reply) {
        let key = match url::Url::parse(url) {
            Ok(parsed) => cache_key_for(&parsed),
            Err(_) => url.to_string(),
        };
        self.replies
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, reply);
    }

    /// Answer `url` with `response`.
    pub fn respond(&self, url: &str, response: Response) -> &Self {
        self.script(url, Reply::Respond(response));
        self
    }

    /// Make fetches of `url` fail as if the connection dropped.
    pub fn fail(&self, url: &str) -> &Self {
        self.script(url, Reply::Fail);
        self
    }

    /// Answer `url` with `response` after `delay`.
    pub fn delay(&self, url: &str, delay: Duration, response: Response) -> &Self {
        self.script(url, Reply::Delay(delay, response));
        self
    }

    /// Toggle connectivity.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Every URL fetched so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Number of fetches of `url` so far.
    pub fn call_count(&self, url: &str) -> usize {
        self.calls().iter().filter(|c| c.as_str() == url).count()
    }
}

impl Default for ScriptedFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response, NetError> {
        let key = request.cache_key();
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(key.clone());

        if !self.online.load(Ordering::SeqCst) {
            trace!(url = %key, "Scripted fetch while offline");
            return Err(NetError::Offline(key));
        }

        let reply = self
            .replies
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&key)
            .cloned();

        match reply {
            Some(Reply::Respond(response)) => Ok(response),
            Some(Reply::Fail) => Err(NetError::RequestFailed(format!("scripted failure: {key}"))),
            Some(Reply::Delay(delay, response)) => {
                tokio::time::sleep(delay).await;
                Ok(response)
            }
            None => Ok(Response::new(404, "")),
        }
    }
}
