//! Clients API: the pages a worker can see and control.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use hashbrown::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, trace};
use url::Url;

use crate::messaging::WorkerMessage;
use crate::{SwError, SwResult};

/// Clients shared between the worker versions of a registration.
pub type SharedClients = Arc<RwLock<Clients>>;

/// A client (open page or worker).
#[derive(Debug, Clone)]
pub struct Client {
    /// Client ID.
    pub id: String,

    /// Client URL.
    pub url: Url,

    /// Client type.
    pub client_type: ClientType,

    /// Whether focused.
    pub focused: bool,

    /// Version of the worker controlling this client, if any.
    pub controller: Option<String>,

    /// Messages posted to this client, oldest first.
    pub inbox: Vec<WorkerMessage>,
}

/// Client type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientType {
    #[default]
    Window,
    Worker,
    SharedWorker,
    All,
}

impl Client {
    /// A window client.
    pub fn window(url: Url) -> Self {
        Self {
            id: next_client_id(),
            url,
            client_type: ClientType::Window,
            focused: false,
            controller: None,
            inbox: Vec::new(),
        }
    }

    /// Post message to client.
    pub fn post_message(&mut self, message: WorkerMessage) {
        trace!(client = %self.id, ?message, "Posting message to client");
        self.inbox.push(message);
    }

    /// Focus the client.
    pub fn focus(&mut self) -> SwResult<()> {
        if self.client_type != ClientType::Window {
            return Err(SwError::StateError(
                "Can only focus window clients".to_string(),
            ));
        }
        self.focused = true;
        Ok(())
    }
}

/// Options for `clients.matchAll()`.
#[derive(Debug, Clone, Default)]
pub struct ClientMatchOptions {
    pub include_uncontrolled: bool,
    pub client_type: ClientType,
}

/// Clients API.
#[derive(Debug, Default)]
pub struct Clients {
    clients: HashMap<String, Client>,
}

impl Clients {
    /// Create new clients manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap for sharing between tasks.
    pub fn shared(self) -> SharedClients {
        Arc::new(RwLock::new(self))
    }

    /// Get a client by ID.
    pub fn get(&self, id: &str) -> Option<&Client> {
        self.clients.get(id)
    }

    /// Get a client by ID, mutably.
    pub fn get_mut(&mut self, id: &str) -> Option<&mut Client> {
        self.clients.get_mut(id)
    }

    /// Match all clients, ordered by ID.
    pub fn match_all(&self, options: &ClientMatchOptions) -> Vec<&Client> {
        let mut matched: Vec<&Client> = self
            .clients
            .values()
            .filter(|c| options.include_uncontrolled || c.controller.is_some())
            .filter(|c| match options.client_type {
                ClientType::All => true,
                t => c.client_type == t,
            })
            .collect();
        matched.sort_by(|a, b| a.id.cmp(&b.id));
        matched
    }

    /// Open a window.
    pub fn open_window(&mut self, url: Url) -> Client {
        let mut client = Client::window(url);
        client.focused = true;
        debug!(client = %client.id, url = %client.url, "Opened window");
        self.clients.insert(client.id.clone(), client.clone());
        client
    }

    /// Take control of every window client. Returns the IDs whose controller changed.
    pub fn claim(&mut self, version: &str) -> Vec<String> {
        let mut changed = Vec::new();
        for client in self.clients.values_mut() {
            if client.client_type != ClientType::Window
                || client.controller.as_deref() == Some(version)
            {
                continue;
            }
            client.controller = Some(version.to_string());
            changed.push(client.id.clone());
        }
        changed.sort();
        changed
    }

    /// Add a client.
    pub fn add(&mut self, client: Client) {
        self.clients.insert(client.id.clone(), client);
    }

    /// Remove a client.
    pub fn remove(&mut self, id: &str) -> Option<Client> {
        self.clients.remove(id)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

fn next_client_id() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    format!("client-{:08}", COUNTER.fetch_add(1, Ordering::Relaxed))
}
