//! Clients API: pages the worker can control, focus and open.

use std::sync::atomic::{AtomicU64, Ordering};

use hashbrown::HashMap;
use url::Url;

use crate::lifecycle::WorkerId;
use crate::ServiceWorkerError;

/// Client type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientType {
    #[default]
    Window,
    Worker,
}

/// A page (or worker) within the worker's scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Client {
    /// Client ID.
    pub id: String,

    /// Client URL.
    pub url: Url,

    /// Client type.
    pub client_type: ClientType,

    /// Whether focused.
    pub focused: bool,

    /// Worker controlling this client, if any.
    pub controller: Option<WorkerId>,
}

impl Client {
    /// A window client that nothing controls yet.
    pub fn window(url: Url) -> Self {
        Self {
            id: next_client_id(),
            url,
            client_type: ClientType::Window,
            focused: false,
            controller: None,
        }
    }
}

/// Clients registry.
#[derive(Debug, Default)]
pub struct Clients {
    clients: HashMap<String, Client>,
}

impl Clients {
    /// Create new clients manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a client.
    pub fn add(&mut self, client: Client) {
        self.clients.insert(client.id.clone(), client);
    }

    /// Remove a client.
    pub fn remove(&mut self, id: &str) -> Option<Client> {
        self.clients.remove(id)
    }

    /// Get a client by ID.
    pub fn get(&self, id: &str) -> Option<&Client> {
        self.clients.get(id)
    }

    /// All window clients, ordered by ID.
    pub fn windows(&self) -> Vec<&Client> {
        let mut windows: Vec<&Client> = self
            .clients
            .values()
            .filter(|c| c.client_type == ClientType::Window)
            .collect();
        windows.sort_by(|a, b| a.id.cmp(&b.id));
        windows
    }

    /// Take control of every client. Returns the IDs whose controller changed.
    pub fn claim(&mut self, worker: WorkerId) -> Vec<String> {
        let mut changed: Vec<String> = self
            .clients
            .values_mut()
            .filter(|c| c.controller != Some(worker))
            .map(|c| {
                c.controller = Some(worker);
                c.id.clone()
            })
            .collect();
        changed.sort();
        changed
    }

    /// Focus a window client.
    pub fn focus(&mut self, id: &str) -> Result<&Client, ServiceWorkerError> {
        let client_type = self
            .clients
            .get(id)
            .map(|c| c.client_type)
            .ok_or_else(|| ServiceWorkerError::StateError(format!("Unknown client {id}")))?;
        if client_type != ClientType::Window {
            return Err(ServiceWorkerError::StateError(
                "Can only focus window clients".to_string(),
            ));
        }

        for client in self.clients.values_mut() {
            client.focused = client.id == id;
        }
        self.clients
            .get(id)
            .ok_or_else(|| ServiceWorkerError::StateError(format!("Unknown client {id}")))
    }

    /// Open a new focused window, controlled by `controller`.
    pub fn open_window(&mut self, url: Url, controller: Option<WorkerId>) -> Client {
        let mut client = Client::window(url);
        client.controller = controller;
        self.add(client.clone());

        let id = client.id.clone();
        for other in self.clients.values_mut() {
            other.focused = other.id == id;
        }
        client.focused = true;
        client
    }

    /// Number of clients.
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

/// Generate a client ID.
fn next_client_id() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    format!("client-{:06}", COUNTER.fetch_add(1, Ordering::Relaxed))
}
