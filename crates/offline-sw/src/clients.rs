//! Clients API: the windows this worker has opened.

use std::sync::atomic::{AtomicU64, Ordering};

use hashbrown::HashMap;
use url::Url;

/// A window client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Client {
    /// Client ID.
    pub id: String,

    /// Client URL.
    pub url: Url,

    /// Whether focused.
    pub focused: bool,
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

    /// Get a client by ID.
    pub fn get(&self, id: &str) -> Option<&Client> {
        self.clients.get(id)
    }

    /// All windows, sorted by ID.
    pub fn windows(&self) -> Vec<&Client> {
        let mut windows: Vec<&Client> = self.clients.values().collect();
        windows.sort_by(|a, b| a.id.cmp(&b.id));
        windows
    }

    /// Open a focused window at `url`. Any previously focused window loses focus.
    pub fn open_window(&mut self, url: Url) -> Client {
        for client in self.clients.values_mut() {
            client.focused = false;
        }

        let client = Client {
            id: next_client_id(),
            url,
            focused: true,
        };

        self.clients.insert(client.id.clone(), client.clone());
        client
    }
}

fn next_client_id() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    format!("client-{:08}", COUNTER.fetch_add(1, Ordering::Relaxed))
}
