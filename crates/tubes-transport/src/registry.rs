//! Registry of connected clients.

use dashmap::DashMap;
use std::sync::Arc;
use tubes_core::{Client, ClientId};

/// Concurrent map of connected clients by ID.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: DashMap<ClientId, Arc<Client>>,
}

impl ClientRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a client, returning the client previously registered under the
    /// same ID.
    pub fn join(&self, client: Arc<Client>) -> Option<Arc<Client>> {
        self.clients.insert(client.id().clone(), client)
    }

    /// Get a client by ID.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<Client>> {
        self.clients.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Remove a client by ID.
    pub fn remove(&self, id: &str) -> Option<Arc<Client>> {
        self.clients.remove(id).map(|(_, client)| client)
    }

    /// Check if a client is registered.
    #[must_use]
    pub fn exists(&self, id: &str) -> bool {
        self.clients.contains_key(id)
    }

    /// Get the number of connected clients.
    #[must_use]
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Check if no client is connected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Get the IDs of all connected clients.
    #[must_use]
    pub fn ids(&self) -> Vec<ClientId> {
        self.clients.iter().map(|entry| entry.key().clone()).collect()
    }
}
