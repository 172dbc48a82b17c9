//! Connector owning client lifetimes and forwarding their events.
//!
//! Transports call [`Connector::join`], [`Connector::message`] and
//! [`Connector::leave`]; the connector keeps the client registry current and
//! invokes the installed [`Hooks`] (normally a `tubes_core::Router`).

use crate::registry::ClientRegistry;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, info};
use tubes_core::{tracing_sink, Client, ClientId, ClientSender, Error, ErrorSink, Hooks, Properties};

/// Connection hub shared by all transports.
pub struct Connector {
    registry: ClientRegistry,
    hooks: RwLock<Option<Arc<dyn Hooks>>>,
    sink: ErrorSink,
}

impl Connector {
    /// Create a connector reporting errors to `sink`.
    #[must_use]
    pub fn new(sink: ErrorSink) -> Self {
        Self {
            registry: ClientRegistry::new(),
            hooks: RwLock::new(None),
            sink,
        }
    }

    /// Get the client registry.
    #[must_use]
    pub fn registry(&self) -> &ClientRegistry {
        &self.registry
    }

    /// Report an error to the sink.
    pub fn report(&self, error: Error) {
        (self.sink)(error);
    }

    /// Register a new client and fire `on_connect`.
    pub fn join(&self, sender: impl ClientSender + 'static, properties: Properties) -> Arc<Client> {
        let client = Arc::new(Client::new(ClientId::generate(), sender).with_properties(properties));
        self.registry.join(Arc::clone(&client));

        info!(client = %client.id(), clients = self.registry.len(), "Client joined");

        if let Some(hooks) = self.current_hooks() {
            hooks.on_connect(&client);
        }
        client
    }

    /// Forward a frame from client `id` to `on_message`.
    pub fn message(&self, id: &str, data: &[u8]) {
        let Some(client) = self.registry.get(id) else {
            debug!(client = %id, "Message from unknown client dropped");
            return;
        };

        if let Some(hooks) = self.current_hooks() {
            hooks.on_message(&client, data);
        }
    }

    /// Fire `on_disconnect` for client `id` and forget it.
    pub fn leave(&self, id: &str) {
        let Some(client) = self.registry.get(id) else {
            debug!(client = %id, "Leave for unknown client ignored");
            return;
        };

        if let Some(hooks) = self.current_hooks() {
            hooks.on_disconnect(&client);
        }
        self.registry.remove(id);

        info!(client = %id, clients = self.registry.len(), "Client left");
    }

    fn current_hooks(&self) -> Option<Arc<dyn Hooks>> {
        self.hooks.read().clone()
    }
}

impl Default for Connector {
    fn default() -> Self {
        Self::new(tracing_sink())
    }
}

impl tubes_core::Connector for Connector {
    fn hook(&self, hooks: Arc<dyn Hooks>) {
        *self.hooks.write() = Some(hooks);
    }

    fn error_sink(&self) -> ErrorSink {
        Arc::clone(&self.sink)
    }

    fn is_connected(&self, client_id: &str) -> bool {
        self.registry.exists(client_id)
    }
}

impl std::fmt::Debug for Connector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connector")
            .field("clients", &self.registry.len())
            .field("hooked", &self.hooks.read().is_some())
            .finish()
    }
}
