//! Seams between the router and the connector that owns the connections.

use crate::client::Client;
use crate::error::ErrorSink;
use std::sync::Arc;

/// Connection lifecycle callbacks, implemented by the router.
///
/// A connector calls these sequentially per connection: one event is fully
/// processed before the next event of the same connection is delivered.
pub trait Hooks: Send + Sync {
    /// A client connected.
    fn on_connect(&self, _client: &Arc<Client>) {}

    /// A client disconnected. Must never fail.
    fn on_disconnect(&self, client: &Arc<Client>);

    /// A client sent a raw frame.
    fn on_message(&self, client: &Arc<Client>, data: &[u8]);
}

/// A component accepting connections and reporting their events.
pub trait Connector: Send + Sync {
    /// Install the hook set receiving connection events.
    fn hook(&self, hooks: Arc<dyn Hooks>);

    /// Get the process-wide error sink.
    fn error_sink(&self) -> ErrorSink;

    /// Check if a client is currently connected.
    fn is_connected(&self, client_id: &str) -> bool;
}
