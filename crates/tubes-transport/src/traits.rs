//! Transport abstraction traits for tubes.
//!
//! A transport accepts connections of one protocol and feeds them into the
//! shared [`Connector`](crate::Connector), which lets the server stay
//! transport-agnostic.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tubes_core::Client;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The peer did not complete the protocol handshake.
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A transport that can accept connections.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Accept a new connection and join it to the connector.
    ///
    /// This method waits until a connection is available or an error occurs.
    /// The connection is served in the background; the joined client is
    /// returned.
    async fn accept(&self) -> Result<Arc<Client>, TransportError>;

    /// Get the transport name (e.g., "websocket").
    fn name(&self) -> &'static str;

    /// Check if the transport is healthy.
    fn is_healthy(&self) -> bool {
        true
    }
}
