//! # tubes-transport
//!
//! Connection plumbing for tubes.
//!
//! - **Connector** - Client registry plus the hook slot the router attaches to
//! - **WebSocket** - Pump serving axum-upgraded sockets, and a standalone
//!   tokio-tungstenite transport
//!
//! ## Transport Abstraction
//!
//! Transports implement [`Transport`] and hand every accepted connection to
//! the shared [`Connector`], so the router never sees the wire protocol.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tubes_core::Router;
//! use tubes_transport::{Connector, Transport, WebSocketTransport};
//!
//! let connector = Arc::new(Connector::default());
//! let router = Router::attach(connector.as_ref());
//! let transport = WebSocketTransport::bind(addr, connector).await?;
//! loop {
//!     let client = transport.accept().await?;
//! }
//! ```

pub mod connector;
pub mod registry;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use connector::Connector;
pub use registry::ClientRegistry;
pub use traits::{Transport, TransportError};

#[cfg(feature = "websocket")]
pub use websocket::{serve, WebSocketConfig, WebSocketTransport};
