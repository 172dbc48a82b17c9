//! # tubes-core
//!
//! Channel matching, subscriptions and broadcast routing for tubes.
//!
//! This crate provides the routing engine:
//!
//! - **Path** - Channel patterns with `:param` and `*` segments
//! - **Channel** - Pattern, handlers, middlewares and live subscriptions
//! - **ChannelStore** - Registry resolving paths against every pattern
//! - **Context** - One client's subscription at one resolved path
//! - **Router** - Turns connector events into store operations
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌──────────────┐     ┌─────────────┐
//! │  Connector  │────▶│   Router    │────▶│ ChannelStore │────▶│  Channel(s) │
//! └─────────────┘     └─────────────┘     └──────────────┘     └─────────────┘
//!        ▲                                                            │
//!        │                    ┌─────────────┐                         │
//!        └────────────────────│  Context    │◀────────────────────────┘
//!             client send     └─────────────┘   subscribe / broadcast
//! ```
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use tubes_core::{tracing_sink, ChannelHandlers, Client, Hooks, Router};
//! use tubes_core::client::sender_fn;
//!
//! let router = Router::new(tracing_sink());
//! router.register_channel(
//!     "rooms/:room",
//!     ChannelHandlers::new().on_message(|ctx, envelope| {
//!         if let Some(payload) = envelope.payload_bytes() {
//!             ctx.broadcast(payload, Default::default());
//!         }
//!     }),
//! );
//!
//! let client = Arc::new(Client::new("c1", sender_fn(|_| Ok(()))));
//! router.on_message(&client, br#"{"type":"subscribe","channel":"rooms/lobby"}"#);
//! assert!(router.is_subscribed("rooms/lobby", "c1"));
//! ```

pub mod broadcast;
pub mod channel;
pub mod client;
pub mod context;
pub mod error;
pub mod hooks;
pub mod path;
pub mod plugin;
pub mod router;
pub mod store;

pub use broadcast::{BroadcastOptions, BroadcastOutcome, BroadcastResult, Delivery};
pub use channel::{Channel, ChannelHandlers, SubscriptionMiddleware};
pub use client::{Client, ClientId, ClientSender, Properties, SendError};
pub use context::{Context, ContextBroadcastOptions};
pub use error::{tracing_sink, Error, ErrorKind, ErrorSink, MissingProperty, RouterError};
pub use hooks::{Connector, Hooks};
pub use path::{Params, PathPattern};
pub use plugin::{BoxError, ChannelScope, Plugin, PluginError};
pub use router::{Router, RouterStats};
pub use store::{ChannelMatch, ChannelStore};
