//! Shared fixtures for the tubes benchmarks.

use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::mpsc;
use tubes_core::client::sender_fn;
use tubes_core::{tracing_sink, ChannelHandlers, Client, Hooks, Router};
use tubes_protocol::{codec, Envelope};

/// A 64-byte JSON string payload.
pub const PAYLOAD: &[u8] = br#""01234567890123456789012345678901234567890123456789012345678901""#;

/// A client that drops everything sent to it.
#[must_use]
pub fn null_client(id: impl Into<String>) -> Arc<Client> {
    Arc::new(Client::new(id.into(), sender_fn(|_| Ok(()))))
}

/// A client backed by an unbounded queue, like a live WebSocket session.
#[must_use]
pub fn queued_client(id: impl Into<String>) -> (Arc<Client>, mpsc::UnboundedReceiver<Bytes>) {
    let (tx, rx) = mpsc::unbounded_channel::<Bytes>();
    (Arc::new(Client::new(id.into(), tx)), rx)
}

/// Encoded inbound envelope, ready for `Hooks::on_message`.
///
/// # Panics
///
/// Panics if the envelope cannot be encoded.
#[must_use]
pub fn frame(envelope: &Envelope) -> Bytes {
    codec::encode(envelope).expect("encodable envelope")
}

/// A router with `count` null clients subscribed to `path`.
///
/// The channel registered under `pattern` must match `path`.
#[must_use]
pub fn router_with_subscribers(pattern: &str, path: &str, count: usize) -> Router {
    let router = Router::new(tracing_sink());
    router.register_channel(pattern, ChannelHandlers::new());

    let subscribe = frame(&Envelope::subscribe(path));
    for i in 0..count {
        router.on_message(&null_client(format!("client-{i}")), &subscribe);
    }
    router
}
