//! Connected clients as seen by the router.
//!
//! The connector owns client lifetimes; the router only reads the id and
//! pushes encoded envelopes through the client's sender.

use crate::error::MissingProperty;
use bytes::Bytes;
use dashmap::DashMap;
use serde_json::Value;
use std::borrow::Borrow;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::sync::mpsc;

/// Atomic counter keeping generated ids unique within the same nanosecond.
static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Unique identifier of a client, assigned by the connector.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(String);

impl ClientId {
    /// Create a client ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a unique client ID.
    #[must_use]
    pub fn generate() -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_nanos() as u64)
            .unwrap_or_default();
        let counter = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self(format!("client_{:x}{:04x}", timestamp, counter & 0xffff))
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for ClientId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<String> for ClientId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ClientId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Errors raised by a client's transport when sending.
#[derive(Debug, Clone, Error)]
pub enum SendError {
    /// The connection is gone.
    #[error("Connection closed")]
    Closed,

    /// The transport refused the data.
    #[error("Send failed: {0}")]
    Failed(String),
}

/// Outbound half of a client connection.
///
/// Implementations must not block for long: broadcasts call every
/// recipient's sender in turn on the caller's thread.
pub trait ClientSender: Send + Sync {
    /// Hand one encoded envelope to the transport.
    fn send(&self, data: Bytes) -> Result<(), SendError>;
}

impl ClientSender for mpsc::UnboundedSender<Bytes> {
    fn send(&self, data: Bytes) -> Result<(), SendError> {
        mpsc::UnboundedSender::send(self, data).map_err(|_| SendError::Closed)
    }
}

/// Sender backed by a closure. See [`sender_fn`].
pub struct FnSender<F>(F);

impl<F> ClientSender for FnSender<F>
where
    F: Fn(Bytes) -> Result<(), SendError> + Send + Sync,
{
    fn send(&self, data: Bytes) -> Result<(), SendError> {
        (self.0)(data)
    }
}

/// Wrap a closure as a [`ClientSender`].
pub fn sender_fn<F>(f: F) -> FnSender<F>
where
    F: Fn(Bytes) -> Result<(), SendError> + Send + Sync,
{
    FnSender(f)
}

/// Free-form property bag shared by clients and contexts.
#[derive(Debug, Default)]
pub struct Properties {
    values: DashMap<String, Value>,
}

impl Properties {
    /// Create an empty property bag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a property value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        self.values.get(key).map(|value| value.clone())
    }

    /// Get a property that the caller requires to be present.
    ///
    /// # Errors
    ///
    /// Returns [`MissingProperty`] if the key is not set.
    pub fn must_get(&self, key: &str) -> Result<Value, MissingProperty> {
        self.get(key).ok_or_else(|| MissingProperty {
            key: key.to_string(),
        })
    }

    /// Set a property value, returning the previous one.
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.values.insert(key.into(), value.into())
    }

    /// Remove a property.
    pub fn remove(&self, key: &str) -> Option<Value> {
        self.values.remove(key).map(|(_, value)| value)
    }

    /// Check if a property is set.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }
}

impl FromIterator<(String, Value)> for Properties {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

/// A connected client.
pub struct Client {
    id: ClientId,
    sender: Arc<dyn ClientSender>,
    properties: Properties,
}

impl Client {
    /// Create a new client with an empty property bag.
    pub fn new(id: impl Into<ClientId>, sender: impl ClientSender + 'static) -> Self {
        Self {
            id: id.into(),
            sender: Arc::new(sender),
            properties: Properties::new(),
        }
    }

    /// Replace the property bag.
    #[must_use]
    pub fn with_properties(mut self, properties: Properties) -> Self {
        self.properties = properties;
        self
    }

    /// Get the client ID.
    #[must_use]
    pub fn id(&self) -> &ClientId {
        &self.id
    }

    /// Send raw bytes to the client.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport rejects the data.
    pub fn send(&self, data: Bytes) -> Result<(), SendError> {
        self.sender.send(data)
    }

    /// Get the client's property bag.
    #[must_use]
    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    /// Get a property value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        self.properties.get(key)
    }

    /// Get a property that must be present.
    ///
    /// # Errors
    ///
    /// Returns [`MissingProperty`] if the key is not set.
    pub fn must_get(&self, key: &str) -> Result<Value, MissingProperty> {
        self.properties.must_get(key)
    }

    /// Set a property value.
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.properties.set(key, value);
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("id", &self.id)
            .field("properties", &self.properties)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_client_id_generation() {
        let id1 = ClientId::generate();
        let id2 = ClientId::generate();
        assert_ne!(id1, id2);
        assert!(id1.as_str().starts_with("client_"));
    }

    #[test]
    fn test_client_properties() {
        let properties: Properties = [("foo".to_string(), json!("bar"))].into_iter().collect();
        let client = Client::new("c1", sender_fn(|_| Ok(()))).with_properties(properties);

        assert_eq!(client.get("foo"), Some(json!("bar")));
        client.set("admin", true);
        assert_eq!(client.must_get("admin").unwrap(), json!(true));

        let missing = client.must_get("role").unwrap_err();
        assert_eq!(missing.key, "role");
    }

    #[tokio::test]
    async fn test_channel_sender() {
        let (tx, mut rx) = mpsc::unbounded_channel::<Bytes>();
        let client = Client::new("c1", tx);

        client.send(Bytes::from_static(b"hello")).unwrap();
        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"hello"));

        drop(rx);
        assert!(matches!(
            client.send(Bytes::from_static(b"late")),
            Err(SendError::Closed)
        ));
    }
}
