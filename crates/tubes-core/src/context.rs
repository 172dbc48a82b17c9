//! Per-subscription context.
//!
//! A [`Context`] exists for every (client, resolved path) subscription. It is
//! what handlers receive, and how they reply to the subscriber or broadcast
//! to everybody else on the same path.

use crate::broadcast::{BroadcastOptions, BroadcastResult};
use crate::channel::Channel;
use crate::client::{Client, Properties};
use crate::error::{Error, ErrorKind, MissingProperty};
use crate::path::Params;
use parking_lot::RwLock;
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::trace;
use tubes_protocol::{codec, Envelope, MessageType};

/// Options for [`Context::broadcast`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ContextBroadcastOptions {
    /// Do not deliver to the client owning the context.
    pub exclude_self: bool,
}

impl ContextBroadcastOptions {
    /// Deliver to every subscriber except the context owner.
    #[must_use]
    pub fn exclude_self() -> Self {
        Self { exclude_self: true }
    }
}

/// A client's subscription to one resolved channel path.
pub struct Context {
    client: Arc<Client>,
    path: String,
    channel: Weak<Channel>,
    params: RwLock<Params>,
    properties: Properties,
}

impl Context {
    /// Create a context for `client` subscribed at `path` on `channel`.
    #[must_use]
    pub fn new(
        client: Arc<Client>,
        path: impl Into<String>,
        channel: Weak<Channel>,
        params: Params,
    ) -> Self {
        Self {
            client,
            path: path.into(),
            channel,
            params: RwLock::new(params),
            properties: Properties::new(),
        }
    }

    /// Get the subscribed client.
    #[must_use]
    pub fn client(&self) -> &Arc<Client> {
        &self.client
    }

    /// Get the resolved path of this subscription.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Get the owning channel, unless it has been destroyed.
    #[must_use]
    pub fn channel(&self) -> Option<Arc<Channel>> {
        self.channel.upgrade()
    }

    /// Get a captured path parameter.
    #[must_use]
    pub fn param(&self, key: &str) -> Option<String> {
        self.params.read().get(key).cloned()
    }

    /// Get a copy of all captured path parameters.
    #[must_use]
    pub fn params(&self) -> Params {
        self.params.read().clone()
    }

    /// Replace the captured path parameters.
    pub fn set_params(&self, params: Params) {
        *self.params.write() = params;
    }

    /// Get the context's property bag.
    #[must_use]
    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    /// Get a property value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        self.properties.get(key)
    }

    /// Get a property that must have been set, e.g. by a middleware.
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

    /// Send a raw JSON payload to this subscriber.
    ///
    /// The payload is wrapped in a `message` envelope addressed to this
    /// context's path. An empty payload is sent as `null`.
    ///
    /// # Errors
    ///
    /// Returns a `SendingMessageFailed` error if the payload cannot be
    /// encoded or the transport rejects it.
    pub fn send(self: &Arc<Self>, payload: &[u8]) -> Result<(), Error> {
        let data = Envelope::message(self.path.as_str(), payload)
            .and_then(|envelope| codec::encode(&envelope))
            .map_err(|e| self.fail(ErrorKind::SendingMessageFailed, "failed to encode message", e))?;

        self.client.send(data).map_err(|e| {
            self.fail(
                ErrorKind::SendingMessageFailed,
                "failed to send message to client",
                e,
            )
        })?;

        trace!(client = %self.client.id(), path = %self.path, "Message sent");
        Ok(())
    }

    /// Notify this subscriber of an error.
    ///
    /// The error's wire form becomes the payload of a regular `message`
    /// envelope addressed to this context's path.
    ///
    /// # Errors
    ///
    /// Returns a `SendingErrorFailed` error if encoding or delivery fails.
    pub fn send_error(self: &Arc<Self>, error: &Error) -> Result<(), Error> {
        let data = Envelope::new(MessageType::Message, self.path.as_str())
            .with_json(&error.to_payload())
            .and_then(|envelope| codec::encode(&envelope))
            .map_err(|e| self.fail(ErrorKind::SendingErrorFailed, "failed to encode error", e))?;

        self.client.send(data).map_err(|e| {
            self.fail(
                ErrorKind::SendingErrorFailed,
                "failed to send error to client",
                e,
            )
        })
    }

    /// Broadcast a raw JSON payload to every subscriber of this path.
    ///
    /// Returns an empty result if the channel has been destroyed.
    pub fn broadcast(&self, payload: &[u8], options: ContextBroadcastOptions) -> BroadcastResult {
        let mut channel_options = BroadcastOptions::new();
        if options.exclude_self {
            channel_options = channel_options.skip(self.client.id().clone());
        }

        match self.channel() {
            Some(channel) => channel.broadcast(&self.path, payload, &channel_options),
            None => BroadcastResult::default(),
        }
    }

    fn fail(
        self: &Arc<Self>,
        kind: ErrorKind,
        description: &str,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Error {
        Error::new(kind, description)
            .with_source(source)
            .with_context(Arc::clone(self))
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("client", self.client.id())
            .field("path", &self.path)
            .field("params", &*self.params.read())
            .finish_non_exhaustive()
    }
}
