//! Registry of channels keyed by their registration pattern.
//!
//! Resolution is fan-out: every registered pattern matching a path takes part
//! in subscribe, unsubscribe and message dispatch for that path.

use crate::channel::{Channel, ChannelHandlers};
use crate::client::Client;
use crate::context::Context;
use crate::error::{Error, ErrorKind, ErrorSink, RouterError};
use crate::path::Params;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use tubes_protocol::Envelope;

/// A channel whose pattern matched a path, with the captured parameters.
#[derive(Debug, Clone)]
pub struct ChannelMatch {
    /// The matching channel.
    pub channel: Arc<Channel>,
    /// Parameters captured from the path.
    pub params: Params,
}

/// Registry of all channels.
pub struct ChannelStore {
    /// Channels indexed by registration pattern.
    channels: DashMap<String, Arc<Channel>>,
    /// Shared error sink handed to every channel.
    sink: ErrorSink,
}

impl ChannelStore {
    /// Create an empty store reporting to `sink`.
    #[must_use]
    pub fn new(sink: ErrorSink) -> Self {
        Self {
            channels: DashMap::new(),
            sink,
        }
    }

    /// Get the error sink.
    #[must_use]
    pub fn sink(&self) -> &ErrorSink {
        &self.sink
    }

    /// Register a channel under `pattern`.
    ///
    /// An existing channel with the identical pattern is replaced; its
    /// subscriptions are dropped without unsubscribe notifications.
    pub fn register(&self, pattern: impl Into<String>, handlers: ChannelHandlers) -> Arc<Channel> {
        let pattern = pattern.into();
        let channel = Arc::new(Channel::new(pattern.clone(), handlers, Arc::clone(&self.sink)));

        if let Some(previous) = self.channels.insert(pattern.clone(), Arc::clone(&channel)) {
            warn!(
                channel = %pattern,
                subscribers = previous.subscriber_count(),
                "Channel re-registered, replacing existing handlers"
            );
        } else {
            info!(channel = %pattern, "Channel registered");
        }
        channel
    }

    /// Find every channel whose pattern matches `path`.
    #[must_use]
    pub fn lookup(&self, path: &str) -> Vec<ChannelMatch> {
        self.channels
            .iter()
            .filter_map(|entry| {
                let channel = entry.value();
                channel.matches(path).map(|params| ChannelMatch {
                    channel: Arc::clone(channel),
                    params,
                })
            })
            .collect()
    }

    /// Get the channel registered under exactly `pattern`.
    #[must_use]
    pub fn lookup_exact(&self, pattern: &str) -> Option<Arc<Channel>> {
        self.channels.get(pattern).map(|entry| Arc::clone(entry.value()))
    }

    /// Remove a channel and tear down its subscriptions.
    ///
    /// The channel leaves the registry first, so no new subscription can
    /// reach it while the existing ones are unsubscribed.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::ChannelNotFound`] if no channel is registered
    /// under `pattern`.
    pub fn destroy(&self, pattern: &str) -> Result<(), RouterError> {
        let (_, channel) = self
            .channels
            .remove(pattern)
            .ok_or_else(|| RouterError::ChannelNotFound(pattern.to_string()))?;

        let removed = channel.unsubscribe_everyone();
        info!(channel = %pattern, subscriptions = removed, "Channel destroyed");
        Ok(())
    }

    /// Pass an inbound message to every matching channel.
    ///
    /// A path no channel matches is reported as `UnknownChannel`.
    pub fn dispatch_inbound(&self, client: &Client, envelope: &Envelope) {
        let matches = self.lookup(&envelope.channel);
        if matches.is_empty() {
            (self.sink)(Error::new(
                ErrorKind::UnknownChannel,
                format!("channel not found: {}", envelope.channel),
            ));
            return;
        }

        for ChannelMatch { channel, .. } in matches {
            channel.handle_message(client, envelope);
        }
    }

    /// Subscribe `client` at `path` on every matching channel.
    ///
    /// Each match gets its own context. Returns `true` if at least one
    /// channel matched, even if a middleware rejected the subscription.
    pub fn subscribe(&self, client: &Arc<Client>, path: &str) -> bool {
        let matches = self.lookup(path);
        if matches.is_empty() {
            debug!(client = %client.id(), path = %path, "Subscribe to unknown channel");
            return false;
        }

        for ChannelMatch { channel, params } in matches {
            let context = Context::new(Arc::clone(client), path, Arc::downgrade(&channel), params);
            channel.subscribe(Arc::new(context));
        }
        true
    }

    /// Unsubscribe `client_id` at `path` on every matching channel.
    ///
    /// Returns `true` if any channel held the subscription.
    pub fn unsubscribe(&self, client_id: &str, path: &str) -> bool {
        self.lookup(path)
            .into_iter()
            .fold(false, |found, ChannelMatch { channel, .. }| {
                channel.unsubscribe(client_id, path) || found
            })
    }

    /// Remove every subscription of `client_id` on every channel.
    pub fn unsubscribe_all(&self, client_id: &str) {
        for channel in self.snapshot() {
            channel.unsubscribe_all_paths(client_id);
        }
    }

    /// Get the number of registered channels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// Check if no channel is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Get all registered patterns.
    #[must_use]
    pub fn patterns(&self) -> Vec<String> {
        self.channels.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Get the total number of subscriptions across all channels.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.channels
            .iter()
            .map(|entry| entry.value().subscriber_count())
            .sum()
    }

    fn snapshot(&self) -> Vec<Arc<Channel>> {
        self.channels
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }
}

impl std::fmt::Debug for ChannelStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelStore")
            .field("channels", &self.patterns())
            .finish_non_exhaustive()
    }
}
