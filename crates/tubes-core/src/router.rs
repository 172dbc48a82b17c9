//! Top-level message router for tubes.
//!
//! The router owns the channel store and turns connector events into store
//! operations. It also exposes direct server-to-client sends.

use crate::channel::{Channel, ChannelHandlers};
use crate::client::Client;
use crate::error::{Error, ErrorKind, ErrorSink, RouterError};
use crate::hooks::{Connector, Hooks};
use crate::plugin::{self, BoxError, ChannelScope, Plugin, PluginError};
use crate::store::{ChannelMatch, ChannelStore};
use std::sync::Arc;
use tracing::{debug, info, trace};
use tubes_protocol::{codec, MessageType};

/// The central message router.
pub struct Router {
    /// Registered channels.
    channels: ChannelStore,
    /// Process-wide error sink.
    sink: ErrorSink,
}

impl Router {
    /// Create a router reporting asynchronous errors to `sink`.
    #[must_use]
    pub fn new(sink: ErrorSink) -> Self {
        info!("Creating router");
        Self {
            channels: ChannelStore::new(Arc::clone(&sink)),
            sink,
        }
    }

    /// Create a router using the connector's error sink and install it as
    /// the connector's hook set.
    pub fn attach(connector: &dyn Connector) -> Arc<Self> {
        let router = Arc::new(Self::new(connector.error_sink()));
        connector.hook(Arc::clone(&router) as Arc<dyn Hooks>);
        router
    }

    /// Register a channel under `pattern`, replacing any channel registered
    /// under the identical pattern.
    pub fn register_channel(
        &self,
        pattern: impl Into<String>,
        handlers: ChannelHandlers,
    ) -> Arc<Channel> {
        self.channels.register(pattern, handlers)
    }

    /// Destroy a channel, unsubscribing all of its subscribers.
    ///
    /// # Errors
    ///
    /// Returns an error if no channel is registered under `pattern`.
    pub fn destroy_channel(&self, pattern: &str) -> Result<(), RouterError> {
        self.channels.destroy(pattern)
    }

    /// Get the channel registered under exactly `pattern`.
    #[must_use]
    pub fn channel(&self, pattern: &str) -> Option<Arc<Channel>> {
        self.channels.lookup_exact(pattern)
    }

    /// Get the channel store.
    #[must_use]
    pub fn channels(&self) -> &ChannelStore {
        &self.channels
    }

    /// Get the error sink.
    #[must_use]
    pub fn sink(&self) -> &ErrorSink {
        &self.sink
    }

    /// Check if a client is subscribed at exactly `path` on any matching
    /// channel.
    #[must_use]
    pub fn is_subscribed(&self, path: &str, client_id: &str) -> bool {
        self.channels
            .lookup(path)
            .iter()
            .any(|m| m.channel.is_subscribed(client_id, path))
    }

    /// Send a raw JSON payload to one subscriber.
    ///
    /// If several matching channels hold a subscription for the client at
    /// `path`, only the first one found delivers.
    ///
    /// # Errors
    ///
    /// Returns `UnknownChannel` if no channel matches `path`,
    /// `ClientNotSubscribed` if the client holds no subscription at exactly
    /// `path`, or the delivery error.
    pub fn send(&self, path: &str, client_id: &str, payload: &[u8]) -> Result<(), Error> {
        let matches = self.channels.lookup(path);
        if matches.is_empty() {
            return Err(Error::new(
                ErrorKind::UnknownChannel,
                format!("channel not found: {path}"),
            ));
        }

        let context = matches
            .iter()
            .find_map(|ChannelMatch { channel, .. }| channel.find_context(client_id, path))
            .ok_or_else(|| {
                Error::new(
                    ErrorKind::ClientNotSubscribed,
                    format!("client {client_id} is not subscribed to {path}"),
                )
            })?;

        context.send(payload)
    }

    /// Mount a plugin under `prefix`.
    ///
    /// # Errors
    ///
    /// Returns an error if the plugin's initializer fails. Channels it
    /// registered before failing are destroyed.
    pub fn use_plugin<P>(&self, prefix: &str, plugin: &P) -> Result<(), PluginError>
    where
        P: Plugin + ?Sized,
    {
        self.activate(prefix, |scope| plugin.init(scope))
    }

    /// Run an ad-hoc initializer in a scope prefixed with `prefix`.
    ///
    /// # Errors
    ///
    /// Same as [`Router::use_plugin`].
    pub fn activate<F>(&self, prefix: &str, init: F) -> Result<(), PluginError>
    where
        F: FnOnce(&mut ChannelScope<'_>) -> Result<(), BoxError>,
    {
        plugin::activate(&self.channels, prefix, init)
    }

    /// Get router statistics.
    #[must_use]
    pub fn stats(&self) -> RouterStats {
        RouterStats {
            channel_count: self.channels.len(),
            subscription_count: self.channels.subscription_count(),
        }
    }

    fn report(&self, error: Error) {
        (self.sink)(error);
    }
}

impl Hooks for Router {
    fn on_connect(&self, client: &Arc<Client>) {
        debug!(client = %client.id(), "Client connected");
    }

    fn on_disconnect(&self, client: &Arc<Client>) {
        self.channels.unsubscribe_all(client.id().as_str());
        debug!(client = %client.id(), "Client disconnected");
    }

    fn on_message(&self, client: &Arc<Client>, data: &[u8]) {
        let envelope = match codec::decode(data) {
            Ok(envelope) => envelope,
            Err(e) => {
                self.report(
                    Error::new(ErrorKind::InvalidMessage, "failed to parse message").with_source(e),
                );
                return;
            }
        };

        trace!(
            client = %client.id(),
            kind = %envelope.kind,
            channel = %envelope.channel,
            "Inbound message"
        );

        match &envelope.kind {
            MessageType::Subscribe => {
                self.channels.subscribe(client, &envelope.channel);
            }
            MessageType::Unsubscribe => {
                self.channels
                    .unsubscribe(client.id().as_str(), &envelope.channel);
            }
            MessageType::Message => self.channels.dispatch_inbound(client, &envelope),
            MessageType::Unknown(kind) => self.report(Error::new(
                ErrorKind::UnknownType,
                format!("unknown message type: {kind}"),
            )),
        }
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("channels", &self.channels)
            .finish_non_exhaustive()
    }
}

/// Router statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouterStats {
    /// Number of registered channels.
    pub channel_count: usize,
    /// Total number of subscriptions.
    pub subscription_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{sender_fn, SendError};
    use bytes::Bytes;
    use parking_lot::Mutex;
    use tubes_protocol::Envelope;

    struct Fixture {
        router: Router,
        errors: Arc<Mutex<Vec<Error>>>,
    }

    fn fixture() -> Fixture {
        let errors = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&errors);
        Fixture {
            router: Router::new(Arc::new(move |error| recorded.lock().push(error))),
            errors,
        }
    }

    fn recording_client(id: &str) -> (Arc<Client>, Arc<Mutex<Vec<Bytes>>>) {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let outbox = Arc::clone(&sent);
        let client = Arc::new(Client::new(
            id,
            sender_fn(move |data| {
                outbox.lock().push(data);
                Ok(())
            }),
        ));
        (client, sent)
    }

    fn frame(envelope: &Envelope) -> Bytes {
        codec::encode(envelope).unwrap()
    }

    #[test]
    fn test_subscribe_via_message() {
        let Fixture { router, .. } = fixture();
        router.register_channel("rooms/:room", ChannelHandlers::new());
        let (client, _) = recording_client("c1");

        router.on_message(&client, &frame(&Envelope::subscribe("rooms/lobby")));
        assert!(router.is_subscribed("rooms/lobby", "c1"));
        assert!(!router.is_subscribed("rooms/other", "c1"));

        router.on_message(&client, &frame(&Envelope::unsubscribe("rooms/lobby")));
        assert!(!router.is_subscribed("rooms/lobby", "c1"));
    }

    #[test]
    fn test_disconnect_unsubscribes_everything() {
        let Fixture { router, .. } = fixture();
        router.register_channel("rooms/:room", ChannelHandlers::new());
        router.register_channel("lobby", ChannelHandlers::new());
        let (client, _) = recording_client("c1");
        router.on_message(&client, &frame(&Envelope::subscribe("rooms/a")));
        router.on_message(&client, &frame(&Envelope::subscribe("lobby")));
        assert_eq!(router.stats().subscription_count, 2);

        router.on_disconnect(&client);
        assert_eq!(
            router.stats(),
            RouterStats {
                channel_count: 2,
                subscription_count: 0
            }
        );
    }

    #[test]
    fn test_invalid_message() {
        let Fixture { router, errors } = fixture();
        router.register_channel("a", ChannelHandlers::new());
        let (client, _) = recording_client("c1");

        router.on_message(&client, b"{not json");

        let errors = errors.lock();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind(), ErrorKind::InvalidMessage);
        assert_eq!(router.stats().subscription_count, 0);
    }

    #[test]
    fn test_unknown_type() {
        let Fixture { router, errors } = fixture();
        let (client, _) = recording_client("c1");

        router.on_message(&client, br#"{"type":"publish","channel":"a","payload":null}"#);

        assert_eq!(errors.lock()[0].kind(), ErrorKind::UnknownType);
    }

    #[test]
    fn test_direct_send() {
        let Fixture { router, .. } = fixture();
        router.register_channel("rooms/:room", ChannelHandlers::new());
        let (client, sent) = recording_client("c1");

        let err = router.send("nowhere", "c1", b"1").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownChannel);

        let err = router.send("rooms/lobby", "c1", b"1").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ClientNotSubscribed);

        router.on_message(&client, &frame(&Envelope::subscribe("rooms/lobby")));
        router.send("rooms/lobby", "c1", br#"{"n":1}"#).unwrap();

        let sent = sent.lock();
        assert_eq!(sent.len(), 1);
        let envelope = codec::decode(&sent[0]).unwrap();
        assert_eq!(envelope.channel, "rooms/lobby");
        assert_eq!(envelope.payload_bytes(), Some(&br#"{"n":1}"#[..]));
    }

    #[test]
    fn test_direct_send_delivers_once_under_fan_out() {
        let Fixture { router, .. } = fixture();
        router.register_channel("rooms/:room", ChannelHandlers::new());
        router.register_channel("rooms/lobby", ChannelHandlers::new());
        let (client, sent) = recording_client("c1");
        router.on_message(&client, &frame(&Envelope::subscribe("rooms/lobby")));
        assert_eq!(router.stats().subscription_count, 2);

        router.send("rooms/lobby", "c1", b"1").unwrap();
        assert_eq!(sent.lock().len(), 1);
    }

    #[test]
    fn test_direct_send_transport_failure() {
        let Fixture { router, .. } = fixture();
        router.register_channel("a", ChannelHandlers::new());
        let client = Arc::new(Client::new("c1", sender_fn(|_| Err(SendError::Closed))));
        router.on_message(&client, &frame(&Envelope::subscribe("a")));

        let err = router.send("a", "c1", b"1").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SendingMessageFailed);
    }

    #[test]
    fn test_plugin_activation() {
        struct Chat;

        impl Plugin for Chat {
            fn init(&self, scope: &mut ChannelScope<'_>) -> Result<(), BoxError> {
                scope.register_channel("users", ChannelHandlers::new());
                Ok(())
            }
        }

        let Fixture { router, .. } = fixture();
        router.use_plugin("chat", &Chat).unwrap();
        assert!(router.channel("chat/users").is_some());

        let err = router
            .activate("broken", |scope| {
                scope.register_channel("x", ChannelHandlers::new());
                Err("nope".into())
            })
            .unwrap_err();
        assert!(err.to_string().contains("broken"));
        assert!(router.channel("broken/x").is_none());
        assert_eq!(router.stats().channel_count, 1);
    }
}
