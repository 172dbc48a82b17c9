//! Channel abstraction for tubes.
//!
//! A channel is a registered path pattern together with its handlers and the
//! live subscriptions on every path the pattern resolves to.

use crate::broadcast::{fan_out, BroadcastOptions, BroadcastResult};
use crate::client::{Client, ClientId};
use crate::context::Context;
use crate::error::{Error, ErrorSink};
use crate::path::{Params, PathPattern};
use dashmap::DashMap;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;
use tubes_protocol::Envelope;

/// Handler for subscribe and unsubscribe events.
pub type EventHandler = Arc<dyn Fn(&Arc<Context>) + Send + Sync>;

/// Handler for messages sent by a subscriber.
pub type MessageHandler = Arc<dyn Fn(&Arc<Context>, &Envelope) + Send + Sync>;

/// A check run before a subscription is accepted.
///
/// Returning an error rejects the subscription. Middlewares may also
/// populate the context's properties for later handlers.
pub trait SubscriptionMiddleware: Send + Sync {
    /// Accept or reject the subscription described by `context`.
    fn check(&self, context: &Arc<Context>) -> Result<(), Error>;
}

impl<F> SubscriptionMiddleware for F
where
    F: Fn(&Arc<Context>) -> Result<(), Error> + Send + Sync,
{
    fn check(&self, context: &Arc<Context>) -> Result<(), Error> {
        self(context)
    }
}

/// Handlers attached to a channel. Every handler is optional.
#[derive(Clone, Default)]
pub struct ChannelHandlers {
    on_subscribe: Option<EventHandler>,
    on_unsubscribe: Option<EventHandler>,
    on_message: Option<MessageHandler>,
    middlewares: Vec<Arc<dyn SubscriptionMiddleware>>,
}

impl ChannelHandlers {
    /// Create an empty handler set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `handler` after a subscription is accepted.
    #[must_use]
    pub fn on_subscribe<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Arc<Context>) + Send + Sync + 'static,
    {
        self.on_subscribe = Some(Arc::new(handler));
        self
    }

    /// Run `handler` after a subscription is removed.
    #[must_use]
    pub fn on_unsubscribe<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Arc<Context>) + Send + Sync + 'static,
    {
        self.on_unsubscribe = Some(Arc::new(handler));
        self
    }

    /// Run `handler` for every message a subscriber sends on its path.
    #[must_use]
    pub fn on_message<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Arc<Context>, &Envelope) + Send + Sync + 'static,
    {
        self.on_message = Some(Arc::new(handler));
        self
    }

    /// Append a middleware closure. Middlewares run in registration order.
    #[must_use]
    pub fn middleware<F>(self, middleware: F) -> Self
    where
        F: Fn(&Arc<Context>) -> Result<(), Error> + Send + Sync + 'static,
    {
        self.middleware_layer(Arc::new(middleware))
    }

    /// Append a shared middleware object.
    #[must_use]
    pub fn middleware_layer(mut self, middleware: Arc<dyn SubscriptionMiddleware>) -> Self {
        self.middlewares.push(middleware);
        self
    }
}

impl fmt::Debug for ChannelHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelHandlers")
            .field("on_subscribe", &self.on_subscribe.is_some())
            .field("on_unsubscribe", &self.on_unsubscribe.is_some())
            .field("on_message", &self.on_message.is_some())
            .field("middlewares", &self.middlewares.len())
            .finish()
    }
}

/// A channel for pub/sub messaging.
pub struct Channel {
    /// Compiled registration pattern.
    pattern: PathPattern,
    /// Lifecycle and message handlers.
    handlers: ChannelHandlers,
    /// Subscriptions: client ID -> resolved path -> context.
    subscribers: DashMap<ClientId, HashMap<String, Arc<Context>>>,
    /// Where rejected subscriptions are reported.
    sink: ErrorSink,
    /// Set once the channel is torn down; no subscription is accepted after.
    closed: AtomicBool,
}

impl Channel {
    /// Create a new channel with no subscribers.
    #[must_use]
    pub fn new(pattern: impl Into<String>, handlers: ChannelHandlers, sink: ErrorSink) -> Self {
        Self {
            pattern: PathPattern::parse(pattern),
            handlers,
            subscribers: DashMap::new(),
            sink,
            closed: AtomicBool::new(false),
        }
    }

    /// Get the channel pattern.
    #[must_use]
    pub fn pattern(&self) -> &PathPattern {
        &self.pattern
    }

    /// Match a concrete path against the channel pattern.
    #[must_use]
    pub fn matches(&self, path: &str) -> Option<Params> {
        self.pattern.matches(path)
    }

    /// Run the middlewares and, if all pass, add the subscription.
    ///
    /// A rejection is reported to the error sink and, best effort, to the
    /// client. Returns `true` if the subscription was added. A channel that
    /// has been torn down accepts no subscriptions.
    pub fn subscribe(&self, context: Arc<Context>) -> bool {
        if self.is_closed() {
            return false;
        }

        for middleware in &self.handlers.middlewares {
            if let Err(error) = middleware.check(&context) {
                debug!(
                    channel = %self.pattern,
                    client = %context.client().id(),
                    path = %context.path(),
                    code = error.code(),
                    "Subscription rejected"
                );
                (self.sink)(error.clone());
                if let Err(send_error) = context.send_error(&error) {
                    (self.sink)(send_error);
                }
                return false;
            }
        }

        self.subscribers
            .entry(context.client().id().clone())
            .or_default()
            .insert(context.path().to_string(), Arc::clone(&context));

        // Teardown may have started while middlewares ran or before the insert
        if self.is_closed() {
            self.discard(&context);
            debug!(
                channel = %self.pattern,
                client = %context.client().id(),
                path = %context.path(),
                "Subscription dropped, channel closed"
            );
            return false;
        }

        debug!(
            channel = %self.pattern,
            client = %context.client().id(),
            path = %context.path(),
            "Client subscribed"
        );

        if let Some(handler) = &self.handlers.on_subscribe {
            handler(&context);
        }
        true
    }

    /// Remove the subscription of `client_id` at exactly `path`.
    ///
    /// Returns `true` if the client was subscribed.
    pub fn unsubscribe(&self, client_id: &str, path: &str) -> bool {
        let removed = match self.subscribers.get_mut(client_id) {
            Some(mut paths) => paths.remove(path),
            None => None,
        };

        let Some(context) = removed else {
            return false;
        };
        self.subscribers
            .remove_if(client_id, |_, paths| paths.is_empty());

        debug!(channel = %self.pattern, client = %client_id, path = %path, "Client unsubscribed");

        if let Some(handler) = &self.handlers.on_unsubscribe {
            handler(&context);
        }
        true
    }

    /// Remove every subscription `client_id` holds on this channel.
    ///
    /// Used for disconnect teardown; always succeeds, even if the client had
    /// no subscriptions.
    pub fn unsubscribe_all_paths(&self, client_id: &str) -> bool {
        if let Some((_, paths)) = self.subscribers.remove(client_id) {
            debug!(
                channel = %self.pattern,
                client = %client_id,
                paths = paths.len(),
                "Client unsubscribed from all paths"
            );
            self.notify_unsubscribed(paths.into_values());
        }
        true
    }

    /// Remove every subscription of every client and close the channel.
    ///
    /// Returns the number of removed subscriptions.
    pub fn unsubscribe_everyone(&self) -> usize {
        self.closed.store(true, Ordering::SeqCst);

        let client_ids: Vec<ClientId> = self
            .subscribers
            .iter()
            .map(|entry| entry.key().clone())
            .collect();

        let mut removed = Vec::new();
        for client_id in client_ids {
            if let Some((_, paths)) = self.subscribers.remove(&client_id) {
                removed.extend(paths.into_values());
            }
        }

        let count = removed.len();
        self.notify_unsubscribed(removed);
        count
    }

    /// Pass a message from `client` to the message handler.
    ///
    /// Messages from clients not subscribed at the envelope's path are
    /// ignored.
    pub fn handle_message(&self, client: &Client, envelope: &Envelope) {
        let Some(handler) = &self.handlers.on_message else {
            return;
        };

        if let Some(context) = self.find_context(client.id().as_str(), &envelope.channel) {
            handler(&context, envelope);
        }
    }

    /// Check if the channel has been torn down.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Check if a client is subscribed at exactly `path`.
    #[must_use]
    pub fn is_subscribed(&self, client_id: &str, path: &str) -> bool {
        self.subscribers
            .get(client_id)
            .is_some_and(|paths| paths.contains_key(path))
    }

    /// Get the context of a client's subscription at exactly `path`.
    #[must_use]
    pub fn find_context(&self, client_id: &str, path: &str) -> Option<Arc<Context>> {
        self.subscribers
            .get(client_id)
            .and_then(|paths| paths.get(path).cloned())
    }

    /// Get the subscriptions at exactly `path`.
    #[must_use]
    pub fn subscribers(&self, path: &str) -> Vec<Arc<Context>> {
        self.subscribers
            .iter()
            .filter_map(|entry| entry.value().get(path).cloned())
            .collect()
    }

    /// Get every subscription on this channel.
    #[must_use]
    pub fn all_subscribers(&self) -> Vec<Arc<Context>> {
        self.subscribers
            .iter()
            .flat_map(|entry| entry.value().values().cloned().collect::<Vec<_>>())
            .collect()
    }

    /// Get the number of subscriptions across all paths.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.iter().map(|entry| entry.value().len()).sum()
    }

    /// Check if the channel has no subscriptions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    /// Broadcast a payload to the subscribers at exactly `path`.
    pub fn broadcast(&self, path: &str, payload: &[u8], options: &BroadcastOptions) -> BroadcastResult {
        fan_out(self.subscribers(path), payload, options)
    }

    /// Broadcast a payload to every subscriber, whatever path they resolved.
    pub fn broadcast_all(&self, payload: &[u8], options: &BroadcastOptions) -> BroadcastResult {
        fan_out(self.all_subscribers(), payload, options)
    }

    /// Remove `context` if it is still the stored subscription for its
    /// client and path.
    fn discard(&self, context: &Arc<Context>) {
        let client_id = context.client().id().as_str();
        if let Some(mut paths) = self.subscribers.get_mut(client_id) {
            if paths
                .get(context.path())
                .is_some_and(|stored| Arc::ptr_eq(stored, context))
            {
                paths.remove(context.path());
            }
        }
        self.subscribers
            .remove_if(client_id, |_, paths| paths.is_empty());
    }

    fn notify_unsubscribed(&self, contexts: impl IntoIterator<Item = Arc<Context>>) {
        if let Some(handler) = &self.handlers.on_unsubscribe {
            for context in contexts {
                handler(&context);
            }
        }
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("pattern", &self.pattern.as_str())
            .field("handlers", &self.handlers)
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{sender_fn, SendError};
    use crate::error::ErrorKind;
    use bytes::Bytes;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tubes_protocol::{codec, ErrorPayload};

    fn null_sink() -> ErrorSink {
        Arc::new(|_| {})
    }

    fn recording_sink() -> (ErrorSink, Arc<Mutex<Vec<Error>>>) {
        let errors = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&errors);
        (Arc::new(move |error| recorded.lock().push(error)), errors)
    }

    fn client(id: &str) -> Arc<Client> {
        Arc::new(Client::new(id, sender_fn(|_| Ok(()))))
    }

    fn subscribe(channel: &Arc<Channel>, client: &Arc<Client>, path: &str) -> bool {
        let params = channel.matches(path).unwrap_or_default();
        let context = Context::new(Arc::clone(client), path, Arc::downgrade(channel), params);
        channel.subscribe(Arc::new(context))
    }

    #[test]
    fn test_simple_subscribe() {
        let channel = Arc::new(Channel::new(
            "example/path/simple",
            ChannelHandlers::new(),
            null_sink(),
        ));
        let client = client("ABC123");

        assert!(subscribe(&channel, &client, "example/path/simple"));
        assert!(channel.is_subscribed("ABC123", "example/path/simple"));
        assert!(!channel.is_subscribed("ABC123", "example/path"));
        assert_eq!(channel.subscriber_count(), 1);
    }

    #[test]
    fn test_middleware_rejects_subscription() {
        let (sink, errors) = recording_sink();
        let channel = Arc::new(Channel::new(
            "example/path/simple",
            ChannelHandlers::new().middleware(|_| Err(Error::custom(999, "Unauthorized"))),
            sink,
        ));

        let sent = Arc::new(Mutex::new(Vec::<Bytes>::new()));
        let outbox = Arc::clone(&sent);
        let client = Arc::new(Client::new(
            "ABC123",
            sender_fn(move |data| {
                outbox.lock().push(data);
                Ok(())
            }),
        ));

        assert!(!subscribe(&channel, &client, "example/path/simple"));
        assert!(!channel.is_subscribed("ABC123", "example/path/simple"));

        let errors = errors.lock();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].code(), 999);

        let sent = sent.lock();
        let envelope = codec::decode(&sent[0]).unwrap();
        let payload: ErrorPayload = envelope.payload_as().unwrap();
        assert_eq!(payload.code, 999);
        assert_eq!(payload.description, "Unauthorized");
    }

    #[test]
    fn test_middleware_rejection_with_failing_transport() {
        let (sink, errors) = recording_sink();
        let channel = Arc::new(Channel::new(
            "example/path/simple",
            ChannelHandlers::new().middleware(|_| Err(Error::custom(999, "Unauthorized"))),
            sink,
        ));
        let client = Arc::new(Client::new(
            "ABC123",
            sender_fn(|_| Err(SendError::Failed("write failed".to_string()))),
        ));

        assert!(!subscribe(&channel, &client, "example/path/simple"));

        let errors = errors.lock();
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].code(), 999);
        assert_eq!(errors[1].kind(), ErrorKind::SendingErrorFailed);
    }

    #[test]
    fn test_middlewares_run_in_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let (first, second) = (Arc::clone(&order), Arc::clone(&order));
        let channel = Arc::new(Channel::new(
            "rooms/:room",
            ChannelHandlers::new()
                .middleware(move |ctx| {
                    first.lock().push("auth");
                    ctx.set("user", "jon");
                    Ok(())
                })
                .middleware(move |ctx| {
                    second.lock().push("acl");
                    ctx.must_get("user")
                        .map(|_| ())
                        .map_err(|e| Error::custom(403, e.to_string()))
                }),
            null_sink(),
        ));

        assert!(subscribe(&channel, &client("c1"), "rooms/lobby"));
        assert_eq!(*order.lock(), vec!["auth", "acl"]);

        let context = channel.find_context("c1", "rooms/lobby").unwrap();
        assert_eq!(context.param("room").as_deref(), Some("lobby"));
        assert_eq!(context.get("user"), Some(serde_json::json!("jon")));
    }

    #[test]
    fn test_unsubscribe() {
        let unsubscribed = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&unsubscribed);
        let channel = Arc::new(Channel::new(
            "example/:id",
            ChannelHandlers::new().on_unsubscribe(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
            null_sink(),
        ));
        let client = client("c1");
        subscribe(&channel, &client, "example/1");

        assert!(!channel.unsubscribe("c1", "example/2"));
        assert!(!channel.unsubscribe("c2", "example/1"));
        assert_eq!(unsubscribed.load(Ordering::SeqCst), 0);

        assert!(channel.unsubscribe("c1", "example/1"));
        assert!(!channel.is_subscribed("c1", "example/1"));
        assert!(channel.is_empty());
        assert_eq!(unsubscribed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unsubscribe_all_paths() {
        let unsubscribed = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&unsubscribed);
        let channel = Arc::new(Channel::new(
            "example/:id",
            ChannelHandlers::new().on_unsubscribe(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
            null_sink(),
        ));
        let client = client("c1");
        let other = self::client("c2");
        for path in ["example/1", "example/2", "example/3"] {
            subscribe(&channel, &client, path);
        }
        subscribe(&channel, &other, "example/1");

        assert!(channel.unsubscribe_all_paths("c1"));
        assert_eq!(unsubscribed.load(Ordering::SeqCst), 3);
        for path in ["example/1", "example/2", "example/3"] {
            assert!(!channel.is_subscribed("c1", path));
        }
        assert!(channel.is_subscribed("c2", "example/1"));

        // No subscriptions left: still succeeds, no hook calls
        assert!(channel.unsubscribe_all_paths("c1"));
        assert_eq!(unsubscribed.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_handle_message_requires_subscription() {
        let received = Arc::new(Mutex::new(Vec::new()));
        let inbox = Arc::clone(&received);
        let channel = Arc::new(Channel::new(
            "echo",
            ChannelHandlers::new().on_message(move |ctx, envelope| {
                inbox
                    .lock()
                    .push((ctx.client().id().to_string(), envelope.channel.clone()));
            }),
            null_sink(),
        ));
        let subscribed = client("c1");
        let stranger = client("c2");
        subscribe(&channel, &subscribed, "echo");

        let envelope = Envelope::message("echo", b"1").unwrap();
        channel.handle_message(&subscribed, &envelope);
        channel.handle_message(&stranger, &envelope);

        assert_eq!(
            *received.lock(),
            vec![("c1".to_string(), "echo".to_string())]
        );
    }

    #[test]
    fn test_broadcast_targets_path_only() {
        let channel = Arc::new(Channel::new(
            "rooms/:room",
            ChannelHandlers::new(),
            null_sink(),
        ));
        subscribe(&channel, &client("c1"), "rooms/a");
        subscribe(&channel, &client("c2"), "rooms/a");
        subscribe(&channel, &client("c3"), "rooms/b");

        let result = channel.broadcast("rooms/a", b"1", &BroadcastOptions::new());
        assert_eq!(result.sent_count(), 2);

        let result = channel.broadcast_all(b"1", &BroadcastOptions::new().skip("c1"));
        assert_eq!(result.outcomes.len(), 3);
        assert_eq!(result.sent_count(), 2);
        assert_eq!(result.skipped_count(), 1);
    }

    #[test]
    fn test_handlers_may_reenter_channel() {
        let channel = Arc::new_cyclic(|weak: &std::sync::Weak<Channel>| {
            let weak = weak.clone();
            Channel::new(
                "rooms/:room",
                ChannelHandlers::new().on_subscribe(move |ctx| {
                    if let Some(channel) = weak.upgrade() {
                        assert!(channel.is_subscribed(ctx.client().id().as_str(), ctx.path()));
                        channel.broadcast(ctx.path(), b"\"joined\"", &BroadcastOptions::new());
                    }
                }),
                null_sink(),
            )
        });

        assert!(subscribe(&channel, &client("c1"), "rooms/a"));
        assert!(subscribe(&channel, &client("c2"), "rooms/a"));
        assert_eq!(channel.subscriber_count(), 2);
    }

    #[test]
    fn test_unsubscribe_everyone() {
        let channel = Arc::new(Channel::new("a/:b", ChannelHandlers::new(), null_sink()));
        subscribe(&channel, &client("c1"), "a/1");
        subscribe(&channel, &client("c1"), "a/2");
        subscribe(&channel, &client("c2"), "a/1");

        assert_eq!(channel.unsubscribe_everyone(), 3);
        assert!(channel.is_empty());
        assert!(channel.is_closed());
    }

    #[test]
    fn test_no_subscription_after_teardown() {
        let subscribed = Arc::new(AtomicUsize::new(0));
        let unsubscribed = Arc::new(AtomicUsize::new(0));
        let (on_sub, on_unsub) = (Arc::clone(&subscribed), Arc::clone(&unsubscribed));

        // The middleware tears the channel down while the subscription is pending
        let channel = Arc::new_cyclic(|weak: &std::sync::Weak<Channel>| {
            let weak = weak.clone();
            Channel::new(
                "room",
                ChannelHandlers::new()
                    .middleware(move |_| {
                        if let Some(channel) = weak.upgrade() {
                            channel.unsubscribe_everyone();
                        }
                        Ok(())
                    })
                    .on_subscribe(move |_| {
                        on_sub.fetch_add(1, Ordering::SeqCst);
                    })
                    .on_unsubscribe(move |_| {
                        on_unsub.fetch_add(1, Ordering::SeqCst);
                    }),
                null_sink(),
            )
        });

        assert!(!subscribe(&channel, &client("c1"), "room"));
        assert!(!channel.is_subscribed("c1", "room"));
        assert!(channel.is_empty());
        assert_eq!(subscribed.load(Ordering::SeqCst), 0);
        assert_eq!(unsubscribed.load(Ordering::SeqCst), 0);

        // Closed channels refuse outright
        assert!(!subscribe(&channel, &client("c2"), "room"));
        assert_eq!(subscribed.load(Ordering::SeqCst), 0);
    }
}
