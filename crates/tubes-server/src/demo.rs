//! Bundled demo channels: `echo` and a `chat` plugin.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};
use tubes_core::{
    BoxError, BroadcastResult, ChannelHandlers, ChannelScope, Context, ContextBroadcastOptions,
    Plugin, PluginError, Router,
};

/// Prefix the chat plugin is mounted under.
pub const CHAT_PREFIX: &str = "chat";

/// Register the demo channels on `router`.
///
/// # Errors
///
/// Returns an error if the chat plugin fails to initialize.
pub fn register(router: &Router) -> Result<(), PluginError> {
    router.register_channel("echo", echo_handlers());
    router.use_plugin(CHAT_PREFIX, &Chat::default())
}

/// Handlers replying every message to its sender.
fn echo_handlers() -> ChannelHandlers {
    ChannelHandlers::new()
        .on_subscribe(|ctx| debug!(client = %ctx.client().id(), path = %ctx.path(), "Echo joined"))
        .on_message(|ctx, envelope| {
            let payload = envelope.payload_bytes().unwrap_or(b"null");
            if let Err(e) = ctx.send(payload) {
                warn!(client = %ctx.client().id(), error = %e, "Echo failed");
            }
        })
        .on_unsubscribe(|ctx| debug!(client = %ctx.client().id(), path = %ctx.path(), "Echo left"))
}

/// Chat room with a presence list.
///
/// `<prefix>/users` broadcasts the user map on every join and leave;
/// `<prefix>` broadcasts each message prefixed with the sender's ID.
#[derive(Debug, Default)]
pub struct Chat {
    /// Client ID -> currently present.
    users: Arc<Mutex<BTreeMap<String, bool>>>,
}

impl Chat {
    fn presence_handlers(&self) -> ChannelHandlers {
        let joined = Arc::clone(&self.users);
        let left = Arc::clone(&self.users);
        ChannelHandlers::new()
            .on_subscribe(move |ctx| set_presence(&joined, ctx, true))
            .on_unsubscribe(move |ctx| set_presence(&left, ctx, false))
    }

    fn message_handlers() -> ChannelHandlers {
        ChannelHandlers::new().on_message(|ctx, envelope| {
            let text = envelope
                .payload_bytes()
                .map(String::from_utf8_lossy)
                .unwrap_or_default();
            let line = format!("{}: {}", ctx.client().id(), text);
            match serde_json::to_vec(&line) {
                Ok(payload) => report(ctx, ctx.broadcast(&payload, ContextBroadcastOptions::default())),
                Err(e) => warn!(error = %e, "Failed to encode chat line"),
            }
        })
    }
}

impl Plugin for Chat {
    fn init(&self, scope: &mut ChannelScope<'_>) -> Result<(), BoxError> {
        scope.register_channel("users", self.presence_handlers());
        scope.register_channel("", Self::message_handlers());
        Ok(())
    }
}

fn set_presence(users: &Mutex<BTreeMap<String, bool>>, ctx: &Arc<Context>, present: bool) {
    let payload = {
        let mut users = users.lock();
        users.insert(ctx.client().id().to_string(), present);
        serde_json::to_vec(&*users)
    };

    match payload {
        Ok(payload) => report(ctx, ctx.broadcast(&payload, ContextBroadcastOptions::default())),
        Err(e) => warn!(error = %e, "Failed to encode user list"),
    }
}

fn report(ctx: &Context, result: BroadcastResult) {
    if result.has_errors {
        warn!(
            path = %ctx.path(),
            failed = result.failed_count(),
            sent = result.sent_count(),
            "Chat broadcast incomplete"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use serde_json::{json, Value};
    use tubes_core::client::sender_fn;
    use tubes_core::{tracing_sink, Client, Hooks};
    use tubes_protocol::{codec, Envelope};

    fn client(id: &str) -> (Arc<Client>, Arc<Mutex<Vec<Bytes>>>) {
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

    fn payloads(sent: &Mutex<Vec<Bytes>>) -> Vec<Value> {
        sent.lock()
            .iter()
            .map(|data| codec::decode(data).unwrap().payload_as().unwrap())
            .collect()
    }

    fn send(router: &Router, client: &Arc<Client>, envelope: Envelope) {
        router.on_message(client, &codec::encode(&envelope).unwrap());
    }

    fn router() -> Router {
        let router = Router::new(tracing_sink());
        register(&router).unwrap();
        router
    }

    #[test]
    fn test_demo_channels_registered() {
        let router = router();
        let mut patterns = router.channels().patterns();
        patterns.sort();
        assert_eq!(patterns, vec!["chat", "chat/users", "echo"]);
    }

    #[test]
    fn test_echo() {
        let router = router();
        let (client, sent) = client("c1");
        send(&router, &client, Envelope::subscribe("echo"));
        send(&router, &client, Envelope::message("echo", br#"{"a":1}"#).unwrap());

        assert_eq!(payloads(&sent), vec![json!({"a": 1})]);
    }

    #[test]
    fn test_chat_presence() {
        let router = router();
        let (alice, alice_sent) = client("alice");
        let (bob, _) = client("bob");

        send(&router, &alice, Envelope::subscribe("chat/users"));
        send(&router, &bob, Envelope::subscribe("chat/users"));
        router.on_disconnect(&bob);

        assert_eq!(
            payloads(&alice_sent),
            vec![
                json!({"alice": true}),
                json!({"alice": true, "bob": true}),
                json!({"alice": true, "bob": false}),
            ]
        );
    }

    #[test]
    fn test_chat_message_prefixed_with_sender() {
        let router = router();
        let (alice, alice_sent) = client("alice");
        let (bob, bob_sent) = client("bob");
        send(&router, &alice, Envelope::subscribe("chat"));
        send(&router, &bob, Envelope::subscribe("chat"));

        send(&router, &alice, Envelope::message("chat", br#""hello""#).unwrap());

        assert_eq!(payloads(&alice_sent), vec![json!(r#"alice: "hello""#)]);
        assert_eq!(payloads(&bob_sent), vec![json!(r#"alice: "hello""#)]);
    }
}
