//! WebSocket transport implementation.
//!
//! Two entry points share one pump: [`serve`] drives a socket already
//! upgraded by axum, and [`WebSocketTransport`] accepts raw TCP connections
//! and performs the handshake with tokio-tungstenite.
//!
//! Every connection gets an unbounded outbound queue drained into the socket
//! by a writer task, so router sends never wait on the network. Inbound
//! frames are handed to the connector one at a time on the reader task.
//! Ping replies are queued by tungstenite itself.

use crate::connector::Connector;
use crate::traits::{Transport, TransportError};
use async_trait::async_trait;
use axum::extract::ws::{Message as AxumMessage, WebSocket};
use bytes::Bytes;
use futures_util::stream::SplitStream;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use std::fmt::Display;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{accept_async, tungstenite::Message as WsMessage};
use tracing::{debug, info, trace, warn};
use tubes_core::{Client, Error, ErrorKind, Properties};
use tubes_protocol::ProtocolError;

/// Default maximum inbound message size (64 KB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Inbound frame, as far as the pump is concerned.
#[derive(Debug, PartialEq, Eq)]
enum Inbound {
    Data(Vec<u8>),
    Control,
    Close,
}

/// Message type of a WebSocket implementation.
trait WireMessage: Sized + Send + Unpin + 'static {
    fn into_inbound(self) -> Inbound;

    fn from_envelope(data: Bytes) -> Self;
}

impl WireMessage for AxumMessage {
    fn into_inbound(self) -> Inbound {
        match self {
            AxumMessage::Text(text) => Inbound::Data(text.into_bytes()),
            AxumMessage::Binary(data) => Inbound::Data(data),
            AxumMessage::Ping(_) | AxumMessage::Pong(_) => Inbound::Control,
            AxumMessage::Close(_) => Inbound::Close,
        }
    }

    fn from_envelope(data: Bytes) -> Self {
        match String::from_utf8(data.to_vec()) {
            Ok(text) => AxumMessage::Text(text),
            Err(e) => AxumMessage::Binary(e.into_bytes()),
        }
    }
}

impl WireMessage for WsMessage {
    fn into_inbound(self) -> Inbound {
        match self {
            WsMessage::Text(text) => Inbound::Data(text.into_bytes()),
            WsMessage::Binary(data) => Inbound::Data(data),
            WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_) => Inbound::Control,
            WsMessage::Close(_) => Inbound::Close,
        }
    }

    fn from_envelope(data: Bytes) -> Self {
        match String::from_utf8(data.to_vec()) {
            Ok(text) => WsMessage::Text(text),
            Err(e) => WsMessage::Binary(e.into_bytes()),
        }
    }
}

/// A joined client with its reader half and writer task.
struct Session<R> {
    client: Arc<Client>,
    reader: R,
    writer: JoinHandle<()>,
}

/// Split `socket`, start its writer task and join a client for it.
fn open<S, M, E>(socket: S, connector: &Connector, properties: Properties) -> Session<SplitStream<S>>
where
    S: Stream<Item = Result<M, E>> + Sink<M> + Send + 'static,
    <S as Sink<M>>::Error: Display + Send,
    M: WireMessage,
{
    let (sink, reader) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel::<Bytes>();
    let writer = tokio::spawn(write_loop::<_, M>(sink, rx));
    let client = connector.join(tx, properties);

    Session {
        client,
        reader,
        writer,
    }
}

async fn write_loop<W, M>(mut sink: W, mut outbound: mpsc::UnboundedReceiver<Bytes>)
where
    W: Sink<M> + Unpin,
    W::Error: Display + Send,
    M: WireMessage,
{
    while let Some(data) = outbound.recv().await {
        if let Err(e) = sink.send(M::from_envelope(data)).await {
            debug!(error = %e, "WebSocket write failed");
            return;
        }
    }
    // Outbound queue closed: the client is gone from the registry
    if let Err(e) = sink.close().await {
        trace!(error = %e, "WebSocket close failed");
    }
}

/// Read frames until the socket closes, then leave exactly once.
async fn drive<R, M, E>(session: Session<R>, connector: Arc<Connector>, max_message_size: usize)
where
    R: Stream<Item = Result<M, E>> + Unpin,
    M: WireMessage,
    E: Display,
{
    let Session {
        client,
        mut reader,
        writer,
    } = session;
    let id = client.id().clone();
    drop(client);

    while let Some(frame) = reader.next().await {
        match frame.map(WireMessage::into_inbound) {
            Ok(Inbound::Data(data)) => {
                if data.len() > max_message_size {
                    warn!(
                        client = %id,
                        size = data.len(),
                        max = max_message_size,
                        "Message too large"
                    );
                    connector.report(
                        Error::new(ErrorKind::InvalidMessage, "message exceeds maximum size")
                            .with_source(ProtocolError::FrameTooLarge(data.len())),
                    );
                    continue;
                }
                connector.message(id.as_str(), &data);
            }
            Ok(Inbound::Control) => trace!(client = %id, "Control frame"),
            Ok(Inbound::Close) => {
                debug!(client = %id, "Received close frame");
                break;
            }
            Err(e) => {
                debug!(client = %id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    connector.leave(id.as_str());
    writer.abort();
    debug!(client = %id, "WebSocket disconnected");
}

/// Serve a WebSocket upgraded by axum until it closes.
///
/// The client joins the connector with `properties`; frames larger than
/// `max_message_size` are reported as `InvalidMessage` and dropped.
pub async fn serve(
    socket: WebSocket,
    connector: Arc<Connector>,
    properties: Properties,
    max_message_size: usize,
) {
    let session = open(socket, &connector, properties);
    debug!(client = %session.client.id(), "WebSocket connected");
    drive(session, connector, max_message_size).await;
}

/// WebSocket transport configuration.
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Maximum message size in bytes.
    pub max_message_size: usize,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

/// Standalone WebSocket transport with its own listener.
pub struct WebSocketTransport {
    listener: TcpListener,
    connector: Arc<Connector>,
    config: WebSocketConfig,
}

impl WebSocketTransport {
    /// Create a new WebSocket transport.
    ///
    /// # Errors
    ///
    /// Returns an error if binding to the address fails.
    pub async fn new(
        config: WebSocketConfig,
        connector: Arc<Connector>,
    ) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(config.bind_addr).await?;

        info!("WebSocket transport listening on {}", config.bind_addr);

        Ok(Self {
            listener,
            connector,
            config,
        })
    }

    /// Create a new WebSocket transport with default limits.
    ///
    /// # Errors
    ///
    /// Returns an error if binding fails.
    pub async fn bind(addr: SocketAddr, connector: Arc<Connector>) -> Result<Self, TransportError> {
        Self::new(
            WebSocketConfig {
                bind_addr: addr,
                ..Default::default()
            },
            connector,
        )
        .await
    }

    /// Get the local address this transport is bound to.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.local_addr().ok()
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn accept(&self) -> Result<Arc<Client>, TransportError> {
        let (stream, addr) = self.listener.accept().await?;

        debug!("Accepted TCP connection from {}", addr);

        let socket = accept_async(stream)
            .await
            .map_err(|e| TransportError::Handshake(e.to_string()))?;

        let properties = Properties::new();
        properties.set("remote_addr", addr.to_string());

        let session = open(socket, &self.connector, properties);
        let client = Arc::clone(&session.client);
        tokio::spawn(drive(
            session,
            Arc::clone(&self.connector),
            self.config.max_message_size,
        ));

        debug!(client = %client.id(), "WebSocket handshake completed with {}", addr);
        Ok(client)
    }

    fn name(&self) -> &'static str {
        "websocket"
    }
}
