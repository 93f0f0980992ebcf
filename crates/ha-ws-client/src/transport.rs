//! Authenticated sockets
//!
//! A [`Connector`] opens a socket, completes the auth handshake and hands
//! back a [`Transport`]: a pair of typed channels. The connection actor
//! never sees raw frames, which lets tests substitute an in-memory hub.

use crate::error::{ClientError, ClientResult};
use crate::types::{AuthMessage, IncomingMessage, OutgoingMessage};
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace, warn};

/// Channel capacity in each direction
pub const CHANNEL_CAPACITY: usize = 256;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// An authenticated, message-level link to Home Assistant
///
/// The socket is closed once `outgoing` is dropped; `incoming` ends when the
/// socket does.
pub struct Transport {
    pub outgoing: mpsc::Sender<OutgoingMessage>,
    pub incoming: mpsc::Receiver<IncomingMessage>,
}

/// Opens authenticated transports
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self) -> ClientResult<Transport>;
}

/// Get the WebSocket endpoint for a Home Assistant base URL
pub fn websocket_url(base_url: &str) -> String {
    let url = base_url
        .trim_end_matches('/')
        .replacen("http://", "ws://", 1)
        .replacen("https://", "wss://", 1);
    if url.ends_with("/api/websocket") {
        url
    } else {
        format!("{}/api/websocket", url)
    }
}

/// Connects over a real WebSocket
#[derive(Clone)]
pub struct WsConnector {
    url: String,
    token: String,
}

impl WsConnector {
    pub fn new(base_url: &str, token: &str) -> Self {
        Self {
            url: websocket_url(base_url),
            token: token.to_string(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn authenticate(
        &self,
        read: &mut SplitStream<WsStream>,
        write: &mut SplitSink<WsStream, Message>,
    ) -> ClientResult<()> {
        // 1. Receive auth_required
        match recv_message(read).await? {
            IncomingMessage::AuthRequired { ha_version } => {
                debug!(?ha_version, "Authentication required");
            }
            other => {
                return Err(ClientError::Protocol(format!(
                    "expected auth_required, got {:?}",
                    other
                )))
            }
        }

        // 2. Send auth
        let auth = serde_json::to_string(&AuthMessage::new(&self.token))?;
        write.send(Message::Text(auth)).await?;

        // 3. Receive auth_ok or auth_invalid
        match recv_message(read).await? {
            IncomingMessage::AuthOk { .. } => Ok(()),
            IncomingMessage::AuthInvalid { message } => Err(ClientError::AuthInvalid(message)),
            other => Err(ClientError::Protocol(format!(
                "expected auth_ok, got {:?}",
                other
            ))),
        }
    }
}

impl std::fmt::Debug for WsConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsConnector")
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self) -> ClientResult<Transport> {
        let connecting = timeout(CONNECT_TIMEOUT, connect_async(self.url.as_str()));
        let (ws_stream, _) = match connecting.await {
            Ok(Ok((stream, response))) => (stream, response),
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => return Err(ClientError::Transport("connect timeout".to_string())),
        };

        let (mut write, mut read) = ws_stream.split();
        timeout(CONNECT_TIMEOUT, self.authenticate(&mut read, &mut write))
            .await
            .map_err(|_| ClientError::Transport("authentication timeout".to_string()))??;

        let (outgoing_tx, outgoing_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (incoming_tx, incoming_rx) = mpsc::channel(CHANNEL_CAPACITY);
        tokio::spawn(pump(write, read, outgoing_rx, incoming_tx));

        Ok(Transport {
            outgoing: outgoing_tx,
            incoming: incoming_rx,
        })
    }
}

/// Shuttle messages between the socket and the channels until either side
/// goes away
async fn pump(
    mut write: SplitSink<WsStream, Message>,
    mut read: SplitStream<WsStream>,
    mut outgoing: mpsc::Receiver<OutgoingMessage>,
    incoming: mpsc::Sender<IncomingMessage>,
) {
    loop {
        tokio::select! {
            msg = outgoing.recv() => {
                let Some(msg) = msg else {
                    let _ = write.send(Message::Close(None)).await;
                    break;
                };
                let text = match serde_json::to_string(&msg) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(error = %e, "Failed to serialize message");
                        continue;
                    }
                };
                trace!(%text, "Sending");
                if let Err(e) = write.send(Message::Text(text)).await {
                    warn!(error = %e, "WebSocket send failed");
                    break;
                }
            }
            frame = read.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        trace!(%text, "Received");
                        for msg in parse_frame(&text) {
                            if incoming.send(msg).await.is_err() {
                                return;
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = write.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        debug!(?frame, "WebSocket closed by server");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket receive failed");
                        break;
                    }
                    None => break,
                }
            }
        }
    }
}

/// Parse a text frame, which may hold one message or a coalesced array
fn parse_frame(text: &str) -> Vec<IncomingMessage> {
    let parsed = if text.trim_start().starts_with('[') {
        serde_json::from_str::<Vec<IncomingMessage>>(text)
    } else {
        serde_json::from_str::<IncomingMessage>(text).map(|msg| vec![msg])
    };

    match parsed {
        Ok(messages) => messages,
        Err(e) => {
            debug!(error = %e, %text, "Ignoring unrecognised message");
            Vec::new()
        }
    }
}

/// Receive one JSON message during the handshake
async fn recv_message(read: &mut SplitStream<WsStream>) -> ClientResult<IncomingMessage> {
    loop {
        match read.next().await {
            Some(Ok(Message::Text(text))) => return Ok(serde_json::from_str(&text)?),
            Some(Ok(Message::Close(_))) | None => return Err(ClientError::Closed),
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(e.into()),
        }
    }
}
