//! WebSocket client for following bot output.

use crate::client::API_KEY_HEADER;
use crate::error::Error;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;

/// WebSocket message types received from the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum WsMessage {
    /// Stream opened.
    #[serde(rename = "connected")]
    Connected {
        /// Bot being followed.
        bot_id: String,
        /// Backlog lines sent before live output.
        tail: usize,
    },
    /// Output chunk.
    #[serde(rename = "log")]
    Log {
        /// Raw output.
        line: String,
    },
    /// No more output will follow.
    #[serde(rename = "end")]
    End {
        /// Why the stream ended.
        reason: String,
    },
    /// The server failed while streaming.
    #[serde(rename = "error")]
    Error {
        /// Error message.
        message: String,
    },
    /// Heartbeat/ping.
    #[serde(rename = "heartbeat")]
    Heartbeat {
        /// Timestamp in milliseconds.
        timestamp: u64,
    },
}

impl WsMessage {
    /// Whether the server will send nothing after this message.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::End { .. } | Self::Error { .. })
    }
}

/// Receives a bot's output over WebSocket.
pub struct LogStreamClient {
    rx: mpsc::Receiver<WsMessage>,
    close_tx: mpsc::Sender<()>,
}

impl LogStreamClient {
    /// Connects to a log stream URL, authenticating with `api_key` if given.
    ///
    /// # Arguments
    /// * `url` - e.g. "ws://localhost:8000/api/v1/bots/ft-acme-main/logs/ws?tail=50"
    /// * `api_key` - Tenant API key sent as the `X-API-Key` header
    ///
    /// # Errors
    /// Returns error if the handshake fails.
    pub async fn connect(url: &str, api_key: Option<&str>) -> Result<Self, Error> {
        let mut request = url.into_client_request().map_err(Box::new)?;
        if let Some(key) = api_key {
            let value = HeaderValue::from_str(key)
                .map_err(|_| Error::InvalidRequest("API key is not a valid header".to_string()))?;
            request.headers_mut().insert(API_KEY_HEADER, value);
        }

        let (ws_stream, _) = connect_async(request).await.map_err(Box::new)?;
        let (mut write, mut read) = ws_stream.split();

        let (msg_tx, msg_rx) = mpsc::channel::<WsMessage>(256);
        let (close_tx, mut close_rx) = mpsc::channel::<()>(1);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    msg = read.next() => match msg {
                        Some(Ok(Message::Text(text))) => {
                            if let Ok(ws_msg) = serde_json::from_str::<WsMessage>(&text)
                                && msg_tx.send(ws_msg).await.is_err()
                            {
                                break;
                            }
                        }
                        Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                        Some(Ok(_)) => {}
                    },
                    _ = close_rx.recv() => {
                        let _ = write.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
        });

        Ok(Self {
            rx: msg_rx,
            close_tx,
        })
    }

    /// Receives the next message from the server.
    ///
    /// Returns `None` once the connection is closed.
    pub async fn recv(&mut self) -> Option<WsMessage> {
        self.rx.recv().await
    }

    /// Receives the next output chunk, skipping heartbeats and the greeting.
    ///
    /// Returns `None` when the stream ends.
    pub async fn next_line(&mut self) -> Option<String> {
        while let Some(msg) = self.recv().await {
            match msg {
                WsMessage::Log { line } => return Some(line),
                msg if msg.is_terminal() => return None,
                _ => {}
            }
        }
        None
    }

    /// Closes the connection.
    ///
    /// # Errors
    /// Returns error if the connection is already closed.
    pub async fn close(&self) -> Result<(), Error> {
        self.close_tx
            .send(())
            .await
            .map_err(|_| Error::ConnectionClosed)
    }
}
