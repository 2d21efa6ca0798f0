//! WebSocket handler for streaming bot output.

use crate::api::handlers::validate_tail;
use crate::api::middleware::TenantContext;
use crate::error::ApiError;
use crate::models::{LogsQuery, Permission};
use crate::runtime::LogStream;
use crate::state::AppState;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Extension, Path, Query, State};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// Interval between heartbeats.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// WebSocket message types sent to clients.
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
        /// Raw output, newline terminated.
        line: String,
    },
    /// The container went away; no more output will follow.
    #[serde(rename = "end")]
    End {
        /// Why the stream ended.
        reason: String,
    },
    /// The runtime failed while streaming.
    #[serde(rename = "error")]
    Error {
        /// Error description.
        message: String,
    },
    /// Heartbeat/ping.
    #[serde(rename = "heartbeat")]
    Heartbeat {
        /// Timestamp in milliseconds.
        timestamp: u64,
    },
}

/// WebSocket upgrade handler following a bot's output.
///
/// The bot and its container are resolved before upgrading, so a missing bot
/// is an ordinary 404 response.
#[utoipa::path(
    get,
    path = "/api/v1/bots/{bot_id}/logs/ws",
    params(
        ("bot_id" = String, Path, description = "Bot identifier"),
        LogsQuery
    ),
    responses(
        (status = 101, description = "WebSocket connection established"),
        (status = 404, description = "Bot or container not found")
    ),
    security(("api_key" = [])),
    tag = "WebSocket"
)]
pub async fn logs_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Extension(tenant): Extension<TenantContext>,
    Path(bot_id): Path<String>,
    Query(query): Query<LogsQuery>,
) -> Result<Response, ApiError> {
    tenant.require(Permission::Read)?;
    validate_tail(query.tail, state.config.orchestrator.max_log_tail)?;

    let stream = state
        .orchestrator
        .follow_logs(&tenant.tenant_id, &bot_id, query.tail)
        .await?
        .ok_or_else(|| ApiError::ContainerNotFound(format!("bot {} has no container", bot_id)))?;
    let tail = state.orchestrator.effective_tail(query.tail);

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, bot_id, tail, stream)))
}

fn encode(msg: &WsMessage) -> Option<Message> {
    serde_json::to_string(msg)
        .ok()
        .map(|json| Message::Text(json.into()))
}

/// Handle an individual WebSocket connection.
async fn handle_socket(socket: WebSocket, bot_id: String, tail: usize, mut logs: LogStream) {
    let (mut sender, mut receiver) = socket.split();

    let connected = WsMessage::Connected {
        bot_id: bot_id.clone(),
        tail,
    };
    if let Some(msg) = encode(&connected)
        && sender.send(msg).await.is_err()
    {
        return;
    }

    info!(bot_id = %bot_id, "Log stream client connected");

    // Client messages are ignored; the task only notices disconnects
    let mut recv_task = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    debug!("WebSocket receive error: {}", e);
                    break;
                }
            }
        }
    });

    let stream_bot_id = bot_id.clone();
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;

        loop {
            let outgoing = tokio::select! {
                chunk = logs.next() => match chunk {
                    Some(Ok(line)) => WsMessage::Log { line },
                    Some(Err(e)) => {
                        error!(bot_id = %stream_bot_id, error = %e, "Log stream failed");
                        if let Some(msg) = encode(&WsMessage::Error { message: e.to_string() }) {
                            let _ = sender.send(msg).await;
                        }
                        break;
                    }
                    None => {
                        if let Some(msg) = encode(&WsMessage::End {
                            reason: "container output closed".to_string(),
                        }) {
                            let _ = sender.send(msg).await;
                        }
                        break;
                    }
                },
                _ = heartbeat.tick() => WsMessage::Heartbeat {
                    timestamp: chrono::Utc::now().timestamp_millis() as u64,
                },
            };

            if let Some(msg) = encode(&outgoing)
                && sender.send(msg).await.is_err()
            {
                break;
            }
        }
        let _ = sender.close().await;
    });

    tokio::select! {
        _ = &mut recv_task => send_task.abort(),
        _ = &mut send_task => recv_task.abort(),
    }

    info!(bot_id = %bot_id, "Log stream closed");
}
