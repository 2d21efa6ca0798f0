//! HTTP client library for the Tradebot Orchestrator API.
//!
//! Typed access to every REST endpoint plus the log streaming WebSocket.
//!
//! # Example
//!
//! ```no_run
//! use orchestrator_client::{BotConfig, ClientConfig, OrchestratorClient};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), orchestrator_client::Error> {
//!     let client = OrchestratorClient::new(ClientConfig {
//!         base_url: "http://localhost:8000".into(),
//!         timeout: Duration::from_secs(30),
//!         api_key: Some("tbo_acme_dev_admin_key_change_me".into()),
//!     })?;
//!
//!     let bot = client
//!         .create_bot(&BotConfig::new("binance", "key", "secret", "USDT", 100.0))
//!         .await?;
//!     println!("{} listening on {}", bot.bot_id, bot.host_port);
//!
//!     let logs = client.get_bot_logs(&bot.bot_id, Some(20)).await?;
//!     print!("{}", logs.logs);
//!
//!     Ok(())
//! }
//! ```

mod client;
mod error;
mod types;
mod websocket;

pub use client::{ClientConfig, OrchestratorClient};
pub use error::Error;
pub use types::*;
pub use websocket::{LogStreamClient, WsMessage};
