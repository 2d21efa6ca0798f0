//! Request and response types for the orchestrator API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[cfg(test)]
mod tests;

/// Lifecycle status of a bot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BotStatus {
    /// Artifacts and container are being set up.
    Creating,
    /// Container confirmed running.
    Running,
    /// Teardown in progress.
    Stopping,
    /// Container stopped and removed.
    Stopped,
    /// A lifecycle step failed.
    Error,
    /// Status could not be determined.
    Unknown,
}

impl std::fmt::Display for BotStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Creating => write!(f, "creating"),
            Self::Running => write!(f, "running"),
            Self::Stopping => write!(f, "stopping"),
            Self::Stopped => write!(f, "stopped"),
            Self::Error => write!(f, "error"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Container state as reported by the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerState {
    /// Created but never started.
    Created,
    /// Running.
    Running,
    /// Paused.
    Paused,
    /// Restarting.
    Restarting,
    /// Being removed.
    Removing,
    /// Exited.
    Exited,
    /// Dead.
    Dead,
    /// Anything else.
    #[serde(other)]
    Unknown,
}

/// API key permission levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    /// Read bots, status and logs.
    Read,
    /// Provision, control and remove bots.
    Manage,
    /// Everything, including key management.
    Admin,
}

// ============================================================================
// Health
// ============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// "healthy" or "degraded".
    pub status: String,
    /// Service version.
    pub version: String,
    /// Container runtime backend.
    pub runtime: String,
}

// ============================================================================
// Bots
// ============================================================================

/// Bot configuration sent when provisioning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BotConfig {
    /// Display name, unique per tenant.
    pub name: String,
    /// Exchange identifier.
    pub exchange_name: String,
    /// Exchange API key.
    pub api_key: String,
    /// Exchange API secret.
    pub api_secret: String,
    /// Simulate trades.
    pub dry_run: bool,
    /// Quote currency.
    pub stake_currency: String,
    /// Amount per trade.
    pub stake_amount: f64,
    /// Strategy class name.
    pub strategy: String,
    /// Tradable pairs; server default when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pair_whitelist: Option<Vec<String>>,
    /// Maximum open trades.
    pub max_open_trades: u32,
    /// Candle timeframe.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeframe: Option<String>,
    /// Telegram notifications.
    pub telegram_enabled: bool,
    /// Telegram bot token.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub telegram_token: Option<String>,
    /// Telegram chat id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub telegram_chat_id: Option<String>,
}

impl BotConfig {
    /// Creates a dry-run configuration named "main" with the server's defaults.
    #[must_use]
    pub fn new(
        exchange_name: &str,
        api_key: &str,
        api_secret: &str,
        stake_currency: &str,
        stake_amount: f64,
    ) -> Self {
        Self {
            name: "main".to_string(),
            exchange_name: exchange_name.to_string(),
            api_key: api_key.to_string(),
            api_secret: api_secret.to_string(),
            dry_run: true,
            stake_currency: stake_currency.to_string(),
            stake_amount,
            strategy: "SampleStrategy".to_string(),
            pair_whitelist: None,
            max_open_trades: 3,
            timeframe: None,
            telegram_enabled: false,
            telegram_token: None,
            telegram_chat_id: None,
        }
    }

    /// Sets the bot name.
    #[must_use]
    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    /// Sets the pair whitelist.
    #[must_use]
    pub fn with_pairs(mut self, pairs: &[&str]) -> Self {
        self.pair_whitelist = Some(pairs.iter().map(|p| p.to_string()).collect());
        self
    }
}

/// Bot registry record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotResponse {
    /// Bot identifier.
    pub bot_id: String,
    /// Display name.
    pub name: String,
    /// Owning tenant.
    pub tenant_id: String,
    /// Lifecycle status.
    pub status: BotStatus,
    /// Reason attached to the last failure.
    pub status_reason: Option<String>,
    /// Host port.
    pub host_port: u16,
    /// Container id.
    pub container_id: Option<String>,
    /// Worker image.
    pub image: String,
    /// Config artifact path.
    pub config_path: String,
    /// Data directory path.
    pub user_data_path: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

/// Bots of the calling tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotsListResponse {
    /// Bots, ordered by creation time.
    pub bots: Vec<BotResponse>,
}

/// Pagination for bot listings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListBotsQuery {
    /// Records to skip.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip: Option<usize>,
    /// Maximum records to return.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

/// Result of a deprovision request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteBotResponse {
    /// Bot identifier.
    pub bot_id: String,
    /// Whether a record was removed by this call.
    pub removed: bool,
    /// Human-readable outcome.
    pub message: String,
}

/// One published container port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    /// Container-side port spec.
    pub container_port: String,
    /// Host interface.
    pub host_ip: Option<String>,
    /// Host port.
    pub host_port: Option<u16>,
}

/// Live container state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSnapshot {
    /// Bot identifier.
    pub bot_id: String,
    /// Container id.
    pub container_id: String,
    /// Runtime state.
    pub state: ContainerState,
    /// Image.
    pub image: String,
    /// Port bindings.
    pub ports: Vec<PortMapping>,
    /// Start timestamp.
    pub started_at: Option<String>,
}

/// Registry and runtime view of a bot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotStatusResponse {
    /// Registry view.
    pub bot: BotResponse,
    /// Runtime view.
    pub runtime: StatusSnapshot,
}

/// Recent container output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotLogsResponse {
    /// Bot identifier.
    pub bot_id: String,
    /// Combined stdout/stderr.
    pub logs: String,
    /// Lines requested.
    pub tail: usize,
}

// ============================================================================
// API Keys
// ============================================================================

/// Request to mint an API key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateApiKeyRequest {
    /// Human-readable name.
    pub name: String,
    /// Granted permissions.
    pub permissions: Vec<Permission>,
    /// Requests per minute.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<u32>,
}

/// Newly minted key; the raw key is only returned once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateApiKeyResponse {
    /// Key identifier.
    pub key_id: String,
    /// Raw key.
    pub api_key: String,
    /// Tenant the key acts for.
    pub tenant_id: String,
    /// Granted permissions.
    pub permissions: Vec<Permission>,
}

/// Key metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeyInfo {
    /// Key identifier.
    pub key_id: String,
    /// Human-readable name.
    pub name: String,
    /// Tenant.
    pub tenant_id: String,
    /// Granted permissions.
    pub permissions: Vec<Permission>,
    /// Requests per minute.
    pub rate_limit: u32,
    /// Creation time in milliseconds.
    pub created_at: u64,
    /// Last use in milliseconds.
    pub last_used_at: Option<u64>,
}

/// Keys of the calling tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeysListResponse {
    /// Keys.
    pub keys: Vec<ApiKeyInfo>,
}

/// Error body returned by the API.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ErrorBody {
    pub error: String,
    pub code: String,
}
