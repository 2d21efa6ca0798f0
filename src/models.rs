//! Domain types and request/response models for the REST API.

use crate::error::OrchestratorError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use utoipa::{IntoParams, ToSchema};

/// Prefix of every derived bot identifier.
pub const BOT_ID_PREFIX: &str = "ft";

/// Display name used when a provisioning request does not name the bot.
pub const DEFAULT_BOT_NAME: &str = "main";

const MAX_TENANT_ID_LEN: usize = 64;
const MAX_BOT_NAME_LEN: usize = 32;

// ============================================================================
// Lifecycle
// ============================================================================

/// Lifecycle status of a bot instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum BotStatus {
    /// Artifacts and container are being set up.
    Creating,
    /// Container confirmed running by the runtime.
    Running,
    /// Teardown in progress.
    Stopping,
    /// Container stopped and removed.
    Stopped,
    /// A lifecycle step failed; retry or manual intervention required.
    Error,
    /// Status could not be determined.
    Unknown,
}

impl BotStatus {
    /// Returns the lowercase wire name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Creating => "creating",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Error => "error",
            Self::Unknown => "unknown",
        }
    }

    /// Whether a bot in this status keeps its host port reserved.
    ///
    /// Only `stopped` hands the port back; a bot in `error` may still have a
    /// container bound to it.
    #[must_use]
    pub fn holds_port(&self) -> bool {
        !matches!(self, Self::Stopped)
    }

    /// Whether a lifecycle operation is mid-flight.
    #[must_use]
    pub fn is_transitional(&self) -> bool {
        matches!(self, Self::Creating | Self::Stopping)
    }

    /// Whether `self -> next` is a legal edge of the lifecycle state machine.
    #[must_use]
    pub fn can_transition_to(&self, next: BotStatus) -> bool {
        use BotStatus::*;
        match (self, next) {
            (_, Error) => true,
            (Creating, Running) => true,
            (Running | Unknown, Stopping) => true,
            (Error, Stopping) => true,
            (Stopping, Stopped) => true,
            (Error | Stopped | Unknown, Creating) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for BotStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BotStatus {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "creating" => Ok(Self::Creating),
            "running" => Ok(Self::Running),
            "stopping" => Ok(Self::Stopping),
            "stopped" => Ok(Self::Stopped),
            "error" => Ok(Self::Error),
            "unknown" => Ok(Self::Unknown),
            other => Err(OrchestratorError::Registry(format!(
                "unrecognized bot status: {}",
                other
            ))),
        }
    }
}

/// One provisioned worker plus its metadata record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct BotInstance {
    /// Canonical identifier, also the container name.
    pub bot_id: String,
    /// Owning tenant.
    pub tenant_id: String,
    /// Display name chosen at provisioning time.
    pub name: String,
    /// Lifecycle status.
    pub status: BotStatus,
    /// Reason recorded with the last `error` transition.
    pub status_reason: Option<String>,
    /// Host path of the rendered config artifact.
    #[schema(value_type = String)]
    pub config_artifact_path: PathBuf,
    /// Host path of the bot's data directory.
    #[schema(value_type = String)]
    pub data_dir_path: PathBuf,
    /// Host port bound to the container's service port.
    pub exposed_port: u16,
    /// Container id, set once the container has been created.
    pub runtime_handle: Option<String>,
    /// Worker image.
    pub image: String,
    /// Record creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

/// Derives the canonical bot identifier for a tenant and display name.
///
/// The display name never contains `-`, so the last `-` separates it from
/// the tenant and two different `(tenant, name)` pairs never collide.
///
/// # Errors
/// Returns `InvalidConfig` when either part contains disallowed characters.
pub fn derive_bot_id(tenant_id: &str, name: &str) -> Result<String, OrchestratorError> {
    validate_tenant_id(tenant_id)?;
    validate_bot_name(name)?;
    Ok(format!("{}-{}-{}", BOT_ID_PREFIX, tenant_id, name))
}

/// Validates a tenant identifier: `[a-z0-9_-]`, 1 to 64 characters.
///
/// # Errors
/// Returns `InvalidConfig` on violation.
pub fn validate_tenant_id(tenant_id: &str) -> Result<(), OrchestratorError> {
    if tenant_id.is_empty() || tenant_id.len() > MAX_TENANT_ID_LEN {
        return Err(OrchestratorError::InvalidConfig(format!(
            "tenant_id must be 1-{} characters",
            MAX_TENANT_ID_LEN
        )));
    }
    if !tenant_id
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
    {
        return Err(OrchestratorError::InvalidConfig(format!(
            "tenant_id '{}' may only contain a-z, 0-9, '_' and '-'",
            tenant_id
        )));
    }
    Ok(())
}

fn validate_bot_name(name: &str) -> Result<(), OrchestratorError> {
    if name.is_empty() || name.len() > MAX_BOT_NAME_LEN {
        return Err(OrchestratorError::InvalidConfig(format!(
            "name must be 1-{} characters",
            MAX_BOT_NAME_LEN
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
    {
        return Err(OrchestratorError::InvalidConfig(format!(
            "name '{}' may only contain a-z, 0-9 and '_'",
            name
        )));
    }
    Ok(())
}

// ============================================================================
// Bot configuration
// ============================================================================

fn default_bot_name() -> String {
    DEFAULT_BOT_NAME.to_string()
}

fn default_true() -> bool {
    true
}

fn default_strategy() -> String {
    "SampleStrategy".to_string()
}

fn default_max_open_trades() -> u32 {
    3
}

/// Declarative configuration of a trading bot, validated before provisioning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct BotConfig {
    /// Display name, unique per tenant (`[a-z0-9_]`).
    #[serde(default = "default_bot_name")]
    pub name: String,
    /// Exchange identifier (e.g., "binance").
    pub exchange_name: String,
    /// Exchange API key.
    pub api_key: String,
    /// Exchange API secret.
    pub api_secret: String,
    /// Simulate trades without touching the exchange.
    #[serde(default = "default_true")]
    pub dry_run: bool,
    /// Quote currency used for stakes (e.g., "USDT").
    pub stake_currency: String,
    /// Amount staked per trade.
    pub stake_amount: f64,
    /// Strategy class name.
    #[serde(default = "default_strategy")]
    pub strategy: String,
    /// Pairs the bot may trade; defaults to BTC/USDT and ETH/USDT.
    #[serde(default)]
    pub pair_whitelist: Option<Vec<String>>,
    /// Maximum concurrently open trades.
    #[serde(default = "default_max_open_trades")]
    pub max_open_trades: u32,
    /// Candle timeframe (e.g., "5m"); strategy default when absent.
    #[serde(default)]
    pub timeframe: Option<String>,
    /// Enable Telegram notifications.
    #[serde(default)]
    pub telegram_enabled: bool,
    /// Telegram bot token.
    #[serde(default)]
    pub telegram_token: Option<String>,
    /// Telegram chat id.
    #[serde(default)]
    pub telegram_chat_id: Option<String>,
}

impl BotConfig {
    /// Pairs used when the request does not list any.
    pub const DEFAULT_PAIRS: [&'static str; 2] = ["BTC/USDT", "ETH/USDT"];

    /// Returns the effective pair whitelist.
    #[must_use]
    pub fn pairs(&self) -> Vec<String> {
        match &self.pair_whitelist {
            Some(pairs) if !pairs.is_empty() => pairs.clone(),
            _ => Self::DEFAULT_PAIRS.iter().map(|p| p.to_string()).collect(),
        }
    }

    /// Validates required fields and value ranges.
    ///
    /// # Errors
    /// Returns `InvalidConfig` describing the first violation found.
    pub fn validate(&self) -> Result<(), OrchestratorError> {
        validate_bot_name(&self.name)?;

        for (field, value) in [
            ("exchange_name", &self.exchange_name),
            ("api_key", &self.api_key),
            ("api_secret", &self.api_secret),
            ("strategy", &self.strategy),
        ] {
            if value.trim().is_empty() {
                return Err(OrchestratorError::InvalidConfig(format!(
                    "{} cannot be empty",
                    field
                )));
            }
        }

        if self.stake_currency.is_empty()
            || !self
                .stake_currency
                .chars()
                .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
        {
            return Err(OrchestratorError::InvalidConfig(format!(
                "stake_currency '{}' must be an upper-case ticker",
                self.stake_currency
            )));
        }

        if !self.stake_amount.is_finite() || self.stake_amount <= 0.0 {
            return Err(OrchestratorError::InvalidConfig(
                "stake_amount must be a positive number".to_string(),
            ));
        }

        if self.max_open_trades == 0 {
            return Err(OrchestratorError::InvalidConfig(
                "max_open_trades must be at least 1".to_string(),
            ));
        }

        for pair in self.pairs() {
            let valid = pair
                .split_once('/')
                .is_some_and(|(base, quote)| !base.is_empty() && !quote.is_empty());
            if !valid {
                return Err(OrchestratorError::InvalidConfig(format!(
                    "pair '{}' must look like BASE/QUOTE",
                    pair
                )));
            }
        }

        if self.telegram_enabled {
            let has_token = self.telegram_token.as_deref().is_some_and(|t| !t.is_empty());
            let has_chat = self
                .telegram_chat_id
                .as_deref()
                .is_some_and(|c| !c.is_empty());
            if !has_token || !has_chat {
                return Err(OrchestratorError::InvalidConfig(
                    "telegram_token and telegram_chat_id are required when telegram is enabled"
                        .to_string(),
                ));
            }
        }

        Ok(())
    }
}

// ============================================================================
// Runtime observations
// ============================================================================

/// Container state as reported by the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
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
    /// State the runtime did not report or we do not recognize.
    Unknown,
}

impl ContainerState {
    /// Parses a Docker-style state string.
    #[must_use]
    pub fn parse(state: &str) -> Self {
        match state.to_ascii_lowercase().as_str() {
            "created" => Self::Created,
            "running" => Self::Running,
            "paused" => Self::Paused,
            "restarting" => Self::Restarting,
            "removing" => Self::Removing,
            "exited" => Self::Exited,
            "dead" => Self::Dead,
            _ => Self::Unknown,
        }
    }
}

impl std::fmt::Display for ContainerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Restarting => "restarting",
            Self::Removing => "removing",
            Self::Exited => "exited",
            Self::Dead => "dead",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// One published port of a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PortMapping {
    /// Container-side port spec (e.g., "8080/tcp").
    pub container_port: String,
    /// Host interface.
    pub host_ip: Option<String>,
    /// Host port.
    pub host_port: Option<u16>,
}

/// Live runtime state of a bot's container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct StatusSnapshot {
    /// Bot identifier (container name).
    pub bot_id: String,
    /// Container id.
    pub container_id: String,
    /// Runtime state.
    pub state: ContainerState,
    /// Image the container runs.
    pub image: String,
    /// Port bindings.
    pub ports: Vec<PortMapping>,
    /// Start timestamp as reported by the runtime.
    pub started_at: Option<String>,
}

// ============================================================================
// REST DTOs
// ============================================================================

/// Health check response.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    /// Service status.
    pub status: String,
    /// Service version.
    pub version: String,
    /// Container runtime backend in use.
    pub runtime: String,
}

/// Bot record as returned by the API.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
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

impl From<BotInstance> for BotResponse {
    fn from(bot: BotInstance) -> Self {
        Self {
            bot_id: bot.bot_id,
            name: bot.name,
            tenant_id: bot.tenant_id,
            status: bot.status,
            status_reason: bot.status_reason,
            host_port: bot.exposed_port,
            container_id: bot.runtime_handle,
            image: bot.image,
            config_path: bot.config_artifact_path.display().to_string(),
            user_data_path: bot.data_dir_path.display().to_string(),
            created_at: bot.created_at,
            updated_at: bot.updated_at,
        }
    }
}

/// List of bots for the calling tenant.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct BotsListResponse {
    /// Bots, ordered by creation time.
    pub bots: Vec<BotResponse>,
}

/// Pagination for bot listings.
#[derive(Debug, Deserialize, IntoParams)]
pub struct ListBotsQuery {
    /// Records to skip.
    #[serde(default)]
    pub skip: Option<usize>,
    /// Maximum records to return (default 100).
    #[serde(default)]
    pub limit: Option<usize>,
}

/// Result of a deprovision request.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DeleteBotResponse {
    /// Bot identifier.
    pub bot_id: String,
    /// Whether a record was removed by this call.
    pub removed: bool,
    /// Human-readable outcome.
    pub message: String,
}

/// Live status of a bot.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct BotStatusResponse {
    /// Registry view.
    pub bot: BotResponse,
    /// Runtime view.
    pub runtime: StatusSnapshot,
}

/// Query parameters for log retrieval.
#[derive(Debug, Deserialize, IntoParams)]
pub struct LogsQuery {
    /// Number of trailing lines (1 to 1000).
    #[serde(default)]
    pub tail: Option<usize>,
}

/// Recent container output.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct BotLogsResponse {
    /// Bot identifier.
    pub bot_id: String,
    /// Combined stdout/stderr.
    pub logs: String,
    /// Number of lines requested.
    pub tail: usize,
}

/// Permission levels for API keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    /// Read bots, status and logs.
    Read,
    /// Provision, control and remove bots.
    Manage,
    /// Everything, including key management.
    Admin,
}

/// Request to create an API key for the caller's tenant.
#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct CreateApiKeyRequest {
    /// Human-readable name.
    pub name: String,
    /// Granted permissions.
    pub permissions: Vec<Permission>,
    /// Requests per minute (default 600).
    #[serde(default)]
    pub rate_limit: Option<u32>,
}

/// Newly created API key; the raw key is only ever returned here.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CreateApiKeyResponse {
    /// Key identifier.
    pub key_id: String,
    /// Raw API key.
    pub api_key: String,
    /// Tenant the key acts for.
    pub tenant_id: String,
    /// Granted permissions.
    pub permissions: Vec<Permission>,
}

/// API key metadata without the secret.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ApiKeyInfo {
    /// Key identifier.
    pub key_id: String,
    /// Human-readable name.
    pub name: String,
    /// Tenant the key acts for.
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

/// API keys of the caller's tenant.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ApiKeysListResponse {
    /// Keys.
    pub keys: Vec<ApiKeyInfo>,
}
