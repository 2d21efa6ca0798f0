//! Database schema types.

use crate::error::OrchestratorError;
use crate::models::{BotInstance, BotStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::path::PathBuf;

/// Column list shared by every `bots` query.
pub const BOT_COLUMNS: &str = "bot_id, tenant_id, name, status, status_reason, \
    config_artifact_path, data_dir_path, exposed_port, runtime_handle, image, \
    created_at, updated_at";

/// Bot record as stored in the `bots` table.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BotRow {
    /// Canonical identifier (primary key).
    pub bot_id: String,
    /// Owning tenant.
    pub tenant_id: String,
    /// Display name, unique per tenant.
    pub name: String,
    /// Lifecycle status, lowercase.
    pub status: String,
    /// Reason recorded with the last error.
    pub status_reason: Option<String>,
    /// Host path of the config artifact.
    pub config_artifact_path: String,
    /// Host path of the data directory.
    pub data_dir_path: String,
    /// Host port (Postgres has no unsigned types).
    pub exposed_port: i32,
    /// Container id.
    pub runtime_handle: Option<String>,
    /// Worker image.
    pub image: String,
    /// Record creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last updated timestamp.
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<BotRow> for BotInstance {
    type Error = OrchestratorError;

    fn try_from(row: BotRow) -> Result<Self, Self::Error> {
        let status: BotStatus = row.status.parse()?;
        let exposed_port = u16::try_from(row.exposed_port).map_err(|_| {
            OrchestratorError::Registry(format!(
                "bot {} has out-of-range port {}",
                row.bot_id, row.exposed_port
            ))
        })?;

        Ok(BotInstance {
            bot_id: row.bot_id,
            tenant_id: row.tenant_id,
            name: row.name,
            status,
            status_reason: row.status_reason,
            config_artifact_path: PathBuf::from(row.config_artifact_path),
            data_dir_path: PathBuf::from(row.data_dir_path),
            exposed_port,
            runtime_handle: row.runtime_handle,
            image: row.image,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}
