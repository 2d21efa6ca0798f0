//! PostgreSQL-backed bot registry.

use super::pool::DatabasePool;
use super::schema::{BOT_COLUMNS, BotRow};
use crate::error::OrchestratorError;
use crate::models::{BotInstance, BotStatus};
use crate::registry::{BotRegistry, StatusUpdate};
use async_trait::async_trait;
use std::collections::BTreeSet;
use tracing::debug;

/// Registry stored in the `bots` table.
///
/// A partial unique index on `exposed_port` for port-holding statuses backs up
/// the in-process port allocator.
#[derive(Clone)]
pub struct PgBotRegistry {
    db: DatabasePool,
}

impl PgBotRegistry {
    /// Creates a registry over an established pool.
    #[must_use]
    pub fn new(db: DatabasePool) -> Self {
        Self { db }
    }

    fn into_instances(rows: Vec<BotRow>) -> Result<Vec<BotInstance>, OrchestratorError> {
        rows.into_iter().map(BotInstance::try_from).collect()
    }
}

#[async_trait]
impl BotRegistry for PgBotRegistry {
    async fn create(&self, bot: BotInstance) -> Result<BotInstance, OrchestratorError> {
        let sql = format!(
            "INSERT INTO bots ({BOT_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) \
             ON CONFLICT (bot_id) DO NOTHING \
             RETURNING {BOT_COLUMNS}"
        );
        let inserted: Option<BotRow> = sqlx::query_as(&sql)
            .bind(&bot.bot_id)
            .bind(&bot.tenant_id)
            .bind(&bot.name)
            .bind(bot.status.as_str())
            .bind(&bot.status_reason)
            .bind(bot.config_artifact_path.to_string_lossy().into_owned())
            .bind(bot.data_dir_path.to_string_lossy().into_owned())
            .bind(i32::from(bot.exposed_port))
            .bind(&bot.runtime_handle)
            .bind(&bot.image)
            .bind(bot.created_at)
            .bind(bot.updated_at)
            .fetch_optional(self.db.pool())
            .await?;

        match inserted {
            Some(row) => {
                debug!(bot_id = %bot.bot_id, "Bot record inserted");
                row.try_into()
            }
            None => {
                let current = match self.get(&bot.tenant_id, &bot.bot_id).await? {
                    Some(existing) => existing.status,
                    None => BotStatus::Unknown,
                };
                Err(OrchestratorError::ConflictingState {
                    bot_id: bot.bot_id,
                    current,
                    attempted: "create".to_string(),
                })
            }
        }
    }

    async fn update_status(
        &self,
        tenant_id: &str,
        bot_id: &str,
        update: StatusUpdate,
    ) -> Result<Option<BotInstance>, OrchestratorError> {
        let sql = format!(
            "UPDATE bots SET \
                 status = $3, \
                 status_reason = $4, \
                 runtime_handle = CASE WHEN $5 THEN $6 ELSE runtime_handle END, \
                 exposed_port = COALESCE($7, exposed_port), \
                 image = COALESCE($8, image), \
                 updated_at = NOW() \
             WHERE tenant_id = $1 AND bot_id = $2 \
             RETURNING {BOT_COLUMNS}"
        );
        let (set_handle, handle) = match update.runtime_handle {
            Some(handle) => (true, handle),
            None => (false, None),
        };
        let row: Option<BotRow> = sqlx::query_as(&sql)
            .bind(tenant_id)
            .bind(bot_id)
            .bind(update.status.as_str())
            .bind(update.reason)
            .bind(set_handle)
            .bind(handle)
            .bind(update.exposed_port.map(i32::from))
            .bind(update.image)
            .fetch_optional(self.db.pool())
            .await?;

        row.map(BotInstance::try_from).transpose()
    }

    async fn get(
        &self,
        tenant_id: &str,
        bot_id: &str,
    ) -> Result<Option<BotInstance>, OrchestratorError> {
        let sql = format!("SELECT {BOT_COLUMNS} FROM bots WHERE tenant_id = $1 AND bot_id = $2");
        let row: Option<BotRow> = sqlx::query_as(&sql)
            .bind(tenant_id)
            .bind(bot_id)
            .fetch_optional(self.db.pool())
            .await?;

        row.map(BotInstance::try_from).transpose()
    }

    async fn list_by_tenant(
        &self,
        tenant_id: &str,
        skip: usize,
        limit: usize,
    ) -> Result<Vec<BotInstance>, OrchestratorError> {
        let sql = format!(
            "SELECT {BOT_COLUMNS} FROM bots WHERE tenant_id = $1 \
             ORDER BY created_at, bot_id OFFSET $2 LIMIT $3"
        );
        let rows: Vec<BotRow> = sqlx::query_as(&sql)
            .bind(tenant_id)
            .bind(i64::try_from(skip).unwrap_or(i64::MAX))
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(self.db.pool())
            .await?;

        Self::into_instances(rows)
    }

    async fn remove(&self, tenant_id: &str, bot_id: &str) -> Result<bool, OrchestratorError> {
        let result = sqlx::query("DELETE FROM bots WHERE tenant_id = $1 AND bot_id = $2")
            .bind(tenant_id)
            .bind(bot_id)
            .execute(self.db.pool())
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn ports_in_use(&self) -> Result<BTreeSet<u16>, OrchestratorError> {
        let ports: Vec<i32> =
            sqlx::query_scalar("SELECT exposed_port FROM bots WHERE status <> 'stopped'")
                .fetch_all(self.db.pool())
                .await?;

        Ok(ports
            .into_iter()
            .filter_map(|p| u16::try_from(p).ok())
            .collect())
    }

    async fn list_by_status(
        &self,
        statuses: &[BotStatus],
    ) -> Result<Vec<BotInstance>, OrchestratorError> {
        let sql = format!("SELECT {BOT_COLUMNS} FROM bots WHERE status = ANY($1) ORDER BY created_at");
        let statuses: Vec<String> = statuses.iter().map(|s| s.as_str().to_string()).collect();
        let rows: Vec<BotRow> = sqlx::query_as(&sql)
            .bind(statuses)
            .fetch_all(self.db.pool())
            .await?;

        Self::into_instances(rows)
    }
}
