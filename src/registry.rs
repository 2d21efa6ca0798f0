//! Bot registry: the persistent record of every bot instance.
//!
//! The registry is the source of truth for what exists. Every lookup and
//! mutation is scoped by `(tenant_id, bot_id)` so one tenant can never observe
//! or modify another tenant's bots.

use crate::error::OrchestratorError;
use crate::models::{BotInstance, BotStatus};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};

/// Mutation applied by [`BotRegistry::update_status`].
///
/// `status` and `reason` are always written (a transition clears a previous
/// reason unless a new one is given); the remaining fields are only written
/// when set.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusUpdate {
    /// New lifecycle status.
    pub status: BotStatus,
    /// Human-readable reason, kept for operator visibility.
    pub reason: Option<String>,
    /// `Some(None)` clears the runtime handle.
    pub runtime_handle: Option<Option<String>>,
    /// New host port.
    pub exposed_port: Option<u16>,
    /// New worker image.
    pub image: Option<String>,
}

impl StatusUpdate {
    /// Creates an update that only changes the status.
    #[must_use]
    pub fn new(status: BotStatus) -> Self {
        Self {
            status,
            reason: None,
            runtime_handle: None,
            exposed_port: None,
            image: None,
        }
    }

    /// Attaches a reason.
    #[must_use]
    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Sets or clears the runtime handle.
    #[must_use]
    pub fn runtime_handle(mut self, handle: Option<String>) -> Self {
        self.runtime_handle = Some(handle);
        self
    }

    /// Moves the bot to another host port.
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.exposed_port = Some(port);
        self
    }

    /// Changes the worker image.
    #[must_use]
    pub fn image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }

    fn apply(self, bot: &mut BotInstance) {
        bot.status = self.status;
        bot.status_reason = self.reason;
        if let Some(handle) = self.runtime_handle {
            bot.runtime_handle = handle;
        }
        if let Some(port) = self.exposed_port {
            bot.exposed_port = port;
        }
        if let Some(image) = self.image {
            bot.image = image;
        }
        bot.updated_at = Utc::now();
    }
}

/// Persistent store of bot records.
#[async_trait]
pub trait BotRegistry: Send + Sync {
    /// Inserts a new record.
    ///
    /// Fails with `ConflictingState` when the bot id already exists and with
    /// `Registry` when another port-holding bot owns the same port.
    async fn create(&self, bot: BotInstance) -> Result<BotInstance, OrchestratorError>;

    /// Applies a status update; returns `None` when the tenant has no such bot.
    async fn update_status(
        &self,
        tenant_id: &str,
        bot_id: &str,
        update: StatusUpdate,
    ) -> Result<Option<BotInstance>, OrchestratorError>;

    /// Fetches one record.
    async fn get(
        &self,
        tenant_id: &str,
        bot_id: &str,
    ) -> Result<Option<BotInstance>, OrchestratorError>;

    /// Lists a tenant's bots ordered by creation time.
    async fn list_by_tenant(
        &self,
        tenant_id: &str,
        skip: usize,
        limit: usize,
    ) -> Result<Vec<BotInstance>, OrchestratorError>;

    /// Deletes a record; returns whether one was removed.
    async fn remove(&self, tenant_id: &str, bot_id: &str) -> Result<bool, OrchestratorError>;

    /// Ports held by bots in a port-holding status, across all tenants.
    async fn ports_in_use(&self) -> Result<BTreeSet<u16>, OrchestratorError>;

    /// All bots currently in one of `statuses`, across all tenants.
    async fn list_by_status(
        &self,
        statuses: &[BotStatus],
    ) -> Result<Vec<BotInstance>, OrchestratorError>;
}

// ============================================================================
// In-memory registry
// ============================================================================

/// Registry kept in process memory. Used when no database is configured.
#[derive(Debug, Default)]
pub struct InMemoryBotRegistry {
    bots: RwLock<HashMap<String, BotInstance>>,
}

impl InMemoryBotRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records across all tenants.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bots.read().len()
    }

    /// Whether the registry holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bots.read().is_empty()
    }

    fn port_holder<'a>(
        bots: &'a HashMap<String, BotInstance>,
        port: u16,
        except: &str,
    ) -> Option<&'a BotInstance> {
        bots.values()
            .find(|b| b.bot_id != except && b.status.holds_port() && b.exposed_port == port)
    }
}

#[async_trait]
impl BotRegistry for InMemoryBotRegistry {
    async fn create(&self, bot: BotInstance) -> Result<BotInstance, OrchestratorError> {
        let mut bots = self.bots.write();

        if let Some(existing) = bots.get(&bot.bot_id) {
            return Err(OrchestratorError::ConflictingState {
                bot_id: bot.bot_id.clone(),
                current: existing.status,
                attempted: "create".to_string(),
            });
        }

        if bot.status.holds_port()
            && let Some(holder) = Self::port_holder(&bots, bot.exposed_port, &bot.bot_id)
        {
            return Err(OrchestratorError::Registry(format!(
                "port {} already held by {}",
                bot.exposed_port, holder.bot_id
            )));
        }

        bots.insert(bot.bot_id.clone(), bot.clone());
        Ok(bot)
    }

    async fn update_status(
        &self,
        tenant_id: &str,
        bot_id: &str,
        update: StatusUpdate,
    ) -> Result<Option<BotInstance>, OrchestratorError> {
        let mut bots = self.bots.write();

        let Some(current) = bots.get(bot_id).filter(|b| b.tenant_id == tenant_id) else {
            return Ok(None);
        };

        let port = update.exposed_port.unwrap_or(current.exposed_port);
        if update.status.holds_port()
            && let Some(holder) = Self::port_holder(&bots, port, bot_id)
        {
            return Err(OrchestratorError::Registry(format!(
                "port {} already held by {}",
                port, holder.bot_id
            )));
        }

        let Some(bot) = bots.get_mut(bot_id) else {
            return Ok(None);
        };
        update.apply(bot);
        Ok(Some(bot.clone()))
    }

    async fn get(
        &self,
        tenant_id: &str,
        bot_id: &str,
    ) -> Result<Option<BotInstance>, OrchestratorError> {
        Ok(self
            .bots
            .read()
            .get(bot_id)
            .filter(|b| b.tenant_id == tenant_id)
            .cloned())
    }

    async fn list_by_tenant(
        &self,
        tenant_id: &str,
        skip: usize,
        limit: usize,
    ) -> Result<Vec<BotInstance>, OrchestratorError> {
        let mut bots: Vec<BotInstance> = self
            .bots
            .read()
            .values()
            .filter(|b| b.tenant_id == tenant_id)
            .cloned()
            .collect();
        bots.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.bot_id.cmp(&b.bot_id))
        });
        Ok(bots.into_iter().skip(skip).take(limit).collect())
    }

    async fn remove(&self, tenant_id: &str, bot_id: &str) -> Result<bool, OrchestratorError> {
        let mut bots = self.bots.write();
        if bots.get(bot_id).is_some_and(|b| b.tenant_id == tenant_id) {
            bots.remove(bot_id);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn ports_in_use(&self) -> Result<BTreeSet<u16>, OrchestratorError> {
        Ok(self
            .bots
            .read()
            .values()
            .filter(|b| b.status.holds_port())
            .map(|b| b.exposed_port)
            .collect())
    }

    async fn list_by_status(
        &self,
        statuses: &[BotStatus],
    ) -> Result<Vec<BotInstance>, OrchestratorError> {
        Ok(self
            .bots
            .read()
            .values()
            .filter(|b| statuses.contains(&b.status))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn bot(tenant: &str, name: &str, port: u16) -> BotInstance {
        let now = Utc::now();
        BotInstance {
            bot_id: format!("ft-{}-{}", tenant, name),
            tenant_id: tenant.to_string(),
            name: name.to_string(),
            status: BotStatus::Creating,
            status_reason: None,
            config_artifact_path: PathBuf::from("/tmp/config.json"),
            data_dir_path: PathBuf::from("/tmp/user_data"),
            exposed_port: port,
            runtime_handle: None,
            image: "freqtradeorg/freqtrade:stable".to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_create_and_get_scoped_by_tenant() {
        let registry = InMemoryBotRegistry::new();
        registry.create(bot("acme", "main", 8081)).await.unwrap();

        assert!(registry.get("acme", "ft-acme-main").await.unwrap().is_some());
        assert!(registry.get("other", "ft-acme-main").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_duplicate_is_conflict() {
        let registry = InMemoryBotRegistry::new();
        registry.create(bot("acme", "main", 8081)).await.unwrap();

        let err = registry.create(bot("acme", "main", 8082)).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::ConflictingState { .. }));
    }

    #[tokio::test]
    async fn test_create_rejects_held_port() {
        let registry = InMemoryBotRegistry::new();
        registry.create(bot("acme", "main", 8081)).await.unwrap();

        let err = registry.create(bot("beta", "main", 8081)).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Registry(_)));
    }

    #[tokio::test]
    async fn test_stopped_bot_frees_its_port() {
        let registry = InMemoryBotRegistry::new();
        registry.create(bot("acme", "main", 8081)).await.unwrap();
        registry
            .update_status("acme", "ft-acme-main", StatusUpdate::new(BotStatus::Stopped))
            .await
            .unwrap();

        assert!(registry.ports_in_use().await.unwrap().is_empty());
        assert!(registry.create(bot("beta", "main", 8081)).await.is_ok());
    }

    #[tokio::test]
    async fn test_update_status_applies_fields() {
        let registry = InMemoryBotRegistry::new();
        registry.create(bot("acme", "main", 8081)).await.unwrap();

        let updated = registry
            .update_status(
                "acme",
                "ft-acme-main",
                StatusUpdate::new(BotStatus::Error)
                    .reason("image pull failed")
                    .runtime_handle(Some("abc".to_string()))
                    .port(8090),
            )
            .await
            .unwrap()
            .unwrap();

        assert_eq!(updated.status, BotStatus::Error);
        assert_eq!(updated.status_reason.as_deref(), Some("image pull failed"));
        assert_eq!(updated.runtime_handle.as_deref(), Some("abc"));
        assert_eq!(updated.exposed_port, 8090);

        let cleared = registry
            .update_status(
                "acme",
                "ft-acme-main",
                StatusUpdate::new(BotStatus::Creating).runtime_handle(None),
            )
            .await
            .unwrap()
            .unwrap();
        assert!(cleared.status_reason.is_none());
        assert!(cleared.runtime_handle.is_none());
    }

    #[tokio::test]
    async fn test_update_status_other_tenant_is_none() {
        let registry = InMemoryBotRegistry::new();
        registry.create(bot("acme", "main", 8081)).await.unwrap();

        let result = registry
            .update_status("beta", "ft-acme-main", StatusUpdate::new(BotStatus::Error))
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_remove_is_tenant_scoped() {
        let registry = InMemoryBotRegistry::new();
        registry.create(bot("acme", "main", 8081)).await.unwrap();

        assert!(!registry.remove("beta", "ft-acme-main").await.unwrap());
        assert!(registry.remove("acme", "ft-acme-main").await.unwrap());
        assert!(!registry.remove("acme", "ft-acme-main").await.unwrap());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_list_by_tenant_paginates() {
        let registry = InMemoryBotRegistry::new();
        for (i, name) in ["a", "b", "c"].iter().enumerate() {
            registry
                .create(bot("acme", name, 8081 + i as u16))
                .await
                .unwrap();
        }
        registry.create(bot("beta", "main", 8090)).await.unwrap();

        assert_eq!(registry.list_by_tenant("acme", 0, 100).await.unwrap().len(), 3);
        assert_eq!(registry.list_by_tenant("acme", 1, 1).await.unwrap().len(), 1);
        assert_eq!(registry.list_by_tenant("beta", 0, 100).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_list_by_status() {
        let registry = InMemoryBotRegistry::new();
        registry.create(bot("acme", "main", 8081)).await.unwrap();
        registry.create(bot("beta", "main", 8082)).await.unwrap();
        registry
            .update_status("beta", "ft-beta-main", StatusUpdate::new(BotStatus::Error))
            .await
            .unwrap();

        let creating = registry
            .list_by_status(&[BotStatus::Creating, BotStatus::Stopping])
            .await
            .unwrap();
        assert_eq!(creating.len(), 1);
        assert_eq!(creating[0].bot_id, "ft-acme-main");
    }
}
