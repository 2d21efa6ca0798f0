//! Bot lifecycle orchestration.
//!
//! [`Orchestrator`] composes the [`PortAllocator`], [`ConfigMaterializer`],
//! [`LifecycleManager`] and [`LogReader`] around a [`BotRegistry`].
//!
//! Lifecycle transitions for one bot are serialized by a per-bot lock that is
//! held only while the registry is read and updated. Slow runtime work runs
//! without the lock; the bot is marked `creating` or `stopping` beforehand, and
//! competing requests are refused with `ConflictingState` until it settles.

mod lifecycle;
mod locks;
mod logs;
mod materializer;
mod ports;

#[cfg(test)]
mod tests;

pub use lifecycle::{LifecycleManager, LifecycleSettings, MANAGED_LABEL, TENANT_LABEL};
pub use locks::{BotGuard, BotLocks};
pub use logs::LogReader;
pub use materializer::{BotArtifacts, ConfigMaterializer};
pub use ports::{PortAllocator, PortLease};

use crate::error::OrchestratorError;
use crate::models::{BotConfig, BotInstance, BotStatus, ContainerState, StatusSnapshot, derive_bot_id};
use crate::registry::{BotRegistry, StatusUpdate};
use crate::runtime::{ContainerRuntime, LogStream};
use chrono::Utc;
use std::future::Future;
use std::ops::Range;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Runs `fut` with a deadline, mapping expiry to `Timeout`.
pub(crate) async fn with_timeout<T, F>(
    operation: &'static str,
    after: Duration,
    fut: F,
) -> Result<T, OrchestratorError>
where
    F: Future<Output = Result<T, OrchestratorError>>,
{
    match tokio::time::timeout(after, fut).await {
        Ok(result) => result,
        Err(_) => Err(OrchestratorError::Timeout { operation, after }),
    }
}

fn conflict(bot: &BotInstance, attempted: &str) -> OrchestratorError {
    OrchestratorError::ConflictingState {
        bot_id: bot.bot_id.clone(),
        current: bot.status,
        attempted: attempted.to_string(),
    }
}

/// Orchestrator tuning.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Host ports handed to workers (end exclusive).
    pub port_range: Range<u16>,
    /// Root directory for config artifacts and data directories.
    pub storage_root: PathBuf,
    /// Container parameters and runtime deadlines.
    pub lifecycle: LifecycleSettings,
    /// Log lines returned when the caller does not ask for a count.
    pub default_log_tail: usize,
    /// Upper bound on requested log lines.
    pub max_log_tail: usize,
    /// Delete the data directory on deprovision.
    pub purge_data_on_deprovision: bool,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            port_range: 8081..9000,
            storage_root: PathBuf::from("docker-configs/freqtrade"),
            lifecycle: LifecycleSettings::default(),
            default_log_tail: 100,
            max_log_tail: 1000,
            purge_data_on_deprovision: false,
        }
    }
}

/// Provisions, tears down and observes bots for all tenants.
pub struct Orchestrator {
    registry: Arc<dyn BotRegistry>,
    ports: PortAllocator,
    materializer: ConfigMaterializer,
    lifecycle: LifecycleManager,
    logs: LogReader,
    locks: BotLocks,
    purge_data: bool,
}

impl Orchestrator {
    /// Wires the components together.
    ///
    /// # Errors
    /// `ArtifactWrite` when the storage root cannot be resolved.
    pub fn new(
        settings: OrchestratorSettings,
        registry: Arc<dyn BotRegistry>,
        runtime: Arc<dyn ContainerRuntime>,
    ) -> Result<Self, OrchestratorError> {
        let materializer = ConfigMaterializer::new(
            settings.storage_root.clone(),
            settings.lifecycle.service_port,
        )?;
        let logs = LogReader::new(
            Arc::clone(&runtime),
            settings.lifecycle.call_timeout,
            settings.default_log_tail,
            settings.max_log_tail,
        );
        Ok(Self {
            ports: PortAllocator::new(settings.port_range.clone(), Arc::clone(&registry)),
            registry,
            materializer,
            lifecycle: LifecycleManager::new(runtime, settings.lifecycle),
            logs,
            locks: BotLocks::new(),
            purge_data: settings.purge_data_on_deprovision,
        })
    }

    /// Name of the container backend.
    #[must_use]
    pub fn runtime_name(&self) -> &'static str {
        self.lifecycle.runtime().name()
    }

    /// Checks that the container backend is reachable.
    ///
    /// # Errors
    /// `RuntimeUnavailable` or `Timeout`.
    pub async fn ping_runtime(&self) -> Result<(), OrchestratorError> {
        with_timeout(
            "ping",
            self.lifecycle.settings().call_timeout,
            self.lifecycle.runtime().ping(),
        )
        .await
    }

    /// The port allocator.
    #[must_use]
    pub fn ports(&self) -> &PortAllocator {
        &self.ports
    }

    /// The config materializer.
    #[must_use]
    pub fn materializer(&self) -> &ConfigMaterializer {
        &self.materializer
    }

    // ========================================================================
    // Provisioning
    // ========================================================================

    /// Provisions a bot: reserves a port, writes its artifacts and starts its
    /// container.
    ///
    /// A bot in `error` or `stopped` is re-provisioned with the new
    /// configuration. On failure the record is left in `error` with a reason
    /// and the error is returned.
    ///
    /// # Errors
    /// `InvalidConfig`, `ConflictingState` when the bot is active,
    /// `ResourceExhausted`, and any materialization or runtime error.
    pub async fn provision(
        &self,
        tenant_id: &str,
        config: BotConfig,
    ) -> Result<BotInstance, OrchestratorError> {
        config.validate()?;
        let bot_id = derive_bot_id(tenant_id, &config.name)?;
        let paths = self.materializer.paths(tenant_id, &bot_id)?;

        let record = {
            let _guard = self.locks.acquire(&bot_id).await;
            match self.registry.get(tenant_id, &bot_id).await? {
                Some(existing) if matches!(existing.status, BotStatus::Error | BotStatus::Stopped) => {
                    self.mark_creating(&existing, "provision").await?
                }
                Some(existing) => return Err(conflict(&existing, "provision")),
                None => {
                    let lease = self.ports.allocate().await?;
                    let now = Utc::now();
                    let created = self
                        .registry
                        .create(BotInstance {
                            bot_id: bot_id.clone(),
                            tenant_id: tenant_id.to_string(),
                            name: config.name.clone(),
                            status: BotStatus::Creating,
                            status_reason: None,
                            config_artifact_path: paths.config_path,
                            data_dir_path: paths.data_dir,
                            exposed_port: lease.port(),
                            runtime_handle: None,
                            image: self.lifecycle.settings().image.clone(),
                            created_at: now,
                            updated_at: now,
                        })
                        .await?;
                    drop(lease);
                    created
                }
            }
        };

        info!(
            tenant_id = %tenant_id,
            bot_id = %bot_id,
            port = record.exposed_port,
            "Provisioning bot"
        );

        let outcome = match self.materializer.materialize(tenant_id, &config).await {
            Ok(artifacts) => {
                self.lifecycle
                    .start(tenant_id, &artifacts, record.exposed_port)
                    .await
            }
            Err(e) => Err(e),
        };

        self.finish_launch(&record, outcome).await
    }

    /// Tears a bot down: stops and removes its container, deletes its
    /// artifacts, then removes the registry record and frees its port.
    ///
    /// Returns `false` when the tenant has no such bot.
    ///
    /// # Errors
    /// `ConflictingState` while the bot is `creating` or `stopping`, and any
    /// runtime or filesystem error (the record is kept so the call can be retried).
    pub async fn deprovision(
        &self,
        tenant_id: &str,
        bot_id: &str,
    ) -> Result<bool, OrchestratorError> {
        let record = {
            let guard = self.locks.acquire(bot_id).await;
            let Some(bot) = self.registry.get(tenant_id, bot_id).await? else {
                debug!(tenant_id = %tenant_id, bot_id = %bot_id, "Deprovision of unknown bot is a no-op");
                return Ok(false);
            };
            match bot.status {
                BotStatus::Creating | BotStatus::Stopping => {
                    return Err(conflict(&bot, "deprovision"));
                }
                BotStatus::Stopped => {
                    // A stopped bot has no port to claim, so it stays locked
                    // until the record is gone
                    self.lifecycle.stop(bot_id).await?;
                    let removed = self.remove_artifacts_and_record(&bot).await?;
                    drop(guard);
                    info!(tenant_id = %tenant_id, bot_id = %bot_id, "Stopped bot deprovisioned");
                    return Ok(removed);
                }
                _ => {
                    self.transition(&bot, StatusUpdate::new(BotStatus::Stopping), "deprovision")
                        .await?
                }
            }
        };

        let existed = match self.lifecycle.stop(bot_id).await {
            Ok(existed) => existed,
            Err(e) => {
                self.mark_error(tenant_id, bot_id, &e).await;
                return Err(e);
            }
        };
        if !existed {
            debug!(bot_id = %bot_id, "No container to stop");
        }

        let guard = self.locks.acquire(bot_id).await;
        let current = self.current(tenant_id, bot_id).await?;
        let stopped = self
            .transition(
                &current,
                StatusUpdate::new(BotStatus::Stopped).runtime_handle(None),
                "deprovision",
            )
            .await?;
        let removed = self.remove_artifacts_and_record(&stopped).await?;
        self.ports.release(record.exposed_port);
        drop(guard);

        info!(
            tenant_id = %tenant_id,
            bot_id = %bot_id,
            port = record.exposed_port,
            "Bot deprovisioned"
        );
        Ok(removed)
    }

    /// Deletes a stopped bot's config and its registry record, record last.
    async fn remove_artifacts_and_record(
        &self,
        bot: &BotInstance,
    ) -> Result<bool, OrchestratorError> {
        self.materializer
            .remove(&bot.tenant_id, &bot.bot_id, self.purge_data)
            .await?;
        self.registry.remove(&bot.tenant_id, &bot.bot_id).await
    }

    // ========================================================================
    // Control
    // ========================================================================

    /// Stops a bot's container but keeps its record and artifacts.
    ///
    /// # Errors
    /// `UnknownBot`, `ConflictingState` unless the bot is `running`, `error`
    /// or `unknown`, and runtime errors.
    pub async fn stop_bot(
        &self,
        tenant_id: &str,
        bot_id: &str,
    ) -> Result<BotInstance, OrchestratorError> {
        {
            let _guard = self.locks.acquire(bot_id).await;
            let bot = self.current(tenant_id, bot_id).await?;
            if !matches!(
                bot.status,
                BotStatus::Running | BotStatus::Error | BotStatus::Unknown
            ) {
                return Err(conflict(&bot, "stop"));
            }
            self.transition(&bot, StatusUpdate::new(BotStatus::Stopping), "stop")
                .await?;
        }

        if let Err(e) = self.lifecycle.stop(bot_id).await {
            self.mark_error(tenant_id, bot_id, &e).await;
            return Err(e);
        }

        let _guard = self.locks.acquire(bot_id).await;
        let bot = self.current(tenant_id, bot_id).await?;
        let stopped = self
            .transition(
                &bot,
                StatusUpdate::new(BotStatus::Stopped).runtime_handle(None),
                "stop",
            )
            .await?;
        self.ports.release(stopped.exposed_port);

        info!(tenant_id = %tenant_id, bot_id = %bot_id, "Bot stopped");
        Ok(stopped)
    }

    /// Starts a `stopped` or `error` bot from its existing artifacts,
    /// preferring the port it held before.
    ///
    /// # Errors
    /// `UnknownBot`, `ConflictingState`, `ResourceExhausted`, `ArtifactWrite`
    /// when the config artifact is missing, and runtime errors.
    pub async fn start_bot(
        &self,
        tenant_id: &str,
        bot_id: &str,
    ) -> Result<BotInstance, OrchestratorError> {
        let record = {
            let _guard = self.locks.acquire(bot_id).await;
            let bot = self.current(tenant_id, bot_id).await?;
            if !matches!(bot.status, BotStatus::Stopped | BotStatus::Error) {
                return Err(conflict(&bot, "start"));
            }
            self.mark_creating(&bot, "start").await?
        };

        let artifacts = self.materializer.paths(tenant_id, bot_id)?;
        let outcome = match tokio::fs::metadata(&artifacts.config_path).await {
            Ok(_) => {
                self.lifecycle
                    .start(tenant_id, &artifacts, record.exposed_port)
                    .await
            }
            Err(source) => Err(OrchestratorError::ArtifactWrite {
                path: artifacts.config_path.clone(),
                source,
            }),
        };

        self.finish_launch(&record, outcome).await
    }

    /// Stops the bot if it is running, then starts it again.
    ///
    /// # Errors
    /// As [`Orchestrator::stop_bot`] and [`Orchestrator::start_bot`].
    pub async fn restart_bot(
        &self,
        tenant_id: &str,
        bot_id: &str,
    ) -> Result<BotInstance, OrchestratorError> {
        let bot = self.current(tenant_id, bot_id).await?;
        if matches!(bot.status, BotStatus::Running | BotStatus::Unknown) {
            self.stop_bot(tenant_id, bot_id).await?;
        }
        self.start_bot(tenant_id, bot_id).await
    }

    /// Moves records stranded in `creating` or `stopping` by a previous
    /// process to `error`. Returns how many were moved.
    ///
    /// # Errors
    /// Registry failures.
    pub async fn recover(&self) -> Result<usize, OrchestratorError> {
        let stranded = self
            .registry
            .list_by_status(&[BotStatus::Creating, BotStatus::Stopping])
            .await?;

        let mut recovered = 0;
        for bot in stranded {
            let _guard = self.locks.acquire(&bot.bot_id).await;
            let reason = format!("interrupted while {}", bot.status);
            match self
                .transition(&bot, StatusUpdate::new(BotStatus::Error).reason(reason), "recover")
                .await
            {
                Ok(_) => {
                    warn!(tenant_id = %bot.tenant_id, bot_id = %bot.bot_id, from = %bot.status, "Recovered stranded bot");
                    recovered += 1;
                }
                Err(e) => {
                    warn!(bot_id = %bot.bot_id, error = %e, "Failed to recover stranded bot");
                }
            }
        }
        Ok(recovered)
    }

    // ========================================================================
    // Observation
    // ========================================================================

    /// Registry record of a bot.
    ///
    /// # Errors
    /// `UnknownBot` when the tenant has no such bot.
    pub async fn get_bot(
        &self,
        tenant_id: &str,
        bot_id: &str,
    ) -> Result<BotInstance, OrchestratorError> {
        self.current(tenant_id, bot_id).await
    }

    /// A tenant's bots, ordered by creation time.
    ///
    /// # Errors
    /// Registry failures.
    pub async fn list_bots(
        &self,
        tenant_id: &str,
        skip: usize,
        limit: usize,
    ) -> Result<Vec<BotInstance>, OrchestratorError> {
        self.registry.list_by_tenant(tenant_id, skip, limit).await
    }

    /// Live runtime state of a bot's container.
    ///
    /// A `running` record whose container is gone or no longer running is
    /// moved to `error`.
    ///
    /// # Errors
    /// `UnknownBot` without a record, `NotFound` without a container,
    /// runtime failures otherwise.
    pub async fn get_status(
        &self,
        tenant_id: &str,
        bot_id: &str,
    ) -> Result<StatusSnapshot, OrchestratorError> {
        let bot = self.current(tenant_id, bot_id).await?;
        match self.lifecycle.status(bot_id).await {
            Ok(snapshot) => {
                if bot.status == BotStatus::Running && snapshot.state != ContainerState::Running {
                    self.record_drift(tenant_id, bot_id, format!("container is {}", snapshot.state))
                        .await;
                }
                Ok(snapshot)
            }
            Err(OrchestratorError::NotFound(what)) => {
                if bot.status == BotStatus::Running {
                    self.record_drift(tenant_id, bot_id, "container is missing".to_string())
                        .await;
                }
                Err(OrchestratorError::NotFound(what))
            }
            Err(e) => Err(e),
        }
    }

    /// Last `tail` lines of a bot's output; `None` when it has no container.
    ///
    /// # Errors
    /// `UnknownBot` without a record, runtime failures otherwise.
    pub async fn get_logs(
        &self,
        tenant_id: &str,
        bot_id: &str,
        tail: Option<usize>,
    ) -> Result<Option<String>, OrchestratorError> {
        self.current(tenant_id, bot_id).await?;
        self.logs.logs(bot_id, tail).await
    }

    /// Follows a bot's output; `None` when it has no container.
    ///
    /// # Errors
    /// `UnknownBot` without a record, runtime failures otherwise.
    pub async fn follow_logs(
        &self,
        tenant_id: &str,
        bot_id: &str,
        tail: Option<usize>,
    ) -> Result<Option<LogStream>, OrchestratorError> {
        self.current(tenant_id, bot_id).await?;
        self.logs.follow(bot_id, tail).await
    }

    /// Resolves a requested log line count against the configured bounds.
    #[must_use]
    pub fn effective_tail(&self, requested: Option<usize>) -> usize {
        self.logs.effective_tail(requested)
    }

    // ========================================================================
    // Internals
    // ========================================================================

    async fn current(
        &self,
        tenant_id: &str,
        bot_id: &str,
    ) -> Result<BotInstance, OrchestratorError> {
        self.registry
            .get(tenant_id, bot_id)
            .await?
            .ok_or_else(|| OrchestratorError::UnknownBot(bot_id.to_string()))
    }

    async fn transition(
        &self,
        bot: &BotInstance,
        update: StatusUpdate,
        attempted: &str,
    ) -> Result<BotInstance, OrchestratorError> {
        if !bot.status.can_transition_to(update.status) {
            return Err(conflict(bot, attempted));
        }
        let to = update.status;
        let updated = self
            .registry
            .update_status(&bot.tenant_id, &bot.bot_id, update)
            .await?
            .ok_or_else(|| OrchestratorError::UnknownBot(bot.bot_id.clone()))?;
        debug!(bot_id = %bot.bot_id, from = %bot.status, to = %to, "Status transition");
        Ok(updated)
    }

    /// Moves an `error`/`stopped` bot back to `creating`. A stopped bot gave its
    /// port back, so it gets its old one again if still free.
    async fn mark_creating(
        &self,
        bot: &BotInstance,
        attempted: &str,
    ) -> Result<BotInstance, OrchestratorError> {
        let lease = if bot.status.holds_port() {
            None
        } else {
            Some(self.ports.allocate_preferring(Some(bot.exposed_port)).await?)
        };
        let port = lease.as_ref().map_or(bot.exposed_port, PortLease::port);

        let updated = self
            .transition(
                bot,
                StatusUpdate::new(BotStatus::Creating)
                    .port(port)
                    .image(self.lifecycle.settings().image.clone())
                    .runtime_handle(None),
                attempted,
            )
            .await?;
        drop(lease);
        Ok(updated)
    }

    async fn finish_launch(
        &self,
        record: &BotInstance,
        outcome: Result<String, OrchestratorError>,
    ) -> Result<BotInstance, OrchestratorError> {
        let _guard = self.locks.acquire(&record.bot_id).await;
        let current = self.current(&record.tenant_id, &record.bot_id).await?;

        match outcome {
            Ok(container_id) => {
                let bot = self
                    .transition(
                        &current,
                        StatusUpdate::new(BotStatus::Running).runtime_handle(Some(container_id)),
                        "mark running",
                    )
                    .await?;
                info!(
                    tenant_id = %bot.tenant_id,
                    bot_id = %bot.bot_id,
                    port = bot.exposed_port,
                    "Bot running"
                );
                Ok(bot)
            }
            Err(e) => {
                error!(tenant_id = %record.tenant_id, bot_id = %record.bot_id, error = %e, "Bot failed to start");
                if let Err(update_err) = self
                    .transition(
                        &current,
                        StatusUpdate::new(BotStatus::Error).reason(e.to_string()),
                        "mark error",
                    )
                    .await
                {
                    warn!(bot_id = %record.bot_id, error = %update_err, "Failed to record start failure");
                }
                Err(e)
            }
        }
    }

    async fn mark_error(&self, tenant_id: &str, bot_id: &str, cause: &OrchestratorError) {
        let _guard = self.locks.acquire(bot_id).await;
        let result = match self.current(tenant_id, bot_id).await {
            Ok(bot) => {
                self.transition(
                    &bot,
                    StatusUpdate::new(BotStatus::Error).reason(cause.to_string()),
                    "mark error",
                )
                .await
            }
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            warn!(bot_id = %bot_id, error = %e, "Failed to record error status");
        }
    }

    async fn record_drift(&self, tenant_id: &str, bot_id: &str, reason: String) {
        let _guard = self.locks.acquire(bot_id).await;
        match self.current(tenant_id, bot_id).await {
            Ok(bot) if bot.status == BotStatus::Running => {
                warn!(tenant_id = %tenant_id, bot_id = %bot_id, reason = %reason, "Runtime drift detected");
                if let Err(e) = self
                    .transition(
                        &bot,
                        StatusUpdate::new(BotStatus::Error).reason(reason),
                        "record drift",
                    )
                    .await
                {
                    warn!(bot_id = %bot_id, error = %e, "Failed to record drift");
                }
            }
            Ok(_) => {}
            Err(e) => warn!(bot_id = %bot_id, error = %e, "Failed to re-read bot for drift"),
        }
    }
}
