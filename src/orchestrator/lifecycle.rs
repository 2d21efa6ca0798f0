//! Container lifecycle: create, start, stop and inspect worker containers.

use super::materializer::BotArtifacts;
use super::with_timeout;
use crate::error::OrchestratorError;
use crate::models::{ContainerState, StatusSnapshot};
use crate::runtime::{ContainerRuntime, ContainerSpec, Mount, PortBinding};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Label marking containers managed by this service.
pub const MANAGED_LABEL: &str = "tradebot.managed";
/// Label carrying the owning tenant.
pub const TENANT_LABEL: &str = "tradebot.tenant";

/// Static parameters for every worker container.
#[derive(Debug, Clone)]
pub struct LifecycleSettings {
    /// Worker image.
    pub image: String,
    /// Port the worker's API listens on inside the container.
    pub service_port: u16,
    /// Mount point of the config artifact.
    pub config_mount: String,
    /// Mount point of the data directory.
    pub data_mount: String,
    /// Memory limit in MiB.
    pub memory_limit_mb: Option<u64>,
    /// Relative CPU weight.
    pub cpu_shares: Option<i64>,
    /// Deadline for short runtime calls (inspect, create, remove, logs).
    pub call_timeout: Duration,
    /// Deadline for image pulls and container starts.
    pub start_timeout: Duration,
    /// Time a worker gets to exit before it is killed.
    pub stop_grace: Duration,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            image: "freqtradeorg/freqtrade:stable".to_string(),
            service_port: 8080,
            config_mount: "/freqtrade/config.json".to_string(),
            data_mount: "/freqtrade/user_data".to_string(),
            memory_limit_mb: None,
            cpu_shares: None,
            call_timeout: Duration::from_secs(10),
            start_timeout: Duration::from_secs(120),
            stop_grace: Duration::from_secs(10),
        }
    }
}

/// Drives worker containers through a [`ContainerRuntime`].
pub struct LifecycleManager {
    runtime: Arc<dyn ContainerRuntime>,
    settings: LifecycleSettings,
}

impl LifecycleManager {
    /// Creates a manager over `runtime`.
    #[must_use]
    pub fn new(runtime: Arc<dyn ContainerRuntime>, settings: LifecycleSettings) -> Self {
        Self { runtime, settings }
    }

    /// Static container parameters.
    #[must_use]
    pub fn settings(&self) -> &LifecycleSettings {
        &self.settings
    }

    /// The underlying runtime.
    #[must_use]
    pub fn runtime(&self) -> &Arc<dyn ContainerRuntime> {
        &self.runtime
    }

    /// Builds the container spec for a bot.
    #[must_use]
    pub fn container_spec(
        &self,
        tenant_id: &str,
        artifacts: &BotArtifacts,
        host_port: u16,
    ) -> ContainerSpec {
        let mut labels = HashMap::new();
        labels.insert(MANAGED_LABEL.to_string(), "true".to_string());
        labels.insert(TENANT_LABEL.to_string(), tenant_id.to_string());

        ContainerSpec {
            name: artifacts.bot_id.clone(),
            image: self.settings.image.clone(),
            command: vec![
                "trade".to_string(),
                "--config".to_string(),
                self.settings.config_mount.clone(),
            ],
            env: Vec::new(),
            mounts: vec![
                Mount {
                    host_path: artifacts.data_dir.clone(),
                    container_path: self.settings.data_mount.clone(),
                    read_only: false,
                },
                Mount {
                    host_path: artifacts.config_path.clone(),
                    container_path: self.settings.config_mount.clone(),
                    read_only: true,
                },
            ],
            port: PortBinding {
                container_port: self.settings.service_port,
                host_port,
            },
            labels,
            memory_bytes: self
                .settings
                .memory_limit_mb
                .and_then(|mb| mb.checked_mul(1024 * 1024))
                .and_then(|bytes| i64::try_from(bytes).ok()),
            cpu_shares: self.settings.cpu_shares,
        }
    }

    /// Starts a worker for `artifacts` on `host_port` and returns its container id.
    ///
    /// A container left behind under the same name is stopped and removed
    /// first. The start only succeeds once the runtime reports the container
    /// as running.
    ///
    /// # Errors
    /// Typed runtime errors; `Timeout` when any step exceeds its deadline.
    pub async fn start(
        &self,
        tenant_id: &str,
        artifacts: &BotArtifacts,
        host_port: u16,
    ) -> Result<String, OrchestratorError> {
        let name = artifacts.bot_id.as_str();

        let stale = with_timeout(
            "inspect_container",
            self.settings.call_timeout,
            self.runtime.inspect(name),
        )
        .await?;
        if let Some(stale) = stale {
            warn!(
                bot_id = %name,
                container_id = %stale.id,
                state = %stale.state,
                "Stale container found, removing before start"
            );
            self.stop(name).await?;
        }

        with_timeout(
            "pull_image",
            self.settings.start_timeout,
            self.runtime.ensure_image(&self.settings.image),
        )
        .await?;

        let spec = self.container_spec(tenant_id, artifacts, host_port);
        let container_id = with_timeout(
            "create_container",
            self.settings.call_timeout,
            self.runtime.create(&spec),
        )
        .await?;

        let started = with_timeout(
            "start_container",
            self.settings.start_timeout,
            self.runtime.start(name),
        )
        .await;
        let confirmed = match started {
            Ok(()) => self.confirm_running(name).await,
            Err(e) => Err(e),
        };

        if let Err(e) = confirmed {
            // Do not leave a half-started container holding the name or port
            if let Err(cleanup) = with_timeout(
                "remove_container",
                self.settings.call_timeout,
                self.runtime.remove(name),
            )
            .await
            {
                warn!(bot_id = %name, error = %cleanup, "Failed to remove container after failed start");
            }
            return Err(e);
        }

        info!(
            bot_id = %name,
            container_id = %container_id,
            host_port,
            "Worker container started"
        );
        Ok(container_id)
    }

    async fn confirm_running(&self, name: &str) -> Result<(), OrchestratorError> {
        let info = with_timeout(
            "inspect_container",
            self.settings.call_timeout,
            self.runtime.inspect(name),
        )
        .await?;
        match info {
            Some(info) if info.state == ContainerState::Running => Ok(()),
            Some(info) => Err(OrchestratorError::Runtime(format!(
                "container {} is {} after start",
                name, info.state
            ))),
            None => Err(OrchestratorError::NotFound(format!(
                "container {} vanished after start",
                name
            ))),
        }
    }

    /// Stops and removes the named container.
    ///
    /// Returns `false` when no container exists; that is not an error.
    ///
    /// # Errors
    /// Typed runtime errors; `Timeout` when a step exceeds its deadline.
    pub async fn stop(&self, bot_id: &str) -> Result<bool, OrchestratorError> {
        let stopped = with_timeout(
            "stop_container",
            self.settings.stop_grace + self.settings.call_timeout,
            self.runtime.stop(bot_id, self.settings.stop_grace),
        )
        .await?;
        let removed = with_timeout(
            "remove_container",
            self.settings.call_timeout,
            self.runtime.remove(bot_id),
        )
        .await?;

        if stopped || removed {
            info!(bot_id = %bot_id, "Worker container stopped and removed");
        }
        Ok(stopped || removed)
    }

    /// Runtime state of the named container.
    ///
    /// # Errors
    /// `NotFound` when no such container exists, distinct from runtime failures.
    pub async fn status(&self, bot_id: &str) -> Result<StatusSnapshot, OrchestratorError> {
        with_timeout(
            "inspect_container",
            self.settings.call_timeout,
            self.runtime.inspect(bot_id),
        )
        .await?
        .map(|info| info.into_snapshot())
        .ok_or_else(|| OrchestratorError::NotFound(format!("no container named {}", bot_id)))
    }
}
