//! Configuration module for loading and parsing TOML configuration files.

use crate::models::Permission;
use crate::orchestrator::{LifecycleSettings, OrchestratorSettings};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Largest accepted worker memory limit, 1 TiB.
pub const MAX_MEMORY_LIMIT_MB: u64 = 1024 * 1024;

/// Configuration error types.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),
    /// Failed to parse TOML configuration.
    #[error("failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),
    /// Invalid configuration value.
    #[error("invalid config value: {0}")]
    InvalidValue(String),
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server configuration.
    pub server: ServerConfig,
    /// Registry database.
    pub database: DatabaseConfig,
    /// Container runtime.
    pub runtime: RuntimeConfig,
    /// Worker provisioning.
    pub orchestrator: OrchestratorConfig,
    /// Bootstrap API keys.
    pub auth: AuthConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host address to bind to.
    pub host: String,
    /// Port number to listen on.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

/// Registry database configuration. Without a URL the registry lives in memory.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// PostgreSQL connection string.
    pub url: Option<String>,
    /// Pool size.
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
        }
    }
}

/// Container backend selection.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeBackend {
    /// Local Docker daemon.
    Docker,
    /// In-process simulation.
    Memory,
}

/// Container runtime configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Backend to drive.
    pub backend: RuntimeBackend,
    /// Deadline for individual runtime calls, in seconds.
    pub call_timeout_secs: u64,
    /// Deadline for image pulls and container start, in seconds.
    pub start_timeout_secs: u64,
    /// Grace period before a stopping container is killed, in seconds.
    pub stop_grace_secs: u64,
    /// Pull missing images instead of failing with `ImageNotFound`.
    pub pull_images: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            backend: RuntimeBackend::Docker,
            call_timeout_secs: 10,
            start_timeout_secs: 120,
            stop_grace_secs: 10,
            pull_images: true,
        }
    }
}

/// Worker provisioning configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Worker image.
    pub image: String,
    /// Port the worker listens on inside its container.
    pub service_port: u16,
    /// First host port handed to workers.
    pub port_range_start: u16,
    /// End of the host port range (exclusive).
    pub port_range_end: u16,
    /// Root directory for config artifacts and data directories.
    pub storage_root: PathBuf,
    /// Where the config artifact is mounted inside the container.
    pub config_mount: String,
    /// Where the data directory is mounted inside the container.
    pub data_mount: String,
    /// Memory limit per worker, in MiB.
    pub memory_limit_mb: Option<u64>,
    /// Relative CPU weight per worker.
    pub cpu_shares: Option<i64>,
    /// Log lines returned when no tail is requested.
    pub default_log_tail: usize,
    /// Largest accepted tail.
    pub max_log_tail: usize,
    /// Delete data directories on deprovision.
    pub purge_data_on_deprovision: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        let settings = OrchestratorSettings::default();
        let lifecycle = settings.lifecycle;
        Self {
            image: lifecycle.image,
            service_port: lifecycle.service_port,
            port_range_start: settings.port_range.start,
            port_range_end: settings.port_range.end,
            storage_root: settings.storage_root,
            config_mount: lifecycle.config_mount,
            data_mount: lifecycle.data_mount,
            memory_limit_mb: None,
            cpu_shares: None,
            default_log_tail: settings.default_log_tail,
            max_log_tail: settings.max_log_tail,
            purge_data_on_deprovision: settings.purge_data_on_deprovision,
        }
    }
}

/// API key configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Keys registered at startup.
    pub keys: Vec<BootstrapKey>,
}

/// A key registered at startup.
#[derive(Debug, Clone, Deserialize)]
pub struct BootstrapKey {
    /// Tenant the key acts for.
    pub tenant_id: String,
    /// Human-readable name.
    pub name: String,
    /// Raw key value.
    pub key: String,
    /// Granted permissions.
    pub permissions: Vec<Permission>,
    /// Requests per minute.
    #[serde(default)]
    pub rate_limit: Option<u32>,
}

impl Config {
    /// Loads configuration from a TOML file.
    ///
    /// # Arguments
    /// * `path` - Path to the configuration file.
    ///
    /// # Errors
    /// Returns error if file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Loads `path` if it exists, otherwise starts from defaults, then applies
    /// `HOST`, `PORT` and `DATABASE_URL` from the environment.
    ///
    /// # Errors
    /// Returns error if the file exists but is invalid, or an override is malformed.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = if path.as_ref().exists() {
            Self::load(path)?
        } else {
            Self::default()
        };
        config.apply_overrides(
            std::env::var("HOST").ok(),
            std::env::var("PORT").ok(),
            std::env::var("DATABASE_URL").ok(),
        )?;
        config.validate()?;
        Ok(config)
    }

    /// Parses configuration from a TOML string.
    ///
    /// # Arguments
    /// * `content` - TOML content as string.
    ///
    /// # Errors
    /// Returns error if content cannot be parsed.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn apply_overrides(
        &mut self,
        host: Option<String>,
        port: Option<String>,
        database_url: Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(host) = host {
            self.server.host = host;
        }
        if let Some(port) = port {
            self.server.port = port
                .parse()
                .map_err(|_| ConfigError::InvalidValue(format!("PORT '{}' is not a valid port", port)))?;
        }
        if let Some(url) = database_url.filter(|u| !u.is_empty()) {
            self.database.url = Some(url);
        }
        Ok(())
    }

    /// Validates the configuration values.
    fn validate(&self) -> Result<(), ConfigError> {
        let orchestrator = &self.orchestrator;

        if orchestrator.port_range_start == 0
            || orchestrator.port_range_start >= orchestrator.port_range_end
        {
            return Err(ConfigError::InvalidValue(format!(
                "port range {}..{} must be non-empty and start above 0",
                orchestrator.port_range_start, orchestrator.port_range_end
            )));
        }
        if orchestrator.service_port == 0 {
            return Err(ConfigError::InvalidValue(
                "service_port must be non-zero".to_string(),
            ));
        }
        if orchestrator.image.trim().is_empty() {
            return Err(ConfigError::InvalidValue(
                "image cannot be empty".to_string(),
            ));
        }
        if let Some(mb) = orchestrator.memory_limit_mb
            && !(1..=MAX_MEMORY_LIMIT_MB).contains(&mb)
        {
            return Err(ConfigError::InvalidValue(format!(
                "memory_limit_mb {} must be between 1 and {}",
                mb, MAX_MEMORY_LIMIT_MB
            )));
        }
        if orchestrator.default_log_tail == 0
            || orchestrator.default_log_tail > orchestrator.max_log_tail
        {
            return Err(ConfigError::InvalidValue(format!(
                "default_log_tail {} must be between 1 and max_log_tail {}",
                orchestrator.default_log_tail, orchestrator.max_log_tail
            )));
        }

        for (name, secs) in [
            ("call_timeout_secs", self.runtime.call_timeout_secs),
            ("start_timeout_secs", self.runtime.start_timeout_secs),
        ] {
            if secs == 0 {
                return Err(ConfigError::InvalidValue(format!(
                    "{} must be positive",
                    name
                )));
            }
        }

        if self.database.max_connections == 0 {
            return Err(ConfigError::InvalidValue(
                "database max_connections must be positive".to_string(),
            ));
        }

        for key in &self.auth.keys {
            if key.key.len() < 16 {
                return Err(ConfigError::InvalidValue(format!(
                    "bootstrap key '{}' must be at least 16 characters",
                    key.name
                )));
            }
            if key.permissions.is_empty() {
                return Err(ConfigError::InvalidValue(format!(
                    "bootstrap key '{}' grants no permissions",
                    key.name
                )));
            }
            crate::models::validate_tenant_id(&key.tenant_id).map_err(|e| {
                ConfigError::InvalidValue(format!("bootstrap key '{}': {}", key.name, e))
            })?;
        }

        Ok(())
    }

    /// Orchestrator settings derived from this configuration.
    #[must_use]
    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        let orchestrator = &self.orchestrator;
        OrchestratorSettings {
            port_range: orchestrator.port_range_start..orchestrator.port_range_end,
            storage_root: orchestrator.storage_root.clone(),
            lifecycle: LifecycleSettings {
                image: orchestrator.image.clone(),
                service_port: orchestrator.service_port,
                config_mount: orchestrator.config_mount.clone(),
                data_mount: orchestrator.data_mount.clone(),
                memory_limit_mb: orchestrator.memory_limit_mb,
                cpu_shares: orchestrator.cpu_shares,
                call_timeout: Duration::from_secs(self.runtime.call_timeout_secs),
                start_timeout: Duration::from_secs(self.runtime.start_timeout_secs),
                stop_grace: Duration::from_secs(self.runtime.stop_grace_secs),
            },
            default_log_tail: orchestrator.default_log_tail,
            max_log_tail: orchestrator.max_log_tail,
            purge_data_on_deprovision: orchestrator.purge_data_on_deprovision,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config() {
        let toml_content = r#"
[server]
host = "127.0.0.1"
port = 3000

[database]
url = "postgres://localhost/bots"

[runtime]
backend = "memory"
call_timeout_secs = 5

[orchestrator]
image = "freqtradeorg/freqtrade:develop"
port_range_start = 9100
port_range_end = 9200
storage_root = "/srv/bots"
memory_limit_mb = 512

[[auth.keys]]
tenant_id = "acme"
name = "acme admin"
key = "acme-admin-key-0001"
permissions = ["admin"]
"#;

        let config = Config::parse(toml_content).expect("should parse");
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.database.url.as_deref(), Some("postgres://localhost/bots"));
        assert_eq!(config.database.max_connections, 10);
        assert_eq!(config.runtime.backend, RuntimeBackend::Memory);
        assert_eq!(config.runtime.start_timeout_secs, 120);
        assert_eq!(config.auth.keys.len(), 1);
        assert_eq!(config.auth.keys[0].permissions, vec![Permission::Admin]);

        let settings = config.orchestrator_settings();
        assert_eq!(settings.port_range, 9100..9200);
        assert_eq!(settings.storage_root, PathBuf::from("/srv/bots"));
        assert_eq!(settings.lifecycle.image, "freqtradeorg/freqtrade:develop");
        assert_eq!(settings.lifecycle.memory_limit_mb, Some(512));
        assert_eq!(settings.lifecycle.call_timeout, Duration::from_secs(5));
        assert_eq!(settings.lifecycle.service_port, 8080);
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::parse("").expect("should parse");
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.runtime.backend, RuntimeBackend::Docker);
        assert!(config.database.url.is_none());
        assert_eq!(config.orchestrator_settings().port_range, 8081..9000);
    }

    #[test]
    fn test_validation_empty_port_range() {
        let result = Config::parse(
            r#"
[orchestrator]
port_range_start = 9000
port_range_end = 9000
"#,
        );
        assert!(matches!(result, Err(ConfigError::InvalidValue(_))));
    }

    #[test]
    fn test_validation_tail_bounds() {
        let result = Config::parse(
            r#"
[orchestrator]
default_log_tail = 2000
max_log_tail = 1000
"#,
        );
        assert!(matches!(result, Err(ConfigError::InvalidValue(_))));
    }

    #[test]
    fn test_validation_memory_limit_bounds() {
        for mb in [0, MAX_MEMORY_LIMIT_MB + 1, u64::MAX] {
            let result = Config::parse(&format!("[orchestrator]\nmemory_limit_mb = {}\n", mb));
            assert!(matches!(result, Err(ConfigError::InvalidValue(_))), "{} accepted", mb);
        }

        let config = Config::parse(&format!(
            "[orchestrator]\nmemory_limit_mb = {}\n",
            MAX_MEMORY_LIMIT_MB
        ))
        .expect("upper bound is valid");
        assert_eq!(
            config.orchestrator_settings().lifecycle.memory_limit_mb,
            Some(MAX_MEMORY_LIMIT_MB)
        );
    }

    #[test]
    fn test_validation_zero_timeout() {
        let result = Config::parse("[runtime]\nstart_timeout_secs = 0\n");
        assert!(matches!(result, Err(ConfigError::InvalidValue(_))));
    }

    #[test]
    fn test_validation_bootstrap_key() {
        let short = r#"
[[auth.keys]]
tenant_id = "acme"
name = "short"
key = "abc"
permissions = ["read"]
"#;
        assert!(Config::parse(short).is_err());

        let bad_tenant = r#"
[[auth.keys]]
tenant_id = "Acme Corp"
name = "bad tenant"
key = "acme-admin-key-0001"
permissions = ["read"]
"#;
        assert!(Config::parse(bad_tenant).is_err());
    }

    #[test]
    fn test_unknown_backend_is_parse_error() {
        let result = Config::parse("[runtime]\nbackend = \"podman\"\n");
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_overrides() {
        let mut config = Config::default();
        config
            .apply_overrides(
                Some("127.0.0.1".to_string()),
                Some("9999".to_string()),
                Some("postgres://db/bots".to_string()),
            )
            .unwrap();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 9999);
        assert_eq!(config.database.url.as_deref(), Some("postgres://db/bots"));

        assert!(config.apply_overrides(None, Some("http".to_string()), None).is_err());
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = Config::load_or_default(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.orchestrator.image, "freqtradeorg/freqtrade:stable");
    }
}
