//! Renders bot configurations into worker artifacts on disk.
//!
//! Layout under the storage root:
//!
//! ```text
//! {root}/configs/{tenant_id}/{bot_id}/config.json
//! {root}/user_data/{tenant_id}/{bot_id}/{data,logs,strategies}/
//! ```

use crate::error::OrchestratorError;
use crate::models::{BotConfig, derive_bot_id, validate_tenant_id};
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};
use uuid::Uuid;

const CONFIG_FILE_NAME: &str = "config.json";
const DATA_SUBDIRS: [&str; 3] = ["data", "logs", "strategies"];

/// Host paths produced for one bot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotArtifacts {
    /// Canonical bot identifier.
    pub bot_id: String,
    /// Rendered config file.
    pub config_path: PathBuf,
    /// Data directory mounted read-write into the worker.
    pub data_dir: PathBuf,
}

/// Writes per-bot config files and data directories.
#[derive(Debug, Clone)]
pub struct ConfigMaterializer {
    root: PathBuf,
    service_port: u16,
}

impl ConfigMaterializer {
    /// Creates a materializer rooted at `root`.
    ///
    /// Relative roots are resolved against the working directory so that
    /// artifact paths can be bind-mounted.
    ///
    /// # Errors
    /// `ArtifactWrite` when the working directory cannot be determined.
    pub fn new(root: impl Into<PathBuf>, service_port: u16) -> Result<Self, OrchestratorError> {
        let root = root.into();
        let root = if root.is_absolute() {
            root
        } else {
            std::env::current_dir()
                .map_err(|source| OrchestratorError::ArtifactWrite {
                    path: root.clone(),
                    source,
                })?
                .join(root)
        };
        Ok(Self { root, service_port })
    }

    /// Storage root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Paths a bot's artifacts live at, whether or not they exist yet.
    ///
    /// # Errors
    /// `InvalidConfig` when the identifiers are not path-safe.
    pub fn paths(&self, tenant_id: &str, bot_id: &str) -> Result<BotArtifacts, OrchestratorError> {
        validate_tenant_id(tenant_id)?;
        let expected_prefix = format!("ft-{}-", tenant_id);
        let name = bot_id.strip_prefix(&expected_prefix).ok_or_else(|| {
            OrchestratorError::InvalidConfig(format!(
                "bot {} does not belong to tenant {}",
                bot_id, tenant_id
            ))
        })?;
        // Re-derive to validate the name part
        derive_bot_id(tenant_id, name)?;

        Ok(BotArtifacts {
            bot_id: bot_id.to_string(),
            config_path: self
                .root
                .join("configs")
                .join(tenant_id)
                .join(bot_id)
                .join(CONFIG_FILE_NAME),
            data_dir: self.root.join("user_data").join(tenant_id).join(bot_id),
        })
    }

    /// Renders `config` and writes it, creating the bot's data directory.
    ///
    /// The config file is replaced atomically; the data directory is kept if it
    /// already exists.
    ///
    /// # Errors
    /// `InvalidConfig` for an invalid configuration, `ArtifactWrite` on I/O failure.
    pub async fn materialize(
        &self,
        tenant_id: &str,
        config: &BotConfig,
    ) -> Result<BotArtifacts, OrchestratorError> {
        config.validate()?;
        let bot_id = derive_bot_id(tenant_id, &config.name)?;
        let artifacts = self.paths(tenant_id, &bot_id)?;

        for subdir in DATA_SUBDIRS {
            create_dir_all(&artifacts.data_dir.join(subdir)).await?;
        }

        let rendered = self.render(&bot_id, config);
        let body = serde_json::to_vec_pretty(&rendered).map_err(|e| {
            OrchestratorError::InvalidConfig(format!("config could not be serialized: {}", e))
        })?;
        write_atomic(&artifacts.config_path, &body).await?;

        info!(
            tenant_id = %tenant_id,
            bot_id = %bot_id,
            path = %artifacts.config_path.display(),
            "Config artifact written"
        );
        Ok(artifacts)
    }

    /// Builds the worker's `config.json` document.
    #[must_use]
    pub fn render(&self, bot_id: &str, config: &BotConfig) -> Value {
        let mut document = json!({
            "bot_name": bot_id,
            "max_open_trades": config.max_open_trades,
            "stake_currency": config.stake_currency,
            "stake_amount": config.stake_amount,
            "dry_run": config.dry_run,
            "strategy": config.strategy,
            "exchange": {
                "name": config.exchange_name,
                "key": config.api_key,
                "secret": config.api_secret,
                "pair_whitelist": config.pairs(),
                "ccxt_config": { "enableRateLimit": true },
                "ccxt_async_config": { "enableRateLimit": true },
            },
            "pairlists": [{ "method": "StaticPairList" }],
            "telegram": {
                "enabled": config.telegram_enabled,
                "token": config.telegram_token.clone().unwrap_or_default(),
                "chat_id": config.telegram_chat_id.clone().unwrap_or_default(),
            },
            "api_server": {
                "enabled": true,
                "listen_ip_address": "0.0.0.0",
                "listen_port": self.service_port,
                "username": bot_id,
                "password": Uuid::new_v4().simple().to_string(),
                "jwt_secret_key": Uuid::new_v4().simple().to_string(),
            },
        });

        if let (Some(timeframe), Some(object)) = (&config.timeframe, document.as_object_mut()) {
            object.insert("timeframe".to_string(), Value::String(timeframe.clone()));
        }

        document
    }

    /// Deletes a bot's config directory and, when `purge_data` is set, its data
    /// directory. Missing paths are not an error.
    ///
    /// # Errors
    /// `ArtifactWrite` on I/O failure.
    pub async fn remove(
        &self,
        tenant_id: &str,
        bot_id: &str,
        purge_data: bool,
    ) -> Result<(), OrchestratorError> {
        let artifacts = self.paths(tenant_id, bot_id)?;

        if let Some(config_dir) = artifacts.config_path.parent() {
            remove_dir_all(config_dir).await?;
        }
        if purge_data {
            remove_dir_all(&artifacts.data_dir).await?;
        }

        debug!(tenant_id = %tenant_id, bot_id = %bot_id, purge_data, "Artifacts removed");
        Ok(())
    }
}

async fn create_dir_all(path: &Path) -> Result<(), OrchestratorError> {
    fs::create_dir_all(path)
        .await
        .map_err(|source| OrchestratorError::ArtifactWrite {
            path: path.to_path_buf(),
            source,
        })
}

async fn remove_dir_all(path: &Path) -> Result<(), OrchestratorError> {
    match fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(OrchestratorError::ArtifactWrite {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Writes through a sibling temp file and renames it into place.
async fn write_atomic(path: &Path, body: &[u8]) -> Result<(), OrchestratorError> {
    let to_error = |source| OrchestratorError::ArtifactWrite {
        path: path.to_path_buf(),
        source,
    };

    let Some(dir) = path.parent() else {
        return Err(to_error(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "artifact path has no parent directory",
        )));
    };
    create_dir_all(dir).await?;

    let tmp = dir.join(format!(".{}.{}.tmp", CONFIG_FILE_NAME, Uuid::new_v4().simple()));
    if let Err(e) = fs::write(&tmp, body).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(to_error(e));
    }
    if let Err(e) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(to_error(e));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(name: &str) -> BotConfig {
        serde_json::from_value(json!({
            "name": name,
            "exchange_name": "binance",
            "api_key": "key",
            "api_secret": "secret",
            "stake_currency": "USDT",
            "stake_amount": 100.0,
        }))
        .unwrap()
    }

    fn materializer(dir: &tempfile::TempDir) -> ConfigMaterializer {
        ConfigMaterializer::new(dir.path(), 8080).unwrap()
    }

    #[tokio::test]
    async fn test_materialize_writes_namespaced_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let materializer = materializer(&dir);

        let artifacts = materializer.materialize("acme", &config("main")).await.unwrap();

        assert_eq!(artifacts.bot_id, "ft-acme-main");
        assert_eq!(
            artifacts.config_path,
            dir.path().join("configs/acme/ft-acme-main/config.json")
        );
        assert_eq!(
            artifacts.data_dir,
            dir.path().join("user_data/acme/ft-acme-main")
        );
        for subdir in DATA_SUBDIRS {
            assert!(artifacts.data_dir.join(subdir).is_dir());
        }

        let written: Value =
            serde_json::from_slice(&std::fs::read(&artifacts.config_path).unwrap()).unwrap();
        assert_eq!(written["stake_currency"], "USDT");
        assert_eq!(written["stake_amount"], 100.0);
        assert_eq!(written["exchange"]["name"], "binance");
        assert_eq!(written["exchange"]["pair_whitelist"][0], "BTC/USDT");
        assert_eq!(written["api_server"]["listen_port"], 8080);
        assert!(written.get("timeframe").is_none());
    }

    #[tokio::test]
    async fn test_materialize_is_idempotent_and_keeps_data() {
        let dir = tempfile::tempdir().unwrap();
        let materializer = materializer(&dir);

        let first = materializer.materialize("acme", &config("main")).await.unwrap();
        let marker = first.data_dir.join("data/trades.sqlite");
        std::fs::write(&marker, b"x").unwrap();

        let second = materializer.materialize("acme", &config("main")).await.unwrap();
        assert_eq!(first, second);
        assert!(marker.exists());
    }

    #[tokio::test]
    async fn test_tenants_never_share_paths() {
        let dir = tempfile::tempdir().unwrap();
        let materializer = materializer(&dir);

        let a = materializer.materialize("acme", &config("main")).await.unwrap();
        let b = materializer.materialize("beta", &config("main")).await.unwrap();
        assert_ne!(a.config_path, b.config_path);
        assert_ne!(a.data_dir, b.data_dir);

        let a_written: Value =
            serde_json::from_slice(&std::fs::read(&a.config_path).unwrap()).unwrap();
        assert_eq!(a_written["bot_name"], "ft-acme-main");
    }

    #[tokio::test]
    async fn test_materialize_rejects_invalid_config() {
        let dir = tempfile::tempdir().unwrap();
        let materializer = materializer(&dir);

        let mut bad = config("main");
        bad.stake_amount = -1.0;
        let err = materializer.materialize("acme", &bad).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidConfig(_)));
        assert!(!dir.path().join("configs").exists());
    }

    #[tokio::test]
    async fn test_materialize_reports_write_failure() {
        let dir = tempfile::tempdir().unwrap();
        // A file where the configs directory should be
        std::fs::write(dir.path().join("configs"), b"not a dir").unwrap();
        let materializer = materializer(&dir);

        let err = materializer.materialize("acme", &config("main")).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::ArtifactWrite { .. }));
    }

    #[tokio::test]
    async fn test_remove_keeps_data_unless_purged() {
        let dir = tempfile::tempdir().unwrap();
        let materializer = materializer(&dir);
        let artifacts = materializer.materialize("acme", &config("main")).await.unwrap();

        materializer.remove("acme", "ft-acme-main", false).await.unwrap();
        assert!(!artifacts.config_path.exists());
        assert!(artifacts.data_dir.exists());

        materializer.remove("acme", "ft-acme-main", true).await.unwrap();
        assert!(!artifacts.data_dir.exists());

        // Already gone
        materializer.remove("acme", "ft-acme-main", true).await.unwrap();
    }

    #[test]
    fn test_paths_reject_foreign_bot_id() {
        let dir = tempfile::tempdir().unwrap();
        let materializer = materializer(&dir);
        assert!(materializer.paths("acme", "ft-beta-main").is_err());
        assert!(materializer.paths("acme", "ft-acme-../x").is_err());
    }

    #[test]
    fn test_render_includes_timeframe_and_telegram() {
        let dir = tempfile::tempdir().unwrap();
        let materializer = materializer(&dir);
        let mut cfg = config("main");
        cfg.timeframe = Some("5m".to_string());
        cfg.telegram_enabled = true;
        cfg.telegram_token = Some("token".to_string());
        cfg.telegram_chat_id = Some("42".to_string());

        let rendered = materializer.render("ft-acme-main", &cfg);
        assert_eq!(rendered["timeframe"], "5m");
        assert_eq!(rendered["telegram"]["enabled"], true);
        assert_eq!(rendered["telegram"]["chat_id"], "42");
        assert_ne!(
            rendered["api_server"]["password"],
            materializer.render("ft-acme-main", &cfg)["api_server"]["password"]
        );
    }
}
