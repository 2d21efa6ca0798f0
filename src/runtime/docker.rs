//! Docker backend built on `bollard`.

use super::{ContainerInfo, ContainerRuntime, ContainerSpec, LogStream};
use crate::error::OrchestratorError;
use crate::models::{ContainerState, PortMapping};
use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, LogsOptions, RemoveContainerOptions,
    StopContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::image::CreateImageOptions;
use bollard::models::{HostConfig, PortBinding as DockerPortBinding, PortMap};
use futures::StreamExt;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const LOG_CHANNEL_CAPACITY: usize = 256;

/// Container runtime backed by the local Docker daemon.
#[derive(Debug, Clone)]
pub struct DockerRuntime {
    docker: Docker,
    pull_images: bool,
}

impl DockerRuntime {
    /// Connects using the platform defaults (`DOCKER_HOST` or the local socket).
    ///
    /// The connection is lazy; call [`ContainerRuntime::ping`] to verify it.
    ///
    /// # Errors
    /// Returns `RuntimeUnavailable` if the client cannot be configured.
    pub fn connect(pull_images: bool) -> Result<Self, OrchestratorError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| OrchestratorError::RuntimeUnavailable(e.to_string()))?;
        Ok(Self {
            docker,
            pull_images,
        })
    }

    async fn pull(&self, image: &str) -> Result<(), OrchestratorError> {
        info!(image = %image, "Pulling worker image");
        let options = CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        };
        let mut progress = self.docker.create_image(Some(options), None, None);
        while let Some(item) = progress.next().await {
            if let Err(e) = item {
                return Err(match map_error(e, "pull image") {
                    OrchestratorError::NotFound(_) => {
                        OrchestratorError::ImageNotFound(image.to_string())
                    }
                    other => other,
                });
            }
        }
        info!(image = %image, "Worker image pulled");
        Ok(())
    }
}

/// Translates a bollard error into the orchestrator taxonomy.
///
/// A response from the daemon means it is reachable, so only transport
/// failures become `RuntimeUnavailable`.
fn map_error(err: DockerError, operation: &str) -> OrchestratorError {
    match err {
        DockerError::DockerResponseServerError {
            status_code: 404,
            message,
        } => OrchestratorError::NotFound(message),
        DockerError::DockerResponseServerError {
            status_code,
            message,
        } => OrchestratorError::Runtime(format!(
            "{} failed ({}): {}",
            operation, status_code, message
        )),
        other => OrchestratorError::RuntimeUnavailable(format!("{}: {}", operation, other)),
    }
}

fn port_mappings(ports: PortMap) -> Vec<PortMapping> {
    let mut mappings: Vec<PortMapping> = ports
        .into_iter()
        .flat_map(|(container_port, bindings)| {
            let bindings = bindings.unwrap_or_default();
            if bindings.is_empty() {
                vec![PortMapping {
                    container_port,
                    host_ip: None,
                    host_port: None,
                }]
            } else {
                bindings
                    .into_iter()
                    .map(|b| PortMapping {
                        container_port: container_port.clone(),
                        host_ip: b.host_ip.filter(|ip| !ip.is_empty()),
                        host_port: b.host_port.and_then(|p| p.parse().ok()),
                    })
                    .collect()
            }
        })
        .collect();
    mappings.sort_by(|a, b| {
        a.container_port
            .cmp(&b.container_port)
            .then_with(|| a.host_ip.cmp(&b.host_ip))
    });
    mappings
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    fn name(&self) -> &'static str {
        "docker"
    }

    async fn ping(&self) -> Result<(), OrchestratorError> {
        self.docker
            .ping()
            .await
            .map(|_| ())
            .map_err(|e| OrchestratorError::RuntimeUnavailable(e.to_string()))
    }

    async fn ensure_image(&self, image: &str) -> Result<(), OrchestratorError> {
        match self.docker.inspect_image(image).await {
            Ok(_) => Ok(()),
            Err(e) => match map_error(e, "inspect image") {
                OrchestratorError::NotFound(_) if self.pull_images => self.pull(image).await,
                OrchestratorError::NotFound(_) => {
                    Err(OrchestratorError::ImageNotFound(image.to_string()))
                }
                other => Err(other),
            },
        }
    }

    async fn inspect(&self, name: &str) -> Result<Option<ContainerInfo>, OrchestratorError> {
        let response = match self
            .docker
            .inspect_container(name, None::<InspectContainerOptions>)
            .await
        {
            Ok(response) => response,
            Err(e) => {
                return match map_error(e, "inspect container") {
                    OrchestratorError::NotFound(_) => Ok(None),
                    other => Err(other),
                };
            }
        };

        let (state, started_at) = match response.state {
            Some(state) => (
                state
                    .status
                    .map(|s| ContainerState::parse(&s.to_string()))
                    .unwrap_or(ContainerState::Unknown),
                state.started_at,
            ),
            None => (ContainerState::Unknown, None),
        };

        // Stopped containers report no live bindings; fall back to the declared ones.
        let live_ports = response
            .network_settings
            .and_then(|n| n.ports)
            .filter(|p| !p.is_empty());
        let ports = live_ports
            .or_else(|| response.host_config.and_then(|h| h.port_bindings))
            .map(port_mappings)
            .unwrap_or_default();

        Ok(Some(ContainerInfo {
            id: response.id.unwrap_or_default(),
            name: response
                .name
                .map(|n| n.trim_start_matches('/').to_string())
                .unwrap_or_else(|| name.to_string()),
            state,
            image: response
                .config
                .and_then(|c| c.image)
                .unwrap_or_default(),
            ports,
            started_at,
        }))
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<String, OrchestratorError> {
        let container_port = format!("{}/tcp", spec.port.container_port);

        let mut port_bindings: PortMap = HashMap::new();
        port_bindings.insert(
            container_port.clone(),
            Some(vec![DockerPortBinding {
                host_ip: Some("0.0.0.0".to_string()),
                host_port: Some(spec.port.host_port.to_string()),
            }]),
        );

        let mut exposed_ports = HashMap::new();
        exposed_ports.insert(container_port, HashMap::new());

        let host_config = HostConfig {
            binds: Some(spec.mounts.iter().map(|m| m.to_bind()).collect()),
            port_bindings: Some(port_bindings),
            memory: spec.memory_bytes,
            cpu_shares: spec.cpu_shares,
            ..Default::default()
        };

        let config = Config {
            image: Some(spec.image.clone()),
            cmd: Some(spec.command.clone()),
            env: if spec.env.is_empty() {
                None
            } else {
                Some(spec.env.clone())
            },
            labels: Some(spec.labels.clone()),
            exposed_ports: Some(exposed_ports),
            host_config: Some(host_config),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: spec.name.clone(),
            ..Default::default()
        };

        let response = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| match map_error(e, "create container") {
                OrchestratorError::NotFound(_) => OrchestratorError::ImageNotFound(spec.image.clone()),
                other => other,
            })?;

        for warning in &response.warnings {
            warn!(bot_id = %spec.name, warning = %warning, "Docker warning on create");
        }

        Ok(response.id)
    }

    async fn start(&self, name: &str) -> Result<(), OrchestratorError> {
        self.docker
            .start_container::<String>(name, None)
            .await
            .map_err(|e| map_error(e, "start container"))
    }

    async fn stop(&self, name: &str, grace: Duration) -> Result<bool, OrchestratorError> {
        let options = StopContainerOptions {
            t: grace.as_secs() as i64,
        };
        match self.docker.stop_container(name, Some(options)).await {
            Ok(()) => Ok(true),
            // 304: already stopped
            Err(DockerError::DockerResponseServerError {
                status_code: 304, ..
            }) => Ok(true),
            Err(e) => match map_error(e, "stop container") {
                OrchestratorError::NotFound(_) => Ok(false),
                other => Err(other),
            },
        }
    }

    async fn remove(&self, name: &str) -> Result<bool, OrchestratorError> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        match self.docker.remove_container(name, Some(options)).await {
            Ok(()) => Ok(true),
            Err(e) => match map_error(e, "remove container") {
                OrchestratorError::NotFound(_) => Ok(false),
                other => Err(other),
            },
        }
    }

    async fn logs(&self, name: &str, tail: usize) -> Result<Option<String>, OrchestratorError> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            tail: tail.to_string(),
            ..Default::default()
        };

        let mut stream = self.docker.logs(name, Some(options));
        let mut output = String::new();
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(log) => output.push_str(&String::from_utf8_lossy(&log.into_bytes())),
                Err(e) => {
                    return match map_error(e, "fetch logs") {
                        OrchestratorError::NotFound(_) => Ok(None),
                        other => Err(other),
                    };
                }
            }
        }
        Ok(Some(output))
    }

    async fn follow_logs(
        &self,
        name: &str,
        tail: usize,
    ) -> Result<Option<LogStream>, OrchestratorError> {
        if self.inspect(name).await?.is_none() {
            return Ok(None);
        }

        let docker = self.docker.clone();
        let container = name.to_string();
        let (tx, rx) = mpsc::channel(LOG_CHANNEL_CAPACITY);

        tokio::spawn(async move {
            let options = LogsOptions::<String> {
                follow: true,
                stdout: true,
                stderr: true,
                tail: tail.to_string(),
                ..Default::default()
            };
            let mut stream = docker.logs(&container, Some(options));
            while let Some(chunk) = stream.next().await {
                let item = chunk
                    .map(|log| String::from_utf8_lossy(&log.into_bytes()).into_owned())
                    .map_err(|e| map_error(e, "follow logs"));
                let failed = item.is_err();
                if tx.send(item).await.is_err() || failed {
                    break;
                }
            }
            debug!(bot_id = %container, "Log follower finished");
        });

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });
        Ok(Some(stream.boxed()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_error_not_found() {
        let err = map_error(
            DockerError::DockerResponseServerError {
                status_code: 404,
                message: "No such container: ft-acme-main".to_string(),
            },
            "inspect container",
        );
        assert!(err.is_not_found());
    }

    #[test]
    fn test_map_error_server_error_is_runtime() {
        let err = map_error(
            DockerError::DockerResponseServerError {
                status_code: 409,
                message: "Conflict. The container name is already in use".to_string(),
            },
            "create container",
        );
        assert!(matches!(err, OrchestratorError::Runtime(_)));
        assert!(err.to_string().contains("409"));
    }

    #[test]
    fn test_map_error_transport_is_unavailable() {
        let err = map_error(DockerError::RequestTimeoutError, "ping");
        assert!(matches!(err, OrchestratorError::RuntimeUnavailable(_)));
    }

    #[test]
    fn test_port_mappings() {
        let mut ports: PortMap = HashMap::new();
        ports.insert(
            "8080/tcp".to_string(),
            Some(vec![DockerPortBinding {
                host_ip: Some("0.0.0.0".to_string()),
                host_port: Some("8081".to_string()),
            }]),
        );
        ports.insert("9090/tcp".to_string(), None);

        let mappings = port_mappings(ports);
        assert_eq!(mappings.len(), 2);
        assert_eq!(mappings[0].container_port, "8080/tcp");
        assert_eq!(mappings[0].host_port, Some(8081));
        assert_eq!(mappings[1].host_port, None);
    }
}
