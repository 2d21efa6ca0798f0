//! Container runtime abstraction.
//!
//! The lifecycle manager talks to containers only through [`ContainerRuntime`],
//! addressing them by name. [`DockerRuntime`] drives a real Docker daemon;
//! [`MemoryRuntime`] simulates one in-process.

mod docker;
mod memory;

pub use docker::DockerRuntime;
pub use memory::MemoryRuntime;

use crate::error::OrchestratorError;
use crate::models::{ContainerState, PortMapping, StatusSnapshot};
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Stream of log chunks from a container. Ends when the container stops.
pub type LogStream = BoxStream<'static, Result<String, OrchestratorError>>;

/// Host path mounted into a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    /// Absolute path on the host.
    pub host_path: PathBuf,
    /// Mount point inside the container.
    pub container_path: String,
    /// Mount read-only.
    pub read_only: bool,
}

impl Mount {
    /// Renders the mount in Docker `binds` syntax.
    #[must_use]
    pub fn to_bind(&self) -> String {
        let mode = if self.read_only { "ro" } else { "rw" };
        format!(
            "{}:{}:{}",
            self.host_path.display(),
            self.container_path,
            mode
        )
    }
}

/// Container-to-host port publication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortBinding {
    /// TCP port the service listens on inside the container.
    pub container_port: u16,
    /// Host port it is published on.
    pub host_port: u16,
}

/// Everything needed to create a worker container.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerSpec {
    /// Container name (the bot id).
    pub name: String,
    /// Image reference.
    pub image: String,
    /// Command arguments.
    pub command: Vec<String>,
    /// Environment as `KEY=value` pairs.
    pub env: Vec<String>,
    /// Volume mounts.
    pub mounts: Vec<Mount>,
    /// Published port.
    pub port: PortBinding,
    /// Labels attached to the container.
    pub labels: HashMap<String, String>,
    /// Memory limit in bytes.
    pub memory_bytes: Option<i64>,
    /// Relative CPU weight.
    pub cpu_shares: Option<i64>,
}

/// What the runtime reports about an existing container.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerInfo {
    /// Runtime-assigned id.
    pub id: String,
    /// Container name.
    pub name: String,
    /// Current state.
    pub state: ContainerState,
    /// Image reference.
    pub image: String,
    /// Port bindings.
    pub ports: Vec<PortMapping>,
    /// Start timestamp.
    pub started_at: Option<String>,
}

impl ContainerInfo {
    /// Converts the runtime view into the snapshot returned to callers.
    #[must_use]
    pub fn into_snapshot(self) -> StatusSnapshot {
        StatusSnapshot {
            bot_id: self.name,
            container_id: self.id,
            state: self.state,
            image: self.image,
            ports: self.ports,
            started_at: self.started_at,
        }
    }
}

/// Operations the orchestrator needs from a container backend.
///
/// Methods returning `Option` or `bool` use `None`/`false` for "no such
/// container"; errors are reserved for failures talking to the backend.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Short backend name, reported by the health endpoint.
    fn name(&self) -> &'static str;

    /// Checks that the backend is reachable.
    async fn ping(&self) -> Result<(), OrchestratorError>;

    /// Makes sure `image` is present locally, pulling it when allowed.
    async fn ensure_image(&self, image: &str) -> Result<(), OrchestratorError>;

    /// Looks up a container by name.
    async fn inspect(&self, name: &str) -> Result<Option<ContainerInfo>, OrchestratorError>;

    /// Creates a container; returns its id.
    async fn create(&self, spec: &ContainerSpec) -> Result<String, OrchestratorError>;

    /// Starts a created container.
    async fn start(&self, name: &str) -> Result<(), OrchestratorError>;

    /// Stops a container, waiting up to `grace` before killing it.
    /// Returns `false` when no such container exists.
    async fn stop(&self, name: &str, grace: Duration) -> Result<bool, OrchestratorError>;

    /// Force-removes a container. Returns `false` when no such container exists.
    async fn remove(&self, name: &str) -> Result<bool, OrchestratorError>;

    /// Last `tail` lines of combined stdout/stderr, `None` when the container is absent.
    async fn logs(&self, name: &str, tail: usize) -> Result<Option<String>, OrchestratorError>;

    /// Follows the container output starting with the last `tail` lines.
    async fn follow_logs(
        &self,
        name: &str,
        tail: usize,
    ) -> Result<Option<LogStream>, OrchestratorError>;
}
