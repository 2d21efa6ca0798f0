//! In-process container runtime.
//!
//! Simulates the subset of Docker behaviour the orchestrator relies on:
//! unique container names, exclusive host ports, stop/remove idempotence and
//! combined log output. Failure knobs let tests exercise error paths.

use super::{ContainerInfo, ContainerRuntime, ContainerSpec, LogStream};
use crate::error::OrchestratorError;
use crate::models::{ContainerState, PortMapping};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;
use uuid::Uuid;

const LOG_BROADCAST_CAPACITY: usize = 1024;

#[derive(Debug)]
struct SimContainer {
    id: String,
    spec: ContainerSpec,
    state: ContainerState,
    started_at: Option<String>,
    logs: Vec<String>,
    log_tx: broadcast::Sender<String>,
}

impl SimContainer {
    fn push_log(&mut self, line: impl Into<String>) {
        let line = line.into();
        // No receivers is fine
        let _ = self.log_tx.send(line.clone());
        self.logs.push(line);
    }

    fn info(&self) -> ContainerInfo {
        let host_port = match self.state {
            ContainerState::Running | ContainerState::Paused | ContainerState::Restarting => {
                Some(self.spec.port.host_port)
            }
            _ => None,
        };
        ContainerInfo {
            id: self.id.clone(),
            name: self.spec.name.clone(),
            state: self.state,
            image: self.spec.image.clone(),
            ports: vec![PortMapping {
                container_port: format!("{}/tcp", self.spec.port.container_port),
                host_ip: host_port.map(|_| "0.0.0.0".to_string()),
                host_port,
            }],
            started_at: self.started_at.clone(),
        }
    }
}

/// Container runtime that keeps simulated containers in memory.
#[derive(Debug)]
pub struct MemoryRuntime {
    containers: DashMap<String, SimContainer>,
    images: RwLock<HashSet<String>>,
    allow_any_image: AtomicBool,
    available: AtomicBool,
    fail_start: AtomicBool,
    start_delay: Mutex<Option<Duration>>,
    stop_delay: Mutex<Option<Duration>>,
}

impl Default for MemoryRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRuntime {
    /// Creates a runtime where every image is considered present.
    #[must_use]
    pub fn new() -> Self {
        Self {
            containers: DashMap::new(),
            images: RwLock::new(HashSet::new()),
            allow_any_image: AtomicBool::new(true),
            available: AtomicBool::new(true),
            fail_start: AtomicBool::new(false),
            start_delay: Mutex::new(None),
            stop_delay: Mutex::new(None),
        }
    }

    /// Restricts the runtime to the given images; others are `ImageNotFound`.
    #[must_use]
    pub fn with_images<I, S>(self, images: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.images
            .write()
            .extend(images.into_iter().map(Into::into));
        self.allow_any_image.store(false, Ordering::SeqCst);
        self
    }

    /// Simulates the daemon going away (or coming back).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Makes every subsequent start fail with a runtime error.
    pub fn set_fail_start(&self, fail: bool) {
        self.fail_start.store(fail, Ordering::SeqCst);
    }

    /// Delays every start by `delay`.
    pub fn set_start_delay(&self, delay: Option<Duration>) {
        *self.start_delay.lock() = delay;
    }

    /// Delays every `stop` call, like a worker slow to exit.
    pub fn set_stop_delay(&self, delay: Option<Duration>) {
        *self.stop_delay.lock() = delay;
    }

    /// Marks a running container as exited, as if the worker crashed.
    pub fn kill(&self, name: &str) -> bool {
        match self.containers.get_mut(name) {
            Some(mut container) => {
                container.state = ContainerState::Exited;
                container.push_log("worker exited with code 1");
                true
            }
            None => false,
        }
    }

    /// Appends a line to a container's output.
    pub fn push_log(&self, name: &str, line: &str) -> bool {
        match self.containers.get_mut(name) {
            Some(mut container) => {
                container.push_log(line);
                true
            }
            None => false,
        }
    }

    /// Number of containers, in any state.
    #[must_use]
    pub fn container_count(&self) -> usize {
        self.containers.len()
    }

    /// Names of running containers.
    #[must_use]
    pub fn running(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .containers
            .iter()
            .filter(|c| c.state == ContainerState::Running)
            .map(|c| c.key().clone())
            .collect();
        names.sort();
        names
    }

    fn check_available(&self) -> Result<(), OrchestratorError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(OrchestratorError::RuntimeUnavailable(
                "memory runtime is offline".to_string(),
            ))
        }
    }

    fn has_image(&self, image: &str) -> bool {
        self.allow_any_image.load(Ordering::SeqCst) || self.images.read().contains(image)
    }
}

#[async_trait]
impl ContainerRuntime for MemoryRuntime {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn ping(&self) -> Result<(), OrchestratorError> {
        self.check_available()
    }

    async fn ensure_image(&self, image: &str) -> Result<(), OrchestratorError> {
        self.check_available()?;
        if self.has_image(image) {
            Ok(())
        } else {
            Err(OrchestratorError::ImageNotFound(image.to_string()))
        }
    }

    async fn inspect(&self, name: &str) -> Result<Option<ContainerInfo>, OrchestratorError> {
        self.check_available()?;
        Ok(self.containers.get(name).map(|c| c.info()))
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<String, OrchestratorError> {
        self.check_available()?;
        if !self.has_image(&spec.image) {
            return Err(OrchestratorError::ImageNotFound(spec.image.clone()));
        }

        let id = Uuid::new_v4().simple().to_string();
        match self.containers.entry(spec.name.clone()) {
            Entry::Occupied(_) => Err(OrchestratorError::Runtime(format!(
                "create container failed (409): the container name \"/{}\" is already in use",
                spec.name
            ))),
            Entry::Vacant(slot) => {
                let (log_tx, _) = broadcast::channel(LOG_BROADCAST_CAPACITY);
                slot.insert(SimContainer {
                    id: id.clone(),
                    spec: spec.clone(),
                    state: ContainerState::Created,
                    started_at: None,
                    logs: Vec::new(),
                    log_tx,
                });
                Ok(id)
            }
        }
    }

    async fn start(&self, name: &str) -> Result<(), OrchestratorError> {
        self.check_available()?;

        let delay = *self.start_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.fail_start.load(Ordering::SeqCst) {
            return Err(OrchestratorError::Runtime(format!(
                "start container failed (500): simulated failure for {}",
                name
            )));
        }

        let Some(host_port) = self.containers.get(name).map(|c| c.spec.port.host_port) else {
            return Err(OrchestratorError::NotFound(format!(
                "No such container: {}",
                name
            )));
        };

        let port_taken = self.containers.iter().any(|c| {
            c.key() != name
                && c.state == ContainerState::Running
                && c.spec.port.host_port == host_port
        });
        if port_taken {
            return Err(OrchestratorError::Runtime(format!(
                "start container failed (500): bind for 0.0.0.0:{} failed: port is already allocated",
                host_port
            )));
        }

        let Some(mut container) = self.containers.get_mut(name) else {
            return Err(OrchestratorError::NotFound(format!(
                "No such container: {}",
                name
            )));
        };
        container.state = ContainerState::Running;
        container.started_at = Some(Utc::now().to_rfc3339());
        let image = container.spec.image.clone();
        let port = container.spec.port.container_port;
        container.push_log(format!("freqtrade - INFO - Starting worker {} ({})", name, image));
        container.push_log("freqtrade - INFO - Using config: /freqtrade/config.json");
        container.push_log(format!(
            "freqtrade - INFO - Starting HTTP Server at 0.0.0.0:{}",
            port
        ));
        Ok(())
    }

    async fn stop(&self, name: &str, _grace: Duration) -> Result<bool, OrchestratorError> {
        self.check_available()?;
        let delay = *self.stop_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match self.containers.get_mut(name) {
            Some(mut container) => {
                if container.state == ContainerState::Running {
                    container.push_log("freqtrade - INFO - Worker shutting down");
                    container.state = ContainerState::Exited;
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn remove(&self, name: &str) -> Result<bool, OrchestratorError> {
        self.check_available()?;
        Ok(self.containers.remove(name).is_some())
    }

    async fn logs(&self, name: &str, tail: usize) -> Result<Option<String>, OrchestratorError> {
        self.check_available()?;
        Ok(self.containers.get(name).map(|c| {
            let start = c.logs.len().saturating_sub(tail);
            c.logs[start..]
                .iter()
                .map(|line| format!("{}\n", line))
                .collect()
        }))
    }

    async fn follow_logs(
        &self,
        name: &str,
        tail: usize,
    ) -> Result<Option<LogStream>, OrchestratorError> {
        self.check_available()?;
        let Some(container) = self.containers.get(name) else {
            return Ok(None);
        };

        let start = container.logs.len().saturating_sub(tail);
        let backlog: Vec<Result<String, OrchestratorError>> = container.logs[start..]
            .iter()
            .map(|line| Ok(format!("{}\n", line)))
            .collect();
        let rx = container.log_tx.subscribe();
        drop(container);

        let live = futures::stream::unfold(rx, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(line) => return Some((Ok(format!("{}\n", line)), rx)),
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });

        Ok(Some(futures::stream::iter(backlog).chain(live).boxed()))
    }
}
