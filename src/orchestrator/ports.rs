//! Host port allocation.
//!
//! The free set is derived from the registry (configured range minus ports held
//! by port-holding bots), so a restart never forgets which ports are taken.
//! Ports handed out but not yet committed to the registry are tracked as
//! in-process reservations until their [`PortLease`] is dropped.

use crate::error::OrchestratorError;
use crate::registry::BotRegistry;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::ops::Range;
use std::sync::Arc;
use tracing::debug;

/// A reserved port. Keep it alive until the registry records the port.
#[derive(Debug)]
pub struct PortLease {
    port: u16,
    reservations: Arc<Mutex<BTreeSet<u16>>>,
}

impl PortLease {
    /// The reserved port.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl Drop for PortLease {
    fn drop(&mut self) {
        self.reservations.lock().remove(&self.port);
    }
}

/// Hands out host ports from a fixed range.
pub struct PortAllocator {
    range: Range<u16>,
    registry: Arc<dyn BotRegistry>,
    gate: tokio::sync::Mutex<()>,
    reservations: Arc<Mutex<BTreeSet<u16>>>,
}

impl PortAllocator {
    /// Creates an allocator over `range` (end exclusive).
    #[must_use]
    pub fn new(range: Range<u16>, registry: Arc<dyn BotRegistry>) -> Self {
        Self {
            range,
            registry,
            gate: tokio::sync::Mutex::new(()),
            reservations: Arc::new(Mutex::new(BTreeSet::new())),
        }
    }

    /// The configured range.
    #[must_use]
    pub fn range(&self) -> Range<u16> {
        self.range.clone()
    }

    /// Reserves the lowest free port.
    ///
    /// # Errors
    /// `ResourceExhausted` when every port in the range is taken.
    pub async fn allocate(&self) -> Result<PortLease, OrchestratorError> {
        self.allocate_preferring(None).await
    }

    /// Reserves `preferred` if it is in range and free, otherwise the lowest free port.
    ///
    /// # Errors
    /// `ResourceExhausted` when every port in the range is taken.
    pub async fn allocate_preferring(
        &self,
        preferred: Option<u16>,
    ) -> Result<PortLease, OrchestratorError> {
        let _gate = self.gate.lock().await;

        // Snapshot reservations before reading the registry: a lease dropped
        // after the snapshot has already committed its port to the registry.
        let reserved = self.reservations.lock().clone();
        let in_use = self.registry.ports_in_use().await?;
        let is_free = |port: &u16| !in_use.contains(port) && !reserved.contains(port);

        let port = preferred
            .filter(|p| self.range.contains(p) && is_free(p))
            .or_else(|| self.range.clone().find(is_free))
            .ok_or(OrchestratorError::ResourceExhausted {
                start: self.range.start,
                end: self.range.end,
            })?;

        self.reservations.lock().insert(port);
        debug!(port, "Port reserved");

        Ok(PortLease {
            port,
            reservations: Arc::clone(&self.reservations),
        })
    }

    /// Returns a port to the free pool.
    ///
    /// Registry state decides ownership; this only drops a lingering reservation.
    pub fn release(&self, port: u16) {
        self.reservations.lock().remove(&port);
        debug!(port, "Port released");
    }

    /// Ports currently reserved but not yet committed.
    #[must_use]
    pub fn reserved(&self) -> usize {
        self.reservations.lock().len()
    }
}
