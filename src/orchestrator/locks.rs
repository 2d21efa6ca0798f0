//! Advisory lock table keyed by bot id.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// One async mutex per bot id, created on first use.
///
/// Lifecycle transitions for the same bot run under its guard; different bots
/// never contend.
#[derive(Debug, Default)]
pub struct BotLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl BotLocks {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive access to `bot_id`.
    ///
    /// The entry is dropped again with the last guard, so ids that never
    /// reach the registry leave nothing behind.
    pub async fn acquire(&self, bot_id: &str) -> BotGuard<'_> {
        let mutex = Arc::clone(&self.locks.entry(bot_id.to_string()).or_default());
        // Built before waiting so a cancelled acquire still cleans up
        let mut guard = BotGuard {
            locks: &self.locks,
            bot_id: bot_id.to_string(),
            mutex: Some(Arc::clone(&mutex)),
            guard: None,
        };
        guard.guard = Some(mutex.lock_owned().await);
        guard
    }

    /// Number of tracked bot ids.
    #[must_use]
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// Whether no bot id is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Exclusive access to one bot id.
#[derive(Debug)]
pub struct BotGuard<'a> {
    locks: &'a DashMap<String, Arc<Mutex<()>>>,
    bot_id: String,
    mutex: Option<Arc<Mutex<()>>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for BotGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        drop(self.mutex.take());
        // Waiters clone the mutex under the shard lock, so a count of one
        // means nobody else holds or waits on it
        self.locks
            .remove_if(&self.bot_id, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}
