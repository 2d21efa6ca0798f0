//! Tenant API keys and per-key rate limiting.

use crate::models::{ApiKeyInfo, Permission};
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Prefix for API keys.
const API_KEY_PREFIX: &str = "tbo_";

/// Rate limit applied when a key is minted without one.
pub const DEFAULT_RATE_LIMIT: u32 = 600;

const RATE_WINDOW_MS: u64 = 60_000;

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Whether `granted` covers `wanted`: `admin` grants everything and `manage`
/// implies `read`.
pub fn grants(granted: &[Permission], wanted: Permission) -> bool {
    granted.iter().any(|g| match g {
        Permission::Admin => true,
        Permission::Manage => matches!(wanted, Permission::Manage | Permission::Read),
        Permission::Read => wanted == Permission::Read,
    })
}

/// Internal representation of an API key with hashed value.
#[derive(Debug)]
pub struct StoredApiKey {
    /// Unique key identifier.
    pub key_id: String,
    /// SHA-256 hash of the API key.
    pub key_hash: String,
    /// Human-readable name for the key.
    pub name: String,
    /// Tenant every request made with this key acts for.
    pub tenant_id: String,
    /// Permissions granted to this key.
    pub permissions: Vec<Permission>,
    /// Rate limit in requests per minute.
    pub rate_limit: u32,
    /// Creation timestamp in milliseconds.
    pub created_at: u64,
    /// Last used timestamp in milliseconds.
    pub last_used_at: AtomicU64,
}

impl Clone for StoredApiKey {
    fn clone(&self) -> Self {
        Self {
            key_id: self.key_id.clone(),
            key_hash: self.key_hash.clone(),
            name: self.name.clone(),
            tenant_id: self.tenant_id.clone(),
            permissions: self.permissions.clone(),
            rate_limit: self.rate_limit,
            created_at: self.created_at,
            last_used_at: AtomicU64::new(self.last_used_at.load(Ordering::Relaxed)),
        }
    }
}

impl StoredApiKey {
    /// Convert to ApiKeyInfo (without the hash).
    pub fn to_info(&self) -> ApiKeyInfo {
        let last_used = self.last_used_at.load(Ordering::Relaxed);
        ApiKeyInfo {
            key_id: self.key_id.clone(),
            name: self.name.clone(),
            tenant_id: self.tenant_id.clone(),
            permissions: self.permissions.clone(),
            rate_limit: self.rate_limit,
            created_at: self.created_at,
            last_used_at: if last_used > 0 { Some(last_used) } else { None },
        }
    }

    /// Check if this key has the given permission.
    pub fn has_permission(&self, permission: Permission) -> bool {
        grants(&self.permissions, permission)
    }

    /// Update the last used timestamp.
    pub fn touch(&self) {
        self.last_used_at.store(now_millis(), Ordering::Relaxed);
    }
}

/// Rate limiter using sliding window algorithm.
#[derive(Debug, Default)]
pub struct RateLimiter {
    /// Request timestamps per key_id.
    windows: DashMap<String, VecDeque<u64>>,
}

impl RateLimiter {
    /// Create a new rate limiter.
    pub fn new() -> Self {
        Self {
            windows: DashMap::new(),
        }
    }

    /// Check if a request is allowed for the given key.
    /// Returns true if allowed, false if rate limited.
    pub fn check_and_record(&self, key_id: &str, rate_limit: u32) -> bool {
        let now = now_millis();
        let window_start = now.saturating_sub(RATE_WINDOW_MS);

        let mut entry = self.windows.entry(key_id.to_string()).or_default();
        let window = entry.value_mut();

        while window.front().is_some_and(|&front| front < window_start) {
            window.pop_front();
        }

        if window.len() < rate_limit as usize {
            window.push_back(now);
            true
        } else {
            false
        }
    }

    /// Requests still allowed for the key in the current window.
    pub fn remaining(&self, key_id: &str, rate_limit: u32) -> u32 {
        let used = self.windows.get(key_id).map_or(0, |w| w.len());
        rate_limit.saturating_sub(used as u32)
    }

    /// Clear rate limit data for a key.
    pub fn clear(&self, key_id: &str) {
        self.windows.remove(key_id);
    }
}

/// Store for API keys.
#[derive(Debug, Default)]
pub struct ApiKeyStore {
    /// Keys indexed by key_id.
    keys_by_id: DashMap<String, StoredApiKey>,
    /// Key hashes mapped to key_id for lookup.
    hash_to_id: DashMap<String, String>,
    /// Rate limiter.
    rate_limiter: RateLimiter,
}

impl ApiKeyStore {
    /// Create a new API key store.
    pub fn new() -> Self {
        Self {
            keys_by_id: DashMap::new(),
            hash_to_id: DashMap::new(),
            rate_limiter: RateLimiter::new(),
        }
    }

    fn generate_key() -> String {
        let random_part = Uuid::new_v4().simple().to_string();
        format!("{}{}", API_KEY_PREFIX, random_part)
    }

    fn hash_key(key: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(key.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Mints a key for `tenant_id`.
    /// Returns the key_id and the raw API key (only returned once).
    pub fn create_key(
        &self,
        tenant_id: &str,
        name: String,
        permissions: Vec<Permission>,
        rate_limit: u32,
    ) -> (String, String) {
        let raw_key = Self::generate_key();
        let key_id = self.insert_key(tenant_id, name, &raw_key, permissions, rate_limit);
        (key_id, raw_key)
    }

    /// Registers a key whose raw value is already known, e.g. from configuration.
    /// Returns the key_id.
    pub fn insert_key(
        &self,
        tenant_id: &str,
        name: String,
        raw_key: &str,
        permissions: Vec<Permission>,
        rate_limit: u32,
    ) -> String {
        let key_id = Uuid::new_v4().to_string();
        let key_hash = Self::hash_key(raw_key);

        let stored_key = StoredApiKey {
            key_id: key_id.clone(),
            key_hash: key_hash.clone(),
            name,
            tenant_id: tenant_id.to_string(),
            permissions,
            rate_limit,
            created_at: now_millis(),
            last_used_at: AtomicU64::new(0),
        };

        if let Some(previous) = self.hash_to_id.insert(key_hash, key_id.clone()) {
            self.keys_by_id.remove(&previous);
        }
        self.keys_by_id.insert(key_id.clone(), stored_key);

        key_id
    }

    /// Validate an API key and return the stored key info if valid.
    pub fn validate_key(&self, raw_key: &str) -> Option<StoredApiKey> {
        let key_hash = Self::hash_key(raw_key);
        let key_id = self.hash_to_id.get(&key_hash)?;
        let stored_key = self.keys_by_id.get(key_id.value())?;
        stored_key.touch();
        Some(stored_key.clone())
    }

    /// Check rate limit for a key.
    pub fn check_rate_limit(&self, key_id: &str, rate_limit: u32) -> bool {
        self.rate_limiter.check_and_record(key_id, rate_limit)
    }

    /// Requests the key may still make in the current window.
    pub fn remaining_requests(&self, key_id: &str, rate_limit: u32) -> u32 {
        self.rate_limiter.remaining(key_id, rate_limit)
    }

    /// Keys belonging to `tenant_id`, oldest first.
    pub fn list_keys(&self, tenant_id: &str) -> Vec<ApiKeyInfo> {
        let mut keys: Vec<ApiKeyInfo> = self
            .keys_by_id
            .iter()
            .filter(|entry| entry.tenant_id == tenant_id)
            .map(|entry| entry.to_info())
            .collect();
        keys.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.key_id.cmp(&b.key_id)));
        keys
    }

    /// Deletes a key owned by `tenant_id`; other tenants' keys are left alone.
    pub fn delete_key(&self, tenant_id: &str, key_id: &str) -> bool {
        match self
            .keys_by_id
            .remove_if(key_id, |_, stored| stored.tenant_id == tenant_id)
        {
            Some((_, stored_key)) => {
                self.hash_to_id.remove(&stored_key.key_hash);
                self.rate_limiter.clear(key_id);
                true
            }
            None => false,
        }
    }

    /// Get the number of keys.
    pub fn len(&self) -> usize {
        self.keys_by_id.len()
    }

    /// Check if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.keys_by_id.is_empty()
    }
}
