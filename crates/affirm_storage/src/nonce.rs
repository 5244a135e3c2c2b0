//! Replay protection.
//!
//! A [`NonceGuard`] remembers `(identity, nonce)` pairs for a bounded time.
//! The first sighting records the pair and reports "not seen"; any repeat
//! inside the TTL reports a replay.

use crate::error::{StorageError, StorageResult};
use affirm_core::Clock;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Longest accepted nonce TTL, one year
pub const MAX_TTL_SECS: i64 = 365 * 24 * 60 * 60;

/// Expiring set-if-absent store
///
/// `insert_if_absent` must be atomic across every caller sharing the
/// store, including other processes for shared backends.
pub trait NonceStore: Send + Sync {
    /// Record `key` until `expires_at` unless a live entry exists
    ///
    /// Returns `true` if the key was recorded, `false` if a live entry
    /// already existed. Entries whose expiry is at or before `now` count
    /// as absent.
    ///
    /// # Errors
    ///
    /// Returns error if the backing store fails
    fn insert_if_absent(
        &self,
        key: &str,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> StorageResult<bool>;

    /// Delete entries expired as of `now`, returning how many were removed
    ///
    /// Stores that expire entries themselves keep the default no-op.
    ///
    /// # Errors
    ///
    /// Returns error if the backing store fails
    fn purge_expired(&self, _now: DateTime<Utc>) -> StorageResult<usize> {
        Ok(0)
    }
}

/// Process-local nonce store
#[derive(Debug, Default)]
pub struct MemoryNonceStore {
    entries: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl MemoryNonceStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries held, live or expired
    ///
    /// # Errors
    ///
    /// Returns error if the lock is poisoned
    pub fn len(&self) -> StorageResult<usize> {
        Ok(self.lock()?.len())
    }

    /// Whether the store holds no entries
    ///
    /// # Errors
    ///
    /// Returns error if the lock is poisoned
    pub fn is_empty(&self) -> StorageResult<bool> {
        Ok(self.lock()?.is_empty())
    }

    fn lock(&self) -> StorageResult<std::sync::MutexGuard<'_, HashMap<String, DateTime<Utc>>>> {
        self.entries
            .lock()
            .map_err(|_| StorageError::LockPoisoned { what: "nonces" })
    }
}

impl NonceStore for MemoryNonceStore {
    fn insert_if_absent(
        &self,
        key: &str,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> StorageResult<bool> {
        let mut entries = self.lock()?;
        match entries.get(key) {
            Some(existing) if *existing > now => Ok(false),
            _ => {
                entries.insert(key.to_string(), expires_at);
                Ok(true)
            }
        }
    }

    fn purge_expired(&self, now: DateTime<Utc>) -> StorageResult<usize> {
        let mut entries = self.lock()?;
        let before = entries.len();
        entries.retain(|_, expires_at| *expires_at > now);
        Ok(before - entries.len())
    }
}

/// Nonce guard configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NonceConfig {
    /// How long a nonce is remembered, in seconds
    pub ttl_secs: i64,
    /// Purge expired entries after this many recorded nonces; 0 disables
    pub purge_every: u64,
}

impl Default for NonceConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 600,
            purge_every: 256,
        }
    }
}

impl NonceConfig {
    /// TTL as a duration
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Invalid`] unless `0 < ttl_secs <= MAX_TTL_SECS`
    pub fn ttl(&self) -> StorageResult<Duration> {
        if self.ttl_secs <= 0 || self.ttl_secs > MAX_TTL_SECS {
            return Err(StorageError::Invalid {
                reason: format!(
                    "nonce ttl_secs must be in 1..={}, got {}",
                    MAX_TTL_SECS, self.ttl_secs
                ),
            });
        }
        Duration::try_seconds(self.ttl_secs).ok_or_else(|| StorageError::Invalid {
            reason: format!("nonce ttl_secs out of range: {}", self.ttl_secs),
        })
    }

    /// Check the configuration
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Invalid`] for an out-of-range TTL
    pub fn validate(&self) -> StorageResult<()> {
        self.ttl().map(|_| ())
    }
}

/// Replay guard over a shared [`NonceStore`]
#[derive(Clone)]
pub struct NonceGuard {
    store: Arc<dyn NonceStore>,
    clock: Arc<dyn Clock>,
    config: NonceConfig,
    recorded: Arc<AtomicU64>,
}

impl std::fmt::Debug for NonceGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NonceGuard").field("config", &self.config).finish_non_exhaustive()
    }
}

impl NonceGuard {
    /// Create a guard
    #[must_use]
    pub fn new(store: Arc<dyn NonceStore>, clock: Arc<dyn Clock>, config: NonceConfig) -> Self {
        Self {
            store,
            clock,
            config,
            recorded: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Guard configuration
    #[must_use]
    pub fn config(&self) -> &NonceConfig {
        &self.config
    }

    /// Whether `(identity, nonce)` was already used within the TTL
    ///
    /// Records the pair when it was not. Blank identity or nonce is never
    /// recorded and reports `false`. Every `purge_every` recorded nonces
    /// the store drops its expired entries.
    ///
    /// # Errors
    ///
    /// Returns error if the TTL is out of range or the backing store fails
    pub fn seen(&self, identity: &str, nonce: &str) -> StorageResult<bool> {
        if identity.is_empty() || nonce.is_empty() {
            return Ok(false);
        }
        let now = self.clock.now();
        let expires_at = now + self.config.ttl()?;
        let recorded = self
            .store
            .insert_if_absent(&nonce_key(identity, nonce), now, expires_at)?;
        if recorded {
            self.maybe_purge(now);
        } else {
            tracing::debug!(identity, "nonce replay detected");
        }
        Ok(!recorded)
    }

    fn maybe_purge(&self, now: DateTime<Utc>) {
        let every = self.config.purge_every;
        if every == 0 {
            return;
        }
        let count = self.recorded.fetch_add(1, Ordering::Relaxed) + 1;
        if count % every != 0 {
            return;
        }
        match self.store.purge_expired(now) {
            Ok(removed) => tracing::debug!(removed, "purged expired nonces"),
            Err(e) => tracing::warn!(error = %e, "nonce purge failed"),
        }
    }
}

/// Store key for an `(identity, nonce)` pair
#[must_use]
pub fn nonce_key(identity: &str, nonce: &str) -> String {
    format!("nonce:{}:{}", identity, nonce)
}
