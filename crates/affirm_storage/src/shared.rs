//! Redis-backed nonce store shared across processes.
//!
//! Each insert is a single `SET key 1 NX PX <ttl>`, so the check and the
//! write happen atomically on the server for every client. Expiry is
//! handled by Redis itself.

use crate::error::{StorageError, StorageResult};
use crate::nonce::NonceStore;
use chrono::{DateTime, Utc};
use std::sync::{Mutex, MutexGuard};

/// Nonce store on a Redis server
pub struct RedisNonceStore {
    client: redis::Client,
    conn: Mutex<Option<redis::Connection>>,
}

impl std::fmt::Debug for RedisNonceStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisNonceStore")
            .field("server", &self.client.get_connection_info().addr.to_string())
            .finish_non_exhaustive()
    }
}

impl RedisNonceStore {
    /// Connect to the server at `url` (`redis://host:port/db`)
    ///
    /// # Errors
    ///
    /// Returns error if the URL is invalid or the server is unreachable
    pub fn open(url: &str) -> StorageResult<Self> {
        let client = redis::Client::open(url).map_err(StorageError::backend)?;
        let conn = client.get_connection().map_err(StorageError::backend)?;
        tracing::debug!(server = %client.get_connection_info().addr, "connected to nonce server");
        Ok(Self {
            client,
            conn: Mutex::new(Some(conn)),
        })
    }

    fn lock(&self) -> StorageResult<MutexGuard<'_, Option<redis::Connection>>> {
        self.conn.lock().map_err(|_| StorageError::LockPoisoned {
            what: "redis connection",
        })
    }
}

impl NonceStore for RedisNonceStore {
    fn insert_if_absent(
        &self,
        key: &str,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> StorageResult<bool> {
        let ttl_ms = (expires_at - now).num_milliseconds().max(1);
        let mut slot = self.lock()?;
        let mut conn = match slot.take() {
            Some(conn) => conn,
            None => self.client.get_connection().map_err(StorageError::backend)?,
        };
        let reply: redis::RedisResult<Option<String>> = redis::cmd("SET")
            .arg(key)
            .arg(1)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query(&mut conn);
        match reply {
            Ok(set) => {
                *slot = Some(conn);
                Ok(set.is_some())
            }
            Err(e) => {
                // A dropped connection is reopened on the next call
                if !(e.is_io_error() || e.is_connection_dropped()) {
                    *slot = Some(conn);
                }
                Err(StorageError::backend(e))
            }
        }
    }
}
