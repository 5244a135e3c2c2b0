//! redb-backed nonce store.
//!
//! Each insert runs in its own write transaction. redb allows a single
//! writer at a time, so the read-check-insert sequence is atomic within
//! one process. The database file is locked by its opener, so a second
//! process cannot share it; deployments with several verifier processes
//! use [`crate::shared::RedisNonceStore`] instead.

use crate::error::{StorageError, StorageResult};
use crate::nonce::NonceStore;
use chrono::{DateTime, Utc};
use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition};
use std::path::Path;

/// Nonce key to expiry in Unix milliseconds
const NONCES: TableDefinition<&str, i64> = TableDefinition::new("nonces");

/// Nonce store persisted in a redb database file
pub struct RedbNonceStore {
    db: Database,
}

impl std::fmt::Debug for RedbNonceStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbNonceStore").finish_non_exhaustive()
    }
}

impl RedbNonceStore {
    /// Open or create the database at `path`
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be opened or the table created
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let db = Database::create(path.as_ref()).map_err(StorageError::backend)?;
        let txn = db.begin_write().map_err(StorageError::backend)?;
        txn.open_table(NONCES).map_err(StorageError::backend)?;
        txn.commit().map_err(StorageError::backend)?;
        tracing::debug!(path = %path.as_ref().display(), "opened nonce database");
        Ok(Self { db })
    }

    /// Number of entries held, live or expired
    ///
    /// # Errors
    ///
    /// Returns error if the read transaction fails
    pub fn len(&self) -> StorageResult<usize> {
        let txn = self.db.begin_read().map_err(StorageError::backend)?;
        let table = txn.open_table(NONCES).map_err(StorageError::backend)?;
        let len = table.len().map_err(StorageError::backend)?;
        usize::try_from(len).map_err(StorageError::backend)
    }

    /// Whether the database holds no entries
    ///
    /// # Errors
    ///
    /// Returns error if the read transaction fails
    pub fn is_empty(&self) -> StorageResult<bool> {
        Ok(self.len()? == 0)
    }
}

impl NonceStore for RedbNonceStore {
    fn insert_if_absent(
        &self,
        key: &str,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> StorageResult<bool> {
        let txn = self.db.begin_write().map_err(StorageError::backend)?;
        let recorded = {
            let mut table = txn.open_table(NONCES).map_err(StorageError::backend)?;
            let live = table
                .get(key)
                .map_err(StorageError::backend)?
                .is_some_and(|existing| existing.value() > now.timestamp_millis());
            if !live {
                table
                    .insert(key, expires_at.timestamp_millis())
                    .map_err(StorageError::backend)?;
            }
            !live
        };
        if recorded {
            txn.commit().map_err(StorageError::backend)?;
        } else {
            txn.abort().map_err(StorageError::backend)?;
        }
        Ok(recorded)
    }

    fn purge_expired(&self, now: DateTime<Utc>) -> StorageResult<usize> {
        let cutoff = now.timestamp_millis();
        let txn = self.db.begin_write().map_err(StorageError::backend)?;
        let removed = {
            let mut table = txn.open_table(NONCES).map_err(StorageError::backend)?;
            let mut expired = Vec::new();
            for entry in table.iter().map_err(StorageError::backend)? {
                let (key, expires_at) = entry.map_err(StorageError::backend)?;
                if expires_at.value() <= cutoff {
                    expired.push(key.value().to_string());
                }
            }
            for key in &expired {
                table.remove(key.as_str()).map_err(StorageError::backend)?;
            }
            expired.len()
        };
        txn.commit().map_err(StorageError::backend)?;
        if removed > 0 {
            tracing::info!(removed, "purged expired nonces");
        }
        Ok(removed)
    }
}
