//! AFFIRM Storage
//!
//! Injected persistence seams for the authority core: the entity
//! repository (entities, scores, append-only votes) and the expiring
//! key-value store behind replay protection, kept in memory, in a local
//! redb file, or on a Redis server shared by several processes.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod durable;
pub mod error;
pub mod nonce;
pub mod shared;
pub mod store;

pub use durable::RedbNonceStore;
pub use error::{StorageError, StorageResult};
pub use nonce::{nonce_key, MemoryNonceStore, NonceConfig, NonceGuard, NonceStore, MAX_TTL_SECS};
pub use shared::RedisNonceStore;
pub use store::{EntityRecord, EntityRepository, MemoryRepository, RepositoryStats, VoteApplied};
