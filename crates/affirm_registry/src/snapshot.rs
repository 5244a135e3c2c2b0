//! Point-in-time snapshots of registry state.
//!
//! A snapshot is the unit that gets canonicalized, hashed and signed. Items
//! are ordered by entity id and each carries its own content hash, so two
//! snapshots of identical state differ only in `ts`.

use affirm_core::time::format_utc;
use affirm_core::{CandidateEntity, ContentHash, CoreResult, Score};
use affirm_storage::EntityRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Record type tag of a state snapshot
pub const SNAPSHOT_TYPE: &str = "affirm.state.snapshot";

/// Snapshot configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    /// Issuer stamped on every snapshot
    pub issuer: String,
    /// Version label
    pub version: String,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            issuer: "affirm.authority".to_string(),
            version: crate::REGISTRY_VERSION.to_string(),
        }
    }
}

#[derive(Serialize)]
struct ItemBody<'a> {
    entity: &'a CandidateEntity,
    score: Option<&'a Score>,
    vote_count: usize,
}

/// One entity in a snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotItem {
    /// Entity as stored
    pub entity: CandidateEntity,
    /// Current score, if scored
    pub score: Option<Score>,
    /// Number of votes recorded
    pub vote_count: usize,
    /// Hash of `{entity, score, vote_count}`
    pub item_hash: String,
}

impl SnapshotItem {
    /// Build an item from a stored record
    ///
    /// # Errors
    ///
    /// Returns error if the record cannot be canonicalized
    pub fn from_record(record: EntityRecord) -> CoreResult<Self> {
        let vote_count = record.vote_count();
        let item_hash = ContentHash::of(&ItemBody {
            entity: &record.entity,
            score: record.score.as_ref(),
            vote_count,
        })?;
        Ok(Self {
            entity: record.entity,
            score: record.score,
            vote_count,
            item_hash: item_hash.to_string(),
        })
    }
}

/// Registry state at a point in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// Always [`SNAPSHOT_TYPE`]
    #[serde(rename = "type")]
    pub snapshot_type: String,
    /// Version label
    pub version: String,
    /// UTC timestamp
    pub ts: String,
    /// Issuer
    pub issuer: String,
    /// Items in entity id order
    pub items: Vec<SnapshotItem>,
}

impl StateSnapshot {
    /// Canonical hash of the whole snapshot
    ///
    /// # Errors
    ///
    /// Returns error if the snapshot cannot be canonicalized
    pub fn hash(&self) -> CoreResult<ContentHash> {
        ContentHash::of(self)
    }
}

/// Builds [`StateSnapshot`]s
#[derive(Debug, Clone, Default)]
pub struct StateSnapshotBuilder {
    config: SnapshotConfig,
}

impl StateSnapshotBuilder {
    /// Create a builder
    #[must_use]
    pub fn new(config: SnapshotConfig) -> Self {
        Self { config }
    }

    /// Active configuration
    #[must_use]
    pub fn config(&self) -> &SnapshotConfig {
        &self.config
    }

    /// Build a snapshot from `records`, in any order
    ///
    /// # Errors
    ///
    /// Returns error if a record cannot be canonicalized
    pub fn build(&self, mut records: Vec<EntityRecord>, now: DateTime<Utc>) -> CoreResult<StateSnapshot> {
        records.sort_by(|a, b| a.entity.id.cmp(&b.entity.id));
        let items = records
            .into_iter()
            .map(SnapshotItem::from_record)
            .collect::<CoreResult<Vec<_>>>()?;

        Ok(StateSnapshot {
            snapshot_type: SNAPSHOT_TYPE.to_string(),
            version: self.config.version.clone(),
            ts: format_utc(now),
            issuer: self.config.issuer.clone(),
            items,
        })
    }
}
