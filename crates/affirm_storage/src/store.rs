//! Entity repository.
//!
//! Holds each candidate entity with its latest score and its append-only
//! vote log. Mutation of a single entity is serialized; different
//! entities can be updated concurrently.

use crate::error::{StorageError, StorageResult};
use affirm_core::{CandidateEntity, EntityId, Score, Vote};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

/// An entity as stored, with its score and votes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    /// The entity as last ingested
    pub entity: CandidateEntity,
    /// Latest score, if it has been scored
    pub score: Option<Score>,
    /// Votes in arrival order
    pub votes: Vec<Vote>,
}

impl EntityRecord {
    /// Record for a freshly ingested entity
    #[must_use]
    pub fn new(entity: CandidateEntity, score: Option<Score>) -> Self {
        Self {
            entity,
            score,
            votes: Vec::new(),
        }
    }

    /// Number of votes recorded
    #[must_use]
    pub fn vote_count(&self) -> usize {
        self.votes.len()
    }
}

/// Outcome of appending a vote
#[derive(Debug, Clone, PartialEq)]
pub struct VoteApplied {
    /// Score before the vote
    pub previous: Option<Score>,
    /// Score after re-scoring with the vote included
    pub current: Score,
    /// Votes on the entity including this one
    pub total_votes: usize,
}

/// Repository statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryStats {
    /// Stored entities
    pub entity_count: usize,
    /// Votes across all entities
    pub vote_count: usize,
}

/// Storage for entities, scores and votes
///
/// Implementations must make [`EntityRepository::apply_vote`] and
/// [`EntityRepository::upsert_with`] atomic per entity: the read, the
/// re-score and the score write happen with no other mutation of that
/// entity interleaved.
pub trait EntityRepository: Send + Sync {
    /// Insert or replace an entity and its score, keeping existing votes
    ///
    /// # Errors
    ///
    /// Returns error if the backing store fails
    fn upsert(&self, entity: CandidateEntity, score: Score) -> StorageResult<()>;

    /// Insert or replace an entity and store the score `rescore` computes
    /// from the updated record, keeping existing votes
    ///
    /// Atomic per entity in the same way as [`EntityRepository::apply_vote`],
    /// so a concurrent vote is never overwritten by a score computed from
    /// stale votes.
    ///
    /// # Errors
    ///
    /// Returns error if the backing store fails
    fn upsert_with(
        &self,
        entity: CandidateEntity,
        rescore: &mut dyn FnMut(&EntityRecord) -> Score,
    ) -> StorageResult<Score>;

    /// Fetch a copy of an entity record
    ///
    /// # Errors
    ///
    /// Returns error if the backing store fails
    fn get(&self, id: &EntityId) -> StorageResult<Option<EntityRecord>>;

    /// All stored entity ids in lexicographic order
    ///
    /// # Errors
    ///
    /// Returns error if the backing store fails
    fn ids(&self) -> StorageResult<Vec<EntityId>>;

    /// Append a vote and store the score `rescore` computes from the
    /// updated record
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] for an unknown entity
    fn apply_vote(
        &self,
        vote: Vote,
        rescore: &dyn Fn(&EntityRecord) -> Score,
    ) -> StorageResult<VoteApplied>;

    /// All records in lexicographic id order
    ///
    /// # Errors
    ///
    /// Returns error if the backing store fails
    fn records(&self) -> StorageResult<Vec<EntityRecord>> {
        let mut out = Vec::new();
        for id in self.ids()? {
            if let Some(record) = self.get(&id)? {
                out.push(record);
            }
        }
        Ok(out)
    }
}

/// In-memory repository with one mutex per entity
#[derive(Debug, Default)]
pub struct MemoryRepository {
    entities: RwLock<HashMap<EntityId, Arc<Mutex<EntityRecord>>>>,
}

impl MemoryRepository {
    /// Create an empty repository
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current counts
    ///
    /// # Errors
    ///
    /// Returns error if a lock is poisoned
    pub fn stats(&self) -> StorageResult<RepositoryStats> {
        let entities = self.entities.read().map_err(|_| poisoned("entities"))?;
        let mut stats = RepositoryStats {
            entity_count: entities.len(),
            vote_count: 0,
        };
        for slot in entities.values() {
            stats.vote_count += slot.lock().map_err(|_| poisoned("entity"))?.votes.len();
        }
        Ok(stats)
    }

    fn slot(&self, id: &EntityId) -> StorageResult<Option<Arc<Mutex<EntityRecord>>>> {
        let entities = self.entities.read().map_err(|_| poisoned("entities"))?;
        Ok(entities.get(id).cloned())
    }
}

fn poisoned(what: &'static str) -> StorageError {
    StorageError::LockPoisoned { what }
}

impl EntityRepository for MemoryRepository {
    fn upsert(&self, entity: CandidateEntity, score: Score) -> StorageResult<()> {
        if let Some(slot) = self.slot(&entity.id)? {
            let mut record = slot.lock().map_err(|_| poisoned("entity"))?;
            record.entity = entity;
            record.score = Some(score);
            return Ok(());
        }

        let mut entities = self.entities.write().map_err(|_| poisoned("entities"))?;
        // Another writer may have inserted between the read and write locks
        match entities.get(&entity.id) {
            Some(slot) => {
                let mut record = slot.lock().map_err(|_| poisoned("entity"))?;
                record.entity = entity;
                record.score = Some(score);
            }
            None => {
                let id = entity.id.clone();
                entities.insert(id, Arc::new(Mutex::new(EntityRecord::new(entity, Some(score)))));
            }
        }
        Ok(())
    }

    fn upsert_with(
        &self,
        entity: CandidateEntity,
        rescore: &mut dyn FnMut(&EntityRecord) -> Score,
    ) -> StorageResult<Score> {
        let slot = match self.slot(&entity.id)? {
            Some(slot) => slot,
            None => {
                let mut entities = self.entities.write().map_err(|_| poisoned("entities"))?;
                match entities.get(&entity.id) {
                    Some(slot) => Arc::clone(slot),
                    None => {
                        // New entities are scored before they become visible
                        let mut record = EntityRecord::new(entity, None);
                        let score = rescore(&record);
                        record.score = Some(score.clone());
                        entities.insert(record.entity.id.clone(), Arc::new(Mutex::new(record)));
                        return Ok(score);
                    }
                }
            }
        };

        let mut record = slot.lock().map_err(|_| poisoned("entity"))?;
        record.entity = entity;
        let score = rescore(&record);
        record.score = Some(score.clone());
        Ok(score)
    }

    fn get(&self, id: &EntityId) -> StorageResult<Option<EntityRecord>> {
        match self.slot(id)? {
            Some(slot) => Ok(Some(slot.lock().map_err(|_| poisoned("entity"))?.clone())),
            None => Ok(None),
        }
    }

    fn ids(&self) -> StorageResult<Vec<EntityId>> {
        let entities = self.entities.read().map_err(|_| poisoned("entities"))?;
        let mut ids: Vec<EntityId> = entities.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    fn apply_vote(
        &self,
        vote: Vote,
        rescore: &dyn Fn(&EntityRecord) -> Score,
    ) -> StorageResult<VoteApplied> {
        let slot = self.slot(&vote.entity_id)?.ok_or_else(|| StorageError::NotFound {
            id: vote.entity_id.to_string(),
        })?;

        let mut record = slot.lock().map_err(|_| poisoned("entity"))?;
        record.votes.push(vote);
        let current = rescore(&record);
        let previous = record.score.replace(current.clone());

        tracing::debug!(
            entity = %record.entity.id,
            votes = record.votes.len(),
            composite = current.composite,
            "vote applied"
        );

        Ok(VoteApplied {
            previous,
            current,
            total_votes: record.votes.len(),
        })
    }
}
