//! Reputation from append-only votes.

use crate::scoring::NEUTRAL_REPUTATION;
use affirm_core::time::format_utc;
use affirm_core::{EntityId, Opinion, Vote};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Record type tag of a vote attestation
pub const VOTE_RECORD_TYPE: &str = "affirm.repute.vote";

/// Reputation implied by `votes`
///
/// `0.7 + 0.15 * (up - down) / total + 0.001 * sum(stake * sign)`, clamped
/// to `[0, 1]`. With no votes the neutral reputation applies.
#[must_use]
pub fn reputation(votes: &[Vote]) -> f64 {
    if votes.is_empty() {
        return NEUTRAL_REPUTATION;
    }
    let total = votes.len() as f64;
    let balance: f64 = votes.iter().map(|v| v.opinion.sign()).sum();
    let stake: f64 = votes.iter().map(|v| v.stake * v.opinion.sign()).sum();
    let rep = NEUTRAL_REPUTATION + 0.15 * (balance / total) + 0.001 * stake;
    if rep.is_nan() { 0.0 } else { rep.clamp(0.0, 1.0) }
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// Signable record of one vote
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoteRecord {
    /// Always [`VOTE_RECORD_TYPE`]
    #[serde(rename = "type")]
    pub record_type: String,
    /// Entity voted on
    pub entity_id: EntityId,
    /// Voter identity
    pub voter_id: String,
    /// Stake
    pub stake: f64,
    /// Opinion
    pub opinion: Opinion,
    /// Comment, empty when none was given
    pub comment: String,
    /// Reputation before the vote, 2 places
    pub prev_reputation: f64,
    /// Reputation after the vote, 2 places
    pub new_reputation: f64,
    /// Policy that re-gated the entity
    pub policy_version: String,
    /// Registry version
    pub version: String,
    /// Fresh uuid v4, lets verifiers reject replays
    pub nonce: String,
    /// UTC timestamp
    pub ts: String,
}

impl VoteRecord {
    /// Build the record for `vote`
    #[must_use]
    pub fn new(
        vote: &Vote,
        prev_reputation: f64,
        new_reputation: f64,
        policy_version: &str,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            record_type: VOTE_RECORD_TYPE.to_string(),
            entity_id: vote.entity_id.clone(),
            voter_id: vote.voter_id.clone(),
            stake: vote.stake,
            opinion: vote.opinion,
            comment: vote.comment.clone().unwrap_or_default(),
            prev_reputation: round2(prev_reputation),
            new_reputation: round2(new_reputation),
            policy_version: policy_version.to_string(),
            version: crate::REGISTRY_VERSION.to_string(),
            nonce: Uuid::new_v4().to_string(),
            ts: format_utc(now),
        }
    }
}
