//! Entity, score and vote model.
//!
//! These are the values that flow through scoring, gating and the
//! reputation ledger, and that end up inside snapshots and attestations.
//! Collections use ordered containers so their serialized form is stable.

use crate::error::{CoreError, CoreResult};
use crate::id::EntityId;
use crate::time::parse_utc;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// HTTP method of a declared endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    /// GET
    #[default]
    Get,
    /// POST
    Post,
    /// PUT
    Put,
    /// DELETE
    Delete,
    /// PATCH
    Patch,
}

/// An endpoint exposed by a candidate entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Request path
    pub path: String,
    /// HTTP method
    #[serde(default)]
    pub method: HttpMethod,
    /// Schema documentation reference, if any
    #[serde(default)]
    pub schema: Option<String>,
    /// Free-form notes
    #[serde(default)]
    pub notes: Option<String>,
}

impl Endpoint {
    /// Create a GET endpoint with no documentation
    #[must_use]
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            method: HttpMethod::Get,
            schema: None,
            notes: None,
        }
    }

    /// Attach schema documentation
    #[must_use]
    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    /// Whether the endpoint carries non-blank schema documentation
    #[must_use]
    pub fn is_documented(&self) -> bool {
        self.schema.as_deref().is_some_and(|s| !s.trim().is_empty())
    }
}

/// A candidate entity submitted for scoring and admission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateEntity {
    /// Entity id
    pub id: EntityId,
    /// Display name
    #[serde(default)]
    pub name: String,
    /// Domain the entity is served from
    #[serde(default)]
    pub domain: String,
    /// Owner contact details (`org`, `contact`, ...)
    #[serde(default)]
    pub owner: BTreeMap<String, String>,
    /// Declared endpoints
    #[serde(default)]
    pub endpoints: Vec<Endpoint>,
    /// Tags
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// Declared license identifier
    #[serde(default)]
    pub license: Option<String>,
    /// Free-form metadata (`uptime`, `rate_limit`, ...)
    #[serde(default)]
    pub meta: BTreeMap<String, String>,
    /// Last time the entity was updated upstream
    #[serde(default, deserialize_with = "lenient_utc")]
    pub last_update: Option<DateTime<Utc>>,
}

impl CandidateEntity {
    /// Create an entity with only an id
    #[must_use]
    pub fn new(id: EntityId) -> Self {
        Self {
            id,
            name: String::new(),
            domain: String::new(),
            owner: BTreeMap::new(),
            endpoints: Vec::new(),
            tags: BTreeSet::new(),
            license: None,
            meta: BTreeMap::new(),
            last_update: None,
        }
    }

    /// Set the domain
    #[must_use]
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = domain.into();
        self
    }

    /// Add an owner field
    #[must_use]
    pub fn with_owner(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.owner.insert(key.into(), value.into());
        self
    }

    /// Add an endpoint
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: Endpoint) -> Self {
        self.endpoints.push(endpoint);
        self
    }

    /// Add a tag
    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    /// Set the license
    #[must_use]
    pub fn with_license(mut self, license: impl Into<String>) -> Self {
        self.license = Some(license.into());
        self
    }

    /// Add a metadata entry
    #[must_use]
    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }

    /// Set the last update instant
    #[must_use]
    pub fn with_last_update(mut self, at: DateTime<Utc>) -> Self {
        self.last_update = Some(at);
        self
    }

    /// Declared license, trimmed, if non-blank
    #[must_use]
    pub fn declared_license(&self) -> Option<&str> {
        self.license.as_deref().map(str::trim).filter(|l| !l.is_empty())
    }

    /// Whole days since the last update, if known
    #[must_use]
    pub fn age_days(&self, now: DateTime<Utc>) -> Option<i64> {
        self.last_update.map(|at| (now - at).num_days())
    }
}

/// Upstream feeds carry assorted timestamp shapes; anything unparsable is
/// treated as "unknown" rather than rejecting the entity.
fn lenient_utc<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error> {
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(|s| parse_utc(s).ok()))
}

/// Tri-state admission decision
///
/// Variants are declared weakest-permission first, so `Ord` gives
/// `Deny < Review < Pass` and the strongest decision is the minimum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gate {
    /// Rejected
    Deny,
    /// Needs human review
    Review,
    /// Admitted
    Pass,
}

impl Gate {
    /// The stronger of two decisions (deny dominates)
    #[must_use]
    pub fn strongest(self, other: Self) -> Self {
        self.min(other)
    }

    /// Lowercase wire name
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Deny => "deny",
            Self::Review => "review",
            Self::Pass => "pass",
        }
    }

    /// Parse a wire name
    ///
    /// # Errors
    ///
    /// Returns error for anything other than `pass`, `deny` or `review`
    pub fn parse(s: &str) -> CoreResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "deny" => Ok(Self::Deny),
            "review" => Ok(Self::Review),
            "pass" => Ok(Self::Pass),
            other => Err(CoreError::Validation {
                field: "gate".to_string(),
                reason: format!("unknown effect '{}'", other),
            }),
        }
    }
}

impl std::fmt::Display for Gate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-factor scores, each in [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FactorScores {
    /// Who stands behind the entity
    pub provenance: f64,
    /// How permissive the license is
    pub permission: f64,
    /// How recently it was updated
    pub freshness: f64,
    /// Documentation and operational signals
    pub quality: f64,
    /// Absence of blocked tags
    pub safety: f64,
    /// Community reputation from votes
    pub reputation: f64,
}

impl FactorScores {
    /// Look up a factor by name
    #[must_use]
    pub fn get(&self, factor: &str) -> Option<f64> {
        match factor {
            "provenance" => Some(self.provenance),
            "permission" => Some(self.permission),
            "freshness" => Some(self.freshness),
            "quality" => Some(self.quality),
            "safety" => Some(self.safety),
            "reputation" => Some(self.reputation),
            _ => None,
        }
    }

    /// All factors as `(name, value)` pairs in a fixed order
    #[must_use]
    pub fn entries(&self) -> [(&'static str, f64); 6] {
        [
            ("provenance", self.provenance),
            ("permission", self.permission),
            ("freshness", self.freshness),
            ("quality", self.quality),
            ("safety", self.safety),
            ("reputation", self.reputation),
        ]
    }
}

/// Score of an entity plus its gate decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Score {
    /// Scored entity
    pub entity_id: EntityId,
    /// Per-factor scores
    pub scores: FactorScores,
    /// Weighted composite in [0, 1]
    pub composite: f64,
    /// Admission decision
    pub gate: Gate,
}

/// A voter's opinion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Opinion {
    /// Endorse
    Up,
    /// Object
    Down,
    /// No position
    #[default]
    Neutral,
}

impl Opinion {
    /// +1 for up, -1 for down, 0 for neutral
    #[must_use]
    pub const fn sign(&self) -> f64 {
        match self {
            Self::Up => 1.0,
            Self::Down => -1.0,
            Self::Neutral => 0.0,
        }
    }

    /// Lowercase wire name
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Down => "down",
            Self::Neutral => "neutral",
        }
    }
}

/// A single reputation vote (write-once)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vote {
    /// Entity voted on
    pub entity_id: EntityId,
    /// Voter identity
    pub voter_id: String,
    /// Stake backing the vote
    #[serde(default)]
    pub stake: f64,
    /// Opinion
    #[serde(default)]
    pub opinion: Opinion,
    /// Optional comment
    #[serde(default)]
    pub comment: Option<String>,
    /// Request nonce, when submitted through a signed request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    /// Request timestamp, when submitted through a signed request
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient_utc")]
    pub ts: Option<DateTime<Utc>>,
}

impl Vote {
    /// Create a vote with zero stake and no comment
    #[must_use]
    pub fn new(entity_id: EntityId, voter_id: impl Into<String>, opinion: Opinion) -> Self {
        Self {
            entity_id,
            voter_id: voter_id.into(),
            stake: 0.0,
            opinion,
            comment: None,
            nonce: None,
            ts: None,
        }
    }

    /// Set the stake
    #[must_use]
    pub fn with_stake(mut self, stake: f64) -> Self {
        self.stake = stake;
        self
    }

    /// Set the comment
    #[must_use]
    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    /// Attach the signed-request nonce and timestamp
    #[must_use]
    pub fn with_request(mut self, nonce: impl Into<String>, ts: DateTime<Utc>) -> Self {
        self.nonce = Some(nonce.into());
        self.ts = Some(ts);
        self
    }

    /// Check voter and stake
    ///
    /// # Errors
    ///
    /// Returns error for a blank voter or a negative/non-finite stake
    pub fn validate(&self) -> CoreResult<()> {
        if self.voter_id.trim().is_empty() {
            return Err(CoreError::Validation {
                field: "voter_id".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        if !self.stake.is_finite() || self.stake < 0.0 {
            return Err(CoreError::Validation {
                field: "stake".to_string(),
                reason: format!("must be a finite non-negative number, got {}", self.stake),
            });
        }
        Ok(())
    }
}
