//! Heuristic entity scoring.

use affirm_core::{CandidateEntity, CoreError, CoreResult, FactorScores, Gate, Score};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Reputation of an entity nobody has voted on
pub const NEUTRAL_REPUTATION: f64 = 0.7;

/// Per-factor weights of the composite score
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Weights {
    /// Provenance weight
    pub provenance: f64,
    /// Permission weight
    pub permission: f64,
    /// Freshness weight
    pub freshness: f64,
    /// Quality weight
    pub quality: f64,
    /// Safety weight
    pub safety: f64,
    /// Reputation weight
    pub reputation: f64,
}

impl Default for Weights {
    fn default() -> Self {
        Self {
            provenance: 0.20,
            permission: 0.15,
            freshness: 0.15,
            quality: 0.20,
            safety: 0.20,
            reputation: 0.10,
        }
    }
}

impl Weights {
    /// Sum of all weights
    #[must_use]
    pub fn total(&self) -> f64 {
        self.provenance + self.permission + self.freshness + self.quality + self.safety + self.reputation
    }

    fn combine(&self, f: &FactorScores) -> f64 {
        f.provenance * self.provenance
            + f.permission * self.permission
            + f.freshness * self.freshness
            + f.quality * self.quality
            + f.safety * self.safety
            + f.reputation * self.reputation
    }
}

/// Scoring configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Composite weights
    pub weights: Weights,
    /// Licenses that earn full permission, lowercase
    pub open_licenses: BTreeSet<String>,
    /// Tags that collapse safety
    pub blocked_tags: BTreeSet<String>,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        let set = |items: &[&str]| items.iter().map(|s| (*s).to_string()).collect();
        Self {
            weights: Weights::default(),
            open_licenses: set(&["mit", "apache-2.0", "bsd-3-clause", "cc-by-4.0", "cc0"]),
            blocked_tags: set(&["pii_leak", "pii-leak", "unsafe", "malware", "hate"]),
        }
    }
}

impl ScoringConfig {
    /// Check weights are finite, non-negative and sum to 1
    ///
    /// # Errors
    ///
    /// Returns a validation error naming the offending weights
    pub fn validate(&self) -> CoreResult<()> {
        let w = &self.weights;
        let all = [w.provenance, w.permission, w.freshness, w.quality, w.safety, w.reputation];
        if all.iter().any(|v| !v.is_finite() || *v < 0.0) {
            return Err(CoreError::Validation {
                field: "weights".to_string(),
                reason: "weights must be finite and non-negative".to_string(),
            });
        }
        let total = w.total();
        if (total - 1.0).abs() > 1e-9 {
            return Err(CoreError::Validation {
                field: "weights".to_string(),
                reason: format!("weights must sum to 1.0, got {}", total),
            });
        }
        Ok(())
    }
}

fn clamp(x: f64) -> f64 {
    if x.is_nan() { 0.0 } else { x.clamp(0.0, 1.0) }
}

fn round_to(x: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (x * factor).round() / factor
}

/// Scores entities against [`ScoringConfig`]
#[derive(Debug, Clone, Default)]
pub struct ScoringEngine {
    config: ScoringConfig,
}

impl ScoringEngine {
    /// Create an engine
    ///
    /// # Errors
    ///
    /// Returns error if the configuration does not validate
    pub fn new(config: ScoringConfig) -> CoreResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Active configuration
    #[must_use]
    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Unrounded factor values
    #[must_use]
    pub fn factors(&self, entity: &CandidateEntity, reputation: f64, now: DateTime<Utc>) -> FactorScores {
        FactorScores {
            provenance: self.provenance(entity),
            permission: self.permission(entity),
            freshness: Self::freshness(entity, now),
            quality: Self::quality(entity),
            safety: self.safety(entity),
            reputation: clamp(reputation),
        }
    }

    /// Score an entity
    ///
    /// Factors are rounded to 2 places; the composite is computed from the
    /// unrounded factors and rounded to 3. The gate starts at review until
    /// a policy decides it.
    #[must_use]
    pub fn score(&self, entity: &CandidateEntity, reputation: f64, now: DateTime<Utc>) -> Score {
        let raw = self.factors(entity, reputation, now);
        let composite = round_to(clamp(self.config.weights.combine(&raw)), 3);
        let scores = FactorScores {
            provenance: round_to(raw.provenance, 2),
            permission: round_to(raw.permission, 2),
            freshness: round_to(raw.freshness, 2),
            quality: round_to(raw.quality, 2),
            safety: round_to(raw.safety, 2),
            reputation: round_to(raw.reputation, 2),
        };
        Score {
            entity_id: entity.id.clone(),
            scores,
            composite,
            gate: Gate::Review,
        }
    }

    fn provenance(&self, entity: &CandidateEntity) -> f64 {
        let mut p = 0.2;
        if !entity.domain.trim().is_empty() {
            p += 0.3;
        }
        if entity.owner.contains_key("org") || entity.owner.contains_key("contact") {
            p += 0.3;
        }
        if !entity.endpoints.is_empty() {
            p += 0.2;
        }
        clamp(p)
    }

    fn permission(&self, entity: &CandidateEntity) -> f64 {
        match entity.declared_license() {
            Some(l) if self.config.open_licenses.contains(&l.to_lowercase()) => 1.0,
            Some(_) => 0.7,
            None => 0.6,
        }
    }

    fn freshness(entity: &CandidateEntity, now: DateTime<Utc>) -> f64 {
        match entity.age_days(now) {
            None => 0.6,
            Some(d) if d <= 30 => 0.95,
            Some(d) if d <= 90 => 0.85,
            Some(d) if d <= 180 => 0.75,
            Some(_) => 0.5,
        }
    }

    fn quality(entity: &CandidateEntity) -> f64 {
        let mut q = 0.4;
        if entity.endpoints.iter().any(|e| e.is_documented()) {
            q += 0.3;
        }
        if entity.meta.contains_key("rate_limit") {
            q += 0.2;
        }
        if let Some(uptime) = entity.meta.get("uptime").and_then(|u| u.trim().parse::<f64>().ok()) {
            q += 0.1 * clamp(uptime);
        }
        clamp(q)
    }

    fn safety(&self, entity: &CandidateEntity) -> f64 {
        if entity.tags.iter().any(|t| self.config.blocked_tags.contains(t)) {
            0.2
        } else {
            0.95
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use affirm_core::{Endpoint, EntityId};
    use chrono::{Duration, TimeZone};
    use proptest::prelude::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap()
    }

    fn bare(id: &str) -> CandidateEntity {
        CandidateEntity::new(EntityId::new(id).unwrap())
    }

    #[test]
    fn test_golden_score() {
        let entity = bare("src:golden")
            .with_domain("data.example.org")
            .with_owner("org", "Example Org")
            .with_endpoint(Endpoint::get("/v1/items").with_schema("openapi.yaml"))
            .with_license("MIT")
            .with_meta("uptime", "0.99")
            .with_last_update(now() - Duration::days(10));

        let score = ScoringEngine::default().score(&entity, NEUTRAL_REPUTATION, now());
        assert_eq!(score.scores.provenance, 1.0);
        assert_eq!(score.scores.permission, 1.0);
        assert_eq!(score.scores.freshness, 0.95);
        assert_eq!(score.scores.quality, 0.8);
        assert_eq!(score.scores.safety, 0.95);
        assert_eq!(score.scores.reputation, 0.7);
        assert_eq!(score.composite, 0.912);
        assert_eq!(score.gate, Gate::Review);
    }

    #[test]
    fn test_empty_entity_defaults() {
        let score = ScoringEngine::default().score(&bare("src:empty"), NEUTRAL_REPUTATION, now());
        assert_eq!(score.scores.provenance, 0.2);
        assert_eq!(score.scores.permission, 0.6);
        assert_eq!(score.scores.freshness, 0.6);
        assert_eq!(score.scores.quality, 0.4);
        assert_eq!(score.scores.safety, 0.95);
    }

    #[test]
    fn test_license_and_freshness_bands() {
        let engine = ScoringEngine::default();
        let f = |e: &CandidateEntity| engine.factors(e, 0.7, now());

        assert_eq!(f(&bare("a").with_license("Apache-2.0")).permission, 1.0);
        assert_eq!(f(&bare("a").with_license("GPL-3.0")).permission, 0.7);
        assert_eq!(f(&bare("a").with_license("   ")).permission, 0.6);

        let aged = |days| bare("a").with_last_update(now() - Duration::days(days));
        assert_eq!(f(&aged(30)).freshness, 0.95);
        assert_eq!(f(&aged(31)).freshness, 0.85);
        assert_eq!(f(&aged(90)).freshness, 0.85);
        assert_eq!(f(&aged(180)).freshness, 0.75);
        assert_eq!(f(&aged(181)).freshness, 0.5);
    }

    #[test]
    fn test_blocked_tag_collapses_safety() {
        let engine = ScoringEngine::default();
        for tag in ["pii_leak", "pii-leak", "malware"] {
            let score = engine.score(&bare("a").with_tag(tag), 0.7, now());
            assert_eq!(score.scores.safety, 0.2, "{}", tag);
        }
        assert_eq!(engine.score(&bare("a").with_tag("beta"), 0.7, now()).scores.safety, 0.95);
    }

    #[test]
    fn test_unparsable_uptime_ignored() {
        let q = ScoringEngine::default()
            .factors(&bare("a").with_meta("uptime", "high").with_meta("rate_limit", "10/s"), 0.7, now())
            .quality;
        assert!((q - 0.6).abs() < 1e-12);
    }

    #[test]
    fn test_validate_rejects_bad_weights() {
        let mut config = ScoringConfig::default();
        assert!(config.validate().is_ok());
        config.weights.quality = 0.3;
        assert!(ScoringEngine::new(config.clone()).is_err());
        config.weights.quality = f64::NAN;
        assert!(config.validate().is_err());
    }

    proptest! {
        #[test]
        fn prop_scores_clamped(
            uptime in "\\PC{0,8}",
            reputation in -10.0f64..10.0,
            days in proptest::option::of(-1000i64..5000),
            tags in proptest::collection::vec("[a-z_-]{1,10}", 0..4),
            license in proptest::option::of("[A-Za-z0-9.-]{0,12}"),
        ) {
            let mut entity = bare("src:prop").with_meta("uptime", uptime);
            for tag in tags {
                entity = entity.with_tag(tag);
            }
            if let Some(l) = license {
                entity = entity.with_license(l);
            }
            if let Some(d) = days {
                entity = entity.with_last_update(now() - Duration::days(d));
            }
            let score = ScoringEngine::default().score(&entity, reputation, now());
            for (_, v) in score.scores.entries() {
                prop_assert!((0.0..=1.0).contains(&v));
            }
            prop_assert!((0.0..=1.0).contains(&score.composite));
        }
    }
}
