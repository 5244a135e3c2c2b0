//! Admission service: scoring, gating, voting and snapshots over one
//! repository.

use crate::error::{RegistryError, RegistryResult};
use crate::ledger::{reputation, VoteRecord};
use crate::scoring::{ScoringEngine, NEUTRAL_REPUTATION};
use crate::snapshot::{StateSnapshot, StateSnapshotBuilder};
use affirm_certify::{Attestation, AttestationAuthority, AuthorityError};
use affirm_core::{CandidateEntity, Clock, EntityId, Gate, Score, Vote};
use affirm_policy::{CompiledPolicy, EvalContext, GateDecision};
use affirm_storage::{EntityRecord, EntityRepository};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Score plus the policy decision that gated it
#[derive(Debug, Clone, PartialEq)]
pub struct Admission {
    /// Score with its gate set
    pub score: Score,
    /// Policy decision
    pub decision: GateDecision,
}

impl Admission {
    /// Compact summary
    #[must_use]
    pub fn summary(&self) -> AdmissionSummary {
        AdmissionSummary {
            id: self.score.entity_id.clone(),
            composite: self.score.composite,
            gate: self.score.gate,
            reasons: self.decision.reasons.clone(),
        }
    }
}

/// Per-entity result of an ingest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdmissionSummary {
    /// Entity id
    pub id: EntityId,
    /// Composite score
    pub composite: f64,
    /// Gate decision
    pub gate: Gate,
    /// Triggered and errored rules
    pub reasons: Vec<String>,
}

/// Result of a vote
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoteOutcome {
    /// Reputation after the vote
    pub new_reputation: f64,
    /// Votes recorded for the entity
    pub total_votes: usize,
    /// Gate after re-scoring
    pub gate: Gate,
    /// Signable vote record
    pub record: VoteRecord,
    /// Signed record, when a key is configured
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attestation: Option<Attestation>,
}

/// A snapshot with its hash and optional signature
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SealedSnapshot {
    /// The snapshot
    pub snapshot: StateSnapshot,
    /// `sha256:<hex>` of the canonical snapshot
    pub hash: String,
    /// Signed snapshot, when a key is configured
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attestation: Option<Attestation>,
}

/// Admission service
pub struct AdmissionService {
    repository: Arc<dyn EntityRepository>,
    scoring: ScoringEngine,
    policy: Arc<CompiledPolicy>,
    snapshots: StateSnapshotBuilder,
    authority: Option<Arc<AttestationAuthority>>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for AdmissionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionService")
            .field("policy", &self.policy.version())
            .field("signing", &self.authority.is_some())
            .finish()
    }
}

impl AdmissionService {
    /// Create a service with no signing authority
    #[must_use]
    pub fn new(
        repository: Arc<dyn EntityRepository>,
        scoring: ScoringEngine,
        policy: Arc<CompiledPolicy>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            repository,
            scoring,
            policy,
            snapshots: StateSnapshotBuilder::default(),
            authority: None,
            clock,
        }
    }

    /// Sign vote records and snapshots with `authority`
    #[must_use]
    pub fn with_authority(mut self, authority: Arc<AttestationAuthority>) -> Self {
        self.authority = Some(authority);
        self
    }

    /// Replace the snapshot builder
    #[must_use]
    pub fn with_snapshots(mut self, snapshots: StateSnapshotBuilder) -> Self {
        self.snapshots = snapshots;
        self
    }

    /// Active policy
    #[must_use]
    pub fn policy(&self) -> &CompiledPolicy {
        &self.policy
    }

    fn admit(&self, entity: &CandidateEntity, reputation: f64, now: DateTime<Utc>) -> Admission {
        let mut score = self.scoring.score(entity, reputation, now);
        let ctx = EvalContext::for_entity(entity, &score, &self.scoring.config().blocked_tags, now);
        let decision = self.policy.evaluate(&ctx);
        score.gate = decision.effect;
        Admission { score, decision }
    }

    /// Score and gate an entity without storing it
    #[must_use]
    pub fn filter(&self, entity: &CandidateEntity) -> Admission {
        self.admit(entity, NEUTRAL_REPUTATION, self.clock.now())
    }

    /// Score, gate and store entities
    ///
    /// A re-ingested entity keeps its votes and the reputation they imply.
    ///
    /// # Errors
    ///
    /// Returns error if the repository fails
    pub fn ingest(&self, entities: Vec<CandidateEntity>) -> RegistryResult<Vec<AdmissionSummary>> {
        let now = self.clock.now();
        let mut out = Vec::with_capacity(entities.len());
        for entity in entities {
            let mut decision = None;
            let score = self.repository.upsert_with(entity, &mut |record: &EntityRecord| {
                let admission = self.admit(&record.entity, reputation(&record.votes), now);
                decision = Some(admission.decision);
                admission.score
            })?;
            tracing::debug!(
                entity = %score.entity_id,
                composite = score.composite,
                gate = %score.gate,
                "entity gated"
            );
            out.push(AdmissionSummary {
                id: score.entity_id.clone(),
                composite: score.composite,
                gate: score.gate,
                reasons: decision.map(|d| d.reasons).unwrap_or_default(),
            });
        }
        tracing::info!(count = out.len(), policy = %self.policy.version(), "ingested entities");
        Ok(out)
    }

    /// Stored entities with `composite >= min_score`, optionally one gate
    /// only, best first (ties by id)
    ///
    /// # Errors
    ///
    /// Returns error if the repository fails
    pub fn list(&self, min_score: f64, gate: Option<Gate>) -> RegistryResult<Vec<(CandidateEntity, Score)>> {
        let mut out: Vec<(CandidateEntity, Score)> = self
            .repository
            .records()?
            .into_iter()
            .filter_map(|r| r.score.map(|s| (r.entity, s)))
            .filter(|(_, s)| s.composite >= min_score && gate.is_none_or(|g| s.gate == g))
            .collect();
        out.sort_by(|(a, sa), (b, sb)| sb.composite.total_cmp(&sa.composite).then_with(|| a.id.cmp(&b.id)));
        Ok(out)
    }

    /// Record a vote, re-score and re-gate the entity, and attest the vote
    ///
    /// The vote append and re-score happen atomically for the entity.
    /// Signing happens only when a private key is configured; anchoring is
    /// best-effort and never fails the vote.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] for an unknown entity and
    /// [`RegistryError::Invalid`] for a malformed vote
    pub async fn vote(&self, vote: Vote) -> RegistryResult<VoteOutcome> {
        vote.validate()?;
        let now = self.clock.now();
        let cast = vote.clone();

        let rescore = |record: &EntityRecord| self.admit(&record.entity, reputation(&record.votes), now).score;
        let applied = self.repository.apply_vote(vote, &rescore)?;

        let prev_reputation = applied
            .previous
            .as_ref()
            .map_or(NEUTRAL_REPUTATION, |s| s.scores.reputation);
        let new_reputation = applied.current.scores.reputation;
        let record = VoteRecord::new(&cast, prev_reputation, new_reputation, self.policy.version(), now);

        tracing::info!(
            entity = %cast.entity_id,
            voter = %cast.voter_id,
            opinion = cast.opinion.as_str(),
            reputation = new_reputation,
            gate = %applied.current.gate,
            "vote recorded"
        );

        let attestation = match self.signing_authority() {
            Some(authority) => Some(authority.attest_and_anchor(&record).await?),
            None => None,
        };

        Ok(VoteOutcome {
            new_reputation: record.new_reputation,
            total_votes: applied.total_votes,
            gate: applied.current.gate,
            record,
            attestation,
        })
    }

    fn signing_authority(&self) -> Option<&AttestationAuthority> {
        self.authority.as_deref().filter(|a| a.can_sign())
    }

    /// Current registry state
    ///
    /// # Errors
    ///
    /// Returns error if the repository fails
    pub fn snapshot(&self) -> RegistryResult<StateSnapshot> {
        let records = self.repository.records()?;
        Ok(self.snapshots.build(records, self.clock.now())?)
    }

    /// Snapshot, hash and (if a key is configured) sign the registry state
    ///
    /// # Errors
    ///
    /// Returns error if the repository or signing fails
    pub fn seal_snapshot(&self) -> RegistryResult<SealedSnapshot> {
        let snapshot = self.snapshot()?;
        let hash = snapshot.hash()?.to_string();
        let attestation = match self.signing_authority() {
            Some(authority) => Some(authority.attest(&snapshot)?),
            None => None,
        };
        tracing::info!(hash = %hash, items = snapshot.items.len(), signed = attestation.is_some(), "snapshot sealed");
        Ok(SealedSnapshot {
            snapshot,
            hash,
            attestation,
        })
    }

    /// Seal a snapshot and forward it to the anchor
    ///
    /// # Errors
    ///
    /// Returns [`AuthorityError::Configuration`] when no signing key is
    /// configured; anchoring failures are recorded on the attestation
    pub async fn anchor_snapshot(&self) -> RegistryResult<SealedSnapshot> {
        let authority = self.signing_authority().ok_or_else(|| AuthorityError::Configuration {
            reason: "anchoring a snapshot requires a signing key".to_string(),
        })?;
        let mut sealed = self.seal_snapshot()?;
        if let Some(attestation) = sealed.attestation.take() {
            sealed.attestation = Some(authority.anchor(attestation).await);
        }
        Ok(sealed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoring::ScoringConfig;
    use affirm_certify::{
        Anchor, AnchorError, AttestationVerifier, AuthorityConfig, KeyStore, VerifierConfig,
    };
    use affirm_core::{Endpoint, ManualClock, Opinion};
    use affirm_storage::MemoryRepository;
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone};
    use serde_json::{json, Value};

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap()))
    }

    fn service(clock: Arc<ManualClock>) -> AdmissionService {
        AdmissionService::new(
            Arc::new(MemoryRepository::new()),
            ScoringEngine::new(ScoringConfig::default()).unwrap(),
            Arc::new(CompiledPolicy::bundled().unwrap()),
            clock,
        )
    }

    fn signing_keys(clock: Arc<ManualClock>) -> Arc<KeyStore> {
        let keys = Arc::new(KeyStore::new("affirm.test", "affirm", clock));
        keys.rotate().unwrap();
        keys
    }

    fn id(s: &str) -> EntityId {
        EntityId::new(s).unwrap()
    }

    fn strong(s: &str, now: DateTime<Utc>) -> CandidateEntity {
        CandidateEntity::new(id(s))
            .with_domain("data.example.org")
            .with_owner("org", "Example")
            .with_endpoint(Endpoint::get("/v1").with_schema("openapi.yaml"))
            .with_license("MIT")
            .with_meta("uptime", "0.99")
            .with_last_update(now - Duration::days(10))
    }

    #[test]
    fn test_ingest_gates_with_bundled_policy() {
        let clock = clock();
        let svc = service(clock.clone());
        let now = clock.now();

        let results = svc
            .ingest(vec![
                strong("src:good", now),
                strong("src:leaky", now).with_tag("pii_leak"),
                CandidateEntity::new(id("src:bare")),
            ])
            .unwrap();

        assert_eq!(results[0].gate, Gate::Pass);
        assert_eq!(results[0].composite, 0.912);
        assert_eq!(results[0].reasons, vec!["pass_high_composite:pass"]);

        assert_eq!(results[1].gate, Gate::Deny);
        assert!(results[1].reasons.contains(&"deny_pii_leak:deny".to_string()));
        assert!(results[1].reasons.contains(&"deny_unsafe:deny".to_string()));

        assert_eq!(results[2].gate, Gate::Review);
        assert_eq!(results[2].reasons, vec!["review_unlicensed:review"]);
    }

    #[test]
    fn test_filter_does_not_store() {
        let clock = clock();
        let svc = service(clock.clone());
        let admission = svc.filter(&strong("src:a", clock.now()));
        assert_eq!(admission.score.gate, Gate::Pass);
        assert!(svc.list(0.0, None).unwrap().is_empty());
    }

    #[test]
    fn test_list_sorted_and_filtered() {
        let clock = clock();
        let svc = service(clock.clone());
        let now = clock.now();
        svc.ingest(vec![
            CandidateEntity::new(id("src:low")),
            strong("src:b", now),
            strong("src:a", now),
            strong("src:bad", now).with_tag("malware"),
        ])
        .unwrap();

        let all: Vec<String> = svc
            .list(0.0, None)
            .unwrap()
            .into_iter()
            .map(|(e, _)| e.id.to_string())
            .collect();
        assert_eq!(all, vec!["src:a", "src:b", "src:bad", "src:low"]);

        let passing = svc.list(0.5, Some(Gate::Pass)).unwrap();
        assert_eq!(passing.len(), 2);
        assert!(svc.list(0.99, None).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_vote_unknown_entity_not_found() {
        let svc = service(clock());
        let err = svc.vote(Vote::new(id("src:ghost"), "alice", Opinion::Up)).await.unwrap_err();
        assert_eq!(err, RegistryError::NotFound("src:ghost".to_string()));
    }

    #[tokio::test]
    async fn test_vote_rejects_blank_voter() {
        let svc = service(clock());
        let err = svc.vote(Vote::new(id("src:a"), " ", Opinion::Up)).await.unwrap_err();
        assert!(matches!(err, RegistryError::Invalid(_)));
    }

    #[tokio::test]
    async fn test_vote_rescores_without_key() {
        let clock = clock();
        let svc = service(clock.clone());
        svc.ingest(vec![strong("src:a", clock.now())]).unwrap();

        let outcome = svc
            .vote(Vote::new(id("src:a"), "alice", Opinion::Up).with_stake(10.0))
            .await
            .unwrap();
        assert_eq!(outcome.total_votes, 1);
        assert_eq!(outcome.new_reputation, 0.86);
        assert_eq!(outcome.record.prev_reputation, 0.7);
        assert!(outcome.attestation.is_none());

        let (_, score) = svc.list(0.0, None).unwrap().remove(0);
        assert_eq!(score.scores.reputation, 0.86);
        assert!(score.composite > 0.912);

        let outcome = svc.vote(Vote::new(id("src:a"), "bob", Opinion::Down)).await.unwrap();
        assert_eq!(outcome.total_votes, 2);
        assert_eq!(outcome.record.prev_reputation, 0.86);
    }

    #[tokio::test]
    async fn test_reingest_keeps_vote_reputation() {
        let clock = clock();
        let svc = service(clock.clone());
        svc.ingest(vec![strong("src:a", clock.now())]).unwrap();
        svc.vote(Vote::new(id("src:a"), "alice", Opinion::Up).with_stake(10.0))
            .await
            .unwrap();

        svc.ingest(vec![strong("src:a", clock.now())]).unwrap();
        let (_, score) = svc.list(0.0, None).unwrap().remove(0);
        assert_eq!(score.scores.reputation, 0.86);
    }

    #[tokio::test]
    async fn test_concurrent_ingest_does_not_drop_votes() {
        let clock = clock();
        let svc = Arc::new(service(clock.clone()));
        let entity = strong("src:a", clock.now());
        svc.ingest(vec![entity.clone()]).unwrap();

        let ingester = {
            let svc = Arc::clone(&svc);
            std::thread::spawn(move || {
                for _ in 0..200 {
                    svc.ingest(vec![entity.clone()]).unwrap();
                }
            })
        };
        for i in 0..20 {
            svc.vote(Vote::new(id("src:a"), format!("voter-{}", i), Opinion::Up))
                .await
                .unwrap();
        }
        ingester.join().unwrap();

        let (_, score) = svc.list(0.0, None).unwrap().remove(0);
        assert!((score.scores.reputation - 0.85).abs() < 1e-9, "{}", score.scores.reputation);
    }

    #[tokio::test]
    async fn test_signed_vote_verifies() {
        let clock = clock();
        let keys = signing_keys(clock.clone());
        let authority = Arc::new(AttestationAuthority::new(keys.clone(), AuthorityConfig::default()));
        let svc = service(clock.clone()).with_authority(authority);
        svc.ingest(vec![strong("src:a", clock.now())]).unwrap();

        let outcome = svc.vote(Vote::new(id("src:a"), "alice", Opinion::Up)).await.unwrap();
        let attestation = outcome.attestation.unwrap();
        assert_eq!(attestation.content["type"], "affirm.repute.vote");
        assert_eq!(attestation.content["nonce"], outcome.record.nonce);

        let verifier = AttestationVerifier::new(keys, clock, VerifierConfig::default());
        assert!(verifier.verify_attestation(&attestation).unwrap().ok);
    }

    #[test]
    fn test_seal_snapshot_unsigned_and_signed() {
        let clock = clock();
        let svc = service(clock.clone());
        svc.ingest(vec![strong("src:a", clock.now())]).unwrap();
        let sealed = svc.seal_snapshot().unwrap();
        assert!(sealed.attestation.is_none());
        assert_eq!(sealed.hash, sealed.snapshot.hash().unwrap().to_string());

        let keys = signing_keys(clock.clone());
        let svc = svc.with_authority(Arc::new(AttestationAuthority::new(keys, AuthorityConfig::default())));
        let sealed = svc.seal_snapshot().unwrap();
        let attestation = sealed.attestation.unwrap();
        assert_eq!(attestation.content["type"], "affirm.state.snapshot");
        assert_eq!(attestation.content_hash, sealed.hash);
    }

    #[test]
    fn test_snapshot_only_ts_changes() {
        let clock = clock();
        let svc = service(clock.clone());
        svc.ingest(vec![strong("src:a", clock.now()), CandidateEntity::new(id("src:b"))])
            .unwrap();
        let first = svc.snapshot().unwrap();
        clock.advance(Duration::minutes(3));
        let second = svc.snapshot().unwrap();
        assert_ne!(first.ts, second.ts);
        assert_eq!(first.items, second.items);
    }

    struct Ledger;

    #[async_trait]
    impl Anchor for Ledger {
        async fn anchor(&self, attestation: &Attestation) -> Result<Value, AnchorError> {
            Ok(json!({"receipt": attestation.content_hash}))
        }
    }

    #[tokio::test]
    async fn test_anchor_snapshot() {
        let clock = clock();
        let svc = service(clock.clone());
        let err = svc.anchor_snapshot().await.unwrap_err();
        assert!(matches!(err, RegistryError::Authority(AuthorityError::Configuration { .. })));

        let authority = AttestationAuthority::new(signing_keys(clock.clone()), AuthorityConfig::default())
            .with_anchor(Arc::new(Ledger));
        let svc = svc.with_authority(Arc::new(authority));
        let sealed = svc.anchor_snapshot().await.unwrap();
        let attestation = sealed.attestation.unwrap();
        assert_eq!(attestation.ledger_receipt, Some(json!({"receipt": sealed.hash})));
    }
}
