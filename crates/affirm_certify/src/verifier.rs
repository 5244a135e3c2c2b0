//! Attestation verification.
//!
//! Order matters: the content hash is checked before any signature work,
//! keys are tried current first then history in stored order, and side
//! checks only run once a key has matched.

use crate::attestation::Attestation;
use crate::keystore::{KeySetSnapshot, KeyStore, KeyStoreResult, SigningKeyRecord};
use crate::signature::{PublicKeyBytes, Signature, Verifier};
use affirm_core::hash::SHA256_PREFIX;
use affirm_core::time::{format_utc, parse_utc};
use affirm_core::{canonical_bytes, Clock, ContentHash, FreshnessWindow};
use affirm_storage::NonceGuard;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Verifier configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifierConfig {
    /// Window around now within which content `ts` counts as fresh
    pub freshness: FreshnessWindow,
    /// Try the attestation's own public key when no stored key matches
    pub trust_embedded_key: bool,
    /// Fail unless the embedded key is in the published keyset
    pub require_known_signer: bool,
    /// Fail unless content `ts` is fresh
    pub require_fresh: bool,
    /// Fail unless the content nonce is unused
    pub require_nonce: bool,
}

/// Outcome of a non-blocking check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckOutcome {
    /// Check passed
    Pass,
    /// Check failed
    Fail,
    /// Nothing to check
    NotApplicable,
    /// Check could not be decided
    Indeterminate,
}

/// Side checks reported once the hash matches and the signature parses
///
/// `nonce_unused` is only evaluated after a key verified the signature;
/// otherwise it is `indeterminate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SideChecks {
    /// Embedded public key is in the published keyset
    pub signer_known: CheckOutcome,
    /// Content `ts` within the freshness window
    pub fresh: CheckOutcome,
    /// Content nonce not seen before
    pub nonce_unused: CheckOutcome,
}

/// Why verification failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum VerificationFailure {
    /// Input is not a well-formed attestation or request
    Malformed {
        /// Offending field
        field: String,
        /// What is wrong with it
        reason: String,
    },
    /// Recomputed hash differs from the claimed one
    HashMismatch {
        /// Claimed hash
        claimed: String,
    },
    /// Signature string could not be parsed
    BadSigFormat {
        /// Parser message
        reason: String,
    },
    /// No key verified the signature
    SignatureInvalid,
    /// A side check marked mandatory did not pass
    SideCheckFailed {
        /// Name of the check
        check: String,
        /// Its outcome
        outcome: CheckOutcome,
    },
}

impl VerificationFailure {
    /// Short failure code
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Malformed { .. } => "malformed",
            Self::HashMismatch { .. } => "hash_mismatch",
            Self::BadSigFormat { .. } => "bad_sig_format",
            Self::SignatureInvalid => "signature_invalid",
            Self::SideCheckFailed { .. } => "side_check_failed",
        }
    }
}

/// Where a matching key came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeySource {
    /// The active key
    Current,
    /// A retired key
    History,
    /// The attestation's own public key
    Embedded,
}

/// The key that verified the signature
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchedKey {
    /// Key id
    pub kid: String,
    /// Base64 public key
    pub public_key_b64: String,
    /// Creation timestamp, if known
    pub created: Option<String>,
    /// Issuer, if known
    pub issuer: Option<String>,
    /// Where it came from
    pub source: KeySource,
    /// Position in history when `source` is `history`
    pub history_index: Option<usize>,
}

/// One key tried without success
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyAttempt {
    /// Key id
    pub kid: String,
    /// Failure class
    pub reason: String,
}

/// What the signature was checked over in detached verification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignedOver {
    /// Canonical attestation content
    Content,
    /// Caller-supplied payload string
    Payload,
    /// Caller-supplied 32-byte digest
    Digest,
}

/// Result of a verification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationReport {
    /// Whether the attestation is accepted
    pub ok: bool,
    /// Why not, when `ok` is false
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<VerificationFailure>,
    /// Hash recomputed from content
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recomputed_hash: Option<String>,
    /// What bytes the signature covered
    pub signed_over: SignedOver,
    /// Matching key
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_key: Option<MatchedKey>,
    /// Keys tried before the match, or all keys on failure
    pub attempts: Vec<KeyAttempt>,
    /// Side checks, present once the hash matched and the signature parsed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub side_checks: Option<SideChecks>,
    /// When the check ran
    pub checked_at: String,
}

impl VerificationReport {
    fn new(signed_over: SignedOver, checked_at: String) -> Self {
        Self {
            ok: false,
            failure: None,
            recomputed_hash: None,
            signed_over,
            matched_key: None,
            attempts: Vec::new(),
            side_checks: None,
            checked_at,
        }
    }

    fn fail(mut self, failure: VerificationFailure) -> Self {
        self.ok = false;
        self.failure = Some(failure);
        self
    }
}

/// Ad-hoc verification input: a signature over a payload or a digest
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetachedRequest {
    /// Exact UTF-8 string that was signed
    #[serde(default)]
    pub payload: Option<String>,
    /// `sha256:<hex>` or bare hex; the decoded bytes are the message
    #[serde(default)]
    pub digest: Option<String>,
    /// `ed25519:<base64>` or bare base64
    pub signature: String,
}

struct Candidate<'a> {
    record: Option<&'a SigningKeyRecord>,
    public_key: PublicKeyBytes,
    kid: String,
    source: KeySource,
    history_index: Option<usize>,
}

impl Candidate<'_> {
    fn matched(&self) -> MatchedKey {
        MatchedKey {
            kid: self.kid.clone(),
            public_key_b64: self.public_key.to_base64(),
            created: self.record.map(|r| format_utc(r.created)),
            issuer: self.record.map(|r| r.issuer.clone()),
            source: self.source,
            history_index: self.history_index,
        }
    }
}

fn stored_candidates(snapshot: &KeySetSnapshot) -> Vec<Candidate<'_>> {
    let current = snapshot.current.iter().map(|c| Candidate {
        record: Some(&c.record),
        public_key: c.record.public_key,
        kid: c.record.kid.to_string(),
        source: KeySource::Current,
        history_index: None,
    });
    let history = snapshot.history.iter().enumerate().map(|(i, r)| Candidate {
        record: Some(r),
        public_key: r.public_key,
        kid: r.kid.to_string(),
        source: KeySource::History,
        history_index: Some(i),
    });
    current.chain(history).collect()
}

/// Verifies attestations against a [`KeyStore`]
pub struct AttestationVerifier {
    keys: Arc<KeyStore>,
    nonces: Option<NonceGuard>,
    clock: Arc<dyn Clock>,
    config: VerifierConfig,
}

impl std::fmt::Debug for AttestationVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttestationVerifier")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl AttestationVerifier {
    /// Create a verifier without replay protection
    #[must_use]
    pub fn new(keys: Arc<KeyStore>, clock: Arc<dyn Clock>, config: VerifierConfig) -> Self {
        Self {
            keys,
            nonces: None,
            clock,
            config,
        }
    }

    /// Enable the nonce side check
    #[must_use]
    pub fn with_nonce_guard(mut self, guard: NonceGuard) -> Self {
        self.nonces = Some(guard);
        self
    }

    /// Verify an attestation given as untrusted JSON
    ///
    /// Verification problems are reported in the returned value, not as
    /// errors.
    ///
    /// # Errors
    ///
    /// Returns error only if the key store lock is poisoned
    pub fn verify(&self, value: &Value) -> KeyStoreResult<VerificationReport> {
        let report = VerificationReport::new(SignedOver::Content, format_utc(self.clock.now()));
        match Attestation::from_value(value) {
            Ok(attestation) => self.verify_attestation(&attestation),
            Err(malformed) => Ok(report.fail(VerificationFailure::Malformed {
                field: malformed.field.to_string(),
                reason: malformed.reason,
            })),
        }
    }

    /// Verify a typed attestation
    ///
    /// # Errors
    ///
    /// Returns error only if the key store lock is poisoned
    pub fn verify_attestation(&self, attestation: &Attestation) -> KeyStoreResult<VerificationReport> {
        let mut report = VerificationReport::new(SignedOver::Content, format_utc(self.clock.now()));

        let message = match canonical_bytes(&attestation.content) {
            Ok(bytes) => bytes,
            Err(e) => {
                return Ok(report.fail(VerificationFailure::Malformed {
                    field: "content".to_string(),
                    reason: e.to_string(),
                }));
            }
        };
        let recomputed = ContentHash::compute(&message);
        report.recomputed_hash = Some(recomputed.to_string());

        // An unparseable claim cannot equal the recomputed hash
        let claimed_matches = ContentHash::parse(&attestation.content_hash).is_ok_and(|claimed| claimed == recomputed);
        if !claimed_matches {
            tracing::debug!(claimed = %attestation.content_hash, "content hash mismatch");
            return Ok(report.fail(VerificationFailure::HashMismatch {
                claimed: attestation.content_hash.clone(),
            }));
        }

        let signature = match Signature::from_wire(&attestation.signature) {
            Ok(sig) => sig,
            Err(e) => {
                return Ok(report.fail(VerificationFailure::BadSigFormat {
                    reason: e.to_string(),
                }));
            }
        };

        let snapshot = self.keys.snapshot()?;
        let mut candidates = stored_candidates(&snapshot);
        if self.config.trust_embedded_key {
            if let Ok(public_key) = PublicKeyBytes::from_base64(&attestation.public_key_b64) {
                if candidates.iter().all(|c| c.public_key != public_key) {
                    candidates.push(Candidate {
                        record: None,
                        public_key,
                        kid: attestation.signing_key.clone(),
                        source: KeySource::Embedded,
                        history_index: None,
                    });
                }
            }
        }

        let signer_known = self.check_signer_known(&snapshot, &attestation.public_key_b64);
        let fresh = self.check_fresh(&attestation.content);

        let Some(matched) = try_keys(&candidates, &message, &signature, &mut report.attempts) else {
            tracing::debug!(attempts = report.attempts.len(), "no key verified the signature");
            // The nonce is only consumed for a verified signature
            report.side_checks = Some(SideChecks {
                signer_known,
                fresh,
                nonce_unused: CheckOutcome::Indeterminate,
            });
            return Ok(report.fail(VerificationFailure::SignatureInvalid));
        };
        report.matched_key = Some(matched);

        let checks = SideChecks {
            signer_known,
            fresh,
            nonce_unused: self.check_nonce(attestation, report.matched_key.as_ref()),
        };
        report.side_checks = Some(checks);

        let required = [
            ("signer_known", self.config.require_known_signer, checks.signer_known),
            ("fresh", self.config.require_fresh, checks.fresh),
            ("nonce_unused", self.config.require_nonce, checks.nonce_unused),
        ];
        if let Some((check, _, outcome)) = required
            .into_iter()
            .find(|(_, required, outcome)| *required && *outcome != CheckOutcome::Pass)
        {
            return Ok(report.fail(VerificationFailure::SideCheckFailed {
                check: check.to_string(),
                outcome,
            }));
        }

        report.ok = true;
        Ok(report)
    }

    /// Verify a detached signature over a payload or digest
    ///
    /// # Errors
    ///
    /// Returns error only if the key store lock is poisoned
    pub fn verify_detached(&self, request: &DetachedRequest) -> KeyStoreResult<VerificationReport> {
        let checked_at = format_utc(self.clock.now());
        let (signed_over, message) = match (&request.payload, &request.digest) {
            (Some(payload), _) if !payload.is_empty() => (SignedOver::Payload, payload.as_bytes().to_vec()),
            (_, Some(digest)) if !digest.is_empty() => {
                let hex_part = digest.strip_prefix(SHA256_PREFIX).unwrap_or(digest.as_str());
                match hex::decode(hex_part) {
                    Ok(bytes) => (SignedOver::Digest, bytes),
                    Err(e) => {
                        return Ok(VerificationReport::new(SignedOver::Digest, checked_at).fail(
                            VerificationFailure::Malformed {
                                field: "digest".to_string(),
                                reason: e.to_string(),
                            },
                        ));
                    }
                }
            }
            _ => {
                return Ok(VerificationReport::new(SignedOver::Payload, checked_at).fail(
                    VerificationFailure::Malformed {
                        field: "payload".to_string(),
                        reason: "provide either payload or digest".to_string(),
                    },
                ));
            }
        };

        let mut report = VerificationReport::new(signed_over, checked_at);
        let signature = match Signature::from_wire_lenient(&request.signature) {
            Ok(sig) => sig,
            Err(e) => {
                return Ok(report.fail(VerificationFailure::BadSigFormat {
                    reason: e.to_string(),
                }));
            }
        };

        let snapshot = self.keys.snapshot()?;
        let candidates = stored_candidates(&snapshot);
        match try_keys(&candidates, &message, &signature, &mut report.attempts) {
            Some(matched) => {
                report.matched_key = Some(matched);
                report.ok = true;
                Ok(report)
            }
            None => Ok(report.fail(VerificationFailure::SignatureInvalid)),
        }
    }

    fn check_signer_known(&self, snapshot: &KeySetSnapshot, public_key_b64: &str) -> CheckOutcome {
        if public_key_b64.is_empty() {
            return CheckOutcome::NotApplicable;
        }
        match PublicKeyBytes::from_base64(public_key_b64) {
            Ok(key) if snapshot.records().any(|r| r.public_key == key) => CheckOutcome::Pass,
            Ok(_) => CheckOutcome::Fail,
            Err(_) => CheckOutcome::Indeterminate,
        }
    }

    fn check_fresh(&self, content: &Value) -> CheckOutcome {
        match content.get("ts") {
            None | Some(Value::Null) => CheckOutcome::NotApplicable,
            Some(Value::String(ts)) => match parse_utc(ts) {
                Ok(ts) if self.config.freshness.contains(ts, self.clock.now()) => CheckOutcome::Pass,
                Ok(_) => CheckOutcome::Fail,
                Err(_) => CheckOutcome::Indeterminate,
            },
            Some(_) => CheckOutcome::Indeterminate,
        }
    }

    fn check_nonce(&self, attestation: &Attestation, matched: Option<&MatchedKey>) -> CheckOutcome {
        let Some(guard) = &self.nonces else {
            return CheckOutcome::NotApplicable;
        };
        let Some(nonce) = attestation.content_str("nonce").filter(|n| !n.is_empty()) else {
            return CheckOutcome::NotApplicable;
        };
        let identity = attestation
            .content_str("voter_id")
            .or_else(|| matched.map(|m| m.kid.as_str()))
            .unwrap_or_default();
        match guard.seen(identity, nonce) {
            Ok(true) => CheckOutcome::Fail,
            Ok(false) => CheckOutcome::Pass,
            Err(e) => {
                tracing::warn!(error = %e, "nonce store unavailable");
                CheckOutcome::Indeterminate
            }
        }
    }
}

fn try_keys(
    candidates: &[Candidate<'_>],
    message: &[u8],
    signature: &Signature,
    attempts: &mut Vec<KeyAttempt>,
) -> Option<MatchedKey> {
    for candidate in candidates {
        let outcome = Verifier::new(candidate.public_key)
            .and_then(|verifier| verifier.verify(message, signature));
        match outcome {
            Ok(()) => {
                tracing::debug!(kid = %candidate.kid, source = ?candidate.source, "signature verified");
                return Some(candidate.matched());
            }
            Err(e) => attempts.push(KeyAttempt {
                kid: candidate.kid.clone(),
                reason: e.class().to_string(),
            }),
        }
    }
    None
}
