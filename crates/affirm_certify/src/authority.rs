//! Attestation authority: signs content with the current key.

use crate::anchor::{anchor_best_effort, Anchor};
use crate::attestation::Attestation;
use crate::keystore::{KeyStore, KeyStoreError};
use crate::signature::{Signature, Signer};
use affirm_core::{canonical_bytes, canonical_value, ContentHash, CoreError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Authority result type
pub type AuthorityResult<T> = Result<T, AuthorityError>;

/// Authority errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthorityError {
    /// Signing is not possible with the configured key material
    #[error("configuration error: {reason}")]
    Configuration {
        /// What is missing
        reason: String,
    },
    /// Content could not be canonicalized
    #[error("cannot encode content: {0}")]
    Encoding(#[from] CoreError),
    /// Key store failure
    #[error(transparent)]
    KeyStore(#[from] KeyStoreError),
}

/// Authority configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthorityConfig {
    /// Upper bound on one anchoring call, in seconds
    pub anchor_timeout_secs: u64,
}

impl Default for AuthorityConfig {
    fn default() -> Self {
        Self {
            anchor_timeout_secs: 20,
        }
    }
}

impl AuthorityConfig {
    /// Anchoring deadline
    #[must_use]
    pub fn anchor_timeout(&self) -> Duration {
        Duration::from_secs(self.anchor_timeout_secs)
    }
}

/// Sign the canonical form of `content`
///
/// Returns the content hash and the wire signature.
///
/// # Errors
///
/// Returns [`AuthorityError::Configuration`] when `key` is absent, and an
/// encoding error if the content cannot be canonicalized
pub fn sign_content(key: Option<&Signer>, content: &Value) -> AuthorityResult<(ContentHash, Signature)> {
    let key = key.ok_or_else(|| AuthorityError::Configuration {
        reason: "no private signing key configured".to_string(),
    })?;
    let message = canonical_bytes(content)?;
    Ok((ContentHash::compute(&message), key.sign(&message)))
}

/// Produces attestations from the key store's current key
pub struct AttestationAuthority {
    keys: Arc<KeyStore>,
    anchor: Option<Arc<dyn Anchor>>,
    config: AuthorityConfig,
}

impl std::fmt::Debug for AttestationAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttestationAuthority")
            .field("keys", &self.keys)
            .field("anchored", &self.anchor.is_some())
            .field("config", &self.config)
            .finish()
    }
}

impl AttestationAuthority {
    /// Create an authority without anchoring
    #[must_use]
    pub fn new(keys: Arc<KeyStore>, config: AuthorityConfig) -> Self {
        Self {
            keys,
            anchor: None,
            config,
        }
    }

    /// Attach an anchoring collaborator
    #[must_use]
    pub fn with_anchor(mut self, anchor: Arc<dyn Anchor>) -> Self {
        self.anchor = Some(anchor);
        self
    }

    /// Key store backing this authority
    #[must_use]
    pub fn keys(&self) -> &Arc<KeyStore> {
        &self.keys
    }

    /// Whether a private key is available
    #[must_use]
    pub fn can_sign(&self) -> bool {
        self.keys
            .snapshot()
            .map(|s| s.current.as_ref().is_some_and(|c| c.signer().is_some()))
            .unwrap_or(false)
    }

    /// Sign `content` into an attestation
    ///
    /// The key id and public key come from the same key set snapshot as
    /// the private key, so a concurrent rotation cannot mix them.
    ///
    /// # Errors
    ///
    /// Returns [`AuthorityError::Configuration`] when no private key is
    /// configured
    pub fn attest<T: Serialize + ?Sized>(&self, content: &T) -> AuthorityResult<Attestation> {
        let content = canonical_value(serde_json::to_value(content).map_err(CoreError::from)?);
        let snapshot = self.keys.snapshot()?;
        let Some(current) = snapshot.current.as_ref() else {
            return Err(AuthorityError::Configuration {
                reason: "no current signing key".to_string(),
            });
        };
        let (hash, signature) = sign_content(current.signer().map(Arc::as_ref), &content)?;
        tracing::debug!(kid = %current.record.kid, hash = %hash, "signed attestation");

        Ok(Attestation {
            content,
            content_hash: hash.to_string(),
            signature: signature.to_wire(),
            public_key_b64: current.record.public_key.to_base64(),
            signing_key: current.record.kid.to_string(),
            ledger_receipt: None,
            ledger_error: None,
        })
    }

    /// Forward an attestation to the anchor, if one is configured
    ///
    /// Failures are recorded on the attestation as `ledger_error`.
    pub async fn anchor(&self, attestation: Attestation) -> Attestation {
        match &self.anchor {
            Some(anchor) => anchor_best_effort(anchor.as_ref(), attestation, self.config.anchor_timeout()).await,
            None => attestation,
        }
    }

    /// Sign then anchor
    ///
    /// # Errors
    ///
    /// Returns error if signing fails; anchoring never fails the call
    pub async fn attest_and_anchor<T: Serialize + ?Sized + Sync>(&self, content: &T) -> AuthorityResult<Attestation> {
        let attestation = self.attest(content)?;
        Ok(self.anchor(attestation).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anchor::AnchorError;
    use crate::keystore::KeyConfig;
    use crate::verifier::{AttestationVerifier, KeySource, VerifierConfig};
    use affirm_core::{Clock, ManualClock};
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn clock() -> Arc<dyn Clock> {
        Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap()))
    }

    fn authority() -> AttestationAuthority {
        let keys = Arc::new(KeyStore::new("affirm.test", "affirm", clock()));
        keys.rotate().unwrap();
        AttestationAuthority::new(keys, AuthorityConfig::default())
    }

    #[test]
    fn test_attest_then_verify() {
        let authority = authority();
        let attestation = authority
            .attest(&json!({"type": "affirm.gate", "entity_id": "src:a", "gate": "pass"}))
            .unwrap();
        assert!(attestation.signature.starts_with("ed25519:"));
        assert!(attestation.content_hash.starts_with("sha256:"));
        assert_eq!(attestation.signing_key, "affirm:ed25519:v20261019");

        let verifier = AttestationVerifier::new(authority.keys().clone(), clock(), VerifierConfig::default());
        let report = verifier.verify(&attestation.to_value()).unwrap();
        assert!(report.ok);
        assert_eq!(report.matched_key.unwrap().source, KeySource::Current);
    }

    #[test]
    fn test_content_hash_is_canonical_hash() {
        let authority = authority();
        let content = json!({"z": 1, "a": "é"});
        let attestation = authority.attest(&content).unwrap();
        assert_eq!(
            attestation.content_hash,
            ContentHash::of(&content).unwrap().to_string()
        );
        assert_eq!(attestation.content, content);
    }

    #[test]
    fn test_sign_content_without_key_is_configuration_error() {
        let err = sign_content(None, &json!({})).unwrap_err();
        assert!(matches!(err, AuthorityError::Configuration { .. }));
    }

    #[test]
    fn test_verify_only_store_cannot_attest() {
        let config = KeyConfig {
            public_key_b64: Some(Signer::generate().public_key().to_base64()),
            ..KeyConfig::default()
        };
        let keys = Arc::new(KeyStore::from_config(&config, clock()).unwrap());
        let authority = AttestationAuthority::new(keys, AuthorityConfig::default());
        assert!(!authority.can_sign());
        assert!(matches!(
            authority.attest(&json!({"a": 1})),
            Err(AuthorityError::Configuration { .. })
        ));
    }

    struct Flaky;

    #[async_trait]
    impl Anchor for Flaky {
        async fn anchor(&self, _: &Attestation) -> Result<Value, AnchorError> {
            Err(AnchorError::Decode("not json".to_string()))
        }
    }

    #[tokio::test]
    async fn test_attest_and_anchor_keeps_attestation_on_failure() {
        let authority = authority().with_anchor(Arc::new(Flaky));
        let attestation = authority.attest_and_anchor(&json!({"a": 1})).await.unwrap();
        assert!(attestation.ledger_error.is_some());
        assert!(attestation.ledger_receipt.is_none());
        assert!(attestation.signature.starts_with("ed25519:"));
    }
}
