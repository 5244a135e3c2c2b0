//! `affirm verify` and `affirm verify-raw`.

use super::{read_json, CommandOutput};
use crate::config::{AffirmConfig, NonceBackend};
use crate::keyfile::open_key_store;
use affirm_certify::{AttestationVerifier, DetachedRequest, VerificationReport, VerifierConfig};
use affirm_core::Clock;
use affirm_storage::{MemoryNonceStore, NonceGuard, NonceStore, RedbNonceStore, RedisNonceStore};
use clap::Args;
use color_eyre::eyre::{Result, WrapErr};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;

/// Side-check flags shared by both verify commands
#[derive(Debug, Default, Args)]
pub struct CheckFlags {
    /// Fall back to the attestation's embedded public key
    #[arg(long)]
    pub trust_embedded_key: bool,

    /// Fail unless the signer is in the published keyset
    #[arg(long)]
    pub require_known_signer: bool,

    /// Fail unless content `ts` is within the freshness window
    #[arg(long)]
    pub require_fresh: bool,

    /// Fail if the content nonce was seen before
    #[arg(long)]
    pub require_nonce: bool,
}

impl CheckFlags {
    fn apply(&self, base: &VerifierConfig) -> VerifierConfig {
        VerifierConfig {
            freshness: base.freshness,
            trust_embedded_key: base.trust_embedded_key || self.trust_embedded_key,
            require_known_signer: base.require_known_signer || self.require_known_signer,
            require_fresh: base.require_fresh || self.require_fresh,
            require_nonce: base.require_nonce || self.require_nonce,
        }
    }
}

/// Arguments for `affirm verify`
#[derive(Debug, Args)]
pub struct VerifyArgs {
    /// Attestation JSON (`-` for stdin)
    pub attestation: PathBuf,

    #[command(flatten)]
    pub checks: CheckFlags,
}

/// Arguments for `affirm verify-raw`
#[derive(Debug, Args)]
#[command(group = clap::ArgGroup::new("message").required(true).args(["payload", "digest"]))]
pub struct VerifyRawArgs {
    /// Signature, `ed25519:<base64>` or bare base64
    #[arg(long)]
    pub signature: String,

    /// Exact string that was signed
    #[arg(long)]
    pub payload: Option<String>,

    /// `sha256:<hex>` digest that was signed
    #[arg(long)]
    pub digest: Option<String>,
}

fn verifier(config: &AffirmConfig, checks: &CheckFlags, clock: Arc<dyn Clock>) -> Result<AttestationVerifier> {
    let keys = open_key_store(config, Arc::clone(&clock))?;
    let verifier_config = checks.apply(&config.verifier);
    let nonce_store: Arc<dyn NonceStore> = match &config.nonce_store {
        NonceBackend::Memory => Arc::new(MemoryNonceStore::new()),
        NonceBackend::Redb { path } => Arc::new(
            RedbNonceStore::open(path).wrap_err_with(|| format!("opening nonce db {}", path.display()))?,
        ),
        NonceBackend::Redis { url } => {
            Arc::new(RedisNonceStore::open(url).wrap_err_with(|| format!("connecting to nonce server {}", url))?)
        }
    };
    let guard = NonceGuard::new(nonce_store, Arc::clone(&clock), config.nonce);
    Ok(AttestationVerifier::new(keys, clock, verifier_config).with_nonce_guard(guard))
}

fn report_output(report: &VerificationReport) -> Result<CommandOutput> {
    if report.ok {
        tracing::info!(
            kid = report.matched_key.as_ref().map_or("-", |k| k.kid.as_str()),
            "verification passed"
        );
    } else {
        tracing::warn!(
            code = report.failure.as_ref().map_or("-", |f| f.code()),
            attempts = report.attempts.len(),
            "verification failed"
        );
    }
    Ok(CommandOutput {
        body: serde_json::to_value(report)?,
        success: report.ok,
    })
}

/// Verify an attestation document
pub fn execute(args: &VerifyArgs, config: &AffirmConfig, clock: Arc<dyn Clock>) -> Result<CommandOutput> {
    let document: Value = read_json(&args.attestation)?;
    let report = verifier(config, &args.checks, clock)?.verify(&document)?;
    report_output(&report)
}

/// Verify a detached signature over a payload or digest
pub fn execute_raw(args: &VerifyRawArgs, config: &AffirmConfig, clock: Arc<dyn Clock>) -> Result<CommandOutput> {
    let request = DetachedRequest {
        payload: args.payload.clone(),
        digest: args.digest.clone(),
        signature: args.signature.clone(),
    };
    let report = verifier(config, &CheckFlags::default(), clock)?.verify_detached(&request)?;
    report_output(&report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::keys::{keygen, rotate, KeygenArgs};
    use crate::commands::sign::{self, SignArgs};
    use affirm_certify::Signer;
    use affirm_core::{ContentHash, SystemClock};

    fn config(dir: &tempfile::TempDir) -> AffirmConfig {
        AffirmConfig {
            key_file: dir.path().join("signing_key.json"),
            history_file: dir.path().join("keys.json"),
            nonce_store: NonceBackend::Redb {
                path: dir.path().join("nonces.redb"),
            },
            ..AffirmConfig::default()
        }
    }

    async fn signed(dir: &tempfile::TempDir, config: &AffirmConfig, content: &str) -> PathBuf {
        let input = dir.path().join("content.json");
        std::fs::write(&input, content).unwrap();
        let out = sign::execute(
            &SignArgs {
                content: input,
                anchor: None,
                no_anchor: true,
            },
            config,
            Arc::new(SystemClock),
        )
        .await
        .unwrap();
        let path = dir.path().join("attestation.json");
        std::fs::write(&path, serde_json::to_string(&out.body).unwrap()).unwrap();
        path
    }

    fn verify(path: PathBuf, config: &AffirmConfig, checks: CheckFlags) -> CommandOutput {
        execute(&VerifyArgs { attestation: path, checks }, config, Arc::new(SystemClock)).unwrap()
    }

    #[tokio::test]
    async fn test_verify_after_rotation_uses_history() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(&dir);
        keygen(&KeygenArgs { force: false }, &config, Arc::new(SystemClock)).unwrap();
        let path = signed(&dir, &config, r#"{"type": "affirm.test"}"#).await;

        let out = verify(path.clone(), &config, CheckFlags::default());
        assert!(out.success);
        assert_eq!(out.body["matched_key"]["source"], "current");

        rotate(&config, Arc::new(SystemClock)).unwrap();
        let out = verify(path, &config, CheckFlags::default());
        assert!(out.success);
        assert_eq!(out.body["matched_key"]["source"], "history");
        assert_eq!(out.body["matched_key"]["history_index"], 0);
    }

    #[tokio::test]
    async fn test_verify_tampered_content_fails() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(&dir);
        keygen(&KeygenArgs { force: false }, &config, Arc::new(SystemClock)).unwrap();
        let path = signed(&dir, &config, r#"{"amount": 10}"#).await;

        let mut doc: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        doc["content"]["amount"] = Value::from(11);
        std::fs::write(&path, doc.to_string()).unwrap();

        let out = verify(path, &config, CheckFlags::default());
        assert!(!out.success);
        assert_eq!(out.body["failure"]["code"], "hash_mismatch");
    }

    #[tokio::test]
    async fn test_replayed_nonce_rejected_across_runs() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(&dir);
        keygen(&KeygenArgs { force: false }, &config, Arc::new(SystemClock)).unwrap();
        let path = signed(&dir, &config, r#"{"voter_id": "alice", "nonce": "n-1"}"#).await;

        let checks = || CheckFlags {
            require_nonce: true,
            ..CheckFlags::default()
        };
        assert!(verify(path.clone(), &config, checks()).success);
        let replay = verify(path, &config, checks());
        assert!(!replay.success);
        assert_eq!(replay.body["failure"]["code"], "side_check_failed");
    }

    #[test]
    fn test_unreachable_nonce_server_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = AffirmConfig {
            nonce_store: NonceBackend::Redis {
                url: "redis://127.0.0.1:1/".to_string(),
            },
            ..config(&dir)
        };
        keygen(&KeygenArgs { force: false }, &config, Arc::new(SystemClock)).unwrap();
        let err = verifier(&config, &CheckFlags::default(), Arc::new(SystemClock)).unwrap_err();
        assert!(err.to_string().contains("nonce server"));
    }

    #[test]
    fn test_verify_raw_payload_and_digest() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(&dir);
        keygen(&KeygenArgs { force: false }, &config, Arc::new(SystemClock)).unwrap();

        let store = open_key_store(&config, Arc::new(SystemClock)).unwrap();
        let snapshot = store.snapshot().unwrap();
        let signer: &Signer = snapshot.current.as_ref().unwrap().signer().unwrap();

        let payload = "hello affirm";
        let args = VerifyRawArgs {
            signature: signer.sign(payload.as_bytes()).to_wire(),
            payload: Some(payload.to_string()),
            digest: None,
        };
        let out = execute_raw(&args, &config, Arc::new(SystemClock)).unwrap();
        assert!(out.success);
        assert_eq!(out.body["signed_over"], "payload");

        let digest = ContentHash::compute(b"document");
        let args = VerifyRawArgs {
            signature: signer.sign(digest.as_bytes()).to_wire(),
            payload: None,
            digest: Some(digest.to_string()),
        };
        assert!(execute_raw(&args, &config, Arc::new(SystemClock)).unwrap().success);

        let args = VerifyRawArgs {
            signature: signer.sign(b"other").to_wire(),
            payload: Some(payload.to_string()),
            digest: None,
        };
        let out = execute_raw(&args, &config, Arc::new(SystemClock)).unwrap();
        assert!(!out.success);
        assert!(!out.body["attempts"].as_array().unwrap().is_empty());
    }
}
