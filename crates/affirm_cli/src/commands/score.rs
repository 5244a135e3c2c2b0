//! `affirm score` and `affirm snapshot`.

use super::{read_json, CommandOutput};
use crate::commands::sign::authority;
use crate::config::AffirmConfig;
use affirm_core::{CandidateEntity, Clock};
use affirm_policy::CompiledPolicy;
use affirm_registry::{AdmissionService, ScoringEngine, StateSnapshotBuilder};
use affirm_storage::MemoryRepository;
use clap::Args;
use color_eyre::eyre::{bail, Result};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;

/// Arguments for `affirm score`
#[derive(Debug, Args)]
pub struct ScoreArgs {
    /// JSON array of candidate entities (`-` for stdin)
    pub entities: PathBuf,

    /// Policy file (overrides `policy_file`)
    #[arg(long, value_name = "PATH")]
    pub policy: Option<PathBuf>,

    /// Only report entities at or above this composite
    #[arg(long, default_value_t = 0.0)]
    pub min_score: f64,
}

/// Arguments for `affirm snapshot`
#[derive(Debug, Args)]
pub struct SnapshotArgs {
    /// JSON array of candidate entities (`-` for stdin)
    pub entities: PathBuf,

    /// Policy file (overrides `policy_file`)
    #[arg(long, value_name = "PATH")]
    pub policy: Option<PathBuf>,

    /// Forward the signed snapshot to `anchor_url`
    #[arg(long)]
    pub anchor: bool,
}

fn load_policy(explicit: Option<&PathBuf>, config: &AffirmConfig) -> Result<CompiledPolicy> {
    Ok(match explicit.or(config.policy_file.as_ref()) {
        Some(path) => CompiledPolicy::load(path)?,
        None => CompiledPolicy::bundled()?,
    })
}

fn service(policy: CompiledPolicy, config: &AffirmConfig, clock: Arc<dyn Clock>) -> Result<AdmissionService> {
    Ok(AdmissionService::new(
        Arc::new(MemoryRepository::new()),
        ScoringEngine::new(config.scoring.clone())?,
        Arc::new(policy),
        clock,
    )
    .with_snapshots(StateSnapshotBuilder::new(config.snapshot.clone())))
}

/// Score and gate entities
pub fn execute(args: &ScoreArgs, config: &AffirmConfig, clock: Arc<dyn Clock>) -> Result<CommandOutput> {
    let entities: Vec<CandidateEntity> = read_json(&args.entities)?;
    let svc = service(load_policy(args.policy.as_ref(), config)?, config, clock)?;
    let mut results = svc.ingest(entities)?;
    results.retain(|r| r.composite >= args.min_score);
    results.sort_by(|a, b| b.composite.total_cmp(&a.composite).then_with(|| a.id.cmp(&b.id)));

    Ok(CommandOutput::ok(json!({
        "policy_version": svc.policy().version(),
        "results": results,
    })))
}

/// Build, seal and optionally anchor a snapshot of the given entities
pub async fn execute_snapshot(args: &SnapshotArgs, config: &AffirmConfig, clock: Arc<dyn Clock>) -> Result<CommandOutput> {
    let entities: Vec<CandidateEntity> = read_json(&args.entities)?;
    let anchor_url = match (args.anchor, config.anchor_url.as_deref()) {
        (true, None) => bail!("--anchor needs `anchor_url` in the configuration"),
        (true, url) => url,
        (false, _) => None,
    };
    let authority = authority(config, anchor_url, Arc::clone(&clock))?;

    let svc = service(load_policy(args.policy.as_ref(), config)?, config, clock)?
        .with_authority(Arc::new(authority));
    svc.ingest(entities)?;

    let sealed = if args.anchor {
        svc.anchor_snapshot().await?
    } else {
        svc.seal_snapshot()?
    };
    Ok(CommandOutput::ok(serde_json::to_value(sealed)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use affirm_core::SystemClock;

    const ENTITIES: &str = r#"[
        {"id": "src:open", "domain": "data.example.org", "owner": {"org": "Example"},
         "endpoints": [{"path": "/v1", "schema": "openapi.yaml"}], "license": "MIT",
         "meta": {"uptime": "0.99"}, "tags": [], "last_update": null},
        {"id": "src:leaky", "license": "MIT", "tags": ["pii_leak"]},
        {"id": "src:bare"}
    ]"#;

    fn write_entities(dir: &tempfile::TempDir) -> PathBuf {
        let path = dir.path().join("entities.json");
        std::fs::write(&path, ENTITIES).unwrap();
        path
    }

    fn config(dir: &tempfile::TempDir) -> AffirmConfig {
        AffirmConfig {
            key_file: dir.path().join("signing_key.json"),
            history_file: dir.path().join("keys.json"),
            ..AffirmConfig::default()
        }
    }

    #[test]
    fn test_score_with_bundled_policy() {
        let dir = tempfile::tempdir().unwrap();
        let args = ScoreArgs {
            entities: write_entities(&dir),
            policy: None,
            min_score: 0.0,
        };
        let out = execute(&args, &config(&dir), Arc::new(SystemClock)).unwrap();
        assert_eq!(out.body["policy_version"], "default_policy.yaml");

        let results = out.body["results"].as_array().unwrap();
        assert_eq!(results.len(), 3);
        let gate_of = |id: &str| {
            results
                .iter()
                .find(|r| r["id"] == id)
                .map(|r| r["gate"].as_str().unwrap().to_string())
                .unwrap()
        };
        assert_eq!(gate_of("src:leaky"), "deny");
        assert_eq!(gate_of("src:bare"), "review");
    }

    #[test]
    fn test_score_missing_policy_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let args = ScoreArgs {
            entities: write_entities(&dir),
            policy: Some(dir.path().join("absent.yaml")),
            min_score: 0.0,
        };
        let err = execute(&args, &config(&dir), Arc::new(SystemClock)).unwrap_err();
        assert!(err.to_string().contains("configuration error"));
    }

    #[test]
    fn test_score_custom_policy_and_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let policy = dir.path().join("p.yaml");
        std::fs::write(&policy, "rules:\n  - {id: all, when: 'composite > 0', effect: pass}\ndefaults: deny\n").unwrap();
        let args = ScoreArgs {
            entities: write_entities(&dir),
            policy: Some(policy),
            min_score: 0.7,
        };
        let out = execute(&args, &config(&dir), Arc::new(SystemClock)).unwrap();
        assert_eq!(out.body["policy_version"], "p.yaml");
        let results = out.body["results"].as_array().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0]["id"], "src:open");
        assert_eq!(results[0]["reasons"][0], "all:pass");
    }

    #[tokio::test]
    async fn test_snapshot_unsigned_without_key() {
        let dir = tempfile::tempdir().unwrap();
        let args = SnapshotArgs {
            entities: write_entities(&dir),
            policy: None,
            anchor: false,
        };
        let out = execute_snapshot(&args, &config(&dir), Arc::new(SystemClock)).await.unwrap();
        let items = out.body["snapshot"]["items"].as_array().unwrap();
        let ids: Vec<&str> = items.iter().map(|i| i["entity"]["id"].as_str().unwrap()).collect();
        assert_eq!(ids, vec!["src:bare", "src:leaky", "src:open"]);
        assert!(out.body["hash"].as_str().unwrap().starts_with("sha256:"));
        assert!(out.body.get("attestation").is_none());
    }

    #[tokio::test]
    async fn test_snapshot_anchor_needs_url() {
        let dir = tempfile::tempdir().unwrap();
        let args = SnapshotArgs {
            entities: write_entities(&dir),
            policy: None,
            anchor: true,
        };
        let err = execute_snapshot(&args, &config(&dir), Arc::new(SystemClock)).await.unwrap_err();
        assert!(err.to_string().contains("anchor_url"));
    }
}
