//! `affirm.yaml` configuration.

use affirm_certify::{AuthorityConfig, VerifierConfig};
use affirm_registry::{ScoringConfig, SnapshotConfig};
use affirm_storage::NonceConfig;
use color_eyre::eyre::{Result, WrapErr};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default configuration file name, looked up in the working directory
pub const DEFAULT_CONFIG: &str = "affirm.yaml";

/// Issuer and id prefix for newly generated keys
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeySettings {
    /// Issuer stamped on keys and keysets
    pub issuer: String,
    /// Prefix for date-derived key ids
    pub kid_prefix: String,
}

impl Default for KeySettings {
    fn default() -> Self {
        Self {
            issuer: "affirm.authority".to_string(),
            kid_prefix: "affirm".to_string(),
        }
    }
}

/// Where replay-protection nonces are kept
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum NonceBackend {
    /// Process memory; forgotten on exit
    #[default]
    Memory,
    /// Local redb file, usable by one process at a time
    Redb {
        /// Database file
        path: PathBuf,
    },
    /// Redis server shared by every verifier process
    Redis {
        /// Server URL, `redis://host:port/db`
        url: String,
    },
}

/// Everything the CLI reads from `affirm.yaml`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AffirmConfig {
    /// Signing key file
    pub key_file: PathBuf,
    /// Retired key history (JSON array, most recent first)
    pub history_file: PathBuf,
    /// Policy file; the bundled policy when unset
    pub policy_file: Option<PathBuf>,
    /// Replay-protection store
    pub nonce_store: NonceBackend,
    /// Ledger base URL for anchoring
    pub anchor_url: Option<String>,
    /// Key generation settings
    pub keys: KeySettings,
    /// Signing and anchoring
    pub authority: AuthorityConfig,
    /// Default verification checks; CLI flags can only add to these
    pub verifier: VerifierConfig,
    /// Replay-protection window
    pub nonce: NonceConfig,
    /// Scoring weights, open licenses and blocked tags
    pub scoring: ScoringConfig,
    /// Snapshot issuer and version label
    pub snapshot: SnapshotConfig,
}

impl Default for AffirmConfig {
    fn default() -> Self {
        Self {
            key_file: PathBuf::from("data/signing_key.json"),
            history_file: PathBuf::from("data/keys.json"),
            policy_file: None,
            nonce_store: NonceBackend::Memory,
            anchor_url: None,
            keys: KeySettings::default(),
            authority: AuthorityConfig::default(),
            verifier: VerifierConfig::default(),
            nonce: NonceConfig::default(),
            scoring: ScoringConfig::default(),
            snapshot: SnapshotConfig::default(),
        }
    }
}

impl AffirmConfig {
    /// Load configuration
    ///
    /// An explicit path must exist. Without one, `affirm.yaml` in the
    /// working directory is used if present, defaults otherwise.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None if Path::new(DEFAULT_CONFIG).exists() => PathBuf::from(DEFAULT_CONFIG),
            None => {
                tracing::debug!("no {} found, using defaults", DEFAULT_CONFIG);
                return Ok(Self::default());
            }
        };
        let text = std::fs::read_to_string(&path)
            .wrap_err_with(|| format!("reading config {}", path.display()))?;
        let config: Self =
            serde_yaml::from_str(&text).wrap_err_with(|| format!("parsing config {}", path.display()))?;
        config
            .scoring
            .validate()
            .wrap_err_with(|| format!("invalid scoring weights in {}", path.display()))?;
        config
            .nonce
            .validate()
            .wrap_err_with(|| format!("invalid nonce settings in {}", path.display()))?;
        tracing::debug!(path = %path.display(), "loaded config");
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_partial_config_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "key_file: /tmp/k.json\nverifier:\n  require_fresh: true\n  freshness:\n    minutes: 5\nnonce:\n  ttl_secs: 60\n"
        )
        .unwrap();

        let config = AffirmConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.key_file, PathBuf::from("/tmp/k.json"));
        assert_eq!(config.history_file, PathBuf::from("data/keys.json"));
        assert!(config.verifier.require_fresh);
        assert_eq!(config.verifier.freshness.minutes, 5);
        assert_eq!(config.nonce.ttl_secs, 60);
        assert_eq!(config.authority.anchor_timeout_secs, 20);
        assert_eq!(config.keys.kid_prefix, "affirm");
    }

    #[test]
    fn test_explicit_missing_config_is_error() {
        assert!(AffirmConfig::load(Some(Path::new("/nonexistent/affirm.yaml"))).is_err());
    }

    #[test]
    fn test_bad_weights_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "scoring:\n  weights:\n    provenance: 0.5\n    permission: 0.5\n    freshness: 0.5\n    quality: 0.0\n    safety: 0.0\n    reputation: 0.0\n").unwrap();
        assert!(AffirmConfig::load(Some(file.path())).is_err());
    }

    #[test]
    fn test_nonce_ttl_out_of_range_rejected() {
        for ttl in ["0", "-30", "9223372036854775807"] {
            let mut file = tempfile::NamedTempFile::new().unwrap();
            writeln!(file, "nonce:\n  ttl_secs: {}\n", ttl).unwrap();
            let err = AffirmConfig::load(Some(file.path())).unwrap_err();
            assert!(format!("{:?}", err).contains("ttl_secs"), "{}", ttl);
        }
    }

    #[test]
    fn test_nonce_backend_selection() {
        let config: AffirmConfig =
            serde_yaml::from_str("nonce_store:\n  backend: redis\n  url: redis://cache:6379/2\n").unwrap();
        assert_eq!(
            config.nonce_store,
            NonceBackend::Redis {
                url: "redis://cache:6379/2".to_string()
            }
        );
        let config: AffirmConfig = serde_yaml::from_str("key_file: k.json\n").unwrap();
        assert_eq!(config.nonce_store, NonceBackend::Memory);
        assert!(serde_yaml::from_str::<AffirmConfig>("nonce_store:\n  backend: etcd\n").is_err());
    }

    #[test]
    fn test_sample_config_parses() {
        let config: AffirmConfig = serde_yaml::from_str(include_str!("../../../affirm.yaml")).unwrap();
        assert_eq!(
            config.nonce_store,
            NonceBackend::Redb {
                path: PathBuf::from("data/nonces.redb")
            }
        );
        assert_eq!(config.verifier.freshness.minutes, 10);
        assert!(config.scoring.validate().is_ok());
    }
}
