//! Signing key file and key history persistence.

use crate::config::AffirmConfig;
use affirm_certify::{KeyConfig, KeyStore, Signer};
use affirm_core::time::{format_utc, parse_utc};
use affirm_core::{Clock, KeyId};
use chrono::{DateTime, Utc};
use color_eyre::eyre::{eyre, Result, WrapErr};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use zeroize::Zeroizing;

/// On-disk form of the signing key
#[derive(Serialize, Deserialize)]
struct KeyFile {
    kid: String,
    created: String,
    issuer: String,
    secret_key_b64: String,
    public_key_b64: String,
}

impl Drop for KeyFile {
    fn drop(&mut self) {
        use zeroize::Zeroize;
        self.secret_key_b64.zeroize();
    }
}

/// Write `signer` as the key file at `path`
pub fn write_key_file(path: &Path, signer: &Signer, kid: &KeyId, created: DateTime<Utc>, issuer: &str) -> Result<()> {
    let file = KeyFile {
        kid: kid.to_string(),
        created: format_utc(created),
        issuer: issuer.to_string(),
        secret_key_b64: signer.secret_base64().to_string(),
        public_key_b64: signer.public_key().to_base64(),
    };
    let text = Zeroizing::new(serde_json::to_string_pretty(&file)?);
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).wrap_err_with(|| format!("creating {}", parent.display()))?;
    }
    std::fs::write(path, text.as_bytes()).wrap_err_with(|| format!("writing key file {}", path.display()))?;
    restrict_permissions(path)?;
    tracing::info!(kid = %kid, path = %path.display(), "wrote signing key");
    Ok(())
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .wrap_err_with(|| format!("restricting permissions on {}", path.display()))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

/// Key configuration from the key file at `path`
pub fn read_key_config(path: &Path, defaults: &KeyConfig) -> Result<KeyConfig> {
    let text = Zeroizing::new(
        std::fs::read_to_string(path).wrap_err_with(|| format!("reading key file {}", path.display()))?,
    );
    let mut file: KeyFile =
        serde_json::from_str(&text).wrap_err_with(|| format!("parsing key file {}", path.display()))?;
    let created = parse_utc(&file.created).map_err(|e| eyre!("key file {}: {}", path.display(), e))?;

    Ok(KeyConfig {
        issuer: if file.issuer.is_empty() {
            defaults.issuer.clone()
        } else {
            file.issuer.clone()
        },
        kid_prefix: defaults.kid_prefix.clone(),
        kid: Some(KeyId::new(file.kid.clone())),
        created: Some(created),
        secret_key_b64: Some(Zeroizing::new(std::mem::take(&mut file.secret_key_b64))),
        public_key_b64: Some(file.public_key_b64.clone()),
    })
}

/// Key store from the configured key file and history file
///
/// A missing key file yields an empty store; a missing history file
/// yields no history.
pub fn open_key_store(config: &AffirmConfig, clock: Arc<dyn Clock>) -> Result<Arc<KeyStore>> {
    let defaults = KeyConfig {
        issuer: config.keys.issuer.clone(),
        kid_prefix: config.keys.kid_prefix.clone(),
        ..KeyConfig::default()
    };
    let key_config = if config.key_file.exists() {
        read_key_config(&config.key_file, &defaults)?
    } else {
        tracing::debug!(path = %config.key_file.display(), "no key file");
        defaults
    };

    let store = KeyStore::from_config(&key_config, clock)?;
    if config.history_file.exists() {
        let history = std::fs::read_to_string(&config.history_file)
            .wrap_err_with(|| format!("reading key history {}", config.history_file.display()))?;
        store.load_history(&history)?;
    }
    Ok(Arc::new(store))
}

/// Persist the store's history to the configured history file
pub fn save_history(config: &AffirmConfig, store: &KeyStore) -> Result<()> {
    let path = &config.history_file;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).wrap_err_with(|| format!("creating {}", parent.display()))?;
    }
    std::fs::write(path, store.history_json()?).wrap_err_with(|| format!("writing key history {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use affirm_core::ManualClock;
    use chrono::TimeZone;

    fn clock() -> Arc<dyn Clock> {
        Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap()))
    }

    #[test]
    fn test_key_file_round_trip_signs_with_same_key() {
        let dir = tempfile::tempdir().unwrap();
        let config = AffirmConfig {
            key_file: dir.path().join("keys/signing_key.json"),
            history_file: dir.path().join("keys/history.json"),
            ..AffirmConfig::default()
        };

        let signer = Signer::generate();
        let kid = KeyId::new("affirm:ed25519:v20261019");
        let created = clock().now();
        write_key_file(&config.key_file, &signer, &kid, created, "affirm.test").unwrap();

        let store = open_key_store(&config, clock()).unwrap();
        let snapshot = store.snapshot().unwrap();
        let current = snapshot.current.as_ref().unwrap();
        assert_eq!(current.record.kid, kid);
        assert_eq!(current.record.public_key, signer.public_key());
        assert_eq!(current.record.issuer, "affirm.test");
        assert!(current.signer().is_some());
    }

    #[test]
    fn test_missing_files_give_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let config = AffirmConfig {
            key_file: dir.path().join("absent.json"),
            history_file: dir.path().join("absent-history.json"),
            ..AffirmConfig::default()
        };
        let store = open_key_store(&config, clock()).unwrap();
        assert!(store.snapshot().unwrap().current.is_none());
    }

    #[test]
    fn test_history_persists() {
        let dir = tempfile::tempdir().unwrap();
        let config = AffirmConfig {
            key_file: dir.path().join("k.json"),
            history_file: dir.path().join("h.json"),
            ..AffirmConfig::default()
        };
        let store = KeyStore::new("affirm.test", "affirm", clock());
        store.rotate().unwrap();
        store.rotate().unwrap();
        save_history(&config, &store).unwrap();

        let reopened = open_key_store(&config, clock()).unwrap();
        assert_eq!(reopened.snapshot().unwrap().history.len(), 1);
    }

    #[test]
    fn test_corrupt_key_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("k.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(read_key_config(&path, &KeyConfig::default()).is_err());
    }
}
