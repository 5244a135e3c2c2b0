//! Signing key store with rotation.
//!
//! Readers take an immutable [`KeySetSnapshot`] behind an `Arc`; rotation
//! builds a new snapshot and swaps it in whole, so a verification never
//! observes a half-rotated key set.

use crate::signature::{PublicKeyBytes, SignatureError, Signer};
use affirm_core::time::{format_utc, parse_utc};
use affirm_core::{Clock, KeyId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, RwLock};
use zeroize::Zeroizing;

/// Key store result type
pub type KeyStoreResult<T> = Result<T, KeyStoreError>;

/// Key store errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyStoreError {
    /// Configured key material is unusable
    #[error("invalid key material: {0}")]
    InvalidKey(#[from] SignatureError),
    /// History document is not a JSON array
    #[error("invalid key history: {reason}")]
    InvalidHistory {
        /// Parser message
        reason: String,
    },
    /// A lock was poisoned
    #[error("key store lock poisoned")]
    LockPoisoned,
}

/// Public description of a signing key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningKeyRecord {
    /// Key id
    pub kid: KeyId,
    /// Public key
    pub public_key: PublicKeyBytes,
    /// Creation instant
    pub created: DateTime<Utc>,
    /// Issuer name
    pub issuer: String,
    /// Whether this is the key currently used for signing
    pub active: bool,
}

impl SigningKeyRecord {
    fn retired(mut self) -> Self {
        self.active = false;
        self
    }
}

/// The key currently used for signing
#[derive(Debug, Clone)]
pub struct CurrentKey {
    /// Public description
    pub record: SigningKeyRecord,
    signer: Option<Arc<Signer>>,
}

impl CurrentKey {
    /// Private half, absent for verify-only stores
    #[must_use]
    pub fn signer(&self) -> Option<&Arc<Signer>> {
        self.signer.as_ref()
    }
}

/// Immutable view of the key set
#[derive(Debug, Clone, Default)]
pub struct KeySetSnapshot {
    /// Active key, if any
    pub current: Option<CurrentKey>,
    /// Retired keys, most recent first
    pub history: Vec<SigningKeyRecord>,
}

impl KeySetSnapshot {
    /// Current key followed by history, as public records
    pub fn records(&self) -> impl Iterator<Item = &SigningKeyRecord> {
        self.current
            .iter()
            .map(|c| &c.record)
            .chain(self.history.iter())
    }
}

/// Key store configuration
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyConfig {
    /// Issuer stamped on keys and keysets
    pub issuer: String,
    /// Prefix for date-derived key ids
    pub kid_prefix: String,
    /// Id of the configured key, derived from `created` when absent
    pub kid: Option<KeyId>,
    /// Creation instant of the configured key
    pub created: Option<DateTime<Utc>>,
    /// Base64 secret seed of the signing key
    #[serde(skip)]
    pub secret_key_b64: Option<Zeroizing<String>>,
    /// Base64 public key, used alone for a verify-only store
    pub public_key_b64: Option<String>,
}

impl std::fmt::Debug for KeyConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyConfig")
            .field("issuer", &self.issuer)
            .field("kid_prefix", &self.kid_prefix)
            .field("kid", &self.kid)
            .field("created", &self.created)
            .field("secret_key_b64", &self.secret_key_b64.as_ref().map(|_| "<redacted>"))
            .field("public_key_b64", &self.public_key_b64)
            .finish()
    }
}

impl Default for KeyConfig {
    fn default() -> Self {
        Self {
            issuer: "affirm.authority".to_string(),
            kid_prefix: "affirm".to_string(),
            kid: None,
            created: None,
            secret_key_b64: None,
            public_key_b64: None,
        }
    }
}

/// Outcome of a rotation
#[derive(Debug, Clone)]
pub struct Rotation {
    /// The new active key
    pub current: SigningKeyRecord,
    /// The key moved to the head of history, if there was one
    pub retired: Option<SigningKeyRecord>,
    /// Private half of the new key, for the operator to persist
    pub signer: Arc<Signer>,
}

/// Keyset publication entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeysetEntry {
    /// Key id
    pub kid: String,
    /// Key type, always `OKP`
    pub kty: String,
    /// Curve, always `Ed25519`
    pub crv: String,
    /// Base64 public key
    pub x: String,
    /// Algorithm, always `EdDSA`
    pub alg: String,
    /// Key use, always `sig`
    #[serde(rename = "use")]
    pub use_: String,
    /// Creation timestamp
    pub created: String,
    /// Issuer
    pub issuer: String,
}

impl From<&SigningKeyRecord> for KeysetEntry {
    fn from(record: &SigningKeyRecord) -> Self {
        Self {
            kid: record.kid.to_string(),
            kty: "OKP".to_string(),
            crv: "Ed25519".to_string(),
            x: record.public_key.to_base64(),
            alg: "EdDSA".to_string(),
            use_: "sig".to_string(),
            created: format_utc(record.created),
            issuer: record.issuer.clone(),
        }
    }
}

/// Published keyset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Keyset {
    /// Issuer
    pub issuer: String,
    /// Publication timestamp
    pub updated: String,
    /// Current key first, then history
    pub keys: Vec<KeysetEntry>,
}

impl Keyset {
    /// Whether `public_key_b64` is one of the published keys
    #[must_use]
    pub fn contains(&self, public_key_b64: &str) -> bool {
        self.keys.iter().any(|k| k.x == public_key_b64)
    }
}

/// Persisted form of a retired key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Key id
    pub kid: String,
    /// Key type
    #[serde(default = "okp")]
    pub kty: String,
    /// Curve
    #[serde(default = "ed25519")]
    pub crv: String,
    /// Base64 public key
    #[serde(default)]
    pub x: String,
    /// Creation timestamp
    #[serde(default)]
    pub created: String,
    /// Issuer
    #[serde(default)]
    pub issuer: String,
    /// When the key was retired
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archived_at: Option<String>,
}

fn okp() -> String {
    "OKP".to_string()
}

fn ed25519() -> String {
    "Ed25519".to_string()
}

/// Current signing key plus retired history
pub struct KeyStore {
    issuer: String,
    kid_prefix: String,
    clock: Arc<dyn Clock>,
    state: RwLock<Arc<KeySetSnapshot>>,
    rotation: Mutex<()>,
}

impl std::fmt::Debug for KeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyStore")
            .field("issuer", &self.issuer)
            .field("kid_prefix", &self.kid_prefix)
            .finish_non_exhaustive()
    }
}

impl KeyStore {
    /// Empty store with no current key
    #[must_use]
    pub fn new(issuer: impl Into<String>, kid_prefix: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            issuer: issuer.into(),
            kid_prefix: kid_prefix.into(),
            clock,
            state: RwLock::new(Arc::new(KeySetSnapshot::default())),
            rotation: Mutex::new(()),
        }
    }

    /// Build a store from configuration
    ///
    /// A secret key yields a signing store; a public key alone yields a
    /// verify-only store; neither yields an empty store.
    ///
    /// # Errors
    ///
    /// Returns error if the configured key material does not decode
    pub fn from_config(config: &KeyConfig, clock: Arc<dyn Clock>) -> KeyStoreResult<Self> {
        let store = Self::new(config.issuer.clone(), config.kid_prefix.clone(), clock);
        let created = config.created.unwrap_or_else(|| store.clock.now());
        let kid = config
            .kid
            .clone()
            .unwrap_or_else(|| KeyId::dated(&store.kid_prefix, created));

        let current = match (&config.secret_key_b64, &config.public_key_b64) {
            (Some(secret), _) => {
                let signer = Signer::from_base64(secret)?;
                if let Some(public) = &config.public_key_b64 {
                    if PublicKeyBytes::from_base64(public)? != signer.public_key() {
                        tracing::warn!(kid = %kid, "configured public key does not match secret; using derived key");
                    }
                }
                Some(store.current_key(kid, created, Arc::new(signer)))
            }
            (None, Some(public)) => {
                let record = SigningKeyRecord {
                    kid,
                    public_key: PublicKeyBytes::from_base64(public)?,
                    created,
                    issuer: store.issuer.clone(),
                    active: true,
                };
                Some(CurrentKey { record, signer: None })
            }
            (None, None) => None,
        };

        store.replace(KeySetSnapshot {
            current,
            history: Vec::new(),
        })?;
        Ok(store)
    }

    /// Install a signing key as current, replacing any existing one
    ///
    /// # Errors
    ///
    /// Returns error if a lock is poisoned
    pub fn install(&self, signer: Signer, kid: KeyId, created: DateTime<Utc>) -> KeyStoreResult<()> {
        let _guard = self.rotation.lock().map_err(|_| KeyStoreError::LockPoisoned)?;
        let history = self.snapshot()?.history.clone();
        let current = Some(self.current_key(kid, created, Arc::new(signer)));
        self.replace(KeySetSnapshot { current, history })
    }

    fn current_key(&self, kid: KeyId, created: DateTime<Utc>, signer: Arc<Signer>) -> CurrentKey {
        CurrentKey {
            record: SigningKeyRecord {
                kid,
                public_key: signer.public_key(),
                created,
                issuer: self.issuer.clone(),
                active: true,
            },
            signer: Some(signer),
        }
    }

    /// Issuer name
    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Current immutable view
    ///
    /// # Errors
    ///
    /// Returns error if the lock is poisoned
    pub fn snapshot(&self) -> KeyStoreResult<Arc<KeySetSnapshot>> {
        self.state
            .read()
            .map(|s| Arc::clone(&s))
            .map_err(|_| KeyStoreError::LockPoisoned)
    }

    fn replace(&self, next: KeySetSnapshot) -> KeyStoreResult<()> {
        let mut state = self.state.write().map_err(|_| KeyStoreError::LockPoisoned)?;
        *state = Arc::new(next);
        Ok(())
    }

    /// Retire the current key and generate a new one
    ///
    /// The retired key goes to the head of history. The new key id is
    /// derived from today's date, with a numeric suffix if that id is
    /// already in use.
    ///
    /// # Errors
    ///
    /// Returns error if a lock is poisoned
    pub fn rotate(&self) -> KeyStoreResult<Rotation> {
        let _guard = self.rotation.lock().map_err(|_| KeyStoreError::LockPoisoned)?;
        let previous = self.snapshot()?;
        let now = self.clock.now();

        let mut history = previous.history.clone();
        let retired = previous.current.as_ref().map(|c| c.record.clone().retired());
        if let Some(retired) = &retired {
            history.insert(0, retired.clone());
        }

        let kid = Self::unique_kid(KeyId::dated(&self.kid_prefix, now), &history);
        let signer = Arc::new(Signer::generate());
        let current = self.current_key(kid, now, Arc::clone(&signer));
        let record = current.record.clone();

        self.replace(KeySetSnapshot {
            current: Some(current),
            history,
        })?;

        tracing::info!(
            kid = %record.kid,
            retired = retired.as_ref().map(|r| r.kid.to_string()).as_deref().unwrap_or("-"),
            "rotated signing key"
        );

        Ok(Rotation {
            current: record,
            retired,
            signer,
        })
    }

    fn unique_kid(base: KeyId, taken: &[SigningKeyRecord]) -> KeyId {
        let in_use = |kid: &KeyId| taken.iter().any(|r| &r.kid == kid);
        if !in_use(&base) {
            return base;
        }
        let mut n = 2;
        loop {
            let candidate = base.with_suffix(n);
            if !in_use(&candidate) {
                return candidate;
            }
            n += 1;
        }
    }

    /// Publishable keyset: current key then history, first occurrence of
    /// each public key wins
    ///
    /// # Errors
    ///
    /// Returns error if the lock is poisoned
    pub fn keyset(&self) -> KeyStoreResult<Keyset> {
        let snapshot = self.snapshot()?;
        let mut seen = HashSet::new();
        let keys = snapshot
            .records()
            .filter(|r| seen.insert(r.public_key))
            .map(KeysetEntry::from)
            .collect();
        Ok(Keyset {
            issuer: self.issuer.clone(),
            updated: format_utc(self.clock.now()),
            keys,
        })
    }

    /// Replace history from its persisted JSON form
    ///
    /// Entries with a missing or undecodable public key are skipped with a
    /// warning. Returns how many entries were kept.
    ///
    /// # Errors
    ///
    /// Returns error if the document is not a JSON array of objects
    pub fn load_history(&self, json: &str) -> KeyStoreResult<usize> {
        let entries: Vec<HistoryEntry> =
            serde_json::from_str(json).map_err(|e| KeyStoreError::InvalidHistory {
                reason: e.to_string(),
            })?;

        let mut history = Vec::with_capacity(entries.len());
        for entry in entries {
            let public_key = match PublicKeyBytes::from_base64(&entry.x) {
                Ok(key) => key,
                _ => {
                    tracing::warn!(kid = %entry.kid, "skipping history entry without a usable public key");
                    continue;
                }
            };
            let created = parse_utc(&entry.created).unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
            history.push(SigningKeyRecord {
                kid: KeyId::new(entry.kid),
                public_key,
                created,
                issuer: if entry.issuer.is_empty() {
                    self.issuer.clone()
                } else {
                    entry.issuer
                },
                active: false,
            });
        }

        let _guard = self.rotation.lock().map_err(|_| KeyStoreError::LockPoisoned)?;
        let current = self.snapshot()?.current.clone();
        let kept = history.len();
        self.replace(KeySetSnapshot { current, history })?;
        tracing::debug!(kept, "loaded key history");
        Ok(kept)
    }

    /// History in its persisted JSON form, most recent first
    ///
    /// # Errors
    ///
    /// Returns error if the lock is poisoned
    pub fn history_json(&self) -> KeyStoreResult<String> {
        let snapshot = self.snapshot()?;
        let entries: Vec<HistoryEntry> = snapshot
            .history
            .iter()
            .map(|r| HistoryEntry {
                kid: r.kid.to_string(),
                kty: okp(),
                crv: ed25519(),
                x: r.public_key.to_base64(),
                created: format_utc(r.created),
                issuer: r.issuer.clone(),
                archived_at: None,
            })
            .collect();
        serde_json::to_string_pretty(&entries).map_err(|e| KeyStoreError::InvalidHistory {
            reason: e.to_string(),
        })
    }
}
