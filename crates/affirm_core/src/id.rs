//! Identifiers for AFFIRM entities and signing keys.
//!
//! Both are opaque strings chosen by the caller (entities) or derived from
//! the rotation date (keys). They serialize transparently as JSON strings.

use crate::error::{CoreError, CoreResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Entity identifier - e.g. `src:public-apis:open-meteo`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    /// Create an entity id, rejecting blank input
    ///
    /// # Errors
    ///
    /// Returns error if the id is empty or only whitespace
    pub fn new(id: impl Into<String>) -> CoreResult<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(CoreError::InvalidId {
                reason: "entity id must not be empty".to_string(),
            });
        }
        Ok(Self(id))
    }

    /// Get as string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for EntityId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Signing key identifier - e.g. `affirm:ed25519:v20261019`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyId(String);

impl KeyId {
    /// Wrap an existing key id
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Derive the key id for a key created at `created`
    #[must_use]
    pub fn dated(prefix: &str, created: DateTime<Utc>) -> Self {
        Self(format!("{}:ed25519:v{}", prefix, created.format("%Y%m%d")))
    }

    /// Same id with a numeric suffix, used when a dated id is already taken
    #[must_use]
    pub fn with_suffix(&self, n: usize) -> Self {
        Self(format!("{}.{}", self.0, n))
    }

    /// Get as string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for KeyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_entity_id_rejects_blank() {
        assert!(EntityId::new("  ").is_err());
        assert_eq!(EntityId::new("src:a").unwrap().as_str(), "src:a");
    }

    #[test]
    fn test_entity_id_ordering_is_lexicographic() {
        let mut ids = vec![
            EntityId::new("src:b").unwrap(),
            EntityId::new("src:a").unwrap(),
            EntityId::new("src:aa").unwrap(),
        ];
        ids.sort();
        let names: Vec<&str> = ids.iter().map(EntityId::as_str).collect();
        assert_eq!(names, vec!["src:a", "src:aa", "src:b"]);
    }

    #[test]
    fn test_key_id_dated() {
        let created = Utc.with_ymd_and_hms(2026, 10, 19, 8, 30, 0).unwrap();
        let kid = KeyId::dated("affirm", created);
        assert_eq!(kid.as_str(), "affirm:ed25519:v20261019");
        assert_eq!(kid.with_suffix(2).as_str(), "affirm:ed25519:v20261019.2");
    }

    #[test]
    fn test_ids_serialize_transparently() {
        let id = EntityId::new("src:x").unwrap();
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"src:x\"");
    }
}
