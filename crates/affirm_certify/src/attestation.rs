//! Attestation objects.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A signed, hash-sealed claim
///
/// `content_hash` and `signature` are kept in their wire form so that a
/// tampered or foreign attestation can still be represented and reported
/// on by the verifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attestation {
    /// Claimed content
    pub content: Value,
    /// `sha256:<hex>` of the canonical content
    pub content_hash: String,
    /// `ed25519:<base64>` over the canonical content
    pub signature: String,
    /// Base64 public key of the signer
    #[serde(default)]
    pub public_key_b64: String,
    /// Id of the signing key
    #[serde(default)]
    pub signing_key: String,
    /// Receipt returned by the anchoring service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ledger_receipt: Option<Value>,
    /// Why anchoring did not produce a receipt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ledger_error: Option<String>,
}

/// A required field is missing or has the wrong type
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed attestation field '{field}': {reason}")]
pub struct MalformedField {
    /// Offending field
    pub field: &'static str,
    /// What is wrong with it
    pub reason: String,
}

impl MalformedField {
    fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

impl Attestation {
    /// Read an attestation out of an untrusted JSON value
    ///
    /// # Errors
    ///
    /// Returns the first field that is missing or not of the expected type
    pub fn from_value(value: &Value) -> Result<Self, MalformedField> {
        let object = value
            .as_object()
            .ok_or_else(|| MalformedField::new("attestation", "expected a JSON object"))?;

        let content = object
            .get("content")
            .cloned()
            .ok_or_else(|| MalformedField::new("content", "missing"))?;

        Ok(Self {
            content,
            content_hash: required_str(object, "content_hash")?,
            signature: required_str(object, "signature")?,
            public_key_b64: optional_str(object, "public_key_b64")?.unwrap_or_default(),
            signing_key: optional_str(object, "signing_key")?.unwrap_or_default(),
            ledger_receipt: object.get("ledger_receipt").filter(|v| !v.is_null()).cloned(),
            ledger_error: optional_str(object, "ledger_error")?,
        })
    }

    /// Serialize to a JSON value
    #[must_use]
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Attach an anchoring receipt
    #[must_use]
    pub fn with_receipt(mut self, receipt: Value) -> Self {
        self.ledger_receipt = Some(receipt);
        self.ledger_error = None;
        self
    }

    /// Attach an anchoring failure note
    #[must_use]
    pub fn with_ledger_error(mut self, error: impl Into<String>) -> Self {
        self.ledger_error = Some(error.into());
        self
    }

    /// String field of the content, if present
    #[must_use]
    pub fn content_str(&self, key: &str) -> Option<&str> {
        self.content.get(key).and_then(Value::as_str)
    }
}

fn required_str(object: &Map<String, Value>, field: &'static str) -> Result<String, MalformedField> {
    match object.get(field) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(_) => Err(MalformedField::new(field, "expected a string")),
        None => Err(MalformedField::new(field, "missing")),
    }
}

fn optional_str(object: &Map<String, Value>, field: &'static str) -> Result<Option<String>, MalformedField> {
    match object.get(field) {
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(Value::Null) | None => Ok(None),
        Some(_) => Err(MalformedField::new(field, "expected a string")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Value {
        json!({
            "content": {"type": "affirm.vote", "ts": "2026-10-19T12:00:00Z"},
            "content_hash": "sha256:00",
            "signature": "ed25519:AA==",
            "public_key_b64": "key",
            "signing_key": "affirm:ed25519:v20261019"
        })
    }

    #[test]
    fn test_from_value_roundtrip_shape() {
        let attestation = Attestation::from_value(&sample()).unwrap();
        assert_eq!(attestation.signing_key, "affirm:ed25519:v20261019");
        assert_eq!(attestation.content_str("type"), Some("affirm.vote"));
        assert!(attestation.ledger_receipt.is_none());
        assert_eq!(attestation.to_value(), sample());
    }

    #[test]
    fn test_from_value_names_missing_field() {
        let mut value = sample();
        value.as_object_mut().unwrap().remove("signature");
        let err = Attestation::from_value(&value).unwrap_err();
        assert_eq!(err.field, "signature");
        assert_eq!(err.reason, "missing");

        let mut value = sample();
        value.as_object_mut().unwrap().remove("content");
        assert_eq!(Attestation::from_value(&value).unwrap_err().field, "content");
    }

    #[test]
    fn test_from_value_rejects_wrong_types() {
        let mut value = sample();
        value["content_hash"] = json!(42);
        assert_eq!(Attestation::from_value(&value).unwrap_err().field, "content_hash");

        let mut value = sample();
        value["public_key_b64"] = json!(["x"]);
        assert_eq!(Attestation::from_value(&value).unwrap_err().field, "public_key_b64");

        assert_eq!(Attestation::from_value(&json!("nope")).unwrap_err().field, "attestation");
    }

    #[test]
    fn test_receipt_and_error_notes() {
        let attestation = Attestation::from_value(&sample()).unwrap();
        let failed = attestation.clone().with_ledger_error("timeout after 20s");
        assert_eq!(failed.to_value()["ledger_error"], "timeout after 20s");

        let anchored = failed.with_receipt(json!({"id": "r-1"}));
        assert!(anchored.ledger_error.is_none());
        assert_eq!(anchored.to_value()["ledger_receipt"]["id"], "r-1");
    }
}
