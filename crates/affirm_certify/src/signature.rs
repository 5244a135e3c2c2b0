//! Ed25519 signature primitives.
//!
//! Keys and signatures travel as standard padded base64. Signatures carry
//! a scheme prefix on the wire (`ed25519:<base64>`).

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use ed25519_dalek::Signature as DalekSignature;
use ed25519_dalek::Signer as DalekSigner;
use ed25519_dalek::SigningKey;
use ed25519_dalek::Verifier as DalekVerifier;
use ed25519_dalek::VerifyingKey;
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use zeroize::Zeroizing;

/// Signature scheme for attestations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignatureScheme {
    /// Ed25519 signature scheme
    #[default]
    Ed25519,
}

impl SignatureScheme {
    /// Wire prefix, without the separating colon
    #[must_use]
    pub const fn prefix(&self) -> &'static str {
        match self {
            Self::Ed25519 => "ed25519",
        }
    }

    /// Parse a scheme name
    ///
    /// # Errors
    ///
    /// Returns [`SignatureError::UnsupportedScheme`] for anything but ed25519
    pub fn parse(name: &str) -> Result<Self, SignatureError> {
        match name {
            "ed25519" => Ok(Self::Ed25519),
            other => Err(SignatureError::UnsupportedScheme(other.to_string())),
        }
    }
}

/// A detached signature
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    /// Signature scheme used
    pub scheme: SignatureScheme,
    /// Signature bytes
    pub bytes: [u8; 64],
}

impl Signature {
    /// Create an Ed25519 signature
    #[must_use]
    pub fn ed25519(bytes: [u8; 64]) -> Self {
        Self {
            scheme: SignatureScheme::Ed25519,
            bytes,
        }
    }

    /// Get the signature bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Wire form: `ed25519:<base64>`
    #[must_use]
    pub fn to_wire(&self) -> String {
        format!("{}:{}", self.scheme.prefix(), BASE64.encode(self.bytes))
    }

    /// Parse the prefixed wire form
    ///
    /// # Errors
    ///
    /// Returns error for a missing or unsupported prefix, bad base64, or a
    /// wrong length
    pub fn from_wire(wire: &str) -> Result<Self, SignatureError> {
        let (scheme, body) = wire
            .split_once(':')
            .ok_or(SignatureError::MissingScheme)?;
        let scheme = SignatureScheme::parse(scheme)?;
        let bytes = decode_signature_bytes(body)?;
        Ok(Self { scheme, bytes })
    }

    /// Parse either the prefixed wire form or bare base64
    ///
    /// # Errors
    ///
    /// Returns error for an unsupported prefix, bad base64, or a wrong length
    pub fn from_wire_lenient(wire: &str) -> Result<Self, SignatureError> {
        if wire.contains(':') {
            Self::from_wire(wire)
        } else {
            Ok(Self::ed25519(decode_signature_bytes(wire)?))
        }
    }
}

fn decode_signature_bytes(b64: &str) -> Result<[u8; 64], SignatureError> {
    let raw = BASE64
        .decode(b64.trim())
        .map_err(|_| SignatureError::InvalidEncoding)?;
    raw.try_into().map_err(|_| SignatureError::InvalidSignature)
}

/// Holds a private key and signs with it
///
/// The dalek key zeroizes its secret on drop.
pub struct Signer {
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signer")
            .field("public_key", &self.public_key().to_base64())
            .finish_non_exhaustive()
    }
}

impl Signer {
    /// Create a signer with a fresh random keypair
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = Zeroizing::new([0u8; 32]);
        OsRng.fill_bytes(&mut *bytes);
        Self::from_seed(&bytes)
    }

    fn from_seed(seed: &[u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(seed);
        let verifying_key = VerifyingKey::from(&signing_key);
        Self {
            signing_key,
            verifying_key,
        }
    }

    /// Create a signer from a 32-byte secret seed
    ///
    /// # Errors
    ///
    /// Returns error if the secret is not 32 bytes
    pub fn from_secret(secret: &[u8]) -> Result<Self, SignatureError> {
        let bytes: Zeroizing<[u8; 32]> = Zeroizing::new(
            secret
                .try_into()
                .map_err(|_| SignatureError::InvalidSecretKey)?,
        );
        Ok(Self::from_seed(&bytes))
    }

    /// Create a signer from a base64 secret seed
    ///
    /// # Errors
    ///
    /// Returns error if the input is not base64 of a 32-byte seed
    pub fn from_base64(secret_b64: &str) -> Result<Self, SignatureError> {
        let raw = Zeroizing::new(
            BASE64
                .decode(secret_b64.trim())
                .map_err(|_| SignatureError::InvalidSecretKey)?,
        );
        Self::from_secret(&raw)
    }

    /// Secret seed as base64, for writing a key file
    #[must_use]
    pub fn secret_base64(&self) -> Zeroizing<String> {
        let seed = Zeroizing::new(self.signing_key.to_bytes());
        Zeroizing::new(BASE64.encode(&*seed))
    }

    /// Get the public key
    #[must_use]
    pub fn public_key(&self) -> PublicKeyBytes {
        PublicKeyBytes(self.verifying_key.to_bytes())
    }

    /// Sign a message
    #[must_use]
    pub fn sign(&self, message: &[u8]) -> Signature {
        Signature::ed25519(self.signing_key.sign(message).to_bytes())
    }
}

/// Raw Ed25519 public key, serialized as base64
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKeyBytes(pub [u8; 32]);

impl PublicKeyBytes {
    /// Get the underlying bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Convert to hex string
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Standard padded base64
    #[must_use]
    pub fn to_base64(&self) -> String {
        BASE64.encode(self.0)
    }

    /// Parse from base64
    ///
    /// # Errors
    ///
    /// Returns error if the input is not base64 of exactly 32 bytes
    pub fn from_base64(b64: &str) -> Result<Self, SignatureError> {
        let raw = BASE64
            .decode(b64.trim())
            .map_err(|_| SignatureError::InvalidEncoding)?;
        let bytes: [u8; 32] = raw.try_into().map_err(|_| SignatureError::InvalidPublicKey)?;
        Ok(Self(bytes))
    }
}

impl Serialize for PublicKeyBytes {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base64())
    }
}

impl<'de> Deserialize<'de> for PublicKeyBytes {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_base64(&s).map_err(serde::de::Error::custom)
    }
}

/// Checks signatures against one public key
#[derive(Debug, Clone)]
pub struct Verifier {
    verifying_key: VerifyingKey,
}

impl Verifier {
    /// Create a verifier from a public key
    ///
    /// # Errors
    ///
    /// Returns error if the bytes are not a valid curve point
    pub fn new(public_key: PublicKeyBytes) -> Result<Self, SignatureError> {
        let verifying_key =
            VerifyingKey::from_bytes(&public_key.0).map_err(|_| SignatureError::InvalidPublicKey)?;
        Ok(Self { verifying_key })
    }

    /// Verify a signature on a message
    ///
    /// # Errors
    ///
    /// Returns error for an unsupported scheme or an unusable signature, and
    /// [`SignatureError::VerificationFailed`] if the signature does not match
    pub fn verify(&self, message: &[u8], signature: &Signature) -> Result<(), SignatureError> {
        if signature.scheme != SignatureScheme::Ed25519 {
            return Err(SignatureError::UnsupportedScheme(
                signature.scheme.prefix().to_string(),
            ));
        }
        let sig = DalekSignature::from_bytes(&signature.bytes);
        self.verifying_key
            .verify(message, &sig)
            .map_err(|_| SignatureError::VerificationFailed)
    }
}

/// Signature-related errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    /// Invalid secret key
    #[error("invalid secret key")]
    InvalidSecretKey,
    /// Invalid public key
    #[error("invalid public key")]
    InvalidPublicKey,
    /// Invalid signature
    #[error("invalid signature")]
    InvalidSignature,
    /// Invalid base64 encoding
    #[error("invalid base64 encoding")]
    InvalidEncoding,
    /// Signature lacks a `scheme:` prefix
    #[error("signature has no scheme prefix")]
    MissingScheme,
    /// Unsupported signature scheme
    #[error("unsupported signature scheme: {0}")]
    UnsupportedScheme(String),
    /// Verification failed
    #[error("signature verification failed")]
    VerificationFailed,
}

impl SignatureError {
    /// Short failure class used in verification trails
    #[must_use]
    pub const fn class(&self) -> &'static str {
        match self {
            Self::InvalidSecretKey => "invalid_secret_key",
            Self::InvalidPublicKey => "invalid_public_key",
            Self::InvalidSignature => "invalid_signature",
            Self::InvalidEncoding => "invalid_encoding",
            Self::MissingScheme => "missing_scheme",
            Self::UnsupportedScheme(_) => "unsupported_scheme",
            Self::VerificationFailed => "bad_signature",
        }
    }
}
