//! Attestation signing and verification for AFFIRM.
//!
//! This crate manages the rotating Ed25519 key set, turns content into
//! signed, hash-sealed attestations, verifies attestations against current
//! and retired keys, and forwards attestations to an external ledger on a
//! best-effort basis.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod anchor;
pub mod attestation;
pub mod authority;
pub mod keystore;
pub mod signature;
pub mod verifier;

pub use anchor::{anchor_best_effort, Anchor, AnchorError, HttpAnchor};
pub use attestation::{Attestation, MalformedField};
pub use authority::{sign_content, AttestationAuthority, AuthorityConfig, AuthorityError, AuthorityResult};
pub use keystore::{
    CurrentKey, HistoryEntry, KeyConfig, KeySetSnapshot, KeyStore, KeyStoreError, KeyStoreResult, Keyset,
    KeysetEntry, Rotation, SigningKeyRecord,
};
pub use signature::{PublicKeyBytes, Signature, SignatureError, SignatureScheme, Signer, Verifier};
pub use verifier::{
    AttestationVerifier, CheckOutcome, DetachedRequest, KeyAttempt, KeySource, MatchedKey, SideChecks,
    SignedOver, VerificationFailure, VerificationReport, VerifierConfig,
};
