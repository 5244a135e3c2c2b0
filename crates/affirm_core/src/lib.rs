//! AFFIRM Core Types
//!
//! This crate contains pure types and logic with no I/O.
//! Everything that gets hashed or signed goes through [`canonical`] so the
//! byte encoding is stable across platforms and construction order.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod canonical;
pub mod error;
pub mod hash;
pub mod id;
pub mod model;
pub mod time;

// Re-exports
pub use canonical::{canonical_bytes, canonical_value, CanonicalEncode};
pub use error::{CoreError, CoreResult};
pub use hash::{ContentHash, HashError};
pub use id::{EntityId, KeyId};
pub use model::{
    CandidateEntity, Endpoint, FactorScores, Gate, HttpMethod, Opinion, Score, Vote,
};
pub use time::{Clock, FreshnessWindow, ManualClock, SystemClock};
