//! AFFIRM Registry
//!
//! Scores candidate entities, gates them through policy, keeps their
//! append-only reputation votes and produces signed state snapshots.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod admission;
pub mod error;
pub mod ledger;
pub mod scoring;
pub mod snapshot;

/// Version label stamped on vote records and snapshots
pub const REGISTRY_VERSION: &str = concat!("affirm-", env!("CARGO_PKG_VERSION"));

pub use admission::{Admission, AdmissionService, AdmissionSummary, SealedSnapshot, VoteOutcome};
pub use error::{RegistryError, RegistryResult};
pub use ledger::{reputation, VoteRecord, VOTE_RECORD_TYPE};
pub use scoring::{ScoringConfig, ScoringEngine, Weights, NEUTRAL_REPUTATION};
pub use snapshot::{SnapshotConfig, SnapshotItem, StateSnapshot, StateSnapshotBuilder, SNAPSHOT_TYPE};
