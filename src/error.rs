//! Crate-wide error type and result alias.

use std::io;
use thiserror::Error;

use crate::store::StoreError;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, MigrateError>;

/// Errors surfaced by the migration engine.
///
/// Only setup-class errors abort a run; record-level store failures are
/// contained and counted by the phase engines and never reach the caller as
/// errors.
#[derive(Debug, Error)]
pub enum MigrateError {
    /// I/O failure while touching the snapshot log.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// CSV-level failure in the snapshot log.
    #[error("snapshot log error: {0}")]
    Csv(#[from] csv::Error),
    /// JSON encode/decode failure for a verbatim record.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// Collaborator store failure that escaped containment.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    /// Run-aborting setup failure (dummies, metadata, wipe guard).
    #[error("setup failure: {0}")]
    FatalSetup(String),
    /// A required reference needed a dummy that was never populated.
    #[error("no dummy record available for entity type '{0}'")]
    MissingDummy(String),
    /// An entity type absent from the loaded metadata table.
    #[error("unknown entity type '{0}'")]
    UnknownEntity(String),
    /// A bulk collaborator broke the positional id contract.
    #[error("flush for {entity} returned {got} ids for {want} payloads")]
    FlushMismatch {
        /// Entity type whose flush misbehaved.
        entity: String,
        /// Number of payloads submitted.
        want: usize,
        /// Number of ids returned.
        got: usize,
    },
    /// Caller-supplied argument the engine cannot act on.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}
