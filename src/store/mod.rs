//! Collaborator contracts for the source and target record stores.
//!
//! The concrete wire protocol is out of scope; the engine only depends on
//! these traits. Duplicate detection is a tagged error carrying the existing
//! id rather than free-form message parsing, and bulk failures carry any
//! partial successes by submission index so positional correspondence is
//! never lost.

use serde_json::Value;
use thiserror::Error;

use crate::model::{FieldSpec, Payload, SourceRecord, TargetId};

pub mod memory;

pub use memory::InMemoryStore;

/// Result alias for collaborator calls.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Failure modes a store collaborator may report.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Record or entity does not exist.
    #[error("{entity} '{id}' not found")]
    NotFound {
        /// Entity type queried.
        entity: String,
        /// Identifier queried.
        id: String,
    },
    /// A unique-constraint conflict, optionally naming the surviving record.
    #[error("duplicate {entity}: {message}")]
    Duplicate {
        /// Entity type of the conflicting create.
        entity: String,
        /// Id of the already-existing record, when the store reports it.
        existing_id: Option<TargetId>,
        /// Store-provided detail.
        message: String,
    },
    /// A bulk job failed; `partial` lists (submission index, created id) for
    /// any rows the job still committed.
    #[error("bulk operation on {entity} failed: {message}")]
    BulkFailed {
        /// Entity type of the bulk job.
        entity: String,
        /// Indexed partial successes, empty when none are recoverable.
        partial: Vec<(usize, TargetId)>,
        /// Store-provided detail.
        message: String,
    },
    /// The store rejected the payload (validation, immutability, domain).
    #[error("{entity} rejected: {message}")]
    Rejected {
        /// Entity type of the rejected operation.
        entity: String,
        /// Store-provided detail.
        message: String,
    },
    /// Transport-level failure.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Filter expressions the engine issues against the source store.
#[derive(Debug, Clone)]
pub enum RecordFilter {
    /// "identifier is one of N values", used for batched pre-fetch.
    IdIn {
        /// Entity type to query.
        entity: String,
        /// Source identifiers to fetch.
        ids: Vec<String>,
    },
    /// Field equality, used for dependency discovery.
    FieldEq {
        /// Entity type to query.
        entity: String,
        /// Field name to compare.
        field: String,
        /// Value to match.
        value: Value,
    },
}

/// One row of a bulk update.
#[derive(Debug, Clone)]
pub struct RecordUpdate {
    /// Target id of the record to update.
    pub id: TargetId,
    /// Fields to rewrite.
    pub fields: Payload,
}

/// Schema introspection, loaded once per run into a [`MetadataTable`].
///
/// [`MetadataTable`]: crate::model::MetadataTable
pub trait MetadataProvider {
    /// Field specs for one entity type.
    fn describe_entity(&self, entity: &str) -> StoreResult<Vec<FieldSpec>>;
}

/// Read-side contract on the store records are copied from.
pub trait SourceStore {
    /// Fetches one record, `None` when absent.
    fn fetch_record(&self, entity: &str, id: &str) -> StoreResult<Option<SourceRecord>>;

    /// Runs a filter query; used for dependency discovery and pre-fetch.
    fn query_records(&self, filter: &RecordFilter) -> StoreResult<Vec<SourceRecord>>;

    /// Stable developer name of a category/subtype record, when it has one.
    fn stable_name_of(&self, entity: &str, id: &str) -> StoreResult<Option<String>>;
}

/// Write-side contract on the store records are copied into.
pub trait TargetStore {
    /// Creates one record, returning the assigned id.
    fn create_record(&self, entity: &str, payload: &Payload) -> StoreResult<TargetId>;

    /// Creates many records; returned ids match submission order row-for-row.
    fn bulk_create(&self, entity: &str, payloads: &[Payload]) -> StoreResult<Vec<TargetId>>;

    /// Rewrites fields on one record.
    fn update_record(&self, entity: &str, id: &str, fields: &Payload) -> StoreResult<()>;

    /// Applies many updates as one job.
    fn bulk_update(&self, entity: &str, updates: &[RecordUpdate]) -> StoreResult<()>;

    /// Deletes one record.
    fn delete_record(&self, entity: &str, id: &str) -> StoreResult<()>;

    /// Whether `id` exists; used for identity-continuity checks.
    fn record_exists(&self, entity: &str, id: &str) -> StoreResult<bool>;

    /// All ids of an entity type; used by the pre-run wipe.
    fn list_ids(&self, entity: &str) -> StoreResult<Vec<TargetId>>;

    /// Resolves a stable developer name to a target id, `None` on a miss.
    fn resolve_stable_name(&self, entity: &str, name: &str) -> StoreResult<Option<TargetId>>;
}
