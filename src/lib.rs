//! Regraft copies a connected graph of records from a source store into a
//! target store that assigns its own identifiers, preserving every
//! cross-record reference.
//!
//! Phase 1 materializes the graph with dummy placeholders standing in for
//! required references whose real counterpart does not exist yet, recording
//! an identity map and a verbatim snapshot per record; Phase 2 replays the
//! snapshots against the completed identity map and backpatches every
//! reference to its true target id.

#![warn(missing_docs)]

pub mod backpatch;
pub mod batch;
pub mod config;
pub mod dummy;
pub mod error;
pub mod identity;
pub mod materialize;
pub mod model;
pub mod rewrite;
pub mod run;
pub mod snapshot;
pub mod store;
pub mod wipe;

pub use backpatch::{BackpatchStats, Backpatcher};
pub use batch::BatchCreator;
pub use config::MigrationConfig;
pub use dummy::{DummyRegistry, DummySpec};
pub use error::{MigrateError, Result};
pub use identity::IdentityMap;
pub use materialize::{Materialized, Materializer, Phase1Stats};
pub use model::{
    EntityMeta, FieldKind, FieldSpec, MetadataTable, Payload, Snapshot, SourceId, SourceRecord,
    TargetId,
};
pub use run::{MigrationRun, RootSet, RunSummary, TypeSummary};
pub use snapshot::{CsvSnapshotLog, SnapshotStore};
pub use store::{
    InMemoryStore, MetadataProvider, RecordFilter, RecordUpdate, SourceStore, StoreError,
    TargetStore,
};
