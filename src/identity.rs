//! Per-run source-id → target-id map, the single source of truth for
//! "this record has been migrated."

use std::collections::HashMap;

use parking_lot::RwLock;
use tracing::warn;

use crate::error::Result;
use crate::model::{SourceId, TargetId};
use crate::snapshot::SnapshotStore;

/// Insert-once identity map, one table per entity type.
///
/// Reads may overlap a flush for an unrelated entity type, so the tables sit
/// behind a read/write lock; writers follow a read-then-write-once
/// discipline and an existing entry is never overwritten.
#[derive(Debug, Default)]
pub struct IdentityMap {
    inner: RwLock<HashMap<String, HashMap<SourceId, TargetId>>>,
}

impl IdentityMap {
    /// New empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `source -> target` for `entity`. Returns false and leaves the
    /// existing entry untouched when the source id is already mapped.
    pub fn insert(&self, entity: &str, source: &str, target: &str) -> bool {
        let mut inner = self.inner.write();
        let table = inner.entry(entity.to_string()).or_default();
        if let Some(existing) = table.get(source) {
            if existing != target {
                warn!(
                    entity,
                    source, existing, rejected = target, "identity collision ignored"
                );
            }
            return false;
        }
        table.insert(source.to_string(), target.to_string());
        true
    }

    /// Mapped target id for `source`, if any.
    pub fn get(&self, entity: &str, source: &str) -> Option<TargetId> {
        self.inner
            .read()
            .get(entity)
            .and_then(|t| t.get(source))
            .cloned()
    }

    /// Whether `source` is already mapped.
    pub fn contains(&self, entity: &str, source: &str) -> bool {
        self.inner
            .read()
            .get(entity)
            .is_some_and(|t| t.contains_key(source))
    }

    /// Number of mapped ids for `entity`.
    pub fn mapped_count(&self, entity: &str) -> usize {
        self.inner.read().get(entity).map_or(0, HashMap::len)
    }

    /// Seeds the map from a prior run's snapshots, supporting resumption.
    /// Returns the number of entries adopted.
    pub fn seed_from(&self, snapshots: &dyn SnapshotStore, entities: &[String]) -> Result<usize> {
        let mut adopted = 0;
        for entity in entities {
            for snap in snapshots.read_all(entity)? {
                if self.insert(entity, &snap.source_id, &snap.target_id) {
                    adopted += 1;
                }
            }
        }
        Ok(adopted)
    }
}
