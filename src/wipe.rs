//! Pre-run deletion of existing target records.
//!
//! Destructive by nature, so it refuses to run unless the config explicitly
//! allows wiping the target. Types are deleted in the caller-given order,
//! which must be child-first so reference constraints never block a delete.

use std::collections::BTreeMap;

use tracing::{info, warn};

use crate::error::{MigrateError, Result};
use crate::store::TargetStore;

/// Deletes every record of the listed entity types, child-first.
/// Returns per-type deleted counts; individual delete failures are warned
/// and counted, not fatal.
pub fn wipe_existing(
    target: &dyn TargetStore,
    types_child_first: &[String],
    allow: bool,
) -> Result<BTreeMap<String, usize>> {
    if !allow {
        return Err(MigrateError::FatalSetup(
            "target wipe requested but not allowed by config".to_string(),
        ));
    }
    let mut counts = BTreeMap::new();
    for entity in types_child_first {
        let ids = target
            .list_ids(entity)
            .map_err(|e| MigrateError::FatalSetup(format!("list {entity} for wipe: {e}")))?;
        let mut deleted = 0usize;
        for id in &ids {
            match target.delete_record(entity, id) {
                Ok(()) => deleted += 1,
                Err(e) => warn!(entity = %entity, id = %id, error = %e, "wipe delete failed"),
            }
        }
        info!(entity = %entity, deleted, total = ids.len(), "wiped existing records");
        counts.insert(entity.clone(), deleted);
    }
    Ok(counts)
}
