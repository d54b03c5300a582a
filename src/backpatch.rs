//! Phase 2: backpatching.
//!
//! Replays the snapshot log against the now-complete identity map, rewriting
//! every reference that Phase 1 dropped or pointed at a dummy to its true
//! target id. Updates are batched; a bulk failure falls back to per-record
//! updates, and a per-record failure falls back further to per-field
//! updates so one bad field cannot block the rest of a record's corrections.

use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::config::MigrationConfig;
use crate::dummy::DummyRegistry;
use crate::error::Result;
use crate::identity::IdentityMap;
use crate::model::{MetadataTable, Payload, Snapshot};
use crate::rewrite::ReferenceResolver;
use crate::snapshot::SnapshotStore;
use crate::store::{RecordUpdate, SourceStore, TargetStore};

/// Per-entity-type Phase 2 counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BackpatchStats {
    /// Records whose references were rewritten.
    pub updated: usize,
    /// Records with nothing to correct.
    pub skipped: usize,
    /// Records where at least one correction could not be applied.
    pub errored: usize,
}

/// The Phase 2 engine. Invoked once per entity type, after Phase 1 has
/// completed for every type.
pub struct Backpatcher<'a> {
    target: &'a dyn TargetStore,
    metadata: &'a MetadataTable,
    identity: &'a IdentityMap,
    dummies: &'a DummyRegistry,
    snapshots: &'a dyn SnapshotStore,
    config: &'a MigrationConfig,
    resolver: ReferenceResolver<'a>,
}

impl<'a> Backpatcher<'a> {
    /// Wires the engine to its collaborators for one run.
    pub fn new(
        source: &'a dyn SourceStore,
        target: &'a dyn TargetStore,
        metadata: &'a MetadataTable,
        identity: &'a IdentityMap,
        dummies: &'a DummyRegistry,
        snapshots: &'a dyn SnapshotStore,
        config: &'a MigrationConfig,
    ) -> Self {
        Self {
            target,
            metadata,
            identity,
            dummies,
            snapshots,
            config,
            resolver: ReferenceResolver::new(source, target, config),
        }
    }

    /// Rewrites references for every snapshotted record of `entity`.
    pub fn backpatch(&mut self, entity: &str) -> Result<BackpatchStats> {
        let metadata = self.metadata;
        let meta = metadata.entity(entity)?;
        let snapshots = self.snapshots.read_all(entity)?;
        if snapshots.is_empty() {
            debug!(entity, "no snapshots to backpatch");
            return Ok(BackpatchStats::default());
        }
        info!(entity, count = snapshots.len(), "backpatching references");

        let mut stats = BackpatchStats::default();
        let mut updates = Vec::new();
        for snapshot in &snapshots {
            let fields = self.corrections_for(entity, meta, snapshot);
            if fields.is_empty() {
                stats.skipped += 1;
            } else {
                updates.push(RecordUpdate {
                    id: snapshot.target_id.clone(),
                    fields,
                });
            }
        }

        for chunk in updates.chunks(self.config.batch_size.max(1)) {
            match self.target.bulk_update(entity, chunk) {
                Ok(()) => stats.updated += chunk.len(),
                Err(err) => {
                    warn!(entity, error = %err, "bulk update failed, falling back to per-record updates");
                    for update in chunk {
                        self.apply_single(entity, update, &mut stats);
                    }
                }
            }
        }
        info!(
            entity,
            updated = stats.updated,
            skipped = stats.skipped,
            errored = stats.errored,
            "backpatch pass complete"
        );
        Ok(stats)
    }

    /// The update payload for one snapshot: every reference field that is
    /// mutable, not a continuity type, and resolves to something other than
    /// its type's dummy. Stable-name fields resolve through the cached
    /// lookup; a miss warns and leaves the field unset.
    fn corrections_for(
        &mut self,
        entity: &str,
        meta: &crate::model::EntityMeta,
        snapshot: &Snapshot,
    ) -> Payload {
        let mut fields = Payload::new();
        for field in meta.reference_fields() {
            if field.immutable_after_create {
                continue;
            }
            let ref_type = field.references.as_deref().unwrap_or_default();
            // Continuity ids were already written correctly in Phase 1.
            if self.config.is_continuity_type(ref_type) {
                continue;
            }
            let Some(raw) = snapshot
                .record
                .get(&field.name)
                .and_then(serde_json::Value::as_str)
            else {
                continue;
            };
            if field.by_stable_name {
                if let Some(id) = self.resolver.resolve_stable(ref_type, raw) {
                    fields.insert(field.name.clone(), json!(id));
                }
                continue;
            }
            let Some(target_id) = self.identity.get(ref_type, raw) else {
                debug!(
                    entity,
                    source_id = %snapshot.source_id,
                    field = %field.name,
                    reference = raw,
                    "reference still unresolved, leaving as-is"
                );
                continue;
            };
            if self.dummies.is_dummy(ref_type, &target_id) {
                continue;
            }
            fields.insert(field.name.clone(), json!(target_id));
        }
        fields
    }

    /// Per-record fallback, degrading further to per-field updates.
    fn apply_single(&self, entity: &str, update: &RecordUpdate, stats: &mut BackpatchStats) {
        match self.target.update_record(entity, &update.id, &update.fields) {
            Ok(()) => stats.updated += 1,
            Err(err) => {
                warn!(
                    entity,
                    id = %update.id,
                    error = %err,
                    "record update failed, retrying field by field"
                );
                let mut applied = 0usize;
                for (name, value) in &update.fields {
                    let mut single = Payload::new();
                    single.insert(name.clone(), value.clone());
                    match self.target.update_record(entity, &update.id, &single) {
                        Ok(()) => applied += 1,
                        Err(field_err) => {
                            warn!(
                                entity,
                                id = %update.id,
                                field = %name,
                                error = %field_err,
                                "field update failed"
                            );
                        }
                    }
                }
                if applied == update.fields.len() {
                    stats.updated += 1;
                } else {
                    stats.errored += 1;
                }
            }
        }
    }
}
