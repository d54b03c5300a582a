//! Phase 1: graph materialization.
//!
//! Walks the requested roots, recursively ensures same-type dependencies
//! exist first (cycle-guarded by an in-flight marker set, never by stack
//! depth), rewrites references, submits creations batched with a
//! single-record fallback, and records the identity mapping plus a verbatim
//! snapshot for Phase 2.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::batch::BatchCreator;
use crate::config::MigrationConfig;
use crate::dummy::DummyRegistry;
use crate::error::{MigrateError, Result};
use crate::identity::IdentityMap;
use crate::model::{MetadataTable, Payload, Snapshot, SourceId, SourceRecord, TargetId};
use crate::rewrite::{rewrite, ReferenceResolver};
use crate::snapshot::SnapshotStore;
use crate::store::{RecordFilter, SourceStore, StoreError, TargetStore};

/// Outcome of materializing one (entity, source id).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Materialized {
    /// The identity map holds the record's target id.
    Mapped(TargetId),
    /// Queued in the current batch; the id is unknown until flush.
    Pending,
    /// The record is already being resolved higher in the call stack;
    /// the caller must substitute the dummy.
    InFlight,
    /// Creation failed; the record is absent from the identity map.
    Failed,
}

/// Per-entity-type Phase 1 counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Phase1Stats {
    /// Records created in the target.
    pub created: usize,
    /// Duplicate conflicts resolved by adopting the existing target id.
    pub recovered: usize,
    /// Records that failed to create and were left unmapped.
    pub failed: usize,
    /// Requests short-circuited by an existing identity-map entry.
    pub reused: usize,
}

struct PendingRecord {
    source_id: SourceId,
    original: Payload,
}

/// The Phase 1 engine. One instance drives one run's materialization.
pub struct Materializer<'a> {
    source: &'a dyn SourceStore,
    target: &'a dyn TargetStore,
    metadata: &'a MetadataTable,
    identity: &'a IdentityMap,
    dummies: &'a DummyRegistry,
    snapshots: &'a dyn SnapshotStore,
    config: &'a MigrationConfig,
    resolver: ReferenceResolver<'a>,
    batch: BatchCreator<'a>,
    in_flight: HashSet<(String, SourceId)>,
    pending: HashMap<String, Vec<PendingRecord>>,
    prefetched: HashMap<(String, SourceId), SourceRecord>,
    stats: BTreeMap<String, Phase1Stats>,
}

impl<'a> Materializer<'a> {
    /// Wires the engine to its collaborators for one run.
    #[allow(clippy::too_many_arguments)]
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
            source,
            target,
            metadata,
            identity,
            dummies,
            snapshots,
            config,
            resolver: ReferenceResolver::new(source, target, config),
            batch: BatchCreator::new(target, config.batch_size),
            in_flight: HashSet::new(),
            pending: HashMap::new(),
            prefetched: HashMap::new(),
            stats: BTreeMap::new(),
        }
    }

    /// Materializes a set of roots of one entity type: pre-fetches them in a
    /// single id-in-N query, walks each (dependencies included), then
    /// flushes everything still queued.
    pub fn materialize_roots(&mut self, entity: &str, ids: &[SourceId]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let fetched = self
            .source
            .query_records(&RecordFilter::IdIn {
                entity: entity.to_string(),
                ids: ids.to_vec(),
            })
            .map_err(|e| MigrateError::FatalSetup(format!("pre-fetch {entity}: {e}")))?;
        info!(entity, requested = ids.len(), fetched = fetched.len(), "pre-fetched roots");
        for record in fetched {
            self.prefetched
                .insert((entity.to_string(), record.id.clone()), record);
        }
        let total = ids.len();
        for (index, id) in ids.iter().enumerate() {
            debug!(entity, id = %id, index = index + 1, total, "materializing root");
            self.materialize(entity, id)?;
        }
        self.finish()
    }

    /// Materializes one record, resolving dependencies first.
    pub fn materialize(&mut self, entity: &str, source_id: &str) -> Result<Materialized> {
        if let Some(id) = self.identity.get(entity, source_id) {
            self.stat_mut(entity).reused += 1;
            return Ok(Materialized::Mapped(id));
        }
        let key = (entity.to_string(), source_id.to_string());
        if self.in_flight.contains(&key) {
            return Ok(Materialized::InFlight);
        }
        // Queued but unflushed records have no id yet; re-walking them here
        // would submit them twice.
        if self
            .pending
            .get(entity)
            .is_some_and(|queue| queue.iter().any(|r| r.source_id == source_id))
        {
            return Ok(Materialized::Pending);
        }

        let metadata = self.metadata;
        let meta = metadata.entity(entity)?;

        let record = match self.prefetched.remove(&key) {
            Some(record) => record,
            None => match self.source.fetch_record(entity, source_id) {
                Ok(Some(record)) => record,
                Ok(None) => {
                    warn!(entity, source_id, "source record not found");
                    self.stat_mut(entity).failed += 1;
                    return Ok(Materialized::Failed);
                }
                Err(e) => {
                    warn!(entity, source_id, error = %e, "source fetch failed");
                    self.stat_mut(entity).failed += 1;
                    return Ok(Materialized::Failed);
                }
            },
        };

        self.in_flight.insert(key.clone());

        // Same-type dependencies first, so a parent in the same batch can
        // carry the real id instead of the dummy.
        let deps: Vec<SourceId> = meta
            .reference_fields()
            .filter(|f| f.references.as_deref() == Some(entity))
            .filter_map(|f| record.str_field(&f.name).map(String::from))
            .filter(|dep| dep != source_id)
            .collect();
        for dep in deps {
            if self.identity.contains(entity, &dep) {
                continue;
            }
            debug!(entity, source_id, dependency = %dep, "resolving same-type dependency");
            if self.materialize(entity, &dep)? == Materialized::Pending {
                // The dependency sits in the unflushed batch with no id yet;
                // flush so the parent's payload references the real record.
                self.flush_entity(entity)?;
            }
        }

        let payload = rewrite(&record, meta, self.identity, self.dummies, &mut self.resolver)?;
        self.in_flight.remove(&key);

        if self.config.use_bulk {
            self.submit_batched(entity, record, payload)
        } else {
            let original = record.fields.clone();
            self.create_single(entity, &record.id, &payload, &original)
        }
    }

    /// Flushes every queue still holding payloads.
    pub fn finish(&mut self) -> Result<()> {
        for entity in self.batch.pending_types() {
            self.flush_entity(&entity)?;
        }
        Ok(())
    }

    /// Per-type counters accumulated so far.
    pub fn stats(&self) -> &BTreeMap<String, Phase1Stats> {
        &self.stats
    }

    /// Consumes the engine, returning its counters.
    pub fn into_stats(self) -> BTreeMap<String, Phase1Stats> {
        self.stats
    }

    fn submit_batched(
        &mut self,
        entity: &str,
        record: SourceRecord,
        payload: Payload,
    ) -> Result<Materialized> {
        let source_id = record.id.clone();
        self.pending
            .entry(entity.to_string())
            .or_default()
            .push(PendingRecord {
                source_id: source_id.clone(),
                original: record.fields,
            });
        match self.batch.add(entity, payload) {
            Ok(None) => Ok(Materialized::Pending),
            Ok(Some(ids)) => {
                self.adopt_flush(entity, ids)?;
                Ok(self
                    .identity
                    .get(entity, &source_id)
                    .map_or(Materialized::Failed, Materialized::Mapped))
            }
            Err(err) => {
                self.fallback_pending(entity, err)?;
                Ok(self
                    .identity
                    .get(entity, &source_id)
                    .map_or(Materialized::Failed, Materialized::Mapped))
            }
        }
    }

    fn flush_entity(&mut self, entity: &str) -> Result<()> {
        match self.batch.flush(entity) {
            Ok(ids) => self.adopt_flush(entity, ids),
            Err(err) => self.fallback_pending(entity, err),
        }
    }

    /// Zips flush ids with the pending records, in submission order.
    fn adopt_flush(&mut self, entity: &str, ids: Vec<TargetId>) -> Result<()> {
        let records = self.pending.remove(entity).unwrap_or_default();
        if ids.len() != records.len() {
            return Err(MigrateError::FlushMismatch {
                entity: entity.to_string(),
                want: records.len(),
                got: ids.len(),
            });
        }
        for (record, target_id) in records.into_iter().zip(ids) {
            self.record_success(entity, &record.source_id, target_id, record.original, false)?;
        }
        Ok(())
    }

    /// The batch failed: adopt any indexed partial successes, then create
    /// the rest one record at a time with the exact payloads the flush
    /// carried, with no re-rewriting against a possibly-staler identity map.
    fn fallback_pending(&mut self, entity: &str, err: StoreError) -> Result<()> {
        let partial: HashMap<usize, TargetId> = match &err {
            StoreError::BulkFailed { partial, .. } => partial.iter().cloned().collect(),
            _ => HashMap::new(),
        };
        warn!(
            entity,
            error = %err,
            recovered = partial.len(),
            "bulk create failed, falling back to single-record creation"
        );
        let payloads = self.batch.take_pending(entity);
        let records = self.pending.remove(entity).unwrap_or_default();
        if payloads.len() != records.len() {
            return Err(MigrateError::FlushMismatch {
                entity: entity.to_string(),
                want: records.len(),
                got: payloads.len(),
            });
        }
        for (index, (record, payload)) in records.into_iter().zip(payloads).enumerate() {
            if let Some(target_id) = partial.get(&index) {
                self.record_success(
                    entity,
                    &record.source_id,
                    target_id.clone(),
                    record.original,
                    false,
                )?;
                continue;
            }
            self.create_single(entity, &record.source_id, &payload, &record.original)?;
        }
        Ok(())
    }

    fn create_single(
        &mut self,
        entity: &str,
        source_id: &str,
        payload: &Payload,
        original: &Payload,
    ) -> Result<Materialized> {
        match self.target.create_record(entity, payload) {
            Ok(target_id) => {
                debug!(entity, source_id, target_id = %target_id, "record created");
                self.record_success(entity, source_id, target_id.clone(), original.clone(), false)?;
                Ok(Materialized::Mapped(target_id))
            }
            Err(StoreError::Duplicate {
                existing_id: Some(existing),
                ..
            }) => {
                info!(entity, source_id, existing = %existing, "duplicate conflict, adopting existing record");
                self.record_success(entity, source_id, existing.clone(), original.clone(), true)?;
                Ok(Materialized::Mapped(existing))
            }
            Err(err) => {
                warn!(entity, source_id, error = %err, "record creation failed");
                self.stat_mut(entity).failed += 1;
                Ok(Materialized::Failed)
            }
        }
    }

    fn record_success(
        &mut self,
        entity: &str,
        source_id: &str,
        target_id: TargetId,
        original: Payload,
        recovered: bool,
    ) -> Result<()> {
        self.identity.insert(entity, source_id, &target_id);
        self.snapshots.append(&Snapshot {
            entity: entity.to_string(),
            source_id: source_id.to_string(),
            target_id,
            record: original,
        })?;
        let stat = self.stat_mut(entity);
        if recovered {
            stat.recovered += 1;
        } else {
            stat.created += 1;
        }
        Ok(())
    }

    fn stat_mut(&mut self, entity: &str) -> &mut Phase1Stats {
        self.stats.entry(entity.to_string()).or_default()
    }
}
