//! Per-entity-type batch accumulator over the bulk-create collaborator.
//!
//! The one hard invariant: `flush` returns target ids in exactly the
//! submission order, so the caller can correlate the i-th id with the i-th
//! payload added since the last flush. A failed flush leaves the queue
//! intact for retry; the caller-level per-record fallback must call
//! `take_pending` explicitly so nothing is submitted twice.

use std::collections::HashMap;

use tracing::debug;

use crate::model::{Payload, TargetId};
use crate::store::{StoreError, StoreResult, TargetStore};

/// Accumulates target-shaped payloads and flushes them in bulk.
pub struct BatchCreator<'a> {
    target: &'a dyn TargetStore,
    batch_size: usize,
    pending: HashMap<String, Vec<Payload>>,
}

impl<'a> BatchCreator<'a> {
    /// New accumulator flushing at `batch_size` pending payloads per type.
    pub fn new(target: &'a dyn TargetStore, batch_size: usize) -> Self {
        Self {
            target,
            batch_size: batch_size.max(1),
            pending: HashMap::new(),
        }
    }

    /// Queues one payload. When the queue for `entity` reaches the batch
    /// size this flushes automatically and returns the created ids, in
    /// submission order, covering every payload queued since the last flush.
    pub fn add(&mut self, entity: &str, payload: Payload) -> StoreResult<Option<Vec<TargetId>>> {
        let queue = self.pending.entry(entity.to_string()).or_default();
        queue.push(payload);
        if queue.len() >= self.batch_size {
            return self.flush(entity).map(Some);
        }
        Ok(None)
    }

    /// Flushes the queue for `entity`. On success the queue is cleared and
    /// the ids correspond row-for-row to the submitted payloads. On failure
    /// the queue is kept; any partial successes ride along inside
    /// [`StoreError::BulkFailed`] with their submission indices.
    pub fn flush(&mut self, entity: &str) -> StoreResult<Vec<TargetId>> {
        let Some(queue) = self.pending.get(entity) else {
            return Ok(Vec::new());
        };
        if queue.is_empty() {
            return Ok(Vec::new());
        }
        debug!(entity, count = queue.len(), "flushing creation batch");
        let ids = self.target.bulk_create(entity, queue)?;
        if ids.len() != queue.len() {
            // The collaborator broke the positional contract; treat as a
            // batch failure and keep the queue for the fallback path.
            return Err(StoreError::BulkFailed {
                entity: entity.to_string(),
                partial: Vec::new(),
                message: format!("{} ids returned for {} payloads", ids.len(), queue.len()),
            });
        }
        self.pending.remove(entity);
        Ok(ids)
    }

    /// Number of queued payloads for `entity`.
    pub fn pending_count(&self, entity: &str) -> usize {
        self.pending.get(entity).map_or(0, Vec::len)
    }

    /// Removes and returns the queue for `entity`, in submission order.
    /// The per-record fallback path uses this to re-submit the exact
    /// payloads the failed flush carried, without re-rewriting them.
    pub fn take_pending(&mut self, entity: &str) -> Vec<Payload> {
        self.pending.remove(entity).unwrap_or_default()
    }

    /// Entity types that still have queued payloads.
    pub fn pending_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self
            .pending
            .iter()
            .filter(|(_, q)| !q.is_empty())
            .map(|(t, _)| t.clone())
            .collect();
        types.sort();
        types
    }
}
