//! Placeholder ("dummy") records that satisfy required references before
//! their real counterparts exist.
//!
//! One dummy per entity type, created up front in dependency order and
//! reused for the whole run. Phase 2 rewrites every dummy reference to the
//! real target id, so at run end the dummies can be purged (except the root
//! placeholder, which other records may still point at when their real
//! reference never materialized).

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::error::{MigrateError, Result};
use crate::model::{FieldKind, MetadataTable, Payload, TargetId};
use crate::store::TargetStore;

/// Scalar value used for required fields the plan leaves unseeded.
const PLACEHOLDER_SCALAR: &str = "PLACEHOLDER";

/// One planned dummy: the entity type plus seed values for fields the
/// engine cannot synthesize (names, dates, status codes).
#[derive(Debug, Clone, Deserialize)]
pub struct DummySpec {
    /// Entity type to create a placeholder for.
    pub entity: String,
    /// Seed scalar values, e.g. `{"name": "NO ACCOUNT"}`.
    #[serde(default)]
    pub seeds: Payload,
}

/// The per-run registry of placeholder target ids. Immutable once populated.
#[derive(Debug, Default)]
pub struct DummyRegistry {
    ids: HashMap<String, TargetId>,
    creation_order: Vec<String>,
}

impl DummyRegistry {
    /// A registry with no dummies, for runs that need none.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Creates every planned dummy in the target, ordering creation so that
    /// required references between dummy types are always satisfiable.
    /// Any failure here is fatal: without a dummy there is no substitution
    /// for its type's required references.
    pub fn populate(
        target: &dyn TargetStore,
        metadata: &MetadataTable,
        plan: &[DummySpec],
    ) -> Result<Self> {
        let mut registry = Self::default();
        let mut remaining: Vec<&DummySpec> = plan.iter().collect();

        while !remaining.is_empty() {
            let mut progressed = false;
            let mut deferred = Vec::new();

            for spec in remaining {
                if registry.ids.contains_key(&spec.entity) {
                    continue;
                }
                if Self::blocked_on(spec, metadata, &registry)? {
                    deferred.push(spec);
                    continue;
                }
                let payload = Self::synthesize(spec, metadata, &registry)?;
                let id = target.create_record(&spec.entity, &payload).map_err(|e| {
                    MigrateError::FatalSetup(format!(
                        "cannot create dummy {}: {e}",
                        spec.entity
                    ))
                })?;
                info!(entity = %spec.entity, id = %id, "dummy record created");
                registry.ids.insert(spec.entity.clone(), id);
                registry.creation_order.push(spec.entity.clone());
                progressed = true;
            }

            if !progressed && !deferred.is_empty() {
                let stuck: Vec<&str> = deferred.iter().map(|s| s.entity.as_str()).collect();
                return Err(MigrateError::FatalSetup(format!(
                    "required-reference cycle or unplanned dependency among dummy types: {}",
                    stuck.join(", ")
                )));
            }
            remaining = deferred;
        }
        Ok(registry)
    }

    /// Whether `spec` still waits on a dummy for a required reference type.
    fn blocked_on(
        spec: &DummySpec,
        metadata: &MetadataTable,
        registry: &DummyRegistry,
    ) -> Result<bool> {
        let meta = metadata.entity(&spec.entity)?;
        for field in meta.fields() {
            if field.kind != FieldKind::Reference || !field.required {
                continue;
            }
            if spec.seeds.contains_key(&field.name) {
                continue;
            }
            let Some(ref_type) = &field.references else {
                continue;
            };
            if !registry.ids.contains_key(ref_type) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Minimal valid payload for one dummy: plan seeds, then required
    /// references filled from already-created dummies, then placeholder
    /// scalars for any required field still missing.
    fn synthesize(
        spec: &DummySpec,
        metadata: &MetadataTable,
        registry: &DummyRegistry,
    ) -> Result<Payload> {
        let meta = metadata.entity(&spec.entity)?;
        let mut payload = spec.seeds.clone();
        for field in meta.fields() {
            if !field.required || payload.contains_key(&field.name) {
                continue;
            }
            match field.kind {
                FieldKind::Reference => {
                    let ref_type = field.references.as_deref().unwrap_or_default();
                    let id = registry
                        .ids
                        .get(ref_type)
                        .ok_or_else(|| MigrateError::MissingDummy(ref_type.to_string()))?;
                    payload.insert(field.name.clone(), json!(id));
                }
                FieldKind::Scalar => {
                    let value = field
                        .allowed_values
                        .as_ref()
                        .and_then(|d| d.iter().next())
                        .map_or(PLACEHOLDER_SCALAR, String::as_str);
                    payload.insert(field.name.clone(), json!(value));
                }
            }
        }
        Ok(payload)
    }

    /// Dummy target id for `entity`, if one was planned.
    pub fn get(&self, entity: &str) -> Option<&TargetId> {
        self.ids.get(entity)
    }

    /// Whether `id` is the dummy standing in for `entity`.
    pub fn is_dummy(&self, entity: &str, id: &str) -> bool {
        self.ids.get(entity).is_some_and(|d| d == id)
    }

    /// The first-created placeholder, which the others depend on.
    pub fn root(&self) -> Option<&str> {
        self.creation_order.first().map(String::as_str)
    }

    /// Deletes the dummies in reverse creation order, keeping the root
    /// placeholder. Returns (deleted, failed) counts; failures are warned,
    /// never fatal.
    pub fn purge(&self, target: &dyn TargetStore) -> (usize, usize) {
        let mut deleted = 0;
        let mut failed = 0;
        for entity in self.creation_order.iter().rev() {
            if Some(entity.as_str()) == self.root() {
                continue;
            }
            let Some(id) = self.ids.get(entity) else {
                continue;
            };
            match target.delete_record(entity, id) {
                Ok(()) => {
                    info!(entity = %entity, id = %id, "dummy record purged");
                    deleted += 1;
                }
                Err(e) => {
                    warn!(entity = %entity, id = %id, error = %e, "dummy purge failed");
                    failed += 1;
                }
            }
        }
        (deleted, failed)
    }
}

impl DummySpec {
    /// Plan entry with no seeds.
    pub fn bare(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            seeds: Payload::new(),
        }
    }

    /// Plan entry with one seeded scalar.
    pub fn seeded(entity: impl Into<String>, field: &str, value: Value) -> Self {
        let mut seeds = Payload::new();
        seeds.insert(field.to_string(), value);
        Self {
            entity: entity.into(),
            seeds,
        }
    }
}
