//! In-memory store backing tests and the demo binary.
//!
//! Implements all three collaborator traits with the integrity rules the
//! engine is built to survive: required fields are enforced on create,
//! reference values must point at existing records, unique fields produce
//! tagged duplicate errors naming the surviving id, and immutable fields
//! reject updates.

use std::collections::{BTreeMap, HashMap};

use parking_lot::Mutex;
use serde_json::{json, Value};

use crate::model::{FieldKind, FieldSpec, Payload, SourceRecord, TargetId};
use crate::store::{
    MetadataProvider, RecordFilter, RecordUpdate, SourceStore, StoreError, StoreResult,
    TargetStore,
};

/// Field consulted by stable-name resolution on both sides of a migration.
pub const STABLE_NAME_FIELD: &str = "developer_name";

#[derive(Default)]
struct Inner {
    metadata: HashMap<String, Vec<FieldSpec>>,
    records: HashMap<String, BTreeMap<String, Payload>>,
    unique_fields: HashMap<String, String>,
    stable_names: HashMap<String, HashMap<String, String>>,
    next_id: u64,
    create_calls: usize,
}

/// A self-contained record store with schema enforcement.
pub struct InMemoryStore {
    inner: Mutex<Inner>,
    id_prefix: String,
}

impl InMemoryStore {
    /// New empty store; generated ids start with `id_prefix`.
    pub fn new(id_prefix: impl Into<String>) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            id_prefix: id_prefix.into(),
        }
    }

    /// Registers an entity type and its field specs.
    pub fn define_entity(&self, entity: impl Into<String>, fields: Vec<FieldSpec>) {
        let entity = entity.into();
        let mut inner = self.inner.lock();
        inner.records.entry(entity.clone()).or_default();
        inner.metadata.insert(entity, fields);
    }

    /// Declares one field of `entity` unique; conflicting creates fail with
    /// a tagged duplicate naming the surviving record.
    pub fn set_unique_field(&self, entity: impl Into<String>, field: impl Into<String>) {
        self.inner
            .lock()
            .unique_fields
            .insert(entity.into(), field.into());
    }

    /// Seeds a record with a caller-chosen id, bypassing validation.
    pub fn insert_record(&self, entity: &str, id: impl Into<String>, fields: Payload) {
        self.inner
            .lock()
            .records
            .entry(entity.to_string())
            .or_default()
            .insert(id.into(), fields);
    }

    /// Registers a stable developer name for a source-side record.
    pub fn set_stable_name(&self, entity: &str, id: impl Into<String>, name: impl Into<String>) {
        self.inner
            .lock()
            .stable_names
            .entry(entity.to_string())
            .or_default()
            .insert(id.into(), name.into());
    }

    /// Fields of one stored record.
    pub fn record(&self, entity: &str, id: &str) -> Option<Payload> {
        self.inner
            .lock()
            .records
            .get(entity)
            .and_then(|m| m.get(id))
            .cloned()
    }

    /// Number of stored records of `entity`.
    pub fn record_count(&self, entity: &str) -> usize {
        self.inner
            .lock()
            .records
            .get(entity)
            .map_or(0, BTreeMap::len)
    }

    /// Total create calls served (single rows and bulk rows alike).
    pub fn create_calls(&self) -> usize {
        self.inner.lock().create_calls
    }

    /// Entire record contents as JSON, for reporting.
    pub fn dump(&self) -> Value {
        let inner = self.inner.lock();
        let mut out = serde_json::Map::new();
        for (entity, records) in &inner.records {
            let by_id: serde_json::Map<String, Value> = records
                .iter()
                .map(|(id, fields)| (id.clone(), Value::Object(fields.clone())))
                .collect();
            out.insert(entity.clone(), Value::Object(by_id));
        }
        Value::Object(out)
    }

    fn validate(
        inner: &Inner,
        entity: &str,
        payload: &Payload,
        on_create: bool,
    ) -> StoreResult<()> {
        let Some(specs) = inner.metadata.get(entity) else {
            return Err(StoreError::NotFound {
                entity: entity.to_string(),
                id: "<schema>".to_string(),
            });
        };
        for spec in specs {
            let value = payload.get(&spec.name);
            if on_create && spec.required && value.map_or(true, Value::is_null) {
                return Err(StoreError::Rejected {
                    entity: entity.to_string(),
                    message: format!("required field '{}' missing", spec.name),
                });
            }
            let Some(value) = value.filter(|v| !v.is_null()) else {
                continue;
            };
            if !on_create && spec.immutable_after_create {
                return Err(StoreError::Rejected {
                    entity: entity.to_string(),
                    message: format!("field '{}' is immutable after create", spec.name),
                });
            }
            match spec.kind {
                FieldKind::Reference => {
                    let Some(id) = value.as_str() else {
                        return Err(StoreError::Rejected {
                            entity: entity.to_string(),
                            message: format!("reference field '{}' is not an id", spec.name),
                        });
                    };
                    if let Some(ref_type) = &spec.references {
                        if let Some(refs) = inner.records.get(ref_type) {
                            if !refs.contains_key(id) {
                                return Err(StoreError::Rejected {
                                    entity: entity.to_string(),
                                    message: format!(
                                        "field '{}' references missing {ref_type} '{id}'",
                                        spec.name
                                    ),
                                });
                            }
                        }
                    }
                }
                FieldKind::Scalar => {
                    if let (Some(domain), Some(s)) = (&spec.allowed_values, value.as_str()) {
                        if !domain.contains(s) {
                            return Err(StoreError::Rejected {
                                entity: entity.to_string(),
                                message: format!("value '{s}' outside domain of '{}'", spec.name),
                            });
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn create_locked(inner: &mut Inner, prefix: &str, entity: &str, payload: &Payload) -> StoreResult<TargetId> {
        inner.create_calls += 1;
        Self::validate(inner, entity, payload, true)?;
        if let Some(unique) = inner.unique_fields.get(entity).cloned() {
            if let Some(value) = payload.get(&unique).filter(|v| !v.is_null()) {
                let existing = inner
                    .records
                    .get(entity)
                    .and_then(|m| m.iter().find(|(_, f)| f.get(&unique) == Some(value)))
                    .map(|(id, _)| id.clone());
                if let Some(existing_id) = existing {
                    return Err(StoreError::Duplicate {
                        entity: entity.to_string(),
                        existing_id: Some(existing_id),
                        message: format!("duplicate value in '{unique}'"),
                    });
                }
            }
        }
        inner.next_id += 1;
        let id = format!("{prefix}-{:06}", inner.next_id);
        inner
            .records
            .entry(entity.to_string())
            .or_default()
            .insert(id.clone(), payload.clone());
        Ok(id)
    }
}

impl MetadataProvider for InMemoryStore {
    fn describe_entity(&self, entity: &str) -> StoreResult<Vec<FieldSpec>> {
        self.inner
            .lock()
            .metadata
            .get(entity)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                entity: entity.to_string(),
                id: "<schema>".to_string(),
            })
    }
}

impl SourceStore for InMemoryStore {
    fn fetch_record(&self, entity: &str, id: &str) -> StoreResult<Option<SourceRecord>> {
        Ok(self
            .inner
            .lock()
            .records
            .get(entity)
            .and_then(|m| m.get(id))
            .map(|fields| SourceRecord::new(entity, id, fields.clone())))
    }

    fn query_records(&self, filter: &RecordFilter) -> StoreResult<Vec<SourceRecord>> {
        let inner = self.inner.lock();
        match filter {
            RecordFilter::IdIn { entity, ids } => {
                let Some(records) = inner.records.get(entity) else {
                    return Ok(Vec::new());
                };
                Ok(ids
                    .iter()
                    .filter_map(|id| {
                        records
                            .get(id)
                            .map(|fields| SourceRecord::new(entity.clone(), id.clone(), fields.clone()))
                    })
                    .collect())
            }
            RecordFilter::FieldEq {
                entity,
                field,
                value,
            } => {
                let Some(records) = inner.records.get(entity) else {
                    return Ok(Vec::new());
                };
                Ok(records
                    .iter()
                    .filter(|(_, fields)| fields.get(field) == Some(value))
                    .map(|(id, fields)| SourceRecord::new(entity.clone(), id.clone(), fields.clone()))
                    .collect())
            }
        }
    }

    fn stable_name_of(&self, entity: &str, id: &str) -> StoreResult<Option<String>> {
        let inner = self.inner.lock();
        if let Some(name) = inner
            .stable_names
            .get(entity)
            .and_then(|m| m.get(id))
            .cloned()
        {
            return Ok(Some(name));
        }
        Ok(inner
            .records
            .get(entity)
            .and_then(|m| m.get(id))
            .and_then(|fields| fields.get(STABLE_NAME_FIELD))
            .and_then(Value::as_str)
            .map(String::from))
    }
}

impl TargetStore for InMemoryStore {
    fn create_record(&self, entity: &str, payload: &Payload) -> StoreResult<TargetId> {
        let mut inner = self.inner.lock();
        Self::create_locked(&mut inner, &self.id_prefix, entity, payload)
    }

    fn bulk_create(&self, entity: &str, payloads: &[Payload]) -> StoreResult<Vec<TargetId>> {
        let mut inner = self.inner.lock();
        let mut ids = Vec::with_capacity(payloads.len());
        for (index, payload) in payloads.iter().enumerate() {
            match Self::create_locked(&mut inner, &self.id_prefix, entity, payload) {
                Ok(id) => ids.push((index, id)),
                Err(err) => {
                    // Rows committed before the failure stay committed, as a
                    // real bulk job would leave them.
                    return Err(StoreError::BulkFailed {
                        entity: entity.to_string(),
                        partial: ids,
                        message: err.to_string(),
                    });
                }
            }
        }
        Ok(ids.into_iter().map(|(_, id)| id).collect())
    }

    fn update_record(&self, entity: &str, id: &str, fields: &Payload) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        Self::validate(&inner, entity, fields, false)?;
        let Some(record) = inner.records.get_mut(entity).and_then(|m| m.get_mut(id)) else {
            return Err(StoreError::NotFound {
                entity: entity.to_string(),
                id: id.to_string(),
            });
        };
        for (name, value) in fields {
            record.insert(name.clone(), value.clone());
        }
        Ok(())
    }

    fn bulk_update(&self, entity: &str, updates: &[RecordUpdate]) -> StoreResult<()> {
        let mut failed = 0usize;
        for update in updates {
            if self.update_record(entity, &update.id, &update.fields).is_err() {
                failed += 1;
            }
        }
        if failed > 0 {
            return Err(StoreError::BulkFailed {
                entity: entity.to_string(),
                partial: Vec::new(),
                message: format!("{failed} of {} updates rejected", updates.len()),
            });
        }
        Ok(())
    }

    fn delete_record(&self, entity: &str, id: &str) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        let removed = inner
            .records
            .get_mut(entity)
            .and_then(|m| m.remove(id))
            .is_some();
        if removed {
            Ok(())
        } else {
            Err(StoreError::NotFound {
                entity: entity.to_string(),
                id: id.to_string(),
            })
        }
    }

    fn record_exists(&self, entity: &str, id: &str) -> StoreResult<bool> {
        Ok(self
            .inner
            .lock()
            .records
            .get(entity)
            .is_some_and(|m| m.contains_key(id)))
    }

    fn list_ids(&self, entity: &str) -> StoreResult<Vec<TargetId>> {
        Ok(self
            .inner
            .lock()
            .records
            .get(entity)
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default())
    }

    fn resolve_stable_name(&self, entity: &str, name: &str) -> StoreResult<Option<TargetId>> {
        Ok(self
            .inner
            .lock()
            .records
            .get(entity)
            .and_then(|records| {
                records
                    .iter()
                    .find(|(_, fields)| {
                        fields.get(STABLE_NAME_FIELD) == Some(&json!(name))
                    })
                    .map(|(id, _)| id.clone())
            }))
    }
}
