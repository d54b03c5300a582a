//! Core data types: field specs, entity metadata, source records, and the
//! snapshots that bridge the two phases.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{MigrateError, Result};
use crate::store::MetadataProvider;

/// Identifier assigned by the source store.
pub type SourceId = String;
/// Identifier assigned by the target store.
pub type TargetId = String;
/// A target-shaped field map, ready for create/update submission.
pub type Payload = Map<String, Value>;

/// Whether a field holds a plain value or a reference to another record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldKind {
    /// Plain value carried verbatim (subject to value-domain scrubbing).
    Scalar,
    /// Identifier of another record, typed by `FieldSpec::references`.
    Reference,
}

/// Per-field schema entry, loaded once per run from the metadata provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Field name as it appears in records and payloads.
    pub name: String,
    /// Scalar or reference.
    pub kind: FieldKind,
    /// Referenced entity type, for reference fields.
    #[serde(default)]
    pub references: Option<String>,
    /// Whether the target rejects a create without this field.
    #[serde(default)]
    pub required: bool,
    /// Whether the target rejects updates to this field after creation.
    #[serde(default)]
    pub immutable_after_create: bool,
    /// Category/subtype reference resolved by stable name, not identity map.
    #[serde(default)]
    pub by_stable_name: bool,
    /// Enumerated value domain for scalar fields, when constrained.
    #[serde(default)]
    pub allowed_values: Option<BTreeSet<String>>,
}

impl FieldSpec {
    /// A plain scalar field.
    pub fn scalar(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: FieldKind::Scalar,
            references: None,
            required: false,
            immutable_after_create: false,
            by_stable_name: false,
            allowed_values: None,
        }
    }

    /// A reference field pointing at `references`.
    pub fn reference(name: impl Into<String>, references: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: FieldKind::Reference,
            references: Some(references.into()),
            required: false,
            immutable_after_create: false,
            by_stable_name: false,
            allowed_values: None,
        }
    }

    /// Marks the field required on create.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Marks the field read-only after creation.
    pub fn immutable(mut self) -> Self {
        self.immutable_after_create = true;
        self
    }

    /// Marks the reference as resolved by stable name in the target.
    pub fn by_stable_name(mut self) -> Self {
        self.by_stable_name = true;
        self
    }

    /// Constrains the scalar to an enumerated value domain.
    pub fn allowed(mut self, values: &[&str]) -> Self {
        self.allowed_values = Some(values.iter().map(|v| (*v).to_string()).collect());
        self
    }
}

/// Ordered field specs for one entity type, with by-name lookup.
#[derive(Debug, Clone)]
pub struct EntityMeta {
    name: String,
    fields: Vec<FieldSpec>,
    index: HashMap<String, usize>,
}

impl EntityMeta {
    /// Builds the meta for `name` from an ordered field list.
    pub fn new(name: impl Into<String>, fields: Vec<FieldSpec>) -> Self {
        let index = fields
            .iter()
            .enumerate()
            .map(|(i, f)| (f.name.clone(), i))
            .collect();
        Self {
            name: name.into(),
            fields,
            index,
        }
    }

    /// Entity type name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// All fields in declaration order.
    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    /// Looks up one field by name.
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.index.get(name).map(|i| &self.fields[*i])
    }

    /// Reference fields only, in declaration order.
    pub fn reference_fields(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields
            .iter()
            .filter(|f| f.kind == FieldKind::Reference)
    }
}

/// All entity metas for a run. Loaded once before materialization begins;
/// schema drift mid-run is unsupported.
#[derive(Debug, Clone, Default)]
pub struct MetadataTable {
    types: BTreeMap<String, EntityMeta>,
}

impl MetadataTable {
    /// Describes every entity in `types` through the provider.
    pub fn load(provider: &dyn MetadataProvider, types: &[String]) -> Result<Self> {
        let mut table = Self::default();
        for ty in types {
            let fields = provider
                .describe_entity(ty)
                .map_err(|e| MigrateError::FatalSetup(format!("describe {ty}: {e}")))?;
            table.insert(EntityMeta::new(ty.clone(), fields));
        }
        Ok(table)
    }

    /// Adds or replaces one entity meta.
    pub fn insert(&mut self, meta: EntityMeta) {
        self.types.insert(meta.name().to_string(), meta);
    }

    /// Meta for `name`, or `UnknownEntity`.
    pub fn entity(&self, name: &str) -> Result<&EntityMeta> {
        self.types
            .get(name)
            .ok_or_else(|| MigrateError::UnknownEntity(name.to_string()))
    }

    /// Meta for `name`, if loaded.
    pub fn get(&self, name: &str) -> Option<&EntityMeta> {
        self.types.get(name)
    }

    /// Loaded entity type names, sorted.
    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }
}

/// A record fetched from the source store. Reference values are raw source
/// identifiers, never resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceRecord {
    /// Entity type of the record.
    pub entity: String,
    /// Source-store identifier.
    pub id: SourceId,
    /// Field name to value.
    pub fields: Payload,
}

impl SourceRecord {
    /// Builds a record.
    pub fn new(entity: impl Into<String>, id: impl Into<String>, fields: Payload) -> Self {
        Self {
            entity: entity.into(),
            id: id.into(),
            fields,
        }
    }

    /// String value of `field`, when present and a string.
    pub fn str_field(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(Value::as_str)
    }
}

/// Verbatim source record plus its resulting target id, persisted during
/// Phase 1 and replayed by Phase 2.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    /// Entity type of the record.
    pub entity: String,
    /// Source-store identifier.
    pub source_id: SourceId,
    /// Target-store identifier assigned (or adopted) in Phase 1.
    pub target_id: TargetId,
    /// Fields exactly as fetched from the source.
    pub record: Payload,
}
