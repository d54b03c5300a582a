//! The reference rewriter: turns a source record into a target-shaped
//! payload with every reference either mapped, substituted with a dummy,
//! or dropped for Phase 2 to restore.

use std::collections::HashMap;

use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::config::MigrationConfig;
use crate::dummy::DummyRegistry;
use crate::error::{MigrateError, Result};
use crate::identity::IdentityMap;
use crate::model::{EntityMeta, FieldKind, Payload, SourceRecord, TargetId};
use crate::store::{SourceStore, TargetStore};

/// Run-scoped caches for the two lookups the rewriter repeats: continuity
/// existence checks against the target and stable-name resolution.
///
/// Owned by the run context and reset with it; nothing here is process-wide.
pub struct ReferenceResolver<'a> {
    source: &'a dyn SourceStore,
    target: &'a dyn TargetStore,
    config: &'a MigrationConfig,
    existence: HashMap<(String, String), bool>,
    stable: HashMap<(String, String), Option<TargetId>>,
}

impl<'a> ReferenceResolver<'a> {
    /// New resolver with empty caches.
    pub fn new(
        source: &'a dyn SourceStore,
        target: &'a dyn TargetStore,
        config: &'a MigrationConfig,
    ) -> Self {
        Self {
            source,
            target,
            config,
            existence: HashMap::new(),
            stable: HashMap::new(),
        }
    }

    /// Whether `id` exists in the target, cached per (entity, id). A store
    /// failure is cached as absent so one flaky check is not repeated.
    pub fn exists_in_target(&mut self, entity: &str, id: &str) -> bool {
        let key = (entity.to_string(), id.to_string());
        if let Some(known) = self.existence.get(&key) {
            return *known;
        }
        let exists = match self.target.record_exists(entity, id) {
            Ok(v) => v,
            Err(e) => {
                warn!(entity, id, error = %e, "existence check failed, treating as absent");
                false
            }
        };
        self.existence.insert(key, exists);
        exists
    }

    /// Resolves a category/subtype reference by stable name: source id →
    /// developer name → target id. Cached per (type, source id) for the run;
    /// a miss is cached too and resolves to `None` thereafter.
    pub fn resolve_stable(&mut self, ref_type: &str, source_id: &str) -> Option<TargetId> {
        let key = (ref_type.to_string(), source_id.to_string());
        if let Some(cached) = self.stable.get(&key) {
            return cached.clone();
        }
        let resolved = self.resolve_stable_uncached(ref_type, source_id);
        self.stable.insert(key, resolved.clone());
        resolved
    }

    fn resolve_stable_uncached(&self, ref_type: &str, source_id: &str) -> Option<TargetId> {
        let name = match self.source.stable_name_of(ref_type, source_id) {
            Ok(Some(name)) => name,
            Ok(None) => {
                warn!(ref_type, source_id, "no stable name on source record");
                return None;
            }
            Err(e) => {
                warn!(ref_type, source_id, error = %e, "stable name lookup failed");
                return None;
            }
        };
        match self.target.resolve_stable_name(ref_type, &name) {
            Ok(Some(id)) => {
                debug!(ref_type, source_id, name = %name, target = %id, "stable name mapped");
                Some(id)
            }
            Ok(None) => {
                warn!(ref_type, name = %name, "stable name not present in target, leaving unset");
                None
            }
            Err(e) => {
                warn!(ref_type, name = %name, error = %e, "stable name resolution failed");
                None
            }
        }
    }

    /// The configured fallback identity for a continuity type, if any.
    fn fallback_identity(&self, entity: &str) -> Option<&TargetId> {
        self.config.fallback_identity.get(entity)
    }
}

/// Rewrites `record` into a target-shaped payload.
///
/// Per reference field holding a value: a continuity-type id is kept when it
/// exists in the target (else the configured fallback, else dropped); a
/// stable-name field resolves through the cached lookup; a mapped id is
/// substituted; a required unmapped reference takes the type's dummy; an
/// optional unmapped reference is dropped for Phase 2 to restore. Scalars
/// are copied verbatim, subject to value-domain scrubbing and optional email
/// masking. Fields absent from the metadata never reach the payload.
///
/// Mutates nothing beyond the resolver's caches; re-invoking for the same
/// record yields the same result for the same identity-map state.
pub fn rewrite(
    record: &SourceRecord,
    meta: &EntityMeta,
    identity: &IdentityMap,
    dummies: &DummyRegistry,
    resolver: &mut ReferenceResolver<'_>,
) -> Result<Payload> {
    let mut payload = Payload::new();
    for field in meta.fields() {
        let value = record.fields.get(&field.name).filter(|v| !v.is_null());
        match field.kind {
            FieldKind::Reference => {
                rewrite_reference(record, field, value, identity, dummies, resolver, &mut payload)?;
            }
            FieldKind::Scalar => {
                if let Some(value) = value {
                    rewrite_scalar(record, field, value, resolver, &mut payload);
                }
            }
        }
    }
    Ok(payload)
}

fn rewrite_reference(
    record: &SourceRecord,
    field: &crate::model::FieldSpec,
    value: Option<&Value>,
    identity: &IdentityMap,
    dummies: &DummyRegistry,
    resolver: &mut ReferenceResolver<'_>,
    payload: &mut Payload,
) -> Result<()> {
    let ref_type = field.references.as_deref().unwrap_or_default();
    let raw = value.and_then(Value::as_str);

    let Some(raw) = raw else {
        // A required reference with no source value still needs the dummy;
        // the target rejects the create otherwise.
        if field.required {
            let dummy = dummies
                .get(ref_type)
                .ok_or_else(|| MigrateError::MissingDummy(ref_type.to_string()))?;
            payload.insert(field.name.clone(), json!(dummy));
        }
        return Ok(());
    };

    if resolver.config.is_continuity_type(ref_type) {
        if resolver.exists_in_target(ref_type, raw) {
            payload.insert(field.name.clone(), json!(raw));
        } else if let Some(fallback) = resolver.fallback_identity(ref_type).cloned() {
            debug!(
                entity = %record.entity,
                field = %field.name,
                original = raw,
                fallback = %fallback,
                "continuity id absent, using fallback identity"
            );
            payload.insert(field.name.clone(), json!(fallback));
        } else {
            debug!(
                entity = %record.entity,
                field = %field.name,
                original = raw,
                "continuity id absent and no fallback, dropping field"
            );
        }
        return Ok(());
    }

    if field.by_stable_name {
        if let Some(id) = resolver.resolve_stable(ref_type, raw) {
            payload.insert(field.name.clone(), json!(id));
        }
        return Ok(());
    }

    if let Some(mapped) = identity.get(ref_type, raw) {
        payload.insert(field.name.clone(), json!(mapped));
        return Ok(());
    }

    if field.required {
        let dummy = dummies
            .get(ref_type)
            .ok_or_else(|| MigrateError::MissingDummy(ref_type.to_string()))?;
        debug!(
            entity = %record.entity,
            field = %field.name,
            original = raw,
            dummy = %dummy,
            "required reference unmapped, substituting dummy"
        );
        payload.insert(field.name.clone(), json!(dummy));
        return Ok(());
    }

    debug!(
        entity = %record.entity,
        field = %field.name,
        original = raw,
        "optional reference unmapped, dropping for backpatch"
    );
    Ok(())
}

fn rewrite_scalar(
    record: &SourceRecord,
    field: &crate::model::FieldSpec,
    value: &Value,
    resolver: &ReferenceResolver<'_>,
    payload: &mut Payload,
) {
    if let (Some(domain), Some(s)) = (&field.allowed_values, value.as_str()) {
        if !domain.contains(s) {
            if field.required {
                // A required constrained scalar cannot be dropped; take the
                // first value of the domain.
                if let Some(first) = domain.iter().next() {
                    warn!(
                        entity = %record.entity,
                        field = %field.name,
                        value = s,
                        substitute = %first,
                        "value outside domain, substituting default"
                    );
                    payload.insert(field.name.clone(), json!(first));
                }
            } else {
                warn!(
                    entity = %record.entity,
                    field = %field.name,
                    value = s,
                    "value outside domain, dropping field"
                );
            }
            return;
        }
    }

    if let (Some(suffix), Some(s)) = (&resolver.config.mask_email_suffix, value.as_str()) {
        if field.name.to_ascii_lowercase().contains("email") && !s.ends_with(suffix.as_str()) {
            payload.insert(field.name.clone(), json!(format!("{s}{suffix}")));
            return;
        }
    }

    payload.insert(field.name.clone(), value.clone());
}
