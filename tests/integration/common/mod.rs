//! Shared fixtures: a small CRM-shaped schema with the reference patterns
//! the engine has to handle (self-references, required cross-type
//! references, continuity identities, stable-name categories).
#![allow(dead_code)]

use regraft::store::memory::STABLE_NAME_FIELD;
use regraft::{DummySpec, EntityMeta, FieldSpec, InMemoryStore, MetadataTable, Payload};
use serde_json::{json, Value};

/// Field specs per entity type, in parent-first order.
pub fn schema() -> Vec<(&'static str, Vec<FieldSpec>)> {
    vec![
        ("User", vec![FieldSpec::scalar("name")]),
        ("Category", vec![FieldSpec::scalar(STABLE_NAME_FIELD)]),
        (
            "Account",
            vec![
                FieldSpec::scalar("name").required(),
                FieldSpec::scalar("email"),
                FieldSpec::reference("parent_id", "Account"),
                FieldSpec::reference("owner_id", "User"),
                FieldSpec::reference("category_id", "Category").by_stable_name(),
            ],
        ),
        (
            "Contact",
            vec![
                FieldSpec::scalar("last_name").required(),
                FieldSpec::scalar("email"),
                FieldSpec::reference("account_id", "Account").required(),
                FieldSpec::reference("reports_to_id", "Contact"),
                FieldSpec::reference("origin_id", "Contact").immutable(),
                FieldSpec::reference("owner_id", "User"),
                FieldSpec::reference("category_id", "Category").by_stable_name(),
            ],
        ),
    ]
}

/// Source and target stores with the shared schema defined on both.
pub fn stores() -> (InMemoryStore, InMemoryStore) {
    let source = InMemoryStore::new("S");
    let target = InMemoryStore::new("T");
    for (entity, fields) in schema() {
        source.define_entity(entity, fields.clone());
        target.define_entity(entity, fields);
    }
    (source, target)
}

/// Metadata table matching [`schema`].
pub fn metadata() -> MetadataTable {
    let mut table = MetadataTable::default();
    for (entity, fields) in schema() {
        table.insert(EntityMeta::new(entity, fields));
    }
    table
}

/// Dummy plan covering the two migrated types.
pub fn dummy_plan() -> Vec<DummySpec> {
    vec![
        DummySpec::seeded("Account", "name", json!("NO ACCOUNT")),
        DummySpec::seeded("Contact", "last_name", json!("NO CONTACT")),
    ]
}

/// Field map from literal pairs.
pub fn payload(pairs: &[(&str, Value)]) -> Payload {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), v.clone()))
        .collect()
}
