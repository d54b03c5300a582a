//! Phase 2 backpatching: reference restoration from the identity map,
//! immutable and continuity exclusions, dummy skipping, and the update
//! fallback ladder.

mod common;

use common::{metadata, payload, stores};
use regraft::store::memory::STABLE_NAME_FIELD;
use regraft::{
    Backpatcher, CsvSnapshotLog, DummyRegistry, DummySpec, IdentityMap, MigrationConfig, Payload,
    Snapshot, SnapshotStore,
};
use serde_json::json;
use tempfile::tempdir;

fn snapshot(entity: &str, source_id: &str, target_id: &str, record: Payload) -> Snapshot {
    Snapshot {
        entity: entity.to_string(),
        source_id: source_id.to_string(),
        target_id: target_id.to_string(),
        record,
    }
}

#[test]
fn restores_dropped_references_from_the_identity_map() {
    let (source, target) = stores();
    target.insert_record("Account", "T-A1", payload(&[("name", json!("Acme"))]));
    target.insert_record("Contact", "T-C1", payload(&[("last_name", json!("Doe"))]));
    target.insert_record("Contact", "T-C2", payload(&[("last_name", json!("Roe"))]));
    target.insert_record("User", "U1", Payload::new());
    target.insert_record(
        "Category",
        "T-CAT",
        payload(&[(STABLE_NAME_FIELD, json!("Partner"))]),
    );
    source.set_stable_name("Category", "RT1", "Partner");

    let identity = IdentityMap::new();
    identity.insert("Account", "A1", "T-A1");
    identity.insert("Contact", "C1", "T-C1");
    identity.insert("Contact", "C2", "T-C2");

    let dir = tempdir().unwrap();
    let snapshots = CsvSnapshotLog::new(dir.path()).unwrap();
    snapshots
        .append(&snapshot(
            "Contact",
            "C1",
            "T-C1",
            payload(&[
                ("last_name", json!("Doe")),
                ("account_id", json!("A1")),
                ("reports_to_id", json!("C2")),
                ("origin_id", json!("C2")),
                ("owner_id", json!("U1")),
                ("category_id", json!("RT1")),
            ]),
        ))
        .unwrap();

    let metadata = metadata();
    let mut config = MigrationConfig::default();
    config.continuity_types.insert("User".to_string());
    let dummies = DummyRegistry::empty();
    let mut backpatcher = Backpatcher::new(
        &source, &target, &metadata, &identity, &dummies, &snapshots, &config,
    );
    let stats = backpatcher.backpatch("Contact").unwrap();
    assert_eq!(stats.updated, 1);
    assert_eq!(stats.errored, 0);

    let record = target.record("Contact", "T-C1").unwrap();
    assert_eq!(record.get("account_id"), Some(&json!("T-A1")));
    assert_eq!(record.get("reports_to_id"), Some(&json!("T-C2")));
    assert_eq!(record.get("category_id"), Some(&json!("T-CAT")));
    // Immutable after create: never part of a correction.
    assert!(!record.contains_key("origin_id"));
    // Continuity ids were written correctly in Phase 1 already.
    assert!(!record.contains_key("owner_id"));
}

#[test]
fn self_reference_backpatches_to_the_record_itself() {
    let (source, target) = stores();
    target.insert_record("Account", "T-A1", payload(&[("name", json!("Acme"))]));
    target.insert_record("Contact", "T-C1", payload(&[("last_name", json!("Doe"))]));
    let identity = IdentityMap::new();
    identity.insert("Account", "A1", "T-A1");
    identity.insert("Contact", "C1", "T-C1");

    let dir = tempdir().unwrap();
    let snapshots = CsvSnapshotLog::new(dir.path()).unwrap();
    snapshots
        .append(&snapshot(
            "Contact",
            "C1",
            "T-C1",
            payload(&[
                ("last_name", json!("Doe")),
                ("account_id", json!("A1")),
                ("reports_to_id", json!("C1")),
            ]),
        ))
        .unwrap();

    let metadata = metadata();
    let config = MigrationConfig::default();
    let dummies = DummyRegistry::empty();
    let mut backpatcher = Backpatcher::new(
        &source, &target, &metadata, &identity, &dummies, &snapshots, &config,
    );
    backpatcher.backpatch("Contact").unwrap();
    assert_eq!(
        target.record("Contact", "T-C1").unwrap().get("reports_to_id"),
        Some(&json!("T-C1"))
    );
}

#[test]
fn dummy_and_unmapped_references_are_left_alone() {
    let (source, target) = stores();
    let metadata = metadata();
    let dummies = DummyRegistry::populate(
        &target,
        &metadata,
        &[DummySpec::seeded("Account", "name", json!("NO ACCOUNT"))],
    )
    .unwrap();
    let dummy_account = dummies.get("Account").unwrap().clone();
    target.insert_record("Contact", "T-C1", payload(&[("last_name", json!("Doe"))]));

    let identity = IdentityMap::new();
    identity.insert("Contact", "C1", "T-C1");
    // A9 never got a real counterpart; its map entry is the placeholder.
    identity.insert("Account", "A9", &dummy_account);

    let dir = tempdir().unwrap();
    let snapshots = CsvSnapshotLog::new(dir.path()).unwrap();
    snapshots
        .append(&snapshot(
            "Contact",
            "C1",
            "T-C1",
            payload(&[
                ("last_name", json!("Doe")),
                ("account_id", json!("A9")),
                ("reports_to_id", json!("C-GONE")),
            ]),
        ))
        .unwrap();

    let config = MigrationConfig::default();
    let mut backpatcher = Backpatcher::new(
        &source, &target, &metadata, &identity, &dummies, &snapshots, &config,
    );
    let stats = backpatcher.backpatch("Contact").unwrap();
    assert_eq!(stats.skipped, 1);
    assert_eq!(stats.updated, 0);
    let record = target.record("Contact", "T-C1").unwrap();
    assert!(!record.contains_key("account_id"));
    assert!(!record.contains_key("reports_to_id"));
}

#[test]
fn bulk_failure_degrades_to_per_record_then_per_field() {
    let (source, target) = stores();
    target.insert_record("Account", "T-A1", payload(&[("name", json!("Acme"))]));
    target.insert_record("Contact", "T-C1", payload(&[("last_name", json!("Doe"))]));
    target.insert_record("Contact", "T-C3", payload(&[("last_name", json!("Poe"))]));

    let identity = IdentityMap::new();
    identity.insert("Account", "A1", "T-A1");
    identity.insert("Contact", "C1", "T-C1");
    identity.insert("Contact", "C3", "T-C3");
    // C2's target record is gone, so any correction naming it is rejected.
    identity.insert("Contact", "C2", "T-C2");

    let dir = tempdir().unwrap();
    let snapshots = CsvSnapshotLog::new(dir.path()).unwrap();
    snapshots
        .append(&snapshot(
            "Contact",
            "C1",
            "T-C1",
            payload(&[
                ("last_name", json!("Doe")),
                ("account_id", json!("A1")),
                ("reports_to_id", json!("C2")),
            ]),
        ))
        .unwrap();
    snapshots
        .append(&snapshot(
            "Contact",
            "C3",
            "T-C3",
            payload(&[("last_name", json!("Poe")), ("account_id", json!("A1"))]),
        ))
        .unwrap();

    let metadata = metadata();
    let config = MigrationConfig::default();
    let dummies = DummyRegistry::empty();
    let mut backpatcher = Backpatcher::new(
        &source, &target, &metadata, &identity, &dummies, &snapshots, &config,
    );
    let stats = backpatcher.backpatch("Contact").unwrap();

    // The bad field sank the bulk chunk and then its own record update;
    // the per-field pass still lands C1's good correction, and C3 recovers
    // cleanly through the per-record path.
    assert_eq!(stats.updated, 1);
    assert_eq!(stats.errored, 1);
    let c1 = target.record("Contact", "T-C1").unwrap();
    assert_eq!(c1.get("account_id"), Some(&json!("T-A1")));
    assert!(!c1.contains_key("reports_to_id"));
    let c3 = target.record("Contact", "T-C3").unwrap();
    assert_eq!(c3.get("account_id"), Some(&json!("T-A1")));
}
