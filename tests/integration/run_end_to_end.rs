//! Full-run orchestration: wipe, dummy creation, both phases, purge, and
//! resumption from the snapshot log.

mod common;

use std::collections::HashMap;

use common::{dummy_plan, payload, stores};
use regraft::store::memory::STABLE_NAME_FIELD;
use regraft::{
    CsvSnapshotLog, InMemoryStore, MigrationConfig, MigrationRun, Payload, RootSet, SnapshotStore,
};
use serde_json::json;
use tempfile::tempdir;

fn seed_source(source: &InMemoryStore) {
    source.insert_record(
        "Account",
        "A1",
        payload(&[
            ("name", json!("Acme")),
            ("email", json!("info@acme.com")),
            ("owner_id", json!("U1")),
            ("category_id", json!("RT1")),
        ]),
    );
    source.insert_record(
        "Account",
        "A2",
        payload(&[("name", json!("Beta")), ("parent_id", json!("A1"))]),
    );
    source.insert_record(
        "Contact",
        "C1",
        payload(&[
            ("last_name", json!("Doe")),
            ("account_id", json!("A2")),
            ("reports_to_id", json!("C2")),
        ]),
    );
    source.insert_record(
        "Contact",
        "C2",
        payload(&[
            ("last_name", json!("Roe")),
            ("account_id", json!("A1")),
            ("reports_to_id", json!("C1")),
        ]),
    );
}

fn seed_target(target: &InMemoryStore) {
    target.insert_record("User", "U1", Payload::new());
    target.insert_record(
        "Category",
        "T-CAT",
        payload(&[(STABLE_NAME_FIELD, json!("Partner"))]),
    );
}

fn entity_order() -> Vec<String> {
    // Category records pre-exist and are reached by stable name only, so
    // the type stays out of the run order.
    vec!["User".to_string(), "Account".to_string(), "Contact".to_string()]
}

fn roots() -> Vec<RootSet> {
    vec![
        RootSet {
            entity: "Account".to_string(),
            ids: vec!["A1".to_string(), "A2".to_string()],
        },
        RootSet {
            entity: "Contact".to_string(),
            ids: vec!["C1".to_string(), "C2".to_string()],
        },
    ]
}

fn id_map(snapshots: &CsvSnapshotLog, entity: &str) -> HashMap<String, String> {
    snapshots
        .read_all(entity)
        .unwrap()
        .into_iter()
        .map(|s| (s.source_id, s.target_id))
        .collect()
}

#[test]
fn full_run_wipes_creates_backpatches_and_purges() {
    let (source, target) = stores();
    seed_source(&source);
    seed_target(&target);
    source.set_stable_name("Category", "RT1", "Partner");
    // Leftover from an earlier aborted attempt; the wipe must clear it.
    target.insert_record("Account", "T-OLD", payload(&[("name", json!("Stale"))]));

    let dir = tempdir().unwrap();
    let snapshots = CsvSnapshotLog::new(dir.path()).unwrap();
    let mut config = MigrationConfig::default();
    config.allow_wipe = true;
    config.continuity_types.insert("User".to_string());
    config.mask_email_suffix = Some(".invalid".to_string());

    let run = MigrationRun::new(&source, &target, &target, &snapshots, config);
    let summary = run
        .execute(&entity_order(), &roots(), &dummy_plan())
        .unwrap();

    assert_eq!(summary.wiped.get("Account"), Some(&1));
    // Continuity identities survive the wipe.
    assert!(target.record("User", "U1").is_some());

    let accounts = id_map(&snapshots, "Account");
    let contacts = id_map(&snapshots, "Contact");
    let a1 = target.record("Account", &accounts["A1"]).unwrap();
    let a2 = target.record("Account", &accounts["A2"]).unwrap();
    assert_eq!(a1.get("email"), Some(&json!("info@acme.com.invalid")));
    assert_eq!(a1.get("owner_id"), Some(&json!("U1")));
    assert_eq!(a1.get("category_id"), Some(&json!("T-CAT")));
    assert_eq!(a2.get("parent_id"), Some(&json!(accounts["A1"].clone())));

    // The contact cycle closes after Phase 2: each points at the other.
    let c1 = target.record("Contact", &contacts["C1"]).unwrap();
    let c2 = target.record("Contact", &contacts["C2"]).unwrap();
    assert_eq!(c1.get("reports_to_id"), Some(&json!(contacts["C2"].clone())));
    assert_eq!(c2.get("reports_to_id"), Some(&json!(contacts["C1"].clone())));
    assert_eq!(c1.get("account_id"), Some(&json!(accounts["A2"].clone())));

    let account_counts = summary.types.get("Account").unwrap();
    assert_eq!(account_counts.created, 2);
    assert_eq!(account_counts.failed, 0);
    let contact_counts = summary.types.get("Contact").unwrap();
    assert_eq!(contact_counts.created, 2);
    assert_eq!(contact_counts.updated, 2);

    // Contact dummy purged, Account root placeholder kept.
    assert_eq!(summary.dummies_purged, 1);
    assert_eq!(target.record_count("Contact"), 2);
    assert_eq!(target.record_count("Account"), 3);
}

#[test]
fn resume_suppresses_the_wipe() {
    let (source, target) = stores();
    seed_source(&source);
    seed_target(&target);
    source.set_stable_name("Category", "RT1", "Partner");

    let dir = tempdir().unwrap();
    let snapshots = CsvSnapshotLog::new(dir.path()).unwrap();
    let mut config = MigrationConfig::default();
    config.allow_wipe = true;
    config.continuity_types.insert("User".to_string());

    let first = MigrationRun::new(&source, &target, &target, &snapshots, config.clone());
    first
        .execute(&entity_order(), &roots(), &dummy_plan())
        .unwrap();

    // A wipe here would delete the records the seeded identity entries
    // point at, silently orphaning the whole resumed run.
    config.resume = true;
    let second = MigrationRun::new(&source, &target, &target, &snapshots, config);
    let summary = second
        .execute(&entity_order(), &roots(), &dummy_plan())
        .unwrap();

    assert_eq!(summary.resumed, 4);
    assert!(summary.wiped.is_empty());
    for entity in ["Account", "Contact"] {
        for (source_id, target_id) in id_map(&snapshots, entity) {
            assert!(
                target.record(entity, &target_id).is_some(),
                "{entity} {source_id} maps to a missing record"
            );
        }
    }
}

#[test]
fn resumed_run_reuses_the_snapshot_identity() {
    let (source, target) = stores();
    seed_source(&source);
    seed_target(&target);
    source.set_stable_name("Category", "RT1", "Partner");

    let dir = tempdir().unwrap();
    let snapshots = CsvSnapshotLog::new(dir.path()).unwrap();
    let mut config = MigrationConfig::default();
    config.continuity_types.insert("User".to_string());

    let first = MigrationRun::new(&source, &target, &target, &snapshots, config.clone());
    first
        .execute(&entity_order(), &roots(), &dummy_plan())
        .unwrap();
    let migrated_accounts = target.record_count("Account");

    config.resume = true;
    let second = MigrationRun::new(&source, &target, &target, &snapshots, config);
    let summary = second
        .execute(&entity_order(), &roots(), &dummy_plan())
        .unwrap();

    assert_eq!(summary.resumed, 4);
    assert_eq!(summary.types.get("Account").unwrap().created, 0);
    assert_eq!(summary.types.get("Contact").unwrap().created, 0);
    // Only the second run's own root placeholder is new.
    assert_eq!(target.record_count("Account"), migrated_accounts + 1);
}
