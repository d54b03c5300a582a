//! Bulk-create failure handling: indexed partial adoption, the per-record
//! fallback, and the submission-order contract across flushes.

mod common;

use common::{dummy_plan, metadata, payload, stores};
use regraft::{CsvSnapshotLog, DummyRegistry, IdentityMap, Materializer, MigrationConfig};
use serde_json::json;
use tempfile::tempdir;

#[test]
fn bulk_failure_replays_each_payload_individually() {
    let (source, target) = stores();
    target.set_unique_field("Account", "name");
    target.insert_record("Account", "T-EXIST", payload(&[("name", json!("Acme"))]));
    source.insert_record("Account", "A1", payload(&[("name", json!("One"))]));
    source.insert_record("Account", "A2", payload(&[("name", json!("Acme"))]));
    source.insert_record("Account", "A3", payload(&[("name", json!("Three"))]));

    let metadata = metadata();
    let identity = IdentityMap::new();
    let dummies = DummyRegistry::empty();
    let dir = tempdir().unwrap();
    let snapshots = CsvSnapshotLog::new(dir.path()).unwrap();
    let config = MigrationConfig::default();
    let mut engine = Materializer::new(
        &source, &target, &metadata, &identity, &dummies, &snapshots, &config,
    );
    engine
        .materialize_roots(
            "Account",
            &["A1".to_string(), "A2".to_string(), "A3".to_string()],
        )
        .unwrap();

    // The bulk job committed A1 before A2's duplicate aborted it; A1's id
    // comes out of the indexed partials, A2 and A3 go through one at a time.
    let a1 = identity.get("Account", "A1").expect("A1 mapped");
    let a3 = identity.get("Account", "A3").expect("A3 mapped");
    assert_eq!(identity.get("Account", "A2").as_deref(), Some("T-EXIST"));
    assert_eq!(
        target.record("Account", &a1).unwrap().get("name"),
        Some(&json!("One"))
    );
    assert_eq!(
        target.record("Account", &a3).unwrap().get("name"),
        Some(&json!("Three"))
    );
    let stats = engine.stats().get("Account").unwrap();
    assert_eq!((stats.created, stats.recovered, stats.failed), (2, 1, 0));
    // Two rows attempted in bulk, then two individual retries.
    assert_eq!(target.create_calls(), 4);
}

#[test]
fn failed_first_row_replays_the_whole_batch_individually() {
    let (source, target) = stores();
    source.insert_record("Account", "A1", payload(&[])); // missing required name
    source.insert_record("Account", "A2", payload(&[("name", json!("Two"))]));
    source.insert_record("Account", "A3", payload(&[("name", json!("Three"))]));

    let metadata = metadata();
    let identity = IdentityMap::new();
    let dummies = DummyRegistry::empty();
    let dir = tempdir().unwrap();
    let snapshots = CsvSnapshotLog::new(dir.path()).unwrap();
    let config = MigrationConfig::default();
    let mut engine = Materializer::new(
        &source, &target, &metadata, &identity, &dummies, &snapshots, &config,
    );
    engine
        .materialize_roots(
            "Account",
            &["A1".to_string(), "A2".to_string(), "A3".to_string()],
        )
        .unwrap();

    // The bulk job died on its very first row, so there are no partial ids
    // to adopt and every payload goes back through create_record.
    assert!(!identity.contains("Account", "A1"));
    let a2 = identity.get("Account", "A2").expect("A2 mapped");
    let a3 = identity.get("Account", "A3").expect("A3 mapped");
    assert_eq!(
        target.record("Account", &a2).unwrap().get("name"),
        Some(&json!("Two"))
    );
    assert_eq!(
        target.record("Account", &a3).unwrap().get("name"),
        Some(&json!("Three"))
    );
    let stats = engine.stats().get("Account").unwrap();
    assert_eq!((stats.created, stats.failed), (2, 1));
    // One aborted bulk attempt, then all three payloads individually.
    assert_eq!(target.create_calls(), 4);
}

#[test]
fn invalid_record_fails_without_blocking_the_rest() {
    let (source, target) = stores();
    source.insert_record("Account", "A1", payload(&[("name", json!("One"))]));
    source.insert_record("Account", "A2", payload(&[])); // missing required name
    source.insert_record("Account", "A3", payload(&[("name", json!("Three"))]));

    let metadata = metadata();
    let identity = IdentityMap::new();
    let dummies = DummyRegistry::empty();
    let dir = tempdir().unwrap();
    let snapshots = CsvSnapshotLog::new(dir.path()).unwrap();
    let config = MigrationConfig::default();
    let mut engine = Materializer::new(
        &source, &target, &metadata, &identity, &dummies, &snapshots, &config,
    );
    engine
        .materialize_roots(
            "Account",
            &["A1".to_string(), "A2".to_string(), "A3".to_string()],
        )
        .unwrap();

    assert!(identity.contains("Account", "A1"));
    assert!(!identity.contains("Account", "A2"));
    assert!(identity.contains("Account", "A3"));
    let stats = engine.stats().get("Account").unwrap();
    assert_eq!((stats.created, stats.failed), (2, 1));
}

#[test]
fn flush_ids_follow_submission_order_across_auto_flushes() {
    let (source, target) = stores();
    for n in 0..5 {
        source.insert_record(
            "Account",
            format!("A{n}"),
            payload(&[("name", json!(format!("acct-{n}")))]),
        );
    }

    let metadata = metadata();
    let identity = IdentityMap::new();
    let dummies = DummyRegistry::populate(&target, &metadata, &dummy_plan()).unwrap();
    let dir = tempdir().unwrap();
    let snapshots = CsvSnapshotLog::new(dir.path()).unwrap();
    let config = MigrationConfig {
        batch_size: 2,
        ..MigrationConfig::default()
    };
    let mut engine = Materializer::new(
        &source, &target, &metadata, &identity, &dummies, &snapshots, &config,
    );
    let roots: Vec<String> = (0..5).map(|n| format!("A{n}")).collect();
    engine.materialize_roots("Account", &roots).unwrap();

    for n in 0..5 {
        let target_id = identity
            .get("Account", &format!("A{n}"))
            .expect("every root mapped");
        assert_eq!(
            target.record("Account", &target_id).unwrap().get("name"),
            Some(&json!(format!("acct-{n}")))
        );
    }
    assert_eq!(engine.stats().get("Account").unwrap().created, 5);
}

#[test]
fn single_record_mode_bypasses_the_batcher() {
    let (source, target) = stores();
    source.insert_record("Account", "A1", payload(&[("name", json!("One"))]));
    source.insert_record("Account", "A2", payload(&[("name", json!("Two"))]));

    let metadata = metadata();
    let identity = IdentityMap::new();
    let dummies = DummyRegistry::empty();
    let dir = tempdir().unwrap();
    let snapshots = CsvSnapshotLog::new(dir.path()).unwrap();
    let config = MigrationConfig {
        use_bulk: false,
        ..MigrationConfig::default()
    };
    let mut engine = Materializer::new(
        &source, &target, &metadata, &identity, &dummies, &snapshots, &config,
    );
    engine
        .materialize_roots("Account", &["A1".to_string(), "A2".to_string()])
        .unwrap();

    assert!(identity.contains("Account", "A1"));
    assert!(identity.contains("Account", "A2"));
    assert_eq!(target.create_calls(), 2);
    assert_eq!(target.record_count("Account"), 2);
}
