//! Binary entry point for the regraft migration CLI.
//!
//! Runs a complete two-phase migration from a JSON fixture into a fresh
//! in-memory target and reports the resulting records plus the run summary
//! as JSON. The fixture describes entity schemas, source records, any
//! pre-existing target records (continuity identities, categories), the
//! dummy plan, and continuity configuration.
#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::error::Error;
use std::fs;
use std::path::PathBuf;

use clap::Parser;
use serde::Deserialize;
use serde_json::json;
use tracing_subscriber::EnvFilter;

use regraft::{
    CsvSnapshotLog, DummySpec, FieldSpec, InMemoryStore, MigrateError, MigrationConfig,
    MigrationRun, Payload, RootSet,
};

#[derive(Parser, Debug)]
#[command(
    name = "regraft",
    version,
    about = "Two-phase record-graph migration with reference backpatching",
    disable_help_subcommand = true
)]
struct Cli {
    /// JSON fixture describing schemas, source records and the dummy plan.
    #[arg(long, value_name = "FILE")]
    fixture: PathBuf,

    /// Root records to materialize, as TYPE=id,id,... (repeatable).
    #[arg(long = "roots", value_name = "TYPE=IDS")]
    roots: Vec<String>,

    /// Directory holding the per-type snapshot CSV files.
    #[arg(long, value_name = "DIR", default_value = "migration_data")]
    snapshot_dir: PathBuf,

    /// Pending payloads per entity type before an automatic flush.
    #[arg(long, default_value_t = 200)]
    batch_size: usize,

    /// Create records one at a time instead of through the bulk path.
    #[arg(long)]
    no_bulk: bool,

    /// Skip the pre-run wipe of existing target records.
    #[arg(long)]
    no_delete: bool,

    /// Keep dummy records instead of purging them at run end.
    #[arg(long)]
    keep_dummies: bool,

    /// Seed the identity map from existing snapshots instead of clearing.
    #[arg(long)]
    resume: bool,

    /// Append `.invalid` to email-shaped scalar values.
    #[arg(long)]
    mask_emails: bool,

    /// Write the JSON report here instead of stdout.
    #[arg(long, value_name = "FILE")]
    out: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct Fixture {
    entities: Vec<EntityDef>,
    #[serde(default)]
    records: BTreeMap<String, BTreeMap<String, Payload>>,
    #[serde(default)]
    target_records: BTreeMap<String, BTreeMap<String, Payload>>,
    #[serde(default)]
    stable_names: BTreeMap<String, BTreeMap<String, String>>,
    #[serde(default)]
    dummies: Vec<DummySpec>,
    #[serde(default)]
    continuity_types: Vec<String>,
    #[serde(default)]
    fallback_identity: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct EntityDef {
    name: String,
    fields: Vec<FieldSpec>,
    #[serde(default)]
    unique_field: Option<String>,
}

fn parse_roots(specs: &[String]) -> Result<Vec<RootSet>, MigrateError> {
    let mut roots = Vec::new();
    for spec in specs {
        let Some((entity, ids)) = spec.split_once('=') else {
            return Err(MigrateError::InvalidArgument(format!(
                "--roots '{spec}' is not TYPE=id,id,..."
            )));
        };
        let ids: Vec<String> = ids
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();
        if ids.is_empty() {
            return Err(MigrateError::InvalidArgument(format!(
                "--roots '{spec}' lists no ids"
            )));
        }
        roots.push(RootSet {
            entity: entity.trim().to_string(),
            ids,
        });
    }
    Ok(roots)
}

fn build_stores(fixture: &Fixture) -> (InMemoryStore, InMemoryStore) {
    let source = InMemoryStore::new("S");
    let target = InMemoryStore::new("T");
    for entity in &fixture.entities {
        source.define_entity(&entity.name, entity.fields.clone());
        target.define_entity(&entity.name, entity.fields.clone());
        if let Some(unique) = &entity.unique_field {
            target.set_unique_field(&entity.name, unique.clone());
        }
    }
    for (entity, records) in &fixture.records {
        for (id, fields) in records {
            source.insert_record(entity, id.clone(), fields.clone());
        }
    }
    for (entity, records) in &fixture.target_records {
        for (id, fields) in records {
            target.insert_record(entity, id.clone(), fields.clone());
        }
    }
    for (entity, names) in &fixture.stable_names {
        for (id, name) in names {
            source.set_stable_name(entity, id.clone(), name.clone());
        }
    }
    (source, target)
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let fixture: Fixture = serde_json::from_str(&fs::read_to_string(&cli.fixture)?)?;
    let roots = parse_roots(&cli.roots)?;
    let (source, target) = build_stores(&fixture);

    let config = MigrationConfig {
        batch_size: cli.batch_size,
        use_bulk: !cli.no_bulk,
        continuity_types: fixture.continuity_types.iter().cloned().collect(),
        fallback_identity: fixture.fallback_identity.clone(),
        mask_email_suffix: cli.mask_emails.then(|| ".invalid".to_string()),
        allow_wipe: !cli.no_delete,
        purge_dummies: !cli.keep_dummies,
        resume: cli.resume,
    };

    let snapshots = CsvSnapshotLog::new(&cli.snapshot_dir)?;
    let entity_order: Vec<String> = fixture.entities.iter().map(|e| e.name.clone()).collect();
    let run = MigrationRun::new(&source, &target, &target, &snapshots, config);
    let summary = run.execute(&entity_order, &roots, &fixture.dummies)?;

    let report = json!({
        "summary": summary,
        "target": target.dump(),
    });
    let rendered = serde_json::to_string_pretty(&report)?;
    match &cli.out {
        Some(path) => fs::write(path, rendered)?,
        None => println!("{rendered}"),
    }
    Ok(())
}
