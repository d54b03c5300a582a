//! Append-only snapshot log bridging the two phases.
//!
//! Phase 1 appends one row per successfully created record; Phase 2 reads a
//! type's rows once, after Phase 1 for that type has completed. The CSV
//! implementation keeps one file per entity type with the verbatim record
//! JSON-encoded in the last column, so a run can be resumed or inspected
//! with ordinary tooling.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use csv::{ReaderBuilder, WriterBuilder};
use tracing::debug;

use crate::error::{MigrateError, Result};
use crate::model::{Payload, Snapshot};

/// Durable storage for Phase 1 snapshots.
pub trait SnapshotStore {
    /// Appends one snapshot row.
    fn append(&self, snapshot: &Snapshot) -> Result<()>;
    /// All snapshots recorded for `entity`, in append order.
    fn read_all(&self, entity: &str) -> Result<Vec<Snapshot>>;
    /// Removes every snapshot, starting the log fresh.
    fn clear(&self) -> Result<()>;
}

const FILE_SUFFIX: &str = "_snapshots.csv";
const HEADER: [&str; 3] = ["source_id", "target_id", "record"];

/// CSV-backed snapshot log, one `<entity>_snapshots.csv` per type.
pub struct CsvSnapshotLog {
    dir: PathBuf,
}

impl CsvSnapshotLog {
    /// Opens (creating if needed) a log rooted at `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, entity: &str) -> PathBuf {
        self.dir
            .join(format!("{}{FILE_SUFFIX}", entity.to_lowercase()))
    }
}

impl SnapshotStore for CsvSnapshotLog {
    fn append(&self, snapshot: &Snapshot) -> Result<()> {
        let path = self.path_for(&snapshot.entity);
        let new_file = !path.exists();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let mut writer = WriterBuilder::new().has_headers(false).from_writer(file);
        if new_file {
            writer.write_record(HEADER)?;
        }
        let record_json = serde_json::to_string(&snapshot.record)?;
        writer.write_record([
            snapshot.source_id.as_str(),
            snapshot.target_id.as_str(),
            record_json.as_str(),
        ])?;
        writer.flush()?;
        Ok(())
    }

    fn read_all(&self, entity: &str) -> Result<Vec<Snapshot>> {
        let path = self.path_for(entity);
        if !path.exists() {
            return Ok(Vec::new());
        }
        read_snapshot_file(&path, entity)
    }

    fn clear(&self) -> Result<()> {
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            if name.to_string_lossy().ends_with(FILE_SUFFIX) {
                debug!(file = %entry.path().display(), "clearing snapshot file");
                fs::remove_file(entry.path())?;
            }
        }
        Ok(())
    }
}

fn read_snapshot_file(path: &Path, entity: &str) -> Result<Vec<Snapshot>> {
    let mut reader = ReaderBuilder::new()
        .flexible(true)
        .from_reader(File::open(path)?);
    let mut snapshots = Vec::new();
    for row in reader.records() {
        let row = row?;
        let (Some(source_id), Some(target_id), Some(record_json)) =
            (row.get(0), row.get(1), row.get(2))
        else {
            return Err(MigrateError::FatalSetup(format!(
                "malformed snapshot row in {}",
                path.display()
            )));
        };
        let record: Payload = serde_json::from_str(record_json)?;
        snapshots.push(Snapshot {
            entity: entity.to_string(),
            source_id: source_id.to_string(),
            target_id: target_id.to_string(),
            record,
        });
    }
    Ok(snapshots)
}
