//! End-to-end run orchestration: wipe, dummies, Phase 1, Phase 2, cleanup,
//! summary.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{info, warn};

use crate::backpatch::{BackpatchStats, Backpatcher};
use crate::config::MigrationConfig;
use crate::dummy::{DummyRegistry, DummySpec};
use crate::error::Result;
use crate::identity::IdentityMap;
use crate::materialize::{Materializer, Phase1Stats};
use crate::model::{MetadataTable, SourceId};
use crate::snapshot::SnapshotStore;
use crate::store::{MetadataProvider, SourceStore, TargetStore};
use crate::wipe::wipe_existing;

/// The root records of one entity type a run starts from; dependencies are
/// discovered from there.
#[derive(Debug, Clone)]
pub struct RootSet {
    /// Entity type of the roots.
    pub entity: String,
    /// Source ids to materialize.
    pub ids: Vec<SourceId>,
}

/// Combined per-type counters for the final report.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct TypeSummary {
    /// Phase 1 creations.
    pub created: usize,
    /// Duplicate conflicts resolved by adoption.
    pub recovered: usize,
    /// Phase 1 failures.
    pub failed: usize,
    /// Phase 2 rewrites applied.
    pub updated: usize,
    /// Phase 2 records with nothing to correct.
    pub skipped: usize,
    /// Phase 2 records with unapplied corrections.
    pub errored: usize,
}

/// Final report of one migration run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    /// Counters keyed by entity type.
    pub types: BTreeMap<String, TypeSummary>,
    /// Records deleted by the pre-run wipe, when enabled.
    pub wiped: BTreeMap<String, usize>,
    /// Identity-map entries adopted from prior snapshots on resume.
    pub resumed: usize,
    /// Dummies deleted by the end-of-run purge.
    pub dummies_purged: usize,
}

/// Orchestrates one complete two-phase migration.
pub struct MigrationRun<'a> {
    source: &'a dyn SourceStore,
    target: &'a dyn TargetStore,
    metadata_provider: &'a dyn MetadataProvider,
    snapshots: &'a dyn SnapshotStore,
    config: MigrationConfig,
}

impl<'a> MigrationRun<'a> {
    /// Wires a run to its collaborators.
    pub fn new(
        source: &'a dyn SourceStore,
        target: &'a dyn TargetStore,
        metadata_provider: &'a dyn MetadataProvider,
        snapshots: &'a dyn SnapshotStore,
        config: MigrationConfig,
    ) -> Self {
        Self {
            source,
            target,
            metadata_provider,
            snapshots,
            config,
        }
    }

    /// Executes the run.
    ///
    /// `entity_order` lists every participating type parent-first; it drives
    /// metadata loading, the (reversed, child-first) wipe, and the Phase 2
    /// pass. Re-running after a partial run is idempotent: with `resume` set
    /// the identity map is seeded from the surviving snapshots, mapped ids
    /// are recognized and skipped, and the wipe is suppressed so the records
    /// those mappings point at survive.
    pub fn execute(
        &self,
        entity_order: &[String],
        roots: &[RootSet],
        dummy_plan: &[DummySpec],
    ) -> Result<RunSummary> {
        let mut summary = RunSummary::default();

        let metadata = MetadataTable::load(self.metadata_provider, entity_order)?;
        info!(types = entity_order.len(), "metadata table loaded");

        if self.config.allow_wipe && !self.config.resume {
            // Continuity types (users and the like) pre-exist in the target
            // and are never wiped.
            let child_first: Vec<String> = entity_order
                .iter()
                .rev()
                .filter(|t| !self.config.is_continuity_type(t))
                .cloned()
                .collect();
            summary.wiped = wipe_existing(self.target, &child_first, true)?;
        } else if self.config.allow_wipe {
            // Wiping would delete the very records the snapshots map to,
            // leaving dangling identity entries.
            warn!("wipe skipped: run is resuming from prior snapshots");
        }

        let identity = IdentityMap::new();
        if self.config.resume {
            summary.resumed = identity.seed_from(self.snapshots, entity_order)?;
            info!(adopted = summary.resumed, "resumed from prior snapshots");
        } else {
            self.snapshots.clear()?;
        }

        let dummies = DummyRegistry::populate(self.target, &metadata, dummy_plan)?;

        let phase1 = self.run_phase1(&metadata, &identity, &dummies, roots)?;
        let phase2 = self.run_phase2(&metadata, &identity, &dummies, entity_order)?;

        for (entity, stats) in phase1 {
            let entry = summary.types.entry(entity).or_default();
            entry.created = stats.created;
            entry.recovered = stats.recovered;
            entry.failed = stats.failed;
        }
        for (entity, stats) in phase2 {
            let entry = summary.types.entry(entity).or_default();
            entry.updated = stats.updated;
            entry.skipped = stats.skipped;
            entry.errored = stats.errored;
        }

        if self.config.purge_dummies {
            let (purged, _failed) = dummies.purge(self.target);
            summary.dummies_purged = purged;
        }

        for (entity, counts) in &summary.types {
            info!(
                entity = %entity,
                created = counts.created,
                recovered = counts.recovered,
                failed = counts.failed,
                updated = counts.updated,
                skipped = counts.skipped,
                errored = counts.errored,
                "run summary"
            );
        }
        Ok(summary)
    }

    fn run_phase1(
        &self,
        metadata: &MetadataTable,
        identity: &IdentityMap,
        dummies: &DummyRegistry,
        roots: &[RootSet],
    ) -> Result<BTreeMap<String, Phase1Stats>> {
        let mut materializer = Materializer::new(
            self.source,
            self.target,
            metadata,
            identity,
            dummies,
            self.snapshots,
            &self.config,
        );
        for root in roots {
            info!(entity = %root.entity, roots = root.ids.len(), "phase 1 starting");
            materializer.materialize_roots(&root.entity, &root.ids)?;
        }
        materializer.finish()?;
        Ok(materializer.into_stats())
    }

    fn run_phase2(
        &self,
        metadata: &MetadataTable,
        identity: &IdentityMap,
        dummies: &DummyRegistry,
        entity_order: &[String],
    ) -> Result<BTreeMap<String, BackpatchStats>> {
        let mut backpatcher = Backpatcher::new(
            self.source,
            self.target,
            metadata,
            identity,
            dummies,
            self.snapshots,
            &self.config,
        );
        let mut all = BTreeMap::new();
        for entity in entity_order {
            let stats = backpatcher.backpatch(entity)?;
            all.insert(entity.clone(), stats);
        }
        Ok(all)
    }
}
