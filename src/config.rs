//! Run configuration: batching, continuity types, masking, and the
//! destructive-operation switches.

use std::collections::{BTreeMap, BTreeSet};

use serde::Deserialize;

use crate::model::TargetId;

/// Tunables for one migration run.
///
/// `batch_size` defaults to 200; tune it downward when payload width is
/// large so a flush stays inside the collaborator's transport limits.
#[derive(Debug, Clone, Deserialize)]
pub struct MigrationConfig {
    /// Pending payloads per entity type before an automatic flush.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Submit creations through the bulk collaborator; when false every
    /// record goes through the single-record path.
    #[serde(default = "default_true")]
    pub use_bulk: bool,
    /// Entity types with identity continuity: their ids are assumed to
    /// already exist unchanged in the target (user/owner identities).
    #[serde(default)]
    pub continuity_types: BTreeSet<String>,
    /// Per-type substitute used when a continuity id is absent from the
    /// target; without one the field is dropped.
    #[serde(default)]
    pub fallback_identity: BTreeMap<String, TargetId>,
    /// Suffix appended to email-shaped scalar values, when set.
    #[serde(default)]
    pub mask_email_suffix: Option<String>,
    /// Permits the destructive pre-run wipe of the target.
    #[serde(default)]
    pub allow_wipe: bool,
    /// Delete dummies (except the root placeholder) at run end.
    #[serde(default = "default_true")]
    pub purge_dummies: bool,
    /// Seed the identity map from existing snapshots instead of clearing
    /// them, resuming a prior run.
    #[serde(default)]
    pub resume: bool,
}

fn default_batch_size() -> usize {
    200
}

fn default_true() -> bool {
    true
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            use_bulk: true,
            continuity_types: BTreeSet::new(),
            fallback_identity: BTreeMap::new(),
            mask_email_suffix: None,
            allow_wipe: false,
            purge_dummies: true,
            resume: false,
        }
    }
}

impl MigrationConfig {
    /// Whether `entity` carries its identity across stores.
    pub fn is_continuity_type(&self, entity: &str) -> bool {
        self.continuity_types.contains(entity)
    }
}
