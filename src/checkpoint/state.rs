//! Checkpoint state and stage outcome reporting.
//!
//! Epistemic foundation:
//! - K_i: The output store is the only source of truth for what is done
//! - K_i: An identifier in the set is never reprocessed in the same run
//! - B_i: A stage with failures needs another pass

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Identifiers already durably recorded in one stage store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckpointSet {
    ids: HashSet<String>,
}

impl CheckpointSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    /// Returns false if `id` was already present.
    pub fn insert(&mut self, id: impl Into<String>) -> bool {
        self.ids.insert(id.into())
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

impl FromIterator<String> for CheckpointSet {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self {
            ids: iter.into_iter().collect(),
        }
    }
}

/// Outcome of one runner pass over one store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageReport {
    /// Stage name (propose, review, ...)
    pub stage: String,
    /// Actor whose store this pass wrote (model or reviewer)
    pub actor: String,
    /// Distinct inputs seen
    pub total: usize,
    /// Already in the store when the pass started
    pub skipped: usize,
    /// Appended during this pass
    pub processed: usize,
    /// Not gradeable or otherwise filtered out before any call
    pub ignored: usize,
    /// Failed and left for a re-run
    pub failed: usize,
    pub failed_ids: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub runtime_secs: f64,
}

impl StageReport {
    pub fn new(stage: impl Into<String>, actor: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            actor: actor.into(),
            total: 0,
            skipped: 0,
            processed: 0,
            ignored: 0,
            failed: 0,
            failed_ids: Vec::new(),
            started_at: Utc::now(),
            runtime_secs: 0.0,
        }
    }

    /// Non-zero failures mean "re-run needed".
    pub fn needs_rerun(&self) -> bool {
        self.failed > 0
    }

    /// Fold a re-run pass into this report.
    pub fn absorb_rerun(&mut self, rerun: StageReport) {
        self.processed += rerun.processed;
        self.failed = rerun.failed;
        self.failed_ids = rerun.failed_ids;
        self.runtime_secs += rerun.runtime_secs;
    }
}

impl fmt::Display for StageReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}]: {} total, {} already done, {} processed, {} failed",
            self.stage, self.actor, self.total, self.skipped, self.processed, self.failed
        )?;
        if self.ignored > 0 {
            write!(f, ", {} not eligible", self.ignored)?;
        }
        write!(f, " ({:.1}s)", self.runtime_secs)?;
        if self.needs_rerun() {
            write!(f, " - re-run needed")?;
        }
        Ok(())
    }
}
