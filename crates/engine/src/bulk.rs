// ABOUTME: Bulk refresh coordinator running the engine over every artifact in order.
// ABOUTME: Reports progress, keeps originals on failure, and persists once at the end.

use std::fmt;

use tracing::{info, warn};

use crate::error::RefreshError;
use crate::model::Artifact;
use crate::refresh::{Engine, RefreshOutcome};
use crate::store::ArtifactStore;

/// Refreshed HTML shorter than this is treated as a failed extraction.
pub const MIN_CONTENT_CHARS: usize = 50;

/// Receives progress while a bulk refresh runs.
pub trait ProgressObserver: Send + Sync {
    /// Called before each artifact with the number already processed, and
    /// once at the end with `completed == total` and an empty label.
    fn on_progress(&self, completed: usize, total: usize, current: &str);
}

impl<F> ProgressObserver for F
where
    F: Fn(usize, usize, &str) + Send + Sync,
{
    fn on_progress(&self, completed: usize, total: usize, current: &str) {
        self(completed, total, current)
    }
}

/// Observer that ignores progress.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressObserver for NoProgress {
    fn on_progress(&self, _completed: usize, _total: usize, _current: &str) {}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactFailure {
    pub id: String,
    pub label: String,
    pub reason: String,
}

/// Counts of one bulk run. `total` excludes paused artifacts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkSummary {
    pub refreshed: usize,
    pub total: usize,
    pub paused: usize,
    pub healed: usize,
    pub failures: Vec<ArtifactFailure>,
}

impl fmt::Display for BulkSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} refreshed", self.refreshed, self.total)
    }
}

/// Refreshes `artifacts` one at a time in input order.
///
/// Returns every artifact, refreshed or original, in the same order.
/// Individual failures are collected in the summary and never abort the run.
pub async fn refresh_all(
    engine: &Engine,
    artifacts: Vec<Artifact>,
    observer: &dyn ProgressObserver,
) -> (Vec<Artifact>, BulkSummary) {
    let total = artifacts.iter().filter(|a| !a.refresh_paused).count();
    let mut summary = BulkSummary {
        total,
        paused: artifacts.len() - total,
        ..Default::default()
    };
    let mut results = Vec::with_capacity(artifacts.len());
    let mut completed = 0;

    for mut artifact in artifacts {
        if artifact.refresh_paused {
            results.push(artifact);
            continue;
        }
        let label = artifact.display_label().to_string();
        observer.on_progress(completed, total, &label);

        match engine.refresh(&artifact).await {
            RefreshOutcome::Verified {
                artifact: updated,
                healed,
                ..
            } if updated.html_cache.chars().count() >= MIN_CONTENT_CHARS => {
                summary.refreshed += 1;
                if healed {
                    summary.healed += 1;
                }
                results.push(updated);
            }
            RefreshOutcome::Verified { artifact: updated, .. } => {
                warn!(artifact = %artifact.id, chars = updated.html_cache.chars().count(), "refreshed content too short, keeping original");
                summary.failures.push(ArtifactFailure {
                    id: artifact.id.clone(),
                    label,
                    reason: "extracted content too short".to_string(),
                });
                results.push(artifact);
            }
            RefreshOutcome::Failed {
                reason,
                fingerprint,
            } => {
                if artifact.heading_fingerprint.is_none() {
                    artifact.heading_fingerprint = fingerprint;
                }
                summary.failures.push(ArtifactFailure {
                    id: artifact.id.clone(),
                    label,
                    reason,
                });
                results.push(artifact);
            }
        }
        completed += 1;
    }

    observer.on_progress(completed, total, "");
    info!(refreshed = summary.refreshed, total = summary.total, failed = summary.failures.len(), "bulk refresh finished");
    (results, summary)
}

/// Loads every artifact from `store`, refreshes them, and writes the whole
/// set back with a single save. A storage failure leaves previously written
/// data untouched.
pub async fn refresh_store(
    engine: &Engine,
    store: &dyn ArtifactStore,
    observer: &dyn ProgressObserver,
) -> Result<BulkSummary, RefreshError> {
    let artifacts = store.load().map_err(|e| {
        RefreshError::storage(store.location(), "Load", Some(anyhow::Error::new(e)))
    })?;
    let (artifacts, summary) = refresh_all(engine, artifacts, observer).await;
    store.save_all(&artifacts).map_err(|e| {
        RefreshError::storage(store.location(), "SaveAll", Some(anyhow::Error::new(e)))
    })?;
    Ok(summary)
}
