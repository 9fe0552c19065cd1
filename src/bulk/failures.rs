use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Mutex;

use super::Job;

/// A job whose pipeline run failed. Persisted as-is for a later
/// reprocessing pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedJob {
    pub path: String,
    pub name: String,
    pub error: String,
}

impl FailedJob {
    pub fn new(job: &Job, error: impl Into<String>) -> Self {
        Self {
            path: job.source_path.display().to_string(),
            name: job.name.clone(),
            error: error.into(),
        }
    }
}

/// Shared by all workers; order is the order in which failures arrived.
#[derive(Debug, Default)]
pub struct FailureCollector {
    failures: Mutex<Vec<FailedJob>>,
}

impl FailureCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, failure: FailedJob) {
        let mut failures = self
            .failures
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        failures.push(failure);
    }

    pub fn len(&self) -> usize {
        self.failures
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_failures(self) -> Vec<FailedJob> {
        self.failures
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Writes the failure report. Nothing is written when there are no
/// failures, so a stale report from an earlier run is left alone.
pub fn persist_failures(failures: &[FailedJob], path: &Path) -> Result<bool> {
    if failures.is_empty() {
        return Ok(false);
    }
    let json = serde_json::to_string_pretty(failures)?;
    std::fs::write(path, json)
        .with_context(|| format!("failed to write failure report: {}", path.display()))?;
    Ok(true)
}
