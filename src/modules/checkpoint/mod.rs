//! Run progress and resumption state.
//!
//! The checkpoint is rewritten after every chunk so a restart loses at most
//! one chunk of work.

use std::fs;
use std::io;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::probe::Outcome;

/// Lifecycle of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    Initializing,
    Running,
    Completed,
    HaltedProxies,
    HaltedEmptyInput,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Initializing | RunStatus::Running)
    }
}

/// Cumulative outcome counters for the current pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RunCounts {
    pub available: u64,
    pub taken: u64,
    pub unknown: u64,
    pub errored: u64,
    /// Identifiers left unchecked because no proxy was available.
    pub skipped: u64,
}

impl RunCounts {
    pub fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Available => self.available += 1,
            Outcome::Taken => self.taken += 1,
            Outcome::Unknown => self.unknown += 1,
        }
    }

    pub fn resolved(&self) -> u64 {
        self.available + self.taken + self.unknown
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Identifiers consumed from the input so far in this pass.
    pub offset: u64,
    #[serde(default)]
    pub counts: RunCounts,
    pub last_identifier: Option<String>,
    #[serde(default)]
    pub status: RunStatus,
    #[serde(default)]
    pub failure_reason: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub last_run_time: Option<DateTime<Utc>>,
    pub next_run_estimate: Option<DateTime<Utc>>,
}

impl Default for Checkpoint {
    fn default() -> Self {
        Self {
            offset: 0,
            counts: RunCounts::default(),
            last_identifier: None,
            status: RunStatus::Initializing,
            failure_reason: None,
            started_at: None,
            updated_at: Utc::now(),
            last_run_time: None,
            next_run_estimate: None,
        }
    }
}

impl Checkpoint {
    /// Start a fresh pass, keeping only run timestamps.
    pub fn reset_pass(&mut self) {
        self.offset = 0;
        self.counts = RunCounts::default();
        self.last_identifier = None;
    }
}

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint io error: {0}")]
    Io(#[from] io::Error),
    #[error("checkpoint is not valid json: {0}")]
    Json(#[from] serde_json::Error),
}

/// Durable home of the checkpoint.
pub trait CheckpointStore: Send + Sync {
    fn load(&self) -> Result<Checkpoint, CheckpointError>;
    fn save(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError>;
}

/// Pretty-printed JSON file, written via a temporary sibling and renamed into
/// place.
#[derive(Debug, Clone)]
pub struct JsonCheckpointStore {
    path: PathBuf,
}

impl JsonCheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl CheckpointStore for JsonCheckpointStore {
    fn load(&self) -> Result<Checkpoint, CheckpointError> {
        let contents = fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    fn save(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(checkpoint)?;
        let staging = self.path.with_extension("json.tmp");
        fs::write(&staging, json)?;
        fs::rename(&staging, &self.path)?;
        log::debug!("checkpoint saved at offset {}", checkpoint.offset);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_fold_outcomes() {
        let mut counts = RunCounts::default();
        counts.record(Outcome::Available);
        counts.record(Outcome::Taken);
        counts.record(Outcome::Taken);
        counts.record(Outcome::Unknown);
        assert_eq!(counts.available, 1);
        assert_eq!(counts.taken, 2);
        assert_eq!(counts.resolved(), 4);
    }

    #[test]
    fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonCheckpointStore::new(dir.path().join("nested").join("meta.json"));
        assert!(matches!(
            store.load(),
            Err(CheckpointError::Io(err)) if err.kind() == io::ErrorKind::NotFound
        ));
    }

    #[test]
    fn only_finished_states_are_terminal() {
        assert!(!RunStatus::Initializing.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::HaltedProxies.is_terminal());
        assert!(RunStatus::HaltedEmptyInput.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
    }

    #[test]
    fn corrupt_file_is_a_json_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meta.json");
        fs::write(&path, "{ not json").unwrap();
        let store = JsonCheckpointStore::new(&path);
        assert!(matches!(store.load(), Err(CheckpointError::Json(_))));
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonCheckpointStore::new(dir.path().join("out").join("meta.json"));
        let mut checkpoint = Checkpoint {
            offset: 150,
            last_identifier: Some("zeta".into()),
            status: RunStatus::HaltedProxies,
            ..Checkpoint::default()
        };
        checkpoint.counts.record(Outcome::Available);
        store.save(&checkpoint).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded, checkpoint);

        let raw = fs::read_to_string(dir.path().join("out").join("meta.json")).unwrap();
        assert!(raw.contains("\"halted_proxies\""));
    }

    #[test]
    fn reset_pass_clears_progress() {
        let mut checkpoint = Checkpoint {
            offset: 10,
            last_identifier: Some("x".into()),
            ..Checkpoint::default()
        };
        checkpoint.counts.errored = 3;
        checkpoint.reset_pass();
        assert_eq!(checkpoint.offset, 0);
        assert_eq!(checkpoint.counts, RunCounts::default());
        assert!(checkpoint.last_identifier.is_none());
    }
}
