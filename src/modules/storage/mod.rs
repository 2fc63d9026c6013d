//! Persistent result storage backed by redb.
//!
//! Each identifier is stored once; repeated saves are rejected so the first
//! classification of a pass wins.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::probe::Outcome;

const RESULTS: TableDefinition<&str, &str> = TableDefinition::new("results");

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("identifier '{0}' is already stored")]
    Duplicate(String),
    #[error("database error: {0}")]
    Database(#[from] redb::Error),
    #[error("stored record is not valid json: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// One persisted classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredResult {
    pub identifier: String,
    pub outcome: Outcome,
    pub checked_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ResultRecord {
    outcome: Outcome,
    checked_at: DateTime<Utc>,
}

/// Aggregate view over stored results, used for reporting.
#[derive(Debug, Clone, Default)]
pub struct ResultsSnapshot {
    pub total: u64,
    pub available: u64,
    pub taken: u64,
    pub unknown: u64,
    pub first_checked_at: Option<DateTime<Utc>>,
    pub last_checked_at: Option<DateTime<Utc>>,
    /// Most recent results, newest first.
    pub recent: Vec<StoredResult>,
}

/// Where resolved outcomes go.
pub trait ResultSink: Send + Sync {
    fn save(&self, identifier: &str, outcome: Outcome) -> Result<(), StoreError>;

    /// Summarise everything stored, keeping the `recent` newest entries.
    fn snapshot(&self, recent: usize) -> Result<ResultsSnapshot, StoreError>;
}

pub struct RedbResultStore {
    db: Database,
}

impl RedbResultStore {
    /// Open (or create) the database at `path`. An existing file is first
    /// copied to `<path>.bak`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && let Err(err) = fs::create_dir_all(parent)
        {
            log::error!("failed to create {}: {err}", parent.display());
        }

        if path.exists() {
            let backup = backup_path(&path);
            match fs::copy(&path, &backup) {
                Ok(_) => log::info!("result database backed up to {}", backup.display()),
                Err(err) => log::error!("failed to back up result database: {err}"),
            }
        }

        let mut db = Database::create(&path).map_err(redb::Error::from)?;

        let txn = db.begin_write().map_err(redb::Error::from)?;
        txn.open_table(RESULTS).map_err(redb::Error::from)?;
        txn.commit().map_err(redb::Error::from)?;

        match db.check_integrity() {
            Ok(true) => log::info!("result database passed integrity check"),
            Ok(false) => log::warn!("result database was repaired during integrity check"),
            Err(err) => log::error!("result database integrity check failed: {err}"),
        }

        let store = Self { db };
        match store.stored_count() {
            Ok(count) => log::info!("result database {} holds {count} results", path.display()),
            Err(err) => log::warn!("could not count stored results: {err}"),
        }
        Ok(store)
    }

    pub fn stored_count(&self) -> Result<u64, StoreError> {
        let txn = self.db.begin_read().map_err(redb::Error::from)?;
        let table = txn.open_table(RESULTS).map_err(redb::Error::from)?;
        Ok(table.len().map_err(redb::Error::from)?)
    }

    pub fn get(&self, identifier: &str) -> Result<Option<StoredResult>, StoreError> {
        let txn = self.db.begin_read().map_err(redb::Error::from)?;
        let table = txn.open_table(RESULTS).map_err(redb::Error::from)?;
        let Some(raw) = table.get(identifier).map_err(redb::Error::from)? else {
            return Ok(None);
        };
        let record: ResultRecord = serde_json::from_str(raw.value())?;
        Ok(Some(StoredResult {
            identifier: identifier.to_string(),
            outcome: record.outcome,
            checked_at: record.checked_at,
        }))
    }

    fn all(&self) -> Result<Vec<StoredResult>, StoreError> {
        let txn = self.db.begin_read().map_err(redb::Error::from)?;
        let table = txn.open_table(RESULTS).map_err(redb::Error::from)?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(redb::Error::from)? {
            let (key, value) = entry.map_err(redb::Error::from)?;
            let record: ResultRecord = serde_json::from_str(value.value())?;
            results.push(StoredResult {
                identifier: key.value().to_string(),
                outcome: record.outcome,
                checked_at: record.checked_at,
            });
        }
        Ok(results)
    }
}

impl ResultSink for RedbResultStore {
    fn save(&self, identifier: &str, outcome: Outcome) -> Result<(), StoreError> {
        let record = serde_json::to_string(&ResultRecord {
            outcome,
            checked_at: Utc::now(),
        })?;

        let txn = self.db.begin_write().map_err(redb::Error::from)?;
        {
            let mut table = txn.open_table(RESULTS).map_err(redb::Error::from)?;
            if table.get(identifier).map_err(redb::Error::from)?.is_some() {
                return Err(StoreError::Duplicate(identifier.to_string()));
            }
            table
                .insert(identifier, record.as_str())
                .map_err(redb::Error::from)?;
        }
        txn.commit().map_err(redb::Error::from)?;
        Ok(())
    }

    fn snapshot(&self, recent: usize) -> Result<ResultsSnapshot, StoreError> {
        let mut results = self.all()?;
        let mut snapshot = ResultsSnapshot {
            total: results.len() as u64,
            ..ResultsSnapshot::default()
        };

        for result in &results {
            match result.outcome {
                Outcome::Available => snapshot.available += 1,
                Outcome::Taken => snapshot.taken += 1,
                Outcome::Unknown => snapshot.unknown += 1,
            }
        }
        snapshot.first_checked_at = results.iter().map(|r| r.checked_at).min();
        snapshot.last_checked_at = results.iter().map(|r| r.checked_at).max();

        results.sort_by(|a, b| b.checked_at.cmp(&a.checked_at));
        results.truncate(recent);
        snapshot.recent = results;
        Ok(snapshot)
    }
}

fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".bak");
    PathBuf::from(name)
}
