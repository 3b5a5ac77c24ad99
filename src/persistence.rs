//! Record of generated tests and their last verdicts.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GeneratedTestRecord {
    /// Unit the test was generated for.
    pub target: PathBuf,
    /// Method, hook or scenario text the test covers.
    pub scenario: String,
    /// Written test file; `None` while the record is pending.
    #[serde(default)]
    pub generated: Option<PathBuf>,
    #[serde(default)]
    pub passed_in_last_execution: bool,
    pub last_updated: DateTime<Utc>,
}

impl GeneratedTestRecord {
    pub fn is_pending(&self) -> bool {
        self.generated.is_none()
    }
}

pub trait ResultStore: Send + Sync {
    /// Insert or update the record for `generated`.
    ///
    /// Records are keyed by the generated file. A pending record (no file
    /// yet) for the same target and scenario is adopted when the file first
    /// becomes known, and reused by later runs that still have no file.
    fn upsert(
        &self,
        target: &Path,
        scenario: &str,
        generated: Option<&Path>,
        verdict: bool,
    ) -> Result<GeneratedTestRecord, StoreError>;

    fn records(&self) -> Result<Vec<GeneratedTestRecord>, StoreError>;

    /// Drop every record whose target or generated file is `path`.
    fn remove_referencing(&self, path: &Path) -> Result<usize, StoreError>;
}

#[derive(Serialize, Deserialize, Default)]
struct PersistedRecords {
    #[serde(default)]
    tests: Vec<GeneratedTestRecord>,
}

/// JSON file store, loaded on first use and written after every change.
pub struct JsonResultStore {
    path: PathBuf,
    records: Mutex<Option<Vec<GeneratedTestRecord>>>,
}

impl JsonResultStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            records: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn loaded(&self) -> Result<MutexGuard<'_, Option<Vec<GeneratedTestRecord>>>, StoreError> {
        let mut guard = self.records.lock().map_err(|_| StoreError::Lock)?;
        if guard.is_none() {
            *guard = Some(self.load()?);
        }
        Ok(guard)
    }

    fn load(&self) -> Result<Vec<GeneratedTestRecord>, StoreError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        let saved: PersistedRecords = serde_json::from_str(&raw)?;
        Ok(saved.tests)
    }

    fn save(&self, records: &[GeneratedTestRecord]) -> Result<(), StoreError> {
        let io_err = |source| StoreError::Io {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        let payload = PersistedRecords {
            tests: records.to_vec(),
        };
        let text = serde_json::to_string_pretty(&payload)?;
        fs::write(&self.path, text).map_err(io_err)
    }
}

impl ResultStore for JsonResultStore {
    fn upsert(
        &self,
        target: &Path,
        scenario: &str,
        generated: Option<&Path>,
        verdict: bool,
    ) -> Result<GeneratedTestRecord, StoreError> {
        let mut guard = self.loaded()?;
        // edit a copy; the cache only changes once the file write succeeds
        let mut records = guard.as_ref().cloned().unwrap_or_default();

        let pending_match = |r: &GeneratedTestRecord| {
            r.is_pending() && r.target == target && r.scenario == scenario
        };

        let existing = match generated {
            Some(g) => records
                .iter()
                .position(|r| r.generated.as_deref() == Some(g))
                .or_else(|| records.iter().position(pending_match)),
            None => records.iter().position(pending_match),
        };

        let now = Utc::now();
        let idx = match existing {
            Some(i) => i,
            None => {
                records.push(GeneratedTestRecord {
                    target: target.to_path_buf(),
                    scenario: scenario.to_string(),
                    generated: None,
                    passed_in_last_execution: false,
                    last_updated: now,
                });
                records.len() - 1
            }
        };

        let record = &mut records[idx];
        if let Some(g) = generated {
            record.generated = Some(g.to_path_buf());
        }
        record.passed_in_last_execution = verdict;
        record.last_updated = now.max(record.last_updated);
        record.target = target.to_path_buf();
        record.scenario = scenario.to_string();

        let updated = record.clone();
        self.save(&records)?;
        *guard = Some(records);

        tracing::info!(
            unit = %updated.target.display(),
            scenario = %updated.scenario,
            passed = updated.passed_in_last_execution,
            "test record updated"
        );
        Ok(updated)
    }

    fn records(&self) -> Result<Vec<GeneratedTestRecord>, StoreError> {
        let guard = self.loaded()?;
        Ok(guard.as_ref().cloned().unwrap_or_default())
    }

    fn remove_referencing(&self, path: &Path) -> Result<usize, StoreError> {
        let mut guard = self.loaded()?;
        let mut records = guard.as_ref().cloned().unwrap_or_default();

        let before = records.len();
        records.retain(|r| r.target != path && r.generated.as_deref() != Some(path));
        let removed = before - records.len();

        if removed > 0 {
            self.save(&records)?;
            *guard = Some(records);
            tracing::info!(path = %path.display(), removed, "orphan test records removed");
        }
        Ok(removed)
    }
}
