//! Persistence for the single reminder record.
//!
//! The hook keeps at most one reminder. Starting a new one overwrites the
//! previous record, which is how stale checks are invalidated.

use chrono::{DateTime, Utc};
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

use crate::errors::{ReminderError, ReminderResult};
use crate::types::ReminderRecord;

/// Storage for the reminder record.
pub trait StateStore: Send + Sync + std::fmt::Debug {
    /// Reads the record. Missing, empty and unparsable state all read as `None`.
    fn read(&self) -> Option<ReminderRecord>;

    /// Replaces the stored record.
    fn write(&self, record: &ReminderRecord) -> ReminderResult<()>;

    /// Marks the stored reminder as cleared.
    ///
    /// Returns `false` when there is nothing to clear.
    fn clear(&self, now: DateTime<Utc>) -> ReminderResult<bool> {
        match self.read() {
            Some(mut record) => {
                record.cleared_at = Some(now);
                self.write(&record)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// Pretty-printed JSON file store.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    /// Creates a store backed by `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(format!(".{}.tmp", std::process::id()));
        self.path.with_file_name(name)
    }
}

impl StateStore for JsonFileStore {
    fn read(&self) -> Option<ReminderRecord> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::debug!(path = %self.path.display(), error = %e, "State file unreadable");
                return None;
            }
        };

        if raw.trim().is_empty() {
            return None;
        }

        match serde_json::from_str(&raw) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::debug!(path = %self.path.display(), error = %e, "State file unparsable");
                None
            }
        }
    }

    fn write(&self, record: &ReminderRecord) -> ReminderResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| {
                ReminderError::state_io(format!("cannot create {}", parent.display())).with_cause(e)
            })?;
        }

        let mut json = serde_json::to_string_pretty(record)?;
        json.push('\n');

        // Readers never observe a half-written file
        let temp = self.temp_path();
        fs::write(&temp, json).map_err(|e| {
            ReminderError::state_io(format!("cannot write {}", temp.display())).with_cause(e)
        })?;
        fs::rename(&temp, &self.path).map_err(|e| {
            let _ = fs::remove_file(&temp);
            ReminderError::state_io(format!("cannot replace {}", self.path.display())).with_cause(e)
        })?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NotificationDetails;

    fn record(token: &str) -> ReminderRecord {
        ReminderRecord::new(
            token,
            Utc::now(),
            NotificationDetails {
                title: Some("T".to_string()),
                message: Some("M".to_string()),
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_missing_file_reads_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("state.json"));
        assert!(store.read().is_none());
    }

    #[test]
    fn test_empty_and_corrupt_files_read_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let store = JsonFileStore::new(&path);

        fs::write(&path, "  \n").unwrap();
        assert!(store.read().is_none());

        fs::write(&path, "{\"token\": ").unwrap();
        assert!(store.read().is_none());
    }

    #[test]
    fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");
        let store = JsonFileStore::new(&path);

        let original = record("tok-1");
        store.write(&original).unwrap();
        assert_eq!(store.read(), Some(original));

        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\n  \"token\": \"tok-1\""));
        assert_eq!(fs::read_dir(path.parent().unwrap()).unwrap().count(), 1);
    }

    #[test]
    fn test_write_replaces_previous_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("state.json"));

        store.write(&record("old")).unwrap();
        store.write(&record("new")).unwrap();
        assert_eq!(store.read().map(|r| r.token), Some("new".to_string()));
    }

    #[test]
    fn test_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("state.json"));
        let now = Utc::now();

        assert!(!store.clear(now).unwrap());
        assert!(store.read().is_none());

        store.write(&record("tok")).unwrap();
        assert!(store.clear(now).unwrap());

        let cleared = store.read().unwrap();
        assert_eq!(cleared.cleared_at, Some(now));
        assert_eq!(cleared.title.as_deref(), Some("T"));
    }
}
