//! Change Tracker (C11): pre-mutation file snapshots with rollback by
//! change-id. `command`-kind entries are audit-only and never roll back.

use crate::model::{unix_now, ChangeKind, ChangeRecord};
use anyhow::{anyhow, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub struct ChangeTracker {
    dir: PathBuf,
    index: Mutex<HashMap<String, ChangeRecord>>,
    retention_days: u64,
}

impl ChangeTracker {
    pub fn new(dir: PathBuf, retention_days: u64) -> Result<Self> {
        std::fs::create_dir_all(&dir)?;
        std::fs::create_dir_all(dir.join("blobs"))?;
        let tracker = Self {
            dir,
            index: Mutex::new(HashMap::new()),
            retention_days,
        };
        tracker.load_index()?;
        tracker.prune_expired()?;
        Ok(tracker)
    }

    fn index_path(&self) -> PathBuf {
        self.dir.join("index.json")
    }

    fn load_index(&self) -> Result<()> {
        let path = self.index_path();
        if !path.exists() {
            return Ok(());
        }
        let content = std::fs::read_to_string(&path)?;
        let records: Vec<ChangeRecord> = serde_json::from_str(&content)?;
        let mut guard = self.index.lock();
        for r in records {
            guard.insert(r.change_id.clone(), r);
        }
        Ok(())
    }

    fn persist_index(&self, guard: &HashMap<String, ChangeRecord>) -> Result<()> {
        let records: Vec<&ChangeRecord> = guard.values().collect();
        let json = serde_json::to_string_pretty(&records)?;
        let tmp = self.index_path().with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, self.index_path())?;
        Ok(())
    }

    fn prune_expired(&self) -> Result<()> {
        let cutoff = unix_now().saturating_sub(self.retention_days * 24 * 3600);
        let mut guard = self.index.lock();
        let expired: Vec<String> = guard
            .iter()
            .filter(|(_, r)| r.timestamp < cutoff)
            .map(|(id, _)| id.clone())
            .collect();
        for id in expired {
            if let Some(record) = guard.remove(&id) {
                if let Some(blob) = &record.backup_blob_ref {
                    let _ = std::fs::remove_file(self.dir.join("blobs").join(blob));
                }
            }
        }
        self.persist_index(&guard)
    }

    /// Snapshot a file before a mutating action. If the file does not
    /// exist, still records a `change_id` (backup blob is absent).
    pub fn record(&self, kind: ChangeKind, target_path: &Path) -> Result<String> {
        let change_id = uuid::Uuid::new_v4().to_string();
        let backup_blob_ref = if target_path.exists() && kind != ChangeKind::Command {
            let blob_name = format!("{change_id}.blob");
            std::fs::copy(target_path, self.dir.join("blobs").join(&blob_name))?;
            Some(blob_name)
        } else {
            None
        };

        let rollback_available = kind != ChangeKind::Command;
        let record = ChangeRecord {
            change_id: change_id.clone(),
            kind,
            target_path: Some(target_path.to_string_lossy().to_string()),
            backup_blob_ref,
            timestamp: unix_now(),
            rollback_available,
        };

        let mut guard = self.index.lock();
        guard.insert(change_id.clone(), record);
        self.persist_index(&guard)?;
        Ok(change_id)
    }

    /// Record an audit-only `command`-kind entry (never rolls back).
    pub fn record_command(&self) -> Result<String> {
        let change_id = uuid::Uuid::new_v4().to_string();
        let record = ChangeRecord {
            change_id: change_id.clone(),
            kind: ChangeKind::Command,
            target_path: None,
            backup_blob_ref: None,
            timestamp: unix_now(),
            rollback_available: false,
        };
        let mut guard = self.index.lock();
        guard.insert(change_id.clone(), record);
        self.persist_index(&guard)?;
        Ok(change_id)
    }

    pub fn rollback(&self, change_id: &str) -> Result<()> {
        let guard = self.index.lock();
        let record = guard
            .get(change_id)
            .ok_or_else(|| anyhow!("unknown change_id: {change_id}"))?;

        if !record.rollback_available {
            return Err(anyhow!("rollback unsupported for kind {:?} (audit-only)", record.kind));
        }

        let target = record
            .target_path
            .as_ref()
            .ok_or_else(|| anyhow!("change record has no target path"))?;

        match &record.backup_blob_ref {
            Some(blob) => {
                std::fs::copy(self.dir.join("blobs").join(blob), target)?;
            }
            None => {
                // No prior content existed; rollback means removing what was created.
                let _ = std::fs::remove_file(target);
            }
        }
        Ok(())
    }

    pub fn get(&self, change_id: &str) -> Option<ChangeRecord> {
        self.index.lock().get(change_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> (tempfile::TempDir, ChangeTracker) {
        let dir = tempfile::tempdir().unwrap();
        let tracker = ChangeTracker::new(dir.path().join("changes"), 30).unwrap();
        (dir, tracker)
    }

    #[test]
    fn record_and_rollback_file_write() {
        let (dir, tracker) = tracker();
        let target = dir.path().join("f.txt");
        std::fs::write(&target, "original").unwrap();

        let change_id = tracker.record(ChangeKind::FileWrite, &target).unwrap();
        std::fs::write(&target, "modified").unwrap();
        tracker.rollback(&change_id).unwrap();

        assert_eq!(std::fs::read_to_string(&target).unwrap(), "original");
    }

    #[test]
    fn record_command_is_audit_only() {
        let (_dir, tracker) = tracker();
        let change_id = tracker.record_command().unwrap();
        let err = tracker.rollback(&change_id).unwrap_err();
        assert!(err.to_string().contains("audit-only"));
    }

    #[test]
    fn unknown_change_id_errors() {
        let (_dir, tracker) = tracker();
        assert!(tracker.rollback("nonexistent").is_err());
    }

    #[test]
    fn record_on_nonexistent_file_has_no_blob() {
        let (dir, tracker) = tracker();
        let target = dir.path().join("new.txt");
        let change_id = tracker.record(ChangeKind::FileWrite, &target).unwrap();
        let record = tracker.get(&change_id).unwrap();
        assert!(record.backup_blob_ref.is_none());
    }

    #[test]
    fn rollback_of_new_file_removes_it() {
        let (dir, tracker) = tracker();
        let target = dir.path().join("new.txt");
        let change_id = tracker.record(ChangeKind::FileWrite, &target).unwrap();
        std::fs::write(&target, "created content").unwrap();
        tracker.rollback(&change_id).unwrap();
        assert!(!target.exists());
    }

    #[test]
    fn index_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let changes_dir = dir.path().join("changes");
        let target = dir.path().join("f.txt");
        std::fs::write(&target, "v1").unwrap();

        let change_id = {
            let tracker = ChangeTracker::new(changes_dir.clone(), 30).unwrap();
            tracker.record(ChangeKind::FileWrite, &target).unwrap()
        };

        let tracker2 = ChangeTracker::new(changes_dir, 30).unwrap();
        assert!(tracker2.get(&change_id).is_some());
    }
}
