//! Checkpoint Store (C9): persists `ReactState` at suspension points and
//! supports resume with an approval verdict.
//!
//! Two interchangeable backends behind the same contract: an in-process
//! map (loses state on process exit; fine for short sessions and tests),
//! and an on-disk single-file-per-session JSON snapshot written via
//! temp-file + rename for atomicity. Concurrency is sharded per
//! `session_id` — a lock held by one long-suspended session never blocks
//! saves/loads for another.

use crate::engine::ReactState;
use anyhow::Result;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Backend-agnostic contract: `save`/`load`/`delete`, atomic per key.
pub trait CheckpointStore: Send + Sync {
    fn save(&self, state: &ReactState) -> Result<()>;
    fn load(&self, session_id: &str) -> Result<Option<ReactState>>;
    fn delete(&self, session_id: &str) -> Result<()>;
}

/// Per-session sharded lock: each `session_id` gets its own `Mutex`, so a
/// long-suspended session's lock never blocks unrelated sessions.
fn shard_lock(shards: &Mutex<HashMap<String, Arc<Mutex<()>>>>, session_id: &str) -> Arc<Mutex<()>> {
    let mut guard = shards.lock();
    guard
        .entry(session_id.to_string())
        .or_insert_with(|| Arc::new(Mutex::new(())))
        .clone()
}

/// In-process backend: a map guarded by per-session shard locks.
pub struct InMemoryCheckpointStore {
    states: Mutex<HashMap<String, ReactState>>,
    shards: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self {
            states: Mutex::new(HashMap::new()),
            shards: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryCheckpointStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CheckpointStore for InMemoryCheckpointStore {
    fn save(&self, state: &ReactState) -> Result<()> {
        let lock = shard_lock(&self.shards, &state.session_id);
        let _guard = lock.lock();
        self.states.lock().insert(state.session_id.clone(), state.clone());
        Ok(())
    }

    fn load(&self, session_id: &str) -> Result<Option<ReactState>> {
        let lock = shard_lock(&self.shards, session_id);
        let _guard = lock.lock();
        Ok(self.states.lock().get(session_id).cloned())
    }

    fn delete(&self, session_id: &str) -> Result<()> {
        let lock = shard_lock(&self.shards, session_id);
        let _guard = lock.lock();
        self.states.lock().remove(session_id);
        Ok(())
    }
}

/// On-disk backend: one JSON file per session under `checkpoints_dir`.
pub struct FileCheckpointStore {
    checkpoints_dir: PathBuf,
    shards: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl FileCheckpointStore {
    pub fn new(checkpoints_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&checkpoints_dir)?;
        Ok(Self {
            checkpoints_dir,
            shards: Mutex::new(HashMap::new()),
        })
    }

    pub fn default_path() -> PathBuf {
        crate::config::base_dir().join("checkpoints")
    }

    fn path_for(&self, session_id: &str) -> PathBuf {
        self.checkpoints_dir.join(format!("{session_id}.json"))
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn save(&self, state: &ReactState) -> Result<()> {
        let lock = shard_lock(&self.shards, &state.session_id);
        let _guard = lock.lock();
        let json = serde_json::to_string_pretty(state)?;
        let final_path = self.path_for(&state.session_id);
        let tmp_path = final_path.with_extension("json.tmp");
        std::fs::write(&tmp_path, json)?;
        std::fs::rename(&tmp_path, &final_path)?;
        Ok(())
    }

    fn load(&self, session_id: &str) -> Result<Option<ReactState>> {
        let lock = shard_lock(&self.shards, session_id);
        let _guard = lock.lock();
        let path = self.path_for(session_id);
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    fn delete(&self, session_id: &str) -> Result<()> {
        let lock = shard_lock(&self.shards, session_id);
        let _guard = lock.lock();
        let path = self.path_for(session_id);
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ReactState;

    fn state(id: &str) -> ReactState {
        ReactState::new(id.to_string(), "do the thing".to_string(), 8)
    }

    #[test]
    fn in_memory_save_load_delete_roundtrip() {
        let store = InMemoryCheckpointStore::new();
        store.save(&state("s1")).unwrap();
        assert!(store.load("s1").unwrap().is_some());
        store.delete("s1").unwrap();
        assert!(store.load("s1").unwrap().is_none());
    }

    #[test]
    fn in_memory_independent_sessions() {
        let store = InMemoryCheckpointStore::new();
        store.save(&state("a")).unwrap();
        store.save(&state("b")).unwrap();
        store.delete("a").unwrap();
        assert!(store.load("a").unwrap().is_none());
        assert!(store.load("b").unwrap().is_some());
    }

    #[test]
    fn file_backend_save_load_delete_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path().to_path_buf()).unwrap();
        store.save(&state("s1")).unwrap();
        let loaded = store.load("s1").unwrap().unwrap();
        assert_eq!(loaded.session_id, "s1");
        store.delete("s1").unwrap();
        assert!(store.load("s1").unwrap().is_none());
    }

    #[test]
    fn file_backend_missing_session_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path().to_path_buf()).unwrap();
        assert!(store.load("nope").unwrap().is_none());
    }

    #[test]
    fn file_backend_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FileCheckpointStore::new(dir.path().to_path_buf()).unwrap();
            store.save(&state("s1")).unwrap();
        }
        let store2 = FileCheckpointStore::new(dir.path().to_path_buf()).unwrap();
        assert!(store2.load("s1").unwrap().is_some());
    }
}
