//! Session Memory (C10): durable key/value facts, preferences, and notes
//! fed back into prompts across turns.
//!
//! Persisted as a single JSON document per scope, loaded on first access and
//! saved with writes coalesced within a 2-second debounce window.

use crate::model::{unix_now, MemoryCategory, MemoryEntry};
use anyhow::Result;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

const DEFAULT_CAPACITY: usize = 200;
/// Recall scoring weights (Open Question #1 in the design ledger): overlap
/// dominates, hit-count contributes a diminishing-returns boost via log,
/// and recency decays over a two-week half-life.
const RECENCY_HALF_LIFE_SECS: f64 = 14.0 * 24.0 * 3600.0;

pub struct MemoryStore {
    inner: Mutex<MemoryState>,
    path: PathBuf,
}

struct MemoryState {
    scopes: HashMap<String, Vec<MemoryEntry>>,
    dirty: bool,
    last_save_attempt: Option<Instant>,
}

impl MemoryStore {
    pub fn new(path: PathBuf) -> Self {
        let scopes = load_from_disk(&path).unwrap_or_default();
        Self {
            inner: Mutex::new(MemoryState {
                scopes,
                dirty: false,
                last_save_attempt: None,
            }),
            path,
        }
    }

    pub fn store(&self, scope: &str, key: &str, value: &str, category: MemoryCategory) {
        let mut guard = self.inner.lock();
        let now = unix_now();
        let entries = guard.scopes.entry(scope.to_string()).or_default();

        if let Some(existing) = entries.iter_mut().find(|e| e.key == key) {
            existing.value = value.to_string();
            existing.category = category;
            existing.updated_at = now;
        } else {
            if entries.len() >= DEFAULT_CAPACITY {
                evict_lowest_score(entries, now);
            }
            entries.push(MemoryEntry {
                key: key.to_string(),
                value: value.to_string(),
                category,
                created_at: now,
                updated_at: now,
                hit_count: 0,
            });
        }
        guard.dirty = true;
        self.maybe_flush(&mut guard);
    }

    pub fn forget(&self, scope: &str, key: &str) {
        let mut guard = self.inner.lock();
        if let Some(entries) = guard.scopes.get_mut(scope) {
            entries.retain(|e| e.key != key);
        }
        guard.dirty = true;
        self.maybe_flush(&mut guard);
    }

    /// Return the top-K entries for `scope` ranked by recall score, with
    /// `hit_count` incremented on every entry returned.
    pub fn recall(&self, scope: &str, query: &str, top_k: usize) -> Vec<MemoryEntry> {
        let mut guard = self.inner.lock();
        let now = unix_now();
        let Some(entries) = guard.scopes.get_mut(scope) else {
            return Vec::new();
        };

        let mut scored: Vec<(f64, usize)> = entries
            .iter()
            .enumerate()
            .map(|(i, e)| (recall_score(query, e, now), i))
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);

        let mut result = Vec::with_capacity(scored.len());
        for (_, idx) in &scored {
            entries[*idx].hit_count += 1;
            result.push(entries[*idx].clone());
        }
        guard.dirty = true;
        self.maybe_flush(&mut guard);
        result
    }

    fn maybe_flush(&self, guard: &mut MemoryState) {
        let should_flush = match guard.last_save_attempt {
            None => true,
            Some(t) => t.elapsed() >= Duration::from_secs(2),
        };
        if !should_flush || !guard.dirty {
            return;
        }
        guard.last_save_attempt = Some(Instant::now());
        if save_to_disk(&self.path, &guard.scopes).is_ok() {
            guard.dirty = false;
        }
    }

    /// Force a write regardless of the debounce window; used on shutdown.
    pub fn flush(&self) -> Result<()> {
        let mut guard = self.inner.lock();
        save_to_disk(&self.path, &guard.scopes)?;
        guard.dirty = false;
        Ok(())
    }
}

fn recall_score(query: &str, entry: &MemoryEntry, now: u64) -> f64 {
    let overlap = keyword_overlap(query, &format!("{} {}", entry.key, entry.value));
    let hit_boost = ((1.0 + entry.hit_count as f64).ln()).max(0.0);
    let age_secs = now.saturating_sub(entry.updated_at) as f64;
    let recency = (-age_secs / RECENCY_HALF_LIFE_SECS * std::f64::consts::LN_2).exp();
    overlap + hit_boost + recency
}

fn keyword_overlap(query: &str, text: &str) -> f64 {
    let q: std::collections::HashSet<String> =
        query.to_lowercase().split_whitespace().map(String::from).collect();
    if q.is_empty() {
        return 0.0;
    }
    let t: std::collections::HashSet<String> =
        text.to_lowercase().split_whitespace().map(String::from).collect();
    let matches = q.intersection(&t).count();
    matches as f64 / q.len() as f64
}

fn evict_lowest_score(entries: &mut Vec<MemoryEntry>, now: u64) {
    if entries.is_empty() {
        return;
    }
    let worst = entries
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| {
            let sa = recall_score("", a, now);
            let sb = recall_score("", b, now);
            sa.partial_cmp(&sb).unwrap_or(std::cmp::Ordering::Equal)
        })
        .map(|(i, _)| i);
    if let Some(i) = worst {
        entries.remove(i);
    }
}

fn load_from_disk(path: &Path) -> Option<HashMap<String, Vec<MemoryEntry>>> {
    let content = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&content).ok()
}

fn save_to_disk(path: &Path, scopes: &HashMap<String, Vec<MemoryEntry>>) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(scopes)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> MemoryStore {
        let dir = tempfile::tempdir().unwrap();
        MemoryStore::new(dir.path().join("memory.json"))
    }

    #[test]
    fn store_and_recall_roundtrip() {
        let s = store();
        s.store("global", "favorite_shell", "zsh", MemoryCategory::Preference);
        let results = s.recall("global", "shell", 5);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].key, "favorite_shell");
    }

    #[test]
    fn recall_increments_hit_count() {
        let s = store();
        s.store("global", "k", "zsh shell preference", MemoryCategory::Preference);
        s.recall("global", "shell", 5);
        let again = s.recall("global", "shell", 5);
        assert_eq!(again[0].hit_count, 2);
    }

    #[test]
    fn forget_removes_entry() {
        let s = store();
        s.store("global", "k", "v", MemoryCategory::Fact);
        s.forget("global", "k");
        assert!(s.recall("global", "v", 5).is_empty());
    }

    #[test]
    fn store_overwrites_existing_key() {
        let s = store();
        s.store("global", "k", "v1", MemoryCategory::Fact);
        s.store("global", "k", "v2", MemoryCategory::Fact);
        let r = s.recall("global", "v2", 5);
        assert_eq!(r.len(), 1);
        assert_eq!(r[0].value, "v2");
    }

    #[test]
    fn capacity_eviction_keeps_size_bounded() {
        let s = store();
        for i in 0..(DEFAULT_CAPACITY + 10) {
            s.store("global", &format!("k{i}"), "v", MemoryCategory::Note);
        }
        let guard = s.inner.lock();
        assert!(guard.scopes.get("global").unwrap().len() <= DEFAULT_CAPACITY);
    }

    #[test]
    fn scopes_are_independent() {
        let s = store();
        s.store("session-a", "k", "v", MemoryCategory::Fact);
        assert!(s.recall("session-b", "v", 5).is_empty());
    }

    #[test]
    fn empty_query_returns_entries_ranked_by_recency_and_hits() {
        let s = store();
        s.store("global", "a", "x", MemoryCategory::Note);
        s.store("global", "b", "y", MemoryCategory::Note);
        let r = s.recall("global", "", 5);
        assert_eq!(r.len(), 2);
    }
}
