//! Audit Log (C13, ambient): append-only record of executed (non-dry-run)
//! actions, independent of the `tracing` diagnostic log.

use crate::model::{unix_now, Instruction, WorkerResult};
use anyhow::Result;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

pub struct AuditLog {
    file: Mutex<File>,
    path: PathBuf,
}

impl AuditLog {
    pub fn new(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            file: Mutex::new(file),
            path,
        })
    }

    /// Append one line. Dry-run actions are skipped — they produced no
    /// externally observable effect.
    pub fn record(&self, session_id: &str, instruction: &Instruction, result: &WorkerResult) {
        if result.simulated {
            return;
        }
        let line = format!(
            "{} session={} worker={} action={} success={} message={}\n",
            unix_now(),
            session_id,
            instruction.worker,
            instruction.action,
            result.success,
            result.message.replace('\n', " "),
        );
        let mut guard = self.file.lock();
        let _ = guard.write_all(line.as_bytes());
        let _ = guard.flush();
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::safety::risk::Risk;
    use std::collections::HashMap;

    fn instruction() -> Instruction {
        Instruction {
            worker: "shell".into(),
            action: "execute_command".into(),
            args: HashMap::new(),
            risk_level: Risk::Safe,
            dry_run: false,
            thinking: String::new(),
        }
    }

    #[test]
    fn records_executed_action() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::new(dir.path().join("audit.log")).unwrap();
        log.record("s1", &instruction(), &WorkerResult::ok("done"));
        let contents = std::fs::read_to_string(log.path()).unwrap();
        assert!(contents.contains("worker=shell"));
        assert!(contents.contains("session=s1"));
    }

    #[test]
    fn skips_dry_run_actions() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::new(dir.path().join("audit.log")).unwrap();
        let mut result = WorkerResult::ok("simulated");
        result.simulated = true;
        log.record("s1", &instruction(), &result);
        let contents = std::fs::read_to_string(log.path()).unwrap_or_default();
        assert!(contents.is_empty());
    }

    #[test]
    fn appends_across_multiple_records() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::new(dir.path().join("audit.log")).unwrap();
        log.record("s1", &instruction(), &WorkerResult::ok("one"));
        log.record("s1", &instruction(), &WorkerResult::ok("two"));
        let contents = std::fs::read_to_string(log.path()).unwrap();
        assert_eq!(contents.lines().count(), 2);
    }
}
