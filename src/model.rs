//! Core data model shared across the engine, safety pipeline, and workers.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::safety::risk::Risk;

/// One step proposed by the reasoner.
///
/// `(worker, action)` must be registered in the live [`WorkerRegistry`] at
/// validation time; `args` values are restricted to JSON-representable
/// scalars and homogeneous containers of the same — no opaque handles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instruction {
    pub worker: String,
    pub action: String,
    #[serde(default)]
    pub args: HashMap<String, Value>,
    pub risk_level: Risk,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub thinking: String,
}

/// Outcome of one action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerResult {
    pub success: bool,
    #[serde(default)]
    pub data: Option<Value>,
    pub message: String,
    #[serde(default)]
    pub task_completed: bool,
    #[serde(default)]
    pub simulated: bool,
    #[serde(default)]
    pub raw_output: Option<String>,
}

impl WorkerResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            data: None,
            message: message.into(),
            task_completed: false,
            simulated: false,
            raw_output: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            message: message.into(),
            task_completed: false,
            simulated: false,
            raw_output: None,
        }
    }
}

/// `(Instruction, WorkerResult, wallclock)` — one ring entry per session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationEntry {
    pub instruction: Instruction,
    pub result: WorkerResult,
    pub wallclock_unix_secs: u64,
}

impl ConversationEntry {
    pub fn now(instruction: Instruction, result: WorkerResult) -> Self {
        Self {
            instruction,
            result,
            wallclock_unix_secs: unix_now(),
        }
    }
}

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Durable key/value fact, preference, or note fed back into prompts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub key: String,
    pub value: String,
    pub category: MemoryCategory,
    pub created_at: u64,
    pub updated_at: u64,
    pub hit_count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryCategory {
    Fact,
    Preference,
    Note,
}

/// Pre-mutation snapshot + rollback handle. `command`-kind entries are
/// audit-only: `rollback_available` is always false for them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub change_id: String,
    pub kind: ChangeKind,
    pub target_path: Option<String>,
    pub backup_blob_ref: Option<String>,
    pub timestamp: u64,
    pub rollback_available: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    FileWrite,
    FileDelete,
    FileAppend,
    FileReplace,
    Command,
}

/// One parameter of a worker action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ParamType,
    pub required: bool,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Int,
    Bool,
    Array,
    Object,
}

impl ParamType {
    /// True iff `value`'s JSON type matches the declared type.
    pub fn matches(self, value: &Value) -> bool {
        match self {
            ParamType::String => value.is_string(),
            ParamType::Int => value.is_i64() || value.is_u64(),
            ParamType::Bool => value.is_boolean(),
            ParamType::Array => value.is_array(),
            ParamType::Object => value.is_object(),
        }
    }
}

/// One action a worker exposes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionDescriptor {
    pub name: String,
    pub params: Vec<ParamDescriptor>,
    pub risk_hint: Risk,
    /// An action whose schema is "open" tolerates unknown parameter names.
    #[serde(default)]
    pub open_schema: bool,
}

/// Registered once at engine construction; immutable for the process
/// lifetime. Used by the Prompt Builder to render the tool catalog and by
/// the LLM Client to build tool-call schemas.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerDescriptor {
    pub name: String,
    pub description: String,
    pub actions: Vec<ActionDescriptor>,
    pub supports_dry_run: bool,
}

/// Terminal/continuation outcome of `Engine::run`/`Engine::resume`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RunResult {
    /// Task finished; `message` is the final natural-language reply.
    Completed { message: String, session_id: String },
    /// Suspended awaiting human approval; checkpoint has been written.
    NeedsApproval {
        session_id: String,
        risk_level: Risk,
        reason: String,
    },
    /// Fatal for this turn.
    Failed { session_id: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn param_type_matching() {
        assert!(ParamType::String.matches(&Value::String("x".into())));
        assert!(!ParamType::String.matches(&Value::Bool(true)));
        assert!(ParamType::Int.matches(&Value::from(3)));
        assert!(ParamType::Array.matches(&Value::from(vec![1, 2])));
    }

    #[test]
    fn worker_result_constructors() {
        let ok = WorkerResult::ok("done");
        assert!(ok.success);
        let err = WorkerResult::failed("bad");
        assert!(!err.success);
    }

    #[test]
    fn conversation_entry_serializes() {
        let instr = Instruction {
            worker: "shell".into(),
            action: "execute_command".into(),
            args: HashMap::new(),
            risk_level: Risk::Safe,
            dry_run: false,
            thinking: String::new(),
        };
        let entry = ConversationEntry::now(instr, WorkerResult::ok("x"));
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("wallclock_unix_secs"));
    }
}
