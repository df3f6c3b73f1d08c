use super::{get_str, param};
use crate::model::{ActionDescriptor, ParamType, WorkerResult};
use crate::safety::risk::Risk;
use crate::tools::Worker;
use anyhow::Result;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;

struct ManagedProcess {
    command: String,
    child: tokio::process::Child,
}

/// Background processes started by this worker, keyed by caller-assigned id.
/// Persists only for the process lifetime of the agent — not checkpointed.
static PROCESSES: Lazy<Mutex<HashMap<String, ManagedProcess>>> = Lazy::new(|| Mutex::new(HashMap::new()));

pub struct ProcessWorker;

#[async_trait]
impl Worker for ProcessWorker {
    fn name(&self) -> &str {
        "process"
    }

    fn description(&self) -> &str {
        "Start, stop, and list background processes such as dev servers"
    }

    fn actions(&self) -> Vec<ActionDescriptor> {
        vec![
            ActionDescriptor {
                name: "start".to_string(),
                params: vec![
                    param("id", ParamType::String, true, "unique identifier for this process"),
                    param("command", ParamType::String, true, "command to execute"),
                    param("args", ParamType::Array, false, "command arguments"),
                    param("cwd", ParamType::String, false, "working directory"),
                ],
                risk_hint: Risk::Medium,
                open_schema: false,
            },
            ActionDescriptor {
                name: "stop".to_string(),
                params: vec![param("id", ParamType::String, true, "process identifier")],
                risk_hint: Risk::Medium,
                open_schema: false,
            },
            ActionDescriptor {
                name: "list".to_string(),
                params: vec![],
                risk_hint: Risk::Safe,
                open_schema: false,
            },
        ]
    }

    async fn execute(&self, action: &str, args: &HashMap<String, Value>, dry_run: bool) -> Result<WorkerResult> {
        match action {
            "start" => start(args, dry_run).await,
            "stop" => stop(args, dry_run),
            "list" => Ok(list()),
            other => Ok(WorkerResult::failed(format!("unknown action: {other}"))),
        }
    }
}

async fn start(args: &HashMap<String, Value>, dry_run: bool) -> Result<WorkerResult> {
    let Some(id) = get_str(args, "id") else {
        return Ok(WorkerResult::failed("missing required argument: id"));
    };
    let Some(command) = get_str(args, "command") else {
        return Ok(WorkerResult::failed("missing required argument: command"));
    };
    if PROCESSES.lock().contains_key(&id) {
        return Ok(WorkerResult::failed(format!("a process with id {id} is already running")));
    }

    let extra_args: Vec<String> = args
        .get("args")
        .and_then(|v| v.as_array())
        .map(|a| a.iter().filter_map(|v| v.as_str().map(String::from)).collect())
        .unwrap_or_default();
    let cwd = get_str(args, "cwd").map(PathBuf::from);

    if dry_run {
        let mut result = WorkerResult::ok(format!("dry run: would start `{command}` as {id}"));
        result.simulated = true;
        return Ok(result);
    }

    let mut cmd = tokio::process::Command::new(&command);
    cmd.args(&extra_args);
    cmd.kill_on_drop(true);
    if let Some(cwd) = &cwd {
        cmd.current_dir(cwd);
    }
    cmd.stdout(std::process::Stdio::null());
    cmd.stderr(std::process::Stdio::null());

    match cmd.spawn() {
        Ok(child) => {
            let pid = child.id();
            PROCESSES.lock().insert(id.clone(), ManagedProcess { command: command.clone(), child });
            let mut result = WorkerResult::ok(format!("started {id} (pid {:?})", pid));
            result.data = Some(serde_json::json!({"id": id, "pid": pid, "command": command}));
            Ok(result)
        }
        Err(e) => Ok(WorkerResult::failed(format!("failed to start {command}: {e}"))),
    }
}

fn stop(args: &HashMap<String, Value>, dry_run: bool) -> Result<WorkerResult> {
    let Some(id) = get_str(args, "id") else {
        return Ok(WorkerResult::failed("missing required argument: id"));
    };

    if dry_run {
        let mut result = WorkerResult::ok(format!("dry run: would stop {id}"));
        result.simulated = true;
        return Ok(result);
    }

    let mut guard = PROCESSES.lock();
    match guard.remove(&id) {
        Some(mut managed) => {
            let _ = managed.child.start_kill();
            Ok(WorkerResult::ok(format!("stopped {id}")))
        }
        None => Ok(WorkerResult::failed(format!("no managed process with id {id}"))),
    }
}

fn list() -> WorkerResult {
    let guard = PROCESSES.lock();
    let ids: Vec<&str> = guard.keys().map(|s| s.as_str()).collect();
    let mut result = WorkerResult::ok(format!("{} managed process(es)", ids.len()));
    result.data = Some(serde_json::json!({
        "processes": guard.iter().map(|(id, p)| serde_json::json!({"id": id, "command": p.command})).collect::<Vec<_>>()
    }));
    result
}
