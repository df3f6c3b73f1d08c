use super::{get_bool, get_str, param};
use crate::model::{ActionDescriptor, ParamType, WorkerResult};
use crate::safety::risk::Risk;
use crate::tools::Worker;
use anyhow::Result;
use async_trait::async_trait;
use git2::{Repository, StatusOptions};
use serde_json::Value;
use std::collections::HashMap;

pub struct GitWorker;

#[async_trait]
impl Worker for GitWorker {
    fn name(&self) -> &str {
        "git"
    }

    fn description(&self) -> &str {
        "Inspect and mutate a git working tree"
    }

    fn actions(&self) -> Vec<ActionDescriptor> {
        vec![
            ActionDescriptor {
                name: "status".to_string(),
                params: vec![param("repo_path", ParamType::String, false, "repository path, default .")],
                risk_hint: Risk::Safe,
                open_schema: false,
            },
            ActionDescriptor {
                name: "diff".to_string(),
                params: vec![
                    param("repo_path", ParamType::String, false, "repository path, default ."),
                    param("staged", ParamType::Bool, false, "diff staged changes instead of working tree"),
                ],
                risk_hint: Risk::Safe,
                open_schema: false,
            },
            ActionDescriptor {
                name: "commit".to_string(),
                params: vec![
                    param("repo_path", ParamType::String, false, "repository path, default ."),
                    param("message", ParamType::String, true, "commit message"),
                ],
                risk_hint: Risk::Medium,
                open_schema: false,
            },
        ]
    }

    async fn execute(&self, action: &str, args: &HashMap<String, Value>, dry_run: bool) -> Result<WorkerResult> {
        let repo_path = get_str(args, "repo_path").unwrap_or_else(|| ".".to_string());

        match action {
            "status" => status(&repo_path),
            "diff" => diff(&repo_path, get_bool(args, "staged", false)).await,
            "commit" => {
                let Some(message) = get_str(args, "message") else {
                    return Ok(WorkerResult::failed("missing required argument: message"));
                };
                commit(&repo_path, &message, dry_run).await
            }
            other => Ok(WorkerResult::failed(format!("unknown action: {other}"))),
        }
    }
}

fn status(repo_path: &str) -> Result<WorkerResult> {
    let repo = match Repository::open(repo_path) {
        Ok(r) => r,
        Err(e) => return Ok(WorkerResult::failed(format!("failed to open repository at {repo_path}: {e}"))),
    };
    let head = repo.head()?;
    let branch = head.shorthand().unwrap_or("HEAD").to_string();

    let mut opts = StatusOptions::new();
    let statuses = repo.statuses(Some(&mut opts))?;
    let mut staged = vec![];
    let mut unstaged = vec![];
    let mut untracked = vec![];
    for entry in statuses.iter() {
        let path = entry.path().unwrap_or("??").to_string();
        let bits = entry.status();
        if bits.is_index_new() || bits.is_index_modified() || bits.is_index_deleted() {
            staged.push(path.clone());
        }
        if bits.is_wt_modified() || bits.is_wt_deleted() {
            unstaged.push(path.clone());
        }
        if bits.is_wt_new() {
            untracked.push(path);
        }
    }

    let mut result = WorkerResult::ok(format!(
        "branch {branch}: {} staged, {} unstaged, {} untracked",
        staged.len(),
        unstaged.len(),
        untracked.len()
    ));
    result.data = Some(serde_json::json!({
        "branch": branch, "staged": staged, "unstaged": unstaged, "untracked": untracked,
    }));
    Ok(result)
}

async fn diff(repo_path: &str, staged: bool) -> Result<WorkerResult> {
    let mut cmd = tokio::process::Command::new("git");
    cmd.arg("-C").arg(repo_path).arg("diff");
    if staged {
        cmd.arg("--cached");
    }
    let output = cmd.output().await?;
    let diff = String::from_utf8_lossy(&output.stdout).into_owned();
    let has_changes = !diff.is_empty();
    let mut result = WorkerResult::ok(format!("diff has {} lines", diff.lines().count()));
    result.raw_output = Some(diff);
    result.data = Some(serde_json::json!({"has_changes": has_changes}));
    Ok(result)
}

async fn commit(repo_path: &str, message: &str, dry_run: bool) -> Result<WorkerResult> {
    if dry_run {
        let mut result = WorkerResult::ok(format!("dry run: would stage all and commit with message {message:?}"));
        result.simulated = true;
        return Ok(result);
    }

    tokio::process::Command::new("git")
        .arg("-C").arg(repo_path).arg("add").arg("-A")
        .output().await?;

    let output = tokio::process::Command::new("git")
        .arg("-C").arg(repo_path).arg("commit").arg("-m").arg(message)
        .output().await?;

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    if output.status.success() {
        let mut result = WorkerResult::ok("commit created");
        result.raw_output = Some(stdout);
        Ok(result)
    } else {
        Ok(WorkerResult::failed(format!(
            "commit failed: {}",
            String::from_utf8_lossy(&output.stderr)
        )))
    }
}
