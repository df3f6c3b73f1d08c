use super::{get_str, param};
use crate::model::{ActionDescriptor, ParamType, WorkerResult};
use crate::safety::risk::Risk;
use crate::tools::Worker;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

pub struct FileWorker;

#[async_trait]
impl Worker for FileWorker {
    fn name(&self) -> &str {
        "file"
    }

    fn description(&self) -> &str {
        "Read, write, and delete files on the host filesystem"
    }

    fn actions(&self) -> Vec<ActionDescriptor> {
        vec![
            ActionDescriptor {
                name: "read".to_string(),
                params: vec![param("path", ParamType::String, true, "file path to read")],
                risk_hint: Risk::Safe,
                open_schema: false,
            },
            ActionDescriptor {
                name: "write".to_string(),
                params: vec![
                    param("path", ParamType::String, true, "file path to write"),
                    param("content", ParamType::String, true, "file content"),
                ],
                risk_hint: Risk::Medium,
                open_schema: false,
            },
            ActionDescriptor {
                name: "append".to_string(),
                params: vec![
                    param("path", ParamType::String, true, "file path to append to"),
                    param("content", ParamType::String, true, "content to append"),
                ],
                risk_hint: Risk::Medium,
                open_schema: false,
            },
            ActionDescriptor {
                name: "delete".to_string(),
                params: vec![param("path", ParamType::String, true, "file path to delete")],
                risk_hint: Risk::High,
                open_schema: false,
            },
        ]
    }

    async fn execute(&self, action: &str, args: &HashMap<String, Value>, dry_run: bool) -> Result<WorkerResult> {
        let Some(path) = get_str(args, "path") else {
            return Ok(WorkerResult::failed("missing required argument: path"));
        };

        match action {
            "read" => match tokio::fs::read_to_string(&path).await {
                Ok(content) => {
                    let mut result = WorkerResult::ok(format!("read {} bytes from {path}", content.len()));
                    result.raw_output = Some(content);
                    Ok(result)
                }
                Err(e) => Ok(WorkerResult::failed(format!("failed to read {path}: {e}"))),
            },
            "write" => {
                let content = get_str(args, "content").unwrap_or_default();
                if dry_run {
                    let mut result = WorkerResult::ok(format!("dry run: would write {} bytes to {path}", content.len()));
                    result.simulated = true;
                    return Ok(result);
                }
                match tokio::fs::write(&path, &content).await {
                    Ok(()) => Ok(WorkerResult::ok(format!("wrote {} bytes to {path}", content.len()))),
                    Err(e) => Ok(WorkerResult::failed(format!("failed to write {path}: {e}"))),
                }
            }
            "append" => {
                let content = get_str(args, "content").unwrap_or_default();
                if dry_run {
                    let mut result = WorkerResult::ok(format!("dry run: would append {} bytes to {path}", content.len()));
                    result.simulated = true;
                    return Ok(result);
                }
                use tokio::io::AsyncWriteExt;
                match tokio::fs::OpenOptions::new().create(true).append(true).open(&path).await {
                    Ok(mut f) => match f.write_all(content.as_bytes()).await {
                        Ok(()) => Ok(WorkerResult::ok(format!("appended {} bytes to {path}", content.len()))),
                        Err(e) => Ok(WorkerResult::failed(format!("failed to append to {path}: {e}"))),
                    },
                    Err(e) => Ok(WorkerResult::failed(format!("failed to open {path}: {e}"))),
                }
            }
            "delete" => {
                if dry_run {
                    let mut result = WorkerResult::ok(format!("dry run: would delete {path}"));
                    result.simulated = true;
                    return Ok(result);
                }
                match tokio::fs::remove_file(&path).await {
                    Ok(()) => Ok(WorkerResult::ok(format!("deleted {path}"))),
                    Err(e) => Ok(WorkerResult::failed(format!("failed to delete {path}: {e}"))),
                }
            }
            other => Ok(WorkerResult::failed(format!("unknown action: {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_then_read_roundtrip() {
        let worker = FileWorker;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.txt").to_string_lossy().to_string();

        let mut write_args = HashMap::new();
        write_args.insert("path".to_string(), serde_json::json!(path));
        write_args.insert("content".to_string(), serde_json::json!("hello"));
        let write_result = worker.execute("write", &write_args, false).await.unwrap();
        assert!(write_result.success);

        let mut read_args = HashMap::new();
        read_args.insert("path".to_string(), serde_json::json!(path));
        let read_result = worker.execute("read", &read_args, false).await.unwrap();
        assert_eq!(read_result.raw_output.unwrap(), "hello");
    }

    #[tokio::test]
    async fn dry_run_write_does_not_touch_disk() {
        let worker = FileWorker;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.txt");

        let mut args = HashMap::new();
        args.insert("path".to_string(), serde_json::json!(path.to_string_lossy().to_string()));
        args.insert("content".to_string(), serde_json::json!("hello"));
        let result = worker.execute("write", &args, true).await.unwrap();
        assert!(result.simulated);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn delete_removes_file() {
        let worker = FileWorker;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.txt");
        std::fs::write(&path, "x").unwrap();

        let mut args = HashMap::new();
        args.insert("path".to_string(), serde_json::json!(path.to_string_lossy().to_string()));
        let result = worker.execute("delete", &args, false).await.unwrap();
        assert!(result.success);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn read_missing_file_fails_not_panics() {
        let worker = FileWorker;
        let mut args = HashMap::new();
        args.insert("path".to_string(), serde_json::json!("/nonexistent/path/x.txt"));
        let result = worker.execute("read", &args, false).await.unwrap();
        assert!(!result.success);
    }

    #[test]
    fn delete_has_high_risk_hint() {
        let worker = FileWorker;
        let actions = worker.actions();
        let delete = actions.iter().find(|a| a.name == "delete").unwrap();
        assert_eq!(delete.risk_hint, Risk::High);
    }
}
