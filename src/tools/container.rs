use super::{get_bool, get_str, param};
use crate::model::{ActionDescriptor, ParamType, WorkerResult};
use crate::safety::risk::Risk;
use crate::tools::Worker;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::process::Stdio;
use tokio::process::Command;

pub struct ContainerWorker;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Runtime {
    Docker,
    Podman,
}

impl Runtime {
    fn command(self) -> &'static str {
        match self {
            Runtime::Docker => "docker",
            Runtime::Podman => "podman",
        }
    }
}

async fn detect_runtime() -> Option<Runtime> {
    for (name, runtime) in [("docker", Runtime::Docker), ("podman", Runtime::Podman)] {
        let available = Command::new(name)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false);
        if available {
            return Some(runtime);
        }
    }
    None
}

async fn get_runtime(preferred: Option<&str>) -> Result<Runtime, String> {
    match preferred {
        Some("docker") => Ok(Runtime::Docker),
        Some("podman") => Ok(Runtime::Podman),
        _ => detect_runtime().await.ok_or_else(|| "no container runtime found (tried docker, podman)".to_string()),
    }
}

const SHELL_METACHARACTERS: &[char] = &['`', '$', '(', ')', '|', ';', '&', '!', '<', '>', '\n', '\r', '\0'];

fn is_valid_port(s: &str) -> bool {
    !s.is_empty() && matches!(s.parse::<u16>(), Ok(p) if p >= 1)
}

/// Validates `HOST:CONTAINER[/tcp|udp]` shape and rejects shell metacharacters
/// before the value reaches a spawned process argument.
fn validate_port_mapping(mapping: &str) -> bool {
    let (port_part, proto) = match mapping.rfind('/') {
        Some(idx) => (&mapping[..idx], Some(&mapping[idx + 1..])),
        None => (mapping, None),
    };
    if let Some(proto) = proto {
        if proto != "tcp" && proto != "udp" {
            return false;
        }
    }
    if mapping.contains(SHELL_METACHARACTERS) {
        return false;
    }
    let parts: Vec<&str> = port_part.split(':').collect();
    matches!(parts.len(), 2) && is_valid_port(parts[0]) && is_valid_port(parts[1])
}

#[async_trait]
impl Worker for ContainerWorker {
    fn name(&self) -> &str {
        "container"
    }

    fn description(&self) -> &str {
        "Run, stop, and list containers via docker or podman"
    }

    fn actions(&self) -> Vec<ActionDescriptor> {
        vec![
            ActionDescriptor {
                name: "run".to_string(),
                params: vec![
                    param("image", ParamType::String, true, "container image"),
                    param("name", ParamType::String, false, "container name"),
                    param("ports", ParamType::Array, false, "port mappings, e.g. 8080:80"),
                    param("detach", ParamType::Bool, false, "run in background, default true"),
                ],
                risk_hint: Risk::Medium,
                open_schema: false,
            },
            ActionDescriptor {
                name: "stop".to_string(),
                params: vec![param("name", ParamType::String, true, "container name or id")],
                risk_hint: Risk::Medium,
                open_schema: false,
            },
            ActionDescriptor {
                name: "list".to_string(),
                params: vec![param("all", ParamType::Bool, false, "include stopped containers")],
                risk_hint: Risk::Safe,
                open_schema: false,
            },
        ]
    }

    async fn execute(&self, action: &str, args: &HashMap<String, Value>, dry_run: bool) -> Result<WorkerResult> {
        match action {
            "run" => run(args, dry_run).await,
            "stop" => stop(args, dry_run).await,
            "list" => list(args).await,
            other => Ok(WorkerResult::failed(format!("unknown action: {other}"))),
        }
    }
}

async fn run(args: &HashMap<String, Value>, dry_run: bool) -> Result<WorkerResult> {
    let Some(image) = get_str(args, "image") else {
        return Ok(WorkerResult::failed("missing required argument: image"));
    };
    let ports: Vec<String> = args
        .get("ports")
        .and_then(|v| v.as_array())
        .map(|a| a.iter().filter_map(|v| v.as_str().map(String::from)).collect())
        .unwrap_or_default();
    for mapping in &ports {
        if !validate_port_mapping(mapping) {
            return Ok(WorkerResult::failed(format!(
                "invalid port mapping {mapping:?}, expected HOST:CONTAINER[/tcp|udp]"
            )));
        }
    }
    let name = get_str(args, "name");
    let detach = args.get("detach").and_then(|v| v.as_bool()).unwrap_or(true);

    if dry_run {
        let mut result = WorkerResult::ok(format!("dry run: would run {image}"));
        result.simulated = true;
        return Ok(result);
    }

    let runtime = match get_runtime(get_str(args, "runtime").as_deref()).await {
        Ok(r) => r,
        Err(e) => return Ok(WorkerResult::failed(e)),
    };
    let mut cmd = Command::new(runtime.command());
    cmd.arg("run");
    if detach {
        cmd.arg("-d");
    }
    if let Some(name) = &name {
        cmd.args(["--name", name]);
    }
    for mapping in &ports {
        cmd.args(["-p", mapping]);
    }
    cmd.arg(&image);

    let output = cmd.output().await?;
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if output.status.success() {
        let mut result = WorkerResult::ok(format!("started container from {image}"));
        result.data = Some(serde_json::json!({"container_id": stdout, "runtime": runtime.command()}));
        Ok(result)
    } else {
        Ok(WorkerResult::failed(format!(
            "container run failed: {}",
            String::from_utf8_lossy(&output.stderr)
        )))
    }
}

async fn stop(args: &HashMap<String, Value>, dry_run: bool) -> Result<WorkerResult> {
    let Some(name) = get_str(args, "name") else {
        return Ok(WorkerResult::failed("missing required argument: name"));
    };

    if dry_run {
        let mut result = WorkerResult::ok(format!("dry run: would stop container {name}"));
        result.simulated = true;
        return Ok(result);
    }

    let runtime = match get_runtime(get_str(args, "runtime").as_deref()).await {
        Ok(r) => r,
        Err(e) => return Ok(WorkerResult::failed(e)),
    };
    let output = Command::new(runtime.command()).arg("stop").arg(&name).output().await?;
    if output.status.success() {
        Ok(WorkerResult::ok(format!("stopped {name}")))
    } else {
        Ok(WorkerResult::failed(format!(
            "failed to stop {name}: {}",
            String::from_utf8_lossy(&output.stderr)
        )))
    }
}

async fn list(args: &HashMap<String, Value>) -> Result<WorkerResult> {
    let runtime = match get_runtime(get_str(args, "runtime").as_deref()).await {
        Ok(r) => r,
        Err(e) => return Ok(WorkerResult::failed(e)),
    };
    let all = get_bool(args, "all", false);
    let mut cmd = Command::new(runtime.command());
    cmd.arg("ps");
    if all {
        cmd.arg("-a");
    }
    cmd.args(["--format", "{{.ID}}\t{{.Image}}\t{{.Status}}"]);

    let output = cmd.output().await?;
    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let containers: Vec<Value> = stdout
        .lines()
        .filter(|l| !l.is_empty())
        .map(|line| {
            let mut fields = line.splitn(3, '\t');
            serde_json::json!({
                "id": fields.next().unwrap_or_default(),
                "image": fields.next().unwrap_or_default(),
                "status": fields.next().unwrap_or_default(),
            })
        })
        .collect();
    let mut result = WorkerResult::ok(format!("{} container(s)", containers.len()));
    result.data = Some(serde_json::json!({"containers": containers}));
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_port_mapping_with_shell_metacharacters() {
        assert!(!validate_port_mapping("8080:80;rm -rf /"));
    }

    #[test]
    fn accepts_valid_port_mapping() {
        assert!(validate_port_mapping("8080:80"));
        assert!(validate_port_mapping("8080:80/tcp"));
    }

    #[test]
    fn rejects_non_numeric_port() {
        assert!(!validate_port_mapping("abc:80"));
    }

    #[tokio::test]
    async fn dry_run_does_not_invoke_runtime() {
        let worker = ContainerWorker;
        let mut args = HashMap::new();
        args.insert("image".to_string(), serde_json::json!("nginx:latest"));
        let result = worker.execute("run", &args, true).await.unwrap();
        assert!(result.simulated);
    }

    #[tokio::test]
    async fn missing_image_fails() {
        let worker = ContainerWorker;
        let result = worker.execute("run", &HashMap::new(), false).await.unwrap();
        assert!(!result.success);
    }

    #[tokio::test]
    async fn invalid_port_mapping_rejected_before_dry_run_check() {
        let worker = ContainerWorker;
        let mut args = HashMap::new();
        args.insert("image".to_string(), serde_json::json!("nginx"));
        args.insert("ports".to_string(), serde_json::json!(["bad;injection"]));
        let result = worker.execute("run", &args, true).await.unwrap();
        assert!(!result.success);
    }

    #[test]
    fn run_action_has_medium_risk_hint() {
        let worker = ContainerWorker;
        let actions = worker.actions();
        let run_action = actions.iter().find(|a| a.name == "run").unwrap();
        assert_eq!(run_action.risk_hint, Risk::Medium);
    }
}
