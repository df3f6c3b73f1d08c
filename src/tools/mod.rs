use crate::model::{ActionDescriptor, ParamDescriptor, ParamType, WorkerDescriptor, WorkerResult};
use crate::safety::risk::Risk;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

pub mod container;
pub mod file;
pub mod git;
pub mod http;
pub mod process;
pub mod shell;

/// A worker owns a named group of related actions (unlike the teacher's
/// one-tool-per-registration model, one `Worker` here exposes many).
#[async_trait]
pub trait Worker: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn actions(&self) -> Vec<ActionDescriptor>;
    fn supports_dry_run(&self) -> bool {
        true
    }
    async fn execute(&self, action: &str, args: &HashMap<String, Value>, dry_run: bool) -> Result<WorkerResult>;
}

/// Immutable after construction — built once at engine construction and
/// shared read-only across all concurrent sessions.
pub struct WorkerRegistry {
    workers: HashMap<String, Box<dyn Worker>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        let mut registry = Self {
            workers: HashMap::new(),
        };
        registry.register(shell::ShellWorker);
        registry.register(file::FileWorker);
        registry.register(git::GitWorker);
        registry.register(http::HttpWorker);
        registry.register(process::ProcessWorker);
        registry.register(container::ContainerWorker);
        registry
    }

    pub fn register<W: Worker + 'static>(&mut self, worker: W) {
        self.workers.insert(worker.name().to_string(), Box::new(worker));
    }

    pub fn get(&self, name: &str) -> Option<&dyn Worker> {
        self.workers.get(name).map(|w| w.as_ref())
    }

    pub fn action_risk_hint(&self, worker: &str, action: &str) -> Option<Risk> {
        self.get(worker)?
            .actions()
            .into_iter()
            .find(|a| a.name == action)
            .map(|a| a.risk_hint)
    }

    pub fn descriptors(&self) -> Vec<WorkerDescriptor> {
        self.workers
            .values()
            .map(|w| WorkerDescriptor {
                name: w.name().to_string(),
                description: w.description().to_string(),
                actions: w.actions(),
                supports_dry_run: w.supports_dry_run(),
            })
            .collect()
    }

    /// Build an OpenAI-compatible tool list from the registry for tool-call
    /// mode (C5).
    pub fn to_tool_definitions(&self) -> Vec<crate::api::types::ToolDefinition> {
        let mut defs = Vec::new();
        for w in self.workers.values() {
            for action in w.actions() {
                let properties: serde_json::Map<String, Value> = action
                    .params
                    .iter()
                    .map(|p| {
                        let ty = match p.param_type {
                            ParamType::String => "string",
                            ParamType::Int => "integer",
                            ParamType::Bool => "boolean",
                            ParamType::Array => "array",
                            ParamType::Object => "object",
                        };
                        (
                            p.name.clone(),
                            serde_json::json!({"type": ty, "description": p.description}),
                        )
                    })
                    .collect();
                let required: Vec<&str> = action
                    .params
                    .iter()
                    .filter(|p| p.required)
                    .map(|p| p.name.as_str())
                    .collect();
                defs.push(crate::api::types::ToolDefinition {
                    def_type: "function".to_string(),
                    function: crate::api::types::FunctionDefinition {
                        name: format!("{}.{}", w.name(), action.name),
                        description: format!("{}: {}", w.description(), action.name),
                        parameters: serde_json::json!({
                            "type": "object",
                            "properties": properties,
                            "required": required,
                        }),
                    },
                });
            }
        }
        defs
    }

    pub async fn execute(
        &self,
        worker: &str,
        action: &str,
        args: &HashMap<String, Value>,
        dry_run: bool,
    ) -> Result<WorkerResult> {
        let w = self
            .get(worker)
            .ok_or_else(|| anyhow::anyhow!("unknown worker: {worker}"))?;
        w.execute(action, args, dry_run).await
    }
}

impl Default for WorkerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

pub fn param(name: &str, param_type: ParamType, required: bool, description: &str) -> ParamDescriptor {
    ParamDescriptor {
        name: name.to_string(),
        param_type,
        required,
        description: description.to_string(),
    }
}

pub fn get_str(args: &HashMap<String, Value>, key: &str) -> Option<String> {
    args.get(key).and_then(|v| v.as_str()).map(String::from)
}

pub fn get_bool(args: &HashMap<String, Value>, key: &str, default: bool) -> bool {
    args.get(key).and_then(|v| v.as_bool()).unwrap_or(default)
}

pub fn get_u64(args: &HashMap<String, Value>, key: &str, default: u64) -> u64 {
    args.get(key).and_then(|v| v.as_u64()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_has_six_reference_workers() {
        let registry = WorkerRegistry::new();
        for name in ["shell", "file", "git", "http", "process", "container"] {
            assert!(registry.get(name).is_some(), "missing worker {name}");
        }
    }

    #[test]
    fn descriptors_include_actions() {
        let registry = WorkerRegistry::new();
        let descriptors = registry.descriptors();
        assert!(!descriptors.is_empty());
        assert!(descriptors.iter().all(|d| !d.actions.is_empty()));
    }

    #[test]
    fn tool_definitions_are_namespaced_by_worker() {
        let registry = WorkerRegistry::new();
        let defs = registry.to_tool_definitions();
        assert!(defs.iter().any(|d| d.function.name.starts_with("shell.")));
        assert!(defs.iter().any(|d| d.function.name.starts_with("file.")));
    }

    #[test]
    fn action_risk_hint_lookup() {
        let registry = WorkerRegistry::new();
        assert!(registry.action_risk_hint("file", "delete").is_some());
        assert!(registry.action_risk_hint("nonexistent", "x").is_none());
    }
}
