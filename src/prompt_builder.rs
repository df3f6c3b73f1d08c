//! Prompt Builder (C4): assembles the system and user prompt for one turn
//! from the live worker registry, conversation history, memory recall, and
//! the preprocessor's output. No network or filesystem I/O beyond the
//! one-time environment snapshot.

use crate::history::ConversationHistory;
use crate::model::MemoryEntry;
use crate::preprocessor::{Intent, PreprocessResult, FORBIDDEN_DEFAULT_PORTS};
use crate::safety::redact::redact_secrets;
use crate::tools::WorkerRegistry;
use once_cell::sync::Lazy;

/// Collected once per process: OS, shell, cwd, user, and detected container
/// tooling. Cheap to recompute; cached since `docker --version` style probes
/// would otherwise run on every turn.
#[derive(Debug, Clone)]
pub struct Environment {
    pub os: String,
    pub shell: String,
    pub cwd: String,
    pub user: String,
    pub docker_available: bool,
    pub kubectl_available: bool,
}

impl Environment {
    pub fn detect() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            shell: std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string()),
            cwd: std::env::current_dir()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|_| ".".to_string()),
            user: whoami::username(),
            docker_available: which("docker"),
            kubectl_available: which("kubectl"),
        }
    }
}

fn which(bin: &str) -> bool {
    std::env::var_os("PATH")
        .map(|paths| {
            std::env::split_paths(&paths).any(|dir| dir.join(bin).is_file())
        })
        .unwrap_or(false)
}

static DEFAULT_ENVIRONMENT: Lazy<Environment> = Lazy::new(Environment::detect);

pub struct PromptBuilder<'a> {
    registry: &'a WorkerRegistry,
    environment: &'a Environment,
}

impl<'a> PromptBuilder<'a> {
    pub fn new(registry: &'a WorkerRegistry) -> Self {
        Self {
            registry,
            environment: &DEFAULT_ENVIRONMENT,
        }
    }

    pub fn with_environment(registry: &'a WorkerRegistry, environment: &'a Environment) -> Self {
        Self { registry, environment }
    }

    pub fn system_prompt(&self) -> String {
        let mut s = String::new();
        s.push_str("You are an operations automation assistant. You execute real commands against the host system on the user's behalf, one action at a time, and observe the result before deciding the next step.\n\n");

        s.push_str(&format!(
            "Environment: os={} shell={} cwd={} user={} docker_available={} kubectl_available={}\n\n",
            self.environment.os,
            self.environment.shell,
            self.environment.cwd,
            self.environment.user,
            self.environment.docker_available,
            self.environment.kubectl_available,
        ));

        s.push_str("Available tools:\n");
        for descriptor in self.registry.descriptors() {
            s.push_str(&format!("- {} — {}\n", descriptor.name, descriptor.description));
            for action in &descriptor.actions {
                let params: Vec<String> = action
                    .params
                    .iter()
                    .map(|p| format!("{}{}: {}", p.name, if p.required { "" } else { "?" }, p.description))
                    .collect();
                s.push_str(&format!("  - {}.{}({})\n", descriptor.name, action.name, params.join(", ")));
            }
        }
        s.push('\n');

        s.push_str(
            "Output format: respond with exactly one JSON object per turn: \
             {\"worker\": string, \"action\": string, \"args\": object, \"thinking\": string}. \
             When the task is complete, respond with plain chat text instead of JSON.\n\n",
        );

        s.push_str("Rules:\n");
        s.push_str("- If the user asks you to view or check something, execute the relevant command and summarize the result; do not just describe what you would run.\n");
        s.push_str("- Never invent a default port. If the user did not specify one, ask or use the command's own default, never a well-known service port.\n");
        s.push_str("- Prefer `openssl rand -hex 32` over shell constructs containing a semicolon.\n\n");

        s.push_str(&os_hints(&self.environment.os));
        s
    }

    pub fn user_prompt(
        &self,
        preprocess: &PreprocessResult,
        history: &ConversationHistory,
        memory: &[MemoryEntry],
        current_input: &str,
    ) -> String {
        let mut s = String::new();

        if !history.is_empty() {
            s.push_str("Recent actions:\n");
            for entry in history.recent(5) {
                let raw = entry.result.raw_output.as_deref().unwrap_or("");
                s.push_str(&format!(
                    "- {}.{} -> {} ({})\n",
                    entry.instruction.worker, entry.instruction.action, entry.result.message, raw
                ));
            }
            s.push('\n');
        }

        if !preprocess.entities.ports.is_empty() {
            s.push_str(&format!(
                "CRITICAL PORT INFO: the user specified port(s) {:?}. Use exactly these; never substitute a default like {:?}.\n\n",
                preprocess.entities.ports, FORBIDDEN_DEFAULT_PORTS
            ));
        }

        if !memory.is_empty() {
            s.push_str("Remembered context:\n");
            for entry in memory {
                s.push_str(&format!("- {}: {}\n", entry.key, redact_secrets(&entry.value).as_ref()));
            }
            s.push('\n');
        }

        if preprocess.intent == Intent::Deploy {
            s.push_str("(intent: deploy)\n");
        }

        s.push_str(redact_secrets(&preprocess.resolved_text).as_ref());
        let _ = current_input;
        s
    }
}

fn os_hints(os: &str) -> String {
    match os {
        "macos" => "OS hint: this is macOS. For memory usage use `ps aux | sort -nrk 4 | head -n 11`.\n".to_string(),
        "linux" => "OS hint: this is Linux. For memory usage use `ps aux --sort=-%mem | head -n 11`.\n".to_string(),
        other => format!("OS hint: running on {other}.\n"),
    }
}
