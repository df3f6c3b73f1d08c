//! ReAct Engine (C8): the control loop tying every other component
//! together. Single-threaded cooperative within one session — suspension
//! happens only at LLM calls, worker `execute` calls, and the explicit
//! needs-approval point. Multiple sessions run independently; they share
//! only the immutable worker registry, the checkpoint store, and the
//! memory store.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::api::tool_call::{self, ToolCallResult};
use crate::api::types::{Message, ThinkingMode};
use crate::api::LlmClient;
use crate::audit::AuditLog;
use crate::change_tracker::ChangeTracker;
use crate::config::Config;
use crate::errors::{EngineError, Result};
use crate::history::ConversationHistory;
use crate::memory::MemoryStore;
use crate::model::{ChangeKind, Instruction, RunResult};
use crate::preprocessor::{self, PreprocessResult};
use crate::prompt_builder::PromptBuilder;
use crate::safety::pipeline::{self, Mode, SafetyDecision, SafetyPipeline};
use crate::safety::policy::Whitelist;
use crate::safety::risk::Risk;
use crate::session::checkpoint::{CheckpointStore, FileCheckpointStore};
use crate::tools::WorkerRegistry;
use crate::validator;

/// Per-session control state, checkpointed across suspension points.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReactState {
    pub session_id: String,
    pub user_input: String,
    pub history: ConversationHistoryShadow,
    pub iteration: usize,
    pub max_iterations: usize,
    pub pending_instruction: Option<Instruction>,
    pub pending_risk: Option<Risk>,
    pub awaiting_approval: bool,
    pub approval_granted: Option<bool>,
    pub task_completed: bool,
    pub final_message: String,
    pub error: Option<String>,
}

/// `ConversationHistory` itself doesn't serialize (it wraps a `VecDeque`
/// with runtime-only truncation constants); the checkpointed shadow stores
/// the same entries and is folded back into a live history on resume.
pub type ConversationHistoryShadow = Vec<crate::model::ConversationEntry>;

impl ReactState {
    pub fn new(session_id: String, user_input: String, max_iterations: usize) -> Self {
        Self {
            session_id,
            user_input,
            history: Vec::new(),
            iteration: 0,
            max_iterations,
            pending_instruction: None,
            pending_risk: None,
            awaiting_approval: false,
            approval_granted: None,
            task_completed: false,
            final_message: String::new(),
            error: None,
        }
    }
}

/// Everything `Engine::new` needs beyond the immutable registry: config,
/// an LLM client, and the on-disk stores. Built once and shared across
/// concurrently running sessions.
pub struct Engine {
    config: Config,
    llm: Arc<dyn LlmClient>,
    workers: WorkerRegistry,
    checkpoints: Arc<dyn CheckpointStore>,
    memory: MemoryStore,
    audit: AuditLog,
    changes: ChangeTracker,
    safety: SafetyPipeline,
    cancellation: CancellationToken,
}

impl Engine {
    pub fn new(config: Config, workers: WorkerRegistry, llm: Arc<dyn LlmClient>) -> Result<Self> {
        let base = crate::config::base_dir();
        let whitelist = match &config.safety.whitelist_path {
            Some(path) => Whitelist::load_from_path(path).map_err(|e| EngineError::Config(e.to_string()))?,
            None => Whitelist::default_rules(),
        };
        let checkpoints: Arc<dyn CheckpointStore> = Arc::new(
            FileCheckpointStore::new(FileCheckpointStore::default_path())
                .map_err(|e| EngineError::Checkpoint(e.to_string()))?,
        );
        let memory = MemoryStore::new(base.join("memory.json"));
        let audit = AuditLog::new(base.join("audit.log")).map_err(|e| EngineError::Other(e))?;
        let changes = ChangeTracker::new(base.join("changes"), config.engine.change_retention_days)
            .map_err(|e| EngineError::Other(e))?;
        let safety = SafetyPipeline::new(whitelist, config.safety.clone());

        Ok(Self {
            config,
            llm,
            workers,
            checkpoints,
            memory,
            audit,
            changes,
            safety,
            cancellation: CancellationToken::new(),
        })
    }

    /// A handle the caller can use to interrupt a running turn, e.g. on
    /// Ctrl-C in the CLI.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    pub async fn run(&self, session_id: String, user_input: String, mode: Mode) -> RunResult {
        let state = ReactState::new(session_id, user_input, self.config.engine.max_iterations);
        self.drive(state, mode).await
    }

    pub async fn resume(&self, session_id: &str, approval_granted: bool, mode: Mode) -> RunResult {
        let loaded = match self.checkpoints.load(session_id) {
            Ok(Some(state)) => state,
            Ok(None) => {
                return RunResult::Failed {
                    session_id: session_id.to_string(),
                    reason: format!("no pending approval for session {session_id}"),
                }
            }
            Err(e) => {
                return RunResult::Failed {
                    session_id: session_id.to_string(),
                    reason: e.to_string(),
                }
            }
        };

        let mut state = loaded;
        state.approval_granted = Some(approval_granted);
        self.drive(state, mode).await
    }

    async fn drive(&self, mut state: ReactState, mode: Mode) -> RunResult {
        let mut history = ConversationHistory::new(self.config.engine.history_capacity);
        for entry in state.history.drain(..) {
            history.push(entry.instruction, entry.result);
        }

        if state.awaiting_approval {
            match state.approval_granted {
                None => {
                    return RunResult::NeedsApproval {
                        session_id: state.session_id.clone(),
                        risk_level: state.pending_risk.unwrap_or(Risk::Medium),
                        reason: "still pending".to_string(),
                    };
                }
                Some(false) => {
                    let _ = self.checkpoints.delete(&state.session_id);
                    return RunResult::Completed {
                        message: "operation cancelled".to_string(),
                        session_id: state.session_id,
                    };
                }
                Some(true) => {
                    let Some(inst) = state.pending_instruction.take() else {
                        return RunResult::Failed {
                            session_id: state.session_id,
                            reason: "no pending instruction to resume".to_string(),
                        };
                    };
                    let risk = state.pending_risk.unwrap_or(Risk::Medium);
                    state.awaiting_approval = false;
                    state.pending_risk = None;

                    match self.execute_instruction(&state.session_id, &inst, risk, &mut history).await {
                        Ok(result) => {
                            if result.task_completed {
                                let _ = self.checkpoints.delete(&state.session_id);
                                return RunResult::Completed {
                                    message: result.message,
                                    session_id: state.session_id,
                                };
                            }
                        }
                        Err(e) => {
                            let _ = self.checkpoints.delete(&state.session_id);
                            return RunResult::Failed {
                                session_id: state.session_id,
                                reason: e.to_string(),
                            };
                        }
                    }
                }
            }
        }

        let result = self.loop_turn(state, history, mode).await;
        result
    }

    async fn loop_turn(&self, mut state: ReactState, mut history: ConversationHistory, mode: Mode) -> RunResult {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(self.config.engine.wall_clock_cap_secs);
        let supports_function_calling = self.config.engine.function_calling_enabled;
        let mut dry_run_observed: HashSet<pipeline::DryRunKey> = HashSet::new();

        while state.iteration < state.max_iterations {
            if self.cancellation.is_cancelled() {
                return self.finish_cancelled(state);
            }
            if tokio::time::Instant::now() >= deadline {
                let _ = self.checkpoints.delete(&state.session_id);
                return RunResult::Completed {
                    message: format!("{} (wall-clock cap reached)", state.final_message),
                    session_id: state.session_id,
                };
            }

            state.iteration += 1;

            let recent_result = history.last().map(|e| &e.result);
            let preprocess: PreprocessResult = preprocessor::preprocess(&state.user_input, recent_result);

            let memory_hits = self.memory.recall("global", &preprocess.resolved_text, 5);
            let builder = PromptBuilder::new(&self.workers);
            let system_prompt = builder.system_prompt();
            let user_prompt = builder.user_prompt(&preprocess, &history, &memory_hits, &state.user_input);

            let messages = vec![Message::system(system_prompt), Message::user(user_prompt)];
            let tools = if supports_function_calling {
                Some(self.workers.to_tool_definitions())
            } else {
                None
            };

            let call = self.llm.chat(messages, tools, ThinkingMode::Enabled);
            let response = match tokio::time::timeout(
                Duration::from_secs(self.config.engine.llm_call_timeout_secs),
                call,
            )
            .await
            {
                Ok(Ok(response)) => response,
                Ok(Err(e)) => {
                    let _ = self.checkpoints.delete(&state.session_id);
                    return RunResult::Failed {
                        session_id: state.session_id,
                        reason: EngineError::LlmTransport { attempts: 1, source: e }.to_string(),
                    };
                }
                Err(_) => {
                    let _ = self.checkpoints.delete(&state.session_id);
                    return RunResult::Failed {
                        session_id: state.session_id,
                        reason: "LLM call timed out".to_string(),
                    };
                }
            };

            let tc: ToolCallResult = match tool_call::extract(&response, supports_function_calling) {
                Ok(tc) => tc,
                Err(e) => {
                    history.push(
                        synthetic_instruction("engine", "parse_error"),
                        crate::model::WorkerResult::failed(format!("instruction invalid: {e}")),
                    );
                    continue;
                }
            };

            if tc.is_final {
                state.final_message = tc.chat_message;
                state.task_completed = true;
                break;
            }

            let inst = Instruction {
                worker: tc.worker,
                action: tc.action,
                args: tc.args,
                risk_level: Risk::Safe,
                dry_run: false,
                thinking: tc.thinking,
            };

            if let Err(e) = validator::validate(&inst, &self.workers) {
                history.push(
                    synthetic_instruction(&inst.worker, &inst.action),
                    crate::model::WorkerResult::failed(format!("instruction invalid: {e}")),
                );
                continue;
            }

            let worker_risk_hint = self
                .workers
                .action_risk_hint(&inst.worker, &inst.action)
                .unwrap_or(Risk::Medium);

            let decision = self.safety.evaluate(&inst, worker_risk_hint, mode, &dry_run_observed);

            match decision {
                SafetyDecision::Reject { reason } => {
                    let _ = self.checkpoints.delete(&state.session_id);
                    return RunResult::Failed {
                        session_id: state.session_id,
                        reason: EngineError::SafetyReject { reason }.to_string(),
                    };
                }
                SafetyDecision::NeedsApproval { risk_level, reason } => {
                    state.pending_instruction = Some(inst);
                    state.pending_risk = Some(risk_level);
                    state.awaiting_approval = true;
                    state.history = history.recent(history.len()).into_iter().cloned().collect();
                    if let Err(e) = self.checkpoints.save(&state) {
                        return RunResult::Failed {
                            session_id: state.session_id,
                            reason: e.to_string(),
                        };
                    }
                    return RunResult::NeedsApproval {
                        session_id: state.session_id,
                        risk_level,
                        reason,
                    };
                }
                SafetyDecision::Allow { risk_level } => {
                    if self.cancellation.is_cancelled() {
                        return self.finish_cancelled(state);
                    }

                    if inst.dry_run {
                        dry_run_observed.insert(pipeline::args_hash_key(&inst));
                    }

                    match self.execute_instruction(&state.session_id, &inst, risk_level, &mut history).await {
                        Ok(result) => {
                            if result.task_completed {
                                state.final_message = result.message;
                                state.task_completed = true;
                                break;
                            }
                        }
                        Err(e) => {
                            let _ = self.checkpoints.delete(&state.session_id);
                            return RunResult::Failed {
                                session_id: state.session_id,
                                reason: e.to_string(),
                            };
                        }
                    }
                }
            }
        }

        let _ = self.checkpoints.delete(&state.session_id);
        if state.task_completed {
            RunResult::Completed {
                message: state.final_message,
                session_id: state.session_id,
            }
        } else {
            RunResult::Completed {
                message: format!(
                    "{} (reached iteration cap of {} without task completion)",
                    if state.final_message.is_empty() {
                        "Task incomplete".to_string()
                    } else {
                        state.final_message.clone()
                    },
                    state.max_iterations
                ),
                session_id: state.session_id,
            }
        }
    }

    async fn execute_instruction(
        &self,
        session_id: &str,
        inst: &Instruction,
        risk_level: Risk,
        history: &mut ConversationHistory,
    ) -> Result<crate::model::WorkerResult> {
        let mut inst = inst.clone();
        inst.risk_level = risk_level;

        if let Some(target) = file_mutation_target(&inst) {
            let kind = file_mutation_kind(&inst.action);
            self.changes
                .record(kind, std::path::Path::new(&target))
                .map_err(EngineError::Other)?;
        } else if inst.worker == "shell" && inst.action == "execute_command" && !inst.dry_run {
            self.changes.record_command().map_err(EngineError::Other)?;
        }

        let result = self
            .workers
            .execute(&inst.worker, &inst.action, &inst.args, inst.dry_run)
            .await
            .map_err(EngineError::Other)?;

        self.audit.record(session_id, &inst, &result);
        history.push(inst, result.clone());
        Ok(result)
    }

    fn finish_cancelled(&self, state: ReactState) -> RunResult {
        let _ = self.checkpoints.delete(&state.session_id);
        RunResult::Failed {
            session_id: state.session_id,
            reason: EngineError::Cancelled.to_string(),
        }
    }
}

fn synthetic_instruction(worker: &str, action: &str) -> Instruction {
    Instruction {
        worker: worker.to_string(),
        action: action.to_string(),
        args: Default::default(),
        risk_level: Risk::Safe,
        dry_run: false,
        thinking: String::new(),
    }
}

fn file_mutation_target(inst: &Instruction) -> Option<String> {
    if inst.worker != "file" {
        return None;
    }
    if !matches!(inst.action.as_str(), "write" | "delete" | "append" | "replace") {
        return None;
    }
    inst.args.get("path").and_then(|v| v.as_str()).map(String::from)
}

fn file_mutation_kind(action: &str) -> ChangeKind {
    match action {
        "write" => ChangeKind::FileWrite,
        "delete" => ChangeKind::FileDelete,
        "append" => ChangeKind::FileAppend,
        "replace" => ChangeKind::FileReplace,
        _ => ChangeKind::Command,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::mock::MockLlmClient;
    use crate::api::types::{ChatResponse, Choice, Message as ApiMessage, Usage};

    fn chat_response(content: &str) -> ChatResponse {
        ChatResponse {
            id: "x".into(),
            object: "chat.completion".into(),
            created: 0,
            model: "m".into(),
            choices: vec![Choice {
                index: 0,
                message: ApiMessage::assistant(content),
                reasoning_content: None,
                finish_reason: Some("stop".into()),
            }],
            usage: Usage {
                prompt_tokens: 0,
                completion_tokens: 0,
                total_tokens: 0,
            },
        }
    }

    fn test_engine(responses: Vec<ChatResponse>) -> Engine {
        let mut config = Config::default();
        config.engine.max_iterations = 3;
        let dir = tempfile::tempdir().unwrap();
        std::env::set_var("HOME", dir.path());
        let workers = WorkerRegistry::new();
        let llm: Arc<dyn LlmClient> = Arc::new(MockLlmClient::with_responses(responses));
        Engine::new(config, workers, llm).unwrap()
    }

    #[tokio::test]
    async fn final_chat_message_completes_immediately() {
        let engine = test_engine(vec![chat_response("all done, nothing to do")]);
        let result = engine.run("s1".to_string(), "say hi".to_string(), Mode::Cli).await;
        match result {
            RunResult::Completed { message, .. } => assert_eq!(message, "all done, nothing to do"),
            other => panic!("expected Completed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unparseable_response_is_non_fatal_and_retries() {
        let engine = test_engine(vec![
            chat_response("not json at all, just chatting but no clear end"),
            chat_response("ok, finished"),
        ]);
        // first response has no JSON object so it's treated as final chat text,
        // ending the turn rather than retrying — verifies plain chat replies
        // terminate cleanly without being misparsed as instructions.
        let result = engine.run("s2".to_string(), "do a thing".to_string(), Mode::Cli).await;
        assert!(matches!(result, RunResult::Completed { .. }));
    }

    #[tokio::test]
    async fn high_risk_instruction_suspends_for_approval() {
        let body = r#"{"worker":"shell","action":"execute_command","args":{"command":"systemctl stop nginx"},"thinking":"stopping nginx"}"#;
        let engine = test_engine(vec![chat_response(body)]);
        let result = engine.run("s3".to_string(), "stop nginx".to_string(), Mode::Cli).await;
        assert!(matches!(result, RunResult::NeedsApproval { .. }));
    }

    #[tokio::test]
    async fn resume_without_checkpoint_fails_cleanly() {
        let engine = test_engine(vec![]);
        let result = engine.resume("no-such-session", true, Mode::Cli).await;
        assert!(matches!(result, RunResult::Failed { .. }));
    }

    #[tokio::test]
    async fn safe_shell_command_executes_and_completes() {
        let body = r#"{"worker":"shell","action":"execute_command","args":{"command":"echo hi"},"thinking":"say hi"}"#;
        let engine = test_engine(vec![chat_response(body), chat_response("done, said hi")]);
        let result = engine.run("s4".to_string(), "say hi via shell".to_string(), Mode::Cli).await;
        assert!(matches!(result, RunResult::Completed { .. }));
    }

    #[tokio::test]
    async fn iteration_cap_reached_is_non_fatal() {
        let body = r#"{"worker":"shell","action":"execute_command","args":{"command":"echo hi"},"thinking":"loop"}"#;
        let engine = test_engine(vec![chat_response(body), chat_response(body), chat_response(body)]);
        let result = engine.run("s5".to_string(), "loop forever".to_string(), Mode::Cli).await;
        match result {
            RunResult::Completed { message, .. } => assert!(message.contains("iteration cap")),
            other => panic!("expected Completed with cap note, got {other:?}"),
        }
    }
}
