use std::path::PathBuf;
use thiserror::Error;

/// The central error type for the engine.
///
/// Maps onto the error taxonomy: each fatal-to-the-turn condition gets a
/// variant here. `NeedsApproval` and `WorkerFailure` are deliberately absent —
/// they are not errors, they are control-flow branches of `RunResult` and
/// observations fed back into the loop, respectively.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("instruction invalid: {reason} (at {path})")]
    InvalidInstruction { path: String, reason: String },

    #[error("safety rejected: {reason}")]
    SafetyReject { reason: String },

    #[error("LLM transport failed after {attempts} attempts: {source}")]
    LlmTransport {
        attempts: u32,
        #[source]
        source: anyhow::Error,
    },

    #[error("operation cancelled")]
    Cancelled,

    #[error("iteration cap reached ({limit}) without task completion")]
    IterationCapReached { limit: usize },

    #[error("could not parse model response: {0}")]
    Parse(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("checkpoint error: {0}")]
    Checkpoint(String),

    #[error("memory store error: {0}")]
    Memory(String),

    #[error("unknown session: {0}")]
    UnknownSession(String),

    #[error("no pending approval for session {0}")]
    NoPendingApproval(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;

impl EngineError {
    /// Stable exit code contract consumed by the CLI embedder: 0 success
    /// (handled at the call site, not here), 1 validation/safety reject,
    /// 2 LLM transport failure, 130 cancellation.
    pub fn exit_code(&self) -> i32 {
        match self {
            EngineError::InvalidInstruction { .. } | EngineError::SafetyReject { .. } => 1,
            EngineError::LlmTransport { .. } => 2,
            EngineError::Cancelled => 130,
            _ => 1,
        }
    }
}

/// Transport-level failures from the LLM Client, wrapped into
/// [`EngineError::LlmTransport`] at the call site.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("http status {status}: {message}")]
    HttpStatus { status: u16, message: String },
    #[error("network error: {0}")]
    Network(String),
}

/// Checkpoint/session persistence errors, wrapped into [`EngineError::Checkpoint`].
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("failed to save checkpoint: {0}")]
    Save(String),
    #[error("failed to load checkpoint: {0}")]
    Load(String),
    #[error("storage error at {path}: {message}")]
    Storage { path: PathBuf, message: String },
}

impl From<SessionError> for EngineError {
    fn from(e: SessionError) -> Self {
        EngineError::Checkpoint(e.to_string())
    }
}

/// A static pattern -> suggestion lookup applied to a failed turn's final
/// message (§4.15 Error Helper). Returns `None` when no known pattern matches.
pub fn error_helper_suggestion(message: &str) -> Option<&'static str> {
    let lower = message.to_lowercase();
    let table: &[(&str, &str)] = &[
        (
            "address already in use",
            "check which process holds the port (e.g. `lsof -i :<port>`)",
        ),
        (
            "port in use",
            "check which process holds the port (e.g. `lsof -i :<port>`)",
        ),
        (
            "permission denied",
            "check file permissions or retry with elevated privileges",
        ),
        (
            "docker daemon not running",
            "start the docker daemon",
        ),
        (
            "no such file or directory",
            "confirm the path exists",
        ),
        (
            "connection refused",
            "confirm the target service is running and reachable",
        ),
    ];
    table
        .iter()
        .find(|(pattern, _)| lower.contains(pattern))
        .map(|(_, suggestion)| *suggestion)
}
