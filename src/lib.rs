//! opsai - a natural-language operations terminal agent.
//!
//! A ReAct control loop over a small set of typed workers (shell, file, git,
//! http, process, container), gated by a deterministic risk analyzer and an
//! integrated safety pipeline, with checkpointable session state so a
//! suspended-for-approval task can resume exactly where it left off.
//!
//! - **Tools**: typed workers, each exposing a fixed action surface with a
//!   declared risk hint, rather than one-tool-per-action.
//! - **Safety**: deterministic command-risk analysis, policy whitelist,
//!   secret redaction, and dry-run enforcement for high-risk actions.
//! - **Persistence**: checkpointed session state under `~/.opsai/checkpoints`,
//!   an append-only audit log, and a bounded change-tracking store for undo.
//! - **Local-first**: talks to any OpenAI-compatible chat completion endpoint.
//!
//! # Quick Start
//!
//! ```ignore
//! use opsai::config::Config;
//! use opsai::engine::Engine;
//! use opsai::tools::WorkerRegistry;
//!
//! let config = Config::load(None)?;
//! let engine = Engine::new(config, WorkerRegistry::new());
//! let result = engine.run("session-1".to_string(), "check disk usage".to_string(), Mode::Cli).await?;
//! ```

pub mod api;
pub mod audit;
pub mod change_tracker;
pub mod cli;
pub mod config;
pub mod engine;
pub mod errors;
pub mod history;
pub mod memory;
pub mod model;
pub mod preprocessor;
pub mod prompt_builder;
pub mod safety;
pub mod session;
pub mod supervision;
pub mod tools;
pub mod validator;

pub use config::Config;
pub use errors::{EngineError, Result};
