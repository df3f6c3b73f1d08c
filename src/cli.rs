//! Minimal CLI surface: wires config → engine → `run`/`resume` and prints
//! the result. The full terminal UI is a separate, out-of-scope consumer
//! of this core — this is just enough to drive it from a shell.

use std::io::{self, Write};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use uuid::Uuid;

use crate::api::ApiClient;
use crate::config::Config;
use crate::engine::Engine;
use crate::errors::error_helper_suggestion;
use crate::model::RunResult;
use crate::safety::pipeline::Mode;
use crate::tools::WorkerRegistry;

#[derive(Parser, Debug)]
#[command(name = "opsai", about = "Natural-language operations automation agent")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Path to a config file (defaults to ./opsai.toml or ~/.config/opsai/config.toml)
    #[arg(long, global = true)]
    pub config: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a single natural-language request to completion (or suspension).
    Run {
        /// The request, e.g. "restart nginx"
        request: String,
        /// Reuse an existing session id instead of generating a new one.
        #[arg(long)]
        session: Option<String>,
    },
    /// Resume a suspended session with an approval verdict.
    Resume {
        session: String,
        #[arg(long)]
        approve: bool,
    },
}

pub async fn run_cli(cli: Cli) -> i32 {
    let config = match Config::load(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("failed to load config: {e}");
            return 1;
        }
    };

    let llm = match ApiClient::new(&config) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            eprintln!("failed to build LLM client: {e}");
            return 2;
        }
    };

    let engine = match Engine::new(config, WorkerRegistry::new(), llm) {
        Ok(e) => e,
        Err(e) => {
            eprintln!("failed to start engine: {e}");
            return 1;
        }
    };

    let token = engine.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            token.cancel();
        }
    });

    match cli.command {
        Command::Run { request, session } => {
            let session_id = session.unwrap_or_else(|| Uuid::new_v4().to_string());
            let result = engine.run(session_id, request, Mode::Cli).await;
            render(result)
        }
        Command::Resume { session, approve } => {
            let result = engine.resume(&session, approve, Mode::Cli).await;
            render(result)
        }
    }
}

fn render(result: RunResult) -> i32 {
    match result {
        RunResult::Completed { message, session_id } => {
            println!("{message}");
            if let Some(hint) = error_helper_suggestion(&message) {
                println!("hint: {hint}");
            }
            let _ = session_id;
            0
        }
        RunResult::NeedsApproval {
            session_id,
            risk_level,
            reason,
        } => {
            println!(
                "Approval required (risk: {}): {reason}\nRun again with: opsai resume {session_id} --approve",
                risk_level.as_str()
            );
            let _ = io::stdout().flush();
            1
        }
        RunResult::Failed { session_id, reason } => {
            eprintln!("error in session {session_id}: {reason}");
            if let Some(hint) = error_helper_suggestion(&reason) {
                eprintln!("hint: {hint}");
            }
            if reason.contains("cancelled") {
                130
            } else if reason.contains("transport") || reason.contains("timed out") {
                2
            } else {
                1
            }
        }
    }
}
