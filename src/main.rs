//! opsai binary entry point: parses args, initializes tracing, and hands
//! off to the CLI surface.

use clap::Parser;
use opsai::cli::{run_cli, Cli};

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();
    let code = run_cli(cli).await;
    std::process::exit(code);
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("opsai=info"));
    fmt().with_env_filter(filter).with_target(false).init();
}
