// src/main.rs
// devctx - conversation-scoped context retrieval for coding agents

mod cli;

use clap::Parser;
use cli::{Cli, Commands};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() {
    // Load .env from ~/.devctx/.env only (never from CWD - a malicious repo
    // could override API keys)
    if let Some(home) = dirs::home_dir()
        && let Err(e) = dotenvy::from_path(home.join(".devctx/.env"))
    {
        tracing::debug!("Failed to load global .env file: {}", e);
    }

    let cli = Cli::parse();

    // stderr logging; MCP owns stdout, so serve stays quiet by default
    let default_level = match &cli.command {
        None | Some(Commands::Serve) => Level::WARN,
        Some(Commands::Tool { .. }) => Level::WARN,
    };
    let level = match std::env::var("LOG_LEVEL").ok().as_deref() {
        Some("debug") => Level::DEBUG,
        Some("info") => Level::INFO,
        Some("warn") => Level::WARN,
        Some("error") => Level::ERROR,
        _ => default_level,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    let result = match cli.command {
        None | Some(Commands::Serve) => cli::run_mcp_server().await,
        Some(Commands::Tool { name, args }) => cli::run_tool(name, args).await,
    };

    // Critical startup failures and uncaught fatals exit with code 1.
    if let Err(e) = result {
        eprintln!("[devctx] fatal: {e:#}");
        std::process::exit(1);
    }
}
