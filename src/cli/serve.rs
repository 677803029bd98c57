// src/cli/serve.rs
// MCP server initialization and main loop

use anyhow::Result;
use devctx::background;
use devctx::config::EnvConfig;
use devctx::db::DatabasePool;
use devctx::llm::EnrichmentClient;
use devctx::mcp::ContextServer;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

/// Shared server components produced by `init_server_context`.
pub(crate) struct ServerContext {
    pub server: ContextServer,
    pub pool: Arc<DatabasePool>,
    pub env_config: EnvConfig,
}

/// Load configuration, validate the project, and open the storage pool.
/// Any error here is a critical startup failure (exit code 1).
pub(crate) async fn init_server_context() -> Result<ServerContext> {
    let env_config = EnvConfig::load();
    env_config.validate()?;

    let db_path = env_config.db_path();
    let pool = Arc::new(DatabasePool::open(&db_path).await?);
    info!("storage ready at {}", db_path.display());

    let server = ContextServer::new(pool.clone(), env_config.max_seed_entities, &env_config.jobs);
    Ok(ServerContext {
        server,
        pool,
        env_config,
    })
}

/// Run the MCP server with stdio transport, plus the background workers.
pub async fn run_mcp_server() -> Result<()> {
    let ctx = init_server_context().await?;
    let pool = ctx.pool;
    let env_config = ctx.env_config;

    // Job manager runs only when an enrichment provider is configured;
    // jobs stay pending otherwise.
    let job_shutdown = match &env_config.ai_api_key {
        Some(key) => {
            let client = Arc::new(EnrichmentClient::new(
                key.clone(),
                env_config.ai_model_name.clone(),
                env_config.ai_thinking_budget,
            ));
            info!("enrichment provider ready (model {})", client.model_name());
            Some(background::spawn_job_manager(
                pool.clone(),
                client,
                env_config.jobs.clone(),
            ))
        }
        None => {
            warn!("no enrichment API key; AI jobs will stay pending");
            None
        }
    };

    // Independent git monitor.
    let (git_shutdown_tx, git_shutdown_rx) = watch::channel(false);
    let _git_monitor = background::git_monitor::spawn(
        pool.clone(),
        env_config.project_path.clone(),
        env_config.git_monitor_interval_ms,
        git_shutdown_rx,
    );

    info!("devctx MCP server listening on stdio");
    let transport = rmcp::transport::io::stdio();
    let service = rmcp::serve_server(ctx.server, transport).await?;

    // Serve until the client disconnects or the process is interrupted;
    // then stop the pollers so in-flight handlers can wind down.
    tokio::select! {
        res = service.waiting() => { res?; }
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received, shutting down");
        }
    }
    if let Some(tx) = job_shutdown {
        let _ = tx.send(true);
    }
    let _ = git_shutdown_tx.send(true);

    Ok(())
}
