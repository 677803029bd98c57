// src/cli/tool.rs
// One-shot tool invocation from the command line

use super::serve::init_server_context;
use anyhow::{Result, bail};
use devctx::mcp::requests::{InitializeConversationRequest, RetrieveContextRequest};
use devctx::mcp::tools;

/// Run a single tool and print its structured output as JSON.
pub async fn run_tool(name: String, args: Option<String>) -> Result<()> {
    let raw_args = args.unwrap_or_else(|| "{}".to_string());

    match name.as_str() {
        "ping_server" => {
            println!("{}", serde_json::json!({ "message": "pong" }));
        }
        "initialize_conversation_context" => {
            let req: InitializeConversationRequest = serde_json::from_str(&raw_args)?;
            let ctx = init_server_context().await?;
            let output = tools::initialize_conversation_context(
                &ctx.server,
                req.conversation_id,
                req.initial_query,
            )
            .await;
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        "retrieve_relevant_context" => {
            let req: RetrieveContextRequest = serde_json::from_str(&raw_args)?;
            let ctx = init_server_context().await?;
            let output = tools::retrieve_relevant_context(
                &ctx.server,
                req.query,
                req.conversation_id,
                req.token_budget,
                req.retrieval_parameters,
            )
            .await;
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        other => bail!(
            "unknown tool '{other}'; expected ping_server, \
             initialize_conversation_context, or retrieve_relevant_context"
        ),
    }
    Ok(())
}
