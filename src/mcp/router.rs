// src/mcp/router.rs
// MCP tool router — #[tool] annotated methods

use super::ContextServer;
use super::requests::{InitializeConversationRequest, RetrieveContextRequest};
use super::responses::{self, Json, PingOutput};
use super::tools;

use rmcp::{
    ErrorData,
    handler::server::{tool::IntoCallToolResult, wrapper::Parameters},
    model::CallToolResult,
    tool, tool_router,
};

#[allow(clippy::expect_used)] // schema_for_output on derived JsonSchema types is infallible
#[tool_router(vis = "pub(crate)")]
impl ContextServer {
    #[tool(
        description = "Liveness check; returns immediately.",
        output_schema = rmcp::handler::server::tool::schema_for_output::<PingOutput>()
            .expect("PingOutput schema")
    )]
    async fn ping_server(&self) -> Result<CallToolResult, ErrorData> {
        Json(PingOutput {
            message: "pong".to_string(),
        })
        .into_call_tool_result()
    }

    #[tool(
        description = "Initialize a conversation: project structure, architecture context, recent topics, and optional prefetched snippets for an initial query.",
        output_schema = rmcp::handler::server::tool::schema_for_output::<responses::InitializeConversationOutput>()
            .expect("InitializeConversationOutput schema")
    )]
    async fn initialize_conversation_context(
        &self,
        Parameters(req): Parameters<InitializeConversationRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let output =
            tools::initialize_conversation_context(self, req.conversation_id, req.initial_query)
                .await;
        Json(output).into_call_tool_result()
    }

    #[tool(
        description = "Retrieve a ranked, token-budgeted bundle of context snippets for an agent query: indexed code, documents, conversation history, topics, and git history with one-hop relationship expansion.",
        output_schema = rmcp::handler::server::tool::schema_for_output::<responses::RetrieveContextOutput>()
            .expect("RetrieveContextOutput schema")
    )]
    async fn retrieve_relevant_context(
        &self,
        Parameters(req): Parameters<RetrieveContextRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let output = tools::retrieve_relevant_context(
            self,
            req.query,
            req.conversation_id,
            req.token_budget,
            req.retrieval_parameters,
        )
        .await;
        Json(output).into_call_tool_result()
    }
}
