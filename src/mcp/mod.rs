// src/mcp/mod.rs
// MCP server implementation

pub mod requests;
pub mod responses;
mod router;
pub mod tools;

pub use tools::{INITIAL_QUERY_TOKEN_BUDGET, TOPIC_GENERATION_THRESHOLD};

use crate::config::JobConfig;
use crate::db::DatabasePool;
use crate::retrieval::ContextRetriever;
use rmcp::{
    ErrorData, ServerHandler,
    handler::server::{router::tool::ToolRouter, tool::ToolCallContext},
    model::{
        CallToolRequestParams, CallToolResult, ListToolsResult, PaginatedRequestParams,
        ServerCapabilities, ServerInfo,
    },
    service::{RequestContext, RoleServer},
};
use std::sync::Arc;

/// MCP server state shared by all tool calls.
#[derive(Clone)]
pub struct ContextServer {
    pub pool: Arc<DatabasePool>,
    pub retriever: Arc<ContextRetriever>,
    /// Attempt ceiling stamped onto jobs this server enqueues.
    pub job_max_attempts: u32,
    tool_router: ToolRouter<Self>,
}

impl ContextServer {
    pub fn new(pool: Arc<DatabasePool>, max_seed_entities: usize, jobs: &JobConfig) -> Self {
        let retriever = Arc::new(ContextRetriever::new(pool.clone(), max_seed_entities));
        Self {
            pool,
            retriever,
            job_max_attempts: jobs.max_attempts,
            tool_router: Self::tool_router(),
        }
    }
}

impl ServerHandler for ContextServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: Default::default(),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: rmcp::model::Implementation {
                name: "devctx".into(),
                title: Some("devctx - conversation-scoped context retrieval".into()),
                version: env!("CARGO_PKG_VERSION").into(),
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "devctx retrieves ranked, token-budgeted context snippets from the \
                 indexed codebase, project documents, conversation history, and git \
                 history."
                    .into(),
            ),
        }
    }

    fn list_tools(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> impl std::future::Future<Output = Result<ListToolsResult, ErrorData>> + Send + '_ {
        std::future::ready(Ok(ListToolsResult {
            tools: self.tool_router.list_all(),
            next_cursor: None,
            meta: None,
        }))
    }

    #[allow(clippy::manual_async_fn)]
    fn call_tool(
        &self,
        request: CallToolRequestParams,
        context: RequestContext<RoleServer>,
    ) -> impl std::future::Future<Output = Result<CallToolResult, ErrorData>> + Send + '_ {
        async move {
            let ctx = ToolCallContext::new(self, request, context);
            self.tool_router.call(ctx).await
        }
    }
}
