// src/mcp/requests.rs
// MCP tool request types

use crate::retrieval::RetrievalParameters;
use rmcp::schemars;
use serde::Deserialize;

#[derive(Debug, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InitializeConversationRequest {
    #[schemars(description = "Conversation to initialize; generated when omitted")]
    pub conversation_id: Option<String>,
    #[schemars(description = "Optional first query to prefetch context for")]
    pub initial_query: Option<String>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RetrieveContextRequest {
    #[schemars(description = "Natural-language agent query")]
    pub query: String,
    #[schemars(description = "Conversation the query belongs to")]
    pub conversation_id: String,
    #[schemars(description = "Upper bound on estimated tokens returned (> 0)")]
    pub token_budget: usize,
    #[schemars(description = "Optional tuning knobs (relationship types, seed count)")]
    pub retrieval_parameters: Option<RetrievalParameters>,
}
