// src/mcp/responses.rs
// Structured output types for MCP tools
//
// Each tool returns a wrapper carrying a human-readable `message` plus the
// typed payload; `Json<T>` preserves the message in MCP content while rmcp
// infers the output schema from T.

use crate::retrieval::{CandidateSnippet, RetrievalSummary};
use rmcp::ErrorData;
use rmcp::handler::server::tool::IntoCallToolResult;
use rmcp::model::{CallToolResult, Content};
use schemars::JsonSchema;
use serde::Serialize;
use std::borrow::Cow;

/// Trait for outputs that expose a human-readable message.
pub trait HasMessage {
    fn message(&self) -> &str;
}

/// JSON wrapper that keeps the `message` as MCP text content.
pub struct Json<T>(pub T);

impl<T: JsonSchema> JsonSchema for Json<T> {
    fn schema_name() -> Cow<'static, str> {
        T::schema_name()
    }

    fn json_schema(generator: &mut schemars::SchemaGenerator) -> schemars::Schema {
        T::json_schema(generator)
    }
}

impl<T: Serialize + JsonSchema + HasMessage + 'static> IntoCallToolResult for Json<T> {
    fn into_call_tool_result(self) -> Result<CallToolResult, ErrorData> {
        let message = self.0.message().to_string();
        let value = serde_json::to_value(&self.0).map_err(|e| {
            ErrorData::internal_error(format!("Failed to serialize structured content: {}", e), None)
        })?;

        Ok(CallToolResult {
            content: vec![Content::text(message)],
            structured_content: Some(value),
            is_error: Some(false),
            meta: None,
        })
    }
}

// ============================================================================
// ping_server
// ============================================================================

#[derive(Debug, Serialize, JsonSchema)]
pub struct PingOutput {
    pub message: String,
}

impl HasMessage for PingOutput {
    fn message(&self) -> &str {
        &self.message
    }
}

// ============================================================================
// initialize_conversation_context
// ============================================================================

#[derive(Debug, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InitializeConversationOutput {
    pub message: String,
    pub conversation_id: String,
    pub project_structure_summary: String,
    pub architecture_context_summary: String,
    pub recent_conversation_topics_summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial_query_context_snippets: Option<Vec<CandidateSnippet>>,
}

impl HasMessage for InitializeConversationOutput {
    fn message(&self) -> &str {
        &self.message
    }
}

// ============================================================================
// retrieve_relevant_context
// ============================================================================

/// Structured error object surfaced when the orchestrator itself fails.
#[derive(Debug, Serialize, JsonSchema)]
pub struct RetrievalError {
    pub code: i32,
    pub message: String,
    pub data: RetrievalErrorData,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct RetrievalErrorData {
    pub details: String,
}

impl RetrievalError {
    pub fn internal(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            code: -32000,
            message: message.into(),
            data: RetrievalErrorData {
                details: details.into(),
            },
        }
    }
}

#[derive(Debug, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RetrieveContextOutput {
    pub message: String,
    pub context_snippets: Vec<CandidateSnippet>,
    pub retrieval_summary: RetrievalSummary,
    pub processed_ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RetrievalError>,
}

impl HasMessage for RetrieveContextOutput {
    fn message(&self) -> &str {
        &self.message
    }
}
