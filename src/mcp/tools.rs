// src/mcp/tools.rs
// Tool implementations behind the MCP surface

use super::ContextServer;
use super::responses::{
    InitializeConversationOutput, RetrievalError, RetrieveContextOutput,
};
use crate::db::{self, TargetEntityType, TaskType};
use crate::retrieval::RetrievalParameters;

/// Messages a conversation accumulates before a topic-generation job is
/// enqueued on its behalf.
pub const TOPIC_GENERATION_THRESHOLD: i64 = 10;

/// Budget used when initialization prefetches context for the first query.
pub const INITIAL_QUERY_TOKEN_BUDGET: usize = 2000;

/// Topics folded into the initialization summary.
const RECENT_TOPIC_LIMIT: usize = 5;

/// Document summaries folded into the architecture section.
const ARCHITECTURE_DOC_LIMIT: usize = 3;

/// Assemble the conversation bootstrap bundle: storage aggregates plus an
/// optional small-budget retrieval for the first query.
pub async fn initialize_conversation_context(
    server: &ContextServer,
    conversation_id: Option<String>,
    initial_query: Option<String>,
) -> InitializeConversationOutput {
    let conversation_id = conversation_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let project_structure_summary = project_structure_summary(server).await;
    let architecture_context_summary = architecture_summary(server).await;
    let recent_conversation_topics_summary =
        recent_topics_summary(server, &conversation_id).await;

    let initial_query_context_snippets = match initial_query.as_deref() {
        Some(query) if !query.trim().is_empty() => {
            let result = server
                .retriever
                .retrieve(
                    query,
                    &conversation_id,
                    INITIAL_QUERY_TOKEN_BUDGET,
                    &RetrievalParameters::default(),
                )
                .await;
            Some(result.context_snippets)
        }
        _ => None,
    };

    let message = format!(
        "Conversation {} initialized{}",
        conversation_id,
        match &initial_query_context_snippets {
            Some(snippets) => format!(" with {} prefetched snippets", snippets.len()),
            None => String::new(),
        }
    );

    InitializeConversationOutput {
        message,
        conversation_id,
        project_structure_summary,
        architecture_context_summary,
        recent_conversation_topics_summary,
        initial_query_context_snippets,
    }
}

/// Run the retrieval pipeline for one agent query. Never returns an MCP
/// error: internal failures are folded into the structured error object.
pub async fn retrieve_relevant_context(
    server: &ContextServer,
    query: String,
    conversation_id: String,
    token_budget: usize,
    retrieval_parameters: Option<RetrievalParameters>,
) -> RetrieveContextOutput {
    if token_budget == 0 {
        return error_output(
            "tokenBudget must be greater than zero",
            format!("tokenBudget = {token_budget}"),
        );
    }
    if conversation_id.trim().is_empty() {
        return error_output("conversationId must not be empty", "empty conversationId");
    }

    // Record the agent query so conversation-history search has data.
    record_agent_message(server, &conversation_id, &query).await;
    maybe_enqueue_topic_generation(server, &conversation_id).await;

    let parameters = retrieval_parameters.unwrap_or_default();
    let result = server
        .retriever
        .retrieve(&query, &conversation_id, token_budget, &parameters)
        .await;

    let message = format!(
        "{} snippets (~{} of {} tokens)",
        result.context_snippets.len(),
        result.retrieval_summary.estimated_tokens_out,
        token_budget
    );
    RetrieveContextOutput {
        message,
        context_snippets: result.context_snippets,
        retrieval_summary: result.retrieval_summary,
        processed_ok: true,
        error: None,
    }
}

fn error_output(message: &str, details: impl Into<String>) -> RetrieveContextOutput {
    RetrieveContextOutput {
        message: message.to_string(),
        context_snippets: Vec::new(),
        retrieval_summary: Default::default(),
        processed_ok: false,
        error: Some(RetrievalError::internal(message, details)),
    }
}

/// Best-effort append of the query to the conversation log.
async fn record_agent_message(server: &ContextServer, conversation_id: &str, query: &str) {
    let conversation = conversation_id.to_string();
    let content = query.to_string();
    server
        .pool
        .try_interact("record agent message", move |conn| {
            db::insert_message_sync(conn, &conversation, "agent", &content)?;
            Ok(())
        })
        .await;
}

/// Enqueue a generate_topics job once the conversation is long enough and
/// none is already open. Best-effort.
async fn maybe_enqueue_topic_generation(server: &ContextServer, conversation_id: &str) {
    let conversation = conversation_id.to_string();
    let max_attempts = server.job_max_attempts;
    server
        .pool
        .try_interact("topic generation trigger", move |conn| {
            let count = db::count_messages_sync(conn, &conversation)?;
            if count < TOPIC_GENERATION_THRESHOLD {
                return Ok(());
            }
            if db::has_open_job_for_target_sync(conn, &conversation, TaskType::GenerateTopics)? {
                return Ok(());
            }
            let job_id = db::enqueue_job_sync(
                conn,
                &conversation,
                TargetEntityType::Conversation,
                TaskType::GenerateTopics,
                max_attempts,
                None,
            )?;
            tracing::debug!(job = %job_id, conversation = %conversation, "enqueued topic generation");
            Ok(())
        })
        .await;
}

// ============================================================================
// Initialization summaries
// ============================================================================

async fn project_structure_summary(server: &ContextServer) -> String {
    let stats = server
        .pool
        .try_interact("project structure summary", |conn| {
            let (entity_count, languages) = db::entity_stats_sync(conn)?;
            let document_count = db::document_count_sync(conn)?;
            let top_paths = db::top_level_paths_sync(conn, 8)?;
            Ok((entity_count, languages, document_count, top_paths))
        })
        .await;

    match stats {
        Some((0, _, 0, _)) => "The project index is empty; nothing has been ingested yet.".into(),
        Some((entities, languages, documents, top_paths)) => {
            let language_list = if languages.is_empty() {
                "unknown languages".to_string()
            } else {
                languages
                    .iter()
                    .map(|(lang, n)| format!("{lang} ({n})"))
                    .collect::<Vec<_>>()
                    .join(", ")
            };
            let mut summary = format!(
                "{entities} indexed code entities across {language_list}; {documents} project documents."
            );
            if !top_paths.is_empty() {
                summary.push_str(&format!(" Main areas: {}.", top_paths.join(", ")));
            }
            summary
        }
        None => "Project structure is unavailable.".into(),
    }
}

async fn architecture_summary(server: &ContextServer) -> String {
    let docs = server
        .pool
        .try_interact("architecture summary", |conn| {
            let tagged =
                db::recent_completed_summaries_sync(conn, Some("architecture"), ARCHITECTURE_DOC_LIMIT)?;
            if !tagged.is_empty() {
                return Ok(tagged);
            }
            db::recent_completed_summaries_sync(conn, None, ARCHITECTURE_DOC_LIMIT)
                .map_err(Into::into)
        })
        .await
        .unwrap_or_default();

    if docs.is_empty() {
        return "No architecture context has been distilled yet.".into();
    }
    docs.iter()
        .map(|(path, summary)| format!("{path}: {summary}"))
        .collect::<Vec<_>>()
        .join("\n")
}

async fn recent_topics_summary(server: &ContextServer, conversation_id: &str) -> String {
    let conversation = conversation_id.to_string();
    let topics = server
        .pool
        .try_interact("recent topics summary", move |conn| {
            db::topics_for_conversation_sync(conn, &conversation, RECENT_TOPIC_LIMIT)
                .map_err(Into::into)
        })
        .await
        .unwrap_or_default();

    if topics.is_empty() {
        return "No topics recorded for this conversation yet.".into();
    }
    topics
        .iter()
        .map(|t| format!("- {}", t.summary))
        .collect::<Vec<_>>()
        .join("\n")
}
