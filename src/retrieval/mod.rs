// src/retrieval/mod.rs
// Retrieval orchestrator: tokenize -> generate -> expand -> merge ->
// rank -> compress

pub mod candidates;
pub mod compress;
pub mod expand;
pub mod rank;
pub mod tokenize;
pub mod types;

pub use compress::estimate_tokens;
pub use tokenize::tokenize_query;
pub use types::{
    AiStatus, CandidateSnippet, RelationshipContext, RelationshipDirection, RetrievalParameters,
    RetrievalSummary, SourceType,
};

use crate::db::DatabasePool;
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Outcome of one retrieval call.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RetrievalResult {
    pub context_snippets: Vec<CandidateSnippet>,
    pub retrieval_summary: RetrievalSummary,
}

/// The retrieval pipeline, wired to a storage pool.
///
/// Every stage degrades to empty output rather than failing the call:
/// an empty store yields an empty snippet list and a zeroed summary.
pub struct ContextRetriever {
    pool: Arc<DatabasePool>,
    max_seed_entities: usize,
    recency: rank::RecencyParams,
}

impl ContextRetriever {
    pub fn new(pool: Arc<DatabasePool>, max_seed_entities: usize) -> Self {
        Self {
            pool,
            max_seed_entities,
            recency: rank::RecencyParams::default(),
        }
    }

    /// Run the full pipeline against the current clock.
    pub async fn retrieve(
        &self,
        raw_query: &str,
        conversation_id: &str,
        token_budget: usize,
        parameters: &RetrievalParameters,
    ) -> RetrievalResult {
        self.retrieve_at(raw_query, conversation_id, token_budget, parameters, Utc::now())
            .await
    }

    /// Run the full pipeline with an explicit `now` (scoring is a pure
    /// function of the inputs and the clock).
    pub async fn retrieve_at(
        &self,
        raw_query: &str,
        conversation_id: &str,
        token_budget: usize,
        parameters: &RetrievalParameters,
        now: DateTime<Utc>,
    ) -> RetrievalResult {
        let query = tokenize::tokenize_query(raw_query);

        let candidates =
            candidates::generate_candidates(&self.pool, &query, raw_query, conversation_id, now)
                .await;
        tracing::debug!(
            count = candidates.len(),
            git_intent = query.git_intent,
            "candidate generation complete"
        );

        let max_seeds = parameters.max_seed_entities.unwrap_or(self.max_seed_entities);
        let related = expand::expand_relationships(
            &self.pool,
            &candidates,
            &query.search_terms,
            max_seeds,
            parameters.relationship_types.as_deref(),
        )
        .await;

        let mut merged = expand::merge_related_candidates(candidates, related);
        rank::rank_candidates(&mut merged, &self.recency, now);

        let (context_snippets, retrieval_summary) =
            compress::compress_candidates(merged, token_budget);

        RetrievalResult {
            context_snippets,
            retrieval_summary,
        }
    }

    pub fn pool(&self) -> &Arc<DatabasePool> {
        &self.pool
    }
}
