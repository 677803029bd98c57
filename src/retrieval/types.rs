// src/retrieval/types.rs
// The uniform candidate model shared by every retrieval stage

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Where a candidate snippet came from.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SourceType {
    CodeEntityFts,
    CodeEntityKeyword,
    ProjectDocumentFts,
    ProjectDocumentKeyword,
    ConversationMessage,
    ConversationTopic,
    GitCommit,
    GitCommitFileChange,
    CodeEntityRelated,
}

impl SourceType {
    /// Sources whose snippets are prose and eligible for text truncation.
    pub fn is_text_based(self) -> bool {
        matches!(
            self,
            SourceType::ProjectDocumentFts
                | SourceType::ProjectDocumentKeyword
                | SourceType::ConversationMessage
                | SourceType::ConversationTopic
                | SourceType::GitCommit
                | SourceType::GitCommitFileChange
        )
    }

    /// Sources whose snippets are code and eligible for structural truncation.
    pub fn is_code(self) -> bool {
        matches!(
            self,
            SourceType::CodeEntityFts | SourceType::CodeEntityKeyword | SourceType::CodeEntityRelated
        )
    }

    /// Whether the snippet identifies a code entity (shares the entity
    /// merge-key namespace).
    pub fn is_code_entity(self) -> bool {
        self.is_code()
    }
}

/// Enrichment status carried by code entities and documents.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AiStatus {
    Pending,
    InProgress,
    Completed,
    FailedAi,
    NotNeeded,
    RateLimited,
}

/// Direction of a relationship relative to the seed entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipDirection {
    Incoming,
    Outgoing,
}

/// How a related-entity snippet connects to its seed.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RelationshipContext {
    pub related_to_seed_entity_id: String,
    pub relationship_type: String,
    pub direction: RelationshipDirection,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_metadata: Option<serde_json::Value>,
}

/// Uniform internal record proposed for inclusion in the final context.
///
/// Created by candidate generation and relationship expansion, scored by
/// the ranker, admitted or truncated by the compressor. Lives only for one
/// retrieval call.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CandidateSnippet {
    /// Stable identifier from the source (entity id, document id, message
    /// id, topic id, commit hash, or "hash:path" for file changes).
    pub id: String,
    pub source_type: SourceType,
    /// The text that will be presented; never empty after generation.
    pub content_snippet: String,
    /// Per-source score in [0, 1].
    pub initial_score: f64,
    /// Consolidated score in [0, 2]; absent until ranking.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consolidated_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_status: Option<AiStatus>,
    /// RFC 3339 timestamp of the underlying record, when it has one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    /// Free-form per-source descriptors (role, commit author, truncation
    /// markers, structural positions).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relationship_context: Option<RelationshipContext>,
}

impl CandidateSnippet {
    /// Minimal constructor; optional descriptors start empty.
    pub fn new(id: impl Into<String>, source_type: SourceType, content: impl Into<String>, score: f64) -> Self {
        Self {
            id: id.into(),
            source_type,
            content_snippet: content.into(),
            initial_score: score.clamp(0.0, 1.0),
            consolidated_score: None,
            file_path: None,
            entity_name: None,
            entity_type: None,
            language: None,
            ai_status: None,
            timestamp: None,
            metadata: None,
            relationship_context: None,
        }
    }

    /// Merge-map key: code entities share one namespace regardless of which
    /// source produced them, everything else is namespaced by source type.
    pub fn merge_key(&self) -> String {
        if self.source_type.is_code_entity() {
            format!("entity_{}", self.id)
        } else {
            format!("{}_{}", self.source_type, self.id)
        }
    }

    /// Whether the content is raw (not an AI summary). Raw snippets are the
    /// only ones the compressor may truncate.
    pub fn is_raw(&self) -> bool {
        self.ai_status != Some(AiStatus::Completed)
    }

    /// Set a metadata field, creating the bag on first use.
    pub fn set_metadata(&mut self, key: &str, value: serde_json::Value) {
        match self.metadata {
            Some(serde_json::Value::Object(ref mut map)) => {
                map.insert(key.to_string(), value);
            }
            _ => {
                let mut map = serde_json::Map::new();
                map.insert(key.to_string(), value);
                self.metadata = Some(serde_json::Value::Object(map));
            }
        }
    }

    /// Read a metadata field.
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.as_ref()?.get(key)?.as_str()
    }
}

/// Accounting for one retrieval call, returned alongside the snippets.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RetrievalSummary {
    pub snippets_found_before_compression: usize,
    pub estimated_tokens_in: usize,
    pub snippets_returned_after_compression: usize,
    pub estimated_tokens_out: usize,
    pub token_budget_given: usize,
    pub token_budget_remaining: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Caller-tunable knobs accepted by the retrieval tool.
#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RetrievalParameters {
    /// Relationship-type whitelist for expansion; defaults apply when empty.
    #[serde(default)]
    pub relationship_types: Option<Vec<String>>,
    /// Override for the number of expansion seeds.
    #[serde(default)]
    pub max_seed_entities: Option<usize>,
}
