// src/llm/mod.rs
// Enrichment provider: summaries, keywords, and conversation topics

mod client;
mod prompt;

pub use client::EnrichmentClient;
pub use prompt::{entity_enrichment_prompt, topics_prompt};

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

/// Errors surfaced by the enrichment provider. The job manager maps these
/// onto job statuses, so rate limits must stay distinguishable.
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("rate limited by provider")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("provider error: {0}")]
    Provider(String),
}

/// Summary plus weighted keywords for one entity or document.
#[derive(Debug, Clone, Deserialize)]
pub struct Enrichment {
    pub summary: String,
    #[serde(default)]
    pub keywords: Vec<WeightedKeyword>,
}

/// A keyword with its relevance weight (1.0 when the model omits one).
#[derive(Debug, Clone)]
pub struct WeightedKeyword {
    pub term: String,
    pub weight: f64,
}

// Accept both bare strings and {term, weight} objects from the model.
impl<'de> Deserialize<'de> for WeightedKeyword {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Term(String),
            Weighted { term: String, weight: f64 },
        }
        Ok(match Raw::deserialize(deserializer)? {
            Raw::Term(term) => WeightedKeyword { term, weight: 1.0 },
            Raw::Weighted { term, weight } => WeightedKeyword { term, weight },
        })
    }
}

/// One generated conversation topic.
#[derive(Debug, Clone, Deserialize)]
pub struct GeneratedTopic {
    pub summary: String,
    #[serde(default)]
    pub keywords: Vec<String>,
}

/// Seam between job handlers and the external model. The production
/// implementation is [`EnrichmentClient`]; tests substitute mocks.
#[async_trait]
pub trait EnrichmentProvider: Send + Sync {
    /// Summarize a code entity or document and extract keywords.
    async fn enrich_summary_keywords(
        &self,
        name: &str,
        file_path: &str,
        content: &str,
    ) -> Result<Enrichment, LlmError>;

    /// Distill a conversation transcript into topics.
    async fn generate_topics(&self, transcript: &str) -> Result<Vec<GeneratedTopic>, LlmError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weighted_keyword_accepts_both_shapes() {
        let parsed: Vec<WeightedKeyword> =
            serde_json::from_str(r#"["auth", {"term": "token", "weight": 3.5}]"#).expect("parse");
        assert_eq!(parsed[0].term, "auth");
        assert_eq!(parsed[0].weight, 1.0);
        assert_eq!(parsed[1].term, "token");
        assert_eq!(parsed[1].weight, 3.5);
    }

    #[test]
    fn test_enrichment_keywords_default_empty() {
        let parsed: Enrichment =
            serde_json::from_str(r#"{"summary": "Does things."}"#).expect("parse");
        assert_eq!(parsed.summary, "Does things.");
        assert!(parsed.keywords.is_empty());
    }
}
