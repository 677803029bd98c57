// src/retrieval/rank.rs
// Consolidated ranking: source weight x AI-status weight x relationship
// factors + recency boost, clamped to [0, 2]

use crate::retrieval::candidates::parse_timestamp;
use crate::retrieval::types::{AiStatus, CandidateSnippet, SourceType};
use chrono::{DateTime, Utc};

/// Per-source weight table.
pub fn source_weight(source_type: SourceType) -> f64 {
    match source_type {
        SourceType::CodeEntityFts => 1.0,
        SourceType::CodeEntityKeyword => 0.9,
        SourceType::ProjectDocumentFts => 0.8,
        SourceType::ProjectDocumentKeyword => 0.7,
        SourceType::ConversationTopic => 0.7,
        SourceType::ConversationMessage => 0.6,
        SourceType::GitCommit => 0.5,
        SourceType::GitCommitFileChange => 0.5,
        SourceType::CodeEntityRelated => 0.85,
    }
}

/// Enrichment-status weight: completed summaries outrank raw content,
/// failed enrichment is slightly penalized.
pub fn ai_status_weight(status: AiStatus) -> f64 {
    match status {
        AiStatus::Completed => 1.2,
        AiStatus::Pending | AiStatus::InProgress | AiStatus::NotNeeded => 1.0,
        AiStatus::FailedAi => 0.8,
        AiStatus::RateLimited => 1.0,
    }
}

/// Relationship-type weight; unknown types are neutral.
pub fn relationship_weight(relationship_type: &str) -> f64 {
    match relationship_type {
        "CALLS_FUNCTION" | "CALLS_METHOD" => 1.1,
        "IMPLEMENTS_INTERFACE" | "EXTENDS_CLASS" => 1.2,
        "IMPORTS_FROM" | "REQUIRES_MODULE" => 0.9,
        "ACCESSES_PROPERTY" | "USES_VARIABLE" => 0.8,
        "USES_TYPE" => 1.0,
        "DEFINES_TYPE" => 1.1,
        "REFERENCES" => 0.7,
        "MENTIONS" => 0.6,
        _ => 1.0,
    }
}

/// Structural relationships get an extra flat bonus on top of the
/// relationship boost.
fn is_structural_relationship(relationship_type: &str) -> bool {
    matches!(
        relationship_type,
        "CALLS_FUNCTION" | "CALLS_METHOD" | "IMPLEMENTS_INTERFACE" | "EXTENDS_CLASS"
    )
}

/// Recency boost parameters; immutable after startup.
#[derive(Debug, Clone, Copy)]
pub struct RecencyParams {
    pub max_boost: f64,
    pub decay_rate_hours: f64,
    pub min_age_for_decay_hours: f64,
    pub max_age_for_boost_hours: f64,
}

impl Default for RecencyParams {
    fn default() -> Self {
        Self {
            max_boost: 0.2,
            decay_rate_hours: 24.0,
            min_age_for_decay_hours: 1.0,
            max_age_for_boost_hours: 168.0,
        }
    }
}

impl RecencyParams {
    /// Boost for an item of the given age: full inside the fresh window,
    /// exponential decay after, nothing past the cutoff.
    pub fn boost(&self, age_hours: f64) -> f64 {
        if age_hours > self.max_age_for_boost_hours {
            0.0
        } else if age_hours <= self.min_age_for_decay_hours {
            self.max_boost
        } else {
            self.max_boost * (-age_hours / self.decay_rate_hours).exp()
        }
    }
}

/// Compute the consolidated score for a single candidate. Pure given the
/// candidate, weights, and `now`.
pub fn consolidated_score(
    snippet: &CandidateSnippet,
    recency: &RecencyParams,
    now: DateTime<Utc>,
) -> f64 {
    let mut score = snippet.initial_score * source_weight(snippet.source_type);

    if let Some(status) = snippet.ai_status {
        score *= ai_status_weight(status);
    }

    if let Some(ctx) = &snippet.relationship_context {
        score *= relationship_weight(&ctx.relationship_type);
        score += 0.1;
        if is_structural_relationship(&ctx.relationship_type) {
            score += 0.05;
        }
    }

    if let Some(age_hours) = item_age_hours(snippet, now) {
        score += recency.boost(age_hours);
    }

    score.clamp(0.0, 2.0)
}

/// Age in hours from the snippet's own timestamp, or its metadata
/// timestamp/commitDate, whichever is present first.
fn item_age_hours(snippet: &CandidateSnippet, now: DateTime<Utc>) -> Option<f64> {
    let raw = snippet
        .timestamp
        .as_deref()
        .or_else(|| snippet.metadata_str("timestamp"))
        .or_else(|| snippet.metadata_str("commitDate"))?;
    let ts = parse_timestamp(raw)?;
    Some(((now - ts).num_seconds().max(0) as f64) / 3600.0)
}

/// Score every candidate and sort descending. The sort is stable, so
/// candidates with equal scores keep their emission order.
pub fn rank_candidates(
    candidates: &mut [CandidateSnippet],
    recency: &RecencyParams,
    now: DateTime<Utc>,
) {
    for snippet in candidates.iter_mut() {
        snippet.consolidated_score = Some(consolidated_score(snippet, recency, now));
    }
    candidates.sort_by(|a, b| {
        b.consolidated_score
            .unwrap_or(0.0)
            .partial_cmp(&a.consolidated_score.unwrap_or(0.0))
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::types::{RelationshipContext, RelationshipDirection};

    fn snippet(source: SourceType, score: f64) -> CandidateSnippet {
        CandidateSnippet::new("s", source, "content", score)
    }

    fn related_context(relationship_type: &str) -> RelationshipContext {
        RelationshipContext {
            related_to_seed_entity_id: "seed".to_string(),
            relationship_type: relationship_type.to_string(),
            direction: RelationshipDirection::Outgoing,
            custom_metadata: None,
        }
    }

    // ========================================================================
    // Weight tables
    // ========================================================================

    #[test]
    fn test_source_weights_match_table() {
        assert_eq!(source_weight(SourceType::CodeEntityFts), 1.0);
        assert_eq!(source_weight(SourceType::CodeEntityKeyword), 0.9);
        assert_eq!(source_weight(SourceType::GitCommit), 0.5);
        assert_eq!(source_weight(SourceType::CodeEntityRelated), 0.85);
    }

    #[test]
    fn test_ai_status_weights() {
        assert_eq!(ai_status_weight(AiStatus::Completed), 1.2);
        assert_eq!(ai_status_weight(AiStatus::Pending), 1.0);
        assert_eq!(ai_status_weight(AiStatus::FailedAi), 0.8);
    }

    #[test]
    fn test_relationship_weight_default() {
        assert_eq!(relationship_weight("CALLS_FUNCTION"), 1.1);
        assert_eq!(relationship_weight("MENTIONS"), 0.6);
        assert_eq!(relationship_weight("SOMETHING_NEW"), 1.0);
    }

    // ========================================================================
    // Recency boost
    // ========================================================================

    #[test]
    fn test_recency_boost_regions() {
        let params = RecencyParams::default();
        assert_eq!(params.boost(0.5), 0.2);
        assert_eq!(params.boost(1.0), 0.2);
        let decayed = params.boost(24.0);
        assert!(decayed > 0.0 && decayed < 0.2);
        assert_eq!(params.boost(200.0), 0.0);
    }

    #[test]
    fn test_recency_monotone_in_decay_region() {
        let params = RecencyParams::default();
        assert!(params.boost(2.0) > params.boost(10.0));
        assert!(params.boost(10.0) > params.boost(100.0));
    }

    // ========================================================================
    // Consolidated scoring
    // ========================================================================

    #[test]
    fn test_completed_outranks_pending_at_equal_initial() {
        let now = Utc::now();
        let recency = RecencyParams::default();

        let mut completed = snippet(SourceType::CodeEntityFts, 0.9);
        completed.ai_status = Some(AiStatus::Completed);
        let mut pending = snippet(SourceType::CodeEntityFts, 0.9);
        pending.ai_status = Some(AiStatus::Pending);

        let a = consolidated_score(&completed, &recency, now);
        let b = consolidated_score(&pending, &recency, now);
        assert!(a > b);
    }

    #[test]
    fn test_seed_scenario_source_vs_status() {
        // A: 0.9 initial, code_entity_fts, completed -> 0.9*1.0*1.2 = 1.08
        // B: 0.9 initial, code_entity_keyword, pending -> 0.9*0.9*1.0 = 0.81
        let now = Utc::now();
        let recency = RecencyParams::default();

        let mut a = snippet(SourceType::CodeEntityFts, 0.9);
        a.ai_status = Some(AiStatus::Completed);
        let mut b = snippet(SourceType::CodeEntityKeyword, 0.9);
        b.ai_status = Some(AiStatus::Pending);

        assert!((consolidated_score(&a, &recency, now) - 1.08).abs() < 1e-9);
        assert!((consolidated_score(&b, &recency, now) - 0.81).abs() < 1e-9);
    }

    #[test]
    fn test_relationship_boosts_applied() {
        let now = Utc::now();
        let recency = RecencyParams::default();

        let mut related = snippet(SourceType::CodeEntityRelated, 0.616);
        related.relationship_context = Some(related_context("CALLS_FUNCTION"));
        // 0.616 * 0.85 * 1.1 + 0.1 + 0.05
        let expected = 0.616 * 0.85 * 1.1 + 0.15;
        assert!((consolidated_score(&related, &recency, now) - expected).abs() < 1e-9);

        let mut mentions = snippet(SourceType::CodeEntityRelated, 0.616);
        mentions.relationship_context = Some(related_context("MENTIONS"));
        // No structural bonus for MENTIONS
        let expected = 0.616 * 0.85 * 0.6 + 0.1;
        assert!((consolidated_score(&mentions, &recency, now) - expected).abs() < 1e-9);
    }

    #[test]
    fn test_score_clamped_to_two() {
        let now = Utc::now();
        let recency = RecencyParams::default();
        let mut s = snippet(SourceType::CodeEntityFts, 1.0);
        s.ai_status = Some(AiStatus::Completed);
        s.relationship_context = Some(related_context("EXTENDS_CLASS"));
        s.timestamp = Some(now.to_rfc3339());
        let score = consolidated_score(&s, &recency, now);
        assert!(score <= 2.0);
    }

    #[test]
    fn test_recency_uses_metadata_commit_date() {
        let now = Utc::now();
        let recency = RecencyParams::default();
        let mut fresh = snippet(SourceType::GitCommit, 0.5);
        fresh.set_metadata("commitDate", serde_json::json!(now.to_rfc3339()));
        let mut stale = snippet(SourceType::GitCommit, 0.5);
        stale.set_metadata(
            "commitDate",
            serde_json::json!((now - chrono::Duration::days(30)).to_rfc3339()),
        );
        assert!(
            consolidated_score(&fresh, &recency, now) > consolidated_score(&stale, &recency, now)
        );
    }

    // ========================================================================
    // Ordering
    // ========================================================================

    #[test]
    fn test_rank_sorts_descending_and_stable() {
        let now = Utc::now();
        let recency = RecencyParams::default();

        // Same source, same score: emission order must be preserved.
        let mut tied_a = snippet(SourceType::GitCommit, 0.4);
        tied_a.id = "first".to_string();
        let mut tied_b = snippet(SourceType::GitCommit, 0.4);
        tied_b.id = "second".to_string();
        let high = snippet(SourceType::CodeEntityFts, 0.9);

        let mut candidates = vec![tied_a, tied_b, high];
        rank_candidates(&mut candidates, &recency, now);

        assert_eq!(candidates[0].source_type, SourceType::CodeEntityFts);
        assert_eq!(candidates[1].id, "first");
        assert_eq!(candidates[2].id, "second");
        assert!(candidates.iter().all(|c| {
            let s = c.consolidated_score.unwrap_or(-1.0);
            (0.0..=2.0).contains(&s)
        }));
    }

    #[test]
    fn test_scoring_deterministic() {
        let now = Utc::now();
        let recency = RecencyParams::default();
        let mut s = snippet(SourceType::ProjectDocumentFts, 0.7);
        s.ai_status = Some(AiStatus::Completed);
        s.timestamp = Some((now - chrono::Duration::hours(5)).to_rfc3339());
        let a = consolidated_score(&s, &recency, now);
        let b = consolidated_score(&s, &recency, now);
        assert_eq!(a, b);
    }
}
