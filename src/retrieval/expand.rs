// src/retrieval/expand.rs
// One-hop relationship expansion over seed code entities, plus the merge
// of expansion output back into the candidate list

use crate::db::{self, DatabasePool, RelationshipRow};
use crate::retrieval::rank::relationship_weight;
use crate::retrieval::types::{
    CandidateSnippet, RelationshipContext, RelationshipDirection, SourceType,
};
use futures::future::join_all;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Relationship types expanded when the caller supplies no whitelist.
pub const DEFAULT_RELATIONSHIP_TYPES: &[&str] = &[
    "CALLS_FUNCTION",
    "CALLS_METHOD",
    "IMPLEMENTS_INTERFACE",
    "EXTENDS_CLASS",
    "DEFINES_CHILD_ENTITY",
    "TYPE_REFERENCE",
    "IMPORTS_MODULE",
    "ACCESSES_PROPERTY",
    "USES_VARIABLE",
    "DEFINES_TYPE",
    "USES_TYPE",
];

/// A neighbor discovered from one seed.
struct Neighbor {
    entity_id: String,
    relationship_type: String,
    direction: RelationshipDirection,
    custom_metadata: Option<String>,
}

/// Expand the top-scoring code-entity candidates one hop out and emit
/// related-entity snippets. Failures per seed are logged and skipped.
pub async fn expand_relationships(
    pool: &Arc<DatabasePool>,
    candidates: &[CandidateSnippet],
    search_terms: &[String],
    max_seeds: usize,
    type_whitelist: Option<&[String]>,
) -> Vec<CandidateSnippet> {
    let seeds = select_seeds(candidates, max_seeds);
    if seeds.is_empty() {
        return Vec::new();
    }

    let types: Vec<String> = match type_whitelist {
        Some(list) if !list.is_empty() => list.to_vec(),
        _ => DEFAULT_RELATIONSHIP_TYPES
            .iter()
            .map(|s| s.to_string())
            .collect(),
    };

    let per_seed = join_all(seeds.iter().map(|seed| {
        let pool = pool.clone();
        let seed_id = seed.id.clone();
        let types = types.clone();
        async move {
            let lookup_id = seed_id.clone();
            let rows: Vec<RelationshipRow> = match pool
                .run(move |conn| db::relationships_for_entity_sync(conn, &lookup_id, &types))
                .await
            {
                Ok(rows) => rows,
                Err(e) => {
                    tracing::warn!("relationship fetch for seed {} failed: {}", seed_id, e);
                    Vec::new()
                }
            };
            (seed_id, rows)
        }
    }))
    .await;

    // Seed score lookup for propagation
    let seed_scores: HashMap<&str, f64> = seeds
        .iter()
        .map(|s| (s.id.as_str(), s.initial_score))
        .collect();

    // One snippet per unique related entity; the first relationship
    // encountered wins.
    let mut neighbors: Vec<(String, Neighbor)> = Vec::new();
    let mut claimed: HashSet<String> = HashSet::new();
    for (seed_id, rows) in per_seed {
        for row in rows {
            let (other_id, direction) = if row.source_entity_id == seed_id {
                (row.target_entity_id.clone(), RelationshipDirection::Outgoing)
            } else {
                (row.source_entity_id.clone(), RelationshipDirection::Incoming)
            };
            if other_id == seed_id || !claimed.insert(other_id.clone()) {
                continue;
            }
            neighbors.push((
                seed_id.clone(),
                Neighbor {
                    entity_id: other_id,
                    relationship_type: row.relationship_type,
                    direction,
                    custom_metadata: row.custom_metadata,
                },
            ));
        }
    }
    if neighbors.is_empty() {
        return Vec::new();
    }

    let ids: Vec<String> = neighbors.iter().map(|(_, n)| n.entity_id.clone()).collect();
    let rows = match pool
        .run(move |conn| db::get_entities_by_ids_sync(conn, &ids))
        .await
    {
        Ok(rows) => rows,
        Err(e) => {
            tracing::warn!("hydrating related entities failed: {}", e);
            return Vec::new();
        }
    };
    let by_id: HashMap<String, db::CodeEntityRow> =
        rows.into_iter().map(|r| (r.id.clone(), r)).collect();

    let mut snippets = Vec::new();
    for (seed_id, neighbor) in neighbors {
        let row = match by_id.get(&neighbor.entity_id) {
            Some(row) => row,
            None => {
                tracing::warn!(
                    "related entity {} has no record, skipping",
                    neighbor.entity_id
                );
                continue;
            }
        };

        let seed_score = seed_scores.get(seed_id.as_str()).copied();
        let mut snippet = super::candidates::entity_snippet(
            row,
            SourceType::CodeEntityRelated,
            None,
            0.0,
        );
        let boost = query_boost(
            search_terms,
            row.name.as_deref(),
            &snippet.content_snippet,
            &row.file_path,
        );
        snippet.initial_score =
            propagated_score(seed_score, &neighbor.relationship_type, boost);
        snippet.relationship_context = Some(RelationshipContext {
            related_to_seed_entity_id: seed_id,
            relationship_type: neighbor.relationship_type,
            direction: neighbor.direction,
            custom_metadata: neighbor
                .custom_metadata
                .as_deref()
                .and_then(|m| serde_json::from_str(m).ok()),
        });
        snippets.push(snippet);
    }
    snippets
}

/// Top-N code-entity candidates by initial score become expansion seeds.
fn select_seeds(candidates: &[CandidateSnippet], max_seeds: usize) -> Vec<&CandidateSnippet> {
    let mut seeds: Vec<&CandidateSnippet> = candidates
        .iter()
        .filter(|c| {
            matches!(
                c.source_type,
                SourceType::CodeEntityFts | SourceType::CodeEntityKeyword
            )
        })
        .collect();
    seeds.sort_by(|a, b| {
        b.initial_score
            .partial_cmp(&a.initial_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    seeds.truncate(max_seeds);
    seeds
}

/// Score propagation: seed score attenuated, weighted by relationship
/// type, plus a small boost when the neighbor itself matches the query.
fn propagated_score(seed_score: Option<f64>, relationship_type: &str, query_boost: f64) -> f64 {
    let base = match seed_score {
        Some(s) => s * 0.7,
        None => 0.5,
    };
    (base * relationship_weight(relationship_type) + query_boost).clamp(0.0, 1.0)
}

/// Query boost: fraction of terms matching the neighbor's name, content,
/// or path, scaled to at most 0.2.
fn query_boost(terms: &[String], name: Option<&str>, content: &str, file_path: &str) -> f64 {
    if terms.is_empty() {
        return 0.0;
    }
    let haystack = format!(
        "{} {} {}",
        name.unwrap_or(""),
        content,
        file_path
    )
    .to_lowercase();
    let matching = terms.iter().filter(|t| haystack.contains(t.as_str())).count();
    (matching as f64 / terms.len() as f64).min(1.0) * 0.2
}

/// Merge relationship-derived snippets into the candidate list.
///
/// Candidates are indexed by their merge key; for an existing key the
/// higher-initial-score snippet is kept, relationship context is copied
/// onto a context-less winner, and a context conflict keeps the existing
/// one (logged).
pub fn merge_related_candidates(
    candidates: Vec<CandidateSnippet>,
    related: Vec<CandidateSnippet>,
) -> Vec<CandidateSnippet> {
    let mut merged = candidates;
    let mut index: HashMap<String, usize> = merged
        .iter()
        .enumerate()
        .map(|(i, c)| (c.merge_key(), i))
        .collect();

    for incoming in related {
        let key = incoming.merge_key();
        match index.get(&key) {
            None => {
                index.insert(key, merged.len());
                merged.push(incoming);
            }
            Some(&i) => {
                let existing = &mut merged[i];
                if incoming.initial_score > existing.initial_score {
                    let existing_context = existing.relationship_context.take();
                    let mut replacement = incoming;
                    if replacement.relationship_context.is_none() {
                        replacement.relationship_context = existing_context;
                    } else if existing_context.is_some() {
                        tracing::debug!(
                            "relationship context conflict for {}, keeping existing",
                            key
                        );
                        replacement.relationship_context = existing_context;
                    }
                    *existing = replacement;
                } else if existing.relationship_context.is_none() {
                    existing.relationship_context = incoming.relationship_context;
                } else if incoming.relationship_context.is_some() {
                    tracing::debug!(
                        "relationship context conflict for {}, keeping existing",
                        key
                    );
                }
            }
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn code_snippet(id: &str, source: SourceType, score: f64) -> CandidateSnippet {
        CandidateSnippet::new(id, source, "content", score)
    }

    fn related_snippet(id: &str, seed: &str, score: f64) -> CandidateSnippet {
        let mut s = code_snippet(id, SourceType::CodeEntityRelated, score);
        s.relationship_context = Some(RelationshipContext {
            related_to_seed_entity_id: seed.to_string(),
            relationship_type: "CALLS_FUNCTION".to_string(),
            direction: RelationshipDirection::Outgoing,
            custom_metadata: None,
        });
        s
    }

    // ========================================================================
    // Seed selection and score propagation
    // ========================================================================

    #[test]
    fn test_select_seeds_prefers_top_code_entities() {
        let candidates = vec![
            code_snippet("low", SourceType::CodeEntityFts, 0.2),
            code_snippet("doc", SourceType::ProjectDocumentFts, 0.99),
            code_snippet("high", SourceType::CodeEntityKeyword, 0.9),
            code_snippet("mid", SourceType::CodeEntityFts, 0.5),
        ];
        let seeds = select_seeds(&candidates, 2);
        let ids: Vec<&str> = seeds.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["high", "mid"]);
    }

    #[test]
    fn test_propagated_score_formula() {
        // 0.8 * 0.7 * 1.1 = 0.616
        assert!((propagated_score(Some(0.8), "CALLS_FUNCTION", 0.0) - 0.616).abs() < 1e-9);
        // Missing seed score falls back to 0.5
        assert!((propagated_score(None, "USES_TYPE", 0.0) - 0.5).abs() < 1e-9);
        // Clamped to 1.0
        assert_eq!(propagated_score(Some(1.0), "EXTENDS_CLASS", 0.2), 1.0);
    }

    #[test]
    fn test_query_boost_caps_at_point_two() {
        let terms = vec!["token".to_string(), "auth".to_string()];
        let boost = query_boost(&terms, Some("validate_token"), "auth body", "src/auth.rs");
        assert!((boost - 0.2).abs() < 1e-12);
        let partial = query_boost(&terms, Some("validate_token"), "nothing", "src/other.rs");
        assert!((partial - 0.1).abs() < 1e-12);
    }

    // ========================================================================
    // Merge
    // ========================================================================

    #[test]
    fn test_merge_inserts_new_entities() {
        let base = vec![code_snippet("a", SourceType::CodeEntityFts, 0.9)];
        let related = vec![related_snippet("b", "a", 0.6)];
        let merged = merge_related_candidates(base, related);
        assert_eq!(merged.len(), 2);
        assert!(merged[1].relationship_context.is_some());
    }

    #[test]
    fn test_merge_keeps_higher_score() {
        let base = vec![code_snippet("a", SourceType::CodeEntityFts, 0.9)];
        let related = vec![related_snippet("a", "seed", 0.3)];
        let merged = merge_related_candidates(base, related);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].initial_score, 0.9);
        // Context copied onto the context-less winner
        assert!(merged[0].relationship_context.is_some());
    }

    #[test]
    fn test_merge_replaces_with_higher_score() {
        let base = vec![code_snippet("a", SourceType::CodeEntityFts, 0.2)];
        let related = vec![related_snippet("a", "seed", 0.8)];
        let merged = merge_related_candidates(base, related);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].initial_score, 0.8);
        assert_eq!(merged[0].source_type, SourceType::CodeEntityRelated);
    }

    #[test]
    fn test_merge_context_conflict_keeps_existing() {
        let mut existing = related_snippet("a", "seed1", 0.5);
        existing.initial_score = 0.5;
        let incoming = related_snippet("a", "seed2", 0.9);
        let merged = merge_related_candidates(vec![existing], vec![incoming]);
        assert_eq!(merged.len(), 1);
        // Higher score wins but the established context is kept
        assert_eq!(merged[0].initial_score, 0.9);
        let ctx = merged[0].relationship_context.as_ref().expect("context");
        assert_eq!(ctx.related_to_seed_entity_id, "seed1");
    }

    #[test]
    fn test_merge_idempotent() {
        let base = vec![
            code_snippet("a", SourceType::CodeEntityFts, 0.9),
            code_snippet("t", SourceType::ConversationTopic, 0.4),
        ];
        let related = vec![related_snippet("b", "a", 0.6), related_snippet("a", "x", 0.2)];

        let once = merge_related_candidates(base.clone(), related.clone());
        let twice = merge_related_candidates(once.clone(), related);
        assert_eq!(once.len(), twice.len());
        for (a, b) in once.iter().zip(twice.iter()) {
            assert_eq!(a.id, b.id);
            assert_eq!(a.initial_score, b.initial_score);
        }
    }
}
