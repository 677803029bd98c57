// src/retrieval/compress.rs
// Token-budgeted compression with content-aware truncation

use crate::retrieval::types::{CandidateSnippet, RetrievalSummary};
use serde_json::json;

/// Budget below which walking further candidates is pointless.
const MIN_USEFUL_TOKENS: usize = 10;

/// Floor for truncated snippets: anything smaller carries too little
/// signal to be worth a slot.
const MIN_TRUNCATED_TOKENS: usize = 50;

const CODE_TRUNCATION_MARKER: &str = "// ... (code truncated) ...";
const CLASS_TRUNCATION_MARKER: &str = "// ... (class truncated) ...";
const BODY_TRUNCATION_MARKER: &str = "// ... (body truncated) ...";

/// The shared token estimator: roughly 4 characters per token. Every
/// admission decision uses this same function.
pub fn estimate_tokens(text: &str) -> usize {
    text.trim().chars().count().div_ceil(4)
}

/// Walk the ranked candidates greedily, admitting whole snippets while
/// they fit and truncating oversized ones when the content allows it.
pub fn compress_candidates(
    ranked: Vec<CandidateSnippet>,
    token_budget: usize,
) -> (Vec<CandidateSnippet>, RetrievalSummary) {
    let snippets_found = ranked.len();
    let tokens_in: usize = ranked
        .iter()
        .map(|s| estimate_tokens(&s.content_snippet))
        .sum();

    let mut admitted: Vec<CandidateSnippet> = Vec::new();
    let mut remaining = token_budget;

    for snippet in ranked {
        if remaining <= MIN_USEFUL_TOKENS {
            break;
        }

        let tokens = estimate_tokens(&snippet.content_snippet);
        if tokens <= remaining {
            remaining -= tokens;
            admitted.push(snippet);
            continue;
        }

        let truncated = if snippet.source_type.is_text_based() && snippet.is_raw() {
            try_text_truncation(&snippet, remaining)
        } else if snippet.source_type.is_code() && snippet.is_raw() {
            try_code_truncation(&snippet, remaining)
        } else {
            None
        };

        if let Some(shortened) = truncated {
            let tokens = estimate_tokens(&shortened.content_snippet);
            remaining -= tokens;
            admitted.push(shortened);
        }
    }

    let tokens_out: usize = admitted
        .iter()
        .map(|s| estimate_tokens(&s.content_snippet))
        .sum();
    let summary = RetrievalSummary {
        snippets_found_before_compression: snippets_found,
        estimated_tokens_in: tokens_in,
        snippets_returned_after_compression: admitted.len(),
        estimated_tokens_out: tokens_out,
        token_budget_given: token_budget,
        token_budget_remaining: token_budget.saturating_sub(tokens_out),
        error: None,
    };
    (admitted, summary)
}

/// Truncation target: most of what is left, but never below the floor.
fn target_tokens(remaining: usize) -> usize {
    ((remaining * 4) / 5).max(MIN_TRUNCATED_TOKENS)
}

/// Mark a snippet as truncated, recording original and final lengths.
fn mark_truncated(snippet: &mut CandidateSnippet, original_chars: usize) {
    snippet.set_metadata("truncated", json!(true));
    snippet.set_metadata("originalLength", json!(original_chars));
    snippet.set_metadata(
        "truncatedLength",
        json!(snippet.content_snippet.chars().count()),
    );
}

// ============================================================================
// Text truncation
// ============================================================================

/// Cut prose content to the character equivalent of the target tokens.
/// Admitted only when the result lands in [floor, remaining].
fn try_text_truncation(snippet: &CandidateSnippet, remaining: usize) -> Option<CandidateSnippet> {
    let target = target_tokens(remaining);
    let max_chars = target * 4;

    let original_chars = snippet.content_snippet.chars().count();
    if original_chars <= max_chars {
        return None; // would already have been admitted whole
    }

    let mut content: String = snippet.content_snippet.chars().take(max_chars).collect();
    content.push_str("...");

    let tokens = estimate_tokens(&content);
    if tokens < MIN_TRUNCATED_TOKENS || tokens > remaining {
        return None;
    }

    let mut shortened = snippet.clone();
    shortened.content_snippet = content;
    mark_truncated(&mut shortened, original_chars);
    Some(shortened)
}

// ============================================================================
// Code truncation
// ============================================================================

/// Structure-aware truncation keyed by the entity type recorded at
/// indexing time.
fn try_code_truncation(snippet: &CandidateSnippet, remaining: usize) -> Option<CandidateSnippet> {
    let target = target_tokens(remaining);
    let original_chars = snippet.content_snippet.chars().count();

    let (content, needs_floor) = match snippet.entity_type.as_deref() {
        Some("function_declaration") | Some("method_definition") => {
            (truncate_function(&snippet.content_snippet, remaining)?, false)
        }
        Some("class_declaration") => (truncate_class(&snippet.content_snippet, target)?, false),
        Some("interface_declaration") | Some("type_definition") => {
            (truncate_definition(&snippet.content_snippet, target)?, false)
        }
        _ => (truncate_lines(&snippet.content_snippet, target)?, true),
    };

    let tokens = estimate_tokens(&content);
    if tokens == 0 || tokens > remaining {
        return None;
    }
    // The line-based fallback shares the text-truncation floor; structural
    // truncations may legitimately be tiny (a lone signature).
    if needs_floor && tokens < MIN_TRUNCATED_TOKENS {
        return None;
    }

    let mut shortened = snippet.clone();
    shortened.content_snippet = content;
    mark_truncated(&mut shortened, original_chars);
    Some(shortened)
}

/// Keep the signature and the first three body lines; if that is still
/// oversized, keep the signature alone with a marker.
fn truncate_function(content: &str, remaining: usize) -> Option<String> {
    let mut lines = content.lines();
    let signature = lines.next()?.to_string();

    let body: Vec<&str> = lines.take(3).collect();
    let mut with_body = signature.clone();
    for line in &body {
        with_body.push('\n');
        with_body.push_str(line);
    }
    with_body.push('\n');
    with_body.push_str(BODY_TRUNCATION_MARKER);

    if estimate_tokens(&with_body) <= remaining {
        return Some(with_body);
    }

    Some(format!("{signature}\n{BODY_TRUNCATION_MARKER}"))
}

/// Retain the class header and member signatures, eliding bodies, until
/// the budget is reached.
fn truncate_class(content: &str, target: usize) -> Option<String> {
    let mut lines = content.lines();
    let header = lines.next()?;

    let mut out = header.to_string();
    let mut elided_any = false;
    for line in lines {
        if !looks_like_member_signature(line) {
            elided_any = true;
            continue;
        }
        let candidate = format!("{out}\n{line}\n    {BODY_TRUNCATION_MARKER}");
        if estimate_tokens(&candidate) > target {
            elided_any = true;
            break;
        }
        out = candidate;
    }

    if elided_any {
        out.push('\n');
        out.push_str(CLASS_TRUNCATION_MARKER);
    }
    Some(out)
}

/// A member line worth keeping: something declaration-shaped rather than
/// body statements.
fn looks_like_member_signature(line: &str) -> bool {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with("//") || trimmed.starts_with('*') {
        return false;
    }
    trimmed.contains('(')
        && (trimmed.ends_with('{') || trimmed.ends_with(')') || trimmed.ends_with(':'))
}

/// Interfaces and type definitions: whole definition if it fits the
/// target, otherwise a proportional slice of its lines.
fn truncate_definition(content: &str, target: usize) -> Option<String> {
    let total = estimate_tokens(content);
    if total <= target {
        return Some(content.to_string());
    }

    let lines: Vec<&str> = content.lines().collect();
    let keep = ((lines.len() * target) / total).max(1).min(lines.len());
    let mut out = lines[..keep].join("\n");
    out.push('\n');
    out.push_str(CODE_TRUNCATION_MARKER);
    Some(out)
}

/// Line-based fallback: roughly ten tokens per line of code.
fn truncate_lines(content: &str, target: usize) -> Option<String> {
    let target_lines = (target / 10).max(1);
    let lines: Vec<&str> = content.lines().collect();
    if lines.len() <= target_lines {
        return None;
    }
    let mut out = lines[..target_lines].join("\n");
    out.push('\n');
    out.push_str(CODE_TRUNCATION_MARKER);
    Some(out)
}
