// src/retrieval/tokenize.rs
// Query tokenizer: search terms, FTS expression, git intent

use std::sync::LazyLock;

/// Everything downstream stages need to know about the raw query.
#[derive(Debug, Clone, Default)]
pub struct TokenizedQuery {
    /// Lowercased alphanumeric tokens, stop words removed.
    pub search_terms: Vec<String>,
    /// FTS5 MATCH expression joined with OR for maximum recall.
    /// Empty when no usable terms remain.
    pub fts_expression: String,
    /// Whether the query smells like a question about repository history.
    pub git_intent: bool,
}

impl TokenizedQuery {
    pub fn is_empty(&self) -> bool {
        self.search_terms.is_empty()
    }
}

/// Fixed English stop-word list.
const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "can", "do", "does", "for", "from",
    "has", "have", "how", "i", "if", "in", "into", "is", "it", "its", "me", "my", "no", "not",
    "of", "on", "or", "our", "should", "so", "that", "the", "their", "then", "there", "these",
    "they", "this", "to", "was", "we", "were", "what", "when", "where", "which", "who", "why",
    "will", "with", "would", "you", "your",
];

/// Short tokens that carry real signal in a programming context and are
/// exempt from the minimum-length rule.
const SHORT_TOKEN_WHITELIST: &[&str] = &[
    "js", "ts", "go", "py", "rs", "sql", "css", "dom", "api", "url", "id", "ai", "ml", "db",
    "os", "io", "ui", "ci", "cd", "vm", "fs", "rb", "cs", "tf",
];

/// Words that indicate the agent is asking about repository history.
const GIT_INTENT_KEYWORDS: &[&str] = &[
    "commit", "commits", "history", "change", "changes", "changed", "log", "author", "blame",
    "branch", "merge", "merged", "diff", "revision", "repo", "repository", "push", "pull",
    "rebase", "tag", "checkout",
];

/// Extensions that make a bare token look like a source or doc path.
const PATH_EXTENSIONS: &[&str] = &[
    ".rs", ".js", ".jsx", ".ts", ".tsx", ".py", ".go", ".java", ".rb", ".c", ".h", ".cpp",
    ".hpp", ".cs", ".php", ".sql", ".sh", ".css", ".html", ".md", ".txt", ".json", ".yaml",
    ".yml", ".toml",
];

#[allow(clippy::expect_used)] // literal pattern
static COMMIT_HASH_RE: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"\b[0-9a-f]{7,}\b").expect("valid hash pattern"));

/// Tokenize a raw agent query. Empty or whitespace-only input yields empty
/// outputs, which downstream stages treat as "no candidates".
pub fn tokenize_query(raw: &str) -> TokenizedQuery {
    let raw = raw.trim();
    if raw.is_empty() {
        return TokenizedQuery::default();
    }

    let lowered = raw.to_lowercase();

    let search_terms: Vec<String> = lowered
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|t| !t.is_empty())
        .filter(|t| keep_term(t))
        .map(|t| t.to_string())
        .collect();

    let fts_expression = build_fts_expression(&search_terms);
    let git_intent = detect_git_intent(&lowered);

    TokenizedQuery {
        search_terms,
        fts_expression,
        git_intent,
    }
}

/// Whitelisted short tokens always survive; otherwise stop words and
/// sub-2-character fragments are dropped.
fn keep_term(term: &str) -> bool {
    if SHORT_TOKEN_WHITELIST.contains(&term) {
        return true;
    }
    term.len() >= 2 && !STOP_WORDS.contains(&term)
}

/// Join terms into an OR expression, each term quoted for FTS5 (the
/// engine-native escape: wrap in double quotes, double any internal ones).
fn build_fts_expression(terms: &[String]) -> String {
    terms
        .iter()
        .map(|t| format!("\"{}\"", t.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(" OR ")
}

fn detect_git_intent(lowered: &str) -> bool {
    for token in lowered.split_whitespace() {
        let bare = token.trim_matches(|c: char| c == ',' || c == '.' || c == '?' || c == '!');
        if GIT_INTENT_KEYWORDS.contains(&bare) {
            return true;
        }
        if looks_like_path(bare) {
            return true;
        }
    }
    COMMIT_HASH_RE.is_match(lowered)
}

/// A token counts as path-like when it has a separator or a known source
/// or doc extension. Used both for git intent and for pre-filtering
/// file-change search terms.
pub fn looks_like_path(token: &str) -> bool {
    if token.contains('/') {
        return true;
    }
    PATH_EXTENSIONS.iter().any(|ext| token.ends_with(ext))
}

/// Path-like tokens from the raw query, used by file-change search. Falls
/// back to the empty list when the query mentions no paths.
pub fn path_like_terms(raw: &str) -> Vec<String> {
    raw.to_lowercase()
        .split_whitespace()
        .map(|t| t.trim_matches(|c: char| c == ',' || c == '?' || c == '!'))
        .filter(|t| looks_like_path(t))
        .map(|t| t.to_string())
        .collect()
}
