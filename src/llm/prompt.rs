// src/llm/prompt.rs
// Prompt construction for enrichment tasks

/// Prompt for summarizing one code entity or document and extracting
/// weighted keywords. The model must answer with a single JSON object.
pub fn entity_enrichment_prompt(name: &str, file_path: &str, content: &str) -> String {
    format!(
        "You are indexing a codebase for retrieval. Summarize the item below in \
         2-3 sentences focused on what it does and how it is used, then list 5-10 \
         keywords a developer would search for, each with a relevance weight from \
         1 to 5.\n\
         \n\
         Item: {name}\n\
         Path: {file_path}\n\
         Content:\n{content}\n\
         \n\
         Answer with JSON only, no prose:\n\
         {{\"summary\": \"...\", \"keywords\": [{{\"term\": \"...\", \"weight\": 3}}]}}"
    )
}

/// Prompt for distilling a conversation transcript into topics. The model
/// must answer with a JSON array.
pub fn topics_prompt(transcript: &str) -> String {
    format!(
        "Identify the 1-4 main topics discussed in this coding-assistant \
         conversation. For each topic give a one-sentence summary and 3-6 \
         keywords.\n\
         \n\
         Transcript:\n{transcript}\n\
         \n\
         Answer with JSON only, no prose:\n\
         [{{\"summary\": \"...\", \"keywords\": [\"...\"]}}]"
    )
}
