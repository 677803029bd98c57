//! End-to-end tests for the retrieval pipeline and the job manager,
//! running against a shared in-memory store.


use devctx::background::JobManager;
use devctx::config::JobConfig;
use devctx::db::{self, TargetEntityType, TaskType};
use devctx::mcp::{TOPIC_GENERATION_THRESHOLD, tools};
use devctx::retrieval::rank::{RecencyParams, rank_candidates};
use devctx::retrieval::{
    AiStatus, CandidateSnippet, RetrievalParameters, SourceType, estimate_tokens,
};
use test_utils::{ProviderStep, ScriptedProvider, TestContext};

// ============================================================================
// Retrieval scenarios
// ============================================================================

#[tokio::test]
async fn test_empty_store_returns_empty_bundle() {
    let ctx = TestContext::new().await;
    let result = ctx
        .retriever
        .retrieve("anything", "conv-1", 1000, &RetrievalParameters::default())
        .await;

    assert!(result.context_snippets.is_empty());
    assert_eq!(result.retrieval_summary.snippets_found_before_compression, 0);
    assert_eq!(result.retrieval_summary.estimated_tokens_out, 0);
    assert_eq!(result.retrieval_summary.token_budget_given, 1000);
}

#[tokio::test]
async fn test_single_summarized_entity_fits_small_budget() {
    let ctx = TestContext::new().await;
    ctx.insert_entity(
        "e1",
        "src/hello.rs",
        "hello_world",
        "function_declaration",
        "fn hello_world() { println!(\"hello world\"); }",
        Some("hello world"),
        "completed",
    )
    .await;

    let result = ctx
        .retriever
        .retrieve("hello", "conv-1", 50, &RetrievalParameters::default())
        .await;

    assert_eq!(result.context_snippets.len(), 1);
    let snippet = &result.context_snippets[0];
    // Completed summary is preferred over highlight and raw content
    assert_eq!(snippet.content_snippet, "hello world");
    assert_eq!(snippet.ai_status, Some(AiStatus::Completed));
    assert!(result.retrieval_summary.estimated_tokens_out <= 50);
}

#[tokio::test]
async fn test_universal_invariants_on_mixed_store() {
    let ctx = TestContext::new().await;
    ctx.insert_entity(
        "e1",
        "src/auth.rs",
        "validate_token",
        "function_declaration",
        &"fn validate_token(token: &str) -> bool { token.len() > 8 } ".repeat(20),
        None,
        "pending",
    )
    .await;
    ctx.insert_entity(
        "e2",
        "src/session.rs",
        "SessionStore",
        "class_declaration",
        "struct SessionStore { tokens: Vec<String> }",
        Some("Token-keyed session storage."),
        "completed",
    )
    .await;
    ctx.insert_document(
        "d1",
        "docs/auth.md",
        &"The token validation flow checks expiry and signature. ".repeat(40),
        None,
        "pending",
    )
    .await;
    ctx.insert_keyword("e1", "token", 4.0).await;
    ctx.insert_commit(
        "a1b2c3d4e5f6a7b8",
        "fix token validation edge case",
        "2026-07-30T10:00:00Z",
        &[("src/auth.rs", "modified")],
    )
    .await;
    ctx.insert_relationship("e1", "e2", "CALLS_METHOD").await;

    let budget = 150;
    let result = ctx
        .retriever
        .retrieve("token validation", "conv-1", budget, &RetrievalParameters::default())
        .await;

    assert!(!result.context_snippets.is_empty());

    // Stays within the token budget
    let total: usize = result
        .context_snippets
        .iter()
        .map(|s| estimate_tokens(&s.content_snippet))
        .sum();
    assert!(total <= budget);
    assert_eq!(result.retrieval_summary.estimated_tokens_out, total);

    for snippet in &result.context_snippets {
        // Non-empty content
        assert!(!snippet.content_snippet.is_empty());
        // Score bounds
        assert!((0.0..=1.0).contains(&snippet.initial_score));
        let consolidated = snippet.consolidated_score.expect("ranked");
        assert!((0.0..=2.0).contains(&consolidated));
        // Relationship containment
        if snippet.source_type == SourceType::CodeEntityRelated {
            let ctx_ref = snippet.relationship_context.as_ref().expect("context");
            assert!(!ctx_ref.related_to_seed_entity_id.is_empty());
        }
    }

    // Descending consolidated order
    let scores: Vec<f64> = result
        .context_snippets
        .iter()
        .filter_map(|s| s.consolidated_score)
        .collect();
    for pair in scores.windows(2) {
        assert!(pair[0] >= pair[1]);
    }
}

#[tokio::test]
async fn test_fts_snippet_wins_over_keyword_duplicate() {
    let ctx = TestContext::new().await;
    ctx.insert_entity(
        "e1",
        "src/auth.rs",
        "validate_token",
        "function_declaration",
        "fn validate_token(token: &str) -> bool { token.len() > 8 }",
        None,
        "pending",
    )
    .await;
    ctx.insert_keyword("e1", "token", 5.0).await;

    let result = ctx
        .retriever
        .retrieve("token", "conv-1", 1000, &RetrievalParameters::default())
        .await;

    let entity_snippets: Vec<&CandidateSnippet> = result
        .context_snippets
        .iter()
        .filter(|s| s.id == "e1")
        .collect();
    assert_eq!(entity_snippets.len(), 1, "record emitted once");
    assert_eq!(entity_snippets[0].source_type, SourceType::CodeEntityFts);
}

#[tokio::test]
async fn test_keyword_id_resolves_to_document() {
    let ctx = TestContext::new().await;
    ctx.insert_document(
        "d1",
        "docs/deploy.md",
        "Deployment runbook for the staging cluster.",
        None,
        "pending",
    )
    .await;
    // Keyword index entry pointing at a document id
    ctx.insert_keyword("d1", "runbook", 6.0).await;

    let result = ctx
        .retriever
        .retrieve("runbook", "conv-1", 1000, &RetrievalParameters::default())
        .await;

    let doc_hits: Vec<&CandidateSnippet> = result
        .context_snippets
        .iter()
        .filter(|s| s.id == "d1")
        .collect();
    assert!(!doc_hits.is_empty());
    // FTS also matches the document; the FTS-derived snippet wins the dedup
    assert!(matches!(
        doc_hits[0].source_type,
        SourceType::ProjectDocumentFts | SourceType::ProjectDocumentKeyword
    ));
}

#[tokio::test]
async fn test_source_and_status_weights_order_equal_initial_scores() {
    // Two candidates with identical initial scores: FTS+completed must
    // outrank keyword+pending (1.0*1.2 > 0.9*1.0).
    let mut a = CandidateSnippet::new("a", SourceType::CodeEntityFts, "alpha", 0.9);
    a.ai_status = Some(AiStatus::Completed);
    let mut b = CandidateSnippet::new("b", SourceType::CodeEntityKeyword, "beta", 0.9);
    b.ai_status = Some(AiStatus::Pending);

    let mut candidates = vec![b, a];
    rank_candidates(&mut candidates, &RecencyParams::default(), chrono::Utc::now());

    assert_eq!(candidates[0].id, "a");
    assert_eq!(candidates[1].id, "b");
}

#[tokio::test]
async fn test_relationship_expansion_scores_and_context() {
    let ctx = TestContext::new().await;
    ctx.insert_entity(
        "S",
        "src/caller.rs",
        "caller",
        "function_declaration",
        "fn caller() { callee(); }",
        None,
        "pending",
    )
    .await;
    ctx.insert_entity(
        "T",
        "src/callee.rs",
        "callee",
        "function_declaration",
        "fn callee() {}",
        None,
        "pending",
    )
    .await;
    ctx.insert_relationship("S", "T", "CALLS_FUNCTION").await;

    let seed = CandidateSnippet::new("S", SourceType::CodeEntityFts, "fn caller()", 0.8);
    let related = devctx::retrieval::expand::expand_relationships(
        ctx.retriever.pool(),
        &[seed],
        &[],
        3,
        None,
    )
    .await;

    assert_eq!(related.len(), 1);
    let t = &related[0];
    assert_eq!(t.id, "T");
    assert_eq!(t.source_type, SourceType::CodeEntityRelated);
    // 0.8 * 0.7 * 1.1 with no query boost
    assert!((t.initial_score - 0.616).abs() < 1e-9);
    let rel = t.relationship_context.as_ref().expect("context");
    assert_eq!(rel.related_to_seed_entity_id, "S");
    assert_eq!(rel.relationship_type, "CALLS_FUNCTION");

    // Consolidated score carries the relationship multiplier, both flat
    // boosts, and the freshness boost from the entity's updated_at.
    let mut ranked = related;
    rank_candidates(&mut ranked, &RecencyParams::default(), chrono::Utc::now());
    let expected = 0.616 * 0.85 * 1.1 + 0.1 + 0.05 + 0.2;
    let consolidated = ranked[0].consolidated_score.expect("ranked");
    assert!(
        (consolidated - expected).abs() < 1e-6,
        "consolidated {consolidated} != expected {expected}"
    );
}

#[tokio::test]
async fn test_relationship_type_whitelist_filters_expansion() {
    let ctx = TestContext::new().await;
    ctx.insert_entity(
        "S",
        "src/a.rs",
        "a",
        "function_declaration",
        "fn a() {}",
        None,
        "pending",
    )
    .await;
    ctx.insert_entity(
        "T",
        "src/b.rs",
        "b",
        "function_declaration",
        "fn b() {}",
        None,
        "pending",
    )
    .await;
    ctx.insert_relationship("S", "T", "MENTIONS").await;

    let seed = CandidateSnippet::new("S", SourceType::CodeEntityFts, "fn a()", 0.8);
    // MENTIONS is not in the default whitelist
    let related = devctx::retrieval::expand::expand_relationships(
        ctx.retriever.pool(),
        &[seed.clone()],
        &[],
        3,
        None,
    )
    .await;
    assert!(related.is_empty());

    // An explicit whitelist admits it
    let related = devctx::retrieval::expand::expand_relationships(
        ctx.retriever.pool(),
        &[seed],
        &[],
        3,
        Some(&["MENTIONS".to_string()]),
    )
    .await;
    assert_eq!(related.len(), 1);
}

// ============================================================================
// Tool surface
// ============================================================================

#[tokio::test]
async fn test_retrieve_tool_records_message_and_triggers_topics() {
    let ctx = TestContext::new().await;

    for i in 0..TOPIC_GENERATION_THRESHOLD {
        let output = tools::retrieve_relevant_context(
            &ctx.server,
            format!("query number {i} about tokens"),
            "conv-1".to_string(),
            500,
            None,
        )
        .await;
        assert!(output.processed_ok);
    }

    let count = ctx
        .pool
        .interact_raw(|conn| db::count_messages_sync(conn, "conv-1"))
        .await
        .expect("count");
    assert_eq!(count, TOPIC_GENERATION_THRESHOLD);

    let has_job = ctx
        .pool
        .interact_raw(|conn| {
            db::has_open_job_for_target_sync(conn, "conv-1", TaskType::GenerateTopics)
        })
        .await
        .expect("job check");
    assert!(has_job, "topic generation job should be enqueued");
}

#[tokio::test]
async fn test_retrieve_tool_rejects_zero_budget() {
    let ctx = TestContext::new().await;
    let output = tools::retrieve_relevant_context(
        &ctx.server,
        "anything".to_string(),
        "conv-1".to_string(),
        0,
        None,
    )
    .await;
    assert!(!output.processed_ok);
    let error = output.error.expect("error object");
    assert_eq!(error.code, -32000);
    assert!(output.context_snippets.is_empty());
}

#[tokio::test]
async fn test_initialize_conversation_context_empty_and_seeded() {
    let ctx = TestContext::new().await;

    let output = tools::initialize_conversation_context(&ctx.server, None, None).await;
    assert!(!output.conversation_id.is_empty());
    assert!(output.project_structure_summary.contains("empty"));
    assert!(output.initial_query_context_snippets.is_none());

    ctx.insert_entity(
        "e1",
        "src/auth.rs",
        "validate_token",
        "function_declaration",
        "fn validate_token() {}",
        None,
        "pending",
    )
    .await;
    ctx.insert_document(
        "d1",
        "docs/architecture.md",
        "layers",
        Some("Layered retrieval pipeline over SQLite."),
        "completed",
    )
    .await;
    ctx.pool
        .interact_raw(|conn| {
            conn.execute(
                "UPDATE project_documents SET purpose_tag = 'architecture' WHERE id = 'd1'",
                [],
            )?;
            Ok(())
        })
        .await
        .expect("tag");

    let output = tools::initialize_conversation_context(
        &ctx.server,
        Some("conv-9".to_string()),
        Some("token validation".to_string()),
    )
    .await;
    assert_eq!(output.conversation_id, "conv-9");
    assert!(output.project_structure_summary.contains("1 indexed code entities"));
    assert!(output.architecture_context_summary.contains("Layered retrieval"));
    let snippets = output.initial_query_context_snippets.expect("prefetch");
    assert!(!snippets.is_empty());
}

// ============================================================================
// Job manager
// ============================================================================

async fn enqueue_enrich_job(ctx: &TestContext, entity_id: &str, max_attempts: u32) -> String {
    let entity_id = entity_id.to_string();
    ctx.pool
        .interact_raw(move |conn| {
            db::enqueue_job_sync(
                conn,
                &entity_id,
                TargetEntityType::CodeEntity,
                TaskType::EnrichEntitySummaryKeywords,
                max_attempts,
                None,
            )
        })
        .await
        .expect("enqueue")
}

fn test_job_config() -> JobConfig {
    JobConfig {
        concurrency: 2,
        job_delay_ms: 0,
        max_attempts: 2,
        polling_interval_ms: 1000,
    }
}

#[tokio::test]
async fn test_job_completion_enriches_entity() {
    let ctx = TestContext::new().await;
    ctx.insert_entity(
        "e1",
        "src/auth.rs",
        "validate_token",
        "function_declaration",
        "fn validate_token() {}",
        None,
        "pending",
    )
    .await;
    let job_id = enqueue_enrich_job(&ctx, "e1", 2).await;

    let provider = ScriptedProvider::new(vec![ProviderStep::Succeed]);
    let manager = JobManager::new(ctx.pool.clone(), provider, test_job_config());

    for handle in manager.poll_cycle().await {
        handle.await.expect("dispatch");
    }

    let job = ctx.job(&job_id).await;
    assert_eq!(job.status, "completed");
    assert_eq!(job.attempts, 1);

    let rows = ctx
        .pool
        .interact_raw(|conn| db::get_entities_by_ids_sync(conn, &["e1".to_string()]))
        .await
        .expect("entities");
    assert_eq!(rows[0].ai_status, "completed");
    assert_eq!(rows[0].summary.as_deref(), Some("Summary of validate_token."));

    // Refreshed keywords are searchable
    let hits = ctx
        .pool
        .interact_raw(|conn| db::keyword_search_sync(conn, &["validate_token".to_string()], 10))
        .await
        .expect("keywords");
    assert_eq!(hits.len(), 1);
}

#[tokio::test]
async fn test_rate_limit_pauses_task_type_but_not_others() {
    let ctx = TestContext::new().await;
    ctx.insert_entity(
        "e1",
        "src/a.rs",
        "a",
        "function_declaration",
        "fn a() {}",
        None,
        "pending",
    )
    .await;
    ctx.insert_entity(
        "e2",
        "src/b.rs",
        "b",
        "function_declaration",
        "fn b() {}",
        None,
        "pending",
    )
    .await;
    let job_a = enqueue_enrich_job(&ctx, "e1", 2).await;
    let job_b = enqueue_enrich_job(&ctx, "e2", 2).await;

    // A conversation with messages so generate_topics has work to do
    ctx.pool
        .interact_raw(|conn| {
            db::insert_message_sync(conn, "conv-1", "agent", "what changed in auth?")?;
            db::enqueue_job_sync(
                conn,
                "conv-1",
                TargetEntityType::Conversation,
                TaskType::GenerateTopics,
                2,
                None,
            )
        })
        .await
        .expect("enqueue topics");

    // Both enrichment dispatches hit the rate limit with retry-after 30s
    let provider = ScriptedProvider::new(vec![
        ProviderStep::RateLimited(Some(30)),
        ProviderStep::RateLimited(Some(30)),
    ]);
    let manager = JobManager::new(ctx.pool.clone(), provider.clone(), test_job_config());

    // Cycle 1: the two oldest jobs (both enrichment) are dispatched
    for handle in manager.poll_cycle().await {
        handle.await.expect("dispatch");
    }

    for job_id in [&job_a, &job_b] {
        let job = ctx.job(job_id).await;
        assert_eq!(job.status, "rate_limited");
        assert_eq!(job.attempts, 0, "rate limits never consume attempts");
    }
    assert!(manager.is_task_type_paused("enrich_entity_summary_keywords"));

    // Target entities mirror the rate limit
    let rows = ctx
        .pool
        .interact_raw(|conn| db::get_entities_by_ids_sync(conn, &["e1".to_string()]))
        .await
        .expect("entities");
    assert_eq!(rows[0].ai_status, "rate_limited");

    // Cycle 2: enrichment is paused, the topics job proceeds
    for handle in manager.poll_cycle().await {
        handle.await.expect("dispatch");
    }
    assert_eq!(provider.topics_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    for job_id in [&job_a, &job_b] {
        assert_eq!(ctx.job(job_id).await.status, "rate_limited");
    }

    // Topics landed for the conversation
    let topics = ctx
        .pool
        .interact_raw(|conn| db::topics_for_conversation_sync(conn, "conv-1", 5))
        .await
        .expect("topics");
    assert_eq!(topics.len(), 1);
}

#[tokio::test]
async fn test_provider_errors_retry_until_failed_ai() {
    let ctx = TestContext::new().await;
    ctx.insert_entity(
        "e1",
        "src/a.rs",
        "a",
        "function_declaration",
        "fn a() {}",
        None,
        "pending",
    )
    .await;
    let job_id = enqueue_enrich_job(&ctx, "e1", 2).await;

    let provider = ScriptedProvider::new(vec![
        ProviderStep::Fail("provider exploded"),
        ProviderStep::Fail("provider exploded again"),
    ]);
    let manager = JobManager::new(ctx.pool.clone(), provider, test_job_config());

    // Attempt 1 -> retry_ai
    for handle in manager.poll_cycle().await {
        handle.await.expect("dispatch");
    }
    let job = ctx.job(&job_id).await;
    assert_eq!(job.status, "retry_ai");
    assert_eq!(job.attempts, 1);

    // Attempt 2 -> attempts reach max -> failed_ai, mirrored to the entity
    for handle in manager.poll_cycle().await {
        handle.await.expect("dispatch");
    }
    let job = ctx.job(&job_id).await;
    assert_eq!(job.status, "failed_ai");
    assert_eq!(job.attempts, 2);

    let rows = ctx
        .pool
        .interact_raw(|conn| db::get_entities_by_ids_sync(conn, &["e1".to_string()]))
        .await
        .expect("entities");
    assert_eq!(rows[0].ai_status, "failed_ai");
    assert!(
        rows[0]
            .custom_metadata
            .as_deref()
            .unwrap_or("")
            .contains("provider exploded")
    );

    // Terminal: a further cycle fetches nothing
    let handles = manager.poll_cycle().await;
    assert!(handles.is_empty());
}

#[tokio::test]
async fn test_malformed_payload_is_terminal() {
    let ctx = TestContext::new().await;
    ctx.insert_entity(
        "e1",
        "src/a.rs",
        "a",
        "function_declaration",
        "fn a() {}",
        None,
        "pending",
    )
    .await;
    let job_id = ctx
        .pool
        .interact_raw(|conn| {
            db::enqueue_job_sync(
                conn,
                "e1",
                TargetEntityType::CodeEntity,
                TaskType::EnrichEntitySummaryKeywords,
                2,
                Some("{not valid json"),
            )
        })
        .await
        .expect("enqueue");

    let provider = ScriptedProvider::new(vec![]);
    let manager = JobManager::new(ctx.pool.clone(), provider.clone(), test_job_config());
    for handle in manager.poll_cycle().await {
        handle.await.expect("dispatch");
    }

    let job = ctx.job(&job_id).await;
    assert_eq!(job.status, "failed_payload_parsing");
    // The provider was never consulted
    assert_eq!(provider.enrich_calls.load(std::sync::atomic::Ordering::SeqCst), 0);

    let handles = manager.poll_cycle().await;
    assert!(handles.is_empty(), "terminal job must not be re-picked");
}

#[tokio::test]
async fn test_unknown_task_target_pair_fails_job_logic() {
    let ctx = TestContext::new().await;
    // Raw insert: a pairing no handler covers
    let job_id = "job-mismatch".to_string();
    let insert_id = job_id.clone();
    ctx.pool
        .interact_raw(move |conn| {
            conn.execute(
                "INSERT INTO background_ai_jobs
                    (job_id, target_entity_id, target_entity_type, task_type, status, attempts, max_attempts)
                 VALUES (?1, 'conv-1', 'conversation', 'enrich_entity_summary_keywords', 'pending', 0, 2)",
                rusqlite::params![insert_id],
            )?;
            Ok(())
        })
        .await
        .expect("insert");

    let provider = ScriptedProvider::new(vec![]);
    let manager = JobManager::new(ctx.pool.clone(), provider, test_job_config());
    for handle in manager.poll_cycle().await {
        handle.await.expect("dispatch");
    }

    let job = ctx.job(&job_id).await;
    assert_eq!(job.status, "failed_job_logic");
}

#[tokio::test]
async fn test_concurrency_bounds_dispatch() {
    let ctx = TestContext::new().await;
    for i in 0..5 {
        ctx.insert_entity(
            &format!("e{i}"),
            &format!("src/f{i}.rs"),
            &format!("f{i}"),
            "function_declaration",
            "fn f() {}",
            None,
            "pending",
        )
        .await;
        enqueue_enrich_job(&ctx, &format!("e{i}"), 2).await;
    }

    let provider = ScriptedProvider::new(vec![]);
    let manager = JobManager::new(ctx.pool.clone(), provider, test_job_config());

    // concurrency = 2: at most two jobs per cycle
    let handles = manager.poll_cycle().await;
    assert_eq!(handles.len(), 2);
    for handle in handles {
        handle.await.expect("dispatch");
    }

    let handles = manager.poll_cycle().await;
    assert_eq!(handles.len(), 2);
    for handle in handles {
        handle.await.expect("dispatch");
    }

    let handles = manager.poll_cycle().await;
    assert_eq!(handles.len(), 1);
    for handle in handles {
        handle.await.expect("dispatch");
    }
}
