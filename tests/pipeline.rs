//! End-to-end pipeline tests over scripted providers: resilience of the
//! fallback chain, breaker accumulation across queries, context assembly,
//! and streaming progress. No network calls.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use cliprag::{
    AiError, BackendChoice, ClipItem, MockFailure, MockProvider, ProviderRegistry,
    QueryOrchestrator, Router, SemanticIndex,
};

fn items(n: usize) -> Vec<ClipItem> {
    let base = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
    (0..n)
        .map(|i| {
            ClipItem::text(format!("item-{}", i), format!("clipboard content {}", i))
                .with_timestamp(base + Duration::from_secs(i as u64))
        })
        .collect()
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn wire(providers: &[MockProvider], preferred: Option<&str>) -> QueryOrchestrator {
    init_tracing();
    let mut registry = ProviderRegistry::new();
    for provider in providers {
        registry.register(Arc::new(provider.clone()));
    }
    let registry = Arc::new(registry);
    let router = Arc::new(match preferred {
        Some(id) => Router::with_preferred(registry, id),
        None => Router::new(registry),
    });
    QueryOrchestrator::new(Arc::new(SemanticIndex::in_memory()), router)
}

#[tokio::test]
async fn repeated_failures_open_breaker_and_reroute() {
    let flaky = MockProvider::cloud("cloud-a");
    let backup = MockProvider::cloud("cloud-b");
    let orchestrator = wire(&[flaky.clone(), backup.clone()], Some("cloud-a"));

    // Five consecutive transport failures trip cloud-a's breaker.
    for _ in 0..5 {
        flaky.push_failure(MockFailure::Network, "connection refused");
        let result = orchestrator
            .process_query("q", &items(1), BackendChoice::Auto, None, None)
            .await;
        // Fallback answers every time.
        assert_eq!(result.answer.as_deref(), Some("answer from cloud-b"));
    }
    assert_eq!(flaky.call_count(), 5);

    // With the breaker open, cloud-a is no longer dispatched at all.
    let result = orchestrator
        .process_query("q", &items(1), BackendChoice::Auto, None, None)
        .await;
    assert_eq!(result.answer.as_deref(), Some("answer from cloud-b"));
    assert_eq!(flaky.call_count(), 5);
}

#[tokio::test]
async fn open_preferred_breaker_routes_to_next_cloud_then_local() {
    let preferred = MockProvider::cloud("cloud-a");
    let backup = MockProvider::cloud("cloud-b");
    let local = MockProvider::local("local");
    let orchestrator = wire(
        &[preferred.clone(), backup.clone(), local.clone()],
        Some("cloud-a"),
    );

    let router = orchestrator.router().unwrap();
    let breaker = router.breaker_for("cloud-a").await;
    for _ in 0..5 {
        breaker.record_failure().await;
    }

    let chain = router.resolve_all().await;
    let ids: Vec<&str> = chain.iter().map(|p| p.id()).collect();
    assert_eq!(ids, vec!["cloud-b", "local"]);

    backup.push_failure(MockFailure::Timeout, "slow");
    let result = orchestrator
        .process_query("q", &items(1), BackendChoice::Auto, None, None)
        .await;
    assert_eq!(result.answer.as_deref(), Some("answer from local"));
    assert_eq!(preferred.call_count(), 0);
}

#[tokio::test]
async fn local_fallback_survives_its_own_failures() {
    let local = MockProvider::local("local");
    let orchestrator = wire(&[local.clone()], None);

    // Local providers are breaker-exempt in the chain; even after many
    // failures they stay reachable as the last resort.
    for _ in 0..7 {
        local.push_failure(MockFailure::Api, "model crashed");
        let result = orchestrator
            .process_query("q", &items(1), BackendChoice::Auto, None, None)
            .await;
        assert!(result.answer.is_none());
    }

    let result = orchestrator
        .process_query("q", &items(1), BackendChoice::Auto, None, None)
        .await;
    assert_eq!(result.answer.as_deref(), Some("answer from local"));
}

#[tokio::test]
async fn context_joins_hits_backfills_and_filters() {
    let provider = MockProvider::cloud("cloud");
    let orchestrator = wire(&[provider.clone()], None);
    orchestrator.index().initialize().await.unwrap();

    let mut known = items(10);
    known[2].sensitive = true;
    for item in &known[..3] {
        orchestrator.index_item(item).await.unwrap();
    }

    let result = orchestrator
        .process_query("clipboard content", &known, BackendChoice::Auto, None, None)
        .await;
    assert!(result.answer.is_some());

    let sent = provider.seen_context_ids().await;
    assert_eq!(sent.len(), result.context_items.len());
    // Sensitive item stripped even though it was a semantic hit.
    assert!(!sent.contains(&"item-2".to_string()));
    // Backfill pulled recent items beyond the three indexed ones.
    assert!(sent.iter().any(|id| id == "item-9"));
    // No duplicates.
    let mut deduped = sent.clone();
    deduped.sort();
    deduped.dedup();
    assert_eq!(deduped.len(), sent.len());
}

#[tokio::test]
async fn streaming_callback_sees_cumulative_progress_from_fallback() {
    let broken = MockProvider::cloud("broken");
    broken.push_failure(MockFailure::Network, "down");
    let healthy = MockProvider::cloud("healthy");
    healthy.push_answer("streamed final answer");
    let orchestrator = wire(&[broken, healthy], None);

    let partials: Arc<std::sync::Mutex<Vec<String>>> = Arc::default();
    let sink = partials.clone();
    let callback = move |partial: &str| sink.lock().unwrap().push(partial.to_string());

    let result = orchestrator
        .process_query("q", &items(1), BackendChoice::Auto, None, Some(&callback))
        .await;

    assert_eq!(result.answer.as_deref(), Some("streamed final answer"));
    let partials = partials.lock().unwrap();
    assert!(!partials.is_empty());
    assert_eq!(partials.last().map(String::as_str), Some("streamed final answer"));
    for pair in partials.windows(2) {
        assert!(pair[1].starts_with(&pair[0]));
    }
}

#[tokio::test]
async fn usage_attributes_each_attempt_to_one_provider() {
    let failing = MockProvider::cloud("paid");
    failing.push_failure(MockFailure::RateLimited, "429");
    let fallback = MockProvider::local("free");
    let orchestrator = wire(&[failing, fallback], None);

    let query = "what was that docker command again?";
    let result = orchestrator
        .process_query(query, &items(1), BackendChoice::Auto, None, None)
        .await;
    assert!(result.answer.is_some());

    let summary = orchestrator.usage().summary().await;
    assert_eq!(summary.total_calls, 2);
    assert_eq!(summary.by_provider["paid"].calls, 1);
    assert_eq!(summary.by_provider["free"].calls, 1);
    // Rough estimate scales with query length.
    assert!(summary.by_provider["paid"].approx_tokens >= query.len() / 4);
}

#[tokio::test]
async fn tag_generation_routes_through_chain() {
    let down = MockProvider::cloud("down");
    down.push_failure(MockFailure::Network, "unreachable");
    let up = MockProvider::cloud("up");
    up.push_answer("docker, cli, devops");
    let orchestrator = wire(&[down.clone(), up], None);

    let tags = orchestrator
        .generate_tags("docker run -it ubuntu bash", None, None)
        .await
        .unwrap();
    assert_eq!(tags, vec!["docker", "cli", "devops"]);

    let breaker = orchestrator.router().unwrap().breaker_for("down").await;
    assert_eq!(breaker.failure_count().await, 1);
}

#[tokio::test]
async fn tag_generation_without_router_is_not_configured() {
    init_tracing();
    let orchestrator = QueryOrchestrator::without_router(Arc::new(SemanticIndex::in_memory()));
    let err = orchestrator.generate_tags("text", None, None).await.unwrap_err();
    assert!(matches!(err, AiError::NotConfigured));
}

#[tokio::test]
async fn queries_work_before_index_is_ready() {
    let provider = MockProvider::cloud("cloud");
    let orchestrator = wire(&[provider], None);

    // Index never initialized: retrieval yields nothing, recency fill takes
    // over, and the query still succeeds.
    let result = orchestrator
        .process_query("anything", &items(8), BackendChoice::Auto, None, None)
        .await;
    assert!(result.answer.is_some());
    assert_eq!(result.context_items.len(), 5);
}
