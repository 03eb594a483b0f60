//! Integration test verifying that `#[instrument]` annotations produce
//! the expected spans on the cache, result backend and buffer operations.

#![allow(clippy::expect_used)]

mod common;

use std::sync::{Arc, Mutex};

use common::{buffer_over, column, group, pk};
use tracing::Subscriber;
use tracing_subscriber::{layer::SubscriberExt, registry::LookupSpan};
use tuplekit_cache::{
    CacheConfig, CacheValue, Extra, ResultBackend, ResultBackendConfig, Timeout, TupleCache,
    testutil::default_store,
};

// ---------------------------------------------------------------------------
// Collecting layer: records span names as they are created
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
struct SpanCollector {
    spans: Arc<Mutex<Vec<String>>>,
}

impl<S> tracing_subscriber::Layer<S> for SpanCollector
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(
        &self,
        _attrs: &tracing::span::Attributes<'_>,
        id: &tracing::span::Id,
        ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        if let Some(span) = ctx.span(id) {
            self.spans.lock().expect("lock poisoned").push(span.name().to_owned());
        }
    }
}

fn assert_span(spans: &Arc<Mutex<Vec<String>>>, name: &str) {
    let recorded = spans.lock().expect("lock poisoned");
    assert!(recorded.iter().any(|s| s == name), "expected a '{name}' span, got: {recorded:?}");
}

#[tokio::test]
async fn cache_operations_create_spans() {
    let collector = SpanCollector::default();
    let spans = Arc::clone(&collector.spans);

    let subscriber = tracing_subscriber::registry().with(collector);
    let _guard = tracing::subscriber::set_default(subscriber);

    let cache = TupleCache::new(Arc::new(default_store()), CacheConfig::default());
    cache.set("k", &CacheValue::Int(1), Timeout::Default).await.expect("set");
    let _ = cache.add("k", &CacheValue::Int(2), Timeout::Default).await;
    let _ = cache.incr("k", 1).await;
    let _ = cache.get("k").await;

    for name in ["set", "add", "incr", "get"] {
        assert_span(&spans, name);
    }
    // Adapter spans wrap the store's own.
    assert_span(&spans, "insert");
    assert_span(&spans, "call");
}

#[tokio::test]
async fn result_backend_operations_create_spans() {
    let collector = SpanCollector::default();
    let spans = Arc::clone(&collector.spans);

    let subscriber = tracing_subscriber::registry().with(collector);
    let _guard = tracing::subscriber::set_default(subscriber);

    let backend = ResultBackend::new(
        Arc::new(default_store()),
        ResultBackendConfig::default(),
    );
    backend.set("task", "done").await.expect("set");
    let _ = backend.mget(&["task"]).await;

    assert_span(&spans, "set");
    assert_span(&spans, "mget");
    assert_span(&spans, "get_many");
}

#[tokio::test]
async fn buffer_operations_create_spans() {
    let collector = SpanCollector::default();
    let spans = Arc::clone(&collector.spans);

    let subscriber = tracing_subscriber::registry().with(collector);
    let _guard = tracing::subscriber::set_default(subscriber);

    let h = buffer_over(Arc::new(default_store()));
    h.buffer.incr(&group(), &column("times_seen", 1), &pk(1), &Extra::new()).await.expect("incr");
    h.buffer.process(&group(), &column("times_seen", 1), &pk(1)).await.expect("process");

    assert_span(&spans, "incr");
    assert_span(&spans, "process");
    assert_span(&spans, "delete");
}
