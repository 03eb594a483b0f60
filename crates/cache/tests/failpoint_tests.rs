#![allow(clippy::expect_used, clippy::panic)]
//! Integration tests for fail-point injection in the buffer drain.
//!
//! These tests require the `failpoints` feature:
//! ```bash
//! cargo test -p tuplekit-cache --features failpoints --test failpoint_tests
//! ```

mod common;

use std::sync::Arc;

use common::{buffer_over, column, group, pk};
use serde_json::json;
use tuplekit_cache::{CacheError, Extra, ProcessOutcome, testutil::default_store};
use tuplekit_store::{SpaceId, TupleStore};

const COUNTERS: SpaceId = SpaceId(2);
const EXTRAS: SpaceId = SpaceId(3);

#[tokio::test]
async fn extra_drain_failure_restores_the_counters() {
    let scenario = fail::FailScenario::setup();
    fail::cfg("buffer-drain-extra", "return").expect("failed to configure fail point");

    let store = Arc::new(default_store());
    let h = buffer_over(Arc::clone(&store));
    let extra = Extra::from([("foo".to_owned(), json!("bar"))]);
    h.buffer.incr(&group(), &column("times_seen", 1), &pk(1), &extra).await.expect("incr");

    let result = h.buffer.process(&group(), &column("times_seen", 1), &pk(1)).await;
    assert!(
        matches!(result, Err(CacheError::Store(_))),
        "process should fail when fail point is active, got {result:?}"
    );
    assert_eq!(store.len(COUNTERS).await.expect("len"), 1, "drained counters merged back");
    assert_eq!(store.len(EXTRAS).await.expect("len"), 1, "extras untouched");
    assert_eq!(h.consumer.count(), 0);

    let requests = h.scheduler.requests();
    assert_eq!(requests.len(), 2, "the restored window is scheduled again");

    fail::remove("buffer-drain-extra");
    let retry = h.buffer.process_request(&requests[1].0).await.expect("retry");
    assert_eq!(retry, ProcessOutcome::Delivered);
    let deliveries = h.consumer.deliveries();
    assert_eq!(deliveries[0].columns, column("times_seen", 1));
    assert_eq!(deliveries[0].extra, Some(extra));

    scenario.teardown();
}

#[tokio::test]
async fn later_increments_join_the_restored_window() {
    let scenario = fail::FailScenario::setup();

    let store = Arc::new(default_store());
    let h = buffer_over(Arc::clone(&store));
    h.buffer.incr(&group(), &column("times_seen", 2), &pk(1), &Extra::new()).await.expect("incr");

    fail::cfg("buffer-drain-extra", "return").expect("failed to configure fail point");
    let result = h.buffer.process(&group(), &column("times_seen", 1), &pk(1)).await;
    assert!(result.is_err(), "got {result:?}");
    fail::remove("buffer-drain-extra");

    // The restored row is open again, so a later increment only joins it.
    h.buffer.incr(&group(), &column("times_seen", 3), &pk(1), &Extra::new()).await.expect("incr");
    assert_eq!(h.scheduler.requests().len(), 2);

    h.buffer.process(&group(), &column("times_seen", 1), &pk(1)).await.expect("process");
    assert_eq!(h.consumer.total("times_seen"), 5);

    scenario.teardown();
}

#[tokio::test]
async fn process_without_failpoint_succeeds() {
    let scenario = fail::FailScenario::setup();

    let h = buffer_over(Arc::new(default_store()));
    h.buffer.incr(&group(), &column("times_seen", 1), &pk(1), &Extra::new()).await.expect("incr");
    let outcome =
        h.buffer.process(&group(), &column("times_seen", 1), &pk(1)).await.expect("process");
    assert_eq!(outcome, ProcessOutcome::Delivered);

    scenario.teardown();
}

#[tokio::test]
async fn store_call_failure_surfaces_from_process() {
    let scenario = fail::FailScenario::setup();
    fail::cfg("memory-store-call", "return").expect("failed to configure fail point");

    let h = buffer_over(Arc::new(default_store()));
    h.buffer.incr(&group(), &column("times_seen", 1), &pk(1), &Extra::new()).await.expect("incr");
    let result = h.buffer.process(&group(), &column("times_seen", 1), &pk(1)).await;
    assert!(matches!(result, Err(CacheError::Store(_))), "got {result:?}");

    scenario.teardown();
}
