#![allow(clippy::expect_used, clippy::panic)]
//! Integration tests for fail-point injection.
//!
//! These tests require the `failpoints` feature:
//! ```bash
//! cargo test -p tuplekit-store --features failpoints --test failpoint_tests
//! ```

use tuplekit_store::{Field, MemoryTupleStore, SpaceDef, SpaceId, StorageError, TupleStore, procedures};

fn store() -> MemoryTupleStore {
    let store = MemoryTupleStore::new();
    store.create_space(SpaceDef::new(SpaceId::from(3), 2).expect("valid def")).expect("create space");
    store
}

fn drain_args() -> Vec<Field> {
    procedures::drain_prefix_args(SpaceId::from(3), &[Field::from("group")])
}

#[tokio::test]
async fn call_failpoint_returns_error() {
    let scenario = fail::FailScenario::setup();
    fail::cfg("memory-store-call", "return").expect("failed to configure fail point");

    let result = store().call(procedures::DRAIN_PREFIX, drain_args()).await;
    assert!(
        matches!(result, Err(StorageError::Internal { .. })),
        "call should fail when fail point is active, got {result:?}"
    );

    scenario.teardown();
}

#[tokio::test]
async fn call_without_failpoint_succeeds() {
    let scenario = fail::FailScenario::setup();

    let result = store().call(procedures::DRAIN_PREFIX, drain_args()).await;
    assert!(result.is_ok(), "call should succeed without fail point");

    scenario.teardown();
}
