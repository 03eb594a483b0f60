//! Concurrent access stress tests for `MemoryTupleStore`.
//!
//! These exercise the atomic primitives the adapters build on under
//! multi-threaded contention: insert-if-absent, field arithmetic, and
//! delete-returning-old used as read-and-reset.

#![allow(clippy::expect_used, clippy::panic)]

use tokio::task::JoinSet;
use tuplekit_store::{
    Field, MemoryTupleStore, SpaceDef, SpaceId, StorageError, Tuple, TupleStore, UpdateOp,
};

/// Number of concurrent tasks for most tests.
const CONCURRENCY: usize = 16;

/// Number of insert races for the exactly-one-winner test.
const INSERT_ROUNDS: usize = 50;

/// Number of operations each task performs.
const OPS_PER_TASK: usize = 100;

const COUNTERS: SpaceId = SpaceId(2);

// ---------------------------------------------------------------------------
// Helper
// ---------------------------------------------------------------------------

fn store() -> MemoryTupleStore {
    let store = MemoryTupleStore::new();
    store
        .create_space(SpaceDef::new(COUNTERS, 1).expect("valid def"))
        .expect("create space");
    store
}

fn counter(key: &str, value: i64) -> Tuple {
    Tuple::from(vec![Field::from(key), Field::Int(value)])
}

// ---------------------------------------------------------------------------
// Test: racing inserts: exactly one winner per key
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn insert_exactly_one_winner_per_round() {
    let store = store();

    for round in 0..INSERT_ROUNDS {
        let key = format!("race:{round}");
        let mut set = JoinSet::new();
        for task_id in 0..CONCURRENCY {
            let store = store.clone();
            let key = key.clone();
            set.spawn(async move {
                let task = i64::try_from(task_id).expect("small");
                store.insert(COUNTERS, counter(&key, task)).await
            });
        }

        let mut winners = 0;
        let mut conflicts = 0;
        while let Some(result) = set.join_next().await {
            match result.expect("task should not panic") {
                Ok(()) => winners += 1,
                Err(StorageError::Conflict) => conflicts += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!(winners, 1, "round {round}: exactly one insert must win");
        assert_eq!(conflicts, CONCURRENCY - 1);
    }
}

// ---------------------------------------------------------------------------
// Test: concurrent adds: no lost updates
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_adds_lose_nothing() {
    let store = store();
    store.insert(COUNTERS, counter("hits", 0)).await.expect("seed");

    let mut set = JoinSet::new();
    for _ in 0..CONCURRENCY {
        let store = store.clone();
        set.spawn(async move {
            for _ in 0..OPS_PER_TASK {
                store
                    .update(COUNTERS, &[Field::from("hits")], &[UpdateOp::Add { field: 1, delta: 1 }])
                    .await
                    .expect("update should succeed");
            }
        });
    }
    while let Some(result) = set.join_next().await {
        result.expect("task should not panic");
    }

    let row = store.get(COUNTERS, &[Field::from("hits")]).await.expect("get").expect("row exists");
    let expected = i64::try_from(CONCURRENCY * OPS_PER_TASK).expect("small");
    assert_eq!(row.int(1), Some(expected));
}

// ---------------------------------------------------------------------------
// Test: add racing read-and-reset: every unit is observed exactly once
// ---------------------------------------------------------------------------

/// Writers create-or-add into a counter while a drainer repeatedly deletes
/// it. The sum of everything drained plus whatever is left must equal the
/// number of increments issued.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn drain_and_add_conserve_total() {
    let store = store();
    let key = vec![Field::from("pending")];

    let mut writers = JoinSet::new();
    for _ in 0..CONCURRENCY {
        let store = store.clone();
        let key = key.clone();
        writers.spawn(async move {
            for _ in 0..OPS_PER_TASK {
                loop {
                    match store.insert(COUNTERS, counter("pending", 1)).await {
                        Ok(()) => break,
                        Err(StorageError::Conflict) => {},
                        Err(other) => panic!("unexpected error: {other}"),
                    }
                    let added = store
                        .update(COUNTERS, &key, &[UpdateOp::Add { field: 1, delta: 1 }])
                        .await
                        .expect("update");
                    if added.is_some() {
                        break;
                    }
                }
            }
        });
    }

    let drainer = {
        let store = store.clone();
        let key = key.clone();
        tokio::spawn(async move {
            let mut drained = 0i64;
            for _ in 0..OPS_PER_TASK {
                if let Some(row) = store.delete(COUNTERS, &key).await.expect("delete") {
                    drained += row.int(1).expect("integer counter");
                }
                tokio::task::yield_now().await;
            }
            drained
        })
    };

    while let Some(result) = writers.join_next().await {
        result.expect("writer should not panic");
    }
    let drained = drainer.await.expect("drainer should not panic");
    let remaining = store
        .delete(COUNTERS, &key)
        .await
        .expect("final delete")
        .and_then(|row| row.int(1))
        .unwrap_or(0);

    let expected = i64::try_from(CONCURRENCY * OPS_PER_TASK).expect("small");
    assert_eq!(drained + remaining, expected);
}
