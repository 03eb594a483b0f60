//! Expiry behavior of `MemoryTupleStore`: reads never filter expired rows,
//! the sweeper eventually removes them, and `replace_if_expired` treats the
//! `expire_at` boundary second as already expired.

#![allow(clippy::expect_used, clippy::panic)]

use std::time::Duration;

use tuplekit_store::{
    Field, MemoryTupleStore, SpaceDef, SpaceId, Tuple, TupleStore, assert_conflict,
    assert_storage_ok, expiry, procedures,
};

const CACHE: SpaceId = SpaceId(1);

fn store(interval: Duration) -> MemoryTupleStore {
    let store = MemoryTupleStore::with_sweep_interval(interval);
    store
        .create_space(SpaceDef::new(CACHE, 1).expect("valid def").with_expire_field(2))
        .expect("create space");
    store
}

fn row(key: &str, value: i64, expire_at: i64) -> Tuple {
    Tuple::from(vec![Field::from(key), Field::Int(value), Field::Int(expire_at)])
}

#[tokio::test]
async fn expired_row_is_still_readable_before_sweep() {
    let store = store(Duration::from_secs(3600));
    let now = expiry::unix_timestamp();
    store.replace(CACHE, row("k", 1, now - 1)).await.expect("replace");

    let fetched = store.get(CACHE, &[Field::from("k")]).await.expect("get");
    assert!(fetched.is_some(), "store reads do not interpret expiry");
}

#[tokio::test]
async fn insert_over_an_unswept_expired_row_conflicts() {
    let store = store(Duration::from_secs(3600));
    let now = expiry::unix_timestamp();
    assert_storage_ok!(store.insert(CACHE, row("k", 1, now - 1)).await);

    assert_conflict!(store.insert(CACHE, row("k", 2, 0)).await, "expiry is not checked on insert");
    let fetched = assert_storage_ok!(store.get(CACHE, &[Field::from("k")]).await);
    assert_eq!(fetched.and_then(|row| row.int(1)), Some(1));
}

#[tokio::test]
async fn sweeper_keeps_live_and_eternal_rows() {
    let store = store(Duration::from_millis(20));
    let now = expiry::unix_timestamp();
    store.replace(CACHE, row("past", 1, now - 10)).await.expect("replace");
    store.replace(CACHE, row("future", 1, now + 3600)).await.expect("replace");
    store.replace(CACHE, row("eternal", 1, expiry::NEVER)).await.expect("replace");

    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(store.get(CACHE, &[Field::from("past")]).await.expect("get").is_none());
    assert!(store.get(CACHE, &[Field::from("future")]).await.expect("get").is_some());
    assert!(store.get(CACHE, &[Field::from("eternal")]).await.expect("get").is_some());
}

#[tokio::test]
async fn replace_if_expired_treats_boundary_as_expired() {
    let store = store(Duration::from_secs(3600));
    store.replace(CACHE, row("k", 1, 1_000)).await.expect("replace");

    let mut args = vec![Field::Int(1), Field::Int(1_000)];
    args.extend(row("k", 2, 0).into_fields());
    let written = store.call(procedures::REPLACE_IF_EXPIRED, args).await.expect("call");
    assert_eq!(written.len(), 1);

    let fetched = store.get(CACHE, &[Field::from("k")]).await.expect("get").expect("row");
    assert_eq!(fetched.int(1), Some(2));
}

#[tokio::test]
async fn replace_if_expired_writes_absent_key() {
    let store = store(Duration::from_secs(3600));
    let args = procedures::replace_if_expired_args(CACHE, &row("fresh", 7, 0));
    let written = assert_storage_ok!(store.call(procedures::REPLACE_IF_EXPIRED, args).await);
    assert_eq!(written, vec![row("fresh", 7, 0)]);
}

#[tokio::test]
async fn replace_if_expired_never_overwrites_eternal_row() {
    let store = store(Duration::from_secs(3600));
    store.replace(CACHE, row("k", 1, expiry::NEVER)).await.expect("replace");

    let args = procedures::replace_if_expired_args(CACHE, &row("k", 2, 0));
    let written = store.call(procedures::REPLACE_IF_EXPIRED, args).await.expect("call");
    assert!(written.is_empty());
}
