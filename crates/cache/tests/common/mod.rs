//! Helpers shared by the integration tests.

#![allow(dead_code)]

use std::{collections::BTreeMap, sync::Arc};

use tuplekit_cache::{
    BufferConfig, CoalescingBuffer, Columns, FilterValue, Filters, ModelLabel,
    testutil::{RecordingConsumer, RecordingScheduler, recording_buffer},
};
use tuplekit_store::TupleStore;

pub struct BufferHarness<S> {
    pub buffer: CoalescingBuffer<S>,
    pub scheduler: Arc<RecordingScheduler>,
    pub consumer: Arc<RecordingConsumer>,
}

pub fn buffer_over<S: TupleStore + 'static>(store: Arc<S>) -> BufferHarness<S> {
    let (buffer, scheduler, consumer) = recording_buffer(store, BufferConfig::default());
    BufferHarness { buffer, scheduler, consumer }
}

pub fn group() -> ModelLabel {
    ModelLabel::new("sentry", "Group")
}

pub fn pk(id: i64) -> Filters {
    BTreeMap::from([("pk".to_owned(), FilterValue::Int(id))])
}

pub fn column(name: &str, delta: i64) -> Columns {
    BTreeMap::from([(name.to_owned(), delta)])
}
