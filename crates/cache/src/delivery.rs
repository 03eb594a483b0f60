//! In-process delivery scheduling.
//!
//! [`DeliveryQueue`] is a [`DeliveryScheduler`] for deployments without an
//! external task queue. Requests go over a channel to a [`DeliveryWorker`],
//! which waits out each request's delay on its own task and then calls
//! [`CoalescingBuffer::process`].
//!
//! On [`DeliveryQueue::shutdown`], pending deliveries stop waiting and run
//! immediately, and the worker returns after the last one finishes. Nothing
//! scheduled before shutdown is lost; scheduling after shutdown fails. The
//! buffer the worker runs usually holds a queue handle itself, so dropping
//! the other handles does not stop it; call `shutdown`.
//!
//! ```
//! use std::sync::Arc;
//!
//! use async_trait::async_trait;
//! use tuplekit_cache::{
//!     BufferConfig, BufferConsumer, CacheResult, CoalescingBuffer, Delivery, DeliveryQueue,
//!     DeliveryScheduler,
//! };
//! use tuplekit_store::MemoryTupleStore;
//!
//! struct Printer;
//!
//! #[async_trait]
//! impl BufferConsumer for Printer {
//!     async fn apply(&self, delivery: Delivery) -> CacheResult<()> {
//!         println!("{} {:?}", delivery.model, delivery.columns);
//!         Ok(())
//!     }
//! }
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let store = Arc::new(MemoryTupleStore::new());
//! for def in CoalescingBuffer::<MemoryTupleStore>::space_defs(&BufferConfig::default()).unwrap() {
//!     store.create_space(def).unwrap();
//! }
//!
//! let (queue, worker) = DeliveryQueue::new();
//! let buffer = CoalescingBuffer::builder()
//!     .store(store)
//!     .scheduler(Arc::new(queue.clone()) as Arc<dyn DeliveryScheduler>)
//!     .consumer(Arc::new(Printer) as Arc<dyn BufferConsumer>)
//!     .build();
//! let handle = worker.spawn(buffer.clone());
//!
//! // ... buffer.incr(..) from request handlers ...
//!
//! queue.shutdown();
//! handle.await.unwrap();
//! # });
//! ```

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::{
    select,
    sync::{mpsc, watch},
    task::{JoinHandle, JoinSet},
    time::sleep,
};
use tracing::{debug, error, warn};
use tuplekit_store::TupleStore;

use crate::{
    buffer::{CoalescingBuffer, DeliveryRequest, DeliveryScheduler},
    error::{CacheError, CacheResult},
};

struct Scheduled {
    request: DeliveryRequest,
    delay: Duration,
}

/// Sending half: schedule requests and signal shutdown.
#[derive(Clone)]
pub struct DeliveryQueue {
    tx: mpsc::UnboundedSender<Scheduled>,
    shutdown_tx: Arc<watch::Sender<bool>>,
}

/// Receiving half: runs scheduled deliveries against a buffer.
pub struct DeliveryWorker {
    rx: mpsc::UnboundedReceiver<Scheduled>,
    shutdown_rx: watch::Receiver<bool>,
}

impl std::fmt::Debug for DeliveryQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryQueue").field("closed", &self.tx.is_closed()).finish()
    }
}

impl DeliveryQueue {
    /// Creates a connected queue and worker.
    #[must_use]
    pub fn new() -> (Self, DeliveryWorker) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        (Self { tx, shutdown_tx: Arc::new(shutdown_tx) }, DeliveryWorker { rx, shutdown_rx })
    }

    /// Flushes pending deliveries and stops accepting new ones.
    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }

    fn is_shut_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }
}

#[async_trait]
impl DeliveryScheduler for DeliveryQueue {
    async fn schedule(&self, request: DeliveryRequest, delay: Duration) -> CacheResult<()> {
        if self.is_shut_down() {
            return Err(CacheError::delivery("delivery queue is shut down"));
        }
        self.tx
            .send(Scheduled { request, delay })
            .map_err(|_| CacheError::delivery("delivery worker is gone"))
    }
}

impl DeliveryWorker {
    /// Runs the worker on a new Tokio task.
    pub fn spawn<S: TupleStore + 'static>(self, buffer: CoalescingBuffer<S>) -> JoinHandle<()> {
        tokio::spawn(self.run(buffer))
    }

    /// Receives requests until shutdown, then waits for in-flight deliveries.
    pub async fn run<S: TupleStore + 'static>(self, buffer: CoalescingBuffer<S>) {
        let Self { mut rx, mut shutdown_rx } = self;
        let mut in_flight = JoinSet::new();

        loop {
            select! {
                received = rx.recv() => match received {
                    Some(scheduled) => {
                        in_flight.spawn(deliver(buffer.clone(), scheduled, shutdown_rx.clone()));
                    },
                    None => break,
                },
                () = stopped(&mut shutdown_rx) => break,
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    log_join(joined);
                },
            }
        }

        // Requests that raced with shutdown still get delivered.
        rx.close();
        while let Ok(scheduled) = rx.try_recv() {
            in_flight.spawn(deliver(buffer.clone(), scheduled, shutdown_rx.clone()));
        }

        debug!(pending = in_flight.len(), "delivery worker flushing");
        while let Some(joined) = in_flight.join_next().await {
            log_join(joined);
        }
    }
}

async fn deliver<S: TupleStore + 'static>(
    buffer: CoalescingBuffer<S>,
    scheduled: Scheduled,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let Scheduled { request, delay } = scheduled;
    select! {
        () = sleep(delay) => {},
        () = stopped(&mut shutdown_rx) => {},
    }

    if let Err(err) = buffer.process_request(&request).await {
        warn!(model = %request.model, error = %err, "scheduled delivery failed");
    }
}

/// Resolves once shutdown is signalled or every queue handle is gone.
async fn stopped(shutdown_rx: &mut watch::Receiver<bool>) {
    let _ = shutdown_rx.wait_for(|stop| *stop).await;
}

fn log_join(joined: Result<(), tokio::task::JoinError>) {
    if let Err(err) = joined {
        error!(error = %err, "delivery task panicked");
    }
}
