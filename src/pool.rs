//! Fixed-size worker pool with per-item failure isolation.
//!
//! Every worker is a long-lived task owning its own state. Workers pull items
//! from a shared queue until it is empty or the pass is cancelled. An item
//! that errors or panics is logged and counted; its siblings carry on.

use std::any::Any;
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Result;
use async_trait::async_trait;
use futures_util::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// Processes one kind of item.
#[async_trait]
pub trait PoolWorker: Send + 'static {
    type Item: Send + 'static;
    type Outcome: Send + 'static;

    /// Short label used in log lines.
    fn describe(item: &Self::Item) -> String;

    async fn process(&mut self, item: Self::Item) -> Result<Self::Outcome>;
}

/// What happened during one pass.
#[derive(Debug)]
pub struct PoolReport<O> {
    pub outcomes: Vec<O>,
    /// Items that returned an error or panicked.
    pub failed: usize,
    /// Items left in the queue because the pass was cancelled.
    pub not_started: usize,
}

impl<O> PoolReport<O> {
    #[must_use]
    pub fn attempted(&self) -> usize {
        self.outcomes.len() + self.failed
    }
}

type Queue<T> = Arc<Mutex<VecDeque<T>>>;

fn next_item<T>(queue: &Queue<T>) -> Option<T> {
    queue
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .pop_front()
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

/// Run `items` through `workers`, one task per worker.
///
/// The pool size is `workers.len()`. Cancellation stops workers from taking
/// new items; items already in progress run to completion.
pub async fn run_pool<W: PoolWorker>(
    workers: Vec<W>,
    items: Vec<W::Item>,
    cancel: &CancellationToken,
) -> PoolReport<W::Outcome> {
    let queue: Queue<W::Item> = Arc::new(Mutex::new(VecDeque::from(items)));
    let mut handles = Vec::with_capacity(workers.len());

    for (index, mut worker) in workers.into_iter().enumerate() {
        let queue = Arc::clone(&queue);
        let cancel = cancel.clone();

        handles.push(tokio::spawn(async move {
            let mut outcomes = Vec::new();
            let mut failed = 0usize;

            while !cancel.is_cancelled() {
                let Some(item) = next_item(&queue) else {
                    break;
                };
                let label = W::describe(&item);

                match AssertUnwindSafe(worker.process(item)).catch_unwind().await {
                    Ok(Ok(outcome)) => outcomes.push(outcome),
                    Ok(Err(e)) => {
                        failed += 1;
                        error!(worker = index, item = %label, "Item failed: {e:#}");
                    }
                    Err(payload) => {
                        failed += 1;
                        error!(
                            worker = index,
                            item = %label,
                            "Item panicked: {}",
                            panic_message(payload.as_ref())
                        );
                    }
                }
            }

            debug!(worker = index, done = outcomes.len(), failed, "Worker finished");
            (outcomes, failed)
        }));
    }

    let mut report = PoolReport {
        outcomes: Vec::new(),
        failed: 0,
        not_started: 0,
    };

    for handle in handles {
        match handle.await {
            Ok((outcomes, failed)) => {
                report.outcomes.extend(outcomes);
                report.failed += failed;
            }
            Err(e) => error!("Worker task aborted: {e}"),
        }
    }

    report.not_started = queue.lock().unwrap_or_else(PoisonError::into_inner).len();
    report
}
