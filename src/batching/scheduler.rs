// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Chunk-or-interval batch scheduler.
//!
//! Posted tasks accumulate in a single pending buffer and flush when the
//! chunk-size threshold is reached or when the interval timer elapses,
//! whichever fires first. A chunk flush resets the interval timer, so the
//! two triggers never double-flush the same buffer.
//!
//! # Example
//!
//! ```
//! use swr_engine::{BatchScheduler, BatchConfig};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let scheduler = BatchScheduler::start(BatchConfig::default());
//! scheduler.post(|| println!("flushed"));
//! scheduler.shutdown().await;
//! # }
//! ```

use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

/// A zero-argument work item.
pub type BatchTask = Box<dyn FnOnce() + Send + 'static>;

/// Batch flush trigger reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    /// Interval timer elapsed.
    Interval,
    /// Chunk-size threshold reached.
    Chunk,
    /// Shutdown flush.
    Shutdown,
}

/// Configuration for the batch scheduler.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Flush whatever is pending every this many milliseconds.
    pub interval_ms: u64,
    /// Flush immediately once this many tasks are pending.
    pub chunk_size: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            interval_ms: 500,
            chunk_size: 10,
        }
    }
}

/// Accumulates posted tasks and flushes them in enqueue order.
///
/// The flush loop runs on the tokio runtime the scheduler was started on
/// (the dispatcher). Dropping the scheduler aborts the loop; call
/// [`shutdown`](Self::shutdown) for a final flush of the remainder.
pub struct BatchScheduler {
    tx: mpsc::UnboundedSender<BatchTask>,
    stop: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl BatchScheduler {
    /// Begin the scheduler's lifetime on the current runtime.
    #[must_use]
    pub fn start(config: BatchConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (stop, stop_rx) = watch::channel(false);
        let chunk_size = config.chunk_size.max(1);
        let interval = Duration::from_millis(config.interval_ms.max(1));

        let handle = tokio::spawn(run_loop(rx, stop_rx, interval, chunk_size));

        Self {
            tx,
            stop,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Enqueue a task. Tasks are invoked in enqueue order at the next
    /// flush. Posting after shutdown is a silent no-op.
    pub fn post(&self, task: impl FnOnce() + Send + 'static) {
        let _ = self.tx.send(Box::new(task));
    }

    /// Stop the flush loop, running whatever is still pending first.
    pub async fn shutdown(&self) {
        let _ = self.stop.send(true);
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

impl Drop for BatchScheduler {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.lock().take() {
            handle.abort();
        }
    }
}

async fn run_loop(
    mut rx: mpsc::UnboundedReceiver<BatchTask>,
    mut stop_rx: watch::Receiver<bool>,
    interval: Duration,
    chunk_size: usize,
) {
    let mut pending: Vec<BatchTask> = Vec::new();
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // An interval's first tick completes immediately; push it out one period.
    ticker.reset();

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                flush(&mut pending, FlushReason::Interval);
            }
            task = rx.recv() => {
                match task {
                    Some(task) => {
                        pending.push(task);
                        if pending.len() >= chunk_size {
                            flush(&mut pending, FlushReason::Chunk);
                            ticker.reset();
                        }
                    }
                    None => break,
                }
            }
            _ = stop_rx.changed() => break,
        }
    }

    // Drain anything posted before the stop signal won the race.
    while let Ok(task) = rx.try_recv() {
        pending.push(task);
    }
    flush(&mut pending, FlushReason::Shutdown);
}

fn flush(pending: &mut Vec<BatchTask>, reason: FlushReason) {
    if pending.is_empty() {
        return;
    }
    let count = pending.len();
    for task in pending.drain(..) {
        task();
    }
    crate::metrics::record_batch_flush(count);
    debug!(count, ?reason, "Flushed batch");
}
