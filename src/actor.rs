// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Per-key execution with refcounted keep-alive.
//!
//! An [`ActorBlockRunner`] runs one logical block of work while at least
//! one observer is attached, and keeps it alive briefly after the last
//! observer detaches. This lets ephemeral observers (a screen navigated
//! away from and back) reuse an in-flight execution instead of
//! restarting it, bounding the restart cost by `keep_alive`.
//!
//! State machine: Idle → Running → Idle (after a keep-alive timeout) →
//! … → Cancelled (terminal, external). All executions for one key are
//! serialized: a new execution cannot start while the previous one is
//! still inside its cooldown window, and each carries an incremented
//! sequence number.

use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Factory for one execution of the keyed block. Receives the execution's
/// sequence number.
pub type ActorBlock = Arc<dyn Fn(u64) -> BoxFuture<'static, ()> + Send + Sync>;

/// Invoked when a keep-alive window lapses and the execution with the
/// given sequence number is cancelled.
pub type TimeoutCallback = Arc<dyn Fn(u64) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    /// No execution in flight.
    Idle,
    /// Block executing (possibly inside its cooldown window).
    Running,
    /// Owning scope cancelled; attaches are silently ignored.
    Cancelled,
}

struct Inner {
    state: RunnerState,
    refcount: usize,
    seq: u64,
    job: Option<JoinHandle<()>>,
    cooldown: Option<JoinHandle<()>>,
    /// Bumped on every attach/detach so a stale cooldown that lost the
    /// race against a re-attach cannot cancel the revived execution.
    cooldown_gen: u64,
}

/// Runs one block per key while observers are attached. See module docs.
pub struct ActorBlockRunner {
    keep_alive: Duration,
    block: ActorBlock,
    on_timeout: TimeoutCallback,
    weak: Weak<Self>,
    inner: Mutex<Inner>,
}

impl ActorBlockRunner {
    #[must_use]
    pub fn new(keep_alive: Duration, block: ActorBlock, on_timeout: TimeoutCallback) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            keep_alive,
            block,
            on_timeout,
            weak: weak.clone(),
            inner: Mutex::new(Inner {
                state: RunnerState::Idle,
                refcount: 0,
                seq: 0,
                job: None,
                cooldown: None,
                cooldown_gen: 0,
            }),
        })
    }

    /// Join the actor. The first attach launches the block; later ones
    /// only increment the refcount. An attach during the cooldown window
    /// cancels the pending timeout and the same execution continues.
    ///
    /// The returned lease detaches on drop. Attaching a cancelled runner
    /// yields an inert lease and starts nothing.
    #[must_use]
    pub fn attach(&self) -> ActorLease {
        let mut inner = self.inner.lock();
        if inner.state == RunnerState::Cancelled {
            trace!("Attach ignored: runner cancelled");
            return ActorLease { runner: Weak::new() };
        }

        inner.cooldown_gen += 1;
        if let Some(cooldown) = inner.cooldown.take() {
            cooldown.abort();
            trace!("Pending keep-alive timeout cancelled by re-attach");
        }

        inner.refcount += 1;
        if inner.state == RunnerState::Idle {
            inner.seq += 1;
            let seq = inner.seq;
            inner.state = RunnerState::Running;
            inner.job = Some(tokio::spawn((self.block)(seq)));
            debug!(seq, "Actor block launched");
        }

        ActorLease {
            runner: self.weak.clone(),
        }
    }

    fn detach(&self) {
        let mut inner = self.inner.lock();
        if inner.state == RunnerState::Cancelled {
            return;
        }
        inner.refcount = inner.refcount.saturating_sub(1);
        if inner.refcount > 0 || inner.state != RunnerState::Running {
            return;
        }

        inner.cooldown_gen += 1;
        let gen = inner.cooldown_gen;
        let weak = self.weak.clone();
        let keep_alive = self.keep_alive;
        inner.cooldown = Some(tokio::spawn(async move {
            tokio::time::sleep(keep_alive).await;
            if let Some(runner) = weak.upgrade() {
                runner.expire(gen);
            }
        }));
        trace!(keep_alive = ?self.keep_alive, "Last observer detached, cooldown started");
    }

    /// Cooldown elapsed: cancel the execution and go back to Idle.
    fn expire(&self, gen: u64) {
        let seq = {
            let mut inner = self.inner.lock();
            if inner.cooldown_gen != gen
                || inner.refcount > 0
                || inner.state != RunnerState::Running
            {
                return;
            }
            if let Some(job) = inner.job.take() {
                job.abort();
            }
            inner.cooldown = None;
            inner.state = RunnerState::Idle;
            inner.seq
        };
        debug!(seq, "Keep-alive lapsed, actor block cancelled");
        (self.on_timeout)(seq);
    }

    /// External scope cancellation: immediate and terminal. Further
    /// attaches are silently ignored; no new execution ever starts.
    pub fn cancel(&self) {
        let mut inner = self.inner.lock();
        if inner.state == RunnerState::Cancelled {
            return;
        }
        if let Some(job) = inner.job.take() {
            job.abort();
        }
        if let Some(cooldown) = inner.cooldown.take() {
            cooldown.abort();
        }
        inner.refcount = 0;
        inner.state = RunnerState::Cancelled;
        debug!("Runner cancelled");
    }

    #[must_use]
    pub fn state(&self) -> RunnerState {
        self.inner.lock().state
    }

    /// Sequence number of the current (or most recent) execution.
    #[must_use]
    pub fn sequence(&self) -> u64 {
        self.inner.lock().seq
    }

    #[must_use]
    pub fn refcount(&self) -> usize {
        self.inner.lock().refcount
    }

    /// Whether at least one observer is attached to a running block.
    #[must_use]
    pub fn is_active(&self) -> bool {
        let inner = self.inner.lock();
        inner.refcount > 0 && inner.state == RunnerState::Running
    }
}

/// Observer handle; dropping it detaches. Leases from a cancelled runner
/// are inert.
pub struct ActorLease {
    runner: Weak<ActorBlockRunner>,
}

impl ActorLease {
    /// Explicit detach; identical to dropping the lease.
    pub fn release(self) {}
}

impl Drop for ActorLease {
    fn drop(&mut self) {
        if let Some(runner) = self.runner.upgrade() {
            runner.detach();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

    struct Probe {
        launches: AtomicUsize,
        timeouts: AtomicUsize,
        last_timeout_seq: AtomicU64,
    }

    impl Probe {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                launches: AtomicUsize::new(0),
                timeouts: AtomicUsize::new(0),
                last_timeout_seq: AtomicU64::new(0),
            })
        }
    }

    fn runner(keep_alive_ms: u64, probe: &Arc<Probe>) -> Arc<ActorBlockRunner> {
        let launches = probe.clone();
        let block: ActorBlock = Arc::new(move |_seq| {
            launches.launches.fetch_add(1, Ordering::SeqCst);
            Box::pin(async {
                // Stand-in for a long-lived fetch/subscribe loop.
                futures::future::pending::<()>().await;
            })
        });
        let timeouts = probe.clone();
        let on_timeout: TimeoutCallback = Arc::new(move |seq| {
            timeouts.timeouts.fetch_add(1, Ordering::SeqCst);
            timeouts.last_timeout_seq.store(seq, Ordering::SeqCst);
        });
        ActorBlockRunner::new(Duration::from_millis(keep_alive_ms), block, on_timeout)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_attach_launches_once() {
        let probe = Probe::new();
        let runner = runner(100, &probe);

        let a = runner.attach();
        let b = runner.attach();
        settle().await;

        assert_eq!(probe.launches.load(Ordering::SeqCst), 1);
        assert_eq!(runner.refcount(), 2);
        assert_eq!(runner.sequence(), 1);
        assert!(runner.is_active());
        drop((a, b));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_fires_only_after_keep_alive() {
        let probe = Probe::new();
        let runner = runner(100, &probe);

        let lease = runner.attach();
        settle().await;
        lease.release();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(probe.timeouts.load(Ordering::SeqCst), 0, "still cooling down");
        assert_eq!(runner.state(), RunnerState::Running);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(probe.timeouts.load(Ordering::SeqCst), 1);
        assert_eq!(probe.last_timeout_seq.load(Ordering::SeqCst), 1);
        assert_eq!(runner.state(), RunnerState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reattach_within_window_prevents_timeout() {
        let probe = Probe::new();
        let runner = runner(100, &probe);

        let lease = runner.attach();
        settle().await;
        drop(lease);

        tokio::time::sleep(Duration::from_millis(50)).await;
        let revived = runner.attach();
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(probe.timeouts.load(Ordering::SeqCst), 0, "timeout never fires");
        assert_eq!(probe.launches.load(Ordering::SeqCst), 1, "same execution continues");
        assert_eq!(runner.sequence(), 1);
        drop(revived);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attach_after_timeout_starts_new_sequence() {
        let probe = Probe::new();
        let runner = runner(100, &probe);

        let lease = runner.attach();
        settle().await;
        drop(lease);
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(probe.timeouts.load(Ordering::SeqCst), 1);

        let lease = runner.attach();
        settle().await;
        assert_eq!(probe.launches.load(Ordering::SeqCst), 2);
        assert_eq!(runner.sequence(), 2);
        drop(lease);
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_detach_keeps_running() {
        let probe = Probe::new();
        let runner = runner(100, &probe);

        let a = runner.attach();
        let b = runner.attach();
        settle().await;
        drop(a);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(probe.timeouts.load(Ordering::SeqCst), 0);
        assert!(runner.is_active());
        drop(b);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_is_terminal() {
        let probe = Probe::new();
        let runner = runner(100, &probe);

        let lease = runner.attach();
        settle().await;
        runner.cancel();
        assert_eq!(runner.state(), RunnerState::Cancelled);

        // Attach after cancellation starts nothing.
        let inert = runner.attach();
        settle().await;
        assert_eq!(probe.launches.load(Ordering::SeqCst), 1);
        assert_eq!(runner.state(), RunnerState::Cancelled);
        assert_eq!(runner.refcount(), 0);

        drop(inert);
        drop(lease);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(probe.timeouts.load(Ordering::SeqCst), 0, "no timeout after cancel");
    }
}
