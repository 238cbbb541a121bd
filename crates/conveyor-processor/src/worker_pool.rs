//! Fixed-size worker pool over a single transport subscription.
//!
//! Start subscribes once and launches `n` workers that share the stream
//! through an async mutex. Each worker processes messages independently and
//! emits results on a bounded channel of capacity `2 × n`; a worker whose
//! result cannot be accepted blocks until the consumer catches up or the
//! shutdown token fires. There is no ordering across workers — the result
//! stream is an interleaving of per-worker orders.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use conveyor_transport::{Provider, Subscription, TransportError};

use crate::processor::{MessageProcessor, ProcessingResult, TagProcessor};

/// Concurrent consumer for one provider subscription.
///
/// Lifecycle: [`WorkerPool::start`] once, consume the receiver from
/// [`WorkerPool::take_results`], then cancel the token (or close the
/// provider) and [`WorkerPool::stop`].
pub struct WorkerPool {
    workers: usize,
    processor: Arc<dyn MessageProcessor>,
    results_rx: Option<mpsc::Receiver<ProcessingResult>>,
    handles: Vec<JoinHandle<()>>,
    stats: Arc<PoolStats>,
}

impl WorkerPool {
    /// Creates a pool of `workers` tasks (clamped to at least one) with the
    /// default [`TagProcessor`].
    #[must_use]
    pub fn new(workers: usize) -> Self {
        Self::with_processor(workers, Arc::new(TagProcessor))
    }

    /// Creates a pool with a custom processor.
    #[must_use]
    pub fn with_processor(workers: usize, processor: Arc<dyn MessageProcessor>) -> Self {
        Self {
            workers: workers.max(1),
            processor,
            results_rx: None,
            handles: Vec::new(),
            stats: Arc::new(PoolStats::default()),
        }
    }

    /// Subscribes to `provider` and launches the workers.
    ///
    /// The pool borrows the provider only for the subscribe call; the
    /// caller keeps ownership and its lifecycle.
    ///
    /// # Errors
    ///
    /// Propagates the provider's subscribe failure. Calling start twice
    /// without an intervening [`WorkerPool::stop`] is a
    /// [`TransportError::SubscriptionActive`].
    pub async fn start(
        &mut self,
        provider: &Provider,
        shutdown: CancellationToken,
    ) -> Result<(), TransportError> {
        if !self.handles.is_empty() {
            return Err(TransportError::SubscriptionActive);
        }

        let subscription = provider.subscribe(shutdown.child_token()).await?;
        let input = Arc::new(tokio::sync::Mutex::new(subscription));
        let (results_tx, results_rx) = mpsc::channel(self.workers * 2);
        self.results_rx = Some(results_rx);

        info!(workers = self.workers, provider = provider.kind(), "starting worker pool");
        for worker_id in 0..self.workers {
            self.handles.push(tokio::spawn(run_worker(
                worker_id,
                Arc::clone(&input),
                results_tx.clone(),
                Arc::clone(&self.processor),
                Arc::clone(&self.stats),
                shutdown.clone(),
            )));
        }

        Ok(())
    }

    /// Takes the result receiver.
    ///
    /// The caller must drain it; otherwise workers block on the bounded
    /// channel once it fills. Returns `None` before start or if already
    /// taken. The receiver yields `None` once every worker has exited.
    pub fn take_results(&mut self) -> Option<mpsc::Receiver<ProcessingResult>> {
        self.results_rx.take()
    }

    /// Waits for every worker to exit, then drains any results the pool
    /// still holds so no worker stays blocked on the result channel.
    ///
    /// Workers exit when the input stream ends — on scope cancellation or
    /// provider close — so cancel or close before stopping.
    pub async fn stop(&mut self) {
        debug!("stopping worker pool");
        for handle in self.handles.drain(..) {
            if let Err(e) = handle.await {
                warn!(error = %e, "worker task panicked");
            }
        }

        // Explicit drain: results nobody claimed are discarded here rather
        // than left to back up the channel.
        if let Some(mut rx) = self.results_rx.take() {
            let mut discarded = 0usize;
            while rx.try_recv().is_ok() {
                discarded += 1;
            }
            if discarded > 0 {
                debug!(discarded, "discarded unconsumed results at shutdown");
            }
        }

        let stats = self.stats.snapshot();
        info!(
            processed = stats.processed_count,
            errors = stats.error_count,
            "worker pool stopped"
        );
    }

    /// Returns a consistent snapshot of the pool counters.
    #[must_use]
    pub fn stats(&self) -> PoolStatsSnapshot {
        self.stats.snapshot()
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.workers)
            .field("running", &!self.handles.is_empty())
            .field("stats", &self.stats.snapshot())
            .finish_non_exhaustive()
    }
}

/// Pool counters behind one lock so a snapshot is internally consistent
/// (a processed count never outruns the duration it contributed).
#[derive(Debug, Default)]
struct PoolStats {
    inner: RwLock<PoolStatsInner>,
}

#[derive(Debug, Default, Clone, Copy)]
struct PoolStatsInner {
    processed_count: u64,
    error_count: u64,
    total_duration: Duration,
}

impl PoolStats {
    fn record(&self, success: bool, duration: Duration) {
        let mut inner = self.inner.write();
        if success {
            inner.processed_count += 1;
        } else {
            inner.error_count += 1;
        }
        inner.total_duration += duration;
    }

    fn snapshot(&self) -> PoolStatsSnapshot {
        let inner = self.inner.read();
        PoolStatsSnapshot {
            processed_count: inner.processed_count,
            error_count: inner.error_count,
            total_duration: inner.total_duration,
        }
    }
}

/// Point-in-time pool counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStatsSnapshot {
    /// Messages processed successfully.
    pub processed_count: u64,
    /// Messages whose processing failed.
    pub error_count: u64,
    /// Accumulated processing time across workers.
    pub total_duration: Duration,
}

/// One worker: read, process, record, emit, until the stream ends or the
/// shutdown token fires.
async fn run_worker(
    worker_id: usize,
    input: Arc<tokio::sync::Mutex<Subscription>>,
    results: mpsc::Sender<ProcessingResult>,
    processor: Arc<dyn MessageProcessor>,
    stats: Arc<PoolStats>,
    shutdown: CancellationToken,
) {
    debug!(worker = worker_id, "worker started");

    loop {
        let msg = tokio::select! {
            () = shutdown.cancelled() => break,
            next = async { input.lock().await.recv().await } => match next {
                Some(msg) => msg,
                None => break, // end of stream
            },
        };

        let started = Instant::now();
        let result = processor.process(&msg);
        stats.record(result.success, started.elapsed());

        tokio::select! {
            // Shutdown while the result channel is full: discard and exit.
            () = shutdown.cancelled() => break,
            sent = results.send(result) => {
                if sent.is_err() {
                    break; // receiver gone, nobody wants results anymore
                }
            }
        }
    }

    debug!(worker = worker_id, "worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use conveyor_transport::{MemoryProvider, Message};

    fn memory_provider(capacity: usize) -> Provider {
        Provider::Memory(MemoryProvider::new(capacity))
    }

    #[tokio::test]
    async fn test_start_requires_subscription() {
        let provider = memory_provider(10);
        let cancel = CancellationToken::new();

        // Occupy the only receiver so the pool's subscribe fails.
        let _sub = match &provider {
            Provider::Memory(p) => p.subscribe(cancel.clone()).unwrap(),
            _ => unreachable!(),
        };

        let mut pool = WorkerPool::new(2);
        let err = pool.start(&provider, cancel.clone()).await.unwrap_err();
        assert!(matches!(err, TransportError::SubscriptionActive));
    }

    #[tokio::test]
    async fn test_double_start_rejected() {
        let provider = memory_provider(10);
        let shutdown = CancellationToken::new();
        let mut pool = WorkerPool::new(1);
        pool.start(&provider, shutdown.clone()).await.unwrap();

        let err = pool.start(&provider, shutdown.clone()).await.unwrap_err();
        assert!(matches!(err, TransportError::SubscriptionActive));

        shutdown.cancel();
        pool.stop().await;
    }

    #[tokio::test]
    async fn test_workers_clamped_to_one() {
        let pool = WorkerPool::new(0);
        assert_eq!(pool.workers, 1);
    }

    #[tokio::test]
    async fn test_stop_discards_unclaimed_results() {
        let provider = memory_provider(10);
        for i in 0..3 {
            provider
                .publish(Message::new("t", format!("p-{i}")))
                .await
                .unwrap();
        }

        let shutdown = CancellationToken::new();
        let mut pool = WorkerPool::new(1);
        pool.start(&provider, shutdown.clone()).await.unwrap();

        // Never take the results; let the workers process everything.
        while pool.stats().processed_count < 3 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        shutdown.cancel();
        pool.stop().await;
        assert_eq!(pool.stats().processed_count, 3);
        assert!(pool.take_results().is_none());
    }
}
