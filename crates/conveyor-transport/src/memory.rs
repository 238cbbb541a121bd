//! Bounded in-process queue provider.
//!
//! Publish is non-blocking by contract: a full buffer is reported
//! immediately as [`TransportError::QueueFull`] so that ingest callers can
//! shed load instead of stalling. There is no persistence — messages
//! buffered at process exit are gone.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::TransportError;
use crate::message::Message;
use crate::provider::{Subscription, SUBSCRIPTION_BUFFER};
use crate::stats::{StatsSnapshot, TransportStats};

/// Bounded FIFO queue provider.
///
/// Multiple publishers are fine; one subscription may be active at a time
/// (the buffer's receiving end is exclusive). When a subscription ends it
/// returns the receiver, so a later subscribe picks up where it left off.
pub struct MemoryProvider {
    inner: Arc<Inner>,
}

struct Inner {
    /// Sending side of the buffer; taken on close so the loop drains out.
    tx: RwLock<Option<mpsc::Sender<Message>>>,
    /// Receiving side; checked out by the active subscription loop.
    rx: Mutex<Option<mpsc::Receiver<Message>>>,
    /// Buffered message count. The channel itself does not expose depth,
    /// so publishers and the subscription loop keep this in step.
    depth: AtomicI64,
    stats: TransportStats,
    closed: AtomicBool,
}

impl MemoryProvider {
    /// Creates a queue holding at most `capacity` messages.
    ///
    /// A zero capacity is clamped to one slot.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                tx: RwLock::new(Some(tx)),
                rx: Mutex::new(Some(rx)),
                depth: AtomicI64::new(0),
                stats: TransportStats::new(),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Enqueues one message without blocking.
    ///
    /// # Errors
    ///
    /// [`TransportError::QueueFull`] when the buffer is at capacity,
    /// [`TransportError::Closed`] after close.
    pub fn publish(&self, msg: Message) -> Result<(), TransportError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }

        let tx = self
            .inner
            .tx
            .read()
            .as_ref()
            .cloned()
            .ok_or(TransportError::Closed)?;

        match tx.try_send(msg) {
            Ok(()) => {
                self.inner.depth.fetch_add(1, Ordering::Relaxed);
                self.inner.stats.record_publish();
                Ok(())
            }
            Err(TrySendError::Full(_)) => Err(TransportError::QueueFull),
            Err(TrySendError::Closed(_)) => Err(TransportError::Closed),
        }
    }

    /// Opens a subscription that yields messages in enqueue order.
    ///
    /// The stream ends when `cancel` fires, the subscription is dropped, or
    /// the provider is closed (buffered messages drain out first).
    ///
    /// # Errors
    ///
    /// [`TransportError::Closed`] on a closed provider,
    /// [`TransportError::SubscriptionActive`] while another subscription
    /// holds the receiver.
    pub fn subscribe(&self, cancel: CancellationToken) -> Result<Subscription, TransportError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }

        let buffer_rx = self
            .inner
            .rx
            .lock()
            .take()
            .ok_or(TransportError::SubscriptionActive)?;

        let (out_tx, out_rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let inner = Arc::clone(&self.inner);
        tokio::spawn(run_forward_loop(inner, buffer_rx, out_tx, cancel));

        Ok(Subscription::new(out_rx))
    }

    /// Returns a counter snapshot; `current_size` is the buffered count.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.inner
            .stats
            .snapshot(self.inner.depth.load(Ordering::Relaxed))
    }

    /// Closes the queue. Buffered messages still drain to an active
    /// subscription, after which its stream ends.
    ///
    /// # Errors
    ///
    /// [`TransportError::Closed`] on the second and later calls.
    pub fn close(&self) -> Result<(), TransportError> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Err(TransportError::Closed);
        }
        // Dropping the sender lets the forward loop observe end-of-stream
        // once the buffer is empty.
        self.inner.tx.write().take();
        debug!("memory provider closed");
        Ok(())
    }
}

impl std::fmt::Debug for MemoryProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryProvider")
            .field("closed", &self.inner.closed.load(Ordering::Relaxed))
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

/// Moves messages from the buffer to the subscriber until cancellation,
/// drop, or end-of-stream, then hands the receiver back for reuse.
async fn run_forward_loop(
    inner: Arc<Inner>,
    mut buffer_rx: mpsc::Receiver<Message>,
    out_tx: mpsc::Sender<Message>,
    cancel: CancellationToken,
) {
    loop {
        let msg = tokio::select! {
            () = cancel.cancelled() => break,
            () = out_tx.closed() => break,
            next = buffer_rx.recv() => match next {
                Some(msg) => msg,
                None => break,
            },
        };
        inner.depth.fetch_sub(1, Ordering::Relaxed);

        tokio::select! {
            () = cancel.cancelled() => break,
            sent = out_tx.send(msg) => {
                if sent.is_err() {
                    break;
                }
                inner.stats.record_delivery();
            }
        }
    }

    *inner.rx.lock() = Some(buffer_rx);
    debug!("memory subscription terminated");
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::collections::HashMap;
    use std::time::Duration;

    fn test_message(id: &str) -> Message {
        Message {
            id: id.into(),
            timestamp: 1_700_000_000,
            source: "t".into(),
            payload: Bytes::from_static(b"hi"),
            metadata: HashMap::from([("k".to_string(), "v".to_string())]),
        }
    }

    #[tokio::test]
    async fn test_roundtrip_preserves_message() {
        let provider = MemoryProvider::new(10);
        let msg = test_message("a");
        provider.publish(msg.clone()).unwrap();

        let mut sub = provider.subscribe(CancellationToken::new()).unwrap();
        let delivered = sub.recv().await.unwrap();
        assert_eq!(delivered, msg);

        // Give the forward loop a beat to record the delivery.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let stats = provider.stats();
        assert_eq!(stats.published, 1);
        assert_eq!(stats.delivered, 1);
        assert_eq!(stats.current_size, 0);
    }

    #[tokio::test]
    async fn test_overflow_rejected_immediately() {
        let provider = MemoryProvider::new(1);
        provider.publish(test_message("1")).unwrap();

        let err = provider.publish(test_message("2")).unwrap_err();
        assert!(matches!(err, TransportError::QueueFull));
        assert_eq!(provider.stats().current_size, 1);
        assert_eq!(provider.stats().published, 1);
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let provider = MemoryProvider::new(10);
        for i in 0..5 {
            provider.publish(test_message(&format!("m-{i}"))).unwrap();
        }

        let mut sub = provider.subscribe(CancellationToken::new()).unwrap();
        for i in 0..5 {
            assert_eq!(sub.recv().await.unwrap().id, format!("m-{i}"));
        }
    }

    #[tokio::test]
    async fn test_close_drains_then_ends_stream() {
        let provider = MemoryProvider::new(10);
        provider.publish(test_message("a")).unwrap();
        provider.publish(test_message("b")).unwrap();

        let mut sub = provider.subscribe(CancellationToken::new()).unwrap();
        provider.close().unwrap();

        assert_eq!(sub.recv().await.unwrap().id, "a");
        assert_eq!(sub.recv().await.unwrap().id, "b");
        assert!(sub.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_operations_after_close() {
        let provider = MemoryProvider::new(10);
        provider.close().unwrap();

        assert!(matches!(
            provider.publish(test_message("a")),
            Err(TransportError::Closed)
        ));
        assert!(matches!(
            provider.subscribe(CancellationToken::new()),
            Err(TransportError::Closed)
        ));
        assert!(matches!(provider.close(), Err(TransportError::Closed)));
    }

    #[tokio::test]
    async fn test_cancel_terminates_stream() {
        let provider = MemoryProvider::new(10);
        let cancel = CancellationToken::new();
        let mut sub = provider.subscribe(cancel.clone()).unwrap();

        cancel.cancel();
        let next = tokio::time::timeout(Duration::from_secs(1), sub.recv()).await;
        assert_eq!(next.expect("stream must end within the grace period"), None);
    }

    #[tokio::test]
    async fn test_second_subscribe_rejected_while_active() {
        let provider = MemoryProvider::new(10);
        let cancel = CancellationToken::new();
        let _sub = provider.subscribe(cancel.clone()).unwrap();

        assert!(matches!(
            provider.subscribe(CancellationToken::new()),
            Err(TransportError::SubscriptionActive)
        ));
    }

    #[tokio::test]
    async fn test_resubscribe_after_cancel() {
        let provider = MemoryProvider::new(10);
        let cancel = CancellationToken::new();
        let sub = provider.subscribe(cancel.clone()).unwrap();
        cancel.cancel();
        drop(sub);

        // The loop returns the receiver; poll until it lands.
        let mut reattached = None;
        for _ in 0..50 {
            match provider.subscribe(CancellationToken::new()) {
                Ok(sub) => {
                    reattached = Some(sub);
                    break;
                }
                Err(TransportError::SubscriptionActive) => {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        let mut sub = reattached.expect("receiver should be returned after cancellation");

        provider.publish(test_message("later")).unwrap();
        assert_eq!(sub.recv().await.unwrap().id, "later");
    }

    #[tokio::test]
    async fn test_concurrent_publishers() {
        let provider = Arc::new(MemoryProvider::new(100));
        let mut tasks = Vec::new();
        for p in 0..4 {
            let provider = Arc::clone(&provider);
            tasks.push(tokio::spawn(async move {
                for i in 0..10 {
                    provider.publish(test_message(&format!("{p}-{i}"))).unwrap();
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let stats = provider.stats();
        assert_eq!(stats.published, 40);
        assert_eq!(stats.current_size, 40);
    }
}
