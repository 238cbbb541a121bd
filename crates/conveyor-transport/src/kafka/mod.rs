//! Kafka log provider: idempotent producer plus a consumer-group reader.
//!
//! Records are keyed by `Message::id`, so a partition sees every revision
//! of an id in order. Delivery is at-least-once: offsets are stored only
//! after a record is handed to the downstream channel, and anything not
//! stored before a rebalance or shutdown is redelivered to the group.

mod config;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::{Header, Message as KafkaMessage, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::types::RDKafkaErrorCode;
use rdkafka::util::Timeout;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::error::TransportError;
use crate::message::Message;
use crate::provider::{Subscription, SUBSCRIPTION_BUFFER};
use crate::stats::{StatsSnapshot, TransportStats, SIZE_UNKNOWN};

use config::{consumer_config, producer_config};

/// Upper bound on waiting for a delivery report.
const PRODUCER_TIMEOUT: Duration = Duration::from_secs(10);
/// Upper bound on flushing outstanding records at close.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);
/// Pause after a consumer error before polling again.
const ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Log provider backed by a Kafka topic.
pub struct KafkaProvider {
    producer: FutureProducer,
    topic: String,
    inner: Arc<Inner>,
}

struct Inner {
    /// Group consumer; checked out by the active subscription loop and
    /// returned when it terminates.
    consumer: Mutex<Option<StreamConsumer>>,
    stats: TransportStats,
    closed: AtomicBool,
    shutdown: CancellationToken,
}

impl KafkaProvider {
    /// Creates the producer and the group consumer and subscribes the
    /// consumer to `topic`.
    ///
    /// Client creation is lazy on the broker side — no connection is made
    /// until the first publish or poll.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::BackendUnavailable`] if either client
    /// rejects its configuration.
    pub fn new(brokers: &[String], topic: &str, group_id: &str) -> Result<Self, TransportError> {
        let producer: FutureProducer = producer_config(brokers).create().map_err(|e| {
            TransportError::BackendUnavailable(format!("failed to create producer: {e}"))
        })?;

        let consumer: StreamConsumer = consumer_config(brokers, group_id).create().map_err(|e| {
            TransportError::BackendUnavailable(format!("failed to create consumer: {e}"))
        })?;
        consumer.subscribe(&[topic]).map_err(|e| {
            TransportError::BackendUnavailable(format!("failed to subscribe: {e}"))
        })?;

        info!(
            brokers = %brokers.join(","),
            topic,
            group_id,
            "kafka provider created"
        );

        Ok(Self {
            producer,
            topic: topic.to_string(),
            inner: Arc::new(Inner {
                consumer: Mutex::new(Some(consumer)),
                stats: TransportStats::new(),
                closed: AtomicBool::new(false),
                shutdown: CancellationToken::new(),
            }),
        })
    }

    /// Publishes one record and waits for the delivery report.
    ///
    /// # Errors
    ///
    /// [`TransportError::Closed`] after close,
    /// [`TransportError::Serialization`] on encode failure,
    /// [`TransportError::AckTimeout`] when the delivery report times out,
    /// [`TransportError::BackendUnavailable`] for other produce errors.
    pub async fn publish(&self, msg: Message) -> Result<(), TransportError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }

        let payload = msg.encode()?;
        let headers = OwnedHeaders::new()
            .insert(Header {
                key: "source",
                value: Some(msg.source.as_str()),
            })
            .insert(Header {
                key: "message_id",
                value: Some(msg.id.as_str()),
            });
        let record = FutureRecord::to(&self.topic)
            .key(&msg.id)
            .payload(payload.as_ref())
            .headers(headers);

        match self.producer.send(record, Timeout::After(PRODUCER_TIMEOUT)).await {
            Ok((partition, offset)) => {
                trace!(partition, offset, "record delivered");
                self.inner.stats.record_publish();
                Ok(())
            }
            Err((KafkaError::MessageProduction(RDKafkaErrorCode::MessageTimedOut), _)) => Err(
                TransportError::AckTimeout("kafka delivery report timed out".into()),
            ),
            Err((e, _)) => Err(TransportError::BackendUnavailable(format!(
                "kafka publish failed: {e}"
            ))),
        }
    }

    /// Opens a subscription fed by the group consumer.
    ///
    /// # Errors
    ///
    /// [`TransportError::Closed`] on a closed provider,
    /// [`TransportError::SubscriptionActive`] while the consumer is
    /// checked out by another subscription.
    pub fn subscribe(&self, cancel: CancellationToken) -> Result<Subscription, TransportError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }

        let consumer = self
            .inner
            .consumer
            .lock()
            .take()
            .ok_or(TransportError::SubscriptionActive)?;

        let (out_tx, out_rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        tokio::spawn(run_consume_loop(
            Arc::clone(&self.inner),
            consumer,
            out_tx,
            cancel,
        ));

        Ok(Subscription::new(out_rx))
    }

    /// Returns a counter snapshot. The topic backlog lives in the broker,
    /// so `current_size` is [`SIZE_UNKNOWN`].
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot(SIZE_UNKNOWN)
    }

    /// Stops the consume loop and flushes outstanding produce requests.
    ///
    /// # Errors
    ///
    /// [`TransportError::Closed`] on repeated close;
    /// [`TransportError::BackendUnavailable`] if the flush fails.
    pub fn close(&self) -> Result<(), TransportError> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Err(TransportError::Closed);
        }
        self.inner.shutdown.cancel();

        self.producer
            .flush(Timeout::After(FLUSH_TIMEOUT))
            .map_err(|e| {
                TransportError::BackendUnavailable(format!("failed to flush producer: {e}"))
            })?;

        info!("kafka provider closed");
        Ok(())
    }
}

impl std::fmt::Debug for KafkaProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KafkaProvider")
            .field("topic", &self.topic)
            .field("closed", &self.inner.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Reads the group consumer and forwards records downstream.
///
/// Offset discipline: a record's offset is stored only after the downstream
/// channel accepts the message (undecodable records are stored immediately —
/// redelivering them cannot help). The final synchronous commit on exit
/// persists whatever was stored; unstored records return to the group.
async fn run_consume_loop(
    inner: Arc<Inner>,
    consumer: StreamConsumer,
    out_tx: mpsc::Sender<Message>,
    cancel: CancellationToken,
) {
    'consume: loop {
        let received = tokio::select! {
            () = cancel.cancelled() => break,
            () = inner.shutdown.cancelled() => break,
            () = out_tx.closed() => break,
            received = consumer.recv() => received,
        };

        let record = match received {
            Ok(record) => record,
            Err(e) => {
                warn!(error = %e, "kafka consumer error, backing off");
                tokio::select! {
                    () = cancel.cancelled() => break,
                    () = inner.shutdown.cancelled() => break,
                    () = tokio::time::sleep(ERROR_BACKOFF) => continue,
                }
            }
        };

        let Some(payload) = record.payload() else {
            store_offset(&consumer, &record);
            continue;
        };

        let event = match Message::decode(payload) {
            Ok(event) => event,
            Err(e) => {
                warn!(
                    error = %e,
                    partition = record.partition(),
                    offset = record.offset(),
                    "skipping undecodable record"
                );
                store_offset(&consumer, &record);
                continue;
            }
        };

        tokio::select! {
            // Cancelled mid-hand-off: offset not stored, the group redelivers.
            () = cancel.cancelled() => break 'consume,
            () = inner.shutdown.cancelled() => break 'consume,
            sent = out_tx.send(event) => {
                if sent.is_err() {
                    break 'consume;
                }
                store_offset(&consumer, &record);
                inner.stats.record_delivery();
            }
        }
    }

    // Persist stored positions before handing partitions back to the group.
    match consumer.commit_consumer_state(CommitMode::Sync) {
        Ok(()) | Err(KafkaError::ConsumerCommit(RDKafkaErrorCode::NoOffset)) => {}
        Err(e) => warn!(error = %e, "final offset commit failed"),
    }
    consumer.unsubscribe();

    *inner.consumer.lock() = Some(consumer);
    debug!("kafka subscription terminated");
}

fn store_offset(consumer: &StreamConsumer, record: &rdkafka::message::BorrowedMessage<'_>) {
    if let Err(e) = consumer.store_offset_from_message(record) {
        warn!(error = %e, "failed to store offset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_provider() -> KafkaProvider {
        KafkaProvider::new(&["localhost:9092".to_string()], "events", "test-group").unwrap()
    }

    #[tokio::test]
    async fn test_new_is_lazy() {
        // No broker is running; client creation must still succeed.
        let provider = test_provider();
        assert_eq!(provider.topic, "events");
        assert!(provider.inner.consumer.lock().is_some());
    }

    #[tokio::test]
    async fn test_stats_size_unknown() {
        let provider = test_provider();
        let stats = provider.stats();
        assert_eq!(stats.published, 0);
        assert_eq!(stats.current_size, SIZE_UNKNOWN);
    }

    #[tokio::test]
    async fn test_single_active_subscription() {
        let provider = test_provider();
        let cancel = CancellationToken::new();
        let _sub = provider.subscribe(cancel.clone()).unwrap();

        assert!(matches!(
            provider.subscribe(CancellationToken::new()),
            Err(TransportError::SubscriptionActive)
        ));
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_close_is_terminal() {
        let provider = test_provider();
        provider.close().unwrap();
        assert!(matches!(provider.close(), Err(TransportError::Closed)));
        assert!(matches!(
            provider.subscribe(CancellationToken::new()),
            Err(TransportError::SubscriptionActive) | Err(TransportError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_publish_after_close() {
        let provider = test_provider();
        provider.close().unwrap();
        let err = provider.publish(Message::new("t", "p")).await.unwrap_err();
        assert!(matches!(err, TransportError::Closed));
    }
}
