//! NATS JetStream provider: a persistent work-queue stream with a durable,
//! explicit-ack pull consumer.
//!
//! Delivery is at-least-once. A message is acknowledged only after the
//! downstream consumer has accepted it; anything in flight when the scope
//! cancels is left unacked and redelivered after the ack window. Consumers
//! must therefore be idempotent on `Message::id`.

mod broker;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_nats::jetstream::consumer::{pull, AckPolicy, PullConsumer};
use async_nats::jetstream::AckKind;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::TransportError;
use crate::message::Message;
use crate::provider::{Subscription, SUBSCRIPTION_BUFFER};
use crate::stats::{StatsSnapshot, TransportStats, SIZE_UNKNOWN};

use broker::NatsBroker;

/// Pull at most this many messages per fetch (back-pressure floor).
const PULL_BATCH: usize = 10;
/// How long a fetch waits for messages before returning an empty batch.
const FETCH_EXPIRES: Duration = Duration::from_secs(5);
/// Pause after an empty fetch.
const IDLE_BACKOFF: Duration = Duration::from_millis(100);
/// Pause after a fetch or receive error.
const ERROR_BACKOFF: Duration = Duration::from_secs(1);
/// Redelivery window for unacked messages.
const ACK_WAIT: Duration = Duration::from_secs(30);
/// Delivery attempts before the broker gives up on a message.
const MAX_DELIVER: i64 = 3;

/// JetStream connection settings.
#[derive(Debug, Clone)]
pub struct NatsConfig {
    /// Broker endpoint, e.g. `nats://localhost:4222`.
    pub url: String,
    /// Name of the work-queue stream.
    pub stream_name: String,
    /// Subject prefix; the stream captures `<prefix>.*`.
    pub subject_prefix: String,
    /// Topic published under the prefix.
    pub topic: String,
    /// Reconnect attempts before the connection is abandoned.
    pub max_reconnects: usize,
    /// Delay between reconnect attempts.
    pub reconnect_wait: Duration,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            url: "nats://localhost:4222".into(),
            stream_name: "CONVEYOR_STREAM".into(),
            subject_prefix: "conveyor".into(),
            topic: "messages".into(),
            max_reconnects: 5,
            reconnect_wait: Duration::from_secs(2),
        }
    }
}

impl NatsConfig {
    /// Full subject messages are published to.
    #[must_use]
    pub fn subject(&self) -> String {
        format!("{}.{}", self.subject_prefix, self.topic)
    }

    /// Durable consumer name derived from the topic.
    #[must_use]
    pub fn consumer_name(&self) -> String {
        format!("{}-consumer", self.topic)
    }
}

/// Streaming provider backed by NATS JetStream.
///
/// Multiple subscriptions are permitted; they share the durable consumer,
/// so the broker balances messages between them (work-queue semantics).
pub struct NatsProvider {
    client: async_nats::Client,
    jetstream: async_nats::jetstream::Context,
    consumer: PullConsumer,
    subject: String,
    stats: Arc<TransportStats>,
    closed: AtomicBool,
    shutdown: CancellationToken,
}

impl NatsProvider {
    /// Connects to the broker, ensures the stream, and creates the durable
    /// consumer.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::BackendUnavailable`] when the broker
    /// cannot be reached or the stream/consumer cannot be created.
    pub async fn connect(config: NatsConfig) -> Result<Self, TransportError> {
        let broker = NatsBroker::connect(&config).await?;

        let consumer = broker
            .stream
            .get_or_create_consumer(
                &config.consumer_name(),
                pull::Config {
                    durable_name: Some(config.consumer_name()),
                    filter_subject: config.subject(),
                    ack_policy: AckPolicy::Explicit,
                    max_deliver: MAX_DELIVER,
                    ack_wait: ACK_WAIT,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| {
                TransportError::BackendUnavailable(format!("failed to create consumer: {e}"))
            })?;

        info!(
            subject = %config.subject(),
            consumer = %config.consumer_name(),
            "jetstream provider ready"
        );

        Ok(Self {
            client: broker.client,
            jetstream: broker.jetstream,
            consumer,
            subject: config.subject(),
            stats: Arc::new(TransportStats::new()),
            closed: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        })
    }

    /// Publishes one message and waits for the JetStream acknowledgment.
    ///
    /// # Errors
    ///
    /// [`TransportError::Closed`] after close,
    /// [`TransportError::Serialization`] if the message cannot be encoded,
    /// [`TransportError::BackendUnavailable`] if the publish fails, and
    /// [`TransportError::AckTimeout`] if the broker never acknowledges.
    pub async fn publish(&self, msg: Message) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }

        let payload = msg.encode()?;
        let ack = self
            .jetstream
            .publish(self.subject.clone(), payload)
            .await
            .map_err(|e| {
                TransportError::BackendUnavailable(format!("jetstream publish failed: {e}"))
            })?;

        // The message counts as published only once the broker has
        // persisted it and said so.
        ack.await
            .map_err(|e| TransportError::AckTimeout(e.to_string()))?;

        self.stats.record_publish();
        Ok(())
    }

    /// Opens a subscription fed by a batched pull loop.
    ///
    /// # Errors
    ///
    /// [`TransportError::Closed`] on a closed provider.
    pub fn subscribe(&self, cancel: CancellationToken) -> Result<Subscription, TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }

        let (out_tx, out_rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        tokio::spawn(run_pull_loop(
            self.consumer.clone(),
            out_tx,
            cancel,
            self.shutdown.clone(),
            Arc::clone(&self.stats),
        ));

        Ok(Subscription::new(out_rx))
    }

    /// Returns a counter snapshot. The broker does not expose a precise
    /// backlog, so `current_size` is [`SIZE_UNKNOWN`].
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot(SIZE_UNKNOWN)
    }

    /// Stops the pull loops and flushes the connection. The connection
    /// itself is released when the provider is dropped.
    ///
    /// # Errors
    ///
    /// [`TransportError::Closed`] on repeated close;
    /// [`TransportError::BackendUnavailable`] if the flush fails.
    pub async fn close(&self) -> Result<(), TransportError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(TransportError::Closed);
        }
        self.shutdown.cancel();

        self.client.flush().await.map_err(|e| {
            TransportError::BackendUnavailable(format!("failed to flush connection: {e}"))
        })?;

        info!("jetstream provider closed");
        Ok(())
    }
}

impl std::fmt::Debug for NatsProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NatsProvider")
            .field("subject", &self.subject)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Pulls batches from the durable consumer and forwards them downstream.
///
/// Ack discipline: a message is acked only after the downstream channel has
/// accepted it. Decode failures are NAKed and skipped. Any exit path that
/// still holds an unacked message leaves it for redelivery.
async fn run_pull_loop(
    consumer: PullConsumer,
    out_tx: mpsc::Sender<Message>,
    cancel: CancellationToken,
    shutdown: CancellationToken,
    stats: Arc<TransportStats>,
) {
    'pull: loop {
        if out_tx.is_closed() {
            break;
        }

        let batch = tokio::select! {
            () = cancel.cancelled() => break,
            () = shutdown.cancelled() => break,
            batch = consumer
                .fetch()
                .max_messages(PULL_BATCH)
                .expires(FETCH_EXPIRES)
                .messages() => batch,
        };

        let mut batch = match batch {
            Ok(batch) => batch,
            Err(e) => {
                warn!(error = %e, "fetch failed, backing off");
                tokio::select! {
                    () = cancel.cancelled() => break,
                    () = shutdown.cancelled() => break,
                    () = tokio::time::sleep(ERROR_BACKOFF) => continue,
                }
            }
        };

        let mut received = false;
        loop {
            let item = tokio::select! {
                () = cancel.cancelled() => break 'pull,
                () = shutdown.cancelled() => break 'pull,
                item = batch.next() => item,
            };
            let Some(item) = item else {
                break; // batch exhausted
            };
            let broker_msg = match item {
                Ok(msg) => msg,
                Err(e) => {
                    warn!(error = %e, "error receiving message, backing off");
                    tokio::time::sleep(ERROR_BACKOFF).await;
                    break;
                }
            };
            received = true;

            let event = match Message::decode(&broker_msg.payload) {
                Ok(event) => event,
                Err(e) => {
                    warn!(error = %e, "skipping undecodable message");
                    if let Err(e) = broker_msg.ack_with(AckKind::Nak(None)).await {
                        warn!(error = %e, "failed to nak message");
                    }
                    continue;
                }
            };

            tokio::select! {
                // Cancelled mid-hand-off: no ack, the broker redelivers.
                () = cancel.cancelled() => break 'pull,
                () = shutdown.cancelled() => break 'pull,
                sent = out_tx.send(event) => {
                    if sent.is_err() {
                        break 'pull;
                    }
                    if let Err(e) = broker_msg.ack().await {
                        warn!(error = %e, "failed to ack message");
                    }
                    stats.record_delivery();
                }
            }
        }

        if !received {
            tokio::select! {
                () = cancel.cancelled() => break,
                () = shutdown.cancelled() => break,
                () = tokio::time::sleep(IDLE_BACKOFF) => {}
            }
        }
    }

    debug!("jetstream subscription terminated");
}
