//! The provider capability set and the subscription handle it hands out.
//!
//! [`Provider`] is a closed set of backends behind one publish/subscribe/
//! stats/close surface. The [`factory`](crate::factory) is the only place a
//! variant is selected; everything downstream (the worker pool, the
//! composite fan-out) works against this type.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::composite::CompositeProvider;
use crate::error::TransportError;
use crate::kafka::KafkaProvider;
use crate::memory::MemoryProvider;
use crate::message::Message;
use crate::nats::NatsProvider;
use crate::stats::StatsSnapshot;

/// Capacity of the channel between a provider's subscription loop and the
/// consumer holding the [`Subscription`].
pub(crate) const SUBSCRIPTION_BUFFER: usize = 100;

/// A message transport provider.
///
/// All variants share the same semantics:
///
/// - `publish` moves one message into the transport; safe under concurrent
///   callers; the caller cannot touch the message after the call.
/// - `subscribe` returns a finite lazy sequence of messages. The sequence
///   ends when the cancellation token fires, the subscription is dropped,
///   the provider is closed, or the backend signals end-of-stream.
/// - `stats` is a point-in-time counter snapshot, callable concurrently
///   with everything else.
/// - `close` releases resources once; later calls fail with
///   [`TransportError::Closed`].
pub enum Provider {
    /// Bounded in-process queue.
    Memory(MemoryProvider),
    /// NATS JetStream stream with a durable explicit-ack consumer.
    Nats(NatsProvider),
    /// Kafka topic with an idempotent producer and a consumer group.
    Kafka(KafkaProvider),
    /// Fan-out over several child providers.
    Composite(CompositeProvider),
}

impl Provider {
    /// Publishes one message.
    ///
    /// Broker-backed variants block until the broker acknowledges (bounded
    /// by the backend timeout); the memory variant never blocks and rejects
    /// a full buffer with [`TransportError::QueueFull`]. Callers that need
    /// an earlier deadline wrap the future in `tokio::time::timeout`.
    ///
    /// # Errors
    ///
    /// See [`TransportError`] for the per-variant failure surface.
    pub async fn publish(&self, msg: Message) -> Result<(), TransportError> {
        match self {
            Self::Memory(p) => p.publish(msg),
            Self::Nats(p) => p.publish(msg).await,
            Self::Kafka(p) => p.publish(msg).await,
            Self::Composite(p) => p.publish(msg).await,
        }
    }

    /// Opens a subscription bound to `cancel`.
    ///
    /// # Errors
    ///
    /// Fails with [`TransportError::Closed`] on a closed provider and
    /// [`TransportError::SubscriptionActive`] while another subscription
    /// holds the variant's exclusive consumer.
    pub async fn subscribe(&self, cancel: CancellationToken) -> Result<Subscription, TransportError> {
        match self {
            Self::Memory(p) => p.subscribe(cancel),
            Self::Nats(p) => p.subscribe(cancel),
            Self::Kafka(p) => p.subscribe(cancel),
            Self::Composite(p) => p.subscribe(cancel).await,
        }
    }

    /// Returns a counter snapshot.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        match self {
            Self::Memory(p) => p.stats(),
            Self::Nats(p) => p.stats(),
            Self::Kafka(p) => p.stats(),
            Self::Composite(p) => p.stats(),
        }
    }

    /// Closes the provider.
    ///
    /// In-flight subscriptions terminate cleanly; the composite closes all
    /// children even if one fails.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Closed`] if already closed, or the first
    /// backend error encountered.
    pub async fn close(&self) -> Result<(), TransportError> {
        match self {
            Self::Memory(p) => p.close(),
            Self::Nats(p) => p.close().await,
            Self::Kafka(p) => p.close(),
            Self::Composite(p) => p.close().await,
        }
    }

    /// Short backend label for log fields.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Memory(_) => "memory",
            Self::Nats(_) => "streaming",
            Self::Kafka(_) => "log",
            Self::Composite(_) => "composite",
        }
    }
}

impl std::fmt::Debug for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provider")
            .field("kind", &self.kind())
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

/// A finite lazy sequence of delivered messages.
///
/// The producing loop lives inside the provider; dropping the subscription
/// stops it the same way cancelling the token does. `recv` returning `None`
/// is the explicit end-of-stream signal — there is no error channel, every
/// mid-stream fault is either recovered internally or ends the stream.
#[derive(Debug)]
pub struct Subscription {
    rx: mpsc::Receiver<Message>,
}

impl Subscription {
    pub(crate) fn new(rx: mpsc::Receiver<Message>) -> Self {
        Self { rx }
    }

    /// Waits for the next message; `None` means the stream has ended.
    pub async fn recv(&mut self) -> Option<Message> {
        self.rx.recv().await
    }
}
