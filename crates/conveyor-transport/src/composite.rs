//! Fan-out provider: one publish lands on every child, under a selectable
//! failure policy.
//!
//! The composite is a write-side construct. Subscribe delegates to the
//! first child only — it is not a read-side merger, and messages published
//! through other children are invisible to it. Ordering across children is
//! not coordinated; each child serializes its own writes.

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::future::{join_all, BoxFuture};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::TransportError;
use crate::message::Message;
use crate::provider::{Provider, Subscription};
use crate::stats::StatsSnapshot;

/// Failure policy for fan-out publishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompositeStrategy {
    /// Any child failure fails the publish; the first error (in child
    /// order) is returned. Successful children are not rolled back, so the
    /// caller sees failure with partial persistence.
    FailFast,
    /// Child failures are logged; the publish succeeds as long as at least
    /// one child accepted the message.
    BestEffort,
}

impl std::fmt::Display for CompositeStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::FailFast => "fail-fast",
            Self::BestEffort => "best-effort",
        })
    }
}

impl FromStr for CompositeStrategy {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "fail-fast" => Ok(Self::FailFast),
            "best-effort" => Ok(Self::BestEffort),
            other => Err(TransportError::UnsupportedType(other.to_string())),
        }
    }
}

/// Publishes to an ordered, non-empty list of child providers.
pub struct CompositeProvider {
    children: Vec<Provider>,
    strategy: CompositeStrategy,
    closed: AtomicBool,
}

impl CompositeProvider {
    /// Wraps `children` under `strategy`.
    ///
    /// # Errors
    ///
    /// [`TransportError::NoProvidersConfigured`] if `children` is empty.
    pub fn new(
        children: Vec<Provider>,
        strategy: CompositeStrategy,
    ) -> Result<Self, TransportError> {
        if children.is_empty() {
            return Err(TransportError::NoProvidersConfigured);
        }
        info!(children = children.len(), %strategy, "composite provider created");
        Ok(Self {
            children,
            strategy,
            closed: AtomicBool::new(false),
        })
    }

    /// Publishes to all children in parallel under the configured policy.
    ///
    /// # Errors
    ///
    /// Under [`CompositeStrategy::FailFast`], the first child error in
    /// child order. Under [`CompositeStrategy::BestEffort`], an error only
    /// when every child rejected the message (a fan-out that persisted the
    /// message nowhere has lost it).
    pub fn publish(&self, msg: Message) -> BoxFuture<'_, Result<(), TransportError>> {
        Box::pin(async move {
            if self.closed.load(Ordering::Acquire) {
                return Err(TransportError::Closed);
            }

            let publishes: Vec<BoxFuture<'_, (&'static str, Result<(), TransportError>)>> = self
                .children
                .iter()
                .map(|child| {
                    let msg = msg.clone();
                    let publish: BoxFuture<'_, _> =
                        Box::pin(async move { (child.kind(), child.publish(msg).await) });
                    publish
                })
                .collect();
            let results = join_all(publishes).await;

            match self.strategy {
                CompositeStrategy::FailFast => results
                    .into_iter()
                    .find_map(|(_, result)| result.err())
                    .map_or(Ok(()), Err),
                CompositeStrategy::BestEffort => {
                    let total = results.len();
                    let mut first_error = None;
                    let mut failures = 0usize;
                    for (kind, result) in results {
                        if let Err(e) = result {
                            warn!(provider = kind, error = %e, "best-effort publish failed");
                            failures += 1;
                            if first_error.is_none() {
                                first_error = Some(e);
                            }
                        }
                    }
                    match first_error {
                        Some(error) if failures == total => {
                            warn!(failures, "publish failed on every child provider");
                            Err(error)
                        }
                        _ => Ok(()),
                    }
                }
            }
        })
    }

    /// Opens a subscription on the first child.
    ///
    /// # Errors
    ///
    /// [`TransportError::Closed`] on a closed composite, otherwise the
    /// first child's subscribe errors.
    pub fn subscribe(
        &self,
        cancel: CancellationToken,
    ) -> BoxFuture<'_, Result<Subscription, TransportError>> {
        Box::pin(async move {
            if self.closed.load(Ordering::Acquire) {
                return Err(TransportError::Closed);
            }
            let subscribe: BoxFuture<'_, Result<Subscription, TransportError>> =
                Box::pin(self.children[0].subscribe(cancel));
            subscribe.await
        })
    }

    /// Sums counters across children. Only measurable (non-negative) child
    /// sizes contribute to `current_size`.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        let mut aggregate = StatsSnapshot::default();
        for child in &self.children {
            let stats = child.stats();
            aggregate.published += stats.published;
            aggregate.delivered += stats.delivered;
            if stats.current_size >= 0 {
                aggregate.current_size += stats.current_size;
            }
        }
        aggregate
    }

    /// Closes every child, even if some fail; the first error is returned
    /// and the rest are logged.
    ///
    /// # Errors
    ///
    /// [`TransportError::Closed`] on repeated close, otherwise the first
    /// child close error.
    pub fn close(&self) -> BoxFuture<'_, Result<(), TransportError>> {
        Box::pin(async move {
            if self.closed.swap(true, Ordering::AcqRel) {
                return Err(TransportError::Closed);
            }

            let mut first_error = None;
            for child in &self.children {
                let close: BoxFuture<'_, Result<(), TransportError>> = Box::pin(child.close());
                if let Err(e) = close.await {
                    warn!(provider = child.kind(), error = %e, "child close failed");
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }

            match first_error {
                Some(error) => Err(error),
                None => {
                    info!("composite provider closed");
                    Ok(())
                }
            }
        })
    }
}

impl std::fmt::Debug for CompositeProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositeProvider")
            .field("children", &self.children.len())
            .field("strategy", &self.strategy)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
