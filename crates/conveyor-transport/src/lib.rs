//! # Conveyor Transport
//!
//! Pluggable message transport for the Conveyor ingestion pipeline.
//!
//! A [`Provider`](provider::Provider) offers uniform
//! publish/subscribe/stats/close semantics over four backends:
//!
//! - [`memory`] — bounded in-process queue with non-blocking publish
//! - [`nats`] — NATS JetStream work-queue stream with explicit acknowledgment
//! - [`kafka`] — partitioned Kafka log with consumer-group semantics
//! - [`composite`] — fan-out publish to several providers under a failure policy
//!
//! Providers are built from a [`config::TransportConfig`] by the
//! [`factory`], the single place where the backend is selected.

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]

pub mod composite;
pub mod config;
pub mod error;
pub mod factory;
pub mod kafka;
pub mod memory;
pub mod message;
pub mod nats;
pub mod provider;
pub mod stats;

pub use composite::{CompositeProvider, CompositeStrategy};
pub use config::{ProviderKind, TransportConfig};
pub use error::TransportError;
pub use factory::build_provider;
pub use kafka::KafkaProvider;
pub use memory::MemoryProvider;
pub use message::Message;
pub use nats::NatsProvider;
pub use provider::{Provider, Subscription};
pub use stats::StatsSnapshot;
