//! Builds providers from a [`TransportConfig`].
//!
//! This is the single place where a backend variant is selected; the rest
//! of the system only sees [`Provider`].

use tracing::info;

use crate::composite::CompositeProvider;
use crate::config::{ProviderKind, TransportConfig};
use crate::error::TransportError;
use crate::kafka::KafkaProvider;
use crate::memory::MemoryProvider;
use crate::nats::{NatsConfig, NatsProvider};
use crate::provider::Provider;

/// Builds the provider tree described by `config`.
///
/// Broker-backed variants connect (or validate their client configuration)
/// during construction; for `composite`, every child is built in the
/// configured order.
///
/// # Errors
///
/// Validation errors from [`TransportConfig::validate`], plus whatever the
/// selected backend's constructor reports.
pub async fn build_provider(config: &TransportConfig) -> Result<Provider, TransportError> {
    config.validate()?;
    info!(queue_type = %config.queue_type, "building transport provider");

    match config.queue_type {
        ProviderKind::Composite => {
            let mut children = Vec::with_capacity(config.composite_providers.len());
            for kind in &config.composite_providers {
                children.push(build_leaf(*kind, config).await?);
            }
            Ok(Provider::Composite(CompositeProvider::new(
                children,
                config.composite_strategy,
            )?))
        }
        leaf => build_leaf(leaf, config).await,
    }
}

async fn build_leaf(kind: ProviderKind, config: &TransportConfig) -> Result<Provider, TransportError> {
    match kind {
        ProviderKind::Memory => Ok(Provider::Memory(MemoryProvider::new(config.queue_size))),
        ProviderKind::Streaming => {
            let nats_config = NatsConfig {
                url: config.streaming_url.clone(),
                ..Default::default()
            };
            Ok(Provider::Nats(NatsProvider::connect(nats_config).await?))
        }
        ProviderKind::Log => Ok(Provider::Kafka(KafkaProvider::new(
            &config.log_brokers,
            &config.log_topic,
            &config.log_consumer_group,
        )?)),
        ProviderKind::Composite => Err(TransportError::Config(
            "composite children must be leaf providers (memory, streaming, log)".into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::composite::CompositeStrategy;
    use crate::message::Message;

    #[tokio::test]
    async fn test_build_memory_provider() {
        let config = TransportConfig {
            queue_size: 2,
            ..Default::default()
        };
        let provider = build_provider(&config).await.unwrap();
        assert_eq!(provider.kind(), "memory");

        provider.publish(Message::new("t", "a")).await.unwrap();
        provider.publish(Message::new("t", "b")).await.unwrap();
        assert!(matches!(
            provider.publish(Message::new("t", "c")).await,
            Err(TransportError::QueueFull)
        ));
    }

    #[tokio::test]
    async fn test_build_log_provider_is_offline_safe() {
        let config = TransportConfig {
            queue_type: ProviderKind::Log,
            ..Default::default()
        };
        let provider = build_provider(&config).await.unwrap();
        assert_eq!(provider.kind(), "log");
    }

    #[tokio::test]
    async fn test_build_composite_of_leaves() {
        let config = TransportConfig {
            queue_type: ProviderKind::Composite,
            composite_providers: vec![ProviderKind::Memory, ProviderKind::Log],
            composite_strategy: CompositeStrategy::BestEffort,
            ..Default::default()
        };
        let provider = build_provider(&config).await.unwrap();
        assert_eq!(provider.kind(), "composite");
    }

    #[tokio::test]
    async fn test_nested_composite_rejected() {
        let config = TransportConfig {
            queue_type: ProviderKind::Composite,
            composite_providers: vec![ProviderKind::Composite],
            ..Default::default()
        };
        let err = build_provider(&config).await.unwrap_err();
        assert!(matches!(err, TransportError::Config(_)));
    }

    #[tokio::test]
    async fn test_invalid_config_aborts_construction() {
        let config = TransportConfig {
            queue_type: ProviderKind::Log,
            log_topic: String::new(),
            ..Default::default()
        };
        let err = build_provider(&config).await.unwrap_err();
        assert!(matches!(err, TransportError::MissingConfig(_)));
    }
}
