//! Transport configuration: a flat record selecting the provider backend
//! and its tuning knobs.
//!
//! The record can be populated three ways: [`TransportConfig::default`] for
//! embedded use, [`TransportConfig::from_map`] for key/value option maps,
//! and [`TransportConfig::from_env`] for the deployment environment.
//! Unknown keys are ignored; values that fail to parse and keys required by
//! the selected backend are reported as config errors.

use std::collections::HashMap;
use std::str::FromStr;

use crate::composite::CompositeStrategy;
use crate::error::TransportError;

/// Which backend a provider is built on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    /// Bounded in-process queue.
    Memory,
    /// NATS JetStream persistent stream.
    Streaming,
    /// Kafka partitioned log.
    Log,
    /// Fan-out over several child providers.
    Composite,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Memory => "memory",
            Self::Streaming => "streaming",
            Self::Log => "log",
            Self::Composite => "composite",
        })
    }
}

impl FromStr for ProviderKind {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "streaming" | "nats" => Ok(Self::Streaming),
            "log" | "kafka" => Ok(Self::Log),
            "composite" => Ok(Self::Composite),
            other => Err(TransportError::UnsupportedType(other.to_string())),
        }
    }
}

/// Flat transport configuration record.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Selected provider backend.
    pub queue_type: ProviderKind,
    /// Memory provider capacity.
    pub queue_size: usize,
    /// NATS endpoint for the streaming provider.
    pub streaming_url: String,
    /// Kafka seed broker addresses.
    pub log_brokers: Vec<String>,
    /// Kafka topic name.
    pub log_topic: String,
    /// Kafka consumer-group id.
    pub log_consumer_group: String,
    /// Ordered children for the composite provider.
    pub composite_providers: Vec<ProviderKind>,
    /// Composite failure policy.
    pub composite_strategy: CompositeStrategy,
    /// Worker-pool size.
    pub worker_count: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            queue_type: ProviderKind::Memory,
            queue_size: 1000,
            streaming_url: "nats://localhost:4222".into(),
            log_brokers: vec!["localhost:9092".into()],
            log_topic: "events".into(),
            log_consumer_group: "processor-group".into(),
            composite_providers: Vec::new(),
            composite_strategy: CompositeStrategy::FailFast,
            worker_count: 4,
        }
    }
}

/// Environment variable names recognized by [`TransportConfig::from_env`],
/// paired with the option keys of [`TransportConfig::from_map`].
const ENV_KEYS: &[(&str, &str)] = &[
    ("QUEUE_TYPE", "queue_type"),
    ("QUEUE_SIZE", "queue_size"),
    ("STREAMING_URL", "streaming_url"),
    ("LOG_BROKERS", "log_brokers"),
    ("LOG_TOPIC", "log_topic"),
    ("LOG_CONSUMER_GROUP", "log_consumer_group"),
    ("COMPOSITE_PROVIDERS", "composite_providers"),
    ("COMPOSITE_STRATEGY", "composite_strategy"),
    ("WORKER_COUNT", "worker_count"),
];

impl TransportConfig {
    /// Builds a configuration from a flat key/value map.
    ///
    /// Keys not listed in the record are ignored. List-valued options
    /// (`log_brokers`, `composite_providers`) are comma-separated.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::UnsupportedType`] for an unknown
    /// `queue_type` or strategy, [`TransportError::Config`] for malformed
    /// values, and the validation errors of [`TransportConfig::validate`].
    pub fn from_map(options: &HashMap<String, String>) -> Result<Self, TransportError> {
        let mut cfg = Self::default();

        if let Some(v) = options.get("queue_type") {
            cfg.queue_type = v.parse()?;
        }
        if let Some(v) = options.get("queue_size") {
            cfg.queue_size = v
                .parse()
                .map_err(|_| TransportError::Config(format!("invalid queue_size: '{v}'")))?;
        }
        if let Some(v) = options.get("streaming_url") {
            cfg.streaming_url = v.clone();
        }
        if let Some(v) = options.get("log_brokers") {
            cfg.log_brokers = split_list(v);
        }
        if let Some(v) = options.get("log_topic") {
            cfg.log_topic = v.clone();
        }
        if let Some(v) = options.get("log_consumer_group") {
            cfg.log_consumer_group = v.clone();
        }
        if let Some(v) = options.get("composite_providers") {
            cfg.composite_providers = split_list(v)
                .iter()
                .map(|s| s.parse())
                .collect::<Result<_, _>>()?;
        }
        if let Some(v) = options.get("composite_strategy") {
            cfg.composite_strategy = v.parse()?;
        }
        if let Some(v) = options.get("worker_count") {
            cfg.worker_count = v
                .parse()
                .map_err(|_| TransportError::Config(format!("invalid worker_count: '{v}'")))?;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    /// Builds a configuration from the process environment.
    ///
    /// Reads `QUEUE_TYPE`, `QUEUE_SIZE`, `STREAMING_URL`, `LOG_BROKERS`,
    /// `LOG_TOPIC`, `LOG_CONSUMER_GROUP`, `COMPOSITE_PROVIDERS`,
    /// `COMPOSITE_STRATEGY` and `WORKER_COUNT`; unset variables keep their
    /// defaults.
    ///
    /// # Errors
    ///
    /// Same surface as [`TransportConfig::from_map`].
    pub fn from_env() -> Result<Self, TransportError> {
        let mut options = HashMap::new();
        for (env_key, option_key) in ENV_KEYS {
            if let Ok(value) = std::env::var(env_key) {
                if !value.is_empty() {
                    options.insert((*option_key).to_string(), value);
                }
            }
        }
        Self::from_map(&options)
    }

    /// Checks the options required by the selected backend.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::MissingConfig`] for absent required keys
    /// and [`TransportError::Config`] for invalid combinations.
    pub fn validate(&self) -> Result<(), TransportError> {
        if self.worker_count == 0 {
            return Err(TransportError::Config("worker_count must be >= 1".into()));
        }

        match self.queue_type {
            ProviderKind::Memory => {
                if self.queue_size == 0 {
                    return Err(TransportError::Config("queue_size must be >= 1".into()));
                }
            }
            ProviderKind::Streaming => {
                if self.streaming_url.is_empty() {
                    return Err(TransportError::MissingConfig("streaming_url".into()));
                }
            }
            ProviderKind::Log => self.validate_log()?,
            ProviderKind::Composite => {
                if self.composite_providers.is_empty() {
                    return Err(TransportError::MissingConfig("composite_providers".into()));
                }
                for kind in &self.composite_providers {
                    match kind {
                        ProviderKind::Composite => {
                            return Err(TransportError::Config(
                                "composite children must be leaf providers \
                                 (memory, streaming, log)"
                                    .into(),
                            ));
                        }
                        ProviderKind::Memory if self.queue_size == 0 => {
                            return Err(TransportError::Config("queue_size must be >= 1".into()));
                        }
                        ProviderKind::Streaming if self.streaming_url.is_empty() => {
                            return Err(TransportError::MissingConfig("streaming_url".into()));
                        }
                        ProviderKind::Log => self.validate_log()?,
                        _ => {}
                    }
                }
            }
        }

        Ok(())
    }

    fn validate_log(&self) -> Result<(), TransportError> {
        if self.log_brokers.is_empty() {
            return Err(TransportError::MissingConfig("log_brokers".into()));
        }
        if self.log_topic.is_empty() {
            return Err(TransportError::MissingConfig("log_topic".into()));
        }
        if self.log_consumer_group.is_empty() {
            return Err(TransportError::MissingConfig("log_consumer_group".into()));
        }
        Ok(())
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let cfg = TransportConfig::default();
        assert_eq!(cfg.queue_type, ProviderKind::Memory);
        assert_eq!(cfg.queue_size, 1000);
        assert_eq!(cfg.worker_count, 4);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_from_map_full_log_setup() {
        let cfg = TransportConfig::from_map(&map(&[
            ("queue_type", "log"),
            ("log_brokers", "k1:9092, k2:9092"),
            ("log_topic", "events"),
            ("log_consumer_group", "g1"),
            ("worker_count", "8"),
        ]))
        .unwrap();

        assert_eq!(cfg.queue_type, ProviderKind::Log);
        assert_eq!(cfg.log_brokers, vec!["k1:9092", "k2:9092"]);
        assert_eq!(cfg.worker_count, 8);
    }

    #[test]
    fn test_unknown_keys_ignored() {
        let cfg = TransportConfig::from_map(&map(&[
            ("queue_type", "memory"),
            ("totally_unknown", "whatever"),
        ]))
        .unwrap();
        assert_eq!(cfg.queue_type, ProviderKind::Memory);
    }

    #[test]
    fn test_kind_aliases() {
        assert_eq!(
            "nats".parse::<ProviderKind>().unwrap(),
            ProviderKind::Streaming
        );
        assert_eq!("kafka".parse::<ProviderKind>().unwrap(), ProviderKind::Log);
    }

    #[test]
    fn test_unsupported_type() {
        let err = TransportConfig::from_map(&map(&[("queue_type", "redis")])).unwrap_err();
        assert!(matches!(err, TransportError::UnsupportedType(t) if t == "redis"));
    }

    #[test]
    fn test_invalid_queue_size() {
        let err = TransportConfig::from_map(&map(&[("queue_size", "lots")])).unwrap_err();
        assert!(matches!(err, TransportError::Config(_)));

        let err = TransportConfig::from_map(&map(&[("queue_size", "0")])).unwrap_err();
        assert!(matches!(err, TransportError::Config(_)));
    }

    #[test]
    fn test_log_requires_topic() {
        let err = TransportConfig::from_map(&map(&[("queue_type", "log"), ("log_topic", "")]))
            .unwrap_err();
        assert!(matches!(err, TransportError::MissingConfig(k) if k == "log_topic"));
    }

    #[test]
    fn test_composite_requires_children() {
        let err = TransportConfig::from_map(&map(&[("queue_type", "composite")])).unwrap_err();
        assert!(matches!(err, TransportError::MissingConfig(k) if k == "composite_providers"));
    }

    #[test]
    fn test_composite_children_parse() {
        let cfg = TransportConfig::from_map(&map(&[
            ("queue_type", "composite"),
            ("composite_providers", "memory,log"),
            ("composite_strategy", "best-effort"),
        ]))
        .unwrap();
        assert_eq!(
            cfg.composite_providers,
            vec![ProviderKind::Memory, ProviderKind::Log]
        );
        assert_eq!(cfg.composite_strategy, CompositeStrategy::BestEffort);
    }

    #[test]
    fn test_nested_composite_rejected() {
        let err = TransportConfig::from_map(&map(&[
            ("queue_type", "composite"),
            ("composite_providers", "memory,composite"),
        ]))
        .unwrap_err();
        assert!(matches!(err, TransportError::Config(_)));
    }

    #[test]
    fn test_unknown_strategy() {
        let err = TransportConfig::from_map(&map(&[
            ("queue_type", "composite"),
            ("composite_providers", "memory"),
            ("composite_strategy", "quorum"),
        ]))
        .unwrap_err();
        assert!(matches!(err, TransportError::UnsupportedType(_)));
    }
}
