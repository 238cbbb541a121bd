//! Failure taxonomy shared by every provider.

/// Errors surfaced by transport operations.
///
/// Publish errors reach the caller unchanged; subscribe-loop faults are
/// handled internally (transient ones back off, structural ones end the
/// stream) and never travel through the subscription itself.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Non-blocking publish rejected because the buffer is at capacity.
    /// The caller may retry.
    #[error("queue is full")]
    QueueFull,

    /// Operation on a provider that has been closed.
    #[error("provider is closed")]
    Closed,

    /// A subscription is already active and holds the exclusive receiver.
    #[error("subscription already active")]
    SubscriptionActive,

    /// Network or broker failure; retryable on the producer side.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// A message could not be encoded or decoded. Fatal for that single
    /// message only.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// The broker did not acknowledge a publish within its window.
    #[error("publish not acknowledged: {0}")]
    AckTimeout(String),

    /// A composite provider was configured with no children.
    #[error("no providers configured")]
    NoProvidersConfigured,

    /// Unknown provider type or composite strategy.
    #[error("unsupported provider type: '{0}'")]
    UnsupportedType(String),

    /// A key required by the selected provider type is absent.
    #[error("missing required config: {0}")]
    MissingConfig(String),

    /// A configuration value is present but invalid.
    #[error("invalid config: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        assert_eq!(TransportError::QueueFull.to_string(), "queue is full");
        assert_eq!(TransportError::Closed.to_string(), "provider is closed");
        assert_eq!(
            TransportError::UnsupportedType("redis".into()).to_string(),
            "unsupported provider type: 'redis'"
        );
        assert_eq!(
            TransportError::MissingConfig("log_topic".into()).to_string(),
            "missing required config: log_topic"
        );
    }
}
