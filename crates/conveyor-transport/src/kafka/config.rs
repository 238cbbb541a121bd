//! Fixed rdkafka client configurations for the log provider.
//!
//! The producer is idempotent: acks from every in-sync replica, bounded
//! retries, and a single in-flight request so retries cannot reorder.
//! The consumer stores offsets manually (after downstream hand-off) while
//! auto-commit flushes the stored positions every second — at-least-once
//! with redelivery of anything not handed off.

use rdkafka::ClientConfig;

/// Builds the producer configuration for the given seed brokers.
pub(crate) fn producer_config(brokers: &[String]) -> ClientConfig {
    let mut config = ClientConfig::new();
    config
        .set("bootstrap.servers", brokers.join(","))
        // Idempotent producer settings.
        .set("enable.idempotence", "true")
        .set("acks", "all")
        .set("message.send.max.retries", "5")
        // Required for idempotency.
        .set("max.in.flight.requests.per.connection", "1")
        .set("compression.type", "snappy")
        // Timeouts.
        .set("message.timeout.ms", "10000")
        .set("socket.timeout.ms", "10000");
    config
}

/// Builds the consumer-group configuration.
pub(crate) fn consumer_config(brokers: &[String], group_id: &str) -> ClientConfig {
    let mut config = ClientConfig::new();
    config
        .set("bootstrap.servers", brokers.join(","))
        // Consumer group settings.
        .set("group.id", group_id)
        .set("partition.assignment.strategy", "roundrobin")
        .set("auto.offset.reset", "earliest")
        .set("enable.auto.commit", "true")
        .set("auto.commit.interval.ms", "1000")
        // Offsets are stored explicitly after hand-off, not on fetch.
        .set("enable.auto.offset.store", "false")
        // Session timeouts.
        .set("session.timeout.ms", "20000")
        .set("heartbeat.interval.ms", "6000")
        // Processing settings.
        .set("max.poll.interval.ms", "60000")
        .set("fetch.message.max.bytes", "1048576");
    config
}

#[cfg(test)]
mod tests {
    use super::*;

    fn brokers() -> Vec<String> {
        vec!["k1:9092".to_string(), "k2:9092".to_string()]
    }

    #[test]
    fn test_producer_config_idempotence() {
        let config = producer_config(&brokers());
        assert_eq!(config.get("bootstrap.servers"), Some("k1:9092,k2:9092"));
        assert_eq!(config.get("enable.idempotence"), Some("true"));
        assert_eq!(config.get("acks"), Some("all"));
        assert_eq!(
            config.get("max.in.flight.requests.per.connection"),
            Some("1")
        );
        assert_eq!(config.get("compression.type"), Some("snappy"));
    }

    #[test]
    fn test_consumer_config_group_semantics() {
        let config = consumer_config(&brokers(), "g1");
        assert_eq!(config.get("group.id"), Some("g1"));
        assert_eq!(config.get("partition.assignment.strategy"), Some("roundrobin"));
        assert_eq!(config.get("auto.offset.reset"), Some("earliest"));
        assert_eq!(config.get("enable.auto.offset.store"), Some("false"));
        assert_eq!(config.get("session.timeout.ms"), Some("20000"));
        assert_eq!(config.get("heartbeat.interval.ms"), Some("6000"));
    }
}
