//! JetStream connection bootstrap: connect with a bounded reconnect policy
//! and make sure the work-queue stream exists.

use async_nats::jetstream::stream::{Config as StreamConfig, RetentionPolicy, StorageType};
use async_nats::jetstream::{self, stream::Stream};
use async_nats::Client;
use tracing::info;

use super::NatsConfig;
use crate::error::TransportError;

/// Messages older than this are dropped by the broker.
const STREAM_MAX_AGE: std::time::Duration = std::time::Duration::from_secs(24 * 60 * 60);
/// Upper bound on retained messages.
const STREAM_MAX_MSGS: i64 = 1_000_000;

/// A live JetStream connection plus the stream the provider publishes into.
pub(crate) struct NatsBroker {
    pub(crate) client: Client,
    pub(crate) jetstream: jetstream::Context,
    pub(crate) stream: Stream,
}

impl NatsBroker {
    /// Connects to the broker and gets or creates the configured stream.
    ///
    /// `get_or_create_stream` absorbs the race where another instance
    /// creates the stream between a lookup and a create call.
    pub(crate) async fn connect(config: &NatsConfig) -> Result<Self, TransportError> {
        let reconnect_wait = config.reconnect_wait;
        let client = async_nats::ConnectOptions::new()
            .max_reconnects(config.max_reconnects)
            .reconnect_delay_callback(move |_attempts| reconnect_wait)
            .event_callback(|event| async move {
                info!(event = %event, "nats connection event");
            })
            .connect(&config.url)
            .await
            .map_err(|e| {
                TransportError::BackendUnavailable(format!("failed to connect to nats: {e}"))
            })?;

        let jetstream = jetstream::new(client.clone());

        let stream = jetstream
            .get_or_create_stream(StreamConfig {
                name: config.stream_name.clone(),
                subjects: vec![format!("{}.*", config.subject_prefix).into()],
                retention: RetentionPolicy::WorkQueue,
                storage: StorageType::File,
                max_age: STREAM_MAX_AGE,
                max_messages: STREAM_MAX_MSGS,
                ..Default::default()
            })
            .await
            .map_err(|e| {
                TransportError::BackendUnavailable(format!("failed to ensure stream: {e}"))
            })?;

        info!(
            url = %config.url,
            stream = %config.stream_name,
            "connected to jetstream"
        );

        Ok(Self {
            client,
            jetstream,
            stream,
        })
    }
}
