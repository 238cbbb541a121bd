//! End-to-end pipeline demo: build a provider from the environment, start
//! the worker pool, publish a burst of messages, and drain the results.
//!
//! ```bash
//! cargo run -p conveyor-processor --example pipeline
//! QUEUE_TYPE=streaming STREAMING_URL=nats://localhost:4222 \
//!     cargo run -p conveyor-processor --example pipeline
//! ```

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::info;

use conveyor_processor::WorkerPool;
use conveyor_transport::{build_provider, Message, TransportConfig};

const BURST: usize = 32;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = TransportConfig::from_env()?;
    let provider = build_provider(&config).await?;

    let shutdown = CancellationToken::new();
    let mut pool = WorkerPool::new(config.worker_count);
    pool.start(&provider, shutdown.clone()).await?;
    let mut results = pool.take_results().expect("results not taken yet");

    for i in 0..BURST {
        let msg = Message::new("pipeline-demo", format!("event-{i}"))
            .with_metadata("sequence", i.to_string());
        provider.publish(msg).await?;
    }
    info!(count = BURST, "published burst");

    let mut received = 0usize;
    while received < BURST {
        match tokio::time::timeout(Duration::from_secs(10), results.recv()).await {
            Ok(Some(result)) => {
                received += 1;
                info!(
                    message_id = %result.message_id,
                    success = result.success,
                    "result"
                );
            }
            Ok(None) => break,
            Err(_) => {
                info!(received, "timed out waiting for remaining results");
                break;
            }
        }
    }

    shutdown.cancel();
    pool.stop().await;
    provider.close().await?;

    let transport = provider.stats();
    let pool_stats = pool.stats();
    info!(
        published = transport.published,
        delivered = transport.delivered,
        processed = pool_stats.processed_count,
        errors = pool_stats.error_count,
        "pipeline finished"
    );

    Ok(())
}
