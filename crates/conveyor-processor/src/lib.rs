//! # Conveyor Processor
//!
//! A fixed-size worker pool that drains a single transport subscription:
//! `n` workers share the stream, run each message through a
//! [`MessageProcessor`](processor::MessageProcessor), and emit
//! [`ProcessingResult`](processor::ProcessingResult)s on a bounded channel.

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]

pub mod processor;
pub mod worker_pool;

pub use processor::{MessageProcessor, ProcessingResult, TagProcessor};
pub use worker_pool::{PoolStatsSnapshot, WorkerPool};
