//! The per-message processing seam and its default implementation.
//!
//! Production deployments swap [`TagProcessor`] for domain logic; the pool
//! contract (one result per consumed message, failures recorded in stats,
//! never propagated as errors) does not change with the processor.

use bytes::Bytes;

use conveyor_transport::Message;

/// Tag prepended to payloads by the default processor.
const PROCESSED_TAG: &[u8] = b"PROCESSED_";

/// Outcome of processing one message.
#[derive(Debug, Clone)]
pub struct ProcessingResult {
    /// Id of the source message.
    pub message_id: String,
    /// Epoch seconds when processing completed.
    pub processed_at: i64,
    /// Whether processing succeeded.
    pub success: bool,
    /// Transformed output bytes (empty on failure).
    pub result: Bytes,
    /// Failure description, present when `success` is false.
    pub error: Option<String>,
}

impl ProcessingResult {
    /// A successful outcome carrying `result`.
    #[must_use]
    pub fn success(message_id: impl Into<String>, result: impl Into<Bytes>) -> Self {
        Self {
            message_id: message_id.into(),
            processed_at: now_epoch_seconds(),
            success: true,
            result: result.into(),
            error: None,
        }
    }

    /// A failed outcome carrying a description.
    #[must_use]
    pub fn failure(message_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            processed_at: now_epoch_seconds(),
            success: false,
            result: Bytes::new(),
            error: Some(error.into()),
        }
    }
}

#[allow(clippy::cast_possible_wrap)] // epoch seconds fit in i64
fn now_epoch_seconds() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// Transforms one message into one result.
///
/// Implementations must be pure with respect to pool state: they see only
/// the message and return only the result. They run concurrently on every
/// worker, hence `Send + Sync`.
pub trait MessageProcessor: Send + Sync {
    /// Processes a single message.
    fn process(&self, msg: &Message) -> ProcessingResult;
}

/// Default processor: prepends a constant tag to the payload.
#[derive(Debug, Clone, Copy, Default)]
pub struct TagProcessor;

impl MessageProcessor for TagProcessor {
    fn process(&self, msg: &Message) -> ProcessingResult {
        let mut output = Vec::with_capacity(PROCESSED_TAG.len() + msg.payload.len());
        output.extend_from_slice(PROCESSED_TAG);
        output.extend_from_slice(&msg.payload);
        ProcessingResult::success(msg.id.clone(), output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_processor_prepends_tag() {
        let msg = Message::new("t", "hi");
        let result = TagProcessor.process(&msg);

        assert!(result.success);
        assert_eq!(result.message_id, msg.id);
        assert_eq!(result.result.as_ref(), b"PROCESSED_hi");
        assert!(result.error.is_none());
        assert!(result.processed_at > 0);
    }

    #[test]
    fn test_failure_carries_description() {
        let result = ProcessingResult::failure("m-1", "boom");
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("boom"));
        assert!(result.result.is_empty());
    }
}
