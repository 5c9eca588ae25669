use crate::B256;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use strum::{Display, EnumString};

/// Severity classes for recorded indexing errors.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    /// Recoverable; retried automatically.
    Warning,
    /// Failed an attempt; subject to the attempt ceiling.
    Error,
    /// Dead-lettered or retry-exhausted; needs operator attention.
    Critical,
    /// Terminated the owning component.
    Fatal,
}

/// Payloads above this size are offloaded and stored by reference.
pub const MAX_INLINE_PAYLOAD_BYTES: usize = 8 * 1024;

/// A row destined for `raw.indexing_errors`.
///
/// Rows are de-duplicated on `(worker, block_height, transaction_id,
/// error_hash)`; repeated failures of the same shape touch the existing row
/// instead of inserting a new one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// Service name of the component that raised the error.
    pub worker: String,
    /// Height being processed, when known.
    pub block_height: Option<u64>,
    /// Transaction being processed, when known.
    pub transaction_id: Option<B256>,
    /// Dedup hash over message and stack.
    pub error_hash: B256,
    /// Human-readable message.
    pub message: String,
    /// Severity class.
    pub severity: Severity,
    /// Whether an operator has marked the error resolved.
    pub resolved: bool,
    /// Contextual payload, stored inline when small enough.
    pub payload: Option<serde_json::Value>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl ErrorRecord {
    /// Builds a record, computing the dedup hash from `message` and `stack`.
    pub fn new(
        worker: impl Into<String>,
        block_height: Option<u64>,
        transaction_id: Option<B256>,
        message: impl Into<String>,
        stack: &str,
        severity: Severity,
    ) -> Self {
        let message = message.into();
        Self {
            worker: worker.into(),
            block_height,
            transaction_id,
            error_hash: error_hash(&message, stack),
            message,
            severity,
            resolved: false,
            payload: None,
            created_at: Utc::now(),
        }
    }

    /// Attaches a contextual payload.
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Returns `true` when the payload must be offloaded rather than stored
    /// inline.
    pub fn payload_exceeds_inline_limit(&self) -> bool {
        self.payload
            .as_ref()
            .map(|p| p.to_string().len() > MAX_INLINE_PAYLOAD_BYTES)
            .unwrap_or(false)
    }
}

/// Dedup hash over an error message and its stack rendering.
pub fn error_hash(message: &str, stack: &str) -> B256 {
    let mut hasher = Sha256::new();
    hasher.update(message.as_bytes());
    hasher.update(stack.as_bytes());
    B256::from_slice(&hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_failures_hash_identically() {
        let a = ErrorRecord::new("token", Some(10), None, "boom", "at worker.rs:1", Severity::Error);
        let b = ErrorRecord::new("token", Some(10), None, "boom", "at worker.rs:1", Severity::Error);
        assert_eq!(a.error_hash, b.error_hash);

        let c = ErrorRecord::new("token", Some(10), None, "boom", "at worker.rs:2", Severity::Error);
        assert_ne!(a.error_hash, c.error_hash);
    }
}
