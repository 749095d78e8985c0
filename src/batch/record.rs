//! Message records and batching configuration.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default retry bound for newly queued records
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Lifecycle state of a message record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageState {
    /// Queued and eligible for the next flush
    Pending,
    /// Claimed by an in-progress flush
    Sending,
    /// Confirmed delivered by the transport (terminal)
    Sent,
    /// Explicitly marked failed; retryable until `max_retries` is reached
    Failed,
}

impl MessageState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sending => "sending",
            Self::Sent => "sent",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for MessageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single unit of outbound content bound to one connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    /// Unique record ID
    pub id: Uuid,
    /// Opaque application payload, never inspected here
    pub content: serde_json::Value,
    /// Target connection; decides which queue owns the record
    pub connection_id: String,
    /// Owning user, kept for attribution
    pub user_id: String,
    /// Current lifecycle state
    pub state: MessageState,
    /// Number of explicit failure marks so far
    pub retry_count: u32,
    /// Retry bound
    pub max_retries: u32,
    /// When the record was last marked failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_retry_time: Option<DateTime<Utc>>,
    /// When the record was queued
    pub queued_at: DateTime<Utc>,
}

impl MessageRecord {
    /// Create a new pending record with the default retry bound
    pub fn new(
        user_id: impl Into<String>,
        connection_id: impl Into<String>,
        content: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            content,
            connection_id: connection_id.into(),
            user_id: user_id.into(),
            state: MessageState::Pending,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            last_retry_time: None,
            queued_at: Utc::now(),
        }
    }

    /// Override the retry bound. Values below 1 are raised to 1.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    pub fn is_pending(&self) -> bool {
        self.state == MessageState::Pending
    }

    pub fn is_sending(&self) -> bool {
        self.state == MessageState::Sending
    }

    pub fn is_sent(&self) -> bool {
        self.state == MessageState::Sent
    }

    pub fn is_failed(&self) -> bool {
        self.state == MessageState::Failed
    }

    /// Failed and out of retries
    pub fn is_exhausted(&self) -> bool {
        self.is_failed() && self.retry_count >= self.max_retries
    }

    /// Time spent in the queue as of `now`
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now.signed_duration_since(self.queued_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }
}

/// Flush trigger thresholds, supplied by the caller
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Flush once this many records are eligible; also caps a single batch
    pub max_batch_size: usize,
    /// Flush once the oldest eligible record has waited this long
    pub max_wait_time: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 50,
            max_wait_time: Duration::from_millis(100),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_record_is_pending() {
        let record = MessageRecord::new("user-1", "conn1", json!({"content": "test"}));

        assert!(!record.id.is_nil());
        assert_eq!(record.state, MessageState::Pending);
        assert_eq!(record.retry_count, 0);
        assert_eq!(record.max_retries, DEFAULT_MAX_RETRIES);
        assert!(record.last_retry_time.is_none());
        assert_eq!(record.connection_id, "conn1");
        assert_eq!(record.user_id, "user-1");
    }

    #[test]
    fn test_with_max_retries_floor() {
        let record = MessageRecord::new("u", "c", json!({})).with_max_retries(0);
        assert_eq!(record.max_retries, 1);
    }

    #[test]
    fn test_exhausted_requires_failed_state() {
        let mut record = MessageRecord::new("u", "c", json!({}));
        record.retry_count = record.max_retries;
        assert!(!record.is_exhausted());

        record.state = MessageState::Failed;
        assert!(record.is_exhausted());
    }

    #[test]
    fn test_state_serializes_uppercase() {
        let json = serde_json::to_string(&MessageState::Sending).unwrap();
        assert_eq!(json, "\"SENDING\"");
        assert_eq!(MessageState::Failed.to_string(), "failed");
    }

    #[test]
    fn test_batch_config_defaults() {
        let config = BatchConfig::default();
        assert_eq!(config.max_batch_size, 50);
        assert_eq!(config.max_wait_time, Duration::from_millis(100));
    }
}
