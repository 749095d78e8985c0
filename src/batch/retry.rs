//! Retry eligibility and exponential backoff for message records.

use std::time::Duration;

use chrono::{DateTime, Utc};

use super::record::{MessageRecord, MessageState, DEFAULT_MAX_RETRIES};

/// Retry policy configuration and decisions.
///
/// Backoff is a pure function of the retry count: `base_delay * 2^retry_count`,
/// capped at `max_delay`, without jitter. Scheduling the actual delay is left to
/// the flush scheduler.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delay for retry count 0
    pub base_delay: Duration,
    /// Upper bound for any computed delay
    pub max_delay: Duration,
    /// Retry bound stamped on newly queued records
    pub max_retries: u32,
    /// Consecutive failed flushes on a connection before its pending records
    /// are explicitly marked failed
    pub failures_before_mark: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            max_retries: DEFAULT_MAX_RETRIES,
            failures_before_mark: 3,
        }
    }
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the record still has retries left
    pub fn should_retry(&self, record: &MessageRecord) -> bool {
        record.retry_count < record.max_retries
    }

    /// Backoff delay for the given retry count
    pub fn calculate_retry_delay(&self, retry_count: u32) -> Duration {
        let factor = 2u32.checked_pow(retry_count).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Records that still have retries left, original order preserved
    pub fn filter_retryable_messages<'a>(&self, records: &'a [MessageRecord]) -> Vec<&'a MessageRecord> {
        records.iter().filter(|r| self.should_retry(r)).collect()
    }

    /// Whether the record may be claimed by a flush at `now`.
    ///
    /// Pending records always are. Failed records are once they have retries
    /// left and their backoff since `last_retry_time` has elapsed.
    pub fn is_ready(&self, record: &MessageRecord, now: DateTime<Utc>) -> bool {
        match record.state {
            MessageState::Pending => true,
            MessageState::Failed => {
                if !self.should_retry(record) {
                    return false;
                }
                match record.last_retry_time {
                    Some(last) => {
                        let elapsed = now
                            .signed_duration_since(last)
                            .to_std()
                            .unwrap_or(Duration::ZERO);
                        elapsed >= self.calculate_retry_delay(record.retry_count)
                    }
                    None => true,
                }
            }
            MessageState::Sending | MessageState::Sent => false,
        }
    }
}
