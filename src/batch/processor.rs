//! All-or-nothing state transitions over one flush attempt's records.
//!
//! Each operation checks every record against the allowed edges before
//! touching any of them, so a batch is either moved as a whole or left as it
//! was. An invalid edge is a programming error and is reported as a
//! [`TransitionError`] rather than absorbed.

use chrono::Utc;
use thiserror::Error;
use uuid::Uuid;

use super::record::{MessageRecord, MessageState};

/// Attempted state change not allowed by the record state machine
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid state transition for message {message_id}: {from} -> {to}")]
pub struct TransitionError {
    pub message_id: Uuid,
    pub from: MessageState,
    pub to: MessageState,
}

/// Applies batch-wide state transitions.
pub struct TransactionalBatchProcessor;

impl TransactionalBatchProcessor {
    /// PENDING (or retryable FAILED) -> SENDING.
    ///
    /// Returns the same records for chaining.
    pub fn mark_batch_sending(
        records: &mut [MessageRecord],
    ) -> Result<&mut [MessageRecord], TransitionError> {
        Self::validate(records, MessageState::Sending, |r| {
            r.is_pending() || (r.is_failed() && r.retry_count < r.max_retries)
        })?;
        for record in records.iter_mut() {
            record.state = MessageState::Sending;
        }
        Ok(records)
    }

    /// SENDING -> SENT, after the transport confirmed the whole batch
    pub fn mark_batch_sent(records: &mut [MessageRecord]) -> Result<(), TransitionError> {
        Self::validate(records, MessageState::Sent, MessageRecord::is_sending)?;
        for record in records.iter_mut() {
            record.state = MessageState::Sent;
        }
        Ok(())
    }

    /// Any non-terminal state -> FAILED.
    ///
    /// Increments `retry_count` once per record and stamps `last_retry_time`.
    /// Records that are already exhausted are rejected.
    pub fn mark_batch_failed(records: &mut [MessageRecord]) -> Result<(), TransitionError> {
        Self::validate(records, MessageState::Failed, |r| match r.state {
            MessageState::Pending | MessageState::Sending => true,
            MessageState::Failed => !r.is_exhausted(),
            MessageState::Sent => false,
        })?;
        let now = Utc::now();
        for record in records.iter_mut() {
            record.state = MessageState::Failed;
            record.retry_count += 1;
            record.last_retry_time = Some(now);
        }
        Ok(())
    }

    /// SENDING -> PENDING after a failed send. `retry_count` is left alone.
    pub fn revert_batch_to_pending(records: &mut [MessageRecord]) -> Result<(), TransitionError> {
        Self::validate(records, MessageState::Pending, MessageRecord::is_sending)?;
        for record in records.iter_mut() {
            record.state = MessageState::Pending;
        }
        Ok(())
    }

    fn validate<F>(records: &[MessageRecord], to: MessageState, allowed: F) -> Result<(), TransitionError>
    where
        F: Fn(&MessageRecord) -> bool,
    {
        match records.iter().find(|r| !allowed(r)) {
            Some(record) => Err(TransitionError {
                message_id: record.id,
                from: record.state,
                to,
            }),
            None => Ok(()),
        }
    }
}
