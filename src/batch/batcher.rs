//! Per-connection batching and transactional delivery.
//!
//! The [`Batcher`] owns one FIFO queue per connection. A flush claims the
//! oldest eligible records of a queue, moves them into the queue's in-flight
//! slot as SENDING, hands them to the [`Transport`] and then, depending on the
//! result, marks them SENT and purges them or reverts the whole batch to
//! PENDING at the front of the queue. Transport errors never escape a flush.
//!
//! # Design
//!
//! - Uses `DashMap` for concurrent access to per-connection queues
//! - The map guard is only held for synchronous state changes, never across
//!   the transport await
//! - One batch in flight per connection; a concurrent flush is a no-op, so a
//!   record can't be claimed twice and FIFO order holds within a connection
//! - `retry_count` is only incremented by [`Batcher::fail_batch`]; a failed
//!   flush only bumps the connection's consecutive failure count
//!
//! # Example
//!
//! ```rust,ignore
//! let batcher = Batcher::new(BatchConfig::default(), RetryPolicy::default(), transport, directory);
//!
//! batcher.queue_message("user-123", "conn-1", json!({"title": "hello"}));
//! let outcome = batcher.flush_batch("conn-1").await?;
//! ```

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::connection_manager::ConnectionDirectory;
use crate::metrics::BatchMetricsRecorder;
use crate::transport::{Transport, TransportError};

use super::processor::{TransactionalBatchProcessor, TransitionError};
use super::record::{BatchConfig, MessageRecord, MessageState};
use super::retry::RetryPolicy;
use super::state::MessageStateManager;

/// Errors that indicate a bug rather than a delivery problem
#[derive(Debug, Error)]
pub enum BatcherError {
    /// A batch transition was attempted from a state that does not allow it
    #[error(transparent)]
    InvalidTransition(#[from] TransitionError),

    /// A flush tried to resolve a batch that is no longer in flight
    #[error("No batch in flight for connection {0}")]
    MissingInFlight(String),
}

/// Result of a single flush attempt
#[derive(Debug, Clone)]
pub enum FlushOutcome {
    /// Nothing eligible on this connection
    Empty,
    /// Another flush on this connection is awaiting the transport
    InFlight,
    /// The transport confirmed the batch; records were purged
    Delivered { count: usize },
    /// The transport failed; the batch is back in PENDING
    Reverted {
        count: usize,
        consecutive_failures: u32,
        error: TransportError,
    },
}

/// Result of an explicit failure mark
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FailOutcome {
    /// Records moved to FAILED
    pub marked: usize,
    /// Of those, records that reached their retry limit
    pub exhausted: usize,
}

/// Aggregate record counts across all connection queues
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchMetrics {
    pub pending_messages: usize,
    pub sending_messages: usize,
    pub sent_messages: usize,
    pub failed_messages: usize,
    pub total_messages: usize,
    pub connections: usize,
}

/// Queue state for one connection
#[derive(Debug, Default)]
struct ConnectionQueue {
    /// Records not currently in flight, FIFO
    records: VecDeque<MessageRecord>,
    /// Batch awaiting the transport
    in_flight: Option<Vec<MessageRecord>>,
    /// Failed flushes since the last delivery or failure mark
    consecutive_failures: u32,
    /// Earliest time the scheduler should flush again after a failure
    retry_after: Option<DateTime<Utc>>,
    /// Records reverted by a failed send since the last delivery or failure mark
    failed_sends: HashSet<Uuid>,
}

impl ConnectionQueue {
    fn is_empty(&self) -> bool {
        self.records.is_empty() && self.in_flight.is_none()
    }

    fn len(&self) -> usize {
        self.records.len() + self.in_flight.as_ref().map_or(0, Vec::len)
    }

    /// Put records back at the head of the queue, keeping their order
    fn restore_front(&mut self, batch: Vec<MessageRecord>) {
        for record in batch.into_iter().rev() {
            self.records.push_front(record);
        }
    }

    fn all_records(&self) -> impl Iterator<Item = &MessageRecord> {
        self.in_flight.iter().flatten().chain(self.records.iter())
    }
}

enum Claim {
    Empty,
    InFlight,
    Batch(Vec<MessageRecord>),
}

/// Orchestrates per-connection queues, flushes and retry bookkeeping.
pub struct Batcher {
    queues: DashMap<String, ConnectionQueue>,
    config: BatchConfig,
    retry_policy: RetryPolicy,
    transport: Arc<dyn Transport>,
    directory: Arc<dyn ConnectionDirectory>,
    flush_notify: Arc<Notify>,
}

impl Batcher {
    /// Create a batcher. A `max_batch_size` of 0 is treated as 1.
    pub fn new(
        mut config: BatchConfig,
        retry_policy: RetryPolicy,
        transport: Arc<dyn Transport>,
        directory: Arc<dyn ConnectionDirectory>,
    ) -> Self {
        config.max_batch_size = config.max_batch_size.max(1);
        Self {
            queues: DashMap::new(),
            config,
            retry_policy,
            transport,
            directory,
            flush_notify: Arc::new(Notify::new()),
        }
    }

    /// Get the batching configuration
    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Get the retry policy
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// Notified whenever a queue holds `max_batch_size` records ready to send
    pub fn flush_notifier(&self) -> Arc<Notify> {
        self.flush_notify.clone()
    }

    /// Queue a message for one connection.
    ///
    /// Always succeeds; delivery happens on a later flush.
    pub fn queue_message(&self, user_id: &str, connection_id: &str, content: serde_json::Value) -> bool {
        let record = MessageRecord::new(user_id, connection_id, content)
            .with_max_retries(self.retry_policy.max_retries);
        let message_id = record.id;

        let now = Utc::now();
        let (queue_size, ready) = {
            let mut queue = self.queues.entry(connection_id.to_string()).or_default();
            queue.records.push_back(record);
            let ready = queue
                .records
                .iter()
                .filter(|r| self.retry_policy.is_ready(r, now))
                .take(self.config.max_batch_size)
                .count();
            (queue.len(), ready)
        };

        BatchMetricsRecorder::record_enqueued();

        tracing::debug!(
            user_id = %user_id,
            connection_id = %connection_id,
            message_id = %message_id,
            queue_size = queue_size,
            "Message queued"
        );

        if ready >= self.config.max_batch_size {
            self.flush_notify.notify_one();
        }

        true
    }

    /// Queue a message for every live connection of a user.
    ///
    /// Returns false if the user has no live connection.
    pub fn queue_for_user(&self, user_id: &str, content: serde_json::Value) -> bool {
        let connections = self.directory.get_user_connections(user_id);

        if connections.is_empty() {
            tracing::debug!(user_id = %user_id, "No live connections for user, message not queued");
            return false;
        }

        for connection in &connections {
            self.queue_message(user_id, &connection.id, content.clone());
        }

        true
    }

    /// Attempt to deliver one batch for a connection.
    ///
    /// When this returns, every record of the batch is either SENT and purged
    /// or back in PENDING. Transport failures are absorbed into
    /// [`FlushOutcome::Reverted`]; only invalid state transitions are returned
    /// as errors.
    #[tracing::instrument(name = "batcher.flush_batch", skip_all, fields(connection_id = %connection_id))]
    pub async fn flush_batch(&self, connection_id: &str) -> Result<FlushOutcome, BatcherError> {
        let batch = match self.claim_batch(connection_id)? {
            Claim::Batch(batch) => batch,
            Claim::Empty => return Ok(FlushOutcome::Empty),
            Claim::InFlight => {
                tracing::debug!("Flush already in progress, skipping");
                return Ok(FlushOutcome::InFlight);
            }
        };

        let count = batch.len();
        let mut guard = InFlightGuard {
            batcher: self,
            connection_id,
            armed: true,
        };

        let start = Instant::now();
        let result = self.transport.send_batch(connection_id, &batch).await;
        let latency_secs = start.elapsed().as_secs_f64();
        guard.armed = false;

        match result {
            Ok(()) => {
                self.complete_batch(connection_id)?;
                BatchMetricsRecorder::record_delivered(count, latency_secs);
                tracing::debug!(count = count, latency_secs = latency_secs, "Batch delivered");
                Ok(FlushOutcome::Delivered { count })
            }
            Err(error) => {
                let consecutive_failures = self.revert_batch(connection_id)?;
                BatchMetricsRecorder::record_reverted(count, latency_secs, error.kind());
                tracing::warn!(
                    count = count,
                    consecutive_failures = consecutive_failures,
                    error = %error,
                    "Batch send failed, reverted to pending"
                );
                Ok(FlushOutcome::Reverted {
                    count,
                    consecutive_failures,
                    error,
                })
            }
        }
    }

    /// Explicitly mark a connection's failed sends as failed records.
    ///
    /// Only PENDING records that were part of a reverted batch since the last
    /// delivery or mark are charged; records that never reached the transport
    /// keep their retry budget. This is the only operation that increments
    /// `retry_count`. Records that reach their retry limit stay in the queue as
    /// FAILED until purged. Records currently in flight are left to their flush.
    pub fn fail_batch(&self, connection_id: &str) -> Result<FailOutcome, BatcherError> {
        let Some(mut queue) = self.queues.get_mut(connection_id) else {
            return Ok(FailOutcome::default());
        };

        let failed_sends = std::mem::take(&mut queue.failed_sends);
        let mut batch: Vec<MessageRecord> = queue
            .records
            .iter()
            .filter(|r| r.is_pending() && failed_sends.contains(&r.id))
            .cloned()
            .collect();
        queue.consecutive_failures = 0;
        queue.retry_after = None;

        if batch.is_empty() {
            return Ok(FailOutcome::default());
        }

        TransactionalBatchProcessor::mark_batch_failed(&mut batch)?;

        let outcome = FailOutcome {
            marked: batch.len(),
            exhausted: batch.iter().filter(|r| r.is_exhausted()).count(),
        };

        let mut updated: HashMap<Uuid, MessageRecord> = batch.into_iter().map(|r| (r.id, r)).collect();
        for record in queue.records.iter_mut() {
            if let Some(marked) = updated.remove(&record.id) {
                *record = marked;
            }
        }
        drop(queue);

        BatchMetricsRecorder::record_marked_failed(outcome.marked, outcome.exhausted);

        if outcome.exhausted > 0 {
            tracing::warn!(
                connection_id = %connection_id,
                marked = outcome.marked,
                exhausted = outcome.exhausted,
                "Messages exhausted their retries and will no longer be flushed"
            );
        } else {
            tracing::info!(
                connection_id = %connection_id,
                marked = outcome.marked,
                "Messages marked failed, retry scheduled with backoff"
            );
        }

        Ok(outcome)
    }

    /// Remove and return records that are out of retries.
    pub fn purge_exhausted(&self, connection_id: &str) -> Vec<MessageRecord> {
        let purged = {
            let Some(mut queue) = self.queues.get_mut(connection_id) else {
                return Vec::new();
            };
            let (purged, kept): (Vec<_>, Vec<_>) =
                queue.records.drain(..).partition(MessageRecord::is_exhausted);
            queue.records = kept.into();
            purged
        };

        self.remove_if_empty(connection_id);

        if !purged.is_empty() {
            BatchMetricsRecorder::record_purged(purged.len());
            tracing::info!(
                connection_id = %connection_id,
                purged = purged.len(),
                "Purged exhausted messages"
            );
        }

        purged
    }

    /// Snapshot of FAILED records for a connection, including exhausted ones
    pub fn get_failed_messages(&self, connection_id: &str) -> Vec<MessageRecord> {
        self.queues
            .get(connection_id)
            .map(|q| q.records.iter().filter(|r| r.is_failed()).cloned().collect())
            .unwrap_or_default()
    }

    /// Snapshot of every record held for a connection, in-flight batch first
    pub fn get_messages(&self, connection_id: &str) -> Vec<MessageRecord> {
        self.queues
            .get(connection_id)
            .map(|q| q.all_records().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of records held for a connection
    pub fn queue_len(&self, connection_id: &str) -> usize {
        self.queues.get(connection_id).map(|q| q.len()).unwrap_or(0)
    }

    /// Connections that currently have a queue
    pub fn connection_ids(&self) -> Vec<String> {
        self.queues.iter().map(|r| r.key().clone()).collect()
    }

    /// Failed flushes since the last delivery or failure mark
    pub fn consecutive_failures(&self, connection_id: &str) -> u32 {
        self.queues
            .get(connection_id)
            .map(|q| q.consecutive_failures)
            .unwrap_or(0)
    }

    /// Connections whose size or time trigger has fired at `now`.
    ///
    /// Skips connections with a batch in flight or still inside their
    /// post-failure backoff window.
    pub fn connections_due(&self, now: DateTime<Utc>) -> Vec<String> {
        self.queues
            .iter()
            .filter(|entry| {
                let queue = entry.value();
                if queue.in_flight.is_some() {
                    return false;
                }
                if queue.retry_after.is_some_and(|after| now < after) {
                    return false;
                }

                let mut eligible = 0;
                let mut oldest = std::time::Duration::ZERO;
                for record in queue.records.iter() {
                    if self.retry_policy.is_ready(record, now) {
                        eligible += 1;
                        oldest = oldest.max(record.age(now));
                    }
                }

                eligible > 0
                    && (eligible >= self.config.max_batch_size || oldest >= self.config.max_wait_time)
            })
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Aggregate counts across all queues at call time.
    ///
    /// `total_messages` always equals the sum of the per-state counts.
    pub fn get_metrics(&self) -> BatchMetrics {
        let mut metrics = BatchMetrics::default();

        for entry in self.queues.iter() {
            let counts = MessageStateManager::count_by_state(entry.value().all_records());
            metrics.pending_messages += counts[&MessageState::Pending];
            metrics.sending_messages += counts[&MessageState::Sending];
            metrics.sent_messages += counts[&MessageState::Sent];
            metrics.failed_messages += counts[&MessageState::Failed];
            metrics.connections += 1;
        }

        metrics.total_messages = metrics.pending_messages
            + metrics.sending_messages
            + metrics.sent_messages
            + metrics.failed_messages;

        metrics
    }

    /// Move the oldest eligible records into the in-flight slot as SENDING.
    fn claim_batch(&self, connection_id: &str) -> Result<Claim, BatcherError> {
        let now = Utc::now();
        let Some(mut queue) = self.queues.get_mut(connection_id) else {
            return Ok(Claim::Empty);
        };

        if queue.in_flight.is_some() {
            return Ok(Claim::InFlight);
        }

        let mut batch: Vec<MessageRecord> = queue
            .records
            .iter()
            .filter(|r| self.retry_policy.is_ready(r, now))
            .take(self.config.max_batch_size)
            .cloned()
            .collect();

        if batch.is_empty() {
            return Ok(Claim::Empty);
        }

        TransactionalBatchProcessor::mark_batch_sending(&mut batch)?;

        let claimed: HashSet<Uuid> = batch.iter().map(|r| r.id).collect();
        queue.records.retain(|r| !claimed.contains(&r.id));
        queue.in_flight = Some(batch.clone());

        Ok(Claim::Batch(batch))
    }

    /// SENDING -> SENT for the in-flight batch, then purge it.
    fn complete_batch(&self, connection_id: &str) -> Result<usize, BatcherError> {
        let count = {
            let mut queue = self
                .queues
                .get_mut(connection_id)
                .ok_or_else(|| BatcherError::MissingInFlight(connection_id.to_string()))?;
            let mut batch = queue
                .in_flight
                .take()
                .ok_or_else(|| BatcherError::MissingInFlight(connection_id.to_string()))?;

            if let Err(err) = TransactionalBatchProcessor::mark_batch_sent(&mut batch) {
                queue.restore_front(batch);
                return Err(err.into());
            }

            let count = batch.len();
            let remaining = MessageStateManager::remove_sent_messages(batch);
            queue.restore_front(remaining);
            queue.consecutive_failures = 0;
            queue.retry_after = None;
            queue.failed_sends.clear();
            count
        };

        self.remove_if_empty(connection_id);
        Ok(count)
    }

    /// SENDING -> PENDING for the in-flight batch, back at the queue head.
    ///
    /// Returns the connection's consecutive failure count.
    fn revert_batch(&self, connection_id: &str) -> Result<u32, BatcherError> {
        let mut queue = self
            .queues
            .get_mut(connection_id)
            .ok_or_else(|| BatcherError::MissingInFlight(connection_id.to_string()))?;
        let mut batch = queue
            .in_flight
            .take()
            .ok_or_else(|| BatcherError::MissingInFlight(connection_id.to_string()))?;

        let reverted = TransactionalBatchProcessor::revert_batch_to_pending(&mut batch);
        if reverted.is_ok() {
            queue.failed_sends.extend(batch.iter().map(|r| r.id));
        }
        queue.restore_front(batch);
        reverted?;

        queue.consecutive_failures += 1;
        let delay = self
            .retry_policy
            .calculate_retry_delay(queue.consecutive_failures - 1);
        queue.retry_after = chrono::Duration::from_std(delay)
            .ok()
            .and_then(|d| Utc::now().checked_add_signed(d));

        Ok(queue.consecutive_failures)
    }

    fn remove_if_empty(&self, connection_id: &str) {
        self.queues.remove_if(connection_id, |_, q| q.is_empty());
    }
}

/// Reverts the in-flight batch if a flush is dropped while awaiting the transport.
struct InFlightGuard<'a> {
    batcher: &'a Batcher,
    connection_id: &'a str,
    armed: bool,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        tracing::warn!(
            connection_id = %self.connection_id,
            "Flush cancelled while sending, reverting batch"
        );
        if let Err(e) = self.batcher.revert_batch(self.connection_id) {
            tracing::error!(
                connection_id = %self.connection_id,
                error = %e,
                "Failed to revert cancelled batch"
            );
        }
    }
}
