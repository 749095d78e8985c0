//! Metrics helper structs for convenient metric recording

use crate::batch::BatchMetrics;
use crate::load::LoadMetrics;

use super::{
    BATCH_SIZE, FLUSHES_TOTAL, FLUSH_LATENCY, LOAD_AVERAGE, LOAD_CURRENT, LOAD_PEAK,
    MESSAGES_DELIVERED_TOTAL, MESSAGES_ENQUEUED_TOTAL, MESSAGES_EXHAUSTED_TOTAL,
    MESSAGES_MARKED_FAILED_TOTAL, MESSAGES_PURGED_TOTAL, MESSAGES_REVERTED_TOTAL,
    QUEUE_CONNECTIONS, QUEUE_MESSAGES, TRANSPORT_ERRORS_TOTAL,
};

/// Helper struct for recording batcher metrics
pub struct BatchMetricsRecorder;

impl BatchMetricsRecorder {
    /// Record a record accepted into a queue
    pub fn record_enqueued() {
        MESSAGES_ENQUEUED_TOTAL.inc();
    }

    /// Record a batch confirmed by the transport
    pub fn record_delivered(batch_size: usize, latency_secs: f64) {
        FLUSHES_TOTAL.with_label_values(&["delivered"]).inc();
        MESSAGES_DELIVERED_TOTAL.inc_by(batch_size as u64);
        BATCH_SIZE.observe(batch_size as f64);
        FLUSH_LATENCY.observe(latency_secs);
    }

    /// Record a batch reverted after a transport error
    pub fn record_reverted(batch_size: usize, latency_secs: f64, error_kind: &str) {
        FLUSHES_TOTAL.with_label_values(&["reverted"]).inc();
        MESSAGES_REVERTED_TOTAL.inc_by(batch_size as u64);
        TRANSPORT_ERRORS_TOTAL.with_label_values(&[error_kind]).inc();
        BATCH_SIZE.observe(batch_size as f64);
        FLUSH_LATENCY.observe(latency_secs);
    }

    /// Record explicit failure marks and how many of them exhausted their retries
    pub fn record_marked_failed(marked: usize, exhausted: usize) {
        MESSAGES_MARKED_FAILED_TOTAL.inc_by(marked as u64);
        if exhausted > 0 {
            MESSAGES_EXHAUSTED_TOTAL.inc_by(exhausted as u64);
        }
    }

    /// Record exhausted records removed by an operator
    pub fn record_purged(count: usize) {
        MESSAGES_PURGED_TOTAL.inc_by(count as u64);
    }

    /// Refresh queue gauges from a metrics snapshot
    pub fn update_queue_gauges(metrics: &BatchMetrics) {
        QUEUE_MESSAGES
            .with_label_values(&["pending"])
            .set(metrics.pending_messages as i64);
        QUEUE_MESSAGES
            .with_label_values(&["sending"])
            .set(metrics.sending_messages as i64);
        QUEUE_MESSAGES
            .with_label_values(&["sent"])
            .set(metrics.sent_messages as i64);
        QUEUE_MESSAGES
            .with_label_values(&["failed"])
            .set(metrics.failed_messages as i64);
        QUEUE_CONNECTIONS.set(metrics.connections as i64);
    }
}

/// Helper struct for load monitor gauges
pub struct LoadMetricsRecorder;

impl LoadMetricsRecorder {
    pub fn update(metrics: &LoadMetrics) {
        LOAD_CURRENT.set(metrics.current_load);
        LOAD_PEAK.set(metrics.peak_load);
        LOAD_AVERAGE.set(metrics.average_load);
    }
}
