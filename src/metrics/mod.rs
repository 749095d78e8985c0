//! Prometheus metrics for the batching engine.
//!
//! - Queue metrics (records per state, connections with a queue)
//! - Flush metrics (outcomes, latency, batch size, transport errors)
//! - Retry metrics (failure marks, exhausted records, operator purges)
//! - Load monitor gauges

mod helpers;

pub use helpers::{BatchMetricsRecorder, LoadMetricsRecorder};

use lazy_static::lazy_static;
use prometheus::{
    register_gauge, register_histogram, register_int_counter, register_int_counter_vec,
    register_int_gauge, register_int_gauge_vec, Gauge, Histogram, IntCounter, IntCounterVec,
    IntGauge, IntGaugeVec,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "ara_batch";

lazy_static! {
    // ============================================================================
    // Queue Metrics
    // ============================================================================

    /// Records currently held, by state
    pub static ref QUEUE_MESSAGES: IntGaugeVec = register_int_gauge_vec!(
        format!("{}_queue_messages", METRIC_PREFIX),
        "Records currently held in connection queues, by state",
        &["state"]
    ).unwrap();

    /// Connections with a non-empty queue
    pub static ref QUEUE_CONNECTIONS: IntGauge = register_int_gauge!(
        format!("{}_queue_connections", METRIC_PREFIX),
        "Number of connections with queued records"
    ).unwrap();

    /// Records accepted by queue_message
    pub static ref MESSAGES_ENQUEUED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_messages_enqueued_total", METRIC_PREFIX),
        "Total records queued for delivery"
    ).unwrap();

    // ============================================================================
    // Flush Metrics
    // ============================================================================

    /// Flush attempts by outcome
    pub static ref FLUSHES_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_flushes_total", METRIC_PREFIX),
        "Total flush attempts that reached the transport, by outcome",
        &["outcome"]
    ).unwrap();

    /// Records confirmed delivered and purged
    pub static ref MESSAGES_DELIVERED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_messages_delivered_total", METRIC_PREFIX),
        "Total records confirmed delivered by the transport"
    ).unwrap();

    /// Records returned to pending after a failed send
    pub static ref MESSAGES_REVERTED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_messages_reverted_total", METRIC_PREFIX),
        "Total records reverted to pending after a failed send"
    ).unwrap();

    /// Transport errors by kind
    pub static ref TRANSPORT_ERRORS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_transport_errors_total", METRIC_PREFIX),
        "Total transport errors, by kind",
        &["kind"]
    ).unwrap();

    /// Time spent in the transport per flush
    pub static ref FLUSH_LATENCY: Histogram = register_histogram!(
        format!("{}_flush_latency_seconds", METRIC_PREFIX),
        "Transport send latency per flush in seconds",
        vec![0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]
    ).unwrap();

    /// Records per flushed batch
    pub static ref BATCH_SIZE: Histogram = register_histogram!(
        format!("{}_batch_size", METRIC_PREFIX),
        "Number of records per flushed batch",
        vec![1.0, 2.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0]
    ).unwrap();

    // ============================================================================
    // Retry Metrics
    // ============================================================================

    /// Records explicitly marked failed
    pub static ref MESSAGES_MARKED_FAILED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_messages_marked_failed_total", METRIC_PREFIX),
        "Total explicit failure marks applied to records"
    ).unwrap();

    /// Records that ran out of retries
    pub static ref MESSAGES_EXHAUSTED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_messages_exhausted_total", METRIC_PREFIX),
        "Total records that reached their retry limit"
    ).unwrap();

    /// Exhausted records removed by an operator purge
    pub static ref MESSAGES_PURGED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_messages_purged_total", METRIC_PREFIX),
        "Total exhausted records removed by explicit purge"
    ).unwrap();

    // ============================================================================
    // Load Metrics
    // ============================================================================

    pub static ref LOAD_CURRENT: Gauge = register_gauge!(
        format!("{}_load_current", METRIC_PREFIX),
        "Most recent load sample"
    ).unwrap();

    pub static ref LOAD_PEAK: Gauge = register_gauge!(
        format!("{}_load_peak", METRIC_PREFIX),
        "Highest load sample observed"
    ).unwrap();

    pub static ref LOAD_AVERAGE: Gauge = register_gauge!(
        format!("{}_load_average", METRIC_PREFIX),
        "Mean of all load samples"
    ).unwrap();
}
