use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::join_all;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;

use crate::batch::{Batcher, FlushOutcome};
use crate::config::SchedulerConfig;
use crate::load::LoadMonitor;
use crate::metrics::{BatchMetricsRecorder, LoadMetricsRecorder};

/// Background task that fires size and time triggers and escalates
/// repeatedly failing connections.
pub struct FlushTask {
    config: SchedulerConfig,
    batcher: Arc<Batcher>,
    load_monitor: Arc<LoadMonitor>,
    shutdown: broadcast::Receiver<()>,
}

impl FlushTask {
    pub fn new(
        config: SchedulerConfig,
        batcher: Arc<Batcher>,
        load_monitor: Arc<LoadMonitor>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            config,
            batcher,
            load_monitor,
            shutdown,
        }
    }

    /// Run until shutdown, then drain every queue once
    pub async fn run(mut self) {
        let tick_interval = Duration::from_millis(self.config.tick_interval_ms.max(1));
        let mut tick_timer = tokio::time::interval(tick_interval);
        tick_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let notify = self.batcher.flush_notifier();

        // Skip immediate first tick
        tick_timer.tick().await;

        tracing::info!(
            tick_interval_ms = self.config.tick_interval_ms,
            max_batch_size = self.batcher.config().max_batch_size,
            max_wait_time_ms = self.batcher.config().max_wait_time.as_millis() as u64,
            "Flush task started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("Flush task received shutdown signal");
                    break;
                }
                _ = tick_timer.tick() => {
                    self.flush_due().await;
                }
                _ = notify.notified() => {
                    self.flush_due().await;
                }
            }
        }

        self.drain().await;
        tracing::info!("Flush task stopped");
    }

    /// Flush every connection whose trigger has fired
    async fn flush_due(&self) {
        let due = self.batcher.connections_due(Utc::now());

        if !due.is_empty() {
            let start = Instant::now();
            join_all(due.iter().map(|id| self.flush_connection(id))).await;

            tracing::debug!(
                connections = due.len(),
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Flush round completed"
            );
        }

        self.refresh_metrics();
    }

    async fn flush_connection(&self, connection_id: &str) {
        let failures_before_mark = self.batcher.retry_policy().failures_before_mark;

        match self.batcher.flush_batch(connection_id).await {
            Ok(FlushOutcome::Reverted {
                consecutive_failures, ..
            }) if consecutive_failures >= failures_before_mark => {
                if let Err(e) = self.batcher.fail_batch(connection_id) {
                    tracing::error!(
                        connection_id = %connection_id,
                        error = %e,
                        "Failed to mark batch as failed"
                    );
                }
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!(
                    connection_id = %connection_id,
                    error = %e,
                    "Flush aborted on invalid state transition"
                );
            }
        }
    }

    /// Flush every connection until it is empty or a send fails, ignoring
    /// post-failure backoff
    async fn drain(&self) {
        let connection_ids = self.batcher.connection_ids();

        if !connection_ids.is_empty() {
            let delivered: usize = join_all(connection_ids.iter().map(|id| self.drain_connection(id)))
                .await
                .into_iter()
                .sum();

            tracing::info!(
                connections = connection_ids.len(),
                delivered = delivered,
                "Drained queues on shutdown"
            );
        }

        self.refresh_metrics();

        let remaining = self.batcher.get_metrics().total_messages;
        if remaining > 0 {
            tracing::warn!(
                remaining = remaining,
                "Messages left undelivered at shutdown"
            );
        }
    }

    /// Returns the number of records delivered
    async fn drain_connection(&self, connection_id: &str) -> usize {
        let mut delivered = 0;

        loop {
            match self.batcher.flush_batch(connection_id).await {
                Ok(FlushOutcome::Delivered { count }) => delivered += count,
                Ok(FlushOutcome::Reverted { error, .. }) => {
                    tracing::warn!(
                        connection_id = %connection_id,
                        error = %error,
                        "Drain stopped after failed send"
                    );
                    break;
                }
                Ok(FlushOutcome::Empty) | Ok(FlushOutcome::InFlight) => break,
                Err(e) => {
                    tracing::error!(
                        connection_id = %connection_id,
                        error = %e,
                        "Drain aborted on invalid state transition"
                    );
                    break;
                }
            }
        }

        delivered
    }

    fn refresh_metrics(&self) {
        let metrics = self.batcher.get_metrics();
        BatchMetricsRecorder::update_queue_gauges(&metrics);

        self.load_monitor.update_load(metrics.total_messages as f64);
        LoadMetricsRecorder::update(&self.load_monitor.get_metrics());
    }
}
