//! End-to-end tests for batching and delivery
//!
//! These tests drive the public API with in-process connections and a
//! scripted transport; no socket or external service is needed.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::{broadcast, mpsc};
use tokio_test::assert_ok;

use ara_batch_delivery::batch::{
    BatchConfig, Batcher, FlushOutcome, MessageRecord, MessageState, RetryPolicy,
};
use ara_batch_delivery::config::SchedulerConfig;
use ara_batch_delivery::connection_manager::ConnectionManager;
use ara_batch_delivery::load::LoadMonitor;
use ara_batch_delivery::tasks::FlushTask;
use ara_batch_delivery::transport::{ChannelTransport, Transport, TransportError};

/// Transport that fails according to a script, then succeeds
struct ScriptedTransport {
    script: Mutex<VecDeque<bool>>,
    delivered: Mutex<Vec<String>>,
}

impl ScriptedTransport {
    fn new(script: impl IntoIterator<Item = bool>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            delivered: Mutex::new(Vec::new()),
        }
    }

    fn delivered(&self) -> Vec<String> {
        self.delivered.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send_batch(&self, connection_id: &str, records: &[MessageRecord]) -> Result<(), TransportError> {
        if !self.script.lock().unwrap().pop_front().unwrap_or(true) {
            return Err(TransportError::Timeout {
                connection_id: connection_id.to_string(),
                timeout_ms: 5000,
            });
        }
        let mut delivered = self.delivered.lock().unwrap();
        for record in records {
            delivered.push(record.content["id"].as_str().unwrap_or_default().to_string());
        }
        Ok(())
    }
}

fn batcher_with(transport: Arc<dyn Transport>, manager: Arc<ConnectionManager>) -> Arc<Batcher> {
    Arc::new(Batcher::new(
        BatchConfig::default(),
        RetryPolicy::default(),
        transport,
        manager,
    ))
}

#[tokio::test]
async fn test_no_message_lost_across_failures() {
    let transport = Arc::new(ScriptedTransport::new([false, false, false]));
    let batcher = batcher_with(transport.clone(), Arc::new(ConnectionManager::new()));

    for i in 0..10 {
        batcher.queue_message("user-1", "conn1", json!({ "id": format!("m{}", i) }));
    }

    for _ in 0..3 {
        let outcome = assert_ok!(batcher.flush_batch("conn1").await);
        assert!(matches!(outcome, FlushOutcome::Reverted { count: 10, .. }));

        let metrics = batcher.get_metrics();
        assert_eq!(metrics.pending_messages, 10);
        assert_eq!(metrics.sending_messages, 0);
        assert_eq!(metrics.total_messages, 10);
    }

    let outcome = assert_ok!(batcher.flush_batch("conn1").await);
    assert!(matches!(outcome, FlushOutcome::Delivered { count: 10 }));

    let expected: Vec<String> = (0..10).map(|i| format!("m{}", i)).collect();
    assert_eq!(transport.delivered(), expected);
    assert_eq!(batcher.get_metrics().total_messages, 0);
}

#[tokio::test]
async fn test_channel_transport_delivers_to_every_user_connection() {
    let manager = Arc::new(ConnectionManager::new());
    let (tx1, mut rx1) = mpsc::channel(8);
    let (tx2, mut rx2) = mpsc::channel(8);
    manager.register_with_id("desktop", "user-1", tx1);
    manager.register_with_id("phone", "user-1", tx2);

    let transport = Arc::new(ChannelTransport::new(manager.clone()));
    let batcher = batcher_with(transport, manager);

    assert!(batcher.queue_for_user("user-1", json!({ "id": "a" })));
    assert!(batcher.queue_for_user("user-1", json!({ "id": "b" })));

    assert_ok!(batcher.flush_batch("desktop").await);
    assert_ok!(batcher.flush_batch("phone").await);

    for rx in [&mut rx1, &mut rx2] {
        let batch = rx.recv().await.expect("batch should arrive");
        let ids: Vec<_> = batch
            .messages
            .iter()
            .map(|m| m.content["id"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
    }
}

#[tokio::test]
async fn test_closed_connection_keeps_messages_pending() {
    let manager = Arc::new(ConnectionManager::new());
    let (tx, rx) = mpsc::channel(8);
    manager.register_with_id("conn1", "user-1", tx);
    drop(rx);

    let transport = Arc::new(ChannelTransport::new(manager.clone()));
    let batcher = batcher_with(transport, manager);
    batcher.queue_message("user-1", "conn1", json!({ "id": "x" }));

    let outcome = assert_ok!(batcher.flush_batch("conn1").await);
    match outcome {
        FlushOutcome::Reverted { error, .. } => {
            assert!(matches!(error, TransportError::ConnectionClosed(_)));
        }
        other => panic!("unexpected outcome {:?}", other),
    }

    let records = batcher.get_messages("conn1");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].state, MessageState::Pending);
    assert_eq!(records[0].retry_count, 0);
}

#[tokio::test]
async fn test_scheduler_recovers_after_transient_failures() {
    let transport = Arc::new(ScriptedTransport::new([false, false]));
    let batcher = Arc::new(Batcher::new(
        BatchConfig {
            max_batch_size: 5,
            max_wait_time: Duration::from_millis(10),
        },
        RetryPolicy {
            base_delay: Duration::from_millis(5),
            ..Default::default()
        },
        transport.clone(),
        Arc::new(ConnectionManager::new()),
    ));
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let task = FlushTask::new(
        SchedulerConfig { tick_interval_ms: 5 },
        batcher.clone(),
        Arc::new(LoadMonitor::new()),
        shutdown_rx,
    );
    let handle = tokio::spawn(task.run());

    batcher.queue_message("user-1", "conn1", json!({ "id": "only" }));

    tokio::time::timeout(Duration::from_secs(3), async {
        while transport.delivered().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("message should eventually be delivered");

    // Two failed flushes stay under the default escalation threshold
    assert_eq!(transport.delivered(), vec!["only".to_string()]);
    assert_eq!(batcher.get_metrics().total_messages, 0);

    shutdown_tx.send(()).unwrap();
    assert_ok!(handle.await);
}

#[tokio::test]
async fn test_exhausted_messages_can_be_purged() {
    let transport = Arc::new(ScriptedTransport::new(std::iter::repeat(false).take(100)));
    let batcher = Arc::new(Batcher::new(
        BatchConfig {
            max_batch_size: 5,
            max_wait_time: Duration::from_millis(1),
        },
        RetryPolicy {
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            max_retries: 2,
            failures_before_mark: 1,
        },
        transport,
        Arc::new(ConnectionManager::new()),
    ));
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let task = FlushTask::new(
        SchedulerConfig { tick_interval_ms: 2 },
        batcher.clone(),
        Arc::new(LoadMonitor::new()),
        shutdown_rx,
    );
    let handle = tokio::spawn(task.run());

    batcher.queue_message("user-1", "conn1", json!({ "id": "doomed" }));

    tokio::time::timeout(Duration::from_secs(3), async {
        loop {
            let failed = batcher.get_failed_messages("conn1");
            if failed.first().is_some_and(|r| r.is_exhausted()) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("message should exhaust its retries");

    shutdown_tx.send(()).unwrap();
    assert_ok!(handle.await);

    // Still visible after shutdown, then removed by an explicit purge
    assert_eq!(batcher.get_metrics().failed_messages, 1);
    let purged = batcher.purge_exhausted("conn1");
    assert_eq!(purged.len(), 1);
    assert_eq!(purged[0].retry_count, 2);
    assert_eq!(batcher.get_metrics().total_messages, 0);
}
