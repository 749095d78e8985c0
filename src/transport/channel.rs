use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::timeout;

use crate::batch::MessageRecord;
use crate::connection_manager::ConnectionDirectory;

use super::{OutboundBatch, Transport, TransportError};

/// Default timeout for a single batch send
const DEFAULT_SEND_TIMEOUT_MS: u64 = 5000;

/// Transport that pushes each batch onto the target connection's outbound
/// channel, where the socket writer task picks it up.
pub struct ChannelTransport {
    directory: Arc<dyn ConnectionDirectory>,
    send_timeout: Duration,
}

impl ChannelTransport {
    pub fn new(directory: Arc<dyn ConnectionDirectory>) -> Self {
        Self::with_timeout(directory, Duration::from_millis(DEFAULT_SEND_TIMEOUT_MS))
    }

    pub fn with_timeout(directory: Arc<dyn ConnectionDirectory>, send_timeout: Duration) -> Self {
        Self {
            directory,
            send_timeout,
        }
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn send_batch(&self, connection_id: &str, records: &[MessageRecord]) -> Result<(), TransportError> {
        let handle = self
            .directory
            .get_connection_by_id(connection_id)
            .ok_or_else(|| TransportError::ConnectionNotFound(connection_id.to_string()))?;

        if handle.is_closed() {
            return Err(TransportError::ConnectionClosed(connection_id.to_string()));
        }

        let batch = OutboundBatch::from_records(connection_id, records);

        match timeout(self.send_timeout, handle.sender.send(batch)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => {
                tracing::debug!(
                    connection_id = %connection_id,
                    "Failed to send batch, connection may be closed"
                );
                Err(TransportError::ConnectionClosed(connection_id.to_string()))
            }
            Err(_) => {
                tracing::debug!(
                    connection_id = %connection_id,
                    timeout_ms = self.send_timeout.as_millis() as u64,
                    "Batch send timed out"
                );
                Err(TransportError::Timeout {
                    connection_id: connection_id.to_string(),
                    timeout_ms: self.send_timeout.as_millis() as u64,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection_manager::ConnectionManager;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn records(n: usize) -> Vec<MessageRecord> {
        (0..n)
            .map(|i| MessageRecord::new("user-1", "conn1", json!({ "seq": i })))
            .collect()
    }

    #[tokio::test]
    async fn test_send_batch_delivers_envelope() {
        let manager = Arc::new(ConnectionManager::new());
        let (tx, mut rx) = mpsc::channel(4);
        manager.register_with_id("conn1", "user-1", tx);
        let transport = ChannelTransport::new(manager.clone());

        transport.send_batch("conn1", &records(2)).await.unwrap();

        let batch = rx.recv().await.unwrap();
        assert_eq!(batch.connection_id, "conn1");
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.messages[1].content["seq"], 1);
    }

    #[tokio::test]
    async fn test_unknown_connection() {
        let manager = Arc::new(ConnectionManager::new());
        let transport = ChannelTransport::new(manager);

        let err = transport.send_batch("missing", &records(1)).await.unwrap_err();
        assert!(matches!(err, TransportError::ConnectionNotFound(_)));
    }

    #[tokio::test]
    async fn test_closed_connection() {
        let manager = Arc::new(ConnectionManager::new());
        let (tx, rx) = mpsc::channel(4);
        manager.register_with_id("conn1", "user-1", tx);
        drop(rx);
        let transport = ChannelTransport::new(manager);

        let err = transport.send_batch("conn1", &records(1)).await.unwrap_err();
        assert!(matches!(err, TransportError::ConnectionClosed(_)));
    }

    #[tokio::test]
    async fn test_full_channel_times_out() {
        let manager = Arc::new(ConnectionManager::new());
        let (tx, _rx) = mpsc::channel(1);
        manager.register_with_id("conn1", "user-1", tx);
        let transport = ChannelTransport::with_timeout(manager, Duration::from_millis(20));

        transport.send_batch("conn1", &records(1)).await.unwrap();
        let err = transport.send_batch("conn1", &records(1)).await.unwrap_err();
        assert!(matches!(err, TransportError::Timeout { timeout_ms: 20, .. }));
    }
}
