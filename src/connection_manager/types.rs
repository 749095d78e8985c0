//! Connection handle and the directory seam used by the batcher

use std::sync::Arc;

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::transport::OutboundBatch;

/// Handle for a single live connection
pub struct ConnectionHandle {
    pub id: String,
    pub user_id: String,
    pub sender: mpsc::Sender<OutboundBatch>,
}

impl ConnectionHandle {
    /// Create a handle with a generated connection ID
    pub fn new(user_id: String, sender: mpsc::Sender<OutboundBatch>) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), user_id, sender)
    }

    pub fn with_id(id: String, user_id: String, sender: mpsc::Sender<OutboundBatch>) -> Self {
        Self { id, user_id, sender }
    }

    /// Whether the receiving side of the connection is gone
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Lookup of live connections, provided to the batcher and transport.
///
/// Implementations must be thread-safe (`Send + Sync`) as they are shared
/// across flush tasks.
pub trait ConnectionDirectory: Send + Sync {
    /// Get a connection by its ID
    fn get_connection_by_id(&self, connection_id: &str) -> Option<Arc<ConnectionHandle>>;

    /// Get all live connections of a user
    fn get_user_connections(&self, user_id: &str) -> Vec<Arc<ConnectionHandle>>;
}

/// Connection statistics
#[derive(Debug, Clone, serde::Serialize)]
pub struct ConnectionStats {
    pub total_connections: usize,
    pub unique_users: usize,
}
