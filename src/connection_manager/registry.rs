use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::transport::OutboundBatch;

use super::types::{ConnectionDirectory, ConnectionHandle, ConnectionStats};

/// Registry of live connections
pub struct ConnectionManager {
    /// connection_id -> ConnectionHandle
    connections: DashMap<String, Arc<ConnectionHandle>>,
    /// user_id -> Set<connection_id> (supports multiple devices)
    user_index: DashMap<String, HashSet<String>>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            user_index: DashMap::new(),
        }
    }

    /// Register a new connection with a generated ID
    pub fn register(&self, user_id: String, sender: mpsc::Sender<OutboundBatch>) -> Arc<ConnectionHandle> {
        self.insert(Arc::new(ConnectionHandle::new(user_id, sender)))
    }

    /// Register a connection under a caller-chosen ID
    pub fn register_with_id(
        &self,
        connection_id: impl Into<String>,
        user_id: impl Into<String>,
        sender: mpsc::Sender<OutboundBatch>,
    ) -> Arc<ConnectionHandle> {
        self.insert(Arc::new(ConnectionHandle::with_id(
            connection_id.into(),
            user_id.into(),
            sender,
        )))
    }

    fn insert(&self, handle: Arc<ConnectionHandle>) -> Arc<ConnectionHandle> {
        let conn_id = handle.id.clone();

        if let Some(previous) = self.connections.insert(conn_id.clone(), handle.clone()) {
            if previous.user_id != handle.user_id {
                self.remove_from_user_index(&previous.user_id, &conn_id);
            }
        }

        self.user_index
            .entry(handle.user_id.clone())
            .or_default()
            .insert(conn_id.clone());

        tracing::info!(connection_id = %conn_id, user_id = %handle.user_id, "Connection registered");

        handle
    }

    /// Unregister a connection.
    ///
    /// Records already queued for it stay in the batcher; only the route goes away.
    pub fn unregister(&self, connection_id: &str) {
        if let Some((_, handle)) = self.connections.remove(connection_id) {
            self.remove_from_user_index(&handle.user_id, connection_id);
            tracing::info!(connection_id = %connection_id, user_id = %handle.user_id, "Connection unregistered");
        }
    }

    fn remove_from_user_index(&self, user_id: &str, connection_id: &str) {
        if let Some(mut user_conns) = self.user_index.get_mut(user_id) {
            user_conns.remove(connection_id);
            if user_conns.is_empty() {
                drop(user_conns);
                self.user_index.remove_if(user_id, |_, conns| conns.is_empty());
            }
        }
    }

    /// Get statistics
    pub fn stats(&self) -> ConnectionStats {
        ConnectionStats {
            total_connections: self.connections.len(),
            unique_users: self.user_index.len(),
        }
    }
}

impl ConnectionDirectory for ConnectionManager {
    fn get_connection_by_id(&self, connection_id: &str) -> Option<Arc<ConnectionHandle>> {
        self.connections.get(connection_id).map(|h| h.clone())
    }

    fn get_user_connections(&self, user_id: &str) -> Vec<Arc<ConnectionHandle>> {
        self.user_index
            .get(user_id)
            .map(|conn_ids| {
                conn_ids
                    .iter()
                    .filter_map(|id| self.connections.get(id).map(|h| h.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}
