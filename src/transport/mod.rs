//! Transport seam between the batcher and the wire.
//!
//! The batcher hands a whole batch to a [`Transport`] and treats any error as
//! "nothing in this batch was delivered". Timeouts are the transport's job and
//! must surface as an error like any other failure.

mod channel;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::batch::MessageRecord;

pub use channel::ChannelTransport;

/// Errors a transport may report for a batch send
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// No live connection with this ID
    #[error("Connection not found: {0}")]
    ConnectionNotFound(String),

    /// The connection's receiving side has gone away
    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    /// The send did not complete in time
    #[error("Send to {connection_id} timed out after {timeout_ms}ms")]
    Timeout { connection_id: String, timeout_ms: u64 },

    /// The transport refused the batch
    #[error("Batch rejected: {0}")]
    Rejected(String),
}

impl TransportError {
    /// Short label used for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ConnectionNotFound(_) => "not_found",
            Self::ConnectionClosed(_) => "closed",
            Self::Timeout { .. } => "timeout",
            Self::Rejected(_) => "rejected",
        }
    }
}

/// Delivers one batch of records to one connection.
///
/// The batch is a single unit: implementations must either deliver all of it
/// or return an error.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send_batch(&self, connection_id: &str, records: &[MessageRecord]) -> Result<(), TransportError>;
}

/// A message inside an outbound batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub id: Uuid,
    pub content: serde_json::Value,
    pub queued_at: DateTime<Utc>,
}

/// Batch envelope written to a connection's outbound channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundBatch {
    pub connection_id: String,
    pub messages: Vec<OutboundMessage>,
    pub sent_at: DateTime<Utc>,
}

impl OutboundBatch {
    /// Build an envelope from records, keeping their order
    pub fn from_records(connection_id: &str, records: &[MessageRecord]) -> Self {
        Self {
            connection_id: connection_id.to_string(),
            messages: records
                .iter()
                .map(|r| OutboundMessage {
                    id: r.id,
                    content: r.content.clone(),
                    queued_at: r.queued_at,
                })
                .collect(),
            sent_at: Utc::now(),
        }
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
