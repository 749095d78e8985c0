//! Transactional message batching.
//!
//! Records move through `PENDING -> SENDING -> SENT` on success, back to
//! `PENDING` on a failed send, and into `FAILED` only through an explicit
//! failure mark. SENT records are purged as soon as a flush resolves.

mod batcher;
mod processor;
mod record;
mod retry;
mod state;

pub use batcher::{BatchMetrics, Batcher, BatcherError, FailOutcome, FlushOutcome};
pub use processor::{TransactionalBatchProcessor, TransitionError};
pub use record::{BatchConfig, MessageRecord, MessageState, DEFAULT_MAX_RETRIES};
pub use retry::RetryPolicy;
pub use state::MessageStateManager;
