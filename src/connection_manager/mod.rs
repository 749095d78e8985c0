//! Live connection registry and the lookup seam consumed by batching.

mod registry;
mod types;

pub use registry::ConnectionManager;
pub use types::{ConnectionDirectory, ConnectionHandle, ConnectionStats};
