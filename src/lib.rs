// Core batching engine
pub mod batch;
pub mod load;

// Delivery seams
pub mod connection_manager;
pub mod transport;

// Supporting modules
pub mod config;
pub mod error;
pub mod metrics;
pub mod tasks;
pub mod telemetry;
