use thiserror::Error;

use crate::telemetry::TelemetryError;

/// Startup and runtime errors of the delivery service binary.
///
/// Library operations report their own errors (`BatcherError`,
/// `TransportError`); this type only covers process wiring.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] TelemetryError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
