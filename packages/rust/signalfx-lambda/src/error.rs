//! Errors raised by the telemetry collaborators.
//!
//! None of these ever reach the caller of a wrapped handler: the middleware
//! logs them and lets the invocation outcome stand.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("failed to build span exporter: {0}")]
    Exporter(String),

    #[error("failed to flush spans: {0}")]
    Flush(String),

    #[error("metrics transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("ingest rejected datapoints with status {0}")]
    Rejected(u16),

    #[error("failed to encode datapoints: {0}")]
    Encoding(#[from] serde_json::Error),
}
