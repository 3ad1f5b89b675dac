//! Error types for the Gatehouse service.
//!
//! Admission denials are not errors; they travel as
//! [`Decision::Deny`](crate::admission::Decision). This type covers the
//! faults that stop the service from starting or serving.

use thiserror::Error;

/// Main error type for Gatehouse operations.
#[derive(Error, Debug)]
pub enum GatehouseError {
    /// Invalid or missing configuration values
    #[error("Configuration error: {0}")]
    Config(String),

    /// Failure reading or merging configuration sources
    #[error("Configuration source error: {0}")]
    ConfigSource(#[from] config::ConfigError),

    /// gRPC server errors
    #[error("gRPC error: {0}")]
    Grpc(#[from] tonic::transport::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Gatehouse operations.
pub type Result<T> = std::result::Result<T, GatehouseError>;
