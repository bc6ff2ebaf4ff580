//! Error types

use thiserror::Error;

/// Errors returned by the resource façade
#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("Resource template cannot be undefined")]
    InvalidTemplate,

    #[error("Invalid window: page {page} of size {size}")]
    InvalidWindow { page: u64, size: u64 },

    #[error("Template read failed: {0}")]
    Read(#[from] ReadError),

    #[error("Template rejected the read: {message}")]
    ReadFailed { message: String },
}

/// Errors raised by a template's `read`
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ReadError {
    #[error("{0}")]
    Failed(String),

    #[error("Malformed template options: {0}")]
    InvalidOptions(String),
}

impl ReadError {
    pub fn failed(message: impl Into<String>) -> Self {
        ReadError::Failed(message.into())
    }
}
