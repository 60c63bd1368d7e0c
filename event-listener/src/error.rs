//! Error types for the event listener

use crate::record::ErrorClassification;
use thiserror::Error;

/// Event listener error
#[derive(Debug, Error)]
pub enum Error {
    /// Broker unreachable at the health gate; the record must be redelivered
    #[error("Connectivity error: {0}")]
    Connectivity(String),

    /// Payload could not be parsed
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    /// Invalid argument passed to an operation
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Broker client error (poll, commit, describe cluster)
    #[error("Broker error: {0}")]
    Broker(String),

    /// Operation exceeded its deadline
    #[error("Timeout after {0}ms")]
    Timeout(u64),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parse error
    #[error("Config parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Operation cancelled by shutdown
    #[error("Shutdown in progress")]
    Shutdown,
}

impl Error {
    /// Whether the delivery container may retry the record that produced this error.
    ///
    /// Malformed-input errors can never succeed on redelivery, so they are
    /// given up immediately without consuming retry attempts.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::MalformedPayload(_) | Error::InvalidArgument(_) | Error::Serialization(_) => {
                false
            }
            Error::Config(_) | Error::TomlParse(_) | Error::Shutdown => false,
            Error::Connectivity(_) | Error::Broker(_) | Error::Timeout(_) | Error::Io(_) => true,
        }
    }

    /// Pipeline classification of this error, if it maps onto one
    pub fn classification(&self) -> Option<ErrorClassification> {
        match self {
            Error::Connectivity(_) | Error::Timeout(_) => Some(ErrorClassification::Connectivity),
            Error::MalformedPayload(_) | Error::Serialization(_) => {
                Some(ErrorClassification::MalformedPayload)
            }
            _ => None,
        }
    }
}

/// Result type
pub type Result<T> = std::result::Result<T, Error>;
