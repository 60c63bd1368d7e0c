//! Business processing capability

use crate::event::Event;
use async_trait::async_trait;
use std::error::Error as StdError;
use thiserror::Error;
use tracing::info;

/// Failure raised by business processing
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ProcessError {
    message: String,
    #[source]
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl ProcessError {
    /// Create new error
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Create error wrapping a cause
    pub fn with_source(
        message: impl Into<String>,
        source: impl Into<Box<dyn StdError + Send + Sync>>,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(source.into()),
        }
    }
}

/// Business logic run for each valid event
#[async_trait]
pub trait EventProcessor: Send + Sync {
    /// Process a validated event
    async fn process(&self, event: &Event) -> Result<(), ProcessError>;
}

/// Processor that only logs the event
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingProcessor;

#[async_trait]
impl EventProcessor for LoggingProcessor {
    async fn process(&self, event: &Event) -> Result<(), ProcessError> {
        info!(
            reference = event.reference().unwrap_or_default(),
            status = event.status().unwrap_or_default(),
            "Processing event"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_logging_processor_accepts_event() {
        let processor = LoggingProcessor;
        assert!(processor.process(&Event::new("REF1")).await.is_ok());
    }

    #[test]
    fn test_process_error_source() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        let err = ProcessError::with_source("write failed", io);

        assert_eq!(err.to_string(), "write failed");
        assert!(err.source().is_some());
        assert!(ProcessError::new("boom").source().is_none());
    }
}
