//! Payload to [`Event`] transformation

use crate::event::Event;
use thiserror::Error;
use tracing::{debug, error};

/// Why a payload could not be turned into an event
#[derive(Debug, Error)]
pub enum TransformError {
    /// Payload is not valid UTF-8
    #[error("payload is not valid UTF-8: {0}")]
    Encoding(#[from] std::str::Utf8Error),

    /// Payload is not a valid event document
    #[error("payload is not a valid event: {0}")]
    Json(#[from] serde_json::Error),

    /// Payload decoded to JSON `null`
    #[error("payload decoded to no value")]
    NoValue,
}

/// Decode a JSON payload into an [`Event`].
///
/// Never panics; failures are logged here and returned to the caller,
/// which acknowledges and drops the record.
pub fn transform(payload: &[u8]) -> Result<Event, TransformError> {
    let result = decode(payload);

    match &result {
        Ok(event) => debug!(?event, "Payload transformed into event"),
        Err(e) => error!("Failed to parse event payload: {}", e),
    }

    result
}

fn decode(payload: &[u8]) -> Result<Event, TransformError> {
    let text = std::str::from_utf8(payload)?;
    let event: Option<Event> = serde_json::from_str(text)?;
    event.ok_or(TransformError::NoValue)
}
