//! Raw broker records and per-record outcomes

use crate::validator::Violation;
use bytes::Bytes;
use chrono::{DateTime, Local, TimeZone};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Record as delivered by the broker, owned for one processing cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    /// Source topic
    pub topic: String,

    /// Partition within the topic
    pub partition: i32,

    /// Partition-local offset
    pub offset: i64,

    /// Broker timestamp (epoch millis)
    pub timestamp: i64,

    /// Payload; `None` for tombstones
    pub payload: Option<Bytes>,
}

impl RawRecord {
    /// Create new record
    pub fn new(
        topic: impl Into<String>,
        partition: i32,
        offset: i64,
        timestamp: i64,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
            timestamp,
            payload: Some(payload.into()),
        }
    }

    /// Create record without payload
    pub fn tombstone(topic: impl Into<String>, partition: i32, offset: i64, timestamp: i64) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
            timestamp,
            payload: None,
        }
    }

    /// True when the payload is absent, empty, or whitespace only
    pub fn is_blank(&self) -> bool {
        match &self.payload {
            None => true,
            Some(bytes) => match std::str::from_utf8(bytes) {
                Ok(text) => text.trim().is_empty(),
                Err(_) => false,
            },
        }
    }

    /// Payload bytes (empty for tombstones)
    pub fn payload_bytes(&self) -> &[u8] {
        self.payload.as_deref().unwrap_or_default()
    }

    /// Payload rendered for logs
    pub fn payload_lossy(&self) -> String {
        String::from_utf8_lossy(self.payload_bytes()).into_owned()
    }

    /// Broker timestamp in the local time zone
    pub fn local_time(&self) -> Option<DateTime<Local>> {
        Local.timestamp_millis_opt(self.timestamp).single()
    }
}

impl fmt::Display for RawRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}@{}", self.topic, self.partition, self.offset)
    }
}

/// Failure category driving how a record is routed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorClassification {
    /// Broker unreachable; redeliver
    Connectivity,
    /// Payload could not be decoded; drop
    MalformedPayload,
    /// Event failed business validation; drop
    ValidationFailure,
    /// Business processing raised; drop
    ProcessingFailure,
}

/// Terminal state of a record that was acknowledged
#[derive(Debug, Clone, PartialEq)]
pub enum RecordOutcome {
    /// Event processed successfully
    Processed,
    /// Payload empty or blank
    SkippedEmpty,
    /// Payload could not be transformed
    SkippedMalformed {
        /// Parse failure detail
        reason: String,
    },
    /// Event failed validation
    SkippedInvalid {
        /// Rules that rejected the event
        violations: Vec<Violation>,
    },
    /// Business processing failed; the record is dropped, not redelivered
    ProcessingFailed {
        /// Error raised by the processor
        error: String,
    },
}

impl RecordOutcome {
    /// Failure category, `None` for success and empty payloads
    pub fn classification(&self) -> Option<ErrorClassification> {
        match self {
            RecordOutcome::Processed | RecordOutcome::SkippedEmpty => None,
            RecordOutcome::SkippedMalformed { .. } => Some(ErrorClassification::MalformedPayload),
            RecordOutcome::SkippedInvalid { .. } => Some(ErrorClassification::ValidationFailure),
            RecordOutcome::ProcessingFailed { .. } => Some(ErrorClassification::ProcessingFailure),
        }
    }

    /// Whether the business processor ran
    pub fn was_processed(&self) -> bool {
        matches!(
            self,
            RecordOutcome::Processed | RecordOutcome::ProcessingFailed { .. }
        )
    }

    /// Metric label
    pub fn label(&self) -> &'static str {
        match self {
            RecordOutcome::Processed => "processed",
            RecordOutcome::SkippedEmpty => "empty",
            RecordOutcome::SkippedMalformed { .. } => "malformed",
            RecordOutcome::SkippedInvalid { .. } => "invalid",
            RecordOutcome::ProcessingFailed { .. } => "process_failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_payloads() {
        assert!(RawRecord::new("t", 0, 0, 0, "").is_blank());
        assert!(RawRecord::new("t", 0, 0, 0, "  \n\t").is_blank());
        assert!(RawRecord::tombstone("t", 0, 0, 0).is_blank());
        assert!(!RawRecord::new("t", 0, 0, 0, "{}").is_blank());
        assert!(!RawRecord::new("t", 0, 0, 0, vec![0xff, 0xfe]).is_blank());
    }

    #[test]
    fn test_record_display() {
        let record = RawRecord::new("events", 3, 42, 0, "{}");
        assert_eq!(record.to_string(), "events-3@42");
    }

    #[test]
    fn test_outcome_classification() {
        assert_eq!(RecordOutcome::Processed.classification(), None);
        assert_eq!(RecordOutcome::SkippedEmpty.classification(), None);
        assert_eq!(
            RecordOutcome::SkippedMalformed { reason: "x".into() }.classification(),
            Some(ErrorClassification::MalformedPayload)
        );
        assert_eq!(
            RecordOutcome::SkippedInvalid { violations: vec![] }.classification(),
            Some(ErrorClassification::ValidationFailure)
        );
        assert_eq!(
            RecordOutcome::ProcessingFailed { error: "x".into() }.classification(),
            Some(ErrorClassification::ProcessingFailure)
        );
        assert!(RecordOutcome::ProcessingFailed { error: "x".into() }.was_processed());
        assert!(!RecordOutcome::SkippedEmpty.was_processed());
    }
}
