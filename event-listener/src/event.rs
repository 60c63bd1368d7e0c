//! Business event carried in record payloads

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Event decoded from a record payload.
///
/// Immutable once built; `reference` is optional here so that a payload
/// missing it still decodes and is rejected by validation instead of by
/// parsing. Fields outside the schema are a decode error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Event {
    #[serde(default)]
    reference: Option<String>,

    #[serde(default)]
    status: Option<String>,

    #[serde(
        rename = "created_datetime",
        default,
        deserialize_with = "deserialize_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    created_at: Option<DateTime<Utc>>,
}

impl Event {
    /// Create event with a reference
    pub fn new(reference: impl Into<String>) -> Self {
        Self {
            reference: Some(reference.into()),
            status: None,
            created_at: None,
        }
    }

    /// Set status
    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    /// Set creation time
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }

    /// Unique reference of the transaction behind this event
    pub fn reference(&self) -> Option<&str> {
        self.reference.as_deref()
    }

    /// Process status
    pub fn status(&self) -> Option<&str> {
        self.status.as_deref()
    }

    /// Creation time
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawTimestamp {
    Millis(i64),
    Text(String),
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<RawTimestamp>::deserialize(deserializer)?;

    match raw {
        None => Ok(None),
        Some(RawTimestamp::Millis(millis)) => Utc
            .timestamp_millis_opt(millis)
            .single()
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("timestamp out of range: {}", millis))),
        Some(RawTimestamp::Text(text)) => parse_timestamp(&text)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {}", text))),
    }
}

/// Parse RFC 3339, or a naive date-time taken as UTC
fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }

    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .map(|naive| Utc.from_utc_datetime(&naive))
}
