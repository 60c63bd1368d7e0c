//! Per-record processing state machine
//!
//! Every record takes exactly one terminal path, checked in order:
//!
//! 1. health gate: broker unavailable -> `Err(Error::Connectivity)`, no commit
//! 2. blank payload -> commit, skip
//! 3. transform failure -> commit, skip
//! 4. validation failure -> commit, skip
//! 5. process -> commit, whether or not processing succeeded
//!
//! Only the health gate produces an error; everything else is an
//! acknowledged [`RecordOutcome`].

use crate::{
    health::SharedHealth,
    metrics::{RECORDS_TOTAL, RECORD_DURATION},
    processor::EventProcessor,
    record::{RawRecord, RecordOutcome},
    transform::transform,
    validator::EventValidator,
    Error, Result,
};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

const BANNER: &str = "====================================================";

/// Record handler driven by the listener container
#[async_trait]
pub trait RecordHandler: Send + Sync {
    /// Handle one record. `Ok` commits it; a retryable `Err` asks for
    /// redelivery, a non-retryable one gives the record up.
    async fn handle(&self, record: &RawRecord) -> Result<RecordOutcome>;
}

/// Per-record handler
#[derive(Clone)]
pub struct RecordListener {
    health: SharedHealth,
    validator: Arc<dyn EventValidator>,
    processor: Arc<dyn EventProcessor>,
}

impl std::fmt::Debug for RecordListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordListener")
            .field("health", &self.health)
            .finish_non_exhaustive()
    }
}

impl RecordListener {
    /// Create new listener
    pub fn new(
        health: SharedHealth,
        validator: Arc<dyn EventValidator>,
        processor: Arc<dyn EventProcessor>,
    ) -> Self {
        Self {
            health,
            validator,
            processor,
        }
    }

    /// Handle one record.
    ///
    /// `Ok` means the record must be committed. `Err` leaves it
    /// uncommitted for redelivery by the container.
    pub async fn handle(&self, record: &RawRecord) -> Result<RecordOutcome> {
        let started = Instant::now();

        if !self.health.is_available() {
            let snapshot = self.health.snapshot();
            warn!(
                topic = %record.topic,
                partition = record.partition,
                offset = record.offset,
                last_error = %snapshot.last_error,
                "Broker unavailable, record left for redelivery"
            );
            RECORDS_TOTAL.with_label_values(&["connectivity"]).inc();
            return Err(Error::Connectivity(format!(
                "broker unavailable, record {} not processed",
                record
            )));
        }

        info!("{}", BANNER);
        info!(
            topic = %record.topic,
            partition = record.partition,
            offset = record.offset,
            timestamp = record.timestamp,
            datetime = %record
                .local_time()
                .map(|t| t.format("%Y-%m-%dT%H:%M:%S%.3f").to_string())
                .unwrap_or_default(),
            payload = %record.payload_lossy(),
            "Event received"
        );

        let outcome = self.run_pipeline(record).await;

        RECORDS_TOTAL.with_label_values(&[outcome.label()]).inc();
        RECORD_DURATION.observe(started.elapsed().as_secs_f64());

        Ok(outcome)
    }

    async fn run_pipeline(&self, record: &RawRecord) -> RecordOutcome {
        if record.is_blank() {
            warn!(offset = record.offset, "Empty payload received, skipping");
            return RecordOutcome::SkippedEmpty;
        }

        let event = match transform(record.payload_bytes()) {
            Ok(event) => event,
            Err(e) => {
                warn!(offset = record.offset, "Malformed payload skipped: {}", e);
                return RecordOutcome::SkippedMalformed {
                    reason: e.to_string(),
                };
            }
        };

        if let Err(violations) = self.validator.validate(&event) {
            warn!(
                offset = record.offset,
                violations = violations.len(),
                "Invalid event skipped"
            );
            return RecordOutcome::SkippedInvalid { violations };
        }

        match self.processor.process(&event).await {
            Ok(()) => {
                info!(
                    offset = record.offset,
                    reference = event.reference().unwrap_or_default(),
                    "Event processed"
                );
                info!("{}", BANNER);
                RecordOutcome::Processed
            }
            Err(e) => {
                // Committed anyway: failed processing is not redelivered
                error!(
                    offset = record.offset,
                    reference = event.reference().unwrap_or_default(),
                    "Event processing failed: {}",
                    e
                );
                RecordOutcome::ProcessingFailed {
                    error: e.to_string(),
                }
            }
        }
    }
}

#[async_trait]
impl RecordHandler for RecordListener {
    async fn handle(&self, record: &RawRecord) -> Result<RecordOutcome> {
        RecordListener::handle(self, record).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Event;
    use crate::processor::ProcessError;
    use crate::record::ErrorClassification;
    use crate::validator::RuleValidator;
    use async_trait::async_trait;
    use chrono::Utc;
    use parking_lot::Mutex;

    struct RecordingProcessor {
        seen: Mutex<Vec<Event>>,
        fail: bool,
    }

    #[async_trait]
    impl EventProcessor for RecordingProcessor {
        async fn process(&self, event: &Event) -> std::result::Result<(), ProcessError> {
            self.seen.lock().push(event.clone());
            if self.fail {
                Err(ProcessError::new("downstream rejected event"))
            } else {
                Ok(())
            }
        }
    }

    fn setup(available: bool, fail: bool) -> (RecordListener, Arc<RecordingProcessor>) {
        let health = SharedHealth::new();
        if available {
            health.mark_available(Utc::now());
        }
        let processor = Arc::new(RecordingProcessor {
            seen: Mutex::new(Vec::new()),
            fail,
        });
        let listener =
            RecordListener::new(health, Arc::new(RuleValidator::new()), processor.clone());
        (listener, processor)
    }

    fn record(payload: &'static str) -> RawRecord {
        RawRecord::new("events", 0, 7, 1_700_000_000_000, payload)
    }

    #[tokio::test]
    async fn test_valid_event_processed_once() {
        let (listener, processor) = setup(true, false);

        let outcome = listener
            .handle(&record(r#"{"reference":"REF1","status":"OPEN"}"#))
            .await
            .unwrap();

        assert_eq!(outcome, RecordOutcome::Processed);
        let seen = processor.seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0], Event::new("REF1").with_status("OPEN"));
    }

    #[tokio::test]
    async fn test_unavailable_broker_blocks_record() {
        let (listener, processor) = setup(false, false);

        let result = listener
            .handle(&record(r#"{"reference":"REF1","status":"OPEN"}"#))
            .await;

        let err = result.unwrap_err();
        assert!(matches!(err, Error::Connectivity(_)));
        assert!(err.is_retryable());
        assert!(processor.seen.lock().is_empty());
    }

    #[tokio::test]
    async fn test_blank_payloads_skipped() {
        let (listener, processor) = setup(true, false);

        for payload in ["", "   ", "\n\t"] {
            let outcome = listener.handle(&record(payload)).await.unwrap();
            assert_eq!(outcome, RecordOutcome::SkippedEmpty);
        }
        let tombstone = RawRecord::tombstone("events", 0, 8, 0);
        assert_eq!(
            listener.handle(&tombstone).await.unwrap(),
            RecordOutcome::SkippedEmpty
        );
        assert!(processor.seen.lock().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_payload_skipped() {
        let (listener, processor) = setup(true, false);

        for payload in ["{not json", "null", "42", r#"{"reference":"R","extra":1}"#] {
            let outcome = listener.handle(&record(payload)).await.unwrap();
            assert_eq!(
                outcome.classification(),
                Some(ErrorClassification::MalformedPayload)
            );
        }
        assert!(processor.seen.lock().is_empty());
    }

    #[tokio::test]
    async fn test_missing_reference_fails_validation() {
        let (listener, processor) = setup(true, false);

        let outcome = listener
            .handle(&record(r#"{"status":"OPEN"}"#))
            .await
            .unwrap();

        match outcome {
            RecordOutcome::SkippedInvalid { violations } => {
                assert_eq!(violations.len(), 1);
                assert_eq!(violations[0].field, "reference");
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(processor.seen.lock().is_empty());
    }

    #[tokio::test]
    async fn test_processing_failure_still_acknowledged() {
        let (listener, processor) = setup(true, true);

        let outcome = listener
            .handle(&record(r#"{"reference":"REF2"}"#))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            RecordOutcome::ProcessingFailed {
                error: "downstream rejected event".to_string()
            }
        );
        assert_eq!(processor.seen.lock().len(), 1);
    }
}
