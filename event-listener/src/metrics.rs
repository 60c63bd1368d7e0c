//! Prometheus metrics for the event listener

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_histogram, register_int_counter, register_int_gauge,
    CounterVec, Histogram, IntCounter, IntGauge,
};

lazy_static! {
    /// Records handled, by terminal outcome
    pub static ref RECORDS_TOTAL: CounterVec = register_counter_vec!(
        "event_listener_records_total",
        "Total records handled by outcome",
        &["outcome"]
    )
    .unwrap();

    /// Per-record handling duration
    pub static ref RECORD_DURATION: Histogram = register_histogram!(
        "event_listener_record_duration_seconds",
        "Record handling duration in seconds"
    )
    .unwrap();

    /// Records handed back to the handler after a retryable error
    pub static ref REDELIVERIES_TOTAL: IntCounter = register_int_counter!(
        "event_listener_redeliveries_total",
        "Total record redeliveries"
    )
    .unwrap();

    /// Connectivity checks, by result
    pub static ref HEALTH_CHECKS_TOTAL: CounterVec = register_counter_vec!(
        "event_listener_health_checks_total",
        "Total broker health checks by result",
        &["result"]
    )
    .unwrap();

    /// Broker availability as seen by the health monitor (1 = up)
    pub static ref BROKER_AVAILABLE: IntGauge = register_int_gauge!(
        "event_listener_broker_available",
        "Broker availability (1 = available, 0 = unavailable)"
    )
    .unwrap();

    /// Reconnect probes issued by the reconnect scheduler
    pub static ref RECONNECT_ATTEMPTS_TOTAL: IntCounter = register_int_counter!(
        "event_listener_reconnect_attempts_total",
        "Total reconnect attempts"
    )
    .unwrap();
}
