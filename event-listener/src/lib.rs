//! Event Listener
//!
//! Consumes events from a partitioned broker topic with a health-gated
//! processing pipeline:
//! - Health monitor probing the broker on a fixed schedule, with
//!   exponential reconnect scheduling
//! - Per-record state machine: health gate, transform, validate, process,
//!   acknowledge
//! - Fixed-delay redelivery for records blocked at the health gate
//! - NATS JetStream and in-memory broker adapters
//! - Observability via Prometheus metrics
//!
//! # Acknowledgment
//!
//! Every record is committed exactly once it reaches a terminal state,
//! except when the broker is unavailable: those records stay uncommitted
//! and are redelivered.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod broker;
pub mod config;
pub mod container;
pub mod error;
pub mod event;
pub mod health;
pub mod listener;
pub mod memory;
pub mod metrics;
pub mod nats;
pub mod processor;
pub mod record;
pub mod retry;
pub mod transform;
pub mod validator;

pub use broker::{BrokerClient, ClusterInfo, ClusterProbe};
pub use config::Config;
pub use container::{ContainerConfig, ListenerContainer};
pub use error::{Error, Result};
pub use event::Event;
pub use health::{HealthMonitor, HealthReport, HealthState, SharedHealth};
pub use listener::{RecordHandler, RecordListener};
pub use memory::InMemoryBroker;
pub use nats::NatsBroker;
pub use processor::{EventProcessor, LoggingProcessor, ProcessError};
pub use record::{ErrorClassification, RawRecord, RecordOutcome};
pub use retry::{Backoff, MaxAttempts, RetryExecutor, RetryPolicy};
pub use transform::{transform, TransformError};
pub use validator::{EventValidator, RuleValidator, Violation};
