//! NATS JetStream broker adapter
//!
//! Maps the listener's broker model onto JetStream:
//! - topic: stream (created on demand, subject = topic)
//! - consumer group: durable pull consumer with explicit acks
//! - offset: stream sequence, on a single partition `0`
//! - commit: ack of the delivered message
//! - in-flight messages: kept alive with progress acks until committed,
//!   so `ack_wait` never expires while a record waits or is redelivered
//! - describe cluster: server round-trip (flush) under the probe timeout

use crate::{
    broker::{BrokerClient, ClusterInfo, ClusterProbe},
    config::{AutoOffsetReset, Config},
    record::RawRecord,
    Error, Result,
};
use async_nats::connection::State;
use async_nats::jetstream::{
    self,
    consumer::{AckPolicy, DeliverPolicy, PullConsumer},
    stream::Config as StreamConfig,
};
use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

type Pending = Arc<Mutex<HashMap<i64, jetstream::Message>>>;

/// JetStream-backed broker
pub struct NatsBroker {
    client: async_nats::Client,
    consumer: PullConsumer,
    topic: String,
    pending: Pending,
    keep_alive: JoinHandle<()>,
}

impl std::fmt::Debug for NatsBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NatsBroker")
            .field("topic", &self.topic)
            .field("pending", &self.pending.lock().len())
            .finish_non_exhaustive()
    }
}

impl NatsBroker {
    /// Connect and bind the durable consumer for the configured topic and group
    pub async fn connect(config: &Config) -> Result<Self> {
        info!("🔌 Connecting to NATS JetStream at {}", config.broker.address);

        let client = async_nats::ConnectOptions::new()
            .connection_timeout(Duration::from_millis(config.connection.timeout_ms))
            .request_timeout(Some(Duration::from_millis(config.request.timeout_ms)))
            .connect(config.broker.address.as_str())
            .await
            .map_err(|e| Error::Broker(e.to_string()))?;

        let context = jetstream::new(client.clone());
        let topic = config.consumer.topic.clone();

        let stream = context
            .get_or_create_stream(StreamConfig {
                name: topic.clone(),
                subjects: vec![topic.clone()],
                ..Default::default()
            })
            .await
            .map_err(|e| Error::Broker(e.to_string()))?;

        let deliver_policy = match config.consumer.auto_offset_reset {
            AutoOffsetReset::Earliest => DeliverPolicy::All,
            AutoOffsetReset::Latest => DeliverPolicy::New,
        };

        let ack_wait = Duration::from_millis(config.consumer.session_timeout_ms);
        let consumer: PullConsumer = stream
            .get_or_create_consumer(
                &config.consumer.group_id,
                jetstream::consumer::pull::Config {
                    durable_name: Some(config.consumer.group_id.clone()),
                    description: Some(format!("event listener for {}", topic)),
                    ack_policy: AckPolicy::Explicit,
                    ack_wait,
                    deliver_policy,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| Error::Broker(e.to_string()))?;

        info!(
            "✅ Consumer {} bound to stream {}",
            config.consumer.group_id, topic
        );

        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let keep_alive = tokio::spawn(keep_alive(pending.clone(), keep_alive_interval(ack_wait)));

        Ok(Self {
            client,
            consumer,
            topic,
            pending,
            keep_alive,
        })
    }

    /// Convert a delivered message, or `None` when JetStream redelivered a
    /// sequence that is still in flight here.
    fn to_record(&self, message: jetstream::Message) -> Result<Option<RawRecord>> {
        let (offset, timestamp) = {
            let info = message.info().map_err(|e| Error::Broker(e.to_string()))?;
            let millis = info.published.unix_timestamp_nanos() / 1_000_000;
            (info.stream_sequence as i64, millis as i64)
        };

        let payload = message.message.payload.clone();
        // Newest delivery replaces the stored one; its ack is the one that counts
        if self.pending.lock().insert(offset, message).is_some() {
            debug!("Duplicate delivery of sequence {} suppressed", offset);
            return Ok(None);
        }

        Ok(Some(RawRecord::new(
            self.topic.clone(),
            0,
            offset,
            timestamp,
            payload,
        )))
    }
}

impl Drop for NatsBroker {
    fn drop(&mut self) {
        self.keep_alive.abort();
    }
}

/// Progress acks go out three times per ack window
fn keep_alive_interval(ack_wait: Duration) -> Duration {
    (ack_wait / 3).max(Duration::from_millis(100))
}

async fn keep_alive(pending: Pending, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let in_flight: Vec<(i64, jetstream::Message)> = pending
            .lock()
            .iter()
            .map(|(offset, message)| (*offset, message.clone()))
            .collect();

        for (offset, message) in in_flight {
            if let Err(e) = message.ack_with(jetstream::AckKind::Progress).await {
                warn!("⚠️ Progress ack failed for sequence {}: {}", offset, e);
            }
        }
    }
}

#[async_trait]
impl BrokerClient for NatsBroker {
    async fn poll(&self, max_records: usize, timeout: Duration) -> Result<Vec<RawRecord>> {
        let mut batch = self
            .consumer
            .batch()
            .max_messages(max_records)
            .expires(timeout)
            .messages()
            .await
            .map_err(|e| Error::Broker(e.to_string()))?;

        let mut records = Vec::new();
        while let Some(message) = batch.next().await {
            let message = message.map_err(|e| Error::Broker(e.to_string()))?;
            if let Some(record) = self.to_record(message)? {
                records.push(record);
            }
        }

        Ok(records)
    }

    async fn commit(&self, record: &RawRecord) -> Result<()> {
        let message = self.pending.lock().remove(&record.offset).ok_or_else(|| {
            Error::InvalidArgument(format!("no delivered message for {}", record))
        })?;

        message
            .ack()
            .await
            .map_err(|e| Error::Broker(e.to_string()))?;
        debug!("Acked {}", record);
        Ok(())
    }
}

#[async_trait]
impl ClusterProbe for NatsBroker {
    async fn describe_cluster(&self, timeout: Duration) -> Result<ClusterInfo> {
        if !matches!(self.client.connection_state(), State::Connected) {
            return Err(Error::Broker(format!(
                "not connected ({:?})",
                self.client.connection_state()
            )));
        }

        tokio::time::timeout(timeout, self.client.flush())
            .await
            .map_err(|_| Error::Timeout(timeout.as_millis() as u64))?
            .map_err(|e| Error::Broker(e.to_string()))?;

        let server = self.client.server_info();
        Ok(ClusterInfo {
            cluster_id: server.server_id,
            node_count: 1 + server.connect_urls.len(),
        })
    }
}
