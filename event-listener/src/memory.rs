//! In-memory broker
//!
//! Partitioned, offset-addressed log implementing both broker
//! capabilities. Cluster availability and probe latency can be changed at
//! runtime to exercise the health gate and reconnect logic.

use crate::{
    broker::{BrokerClient, ClusterInfo, ClusterProbe},
    record::RawRecord,
    Error, Result,
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::debug;

#[derive(Debug, Default)]
struct Partition {
    records: Vec<RawRecord>,
    position: usize,
}

#[derive(Debug, Default)]
struct Log {
    partitions: BTreeMap<i32, Partition>,
    committed: HashMap<i32, i64>,
    commit_log: Vec<(i32, i64)>,
}

/// In-memory broker
#[derive(Debug)]
pub struct InMemoryBroker {
    topic: String,
    log: Mutex<Log>,
    published: Notify,
    available: AtomicBool,
    probe_latency: Mutex<Duration>,
    probe_calls: AtomicU64,
}

impl InMemoryBroker {
    /// Create an empty, reachable broker for `topic`
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            log: Mutex::new(Log::default()),
            published: Notify::new(),
            available: AtomicBool::new(true),
            probe_latency: Mutex::new(Duration::ZERO),
            probe_calls: AtomicU64::new(0),
        }
    }

    /// Topic served by this broker
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Append a payload to `partition`, returning its offset
    pub fn publish(&self, partition: i32, payload: impl Into<Bytes>) -> i64 {
        self.append(partition, Some(payload.into()))
    }

    /// Append a record without payload to `partition`
    pub fn publish_tombstone(&self, partition: i32) -> i64 {
        self.append(partition, None)
    }

    fn append(&self, partition: i32, payload: Option<Bytes>) -> i64 {
        let offset = {
            let mut log = self.log.lock();
            let part = log.partitions.entry(partition).or_default();
            let offset = part.records.len() as i64;

            part.records.push(RawRecord {
                topic: self.topic.clone(),
                partition,
                offset,
                timestamp: Utc::now().timestamp_millis(),
                payload,
            });
            offset
        };

        self.published.notify_one();
        offset
    }

    /// Make the cluster reachable or unreachable for probes
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Delay every probe by `latency`
    pub fn set_probe_latency(&self, latency: Duration) {
        *self.probe_latency.lock() = latency;
    }

    /// Number of probes received
    pub fn probe_calls(&self) -> u64 {
        self.probe_calls.load(Ordering::SeqCst)
    }

    /// Next offset to consume for `partition`, if anything was committed
    pub fn committed_offset(&self, partition: i32) -> Option<i64> {
        self.log.lock().committed.get(&partition).copied()
    }

    /// Every commit in arrival order as `(partition, offset)`
    pub fn commits(&self) -> Vec<(i32, i64)> {
        self.log.lock().commit_log.clone()
    }

    /// Records published but not yet polled
    pub fn pending(&self) -> usize {
        self.log
            .lock()
            .partitions
            .values()
            .map(|p| p.records.len() - p.position)
            .sum()
    }

    fn take(&self, max_records: usize) -> Vec<RawRecord> {
        let mut log = self.log.lock();
        let mut batch = Vec::new();

        for partition in log.partitions.values_mut() {
            while batch.len() < max_records && partition.position < partition.records.len() {
                batch.push(partition.records[partition.position].clone());
                partition.position += 1;
            }
        }

        batch
    }
}

#[async_trait]
impl BrokerClient for InMemoryBroker {
    async fn poll(&self, max_records: usize, timeout: Duration) -> Result<Vec<RawRecord>> {
        let batch = self.take(max_records);
        if !batch.is_empty() {
            return Ok(batch);
        }

        // Empty result after the deadline is a normal poll, not an error
        let _ = tokio::time::timeout(timeout, self.published.notified()).await;
        Ok(self.take(max_records))
    }

    async fn commit(&self, record: &RawRecord) -> Result<()> {
        if record.topic != self.topic {
            return Err(Error::InvalidArgument(format!(
                "record from topic {} committed to {}",
                record.topic, self.topic
            )));
        }

        let mut log = self.log.lock();
        log.committed.insert(record.partition, record.offset + 1);
        log.commit_log.push((record.partition, record.offset));
        debug!("Committed {}", record);
        Ok(())
    }
}

#[async_trait]
impl ClusterProbe for InMemoryBroker {
    async fn describe_cluster(&self, timeout: Duration) -> Result<ClusterInfo> {
        self.probe_calls.fetch_add(1, Ordering::SeqCst);
        let latency = *self.probe_latency.lock();

        if latency > timeout {
            tokio::time::sleep(timeout).await;
            return Err(Error::Timeout(timeout.as_millis() as u64));
        }
        tokio::time::sleep(latency).await;

        if !self.available.load(Ordering::SeqCst) {
            return Err(Error::Broker("cluster unreachable".to_string()));
        }

        Ok(ClusterInfo {
            cluster_id: "in-memory".to_string(),
            node_count: 1,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_poll_preserves_partition_order() {
        let broker = InMemoryBroker::new("events");
        broker.publish(1, "a");
        broker.publish(0, "b");
        broker.publish(1, "c");

        let records = broker.poll(10, Duration::from_millis(10)).await.unwrap();
        let order: Vec<(i32, i64)> = records.iter().map(|r| (r.partition, r.offset)).collect();
        assert_eq!(order, vec![(0, 0), (1, 0), (1, 1)]);
        assert_eq!(broker.pending(), 0);
    }

    #[tokio::test]
    async fn test_poll_respects_max_records() {
        let broker = InMemoryBroker::new("events");
        for i in 0..5 {
            broker.publish(0, format!("{}", i));
        }

        assert_eq!(broker.poll(2, Duration::ZERO).await.unwrap().len(), 2);
        assert_eq!(broker.pending(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_poll_times_out() {
        let broker = InMemoryBroker::new("events");
        let records = broker.poll(10, Duration::from_secs(30)).await.unwrap();
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn test_commit_tracks_next_offset() {
        let broker = InMemoryBroker::new("events");
        broker.publish(2, "x");
        let records = broker.poll(1, Duration::ZERO).await.unwrap();

        broker.commit(&records[0]).await.unwrap();
        assert_eq!(broker.committed_offset(2), Some(1));
        assert_eq!(broker.commits(), vec![(2, 0)]);

        let foreign = RawRecord::new("other", 0, 0, 0, "x");
        assert!(broker.commit(&foreign).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_availability_and_timeout() {
        let broker = InMemoryBroker::new("events");
        assert!(broker.describe_cluster(Duration::from_secs(1)).await.is_ok());

        broker.set_available(false);
        assert!(matches!(
            broker.describe_cluster(Duration::from_secs(1)).await,
            Err(Error::Broker(_))
        ));

        broker.set_available(true);
        broker.set_probe_latency(Duration::from_secs(5));
        assert!(matches!(
            broker.describe_cluster(Duration::from_secs(1)).await,
            Err(Error::Timeout(1000))
        ));
        assert_eq!(broker.probe_calls(), 3);
    }
}
