//! Broker capabilities consumed by the listener
//!
//! The listener never talks to a broker directly; it depends on these
//! two traits so that the NATS adapter, the in-memory broker and test
//! doubles are interchangeable.

use crate::{record::RawRecord, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Record source with manual offset commits
#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// Fetch up to `max_records` records, waiting at most `timeout`.
    ///
    /// Records of one partition are returned in offset order.
    async fn poll(&self, max_records: usize, timeout: Duration) -> Result<Vec<RawRecord>>;

    /// Commit the offset of a processed record
    async fn commit(&self, record: &RawRecord) -> Result<()>;
}

/// Administrative connectivity probe
#[async_trait]
pub trait ClusterProbe: Send + Sync {
    /// Describe the cluster, failing if it does not answer within `timeout`
    async fn describe_cluster(&self, timeout: Duration) -> Result<ClusterInfo>;
}

/// Cluster description returned by a successful probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterInfo {
    /// Cluster or server identifier
    pub cluster_id: String,

    /// Number of known nodes
    pub node_count: usize,
}
