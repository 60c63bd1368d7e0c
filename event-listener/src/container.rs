//! Listener container
//!
//! Polls the broker, fans records out to per-partition workers and runs
//! each record through a [`RecordHandler`], normally the
//! [`RecordListener`]. Records rejected with a retryable error are
//! redelivered under a fixed-delay [`RetryPolicy`]; once the policy is exhausted, or the error is not
//! retryable, the record is logged and committed so the partition can
//! move on.

use crate::{
    broker::BrokerClient,
    listener::{RecordHandler, RecordListener},
    metrics::{RECORDS_TOTAL, REDELIVERIES_TOTAL},
    record::RawRecord,
    retry::{sleep_or_cancel, RetryExecutor, RetryPolicy},
    Error, Result,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Container settings
#[derive(Debug, Clone)]
pub struct ContainerConfig {
    /// Records fetched per poll
    pub max_poll_records: usize,

    /// Longest wait for a poll to return records
    pub poll_timeout: Duration,

    /// Number of workers; partitions are spread over them
    pub concurrency: usize,

    /// Redelivery policy for records the listener rejects
    pub error_policy: RetryPolicy,
}

/// Poll loop and worker pool around a [`RecordHandler`]
pub struct ListenerContainer {
    broker: Arc<dyn BrokerClient>,
    handler: Arc<dyn RecordHandler>,
    config: ContainerConfig,
}

impl std::fmt::Debug for ListenerContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerContainer")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ListenerContainer {
    /// Create new container around a [`RecordListener`]
    pub fn new(
        broker: Arc<dyn BrokerClient>,
        listener: RecordListener,
        config: ContainerConfig,
    ) -> Arc<Self> {
        Self::with_handler(broker, Arc::new(listener), config)
    }

    /// Create new container around any record handler
    pub fn with_handler(
        broker: Arc<dyn BrokerClient>,
        handler: Arc<dyn RecordHandler>,
        config: ContainerConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            broker,
            handler,
            config,
        })
    }

    /// Container settings
    pub fn config(&self) -> &ContainerConfig {
        &self.config
    }

    /// Poll and dispatch until `cancel` fires.
    ///
    /// Poll failures are logged and retried after the fixed delay.
    /// Shutdown waits for every worker to stop.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) -> Result<()> {
        let concurrency = self.config.concurrency.max(1);
        let mut senders = Vec::with_capacity(concurrency);
        let mut workers = Vec::with_capacity(concurrency);

        for worker_id in 0..concurrency {
            let (tx, rx) = mpsc::channel(self.config.max_poll_records.max(1));
            senders.push(tx);

            let container = Arc::clone(&self);
            let cancel = cancel.clone();
            workers.push(tokio::spawn(async move {
                container.worker(worker_id, rx, cancel).await;
            }));
        }

        info!(
            "🚀 Listener container started (concurrency: {}, max poll records: {})",
            concurrency, self.config.max_poll_records
        );

        'poll: loop {
            let polled = tokio::select! {
                _ = cancel.cancelled() => break,
                polled = self.broker.poll(self.config.max_poll_records, self.config.poll_timeout) => polled,
            };

            let records = match polled {
                Ok(records) => records,
                Err(e) => {
                    warn!("⚠️ Poll failed: {}", e);
                    if !sleep_or_cancel(&cancel, self.config.error_policy.initial_delay).await {
                        break;
                    }
                    continue;
                }
            };

            if !records.is_empty() {
                debug!("Polled {} records", records.len());
            }

            for record in records {
                let worker = record.partition.rem_euclid(concurrency as i32) as usize;

                tokio::select! {
                    _ = cancel.cancelled() => break 'poll,
                    sent = senders[worker].send(record) => {
                        if sent.is_err() {
                            error!("Worker {} stopped, shutting down container", worker);
                            break 'poll;
                        }
                    }
                }
            }
        }

        drop(senders);
        for handle in workers {
            if let Err(e) = handle.await {
                error!("Worker task failed: {}", e);
            }
        }

        info!("🛑 Listener container stopped");
        Ok(())
    }

    async fn worker(
        &self,
        worker_id: usize,
        mut records: mpsc::Receiver<RawRecord>,
        cancel: CancellationToken,
    ) {
        debug!("Worker {} started", worker_id);

        loop {
            let record = tokio::select! {
                _ = cancel.cancelled() => break,
                record = records.recv() => match record {
                    Some(record) => record,
                    None => break,
                },
            };

            if let Err(Error::Shutdown) = self.deliver(&record, &cancel).await {
                info!("Shutdown during redelivery, {} left uncommitted", record);
                break;
            }
        }

        debug!("Worker {} stopped", worker_id);
    }

    /// Run one record through the handler, redelivering on retryable
    /// errors, then commit it.
    ///
    /// Returns `Err(Error::Shutdown)` only when cancelled mid-redelivery;
    /// the record is then left uncommitted.
    async fn deliver(&self, record: &RawRecord, cancel: &CancellationToken) -> Result<()> {
        let executor = RetryExecutor::new(self.config.error_policy.clone(), cancel.clone());
        let attempts = AtomicU32::new(0);
        let operation = format!("record {}", record);

        let result = executor
            .execute(&operation, || {
                let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                if attempt > 1 {
                    REDELIVERIES_TOTAL.inc();
                    warn!(
                        attempt,
                        payload = %record.payload_lossy(),
                        "Redelivering record {}",
                        record
                    );
                }
                self.handler.handle(record)
            })
            .await;

        match result {
            Ok(outcome) => {
                debug!("{} finished: {}", record, outcome.label());
            }
            Err(Error::Shutdown) => return Err(Error::Shutdown),
            Err(e) if !e.is_retryable() => {
                error!(
                    payload = %record.payload_lossy(),
                    "Non-retryable error for {}, skipping: {}",
                    record,
                    e
                );
                RECORDS_TOTAL.with_label_values(&["non_retryable"]).inc();
            }
            Err(e) => {
                error!(
                    attempts = attempts.load(Ordering::SeqCst),
                    payload = %record.payload_lossy(),
                    "Redelivery exhausted for {}, skipping: {}",
                    record,
                    e
                );
                RECORDS_TOTAL.with_label_values(&["exhausted"]).inc();
            }
        }

        if let Err(e) = self.broker.commit(record).await {
            error!("Commit failed for {}: {}", record, e);
        }

        Ok(())
    }
}
