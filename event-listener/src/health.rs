//! Broker health monitoring
//!
//! Provides:
//! - [`SharedHealth`]: single-writer, multi-reader snapshot of broker reachability
//! - [`HealthMonitor`]: periodic connectivity probe on a fixed-delay schedule
//! - a reconnect scheduler with exponential backoff, one task at a time
//! - [`HealthReport`]: read-only export for monitoring sinks
//!
//! The consumer path only ever reads the snapshot; it never waits on a
//! probe or on the reconnect timer.

use crate::{
    broker::{ClusterInfo, ClusterProbe},
    metrics::{BROKER_AVAILABLE, HEALTH_CHECKS_TOTAL, RECONNECT_ATTEMPTS_TOTAL},
    retry::{sleep_or_cancel, RetryExecutor, RetryPolicy},
    Error, Result,
};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Broker reachability as last observed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthState {
    /// Broker answered the last probe
    pub available: bool,

    /// Message of the last probe failure, empty after a success
    pub last_error: String,

    /// Time of the last completed check; never moves backwards
    pub last_checked_at: Option<DateTime<Utc>>,
}

impl HealthState {
    /// Connection state derived from the snapshot
    pub fn connection(&self) -> ConnectionState {
        match (self.available, self.last_checked_at) {
            (true, _) => ConnectionState::Available,
            (false, None) => ConnectionState::Unknown,
            (false, Some(_)) => ConnectionState::Unavailable,
        }
    }
}

impl Default for HealthState {
    fn default() -> Self {
        Self {
            available: false,
            last_error: String::new(),
            last_checked_at: None,
        }
    }
}

/// Monitor state machine: `Unknown -> Available <-> Unavailable`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No check completed yet; gated like `Unavailable`
    Unknown,
    /// Last check succeeded
    Available,
    /// Last check failed
    Unavailable,
}

/// Shared health cell.
///
/// All three fields are replaced together as one immutable snapshot, so a
/// reader never sees `available = true` next to a stale error.
#[derive(Debug, Clone, Default)]
pub struct SharedHealth {
    cell: Arc<RwLock<Arc<HealthState>>>,
}

impl SharedHealth {
    /// New cell in the `Unknown` state
    pub fn new() -> Self {
        Self::default()
    }

    /// Current snapshot
    pub fn snapshot(&self) -> Arc<HealthState> {
        self.cell.read().clone()
    }

    /// Whether the broker is considered reachable
    pub fn is_available(&self) -> bool {
        self.cell.read().available
    }

    /// Record a successful check; returns the previous availability
    pub(crate) fn mark_available(&self, checked_at: DateTime<Utc>) -> bool {
        self.replace(true, String::new(), checked_at)
    }

    /// Record a failed check; returns the previous availability
    pub(crate) fn mark_unavailable(&self, error: String, checked_at: DateTime<Utc>) -> bool {
        self.replace(false, error, checked_at)
    }

    fn replace(&self, available: bool, last_error: String, checked_at: DateTime<Utc>) -> bool {
        let mut cell = self.cell.write();
        let previous = cell.available;
        let last_checked_at = match cell.last_checked_at {
            Some(prev) if prev > checked_at => prev,
            _ => checked_at,
        };

        *cell = Arc::new(HealthState {
            available,
            last_error,
            last_checked_at: Some(last_checked_at),
        });
        BROKER_AVAILABLE.set(i64::from(available));

        previous
    }
}

/// Health monitor settings
#[derive(Debug, Clone)]
pub struct HealthMonitorConfig {
    /// Run probes at all
    pub enabled: bool,

    /// Deadline for a single probe
    pub probe_timeout: Duration,

    /// Pause between the end of one periodic check and the next
    pub check_interval: Duration,

    /// Backoff of the reconnect scheduler
    pub reconnect_policy: RetryPolicy,

    /// Bounded retry wrapped around every probe
    pub probe_retry_policy: RetryPolicy,
}

/// Overall status in a [`HealthReport`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HealthStatus {
    /// Broker reachable or checks disabled
    Up,
    /// Broker unreachable or not yet checked
    Down,
}

/// Connection label in a [`HealthReport`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionLabel {
    /// Broker reachable
    Connected,
    /// Broker unreachable
    Disconnected,
}

/// Details of a [`HealthReport`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthDetail {
    /// Connection label
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection: Option<ConnectionLabel>,

    /// Time of the last check
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_check: Option<DateTime<Utc>>,

    /// Last probe error when down
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Free-form status note
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// Read-only health export
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    /// UP or DOWN
    pub status: HealthStatus,

    /// Supporting details
    pub detail: HealthDetail,
}

/// Periodic broker probe and reconnect scheduler
pub struct HealthMonitor {
    probe: Arc<dyn ClusterProbe>,
    state: SharedHealth,
    config: HealthMonitorConfig,
    reconnecting: AtomicBool,
    cancel: CancellationToken,
}

impl std::fmt::Debug for HealthMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthMonitor")
            .field("state", &self.state.snapshot())
            .field("config", &self.config)
            .field("reconnecting", &self.reconnecting.load(Ordering::SeqCst))
            .finish()
    }
}

impl HealthMonitor {
    /// Create new monitor.
    ///
    /// With checks disabled the broker is assumed reachable from the start,
    /// since nothing would ever open the health gate otherwise.
    pub fn new(
        probe: Arc<dyn ClusterProbe>,
        config: HealthMonitorConfig,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        let state = SharedHealth::new();
        if !config.enabled {
            state.mark_available(Utc::now());
        }

        Arc::new(Self {
            probe,
            state,
            config,
            reconnecting: AtomicBool::new(false),
            cancel,
        })
    }

    /// Handle on the shared health cell
    pub fn state(&self) -> SharedHealth {
        self.state.clone()
    }

    /// Whether the broker is considered reachable
    pub fn is_available(&self) -> bool {
        self.state.is_available()
    }

    /// Last probe error, empty when healthy
    pub fn last_error(&self) -> String {
        self.state.snapshot().last_error.clone()
    }

    /// Time of the last completed check
    pub fn last_check_time(&self) -> Option<DateTime<Utc>> {
        self.state.snapshot().last_checked_at
    }

    /// Whether a reconnect task is currently running
    pub fn is_reconnecting(&self) -> bool {
        self.reconnecting.load(Ordering::SeqCst)
    }

    /// Probe the broker once (with the internal bounded retry) and update
    /// the shared state. A failure schedules a reconnect.
    ///
    /// Returns the availability after the check.
    pub async fn check_health(self: &Arc<Self>) -> bool {
        if !self.config.enabled {
            return self.state.is_available();
        }

        info!("Checking broker connectivity...");

        match self.probe_and_record().await {
            Ok(true) => true,
            Ok(false) => {
                self.schedule_reconnect();
                false
            }
            Err(_) => self.state.is_available(),
        }
    }

    /// Start the reconnect scheduler unless one is already running.
    ///
    /// Returns the task handle when a new scheduler was started.
    pub fn schedule_reconnect(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        if self
            .reconnecting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Reconnect already scheduled");
            return None;
        }

        info!("Scheduling broker reconnect...");
        let monitor = Arc::clone(self);
        Some(tokio::spawn(async move {
            monitor.reconnect_loop().await;
            monitor.reconnecting.store(false, Ordering::SeqCst);
        }))
    }

    /// Run periodic checks until cancelled
    pub async fn run(self: Arc<Self>) {
        if !self.config.enabled {
            info!("Broker health checks disabled");
            return;
        }

        info!(
            "🔄 Health monitor started (interval: {:?}, timeout: {:?})",
            self.config.check_interval, self.config.probe_timeout
        );

        loop {
            self.check_health().await;

            if !sleep_or_cancel(&self.cancel, self.config.check_interval).await {
                break;
            }
        }

        info!("🛑 Health monitor stopped");
    }

    /// Spawn [`HealthMonitor::run`] on the runtime
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(Arc::clone(self).run())
    }

    /// Health export for monitoring sinks
    pub fn health(&self) -> HealthReport {
        if !self.config.enabled {
            return HealthReport {
                status: HealthStatus::Up,
                detail: HealthDetail {
                    connection: None,
                    last_check: None,
                    error: None,
                    status: Some("Health check disabled".to_string()),
                },
            };
        }

        let snapshot = self.state.snapshot();
        if snapshot.available {
            HealthReport {
                status: HealthStatus::Up,
                detail: HealthDetail {
                    connection: Some(ConnectionLabel::Connected),
                    last_check: snapshot.last_checked_at,
                    error: None,
                    status: None,
                },
            }
        } else {
            HealthReport {
                status: HealthStatus::Down,
                detail: HealthDetail {
                    connection: Some(ConnectionLabel::Disconnected),
                    last_check: snapshot.last_checked_at,
                    error: Some(snapshot.last_error.clone()),
                    status: None,
                },
            }
        }
    }

    /// Probe and write the result into the shared state.
    ///
    /// `Ok(available)` once the state was updated, `Err` only on shutdown.
    async fn probe_and_record(&self) -> Result<bool> {
        let started_at = Utc::now();

        match self.probe_with_retry().await {
            Ok(info) => {
                let was_available = self.state.mark_available(started_at);
                HEALTH_CHECKS_TOTAL.with_label_values(&["up"]).inc();

                if !was_available {
                    info!(
                        cluster_id = %info.cluster_id,
                        nodes = info.node_count,
                        "✅ Broker connection established"
                    );
                }
                Ok(true)
            }
            Err(Error::Shutdown) => Err(Error::Shutdown),
            Err(e) => {
                warn!("⚠️ Broker connectivity check failed: {}", e);
                self.state.mark_unavailable(e.to_string(), started_at);
                HEALTH_CHECKS_TOTAL.with_label_values(&["down"]).inc();
                Ok(false)
            }
        }
    }

    async fn probe_with_retry(&self) -> Result<ClusterInfo> {
        let executor =
            RetryExecutor::new(self.config.probe_retry_policy.clone(), self.cancel.clone());
        let timeout = self.config.probe_timeout;

        executor
            .execute("broker health probe", || async move {
                tokio::time::timeout(timeout, self.probe.describe_cluster(timeout))
                    .await
                    .map_err(|_| Error::Timeout(timeout.as_millis() as u64))?
            })
            .await
    }

    async fn reconnect_loop(&self) {
        let policy = &self.config.reconnect_policy;
        let mut attempts: u32 = 0;

        loop {
            if !policy.has_attempts_left(attempts) {
                warn!("❌ Broker reconnect gave up after {} attempts", attempts);
                return;
            }

            let delay = policy.delay_for(attempts);
            info!("⏳ Reconnect attempt {} in {:?}", attempts + 1, delay);

            if !sleep_or_cancel(&self.cancel, delay).await {
                warn!("Broker reconnect interrupted");
                return;
            }

            attempts += 1;
            RECONNECT_ATTEMPTS_TOTAL.inc();

            match self.probe_and_record().await {
                Ok(true) => {
                    info!("✅ Broker reconnected after {} attempts", attempts);
                    return;
                }
                Ok(false) => {}
                Err(_) => {
                    warn!("Broker reconnect interrupted");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::MaxAttempts;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use tokio::time::Instant;

    /// Probe answering from a script, then repeating a fallback
    struct ScriptedProbe {
        script: Mutex<VecDeque<bool>>,
        fallback: AtomicBool,
        calls: Mutex<Vec<Instant>>,
    }

    impl ScriptedProbe {
        fn new(script: &[bool], fallback: bool) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.iter().copied().collect()),
                fallback: AtomicBool::new(fallback),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn call_count(&self) -> usize {
            self.calls.lock().len()
        }

        fn gaps_millis(&self) -> Vec<u128> {
            let calls = self.calls.lock();
            calls
                .windows(2)
                .map(|pair| (pair[1] - pair[0]).as_millis())
                .collect()
        }
    }

    #[async_trait]
    impl ClusterProbe for ScriptedProbe {
        async fn describe_cluster(&self, _timeout: Duration) -> Result<ClusterInfo> {
            self.calls.lock().push(Instant::now());
            let ok = self
                .script
                .lock()
                .pop_front()
                .unwrap_or_else(|| self.fallback.load(Ordering::SeqCst));

            if ok {
                Ok(ClusterInfo {
                    cluster_id: "test".to_string(),
                    node_count: 1,
                })
            } else {
                Err(Error::Broker("connection refused".to_string()))
            }
        }
    }

    fn config(reconnect_attempts: MaxAttempts, probe_attempts: u32) -> HealthMonitorConfig {
        HealthMonitorConfig {
            enabled: true,
            probe_timeout: Duration::from_secs(1),
            check_interval: Duration::from_secs(60),
            reconnect_policy: RetryPolicy::exponential(
                reconnect_attempts,
                Duration::from_millis(1000),
                Duration::from_millis(5000),
                2.0,
            ),
            probe_retry_policy: RetryPolicy::exponential(
                MaxAttempts::Limited(probe_attempts),
                Duration::from_secs(5),
                Duration::from_secs(20),
                2.0,
            ),
        }
    }

    #[test]
    fn test_initial_state_is_unknown() {
        let state = SharedHealth::new();
        let snapshot = state.snapshot();

        assert!(!snapshot.available);
        assert!(snapshot.last_error.is_empty());
        assert_eq!(snapshot.connection(), ConnectionState::Unknown);
    }

    #[test]
    fn test_last_checked_at_never_moves_backwards() {
        let state = SharedHealth::new();
        let later = Utc::now();
        let earlier = later - chrono::Duration::seconds(10);

        state.mark_available(later);
        state.mark_unavailable("down".to_string(), earlier);

        let snapshot = state.snapshot();
        assert_eq!(snapshot.last_checked_at, Some(later));
        assert_eq!(snapshot.connection(), ConnectionState::Unavailable);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_then_recovery() {
        let probe = ScriptedProbe::new(&[false, false, false, true], false);
        let cancel = CancellationToken::new();
        let monitor = HealthMonitor::new(
            probe.clone(),
            config(MaxAttempts::Limited(1), 1),
            cancel.clone(),
        );

        for _ in 0..3 {
            assert!(!monitor.check_health().await);
        }
        assert!(!monitor.is_available());
        assert_eq!(monitor.last_error(), "Broker error: connection refused");

        cancel.cancel();
        assert!(monitor.check_health().await);
        assert!(monitor.is_available());
        assert!(monitor.last_error().is_empty());
        assert!(monitor.last_check_time().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_retry_hides_single_glitch() {
        let probe = ScriptedProbe::new(&[false, true], true);
        let monitor = HealthMonitor::new(
            probe.clone(),
            config(MaxAttempts::Limited(1), 3),
            CancellationToken::new(),
        );

        assert!(monitor.check_health().await);
        assert_eq!(probe.call_count(), 2);
        assert_eq!(probe.gaps_millis(), vec![5000]);
        assert!(!monitor.is_reconnecting());
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_timeout_counts_as_failure() {
        struct HangingProbe;

        #[async_trait]
        impl ClusterProbe for HangingProbe {
            async fn describe_cluster(&self, _timeout: Duration) -> Result<ClusterInfo> {
                std::future::pending().await
            }
        }

        let cancel = CancellationToken::new();
        let monitor = HealthMonitor::new(
            Arc::new(HangingProbe),
            config(MaxAttempts::Limited(1), 1),
            cancel.clone(),
        );

        assert!(!monitor.check_health().await);
        assert_eq!(monitor.last_error(), "Timeout after 1000ms");
        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_delays_grow_exponentially() {
        let probe = ScriptedProbe::new(&[], false);
        let monitor = HealthMonitor::new(
            probe.clone(),
            config(MaxAttempts::Limited(5), 1),
            CancellationToken::new(),
        );

        monitor.state.mark_unavailable("down".to_string(), Utc::now());
        let handle = monitor.schedule_reconnect().unwrap();
        handle.await.unwrap();

        assert_eq!(probe.call_count(), 5);
        // First probe happens 1000ms after scheduling; gaps cover the rest
        assert_eq!(probe.gaps_millis(), vec![2000, 4000, 5000, 5000]);
        assert!(!monitor.is_reconnecting());
        assert!(!monitor.is_available());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_stops_on_success() {
        let probe = ScriptedProbe::new(&[false, false, true], false);
        let monitor = HealthMonitor::new(
            probe.clone(),
            config(MaxAttempts::Unlimited, 1),
            CancellationToken::new(),
        );

        let handle = monitor.schedule_reconnect().unwrap();
        handle.await.unwrap();

        assert_eq!(probe.call_count(), 3);
        assert!(monitor.is_available());
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_reconnect_task() {
        let probe = ScriptedProbe::new(&[], false);
        let cancel = CancellationToken::new();
        let monitor = HealthMonitor::new(
            probe.clone(),
            config(MaxAttempts::Unlimited, 1),
            cancel.clone(),
        );

        let first = monitor.schedule_reconnect();
        assert!(first.is_some());
        assert!(monitor.schedule_reconnect().is_none());
        assert!(monitor.is_reconnecting());

        cancel.cancel();
        first.unwrap().await.unwrap();
        assert!(!monitor.is_reconnecting());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_cancelled_during_sleep() {
        let probe = ScriptedProbe::new(&[], true);
        let cancel = CancellationToken::new();
        let monitor = HealthMonitor::new(
            probe.clone(),
            config(MaxAttempts::Unlimited, 1),
            cancel.clone(),
        );

        let handle = monitor.schedule_reconnect().unwrap();
        cancel.cancel();
        handle.await.unwrap();

        assert_eq!(probe.call_count(), 0);
        assert_eq!(monitor.state.snapshot().connection(), ConnectionState::Unknown);
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_run_until_cancelled() {
        let probe = ScriptedProbe::new(&[], true);
        let cancel = CancellationToken::new();
        let monitor = HealthMonitor::new(
            probe.clone(),
            config(MaxAttempts::Limited(1), 1),
            cancel.clone(),
        );

        let handle = monitor.spawn();
        tokio::time::sleep(Duration::from_secs(150)).await;
        cancel.cancel();
        handle.await.unwrap();

        // checks at t = 0, 60, 120
        assert_eq!(probe.call_count(), 3);
        assert!(monitor.is_available());
    }

    #[tokio::test]
    async fn test_health_report() {
        let probe = ScriptedProbe::new(&[true, false], false);
        let cancel = CancellationToken::new();
        let monitor = HealthMonitor::new(probe, config(MaxAttempts::Limited(1), 1), cancel.clone());

        let unknown = monitor.health();
        assert_eq!(unknown.status, HealthStatus::Down);
        assert_eq!(unknown.detail.connection, Some(ConnectionLabel::Disconnected));

        monitor.check_health().await;
        let up = monitor.health();
        assert_eq!(up.status, HealthStatus::Up);
        assert_eq!(up.detail.error, None);
        let json = serde_json::to_value(&up).unwrap();
        assert_eq!(json["status"], "UP");
        assert_eq!(json["detail"]["connection"], "Connected");
        assert!(json["detail"]["lastCheck"].is_string());

        cancel.cancel();
        monitor.check_health().await;
        let down = monitor.health();
        assert_eq!(down.status, HealthStatus::Down);
        assert_eq!(
            down.detail.error.as_deref(),
            Some("Broker error: connection refused")
        );
    }

    #[tokio::test]
    async fn test_disabled_checks_report_up() {
        let probe = ScriptedProbe::new(&[], false);
        let mut cfg = config(MaxAttempts::Limited(1), 1);
        cfg.enabled = false;
        let monitor = HealthMonitor::new(probe.clone(), cfg, CancellationToken::new());

        assert!(monitor.check_health().await);
        assert_eq!(probe.call_count(), 0);

        let report = monitor.health();
        assert_eq!(report.status, HealthStatus::Up);
        assert_eq!(report.detail.status.as_deref(), Some("Health check disabled"));
    }
}
