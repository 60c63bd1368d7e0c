//! Retry and backoff policies
//!
//! Two policy shapes share one parameter set:
//! - fixed delay: constant pause between attempts, used by the delivery
//!   container's per-record error handler and by [`RetryExecutor`]
//! - exponential delay: `min(max_delay, initial_delay * multiplier^n)`,
//!   used by the health monitor's reconnect scheduling and probe retry

use crate::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Attempts used when a configured cap is zero or negative
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Cap on the total number of attempts (first try included)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaxAttempts {
    /// At most this many attempts
    Limited(u32),
    /// Keep trying until success or shutdown
    Unlimited,
}

impl MaxAttempts {
    /// Interpret a configured value, falling back to [`DEFAULT_MAX_ATTEMPTS`] when `<= 0`
    pub fn or_default(configured: i64) -> Self {
        if configured <= 0 {
            MaxAttempts::Limited(DEFAULT_MAX_ATTEMPTS)
        } else {
            MaxAttempts::Limited(u32::try_from(configured).unwrap_or(u32::MAX))
        }
    }

    /// Interpret a configured value, treating `<= 0` as unlimited
    pub fn or_unlimited(configured: i64) -> Self {
        if configured <= 0 {
            MaxAttempts::Unlimited
        } else {
            MaxAttempts::Limited(u32::try_from(configured).unwrap_or(u32::MAX))
        }
    }

    /// Interpret a configured retry count (first try excluded), falling
    /// back to [`DEFAULT_MAX_ATTEMPTS`] retries when `<= 0`
    pub fn from_retries(configured: i64) -> Self {
        let retries = if configured <= 0 {
            DEFAULT_MAX_ATTEMPTS
        } else {
            u32::try_from(configured).unwrap_or(u32::MAX)
        };
        MaxAttempts::Limited(retries.saturating_add(1))
    }

    /// Whether another attempt is allowed after `attempts_made` attempts
    pub fn allows_another(&self, attempts_made: u32) -> bool {
        match self {
            MaxAttempts::Limited(max) => attempts_made < *max,
            MaxAttempts::Unlimited => true,
        }
    }
}

/// Delay growth strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Constant delay
    Fixed,
    /// Delay multiplied on every retry, capped at `max_delay`
    Exponential,
}

/// Retry policy
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts allowed
    pub max_attempts: MaxAttempts,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Upper bound on any single delay
    pub max_delay: Duration,
    /// Growth factor (exponential only)
    pub multiplier: f64,
    /// Growth strategy
    pub backoff: Backoff,
}

impl RetryPolicy {
    /// Fixed-delay policy
    pub fn fixed(max_attempts: MaxAttempts, delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay: delay,
            max_delay: delay,
            multiplier: 1.0,
            backoff: Backoff::Fixed,
        }
    }

    /// Exponential-delay policy
    pub fn exponential(
        max_attempts: MaxAttempts,
        initial_delay: Duration,
        max_delay: Duration,
        multiplier: f64,
    ) -> Self {
        Self {
            max_attempts,
            initial_delay,
            max_delay: max_delay.max(initial_delay),
            multiplier: multiplier.max(1.0),
            backoff: Backoff::Exponential,
        }
    }

    /// Delay to wait before retry number `retry` (0-based)
    pub fn delay_for(&self, retry: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.initial_delay,
            Backoff::Exponential => {
                let exponent = retry.min(i32::MAX as u32) as i32;
                let millis = self.initial_delay.as_millis() as f64 * self.multiplier.powi(exponent);
                let cap = self.max_delay.as_millis() as f64;

                if !millis.is_finite() || millis >= cap {
                    self.max_delay
                } else {
                    Duration::from_millis(millis as u64)
                }
            }
        }
    }

    /// Whether another attempt may follow `attempts_made` attempts
    pub fn has_attempts_left(&self, attempts_made: u32) -> bool {
        self.max_attempts.allows_another(attempts_made)
    }

    /// Successive delays between attempts
    ///
    /// Yields `max_attempts - 1` delays for a limited policy and never
    /// ends for an unlimited one.
    pub fn delays(&self) -> Delays<'_> {
        Delays {
            policy: self,
            retry: 0,
        }
    }
}

/// Iterator over the delays of a [`RetryPolicy`]
#[derive(Debug)]
pub struct Delays<'a> {
    policy: &'a RetryPolicy,
    retry: u32,
}

impl Iterator for Delays<'_> {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        // retry n happens after attempt n + 1
        if !self.policy.has_attempts_left(self.retry.saturating_add(1)) {
            return None;
        }
        let delay = self.policy.delay_for(self.retry);
        self.retry = self.retry.saturating_add(1);
        Some(delay)
    }
}

/// Sleep for `delay` unless `cancel` fires first.
///
/// Returns `false` when the sleep was interrupted.
pub async fn sleep_or_cancel(cancel: &CancellationToken, delay: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

/// Runs fallible async operations under a [`RetryPolicy`]
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
    cancel: CancellationToken,
}

impl RetryExecutor {
    /// Create new executor
    pub fn new(policy: RetryPolicy, cancel: CancellationToken) -> Self {
        Self { policy, cancel }
    }

    /// Policy in use
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Execute `operation` until it succeeds, fails with a non-retryable
    /// error, runs out of attempts or the executor is cancelled.
    pub async fn execute<F, Fut, T>(&self, operation_name: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempts: u32 = 0;

        loop {
            attempts = attempts.saturating_add(1);

            match operation().await {
                Ok(value) => {
                    if attempts > 1 {
                        info!("{} succeeded after {} attempts", operation_name, attempts);
                    }
                    return Ok(value);
                }
                Err(e) if !e.is_retryable() => {
                    warn!("Non-retryable error for {}: {}", operation_name, e);
                    return Err(e);
                }
                Err(e) => {
                    if !self.policy.has_attempts_left(attempts) {
                        error!(
                            "{} failed after {} attempts: {}",
                            operation_name, attempts, e
                        );
                        return Err(e);
                    }

                    let delay = self.policy.delay_for(attempts - 1);
                    warn!(
                        "{} failed (attempt {}), retrying in {:?}: {}",
                        operation_name, attempts, delay, e
                    );

                    if !sleep_or_cancel(&self.cancel, delay).await {
                        return Err(Error::Shutdown);
                    }
                }
            }
        }
    }
}
