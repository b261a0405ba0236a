use std::future::Future;
use std::time::Duration;

use bwk_config::Config;
use bwk_types::{BreakerSnapshot, CallError, CircuitOpenError, CircuitState};
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Thresholds for one circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerConfig {
    /// Consecutive failures that open a closed circuit.
    pub failure_threshold: u32,
    /// How long an open circuit waits before letting probes through.
    pub recovery_timeout: Duration,
    /// Consecutive half-open successes that close the circuit again.
    pub success_threshold: u32,
}

impl BreakerConfig {
    /// Negative timeouts clamp to zero; timeouts too large for a `Duration` saturate.
    pub fn new(failure_threshold: u32, recovery_timeout_secs: f64, success_threshold: u32) -> Self {
        Self {
            failure_threshold,
            recovery_timeout: Duration::try_from_secs_f64(recovery_timeout_secs.max(0.0))
                .unwrap_or(Duration::MAX),
            success_threshold,
        }
    }

    /// Settings for `name`, applying any per-dependency override from the config.
    pub fn for_dependency(config: &Config, name: &str) -> Self {
        let (failure_threshold, recovery_timeout, success_threshold) =
            config.breaker_settings(name);
        Self {
            failure_threshold,
            recovery_timeout,
            success_threshold,
        }
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            success_threshold: 3,
        }
    }
}

impl From<&Config> for BreakerConfig {
    fn from(config: &Config) -> Self {
        Self {
            failure_threshold: config.failure_threshold,
            recovery_timeout: config.recovery_timeout(),
            success_threshold: config.success_threshold,
        }
    }
}

/// Circuit breaker guarding a single named dependency.
///
/// The OPEN -> HALF_OPEN transition has no timer behind it: it happens on the next
/// locked read once `recovery_timeout` has elapsed since the last failure. Every
/// operation goes through the same mutex, so two callers cannot both observe the
/// expiry.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<CircuitInner>,
}

#[derive(Debug, Default)]
struct CircuitInner {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure_time: Option<Instant>,
    last_failure_at: Option<DateTime<Utc>>,
}

impl CircuitInner {
    fn refresh(&mut self, name: &str, recovery_timeout: Duration) -> CircuitState {
        if self.state == CircuitState::Open {
            let expired = self
                .last_failure_time
                .map_or(true, |t| t.elapsed() >= recovery_timeout);
            if expired {
                self.state = CircuitState::HalfOpen;
                self.success_count = 0;
                info!(dependency = %name, "Circuit breaker entering HALF_OPEN state");
            }
        }
        self.state
    }
}

impl CircuitBreaker {
    /// Thresholds below 1 are raised to 1.
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        let config = BreakerConfig {
            failure_threshold: config.failure_threshold.max(1),
            success_threshold: config.success_threshold.max(1),
            ..config
        };
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(CircuitInner::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    /// Get the current circuit state.
    pub async fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock().await;
        inner.refresh(&self.name, self.config.recovery_timeout)
    }

    /// Fail fast if the circuit is open.
    pub async fn check(&self) -> Result<(), CircuitOpenError> {
        let mut inner = self.inner.lock().await;
        if inner.refresh(&self.name, self.config.recovery_timeout) != CircuitState::Open {
            return Ok(());
        }

        let elapsed = inner
            .last_failure_time
            .map(|t| t.elapsed())
            .unwrap_or(self.config.recovery_timeout);
        Err(CircuitOpenError {
            dependency: self.name.clone(),
            retry_after: self.config.recovery_timeout.saturating_sub(elapsed),
        })
    }

    pub async fn record_success(&self) {
        let mut inner = self.inner.lock().await;
        match inner.refresh(&self.name, self.config.recovery_timeout) {
            CircuitState::Closed => inner.failure_count = 0,
            CircuitState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.config.success_threshold {
                    info!(
                        dependency = %self.name,
                        successes = inner.success_count,
                        "Circuit breaker closing after successful probes"
                    );
                    inner.state = CircuitState::Closed;
                    inner.failure_count = 0;
                    inner.success_count = 0;
                }
            }
            // Nothing should run while open.
            CircuitState::Open => {}
        }
    }

    /// Count a failure. Pure bookkeeping; never fails.
    pub async fn record_failure(&self) {
        let mut inner = self.inner.lock().await;
        let state = inner.refresh(&self.name, self.config.recovery_timeout);

        inner.failure_count = inner.failure_count.saturating_add(1);
        inner.last_failure_time = Some(Instant::now());
        inner.last_failure_at = Some(Utc::now());

        match state {
            CircuitState::HalfOpen => {
                warn!(
                    dependency = %self.name,
                    "Circuit breaker re-opening after failed probe"
                );
                inner.state = CircuitState::Open;
                inner.success_count = 0;
            }
            CircuitState::Closed if inner.failure_count >= self.config.failure_threshold => {
                warn!(
                    dependency = %self.name,
                    failures = inner.failure_count,
                    "Circuit breaker opening after {} failures",
                    inner.failure_count
                );
                inner.state = CircuitState::Open;
            }
            _ => debug!(
                dependency = %self.name,
                failures = inner.failure_count,
                state = %state,
                "Circuit breaker recorded failure"
            ),
        }
    }

    /// Execute a function with circuit breaker protection.
    pub async fn call<F, Fut, T, E>(&self, f: F) -> Result<T, CallError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.check().await?;

        match f().await {
            Ok(result) => {
                self.record_success().await;
                Ok(result)
            }
            Err(e) => {
                self.record_failure().await;
                Err(CallError::Operation(e))
            }
        }
    }

    /// Force the circuit closed and clear all counters.
    pub async fn reset(&self) {
        let mut inner = self.inner.lock().await;
        *inner = CircuitInner::default();
        info!(dependency = %self.name, "Circuit breaker manually reset to CLOSED");
    }

    pub async fn snapshot(&self) -> BreakerSnapshot {
        let mut inner = self.inner.lock().await;
        let state = inner.refresh(&self.name, self.config.recovery_timeout);
        BreakerSnapshot {
            name: self.name.clone(),
            state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            failure_threshold: self.config.failure_threshold,
            recovery_timeout: self.config.recovery_timeout.as_secs_f64(),
            success_threshold: self.config.success_threshold,
            last_failure_at: inner.last_failure_at,
        }
    }
}
