use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bwk_config::Config;
use rand::Rng;
use tracing::{error, info, warn};

use crate::circuit_breaker::CircuitBreaker;

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    pub max_retries: u32,
    /// Base of the exponential backoff, in seconds: attempt `i` waits up to `factor^i`.
    pub backoff_factor: f64,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl From<&Config> for RetryConfig {
    fn from(config: &Config) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff_factor: config.backoff_factor,
            max_delay: config.max_delay(),
        }
    }
}

impl RetryConfig {
    /// Upper bound of the delay after the zero-based `attempt` failed:
    /// `min(backoff_factor^attempt, max_delay)`.
    pub fn backoff_cap(&self, attempt: u32) -> Duration {
        let exp = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self
            .backoff_factor
            .powi(exp)
            .min(self.max_delay.as_secs_f64())
            .max(0.0);
        Duration::from_secs_f64(secs)
    }

    /// Full jitter: uniform in `[0, backoff_cap(attempt)]`.
    pub fn sample_delay(&self, attempt: u32) -> Duration {
        let cap = self.backoff_cap(attempt).as_secs_f64();
        Duration::from_secs_f64(rand::thread_rng().gen_range(0.0..=cap))
    }
}

/// Errors that know whether they are worth retrying.
pub trait Transient {
    fn is_transient(&self) -> bool;
}

impl Transient for std::io::Error {
    fn is_transient(&self) -> bool {
        use std::io::ErrorKind::*;
        matches!(
            self.kind(),
            TimedOut
                | ConnectionRefused
                | ConnectionReset
                | ConnectionAborted
                | NotConnected
                | BrokenPipe
                | Interrupted
                | WouldBlock
                | UnexpectedEof
        )
    }
}

impl Transient for tokio::time::error::Elapsed {
    fn is_transient(&self) -> bool {
        true
    }
}

type RetryPredicate<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;

/// Bounded retry with exponential backoff and full jitter.
///
/// Only errors accepted by the predicate are retried; anything else is returned on
/// the spot. After `max_retries` retries the last error comes back unchanged.
pub struct RetryPolicy<E> {
    config: RetryConfig,
    retry_on: RetryPredicate<E>,
}

impl<E> Clone for RetryPolicy<E> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            retry_on: Arc::clone(&self.retry_on),
        }
    }
}

impl<E> fmt::Debug for RetryPolicy<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<E: 'static> Default for RetryPolicy<E> {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

impl<E: Transient + 'static> RetryPolicy<E> {
    /// Retry only errors that report themselves as transient.
    pub fn transient_only(config: RetryConfig) -> Self {
        Self::new(config).retry_if(E::is_transient)
    }
}

impl<E: 'static> RetryPolicy<E> {
    /// A policy that retries every error.
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            retry_on: Arc::new(|_: &E| true),
        }
    }

    /// Narrow the set of retryable errors.
    pub fn retry_if<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.retry_on = Arc::new(predicate);
        self
    }

    /// A policy that never retries.
    pub fn no_retry() -> Self {
        Self::new(RetryConfig {
            max_retries: 0,
            ..RetryConfig::default()
        })
    }
}

impl<E> RetryPolicy<E> {
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    pub fn is_retryable(&self, err: &E) -> bool {
        (self.retry_on)(err)
    }

    /// Execute an async function, retrying according to this policy.
    pub async fn execute<F, Fut, T>(&self, name: &str, f: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        self.run(name, None, f).await
    }

    /// The retry loop. When a breaker is given, every attempt's outcome is recorded
    /// on it before anything else happens, so dropping this future during the backoff
    /// sleep leaves no half-recorded attempt behind.
    pub(crate) async fn run<F, Fut, T>(
        &self,
        name: &str,
        breaker: Option<&CircuitBreaker>,
        mut f: F,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let mut attempt: u32 = 0;

        loop {
            match f().await {
                Ok(result) => {
                    if let Some(breaker) = breaker {
                        breaker.record_success().await;
                    }
                    if attempt > 0 {
                        info!(dependency = %name, attempt, "Call succeeded after retry");
                    }
                    return Ok(result);
                }
                Err(e) => {
                    if let Some(breaker) = breaker {
                        breaker.record_failure().await;
                    }

                    if !self.is_retryable(&e) {
                        warn!(dependency = %name, error = %e, "Non-retryable failure, not retrying");
                        return Err(e);
                    }

                    if attempt >= self.config.max_retries {
                        error!(
                            dependency = %name,
                            error = %e,
                            "Call failed after {} retries",
                            self.config.max_retries
                        );
                        return Err(e);
                    }

                    let delay = self.config.sample_delay(attempt);
                    warn!(
                        dependency = %name,
                        error = %e,
                        "Call failed (attempt {}/{}) retrying in {:.2}s",
                        attempt + 1,
                        self.config.max_retries + 1,
                        delay.as_secs_f64()
                    );

                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
