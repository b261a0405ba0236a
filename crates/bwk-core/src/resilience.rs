use std::fmt;
use std::future::Future;
use std::sync::Arc;

use bwk_config::Config;
use bwk_types::{BreakerSnapshot, CallError, HealthReport};

use crate::breaker_registry::BreakerRegistry;
use crate::circuit_breaker::{BreakerConfig, CircuitBreaker};
use crate::fallback::FallbackRegistry;
use crate::resilient_call::ResilientCall;
use crate::retry::{RetryConfig, RetryPolicy};

/// Process-wide resilience state: breaker and fallback registries plus defaults.
///
/// Construct once at startup and share it (usually behind an `Arc`) with every
/// service that talks to an external dependency.
#[derive(Debug)]
pub struct Resilience {
    config: Config,
    breakers: BreakerRegistry,
    fallbacks: FallbackRegistry,
}

impl Resilience {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            breakers: BreakerRegistry::new(),
            fallbacks: FallbackRegistry::new(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.clone())
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn breakers(&self) -> &BreakerRegistry {
        &self.breakers
    }

    pub fn fallbacks(&self) -> &FallbackRegistry {
        &self.fallbacks
    }

    /// Register a breaker with explicit thresholds (get-or-create).
    pub async fn register_breaker(
        &self,
        name: impl Into<String>,
        config: BreakerConfig,
    ) -> Arc<CircuitBreaker> {
        self.breakers.register(name, config).await
    }

    /// Breaker for `name` using the configured defaults and overrides.
    pub async fn breaker(&self, name: &str) -> Arc<CircuitBreaker> {
        let config = BreakerConfig::for_dependency(&self.config, name);
        self.breakers.register(name, config).await
    }

    pub async fn register_fallback<T, E, F>(&self, name: impl Into<String>, fallback: F)
    where
        T: 'static,
        E: 'static,
        F: Fn(&CallError<E>) -> T + Send + Sync + 'static,
    {
        self.fallbacks.register(name, fallback).await;
    }

    /// Untyped check; see [`FallbackRegistry::has_fallback_for`] for the typed one.
    pub async fn has_fallback(&self, name: &str) -> bool {
        self.fallbacks.has_fallback(name).await
    }

    pub async fn has_fallback_for<T: 'static, E: 'static>(&self, name: &str) -> bool {
        self.fallbacks.has_fallback_for::<T, E>(name).await
    }

    /// Configured retry defaults, retrying every error.
    pub fn retry_policy<E: 'static>(&self) -> RetryPolicy<E> {
        RetryPolicy::new(RetryConfig::from(&self.config))
    }

    /// Resilient call with the configured retry defaults.
    ///
    /// Uses the breaker registered under `name` if there is one; calls to an
    /// unregistered name run without a breaker.
    pub async fn call<F, Fut, T, E>(&self, name: &str, f: F) -> Result<T, CallError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        T: 'static,
        E: fmt::Display + 'static,
    {
        self.call_with(name, self.retry_policy(), f).await
    }

    /// Resilient call with an explicit retry policy.
    pub async fn call_with<F, Fut, T, E>(
        &self,
        name: &str,
        policy: RetryPolicy<E>,
        f: F,
    ) -> Result<T, CallError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        T: 'static,
        E: fmt::Display + 'static,
    {
        let breaker = self.breakers.get(name).await;
        let mut call = ResilientCall::new(name, policy).fallbacks(&self.fallbacks);
        if let Some(breaker) = breaker.as_deref() {
            call = call.breaker(breaker);
        }
        call.execute(f).await
    }

    pub async fn list_breakers(&self) -> Vec<BreakerSnapshot> {
        self.breakers.list().await
    }

    pub async fn health(&self) -> HealthReport {
        self.breakers.health().await
    }

    pub async fn reset_all(&self) {
        self.breakers.reset_all().await;
    }
}

impl Default for Resilience {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use bwk_config::BreakerOverride;
    use bwk_types::CircuitState;

    fn quick_config() -> Config {
        let mut config = Config {
            max_retries: 2,
            backoff_factor: 0.5,
            max_delay_secs: 1.0,
            ..Config::default()
        };
        config.breakers.insert(
            "search".to_string(),
            BreakerOverride {
                failure_threshold: Some(3),
                recovery_timeout: Some(30.0),
                success_threshold: Some(1),
            },
        );
        config
    }

    #[tokio::test]
    async fn breaker_uses_configured_overrides() {
        let resilience = Resilience::new(quick_config());
        let search = resilience.breaker("search").await;
        assert_eq!(search.config().failure_threshold, 3);
        assert_eq!(search.config().recovery_timeout, Duration::from_secs(30));

        let llm = Resilience::from_config(&quick_config()).breaker("llm").await;
        assert_eq!(llm.config().failure_threshold, 5);

        let llm = resilience.breaker("llm").await;
        assert_eq!(llm.config().failure_threshold, 5);
        assert!(Arc::ptr_eq(&llm, &resilience.breaker("llm").await));
    }

    #[tokio::test(start_paused = true)]
    async fn call_uses_registered_breaker_and_fallback() {
        let resilience = Resilience::new(quick_config());
        resilience.breaker("search").await;
        resilience
            .register_fallback("search", |_: &CallError<String>| Vec::<String>::new())
            .await;
        let attempts = AtomicU32::new(0);

        // 3 attempts (1 + 2 retries) trip the threshold of 3.
        let result = resilience
            .call("search", || async {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err::<Vec<String>, _>("503".to_string())
            })
            .await;
        assert!(result.unwrap().is_empty());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);

        let health = resilience.health().await;
        assert!(!health.healthy);
        assert_eq!(health.open_circuits, vec!["search".to_string()]);

        // Open circuit: fallback without touching the dependency.
        let result = resilience
            .call("search", || async {
                attempts.fetch_add(1, Ordering::SeqCst);
                Ok::<_, String>(vec!["live".to_string()])
            })
            .await;
        assert!(result.unwrap().is_empty());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn unregistered_name_runs_without_breaker() {
        let resilience = Resilience::default();
        let result = resilience
            .call_with("adhoc", RetryPolicy::no_retry(), || async { Err::<(), _>("nope") })
            .await;
        assert_eq!(result.unwrap_err().into_operation(), Some("nope"));
        assert!(resilience.list_breakers().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn reset_all_restores_health() {
        let resilience = Resilience::new(quick_config());
        let breaker = resilience
            .register_breaker("db", BreakerConfig::new(1, 60.0, 1))
            .await;
        breaker.record_failure().await;
        assert_eq!(resilience.list_breakers().await[0].state, CircuitState::Open);

        resilience.reset_all().await;
        assert!(resilience.health().await.healthy);
    }
}
