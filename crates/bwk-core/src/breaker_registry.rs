use std::collections::HashMap;
use std::sync::Arc;

use bwk_types::{BreakerSnapshot, HealthReport};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::circuit_breaker::{BreakerConfig, CircuitBreaker};

/// Name -> breaker map used for lookup and health reporting.
///
/// Append-only: breakers are created once per name and never removed. The map lock
/// is only held for insert/lookup, never while a breaker's own lock is taken.
#[derive(Debug, Default)]
pub struct BreakerRegistry {
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
}

impl BreakerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the breaker for `name`, creating it with `config` on first use.
    ///
    /// An existing breaker keeps its original thresholds.
    pub async fn register(&self, name: impl Into<String>, config: BreakerConfig) -> Arc<CircuitBreaker> {
        let name = name.into();
        if let Some(existing) = self.breakers.read().await.get(&name) {
            if *existing.config() != config {
                debug!(dependency = %name, "Breaker already registered, keeping original thresholds");
            }
            return Arc::clone(existing);
        }

        let mut breakers = self.breakers.write().await;
        let breaker = breakers.entry(name.clone()).or_insert_with(|| {
            info!(
                dependency = %name,
                failure_threshold = config.failure_threshold,
                recovery_timeout_secs = config.recovery_timeout.as_secs_f64(),
                success_threshold = config.success_threshold,
                "Registered circuit breaker"
            );
            Arc::new(CircuitBreaker::new(name.clone(), config))
        });
        Arc::clone(breaker)
    }

    pub async fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.read().await.get(name).cloned()
    }

    pub async fn len(&self) -> usize {
        self.breakers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.breakers.read().await.is_empty()
    }

    /// Breakers sorted by name. Cloned out so the map lock is released before any
    /// breaker lock is taken.
    async fn sorted(&self) -> Vec<Arc<CircuitBreaker>> {
        let mut breakers: Vec<Arc<CircuitBreaker>> =
            self.breakers.read().await.values().cloned().collect();
        breakers.sort_by(|a, b| a.name().cmp(b.name()));
        breakers
    }

    /// Snapshot of every breaker, sorted by name.
    pub async fn list(&self) -> Vec<BreakerSnapshot> {
        let mut snapshots = Vec::new();
        for breaker in self.sorted().await {
            snapshots.push(breaker.snapshot().await);
        }
        snapshots
    }

    pub async fn health(&self) -> HealthReport {
        HealthReport::from_snapshots(self.list().await)
    }

    /// Force every breaker closed.
    pub async fn reset_all(&self) {
        for breaker in self.sorted().await {
            breaker.reset().await;
        }
    }
}
