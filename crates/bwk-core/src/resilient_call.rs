//! A single protected call: breaker gate, retry loop, then fallback.
//!
//! ```text
//! check breaker ──open──► fallback (or CircuitOpen)
//!      │
//!      ▼
//! attempt ─► record outcome on breaker ─► retryable & attempts left? ─► sleep ─► attempt
//!      │                                         │ no
//!      ▼ ok                                      ▼
//!   result                              fallback (or last error)
//! ```
//!
//! Each attempt counts against the breaker individually, including a non-retryable
//! failure that ends the loop early.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use bwk_types::CallError;
use tracing::warn;

use crate::circuit_breaker::CircuitBreaker;
use crate::fallback::{Fallback, FallbackRegistry};
use crate::retry::RetryPolicy;

/// Builder for one resilient invocation of a dependency.
pub struct ResilientCall<'a, T, E> {
    name: String,
    policy: RetryPolicy<E>,
    breaker: Option<&'a CircuitBreaker>,
    fallback: Option<Fallback<T, E>>,
    registry: Option<&'a FallbackRegistry>,
}

impl<'a, T, E> fmt::Debug for ResilientCall<'a, T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResilientCall")
            .field("name", &self.name)
            .field("policy", &self.policy)
            .field("breaker", &self.breaker.map(CircuitBreaker::name))
            .field("fallback", &self.fallback.is_some())
            .finish_non_exhaustive()
    }
}

impl<'a, T, E> ResilientCall<'a, T, E>
where
    T: 'static,
    E: fmt::Display + 'static,
{
    pub fn new(name: impl Into<String>, policy: RetryPolicy<E>) -> Self {
        Self {
            name: name.into(),
            policy,
            breaker: None,
            fallback: None,
            registry: None,
        }
    }

    /// Gate the call on this breaker and feed it every attempt's outcome.
    pub fn breaker(mut self, breaker: &'a CircuitBreaker) -> Self {
        self.breaker = Some(breaker);
        self
    }

    /// Explicit fallback. Takes precedence over the registry.
    pub fn fallback<F>(mut self, fallback: F) -> Self
    where
        F: Fn(&CallError<E>) -> T + Send + Sync + 'static,
    {
        self.fallback = Some(Arc::new(fallback));
        self
    }

    /// Look up a fallback for this call's name here when none was given explicitly.
    pub fn fallbacks(mut self, registry: &'a FallbackRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub async fn execute<F, Fut>(self, f: F) -> Result<T, CallError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(breaker) = self.breaker {
            if let Err(open) = breaker.check().await {
                return self.degrade(CallError::CircuitOpen(open)).await;
            }
        }

        match self.policy.run(&self.name, self.breaker, f).await {
            Ok(result) => Ok(result),
            Err(e) => self.degrade(CallError::Operation(e)).await,
        }
    }

    async fn resolve_fallback(&self) -> Option<Fallback<T, E>> {
        if let Some(fallback) = &self.fallback {
            return Some(Arc::clone(fallback));
        }
        match self.registry {
            Some(registry) => registry.get::<T, E>(&self.name).await,
            None => None,
        }
    }

    async fn degrade(&self, err: CallError<E>) -> Result<T, CallError<E>> {
        match self.resolve_fallback().await {
            Some(fallback) => {
                warn!(dependency = %self.name, error = %err, "Degrading to fallback");
                Ok(fallback(&err))
            }
            None => Err(err),
        }
    }
}
