use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use bwk_types::CallError;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Turns a failure into a substitute result.
///
/// Receives the triggering failure so it can tell "circuit open" apart from "still
/// failing after retries".
pub type Fallback<T, E> = Arc<dyn Fn(&CallError<E>) -> T + Send + Sync>;

/// Graceful-degradation table: one fallback per dependency name.
///
/// Entries are stored type-erased and recovered by downcasting, so a single registry
/// can serve dependencies with different result and error types. Looking a name up
/// with types other than the ones it was registered with behaves like a missing
/// entry.
#[derive(Default)]
pub struct FallbackRegistry {
    fallbacks: RwLock<HashMap<String, Arc<dyn Any + Send + Sync>>>,
}

impl fmt::Debug for FallbackRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FallbackRegistry").finish_non_exhaustive()
    }
}

impl FallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fallback for `name`. Last registration wins.
    pub async fn register<T, E, F>(&self, name: impl Into<String>, fallback: F)
    where
        T: 'static,
        E: 'static,
        F: Fn(&CallError<E>) -> T + Send + Sync + 'static,
    {
        let name = name.into();
        let fallback: Fallback<T, E> = Arc::new(fallback);
        let previous = self
            .fallbacks
            .write()
            .await
            .insert(name.clone(), Arc::new(fallback));
        if previous.is_some() {
            debug!(dependency = %name, "Replaced fallback");
        } else {
            info!(dependency = %name, "Registered fallback");
        }
    }

    /// Register a fallback that substitutes `T::default()`, e.g. an empty result set.
    pub async fn register_default<T, E>(&self, name: impl Into<String>)
    where
        T: Default + 'static,
        E: 'static,
    {
        self.register(name, |_: &CallError<E>| T::default()).await;
    }

    /// Typed lookup.
    pub async fn get<T, E>(&self, name: &str) -> Option<Fallback<T, E>>
    where
        T: 'static,
        E: 'static,
    {
        let entry = self.fallbacks.read().await.get(name).cloned()?;
        match entry.downcast_ref::<Fallback<T, E>>() {
            Some(fallback) => Some(Arc::clone(fallback)),
            None => {
                warn!(
                    dependency = %name,
                    "Fallback registered with different result or error type, ignoring"
                );
                None
            }
        }
    }

    /// Whether anything is registered under `name`, whatever its types.
    ///
    /// A call only uses the entry if its result and error types match; see
    /// [`has_fallback_for`](Self::has_fallback_for).
    pub async fn has_fallback(&self, name: &str) -> bool {
        self.fallbacks.read().await.contains_key(name)
    }

    /// Whether a fallback usable by a call returning `Result<T, E>` is registered.
    pub async fn has_fallback_for<T, E>(&self, name: &str) -> bool
    where
        T: 'static,
        E: 'static,
    {
        self.fallbacks
            .read()
            .await
            .get(name)
            .is_some_and(|entry| entry.is::<Fallback<T, E>>())
    }

    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.fallbacks.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Run `f`; on failure, substitute the fallback registered for `name`.
    ///
    /// Without a fallback the original error is returned unchanged.
    pub async fn call_with_fallback<F, Fut, T, E>(&self, name: &str, f: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        T: 'static,
        E: fmt::Display + 'static,
    {
        let err = match f().await {
            Ok(result) => return Ok(result),
            Err(e) => e,
        };

        match self.get::<T, E>(name).await {
            Some(fallback) => {
                warn!(dependency = %name, error = %err, "Call failed, using fallback");
                Ok(fallback(&CallError::Operation(err)))
            }
            None => Err(err),
        }
    }
}
