pub mod breaker_registry;
pub mod circuit_breaker;
pub mod fallback;
pub mod logging;
pub mod resilience;
pub mod resilient_call;
pub mod retry;

pub use breaker_registry::BreakerRegistry;
pub use circuit_breaker::{BreakerConfig, CircuitBreaker};
pub use fallback::{Fallback, FallbackRegistry};
pub use logging::init_logging;
pub use resilience::Resilience;
pub use resilient_call::ResilientCall;
pub use retry::{RetryConfig, RetryPolicy, Transient};

// Shared types, re-exported so callers only need this crate
pub use bwk_types::{BreakerSnapshot, CallError, CircuitOpenError, CircuitState, HealthReport};
