pub mod breaker;
pub mod error;

// Re-exports for convenience
pub use breaker::{BreakerSnapshot, CircuitState, HealthReport};
pub use error::{BulwarkError, CallError, CircuitOpenError, Result};
