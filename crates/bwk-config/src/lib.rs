pub mod config;

pub use config::{BreakerOverride, Config, LoggingConfig};
