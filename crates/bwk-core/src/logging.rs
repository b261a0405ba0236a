use std::path::Path;

use bwk_config::LoggingConfig;
use bwk_types::{BulwarkError, Result};
use tracing_appender::rolling;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Layer, Registry};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

const DEFAULT_LOG_FILE: &str = "bulwark.log";

/// Initialize the tracing/logging system.
///
/// `RUST_LOG` wins over the configured level. Console output goes to stderr, either
/// human-readable or JSON; a daily-rolling file is added when `config.file` is set.
/// Fails if a global subscriber is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let env_filter = build_filter(&config.level)?;

    let mut layers: Vec<BoxedLayer> = vec![console_layer(config.json)];
    if let Some(path) = &config.file {
        layers.push(file_layer(path, config.json));
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(env_filter)
        .try_init()
        .map_err(|e| BulwarkError::Logging(e.to_string()))
}

fn build_filter(level: &str) -> Result<EnvFilter> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| BulwarkError::Logging(format!("Invalid log level '{level}': {e}")))
}

fn console_layer(json: bool) -> BoxedLayer {
    if json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_span_events(FmtSpan::CLOSE)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_ansi(true)
            .boxed()
    }
}

fn file_layer(path: &Path, json: bool) -> BoxedLayer {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| DEFAULT_LOG_FILE.to_string());
    let appender = rolling::daily(dir, filename);

    if json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(appender)
            .with_target(true)
            .with_ansi(false)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(appender)
            .with_target(true)
            .with_ansi(false)
            .boxed()
    }
}

#[cfg(test)]
mod tests {
    // The subscriber is process-global, so everything that installs it lives in one test.

    use super::*;

    #[test]
    fn init_logging_installs_once() {
        let dir = tempfile::tempdir().unwrap();
        let config = LoggingConfig {
            level: "debug".to_string(),
            file: Some(dir.path().join("bulwark.log")),
            json: true,
        };

        assert!(init_logging(&config).is_ok());
        tracing::info!("logging initialised");

        let err = init_logging(&config).unwrap_err();
        assert!(matches!(err, BulwarkError::Logging(_)));
    }

    #[test]
    fn build_filter_accepts_plain_levels() {
        for level in ["info", "warn", "bwk_core=debug,info"] {
            assert!(build_filter(level).is_ok(), "{level}");
        }
    }
}
