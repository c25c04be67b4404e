//! Logging initialization
//!
//! One subscriber for the whole process: a rolling file plus readable
//! stdout, or JSON-only file output for log shippers. `RUST_LOG` overrides
//! the configured filter entirely.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

use crate::config::LoggingConfig;

impl LoggingConfig {
    /// Default filter directives: the configured level for the control
    /// plane, chatty dependencies capped at warn.
    fn filter_directives(&self) -> String {
        format!("{},sqlx=warn,hyper=warn,reqwest=warn", self.level)
    }

    fn file_rotation(&self) -> Rotation {
        match self.rotation.as_str() {
            "hourly" => Rotation::HOURLY,
            "daily" => Rotation::DAILY,
            _ => Rotation::NEVER,
        }
    }
}

pub fn init_logging(config: &LoggingConfig) -> WorkerGuard {
    let appender = RollingFileAppender::new(config.file_rotation(), &config.dir, &config.file);
    let (file_writer, guard) = tracing_appender::non_blocking(appender);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.filter_directives()));

    let file_layer = if config.json {
        fmt::layer()
            .json()
            .with_writer(file_writer)
            .with_ansi(false)
            .boxed()
    } else {
        fmt::layer()
            .with_writer(file_writer)
            .with_ansi(false)
            .boxed()
    };

    // JSON mode is for shipped logs; stdout would duplicate every line.
    let stdout_layer = (!config.json).then(|| fmt::layer().compact().with_ansi(true));

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();

    guard
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_directives_carry_level() {
        let config = LoggingConfig {
            level: "debug".to_string(),
            ..LoggingConfig::default()
        };
        let directives = config.filter_directives();
        assert!(directives.starts_with("debug,"));
        assert!(directives.contains("sqlx=warn"));
    }

    #[test]
    fn test_rotation_parsing() {
        let mut config = LoggingConfig::default();
        assert_eq!(config.file_rotation(), Rotation::DAILY);

        config.rotation = "hourly".to_string();
        assert_eq!(config.file_rotation(), Rotation::HOURLY);

        config.rotation = "off".to_string();
        assert_eq!(config.file_rotation(), Rotation::NEVER);
    }
}
