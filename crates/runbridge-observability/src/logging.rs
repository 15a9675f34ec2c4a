//! Structured logging
//!
//! Global subscriber setup plus a [`LogSink`] that forwards an invocation's
//! `log` and `error` sinks into `tracing`.

use runbridge_core::{LogEntry, LogSink};
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Output format of the global subscriber
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("Invalid log filter '{0}': {1}")]
    InvalidFilter(String, String),

    #[error("Failed to install global subscriber: {0}")]
    Install(String),
}

/// Build the filter: `RUST_LOG` wins over the configured level
pub fn build_filter(config: &LoggingConfig) -> Result<EnvFilter, LoggingError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }

    EnvFilter::try_new(&config.level)
        .map_err(|e| LoggingError::InvalidFilter(config.level.clone(), e.to_string()))
}

/// Install the global subscriber
pub fn init_logging(config: &LoggingConfig) -> Result<(), LoggingError> {
    let filter = build_filter(config)?;
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    let result = match config.format {
        LogFormat::Pretty => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };

    result.map_err(|e| LoggingError::Install(e.to_string()))
}

/// Which invocation stream a [`TracingLogSink`] serves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStream {
    Log,
    Error,
}

/// Invocation log sink backed by `tracing`
#[derive(Debug, Clone)]
pub struct TracingLogSink {
    stream: LogStream,
}

impl TracingLogSink {
    pub fn log() -> Self {
        Self {
            stream: LogStream::Log,
        }
    }

    pub fn error() -> Self {
        Self {
            stream: LogStream::Error,
        }
    }

    pub fn stream(&self) -> LogStream {
        self.stream
    }
}

impl LogSink for TracingLogSink {
    fn write(&self, entry: LogEntry) {
        match (self.stream, entry) {
            (LogStream::Log, LogEntry::Text(text)) => {
                info!(target: "runbridge::invocation", "{}", text)
            }
            (LogStream::Log, LogEntry::Json(value)) => {
                info!(target: "runbridge::invocation", payload = %value, "structured log")
            }
            (LogStream::Log, LogEntry::Error { name, message }) => {
                info!(target: "runbridge::invocation", error_name = %name, "{}", message)
            }
            (LogStream::Error, LogEntry::Text(text)) => {
                error!(target: "runbridge::invocation", "{}", text)
            }
            (LogStream::Error, LogEntry::Json(value)) => {
                error!(target: "runbridge::invocation", payload = %value, "structured error")
            }
            (LogStream::Error, LogEntry::Error { name, message }) => {
                error!(target: "runbridge::invocation", error_name = %name, "{}", message)
            }
        }
    }
}
