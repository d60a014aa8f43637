//! Structured logging for the gantry binary.
//!
//! Logs always go through `tracing`. In stdio mode stdout carries protocol
//! frames, so the subscriber must write to stderr there.

use std::str::FromStr;

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Log line encoding.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

impl FromStr for LogFormat {
    type Err = TelemetryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" | "text" => Ok(Self::Pretty),
            other => Err(TelemetryError::InvalidFormat(other.to_string())),
        }
    }
}

/// Where log lines are written.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogWriter {
    #[default]
    Stdout,
    Stderr,
}

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by RUST_LOG env var.
    pub log_level: Level,
    /// Per-module level overrides (e.g. "gantry_server" => DEBUG).
    pub module_levels: Vec<(String, Level)>,
    pub format: LogFormat,
    pub writer: LogWriter,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            module_levels: Vec::new(),
            format: LogFormat::Json,
            writer: LogWriter::Stdout,
        }
    }
}

impl TelemetryConfig {
    /// Config for the stdio transport: human-readable, on stderr.
    pub fn for_stdio(log_level: Level) -> Self {
        Self {
            log_level,
            format: LogFormat::Pretty,
            writer: LogWriter::Stderr,
            ..Self::default()
        }
    }

    /// Filter directives derived from the config, e.g. `info,hyper=warn`.
    pub fn filter_directives(&self) -> String {
        let mut filter = self.log_level.to_string().to_lowercase();
        for (module, level) in &self.module_levels {
            filter.push_str(&format!(",{}={}", module, level.to_string().to_lowercase()));
        }
        filter
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("invalid log format: {0}")]
    InvalidFormat(String),
    #[error("invalid log level: {0}")]
    InvalidLevel(String),
    #[error("telemetry already initialized: {0}")]
    AlreadyInitialized(String),
}

/// Parse a level name such as `info` or `DEBUG`.
pub fn parse_level(s: &str) -> Result<Level, TelemetryError> {
    Level::from_str(s.trim()).map_err(|_| TelemetryError::InvalidLevel(s.to_string()))
}

/// Initialize the global subscriber. Call once at startup.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.filter_directives()));

    let fmt_layer = match (config.format, config.writer) {
        (LogFormat::Json, LogWriter::Stdout) => tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
            .boxed(),
        (LogFormat::Json, LogWriter::Stderr) => tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
            .with_writer(std::io::stderr)
            .boxed(),
        (LogFormat::Pretty, LogWriter::Stdout) => {
            tracing_subscriber::fmt::layer().with_target(true).boxed()
        }
        (LogFormat::Pretty, LogWriter::Stderr) => tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_ansi(false)
            .with_writer(std::io::stderr)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(fmt_layer.with_filter(env_filter))
        .try_init()
        .map_err(|e| TelemetryError::AlreadyInitialized(e.to_string()))
}
