//! Logging configuration and subscriber bootstrap
//!
//! Every Conduit binary calls [`init_logging`] once at startup. Output goes to
//! stdout, a daily-rotated file, or both, as text or JSON.
//!
//! Job handlers log with structured fields rather than interpolated strings:
//!
//! ```rust,ignore
//! tracing::info!(tenant_id = %ctx.tenant_id, source = %ctx.source, items = n, "Batch stored");
//! ```
//!
//! # Example
//!
//! ```no_run
//! use conduit_common::logging::{init_logging, LogConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = LogConfig::from_env()?;
//!     let _guard = init_logging(&config)?;
//!     tracing::info!("worker started");
//!     Ok(())
//! }
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

/// Minimum severity written by the subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(anyhow::anyhow!("Invalid log level: {}", other)),
        }
    }
}

/// Where log lines are written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Console,
    File,
    Both,
}

impl LogOutput {
    fn console(self) -> bool {
        matches!(self, LogOutput::Console | LogOutput::Both)
    }

    fn file(self) -> bool {
        matches!(self, LogOutput::File | LogOutput::Both)
    }
}

impl std::str::FromStr for LogOutput {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "console" | "stdout" => Ok(LogOutput::Console),
            "file" => Ok(LogOutput::File),
            "both" | "all" => Ok(LogOutput::Both),
            other => Err(anyhow::anyhow!("Invalid log output: {}", other)),
        }
    }
}

/// Line format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(anyhow::anyhow!("Invalid log format: {}", other)),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    pub level: LogLevel,
    pub output: LogOutput,
    pub format: LogFormat,
    /// Directory for rotated log files
    pub log_dir: PathBuf,
    /// File name prefix, e.g. `conduit-worker` -> `conduit-worker.2026-01-18`
    pub log_file_prefix: String,
    /// Extra directives such as `sqlx=warn,aws_smithy_runtime=info`
    pub filter_directives: Option<String>,
    pub include_location: bool,
    pub include_thread_ids: bool,
    pub include_targets: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            output: LogOutput::Console,
            format: LogFormat::Text,
            log_dir: PathBuf::from("./logs"),
            log_file_prefix: "conduit".to_string(),
            filter_directives: None,
            include_location: false,
            include_thread_ids: false,
            include_targets: true,
        }
    }
}

impl LogConfig {
    /// Load configuration from `LOG_*` environment variables
    ///
    /// Recognized: `LOG_LEVEL`, `LOG_OUTPUT`, `LOG_FORMAT`, `LOG_DIR`,
    /// `LOG_FILE_PREFIX`, `LOG_FILTER`, `LOG_INCLUDE_LOCATION`,
    /// `LOG_INCLUDE_THREAD_IDS` and `LOG_INCLUDE_TARGETS`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(level) = lookup("LOG_LEVEL") {
            config.level = level.parse()?;
        }
        if let Some(output) = lookup("LOG_OUTPUT") {
            config.output = output.parse()?;
        }
        if let Some(format) = lookup("LOG_FORMAT") {
            config.format = format.parse()?;
        }
        if let Some(dir) = lookup("LOG_DIR") {
            config.log_dir = PathBuf::from(dir);
        }
        if let Some(prefix) = lookup("LOG_FILE_PREFIX") {
            config.log_file_prefix = prefix;
        }
        config.filter_directives = lookup("LOG_FILTER").filter(|f| !f.trim().is_empty());

        let flag = |key: &str, default: bool| -> Result<bool> {
            match lookup(key) {
                Some(raw) => raw
                    .parse()
                    .with_context(|| format!("{} must be true or false", key)),
                None => Ok(default),
            }
        };
        config.include_location = flag("LOG_INCLUDE_LOCATION", config.include_location)?;
        config.include_thread_ids = flag("LOG_INCLUDE_THREAD_IDS", config.include_thread_ids)?;
        config.include_targets = flag("LOG_INCLUDE_TARGETS", config.include_targets)?;

        Ok(config)
    }

    pub fn builder() -> LogConfigBuilder {
        LogConfigBuilder::default()
    }

    fn env_filter(&self) -> Result<EnvFilter> {
        let mut filter = EnvFilter::builder()
            .with_default_directive(Level::from(self.level).into())
            .from_env_lossy();

        if let Some(directives) = &self.filter_directives {
            for directive in directives.split(',').filter(|d| !d.trim().is_empty()) {
                filter = filter.add_directive(
                    directive
                        .trim()
                        .parse()
                        .with_context(|| format!("Failed to parse filter directive '{}'", directive))?,
                );
            }
        }

        Ok(filter)
    }
}

/// Fluent builder for [`LogConfig`]
#[derive(Default)]
pub struct LogConfigBuilder {
    config: LogConfig,
}

impl LogConfigBuilder {
    pub fn level(mut self, level: LogLevel) -> Self {
        self.config.level = level;
        self
    }

    pub fn output(mut self, output: LogOutput) -> Self {
        self.config.output = output;
        self
    }

    pub fn format(mut self, format: LogFormat) -> Self {
        self.config.format = format;
        self
    }

    pub fn log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.log_dir = dir.into();
        self
    }

    pub fn log_file_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.log_file_prefix = prefix.into();
        self
    }

    pub fn filter_directives(mut self, filter: impl Into<String>) -> Self {
        self.config.filter_directives = Some(filter.into());
        self
    }

    pub fn include_location(mut self, include: bool) -> Self {
        self.config.include_location = include;
        self
    }

    pub fn build(self) -> LogConfig {
        self.config
    }
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

fn fmt_layer<W>(config: &LogConfig, writer: W, ansi: bool) -> BoxedLayer
where
    W: for<'w> fmt::MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(ansi)
        .with_target(config.include_targets)
        .with_thread_ids(config.include_thread_ids)
        .with_file(config.include_location)
        .with_line_number(config.include_location)
        .with_span_events(FmtSpan::CLOSE);

    match config.format {
        LogFormat::Text => layer.boxed(),
        LogFormat::Json => layer.json().boxed(),
    }
}

/// Install the global subscriber
///
/// The returned guard flushes the file writer on drop and must be held for
/// the lifetime of the process when file output is enabled.
pub fn init_logging(config: &LogConfig) -> Result<Option<WorkerGuard>> {
    let filter = config.env_filter()?;
    let mut layers: Vec<BoxedLayer> = Vec::new();
    let mut guard = None;

    if config.output.console() {
        layers.push(fmt_layer(config, std::io::stdout, true));
    }

    if config.output.file() {
        std::fs::create_dir_all(&config.log_dir).with_context(|| {
            format!("Failed to create log directory {}", config.log_dir.display())
        })?;
        let appender = tracing_appender::rolling::daily(&config.log_dir, &config.log_file_prefix);
        let (writer, worker_guard) = tracing_appender::non_blocking(appender);
        layers.push(fmt_layer(config, writer, false));
        guard = Some(worker_guard);
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(guard)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_log_level_from_str() {
        assert_eq!("trace".parse::<LogLevel>().unwrap(), LogLevel::Trace);
        assert_eq!("WARNING".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert!("loud".parse::<LogLevel>().is_err());
    }

    #[test]
    fn test_from_lookup_defaults() {
        let config = LogConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.level, LogLevel::Info);
        assert_eq!(config.output, LogOutput::Console);
        assert_eq!(config.log_file_prefix, "conduit");
        assert!(config.include_targets);
        assert!(config.filter_directives.is_none());
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = LogConfig::from_lookup(lookup(&[
            ("LOG_LEVEL", "debug"),
            ("LOG_OUTPUT", "both"),
            ("LOG_FORMAT", "json"),
            ("LOG_FILE_PREFIX", "conduit-worker"),
            ("LOG_FILTER", "sqlx=warn"),
            ("LOG_INCLUDE_TARGETS", "false"),
        ]))
        .unwrap();

        assert_eq!(config.level, LogLevel::Debug);
        assert!(config.output.console() && config.output.file());
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.log_file_prefix, "conduit-worker");
        assert_eq!(config.filter_directives.as_deref(), Some("sqlx=warn"));
        assert!(!config.include_targets);
    }

    #[test]
    fn test_from_lookup_rejects_bad_flag() {
        let result = LogConfig::from_lookup(lookup(&[("LOG_INCLUDE_LOCATION", "sometimes")]));
        assert!(result.is_err());
    }

    #[test]
    fn test_builder() {
        let config = LogConfig::builder()
            .level(LogLevel::Error)
            .output(LogOutput::File)
            .log_dir("/var/log/conduit")
            .build();

        assert_eq!(config.level, LogLevel::Error);
        assert!(!config.output.console());
        assert_eq!(config.log_dir, PathBuf::from("/var/log/conduit"));
    }

    #[test]
    fn test_env_filter_rejects_garbage_directive() {
        let config = LogConfig::builder().filter_directives("sqlx=notalevel").build();
        assert!(config.env_filter().is_err());
    }
}
