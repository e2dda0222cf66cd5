//! `tracing` subscriber setup and span timing.

use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Output format of the log subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directives used when `RUST_LOG` is unset.
    pub default_filter: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default_filter: "epochflow=info".to_string(),
            format: LogFormat::Text,
        }
    }
}

impl LoggingConfig {
    /// Reads `EPOCHFLOW_LOG_FORMAT` (`text` or `json`), keeping the defaults otherwise.
    #[must_use]
    pub fn from_env() -> Self {
        let format = match std::env::var("EPOCHFLOW_LOG_FORMAT").as_deref() {
            Ok("json") => LogFormat::Json,
            _ => LogFormat::Text,
        };
        Self {
            format,
            ..Self::default()
        }
    }

    /// Sets the fallback filter directives.
    #[must_use]
    pub fn with_default_filter(mut self, filter: impl Into<String>) -> Self {
        self.default_filter = filter.into();
        self
    }

    /// Sets the output format.
    #[must_use]
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.default_filter))
    }
}

/// Installs the global subscriber.
///
/// Returns false if a subscriber was already installed; the existing one
/// is kept.
pub fn init_tracing(config: &LoggingConfig) -> bool {
    let registry = tracing_subscriber::registry().with(config.filter());
    let installed = match config.format {
        LogFormat::Text => registry.with(fmt::layer().with_target(true)).try_init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_current_span(true).with_span_list(false))
            .try_init(),
    };
    installed.is_ok()
}

/// Measures the wall time of a span of work.
#[derive(Debug)]
pub struct SpanTimer {
    start: Instant,
    name: &'static str,
}

impl SpanTimer {
    /// Starts a timer.
    #[must_use]
    pub fn start(name: &'static str) -> Self {
        Self {
            start: Instant::now(),
            name,
        }
    }

    /// Returns the elapsed time in milliseconds.
    #[must_use]
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    /// Returns the span name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Stops the timer, returning milliseconds elapsed.
    #[must_use]
    pub fn finish(self) -> f64 {
        let ms = self.elapsed_ms();
        tracing::trace!(span_name = self.name, duration_ms = ms, "Span finished");
        ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_timer() {
        let timer = SpanTimer::start("wave");
        std::thread::sleep(std::time::Duration::from_millis(10));
        assert_eq!(timer.name(), "wave");
        assert!(timer.finish() >= 10.0);
    }

    #[test]
    fn test_logging_config_serde() {
        let config: LoggingConfig = serde_json::from_str(r#"{"format":"json"}"#).unwrap();
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.default_filter, "epochflow=info");
    }

    #[test]
    fn test_init_twice_keeps_first() {
        let config = LoggingConfig::default().with_default_filter("epochflow=debug");
        init_tracing(&config);
        assert!(!init_tracing(&config.with_format(LogFormat::Json)));
    }
}
