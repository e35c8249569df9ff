//! Bethrou logging
//!
//! Unified logging setup for the client and node binaries, driven by the
//! `log.level` / `log.format` config options.
//!
//! ## Usage
//!
//! ```no_run
//! use bethrou_config::LogConfig;
//!
//! bethrou_logging::setup(&LogConfig::default());
//! ```

use bethrou_config::LogConfig;
use tracing_subscriber::EnvFilter;

/// Log level for the application
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogLevel {
    /// Error messages only
    Error,
    /// Warnings and errors
    Warn,
    /// Info, warnings, and errors (default)
    #[default]
    Info,
    /// Debug messages and above
    Debug,
    /// All messages including trace
    Trace,
}

impl LogLevel {
    /// Parse a config-file level string. Unknown values fall back to `Info`.
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "error" => Self::Error,
            "warn" | "warning" => Self::Warn,
            "debug" => Self::Debug,
            "trace" => Self::Trace,
            _ => Self::Info,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

/// Initialize logging from a `LogConfig`.
///
/// Call this once at the start of the binary; later calls are no-ops so test
/// harnesses can set up their own subscriber first.
pub fn setup(cfg: &LogConfig) {
    let _ = try_setup(cfg);
}

/// Try to initialize logging, returning an error if a subscriber is already
/// installed.
pub fn try_setup(cfg: &LogConfig) -> Result<(), String> {
    let level = LogLevel::parse(cfg.level_or_default());
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    match cfg.format_or_default() {
        "json" => builder.json().try_init().map_err(|e| e.to_string()),
        _ => builder.try_init().map_err(|e| e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_parse() {
        assert_eq!(LogLevel::parse("debug"), LogLevel::Debug);
        assert_eq!(LogLevel::parse("WARN"), LogLevel::Warn);
        assert_eq!(LogLevel::parse("warning"), LogLevel::Warn);
        assert_eq!(LogLevel::parse("error"), LogLevel::Error);
        assert_eq!(LogLevel::parse("trace"), LogLevel::Trace);
        assert_eq!(LogLevel::parse("verbose"), LogLevel::Info);
        assert_eq!(LogLevel::parse(""), LogLevel::Info);
    }

    #[test]
    fn test_log_level_as_str() {
        assert_eq!(LogLevel::Error.as_str(), "error");
        assert_eq!(LogLevel::Warn.as_str(), "warn");
        assert_eq!(LogLevel::Info.as_str(), "info");
        assert_eq!(LogLevel::Debug.as_str(), "debug");
        assert_eq!(LogLevel::Trace.as_str(), "trace");
    }

    #[test]
    fn test_log_level_default() {
        assert_eq!(LogLevel::default(), LogLevel::Info);
    }

    #[test]
    fn test_setup_is_idempotent() {
        setup(&LogConfig::default());
        setup(&LogConfig {
            level: "debug".to_string(),
            format: "json".to_string(),
        });
    }
}
