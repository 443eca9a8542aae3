//! Logging setup for ShellKit binaries and tests.
//!
//! Without `RUST_LOG` or an explicit filter, only the ShellKit crates log at
//! the configured level; dependencies (reqwest, hyper, rustls) are held at
//! `warn`.

use tracing::{Level, Subscriber};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Crates whose events pass the default filter at the configured level.
const SHELLKIT_TARGETS: &[&str] = &["shellkit_common", "shellkit_net", "shellkit_sw", "shellkit_cli"];

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Multi-line, for a terminal.
    #[default]
    Pretty,
    /// One line per event.
    Compact,
    /// One JSON object per event.
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Level for the ShellKit crates.
    pub level: Level,
    pub format: LogFormat,
    /// Include source file and line.
    pub include_location: bool,
    /// Log span enter/close (useful around install and sync).
    pub include_span_events: bool,
    /// Filter directives overriding both `RUST_LOG` and the default,
    /// e.g. `"shellkit_sw::strategy=trace"`.
    pub filter: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Compact,
            include_location: false,
            include_span_events: false,
            filter: None,
        }
    }
}

impl LogConfig {
    /// Debug level with source locations.
    pub fn debug() -> Self {
        Self {
            level: Level::DEBUG,
            format: LogFormat::Pretty,
            include_location: true,
            ..Default::default()
        }
    }

    /// JSON at info level, for log shipping.
    pub fn production() -> Self {
        Self {
            format: LogFormat::Json,
            ..Default::default()
        }
    }

    /// Preset for the command-line flags: `--json` wins over `--verbose`.
    pub fn from_flags(verbose: bool, json: bool) -> Self {
        match (verbose, json) {
            (_, true) => Self::production(),
            (true, false) => Self::debug(),
            (false, false) => Self::default(),
        }
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// Directives used when neither a filter nor `RUST_LOG` is set.
    pub fn default_directives(&self) -> String {
        let level = self.level.to_string().to_lowercase();
        SHELLKIT_TARGETS
            .iter()
            .fold(String::from("warn"), |mut directives, target| {
                directives.push_str(&format!(",{target}={level}"));
                directives
            })
    }

    fn env_filter(&self) -> EnvFilter {
        let fallback = || EnvFilter::new(self.default_directives());
        match &self.filter {
            Some(custom) => EnvFilter::try_new(custom).unwrap_or_else(|_| fallback()),
            None => EnvFilter::try_from_default_env().unwrap_or_else(|_| fallback()),
        }
    }

    fn fmt_layer<S>(&self) -> Box<dyn Layer<S> + Send + Sync>
    where
        S: Subscriber + for<'a> LookupSpan<'a>,
    {
        let span_events = if self.include_span_events {
            FmtSpan::ENTER | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        };

        match self.format {
            LogFormat::Pretty => fmt::layer()
                .pretty()
                .with_file(self.include_location)
                .with_line_number(self.include_location)
                .with_span_events(span_events)
                .boxed(),
            LogFormat::Compact => fmt::layer()
                .compact()
                .with_file(self.include_location)
                .with_line_number(self.include_location)
                .with_span_events(span_events)
                .boxed(),
            LogFormat::Json => fmt::layer()
                .json()
                .with_file(self.include_location)
                .with_line_number(self.include_location)
                .with_span_events(span_events)
                .boxed(),
        }
    }
}

/// Install the global subscriber.
///
/// Returns `false` if one was already installed; the existing one is kept.
pub fn init_logging(config: LogConfig) -> bool {
    tracing_subscriber::registry()
        .with(config.fmt_layer())
        .with(config.env_filter())
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_compact_info() {
        let config = LogConfig::default();
        assert_eq!(config.level, Level::INFO);
        assert_eq!(config.format, LogFormat::Compact);
        assert!(config.filter.is_none());
    }

    #[test]
    fn test_default_directives_scope_shellkit_crates() {
        let directives = LogConfig::debug().default_directives();
        assert!(directives.starts_with("warn,"));
        assert!(directives.contains("shellkit_sw=debug"));
        assert!(directives.contains("shellkit_net=debug"));
        assert!(!directives.contains("reqwest"));
    }

    #[test]
    fn test_from_flags() {
        assert_eq!(LogConfig::from_flags(false, false).format, LogFormat::Compact);

        let verbose = LogConfig::from_flags(true, false);
        assert_eq!(verbose.level, Level::DEBUG);
        assert!(verbose.include_location);

        let json = LogConfig::from_flags(true, true);
        assert_eq!(json.format, LogFormat::Json);
        assert_eq!(json.level, Level::INFO);
    }

    #[test]
    fn test_with_filter() {
        let config = LogConfig::default().with_filter("shellkit_sw::strategy=trace");
        assert_eq!(config.filter.as_deref(), Some("shellkit_sw::strategy=trace"));
    }

    #[test]
    fn test_init_logging_twice_keeps_first() {
        init_logging(LogConfig::default().with_filter("off"));
        assert!(!init_logging(LogConfig::production().with_filter("off")));
    }
}
