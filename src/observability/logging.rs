//! Structured logging configuration.

use crate::config::LoggingSettings;
use crate::{Error, Result};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

const DEFAULT_DIRECTIVE: &str = "info";
const VERBOSE_DIRECTIVE: &str = "debug";

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable multi-line output.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

impl LogFormat {
    /// Parses a format name, case-insensitively. Unknown names yield `None`.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "pretty" | "text" => Some(Self::Pretty),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// Resolved logging configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Output format.
    pub format: LogFormat,
    /// `EnvFilter` directive string.
    pub directive: String,
    /// Append to this file instead of stderr.
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Pretty,
            directive: DEFAULT_DIRECTIVE.to_string(),
            file: None,
        }
    }
}

impl LoggingConfig {
    /// Builds logging configuration from settings.
    ///
    /// The filter directive comes from the first of `SEENSTORE_LOG`,
    /// `RUST_LOG`, `--verbose` (`debug`), the configured level, `info`.
    #[must_use]
    pub fn from_settings(settings: Option<&LoggingSettings>, verbose: bool) -> Self {
        let env_directive = ["SEENSTORE_LOG", "RUST_LOG"]
            .iter()
            .filter_map(|key| std::env::var(key).ok())
            .map(|value| value.trim().to_string())
            .find(|value| !value.is_empty());

        Self::resolve(settings, verbose, env_directive)
    }

    fn resolve(
        settings: Option<&LoggingSettings>,
        verbose: bool,
        env_directive: Option<String>,
    ) -> Self {
        let format = settings
            .and_then(|s| s.format.as_deref())
            .and_then(LogFormat::parse)
            .unwrap_or_default();

        let directive = env_directive.unwrap_or_else(|| {
            if verbose {
                VERBOSE_DIRECTIVE.to_string()
            } else {
                settings
                    .and_then(|s| s.level.clone())
                    .filter(|level| !level.trim().is_empty())
                    .unwrap_or_else(|| DEFAULT_DIRECTIVE.to_string())
            }
        });

        let file = settings
            .and_then(|s| s.file.as_deref())
            .map(str::trim)
            .filter(|path| !path.is_empty())
            .map(PathBuf::from);

        Self {
            format,
            directive,
            file,
        }
    }

    /// Builds the subscriber filter.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the directive does not parse.
    pub fn env_filter(&self) -> Result<EnvFilter> {
        EnvFilter::try_new(&self.directive).map_err(|e| {
            Error::InvalidInput(format!("invalid log filter '{}': {e}", self.directive))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("pretty", Some(LogFormat::Pretty))]
    #[test_case("JSON", Some(LogFormat::Json))]
    #[test_case(" text ", Some(LogFormat::Pretty))]
    #[test_case("xml", None)]
    fn test_log_format_parse(input: &str, expected: Option<LogFormat>) {
        assert_eq!(LogFormat::parse(input), expected);
    }

    #[test]
    fn test_defaults() {
        let config = LoggingConfig::resolve(None, false, None);
        assert_eq!(config, LoggingConfig::default());
    }

    #[test]
    fn test_precedence() {
        let settings = LoggingSettings {
            format: Some("json".to_string()),
            level: Some("warn".to_string()),
            file: Some("/tmp/seenstore.log".to_string()),
        };

        let config = LoggingConfig::resolve(Some(&settings), false, None);
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.directive, "warn");
        assert_eq!(config.file, Some(PathBuf::from("/tmp/seenstore.log")));

        let config = LoggingConfig::resolve(Some(&settings), true, None);
        assert_eq!(config.directive, "debug");

        let config =
            LoggingConfig::resolve(Some(&settings), true, Some("seenstore=trace".to_string()));
        assert_eq!(config.directive, "seenstore=trace");
    }

    #[test]
    fn test_env_filter() {
        assert!(LoggingConfig::default().env_filter().is_ok());

        let config = LoggingConfig {
            directive: "seenstore=notalevel".to_string(),
            ..LoggingConfig::default()
        };
        assert!(matches!(config.env_filter(), Err(Error::InvalidInput(_))));
    }
}
