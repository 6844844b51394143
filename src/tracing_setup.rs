//! Logging setup.
//!
//! The station logs through `tracing`. [`init_from_config`] installs one `fmt`
//! layer whose level, format and span-event output come from the
//! `[application]` section of [`AppConfig`]. `RUST_LOG`, when set, replaces the
//! configured level.
//!
//! ```toml
//! [application]
//! log_level = "debug"
//! log_format = "json"      # pretty | compact | json
//! log_span_events = true   # log run, substrate and tracking spans opening and closing
//! ```
//!
//! # Example
//! ```no_run
//! use jv_daq::{config::AppConfig, tracing_setup};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AppConfig::load()?;
//! tracing_setup::init_from_config(&config)?;
//! tracing::info!(instrument = "source-meter", "Station ready");
//! # Ok(())
//! # }
//! ```

use serde::{Deserialize, Serialize};
use std::io::IsTerminal;
use tracing::Level;
use tracing_subscriber::{
    filter::LevelFilter, fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt,
    EnvFilter, Layer,
};

use crate::config::AppConfig;
use crate::error::{AppResult, DaqError};

/// Console log format, selected by `application.log_format`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Multi-line, for a developer terminal
    Pretty,
    /// One line per event, for the lab console
    #[default]
    Compact,
    /// One JSON object per event, for log collection
    Json,
}

/// Logging options resolved from the configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct LogSettings {
    /// Default verbosity when `RUST_LOG` is unset
    pub level: Level,
    /// Output format
    pub format: LogFormat,
    /// Emit an event whenever a span opens or closes
    pub span_events: bool,
    /// Colour the output. Never applied to JSON.
    pub ansi: bool,
}

impl LogSettings {
    /// Settings for `config`. Colour is used only on an interactive stdout.
    pub fn from_config(config: &AppConfig) -> AppResult<Self> {
        let app = &config.application;
        Ok(Self {
            level: parse_level(&app.log_level)?,
            format: app.log_format,
            span_events: app.log_span_events,
            ansi: app.log_format != LogFormat::Json && std::io::stdout().is_terminal(),
        })
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::builder()
            .with_default_directive(LevelFilter::from_level(self.level).into())
            .from_env_lossy()
    }

    fn fmt_span(&self) -> FmtSpan {
        if self.span_events {
            FmtSpan::NEW | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        }
    }
}

/// Install the global subscriber described by `config`.
pub fn init_from_config(config: &AppConfig) -> AppResult<()> {
    init(&LogSettings::from_config(config)?)
}

/// Install the global subscriber.
///
/// Only the first call in a process takes effect; later calls return `Ok`
/// and leave the installed subscriber alone.
pub fn init(settings: &LogSettings) -> AppResult<()> {
    let base = tracing_subscriber::fmt::layer().with_span_events(settings.fmt_span());
    let layer = match settings.format {
        LogFormat::Pretty => base.pretty().with_ansi(settings.ansi).boxed(),
        LogFormat::Compact => base.compact().with_ansi(settings.ansi).boxed(),
        LogFormat::Json => base.json().with_ansi(false).boxed(),
    };

    match tracing_subscriber::registry()
        .with(layer.with_filter(settings.filter()))
        .try_init()
    {
        Ok(()) => Ok(()),
        Err(e) if e.to_string().contains("already been set") => Ok(()),
        Err(e) => Err(DaqError::Logging(e.to_string())),
    }
}

/// Level named by `value`, case-insensitively.
pub fn parse_level(value: &str) -> AppResult<Level> {
    const NAMES: [(&str, Level); 5] = [
        ("trace", Level::TRACE),
        ("debug", Level::DEBUG),
        ("info", Level::INFO),
        ("warn", Level::WARN),
        ("error", Level::ERROR),
    ];
    NAMES
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(value.trim()))
        .map(|(_, level)| *level)
        .ok_or_else(|| {
            DaqError::Validation(format!(
                "unknown log level '{value}', expected trace, debug, info, warn or error"
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ApplicationConfig;

    #[test]
    fn level_names_are_case_insensitive() {
        assert_eq!(parse_level("Debug").unwrap(), Level::DEBUG);
        assert_eq!(parse_level(" WARN ").unwrap(), Level::WARN);
        assert!(matches!(parse_level("3"), Err(DaqError::Validation(_))));
        assert!(parse_level("verbose").is_err());
    }

    #[test]
    fn settings_follow_application_section() {
        let mut config = AppConfig::default();
        config.application.log_level = "trace".to_string();
        config.application.log_format = LogFormat::Json;
        config.application.log_span_events = true;

        let settings = LogSettings::from_config(&config).unwrap();
        assert_eq!(settings.level, Level::TRACE);
        assert_eq!(settings.format, LogFormat::Json);
        assert!(!settings.ansi);
        assert_eq!(settings.fmt_span(), FmtSpan::NEW | FmtSpan::CLOSE);

        config.application.log_level = "loud".to_string();
        assert!(LogSettings::from_config(&config).is_err());
    }

    #[test]
    fn log_format_names_in_config() {
        let app: ApplicationConfig = toml::from_str(r#"log_format = "pretty""#).unwrap();
        assert_eq!(app.log_format, LogFormat::Pretty);
        assert!(!app.log_span_events);
        assert_eq!(ApplicationConfig::default().log_format, LogFormat::Compact);
    }

    #[test]
    fn second_init_is_ignored() {
        let settings = LogSettings {
            level: Level::ERROR,
            format: LogFormat::Compact,
            span_events: false,
            ansi: false,
        };
        assert!(init(&settings).is_ok());
        let json = LogSettings {
            format: LogFormat::Json,
            ..settings
        };
        assert!(init(&json).is_ok());
    }
}
