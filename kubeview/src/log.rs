//! Configures the global default tracing subscriber

use thiserror::Error;

pub use tracing_subscriber::{util::TryInitError as LogInitError, EnvFilter as LogFilter};

/// The environment variable consulted for the log filter
pub const LOG_ENV: &str = "KUBEVIEW_LOG";

/// The filter used when none is configured
pub const DEFAULT_FILTER: &str = "kubeview=info,warn";

/// Configures whether logs should be emitted in plaintext (the default) or as JSON-encoded
/// messages
#[derive(Clone, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    /// The default plaintext format
    #[default]
    Plain,

    /// The JSON-encoded format
    Json,
}

/// Indicates that an invalid log format was specified
#[derive(Debug, Error)]
#[error("invalid log format: {0} must be 'plain' or 'json'")]
pub struct InvalidLogFormat(String);

// === impl LogFormat ===

impl std::str::FromStr for LogFormat {
    type Err = InvalidLogFormat;

    fn from_str(s: &str) -> Result<Self, InvalidLogFormat> {
        match s {
            "json" => Ok(LogFormat::Json),
            "plain" => Ok(LogFormat::Plain),
            s => Err(InvalidLogFormat(s.to_string())),
        }
    }
}

impl LogFormat {
    /// Attempts to configure the global default tracing subscriber in the current scope, returning
    /// an error if one is already set
    pub fn try_init(self, filter: LogFilter) -> Result<(), LogInitError> {
        use tracing_subscriber::prelude::*;

        let registry = tracing_subscriber::registry().with(filter);

        match self {
            LogFormat::Plain => registry.with(tracing_subscriber::fmt::layer()).try_init()?,

            LogFormat::Json => {
                let event_fmt = tracing_subscriber::fmt::format()
                    .json()
                    // Output the current span context as a JSON list.
                    .with_span_list(true)
                    // The span list already carries the current span.
                    .with_current_span(false);

                let fmt = tracing_subscriber::fmt::layer()
                    .event_format(event_fmt)
                    .fmt_fields(tracing_subscriber::fmt::format::JsonFields::default());

                registry.with(fmt).try_init()?
            }
        };

        Ok(())
    }
}

/// Builds a filter from `KUBEVIEW_LOG`, falling back to the default filter
pub fn filter_from_env() -> LogFilter {
    LogFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| LogFilter::new(DEFAULT_FILTER))
}
