//! Logging setup.
//!
//! `LOG_FORMAT=json` selects machine-readable output for log
//! aggregation; anything else is compact human output for a terminal.
//! `RUST_LOG` filters as usual and defaults to `info`.

use tracing_subscriber::{fmt, EnvFilter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Text,
}

impl LogFormat {
    pub fn from_env() -> Self {
        Self::parse(std::env::var("LOG_FORMAT").unwrap_or_default().as_str())
    }

    fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Text
        }
    }
}

/// Install the global subscriber for this process. The service name is
/// stamped on the first event so aggregated logs can be told apart when
/// several flightwatch binaries share a sink.
pub fn init_logging(service_name: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match LogFormat::from_env() {
        LogFormat::Json => {
            fmt()
                .json()
                .flatten_event(true)
                .with_current_span(true)
                .with_span_list(false)
                .with_env_filter(filter)
                .init();
        }
        LogFormat::Text => {
            fmt()
                .compact()
                .with_target(true)
                .with_env_filter(filter)
                .init();
        }
    }

    tracing::info!(service = service_name, format = ?LogFormat::from_env(), "logging initialized");
}
