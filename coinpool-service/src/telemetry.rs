//! tracing-subscriber setup.
//!
//! Logs go to stderr so stdout carries only protocol output.

use coinpool_core::constants::ENV_LOG_FORMAT;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::{ServiceError, ServiceResult};

const DEFAULT_FILTER: &str = "coinpool_selection=info,coinpool_storage=info,coinpool_service=info,warn";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Plain,
}

#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub format: LogFormat,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        let format = match std::env::var(ENV_LOG_FORMAT) {
            Ok(raw) if raw.eq_ignore_ascii_case("plain") => LogFormat::Plain,
            _ => LogFormat::Json,
        };
        Self { format }
    }
}

/// Install the global subscriber. `RUST_LOG` overrides the default filter.
pub fn init_tracing(config: &TelemetryConfig) -> ServiceResult<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let registry = tracing_subscriber::registry().with(env_filter);

    let result = match config.format {
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .try_init(),
        LogFormat::Plain => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init(),
    };
    result.map_err(|e| ServiceError::Telemetry(e.to_string()))
}
