//! Logging Setup
//!
//! Installs a `tracing-subscriber` registry with an `EnvFilter` and a fmt
//! layer.
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: filter directives (default `market_feed=info`)
//! - `LOG_FORMAT`: `json` for one JSON object per line, anything else for
//!   human-readable output
//!
//! # Usage
//!
//! ```ignore
//! use market_feed::infrastructure::telemetry;
//!
//! let _guard = telemetry::init();
//! tracing::info!("Started");
//! ```

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Default filter directive.
const DEFAULT_DIRECTIVE: &str = "market_feed=info";

/// Held by `main` for the lifetime of the process.
#[derive(Debug)]
pub struct TelemetryGuard {
    service_name: String,
}

impl TelemetryGuard {
    /// Service name logged at startup.
    #[must_use]
    pub fn service_name(&self) -> &str {
        &self.service_name
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        tracing::debug!(service = %self.service_name, "Telemetry shut down");
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

impl LogFormat {
    /// Parse a format name; anything but `json` is pretty.
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Self {
        if s.eq_ignore_ascii_case("json") {
            Self::Json
        } else {
            Self::Pretty
        }
    }
}

/// Telemetry configuration.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Output format.
    pub format: LogFormat,
    /// Service name recorded in the startup line.
    pub service_name: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            service_name: env!("CARGO_PKG_NAME").to_string(),
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let format = std::env::var("LOG_FORMAT")
            .map(|v| LogFormat::from_str_case_insensitive(&v))
            .unwrap_or_default();

        Self {
            format,
            ..Self::default()
        }
    }
}

/// Filter from `RUST_LOG`, falling back to `market_feed=info`.
#[must_use]
pub fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE))
}

/// Initialize logging with configuration from the environment.
///
/// Returns a guard that must be kept alive for the duration of the program.
#[must_use]
pub fn init() -> TelemetryGuard {
    init_with_config(TelemetryConfig::from_env())
}

/// Initialize logging with custom configuration.
///
/// Does nothing beyond returning a guard if a global subscriber is already
/// installed.
#[must_use]
pub fn init_with_config(config: TelemetryConfig) -> TelemetryGuard {
    let registry = tracing_subscriber::registry().with(env_filter());

    let result = match config.format {
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_current_span(false),
            )
            .try_init(),
        LogFormat::Pretty => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .try_init(),
    };

    if let Err(e) = result {
        eprintln!("Logging already initialized: {e}");
    }

    TelemetryGuard {
        service_name: config.service_name,
    }
}

// =============================================================================
// Tests
// =============================================================================
