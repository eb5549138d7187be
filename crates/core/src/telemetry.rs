// Telemetry Module
//
// Structured logging setup for Threadline binaries: a tracing-subscriber
// registry with an env-driven filter and a console fmt layer.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Telemetry configuration
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name attached to startup logs
    pub service_name: String,
    /// Whether to enable console logging
    pub enable_console: bool,
    /// Log filter (e.g., "info", "debug", "threadline_core=debug")
    pub log_filter: Option<String>,
    /// Log to stderr so stdout stays free for transcript output
    pub use_stderr: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "threadline".to_string(),
            enable_console: true,
            log_filter: None,
            use_stderr: true,
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `THREADLINE_SERVICE_NAME`: Service name (default: "threadline")
    /// - `RUST_LOG` or `LOG_LEVEL`: Log filter
    pub fn from_env() -> Self {
        Self {
            service_name: std::env::var("THREADLINE_SERVICE_NAME")
                .unwrap_or_else(|_| "threadline".to_string()),
            enable_console: true,
            log_filter: std::env::var("RUST_LOG")
                .ok()
                .or_else(|| std::env::var("LOG_LEVEL").ok()),
            use_stderr: true,
        }
    }

    /// Override the log filter
    pub fn with_log_filter(mut self, filter: impl Into<String>) -> Self {
        self.log_filter = Some(filter.into());
        self
    }

    /// Filter to install. Falls back to "info" when unset or invalid.
    pub fn env_filter(&self) -> EnvFilter {
        self.log_filter
            .as_ref()
            .and_then(|f| EnvFilter::try_new(f).ok())
            .unwrap_or_else(|| EnvFilter::new("info"))
    }
}

/// Install the global tracing subscriber.
///
/// Calling this twice is harmless: the second installation is skipped and
/// reported at debug level.
///
/// ```ignore
/// use threadline_core::telemetry::{init_telemetry, TelemetryConfig};
///
/// init_telemetry(TelemetryConfig::from_env());
/// ```
pub fn init_telemetry(config: TelemetryConfig) {
    let filter = config.env_filter();

    let console_layer = if config.enable_console {
        let layer = tracing_subscriber::fmt::layer().with_target(true);
        Some(if config.use_stderr {
            layer.with_writer(std::io::stderr).with_filter(filter).boxed()
        } else {
            layer.with_filter(filter).boxed()
        })
    } else {
        None
    };

    match tracing_subscriber::registry().with(console_layer).try_init() {
        Ok(()) => tracing::debug!(service = %config.service_name, "Telemetry initialized"),
        Err(e) => tracing::debug!(error = %e, "Tracing subscriber already installed"),
    }
}
