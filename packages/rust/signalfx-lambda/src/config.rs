//! Wrapper configuration.
//!
//! [`WrapperConfig`] holds everything the tracing and metrics collaborators
//! need at construction time and [`HandlerOptions`] selects which middleware
//! wraps the handler. Both can be built explicitly or read from the
//! environment:
//!
//! | Variable | Effect | Default |
//! |---|---|---|
//! | `SIGNALFX_ACCESS_TOKEN` | `X-SF-Token` header on both ingest paths | none |
//! | `SIGNALFX_TRACING_URL` | Trace ingest URL | `SIGNALFX_ENDPOINT_URL`, then `https://ingest.signalfx.com/v2/trace/otlp` |
//! | `SIGNALFX_METRICS_URL` | Datapoint ingest base URL | `SIGNALFX_ENDPOINT_URL`, then `https://ingest.signalfx.com` |
//! | `SIGNALFX_SERVICE_NAME` | Trace service name | function name |
//! | `SIGNALFX_SPAN_PREFIX` | Span name prefix | `lambda_rust_` |
//! | `SIGNALFX_SEND_TIMEOUT` | Metrics send timeout in seconds | 1 (also the minimum) |
//! | `SIGNALFX_TRACING_ENABLED` | `false`/`0` disables tracing | enabled |
//! | `SIGNALFX_METRICS_ENABLED` | `false`/`0` disables metrics | enabled |
//!
//! Empty values are treated as unset.

use crate::constants::{defaults, env_vars};
use bon::Builder;
use std::env;
use std::time::Duration;

/// Construction parameters for the tracing and metrics collaborators.
///
/// # Examples
///
/// ```
/// use signalfx_lambda::WrapperConfig;
/// use std::time::Duration;
///
/// let config = WrapperConfig::builder()
///     .access_token("my-token")
///     .metrics_endpoint("https://ingest.us1.signalfx.com")
///     .send_timeout(Duration::from_secs(3))
///     .build();
///
/// assert_eq!(config.span_prefix, "lambda_rust_");
/// ```
#[derive(Builder, Debug, Clone, PartialEq, Eq)]
pub struct WrapperConfig {
    /// Sent as `X-SF-Token` when present.
    #[builder(into)]
    pub access_token: Option<String>,

    /// Base URL of the datapoint ingest API, without the `/v2/datapoint` path.
    #[builder(into, default = defaults::METRICS_URL.to_string())]
    pub metrics_endpoint: String,

    /// Full OTLP/HTTP trace ingest URL.
    #[builder(into, default = defaults::TRACING_URL.to_string())]
    pub tracing_endpoint: String,

    /// Service name on spans. The function name is used when unset.
    #[builder(into)]
    pub service_name: Option<String>,

    #[builder(into, default = defaults::SPAN_PREFIX.to_string())]
    pub span_prefix: String,

    /// Raised to one second if lower.
    #[builder(default = Duration::from_secs(defaults::SEND_TIMEOUT_FLOOR_SECS))]
    pub send_timeout: Duration,
}

impl Default for WrapperConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl WrapperConfig {
    /// Read the configuration from `SIGNALFX_*` environment variables.
    pub fn from_env() -> Self {
        let shared_endpoint = env_value(env_vars::ENDPOINT_URL);

        let metrics_endpoint = env_value(env_vars::METRICS_URL)
            .or_else(|| shared_endpoint.clone())
            .unwrap_or_else(|| defaults::METRICS_URL.to_string());
        let tracing_endpoint = env_value(env_vars::TRACING_URL)
            .or(shared_endpoint)
            .unwrap_or_else(|| defaults::TRACING_URL.to_string());

        let send_timeout_secs = env_value(env_vars::SEND_TIMEOUT)
            .and_then(|value| value.trim().parse::<u64>().ok())
            .unwrap_or(0)
            .max(defaults::SEND_TIMEOUT_FLOOR_SECS);

        Self {
            access_token: env_value(env_vars::ACCESS_TOKEN),
            metrics_endpoint,
            tracing_endpoint,
            service_name: env_value(env_vars::SERVICE_NAME),
            span_prefix: env_value(env_vars::SPAN_PREFIX)
                .unwrap_or_else(|| defaults::SPAN_PREFIX.to_string()),
            send_timeout: Duration::from_secs(send_timeout_secs),
        }
    }

    /// Service name for spans, falling back to `function_name`.
    pub fn service_name_or<'a>(&'a self, function_name: &'a str) -> &'a str {
        self.service_name.as_deref().unwrap_or(function_name)
    }

    /// Send timeout with the one second floor applied.
    pub fn effective_send_timeout(&self) -> Duration {
        self.send_timeout
            .max(Duration::from_secs(defaults::SEND_TIMEOUT_FLOOR_SECS))
    }
}

/// Middleware enabled for a registered handler. Both default to on.
#[derive(Builder, Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerOptions {
    #[builder(default = true)]
    pub tracing: bool,

    #[builder(default = true)]
    pub metrics: bool,
}

impl Default for HandlerOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl HandlerOptions {
    /// Read `SIGNALFX_TRACING_ENABLED` and `SIGNALFX_METRICS_ENABLED`.
    pub fn from_env() -> Self {
        Self {
            tracing: env_flag(env_vars::TRACING_ENABLED),
            metrics: env_flag(env_vars::METRICS_ENABLED),
        }
    }
}

fn env_value(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

fn env_flag(name: &str) -> bool {
    match env_value(name) {
        Some(value) => !matches!(value.trim().to_ascii_lowercase().as_str(), "false" | "0"),
        None => true,
    }
}
