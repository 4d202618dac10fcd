//! Constants for the signalfx-lambda package.
//!
//! This file centralizes environment variable names, defaults and field keys so
//! the tracing and metrics middleware agree on a single set of names.

/// Environment variable names for configuration.
pub mod env_vars {
    /// Access token sent as `X-SF-Token` on both ingest paths.
    pub const ACCESS_TOKEN: &str = "SIGNALFX_ACCESS_TOKEN";

    /// Shared ingest base URL, used when a more specific URL is not set.
    pub const ENDPOINT_URL: &str = "SIGNALFX_ENDPOINT_URL";

    /// Metrics ingest base URL.
    pub const METRICS_URL: &str = "SIGNALFX_METRICS_URL";

    /// Trace ingest URL.
    pub const TRACING_URL: &str = "SIGNALFX_TRACING_URL";

    /// Service name for spans (falls back to the function name).
    pub const SERVICE_NAME: &str = "SIGNALFX_SERVICE_NAME";

    /// Prefix prepended to the function name to form the span name.
    pub const SPAN_PREFIX: &str = "SIGNALFX_SPAN_PREFIX";

    /// Metrics send timeout in seconds.
    pub const SEND_TIMEOUT: &str = "SIGNALFX_SEND_TIMEOUT";

    /// Set to "false" or "0" to disable the tracing middleware.
    pub const TRACING_ENABLED: &str = "SIGNALFX_TRACING_ENABLED";

    /// Set to "false" or "0" to disable the metrics middleware.
    pub const METRICS_ENABLED: &str = "SIGNALFX_METRICS_ENABLED";

    /// Execution environment reported by the Lambda service.
    pub const AWS_EXECUTION_ENV: &str = "AWS_EXECUTION_ENV";

    /// Log filter directives, preferred over the Lambda log level.
    pub const RUST_LOG: &str = "RUST_LOG";

    /// Log level configured on the function.
    pub const LAMBDA_LOG_LEVEL: &str = "AWS_LAMBDA_LOG_LEVEL";

    /// Log format configured on the function (`Text` or `JSON`).
    pub const LAMBDA_LOG_FORMAT: &str = "AWS_LAMBDA_LOG_FORMAT";
}

/// Default values for configuration parameters.
pub mod defaults {
    /// Default metrics ingest base URL.
    pub const METRICS_URL: &str = "https://ingest.signalfx.com";

    /// Default OTLP/HTTP trace ingest URL.
    pub const TRACING_URL: &str = "https://ingest.signalfx.com/v2/trace/otlp";

    /// Default span name prefix.
    pub const SPAN_PREFIX: &str = "lambda_rust_";

    /// Minimum metrics send timeout, in seconds.
    pub const SEND_TIMEOUT_FLOOR_SECS: u64 = 1;
}

/// Keys of the invocation field mapping shared by spans and datapoints.
pub mod fields {
    pub const LAMBDA_ARN: &str = "lambda_arn";
    pub const REQUEST_ID: &str = "aws_request_id";
    pub const FUNCTION_NAME: &str = "aws_function_name";
    pub const FUNCTION_VERSION: &str = "aws_function_version";
    pub const EXECUTION_ENV: &str = "aws_execution_env";
    pub const LOG_GROUP_NAME: &str = "log_group_name";
    pub const LOG_STREAM_NAME: &str = "log_stream_name";
    pub const WRAPPER_VERSION: &str = "function_wrapper_version";
    pub const REGION: &str = "aws_region";
    pub const ACCOUNT_ID: &str = "aws_account_id";
    pub const FUNCTION_QUALIFIER: &str = "aws_function_qualifier";
    pub const EVENT_SOURCE_MAPPINGS: &str = "event_source_mappings";
    pub const COMPONENT: &str = "component";

    /// Dimension attached to every datapoint identifying the emitter.
    pub const METRIC_SOURCE: &str = "metric_source";
}

/// Value of the `component` field and the `metric_source` dimension.
pub const COMPONENT_NAME: &str = "rust-lambda-wrapper";

/// Header carrying the access token on ingest requests.
pub const TOKEN_HEADER: &str = "X-SF-Token";

/// Metric names emitted once per invocation.
pub mod metric_names {
    pub const INVOCATIONS: &str = "function.invocations";
    pub const COLD_STARTS: &str = "function.cold_starts";
    pub const ERRORS: &str = "function.errors";
    pub const DURATION: &str = "function.duration";
}
