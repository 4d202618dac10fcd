//! Process logging for wrapped functions.
//!
//! Installs a `tracing` subscriber that writes to stdout, where the Lambda
//! service picks it up. The level filter is read from `RUST_LOG` when set and
//! from `AWS_LAMBDA_LOG_LEVEL` otherwise. Output is JSON when the function's
//! log format is configured as `JSON`.

use crate::constants::env_vars;
use std::env;
use tracing::subscriber::SetGlobalDefaultError;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;

/// Install the global log subscriber.
///
/// Fails if a global subscriber is already installed.
pub fn init_logging() -> Result<(), SetGlobalDefaultError> {
    let env_var_name = if env::var(env_vars::RUST_LOG).is_ok() {
        env_vars::RUST_LOG
    } else {
        env_vars::LAMBDA_LOG_LEVEL
    };

    let env_filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .with_env_var(env_var_name)
        .from_env_lossy();

    let subscriber = tracing_subscriber::registry::Registry::default().with(env_filter);

    if is_json_format() {
        tracing::subscriber::set_global_default(
            subscriber.with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .without_time()
                    .json(),
            ),
        )
    } else {
        tracing::subscriber::set_global_default(
            subscriber.with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .without_time()
                    .with_ansi(false),
            ),
        )
    }
}

fn is_json_format() -> bool {
    env::var(env_vars::LAMBDA_LOG_FORMAT)
        .unwrap_or_default()
        .to_uppercase()
        == "JSON"
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_log_format_detection() {
        env::remove_var(env_vars::LAMBDA_LOG_FORMAT);
        assert!(!is_json_format());

        env::set_var(env_vars::LAMBDA_LOG_FORMAT, "json");
        assert!(is_json_format());

        env::set_var(env_vars::LAMBDA_LOG_FORMAT, "Text");
        assert!(!is_json_format());

        env::remove_var(env_vars::LAMBDA_LOG_FORMAT);
    }

    #[test]
    #[serial]
    fn test_init_logging_only_once() {
        let _ = init_logging();
        assert!(init_logging().is_err());
    }
}
