//! Invocation field extraction.
//!
//! Every invocation gets one [`InvocationFields`] mapping, built from the
//! `lambda_runtime` context and the invoked function ARN. The composer builds it
//! once before entering the middleware chain; the tracing middleware turns it
//! into span attributes and the metrics middleware into datapoint dimensions.
//!
//! # Fields
//!
//! - `lambda_arn`: Invoked function ARN
//! - `aws_request_id`: Lambda request ID
//! - `aws_function_name` / `aws_function_version`: From the runtime config
//! - `aws_execution_env`: From `AWS_EXECUTION_ENV`, when set
//! - `log_group_name` / `log_stream_name`: From the runtime config
//! - `function_wrapper_version`: `signalfx-lambda-<version>`
//! - `aws_region` / `aws_account_id`: From the ARN
//! - `aws_function_qualifier` or `event_source_mappings`: From the ARN qualifier
//! - `component`: Always `rust-lambda-wrapper`

use crate::arn::parse_arn;
use crate::constants::{env_vars, fields, COMPONENT_NAME};
use lambda_runtime::Context;
use std::collections::btree_map::{self, BTreeMap};
use std::env;

/// Immutable field mapping describing a single invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvocationFields {
    entries: BTreeMap<&'static str, String>,
}

impl InvocationFields {
    /// Gather fields from the runtime context, reading `AWS_EXECUTION_ENV`
    /// from the process environment.
    pub fn from_context(context: &Context) -> Self {
        let execution_env = env::var(env_vars::AWS_EXECUTION_ENV).ok();
        Self::from_parts(context, execution_env)
    }

    /// Gather fields from the runtime context and an explicit execution
    /// environment value.
    pub fn from_parts(context: &Context, execution_env: Option<String>) -> Self {
        let config = &context.env_config;
        let mut entries = BTreeMap::new();

        entries.insert(fields::LAMBDA_ARN, context.invoked_function_arn.clone());
        entries.insert(fields::REQUEST_ID, context.request_id.clone());
        entries.insert(fields::FUNCTION_NAME, config.function_name.clone());
        entries.insert(fields::FUNCTION_VERSION, config.version.clone());
        entries.insert(fields::LOG_GROUP_NAME, config.log_group.clone());
        entries.insert(fields::LOG_STREAM_NAME, config.log_stream.clone());
        entries.insert(fields::WRAPPER_VERSION, wrapper_version());
        entries.insert(fields::COMPONENT, COMPONENT_NAME.to_string());

        if let Some(execution_env) = execution_env.filter(|value| !value.is_empty()) {
            entries.insert(fields::EXECUTION_ENV, execution_env);
        }

        entries.extend(parse_arn(&context.invoked_function_arn).entries());

        Self { entries }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn function_name(&self) -> &str {
        self.get(fields::FUNCTION_NAME).unwrap_or_default()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, &'static str, String> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<'a> IntoIterator for &'a InvocationFields {
    type Item = (&'a &'static str, &'a String);
    type IntoIter = btree_map::Iter<'a, &'static str, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// Version string reported in the `function_wrapper_version` field.
pub fn wrapper_version() -> String {
    format!("{}-{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
}
