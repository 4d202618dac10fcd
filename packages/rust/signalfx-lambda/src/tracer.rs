//! Tracing middleware.
//!
//! Every invocation runs inside a `Server` span named `<prefix><function name>`
//! and tagged with the invocation fields. The span continues a B3 context
//! carried in the event headers when there is one and starts a new trace
//! otherwise.
//!
//! # Tracer lifecycle
//!
//! The tracer provider is built on the first invocation only, from the
//! [`WrapperConfig`] and the function name, and reused for the lifetime of the
//! process. Spans go through a batch processor to an OTLP/HTTP exporter that
//! sends the access token as `X-SF-Token`.
//!
//! # Span lifecycle
//!
//! The span is the current span of the [`Context`] the rest of the chain runs
//! in, so handlers can start child spans from `Context::current()`. It is owned
//! by a guard that ends it and force-flushes the provider when dropped, so
//! spans are exported before the invocation returns no matter how the chain
//! exits:
//!
//! - success: the response `statusCode`, if any, becomes `http.status_code`
//! - error: the span gets `error=true`, an `error` event carrying the message
//!   and an error status; the error is returned unchanged
//! - panic or cancellation: the span is tagged as errored
//!
//! Flush failures are logged and never change the invocation outcome.

use crate::config::WrapperConfig;
use crate::constants::TOKEN_HEADER;
use crate::error::TelemetryError;
use crate::fields::InvocationFields;
use crate::middleware::{Middleware, Next};
use crate::propagation::decode_event;
use async_trait::async_trait;
use lambda_runtime::{Error, LambdaEvent};
use opentelemetry::{
    trace::{FutureExt as _, SpanKind, Status, TraceContextExt, Tracer as _, TracerProvider as _},
    Context, InstrumentationScope, KeyValue,
};
use opentelemetry_otlp::{Protocol, WithExportConfig, WithHttpConfig};
use opentelemetry_sdk::{
    trace::{SdkTracerProvider, Tracer},
    Resource,
};
use serde_json::Value;
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

/// Builds the process-wide tracer state from the configuration and the
/// function name of the first invocation.
pub type TracerFactory = Arc<dyn Fn(&WrapperConfig, &str) -> TracerState + Send + Sync>;

/// Tracer provider and tracer shared by all invocations of the process.
#[derive(Clone)]
pub struct TracerState {
    provider: SdkTracerProvider,
    tracer: Tracer,
    span_prefix: String,
}

impl fmt::Debug for TracerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TracerState")
            .field("span_prefix", &self.span_prefix)
            .finish_non_exhaustive()
    }
}

impl TracerState {
    /// Wrap an already configured provider.
    pub fn new(provider: SdkTracerProvider, span_prefix: impl Into<String>) -> Self {
        let scope = InstrumentationScope::builder(env!("CARGO_PKG_NAME"))
            .with_version(Cow::Borrowed(env!("CARGO_PKG_VERSION")))
            .build();
        let tracer = provider.tracer_with_scope(scope);

        Self {
            provider,
            tracer,
            span_prefix: span_prefix.into(),
        }
    }

    /// Build a provider exporting to the configured trace endpoint.
    ///
    /// If the exporter cannot be built the state falls back to a provider
    /// without exporter, so invocations still run.
    pub fn from_config(config: &WrapperConfig, function_name: &str) -> Self {
        let resource = Resource::builder()
            .with_service_name(config.service_name_or(function_name).to_string())
            .build();

        let provider = match build_exporter(config) {
            Ok(exporter) => SdkTracerProvider::builder()
                .with_batch_exporter(exporter)
                .with_resource(resource)
                .build(),
            Err(err) => {
                tracing::warn!(error = %err, "Falling back to a tracer without exporter");
                SdkTracerProvider::builder().with_resource(resource).build()
            }
        };

        tracing::debug!(
            endpoint = %config.tracing_endpoint,
            service_name = config.service_name_or(function_name),
            "Tracer initialized"
        );
        Self::new(provider, config.span_prefix.clone())
    }

    pub fn tracer(&self) -> &Tracer {
        &self.tracer
    }

    pub fn provider(&self) -> &SdkTracerProvider {
        &self.provider
    }

    pub fn span_name(&self, function_name: &str) -> String {
        format!("{}{}", self.span_prefix, function_name)
    }

    /// Export every finished span before returning.
    pub fn flush(&self) -> Result<(), TelemetryError> {
        self.provider
            .force_flush()
            .map_err(|err| TelemetryError::Flush(format!("{err:?}")))
    }
}

fn build_exporter(
    config: &WrapperConfig,
) -> Result<opentelemetry_otlp::SpanExporter, TelemetryError> {
    let mut headers = HashMap::new();
    if let Some(token) = config.access_token.as_ref().filter(|token| !token.is_empty()) {
        headers.insert(TOKEN_HEADER.to_string(), token.clone());
    }

    opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_protocol(Protocol::HttpBinary)
        .with_endpoint(config.tracing_endpoint.clone())
        .with_headers(headers)
        .build()
        .map_err(|err| TelemetryError::Exporter(err.to_string()))
}

/// Default [`TracerFactory`], backed by [`TracerState::from_config`].
pub fn default_tracer_factory() -> TracerFactory {
    Arc::new(TracerState::from_config)
}

/// Middleware running each invocation inside a server span.
pub struct TracingMiddleware {
    config: WrapperConfig,
    state: Arc<OnceLock<TracerState>>,
    factory: TracerFactory,
}

impl TracingMiddleware {
    pub fn new(
        config: WrapperConfig,
        state: Arc<OnceLock<TracerState>>,
        factory: TracerFactory,
    ) -> Self {
        Self {
            config,
            state,
            factory,
        }
    }

    fn state(&self, function_name: &str) -> &TracerState {
        self.state
            .get_or_init(|| (self.factory)(&self.config, function_name))
    }
}

#[async_trait]
impl Middleware for TracingMiddleware {
    async fn invoke(
        &self,
        event: LambdaEvent<Value>,
        fields: &InvocationFields,
        next: Next<'_>,
    ) -> Result<Value, Error> {
        let state = self.state(fields.function_name());

        let parent_cx = decode_event(&event.payload)
            .map(|context| context.to_parent_context())
            .unwrap_or_else(Context::new);

        let attributes: Vec<KeyValue> = fields
            .iter()
            .map(|(key, value)| KeyValue::new(*key, value.clone()))
            .collect();

        let span = state
            .tracer()
            .span_builder(state.span_name(fields.function_name()))
            .with_kind(SpanKind::Server)
            .with_attributes(attributes)
            .start_with_context(state.tracer(), &parent_cx);
        let mut active = ActiveSpan::new(parent_cx.with_span(span), state);

        let result = next
            .run(event, fields)
            .with_context(active.context().clone())
            .await;
        match &result {
            Ok(response) => active.record_response(response),
            Err(err) => active.record_error(&err.to_string()),
        }
        result
    }
}

/// Holds the context carrying the invocation span. Ends the span and flushes
/// the provider on drop.
struct ActiveSpan<'a> {
    cx: Context,
    state: &'a TracerState,
    completed: bool,
}

impl<'a> ActiveSpan<'a> {
    fn new(cx: Context, state: &'a TracerState) -> Self {
        Self {
            cx,
            state,
            completed: false,
        }
    }

    fn context(&self) -> &Context {
        &self.cx
    }

    fn record_response(&mut self, response: &Value) {
        self.completed = true;
        if let Some(status) = response.get("statusCode").and_then(status_code_attribute) {
            self.cx.span().set_attribute(status);
        }
    }

    fn record_error(&mut self, message: &str) {
        self.completed = true;
        self.mark_error(message.to_string());
    }

    fn mark_error(&self, message: String) {
        let span = self.cx.span();
        span.set_attribute(KeyValue::new("error", true));
        span.add_event("error", vec![KeyValue::new("message", message.clone())]);
        span.set_status(Status::error(message));
    }
}

impl Drop for ActiveSpan<'_> {
    fn drop(&mut self) {
        if !self.completed {
            let reason = if std::thread::panicking() {
                "handler panicked"
            } else {
                "invocation did not complete"
            };
            self.mark_error(reason.to_string());
        }

        self.cx.span().end();
        if let Err(err) = self.state.flush() {
            tracing::warn!(error = %err, "Error flushing spans");
        }
    }
}

fn status_code_attribute(value: &Value) -> Option<KeyValue> {
    match value {
        Value::Number(number) => number
            .as_i64()
            .map(|code| KeyValue::new("http.status_code", code)),
        Value::String(code) => Some(KeyValue::new("http.status_code", code.clone())),
        _ => None,
    }
}
