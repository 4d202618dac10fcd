//! SignalFx tracing and metrics for AWS Lambda functions.
//!
//! This crate wraps a Lambda handler with two middleware:
//!
//! - **Tracing**: one server span per invocation, continuing a B3 trace found in
//!   the event headers, exported over OTLP/HTTP to SignalFx and flushed before
//!   the invocation returns
//! - **Metrics**: invocation, cold start, error and duration datapoints sent to
//!   the SignalFx datapoint API once per invocation
//!
//! Both are created lazily on the first invocation and shared afterwards.
//!
//! # Architecture
//!
//! - [`Wrapper`]: handler registration and invocation, usable directly as a
//!   `tower::Service` by `lambda_runtime`
//! - [`Middleware`] and [`Next`]: the chain wrapped around the handler
//! - [`InvocationFields`]: per-invocation identity computed from the Lambda
//!   context and shared by spans and datapoints
//! - [`TracingMiddleware`] and [`TracerState`]: span lifecycle and export
//! - [`MetricsMiddleware`] and [`SignalFxClient`]: datapoint collection and send
//! - [`B3Propagator`]: B3 header decoding and injection
//!
//! # Quick Start
//!
//! ```no_run
//! use lambda_runtime::{Error, LambdaEvent};
//! use serde_json::{json, Value};
//! use signalfx_lambda::{init_logging, HandlerOptions, Wrapper};
//!
//! async fn handler(event: LambdaEvent<Value>) -> Result<Value, Error> {
//!     Ok(json!({ "statusCode": 200, "body": event.payload }))
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Error> {
//!     init_logging()?;
//!
//!     let wrapper = Wrapper::from_env();
//!     wrapper.register_handler(HandlerOptions::from_env(), handler);
//!     lambda_runtime::run(wrapper).await
//! }
//! ```
//!
//! # Configuration
//!
//! See [`WrapperConfig`] for the `SIGNALFX_*` environment variables.

mod arn;
mod client;
mod config;
pub mod constants;
mod error;
mod fields;
mod logging;
mod metrics;
mod middleware;
mod propagation;
mod tracer;
mod wrapper;

pub use arn::{parse_arn, ArnFields, Qualifier};
pub use client::{Datapoint, DatapointBatch, DatapointValue, MetricsClient, SignalFxClient};
pub use config::{HandlerOptions, WrapperConfig};
pub use error::TelemetryError;
pub use fields::{wrapper_version, InvocationFields};
pub use logging::init_logging;
pub use metrics::{
    default_client_factory, dimensions, ClientCell, ClientFactory, MetricsMiddleware,
};
pub use middleware::{Handler, HandlerFn, Middleware, Next};
pub use propagation::{
    carrier_from_event, decode, decode_event, B3Carrier, B3Propagator, B3Variant, SpanContext,
};
pub use tracer::{default_tracer_factory, TracerFactory, TracerState, TracingMiddleware};
pub use wrapper::Wrapper;

#[cfg(doctest)]
#[macro_use]
extern crate doc_comment;

#[cfg(doctest)]
use doc_comment::doctest;

#[cfg(doctest)]
doctest!("../README.md", readme);
