//! Handler registration and invocation.
//!
//! [`Wrapper`] owns the process-wide telemetry state and the composed chain.
//! A handler is registered once, with the middleware selected by
//! [`HandlerOptions`], and every invocation then:
//!
//! 1. computes the [`InvocationFields`] from the Lambda context
//! 2. runs metrics (outermost), then tracing, then the handler
//!
//! The tracer and the metrics client are created lazily by the first
//! invocation and shared by all later ones.
//!
//! # Example
//!
//! ```no_run
//! use lambda_runtime::{Error, LambdaEvent};
//! use serde_json::{json, Value};
//! use signalfx_lambda::{HandlerOptions, Wrapper};
//!
//! async fn handler(event: LambdaEvent<Value>) -> Result<Value, Error> {
//!     Ok(json!({ "statusCode": 200, "body": event.context.request_id }))
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Error> {
//!     let wrapper = Wrapper::from_env();
//!     wrapper.register_handler(HandlerOptions::default(), handler);
//!     lambda_runtime::run(wrapper).await
//! }
//! ```

use crate::config::{HandlerOptions, WrapperConfig};
use crate::fields::InvocationFields;
use crate::metrics::{default_client_factory, ClientCell, ClientFactory, MetricsMiddleware};
use crate::middleware::{Handler, HandlerFn, Middleware, Next};
use crate::tracer::{default_tracer_factory, TracerFactory, TracerState, TracingMiddleware};
use futures_util::future::BoxFuture;
use lambda_runtime::{Error, LambdaEvent};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::future::Future;
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll};
use tower::Service;

struct Chain {
    middlewares: Vec<Arc<dyn Middleware>>,
    handler: Box<dyn Handler>,
}

struct Inner {
    config: WrapperConfig,
    chain: OnceLock<Chain>,
    tracer: Arc<OnceLock<TracerState>>,
    metrics_client: Arc<ClientCell>,
    tracer_factory: TracerFactory,
    client_factory: ClientFactory,
}

/// Composes the telemetry middleware around a registered handler.
///
/// Cloning is cheap and clones share the registration and telemetry state.
#[derive(Clone)]
pub struct Wrapper {
    inner: Arc<Inner>,
}

impl Default for Wrapper {
    fn default() -> Self {
        Self::new(WrapperConfig::default())
    }
}

impl Wrapper {
    pub fn new(config: WrapperConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                chain: OnceLock::new(),
                tracer: Arc::new(OnceLock::new()),
                metrics_client: Arc::new(OnceLock::new()),
                tracer_factory: default_tracer_factory(),
                client_factory: default_client_factory(),
            }),
        }
    }

    /// Configure from `SIGNALFX_*` environment variables.
    pub fn from_env() -> Self {
        Self::new(WrapperConfig::from_env())
    }

    /// Replace how the tracer is built on the first invocation.
    ///
    /// Only takes effect before the wrapper is cloned or registered. Later
    /// calls keep the current factory and log a warning.
    pub fn with_tracer_factory(mut self, factory: TracerFactory) -> Self {
        match Arc::get_mut(&mut self.inner) {
            Some(inner) => inner.tracer_factory = factory,
            None => tracing::warn!("Wrapper already shared, ignoring tracer factory"),
        }
        self
    }

    /// Replace how the metrics client is built on the first invocation.
    ///
    /// Only takes effect before the wrapper is cloned or registered. Later
    /// calls keep the current factory and log a warning.
    pub fn with_client_factory(mut self, factory: ClientFactory) -> Self {
        match Arc::get_mut(&mut self.inner) {
            Some(inner) => inner.client_factory = factory,
            None => tracing::warn!("Wrapper already shared, ignoring metrics client factory"),
        }
        self
    }

    pub fn config(&self) -> &WrapperConfig {
        &self.inner.config
    }

    /// Register the handler and compose the chain.
    ///
    /// Only the first registration counts; later calls leave the chain
    /// untouched and return `false`.
    pub fn register_handler<F, Fut, T, R>(&self, options: HandlerOptions, handler: F) -> bool
    where
        F: Fn(LambdaEvent<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, Error>> + Send + 'static,
        T: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
    {
        self.register(options, HandlerFn::new(handler))
    }

    /// Register a handler working on raw JSON values.
    pub fn register<H: Handler>(&self, options: HandlerOptions, handler: H) -> bool {
        if self.inner.chain.get().is_some() {
            tracing::debug!("Handler already registered, ignoring");
            return false;
        }

        let chain = Chain {
            middlewares: self.middlewares(options),
            handler: Box::new(handler),
        };
        let registered = self.inner.chain.set(chain).is_ok();
        if registered {
            tracing::debug!(
                tracing = options.tracing,
                metrics = options.metrics,
                "Handler registered"
            );
        }
        registered
    }

    fn middlewares(&self, options: HandlerOptions) -> Vec<Arc<dyn Middleware>> {
        let inner = &self.inner;
        let mut middlewares: Vec<Arc<dyn Middleware>> = Vec::with_capacity(2);
        if options.metrics {
            middlewares.push(Arc::new(MetricsMiddleware::new(
                inner.config.clone(),
                inner.metrics_client.clone(),
                inner.client_factory.clone(),
            )));
        }
        if options.tracing {
            middlewares.push(Arc::new(TracingMiddleware::new(
                inner.config.clone(),
                inner.tracer.clone(),
                inner.tracer_factory.clone(),
            )));
        }
        middlewares
    }

    pub fn is_registered(&self) -> bool {
        self.inner.chain.get().is_some()
    }

    /// Tracer state, once the first traced invocation has created it.
    pub fn tracer_state(&self) -> Option<&TracerState> {
        self.inner.tracer.get()
    }

    /// Run one invocation through the composed chain.
    pub async fn wrapped_handler(&self, event: LambdaEvent<Value>) -> Result<Value, Error> {
        let chain = self
            .inner
            .chain
            .get()
            .ok_or("no handler registered with the signalfx-lambda wrapper")?;

        let fields = InvocationFields::from_context(&event.context);
        Next::new(&chain.middlewares, chain.handler.as_ref())
            .run(event, &fields)
            .await
    }
}

impl Service<LambdaEvent<Value>> for Wrapper {
    type Response = Value;
    type Error = Error;
    type Future = BoxFuture<'static, Result<Value, Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: LambdaEvent<Value>) -> Self::Future {
        let wrapper = self.clone();
        Box::pin(async move { wrapper.wrapped_handler(event).await })
    }
}
