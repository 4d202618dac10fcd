//! Middleware chain around a Lambda handler.
//!
//! A registered handler is wrapped by an ordered list of [`Middleware`]. Each
//! middleware receives the raw JSON event, the [`InvocationFields`] computed
//! for the invocation and a [`Next`] handle that runs the rest of the chain.
//! The first middleware in the list is the outermost one: its code before
//! `next.run(..)` runs first and its code after runs last.
//!
//! ```text
//! metrics ──▶ tracing ──▶ handler
//!    ◀──────────◀───────────┘
//! ```
//!
//! # Writing a middleware
//!
//! ```no_run
//! use async_trait::async_trait;
//! use lambda_runtime::{Error, LambdaEvent};
//! use serde_json::Value;
//! use signalfx_lambda::{InvocationFields, Middleware, Next};
//!
//! struct RequestLogger;
//!
//! #[async_trait]
//! impl Middleware for RequestLogger {
//!     async fn invoke(
//!         &self,
//!         event: LambdaEvent<Value>,
//!         fields: &InvocationFields,
//!         next: Next<'_>,
//!     ) -> Result<Value, Error> {
//!         tracing::info!(function = fields.function_name(), "invocation started");
//!         next.run(event, fields).await
//!     }
//! }
//! ```

use crate::fields::InvocationFields;
use async_trait::async_trait;
use futures_util::future::{self, BoxFuture};
use lambda_runtime::{Error, LambdaEvent};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

/// One link of the chain wrapped around the handler.
#[async_trait]
pub trait Middleware: Send + Sync + 'static {
    /// Handle one invocation, calling `next.run(event, fields)` to continue.
    ///
    /// Returning without calling `next` short-circuits the rest of the chain.
    async fn invoke(
        &self,
        event: LambdaEvent<Value>,
        fields: &InvocationFields,
        next: Next<'_>,
    ) -> Result<Value, Error>;
}

/// Innermost link of the chain, operating on raw JSON values.
pub trait Handler: Send + Sync + 'static {
    fn call(&self, event: LambdaEvent<Value>) -> BoxFuture<'_, Result<Value, Error>>;
}

/// Remaining middleware plus the handler at the end of the chain.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    middlewares: &'a [Arc<dyn Middleware>],
    handler: &'a dyn Handler,
}

impl<'a> Next<'a> {
    pub fn new(middlewares: &'a [Arc<dyn Middleware>], handler: &'a dyn Handler) -> Self {
        Self {
            middlewares,
            handler,
        }
    }

    /// Run the rest of the chain.
    pub fn run(
        mut self,
        event: LambdaEvent<Value>,
        fields: &'a InvocationFields,
    ) -> BoxFuture<'a, Result<Value, Error>> {
        match self.middlewares.split_first() {
            Some((current, rest)) => {
                self.middlewares = rest;
                current.invoke(event, fields, self)
            }
            None => self.handler.call(event),
        }
    }

    /// Number of middleware still to run before the handler.
    pub fn remaining(&self) -> usize {
        self.middlewares.len()
    }
}

/// Adapts a typed `async fn(LambdaEvent<T>) -> Result<R, Error>` into a
/// [`Handler`].
///
/// The event payload is deserialized into `T` before the call and the
/// response is serialized back into JSON afterwards. Either conversion failing
/// is reported as a handler error.
pub struct HandlerFn<F, T, R> {
    f: F,
    _types: PhantomData<fn(T) -> R>,
}

impl<F, T, R> HandlerFn<F, T, R> {
    pub fn new<Fut>(f: F) -> Self
    where
        F: Fn(LambdaEvent<T>) -> Fut,
        Fut: Future<Output = Result<R, Error>>,
    {
        Self {
            f,
            _types: PhantomData,
        }
    }
}

impl<F, Fut, T, R> Handler for HandlerFn<F, T, R>
where
    F: Fn(LambdaEvent<T>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, Error>> + Send + 'static,
    T: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
{
    fn call(&self, event: LambdaEvent<Value>) -> BoxFuture<'_, Result<Value, Error>> {
        let LambdaEvent { payload, context } = event;
        let payload = match serde_json::from_value::<T>(payload) {
            Ok(payload) => payload,
            Err(err) => return Box::pin(future::ready(Err(err.into()))),
        };

        let response = (self.f)(LambdaEvent::new(payload, context));
        Box::pin(async move {
            let response = response.await?;
            Ok(serde_json::to_value(response)?)
        })
    }
}
