//! Metrics middleware.
//!
//! Times each invocation and sends one datapoint batch when it finishes:
//!
//! | Metric | Type | When |
//! |---|---|---|
//! | `function.invocations` | counter | every invocation |
//! | `function.cold_starts` | counter | first invocation of the process |
//! | `function.errors` | counter | the inner call failed or panicked |
//! | `function.duration` | gauge | every invocation, in milliseconds |
//!
//! Dimensions are the invocation fields without the per-request ones
//! (`aws_request_id`, `log_stream_name`) plus `metric_source`.
//!
//! The metrics client is created on the first invocation, which is also how a
//! cold start is detected. A panic in the inner call is caught long enough to
//! send the batch and then resumed.

use crate::client::{DatapointBatch, MetricsClient, SignalFxClient};
use crate::config::WrapperConfig;
use crate::constants::{fields, metric_names, COMPONENT_NAME};
use crate::error::TelemetryError;
use crate::fields::InvocationFields;
use crate::middleware::{Middleware, Next};
use async_trait::async_trait;
use futures_util::FutureExt;
use lambda_runtime::{Error, LambdaEvent};
use serde_json::Value;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, OnceLock};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Builds the process-wide metrics client from the configuration.
pub type ClientFactory =
    Arc<dyn Fn(&WrapperConfig) -> Result<Arc<dyn MetricsClient>, TelemetryError> + Send + Sync>;

/// Process-wide metrics client. `None` once construction has failed.
pub type ClientCell = OnceLock<Option<Arc<dyn MetricsClient>>>;

/// Default [`ClientFactory`], building a [`SignalFxClient`].
pub fn default_client_factory() -> ClientFactory {
    Arc::new(
        |config: &WrapperConfig| -> Result<Arc<dyn MetricsClient>, TelemetryError> {
            let client = SignalFxClient::new(
                config.access_token.clone(),
                &config.metrics_endpoint,
                config.effective_send_timeout(),
            )?;
            Ok(Arc::new(client))
        },
    )
}

/// Middleware recording invocation, cold start, error and duration datapoints.
pub struct MetricsMiddleware {
    config: WrapperConfig,
    client: Arc<ClientCell>,
    factory: ClientFactory,
}

impl MetricsMiddleware {
    pub fn new(config: WrapperConfig, client: Arc<ClientCell>, factory: ClientFactory) -> Self {
        Self {
            config,
            client,
            factory,
        }
    }

    /// Returns the client and whether this call created it.
    fn client(&self) -> (Option<&Arc<dyn MetricsClient>>, bool) {
        let cold_start = self.client.get().is_none();
        let client = self.client.get_or_init(|| match (self.factory)(&self.config) {
            Ok(client) => Some(client),
            Err(err) => {
                tracing::warn!(error = %err, "Failed to create metrics client");
                None
            }
        });
        (client.as_ref(), cold_start)
    }
}

#[async_trait]
impl Middleware for MetricsMiddleware {
    async fn invoke(
        &self,
        event: LambdaEvent<Value>,
        fields: &InvocationFields,
        next: Next<'_>,
    ) -> Result<Value, Error> {
        let (client, cold_start) = self.client();
        let dimensions = dimensions(fields);

        let start = Instant::now();
        let outcome = AssertUnwindSafe(next.run(event, fields))
            .catch_unwind()
            .await;
        let duration_ms = start.elapsed().as_secs_f64() * 1000.0;

        let failed = !matches!(outcome, Ok(Ok(_)));
        let batch = build_batch(cold_start, failed, duration_ms, now_millis(), &dimensions);

        match client {
            Some(client) => {
                if let Err(err) = client.send(batch).await {
                    tracing::warn!(error = %err, "Error sending metrics");
                }
            }
            None => tracing::debug!("No metrics client, dropping datapoints"),
        }

        match outcome {
            Ok(result) => result,
            Err(payload) => panic::resume_unwind(payload),
        }
    }
}

/// Invocation fields minus per-request keys, plus `metric_source`.
pub fn dimensions(invocation: &InvocationFields) -> BTreeMap<String, String> {
    let mut dimensions: BTreeMap<String, String> = invocation
        .iter()
        .filter(|(key, _)| !matches!(**key, fields::REQUEST_ID | fields::LOG_STREAM_NAME))
        .map(|(key, value)| (key.to_string(), value.clone()))
        .collect();
    dimensions.insert(fields::METRIC_SOURCE.to_string(), COMPONENT_NAME.to_string());
    dimensions
}

fn build_batch(
    cold_start: bool,
    failed: bool,
    duration_ms: f64,
    timestamp: i64,
    dimensions: &BTreeMap<String, String>,
) -> DatapointBatch {
    let mut batch = DatapointBatch::default();
    batch.add_counter(metric_names::INVOCATIONS, 1, timestamp, dimensions);
    if cold_start {
        batch.add_counter(metric_names::COLD_STARTS, 1, timestamp, dimensions);
    }
    if failed {
        batch.add_counter(metric_names::ERRORS, 1, timestamp, dimensions);
    }
    batch.add_gauge(metric_names::DURATION, duration_ms, timestamp, dimensions);
    batch
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{DatapointValue, MockMetricsClient};
    use crate::fields::tests::test_context;
    use crate::middleware::{Handler, HandlerFn};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const ARN: &str = "arn:aws:lambda:us-east-1:123456789012:function:my-function:prod";

    async fn succeed(_: LambdaEvent<Value>) -> Result<Value, Error> {
        Ok(json!({"statusCode": 200}))
    }

    async fn fail(_: LambdaEvent<Value>) -> Result<Value, Error> {
        Err("bad request".into())
    }

    async fn explode(_: LambdaEvent<Value>) -> Result<Value, Error> {
        panic!("kaboom")
    }

    fn middleware_with(client: MockMetricsClient, built: Arc<AtomicUsize>) -> MetricsMiddleware {
        let client: Arc<dyn MetricsClient> = Arc::new(client);
        let factory: ClientFactory = Arc::new(
            move |_: &WrapperConfig| -> Result<Arc<dyn MetricsClient>, TelemetryError> {
                built.fetch_add(1, Ordering::SeqCst);
                Ok(client.clone())
            },
        );
        MetricsMiddleware::new(WrapperConfig::default(), Arc::new(OnceLock::new()), factory)
    }

    async fn invoke(
        middleware: &Arc<MetricsMiddleware>,
        handler: &dyn Handler,
    ) -> Result<Value, Error> {
        let event = LambdaEvent::new(json!({}), test_context(ARN));
        let fields = InvocationFields::from_parts(&event.context, None);
        let chain: Vec<Arc<dyn Middleware>> = vec![middleware.clone()];
        Next::new(&chain, handler).run(event, &fields).await
    }

    #[tokio::test]
    async fn test_cold_start_only_on_first_invocation() {
        let mut client = MockMetricsClient::new();
        let mut seq = mockall::Sequence::new();
        client
            .expect_send()
            .times(1)
            .in_sequence(&mut seq)
            .withf(|batch| {
                batch.counter(metric_names::COLD_STARTS).is_some()
                    && batch.counter(metric_names::INVOCATIONS).is_some()
                    && batch.counter(metric_names::ERRORS).is_none()
                    && batch.gauge(metric_names::DURATION).is_some()
            })
            .returning(|_| Ok(()));
        client
            .expect_send()
            .times(1)
            .in_sequence(&mut seq)
            .withf(|batch| {
                batch.counter(metric_names::COLD_STARTS).is_none()
                    && batch.counter(metric_names::INVOCATIONS).is_some()
            })
            .returning(|_| Ok(()));

        let built = Arc::new(AtomicUsize::new(0));
        let middleware = Arc::new(middleware_with(client, built.clone()));
        let handler = HandlerFn::new(succeed);

        assert!(invoke(&middleware, &handler).await.is_ok());
        assert!(invoke(&middleware, &handler).await.is_ok());
        assert_eq!(built.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_error_is_counted_and_returned() {
        let mut client = MockMetricsClient::new();
        client
            .expect_send()
            .times(1)
            .withf(|batch| {
                batch.counter(metric_names::ERRORS).is_some()
                    && batch.counter(metric_names::INVOCATIONS).is_some()
                    && matches!(
                        batch.gauge(metric_names::DURATION).map(|point| point.value),
                        Some(DatapointValue::Float(duration)) if duration >= 0.0
                    )
            })
            .returning(|_| Ok(()));

        let middleware = Arc::new(middleware_with(client, Arc::new(AtomicUsize::new(0))));
        let err = invoke(&middleware, &HandlerFn::new(fail)).await.unwrap_err();
        assert_eq!(err.to_string(), "bad request");
    }

    #[tokio::test]
    async fn test_panic_is_counted_and_resumed() {
        let mut client = MockMetricsClient::new();
        client
            .expect_send()
            .times(1)
            .withf(|batch| batch.counter(metric_names::ERRORS).is_some())
            .returning(|_| Ok(()));

        let middleware = Arc::new(middleware_with(client, Arc::new(AtomicUsize::new(0))));
        let handler = HandlerFn::new(explode);
        let outcome = AssertUnwindSafe(invoke(&middleware, &handler))
            .catch_unwind()
            .await;

        let payload = outcome.unwrap_err();
        assert_eq!(payload.downcast_ref::<&str>(), Some(&"kaboom"));
    }

    #[tokio::test]
    async fn test_send_failure_does_not_change_outcome() {
        let mut client = MockMetricsClient::new();
        client
            .expect_send()
            .times(1)
            .returning(|_| Err(TelemetryError::Rejected(500)));

        let middleware = Arc::new(middleware_with(client, Arc::new(AtomicUsize::new(0))));
        let response = invoke(&middleware, &HandlerFn::new(succeed)).await.unwrap();
        assert_eq!(response, json!({"statusCode": 200}));
    }

    #[tokio::test]
    async fn test_failed_client_construction_skips_send() {
        let built = Arc::new(AtomicUsize::new(0));
        let counter = built.clone();
        let factory: ClientFactory = Arc::new(
            move |_: &WrapperConfig| -> Result<Arc<dyn MetricsClient>, TelemetryError> {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(TelemetryError::Exporter("no client".to_string()))
            },
        );
        let middleware = Arc::new(MetricsMiddleware::new(
            WrapperConfig::default(),
            Arc::new(OnceLock::new()),
            factory,
        ));
        let handler = HandlerFn::new(succeed);

        assert!(invoke(&middleware, &handler).await.is_ok());
        assert!(invoke(&middleware, &handler).await.is_ok());
        assert_eq!(built.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dimensions_drop_request_scoped_fields() {
        let invocation = InvocationFields::from_parts(&test_context(ARN), None);
        let dimensions = dimensions(&invocation);

        assert!(!dimensions.contains_key(fields::REQUEST_ID));
        assert!(!dimensions.contains_key(fields::LOG_STREAM_NAME));
        assert_eq!(
            dimensions.get(fields::METRIC_SOURCE).map(String::as_str),
            Some(COMPONENT_NAME)
        );
        assert_eq!(
            dimensions.get(fields::FUNCTION_NAME).map(String::as_str),
            Some("my-function")
        );
        assert_eq!(dimensions.len(), invocation.len() - 2 + 1);
    }

    #[test]
    fn test_build_batch() {
        let dimensions = BTreeMap::new();
        let batch = build_batch(true, true, 12.5, 42, &dimensions);

        assert_eq!(batch.counters.len(), 3);
        assert_eq!(batch.gauges.len(), 1);
        assert!(batch.counters.iter().all(|point| point.timestamp == 42));
        assert_eq!(
            batch.gauge(metric_names::DURATION).map(|point| point.value),
            Some(DatapointValue::Float(12.5))
        );

        let warm = build_batch(false, false, 1.0, 42, &dimensions);
        assert_eq!(warm.counters.len(), 1);
        assert_eq!(
            warm.counter(metric_names::INVOCATIONS).map(|point| point.value),
            Some(DatapointValue::Int(1))
        );
    }
}
