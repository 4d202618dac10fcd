//! Datapoint ingest client.
//!
//! The metrics middleware hands one [`DatapointBatch`] per invocation to a
//! [`MetricsClient`]. [`SignalFxClient`] is the production implementation,
//! posting JSON to the `/v2/datapoint` ingest endpoint.

use crate::constants::{defaults, TOKEN_HEADER};
use crate::error::TelemetryError;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// Value of a single datapoint.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DatapointValue {
    Int(i64),
    Float(f64),
}

/// A single counter or gauge observation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Datapoint {
    pub metric: String,
    pub value: DatapointValue,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub dimensions: BTreeMap<String, String>,
}

/// Counters and gauges sent together in one ingest request.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DatapointBatch {
    #[serde(rename = "counter", skip_serializing_if = "Vec::is_empty")]
    pub counters: Vec<Datapoint>,
    #[serde(rename = "gauge", skip_serializing_if = "Vec::is_empty")]
    pub gauges: Vec<Datapoint>,
}

impl DatapointBatch {
    pub fn add_counter(
        &mut self,
        metric: &str,
        value: i64,
        timestamp: i64,
        dimensions: &BTreeMap<String, String>,
    ) {
        self.counters.push(Datapoint {
            metric: metric.to_string(),
            value: DatapointValue::Int(value),
            timestamp,
            dimensions: dimensions.clone(),
        });
    }

    pub fn add_gauge(
        &mut self,
        metric: &str,
        value: f64,
        timestamp: i64,
        dimensions: &BTreeMap<String, String>,
    ) {
        self.gauges.push(Datapoint {
            metric: metric.to_string(),
            value: DatapointValue::Float(value),
            timestamp,
            dimensions: dimensions.clone(),
        });
    }

    /// Find a counter by metric name.
    pub fn counter(&self, metric: &str) -> Option<&Datapoint> {
        self.counters.iter().find(|point| point.metric == metric)
    }

    /// Find a gauge by metric name.
    pub fn gauge(&self, metric: &str) -> Option<&Datapoint> {
        self.gauges.iter().find(|point| point.metric == metric)
    }

    pub fn len(&self) -> usize {
        self.counters.len() + self.gauges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty() && self.gauges.is_empty()
    }
}

/// Sink for per-invocation datapoint batches.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MetricsClient: Send + Sync {
    async fn send(&self, batch: DatapointBatch) -> Result<(), TelemetryError>;
}

/// [`MetricsClient`] posting to the SignalFx datapoint ingest API.
#[derive(Debug, Clone)]
pub struct SignalFxClient {
    http: reqwest::Client,
    url: String,
    access_token: Option<String>,
}

impl SignalFxClient {
    /// Create a client for the ingest base URL `endpoint`.
    ///
    /// `timeout` bounds each send and is raised to at least one second.
    pub fn new(
        access_token: Option<String>,
        endpoint: &str,
        timeout: Duration,
    ) -> Result<Self, TelemetryError> {
        let timeout = timeout.max(Duration::from_secs(defaults::SEND_TIMEOUT_FLOOR_SECS));
        let http = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            http,
            url: datapoint_url(endpoint),
            access_token: access_token.filter(|token| !token.is_empty()),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

fn datapoint_url(endpoint: &str) -> String {
    format!("{}/v2/datapoint", endpoint.trim_end_matches('/'))
}

#[async_trait]
impl MetricsClient for SignalFxClient {
    async fn send(&self, batch: DatapointBatch) -> Result<(), TelemetryError> {
        if batch.is_empty() {
            return Ok(());
        }

        let body = serde_json::to_vec(&batch)?;
        let mut request = self
            .http
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body);
        if let Some(token) = &self.access_token {
            request = request.header(TOKEN_HEADER, token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TelemetryError::Rejected(status.as_u16()));
        }

        tracing::debug!(points = batch.len(), "datapoints sent");
        Ok(())
    }
}
