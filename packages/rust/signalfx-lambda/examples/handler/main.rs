use aws_lambda_events::event::apigw::ApiGatewayV2httpRequest;
use lambda_runtime::{Error, LambdaEvent};
use serde_json::Value;
use signalfx_lambda::{init_logging, HandlerOptions, Wrapper};
use tracing::{info, warn};

/// API Gateway handler wrapped with SignalFx tracing and metrics.
///
/// Requests to `/error` fail, which shows up as an errored span and a
/// `function.errors` datapoint.
async fn handler(event: LambdaEvent<ApiGatewayV2httpRequest>) -> Result<Value, Error> {
    let request_id = &event.context.request_id;
    info!(
        path = event.payload.raw_path.as_deref().unwrap_or("/"),
        "handling request"
    );

    if event.payload.raw_path.as_deref() == Some("/error") {
        warn!("Failing on purpose");
        return Err(Error::from("Unexpected error occurred"));
    }

    Ok(serde_json::json!({
        "statusCode": 200,
        "body": format!("Hello from request {}", request_id)
    }))
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    init_logging()?;

    let wrapper = Wrapper::from_env();
    wrapper.register_handler(HandlerOptions::from_env(), handler);

    lambda_runtime::run(wrapper).await
}
