//! Managed backend: a SageMaker endpoint invoked synchronously.
//!
//! The endpoint receives the graph as `application/json` and answers either
//! with raw image bytes or with JSON carrying a base64 image under `image`
//! (or the first entry of `images`). Liveness is the endpoint's status as
//! reported by `DescribeEndpoint` on the control plane.
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_sagemaker::types::EndpointStatus;
use aws_sdk_sagemakerruntime::config::retry::RetryConfig;
use aws_sdk_sagemakerruntime::config::timeout::TimeoutConfig;
use aws_sdk_sagemakerruntime::error::{DisplayErrorContext, SdkError};
use aws_sdk_sagemakerruntime::primitives::Blob;
use aws_sdk_sagemakerruntime::{config, Client};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::Value;

use crate::backend::{sniff_content_type, AssetResult, InvocationClient, OCTET_STREAM};
use crate::error::{AppError, AppResult};
use crate::workflow::graph::GraphDocument;

pub struct SageMakerBackend {
    runtime: Client,
    control: aws_sdk_sagemaker::Client,
    endpoint_name: String,
    timeout: Duration,
    ping_timeout: Duration,
}

impl SageMakerBackend {
    pub fn new(
        runtime: Client,
        control: aws_sdk_sagemaker::Client,
        endpoint_name: String,
        timeout: Duration,
        ping_timeout: Duration,
    ) -> Self {
        SageMakerBackend {
            runtime,
            control,
            endpoint_name,
            timeout,
            ping_timeout,
        }
    }

    /// Build both clients from the ambient AWS configuration (env, profile,
    /// IMDS). Neither client retries.
    pub async fn from_env(endpoint_name: String, timeout: Duration, ping_timeout: Duration) -> Self {
        let shared = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        let runtime = config::Builder::from(&shared)
            .timeout_config(TimeoutConfig::builder().operation_timeout(timeout).build())
            .retry_config(RetryConfig::disabled())
            .build();
        let control = aws_sdk_sagemaker::config::Builder::from(&shared)
            .timeout_config(TimeoutConfig::builder().operation_timeout(ping_timeout).build())
            .retry_config(RetryConfig::disabled())
            .build();
        tracing::info!(endpoint = %endpoint_name, region = ?shared.region(), "Configured SageMaker endpoint");
        Self::new(
            Client::from_conf(runtime),
            aws_sdk_sagemaker::Client::from_conf(control),
            endpoint_name,
            timeout,
            ping_timeout,
        )
    }
}

#[async_trait]
impl InvocationClient for SageMakerBackend {
    async fn submit(&self, graph: &GraphDocument) -> AppResult<AssetResult> {
        let payload = graph
            .to_vec()
            .map_err(|e| AppError::InvalidRequest(format!("graph is not serializable: {e}")))?;
        tracing::info!(endpoint = %self.endpoint_name, bytes = payload.len(), "Invoking SageMaker endpoint");
        tracing::debug!(payload = %String::from_utf8_lossy(&payload), "Endpoint payload");

        let output = self
            .runtime
            .invoke_endpoint()
            .endpoint_name(&self.endpoint_name)
            .content_type("application/json")
            .accept("*/*")
            .body(Blob::new(payload))
            .send()
            .await
            .map_err(|e| classify_sdk_error(e, self.timeout))?;

        let body = output.body().map(|b| b.as_ref().to_vec()).unwrap_or_default();
        decode_managed_body(output.content_type(), body)
    }

    async fn ping(&self) -> AppResult<()> {
        let described = self
            .control
            .describe_endpoint()
            .endpoint_name(&self.endpoint_name)
            .send()
            .await
            .map_err(|e| classify_sdk_error(e, self.ping_timeout))?;

        match described.endpoint_status() {
            Some(EndpointStatus::InService) => Ok(()),
            status => Err(AppError::BackendUnavailable(format!(
                "endpoint {} is {}",
                self.endpoint_name,
                status.map(EndpointStatus::as_str).unwrap_or("in an unknown state")
            ))),
        }
    }

    fn name(&self) -> &'static str {
        "sagemaker"
    }
}

fn classify_sdk_error<E, R>(err: SdkError<E, R>, timeout: Duration) -> AppError
where
    E: std::error::Error + 'static,
    R: std::fmt::Debug,
{
    match &err {
        SdkError::TimeoutError(_) => AppError::BackendTimeout(timeout),
        SdkError::DispatchFailure(failure) if failure.is_timeout() => AppError::BackendTimeout(timeout),
        SdkError::ServiceError(_) => {
            AppError::BackendRejected(DisplayErrorContext(&err).to_string())
        }
        SdkError::ResponseError(_) => {
            AppError::MalformedResponse(DisplayErrorContext(&err).to_string())
        }
        _ => AppError::BackendUnavailable(DisplayErrorContext(&err).to_string()),
    }
}

/// Turn an endpoint response into an asset.
///
/// JSON bodies must carry a base64 image; anything else is taken as the
/// asset itself under its declared type. The SDK only returns a body for a
/// 2xx answer and does not expose which one, so the status stays 200.
pub fn decode_managed_body(content_type: Option<&str>, body: Vec<u8>) -> AppResult<AssetResult> {
    if body.is_empty() {
        return Err(AppError::MalformedResponse("endpoint returned an empty body".to_string()));
    }

    let declared = content_type
        .map(|ct| ct.split(';').next().unwrap_or(ct).trim().to_ascii_lowercase())
        .filter(|ct| !ct.is_empty());

    if declared.as_deref() == Some("application/json") {
        let value: Value = serde_json::from_slice(&body).map_err(|e| {
            tracing::error!(body = %String::from_utf8_lossy(&body), "Endpoint declared JSON but sent something else");
            AppError::MalformedResponse(format!("endpoint JSON: {e}"))
        })?;
        let Some(encoded) = value
            .get("image")
            .and_then(Value::as_str)
            .or_else(|| value.get("images")?.get(0)?.as_str())
        else {
            tracing::error!(body = %value, "Endpoint JSON carries no image");
            return Err(AppError::MalformedResponse(
                "endpoint JSON has no 'image' or 'images' entry".to_string(),
            ));
        };
        let bytes = STANDARD.decode(encoded.trim()).map_err(|e| {
            tracing::error!(body = %value, "Endpoint image is not base64");
            AppError::MalformedResponse(format!("image is not base64: {e}"))
        })?;
        let content_type = sniff_content_type(&bytes);
        return Ok(AssetResult::new(bytes, content_type));
    }

    let content_type = match declared {
        Some(ct) if ct != OCTET_STREAM => ct,
        _ => sniff_content_type(&body).to_string(),
    };
    Ok(AssetResult::new(body, content_type))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use assert_matches::assert_matches;
    use aws_smithy_http_client::test_util::{NeverClient, ReplayEvent, StaticReplayClient};
    use aws_smithy_types::body::SdkBody;
    use serde_json::json;

    const PNG_MAGIC: [u8; 12] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 13];

    #[test]
    fn raw_body_keeps_declared_type() {
        let asset = decode_managed_body(Some("image/png"), PNG_MAGIC.to_vec()).unwrap();
        assert_eq!(asset.content_type, "image/png");
        assert_eq!(asset.bytes, PNG_MAGIC.to_vec());
    }

    #[test]
    fn octet_stream_is_sniffed() {
        let asset = decode_managed_body(Some(OCTET_STREAM), PNG_MAGIC.to_vec()).unwrap();
        assert_eq!(asset.content_type, "image/png");
    }

    #[test]
    fn json_body_carries_base64_image() {
        let body = json!({"image": STANDARD.encode(PNG_MAGIC)}).to_string().into_bytes();
        let asset = decode_managed_body(Some("application/json; charset=utf-8"), body).unwrap();
        assert_eq!(asset.bytes, PNG_MAGIC.to_vec());
        assert_eq!(asset.content_type, "image/png");

        let listed = json!({"images": [STANDARD.encode(PNG_MAGIC)]}).to_string().into_bytes();
        assert_eq!(decode_managed_body(Some("application/json"), listed).unwrap().bytes, PNG_MAGIC.to_vec());
    }

    #[test]
    fn json_without_image_is_malformed() {
        let body = json!({"status": "ok"}).to_string().into_bytes();
        assert_matches!(
            decode_managed_body(Some("application/json"), body),
            Err(AppError::MalformedResponse(_))
        );
        assert_matches!(
            decode_managed_body(Some("image/png"), Vec::new()),
            Err(AppError::MalformedResponse(_))
        );
    }

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn rejected_json_body_is_logged() {
        let captured = Captured::default();
        let sink = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || sink.clone())
            .with_ansi(false)
            .finish();

        let body = json!({"status": "ok"}).to_string().into_bytes();
        let result = tracing::subscriber::with_default(subscriber, || {
            decode_managed_body(Some("application/json"), body)
        });

        assert_matches!(result, Err(AppError::MalformedResponse(_)));
        let logs = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert!(logs.contains(r#"{"status":"ok"}"#), "logs were: {logs}");
    }

    const ENDPOINT: &str = "sd-endpoint";

    fn runtime_client(http: impl config::HttpClient + 'static, timeout: Duration) -> Client {
        let conf = aws_sdk_sagemakerruntime::Config::builder()
            .behavior_version(config::BehaviorVersion::latest())
            .region(config::Region::new("us-east-1"))
            .credentials_provider(config::Credentials::new("AKIDTEST", "secret", None, None, "test"))
            .retry_config(RetryConfig::disabled())
            .timeout_config(TimeoutConfig::builder().operation_timeout(timeout).build())
            .http_client(http)
            .build();
        Client::from_conf(conf)
    }

    fn control_client(http: StaticReplayClient) -> aws_sdk_sagemaker::Client {
        use aws_sdk_sagemaker::config as control;
        let conf = aws_sdk_sagemaker::Config::builder()
            .behavior_version(control::BehaviorVersion::latest())
            .region(control::Region::new("us-east-1"))
            .credentials_provider(control::Credentials::new("AKIDTEST", "secret", None, None, "test"))
            .retry_config(RetryConfig::disabled())
            .http_client(http)
            .build();
        aws_sdk_sagemaker::Client::from_conf(conf)
    }

    fn backend_with(runtime: Client, control: StaticReplayClient) -> SageMakerBackend {
        SageMakerBackend::new(
            runtime,
            control_client(control),
            ENDPOINT.to_string(),
            Duration::from_secs(5),
            Duration::from_secs(5),
        )
    }

    fn replay(status: u16, content_type: &str, body: Vec<u8>) -> StaticReplayClient {
        StaticReplayClient::new(vec![ReplayEvent::new(
            http::Request::builder()
                .uri("https://runtime.sagemaker.us-east-1.amazonaws.com/")
                .body(SdkBody::empty())
                .unwrap(),
            http::Response::builder()
                .status(status)
                .header("content-type", content_type)
                .body(SdkBody::from(body))
                .unwrap(),
        )])
    }

    fn graph() -> GraphDocument {
        GraphDocument::from_value(json!({"3": {"class_type": "KSampler", "inputs": {"seed": 7}}})).unwrap()
    }

    #[tokio::test]
    async fn submit_posts_graph_as_json_to_the_endpoint() {
        let http = replay(200, "image/png", PNG_MAGIC.to_vec());
        let backend = backend_with(runtime_client(http.clone(), Duration::from_secs(5)), StaticReplayClient::new(vec![]));

        let asset = backend.submit(&graph()).await.unwrap();
        assert_eq!(asset.content_type, "image/png");
        assert_eq!(asset.bytes, PNG_MAGIC.to_vec());

        let requests: Vec<_> = http.actual_requests().collect();
        assert_eq!(requests.len(), 1);
        let request = requests[0];
        assert!(request.uri().ends_with("/endpoints/sd-endpoint/invocations"), "uri: {}", request.uri());
        assert_eq!(request.headers().get("content-type"), Some("application/json"));
        assert_eq!(request.headers().get("accept"), Some("*/*"));
        assert_eq!(request.body().bytes(), Some(graph().to_vec().unwrap().as_slice()));
    }

    #[tokio::test]
    async fn client_error_from_endpoint_is_rejected() {
        let http = StaticReplayClient::new(vec![ReplayEvent::new(
            http::Request::builder().uri("https://runtime.sagemaker.us-east-1.amazonaws.com/").body(SdkBody::empty()).unwrap(),
            http::Response::builder()
                .status(400)
                .header("content-type", "application/json")
                .header("x-amzn-errortype", "ValidationError")
                .body(SdkBody::from(r#"{"message":"Endpoint sd-endpoint not found."}"#))
                .unwrap(),
        )]);
        let backend = backend_with(runtime_client(http, Duration::from_secs(5)), StaticReplayClient::new(vec![]));

        assert_matches!(backend.submit(&graph()).await, Err(AppError::BackendRejected(_)));
    }

    #[tokio::test]
    async fn refused_connection_is_unavailable() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let conf = aws_sdk_sagemakerruntime::Config::builder()
            .behavior_version(config::BehaviorVersion::latest())
            .region(config::Region::new("us-east-1"))
            .credentials_provider(config::Credentials::new("AKIDTEST", "secret", None, None, "test"))
            .retry_config(RetryConfig::disabled())
            .endpoint_url(format!("http://127.0.0.1:{port}"))
            .build();
        let backend = backend_with(Client::from_conf(conf), StaticReplayClient::new(vec![]));

        assert_matches!(backend.submit(&graph()).await, Err(AppError::BackendUnavailable(_)));
    }

    #[tokio::test]
    async fn silent_endpoint_times_out() {
        let runtime = runtime_client(NeverClient::new(), Duration::from_millis(100));
        let backend = SageMakerBackend::new(
            runtime,
            control_client(StaticReplayClient::new(vec![])),
            ENDPOINT.to_string(),
            Duration::from_millis(100),
            Duration::from_secs(5),
        );

        assert_matches!(backend.submit(&graph()).await, Err(AppError::BackendTimeout(_)));
    }

    fn described(status: &str) -> StaticReplayClient {
        let body = json!({
            "EndpointName": ENDPOINT,
            "EndpointArn": "arn:aws:sagemaker:us-east-1:123456789012:endpoint/sd-endpoint",
            "EndpointConfigName": "sd-endpoint-config",
            "EndpointStatus": status,
            "CreationTime": 1700000000.0,
            "LastModifiedTime": 1700000000.0
        });
        replay(200, "application/x-amz-json-1.1", body.to_string().into_bytes())
    }

    #[tokio::test]
    async fn ping_requires_endpoint_in_service() {
        let control = described("InService");
        let backend = backend_with(runtime_client(StaticReplayClient::new(vec![]), Duration::from_secs(5)), control.clone());
        backend.ping().await.unwrap();

        let requests: Vec<_> = control.actual_requests().collect();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].headers().get("x-amz-target"), Some("SageMaker.DescribeEndpoint"));
        let sent: Value = serde_json::from_slice(requests[0].body().bytes().unwrap()).unwrap();
        assert_eq!(sent, json!({"EndpointName": ENDPOINT}));
    }

    #[tokio::test]
    async fn ping_fails_while_endpoint_is_not_serving() {
        let backend = backend_with(
            runtime_client(StaticReplayClient::new(vec![]), Duration::from_secs(5)),
            described("Creating"),
        );
        assert_matches!(backend.ping().await, Err(AppError::BackendUnavailable(reason)) if reason.contains("Creating"));
    }
}
