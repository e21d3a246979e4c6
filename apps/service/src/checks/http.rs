use std::collections::HashMap;
use std::time::{Duration, Instant};

use reqwest::header::{CONTENT_TYPE, HeaderName, HeaderValue};
use reqwest::{Method, RequestBuilder};
use tokio_util::sync::CancellationToken;
use tracing::warn;
use url::Url;
use vigil::{CheckDescriptor, CheckExecutor, CheckResult, ExecutorError};

use super::unless_cancelled;

/// Plain GET, healthy on any status below 400
pub struct HttpExecutor {
    client: reqwest::Client,
    default_timeout: Duration,
}

impl HttpExecutor {
    pub fn new(client: reqwest::Client, default_timeout: Duration) -> Self {
        Self { client, default_timeout }
    }
}

#[async_trait::async_trait]
impl CheckExecutor for HttpExecutor {
    fn check_type(&self) -> &str {
        "http"
    }

    async fn execute(
        &self,
        descriptor: &CheckDescriptor,
        cancel: &CancellationToken,
    ) -> Result<CheckResult, ExecutorError> {
        let url = match target_url(descriptor) {
            Ok(url) => url,
            Err(result) => return Ok(result),
        };
        let request = self.client.get(url.clone()).timeout(request_timeout(descriptor, self.default_timeout));

        Ok(probe(descriptor, &url, request, None, cancel).await)
    }
}

/// Configurable request with an optional body assertion.
///
/// Parameters: `url`, `method` (GET), `headers` (JSON object), `body` (sent as
/// JSON for anything but GET), `expectContains` (case-insensitive).
pub struct ApiExecutor {
    client: reqwest::Client,
    default_timeout: Duration,
}

impl ApiExecutor {
    pub fn new(client: reqwest::Client, default_timeout: Duration) -> Self {
        Self { client, default_timeout }
    }
}

#[async_trait::async_trait]
impl CheckExecutor for ApiExecutor {
    fn check_type(&self) -> &str {
        "api"
    }

    async fn execute(
        &self,
        descriptor: &CheckDescriptor,
        cancel: &CancellationToken,
    ) -> Result<CheckResult, ExecutorError> {
        let url = match target_url(descriptor) {
            Ok(url) => url,
            Err(result) => return Ok(result),
        };
        let raw_method = descriptor.parameter("method").unwrap_or("GET").trim().to_ascii_uppercase();
        let Ok(method) = Method::from_bytes(raw_method.as_bytes()) else {
            return Ok(CheckResult::unknown(&descriptor.id, format!("method '{raw_method}' invalid")));
        };

        let mut request = self
            .client
            .request(method.clone(), url.clone())
            .timeout(request_timeout(descriptor, self.default_timeout));
        if let Some(headers) = descriptor.parameter("headers") {
            request = with_headers(descriptor, request, headers);
        }
        if let Some(body) = descriptor.parameter("body") {
            if method != Method::GET {
                request = request.header(CONTENT_TYPE, "application/json").body(body.to_string());
            }
        }

        let expect = descriptor.parameter("expectContains");
        Ok(probe(descriptor, &url, request, expect, cancel).await)
    }
}

fn target_url(descriptor: &CheckDescriptor) -> Result<Url, CheckResult> {
    let Some(raw) = descriptor.parameter("url") else {
        return Err(CheckResult::missing_parameters(&descriptor.id, &["url"]));
    };
    Url::parse(raw.trim())
        .map_err(|e| CheckResult::unknown(&descriptor.id, format!("url '{raw}' invalid: {e}")))
}

fn request_timeout(descriptor: &CheckDescriptor, default: Duration) -> Duration {
    Duration::from_millis(descriptor.parameter_or("timeoutMs", default.as_millis() as u64))
}

/// Malformed headers are logged and left out, the request still goes out
fn with_headers(descriptor: &CheckDescriptor, mut request: RequestBuilder, raw: &str) -> RequestBuilder {
    let headers: HashMap<String, String> = match serde_json::from_str(raw) {
        Ok(headers) => headers,
        Err(e) => {
            warn!(check_id = %descriptor.id, "Ignoring headers, not a JSON object of strings: {e}");
            return request;
        }
    };

    for (name, value) in headers {
        match (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(&value)) {
            (Ok(name), Ok(value)) => request = request.header(name, value),
            _ => warn!(check_id = %descriptor.id, header = %name, "Ignoring invalid header"),
        }
    }
    request
}

async fn probe(
    descriptor: &CheckDescriptor,
    url: &Url,
    request: RequestBuilder,
    expect: Option<&str>,
    cancel: &CancellationToken,
) -> CheckResult {
    let start = Instant::now();
    let exchange = async {
        let response = request.send().await?;
        let status = response.status();
        // Only read the body when it is going to be looked at
        let body = match expect {
            Some(_) => Some(response.text().await?),
            None => None,
        };
        Ok::<_, reqwest::Error>((status, body))
    };
    let Some(outcome) = unless_cancelled(cancel, exchange).await else {
        return CheckResult::unknown(&descriptor.id, "Cancelled");
    };
    let latency = start.elapsed().as_secs_f64() * 1000.0;

    let (status, body) = match outcome {
        Ok(exchanged) => exchanged,
        Err(e) => {
            return CheckResult::unhealthy(&descriptor.id, format!("Exception: {}", describe(&e)))
                .with_metric("latency_ms", latency)
                .with_dimension("url", url.as_str());
        }
    };

    let code = status.as_u16();
    let mut message = format!("HTTP {code}");
    let mut healthy = code < 400;
    if let (true, Some(expected), Some(body)) = (healthy, expect, body) {
        if !body.to_lowercase().contains(&expected.to_lowercase()) {
            healthy = false;
            message = format!("{message}, body does not contain '{expected}'");
        }
    }

    let result = if healthy {
        CheckResult::healthy(&descriptor.id, message)
    } else {
        CheckResult::unhealthy(&descriptor.id, message)
    };
    result
        .with_metric("latency_ms", latency)
        .with_dimension("url", url.as_str())
        .with_dimension("status_code", code.to_string())
}

/// reqwest keeps the interesting part (refused, timed out, dns) in the source chain
fn describe(error: &reqwest::Error) -> String {
    let mut description = error.to_string();
    let mut source = std::error::Error::source(error);
    while let Some(cause) = source {
        description.push_str(": ");
        description.push_str(&cause.to_string());
        source = cause.source();
    }
    description
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil::CheckStatus;
    use wiremock::matchers::{body_string, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn http() -> HttpExecutor {
        HttpExecutor::new(reqwest::Client::new(), TIMEOUT)
    }

    fn api() -> ApiExecutor {
        ApiExecutor::new(reqwest::Client::new(), TIMEOUT)
    }

    async fn run(executor: &dyn CheckExecutor, descriptor: &CheckDescriptor) -> CheckResult {
        executor.execute(descriptor, &CancellationToken::new()).await.unwrap()
    }

    #[tokio::test]
    async fn success_status_is_healthy() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let url = format!("{}/health", server.uri());
        let descriptor = CheckDescriptor::new("web", "http", "Web").with_parameter("url", &url);
        let result = run(&http(), &descriptor).await;

        assert_eq!(result.status, CheckStatus::Healthy);
        assert_eq!(result.message.as_deref(), Some("HTTP 204"));
        assert_eq!(result.dimensions["status_code"], "204");
        assert_eq!(result.dimensions["url"], url);
        assert!(result.metrics.contains_key("latency_ms"));
    }

    #[tokio::test]
    async fn server_error_is_unhealthy() {
        let server = MockServer::start().await;
        Mock::given(method("GET")).respond_with(ResponseTemplate::new(503)).mount(&server).await;

        let descriptor =
            CheckDescriptor::new("web", "http", "Web").with_parameter("url", server.uri());
        let result = run(&http(), &descriptor).await;

        assert_eq!(result.status, CheckStatus::Unhealthy);
        assert_eq!(result.message.as_deref(), Some("HTTP 503"));
    }

    #[tokio::test]
    async fn slow_response_times_out_as_unhealthy() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let descriptor = CheckDescriptor::new("web", "http", "Web")
            .with_parameter("url", server.uri())
            .with_parameter("timeoutMs", "50");
        let started = Instant::now();
        let result = run(&http(), &descriptor).await;

        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(result.status, CheckStatus::Unhealthy);
        assert!(result.message.unwrap().starts_with("Exception: "));
    }

    #[tokio::test]
    async fn refused_connection_is_unhealthy_with_context() {
        let address = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap()
        };
        let url = format!("http://{address}/");
        let descriptor = CheckDescriptor::new("web", "http", "Web").with_parameter("url", &url);
        let result = run(&http(), &descriptor).await;

        assert_eq!(result.status, CheckStatus::Unhealthy);
        let message = result.message.unwrap();
        assert!(message.starts_with("Exception: "));
        assert!(message.len() > "Exception: ".len());
        assert_eq!(result.dimensions["url"], url);
    }

    #[tokio::test]
    async fn missing_or_invalid_url_is_unknown() {
        let missing = CheckDescriptor::new("web", "http", "Web");
        let result = run(&http(), &missing).await;
        assert_eq!(result.status, CheckStatus::Unknown);
        assert_eq!(result.message.as_deref(), Some("url missing"));

        let invalid = CheckDescriptor::new("web", "api", "Web").with_parameter("url", "not a url");
        let result = run(&api(), &invalid).await;
        assert_eq!(result.status, CheckStatus::Unknown);
        assert!(result.message.unwrap().starts_with("url 'not a url' invalid"));
    }

    #[tokio::test]
    async fn api_sends_method_headers_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/echo"))
            .and(header("x-api-key", "secret"))
            .and(header("content-type", "application/json"))
            .and(body_string(r#"{"ping":true}"#))
            .respond_with(ResponseTemplate::new(200).set_body_string("Status: OK"))
            .expect(1)
            .mount(&server)
            .await;

        let descriptor = CheckDescriptor::new("api", "api", "API")
            .with_parameter("url", format!("{}/echo", server.uri()))
            .with_parameter("method", "post")
            .with_parameter("headers", r#"{"x-api-key": "secret"}"#)
            .with_parameter("body", r#"{"ping":true}"#)
            .with_parameter("expectContains", "ok");
        let result = run(&api(), &descriptor).await;

        assert_eq!(result.status, CheckStatus::Healthy);
        assert_eq!(result.message.as_deref(), Some("HTTP 200"));
    }

    #[tokio::test]
    async fn api_body_mismatch_is_unhealthy() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("starting up"))
            .mount(&server)
            .await;

        let descriptor = CheckDescriptor::new("api", "api", "API")
            .with_parameter("url", server.uri())
            .with_parameter("headers", "not json")
            .with_parameter("expectContains", "READY");
        let result = run(&api(), &descriptor).await;

        assert_eq!(result.status, CheckStatus::Unhealthy);
        assert_eq!(result.message.as_deref(), Some("HTTP 200, body does not contain 'READY'"));
    }

    #[tokio::test]
    async fn cancelled_request_is_unknown() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(30)))
            .mount(&server)
            .await;

        let descriptor =
            CheckDescriptor::new("web", "http", "Web").with_parameter("url", server.uri());
        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let result = http().execute(&descriptor, &cancel).await.unwrap();
        assert_eq!(result.status, CheckStatus::Unknown);
        assert_eq!(result.message.as_deref(), Some("Cancelled"));
    }
}
