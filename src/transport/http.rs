//! HTTP transport implementation
//!
//! Every attempt is bounded by the configured timeout (send and body read
//! together). Bodies above the configured ceiling are rejected before they
//! are parsed. Idempotent calls are retried on 429/502/503/504, timeouts
//! and connection failures.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode, header};
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use super::retry::{AttemptError, RetryPolicy, with_retry};
use super::{ApiRequest, AuthMode, Transport};
use crate::config::{Config, MIN_TIMEOUT};
use crate::{Error, Result};

/// Correlation header attached to every upstream call
pub const REQUEST_ID_HEADER: &str = "X-Request-Id";

/// Maximum characters of an error body kept in `Error::Http`
const ERROR_BODY_MAX_CHARS: usize = 500;

/// HTTP transport for the Codecks API
pub struct HttpTransport {
    /// HTTP client
    client: Client,
    /// Immutable process configuration
    config: Arc<Config>,
    /// Retry policy
    policy: RetryPolicy,
    /// Per-attempt timeout
    timeout: Duration,
}

impl HttpTransport {
    /// Create a new HTTP transport
    pub fn new(config: Arc<Config>) -> Result<Self> {
        let client = Client::builder()
            .pool_max_idle_per_host(4)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_nodelay(true)
            .redirect(reqwest::redirect::Policy::limited(5))
            .user_agent(concat!("codecks-mcp/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Transport(e.to_string()))?;

        Ok(Self {
            client,
            policy: RetryPolicy::new(&config.http),
            timeout: config.http.timeout.max(MIN_TIMEOUT),
            config,
        })
    }

    /// Build headers for a request
    fn build_headers(&self, auth: AuthMode, request_id: &str) -> Result<header::HeaderMap> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("application/json"),
        );
        headers.insert(REQUEST_ID_HEADER, parse_header(request_id)?);

        if auth == AuthMode::Session {
            let codecks = &self.config.codecks;
            let token = codecks
                .token
                .as_deref()
                .ok_or_else(|| Error::Setup("CODECKS_TOKEN is not set".to_string()))?;
            let account = codecks
                .account
                .as_deref()
                .ok_or_else(|| Error::Setup("CODECKS_ACCOUNT is not set".to_string()))?;
            // Don't include the credential in error messages
            let token = header::HeaderValue::from_str(token)
                .map_err(|_| Error::Setup("Invalid token format".to_string()))?;
            headers.insert("X-Auth-Token", token);
            headers.insert("X-Account", parse_header(account)?);
        }

        Ok(headers)
    }

    /// One attempt, bounded by the per-attempt timeout
    async fn attempt(
        &self,
        request: &ApiRequest,
        headers: header::HeaderMap,
    ) -> std::result::Result<Value, AttemptError> {
        let mut builder = self
            .client
            .request(request.method.clone(), &request.url)
            .headers(headers);
        if let Some(ref body) = request.body {
            builder = builder.json(body);
        }

        let max_bytes = self.config.http.max_response_bytes;
        let exchange = async {
            let response = builder.send().await.map_err(|e| {
                if e.is_timeout() {
                    AttemptError::from(Error::Timeout(self.timeout.as_millis()))
                } else {
                    AttemptError::from(Error::Transport(format!("Request failed: {e}")))
                }
            })?;
            handle_response(response, max_bytes).await
        };

        match tokio::time::timeout(self.timeout, exchange).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(self.timeout.as_millis()).into()),
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn request(&self, request: ApiRequest) -> Result<Value> {
        let request_id = Uuid::new_v4().to_string();
        let headers = self.build_headers(request.auth, &request_id)?;

        debug!(
            request_id = %request_id,
            method = %request.method,
            url = %redact_url(&request.url),
            idempotent = request.idempotent,
            "Upstream request"
        );

        let result = with_retry(&self.policy, request.idempotent, &request_id, |_| {
            self.attempt(&request, headers.clone())
        })
        .await;

        result.map_err(|e| {
            let e = terminal_error(e);
            warn!(request_id = %request_id, error = %e, "Upstream request failed");
            e
        })
    }
}

/// Map a final HTTP failure onto the distinguished conditions
fn terminal_error(error: Error) -> Error {
    match error {
        Error::Http { status, .. } if status == 401 || status == 403 => Error::Setup(format!(
            "Codecks rejected the credentials (HTTP {status}); the session token has likely expired. \
             Refresh CODECKS_TOKEN from a logged-in browser session."
        )),
        Error::Http { status: 429, .. } => Error::RateLimited,
        other => other,
    }
}

/// Handle API response
async fn handle_response(
    response: Response,
    max_bytes: usize,
) -> std::result::Result<Value, AttemptError> {
    let status = response.status();
    let retry_after = parse_retry_after(response.headers());

    if !status.is_success() {
        let body = read_limited(response, max_bytes).await.unwrap_or_default();
        let text = String::from_utf8_lossy(&body);
        return Err(AttemptError {
            error: Error::Http {
                status: status.as_u16(),
                // Truncate error to avoid leaking sensitive data
                body: text.chars().take(ERROR_BODY_MAX_CHARS).collect(),
            },
            retry_after: retry_after.filter(|_| status == StatusCode::TOO_MANY_REQUESTS
                || status.is_server_error()),
        });
    }

    let body = read_limited(response, max_bytes).await?;
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Object(serde_json::Map::new()));
    }
    serde_json::from_slice(&body).map_err(|e| {
        Error::Protocol(format!("Upstream returned a non-JSON success body: {e}")).into()
    })
}

/// Read the body, aborting once it grows past `max_bytes`
async fn read_limited(mut response: Response, max_bytes: usize) -> Result<Vec<u8>> {
    if let Some(declared) = response.content_length() {
        if declared > max_bytes as u64 {
            return Err(too_large(max_bytes));
        }
    }

    let mut body = Vec::new();
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| Error::Transport(format!("Failed to read response body: {e}")))?
    {
        if body.len() + chunk.len() > max_bytes {
            return Err(too_large(max_bytes));
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}

fn too_large(max_bytes: usize) -> Error {
    Error::Protocol(format!("Response body exceeds the {max_bytes} byte limit"))
}

/// Parse `Retry-After` given in (possibly fractional) seconds
fn parse_retry_after(headers: &header::HeaderMap) -> Option<Duration> {
    let raw = headers.get(header::RETRY_AFTER)?.to_str().ok()?.trim();
    let secs: f64 = raw.parse().ok()?;
    Duration::try_from_secs_f64(secs).ok()
}

fn parse_header(value: &str) -> Result<header::HeaderValue> {
    header::HeaderValue::from_str(value)
        .map_err(|e| Error::Config(format!("Invalid header value: {e}")))
}

/// Drop query strings (the report token travels there) before logging
fn redact_url(url: &str) -> &str {
    url.split_once('?').map_or(url, |(path, _)| path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Instant;

    use axum::Router;
    use axum::extract::State;
    use axum::http::{HeaderMap, StatusCode as StubStatus, header as stub_header};
    use axum::response::{IntoResponse, Response as AxumResponse};
    use axum::routing::post;
    use serde_json::json;
    use tokio::net::TcpListener;

    #[derive(Clone)]
    struct Scripted {
        status: u16,
        body: String,
        retry_after: Option<&'static str>,
        delay: Duration,
    }

    impl Scripted {
        fn new(status: u16, body: &str) -> Self {
            Self {
                status,
                body: body.to_string(),
                retry_after: None,
                delay: Duration::ZERO,
            }
        }
    }

    #[derive(Clone, Default)]
    struct Stub {
        script: Arc<Mutex<VecDeque<Scripted>>>,
        seen: Arc<Mutex<Vec<HeaderMap>>>,
    }

    async fn handler(State(stub): State<Stub>, headers: HeaderMap) -> AxumResponse {
        stub.seen.lock().unwrap().push(headers);
        let next = stub
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Scripted::new(500, "script exhausted"));
        if !next.delay.is_zero() {
            tokio::time::sleep(next.delay).await;
        }
        let mut response =
            (StubStatus::from_u16(next.status).unwrap(), next.body).into_response();
        if let Some(value) = next.retry_after {
            response
                .headers_mut()
                .insert(stub_header::RETRY_AFTER, value.parse().unwrap());
        }
        response
    }

    /// Spawn a stub upstream that answers with the scripted responses in order
    async fn spawn_stub(script: Vec<Scripted>) -> (String, Stub) {
        let stub = Stub {
            script: Arc::new(Mutex::new(script.into())),
            ..Stub::default()
        };
        let app = Router::new()
            .route("/", post(handler))
            .with_state(stub.clone());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/", listener.local_addr().unwrap());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (url, stub)
    }

    fn transport(retries: u32, base_delay: Duration) -> HttpTransport {
        let mut config = Config::default();
        config.codecks.token = Some("secret-token".into());
        config.codecks.account = Some("studio".into());
        config.http.max_retries = retries;
        config.http.retry_base_delay = base_delay;
        config.http.timeout = Duration::from_secs(1);
        config.http.max_response_bytes = 1024;
        HttpTransport::new(Arc::new(config)).unwrap()
    }

    fn hits(stub: &Stub) -> usize {
        stub.seen.lock().unwrap().len()
    }

    #[tokio::test]
    async fn non_idempotent_503_is_attempted_once() {
        let (url, stub) = spawn_stub(vec![
            Scripted::new(503, "down"),
            Scripted::new(200, "{}"),
        ])
        .await;
        let t = transport(2, Duration::from_millis(5));

        let err = t
            .request(ApiRequest::dispatch(url, json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Http { status: 503, .. }));
        assert_eq!(hits(&stub), 1);
    }

    #[tokio::test]
    async fn idempotent_call_succeeds_on_third_attempt_with_backoff() {
        let (url, stub) = spawn_stub(vec![
            Scripted::new(503, "down"),
            Scripted::new(503, "down"),
            Scripted::new(200, r#"{"ok":1}"#),
        ])
        .await;
        let t = transport(2, Duration::from_millis(40));

        let started = Instant::now();
        let value = t.request(ApiRequest::query(url, json!({}))).await.unwrap();
        assert_eq!(value, json!({"ok": 1}));
        assert_eq!(hits(&stub), 3);
        // 40ms before attempt 2, 80ms before attempt 3
        assert!(started.elapsed() >= Duration::from_millis(110));
    }

    #[tokio::test]
    async fn retry_after_header_overrides_backoff() {
        let mut limited = Scripted::new(429, "slow down");
        limited.retry_after = Some("0.3");
        let (url, stub) = spawn_stub(vec![limited, Scripted::new(200, "[]")]).await;
        let t = transport(1, Duration::from_millis(1));

        let started = Instant::now();
        let value = t.request(ApiRequest::query(url, json!({}))).await.unwrap();
        assert_eq!(value, json!([]));
        assert_eq!(hits(&stub), 2);
        assert!(started.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test]
    async fn exhausted_429_is_rate_limited() {
        let (url, _stub) = spawn_stub(vec![
            Scripted::new(429, ""),
            Scripted::new(429, ""),
        ])
        .await;
        let t = transport(1, Duration::from_millis(1));

        let err = t.request(ApiRequest::query(url, json!({}))).await.unwrap_err();
        assert!(matches!(err, Error::RateLimited));
        assert!(err.to_string().contains("40 requests per 5 seconds"));
    }

    #[tokio::test]
    async fn unauthorized_is_a_setup_error_and_not_retried() {
        let (url, stub) = spawn_stub(vec![Scripted::new(401, "nope")]).await;
        let t = transport(3, Duration::from_millis(1));

        let err = t.request(ApiRequest::query(url, json!({}))).await.unwrap_err();
        assert!(matches!(err, Error::Setup(_)));
        assert!(err.to_string().contains("expired"));
        assert_eq!(hits(&stub), 1);
    }

    #[tokio::test]
    async fn non_json_success_is_protocol_error() {
        let (url, _stub) = spawn_stub(vec![Scripted::new(200, "<html>login</html>")]).await;
        let t = transport(0, Duration::from_millis(1));

        let err = t.request(ApiRequest::query(url, json!({}))).await.unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[tokio::test]
    async fn oversized_body_is_rejected() {
        let big = format!(r#"{{"blob":"{}"}}"#, "x".repeat(4096));
        let (url, _stub) = spawn_stub(vec![Scripted::new(200, &big)]).await;
        let t = transport(0, Duration::from_millis(1));

        let err = t.request(ApiRequest::query(url, json!({}))).await.unwrap_err();
        assert!(err.to_string().contains("byte limit"));
    }

    #[tokio::test]
    async fn slow_attempt_times_out() {
        let mut slow = Scripted::new(200, "{}");
        slow.delay = Duration::from_millis(1500);
        let (url, _stub) = spawn_stub(vec![slow]).await;
        let t = transport(0, Duration::from_millis(1));

        let err = t
            .request(ApiRequest::dispatch(url, json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
    }

    #[tokio::test]
    async fn session_headers_and_stable_request_id() {
        let (url, stub) = spawn_stub(vec![
            Scripted::new(502, ""),
            Scripted::new(200, "{}"),
        ])
        .await;
        let t = transport(1, Duration::from_millis(1));
        t.request(ApiRequest::query(url, json!({}))).await.unwrap();

        let seen = stub.seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0]["x-auth-token"], "secret-token");
        assert_eq!(seen[0]["x-account"], "studio");
        assert_eq!(seen[0][REQUEST_ID_HEADER], seen[1][REQUEST_ID_HEADER]);
    }

    #[tokio::test]
    async fn report_requests_skip_session_headers() {
        let (url, stub) = spawn_stub(vec![Scripted::new(200, "{}")]).await;
        let t = transport(0, Duration::from_millis(1));
        t.request(ApiRequest::dispatch(url, json!({})).with_auth(AuthMode::None))
            .await
            .unwrap();

        let seen = stub.seen.lock().unwrap();
        assert!(seen[0].get("x-auth-token").is_none());
        assert!(seen[0].get(REQUEST_ID_HEADER).is_some());
    }

    #[test]
    fn retry_after_parsing() {
        let mut headers = header::HeaderMap::new();
        headers.insert(header::RETRY_AFTER, "2".parse().unwrap());
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(2)));
        headers.insert(header::RETRY_AFTER, "1.5".parse().unwrap());
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_millis(1500)));
        headers.insert(
            header::RETRY_AFTER,
            "Wed, 21 Oct 2015 07:28:00 GMT".parse().unwrap(),
        );
        assert_eq!(parse_retry_after(&headers), None);
        headers.insert(header::RETRY_AFTER, "1e300".parse().unwrap());
        assert_eq!(parse_retry_after(&headers), None);
        headers.insert(header::RETRY_AFTER, "-3".parse().unwrap());
        assert_eq!(parse_retry_after(&headers), None);
    }

    #[tokio::test]
    async fn long_retry_after_is_capped() {
        let mut limited = Scripted::new(503, "maintenance");
        limited.retry_after = Some("86400");
        let (url, stub) = spawn_stub(vec![limited, Scripted::new(200, "{}")]).await;
        let mut config = (*transport(1, Duration::from_millis(1)).config).clone();
        config.http.max_retry_delay = Duration::from_millis(50);
        let t = HttpTransport::new(Arc::new(config)).unwrap();

        let started = Instant::now();
        t.request(ApiRequest::query(url, json!({}))).await.unwrap();
        assert_eq!(hits(&stub), 2);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn redacts_query_strings() {
        assert_eq!(
            redact_url("https://api.codecks.io/user-report/v1/create-report?token=abc"),
            "https://api.codecks.io/user-report/v1/create-report"
        );
    }
}
