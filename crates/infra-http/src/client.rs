//! Retrying JSON HTTP client
//!
//! One [`HttpClient`] is owned by each integration instance. It is bound to a
//! single base URL, carries the integration's default headers (including
//! credentials), bounds every attempt by the configured timeout and retries
//! transient failures with exponential backoff.

use infra_core::config::{Authentication, IntegrationConfiguration, RetryPolicy};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::error::{HttpError, Result};

const USER_AGENT: &str = concat!("infra-reconcile/", env!("CARGO_PKG_VERSION"));

/// Decoded response
#[derive(Debug, Clone)]
pub struct HttpResponse<T> {
    pub status: u16,
    pub headers: HeaderMap,
    /// `None` when the response body was empty
    pub body: Option<T>,
}

impl<T> HttpResponse<T> {
    pub fn into_body(self) -> Option<T> {
        self.body
    }
}

/// HTTP client bound to one base URL
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    base_url: Url,
    default_headers: HeaderMap,
    timeout: Duration,
    retry_policy: RetryPolicy,
}

impl HttpClient {
    /// Create a client for `base_url`
    pub fn new(
        base_url: &str,
        default_headers: HeaderMap,
        timeout: Duration,
        retry_policy: RetryPolicy,
    ) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| HttpError::InvalidUrl(format!("{}: {}", base_url, e)))?;
        if base_url.cannot_be_a_base() || !matches!(base_url.scheme(), "http" | "https") {
            return Err(HttpError::InvalidUrl(format!(
                "{} is not an http(s) base URL",
                base_url
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(HttpError::from_reqwest)?;

        Ok(Self {
            client,
            base_url,
            default_headers,
            timeout,
            retry_policy,
        })
    }

    /// Build a client from an integration configuration, deriving auth headers
    pub fn from_configuration(config: &IntegrationConfiguration) -> Result<Self> {
        let headers = auth_headers(&config.authentication)?;
        Self::new(
            &config.base_url,
            headers,
            config.timeout,
            config.retry_policy.clone(),
        )
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// Compose base + path + query.
    ///
    /// `path` must be relative to the base URL.
    pub fn build_url(&self, path: &str, query: &[(&str, &str)]) -> Result<Url> {
        if path.contains("://") {
            return Err(HttpError::InvalidUrl(format!(
                "path '{}' must be relative to {}",
                path, self.base_url
            )));
        }

        let base = self.base_url.as_str().trim_end_matches('/');
        let joined = match path.trim_start_matches('/') {
            "" => base.to_string(),
            rest => format!("{}/{}", base, rest),
        };

        let mut url =
            Url::parse(&joined).map_err(|e| HttpError::InvalidUrl(format!("{}: {}", joined, e)))?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query.iter());
        }
        Ok(url)
    }

    /// Default headers first, then per-call headers (per-call wins)
    fn merge_headers(&self, headers: &[(&str, &str)], has_body: bool) -> Result<HeaderMap> {
        let mut merged = self.default_headers.clone();
        for (name, value) in headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| HttpError::InvalidRequest(format!("header name '{}': {}", name, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| HttpError::InvalidRequest(format!("header '{}': {}", name, e)))?;
            merged.insert(name, value);
        }
        if has_body && !merged.contains_key(CONTENT_TYPE) {
            merged.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        }
        if !merged.contains_key(ACCEPT) {
            merged.insert(ACCEPT, HeaderValue::from_static("application/json"));
        }
        Ok(merged)
    }

    /// Issue a request and decode the response body into `T`.
    ///
    /// Retryable failures are retried per the client's [`RetryPolicy`]; once
    /// the attempts are used up the last failure is returned wrapped in
    /// [`HttpError::MaxRetriesExceeded`].
    pub async fn request<B, T>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        headers: &[(&str, &str)],
        body: Option<&B>,
    ) -> Result<HttpResponse<T>>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.build_url(path, query)?;
        let payload = body
            .map(|b| serde_json::to_vec(b))
            .transpose()
            .map_err(HttpError::EncodingFailed)?;
        let headers = self.merge_headers(headers, payload.is_some())?;

        let max_attempts = self.retry_policy.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let result = self
                .execute_once(method.clone(), url.clone(), headers.clone(), payload.clone())
                .await;

            match result {
                Ok(response) => return Ok(response),
                Err(err) if err.is_retryable() => {
                    if attempt >= max_attempts {
                        warn!(
                            "{} {} failed after {} attempts: {}",
                            method, url, attempt, err
                        );
                        return Err(HttpError::MaxRetriesExceeded {
                            attempts: attempt,
                            source: Box::new(err),
                        });
                    }
                    let delay = self.retry_policy.delay_for_attempt(attempt);
                    warn!(
                        "{} {} attempt {}/{} failed: {} (retrying in {:?})",
                        method, url, attempt, max_attempts, err, delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    debug!("{} {} failed without retry: {}", method, url, err);
                    return Err(err);
                }
            }
        }
    }

    async fn execute_once<T: DeserializeOwned>(
        &self,
        method: Method,
        url: Url,
        headers: HeaderMap,
        payload: Option<Vec<u8>>,
    ) -> Result<HttpResponse<T>> {
        let started = Instant::now();
        let mut request = self.client.request(method.clone(), url.clone()).headers(headers);
        if let Some(payload) = payload {
            request = request.body(payload);
        }

        let response = request.send().await.map_err(HttpError::from_reqwest)?;
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response.bytes().await.map_err(HttpError::from_reqwest)?;

        debug!(
            "{} {} -> {} ({} bytes, {:?})",
            method,
            url,
            status.as_u16(),
            bytes.len(),
            started.elapsed()
        );

        if !status.is_success() {
            return Err(HttpError::Status {
                status_code: status.as_u16(),
                body: String::from_utf8_lossy(&bytes).into_owned(),
                headers,
            });
        }

        let body = if bytes.iter().all(u8::is_ascii_whitespace) {
            None
        } else {
            let decoded = serde_json::from_slice::<T>(&bytes).map_err(|error| {
                HttpError::DecodingFailed {
                    error,
                    raw_body: String::from_utf8_lossy(&bytes).into_owned(),
                }
            })?;
            Some(decoded)
        };

        Ok(HttpResponse {
            status: status.as_u16(),
            headers,
            body,
        })
    }

    pub async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<HttpResponse<T>> {
        self.request::<(), T>(Method::GET, path, query, &[], None)
            .await
    }

    pub async fn post<B, T>(&self, path: &str, body: &B) -> Result<HttpResponse<T>>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.request(Method::POST, path, &[], &[], Some(body)).await
    }

    pub async fn put<B, T>(&self, path: &str, body: &B) -> Result<HttpResponse<T>>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.request(Method::PUT, path, &[], &[], Some(body)).await
    }

    pub async fn patch<B, T>(&self, path: &str, body: &B) -> Result<HttpResponse<T>>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.request(Method::PATCH, path, &[], &[], Some(body)).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<HttpResponse<T>> {
        self.request::<(), T>(Method::DELETE, path, &[], &[], None)
            .await
    }
}

/// Absolute API path from raw segments, each percent-encoded.
///
/// `encode_path(&["repos", "acme", "a#b"])` is `/repos/acme/a%23b`.
pub fn encode_path(segments: &[&str]) -> String {
    segments
        .iter()
        .map(|segment| format!("/{}", urlencoding::encode(segment)))
        .collect()
}

/// Default headers implied by an authentication variant
pub fn auth_headers(authentication: &Authentication) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    let invalid = |what: &str| HttpError::InvalidRequest(format!("Invalid {}", what));

    match authentication {
        Authentication::Bearer { token }
        | Authentication::OAuth {
            access_token: token,
            ..
        } => {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|_| invalid("bearer token"))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }
        Authentication::ApiKey { key, email } => {
            let mut key_value = HeaderValue::from_str(key).map_err(|_| invalid("api key"))?;
            key_value.set_sensitive(true);
            headers.insert(HeaderName::from_static("x-auth-key"), key_value);
            headers.insert(
                HeaderName::from_static("x-auth-email"),
                HeaderValue::from_str(email).map_err(|_| invalid("api key email"))?,
            );
        }
        Authentication::None => {}
    }
    Ok(headers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Query, State};
    use axum::http::{HeaderMap as AxumHeaders, StatusCode};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::{json, Value};
    use std::collections::{BTreeMap, HashMap};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    async fn spawn(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn policy(max_attempts: u32, initial_ms: u64) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_delay: Duration::from_millis(initial_ms),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(5),
        }
    }

    fn client(base: &str, retry: RetryPolicy) -> HttpClient {
        HttpClient::new(base, HeaderMap::new(), Duration::from_secs(5), retry).unwrap()
    }

    #[tokio::test]
    async fn test_retries_server_errors_then_succeeds() {
        let hits = Arc::new(AtomicUsize::new(0));
        let app = Router::new()
            .route(
                "/flaky",
                get(|State(hits): State<Arc<AtomicUsize>>| async move {
                    if hits.fetch_add(1, Ordering::SeqCst) < 2 {
                        (StatusCode::INTERNAL_SERVER_ERROR, "boom".to_string())
                    } else {
                        (StatusCode::OK, r#"{"ok": true}"#.to_string())
                    }
                }),
            )
            .with_state(hits.clone());
        let base = spawn(app).await;
        let client = client(&base, policy(3, 50));

        let started = Instant::now();
        let response: HttpResponse<Value> = client.get("/flaky", &[]).await.unwrap();

        assert_eq!(response.body, Some(json!({"ok": true})));
        assert_eq!(hits.load(Ordering::SeqCst), 3);
        assert!(started.elapsed() >= Duration::from_millis(50 + 100));
    }

    #[tokio::test]
    async fn test_client_errors_fail_immediately() {
        let hits = Arc::new(AtomicUsize::new(0));
        let app = Router::new()
            .route(
                "/missing",
                get(|State(hits): State<Arc<AtomicUsize>>| async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    (StatusCode::NOT_FOUND, r#"{"error": "no such thing"}"#)
                }),
            )
            .with_state(hits.clone());
        let base = spawn(app).await;
        let client = client(&base, policy(3, 500));

        let started = Instant::now();
        let err = client.get::<Value>("/missing", &[]).await.unwrap_err();

        match err {
            HttpError::Status {
                status_code, body, ..
            } => {
                assert_eq!(status_code, 404);
                assert!(body.contains("no such thing"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(started.elapsed() < Duration::from_millis(400));
    }

    #[tokio::test]
    async fn test_exhausted_retries_wrap_last_error() {
        let hits = Arc::new(AtomicUsize::new(0));
        let app = Router::new()
            .route(
                "/down",
                get(|State(hits): State<Arc<AtomicUsize>>| async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    StatusCode::SERVICE_UNAVAILABLE
                }),
            )
            .with_state(hits.clone());
        let base = spawn(app).await;
        let client = client(&base, policy(2, 10));

        let err = client.get::<Value>("/down", &[]).await.unwrap_err();
        match &err {
            HttpError::MaxRetriesExceeded { attempts, source } => {
                assert_eq!(*attempts, 2);
                assert_eq!(source.status_code(), Some(503));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_rate_limit_is_retried() {
        let hits = Arc::new(AtomicUsize::new(0));
        let app = Router::new()
            .route(
                "/limited",
                get(|State(hits): State<Arc<AtomicUsize>>| async move {
                    if hits.fetch_add(1, Ordering::SeqCst) == 0 {
                        (StatusCode::TOO_MANY_REQUESTS, String::new())
                    } else {
                        (StatusCode::OK, "[1, 2, 3]".to_string())
                    }
                }),
            )
            .with_state(hits.clone());
        let base = spawn(app).await;
        let client = client(&base, policy(3, 10));

        let response: HttpResponse<Vec<u32>> = client.get("/limited", &[]).await.unwrap();
        assert_eq!(response.body, Some(vec![1, 2, 3]));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_empty_body_decodes_to_none() {
        let app = Router::new().route(
            "/gone",
            axum::routing::delete(|| async { StatusCode::NO_CONTENT }),
        );
        let base = spawn(app).await;
        let client = client(&base, policy(1, 10));

        let response: HttpResponse<Value> = client.delete("/gone").await.unwrap();
        assert_eq!(response.status, 204);
        assert!(response.body.is_none());
    }

    #[tokio::test]
    async fn test_decode_failure_keeps_raw_body_and_is_not_retried() {
        let hits = Arc::new(AtomicUsize::new(0));
        let app = Router::new()
            .route(
                "/garbage",
                get(|State(hits): State<Arc<AtomicUsize>>| async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    "definitely not json"
                }),
            )
            .with_state(hits.clone());
        let base = spawn(app).await;
        let client = client(&base, policy(3, 10));

        let err = client.get::<Value>("/garbage", &[]).await.unwrap_err();
        match err {
            HttpError::DecodingFailed { raw_body, .. } => {
                assert_eq!(raw_body, "definitely not json")
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    async fn echo_headers(headers: AxumHeaders) -> Json<Value> {
        let map: BTreeMap<String, String> = headers
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or_default().to_string()))
            .collect();
        Json(json!(map))
    }

    #[tokio::test]
    async fn test_header_precedence_and_content_type() {
        let app = Router::new().route("/headers", get(echo_headers).post(echo_headers));
        let base = spawn(app).await;

        let mut defaults = HeaderMap::new();
        defaults.insert("x-team", HeaderValue::from_static("platform"));
        defaults.insert("x-trace", HeaderValue::from_static("default"));
        let client = HttpClient::new(&base, defaults, Duration::from_secs(5), policy(1, 10)).unwrap();

        let response: HttpResponse<Value> = client
            .request::<(), Value>(Method::GET, "/headers", &[], &[("x-trace", "per-call")], None)
            .await
            .unwrap();
        let seen = response.body.unwrap();
        assert_eq!(seen["x-team"], "platform");
        assert_eq!(seen["x-trace"], "per-call");
        assert!(seen.get("content-type").is_none());

        let response: HttpResponse<Value> =
            client.post("/headers", &json!({"name": "x"})).await.unwrap();
        assert_eq!(response.body.unwrap()["content-type"], "application/json");
    }

    #[tokio::test]
    async fn test_auth_headers_from_configuration() {
        let app = Router::new().route("/headers", get(echo_headers));
        let base = spawn(app).await;

        let config = IntegrationConfiguration::new(
            base.clone(),
            Authentication::ApiKey {
                key: "k-123".into(),
                email: "ops@example.com".into(),
            },
        );
        let client = HttpClient::from_configuration(&config).unwrap();
        let seen = client.get::<Value>("/headers", &[]).await.unwrap().body.unwrap();
        assert_eq!(seen["x-auth-key"], "k-123");
        assert_eq!(seen["x-auth-email"], "ops@example.com");

        let config = IntegrationConfiguration::new(
            base,
            Authentication::Bearer {
                token: "t-456".into(),
            },
        );
        let client = HttpClient::from_configuration(&config).unwrap();
        let seen = client.get::<Value>("/headers", &[]).await.unwrap().body.unwrap();
        assert_eq!(seen["authorization"], "Bearer t-456");
    }

    #[tokio::test]
    async fn test_base_path_and_query_are_composed() {
        let app = Router::new().route(
            "/client/v4/zones",
            get(|Query(params): Query<HashMap<String, String>>| async move { Json(json!(params)) }),
        );
        let base = spawn(app).await;
        let client = client(&format!("{}/client/v4/", base), policy(1, 10));

        let response: HttpResponse<Value> = client
            .get("/zones", &[("account.id", "acc 1"), ("per_page", "50")])
            .await
            .unwrap();
        assert_eq!(
            response.body.unwrap(),
            json!({"account.id": "acc 1", "per_page": "50"})
        );
    }

    #[test]
    fn test_invalid_urls() {
        let err = HttpClient::new("not a url", HeaderMap::new(), Duration::from_secs(1), policy(1, 1))
            .unwrap_err();
        assert!(matches!(err, HttpError::InvalidUrl(_)));

        let err = HttpClient::new("mailto:ops@example.com", HeaderMap::new(), Duration::from_secs(1), policy(1, 1))
            .unwrap_err();
        assert!(matches!(err, HttpError::InvalidUrl(_)));

        let client = client("https://api.example.com/v1", policy(1, 1));
        let err = client.build_url("https://evil.example.com/x", &[]).unwrap_err();
        assert!(matches!(err, HttpError::InvalidUrl(_)));

        let url = client.build_url("items/1", &[]).unwrap();
        assert_eq!(url.as_str(), "https://api.example.com/v1/items/1");
    }

    #[test]
    fn test_encoded_segments_stay_in_path() {
        assert_eq!(encode_path(&["repos", "acme", "site"]), "/repos/acme/site");
        assert_eq!(encode_path(&[]), "");

        let path = encode_path(&["repos", "acme", "site", "environments", "qa#1?x=y/z"]);
        assert_eq!(path, "/repos/acme/site/environments/qa%231%3Fx%3Dy%2Fz");

        let client = client("https://api.example.com", policy(1, 1));
        let url = client.build_url(&path, &[]).unwrap();
        assert_eq!(url.path(), "/repos/acme/site/environments/qa%231%3Fx%3Dy%2Fz");
        assert_eq!(url.query(), None);
        assert_eq!(url.fragment(), None);
    }

    #[tokio::test]
    async fn test_encoding_failure_sends_nothing() {
        let hits = Arc::new(AtomicUsize::new(0));
        let app = Router::new()
            .route(
                "/items",
                post(|State(hits): State<Arc<AtomicUsize>>| async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    StatusCode::CREATED
                }),
            )
            .with_state(hits.clone());
        let base = spawn(app).await;
        let client = client(&base, policy(3, 10));

        let mut unencodable: HashMap<(u8, u8), u8> = HashMap::new();
        unencodable.insert((1, 2), 3);
        let err = client
            .post::<_, Value>("/items", &unencodable)
            .await
            .unwrap_err();
        assert!(matches!(err, HttpError::EncodingFailed(_)));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_timeouts_are_retried() {
        let hits = Arc::new(AtomicUsize::new(0));
        let app = Router::new()
            .route(
                "/slow",
                get(|State(hits): State<Arc<AtomicUsize>>| async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    "{}"
                }),
            )
            .with_state(hits.clone());
        let base = spawn(app).await;
        let client =
            HttpClient::new(&base, HeaderMap::new(), Duration::from_millis(100), policy(2, 10)).unwrap();

        let err = client.get::<Value>("/slow", &[]).await.unwrap_err();
        assert!(matches!(err.root(), HttpError::Timeout(_)));
        assert!(matches!(err, HttpError::MaxRetriesExceeded { attempts: 2, .. }));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_connection_refused_is_retryable() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = client(&format!("http://{}", addr), policy(2, 10));
        let err = client.get::<Value>("/", &[]).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(matches!(err, HttpError::MaxRetriesExceeded { attempts: 2, .. }));
        assert!(matches!(
            err.root(),
            HttpError::Connection(_) | HttpError::Transport(_)
        ));
    }
}
