//! Snyk API client implementation.

use crate::auth::{AuthManager, AuthMethod};
use crate::config::{LoadingStrategy, LoadingStrategyHandle, SnykConfig, SnykConfigBuilder};
use crate::dispatch::TaskDispatcher;
use crate::errors::{SnykError, SnykErrorKind, SnykResult};
use crate::observability::{redact_header, Metrics, RequestTimer, TracingHooks};
use crate::pagination::{Paginator, QueryParams};
use crate::resilience::{
    parse_retry_after, AttemptOutcome, RateLimitCooldown, ResilienceOrchestrator, RetryPolicy,
};
use bytes::Bytes;
use reqwest::header::{HeaderMap, ACCEPT, AUTHORIZATION, CONTENT_TYPE, RETRY_AFTER, USER_AGENT};
use reqwest::{Client, Method};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// JSON:API media type used by the REST API.
pub const JSON_API: &str = "application/vnd.api+json";

/// A fully read HTTP response.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    status: u16,
    headers: HeaderMap,
    body: Bytes,
}

impl ApiResponse {
    /// Creates a response from its parts.
    pub fn new(status: u16, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    /// HTTP status code.
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Response headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Raw body.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Returns true for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body as lossy UTF-8.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Deserializes the body.
    pub fn json<T: DeserializeOwned>(&self) -> SnykResult<T> {
        serde_json::from_slice(&self.body).map_err(|e| {
            SnykError::deserialization(format!("Failed to deserialize response: {}", e))
        })
    }

    /// Deserializes the body into a JSON value.
    pub fn json_value(&self) -> SnykResult<Value> {
        self.json::<Value>()
    }
}

impl AttemptOutcome for ApiResponse {
    fn status(&self) -> u16 {
        self.status
    }

    fn retry_after(&self) -> Option<&str> {
        self.headers.get(RETRY_AFTER).and_then(|v| v.to_str().ok())
    }
}

/// Snyk API client.
///
/// Owns the HTTP pool, the shared rate-limit cooldown and the task
/// dispatcher. Entities hold it behind an `Arc`.
pub struct SnykClient {
    /// HTTP client.
    http: Client,
    /// Configuration.
    config: SnykConfig,
    /// Authentication manager.
    auth: AuthManager,
    /// Retry and cooldown.
    resilience: ResilienceOrchestrator,
    /// Worker pool for entity construction.
    dispatcher: TaskDispatcher,
    /// Counters.
    metrics: Arc<Metrics>,
    /// Runtime loading strategy.
    loading_strategy: LoadingStrategyHandle,
}

impl SnykClient {
    /// Creates a new Snyk client.
    pub fn new(config: SnykConfig) -> SnykResult<Self> {
        config.validate()?;

        let http = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .pool_max_idle_per_host(config.pool.max_idle_per_host)
            .pool_idle_timeout(config.pool.idle_timeout)
            .build()
            .map_err(|e| {
                SnykError::new(
                    SnykErrorKind::InvalidConfiguration,
                    format!("Failed to create HTTP client: {}", e),
                )
            })?;

        let auth = AuthManager::new(config.auth.clone().ok_or_else(|| {
            SnykError::new(SnykErrorKind::MissingAuth, "Authentication required")
        })?)?;

        let metrics = Arc::new(Metrics::new());

        let resilience = ResilienceOrchestrator::new(
            RetryPolicy::new(config.retry.clone()),
            RateLimitCooldown::new(config.rate_limit.clone()),
            metrics.clone(),
        );

        let dispatcher = TaskDispatcher::new(config.dispatcher.max_workers, metrics.clone());
        let loading_strategy = LoadingStrategyHandle::new(config.loading_strategy);

        Ok(Self {
            http,
            config,
            auth,
            resilience,
            dispatcher,
            metrics,
            loading_strategy,
        })
    }

    /// Creates a client from `SNYK_*` environment variables.
    pub fn from_env() -> SnykResult<Self> {
        Self::new(SnykConfig::from_env()?)
    }

    /// Creates a new client builder.
    pub fn builder() -> SnykClientBuilder {
        SnykClientBuilder::new()
    }

    /// Gets the base URL.
    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    /// Gets the configuration.
    pub fn config(&self) -> &SnykConfig {
        &self.config
    }

    /// Gets the metrics collector.
    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Gets the task dispatcher.
    pub fn dispatcher(&self) -> &TaskDispatcher {
        &self.dispatcher
    }

    /// Gets the shared cooldown.
    pub fn cooldown(&self) -> &RateLimitCooldown {
        self.resilience.cooldown()
    }

    /// Gets the runtime loading strategy handle.
    pub fn loading_strategy(&self) -> &LoadingStrategyHandle {
        &self.loading_strategy
    }

    /// Switches the loading strategy for resolutions that have not run yet.
    pub fn set_loading_strategy(&self, strategy: LoadingStrategy) {
        self.loading_strategy.set(strategy);
    }

    /// `version=<api_version>`.
    pub fn version_params(&self) -> QueryParams {
        QueryParams::new().with("version", &self.config.api_version)
    }

    /// `version=<api_version>&limit=<page_limit>`, the defaults for list endpoints.
    pub fn list_params(&self) -> QueryParams {
        self.version_params().with("limit", self.config.page_limit)
    }

    // HTTP methods

    /// Makes a GET request.
    pub async fn get(&self, endpoint: &str, params: &QueryParams) -> SnykResult<ApiResponse> {
        self.request(Method::GET, endpoint, params, None, None).await
    }

    /// Makes a GET request and deserializes the body.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        params: &QueryParams,
    ) -> SnykResult<T> {
        self.get(endpoint, params).await?.json()
    }

    /// Makes a POST request. POST is never retried.
    pub async fn post<B: Serialize>(
        &self,
        endpoint: &str,
        params: &QueryParams,
        body: &B,
    ) -> SnykResult<ApiResponse> {
        let body = to_json(body)?;
        self.request(Method::POST, endpoint, params, Some(&body), None)
            .await
    }

    /// Makes a PUT request.
    pub async fn put<B: Serialize>(
        &self,
        endpoint: &str,
        params: &QueryParams,
        body: &B,
    ) -> SnykResult<ApiResponse> {
        let body = to_json(body)?;
        self.request(Method::PUT, endpoint, params, Some(&body), None)
            .await
    }

    /// Makes a DELETE request.
    pub async fn delete(&self, endpoint: &str, params: &QueryParams) -> SnykResult<ApiResponse> {
        self.request(Method::DELETE, endpoint, params, None, None)
            .await
    }

    /// Paginates a list endpoint.
    pub fn paginate(&self, endpoint: impl Into<String>, params: QueryParams) -> Paginator<'_> {
        Paginator::new(self, endpoint, params)
    }

    /// Sends a request through the cooldown gate and the retry policy.
    ///
    /// `endpoint` is either a path relative to the base URL or an absolute
    /// URL, used as-is. Non-2xx final responses become errors carrying the
    /// status code and body.
    pub async fn request(
        &self,
        method: Method,
        endpoint: &str,
        params: &QueryParams,
        body: Option<&Value>,
        headers: Option<&HeaderMap>,
    ) -> SnykResult<ApiResponse> {
        let url = self.build_url(endpoint, params)?;
        let auth_header = self.auth.get_auth_header();
        let body_bytes = body.map(serde_json::to_vec).transpose().map_err(|e| {
            SnykError::new(
                SnykErrorKind::InvalidParameter,
                format!("Failed to serialize request body: {}", e),
            )
        })?;
        if let Some(extra) = headers {
            for (name, value) in extra {
                tracing::trace!(
                    header = %name,
                    value = %redact_header(name.as_str(), value.to_str().unwrap_or("<binary>")),
                    "Extra request header"
                );
            }
        }

        let response = self
            .resilience
            .execute(&method, &url, || {
                let mut request = self
                    .http
                    .request(method.clone(), &url)
                    .header(AUTHORIZATION, &auth_header)
                    .header(USER_AGENT, &self.config.user_agent)
                    .header(ACCEPT, JSON_API);

                if let Some(bytes) = &body_bytes {
                    request = request.header(CONTENT_TYPE, JSON_API).body(bytes.clone());
                }
                if let Some(extra) = headers {
                    request = request.headers(extra.clone());
                }

                self.send_once(method.as_str(), &url, request)
            })
            .await;

        match response {
            Ok(r) if r.is_success() => Ok(r),
            Ok(r) => {
                self.metrics.record_failure();
                let mut err = SnykError::from_response(r.status(), r.text());
                if let Some(after) = AttemptOutcome::retry_after(&r).and_then(parse_retry_after) {
                    err = err.with_retry_after(after);
                }
                tracing::debug!(status = r.status(), url = %url, "Snyk API request failed");
                Err(err)
            }
            Err(e) => {
                self.metrics.record_failure();
                Err(e)
            }
        }
    }

    /// Waits for the dispatcher to drain and shuts it down.
    ///
    /// Call once at the end of the client's life; a second call fails.
    pub async fn close(&self) -> SnykResult<()> {
        self.dispatcher.close().await
    }

    async fn send_once(
        &self,
        method: &str,
        url: &str,
        request: reqwest::RequestBuilder,
    ) -> SnykResult<ApiResponse> {
        TracingHooks::on_request_start(method, url);
        let timer = RequestTimer::new(self.metrics.clone());

        let response = request.send().await.map_err(map_reqwest_error)?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(map_reqwest_error)?;

        TracingHooks::on_request_complete(method, url, status, timer.elapsed());
        if (200..300).contains(&status) {
            timer.success();
        } else {
            timer.finish();
        }

        Ok(ApiResponse::new(status, headers, body))
    }

    fn build_url(&self, endpoint: &str, params: &QueryParams) -> SnykResult<String> {
        let mut url = if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            endpoint.to_string()
        } else {
            let base = self.config.base_url.trim_end_matches('/');
            let path = endpoint.trim_start_matches('/');
            format!("{}/{}", base, path)
        };

        if !params.is_empty() {
            let query = params.to_query_string()?;
            url.push(if url.contains('?') { '&' } else { '?' });
            url.push_str(&query);
        }

        Ok(url)
    }
}

fn to_json<B: Serialize>(body: &B) -> SnykResult<Value> {
    serde_json::to_value(body).map_err(|e| {
        SnykError::new(
            SnykErrorKind::InvalidParameter,
            format!("Failed to serialize request body: {}", e),
        )
    })
}

fn map_reqwest_error(e: reqwest::Error) -> SnykError {
    if e.is_timeout() {
        SnykError::timeout(format!("Request timed out: {}", e)).with_cause(e)
    } else if e.is_builder() {
        SnykError::new(
            SnykErrorKind::InvalidParameter,
            format!("Invalid request: {}", e),
        )
        .with_cause(e)
    } else {
        SnykError::new(
            SnykErrorKind::ConnectionFailed,
            format!("Connection failed: {}", e),
        )
        .with_cause(e)
    }
}

/// Builder for SnykClient.
pub struct SnykClientBuilder {
    config_builder: SnykConfigBuilder,
}

impl SnykClientBuilder {
    /// Creates a new builder.
    pub fn new() -> Self {
        Self {
            config_builder: SnykConfig::builder(),
        }
    }

    /// Sets the base URL.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config_builder = self.config_builder.base_url(url);
        self
    }

    /// Sets the authentication method.
    pub fn auth(mut self, auth: AuthMethod) -> Self {
        self.config_builder = self.config_builder.auth(auth);
        self
    }

    /// Sets an API token.
    pub fn token(self, token: impl Into<String>) -> Self {
        self.auth(AuthMethod::token(token))
    }

    /// Sets the timeout.
    pub fn timeout(mut self, timeout: std::time::Duration) -> Self {
        self.config_builder = self.config_builder.timeout(timeout);
        self
    }

    /// Sets the maximum number of connection retries.
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.config_builder = self.config_builder.max_retries(retries);
        self
    }

    /// Sets the backoff factor.
    pub fn backoff_factor(mut self, factor: std::time::Duration) -> Self {
        self.config_builder = self.config_builder.backoff_factor(factor);
        self
    }

    /// Sets the dispatcher pool size.
    pub fn max_workers(mut self, workers: usize) -> Self {
        self.config_builder = self.config_builder.max_workers(workers);
        self
    }

    /// Sets the initial loading strategy.
    pub fn loading_strategy(mut self, strategy: LoadingStrategy) -> Self {
        self.config_builder = self.config_builder.loading_strategy(strategy);
        self
    }

    /// Disables retries.
    pub fn no_retry(mut self) -> Self {
        self.config_builder = self.config_builder.no_retry();
        self
    }

    /// Builds the client.
    pub fn build(self) -> SnykResult<SnykClient> {
        let config = self.config_builder.build()?;
        SnykClient::new(config)
    }
}

impl Default for SnykClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
