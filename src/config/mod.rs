//! Configuration types for the Snyk client.

use crate::auth::AuthMethod;
use crate::errors::{SnykError, SnykErrorKind, SnykResult};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Default Snyk API base URL.
pub const DEFAULT_BASE_URL: &str = "https://api.snyk.io";

/// Default REST API version (date-based `version` query parameter).
pub const DEFAULT_API_VERSION: &str = "2024-10-15";

/// Default request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default User-Agent header.
pub const DEFAULT_USER_AGENT: &str = "integrations-snyk/0.1.0";

/// Default `limit` query value for list endpoints.
pub const DEFAULT_PAGE_LIMIT: u32 = 100;

/// Connection-level retry configuration.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum retries after the first attempt.
    pub max_retries: u32,
    /// Base of the exponential backoff, `factor * 2^(attempt - 1)`.
    pub backoff_factor: Duration,
    /// Upper bound for a single backoff sleep.
    pub max_backoff: Duration,
    /// Status codes that trigger a retry.
    pub status_forcelist: HashSet<u16>,
    /// Methods that may be retried. Non-idempotent methods must stay out.
    pub allowed_methods: HashSet<reqwest::Method>,
    /// Enable retries.
    pub enabled: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 15,
            backoff_factor: Duration::from_millis(500),
            max_backoff: Duration::from_secs(120),
            status_forcelist: [429, 500, 502, 503, 504].into_iter().collect(),
            allowed_methods: [
                reqwest::Method::GET,
                reqwest::Method::HEAD,
                reqwest::Method::PUT,
                reqwest::Method::DELETE,
                reqwest::Method::OPTIONS,
            ]
            .into_iter()
            .collect(),
            enabled: true,
        }
    }
}

/// Rate-limit cooldown configuration.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Cooldown applied when a 429 carries no usable Retry-After.
    pub default_retry_after: Duration,
    /// Lower bound of the jitter added after a cooldown wait.
    pub jitter_min: Duration,
    /// Upper bound of the jitter added after a cooldown wait.
    pub jitter_max: Duration,
    /// Longest window a single 429 may open, whatever Retry-After says.
    pub max_cooldown: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            default_retry_after: Duration::from_secs(5),
            jitter_min: Duration::from_millis(100),
            jitter_max: Duration::from_millis(500),
            max_cooldown: Duration::from_secs(120),
        }
    }
}

/// Task dispatcher configuration.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Maximum concurrently running tasks.
    pub max_workers: usize,
}

impl DispatcherConfig {
    /// `min(32, cpus + 4)`.
    pub fn default_max_workers() -> usize {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        (cpus + 4).min(32)
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_workers: Self::default_max_workers(),
        }
    }
}

/// Connection pool configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum idle connections per host.
    pub max_idle_per_host: usize,
    /// Idle connection timeout.
    pub idle_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_idle_per_host: 32,
            idle_timeout: Duration::from_secs(90),
        }
    }
}

/// When relationships are resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadingStrategy {
    /// On first property access.
    #[default]
    Lazy,
    /// Immediately after construction, one level deep.
    Eager,
}

impl LoadingStrategy {
    fn as_u8(self) -> u8 {
        match self {
            Self::Lazy => 0,
            Self::Eager => 1,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Eager,
            _ => Self::Lazy,
        }
    }
}

impl fmt::Display for LoadingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lazy => write!(f, "lazy"),
            Self::Eager => write!(f, "eager"),
        }
    }
}

impl FromStr for LoadingStrategy {
    type Err = SnykError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lazy" => Ok(Self::Lazy),
            "eager" => Ok(Self::Eager),
            other => Err(SnykError::new(
                SnykErrorKind::InvalidParameter,
                format!("Unknown loading strategy '{}'", other),
            )),
        }
    }
}

/// Shared, runtime-mutable loading strategy.
///
/// Clones observe the same value. Resolvers read it at resolution time,
/// so changing it only affects relationships that are not yet cached.
#[derive(Debug, Clone, Default)]
pub struct LoadingStrategyHandle {
    inner: Arc<AtomicU8>,
}

impl LoadingStrategyHandle {
    /// Creates a handle holding `strategy`.
    pub fn new(strategy: LoadingStrategy) -> Self {
        Self {
            inner: Arc::new(AtomicU8::new(strategy.as_u8())),
        }
    }

    /// Current strategy.
    pub fn get(&self) -> LoadingStrategy {
        LoadingStrategy::from_u8(self.inner.load(Ordering::Acquire))
    }

    /// Replaces the strategy.
    pub fn set(&self, strategy: LoadingStrategy) {
        self.inner.store(strategy.as_u8(), Ordering::Release);
    }

    /// True when eager loading is active.
    pub fn is_eager(&self) -> bool {
        self.get() == LoadingStrategy::Eager
    }
}

/// Snyk client configuration.
#[derive(Debug, Clone)]
pub struct SnykConfig {
    /// API base URL.
    pub base_url: String,
    /// API version query parameter.
    pub api_version: String,
    /// Authentication method.
    pub auth: Option<AuthMethod>,
    /// Request timeout.
    pub timeout: Duration,
    /// Connect timeout.
    pub connect_timeout: Duration,
    /// User-Agent header.
    pub user_agent: String,
    /// Retry configuration.
    pub retry: RetryConfig,
    /// Rate-limit cooldown configuration.
    pub rate_limit: RateLimitConfig,
    /// Dispatcher configuration.
    pub dispatcher: DispatcherConfig,
    /// Connection pool configuration.
    pub pool: PoolConfig,
    /// Default `limit` for list endpoints.
    pub page_limit: u32,
    /// Initial loading strategy.
    pub loading_strategy: LoadingStrategy,
}

impl Default for SnykConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_version: DEFAULT_API_VERSION.to_string(),
            auth: None,
            timeout: DEFAULT_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            retry: RetryConfig::default(),
            rate_limit: RateLimitConfig::default(),
            dispatcher: DispatcherConfig::default(),
            pool: PoolConfig::default(),
            page_limit: DEFAULT_PAGE_LIMIT,
            loading_strategy: LoadingStrategy::default(),
        }
    }
}

impl SnykConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> SnykConfigBuilder {
        SnykConfigBuilder::new()
    }

    /// Builds a configuration from `SNYK_*` environment variables.
    pub fn from_env() -> SnykResult<Self> {
        let mut builder = SnykConfigBuilder::new().auth(AuthMethod::from_env()?);

        if let Ok(base_url) = std::env::var("SNYK_API") {
            builder = builder.base_url(base_url);
        }

        if let Some(retries) = env_parse::<u32>("SNYK_MAX_RETRIES") {
            builder = builder.max_retries(retries);
        }

        if let Some(factor) = env_parse::<f64>("SNYK_BACKOFF_FACTOR") {
            match Duration::try_from_secs_f64(factor) {
                Ok(factor) => builder = builder.backoff_factor(factor),
                Err(_) => warn!(value = factor, "Ignoring out of range SNYK_BACKOFF_FACTOR"),
            }
        }

        if let Some(workers) = env_parse::<usize>("SNYK_MAX_WORKERS") {
            builder = builder.max_workers(workers);
        }

        if let Ok(strategy) = std::env::var("SNYK_LOADING_STRATEGY") {
            match strategy.parse::<LoadingStrategy>() {
                Ok(s) => builder = builder.loading_strategy(s),
                Err(_) => {
                    warn!(value = %strategy, "Invalid SNYK_LOADING_STRATEGY, using lazy");
                    builder = builder.loading_strategy(LoadingStrategy::Lazy);
                }
            }
        }

        builder.build()
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SnykResult<()> {
        if self.base_url.is_empty() {
            return Err(SnykError::new(
                SnykErrorKind::InvalidBaseUrl,
                "Base URL cannot be empty",
            ));
        }

        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(SnykError::new(
                SnykErrorKind::InvalidBaseUrl,
                "Base URL must start with http:// or https://",
            ));
        }

        if url::Url::parse(&self.base_url).is_err() {
            return Err(SnykError::new(
                SnykErrorKind::InvalidBaseUrl,
                format!("Base URL '{}' is not a valid URL", self.base_url),
            ));
        }

        if self.auth.is_none() {
            return Err(SnykError::new(
                SnykErrorKind::MissingAuth,
                "An API token or OAuth token is required",
            ));
        }

        if self.dispatcher.max_workers == 0 {
            return Err(SnykError::configuration("max_workers must be at least 1"));
        }

        if self.rate_limit.max_cooldown.is_zero() {
            return Err(SnykError::configuration("max_cooldown must be positive"));
        }

        if self.rate_limit.jitter_min > self.rate_limit.jitter_max {
            return Err(SnykError::configuration(
                "jitter_min must not exceed jitter_max",
            ));
        }

        if self.page_limit == 0 {
            return Err(SnykError::configuration("page_limit must be at least 1"));
        }

        Ok(())
    }
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(variable = name, value = %raw, "Ignoring unparsable environment value");
            None
        }
    }
}

/// Builder for SnykConfig.
#[derive(Debug, Default)]
pub struct SnykConfigBuilder {
    base_url: Option<String>,
    api_version: Option<String>,
    auth: Option<AuthMethod>,
    timeout: Option<Duration>,
    connect_timeout: Option<Duration>,
    user_agent: Option<String>,
    retry: Option<RetryConfig>,
    rate_limit: Option<RateLimitConfig>,
    dispatcher: Option<DispatcherConfig>,
    pool: Option<PoolConfig>,
    page_limit: Option<u32>,
    loading_strategy: Option<LoadingStrategy>,
}

impl SnykConfigBuilder {
    /// Creates a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the base URL.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into().trim_end_matches('/').to_string());
        self
    }

    /// Sets the API version.
    pub fn api_version(mut self, version: impl Into<String>) -> Self {
        self.api_version = Some(version.into());
        self
    }

    /// Sets the authentication method.
    pub fn auth(mut self, auth: AuthMethod) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Shorthand for `auth(AuthMethod::token(..))`.
    pub fn token(self, token: impl Into<String>) -> Self {
        self.auth(AuthMethod::token(token))
    }

    /// Sets the request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Sets the User-Agent header.
    pub fn user_agent(mut self, ua: impl Into<String>) -> Self {
        self.user_agent = Some(ua.into());
        self
    }

    /// Sets the retry configuration.
    pub fn retry(mut self, config: RetryConfig) -> Self {
        self.retry = Some(config);
        self
    }

    /// Sets the maximum number of connection retries.
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.retry.get_or_insert_with(RetryConfig::default).max_retries = retries;
        self
    }

    /// Sets the backoff factor.
    pub fn backoff_factor(mut self, factor: Duration) -> Self {
        self.retry.get_or_insert_with(RetryConfig::default).backoff_factor = factor;
        self
    }

    /// Disables connection retries.
    pub fn no_retry(mut self) -> Self {
        self.retry = Some(RetryConfig {
            enabled: false,
            ..Default::default()
        });
        self
    }

    /// Sets the rate-limit configuration.
    pub fn rate_limit(mut self, config: RateLimitConfig) -> Self {
        self.rate_limit = Some(config);
        self
    }

    /// Caps the cooldown window a single 429 may open.
    pub fn max_cooldown(mut self, max: Duration) -> Self {
        self.rate_limit.get_or_insert_with(RateLimitConfig::default).max_cooldown = max;
        self
    }

    /// Sets the dispatcher pool size.
    pub fn max_workers(mut self, workers: usize) -> Self {
        self.dispatcher = Some(DispatcherConfig {
            max_workers: workers,
        });
        self
    }

    /// Sets the connection pool configuration.
    pub fn pool(mut self, config: PoolConfig) -> Self {
        self.pool = Some(config);
        self
    }

    /// Sets the default `limit` query value.
    pub fn page_limit(mut self, limit: u32) -> Self {
        self.page_limit = Some(limit);
        self
    }

    /// Sets the initial loading strategy.
    pub fn loading_strategy(mut self, strategy: LoadingStrategy) -> Self {
        self.loading_strategy = Some(strategy);
        self
    }

    /// Builds the configuration.
    pub fn build(self) -> SnykResult<SnykConfig> {
        let config = SnykConfig {
            base_url: self.base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            api_version: self
                .api_version
                .unwrap_or_else(|| DEFAULT_API_VERSION.to_string()),
            auth: self.auth,
            timeout: self.timeout.unwrap_or(DEFAULT_TIMEOUT),
            connect_timeout: self.connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT),
            user_agent: self
                .user_agent
                .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
            retry: self.retry.unwrap_or_default(),
            rate_limit: self.rate_limit.unwrap_or_default(),
            dispatcher: self.dispatcher.unwrap_or_default(),
            pool: self.pool.unwrap_or_default(),
            page_limit: self.page_limit.unwrap_or(DEFAULT_PAGE_LIMIT),
            loading_strategy: self.loading_strategy.unwrap_or_default(),
        };

        config.validate()?;
        Ok(config)
    }
}
