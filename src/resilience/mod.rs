//! Resilience patterns for the Snyk API client.
//!
//! Two layers cooperate on every call:
//!
//! * [`RetryPolicy`] retries *this* request on connection failures and on
//!   statuses in the forcelist, with exponential backoff, for idempotent
//!   methods only.
//! * [`RateLimitCooldown`] is shared by every in-flight call of a client.
//!   A 429 opens a cooldown window and all subsequent attempts wait for it
//!   to close, plus a random jitter, before touching the network.

use crate::config::{RateLimitConfig, RetryConfig};
use crate::errors::SnykResult;
use crate::observability::{Metrics, TracingHooks};
use parking_lot::Mutex;
use rand::Rng;
use reqwest::Method;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;

/// The parts of a response the resilience layer inspects.
pub trait AttemptOutcome {
    /// HTTP status code.
    fn status(&self) -> u16;
    /// Raw `Retry-After` header value, if any.
    fn retry_after(&self) -> Option<&str>;
}

/// Connection-level retry decisions and backoff.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    /// Creates a new retry policy.
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Whether `method` may be retried at all.
    pub fn allows_method(&self, method: &Method) -> bool {
        self.config.enabled && self.config.allowed_methods.contains(method)
    }

    /// Whether another attempt is allowed after `retries_made` retries.
    pub fn has_budget(&self, retries_made: u32) -> bool {
        retries_made < self.config.max_retries
    }

    /// Whether a response with `status` should be retried.
    pub fn should_retry_status(&self, method: &Method, status: u16, retries_made: u32) -> bool {
        self.allows_method(method)
            && self.has_budget(retries_made)
            && self.config.status_forcelist.contains(&status)
    }

    /// Backoff before retry number `retry` (1-based): `factor * 2^(retry-1)`, capped.
    pub fn backoff(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(31) as i32;
        let secs = self.config.backoff_factor.as_secs_f64() * 2f64.powi(exp);
        let capped = secs.min(self.config.max_backoff.as_secs_f64());
        Duration::try_from_secs_f64(capped).unwrap_or(self.config.max_backoff)
    }
}

/// Parses a numeric `Retry-After` header value in seconds.
///
/// HTTP-date values, negative numbers and garbage yield `None`. Values too
/// large for a `Duration` saturate; the cooldown caps them.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    match value.parse::<f64>().ok()? {
        s if s.is_nan() || s < 0.0 => None,
        s if s == 0.0 => Some(Duration::ZERO),
        s => Some(Duration::try_from_secs_f64(s).unwrap_or(Duration::MAX)),
    }
}

/// Shared cooldown window opened by 429 responses.
#[derive(Debug)]
pub struct RateLimitCooldown {
    until: Mutex<Option<Instant>>,
    config: RateLimitConfig,
}

impl RateLimitCooldown {
    /// Creates a closed cooldown.
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            until: Mutex::new(None),
            config,
        }
    }

    /// Opens or extends the window after a 429 and returns its length.
    ///
    /// The deadline is `max(current, now + duration)`: an earlier, longer
    /// window is never shortened and windows never add up. No window is
    /// longer than `max_cooldown`.
    pub fn apply(&self, retry_after: Option<&str>) -> Duration {
        let duration = retry_after
            .and_then(parse_retry_after)
            .unwrap_or(self.config.default_retry_after)
            .min(self.config.max_cooldown);
        let now = Instant::now();
        let candidate = now.checked_add(duration).unwrap_or(now);

        let mut until = self.until.lock();
        *until = Some(match *until {
            Some(existing) if existing > candidate => existing,
            _ => candidate,
        });
        duration
    }

    /// Time left in the current window.
    pub fn remaining(&self) -> Option<Duration> {
        let until = (*self.until.lock())?;
        let now = Instant::now();
        (until > now).then(|| until - now)
    }

    /// Waits for the window to close, then sleeps a random jitter.
    ///
    /// Returns true if the caller had to wait.
    pub async fn wait(&self) -> bool {
        let mut waited = false;
        // Loop: the window may be extended by another 429 while we sleep.
        while let Some(remaining) = self.remaining() {
            TracingHooks::on_cooldown_wait(remaining);
            sleep(remaining).await;
            waited = true;
        }
        if waited {
            sleep(self.jitter()).await;
        }
        waited
    }

    fn jitter(&self) -> Duration {
        let min = self.config.jitter_min.as_secs_f64();
        let max = self.config.jitter_max.as_secs_f64();
        if max <= min {
            return self.config.jitter_min;
        }
        Duration::from_secs_f64(rand::thread_rng().gen_range(min..max))
    }
}

/// Runs attempts through the cooldown gate and the retry policy.
pub struct ResilienceOrchestrator {
    retry: RetryPolicy,
    cooldown: RateLimitCooldown,
    metrics: Arc<Metrics>,
}

impl ResilienceOrchestrator {
    /// Creates a new resilience orchestrator.
    pub fn new(retry: RetryPolicy, cooldown: RateLimitCooldown, metrics: Arc<Metrics>) -> Self {
        Self {
            retry,
            cooldown,
            metrics,
        }
    }

    /// Gets the shared cooldown.
    pub fn cooldown(&self) -> &RateLimitCooldown {
        &self.cooldown
    }

    /// Gets the retry policy.
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Executes `attempt` until it yields a final outcome.
    ///
    /// A response is final when its status is not retryable or the budget
    /// is spent; the caller maps non-2xx finals to errors. Connection
    /// errors are retried under the same budget, anything else returns
    /// immediately.
    pub async fn execute<F, Fut, R>(
        &self,
        method: &Method,
        url: &str,
        mut attempt: F,
    ) -> SnykResult<R>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = SnykResult<R>>,
        R: AttemptOutcome,
    {
        let mut retries = 0u32;

        loop {
            if self.cooldown.wait().await {
                self.metrics.record_cooldown_wait();
            }

            match attempt().await {
                Ok(response) => {
                    let status = response.status();
                    if status == 429 {
                        self.metrics.record_rate_limited();
                        let window = self.cooldown.apply(response.retry_after());
                        TracingHooks::on_rate_limited(url, window);
                    }

                    if !self.retry.should_retry_status(method, status, retries) {
                        return Ok(response);
                    }
                }
                Err(e) => {
                    let retryable = e.is_connection_error()
                        && self.retry.allows_method(method)
                        && self.retry.has_budget(retries);
                    if !retryable {
                        return Err(e);
                    }
                    tracing::debug!(error = %e, "Connection error, retrying");
                }
            }

            retries += 1;
            self.metrics.record_retry();
            let delay = self.retry.backoff(retries);
            TracingHooks::on_retry(method.as_str(), url, retries, delay);
            sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{SnykError, SnykErrorKind};
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    struct Stub(u16, Option<&'static str>);

    impl AttemptOutcome for Stub {
        fn status(&self) -> u16 {
            self.0
        }
        fn retry_after(&self) -> Option<&str> {
            self.1
        }
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_retries: 3,
            backoff_factor: Duration::from_millis(1),
            ..Default::default()
        }
    }

    fn orchestrator(retry: RetryConfig) -> ResilienceOrchestrator {
        ResilienceOrchestrator::new(
            RetryPolicy::new(retry),
            RateLimitCooldown::new(RateLimitConfig::default()),
            Arc::new(Metrics::new()),
        )
    }

    #[test]
    fn test_backoff_calculation() {
        let policy = RetryPolicy::new(RetryConfig::default());
        assert_eq!(policy.backoff(1), Duration::from_millis(500));
        assert_eq!(policy.backoff(2), Duration::from_secs(1));
        assert_eq!(policy.backoff(4), Duration::from_secs(4));
        assert_eq!(policy.backoff(30), Duration::from_secs(120));
    }

    #[test]
    fn test_post_never_retried() {
        let policy = RetryPolicy::new(RetryConfig::default());
        assert!(!policy.should_retry_status(&Method::POST, 503, 0));
        assert!(policy.should_retry_status(&Method::GET, 503, 0));
        assert!(!policy.should_retry_status(&Method::GET, 404, 0));
        assert!(!policy.should_retry_status(&Method::GET, 503, 15));
    }

    #[test]
    fn test_parse_retry_after() {
        assert_eq!(parse_retry_after("3"), Some(Duration::from_secs(3)));
        assert_eq!(parse_retry_after(" 1.5 "), Some(Duration::from_millis(1500)));
        assert_eq!(parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"), None);
        assert_eq!(parse_retry_after("-2"), None);
        assert_eq!(parse_retry_after("NaN"), None);
        assert_eq!(parse_retry_after("1e30"), Some(Duration::MAX));
        assert_eq!(
            parse_retry_after("99999999999999999999"),
            Some(Duration::MAX)
        );
    }

    #[test]
    fn test_cooldown_caps_huge_retry_after() {
        let cooldown = RateLimitCooldown::new(RateLimitConfig {
            max_cooldown: Duration::from_secs(30),
            ..Default::default()
        });

        assert_eq!(
            cooldown.apply(Some("99999999999999999999")),
            Duration::from_secs(30)
        );
        assert!(cooldown.remaining().unwrap() <= Duration::from_secs(30));
        assert_eq!(cooldown.apply(Some("1e300")), Duration::from_secs(30));
    }

    #[test]
    fn test_backoff_with_huge_factor_is_capped() {
        let policy = RetryPolicy::new(RetryConfig {
            backoff_factor: Duration::MAX,
            max_backoff: Duration::MAX,
            ..Default::default()
        });
        assert_eq!(policy.backoff(20), Duration::MAX);
    }

    #[test]
    fn test_cooldown_uses_header_or_default() {
        let cooldown = RateLimitCooldown::new(RateLimitConfig::default());
        assert!(cooldown.remaining().is_none());

        assert_eq!(cooldown.apply(Some("2")), Duration::from_secs(2));
        assert!(cooldown.remaining().unwrap() <= Duration::from_secs(2));

        assert_eq!(cooldown.apply(Some("soon")), Duration::from_secs(5));
    }

    #[test]
    fn test_cooldown_does_not_compound_or_shrink() {
        let cooldown = RateLimitCooldown::new(RateLimitConfig::default());
        cooldown.apply(Some("10"));
        cooldown.apply(Some("1"));
        let remaining = cooldown.remaining().unwrap();
        assert!(remaining > Duration::from_secs(9));
        assert!(remaining <= Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_retries_forcelist_status_then_succeeds() {
        let orch = orchestrator(fast_retry());
        let calls = AtomicU32::new(0);

        let result = orch
            .execute(&Method::GET, "/x", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move { Ok(Stub(if n < 2 { 502 } else { 200 }, None)) }
            })
            .await
            .unwrap();

        assert_eq!(result.status(), 200);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(orch.metrics.snapshot().requests_retried, 2);
    }

    #[tokio::test]
    async fn test_budget_exhaustion_returns_last_response() {
        let orch = orchestrator(fast_retry());
        let calls = AtomicU32::new(0);

        let result = orch
            .execute(&Method::GET, "/x", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(Stub(500, None)) }
            })
            .await
            .unwrap();

        assert_eq!(result.status(), 500);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_post_connection_error_not_retried() {
        let orch = orchestrator(fast_retry());
        let calls = AtomicU32::new(0);

        let err = orch
            .execute(&Method::POST, "/x", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<Stub, _>(SnykError::new(SnykErrorKind::ConnectionFailed, "reset")) }
            })
            .await
            .unwrap_err();

        assert_eq!(*err.kind(), SnykErrorKind::ConnectionFailed);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_429_opens_cooldown_for_next_attempt() {
        let orch = orchestrator(fast_retry());
        let calls = AtomicU32::new(0);
        let started = Instant::now();

        let result = orch
            .execute(&Method::GET, "/x", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Ok(Stub(429, Some("1")))
                    } else {
                        Ok(Stub(200, None))
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(result.status(), 200);
        assert!(started.elapsed() >= Duration::from_millis(1100));
        let snapshot = orch.metrics.snapshot();
        assert_eq!(snapshot.requests_rate_limited, 1);
        assert_eq!(snapshot.cooldown_waits, 1);
    }
}
