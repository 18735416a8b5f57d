use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::HeaderMap;

use crate::{CacheOptions, ExecutionError, ResponseType};

/// Per-attempt and total time budgets.
///
/// The total budget covers every attempt plus the waits between them. It is
/// only enforced when set and non-zero.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TimeoutOptions {
    pub single: Option<Duration>,
    pub total: Option<Duration>,
}

impl TimeoutOptions {
    pub fn new(single: Duration, total: Duration) -> Self {
        Self {
            single: Some(single),
            total: Some(total),
        }
    }

    /// Total budget, when it should start a timer.
    pub(crate) fn global_budget(&self) -> Option<Duration> {
        self.total.filter(|total| !total.is_zero())
    }
}

impl Default for TimeoutOptions {
    fn default() -> Self {
        Self::new(Duration::from_secs(30), Duration::from_secs(60))
    }
}

impl From<Duration> for TimeoutOptions {
    fn from(single: Duration) -> Self {
        Self {
            single: Some(single),
            total: None,
        }
    }
}

/// Attempt information handed to retry policies.
#[derive(Clone, Copy, Debug)]
pub struct TryInfo<'a> {
    /// 1-based number of the attempt being considered.
    pub try_no: u32,
    pub last_error: Option<&'a ExecutionError>,
}

type ShouldRetryFn = dyn Fn(&TryInfo<'_>) -> bool + Send + Sync;
type IntervalFn = dyn Fn(&TryInfo<'_>) -> Duration + Send + Sync;

/// Retry policy: whether to start another attempt, and how long to wait first.
#[derive(Clone)]
pub struct RetryOptions {
    should_retry: Arc<ShouldRetryFn>,
    interval: Arc<IntervalFn>,
}

impl RetryOptions {
    /// `retries` extra attempts after the first one, `interval` apart.
    pub fn count(retries: u32, interval: Duration) -> Self {
        Self::custom(
            move |info| info.try_no <= retries.saturating_add(1),
            move |_| interval,
        )
    }

    pub fn none() -> Self {
        Self::count(0, Duration::ZERO)
    }

    pub fn custom<S, I>(should_retry: S, interval: I) -> Self
    where
        S: Fn(&TryInfo<'_>) -> bool + Send + Sync + 'static,
        I: Fn(&TryInfo<'_>) -> Duration + Send + Sync + 'static,
    {
        Self {
            should_retry: Arc::new(should_retry),
            interval: Arc::new(interval),
        }
    }

    pub fn should_retry(&self, info: &TryInfo<'_>) -> bool {
        (self.should_retry)(info)
    }

    pub fn interval(&self, info: &TryInfo<'_>) -> Duration {
        (self.interval)(info)
    }
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self::count(0, Duration::from_millis(100))
    }
}

impl fmt::Debug for RetryOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryOptions").finish_non_exhaustive()
    }
}

/// Whether HTTP error responses reject the execution or resolve with the
/// response.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ThrowOptions {
    pub on_client_error_responses: bool,
    pub on_server_error_responses: bool,
}

impl Default for ThrowOptions {
    fn default() -> Self {
        Self {
            on_client_error_responses: true,
            on_server_error_responses: true,
        }
    }
}

/// Resolved policy bundle for one execution.
#[derive(Clone, Debug, Default)]
pub struct ExecutionOptions {
    pub timeout: TimeoutOptions,
    pub retry: RetryOptions,
    pub cache: Option<CacheOptions>,
    pub throw: ThrowOptions,
}

/// Configures base URL, default headers, timeouts, retries and caching.
#[derive(Clone, Debug)]
pub struct ClientOptions {
    /// Prefix for relative request URLs. Ignored when it has no host.
    pub base_url: Option<String>,
    /// Sent with every request; per-call headers win on conflicts.
    pub headers: HeaderMap,
    /// Body decoding when the request does not ask for one. Default: JSON.
    pub response_type: ResponseType,
    /// Default: 30 s per attempt, 60 s in total.
    pub timeout: TimeoutOptions,
    /// Default: no extra attempts.
    pub retry: RetryOptions,
    /// Default: HTTP error responses are returned as errors.
    pub throw: ThrowOptions,
    /// Default: no caching.
    pub cache: Option<CacheOptions>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            base_url: None,
            headers: HeaderMap::new(),
            response_type: ResponseType::Json,
            timeout: TimeoutOptions::default(),
            retry: RetryOptions::default(),
            throw: ThrowOptions::default(),
            cache: None,
        }
    }
}

impl ClientOptions {
    /// Reads options from the environment, falling back to defaults.
    ///
    /// Reads:
    /// - `REACH_HTTP_BASE_URL`
    /// - `REACH_HTTP_TIMEOUT_MS` (per attempt)
    /// - `REACH_HTTP_TOTAL_TIMEOUT_MS` (`0` disables the total budget)
    /// - `REACH_HTTP_RETRIES` (extra attempts after the first)
    /// - `REACH_HTTP_RETRY_INTERVAL_MS`
    pub fn from_env() -> std::result::Result<Self, String> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> std::result::Result<Self, String> {
        let millis = |name: &str| -> std::result::Result<Option<u64>, String> {
            match lookup(name) {
                Some(value) if !value.trim().is_empty() => value
                    .trim()
                    .parse::<u64>()
                    .map(Some)
                    .map_err(|_| format!("{name} must be a whole number, got '{value}'")),
                _ => Ok(None),
            }
        };

        let mut options = Self::default();
        if let Some(base) = lookup("REACH_HTTP_BASE_URL").filter(|v| !v.trim().is_empty()) {
            options.base_url = Some(base.trim().to_owned());
        }
        if let Some(ms) = millis("REACH_HTTP_TIMEOUT_MS")? {
            options.timeout.single = Some(Duration::from_millis(ms));
        }
        if let Some(ms) = millis("REACH_HTTP_TOTAL_TIMEOUT_MS")? {
            options.timeout.total = Some(Duration::from_millis(ms));
        }

        let retries = millis("REACH_HTTP_RETRIES")?;
        let interval = millis("REACH_HTTP_RETRY_INTERVAL_MS")?;
        if retries.is_some() || interval.is_some() {
            let retries = u32::try_from(retries.unwrap_or(0))
                .map_err(|_| "REACH_HTTP_RETRIES is too large".to_owned())?;
            options.retry =
                RetryOptions::count(retries, Duration::from_millis(interval.unwrap_or(100)));
        }
        Ok(options)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_response_type(mut self, response_type: ResponseType) -> Self {
        self.response_type = response_type;
        self
    }

    pub fn with_timeout(mut self, timeout: impl Into<TimeoutOptions>) -> Self {
        self.timeout = timeout.into();
        self
    }

    pub fn with_retry(mut self, retry: RetryOptions) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_throw(mut self, throw: ThrowOptions) -> Self {
        self.throw = throw;
        self
    }

    pub fn with_cache(mut self, cache: CacheOptions) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Merges per-request overrides over these options.
    pub(crate) fn resolve(&self, overrides: RequestOptions) -> (ResponseType, ExecutionOptions) {
        let response_type = overrides.response_type.unwrap_or(self.response_type);
        let options = ExecutionOptions {
            timeout: overrides.timeout.unwrap_or(self.timeout),
            retry: overrides.retry.unwrap_or_else(|| self.retry.clone()),
            cache: overrides.cache.or_else(|| self.cache.clone()),
            throw: overrides.throw.unwrap_or(self.throw),
        };
        (response_type, options)
    }
}

/// Per-request overrides; unset fields fall back to the client's options.
#[derive(Clone, Debug, Default)]
pub struct RequestOptions {
    pub response_type: Option<ResponseType>,
    pub timeout: Option<TimeoutOptions>,
    pub retry: Option<RetryOptions>,
    pub throw: Option<ThrowOptions>,
    pub cache: Option<CacheOptions>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides how the response body is decoded.
    pub fn response_type(mut self, response_type: ResponseType) -> Self {
        self.response_type = Some(response_type);
        self
    }

    /// Overrides the timeouts. A bare [`Duration`] sets the per-attempt
    /// timeout and leaves no total budget.
    pub fn timeout(mut self, timeout: impl Into<TimeoutOptions>) -> Self {
        self.timeout = Some(timeout.into());
        self
    }

    /// Overrides the retry policy.
    pub fn retry(mut self, retry: RetryOptions) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Shorthand for [`RetryOptions::count`].
    pub fn retries(self, retries: u32, interval: Duration) -> Self {
        self.retry(RetryOptions::count(retries, interval))
    }

    /// Overrides which HTTP error responses are returned as errors.
    pub fn throw(mut self, throw: ThrowOptions) -> Self {
        self.throw = Some(throw);
        self
    }

    /// Replaces the client's cache settings for this call.
    pub fn cache(mut self, cache: CacheOptions) -> Self {
        self.cache = Some(cache);
        self
    }
}
