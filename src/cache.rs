//! Read-through / write-through response caching around the attempt loop.
//!
//! The store is pluggable through [`CacheStore`]; [`MemoryStore`] is the
//! in-process implementation. What gets read and written, and when, is
//! driven by [`LoadStrategy`] and [`SaveStrategy`].

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::{classify, CacheError, RequestDescriptor, ResponseBody, ResponseEnvelope, StatusCategory};

/// Async string key/value store used for caching.
///
/// Implementations must tolerate concurrent reads and writes of the same key
/// from independent executions.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Returns the stored value, or `None` when missing or expired.
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Stores `value`; `ttl` of `None` means no expiry.
    async fn set(&self, key: &str, value: String, ttl: Option<Duration>)
        -> Result<bool, CacheError>;

    /// Removes `key`; `true` when something was removed.
    async fn delete(&self, key: &str) -> Result<bool, CacheError>;

    /// Removes every entry.
    async fn clear(&self) -> Result<(), CacheError>;
}

/// In-process [`CacheStore`] with per-entry expiry.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, StoredValue>>,
}

#[derive(Debug)]
struct StoredValue {
    value: String,
    expires_at: Option<Instant>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (unexpired) entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.lock()
            .map(|entries| {
                entries
                    .values()
                    .filter(|entry| entry.expires_at.map_or(true, |at| at > now))
                    .count()
            })
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, StoredValue>>, CacheError> {
        self.entries
            .lock()
            .map_err(|_| CacheError::Backend("memory store mutex poisoned".to_owned()))
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut entries = self.lock()?;
        let expired = match entries.get(key) {
            None => return Ok(None),
            Some(entry) => entry.expires_at.is_some_and(|at| at <= Instant::now()),
        };
        if expired {
            entries.remove(key);
            return Ok(None);
        }
        Ok(entries.get(key).map(|entry| entry.value.clone()))
    }

    async fn set(
        &self,
        key: &str,
        value: String,
        ttl: Option<Duration>,
    ) -> Result<bool, CacheError> {
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        self.lock()?
            .insert(key.to_owned(), StoredValue { value, expires_at });
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.lock()?.remove(key).is_some())
    }

    async fn clear(&self) -> Result<(), CacheError> {
        self.lock()?.clear();
        Ok(())
    }
}

/// When the coordinator reads from the store.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum LoadStrategy {
    /// Read first; go to the network only on a miss.
    #[default]
    PreferCache,
    /// Go to the network first; read only when every attempt failed.
    PreferRequest,
    /// Read only; a miss is an error.
    CacheOnly,
    /// Never read.
    RequestOnly,
}

/// Whether network outcomes are written to the store.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum SaveStrategy {
    #[default]
    Save,
    NoSave,
}

type KeyFn = dyn Fn(&RequestDescriptor) -> Option<String> + Send + Sync;
type TtlFn = dyn Fn(&ResponseEnvelope) -> Option<Duration> + Send + Sync;
type PredicateFn = dyn Fn(&ResponseEnvelope) -> bool + Send + Sync;

/// Cache key: a literal, or derived from the request (`None` skips caching).
#[derive(Clone)]
pub enum CacheKey {
    Literal(String),
    Derive(Arc<KeyFn>),
}

impl CacheKey {
    pub fn derive<F>(derive: F) -> Self
    where
        F: Fn(&RequestDescriptor) -> Option<String> + Send + Sync + 'static,
    {
        Self::Derive(Arc::new(derive))
    }

    fn compute(&self, request: &RequestDescriptor) -> Option<String> {
        match self {
            Self::Literal(key) => Some(key.clone()),
            Self::Derive(derive) => derive(request),
        }
    }
}

impl Default for CacheKey {
    fn default() -> Self {
        Self::derive(default_key)
    }
}

impl From<&str> for CacheKey {
    fn from(key: &str) -> Self {
        Self::Literal(key.to_owned())
    }
}

impl From<String> for CacheKey {
    fn from(key: String) -> Self {
        Self::Literal(key)
    }
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(key) => f.debug_tuple("Literal").field(key).finish(),
            Self::Derive(_) => f.write_str("Derive(..)"),
        }
    }
}

/// Key for `GET` requests only: a stable JSON rendering of method, URL,
/// sorted headers, body and response type.
pub fn default_key(request: &RequestDescriptor) -> Option<String> {
    if request.method != reqwest::Method::GET {
        return None;
    }

    let headers: BTreeMap<&str, Vec<&str>> =
        request
            .headers
            .iter()
            .fold(BTreeMap::new(), |mut acc, (name, value)| {
                acc.entry(name.as_str())
                    .or_insert_with(Vec::new)
                    .push(value.to_str().unwrap_or_default());
                acc
            });

    serde_json::to_string(&serde_json::json!({
        "method": request.method.as_str(),
        "url": request.url,
        "headers": headers,
        "body": request.body,
        "responseType": request.response_type,
    }))
    .ok()
}

/// Entry lifetime in the store.
#[derive(Clone, Default)]
pub enum CacheTtl {
    /// Never expires.
    #[default]
    Forever,
    Fixed(Duration),
    Derive(Arc<TtlFn>),
}

impl CacheTtl {
    pub fn derive<F>(derive: F) -> Self
    where
        F: Fn(&ResponseEnvelope) -> Option<Duration> + Send + Sync + 'static,
    {
        Self::Derive(Arc::new(derive))
    }

    fn compute(&self, response: &ResponseEnvelope) -> Option<Duration> {
        match self {
            Self::Forever => None,
            Self::Fixed(ttl) => Some(*ttl),
            Self::Derive(derive) => derive(response),
        }
    }
}

impl From<Duration> for CacheTtl {
    fn from(ttl: Duration) -> Self {
        Self::Fixed(ttl)
    }
}

impl fmt::Debug for CacheTtl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Forever => f.write_str("Forever"),
            Self::Fixed(ttl) => f.debug_tuple("Fixed").field(ttl).finish(),
            Self::Derive(_) => f.write_str("Derive(..)"),
        }
    }
}

/// Decides whether a final response is written to the store.
#[derive(Clone)]
pub enum ShouldCache {
    Fixed(bool),
    Predicate(Arc<PredicateFn>),
}

impl ShouldCache {
    pub fn predicate<F>(predicate: F) -> Self
    where
        F: Fn(&ResponseEnvelope) -> bool + Send + Sync + 'static,
    {
        Self::Predicate(Arc::new(predicate))
    }

    fn check(&self, response: &ResponseEnvelope) -> bool {
        match self {
            Self::Fixed(value) => *value,
            Self::Predicate(predicate) => predicate(response),
        }
    }
}

/// Everything except server error responses.
impl Default for ShouldCache {
    fn default() -> Self {
        Self::predicate(|response| response.category != StatusCategory::ServerError)
    }
}

impl From<bool> for ShouldCache {
    fn from(value: bool) -> Self {
        Self::Fixed(value)
    }
}

impl fmt::Debug for ShouldCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed(value) => f.debug_tuple("Fixed").field(value).finish(),
            Self::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

/// Caching configuration for an execution.
#[derive(Clone)]
pub struct CacheOptions {
    pub storage: Arc<dyn CacheStore>,
    pub key: CacheKey,
    pub ttl: CacheTtl,
    pub should_cache_response: ShouldCache,
    pub load_strategy: LoadStrategy,
    pub save_strategy: SaveStrategy,
}

impl CacheOptions {
    pub fn new(storage: Arc<dyn CacheStore>) -> Self {
        Self {
            storage,
            key: CacheKey::default(),
            ttl: CacheTtl::default(),
            should_cache_response: ShouldCache::default(),
            load_strategy: LoadStrategy::default(),
            save_strategy: SaveStrategy::default(),
        }
    }

    pub fn key(mut self, key: impl Into<CacheKey>) -> Self {
        self.key = key.into();
        self
    }

    pub fn ttl(mut self, ttl: impl Into<CacheTtl>) -> Self {
        self.ttl = ttl.into();
        self
    }

    pub fn should_cache_response(mut self, should_cache: impl Into<ShouldCache>) -> Self {
        self.should_cache_response = should_cache.into();
        self
    }

    pub fn load_strategy(mut self, strategy: LoadStrategy) -> Self {
        self.load_strategy = strategy;
        self
    }

    pub fn save_strategy(mut self, strategy: SaveStrategy) -> Self {
        self.save_strategy = strategy;
        self
    }
}

impl fmt::Debug for CacheOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheOptions")
            .field("key", &self.key)
            .field("ttl", &self.ttl)
            .field("should_cache_response", &self.should_cache_response)
            .field("load_strategy", &self.load_strategy)
            .field("save_strategy", &self.save_strategy)
            .finish_non_exhaustive()
    }
}

/// Serialized form of a response in the store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedEntry {
    pub status: u16,
    pub status_text: String,
    pub headers: Vec<(String, String)>,
    pub body: CachedBody,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum CachedBody {
    Json(serde_json::Value),
    Text(String),
    Binary(Vec<u8>),
}

impl CachedEntry {
    /// Projects an envelope; `None` for bodies that cannot be stored.
    pub fn from_envelope(response: &ResponseEnvelope) -> Option<Self> {
        let body = match &response.body {
            ResponseBody::Json(value) => CachedBody::Json(value.clone()),
            ResponseBody::Text(text) => CachedBody::Text(text.clone()),
            ResponseBody::Binary(bytes) => CachedBody::Binary(bytes.to_vec()),
            ResponseBody::Stream(_) | ResponseBody::Mismatch(_) => return None,
        };
        let headers = response
            .headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_owned(), value.to_owned()))
            })
            .collect();

        Some(Self {
            status: response.status,
            status_text: response.status_text.clone(),
            headers,
            body,
        })
    }

    /// Rebuilds an envelope flagged as cached.
    pub fn into_envelope(
        self,
        request: Arc<RequestDescriptor>,
    ) -> Result<ResponseEnvelope, CacheError> {
        let category = classify(i32::from(self.status))
            .map_err(|err| CacheError::Backend(format!("corrupt cache entry: {err}")))?;

        let mut headers = HeaderMap::with_capacity(self.headers.len());
        for (name, value) in self.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|err| CacheError::Backend(format!("corrupt cache entry: {err}")))?;
            let value = HeaderValue::from_str(&value)
                .map_err(|err| CacheError::Backend(format!("corrupt cache entry: {err}")))?;
            headers.append(name, value);
        }

        let body = match self.body {
            CachedBody::Json(value) => ResponseBody::Json(value),
            CachedBody::Text(text) => ResponseBody::Text(text),
            CachedBody::Binary(bytes) => ResponseBody::Binary(Bytes::from(bytes)),
        };

        Ok(ResponseEnvelope {
            status: self.status,
            status_text: self.status_text,
            headers,
            body,
            category,
            cached: true,
            request,
        })
    }
}

/// Serialized write waiting to be sent to the store.
pub(crate) struct PendingWrite {
    storage: Arc<dyn CacheStore>,
    key: String,
    payload: String,
    ttl: Option<Duration>,
}

impl PendingWrite {
    /// Performs the write; failures are logged and dropped.
    pub(crate) async fn commit(self) {
        match self.storage.set(&self.key, self.payload, self.ttl).await {
            Ok(_) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(key = %self.key, "stored response in cache");
            }
            Err(_err) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(key = %self.key, error = %_err, "cache write failed");
            }
        }
    }
}

/// Cache interactions of one execution, bound to a key computed once.
pub(crate) struct CacheCoordinator<'a> {
    options: &'a CacheOptions,
    key: String,
}

impl<'a> CacheCoordinator<'a> {
    /// `None` when caching is off or the key function yields no key.
    pub(crate) fn prepare(
        options: Option<&'a CacheOptions>,
        request: &RequestDescriptor,
    ) -> Option<Self> {
        let options = options?;
        let key = options.key.compute(request)?;
        Some(Self { options, key })
    }

    pub(crate) fn key(&self) -> &str {
        &self.key
    }

    pub(crate) fn load_strategy(&self) -> LoadStrategy {
        self.options.load_strategy
    }

    /// Reads and rebuilds the stored response. Store failures and corrupt
    /// entries count as a miss.
    pub(crate) async fn load(&self, request: &Arc<RequestDescriptor>) -> Option<ResponseEnvelope> {
        let raw = match self.options.storage.get(&self.key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(key = %self.key, "cache miss");
                return None;
            }
            Err(_err) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(key = %self.key, error = %_err, "cache read failed");
                return None;
            }
        };

        let entry = serde_json::from_str::<CachedEntry>(&raw)
            .map_err(CacheError::from)
            .and_then(|entry| entry.into_envelope(Arc::clone(request)));
        match entry {
            Ok(envelope) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(key = %self.key, status = envelope.status, "cache hit");
                Some(envelope)
            }
            Err(_err) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(key = %self.key, error = %_err, "ignoring unreadable cache entry");
                None
            }
        }
    }

    /// Decides and serializes the write-through for a network outcome.
    ///
    /// Only responses are stored: successes, and the response attached to
    /// HTTP client/server errors.
    pub(crate) fn prepare_write(
        &self,
        outcome: &Result<ResponseEnvelope, crate::ExecutionError>,
    ) -> Option<PendingWrite> {
        if self.options.save_strategy == SaveStrategy::NoSave {
            return None;
        }
        let response = match outcome {
            Ok(response) => response,
            Err(
                crate::ExecutionError::HttpClient { response }
                | crate::ExecutionError::HttpServer { response },
            ) => &**response,
            Err(_) => return None,
        };
        if !self.options.should_cache_response.check(response) {
            return None;
        }

        let entry = CachedEntry::from_envelope(response)?;
        let payload = match serde_json::to_string(&entry) {
            Ok(payload) => payload,
            Err(_err) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(key = %self.key, error = %_err, "cannot serialize response for cache");
                return None;
            }
        };

        Some(PendingWrite {
            storage: Arc::clone(&self.options.storage),
            key: self.key.clone(),
            payload,
            ttl: self.options.ttl.compute(response),
        })
    }
}
