//! `reach-http` is an async HTTP client with retries, timeouts and a response
//! cache.
//!
//! Every request goes through the same execution pipeline:
//! - [`ApiClient::request`] and its per-method shorthands build a
//!   [`RequestDescriptor`] and start an execution
//! - [`execute`] runs attempts under [`RetryOptions`] and [`TimeoutOptions`]
//! - [`CacheOptions`] plugs any [`CacheStore`] in front of the network
//!
//! Executions return a [`CancellableTask`]: await it for the
//! [`ResponseEnvelope`], or cancel it.

mod cache;
mod classify;
mod client;
mod error;
mod executor;
mod options;
mod request;
mod response;
mod task;
mod transport;

pub use cache::{
    default_key, CacheKey, CacheOptions, CacheStore, CacheTtl, CachedBody, CachedEntry,
    LoadStrategy, MemoryStore, SaveStrategy, ShouldCache,
};
pub use classify::{classify, StatusCategory, UnknownStatus};
pub use client::{execute, ApiClient};
pub use error::{AbortDetails, AbortPhase, CacheError, ErrorKind, ExecutionError, TransportError};
pub use options::{
    ClientOptions, ExecutionOptions, RequestOptions, RetryOptions, ThrowOptions, TimeoutOptions,
    TryInfo,
};
pub use request::{BodyType, RequestBody, RequestData, RequestDescriptor};
pub use response::{BodyStream, ResponseBody, ResponseEnvelope, ResponseType};
pub use task::CancellableTask;
pub use transport::{RawBody, RawResponse, ReqwestTransport, Transport};

pub use reqwest::{header, Method};

pub type Result<T> = std::result::Result<T, ExecutionError>;
