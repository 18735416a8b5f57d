use std::fmt;
use std::sync::Arc;

use reqwest::Method;

use crate::{
    cache::{CacheCoordinator, LoadStrategy},
    executor::{into_outcome, Executor},
    request::build_descriptor,
    CancellableTask, ClientOptions, ErrorKind, ExecutionError, ExecutionOptions, RequestData,
    RequestDescriptor, RequestOptions, ResponseEnvelope, ReqwestTransport, Result,
    ThrowOptions, Transport,
};

/// HTTP client that runs every request through the retry, timeout and cache
/// policies of its [`ClientOptions`].
#[derive(Clone)]
pub struct ApiClient {
    transport: Arc<dyn Transport>,
    options: ClientOptions,
}

impl fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiClient")
            .field("transport", &"<dyn Transport>")
            .field("options", &self.options)
            .finish()
    }
}

impl Default for ApiClient {
    fn default() -> Self {
        Self::new(ClientOptions::default())
    }
}

impl ApiClient {
    /// Creates a client sending through `reqwest`.
    pub fn new(options: ClientOptions) -> Self {
        Self::with_transport(ReqwestTransport::new(), options)
    }

    /// Creates a client sending through a custom transport.
    pub fn with_transport(transport: impl Transport + 'static, options: ClientOptions) -> Self {
        Self {
            transport: Arc::new(transport),
            options,
        }
    }

    /// Creates a client configured from `REACH_HTTP_*` environment variables.
    ///
    /// See [`ClientOptions::from_env`].
    pub fn from_env() -> std::result::Result<Self, String> {
        Ok(Self::new(ClientOptions::from_env()?))
    }

    /// Replaces the client options.
    pub fn with_options(mut self, options: ClientOptions) -> Self {
        self.options = options;
        self
    }

    /// Returns the options every request starts from.
    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Sends a request with any method.
    ///
    /// Must be called inside a Tokio runtime: the execution runs on its own
    /// task and keeps going even if the returned handle is dropped.
    pub fn request(
        &self,
        method: Method,
        url: &str,
        data: RequestData,
        options: RequestOptions,
    ) -> CancellableTask {
        let (response_type, options) = self.options.resolve(options);
        let descriptor = build_descriptor(
            method,
            self.options.base_url.as_deref(),
            url,
            &self.options.headers,
            data,
            response_type,
        );
        match descriptor {
            Ok(descriptor) => execute(Arc::clone(&self.transport), descriptor, options),
            Err(err) => CancellableTask::ready(Err(err)),
        }
    }

    /// Sends a `GET` request.
    pub fn get(&self, url: &str, data: RequestData, options: RequestOptions) -> CancellableTask {
        self.request(Method::GET, url, data, options)
    }

    /// Sends a `POST` request.
    pub fn post(&self, url: &str, data: RequestData, options: RequestOptions) -> CancellableTask {
        self.request(Method::POST, url, data, options)
    }

    /// Sends a `PUT` request.
    pub fn put(&self, url: &str, data: RequestData, options: RequestOptions) -> CancellableTask {
        self.request(Method::PUT, url, data, options)
    }

    /// Sends a `PATCH` request.
    pub fn patch(&self, url: &str, data: RequestData, options: RequestOptions) -> CancellableTask {
        self.request(Method::PATCH, url, data, options)
    }

    /// Sends a `DELETE` request.
    pub fn delete(&self, url: &str, data: RequestData, options: RequestOptions) -> CancellableTask {
        self.request(Method::DELETE, url, data, options)
    }

    /// Sends a `HEAD` request.
    pub fn head(&self, url: &str, data: RequestData, options: RequestOptions) -> CancellableTask {
        self.request(Method::HEAD, url, data, options)
    }
}

/// Runs one execution of `descriptor` on a new task.
///
/// The outcome is delivered through the returned handle. A cache write, if
/// any, happens after delivery and never changes the outcome.
pub fn execute(
    transport: Arc<dyn Transport>,
    descriptor: RequestDescriptor,
    options: ExecutionOptions,
) -> CancellableTask {
    let (task, settle) = CancellableTask::channel();
    let request = Arc::new(descriptor);

    tokio::spawn(async move {
        let control = Arc::clone(settle.control());
        let cache = CacheCoordinator::prepare(options.cache.as_ref(), &request);
        let executor = Executor::new(transport.as_ref(), &request, &options, &control);

        let (outcome, from_network) = match &cache {
            None => (executor.run().await, true),
            Some(cache) => match cache.load_strategy() {
                LoadStrategy::CacheOnly => match cache.load(&request).await {
                    Some(hit) => (into_outcome(hit), false),
                    None => (
                        Err(ExecutionError::CacheMiss {
                            key: cache.key().to_owned(),
                        }),
                        false,
                    ),
                },
                LoadStrategy::PreferCache => match cache.load(&request).await {
                    Some(hit) => (into_outcome(hit), false),
                    None => (executor.run().await, true),
                },
                LoadStrategy::RequestOnly => (executor.run().await, true),
                LoadStrategy::PreferRequest => match executor.run().await {
                    Ok(response) => (Ok(response), true),
                    // A caller cancel is final; no fallback.
                    Err(err) if err.kind() == ErrorKind::Abort => (Err(err), true),
                    Err(err) => match cache.load(&request).await {
                        Some(hit) => {
                            #[cfg(feature = "tracing")]
                            tracing::debug!(error = %err, "request failed, serving cached response");
                            (into_outcome(hit), false)
                        }
                        None => (Err(err), true),
                    },
                },
            },
        };

        let write = cache
            .as_ref()
            .filter(|_| from_network)
            .and_then(|cache| cache.prepare_write(&outcome));

        settle.settle(apply_throw_policy(outcome, options.throw));

        if let Some(write) = write {
            write.commit().await;
        }
    });

    task
}

/// Downgrades HTTP error responses to a resolved value when the matching
/// throw flag is off.
fn apply_throw_policy(outcome: Result<ResponseEnvelope>, throw: ThrowOptions) -> Result<ResponseEnvelope> {
    match outcome {
        Err(ExecutionError::HttpClient { response }) if !throw.on_client_error_responses => {
            Ok(*response)
        }
        Err(ExecutionError::HttpServer { response }) if !throw.on_server_error_responses => {
            Ok(*response)
        }
        other => other,
    }
}
