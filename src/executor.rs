//! The attempt loop: retries, per-attempt and total timeouts, cancellation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

use crate::response::decode_buffered;
use crate::task::ExecutionControl;
use crate::transport::{RawBody, RawResponse};
use crate::{
    classify, AbortDetails, AbortPhase, ExecutionError, ExecutionOptions, RequestDescriptor,
    ResponseBody, ResponseEnvelope, Transport, TransportError, TryInfo,
};

/// Countdown running beside the attempt; cleared when dropped.
struct Timer(JoinHandle<()>);

impl Timer {
    fn start<F>(after: Duration, on_fire: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self(tokio::spawn(async move {
            sleep(after).await;
            on_fire();
        }))
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.0.abort();
    }
}

enum AttemptError {
    Cancelled,
    Failed(ExecutionError),
}

pub(crate) struct Executor<'a> {
    transport: &'a dyn Transport,
    request: &'a Arc<RequestDescriptor>,
    options: &'a ExecutionOptions,
    control: &'a Arc<ExecutionControl>,
}

impl<'a> Executor<'a> {
    pub(crate) fn new(
        transport: &'a dyn Transport,
        request: &'a Arc<RequestDescriptor>,
        options: &'a ExecutionOptions,
        control: &'a Arc<ExecutionControl>,
    ) -> Self {
        Self {
            transport,
            request,
            options,
            control,
        }
    }

    /// Runs attempts until one succeeds or the loop gives up.
    pub(crate) async fn run(&self) -> Result<ResponseEnvelope, ExecutionError> {
        let started = Instant::now();
        let budget = self.options.timeout.global_budget();
        let _global_timer = budget.map(|total| {
            let control = Arc::clone(self.control);
            Timer::start(total, move || {
                #[cfg(feature = "tracing")]
                tracing::debug!("total timeout reached, cancelling request");
                control.time_out_globally();
            })
        });

        let retry = &self.options.retry;
        let mut try_no = 0u32;
        let mut last_error: Option<ExecutionError> = None;

        while try_no == 0
            || retry.should_retry(&TryInfo {
                try_no: try_no + 1,
                last_error: last_error.as_ref(),
            })
        {
            try_no += 1;

            if try_no > 1 {
                let wait = retry.interval(&TryInfo {
                    try_no,
                    last_error: last_error.as_ref(),
                });
                let fits = budget.map_or(true, |total| {
                    total.saturating_sub(started.elapsed()) > wait
                });
                if fits {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(try_no, "retrying request after {} ms", wait.as_millis());
                    tokio::select! {
                        _ = sleep(wait) => {}
                        _ = self.control.token().cancelled() => {}
                    }
                } else {
                    // Not enough budget left to wait: same as the total timer
                    // firing now.
                    self.control.time_out_globally();
                }
            }

            if self.control.is_cancelled() {
                last_error = Some(ExecutionError::aborted(AbortDetails {
                    tries: try_no - 1,
                    phase: AbortPhase::Waiting,
                    timeout: false,
                    global_timeout: self.control.timed_out_globally(),
                }));
                break;
            }

            let token = self.control.token().child_token();
            let timed_out_locally = Arc::new(AtomicBool::new(false));
            let local_timer = self.options.timeout.single.map(|single| {
                let token = token.clone();
                let flag = Arc::clone(&timed_out_locally);
                Timer::start(single, move || {
                    flag.store(true, Ordering::SeqCst);
                    token.cancel();
                })
            });

            #[cfg(feature = "tracing")]
            tracing::trace!(try_no, url = %self.request.url, "starting attempt");

            let result = self.attempt(token).await;
            drop(local_timer);

            match result {
                Ok(response) => return Ok(response),
                Err(AttemptError::Cancelled) => {
                    let timeout = timed_out_locally.load(Ordering::SeqCst);
                    let global_timeout = self.control.timed_out_globally();
                    last_error = Some(ExecutionError::aborted(AbortDetails {
                        tries: try_no,
                        phase: AbortPhase::Connection,
                        timeout,
                        global_timeout,
                    }));
                    // Only a lone per-attempt timeout may be retried.
                    if global_timeout || !timeout {
                        break;
                    }
                    #[cfg(feature = "tracing")]
                    tracing::debug!(try_no, "attempt timed out");
                }
                Err(AttemptError::Failed(err)) => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(try_no, error = %err, "attempt failed");
                    last_error = Some(err);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| ExecutionError::unknown("no error recorded")))
    }

    async fn attempt(&self, token: CancellationToken) -> Result<ResponseEnvelope, AttemptError> {
        let sent = tokio::select! {
            biased;
            _ = token.cancelled() => Err(TransportError::Cancelled),
            result = self.transport.send(self.request, token.clone()) => result,
        };

        match sent {
            Ok(raw) => into_outcome(self.envelope(raw)?).map_err(AttemptError::Failed),
            Err(TransportError::Cancelled) => Err(AttemptError::Cancelled),
            Err(err) => Err(AttemptError::Failed(err.into())),
        }
    }

    fn envelope(&self, raw: RawResponse) -> Result<ResponseEnvelope, AttemptError> {
        let category = classify(i32::from(raw.status)).map_err(|err| {
            AttemptError::Failed(ExecutionError::Unknown {
                message: err.to_string(),
                source: Some(Box::new(err)),
            })
        })?;
        let body = match raw.body {
            RawBody::Stream(stream) => ResponseBody::Stream(stream),
            RawBody::Buffered(payload) => decode_buffered(self.request.response_type, payload),
        };

        Ok(ResponseEnvelope {
            status: raw.status,
            status_text: raw.status_text,
            headers: raw.headers,
            body,
            category,
            cached: false,
            request: Arc::clone(self.request),
        })
    }
}

/// Turns a classified envelope into the execution outcome.
///
/// A body that failed to decode wins over the status: it is reported as a
/// mismatch even for a success.
pub(crate) fn into_outcome(response: ResponseEnvelope) -> Result<ResponseEnvelope, ExecutionError> {
    if matches!(response.body, ResponseBody::Mismatch(_)) {
        let expected = response.request.response_type;
        return Err(ExecutionError::ResponseDataTypeMismatch {
            response: Box::new(response),
            expected,
        });
    }
    match response.category {
        crate::StatusCategory::ClientError => Err(ExecutionError::HttpClient {
            response: Box::new(response),
        }),
        crate::StatusCategory::ServerError => Err(ExecutionError::HttpServer {
            response: Box::new(response),
        }),
        _ => Ok(response),
    }
}
