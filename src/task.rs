use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::{ExecutionError, ResponseEnvelope};

/// State shared between a running execution and its task handle.
#[derive(Debug, Default)]
pub(crate) struct ExecutionControl {
    /// Parent of every attempt's token.
    token: CancellationToken,
    timed_out_globally: AtomicBool,
    settled: AtomicBool,
}

impl ExecutionControl {
    pub(crate) fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// External cancel. No-op once settled.
    pub(crate) fn cancel(&self) {
        if self.settled.load(Ordering::SeqCst) {
            return;
        }
        self.token.cancel();
    }

    /// The total budget ran out: terminal for the whole execution.
    pub(crate) fn time_out_globally(&self) {
        self.timed_out_globally.store(true, Ordering::SeqCst);
        self.token.cancel();
    }

    pub(crate) fn timed_out_globally(&self) -> bool {
        self.timed_out_globally.load(Ordering::SeqCst)
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub(crate) fn is_settled(&self) -> bool {
        self.settled.load(Ordering::SeqCst)
    }
}

/// Sending half of a [`CancellableTask`]; consumed on settlement.
pub(crate) struct Settle<T> {
    sender: oneshot::Sender<Result<T, ExecutionError>>,
    control: Arc<ExecutionControl>,
}

impl<T> Settle<T> {
    pub(crate) fn control(&self) -> &Arc<ExecutionControl> {
        &self.control
    }

    pub(crate) fn settle(self, outcome: Result<T, ExecutionError>) {
        self.control.settled.store(true, Ordering::SeqCst);
        // The handle may already be gone; nobody is left to tell.
        let _ = self.sender.send(outcome);
    }
}

/// Handle to a running execution: await it for the outcome, or
/// [`cancel`](CancellableTask::cancel) it.
///
/// Dropping the handle does not stop the execution.
#[derive(Debug)]
pub struct CancellableTask<T = ResponseEnvelope> {
    receiver: oneshot::Receiver<Result<T, ExecutionError>>,
    control: Arc<ExecutionControl>,
}

impl<T> CancellableTask<T> {
    pub(crate) fn channel() -> (Self, Settle<T>) {
        let (sender, receiver) = oneshot::channel();
        let control = Arc::new(ExecutionControl::default());
        let task = Self {
            receiver,
            control: Arc::clone(&control),
        };
        (task, Settle { sender, control })
    }

    /// Task that is already settled with `outcome`.
    pub(crate) fn ready(outcome: Result<T, ExecutionError>) -> Self {
        let (task, settle) = Self::channel();
        settle.settle(outcome);
        task
    }

    /// Requests cancellation of the in-flight attempt and of any further
    /// attempts. Has no effect once the execution has settled.
    pub fn cancel(&self) {
        self.control.cancel();
    }

    pub fn is_settled(&self) -> bool {
        self.control.is_settled()
    }
}

impl<T> Future for CancellableTask<T> {
    type Output = Result<T, ExecutionError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver).poll(cx).map(|received| {
            received.unwrap_or_else(|_| {
                Err(ExecutionError::unknown(
                    "execution ended without settling",
                ))
            })
        })
    }
}
