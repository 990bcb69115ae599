use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::FutureExt;
use tokio::sync::oneshot;

use crate::errors::ExecutionError;

/// Outcome of an operation started with one of the `Session::begin_*` methods.
///
/// The operation runs on its own task. Dropping the handle abandons the outcome
/// but does not stop the operation.
#[derive(Debug)]
pub struct RequestHandle<T> {
    receiver: oneshot::Receiver<Result<T, ExecutionError>>,
}

impl<T> RequestHandle<T> {
    pub(crate) fn new(receiver: oneshot::Receiver<Result<T, ExecutionError>>) -> Self {
        Self { receiver }
    }

    /// Spawns `operation` and returns a handle to its outcome.
    pub(crate) fn spawn<F>(operation: F) -> Self
    where
        F: Future<Output = Result<T, ExecutionError>> + Send + 'static,
        T: Send + 'static,
    {
        let (sender, receiver) = oneshot::channel();
        tokio::spawn(async move {
            // The caller may have abandoned the handle.
            let _ = sender.send(operation.await);
        });
        Self::new(receiver)
    }
}

impl<T> Future for RequestHandle<T> {
    type Output = Result<T, ExecutionError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.receiver
            .poll_unpin(cx)
            .map(|outcome| outcome.unwrap_or(Err(ExecutionError::WorkerTerminated)))
    }
}
