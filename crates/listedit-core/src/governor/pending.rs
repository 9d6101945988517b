//! Caller-side handle for an enqueued operation.

use crate::classify::RequestError;
use crate::error::{ListEditError, Result};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

/// Identity of an enqueued operation, unique per governor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestId(pub(crate) u64);

impl RequestId {
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "req-{}", self.0)
    }
}

pub(crate) type Settlement<T> = std::result::Result<T, RequestError>;

/// Resolves exactly once with the operation's value or its final error.
///
/// Completion order across handles is not dispatch order; correlate results
/// through [`PendingResult::id`]. Resolves to [`ListEditError::Cancelled`] if
/// the operation was abandoned before dispatch.
#[must_use = "a pending result does nothing unless awaited"]
#[derive(Debug)]
pub struct PendingResult<T> {
    id: RequestId,
    receiver: oneshot::Receiver<Settlement<T>>,
}

impl<T> PendingResult<T> {
    pub(crate) fn new(id: RequestId, receiver: oneshot::Receiver<Settlement<T>>) -> Self {
        Self { id, receiver }
    }

    pub fn id(&self) -> RequestId {
        self.id
    }
}

impl<T> Future for PendingResult<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.receiver).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Ok(Ok(value))) => Poll::Ready(Ok(value)),
            Poll::Ready(Ok(Err(error))) => Poll::Ready(Err(ListEditError::Request(error))),
            // Sender dropped without settling: never ran, or torn down mid-run.
            Poll::Ready(Err(_)) => Poll::Ready(Err(ListEditError::Cancelled)),
        }
    }
}
