//! Caller-facing handle for a result that is not available yet.
//!
//! A [`ResponseHandle`] is a future resolving to the response payload or the
//! failure cause. It can be awaited directly, bounded with [`wait`], or
//! chained with a dependent request through [`and_then`].
//!
//! ```ignore
//! let thing = client
//!     .send("things.create", json!({"thingId": id}), None)
//!     .await
//!     .and_then(|_| client.send("things.retrieve", json!({"thingId": id}), None))
//!     .await?;
//! ```
//!
//! [`wait`]: ResponseHandle::wait
//! [`and_then`]: ResponseHandle::and_then

use crate::domain::correlation::CorrelationId;
use crate::domain::error::{CorrelationError, RequestResult};
use crate::domain::pending::PendingRequestTable;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::Weak;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::oneshot;

enum HandleState {
    Pending(oneshot::Receiver<RequestResult>),
    /// Pre-failed handle; the error is taken on first poll
    Ready(Option<RequestResult>),
}

#[must_use = "a response handle does nothing unless awaited"]
pub struct ResponseHandle {
    correlation_id: CorrelationId,
    state: HandleState,
    table: Weak<PendingRequestTable>,
}

impl ResponseHandle {
    pub(crate) fn pending(
        correlation_id: CorrelationId,
        receiver: oneshot::Receiver<RequestResult>,
        table: Weak<PendingRequestTable>,
    ) -> Self {
        Self {
            correlation_id,
            state: HandleState::Pending(receiver),
            table,
        }
    }

    /// A handle that completes immediately with `error`.
    pub fn failed(correlation_id: CorrelationId, error: CorrelationError) -> Self {
        Self {
            correlation_id,
            state: HandleState::Ready(Some(Err(error))),
            table: Weak::new(),
        }
    }

    pub fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    /// Await the result for at most `timeout`.
    ///
    /// When the caller-side timeout fires first, the pending entry is expired
    /// so a late response is discarded instead of resolving it. If the entry
    /// completes just before it can be expired, that result is returned.
    pub async fn wait(mut self, timeout: Duration) -> RequestResult {
        match tokio::time::timeout(timeout, &mut self).await {
            Ok(result) => result,
            Err(_) => {
                let correlation_id = self.correlation_id;
                let expired = self
                    .table
                    .upgrade()
                    .is_some_and(|table| table.expire(correlation_id));
                if expired {
                    Err(CorrelationError::Timeout {
                        correlation_id,
                        after: timeout,
                    })
                } else {
                    self.await
                }
            }
        }
    }

    /// Transform the successful payload.
    pub async fn map<F, T>(self, f: F) -> Result<T, CorrelationError>
    where
        F: FnOnce(Value) -> T,
    {
        self.await.map(f)
    }

    /// Deserialize the successful payload into `T`.
    pub async fn into_typed<T: DeserializeOwned>(self) -> Result<T, CorrelationError> {
        let value = self.await?;
        serde_json::from_value(value).map_err(CorrelationError::from)
    }
}

impl Future for ResponseHandle {
    type Output = RequestResult;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match &mut this.state {
            HandleState::Pending(receiver) => match Pin::new(receiver).poll(cx) {
                Poll::Ready(Ok(result)) => Poll::Ready(result),
                // Slot dropped without a result: the table itself is gone
                Poll::Ready(Err(_)) => Poll::Ready(Err(CorrelationError::Closed)),
                Poll::Pending => Poll::Pending,
            },
            HandleState::Ready(result) => {
                Poll::Ready(result.take().unwrap_or(Err(CorrelationError::Closed)))
            }
        }
    }
}

impl std::fmt::Debug for ResponseHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self.state {
            HandleState::Pending(_) => "pending",
            HandleState::Ready(_) => "ready",
        };
        f.debug_struct("ResponseHandle")
            .field("correlation_id", &self.correlation_id)
            .field("state", &state)
            .finish()
    }
}
