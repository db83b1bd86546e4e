//! Error types surfaced by the correlation layer.
//!
//! `CorrelationError` reaches the caller through a request handle.
//! `ListenerError` never leaves the subscription registry.

use crate::domain::correlation::CorrelationId;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Error codes the twin service reports, mirrored for local failures.
pub mod codes {
    pub const THING_NOT_FOUND: &str = "things:thing.notfound";
    pub const THING_CONFLICT: &str = "things:thing.conflict";
    pub const INVALID_PAYLOAD: &str = "things:payload.invalid";
    pub const UNSUPPORTED_OPERATION: &str = "things:operation.unsupported";
}

/// Failure reported by the remote side for one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "camelCase")]
#[error("[{status}] {error_code}: {message}")]
pub struct RemoteError {
    /// HTTP-like status code
    pub status: u16,
    /// Namespaced error code, e.g. `things:thing.notfound`
    pub error_code: String,
    /// Human readable description
    pub message: String,
}

impl RemoteError {
    pub fn new(status: u16, error_code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            error_code: error_code.into(),
            message: message.into(),
        }
    }

    pub fn not_found(thing_id: &str) -> Self {
        Self::new(
            404,
            codes::THING_NOT_FOUND,
            format!("The Thing with ID '{thing_id}' could not be found"),
        )
    }

    pub fn conflict(thing_id: &str) -> Self {
        Self::new(
            409,
            codes::THING_CONFLICT,
            format!("The Thing with ID '{thing_id}' already exists"),
        )
    }

    pub fn invalid_payload(details: impl Into<String>) -> Self {
        Self::new(400, codes::INVALID_PAYLOAD, details)
    }

    pub fn unsupported(operation: &str) -> Self {
        Self::new(
            400,
            codes::UNSUPPORTED_OPERATION,
            format!("Operation not supported: {operation}"),
        )
    }
}

/// Failure of a single request as seen by its caller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CorrelationError {
    /// The remote side answered with an explicit error.
    #[error("remote failure: {0}")]
    Remote(RemoteError),

    /// No response arrived before the deadline.
    #[error("request {correlation_id} timed out after {after:?}")]
    Timeout {
        correlation_id: CorrelationId,
        after: Duration,
    },

    /// The transport could not send the request.
    #[error("transmission failed: {0}")]
    Transmission(String),

    /// The request was withdrawn before a response arrived.
    #[error("request cancelled")]
    Cancelled,

    /// The client shut down while the request was pending.
    #[error("client closed")]
    Closed,

    /// A frame or payload could not be encoded or decoded.
    #[error("malformed message: {0}")]
    Decode(String),
}

impl CorrelationError {
    /// Whether this failure came from the deadline rather than the remote side.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// The remote error, if the remote side reported one.
    pub fn remote(&self) -> Option<&RemoteError> {
        match self {
            Self::Remote(e) => Some(e),
            _ => None,
        }
    }
}

impl From<RemoteError> for CorrelationError {
    fn from(e: RemoteError) -> Self {
        Self::Remote(e)
    }
}

impl From<serde_json::Error> for CorrelationError {
    fn from(e: serde_json::Error) -> Self {
        Self::Decode(e.to_string())
    }
}

/// Outcome delivered to whoever awaits a request.
pub type RequestResult = Result<serde_json::Value, CorrelationError>;

/// Failure of a change listener during dispatch. Contained by the registry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ListenerError {
    #[error("listener failed: {0}")]
    Failed(String),
    #[error("listener panicked")]
    Panicked,
    #[error("listener did not finish within {0:?}")]
    TimedOut(Duration),
    #[error("listener queue full ({0} events), event dropped")]
    QueueFull(usize),
}

impl ListenerError {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed(reason.into())
    }
}

/// Registration refused by the subscription registry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubscribeError {
    #[error("too many subscriptions for entity '{0}'")]
    TooManySubscriptions(String),
    #[error("entity key must not be empty")]
    EmptyEntityKey,
    #[error("client closed")]
    Closed,
}
