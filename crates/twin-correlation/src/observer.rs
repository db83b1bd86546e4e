//! Side-effecting observation hook.
//!
//! The correlation and dispatch logic reports what happened through
//! [`ClientObserver`]; metrics exporters implement it. Every method has an
//! empty default so implementors only override what they record.

use crate::domain::correlation::{CorrelationId, SubscriptionId};
use crate::domain::error::ListenerError;
use std::time::Duration;

/// Terminal state reached by one pending request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    Resolved,
    Failed,
    TimedOut,
    Cancelled,
}

impl RequestOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Resolved => "resolved",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
            Self::Cancelled => "cancelled",
        }
    }
}

pub trait ClientObserver: Send + Sync {
    /// A request entered the pending table. Every registration is followed
    /// by exactly one `request_completed`.
    fn request_registered(&self, _correlation_id: CorrelationId, _operation: &str) {}

    fn request_sent(&self, _correlation_id: CorrelationId, _operation: &str) {}

    fn request_completed(
        &self,
        _correlation_id: CorrelationId,
        _operation: &str,
        _outcome: RequestOutcome,
        _elapsed: Duration,
    ) {
    }

    /// A response arrived for an ID that is no longer pending.
    fn late_response(&self, _correlation_id: CorrelationId) {}

    fn event_dispatched(&self, _entity_key: &str, _listeners: usize) {}

    fn listener_failed(&self, _subscription_id: &SubscriptionId, _error: &ListenerError) {}
}

/// Observer that records nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl ClientObserver for NoopObserver {}
