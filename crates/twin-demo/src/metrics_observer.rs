//! Prometheus-backed client observer.

use std::time::Duration;
use twin_correlation::{ClientObserver, CorrelationId, ListenerError, RequestOutcome, SubscriptionId};
use twin_telemetry::{
    metric_inc, metric_observe, TWIN_EVENTS_DISPATCHED, TWIN_LATE_RESPONSES,
    TWIN_LISTENER_FAILURES, TWIN_LISTENER_INVOCATIONS, TWIN_PENDING_REQUESTS,
    TWIN_REQUESTS_COMPLETED, TWIN_REQUESTS_SENT, TWIN_REQUEST_DURATION,
};

/// Records client activity into the twin-telemetry metrics.
#[derive(Debug, Default, Clone, Copy)]
pub struct PrometheusObserver;

impl ClientObserver for PrometheusObserver {
    fn request_registered(&self, _correlation_id: CorrelationId, _operation: &str) {
        TWIN_PENDING_REQUESTS.inc();
    }

    fn request_sent(&self, _correlation_id: CorrelationId, operation: &str) {
        metric_inc!(TWIN_REQUESTS_SENT, &[operation]);
    }

    fn request_completed(
        &self,
        _correlation_id: CorrelationId,
        operation: &str,
        outcome: RequestOutcome,
        elapsed: Duration,
    ) {
        TWIN_PENDING_REQUESTS.dec();
        metric_inc!(TWIN_REQUESTS_COMPLETED, &[operation, outcome.as_str()]);
        metric_observe!(TWIN_REQUEST_DURATION, &[operation], elapsed.as_secs_f64());
    }

    fn late_response(&self, _correlation_id: CorrelationId) {
        metric_inc!(TWIN_LATE_RESPONSES);
    }

    fn event_dispatched(&self, _entity_key: &str, listeners: usize) {
        metric_inc!(TWIN_EVENTS_DISPATCHED);
        TWIN_LISTENER_INVOCATIONS.inc_by(listeners as f64);
    }

    fn listener_failed(&self, _subscription_id: &SubscriptionId, error: &ListenerError) {
        metric_inc!(TWIN_LISTENER_FAILURES, &[failure_reason(error)]);
    }
}

fn failure_reason(error: &ListenerError) -> &'static str {
    match error {
        ListenerError::Failed(_) => "error",
        ListenerError::Panicked => "panic",
        ListenerError::TimedOut(_) => "timeout",
        ListenerError::QueueFull(_) => "overflow",
    }
}
