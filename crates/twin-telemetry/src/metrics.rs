//! Prometheus metrics for twin clients.
//!
//! All metrics follow the naming convention: `twin_<area>_<metric>_<unit>`
//!
//! ## Metric Types
//!
//! - **Counter**: requests sent, completed requests by outcome, events, failures
//! - **Gauge**: requests currently pending
//! - **Histogram**: request round-trip time per operation

use lazy_static::lazy_static;
use prometheus::{
    exponential_buckets, Counter, CounterVec, Encoder, Gauge, HistogramVec, Opts, Registry,
    TextEncoder,
};

use crate::TelemetryError;

lazy_static! {
    /// Global metrics registry
    pub static ref REGISTRY: Registry = Registry::new();

    // =========================================================================
    // REQUEST METRICS
    // =========================================================================

    /// Requests handed to the transport
    pub static ref TWIN_REQUESTS_SENT: CounterVec = CounterVec::new(
        Opts::new("twin_requests_sent_total", "Requests transmitted to the twin service"),
        &["operation"]
    ).expect("metric creation failed");

    /// Requests that reached a terminal state
    pub static ref TWIN_REQUESTS_COMPLETED: CounterVec = CounterVec::new(
        Opts::new("twin_requests_completed_total", "Requests by terminal outcome"),
        &["operation", "outcome"]  // outcome: resolved/failed/timed_out/cancelled
    ).expect("metric creation failed");

    /// Round-trip time until the terminal state
    pub static ref TWIN_REQUEST_DURATION: HistogramVec = HistogramVec::new(
        prometheus::HistogramOpts::new(
            "twin_request_duration_seconds",
            "Time from registration to completion of a request"
        ).buckets(exponential_buckets(0.0005, 2.0, 16).unwrap_or_default()),
        &["operation"]
    ).expect("metric creation failed");

    /// Requests currently awaiting a response
    pub static ref TWIN_PENDING_REQUESTS: Gauge = Gauge::new(
        "twin_requests_pending",
        "Number of requests awaiting a response"
    ).expect("metric creation failed");

    /// Responses for IDs that were no longer pending
    pub static ref TWIN_LATE_RESPONSES: Counter = Counter::new(
        "twin_responses_late_total",
        "Responses discarded because the request already completed"
    ).expect("metric creation failed");

    // =========================================================================
    // CHANGE NOTIFICATION METRICS
    // =========================================================================

    /// Change events fanned out to at least one listener
    pub static ref TWIN_EVENTS_DISPATCHED: Counter = Counter::new(
        "twin_events_dispatched_total",
        "Change events dispatched to listeners"
    ).expect("metric creation failed");

    /// Listener invocations scheduled
    pub static ref TWIN_LISTENER_INVOCATIONS: Counter = Counter::new(
        "twin_listener_invocations_total",
        "Listener invocations scheduled for change events"
    ).expect("metric creation failed");

    /// Listener failures by reason
    pub static ref TWIN_LISTENER_FAILURES: CounterVec = CounterVec::new(
        Opts::new("twin_listener_failures_total", "Change listener failures"),
        &["reason"]  // reason: error/panic/timeout/overflow
    ).expect("metric creation failed");
}

/// Handle proving the metrics are registered.
#[derive(Debug, Clone, Copy)]
pub struct MetricsHandle {
    _registered: (),
}

/// Register all metrics with the global registry.
///
/// Registering twice is not an error; already registered collectors are
/// skipped.
pub fn register_metrics() -> Result<MetricsHandle, TelemetryError> {
    let metrics: Vec<Box<dyn prometheus::core::Collector>> = vec![
        // Requests
        Box::new(TWIN_REQUESTS_SENT.clone()),
        Box::new(TWIN_REQUESTS_COMPLETED.clone()),
        Box::new(TWIN_REQUEST_DURATION.clone()),
        Box::new(TWIN_PENDING_REQUESTS.clone()),
        Box::new(TWIN_LATE_RESPONSES.clone()),
        // Change notifications
        Box::new(TWIN_EVENTS_DISPATCHED.clone()),
        Box::new(TWIN_LISTENER_INVOCATIONS.clone()),
        Box::new(TWIN_LISTENER_FAILURES.clone()),
    ];

    for metric in metrics {
        match REGISTRY.register(metric) {
            Ok(()) | Err(prometheus::Error::AlreadyReg) => {}
            Err(e) => return Err(TelemetryError::MetricsInit(e.to_string())),
        }
    }

    Ok(MetricsHandle { _registered: () })
}

/// Encode all metrics as Prometheus text format.
pub fn gather_text() -> Result<String, TelemetryError> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}
