//! Pending Request Table.
//!
//! Maps correlation IDs to result slots of requests awaiting a response.
//!
//! Flow:
//! 1. Dispatcher calls `register()` and gets an ID plus a [`ResponseHandle`]
//! 2. Dispatcher transmits the request tagged with the ID
//! 3. Inbound router receives the response and calls `resolve()`
//! 4. Or the sweeper finds the deadline passed and calls `expire()`
//!
//! Removing the entry from the map is the terminal transition, so whichever
//! of `resolve`/`expire`/`cancel` removes it first is the only one that
//! delivers a result. Later calls for the same ID are no-ops.

use crate::domain::correlation::CorrelationId;
use crate::domain::error::{CorrelationError, RemoteError, RequestResult};
use crate::handle::ResponseHandle;
use crate::observer::{ClientObserver, NoopObserver, RequestOutcome};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, watch};
use tracing::{debug, warn};

/// Upper bound for a request timeout; longer ones are clamped.
pub const MAX_REQUEST_TIMEOUT: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// A request waiting for its response
struct PendingRequest {
    /// Single-assignment result slot
    sender: oneshot::Sender<RequestResult>,
    /// Operation name (for logging)
    operation: String,
    created_at: Instant,
    deadline: Instant,
}

/// Counters for the pending request table
#[derive(Debug, Default)]
struct PendingStats {
    registered: AtomicU64,
    resolved: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
    cancelled: AtomicU64,
    /// Responses for IDs that were no longer pending
    late: AtomicU64,
    /// Results produced after the awaiting handle was dropped
    abandoned: AtomicU64,
}

/// Point-in-time copy of the table counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingStatsSnapshot {
    pub registered: u64,
    pub resolved: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub cancelled: u64,
    pub late: u64,
    pub abandoned: u64,
}

pub struct PendingRequestTable {
    pending: DashMap<CorrelationId, PendingRequest>,
    default_timeout: Duration,
    stats: PendingStats,
    observer: Arc<dyn ClientObserver>,
    /// Set once by `close`; registration holds the read side across insert
    closed: RwLock<bool>,
}

impl PendingRequestTable {
    pub fn new(default_timeout: Duration) -> Self {
        Self::with_observer(default_timeout, Arc::new(NoopObserver))
    }

    pub fn with_observer(default_timeout: Duration, observer: Arc<dyn ClientObserver>) -> Self {
        Self {
            pending: DashMap::new(),
            default_timeout,
            stats: PendingStats::default(),
            observer,
            closed: RwLock::new(false),
        }
    }

    /// Register a pending request.
    ///
    /// The deadline is `now + timeout` (or the table default), with the
    /// timeout clamped to [`MAX_REQUEST_TIMEOUT`]. The returned handle
    /// completes when the entry reaches a terminal state. Once the table is
    /// closed the handle is already failed with `CorrelationError::Closed`.
    pub fn register(
        self: &Arc<Self>,
        operation: &str,
        timeout: Option<Duration>,
    ) -> (CorrelationId, ResponseHandle) {
        match self.try_register(operation, timeout) {
            Ok(registered) => registered,
            Err(e) => {
                let correlation_id = CorrelationId::new();
                (correlation_id, ResponseHandle::failed(correlation_id, e))
            }
        }
    }

    /// Like [`register`](Self::register) but refuses with
    /// `CorrelationError::Closed` instead of returning a failed handle.
    pub fn try_register(
        self: &Arc<Self>,
        operation: &str,
        timeout: Option<Duration>,
    ) -> Result<(CorrelationId, ResponseHandle), CorrelationError> {
        let (tx, rx) = oneshot::channel();
        let now = Instant::now();
        let timeout = timeout
            .unwrap_or(self.default_timeout)
            .min(MAX_REQUEST_TIMEOUT);

        // Held until the entry is in the map, so `close` either sees it or we see `closed`
        let closed = self.closed.read();
        if *closed {
            return Err(CorrelationError::Closed);
        }

        let correlation_id = loop {
            let candidate = CorrelationId::new();
            match self.pending.entry(candidate) {
                Entry::Vacant(slot) => {
                    slot.insert(PendingRequest {
                        sender: tx,
                        operation: operation.to_string(),
                        created_at: now,
                        deadline: now + timeout,
                    });
                    break candidate;
                }
                Entry::Occupied(_) => continue,
            }
        };
        drop(closed);

        self.stats.registered.fetch_add(1, Ordering::Relaxed);
        self.observer.request_registered(correlation_id, operation);
        debug!(
            correlation_id = %correlation_id,
            operation = operation,
            timeout_ms = timeout.as_millis() as u64,
            "Registered pending request"
        );

        let handle = ResponseHandle::pending(correlation_id, rx, Arc::downgrade(self));
        Ok((correlation_id, handle))
    }

    /// Resolve a pending request with the remote outcome.
    ///
    /// Returns false if the ID is unknown, already resolved, or expired.
    pub fn resolve(
        &self,
        correlation_id: CorrelationId,
        result: Result<serde_json::Value, RemoteError>,
    ) -> bool {
        let (result, outcome) = match result {
            Ok(value) => (Ok(value), RequestOutcome::Resolved),
            Err(e) => (Err(CorrelationError::Remote(e)), RequestOutcome::Failed),
        };
        self.complete(correlation_id, result, outcome)
    }

    /// Fail a pending request with a local error (e.g. transmission failure).
    pub fn fail(&self, correlation_id: CorrelationId, error: CorrelationError) -> bool {
        let outcome = match error {
            CorrelationError::Timeout { .. } => RequestOutcome::TimedOut,
            CorrelationError::Cancelled => RequestOutcome::Cancelled,
            _ => RequestOutcome::Failed,
        };
        self.complete(correlation_id, Err(error), outcome)
    }

    /// Expire a request whose deadline passed.
    pub fn expire(&self, correlation_id: CorrelationId) -> bool {
        let Some((_, request)) = self.pending.remove(&correlation_id) else {
            return false;
        };
        let after = request.deadline.saturating_duration_since(request.created_at);
        warn!(
            correlation_id = %correlation_id,
            operation = %request.operation,
            timeout_ms = after.as_millis() as u64,
            "Pending request expired"
        );
        self.deliver(
            correlation_id,
            request,
            Err(CorrelationError::Timeout {
                correlation_id,
                after,
            }),
            RequestOutcome::TimedOut,
        );
        true
    }

    /// Withdraw a pending request; its handle observes `Cancelled`.
    pub fn cancel(&self, correlation_id: CorrelationId) -> bool {
        self.fail(correlation_id, CorrelationError::Cancelled)
    }

    /// Expire every entry whose deadline has passed.
    ///
    /// Returns the number of requests expired.
    pub fn expire_overdue(&self) -> usize {
        let now = Instant::now();
        let overdue: Vec<CorrelationId> = self
            .pending
            .iter()
            .filter(|entry| entry.deadline <= now)
            .map(|entry| *entry.key())
            .collect();

        overdue
            .into_iter()
            .filter(|id| self.expire(*id))
            .count()
    }

    /// Refuse new registrations and fail everything still pending with
    /// `error`. Returns how many requests were failed.
    pub fn close(&self, error: CorrelationError) -> usize {
        *self.closed.write() = true;
        self.fail_all(error)
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.read()
    }

    /// Fail every pending request with the same error.
    pub fn fail_all(&self, error: CorrelationError) -> usize {
        let ids: Vec<CorrelationId> = self.pending.iter().map(|e| *e.key()).collect();
        ids.into_iter()
            .filter(|id| self.fail(*id, error.clone()))
            .count()
    }

    fn complete(
        &self,
        correlation_id: CorrelationId,
        result: RequestResult,
        outcome: RequestOutcome,
    ) -> bool {
        match self.pending.remove(&correlation_id) {
            Some((_, request)) => {
                self.deliver(correlation_id, request, result, outcome);
                true
            }
            None => {
                self.stats.late.fetch_add(1, Ordering::Relaxed);
                self.observer.late_response(correlation_id);
                debug!(
                    correlation_id = %correlation_id,
                    "Result for unknown or already completed correlation ID dropped"
                );
                false
            }
        }
    }

    fn deliver(
        &self,
        correlation_id: CorrelationId,
        request: PendingRequest,
        result: RequestResult,
        outcome: RequestOutcome,
    ) {
        let elapsed = request.created_at.elapsed();
        let counter = match outcome {
            RequestOutcome::Resolved => &self.stats.resolved,
            RequestOutcome::Failed => &self.stats.failed,
            RequestOutcome::TimedOut => &self.stats.timed_out,
            RequestOutcome::Cancelled => &self.stats.cancelled,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.observer
            .request_completed(correlation_id, &request.operation, outcome, elapsed);

        if request.sender.send(result).is_err() {
            self.stats.abandoned.fetch_add(1, Ordering::Relaxed);
            debug!(
                correlation_id = %correlation_id,
                operation = %request.operation,
                "Request handle dropped before completion"
            );
        } else {
            debug!(
                correlation_id = %correlation_id,
                operation = %request.operation,
                outcome = outcome.as_str(),
                elapsed_ms = elapsed.as_millis() as u64,
                "Completed pending request"
            );
        }
    }

    /// Get number of currently pending requests
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Check if a correlation ID is pending
    pub fn is_pending(&self, correlation_id: &CorrelationId) -> bool {
        self.pending.contains_key(correlation_id)
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    pub fn stats(&self) -> PendingStatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        PendingStatsSnapshot {
            registered: load(&self.stats.registered),
            resolved: load(&self.stats.resolved),
            failed: load(&self.stats.failed),
            timed_out: load(&self.stats.timed_out),
            cancelled: load(&self.stats.cancelled),
            late: load(&self.stats.late),
            abandoned: load(&self.stats.abandoned),
        }
    }
}

/// Background task that expires overdue requests until shutdown is signalled.
pub async fn expiry_sweeper(
    table: Arc<PendingRequestTable>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let expired = table.expire_overdue();
                if expired > 0 {
                    debug!(expired = expired, "Expired overdue pending requests");
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    debug!("Expiry sweeper stopping");
                    break;
                }
            }
        }
    }
}
