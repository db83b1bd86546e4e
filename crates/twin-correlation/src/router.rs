//! Inbound router.
//!
//! Classifies every inbound message as a response or a change event and
//! hands it to the pending table or the subscription registry. Messages are
//! processed in arrival order; nothing here waits on a listener.

use crate::codec;
use crate::domain::correlation::CorrelationId;
use crate::domain::error::CorrelationError;
use crate::domain::message::InboundMessage;
use crate::domain::pending::PendingRequestTable;
use crate::ports::outbound::{TransportError, TransportReceiver};
use crate::subscriptions::ChangeSubscriptionRegistry;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Where one inbound message ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Routed {
    /// A response; `matched` is false for late or unknown correlation IDs
    Response {
        correlation_id: CorrelationId,
        matched: bool,
    },
    /// A change event handed to `listeners` listeners
    Event { entity_key: String, listeners: usize },
    /// Undecodable frame
    Dropped,
}

#[derive(Debug, Default)]
struct RouterStats {
    responses: AtomicU64,
    unmatched_responses: AtomicU64,
    events: AtomicU64,
    malformed: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouterStatsSnapshot {
    pub responses: u64,
    pub unmatched_responses: u64,
    pub events: u64,
    pub malformed: u64,
}

pub struct InboundRouter {
    pending: Arc<PendingRequestTable>,
    registry: Arc<ChangeSubscriptionRegistry>,
    stats: RouterStats,
}

impl InboundRouter {
    pub fn new(pending: Arc<PendingRequestTable>, registry: Arc<ChangeSubscriptionRegistry>) -> Self {
        Self {
            pending,
            registry,
            stats: RouterStats::default(),
        }
    }

    pub fn on_message(&self, message: InboundMessage) -> Routed {
        match message {
            InboundMessage::Response {
                correlation_id,
                result,
            } => {
                self.stats.responses.fetch_add(1, Ordering::Relaxed);
                let matched = self.pending.resolve(correlation_id, result);
                if !matched {
                    self.stats
                        .unmatched_responses
                        .fetch_add(1, Ordering::Relaxed);
                }
                Routed::Response {
                    correlation_id,
                    matched,
                }
            }
            InboundMessage::Event(event) => {
                self.stats.events.fetch_add(1, Ordering::Relaxed);
                let entity_key = event.entity_key.clone();
                let listeners = self.registry.dispatch(event);
                Routed::Event {
                    entity_key,
                    listeners,
                }
            }
        }
    }

    /// Decode one frame and route it. Undecodable frames are logged and dropped.
    pub fn on_raw(&self, frame: &[u8]) -> Routed {
        match codec::decode_inbound(frame) {
            Ok(message) => self.on_message(message),
            Err(e) => {
                self.stats.malformed.fetch_add(1, Ordering::Relaxed);
                warn!(
                    error = %e,
                    frame_len = frame.len(),
                    "Dropping undecodable inbound frame"
                );
                Routed::Dropped
            }
        }
    }

    /// Run the receive loop until shutdown is signalled or the transport closes.
    ///
    /// When the transport closes every pending request fails with
    /// `CorrelationError::Closed`, since no response can arrive any more.
    pub async fn run(
        self: Arc<Self>,
        receiver: Arc<dyn TransportReceiver>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("Inbound router started");
        loop {
            tokio::select! {
                received = receiver.receive() => match received {
                    Ok(frame) => {
                        self.on_raw(&frame);
                    }
                    Err(TransportError::Closed) => {
                        let failed = self.pending.close(CorrelationError::Closed);
                        warn!(failed_requests = failed, "Transport closed, stopping inbound router");
                        break;
                    }
                    Err(e) => {
                        error!(error = %e, "Error receiving inbound frame");
                    }
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        debug!("Inbound router stopping");
                        break;
                    }
                }
            }
        }
    }

    pub fn stats(&self) -> RouterStatsSnapshot {
        RouterStatsSnapshot {
            responses: self.stats.responses.load(Ordering::Relaxed),
            unmatched_responses: self.stats.unmatched_responses.load(Ordering::Relaxed),
            events: self.stats.events.load(Ordering::Relaxed),
            malformed: self.stats.malformed.load(Ordering::Relaxed),
        }
    }
}
