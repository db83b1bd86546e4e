//! Request dispatcher.
//!
//! Registers a pending entry first, then transmits, so a response racing the
//! send always finds its entry.

use crate::codec;
use crate::domain::correlation::CorrelationId;
use crate::domain::error::CorrelationError;
use crate::domain::message::OutboundRequest;
use crate::domain::pending::PendingRequestTable;
use crate::handle::ResponseHandle;
use crate::observer::ClientObserver;
use crate::ports::outbound::TransportSender;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub struct RequestDispatcher {
    pending: Arc<PendingRequestTable>,
    sender: Arc<dyn TransportSender>,
    observer: Arc<dyn ClientObserver>,
}

impl RequestDispatcher {
    pub fn new(
        pending: Arc<PendingRequestTable>,
        sender: Arc<dyn TransportSender>,
        observer: Arc<dyn ClientObserver>,
    ) -> Self {
        Self {
            pending,
            sender,
            observer,
        }
    }

    /// Send a request and return the handle for its response.
    ///
    /// If the request cannot be encoded or transmitted the entry is failed
    /// with `CorrelationError::Transmission` and the returned handle is
    /// already complete. After the pending table is closed nothing is
    /// transmitted and the handle fails with `CorrelationError::Closed`.
    pub async fn send(
        &self,
        operation: &str,
        payload: Value,
        timeout: Option<Duration>,
    ) -> ResponseHandle {
        let (correlation_id, handle) = match self.pending.try_register(operation, timeout) {
            Ok(registered) => registered,
            Err(e) => {
                debug!(operation = operation, error = %e, "Request refused, client closed");
                return ResponseHandle::failed(CorrelationId::new(), e);
            }
        };

        let request = OutboundRequest {
            correlation_id,
            operation: operation.to_string(),
            payload,
        };

        let frame = match codec::encode_request(&request) {
            Ok(frame) => frame,
            Err(e) => return self.transmission_failed(correlation_id, operation, handle, e.to_string()),
        };

        if let Err(e) = self.sender.send_raw(frame).await {
            return self.transmission_failed(correlation_id, operation, handle, e.to_string());
        }

        self.observer.request_sent(correlation_id, operation);
        debug!(
            correlation_id = %correlation_id,
            operation = operation,
            "Sent request"
        );
        handle
    }

    fn transmission_failed(
        &self,
        correlation_id: CorrelationId,
        operation: &str,
        handle: ResponseHandle,
        reason: String,
    ) -> ResponseHandle {
        warn!(
            correlation_id = %correlation_id,
            operation = operation,
            error = %reason,
            "Failed to transmit request"
        );
        self.pending
            .fail(correlation_id, CorrelationError::Transmission(reason));
        handle
    }

    pub fn pending(&self) -> &Arc<PendingRequestTable> {
        &self.pending
    }
}
