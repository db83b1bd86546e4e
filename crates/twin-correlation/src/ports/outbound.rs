//! Outbound Ports (Driven Ports)
//!
//! The client does not prescribe a framing. A transport moves opaque frames
//! produced by [`crate::codec`] to the twin service and back.

use async_trait::async_trait;
use bytes::Bytes;

/// Transport errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("transport closed")]
    Closed,
    #[error("send failed: {0}")]
    SendFailed(String),
    #[error("receive failed: {0}")]
    ReceiveFailed(String),
}

/// Sends encoded requests to the twin service.
#[async_trait]
pub trait TransportSender: Send + Sync {
    async fn send_raw(&self, frame: Bytes) -> Result<(), TransportError>;
}

/// Yields inbound frames (responses and change events) in arrival order.
#[async_trait]
pub trait TransportReceiver: Send + Sync {
    /// Receive the next frame. `Err(TransportError::Closed)` ends the stream.
    async fn receive(&self) -> Result<Bytes, TransportError>;
}
