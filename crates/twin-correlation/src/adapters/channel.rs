//! In-memory transport over tokio channels.
//!
//! The client side gets a [`ChannelSender`]/[`ChannelReceiver`] pair; the
//! other side ([`RemoteEndpoint`]) plays the twin service: it reads request
//! frames and pushes response and event frames back.

use crate::ports::outbound::{TransportError, TransportReceiver, TransportSender};
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, Mutex};

pub struct ChannelSender(mpsc::Sender<Bytes>);

#[async_trait]
impl TransportSender for ChannelSender {
    async fn send_raw(&self, frame: Bytes) -> Result<(), TransportError> {
        self.0.send(frame).await.map_err(|_| TransportError::Closed)
    }
}

pub struct ChannelReceiver(Mutex<mpsc::Receiver<Bytes>>);

#[async_trait]
impl TransportReceiver for ChannelReceiver {
    async fn receive(&self) -> Result<Bytes, TransportError> {
        let mut guard = self.0.lock().await;
        guard.recv().await.ok_or(TransportError::Closed)
    }
}

/// Service side of an in-memory transport.
pub struct RemoteEndpoint {
    /// Request frames sent by the client
    pub requests: mpsc::Receiver<Bytes>,
    /// Response and event frames for the client
    pub inbound: mpsc::Sender<Bytes>,
}

/// Create a connected client/service channel pair with `buffer` slots per direction.
pub fn channel_transport(buffer: usize) -> (ChannelSender, ChannelReceiver, RemoteEndpoint) {
    let (req_tx, req_rx) = mpsc::channel(buffer);
    let (in_tx, in_rx) = mpsc::channel(buffer);
    (
        ChannelSender(req_tx),
        ChannelReceiver(Mutex::new(in_rx)),
        RemoteEndpoint {
            requests: req_rx,
            inbound: in_tx,
        },
    )
}
