//! Change listener trait and the two stock implementations.

use crate::domain::error::ListenerError;
use crate::domain::message::ChangeEvent;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Receives change events for the entity it was registered on.
///
/// An `Err` (or a panic, or exceeding the listener timeout) is contained by
/// the registry: it is logged and counted, and the remaining listeners for
/// the same event still run.
#[async_trait]
pub trait ChangeListener: Send + Sync {
    async fn on_change(&self, event: &ChangeEvent) -> Result<(), ListenerError>;
}

/// Listener backed by an async closure.
pub struct FnListener<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> ChangeListener for FnListener<F>
where
    F: Fn(ChangeEvent) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), ListenerError>> + Send,
{
    async fn on_change(&self, event: &ChangeEvent) -> Result<(), ListenerError> {
        (self.f)(event.clone()).await
    }
}

/// Wrap an async closure as a listener.
pub fn listener_fn<F, Fut>(f: F) -> Arc<dyn ChangeListener>
where
    F: Fn(ChangeEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), ListenerError>> + Send + 'static,
{
    Arc::new(FnListener { f })
}

/// Listener forwarding every event into an unbounded channel.
pub struct ChannelListener {
    tx: mpsc::UnboundedSender<ChangeEvent>,
}

#[async_trait]
impl ChangeListener for ChannelListener {
    async fn on_change(&self, event: &ChangeEvent) -> Result<(), ListenerError> {
        self.tx
            .send(event.clone())
            .map_err(|_| ListenerError::failed("event receiver dropped"))
    }
}

/// Create a listener and the receiving end of its events.
///
/// The receiver yields `None` once the subscription is removed and no
/// dispatch holds the listener any more.
pub fn listener_channel() -> (Arc<dyn ChangeListener>, mpsc::UnboundedReceiver<ChangeEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Arc::new(ChannelListener { tx }), rx)
}
