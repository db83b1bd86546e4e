//! # Inbound Port - TwinApi
//!
//! Primary driving port: what application code uses to talk to twins.

use crate::domain::correlation::SubscriptionId;
use crate::domain::error::SubscribeError;
use crate::handle::ResponseHandle;
use crate::subscriptions::ChangeListener;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Caller API of a twin client.
///
/// # Example
///
/// ```rust,ignore
/// async fn example(api: &impl TwinApi) -> Result<(), CorrelationError> {
///     let created = api.send("things.create", json!({"thingId": "ns:lamp"}), None).await;
///     let thing = created.await?;
///     let sub = api.subscribe("ns:lamp", listener_fn(|event| async move {
///         println!("{} at {}", event.action, event.path);
///         Ok(())
///     }))?;
///     api.unsubscribe(&sub);
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait TwinApi: Send + Sync {
    /// Transmit a request and return a handle for its response.
    ///
    /// Never fails directly: transmission problems surface through the
    /// handle as `CorrelationError::Transmission`.
    async fn send(
        &self,
        operation: &str,
        payload: Value,
        timeout: Option<Duration>,
    ) -> ResponseHandle;

    /// Register `listener` for change events of `entity_key`.
    fn subscribe(
        &self,
        entity_key: &str,
        listener: Arc<dyn ChangeListener>,
    ) -> Result<SubscriptionId, SubscribeError>;

    /// Remove a subscription. Returns false if it was already gone.
    fn unsubscribe(&self, subscription_id: &SubscriptionId) -> bool;
}
