//! Thing operations on top of the correlation layer.
//!
//! A thing is addressed by its ID (`namespace:name`), which is also the
//! entity key its change events carry. Thing bodies stay opaque JSON.

use crate::domain::correlation::SubscriptionId;
use crate::domain::error::SubscribeError;
use crate::handle::ResponseHandle;
use crate::ports::inbound::TwinApi;
use crate::subscriptions::ChangeListener;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

/// Operation names understood by the twin service.
pub mod operations {
    pub const CREATE: &str = "things.create";
    pub const RETRIEVE: &str = "things.retrieve";
    pub const RETRIEVE_MANY: &str = "things.retrieveMany";
    pub const UPDATE: &str = "things.update";
    pub const PUT_ATTRIBUTE: &str = "things.putAttribute";
    pub const DELETE: &str = "things.delete";
}

/// Handle on one thing.
pub struct ThingHandle<'a, A: ?Sized> {
    api: &'a A,
    thing_id: String,
    timeout: Option<Duration>,
}

impl<'a, A: TwinApi + ?Sized> ThingHandle<'a, A> {
    pub fn new(api: &'a A, thing_id: impl Into<String>) -> Self {
        Self {
            api,
            thing_id: thing_id.into(),
            timeout: None,
        }
    }

    /// Use `timeout` instead of the client default for every request.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn thing_id(&self) -> &str {
        &self.thing_id
    }

    /// Create the thing; the service answers `409` if it already exists.
    pub async fn create(&self, thing: Value) -> ResponseHandle {
        self.request(
            operations::CREATE,
            json!({"thingId": self.thing_id, "thing": thing}),
        )
        .await
    }

    pub async fn retrieve(&self) -> ResponseHandle {
        self.request(operations::RETRIEVE, json!({"thingId": self.thing_id}))
            .await
    }

    /// Retrieve only the fields named by `field_selector`, e.g. `attributes/location`.
    pub async fn retrieve_fields(&self, field_selector: &str) -> ResponseHandle {
        self.request(
            operations::RETRIEVE,
            json!({"thingId": self.thing_id, "fields": field_selector}),
        )
        .await
    }

    /// Replace the thing.
    pub async fn update(&self, thing: Value) -> ResponseHandle {
        self.request(
            operations::UPDATE,
            json!({"thingId": self.thing_id, "thing": thing}),
        )
        .await
    }

    /// Set one attribute; `pointer` is relative to `attributes`, e.g. `/address/city`.
    pub async fn put_attribute(&self, pointer: &str, value: Value) -> ResponseHandle {
        self.request(
            operations::PUT_ATTRIBUTE,
            json!({"thingId": self.thing_id, "pointer": pointer, "value": value}),
        )
        .await
    }

    pub async fn delete(&self) -> ResponseHandle {
        self.request(operations::DELETE, json!({"thingId": self.thing_id}))
            .await
    }

    /// Register `listener` for changes of this thing.
    pub fn register_for_changes(
        &self,
        listener: Arc<dyn ChangeListener>,
    ) -> Result<SubscriptionId, SubscribeError> {
        self.api.subscribe(&self.thing_id, listener)
    }

    async fn request(&self, operation: &str, payload: Value) -> ResponseHandle {
        self.api.send(operation, payload, self.timeout).await
    }
}

/// Retrieve several things at once, optionally restricted to `field_selector`.
pub async fn retrieve_many<A: TwinApi + ?Sized>(
    api: &A,
    thing_ids: &[&str],
    field_selector: Option<&str>,
) -> ResponseHandle {
    let mut payload = json!({ "thingIds": thing_ids });
    if let Some(fields) = field_selector {
        payload["fields"] = Value::from(fields);
    }
    api.send(operations::RETRIEVE_MANY, payload, None).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::channel::channel_transport;
    use crate::codec;
    use crate::client::TwinClient;

    #[tokio::test]
    async fn test_operations_carry_thing_id() {
        let (sender, receiver, mut remote) = channel_transport(8);
        let client = TwinClient::connect(sender, receiver).unwrap();
        let thing = ThingHandle::new(&client, "org.example:lamp");

        let _create = thing.create(json!({"attributes": {"on": false}})).await;
        let _put = thing.put_attribute("/on", json!(true)).await;
        let _many = retrieve_many(&client, &["a:1", "a:2"], Some("thingId")).await;

        let create = codec::decode_request(&remote.requests.recv().await.unwrap()).unwrap();
        assert_eq!(create.operation, operations::CREATE);
        assert_eq!(create.payload["thingId"], "org.example:lamp");
        assert_eq!(create.payload["thing"]["attributes"]["on"], false);

        let put = codec::decode_request(&remote.requests.recv().await.unwrap()).unwrap();
        assert_eq!(put.operation, operations::PUT_ATTRIBUTE);
        assert_eq!(put.payload["pointer"], "/on");

        let many = codec::decode_request(&remote.requests.recv().await.unwrap()).unwrap();
        assert_eq!(many.operation, operations::RETRIEVE_MANY);
        assert_eq!(many.payload["thingIds"], json!(["a:1", "a:2"]));
        assert_eq!(many.payload["fields"], "thingId");

        client.shutdown().await;
    }
}
