//! Manage-things walkthrough.
//!
//! Four flows against a twin service, each creating its own things under
//! `namespace` so they can run against a shared service:
//!
//! 1. create, set an attribute, read back, delete
//! 2. create a thing, then replace it with a complex body (acl, attributes, features)
//! 3. retrieve one thing, several things, several things with a field selector
//! 4. watch a thing from one client while another client changes it

use futures::TryFutureExt;
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;
use tracing::info;
use twin_correlation::{
    listener_channel, retrieve_many, ChangeEvent, CorrelationError, SubscribeError, ThingHandle,
    TwinClient,
};
use uuid::Uuid;

/// Subjects granted access by the complex thing's acl.
pub const ACL_SUBJECTS: [&str; 2] = ["demo:owner", "demo:reader"];

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("request failed: {0}")]
    Request(#[from] CorrelationError),

    #[error("subscription refused: {0}")]
    Subscribe(#[from] SubscribeError),

    #[error("{flow}: expected change events did not arrive within {after:?}")]
    TimedOut { flow: &'static str, after: Duration },
}

/// Results of a full walkthrough run.
#[derive(Debug, Clone)]
pub struct WalkthroughReport {
    pub crud: Value,
    pub complex: Value,
    pub retrieved: RetrieveReport,
    pub change_events: Vec<ChangeEvent>,
}

#[derive(Debug, Clone)]
pub struct RetrieveReport {
    pub single: Value,
    pub many: Vec<Value>,
    pub selected: Vec<Value>,
}

pub fn new_thing_id(namespace: &str) -> String {
    format!("{namespace}:{}", Uuid::now_v7())
}

/// Run all four flows. `observer` watches the thing `writer` changes in the last one.
pub async fn run_walkthrough(
    observer: &TwinClient,
    writer: &TwinClient,
    namespace: &str,
    event_timeout: Duration,
) -> Result<WalkthroughReport, FlowError> {
    let crud = create_read_update_delete(writer, namespace).await?;
    let complex = create_complex_thing(writer, namespace).await?;
    let retrieved = retrieve_things(writer, namespace).await?;
    let change_events = update_thing(observer, writer, namespace, event_timeout).await?;

    info!(
        change_events = change_events.len(),
        "Walkthrough finished"
    );
    Ok(WalkthroughReport {
        crud,
        complex,
        retrieved,
        change_events,
    })
}

/// Returns the thing as read back before deletion.
pub async fn create_read_update_delete(
    client: &TwinClient,
    namespace: &str,
) -> Result<Value, FlowError> {
    let thing = &ThingHandle::new(client, new_thing_id(namespace));

    thing
        .create(json!({}))
        .await
        .and_then(|_| async move {
            thing
                .put_attribute("/address/city", json!("Berlin"))
                .await
                .await
        })
        .await?;

    let retrieved = thing.retrieve().await.await?;
    info!(thing_id = %thing.thing_id(), thing = %retrieved, "Retrieved thing");

    thing.delete().await.await?;
    info!(thing_id = %thing.thing_id(), "Deleted thing");
    Ok(retrieved)
}

/// Body with full rights for the first acl subject and read rights for the rest.
pub fn complex_thing_body() -> Value {
    let mut acl = serde_json::Map::new();
    for (i, subject) in ACL_SUBJECTS.iter().enumerate() {
        let owner = i == 0;
        acl.insert(
            subject.to_string(),
            json!({"READ": true, "WRITE": owner, "ADMINISTRATE": owner}),
        );
    }

    json!({
        "acl": acl,
        "attributes": {"attributeName": "value"},
        "features": {
            "featureId": {"properties": {"propertyName": "value"}}
        }
    })
}

pub async fn create_complex_thing(client: &TwinClient, namespace: &str) -> Result<Value, FlowError> {
    let thing = &ThingHandle::new(client, new_thing_id(namespace));

    let complex = thing
        .create(json!({}))
        .await
        .and_then(|_| async move {
            thing.update(complex_thing_body()).await.await?;
            thing.retrieve().await.await
        })
        .await?;

    info!(thing_id = %thing.thing_id(), thing = %complex, "Created complex thing");
    Ok(complex)
}

pub async fn retrieve_things(
    client: &TwinClient,
    namespace: &str,
) -> Result<RetrieveReport, FlowError> {
    let first = ThingHandle::new(client, new_thing_id(namespace));
    let second = ThingHandle::new(client, new_thing_id(namespace));

    let first_created = first.create(json!({"attributes": {"position": 1}}));
    let second_created = second.create(json!({"attributes": {"position": 2}}));
    let (first_created, second_created) = tokio::join!(first_created, second_created);
    first_created.await?;
    second_created.await?;

    let single = first.retrieve().await.await?;
    let ids = [first.thing_id(), second.thing_id()];
    let many: Vec<Value> = retrieve_many(client, &ids, None).await.into_typed().await?;
    let selected: Vec<Value> = retrieve_many(client, &ids, Some("attributes"))
        .await
        .into_typed()
        .await?;

    info!(
        single = %single,
        many = many.len(),
        selected = ?selected,
        "Retrieved things"
    );
    Ok(RetrieveReport {
        single,
        many,
        selected,
    })
}

/// Returns the change events `observer` saw for the thing `writer` created and updated.
pub async fn update_thing(
    observer: &TwinClient,
    writer: &TwinClient,
    namespace: &str,
    event_timeout: Duration,
) -> Result<Vec<ChangeEvent>, FlowError> {
    let thing_id = new_thing_id(namespace);
    let (listener, mut events) = listener_channel();
    let subscription = ThingHandle::new(observer, thing_id.as_str()).register_for_changes(listener)?;

    let thing = ThingHandle::new(writer, thing_id.as_str());
    thing.create(json!({"attributes": {"foo": "bar"}})).await.await?;
    // Replacing the body drops the attributes
    thing
        .update(json!({"features": {"myFeature": {"properties": {}}}}))
        .await
        .await?;

    let received = tokio::time::timeout(event_timeout, async {
        let mut received = Vec::with_capacity(2);
        while received.len() < 2 {
            match events.recv().await {
                Some(event) => {
                    info!(
                        thing_id = %event.entity_key,
                        action = %event.action.as_str(),
                        revision = ?event.revision,
                        "Received change event"
                    );
                    received.push(event);
                }
                None => break,
            }
        }
        received
    })
    .await;

    observer.unsubscribe(&subscription);
    thing.delete().await.await?;

    match received {
        Ok(events) if events.len() == 2 => Ok(events),
        _ => Err(FlowError::TimedOut {
            flow: "update_thing",
            after: event_timeout,
        }),
    }
}
