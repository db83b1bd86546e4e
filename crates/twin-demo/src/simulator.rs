//! In-memory twin service.
//!
//! Plays the remote side of one or more [`RemoteEndpoint`]s: stores things,
//! answers the `things.*` operations and broadcasts a change event to every
//! connected client after each successful mutation.

use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use twin_correlation::codec;
use twin_correlation::{
    operations, ChangeAction, ChangeEvent, InboundMessage, OutboundRequest, RemoteEndpoint,
    RemoteError,
};

#[derive(Debug, Clone)]
struct StoredThing {
    body: Value,
    revision: u64,
}

#[derive(Default)]
struct ServiceState {
    things: Mutex<HashMap<String, StoredThing>>,
    /// Inbound channels of every connected client
    clients: Mutex<Vec<mpsc::Sender<Bytes>>>,
}

type Outcome = Result<(Value, Option<ChangeEvent>), RemoteError>;

#[derive(Clone, Default)]
pub struct TwinService {
    state: Arc<ServiceState>,
}

impl TwinService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer requests arriving on `endpoint` until the client goes away.
    pub fn serve(&self, endpoint: RemoteEndpoint) -> JoinHandle<()> {
        let RemoteEndpoint {
            mut requests,
            inbound,
        } = endpoint;
        self.state.clients.lock().push(inbound.clone());

        let service = self.clone();
        tokio::spawn(async move {
            while let Some(frame) = requests.recv().await {
                let request = match codec::decode_request(&frame) {
                    Ok(request) => request,
                    Err(e) => {
                        warn!(error = %e, "Twin service dropped malformed request");
                        continue;
                    }
                };

                let (result, event) = service.apply(&request);
                let response = InboundMessage::Response {
                    correlation_id: request.correlation_id,
                    result,
                };
                let frame = match codec::encode_inbound(&response) {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!(error = %e, "Twin service failed to encode response");
                        continue;
                    }
                };
                if inbound.send(frame).await.is_err() {
                    break;
                }
                if let Some(event) = event {
                    service.broadcast(event);
                }
            }
            debug!("Twin service client disconnected");
        })
    }

    /// Execute one request against the store.
    pub fn apply(&self, request: &OutboundRequest) -> (Result<Value, RemoteError>, Option<ChangeEvent>) {
        let payload = &request.payload;
        let outcome = match request.operation.as_str() {
            operations::CREATE => self.create(payload),
            operations::RETRIEVE => self.retrieve(payload),
            operations::RETRIEVE_MANY => self.retrieve_many(payload),
            operations::UPDATE => self.update(payload),
            operations::PUT_ATTRIBUTE => self.put_attribute(payload),
            operations::DELETE => self.delete(payload),
            other => Err(RemoteError::unsupported(other)),
        };

        match outcome {
            Ok((value, event)) => (Ok(value), event),
            Err(e) => {
                debug!(
                    correlation_id = %request.correlation_id,
                    operation = %request.operation,
                    status = e.status,
                    "Twin service rejected request"
                );
                (Err(e), None)
            }
        }
    }

    pub fn thing(&self, thing_id: &str) -> Option<Value> {
        self.state.things.lock().get(thing_id).map(|t| t.body.clone())
    }

    pub fn thing_count(&self) -> usize {
        self.state.things.lock().len()
    }

    /// Push `event` to every connected client without waiting on any of
    /// them. A client whose inbound buffer is full misses the event.
    fn broadcast(&self, event: ChangeEvent) {
        let frame = match codec::encode_inbound(&InboundMessage::Event(event)) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "Twin service failed to encode change event");
                return;
            }
        };
        let mut clients = self.state.clients.lock();
        for client in clients.iter() {
            if let Err(mpsc::error::TrySendError::Full(_)) = client.try_send(frame.clone()) {
                warn!("Twin service client not reading, change event dropped");
            }
        }
        clients.retain(|c| !c.is_closed());
    }

    fn create(&self, payload: &Value) -> Outcome {
        let thing_id = thing_id(payload)?;
        let mut body = thing_body(payload, &thing_id);

        let mut things = self.state.things.lock();
        if things.contains_key(&thing_id) {
            return Err(RemoteError::conflict(&thing_id));
        }
        body["thingId"] = Value::from(thing_id.clone());
        things.insert(
            thing_id.clone(),
            StoredThing {
                body: body.clone(),
                revision: 1,
            },
        );

        let event = ChangeEvent::new(&thing_id, ChangeAction::Created, body.clone())
            .with_revision(1)
            .stamped_now();
        Ok((body, Some(event)))
    }

    fn retrieve(&self, payload: &Value) -> Outcome {
        let thing_id = thing_id(payload)?;
        let things = self.state.things.lock();
        let stored = things
            .get(&thing_id)
            .ok_or_else(|| RemoteError::not_found(&thing_id))?;
        let body = match payload.get("fields").and_then(Value::as_str) {
            Some(selector) => select_fields(&stored.body, selector),
            None => stored.body.clone(),
        };
        Ok((body, None))
    }

    /// Missing things are left out of the result instead of failing the request.
    fn retrieve_many(&self, payload: &Value) -> Outcome {
        let ids = payload
            .get("thingIds")
            .and_then(Value::as_array)
            .ok_or_else(|| RemoteError::invalid_payload("thingIds must be an array"))?;
        let selector = payload.get("fields").and_then(Value::as_str);

        let things = self.state.things.lock();
        let found: Vec<Value> = ids
            .iter()
            .filter_map(Value::as_str)
            .filter_map(|id| things.get(id))
            .map(|stored| match selector {
                Some(selector) => select_fields(&stored.body, selector),
                None => stored.body.clone(),
            })
            .collect();
        Ok((Value::Array(found), None))
    }

    fn update(&self, payload: &Value) -> Outcome {
        let thing_id = thing_id(payload)?;
        let mut body = thing_body(payload, &thing_id);
        body["thingId"] = Value::from(thing_id.clone());

        let mut things = self.state.things.lock();
        let stored = things
            .get_mut(&thing_id)
            .ok_or_else(|| RemoteError::not_found(&thing_id))?;
        stored.body = body.clone();
        stored.revision += 1;

        let event = ChangeEvent::new(&thing_id, ChangeAction::Modified, body)
            .with_revision(stored.revision)
            .stamped_now();
        Ok((Value::Null, Some(event)))
    }

    fn put_attribute(&self, payload: &Value) -> Outcome {
        let thing_id = thing_id(payload)?;
        let pointer = payload
            .get("pointer")
            .and_then(Value::as_str)
            .ok_or_else(|| RemoteError::invalid_payload("pointer is required"))?;
        let value = payload.get("value").cloned().unwrap_or(Value::Null);

        let mut things = self.state.things.lock();
        let stored = things
            .get_mut(&thing_id)
            .ok_or_else(|| RemoteError::not_found(&thing_id))?;
        let path = format!("/attributes/{}", pointer.trim_start_matches('/'));
        set_path(&mut stored.body, &path, value.clone());
        stored.revision += 1;

        let event = ChangeEvent::new(&thing_id, ChangeAction::Modified, value)
            .at_path(path)
            .with_revision(stored.revision)
            .stamped_now();
        Ok((Value::Null, Some(event)))
    }

    fn delete(&self, payload: &Value) -> Outcome {
        let thing_id = thing_id(payload)?;
        let removed = self
            .state
            .things
            .lock()
            .remove(&thing_id)
            .ok_or_else(|| RemoteError::not_found(&thing_id))?;

        let event = ChangeEvent::new(&thing_id, ChangeAction::Deleted, Value::Null)
            .with_revision(removed.revision + 1)
            .stamped_now();
        Ok((Value::Null, Some(event)))
    }
}

fn thing_id(payload: &Value) -> Result<String, RemoteError> {
    payload
        .get("thingId")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .ok_or_else(|| RemoteError::invalid_payload("thingId is required"))
}

fn thing_body(payload: &Value, thing_id: &str) -> Value {
    match payload.get("thing") {
        Some(body @ Value::Object(_)) => body.clone(),
        _ => json!({ "thingId": thing_id }),
    }
}

/// Write `value` at JSON pointer `path`, creating intermediate objects.
fn set_path(root: &mut Value, path: &str, value: Value) {
    let mut current = root;
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        if !(current.is_object() || current.is_null()) {
            *current = Value::Null;
        }
        current = &mut current[segment];
    }
    *current = value;
}

/// Keep only the comma separated fields of `selector`, e.g. `thingId,attributes/location`.
fn select_fields(body: &Value, selector: &str) -> Value {
    let mut selected = json!({});
    for field in selector.split(',').map(str::trim).filter(|f| !f.is_empty()) {
        let path = format!("/{}", field.trim_start_matches('/'));
        if let Some(value) = body.pointer(&path) {
            set_path(&mut selected, &path, value.clone());
        }
    }
    selected
}
