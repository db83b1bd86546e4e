//! JSON wire codec.
//!
//! Every frame is one JSON object tagged by `kind`:
//!
//! ```text
//! {"kind":"request","correlationId":"…","operation":"things.create","payload":{…}}
//! {"kind":"response","correlationId":"…","payload":{…}}
//! {"kind":"response","correlationId":"…","error":{"status":404,"errorCode":"…","message":"…"}}
//! {"kind":"event","entityKey":"org.example:lamp","action":"modified","path":"/attributes","value":{…}}
//! ```
//!
//! A response carrying an `error` is a failure even if a payload is present.

use crate::domain::correlation::CorrelationId;
use crate::domain::error::{CorrelationError, RemoteError};
use crate::domain::message::{ChangeEvent, InboundMessage, OutboundRequest};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
enum WireMessage {
    Request {
        #[serde(rename = "correlationId")]
        correlation_id: CorrelationId,
        operation: String,
        #[serde(default)]
        payload: Value,
    },
    Response {
        #[serde(rename = "correlationId")]
        correlation_id: CorrelationId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<RemoteError>,
    },
    Event(ChangeEvent),
}

pub fn encode_request(request: &OutboundRequest) -> Result<Bytes, CorrelationError> {
    encode(&WireMessage::Request {
        correlation_id: request.correlation_id,
        operation: request.operation.clone(),
        payload: request.payload.clone(),
    })
}

pub fn decode_request(frame: &[u8]) -> Result<OutboundRequest, CorrelationError> {
    match serde_json::from_slice::<WireMessage>(frame)? {
        WireMessage::Request {
            correlation_id,
            operation,
            payload,
        } => Ok(OutboundRequest {
            correlation_id,
            operation,
            payload,
        }),
        other => Err(CorrelationError::Decode(format!(
            "expected request frame, got {}",
            kind_of(&other)
        ))),
    }
}

pub fn encode_inbound(message: &InboundMessage) -> Result<Bytes, CorrelationError> {
    let wire = match message {
        InboundMessage::Response {
            correlation_id,
            result,
        } => {
            let (payload, error) = match result {
                Ok(value) => (Some(value.clone()), None),
                Err(e) => (None, Some(e.clone())),
            };
            WireMessage::Response {
                correlation_id: *correlation_id,
                payload,
                error,
            }
        }
        InboundMessage::Event(event) => WireMessage::Event(event.clone()),
    };
    encode(&wire)
}

pub fn decode_inbound(frame: &[u8]) -> Result<InboundMessage, CorrelationError> {
    match serde_json::from_slice::<WireMessage>(frame)? {
        WireMessage::Response {
            correlation_id,
            payload,
            error,
        } => {
            let result = match error {
                Some(e) => Err(e),
                None => Ok(payload.unwrap_or(Value::Null)),
            };
            Ok(InboundMessage::Response {
                correlation_id,
                result,
            })
        }
        WireMessage::Event(event) => Ok(InboundMessage::Event(event)),
        WireMessage::Request { correlation_id, .. } => Err(CorrelationError::Decode(format!(
            "unexpected request frame {correlation_id} on inbound side"
        ))),
    }
}

fn encode(wire: &WireMessage) -> Result<Bytes, CorrelationError> {
    serde_json::to_vec(wire)
        .map(Bytes::from)
        .map_err(CorrelationError::from)
}

fn kind_of(wire: &WireMessage) -> &'static str {
    match wire {
        WireMessage::Request { .. } => "request",
        WireMessage::Response { .. } => "response",
        WireMessage::Event(_) => "event",
    }
}
