//! Messages exchanged with the twin service.

use crate::domain::correlation::CorrelationId;
use crate::domain::error::RemoteError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Kind of change a twin reported.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ChangeAction {
    Created,
    Modified,
    Merged,
    Deleted,
    /// Any action this client does not know about, kept verbatim.
    Other(String),
}

impl ChangeAction {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Created => "created",
            Self::Modified => "modified",
            Self::Merged => "merged",
            Self::Deleted => "deleted",
            Self::Other(s) => s,
        }
    }
}

impl From<String> for ChangeAction {
    fn from(s: String) -> Self {
        match s.as_str() {
            "created" => Self::Created,
            "modified" => Self::Modified,
            "merged" => Self::Merged,
            "deleted" => Self::Deleted,
            _ => Self::Other(s),
        }
    }
}

impl From<ChangeAction> for String {
    fn from(action: ChangeAction) -> Self {
        action.as_str().to_string()
    }
}

impl fmt::Display for ChangeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn root_path() -> String {
    "/".to_string()
}

/// A change notification for one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
    /// Entity the change applies to (a thing ID)
    pub entity_key: String,
    pub action: ChangeAction,
    /// JSON pointer of the changed part, `/` for the whole entity
    #[serde(default = "root_path")]
    pub path: String,
    #[serde(default)]
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl ChangeEvent {
    pub fn new(entity_key: impl Into<String>, action: ChangeAction, value: Value) -> Self {
        Self {
            entity_key: entity_key.into(),
            action,
            path: root_path(),
            value,
            revision: None,
            timestamp: None,
        }
    }

    pub fn at_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_revision(mut self, revision: u64) -> Self {
        self.revision = Some(revision);
        self
    }

    pub fn stamped_now(mut self) -> Self {
        self.timestamp = Some(Utc::now());
        self
    }
}

/// A request as handed to the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundRequest {
    pub correlation_id: CorrelationId,
    /// Operation name, e.g. `things.create`
    pub operation: String,
    pub payload: Value,
}

/// Everything the transport can deliver to the client.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// Answer to an earlier request
    Response {
        correlation_id: CorrelationId,
        result: Result<Value, RemoteError>,
    },
    /// Unsolicited change notification
    Event(ChangeEvent),
}

impl InboundMessage {
    pub fn success(correlation_id: CorrelationId, payload: Value) -> Self {
        Self::Response {
            correlation_id,
            result: Ok(payload),
        }
    }

    pub fn failure(correlation_id: CorrelationId, error: RemoteError) -> Self {
        Self::Response {
            correlation_id,
            result: Err(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_known_actions_parse() {
        assert_eq!(ChangeAction::from("deleted".to_string()), ChangeAction::Deleted);
        assert_eq!(
            ChangeAction::from("migrated".to_string()),
            ChangeAction::Other("migrated".into())
        );
    }

    #[test]
    fn test_event_defaults_when_fields_missing() {
        let event: ChangeEvent =
            serde_json::from_value(json!({"entityKey": "ns:lamp", "action": "modified"})).unwrap();
        assert_eq!(event.path, "/");
        assert_eq!(event.value, Value::Null);
        assert_eq!(event.action, ChangeAction::Modified);
        assert!(event.revision.is_none());
    }

    #[test]
    fn test_event_builder() {
        let event = ChangeEvent::new("ns:lamp", ChangeAction::Modified, json!("Berlin"))
            .at_path("/attributes/address/city")
            .with_revision(3);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["entityKey"], "ns:lamp");
        assert_eq!(json["path"], "/attributes/address/city");
        assert_eq!(json["revision"], 3);
        assert!(json.get("timestamp").is_none());
    }
}
