//! Realtime change envelopes.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::models::ActorId;

/// Highest `_event_version` whose payload this client understands.
pub const SUPPORTED_EVENT_VERSION: u64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    Insert,
    Update,
    Delete,
}

/// One changed row as broadcast by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub table: String,
    #[serde(rename = "type")]
    pub operation: Operation,
    /// New state; absent on delete
    #[serde(default)]
    pub record: Option<Map<String, Value>>,
    /// Prior state on update and delete
    #[serde(default)]
    pub old_record: Option<Map<String, Value>>,
    #[serde(rename = "_origin_user_id", default)]
    pub origin_user_id: Option<String>,
    #[serde(rename = "_event_version")]
    pub event_version: u64,
}

impl Envelope {
    /// Whether the local actor caused this change.
    pub fn is_self_echo(&self, actor: &ActorId) -> bool {
        self.origin_user_id.as_deref() == Some(actor.as_str())
    }

    /// Id of the changed row, from the new or the old state.
    pub fn record_id(&self) -> Option<&str> {
        self.record
            .as_ref()
            .or(self.old_record.as_ref())
            .and_then(|record| record.get("id"))
            .and_then(Value::as_str)
    }
}

/// What the listener made of one frame.
///
/// Either way the listener only requests a sync; payloads are never applied.
#[derive(Debug, Clone, PartialEq)]
pub enum RealtimeEvent {
    Change { envelope: Envelope, self_echo: bool },
    /// Unknown version or malformed payload: treated as "something changed"
    Degraded { reason: String },
}

impl RealtimeEvent {
    /// Classify a raw broadcast payload for `actor`.
    pub fn decode(frame: Value, actor: &ActorId) -> Self {
        match frame.get("_event_version").and_then(Value::as_u64) {
            Some(SUPPORTED_EVENT_VERSION) => match serde_json::from_value::<Envelope>(frame) {
                Ok(envelope) => {
                    let self_echo = envelope.is_self_echo(actor);
                    Self::Change {
                        envelope,
                        self_echo,
                    }
                }
                Err(error) => Self::Degraded {
                    reason: format!("malformed envelope: {error}"),
                },
            },
            Some(version) => Self::Degraded {
                reason: format!("unsupported event version {version}"),
            },
            None => Self::Degraded {
                reason: "missing event version".to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn actor() -> ActorId {
        ActorId::new("user-a").unwrap()
    }

    #[test]
    fn test_decode_self_echo() {
        let frame = json!({
            "table": "tasks",
            "type": "UPDATE",
            "record": { "id": "r1", "title": "new" },
            "old_record": { "id": "r1", "title": "old" },
            "_origin_user_id": "user-a",
            "_event_version": 1
        });

        let RealtimeEvent::Change {
            envelope,
            self_echo,
        } = RealtimeEvent::decode(frame, &actor())
        else {
            panic!("expected a change event");
        };
        assert!(self_echo);
        assert_eq!(envelope.operation, Operation::Update);
        assert_eq!(envelope.record_id(), Some("r1"));
    }

    #[test]
    fn test_decode_external_and_system_changes() {
        let external = json!({
            "table": "listings",
            "type": "INSERT",
            "record": { "id": "l1" },
            "_origin_user_id": "user-b",
            "_event_version": 1
        });
        assert!(matches!(
            RealtimeEvent::decode(external, &actor()),
            RealtimeEvent::Change {
                self_echo: false,
                ..
            }
        ));

        let system = json!({
            "table": "listings",
            "type": "DELETE",
            "old_record": { "id": "l1" },
            "_event_version": 1
        });
        let RealtimeEvent::Change {
            envelope,
            self_echo,
        } = RealtimeEvent::decode(system, &actor())
        else {
            panic!("expected a change event");
        };
        assert!(!self_echo);
        assert_eq!(envelope.record_id(), Some("l1"));
        assert_eq!(envelope.record, None);
    }

    #[test]
    fn test_unknown_version_degrades() {
        let frame = json!({ "table": "tasks", "type": "UPDATE", "_event_version": 2 });
        assert_eq!(
            RealtimeEvent::decode(frame, &actor()),
            RealtimeEvent::Degraded {
                reason: "unsupported event version 2".to_string()
            }
        );

        let frame = json!({ "table": "tasks" });
        assert!(matches!(
            RealtimeEvent::decode(frame, &actor()),
            RealtimeEvent::Degraded { .. }
        ));
    }

    #[test]
    fn test_malformed_envelope_degrades() {
        let frame = json!({ "table": "tasks", "type": "UPSERT", "_event_version": 1 });
        assert!(matches!(
            RealtimeEvent::decode(frame, &actor()),
            RealtimeEvent::Degraded { .. }
        ));
    }
}
