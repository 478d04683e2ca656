//! Event types delivered to subscribers.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One event decoded from a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEvent<T> {
    /// Zero-based position of this event within its subscription.
    pub sequence: u64,
    /// Deserialized `data:` payload.
    pub payload: T,
}

impl<T> StreamEvent<T> {
    /// Consume the event, keeping only its payload.
    pub fn into_payload(self) -> T {
        self.payload
    }
}

/// Envelope emitted by the job progress endpoints.
///
/// The wire shape is `{"type": "state" | "feed", "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEvent {
    /// Job status snapshot
    State {
        /// Snapshot body
        data: JobState,
    },
    /// Human-readable progress line
    Feed {
        /// Feed entry body
        data: FeedEntry,
    },
    /// Any other event type
    #[serde(other)]
    Unknown,
}

impl JobEvent {
    /// Returns the status when this is a state event.
    pub fn status(&self) -> Option<&str> {
        match self {
            Self::State { data } => data.status.as_deref(),
            _ => None,
        }
    }
}

/// Status snapshot of a long-running job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobState {
    /// Lifecycle status as reported by the backend (e.g. `running`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Remaining fields, passed through untouched
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A line of the job's activity feed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedEntry {
    /// Message text
    #[serde(default)]
    pub message: String,
    /// Remaining fields, passed through untouched
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn feed_event_deserializes() {
        let ev: JobEvent =
            serde_json::from_str(r#"{"type":"feed","data":{"message":"hi"}}"#).unwrap();
        assert_eq!(
            ev,
            JobEvent::Feed {
                data: FeedEntry {
                    message: "hi".into(),
                    extra: Map::new(),
                }
            }
        );
    }

    #[test]
    fn state_event_keeps_extra_fields() {
        let ev: JobEvent = serde_json::from_value(json!({
            "type": "state",
            "data": {"status": "running", "pages_crawled": 12}
        }))
        .unwrap();
        assert_eq!(ev.status(), Some("running"));
        match ev {
            JobEvent::State { data } => assert_eq!(data.extra["pages_crawled"], json!(12)),
            other => panic!("expected state event, got {other:?}"),
        }
    }

    #[test]
    fn unknown_type_maps_to_unknown() {
        let ev: JobEvent = serde_json::from_value(json!({"type": "usage", "data": {"credits": 3}}))
            .unwrap();
        assert_eq!(ev, JobEvent::Unknown);
        assert_eq!(ev.status(), None);
    }
}
