//! Event taxonomy and the delivery envelope.
//!
//! Every event serializes to a flat JSON object:
//!
//! ```json
//! { "event": "stats", "tag": "stats", "peerId": "peer-1", "peerName": "Alice",
//!   "timestamp": "2024-05-01T10:00:00Z", "data": { ... } }
//! ```

use std::{error::Error as StdError, fmt, sync::Arc};

use serde::Serialize;
use serde_json::{Map, Value};
use time::OffsetDateTime;

use super::stats::{CategorizedStats, StateKind, StatsError, StatsReport};

/// Coarse classification for downstream filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventTag {
    Stats,
    Connection,
    Peer,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StateData {
    pub state: String,
}

/// Message and trace of a failure carried by an `error` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorInfo {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl ErrorInfo {
    /// Renders `err` and its source chain.
    pub fn from_error(err: &(dyn StdError + 'static)) -> Self {
        let mut chain = Vec::new();
        let mut source = err.source();
        while let Some(cause) = source {
            chain.push(cause.to_string());
            source = cause.source();
        }

        Self {
            message: err.to_string(),
            stack: (!chain.is_empty()).then(|| chain.join("\ncaused by: ")),
        }
    }
}

impl From<&StatsError> for ErrorInfo {
    fn from(err: &StatsError) -> Self {
        let mut info = ErrorInfo::from_error(err);
        if let Some(detail) = err.detail() {
            info.stack = Some(detail.to_string());
        }
        info
    }
}

/// Kind-specific part of an [`Event`].
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum EventPayload {
    Stats {
        data: CategorizedStats,
        #[serde(skip_serializing_if = "Option::is_none")]
        raw_stats: Option<StatsReport>,
        #[serde(skip_serializing_if = "Option::is_none")]
        stats_object: Option<Map<String, Value>>,
    },
    ConnectionStateChange {
        data: StateData,
    },
    IceConnectionStateChange {
        data: StateData,
    },
    IceGatheringStateChange {
        data: StateData,
    },
    SignalingStateChange {
        data: StateData,
    },
    Error {
        error: ErrorInfo,
    },
    AddPeer,
    RemovePeer,
}

impl EventPayload {
    /// Change notification for one lifecycle property.
    pub fn state_change(kind: StateKind, state: impl Into<String>) -> Self {
        let data = StateData {
            state: state.into(),
        };
        match kind {
            StateKind::IceConnection => EventPayload::IceConnectionStateChange { data },
            StateKind::Connection => EventPayload::ConnectionStateChange { data },
            StateKind::IceGathering => EventPayload::IceGatheringStateChange { data },
            StateKind::Signaling => EventPayload::SignalingStateChange { data },
        }
    }

    /// Event kind name, as published on the local bus.
    pub fn name(&self) -> &'static str {
        match self {
            EventPayload::Stats { .. } => "stats",
            EventPayload::ConnectionStateChange { .. } => "connectionStateChange",
            EventPayload::IceConnectionStateChange { .. } => "iceConnectionStateChange",
            EventPayload::IceGatheringStateChange { .. } => "iceGatheringStateChange",
            EventPayload::SignalingStateChange { .. } => "signalingStateChange",
            EventPayload::Error { .. } => "error",
            EventPayload::AddPeer => "addPeer",
            EventPayload::RemovePeer => "removePeer",
        }
    }

    /// Poll errors are tagged `stats`, like the poll results they replace.
    pub fn tag(&self) -> EventTag {
        match self {
            EventPayload::Stats { .. } | EventPayload::Error { .. } => EventTag::Stats,
            EventPayload::AddPeer | EventPayload::RemovePeer => EventTag::Peer,
            _ => EventTag::Connection,
        }
    }
}

/// One observation about one peer. Immutable once created.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub tag: EventTag,
    pub peer_id: String,
    pub peer_name: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl Event {
    /// Stamps `payload` with the current time.
    pub fn new(peer_id: impl Into<String>, peer_name: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            tag: payload.tag(),
            peer_id: peer_id.into(),
            peer_name: peer_name.into(),
            timestamp: OffsetDateTime::now_utc(),
            payload,
        }
    }

    pub fn name(&self) -> &'static str {
        self.payload.name()
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.peer_id)
    }
}

/// The unit of delivery: a batch of events plus session metadata.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub session_id: String,
    pub session_name: String,
    #[serde(with = "time::serde::rfc3339")]
    pub exported_at: OffsetDateTime,
    pub count: usize,
    pub items: Vec<Arc<Event>>,
}

impl Envelope {
    pub fn new(session_id: impl Into<String>, session_name: impl Into<String>, items: Vec<Arc<Event>>) -> Self {
        Self {
            session_id: session_id.into(),
            session_name: session_name.into(),
            exported_at: OffsetDateTime::now_utc(),
            count: items.len(),
            items,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::core::stats::{normalize, StatRecord};

    #[test]
    fn test_state_change_serialization() {
        let event = Event::new(
            "peer-1",
            "Alice",
            EventPayload::state_change(StateKind::IceConnection, "checking"),
        );
        let value = serde_json::to_value(&event).unwrap();

        assert_eq!(value["event"], json!("iceConnectionStateChange"));
        assert_eq!(value["tag"], json!("connection"));
        assert_eq!(value["peerId"], json!("peer-1"));
        assert_eq!(value["peerName"], json!("Alice"));
        assert_eq!(value["data"], json!({ "state": "checking" }));
        assert!(value["timestamp"].as_str().unwrap().contains('T'));
    }

    #[test]
    fn test_stats_attachments_are_optional() {
        let report: StatsReport = std::iter::once(StatRecord::new("T", "transport")).collect();

        let bare = Event::new(
            "p",
            "",
            EventPayload::Stats {
                data: normalize(&report),
                raw_stats: None,
                stats_object: None,
            },
        );
        let value = serde_json::to_value(&bare).unwrap();
        assert_eq!(value["event"], json!("stats"));
        assert_eq!(value["tag"], json!("stats"));
        assert!(value.get("rawStats").is_none());
        assert!(value.get("statsObject").is_none());

        let full = Event::new(
            "p",
            "",
            EventPayload::Stats {
                data: normalize(&report),
                raw_stats: Some(report.clone()),
                stats_object: Some(crate::core::stats::report_to_object(&report)),
            },
        );
        let value = serde_json::to_value(&full).unwrap();
        assert_eq!(value["rawStats"]["T"]["type"], json!("transport"));
        assert_eq!(value["statsObject"]["T"]["id"], json!("T"));
    }

    #[test]
    fn test_tags() {
        assert_eq!(EventPayload::AddPeer.tag(), EventTag::Peer);
        assert_eq!(EventPayload::RemovePeer.tag(), EventTag::Peer);
        let error = EventPayload::Error {
            error: ErrorInfo::from(&StatsError::Other("boom".into())),
        };
        assert_eq!(error.tag(), EventTag::Stats);
        assert_eq!(error.name(), "error");
    }

    #[test]
    fn test_error_info_from_stats_error() {
        let err = StatsError::RequestFailed {
            reason: "closed".into(),
            detail: Some("at getStats".into()),
        };
        let info = ErrorInfo::from(&err);

        assert_eq!(info.message, "Stats request failed: closed");
        assert_eq!(info.stack.as_deref(), Some("at getStats"));
    }

    #[test]
    fn test_envelope_shape() {
        let items = vec![Arc::new(Event::new("p", "n", EventPayload::AddPeer))];
        let value = serde_json::to_value(Envelope::new("s-1", "call", items)).unwrap();

        assert_eq!(value["sessionId"], json!("s-1"));
        assert_eq!(value["sessionName"], json!("call"));
        assert_eq!(value["count"], json!(1));
        assert_eq!(value["items"][0]["event"], json!("addPeer"));
        assert!(value["exportedAt"].is_string());
    }
}
