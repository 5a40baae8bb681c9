//! Raw statistics report model.
//!
//! A report is an association from record identifier to record. Every record
//! declares its `type`; RTP records additionally carry `kind` or `mediaType`.
//! All other fields are kept verbatim as JSON values so that nothing the
//! media stack reports is lost on the way to the collector.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// One named statistic record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatRecord {
    /// Identifier of the record inside its report.
    #[serde(default)]
    pub id: String,

    /// Declared stat type, e.g. `inbound-rtp` or `candidate-pair`.
    #[serde(rename = "type")]
    pub stat_type: String,

    /// Every other field of the record.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl StatRecord {
    pub fn new(id: impl Into<String>, stat_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            stat_type: stat_type.into(),
            fields: Map::new(),
        }
    }

    /// Adds a field, builder style.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Media kind of an RTP record (`audio` / `video`).
    pub fn kind(&self) -> Option<&str> {
        self.fields.get("kind").and_then(Value::as_str)
    }

    /// Legacy spelling of [`kind`](Self::kind) still emitted by some stacks.
    pub fn media_type(&self) -> Option<&str> {
        self.fields.get("mediaType").and_then(Value::as_str)
    }

    /// True when either `kind` or `mediaType` names `media`.
    pub fn is_media(&self, media: &str) -> bool {
        self.kind() == Some(media) || self.media_type() == Some(media)
    }

    /// Plain JSON object view including `id` and `type`.
    pub fn to_object(&self) -> Value {
        let mut object = self.fields.clone();
        object.insert("id".to_string(), Value::String(self.id.clone()));
        object.insert("type".to_string(), Value::String(self.stat_type.clone()));
        Value::Object(object)
    }
}

/// Point-in-time snapshot of a connection's statistics, keyed by record id.
///
/// Iteration follows record id order. When deserialized, a record without
/// an `id` of its own takes its map key.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct StatsReport {
    records: BTreeMap<String, StatRecord>,
}

impl StatsReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a record under its own id, replacing any previous record with that id.
    pub fn insert(&mut self, record: StatRecord) -> Option<StatRecord> {
        self.records.insert(record.id.clone(), record)
    }

    pub fn get(&self, id: &str) -> Option<&StatRecord> {
        self.records.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &StatRecord)> {
        self.records.iter().map(|(id, record)| (id.as_str(), record))
    }

    pub fn records(&self) -> impl Iterator<Item = &StatRecord> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl<'de> Deserialize<'de> for StatsReport {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let mut records = BTreeMap::<String, StatRecord>::deserialize(deserializer)?;
        for (key, record) in records.iter_mut() {
            if record.id.is_empty() {
                record.id.clone_from(key);
            }
        }
        Ok(Self { records })
    }
}

impl FromIterator<StatRecord> for StatsReport {
    fn from_iter<I: IntoIterator<Item = StatRecord>>(iter: I) -> Self {
        let mut report = StatsReport::new();
        for record in iter {
            report.insert(record);
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_record_media_detection() {
        let by_kind = StatRecord::new("a", "inbound-rtp").with_field("kind", "audio");
        let by_media_type = StatRecord::new("b", "inbound-rtp").with_field("mediaType", "video");
        let neither = StatRecord::new("c", "inbound-rtp");

        assert!(by_kind.is_media("audio"));
        assert!(!by_kind.is_media("video"));
        assert!(by_media_type.is_media("video"));
        assert!(!neither.is_media("audio"));
        assert!(!neither.is_media("video"));
    }

    #[test]
    fn test_record_deserializes_extra_fields() {
        let record: StatRecord = serde_json::from_value(json!({
            "id": "RTCInboundRTPAudioStream_1",
            "type": "inbound-rtp",
            "kind": "audio",
            "jitter": 0.012,
            "packetsLost": 3
        }))
        .unwrap();

        assert_eq!(record.stat_type, "inbound-rtp");
        assert_eq!(record.kind(), Some("audio"));
        assert_eq!(record.get("packetsLost"), Some(&json!(3)));
    }

    #[test]
    fn test_report_keyed_by_record_id() {
        let report: StatsReport = vec![
            StatRecord::new("T01", "transport"),
            StatRecord::new("CP1", "candidate-pair"),
            StatRecord::new("T01", "transport").with_field("bytesSent", 10),
        ]
        .into_iter()
        .collect();

        assert_eq!(report.len(), 2);
        assert_eq!(report.get("T01").unwrap().get("bytesSent"), Some(&json!(10)));
        let ids: Vec<&str> = report.iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec!["CP1", "T01"]);
    }

    #[test]
    fn test_report_fills_missing_ids_from_keys() {
        let report: StatsReport = serde_json::from_value(json!({
            "T01": { "type": "transport", "bytesSent": 10 },
            "CP1": { "id": "CP1", "type": "candidate-pair" }
        }))
        .unwrap();

        assert_eq!(report.get("T01").unwrap().id, "T01");
        assert_eq!(report.get("CP1").unwrap().id, "CP1");
        assert_eq!(
            crate::core::stats::report_to_object(&report)["T01"]["id"],
            json!("T01")
        );
    }

    #[test]
    fn test_to_object_includes_identity() {
        let record = StatRecord::new("C1", "codec").with_field("mimeType", "audio/opus");
        assert_eq!(
            record.to_object(),
            json!({ "id": "C1", "type": "codec", "mimeType": "audio/opus" })
        );
    }
}
