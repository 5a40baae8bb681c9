//! Stats normalization.
//!
//! Turns a raw [`StatsReport`] into [`CategorizedStats`]: records grouped by
//! declared type, RTP records split further into audio and video. Pure and
//! total. A report with no records yields empty buckets, never an error.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{Map, Value};

use super::report::{StatRecord, StatsReport};

/// Stat types that always get a bucket, even when the report has none.
pub const STAT_TYPES: [&str; 14] = [
    "inbound-rtp",
    "outbound-rtp",
    "remote-inbound-rtp",
    "remote-outbound-rtp",
    "media-source",
    "candidate-pair",
    "local-candidate",
    "remote-candidate",
    "transport",
    "codec",
    "data-channel",
    "peer-connection",
    "stream",
    "track",
];

/// Records grouped by declared stat type.
pub type GroupedStats = BTreeMap<String, Vec<StatRecord>>;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DirectionalStats {
    pub inbound: Vec<StatRecord>,
    pub outbound: Vec<StatRecord>,
}

/// Structured view over one stats report.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategorizedStats {
    pub audio: DirectionalStats,
    pub video: DirectionalStats,
    /// Remote-reported RTP (`remote-inbound-rtp` / `remote-outbound-rtp`).
    pub remote: DirectionalStats,
    pub candidate_pair: Vec<StatRecord>,
    pub local_candidate: Vec<StatRecord>,
    pub remote_candidate: Vec<StatRecord>,
    pub transport: Vec<StatRecord>,
    pub codec: Vec<StatRecord>,
    pub data_channel: Vec<StatRecord>,
    pub media_sources: Vec<StatRecord>,
    pub peer_connection: Vec<StatRecord>,
    pub tracks: Vec<StatRecord>,
    /// Every record grouped by type, unknown types included.
    pub raw: GroupedStats,
}

/// Groups every record of `report` by its declared type.
///
/// All [`STAT_TYPES`] are present in the result. Records of a type outside
/// that list get a bucket of their own instead of being dropped.
pub fn group_by_type(report: &StatsReport) -> GroupedStats {
    let mut grouped: GroupedStats = STAT_TYPES
        .iter()
        .map(|t| (t.to_string(), Vec::new()))
        .collect();

    for record in report.records() {
        grouped
            .entry(record.stat_type.clone())
            .or_default()
            .push(record.clone());
    }

    grouped
}

/// Flattens `report` into a plain `id -> record` JSON object.
pub fn report_to_object(report: &StatsReport) -> Map<String, Value> {
    report
        .iter()
        .map(|(id, record)| (id.to_string(), record.to_object()))
        .collect()
}

/// Builds the categorized view of `report`.
pub fn normalize(report: &StatsReport) -> CategorizedStats {
    let raw = group_by_type(report);

    let bucket = |stat_type: &str| raw.get(stat_type).cloned().unwrap_or_default();
    let by_media = |stat_type: &str, media: &str| -> Vec<StatRecord> {
        raw.get(stat_type)
            .map(|records| {
                records
                    .iter()
                    .filter(|r| r.is_media(media))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    };

    CategorizedStats {
        audio: DirectionalStats {
            inbound: by_media("inbound-rtp", "audio"),
            outbound: by_media("outbound-rtp", "audio"),
        },
        video: DirectionalStats {
            inbound: by_media("inbound-rtp", "video"),
            outbound: by_media("outbound-rtp", "video"),
        },
        remote: DirectionalStats {
            inbound: bucket("remote-inbound-rtp"),
            outbound: bucket("remote-outbound-rtp"),
        },
        candidate_pair: bucket("candidate-pair"),
        local_candidate: bucket("local-candidate"),
        remote_candidate: bucket("remote-candidate"),
        transport: bucket("transport"),
        codec: bucket("codec"),
        data_channel: bucket("data-channel"),
        media_sources: bucket("media-source"),
        peer_connection: bucket("peer-connection"),
        tracks: bucket("track"),
        raw,
    }
}
