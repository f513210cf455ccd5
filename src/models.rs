//! Data models shared between pipeline stages.
//!
//! This module holds the capture record written by the BLE stage, the
//! advertisement type fed into a capture session, and the JSON interchange
//! documents passed from the spatial and BGP stages to integration.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Bluetooth SIG company identifier for Apple.
pub const APPLE_COMPANY_ID: u16 = 76;

/// Classification label assigned to an advertiser.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DeviceKind {
    AirTag,
    AppleOther,
    AppleUnknown,
    Microsoft,
    Xiaomi,
    Google,
    Samsung,
    Tile,
    Govee,
    GoveeIot,
    WindowsPc,
    Unknown,
    /// A label read from a capture file that this build does not know.
    Other(String),
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DeviceKind::AirTag => "AirTag",
            DeviceKind::AppleOther => "Apple Device (Other)",
            DeviceKind::AppleUnknown => "Apple Device (Unknown)",
            DeviceKind::Microsoft => "Microsoft",
            DeviceKind::Xiaomi => "Xiaomi",
            DeviceKind::Google => "Google",
            DeviceKind::Samsung => "Samsung",
            DeviceKind::Tile => "Tile",
            DeviceKind::Govee => "Govee",
            DeviceKind::GoveeIot => "Govee IoT",
            DeviceKind::WindowsPc => "Windows PC",
            DeviceKind::Unknown => "Unknown BLE",
            DeviceKind::Other(s) => s.as_str(),
        };
        write!(f, "{}", label)
    }
}

impl From<&str> for DeviceKind {
    fn from(s: &str) -> Self {
        match s {
            "AirTag" => DeviceKind::AirTag,
            "Apple Device (Other)" => DeviceKind::AppleOther,
            "Apple Device (Unknown)" => DeviceKind::AppleUnknown,
            "Microsoft" => DeviceKind::Microsoft,
            "Xiaomi" => DeviceKind::Xiaomi,
            "Google" => DeviceKind::Google,
            "Samsung" => DeviceKind::Samsung,
            "Tile" => DeviceKind::Tile,
            "Govee" => DeviceKind::Govee,
            "Govee IoT" => DeviceKind::GoveeIot,
            "Windows PC" => DeviceKind::WindowsPc,
            "Unknown BLE" => DeviceKind::Unknown,
            other => DeviceKind::Other(other.to_string()),
        }
    }
}

impl Serialize for DeviceKind {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DeviceKind {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(DeviceKind::from(s.as_str()))
    }
}

/// One BLE advertisement as delivered by a capture source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Advertisement {
    /// Advertiser address, `AA:BB:CC:DD:EE:FF`.
    pub address: String,
    /// Received signal strength in dBm.
    pub rssi: i16,
    #[serde(default)]
    pub local_name: Option<String>,
    /// Manufacturer-specific data keyed by company identifier.
    #[serde(default)]
    pub manufacturer_data: BTreeMap<u16, Vec<u8>>,
    #[serde(default)]
    pub service_uuids: Vec<String>,
    #[serde(default)]
    pub tx_power: Option<i16>,
}

/// One row of a capture CSV file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureRecord {
    #[serde(with = "timestamp_format")]
    pub timestamp: NaiveDateTime,
    pub mac_address: String,
    pub rssi: i16,
    #[serde(default)]
    pub local_name: String,
    pub device_type: DeviceKind,
    #[serde(default)]
    pub manufacturer_id: Option<u16>,
    #[serde(default)]
    pub manufacturer_data_hex: String,
    #[serde(default)]
    pub service_uuids: String,
    #[serde(default)]
    pub tx_power: Option<i16>,
    #[serde(deserialize_with = "deserialize_flag")]
    pub is_airtag: bool,
    #[serde(default)]
    pub airtag_status_byte: String,
}

/// Last eight characters of a MAC address (`CC:DD:EE` style suffix).
pub fn short_mac(mac: &str) -> &str {
    let start = mac
        .char_indices()
        .rev()
        .nth(7)
        .map(|(i, _)| i)
        .unwrap_or(0);
    &mac[start..]
}

fn deserialize_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    match s.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" | "" => Ok(false),
        other => Err(serde::de::Error::custom(format!(
            "invalid boolean flag '{}'",
            other
        ))),
    }
}

/// Timestamp encoding used in capture files.
pub mod timestamp_format {
    use chrono::{DateTime, NaiveDateTime};
    use serde::{Deserialize, Deserializer, Serializer};

    /// Format written by the capture stage.
    pub const WRITE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

    const READ_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

    pub fn serialize<S: Serializer>(ts: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&ts.format(WRITE_FORMAT))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<NaiveDateTime, D::Error> {
        let s = String::deserialize(deserializer)?;
        parse(&s).ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp '{}'", s)))
    }

    /// Parse any of the accepted timestamp spellings.
    pub fn parse(s: &str) -> Option<NaiveDateTime> {
        let s = s.trim();
        for fmt in READ_FORMATS {
            if let Ok(ts) = NaiveDateTime::parse_from_str(s, fmt) {
                return Some(ts);
            }
        }
        DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.naive_local())
    }
}

/// 2-D position in metres.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance_to(&self, other: &Position) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

/// Per-device RSSI statistics in the spatial summary.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RssiStatistics {
    pub mean: f64,
    pub std: f64,
    #[serde(default)]
    pub min: f64,
    #[serde(default)]
    pub max: f64,
}

/// Capture totals in the spatial summary.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CaptureTotals {
    pub total_packets: usize,
    pub n_devices: usize,
    pub duration_hours: f64,
}

/// Spatial stage output (`spatial_analysis_summary.json`), read by integration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SpatialSummary {
    pub capture_summary: CaptureTotals,
    #[serde(default)]
    pub device_positions: BTreeMap<String, Position>,
    #[serde(default)]
    pub rssi_baselines: BTreeMap<String, f64>,
    pub rssi_statistics: BTreeMap<String, RssiStatistics>,
    #[serde(default)]
    pub movement_events: BTreeMap<String, usize>,
}

/// Centrality metrics for one AS.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CentralityRow {
    #[serde(rename = "ASN")]
    pub asn: u32,
    #[serde(rename = "Degree_Centrality")]
    pub degree: f64,
    #[serde(rename = "Betweenness_Centrality")]
    pub betweenness: f64,
    #[serde(rename = "PageRank", default)]
    pub pagerank: f64,
}

/// Impact of removing one AS from the topology.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RemovalImpact {
    pub asn: u32,
    pub components_created: i64,
    pub connectivity_loss: f64,
    pub nodes_isolated: usize,
}

/// Run metadata in the BGP results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BgpMetadata {
    pub target_country: String,
    #[serde(default)]
    pub analysis_date: Option<chrono::DateTime<chrono::Utc>>,
    pub total_asns: usize,
    pub graph_nodes: usize,
    pub graph_edges: usize,
}

/// BGP stage output (`bgp_analysis_results.json`), read by integration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BgpResults {
    pub metadata: BgpMetadata,
    pub top_critical_ases: Vec<CentralityRow>,
    pub spof_count: usize,
    #[serde(default)]
    pub spofs: Vec<u32>,
    #[serde(default)]
    pub removal_impacts: Vec<RemovalImpact>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_kind_round_trips_labels() {
        for label in ["AirTag", "Apple Device (Other)", "Govee IoT", "Unknown BLE"] {
            assert_eq!(DeviceKind::from(label).to_string(), label);
        }
        assert_eq!(
            DeviceKind::from("Fitbit"),
            DeviceKind::Other("Fitbit".to_string())
        );
    }

    #[test]
    fn test_short_mac() {
        assert_eq!(short_mac("AA:BB:CC:DD:EE:FF"), "DD:EE:FF");
        assert_eq!(short_mac("device_01"), "evice_01");
        assert_eq!(short_mac("abc"), "abc");
    }

    #[test]
    fn test_timestamp_parse_variants() {
        assert!(timestamp_format::parse("2024-03-01T10:00:00.123456").is_some());
        assert!(timestamp_format::parse("2024-03-01T10:00:00").is_some());
        assert!(timestamp_format::parse("2024-03-01 10:00:00.5").is_some());
        assert!(timestamp_format::parse("2024-03-01T10:00:00+00:00").is_some());
        assert!(timestamp_format::parse("yesterday").is_none());
    }

    #[test]
    fn test_capture_record_reads_python_style_row() {
        let data = "timestamp,mac_address,rssi,local_name,device_type,manufacturer_id,manufacturer_data_hex,service_uuids,tx_power,is_airtag,airtag_status_byte\n\
                    2024-03-01T10:00:00.000001,AA:BB:CC:DD:EE:01,-61,,AirTag,76,12190000,,,True,0x12\n\
                    2024-03-01T10:00:01.000001,11:22:33:44:55:66,-80,Govee_H5075,Govee IoT,,,,,False,\n";
        let mut reader = csv::Reader::from_reader(data.as_bytes());
        let rows: Vec<CaptureRecord> = reader.deserialize().collect::<Result<_, _>>().unwrap();

        assert_eq!(rows.len(), 2);
        assert!(rows[0].is_airtag);
        assert_eq!(rows[0].manufacturer_id, Some(76));
        assert_eq!(rows[0].device_type, DeviceKind::AirTag);
        assert!(!rows[1].is_airtag);
        assert_eq!(rows[1].manufacturer_id, None);
        assert_eq!(rows[1].tx_power, None);
    }

    #[test]
    fn test_bgp_results_uses_original_keys() {
        let row = CentralityRow {
            asn: 3356,
            degree: 0.3,
            betweenness: 0.12,
            pagerank: 0.05,
        };
        let json = serde_json::to_string(&row).unwrap();
        assert!(json.contains("\"ASN\":3356"));
        assert!(json.contains("Betweenness_Centrality"));
    }
}
