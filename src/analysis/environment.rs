//! Dataset summary, signal pollution and per-device statistics.

use super::dataset::{group_by_mac, Dataset};
use crate::models::{short_mac, timestamp_format, CaptureRecord};
use crate::stats::{mean, round_to, sample_std};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::warn;

/// Packet count for one device type.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TypeCount {
    pub device_type: String,
    pub packets: usize,
}

/// Overview of a capture file.
#[derive(Debug, Clone, Serialize)]
pub struct DatasetSummary {
    pub total_packets: usize,
    pub unique_macs: usize,
    pub first_timestamp: String,
    pub last_timestamp: String,
    pub duration_hours: f64,
    pub device_types: Vec<TypeCount>,
    pub airtag_macs: usize,
    pub airtag_packets: usize,
    pub airtag_percent: f64,
}

/// Signal pollution statistics for one device type.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PollutionRow {
    pub device_type: String,
    pub unique_devices: usize,
    pub avg_rssi: f64,
    pub rssi_std: Option<f64>,
    pub total_packets: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct PollutionReport {
    pub rows: Vec<PollutionRow>,
    pub target_packets: usize,
    pub noise_packets: usize,
    /// AirTag packets per non-AirTag packet; `None` when there is no noise.
    pub signal_to_noise: Option<f64>,
}

/// Timing and signal profile of one AirTag MAC.
#[derive(Debug, Clone, Serialize)]
pub struct AirTagSignature {
    pub mac: String,
    pub packets: usize,
    pub rssi_mean: f64,
    pub rssi_std: Option<f64>,
    pub interval_mean_s: Option<f64>,
    pub interval_max_s: Option<f64>,
    /// Gaps longer than the rotation threshold, in minutes.
    pub rotation_gaps_minutes: Vec<f64>,
    pub status_bytes: BTreeMap<String, usize>,
}

/// One row of the device signature table.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceRow {
    pub mac_short: String,
    pub device_type: String,
    pub is_target: bool,
    pub packets: usize,
    pub rssi_mean: f64,
    pub rssi_std: Option<f64>,
    pub interval_mean_s: Option<f64>,
    pub duration_hours: f64,
}

/// Packet counts per device type over equal-width time bins.
#[derive(Debug, Clone, Serialize)]
pub struct ActivityBins {
    /// `bins + 1` edges in elapsed hours.
    pub edges: Vec<f64>,
    pub counts: BTreeMap<String, Vec<usize>>,
}

/// Headline numbers for a capture.
#[derive(Debug, Clone, Serialize)]
pub struct KeyMetrics {
    pub duration_hours: f64,
    pub target_devices: usize,
    pub total_packets: usize,
    pub target_packets: usize,
    pub target_percent: f64,
    pub noise_devices: usize,
    pub signal_to_noise: Option<f64>,
}

fn airtag_macs(records: &[CaptureRecord]) -> HashSet<&str> {
    records
        .iter()
        .filter(|r| r.is_airtag)
        .map(|r| r.mac_address.as_str())
        .collect()
}

fn percent(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        100.0 * part as f64 / whole as f64
    }
}

fn signal_to_noise(target: usize, total: usize) -> Option<f64> {
    let noise = total - target;
    if noise == 0 {
        None
    } else {
        Some(target as f64 / noise as f64)
    }
}

pub fn summarize(dataset: &Dataset) -> DatasetSummary {
    let mut by_type: HashMap<String, usize> = HashMap::new();
    for record in &dataset.records {
        *by_type.entry(record.device_type.to_string()).or_insert(0) += 1;
    }
    let mut device_types: Vec<TypeCount> = by_type
        .into_iter()
        .map(|(device_type, packets)| TypeCount {
            device_type,
            packets,
        })
        .collect();
    device_types.sort_by(|a, b| {
        b.packets
            .cmp(&a.packets)
            .then_with(|| a.device_type.cmp(&b.device_type))
    });

    let airtag_packets = dataset.records.iter().filter(|r| r.is_airtag).count();

    DatasetSummary {
        total_packets: dataset.len(),
        unique_macs: dataset.unique_macs(),
        first_timestamp: dataset
            .start()
            .format(timestamp_format::WRITE_FORMAT)
            .to_string(),
        last_timestamp: dataset
            .end()
            .format(timestamp_format::WRITE_FORMAT)
            .to_string(),
        duration_hours: dataset.duration_hours(),
        device_types,
        airtag_macs: airtag_macs(&dataset.records).len(),
        airtag_packets,
        airtag_percent: percent(airtag_packets, dataset.len()),
    }
}

/// Per-type pollution statistics, sorted by packet count.
pub fn environment_pollution(dataset: &Dataset) -> PollutionReport {
    let mut by_type: BTreeMap<String, (HashSet<&str>, Vec<f64>)> = BTreeMap::new();
    for record in &dataset.records {
        let entry = by_type.entry(record.device_type.to_string()).or_default();
        entry.0.insert(record.mac_address.as_str());
        entry.1.push(record.rssi as f64);
    }

    let mut rows: Vec<PollutionRow> = by_type
        .into_iter()
        .map(|(device_type, (macs, rssi))| PollutionRow {
            device_type,
            unique_devices: macs.len(),
            avg_rssi: round_to(mean(&rssi).unwrap_or(0.0), 2),
            rssi_std: sample_std(&rssi).map(|s| round_to(s, 2)),
            total_packets: rssi.len(),
        })
        .collect();
    rows.sort_by(|a, b| b.total_packets.cmp(&a.total_packets));

    let target_packets = dataset.records.iter().filter(|r| r.is_airtag).count();

    PollutionReport {
        rows,
        target_packets,
        noise_packets: dataset.len() - target_packets,
        signal_to_noise: signal_to_noise(target_packets, dataset.len()),
    }
}

/// Signature of every AirTag MAC, in order of first appearance.
pub fn airtag_signatures(dataset: &Dataset, rotation_gap_minutes: f64) -> Vec<AirTagSignature> {
    let airtags = dataset.airtag_records();
    if airtags.is_empty() {
        warn!("No AirTag packets detected; check device placement and re-run capture");
        return Vec::new();
    }

    let gap_seconds = rotation_gap_minutes * 60.0;
    group_by_mac(airtags)
        .into_iter()
        .map(|group| {
            let rssi = group.rssi();
            let intervals = group.intervals();

            let mut status_bytes = BTreeMap::new();
            for packet in &group.packets {
                if !packet.airtag_status_byte.is_empty() {
                    *status_bytes
                        .entry(packet.airtag_status_byte.clone())
                        .or_insert(0) += 1;
                }
            }

            AirTagSignature {
                mac: group.mac.to_string(),
                packets: group.packets.len(),
                rssi_mean: mean(&rssi).unwrap_or(0.0),
                rssi_std: sample_std(&rssi),
                interval_mean_s: mean(&intervals),
                interval_max_s: intervals.iter().cloned().reduce(f64::max),
                rotation_gaps_minutes: intervals
                    .iter()
                    .filter(|&&s| s > gap_seconds)
                    .map(|s| s / 60.0)
                    .collect(),
                status_bytes,
            }
        })
        .collect()
}

/// Per-MAC signature table, sorted by packet count.
pub fn device_table(dataset: &Dataset) -> Vec<DeviceRow> {
    let mut rows: Vec<DeviceRow> = group_by_mac(&dataset.records)
        .into_iter()
        .map(|group| {
            let rssi = group.rssi();
            let first = group.packets[0];
            let duration = group
                .packets
                .iter()
                .map(|p| dataset.elapsed_hours(p))
                .fold(0.0, f64::max);

            DeviceRow {
                mac_short: short_mac(group.mac).to_string(),
                device_type: first.device_type.to_string(),
                is_target: first.is_airtag,
                packets: group.packets.len(),
                rssi_mean: mean(&rssi).unwrap_or(0.0),
                rssi_std: sample_std(&rssi),
                interval_mean_s: mean(&group.intervals()),
                duration_hours: duration,
            }
        })
        .collect();
    rows.sort_by(|a, b| b.packets.cmp(&a.packets));
    rows
}

/// Histogram of packets per device type over elapsed time.
pub fn activity_bins(dataset: &Dataset, bins: usize) -> ActivityBins {
    let bins = bins.max(1);
    let max_hours = dataset.duration_hours();
    let width = max_hours / bins as f64;
    let edges = (0..=bins).map(|i| i as f64 * width).collect();

    let mut counts: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for record in &dataset.records {
        let hours = dataset.elapsed_hours(record);
        let idx = if width > 0.0 {
            ((hours / width) as usize).min(bins - 1)
        } else {
            0
        };
        counts
            .entry(record.device_type.to_string())
            .or_insert_with(|| vec![0; bins])[idx] += 1;
    }

    ActivityBins { edges, counts }
}

pub fn key_metrics(dataset: &Dataset) -> KeyMetrics {
    let target_devices = airtag_macs(&dataset.records).len();
    let target_packets = dataset.records.iter().filter(|r| r.is_airtag).count();

    KeyMetrics {
        duration_hours: dataset.duration_hours(),
        target_devices,
        total_packets: dataset.len(),
        target_packets,
        target_percent: percent(target_packets, dataset.len()),
        noise_devices: dataset.unique_macs() - target_devices,
        signal_to_noise: signal_to_noise(target_packets, dataset.len()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DeviceKind;
    use chrono::Duration;

    fn record(mac: &str, kind: DeviceKind, rssi: i16, secs: i64) -> CaptureRecord {
        let base = timestamp_format::parse("2024-03-01T10:00:00").unwrap();
        let is_airtag = kind == DeviceKind::AirTag;
        CaptureRecord {
            timestamp: base + Duration::seconds(secs),
            mac_address: mac.to_string(),
            rssi,
            local_name: String::new(),
            device_type: kind,
            manufacturer_id: None,
            manufacturer_data_hex: String::new(),
            service_uuids: String::new(),
            tx_power: None,
            is_airtag,
            airtag_status_byte: if is_airtag { "0x12".to_string() } else { String::new() },
        }
    }

    fn sample() -> Dataset {
        let mut records = Vec::new();
        for i in 0..4 {
            records.push(record("AA:00:00:00:00:01", DeviceKind::AirTag, -60 - i as i16, i * 2));
        }
        // 20 minute gap
        records.push(record("AA:00:00:00:00:01", DeviceKind::AirTag, -61, 6 + 1200));
        records.push(record("CC:00:00:00:00:03", DeviceKind::Microsoft, -75, 10));
        records.push(record("CC:00:00:00:00:03", DeviceKind::Microsoft, -77, 20));
        records.push(record("DD:00:00:00:00:04", DeviceKind::Govee, -90, 3600));
        Dataset::from_records(records).unwrap()
    }

    #[test]
    fn test_summary_counts() {
        let summary = summarize(&sample());
        assert_eq!(summary.total_packets, 8);
        assert_eq!(summary.unique_macs, 3);
        assert_eq!(summary.airtag_macs, 1);
        assert_eq!(summary.airtag_packets, 5);
        assert_eq!(summary.device_types[0].device_type, "AirTag");
        assert!((summary.airtag_percent - 62.5).abs() < 1e-9);
    }

    #[test]
    fn test_pollution_sorted_and_snr() {
        let report = environment_pollution(&sample());
        assert_eq!(report.rows[0].device_type, "AirTag");
        assert_eq!(report.rows[1].device_type, "Microsoft");
        assert_eq!(report.rows[1].avg_rssi, -76.0);
        assert_eq!(report.rows[1].rssi_std, Some(1.41));
        assert_eq!(report.rows[2].rssi_std, None);
        assert_eq!(report.signal_to_noise, Some(5.0 / 3.0));
    }

    #[test]
    fn test_snr_without_noise_is_none() {
        let ds = Dataset::from_records(vec![record("A", DeviceKind::AirTag, -60, 0)]).unwrap();
        assert_eq!(environment_pollution(&ds).signal_to_noise, None);
        assert_eq!(key_metrics(&ds).signal_to_noise, None);
    }

    #[test]
    fn test_signature_detects_rotation_gap() {
        let sigs = airtag_signatures(&sample(), 15.0);
        assert_eq!(sigs.len(), 1);
        let sig = &sigs[0];
        assert_eq!(sig.packets, 5);
        assert_eq!(sig.rotation_gaps_minutes, vec![20.0]);
        assert_eq!(sig.interval_max_s, Some(1200.0));
        assert_eq!(sig.status_bytes.get("0x12"), Some(&5));
    }

    #[test]
    fn test_device_table_sorted_by_packets() {
        let table = device_table(&sample());
        assert_eq!(table.len(), 3);
        assert_eq!(table[0].mac_short, "00:00:01");
        assert!(table[0].is_target);
        assert_eq!(table[2].interval_mean_s, None);
        assert!((table[2].duration_hours - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_activity_bins_cover_all_packets() {
        let ds = sample();
        let bins = activity_bins(&ds, 10);
        assert_eq!(bins.edges.len(), 11);
        let total: usize = bins.counts.values().flatten().sum();
        assert_eq!(total, ds.len());
        assert_eq!(bins.counts["Govee"][9], 1);
    }

    #[test]
    fn test_key_metrics() {
        let m = key_metrics(&sample());
        assert_eq!(m.target_devices, 1);
        assert_eq!(m.noise_devices, 2);
        assert_eq!(m.target_packets, 5);
    }
}
