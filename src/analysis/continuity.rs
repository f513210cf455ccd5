//! Device continuity across MAC rotation.
//!
//! Rotations are inferred from long gaps, and MACs are grouped into logical
//! devices by DBSCAN over their RSSI fingerprints. Each logical device then
//! gets a variance breakdown and positioning error bounds.

use super::dataset::{group_by_mac, seconds_between, MacGroup};
use crate::config::AnalysisConfig;
use crate::models::{timestamp_format, CaptureRecord};
use crate::spatial::path_loss::PathLossModel;
use crate::stats::{centered_rolling, mean, median, sample_std};
use chrono::NaiveDateTime;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use tracing::{debug, info};

/// DBSCAN label for points that belong to no cluster.
pub const NOISE: i32 = -1;

/// A suspected MAC rotation.
#[derive(Debug, Clone, Serialize)]
pub struct RotationEvent {
    pub mac: String,
    /// Timestamp of the first packet after the gap.
    #[serde(with = "timestamp_format")]
    pub rotation_time: NaiveDateTime,
    pub gap_duration_hours: f64,
    pub packets_before: usize,
    pub packets_after: usize,
}

/// RSSI fingerprint of one MAC and its cluster label.
#[derive(Debug, Clone, Serialize)]
pub struct MacFingerprint {
    pub mac: String,
    pub rssi_mean: f64,
    pub rssi_std: f64,
    pub rssi_median: f64,
    pub packet_count: usize,
    #[serde(with = "timestamp_format")]
    pub first_seen: NaiveDateTime,
    #[serde(with = "timestamp_format")]
    pub last_seen: NaiveDateTime,
    pub cluster: i32,
}

/// RSSI variance breakdown for one logical device.
#[derive(Debug, Clone, Serialize)]
pub struct VarianceRow {
    pub device_id: i32,
    pub overall_std: Option<f64>,
    /// Mean of the rolling-window standard deviations.
    pub rolling_std: Option<f64>,
    /// Spread of packets that follow the previous one closely.
    pub short_term_std: Option<f64>,
    pub n_packets: usize,
    pub n_macs: usize,
}

/// Distance estimate with a ±1σ RSSI error band.
#[derive(Debug, Clone, Serialize)]
pub struct PositioningError {
    pub device_id: i32,
    pub rssi_mean: f64,
    pub rssi_std: f64,
    pub estimated_distance_m: f64,
    pub error_upper_m: f64,
    pub error_lower_m: f64,
    pub error_percent: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContinuityReport {
    pub rotation_events: Vec<RotationEvent>,
    pub fingerprints: Vec<MacFingerprint>,
    pub logical_devices: usize,
    pub variance: Vec<VarianceRow>,
    pub positioning_errors: Vec<PositioningError>,
}

/// Run the full continuity analysis over AirTag packets.
pub fn analyze(
    airtags: &[&CaptureRecord],
    config: &AnalysisConfig,
    model: &PathLossModel,
) -> ContinuityReport {
    let groups = group_by_mac(airtags.iter().copied());

    let rotation_events = detect_rotation_events(&groups, config.rotation_gap_minutes);
    let fingerprints = cluster_fingerprints(&groups, config.cluster_eps, config.cluster_min_samples);

    let labels: HashMap<&str, i32> = fingerprints
        .iter()
        .map(|f| (f.mac.as_str(), f.cluster))
        .collect();
    let devices = logical_devices(airtags, &labels);

    let variance = devices
        .iter()
        .map(|(id, packets)| variance_row(*id, packets, config))
        .collect();
    let positioning_errors = devices
        .iter()
        .filter_map(|(id, packets)| positioning_error(*id, packets, model))
        .collect();

    ContinuityReport {
        rotation_events,
        logical_devices: devices.len(),
        fingerprints,
        variance,
        positioning_errors,
    }
}

/// Gaps longer than `gap_minutes` between consecutive packets of a MAC.
pub fn detect_rotation_events(groups: &[MacGroup<'_>], gap_minutes: f64) -> Vec<RotationEvent> {
    let gap_seconds = gap_minutes * 60.0;
    let mut events = Vec::new();

    for group in groups {
        for pair in group.packets.windows(2) {
            let gap = seconds_between(pair[0].timestamp, pair[1].timestamp);
            if gap <= gap_seconds {
                continue;
            }
            let at = pair[1].timestamp;
            let before = group.packets.iter().filter(|p| p.timestamp < at).count();
            events.push(RotationEvent {
                mac: group.mac.to_string(),
                rotation_time: at,
                gap_duration_hours: gap / 3600.0,
                packets_before: before,
                packets_after: group.packets.len() - before,
            });
        }
    }

    if events.is_empty() {
        info!("No MAC rotation events detected");
    } else {
        info!("Detected {} potential MAC rotation events", events.len());
    }
    events
}

/// Fingerprint every MAC and label it with a DBSCAN cluster.
pub fn cluster_fingerprints(
    groups: &[MacGroup<'_>],
    eps: f64,
    min_samples: usize,
) -> Vec<MacFingerprint> {
    let mut fingerprints: Vec<MacFingerprint> = groups
        .iter()
        .filter_map(|group| {
            let rssi = group.rssi();
            Some(MacFingerprint {
                mac: group.mac.to_string(),
                rssi_mean: mean(&rssi)?,
                rssi_std: sample_std(&rssi).unwrap_or(0.0),
                rssi_median: median(&rssi)?,
                packet_count: rssi.len(),
                first_seen: group.first_seen()?,
                last_seen: group.last_seen()?,
                cluster: NOISE,
            })
        })
        .collect();

    let points: Vec<[f64; 2]> = fingerprints
        .iter()
        .map(|f| [f.rssi_mean, f.rssi_std])
        .collect();
    let labels = dbscan(&points, eps, min_samples);
    for (fingerprint, label) in fingerprints.iter_mut().zip(labels) {
        fingerprint.cluster = label;
    }

    let clusters: HashSet<i32> = fingerprints
        .iter()
        .map(|f| f.cluster)
        .filter(|&c| c != NOISE)
        .collect();
    info!(
        "Identified {} logical devices from {} MACs",
        clusters.len(),
        fingerprints.len()
    );
    fingerprints
}

/// Density-based clustering over 2-D points with Euclidean distance.
///
/// A point is core when at least `min_samples` points, itself included, lie
/// within `eps`. Clusters are numbered from 0 in scan order.
pub fn dbscan(points: &[[f64; 2]], eps: f64, min_samples: usize) -> Vec<i32> {
    let n = points.len();
    let neighbours: Vec<Vec<usize>> = (0..n)
        .map(|i| {
            (0..n)
                .filter(|&j| {
                    let dx = points[i][0] - points[j][0];
                    let dy = points[i][1] - points[j][1];
                    (dx * dx + dy * dy).sqrt() <= eps
                })
                .collect()
        })
        .collect();
    let is_core: Vec<bool> = neighbours.iter().map(|n| n.len() >= min_samples).collect();

    let mut labels = vec![NOISE; n];
    let mut next_label = 0;

    for start in 0..n {
        if labels[start] != NOISE || !is_core[start] {
            continue;
        }
        labels[start] = next_label;
        let mut queue = VecDeque::from([start]);

        while let Some(p) = queue.pop_front() {
            if !is_core[p] {
                continue;
            }
            for &q in &neighbours[p] {
                if labels[q] == NOISE {
                    labels[q] = next_label;
                    queue.push_back(q);
                }
            }
        }
        next_label += 1;
    }

    debug!("DBSCAN produced {} clusters over {} points", next_label, n);
    labels
}

/// Packets of each non-noise cluster, sorted by time.
fn logical_devices<'a>(
    airtags: &[&'a CaptureRecord],
    labels: &HashMap<&str, i32>,
) -> BTreeMap<i32, Vec<&'a CaptureRecord>> {
    let mut devices: BTreeMap<i32, Vec<&'a CaptureRecord>> = BTreeMap::new();
    for &record in airtags {
        match labels.get(record.mac_address.as_str()) {
            Some(&label) if label != NOISE => devices.entry(label).or_default().push(record),
            _ => {}
        }
    }
    for packets in devices.values_mut() {
        packets.sort_by_key(|p| p.timestamp);
    }
    devices
}

fn variance_row(device_id: i32, packets: &[&CaptureRecord], config: &AnalysisConfig) -> VarianceRow {
    let rssi: Vec<f64> = packets.iter().map(|p| p.rssi as f64).collect();

    let rolling: Vec<f64> = centered_rolling(&rssi, config.rolling_window, sample_std)
        .into_iter()
        .flatten()
        .collect();

    let short_term: Vec<f64> = packets
        .windows(2)
        .filter(|w| seconds_between(w[0].timestamp, w[1].timestamp) < config.short_term_gap_seconds)
        .map(|w| w[1].rssi as f64)
        .collect();
    let short_term_std = if short_term.len() > 10 {
        sample_std(&short_term)
    } else {
        None
    };

    let macs: HashSet<&str> = packets.iter().map(|p| p.mac_address.as_str()).collect();

    VarianceRow {
        device_id,
        overall_std: sample_std(&rssi),
        rolling_std: mean(&rolling),
        short_term_std,
        n_packets: packets.len(),
        n_macs: macs.len(),
    }
}

fn positioning_error(
    device_id: i32,
    packets: &[&CaptureRecord],
    model: &PathLossModel,
) -> Option<PositioningError> {
    let rssi: Vec<f64> = packets.iter().map(|p| p.rssi as f64).collect();
    let rssi_mean = mean(&rssi)?;
    let rssi_std = sample_std(&rssi)?;

    let d = model.distance(rssi_mean);
    let d_upper = model.distance(rssi_mean - rssi_std);
    let d_lower = model.distance(rssi_mean + rssi_std);
    let error_upper = d_upper - d;

    Some(PositioningError {
        device_id,
        rssi_mean,
        rssi_std,
        estimated_distance_m: d,
        error_upper_m: error_upper,
        error_lower_m: d - d_lower,
        error_percent: error_upper / d * 100.0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DeviceKind;
    use chrono::Duration;

    fn packet(mac: &str, rssi: i16, secs: i64) -> CaptureRecord {
        CaptureRecord {
            timestamp: timestamp_format::parse("2024-03-01T10:00:00").unwrap()
                + Duration::seconds(secs),
            mac_address: mac.to_string(),
            rssi,
            local_name: String::new(),
            device_type: DeviceKind::AirTag,
            manufacturer_id: Some(76),
            manufacturer_data_hex: String::new(),
            service_uuids: String::new(),
            tx_power: None,
            is_airtag: true,
            airtag_status_byte: "0x12".to_string(),
        }
    }

    #[test]
    fn test_dbscan_two_clusters_and_noise() {
        let points = [
            [-60.0, 2.0],
            [-61.0, 2.5],
            [-59.5, 1.5],
            [-80.0, 2.0],
            [-81.0, 2.0],
            [-80.5, 3.0],
            [-40.0, 0.0],
        ];
        let labels = dbscan(&points, 3.0, 3);
        assert_eq!(labels, vec![0, 0, 0, 1, 1, 1, NOISE]);
    }

    #[test]
    fn test_dbscan_counts_self_in_neighbourhood() {
        let points = [[0.0, 0.0], [1.0, 0.0]];
        assert_eq!(dbscan(&points, 1.0, 2), vec![0, 0]);
        assert_eq!(dbscan(&points, 1.0, 3), vec![NOISE, NOISE]);
    }

    #[test]
    fn test_dbscan_border_point_joins_first_cluster() {
        // Point 2 is a border point reachable only from core point 1.
        let points = [[0.0, 0.0], [1.0, 0.0], [2.0, 0.0]];
        let labels = dbscan(&points, 1.0, 3);
        assert_eq!(labels, vec![0, 0, 0]);
    }

    #[test]
    fn test_rotation_event_fields() {
        let records = vec![
            packet("AA", -60, 0),
            packet("AA", -60, 30),
            packet("AA", -61, 30 + 20 * 60),
            packet("AA", -62, 30 + 21 * 60),
        ];
        let refs: Vec<&CaptureRecord> = records.iter().collect();
        let groups = group_by_mac(refs.iter().copied());
        let events = detect_rotation_events(&groups, 15.0);

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].packets_before, 2);
        assert_eq!(events[0].packets_after, 2);
        assert!((events[0].gap_duration_hours - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_logical_device_variance_and_error_bounds() {
        // Five MACs with near-identical fingerprints form one logical device.
        let mut records = Vec::new();
        for m in 0..5 {
            let mac = format!("AA:00:00:00:00:0{}", m);
            for i in 0..20 {
                let rssi = if i % 2 == 0 { -60 } else { -62 };
                records.push(packet(&mac, rssi, (m * 100 + i) as i64 * 5));
            }
        }
        let refs: Vec<&CaptureRecord> = records.iter().collect();
        let report = analyze(&refs, &AnalysisConfig::default(), &PathLossModel::default());

        assert_eq!(report.logical_devices, 1);
        assert!(report.fingerprints.iter().all(|f| f.cluster == 0));

        let v = &report.variance[0];
        assert_eq!(v.n_packets, 100);
        assert_eq!(v.n_macs, 5);
        assert!(v.rolling_std.is_some());
        assert!(v.short_term_std.is_some());

        let e = &report.positioning_errors[0];
        assert!(e.error_upper_m > 0.0);
        assert!(e.error_lower_m > 0.0);
        assert!(e.error_upper_m > e.error_lower_m);
        assert!(report.rotation_events.is_empty());
    }

    #[test]
    fn test_single_packet_mac_uses_zero_std() {
        let records = vec![packet("AA", -60, 0)];
        let refs: Vec<&CaptureRecord> = records.iter().collect();
        let groups = group_by_mac(refs.iter().copied());
        let fps = cluster_fingerprints(&groups, 3.0, 5);
        assert_eq!(fps[0].rssi_std, 0.0);
        assert_eq!(fps[0].cluster, NOISE);
    }
}
