//! Built-in demonstration inputs used when a layer's results file is missing.

use crate::models::{
    BgpMetadata, BgpResults, CaptureTotals, CentralityRow, Position, RssiStatistics,
    SpatialSummary,
};

/// Macro layer stand-in: a 50-node US sample with three dominant transit ASes.
pub fn bgp_results() -> BgpResults {
    let row = |asn, betweenness, degree| CentralityRow {
        asn,
        degree,
        betweenness,
        pagerank: 0.0,
    };

    BgpResults {
        metadata: BgpMetadata {
            target_country: "US".to_string(),
            analysis_date: None,
            total_asns: 15000,
            graph_nodes: 50,
            graph_edges: 120,
        },
        top_critical_ases: vec![
            row(7018, 0.15, 0.35),
            row(3356, 0.12, 0.30),
            row(174, 0.10, 0.28),
        ],
        spof_count: 8,
        spofs: Vec::new(),
        removal_impacts: Vec::new(),
    }
}

/// Micro layer stand-in: four devices on a 2 m square observed for a day.
pub fn spatial_summary() -> SpatialSummary {
    let devices = [
        ("device_01", (0.0, 0.0), -65.0, 2.3),
        ("device_02", (2.0, 0.0), -62.0, 1.8),
        ("device_03", (0.0, 2.0), -68.0, 2.1),
        ("device_04", (2.0, 2.0), -64.0, 1.9),
    ];

    let mut summary = SpatialSummary {
        capture_summary: CaptureTotals {
            total_packets: 45000,
            n_devices: devices.len(),
            duration_hours: 24.0,
        },
        ..Default::default()
    };

    for (id, (x, y), mean, std) in devices {
        summary
            .device_positions
            .insert(id.to_string(), Position::new(x, y));
        summary.rssi_statistics.insert(
            id.to_string(),
            RssiStatistics {
                mean,
                std,
                ..Default::default()
            },
        );
    }
    summary
}
