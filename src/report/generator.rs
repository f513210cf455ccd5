//! Markdown report generation.
//!
//! One report per stage, each built from a metadata section, result tables
//! and a common footer.

use crate::analysis::continuity::ContinuityReport;
use crate::analysis::environment::{DeviceRow, PollutionReport};
use crate::analysis::BleAnalysis;
use crate::integration::DualLayerResults;
use crate::models::{BgpResults, SpatialSummary};
use crate::spatial::PositionSource;
use anyhow::{Context, Result};
use serde::Serialize;
use std::io::Write;
use std::path::Path;

const DEVICE_TABLE_ROWS: usize = 20;

fn fmt_opt(value: Option<f64>, decimals: usize) -> String {
    match value {
        Some(v) => format!("{:.*}", decimals, v),
        None => "n/a".to_string(),
    }
}

/// Generate the BLE analysis report.
pub fn generate_analysis_report(analysis: &BleAnalysis, input: &Path) -> String {
    let mut output = String::new();

    output.push_str("# BLE Environment Analysis\n\n");

    let summary = &analysis.summary;
    output.push_str("## Metadata\n\n");
    output.push_str(&format!("- **Capture File:** `{}`\n", input.display()));
    output.push_str(&format!(
        "- **Time Range:** {} to {}\n",
        summary.first_timestamp, summary.last_timestamp
    ));
    output.push_str(&format!(
        "- **Duration:** {:.2} hours\n",
        summary.duration_hours
    ));
    output.push_str(&format!("- **Total Packets:** {}\n", summary.total_packets));
    output.push_str(&format!("- **Unique MACs:** {}\n", summary.unique_macs));
    output.push_str(&format!(
        "- **AirTag Packets:** {} ({:.1}%)\n\n",
        summary.airtag_packets, summary.airtag_percent
    ));

    output.push_str(&generate_pollution_section(&analysis.pollution));
    output.push_str(&generate_device_section(&analysis.devices));

    if let Some(ref continuity) = analysis.continuity {
        output.push_str(&generate_continuity_section(continuity));
    }

    output.push_str(&generate_footer());
    output
}

fn generate_pollution_section(pollution: &PollutionReport) -> String {
    let mut section = String::new();

    section.push_str("## Signal Environment\n\n");
    section.push_str("| Device Type | Devices | Avg RSSI | RSSI Std | Packets |\n");
    section.push_str("|:---|:---:|:---:|:---:|:---:|\n");
    for row in &pollution.rows {
        section.push_str(&format!(
            "| {} | {} | {:.2} | {} | {} |\n",
            row.device_type,
            row.unique_devices,
            row.avg_rssi,
            fmt_opt(row.rssi_std, 2),
            row.total_packets
        ));
    }
    section.push('\n');

    match pollution.signal_to_noise {
        Some(snr) => section.push_str(&format!("**Signal-to-noise:** {:.3}\n\n", snr)),
        None => section.push_str("**Signal-to-noise:** no non-target packets\n\n"),
    }

    section
}

fn generate_device_section(devices: &[DeviceRow]) -> String {
    let mut section = String::new();

    section.push_str("## Device Signatures\n\n");
    section.push_str("| MAC | Type | Target | Packets | RSSI Mean | RSSI Std | Interval (s) | Hours |\n");
    section.push_str("|:---|:---|:---:|:---:|:---:|:---:|:---:|:---:|\n");
    for row in devices.iter().take(DEVICE_TABLE_ROWS) {
        section.push_str(&format!(
            "| `{}` | {} | {} | {} | {:.2} | {} | {} | {:.2} |\n",
            row.mac_short,
            row.device_type,
            if row.is_target { "✓" } else { "" },
            row.packets,
            row.rssi_mean,
            fmt_opt(row.rssi_std, 2),
            fmt_opt(row.interval_mean_s, 1),
            row.duration_hours
        ));
    }
    if devices.len() > DEVICE_TABLE_ROWS {
        section.push_str(&format!(
            "\n*{} more devices in the JSON output.*\n",
            devices.len() - DEVICE_TABLE_ROWS
        ));
    }
    section.push('\n');

    section
}

fn generate_continuity_section(report: &ContinuityReport) -> String {
    let mut section = String::new();

    section.push_str("## AirTag Continuity\n\n");
    section.push_str(&format!(
        "- **MAC Rotation Events:** {}\n",
        report.rotation_events.len()
    ));
    section.push_str(&format!(
        "- **MAC Addresses:** {}\n",
        report.fingerprints.len()
    ));
    section.push_str(&format!(
        "- **Logical Devices:** {}\n\n",
        report.logical_devices
    ));

    if !report.variance.is_empty() {
        section.push_str("### RSSI Variance\n\n");
        section.push_str("| Device | Overall Std | Rolling Std | Short-term Std | Packets | MACs |\n");
        section.push_str("|:---:|:---:|:---:|:---:|:---:|:---:|\n");
        for row in &report.variance {
            section.push_str(&format!(
                "| {} | {} | {} | {} | {} | {} |\n",
                row.device_id,
                fmt_opt(row.overall_std, 2),
                fmt_opt(row.rolling_std, 2),
                fmt_opt(row.short_term_std, 2),
                row.n_packets,
                row.n_macs
            ));
        }
        section.push('\n');
    }

    if !report.positioning_errors.is_empty() {
        section.push_str("### Positioning Error Bounds\n\n");
        section.push_str("| Device | Distance (m) | +Error (m) | -Error (m) | Error % |\n");
        section.push_str("|:---:|:---:|:---:|:---:|:---:|\n");
        for row in &report.positioning_errors {
            section.push_str(&format!(
                "| {} | {:.2} | {:.2} | {:.2} | {:.1} |\n",
                row.device_id,
                row.estimated_distance_m,
                row.error_upper_m,
                row.error_lower_m,
                row.error_percent
            ));
        }
        section.push('\n');
    }

    section
}

/// Generate the spatial analysis report.
pub fn generate_spatial_report(
    summary: &SpatialSummary,
    position_source: PositionSource,
    input: &Path,
) -> String {
    let mut output = String::new();

    output.push_str("# Influence Terrain: Spatial Analysis\n\n");

    output.push_str("## Metadata\n\n");
    output.push_str(&format!("- **Capture File:** `{}`\n", input.display()));
    output.push_str(&format!(
        "- **AirTag Packets:** {}\n",
        summary.capture_summary.total_packets
    ));
    output.push_str(&format!(
        "- **Devices:** {}\n",
        summary.capture_summary.n_devices
    ));
    output.push_str(&format!(
        "- **Duration:** {:.2} hours\n",
        summary.capture_summary.duration_hours
    ));
    let positions = match position_source {
        PositionSource::Known => "known layout",
        PositionSource::Mds => "estimated (MDS)",
    };
    output.push_str(&format!("- **Positions:** {}\n\n", positions));

    output.push_str("## Devices\n\n");
    output.push_str("| Device | X (m) | Y (m) | Baseline | Mean | Std | Min | Max | Movement Events |\n");
    output.push_str("|:---|:---:|:---:|:---:|:---:|:---:|:---:|:---:|:---:|\n");
    for (mac, stats) in &summary.rssi_statistics {
        let (x, y) = summary
            .device_positions
            .get(mac)
            .map(|p| (format!("{:.2}", p.x), format!("{:.2}", p.y)))
            .unwrap_or_else(|| ("-".to_string(), "-".to_string()));
        section_row(
            &mut output,
            &[
                format!("`{}`", mac),
                x,
                y,
                fmt_opt(summary.rssi_baselines.get(mac).copied(), 1),
                format!("{:.2}", stats.mean),
                format!("{:.2}", stats.std),
                format!("{:.0}", stats.min),
                format!("{:.0}", stats.max),
                summary
                    .movement_events
                    .get(mac)
                    .copied()
                    .unwrap_or(0)
                    .to_string(),
            ],
        );
    }
    output.push('\n');

    output.push_str(&generate_footer());
    output
}

fn section_row(section: &mut String, cells: &[String]) {
    section.push_str("| ");
    section.push_str(&cells.join(" | "));
    section.push_str(" |\n");
}

/// Generate the AS topology report.
pub fn generate_bgp_report(results: &BgpResults) -> String {
    let mut output = String::new();
    let meta = &results.metadata;

    output.push_str(&format!(
        "# AS Topology Analysis: {}\n\n",
        meta.target_country
    ));

    output.push_str("## Metadata\n\n");
    if let Some(date) = meta.analysis_date {
        output.push_str(&format!(
            "- **Analysis Date:** {}\n",
            date.format("%Y-%m-%d %H:%M:%S UTC")
        ));
    }
    output.push_str(&format!("- **Country ASNs:** {}\n", meta.total_asns));
    output.push_str(&format!("- **Graph Nodes:** {}\n", meta.graph_nodes));
    output.push_str(&format!("- **Graph Edges:** {}\n", meta.graph_edges));
    output.push_str(&format!(
        "- **Single Points of Failure:** {}\n\n",
        results.spof_count
    ));

    output.push_str("## Most Critical ASes\n\n");
    output.push_str("| Rank | ASN | Betweenness | Degree | PageRank |\n");
    output.push_str("|:---:|:---|:---:|:---:|:---:|\n");
    for (i, row) in results.top_critical_ases.iter().enumerate() {
        output.push_str(&format!(
            "| {} | AS{} | {:.4} | {:.4} | {:.4} |\n",
            i + 1,
            row.asn,
            row.betweenness,
            row.degree,
            row.pagerank
        ));
    }
    output.push('\n');

    if !results.removal_impacts.is_empty() {
        output.push_str("## Removal Simulation\n\n");
        output.push_str("| ASN | Components Created | Connectivity Loss | Nodes Isolated |\n");
        output.push_str("|:---|:---:|:---:|:---:|\n");
        for impact in &results.removal_impacts {
            output.push_str(&format!(
                "| AS{} | {} | {:.1}% | {} |\n",
                impact.asn,
                impact.components_created,
                impact.connectivity_loss * 100.0,
                impact.nodes_isolated
            ));
        }
        output.push('\n');
    }

    output.push_str(&generate_footer());
    output
}

/// Generate the dual-layer integration report.
pub fn generate_integration_report(results: &DualLayerResults) -> String {
    let mut output = String::new();
    let metrics = &results.influence_metrics;
    let level = results.level();

    output.push_str("# Dual-Layer Influence Terrain\n\n");

    output.push_str("## Metadata\n\n");
    output.push_str(&format!(
        "- **Analysis Date:** {}\n",
        results
            .analysis_metadata
            .analysis_date
            .format("%Y-%m-%d %H:%M:%S UTC")
    ));
    output.push_str(&format!(
        "- **Macro Input:** {}\n",
        results.analysis_metadata.bgp_input
    ));
    output.push_str(&format!(
        "- **Micro Input:** {}\n\n",
        results.analysis_metadata.ble_input
    ));

    output.push_str("## Influence Score\n\n");
    output.push_str(&format!(
        "{} **{}** ({})\n\n",
        level.emoji(),
        metrics.integrated.influence_terrain_score,
        metrics.integrated.interpretation
    ));

    output.push_str("| Layer | Metric | Value |\n");
    output.push_str("|:---|:---|:---:|\n");
    output.push_str(&format!(
        "| Macro | Fragility index | {} |\n",
        metrics.macro_layer.fragility_index
    ));
    output.push_str(&format!(
        "| Macro | Concentration ratio | {} |\n",
        metrics.macro_layer.concentration_ratio
    ));
    output.push_str(&format!(
        "| Macro | Critical nodes | {} |\n",
        metrics.macro_layer.critical_nodes
    ));
    output.push_str(&format!(
        "| Micro | Signal stability (dBm σ) | {} |\n",
        metrics.micro_layer.signal_stability_index
    ));
    output.push_str(&format!(
        "| Micro | Device density | {} |\n",
        metrics.micro_layer.device_density
    ));
    output.push_str(&format!(
        "| Micro | Observation hours | {} |\n\n",
        metrics.micro_layer.observation_hours
    ));

    output.push_str("## Scenario Impact Matrix\n\n");
    output.push_str("| Scenario | Layer | Target | Connectivity | Observability | Influence | Overall | Timeframe | Detection |\n");
    output.push_str("|:---|:---:|:---|:---:|:---:|:---:|:---:|:---:|:---:|\n");
    for s in &results.scenarios {
        output.push_str(&format!(
            "| {} | {} | {} | {:.2} | {:.2} | {:.2} | {:.2} | {} | {} |\n",
            s.name,
            s.layer,
            s.target,
            s.impact_connectivity,
            s.impact_observability,
            s.impact_influence,
            s.overall_impact(),
            s.timeframe,
            s.detection_difficulty
        ));
    }
    output.push('\n');

    output.push_str("## Key Findings\n\n");
    for (i, finding) in results.key_findings.iter().enumerate() {
        output.push_str(&format!("{}. {}\n", i + 1, finding));
    }
    output.push('\n');

    output.push_str(&generate_footer());
    output
}

/// Generate the report footer.
fn generate_footer() -> String {
    let mut footer = String::new();

    footer.push_str("---\n\n");
    footer.push_str(&format!(
        "*Report generated by influence-terrain v{}*\n",
        env!("CARGO_PKG_VERSION")
    ));

    footer
}

/// Write a rendered report to a file.
pub fn write_report(content: &str, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let mut file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create report: {}", path.display()))?;
    file.write_all(content.as_bytes())?;

    Ok(())
}

/// Write any serializable stage output as pretty JSON.
pub fn write_json_report<T: Serialize>(value: &T, path: &Path) -> Result<()> {
    let content = serde_json::to_string_pretty(value)?;
    write_report(&content, path)
}
