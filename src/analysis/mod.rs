//! BLE capture analysis.
//!
//! `environment` covers every packet in the capture; `continuity` looks only
//! at AirTag packets to follow devices across MAC rotations.

pub mod continuity;
pub mod dataset;
pub mod environment;

pub use dataset::Dataset;

use crate::config::AnalysisConfig;
use crate::error::Result;
use crate::spatial::PathLossModel;
use continuity::ContinuityReport;
use environment::{
    ActivityBins, AirTagSignature, DatasetSummary, DeviceRow, KeyMetrics, PollutionReport,
};
use serde::Serialize;
use std::path::Path;
use tracing::{info, warn};

/// Everything the `analyze` stage produces for one capture.
#[derive(Debug, Clone, Serialize)]
pub struct BleAnalysis {
    pub summary: DatasetSummary,
    pub pollution: PollutionReport,
    pub signatures: Vec<AirTagSignature>,
    pub devices: Vec<DeviceRow>,
    pub activity: ActivityBins,
    pub key_metrics: KeyMetrics,
    /// Absent when the capture holds no AirTag packets.
    pub continuity: Option<ContinuityReport>,
}

/// Run the environment and continuity analyses.
pub fn run(dataset: &Dataset, config: &AnalysisConfig, model: &PathLossModel) -> BleAnalysis {
    info!(
        "Analyzing {} packets from {} MACs",
        dataset.len(),
        dataset.unique_macs()
    );

    let airtags = dataset.airtag_records();
    let continuity = if airtags.is_empty() {
        warn!("No AirTag packets; skipping continuity analysis");
        None
    } else {
        let report = continuity::analyze(&airtags, config, model);
        info!(
            "{} rotation events, {} logical devices",
            report.rotation_events.len(),
            report.logical_devices
        );
        Some(report)
    };

    BleAnalysis {
        summary: environment::summarize(dataset),
        pollution: environment::environment_pollution(dataset),
        signatures: environment::airtag_signatures(dataset, config.rotation_gap_minutes),
        devices: environment::device_table(dataset),
        activity: environment::activity_bins(dataset, config.activity_bins),
        key_metrics: environment::key_metrics(dataset),
        continuity,
    }
}

/// Write the analysis as pretty JSON.
pub fn export(analysis: &BleAnalysis, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(analysis)?)?;
    info!("Analysis written to {}", path.display());
    Ok(())
}
