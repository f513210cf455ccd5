//! Dual-layer influence terrain scoring.
//!
//! Combines the macro layer (AS topology fragility) with the micro layer
//! (BLE signal stability and device density) into one composite score.

pub mod demo;
pub mod scenarios;

use crate::config::IntegrationConfig;
use crate::error::{Result, TerrainError};
use crate::models::{BgpResults, SpatialSummary};
use crate::stats;
use scenarios::Scenario;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Interpreted band of the composite score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TerrainLevel {
    Low,
    Moderate,
    High,
}

impl TerrainLevel {
    /// Band for `score` given the configured thresholds (both exclusive).
    pub fn from_score(score: f64, config: &IntegrationConfig) -> Self {
        if score > config.high_threshold {
            TerrainLevel::High
        } else if score > config.moderate_threshold {
            TerrainLevel::Moderate
        } else {
            TerrainLevel::Low
        }
    }

    pub fn sentence(&self) -> &'static str {
        match self {
            TerrainLevel::High => "Infrastructure highly susceptible to influence operations",
            TerrainLevel::Moderate => "Notable infrastructure vulnerabilities present",
            TerrainLevel::Low => "Resilient infrastructure with distributed dependencies",
        }
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            TerrainLevel::High => "🔴",
            TerrainLevel::Moderate => "🟡",
            TerrainLevel::Low => "🟢",
        }
    }

    /// `"LEVEL: sentence"`.
    pub fn interpretation(&self) -> String {
        format!("{}: {}", self, self.sentence())
    }
}

impl fmt::Display for TerrainLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerrainLevel::Low => write!(f, "LOW"),
            TerrainLevel::Moderate => write!(f, "MODERATE"),
            TerrainLevel::High => write!(f, "HIGH"),
        }
    }
}

/// Where a layer's input came from.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "path", rename_all = "snake_case")]
pub enum InputSource {
    File(PathBuf),
    Demonstration,
}

impl fmt::Display for InputSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputSource::File(path) => write!(f, "{}", path.display()),
            InputSource::Demonstration => write!(f, "built-in demonstration data"),
        }
    }
}

/// Both layers' inputs.
#[derive(Debug, Clone)]
pub struct LayerInputs {
    pub bgp: BgpResults,
    pub bgp_source: InputSource,
    pub ble: SpatialSummary,
    pub ble_source: InputSource,
}

/// Load both results files. A missing file is replaced by demonstration
/// data unless `strict`; unreadable or malformed files are always errors.
pub fn load_inputs(bgp_path: &Path, ble_path: &Path, strict: bool) -> Result<LayerInputs> {
    let (bgp, bgp_source) = load_or_demo(
        bgp_path,
        strict,
        "BGP",
        crate::bgp::load_results,
        demo::bgp_results,
    )?;
    info!(
        "Macro layer: {} ASes analyzed ({})",
        bgp.metadata.graph_nodes, bgp_source
    );

    let (ble, ble_source) = load_or_demo(
        ble_path,
        strict,
        "BLE",
        crate::spatial::terrain::load_summary,
        demo::spatial_summary,
    )?;
    info!(
        "Micro layer: {} devices analyzed ({})",
        ble.capture_summary.n_devices, ble_source
    );

    Ok(LayerInputs {
        bgp,
        bgp_source,
        ble,
        ble_source,
    })
}

fn load_or_demo<T>(
    path: &Path,
    strict: bool,
    layer: &str,
    load: fn(&Path) -> Result<T>,
    demo: fn() -> T,
) -> Result<(T, InputSource)> {
    match load(path) {
        Ok(value) => Ok((value, InputSource::File(path.to_path_buf()))),
        Err(TerrainError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound && !strict => {
            warn!(
                "{} results not found at {}, using demonstration data",
                layer,
                path.display()
            );
            Ok((demo(), InputSource::Demonstration))
        }
        Err(TerrainError::Io(e)) => Err(TerrainError::InvalidInput(format!(
            "cannot read {} results {}: {}",
            layer,
            path.display(),
            e
        ))),
        Err(e) => Err(e),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MacroLayerMetrics {
    pub fragility_index: f64,
    pub concentration_ratio: f64,
    pub critical_nodes: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MicroLayerMetrics {
    /// Mean per-device RSSI standard deviation (dBm).
    pub signal_stability_index: f64,
    pub device_density: usize,
    pub observation_hours: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IntegratedMetrics {
    pub influence_terrain_score: f64,
    pub level: TerrainLevel,
    pub interpretation: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InfluenceMetrics {
    pub macro_layer: MacroLayerMetrics,
    pub micro_layer: MicroLayerMetrics,
    pub integrated: IntegratedMetrics,
}

/// Cross-layer metrics and the weighted composite score.
pub fn influence_metrics(
    bgp: &BgpResults,
    ble: &SpatialSummary,
    config: &IntegrationConfig,
) -> Result<InfluenceMetrics> {
    if bgp.metadata.graph_nodes == 0 {
        return Err(TerrainError::InvalidInput(
            "BGP results report zero graph nodes".to_string(),
        ));
    }
    if bgp.metadata.total_asns == 0 {
        return Err(TerrainError::InvalidInput(
            "BGP results report zero total ASNs".to_string(),
        ));
    }

    let fragility = bgp.spof_count as f64 / bgp.metadata.graph_nodes as f64;
    let concentration = bgp.top_critical_ases.len() as f64 / bgp.metadata.total_asns as f64;

    let stds: Vec<f64> = ble.rssi_statistics.values().map(|s| s.std).collect();
    let stability = stats::mean(&stds).ok_or_else(|| {
        TerrainError::InvalidInput("BLE results carry no RSSI statistics".to_string())
    })?;
    if stability <= 0.0 {
        return Err(TerrainError::InvalidInput(
            "signal stability is zero; the inverse-stability term is undefined".to_string(),
        ));
    }
    let density = ble.capture_summary.n_devices;

    let score = config.macro_weight * fragility * 100.0
        + config.stability_weight * (1.0 / stability) * 10.0
        + config.density_weight * density as f64 * 2.0;
    let level = TerrainLevel::from_score(score, config);

    Ok(InfluenceMetrics {
        macro_layer: MacroLayerMetrics {
            fragility_index: stats::round_to(fragility, 4),
            concentration_ratio: stats::round_to(concentration, 6),
            critical_nodes: bgp.spof_count,
        },
        micro_layer: MicroLayerMetrics {
            signal_stability_index: stats::round_to(stability, 2),
            device_density: density,
            observation_hours: ble.capture_summary.duration_hours,
        },
        integrated: IntegratedMetrics {
            influence_terrain_score: stats::round_to(score, 2),
            level,
            interpretation: level.interpretation(),
        },
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisMetadata {
    pub layers_integrated: u8,
    pub macro_source: &'static str,
    pub micro_source: &'static str,
    pub bgp_input: InputSource,
    pub ble_input: InputSource,
    pub analysis_date: chrono::DateTime<chrono::Utc>,
}

/// Stage output (`dual_layer_results.json`).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DualLayerResults {
    pub analysis_metadata: AnalysisMetadata,
    pub influence_metrics: InfluenceMetrics,
    pub scenarios: Vec<Scenario>,
    pub key_findings: Vec<String>,
}

impl DualLayerResults {
    pub fn level(&self) -> TerrainLevel {
        self.influence_metrics.integrated.level
    }
}

/// Score both layers and attach the scenario matrix.
pub fn integrate(inputs: &LayerInputs, config: &IntegrationConfig) -> Result<DualLayerResults> {
    let metrics = influence_metrics(&inputs.bgp, &inputs.ble, config)?;
    info!(
        "Composite influence score {} ({})",
        metrics.integrated.influence_terrain_score, metrics.integrated.level
    );

    let key_findings = vec![
        format!(
            "Macro fragility index: {}",
            metrics.macro_layer.fragility_index
        ),
        format!(
            "Micro stability: {} dBm σ",
            metrics.micro_layer.signal_stability_index
        ),
        format!(
            "Influence terrain score: {}",
            metrics.integrated.influence_terrain_score
        ),
    ];

    Ok(DualLayerResults {
        analysis_metadata: AnalysisMetadata {
            layers_integrated: 2,
            macro_source: "BGP/AS topology analysis",
            micro_source: "BLE/IoT passive monitoring",
            bgp_input: inputs.bgp_source.clone(),
            ble_input: inputs.ble_source.clone(),
            analysis_date: chrono::Utc::now(),
        },
        influence_metrics: metrics,
        scenarios: scenarios::impact_matrix(),
        key_findings,
    })
}

/// Write results as pretty JSON.
pub fn export_results(results: &DualLayerResults, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(results)?)?;
    info!("Integrated results written to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RssiStatistics;
    use tempfile::TempDir;

    fn demo_inputs() -> LayerInputs {
        LayerInputs {
            bgp: demo::bgp_results(),
            bgp_source: InputSource::Demonstration,
            ble: demo::spatial_summary(),
            ble_source: InputSource::Demonstration,
        }
    }

    #[test]
    fn test_demo_metrics() {
        let inputs = demo_inputs();
        let m = influence_metrics(&inputs.bgp, &inputs.ble, &IntegrationConfig::default()).unwrap();

        assert_eq!(m.macro_layer.fragility_index, 0.16);
        assert_eq!(m.macro_layer.concentration_ratio, 0.0002);
        assert_eq!(m.macro_layer.critical_nodes, 8);
        assert!((m.micro_layer.signal_stability_index - 2.02).abs() < 0.011);
        assert_eq!(m.micro_layer.device_density, 4);
        assert_eq!(m.micro_layer.observation_hours, 24.0);
        // 6.4 + 3 / 2.025 + 2.4
        assert_eq!(m.integrated.influence_terrain_score, 10.28);
        assert_eq!(m.integrated.level, TerrainLevel::Moderate);
        assert_eq!(
            m.integrated.interpretation,
            "MODERATE: Notable infrastructure vulnerabilities present"
        );
    }

    #[test]
    fn test_levels() {
        let config = IntegrationConfig::default();
        assert_eq!(TerrainLevel::from_score(15.0, &config), TerrainLevel::Moderate);
        assert_eq!(TerrainLevel::from_score(15.01, &config), TerrainLevel::High);
        assert_eq!(TerrainLevel::from_score(10.0, &config), TerrainLevel::Low);
        assert!(TerrainLevel::High > TerrainLevel::Moderate);
        assert!(TerrainLevel::Moderate > TerrainLevel::Low);
    }

    #[test]
    fn test_zero_divisors_are_errors() {
        let config = IntegrationConfig::default();
        let inputs = demo_inputs();

        let mut bgp = inputs.bgp.clone();
        bgp.metadata.graph_nodes = 0;
        assert!(matches!(
            influence_metrics(&bgp, &inputs.ble, &config),
            Err(TerrainError::InvalidInput(_))
        ));

        let mut bgp = inputs.bgp.clone();
        bgp.metadata.total_asns = 0;
        assert!(influence_metrics(&bgp, &inputs.ble, &config).is_err());

        let mut ble = inputs.ble.clone();
        ble.rssi_statistics.clear();
        assert!(influence_metrics(&inputs.bgp, &ble, &config).is_err());

        let mut ble = inputs.ble.clone();
        for stats in ble.rssi_statistics.values_mut() {
            *stats = RssiStatistics::default();
        }
        assert!(influence_metrics(&inputs.bgp, &ble, &config).is_err());
    }

    #[test]
    fn test_missing_files_fall_back_unless_strict() {
        let dir = TempDir::new().unwrap();
        let bgp = dir.path().join("missing_bgp.json");
        let ble = dir.path().join("missing_ble.json");

        let inputs = load_inputs(&bgp, &ble, false).unwrap();
        assert_eq!(inputs.bgp_source, InputSource::Demonstration);
        assert_eq!(inputs.bgp.spof_count, 8);
        assert_eq!(inputs.ble.capture_summary.total_packets, 45000);

        assert!(load_inputs(&bgp, &ble, true).is_err());
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let bgp = dir.path().join("bgp.json");
        std::fs::write(&bgp, "{\"metadata\": 3}").unwrap();
        let ble = dir.path().join("missing.json");
        assert!(matches!(
            load_inputs(&bgp, &ble, false),
            Err(TerrainError::Json(_))
        ));
    }

    #[test]
    fn test_loads_files_written_by_earlier_stages() {
        let dir = TempDir::new().unwrap();
        let bgp_path = dir.path().join("bgp.json");
        let ble_path = dir.path().join("ble.json");
        std::fs::write(&bgp_path, serde_json::to_string(&demo::bgp_results()).unwrap()).unwrap();
        std::fs::write(
            &ble_path,
            serde_json::to_string(&demo::spatial_summary()).unwrap(),
        )
        .unwrap();

        let inputs = load_inputs(&bgp_path, &ble_path, true).unwrap();
        assert_eq!(inputs.bgp_source, InputSource::File(bgp_path));
        assert_eq!(inputs.ble.rssi_statistics.len(), 4);
    }

    #[test]
    fn test_integrate_and_export() {
        let dir = TempDir::new().unwrap();
        let results = integrate(&demo_inputs(), &IntegrationConfig::default()).unwrap();
        assert_eq!(results.scenarios.len(), 4);
        assert_eq!(results.key_findings[0], "Macro fragility index: 0.16");
        assert_eq!(results.key_findings[2], "Influence terrain score: 10.28");
        assert_eq!(results.level(), TerrainLevel::Moderate);

        let path = dir.path().join("dual_layer_results.json");
        export_results(&results, &path).unwrap();
        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["analysis_metadata"]["layers_integrated"], 2);
        assert_eq!(raw["influence_metrics"]["integrated"]["level"], "MODERATE");
        assert_eq!(raw["analysis_metadata"]["bgp_input"]["kind"], "demonstration");
    }
}
