//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.influence-terrain.toml` files.

use crate::cli::{self, Args, Command};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default configuration file name, looked up in the working directory.
pub const CONFIG_FILE_NAME: &str = ".influence-terrain.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// BLE capture settings.
    #[serde(default)]
    pub capture: CaptureConfig,

    /// RSSI path-loss model.
    #[serde(default)]
    pub path_loss: PathLossConfig,

    /// BLE statistics settings.
    #[serde(default)]
    pub analysis: AnalysisConfig,

    /// Spatial analysis settings.
    #[serde(default)]
    pub spatial: SpatialConfig,

    /// BGP topology settings.
    #[serde(default)]
    pub bgp: BgpConfig,

    /// Dual-layer scoring settings.
    #[serde(default)]
    pub integration: IntegrationConfig,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Enable verbose logging by default.
    #[serde(default)]
    pub verbose: bool,

    /// Show progress bars for long-running steps.
    #[serde(default = "default_true")]
    pub show_progress: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            show_progress: true,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Passive BLE capture settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Capture CSV path.
    #[serde(default = "default_capture_output")]
    pub output: String,

    /// Capture duration in hours.
    #[serde(default = "default_duration_hours")]
    pub duration_hours: f64,

    /// Keep only AirTag advertisements.
    #[serde(default)]
    pub airtag_only: bool,

    /// Log a progress line every N packets.
    #[serde(default = "default_progress_every")]
    pub progress_every: usize,

    /// Minutes between detailed status reports.
    #[serde(default = "default_status_interval")]
    pub status_interval_minutes: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            output: default_capture_output(),
            duration_hours: default_duration_hours(),
            airtag_only: false,
            progress_every: default_progress_every(),
            status_interval_minutes: default_status_interval(),
        }
    }
}

fn default_capture_output() -> String {
    "ble_capture_v2.csv".to_string()
}

fn default_duration_hours() -> f64 {
    24.0
}

fn default_progress_every() -> usize {
    100
}

fn default_status_interval() -> u64 {
    30
}

/// Log-distance path-loss parameters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PathLossConfig {
    /// Reference RSSI at one metre (dBm).
    #[serde(default = "default_rssi_at_1m")]
    pub rssi_at_1m: f64,

    /// Path-loss exponent (2.0 free space, 2.5 indoor).
    #[serde(default = "default_path_loss_exponent")]
    pub exponent: f64,
}

impl Default for PathLossConfig {
    fn default() -> Self {
        Self {
            rssi_at_1m: default_rssi_at_1m(),
            exponent: default_path_loss_exponent(),
        }
    }
}

fn default_rssi_at_1m() -> f64 {
    -59.0
}

fn default_path_loss_exponent() -> f64 {
    2.5
}

/// BLE statistics settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Gap that marks a suspected MAC rotation.
    #[serde(default = "default_rotation_gap")]
    pub rotation_gap_minutes: f64,

    /// DBSCAN neighbourhood radius over (RSSI mean, RSSI std).
    #[serde(default = "default_cluster_eps")]
    pub cluster_eps: f64,

    /// DBSCAN core-point threshold.
    #[serde(default = "default_cluster_min_samples")]
    pub cluster_min_samples: usize,

    /// Rolling window (packets) for drift variance.
    #[serde(default = "default_rolling_window")]
    pub rolling_window: usize,

    /// Packets closer than this are treated as consecutive.
    #[serde(default = "default_short_term_gap")]
    pub short_term_gap_seconds: f64,

    /// Number of time bins for the activity histogram.
    #[serde(default = "default_activity_bins")]
    pub activity_bins: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            rotation_gap_minutes: default_rotation_gap(),
            cluster_eps: default_cluster_eps(),
            cluster_min_samples: default_cluster_min_samples(),
            rolling_window: default_rolling_window(),
            short_term_gap_seconds: default_short_term_gap(),
            activity_bins: default_activity_bins(),
        }
    }
}

fn default_rotation_gap() -> f64 {
    15.0
}

fn default_cluster_eps() -> f64 {
    3.0
}

fn default_cluster_min_samples() -> usize {
    5
}

fn default_rolling_window() -> usize {
    50
}

fn default_short_term_gap() -> f64 {
    60.0
}

fn default_activity_bins() -> usize {
    50
}

/// Spatial analysis settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpatialConfig {
    /// Rolling window for movement baselines, in minutes.
    #[serde(default = "default_window_minutes")]
    pub window_minutes: usize,

    /// Assumed advertisement rate used to size the window.
    #[serde(default = "default_packets_per_minute")]
    pub packets_per_minute: usize,

    /// Deviation from baseline that counts as a movement event (dB).
    #[serde(default = "default_threshold_db")]
    pub threshold_db: f64,

    /// Grid points per axis for the terrain map.
    #[serde(default = "default_grid_resolution")]
    pub grid_resolution: usize,

    /// Margin around device positions (metres).
    #[serde(default = "default_grid_margin")]
    pub grid_margin: f64,

    /// Extent MDS coordinates are scaled to (metres).
    #[serde(default = "default_mds_extent")]
    pub mds_extent: f64,
}

impl Default for SpatialConfig {
    fn default() -> Self {
        Self {
            window_minutes: default_window_minutes(),
            packets_per_minute: default_packets_per_minute(),
            threshold_db: default_threshold_db(),
            grid_resolution: default_grid_resolution(),
            grid_margin: default_grid_margin(),
            mds_extent: default_mds_extent(),
        }
    }
}

fn default_window_minutes() -> usize {
    5
}

fn default_packets_per_minute() -> usize {
    12
}

fn default_threshold_db() -> f64 {
    3.0
}

fn default_grid_resolution() -> usize {
    100
}

fn default_grid_margin() -> f64 {
    2.0
}

fn default_mds_extent() -> f64 {
    10.0
}

/// BGP topology settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BgpConfig {
    /// ISO 3166 alpha-2 country code.
    #[serde(default = "default_country")]
    pub country: String,

    /// Number of ASes whose neighbours are fetched.
    #[serde(default = "default_sample_size")]
    pub sample_size: usize,

    /// Directory for cached ASN lists and graphs.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: String,

    /// RIPE Stat base URL.
    #[serde(default = "default_ripe_url")]
    pub ripe_url: String,

    /// Timeout for the country resource request.
    #[serde(default = "default_country_timeout")]
    pub country_timeout_seconds: u64,

    /// Timeout for each neighbour request.
    #[serde(default = "default_neighbour_timeout")]
    pub neighbour_timeout_seconds: u64,

    /// Pause between neighbour requests.
    #[serde(default = "default_request_delay")]
    pub request_delay_ms: u64,

    /// Betweenness percentile for single points of failure.
    #[serde(default = "default_spof_percentile")]
    pub spof_percentile: f64,

    /// Number of ASes listed as top critical.
    #[serde(default = "default_top_n")]
    pub top_n: usize,
}

impl Default for BgpConfig {
    fn default() -> Self {
        Self {
            country: default_country(),
            sample_size: default_sample_size(),
            cache_dir: default_cache_dir(),
            ripe_url: default_ripe_url(),
            country_timeout_seconds: default_country_timeout(),
            neighbour_timeout_seconds: default_neighbour_timeout(),
            request_delay_ms: default_request_delay(),
            spof_percentile: default_spof_percentile(),
            top_n: default_top_n(),
        }
    }
}

fn default_country() -> String {
    "US".to_string()
}

fn default_sample_size() -> usize {
    50
}

fn default_cache_dir() -> String {
    "bgp_cache".to_string()
}

fn default_ripe_url() -> String {
    "https://stat.ripe.net".to_string()
}

fn default_country_timeout() -> u64 {
    30
}

fn default_neighbour_timeout() -> u64 {
    10
}

fn default_request_delay() -> u64 {
    500
}

fn default_spof_percentile() -> f64 {
    95.0
}

fn default_top_n() -> usize {
    10
}

/// Dual-layer scoring settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrationConfig {
    /// Weight of macro fragility.
    #[serde(default = "default_macro_weight")]
    pub macro_weight: f64,

    /// Weight of inverse micro stability.
    #[serde(default = "default_stability_weight")]
    pub stability_weight: f64,

    /// Weight of device density.
    #[serde(default = "default_density_weight")]
    pub density_weight: f64,

    /// Scores above this are high.
    #[serde(default = "default_high_threshold")]
    pub high_threshold: f64,

    /// Scores above this are moderate.
    #[serde(default = "default_moderate_threshold")]
    pub moderate_threshold: f64,
}

impl Default for IntegrationConfig {
    fn default() -> Self {
        Self {
            macro_weight: default_macro_weight(),
            stability_weight: default_stability_weight(),
            density_weight: default_density_weight(),
            high_threshold: default_high_threshold(),
            moderate_threshold: default_moderate_threshold(),
        }
    }
}

fn default_macro_weight() -> f64 {
    0.4
}

fn default_stability_weight() -> f64 {
    0.3
}

fn default_density_weight() -> f64 {
    0.3
}

fn default_high_threshold() -> f64 {
    15.0
}

fn default_moderate_threshold() -> f64 {
    10.0
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        Self::load_from_dir(Path::new("."))
    }

    /// Try to load `.influence-terrain.toml` from a directory.
    pub fn load_from_dir(dir: &Path) -> Result<Option<Self>> {
        let config_path = dir.join(CONFIG_FILE_NAME);

        if config_path.exists() {
            Ok(Some(Self::load(&config_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence over config file settings. Only flags
    /// the user actually passed are applied.
    pub fn merge_with_args(&mut self, args: &Args) {
        if args.verbose {
            self.general.verbose = true;
        }
        if args.quiet {
            self.general.show_progress = false;
        }

        match &args.command {
            Command::Capture(c) => {
                if let Some(hours) = c.duration {
                    self.capture.duration_hours = hours;
                }
                if let Some(ref output) = c.output {
                    self.capture.output = output.display().to_string();
                }
                if c.airtag_only {
                    self.capture.airtag_only = true;
                }
            }
            Command::Analyze(a) => {
                if let Some(gap) = a.rotation_gap_minutes {
                    self.analysis.rotation_gap_minutes = gap;
                }
            }
            Command::Spatial(s) => {
                if let Some(threshold) = s.threshold_db {
                    self.spatial.threshold_db = threshold;
                }
                if let Some(window) = s.window_minutes {
                    self.spatial.window_minutes = window;
                }
                if let Some(resolution) = s.grid_resolution {
                    self.spatial.grid_resolution = resolution;
                }
            }
            Command::Bgp(b) => {
                if let Some(ref country) = b.country {
                    self.bgp.country = country.to_ascii_uppercase();
                }
                if let Some(size) = b.sample_size {
                    self.bgp.sample_size = size;
                }
                if let Some(ref dir) = b.cache_dir {
                    self.bgp.cache_dir = dir.display().to_string();
                }
                if let Some(ref url) = b.ripe_url {
                    self.bgp.ripe_url = url.clone();
                }
                if let Some(percentile) = b.spof_percentile {
                    self.bgp.spof_percentile = percentile;
                }
            }
            Command::Integrate(_) | Command::InitConfig => {}
        }
    }

    /// Check values that may have come from the config file rather than
    /// validated flags.
    pub fn validate(&self) -> std::result::Result<(), String> {
        cli::check_duration(self.capture.duration_hours)
            .map_err(|e| format!("[capture] duration_hours: {}", e))?;
        cli::check_country(&self.bgp.country).map_err(|e| format!("[bgp] country: {}", e))?;
        if self.bgp.sample_size == 0 {
            return Err("[bgp] sample_size: must be at least 1".to_string());
        }
        cli::check_ripe_url(&self.bgp.ripe_url).map_err(|e| format!("[bgp] ripe_url: {}", e))?;
        cli::check_percentile(self.bgp.spof_percentile)
            .map_err(|e| format!("[bgp] spof_percentile: {}", e))?;
        Ok(())
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{BgpArgs, CaptureArgs};
    use std::path::PathBuf;

    fn args_with(command: Command) -> Args {
        Args {
            command,
            config: None,
            verbose: false,
            quiet: false,
        }
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.path_loss.rssi_at_1m, -59.0);
        assert_eq!(config.path_loss.exponent, 2.5);
        assert_eq!(config.bgp.country, "US");
        assert_eq!(config.bgp.sample_size, 50);
        assert_eq!(config.spatial.threshold_db, 3.0);
        assert_eq!(config.integration.macro_weight, 0.4);
    }

    #[test]
    fn test_parse_partial_config() {
        let toml_content = r#"
[bgp]
country = "DE"
sample_size = 20

[path_loss]
exponent = 2.0

[integration]
high_threshold = 20.0
"#;

        let config: Config = toml::from_str(toml_content).unwrap();
        assert_eq!(config.bgp.country, "DE");
        assert_eq!(config.bgp.sample_size, 20);
        assert_eq!(config.bgp.cache_dir, "bgp_cache");
        assert_eq!(config.path_loss.exponent, 2.0);
        assert_eq!(config.path_loss.rssi_at_1m, -59.0);
        assert_eq!(config.integration.high_threshold, 20.0);
        assert_eq!(config.capture.progress_every, 100);
    }

    #[test]
    fn test_default_toml_generation() {
        let toml_str = Config::default_toml();
        assert!(toml_str.contains("[capture]"));
        assert!(toml_str.contains("[path_loss]"));
        assert!(toml_str.contains("[bgp]"));
        assert!(toml_str.contains("[integration]"));

        let reparsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(reparsed.bgp.ripe_url, "https://stat.ripe.net");
    }

    #[test]
    fn test_merge_bgp_args() {
        let mut config = Config::default();
        let args = args_with(Command::Bgp(BgpArgs {
            country: Some("nl".to_string()),
            sample_size: Some(5),
            use_cache: false,
            cache_dir: None,
            ripe_url: None,
            spof_percentile: None,
            simulate_top: 0,
            output: PathBuf::from("bgp.json"),
            report: None,
        }));

        config.merge_with_args(&args);
        assert_eq!(config.bgp.country, "NL");
        assert_eq!(config.bgp.sample_size, 5);
        assert_eq!(config.bgp.spof_percentile, 95.0);
    }

    #[test]
    fn test_merge_capture_args_keeps_unset_values() {
        let mut config = Config::default();
        config.capture.duration_hours = 2.0;
        let args = args_with(Command::Capture(CaptureArgs {
            duration: None,
            airtag_only: true,
            output: None,
            replay: None,
        }));

        config.merge_with_args(&args);
        assert_eq!(config.capture.duration_hours, 2.0);
        assert!(config.capture.airtag_only);
    }

    #[test]
    fn test_validate_file_values() {
        assert!(Config::default().validate().is_ok());

        let config: Config = toml::from_str("[bgp]\ncountry = \"USA\"\n").unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.contains("[bgp] country"), "{}", err);

        let config: Config = toml::from_str("[capture]\nduration_hours = inf\n").unwrap();
        assert!(config.validate().is_err());

        let config: Config = toml::from_str("[bgp]\nsample_size = 0\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_verbose_from_file_sets_debug_level() {
        let mut config: Config = toml::from_str("[general]\nverbose = true\n").unwrap();
        let args = args_with(Command::InitConfig);
        config.merge_with_args(&args);
        assert_eq!(args.log_level(config.general.verbose), tracing::Level::DEBUG);
    }

    #[test]
    fn test_load_from_dir() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(Config::load_from_dir(dir.path()).unwrap().is_none());

        std::fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            "[spatial]\nthreshold_db = 4.5\n",
        )
        .unwrap();
        let config = Config::load_from_dir(dir.path()).unwrap().unwrap();
        assert_eq!(config.spatial.threshold_db, 4.5);
    }
}
