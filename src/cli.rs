//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use crate::ble::capture::MAX_DURATION_HOURS;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

/// influence-terrain - dual-layer infrastructure influence analysis
///
/// Passive BLE/IoT RSSI monitoring (micro layer) combined with BGP/AS
/// topology analysis (macro layer). Each stage reads and writes CSV/JSON
/// files so the pipeline can be run step by step.
///
/// Examples:
///   influence-terrain capture --duration 24 --airtag-only --output ble_capture_v2.csv
///   influence-terrain analyze --input ble_capture_v2.csv --report ble_report.md
///   influence-terrain spatial --input ble_capture_v2.csv --positions positions.json
///   influence-terrain bgp --country US --sample-size 50 --use-cache
///   influence-terrain integrate --fail-on high
///   influence-terrain init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Path to configuration file
    ///
    /// If not specified, looks for .influence-terrain.toml in the current directory
    #[arg(short, long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

/// Pipeline stages.
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Passively capture BLE advertisements to CSV
    Capture(CaptureArgs),

    /// Device classification, signal pollution and MAC continuity statistics
    Analyze(AnalyzeArgs),

    /// RSSI-based positions, movement events and influence terrain grid
    Spatial(SpatialArgs),

    /// BGP/AS topology centrality and single-point-of-failure analysis
    Bgp(BgpArgs),

    /// Combine macro and micro results into an influence terrain score
    Integrate(IntegrateArgs),

    /// Generate a default .influence-terrain.toml configuration file
    InitConfig,
}

#[derive(clap::Args, Debug, Clone)]
pub struct CaptureArgs {
    /// Capture duration in hours
    #[arg(long, value_name = "HOURS")]
    pub duration: Option<f64>,

    /// Capture only AirTags (filter noise)
    #[arg(long)]
    pub airtag_only: bool,

    /// Output CSV
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Replay advertisements from a JSON-lines file instead of scanning
    #[arg(long, value_name = "FILE")]
    pub replay: Option<PathBuf>,
}

#[derive(clap::Args, Debug, Clone)]
pub struct AnalyzeArgs {
    /// Capture CSV to analyze
    #[arg(short, long, default_value = "ble_capture_v2.csv", value_name = "FILE")]
    pub input: PathBuf,

    /// Output JSON with all computed statistics
    #[arg(short, long, default_value = "ble_analysis_v2.json", value_name = "FILE")]
    pub output: PathBuf,

    /// Optional Markdown report
    #[arg(long, value_name = "FILE")]
    pub report: Option<PathBuf>,

    /// Gap (minutes) that marks a suspected MAC rotation
    #[arg(long, value_name = "MINUTES")]
    pub rotation_gap_minutes: Option<f64>,
}

#[derive(clap::Args, Debug, Clone)]
pub struct SpatialArgs {
    /// Capture CSV to analyze
    #[arg(short, long, default_value = "ble_capture_v2.csv", value_name = "FILE")]
    pub input: PathBuf,

    /// JSON file with known positions: {"MAC": [x, y], ...}
    #[arg(long, value_name = "FILE")]
    pub positions: Option<PathBuf>,

    /// Output summary JSON
    #[arg(
        short,
        long,
        default_value = "spatial_analysis_summary.json",
        value_name = "FILE"
    )]
    pub output: PathBuf,

    /// Influence terrain grid CSV (x, y, influence)
    #[arg(long, default_value = "influence_terrain_grid.csv", value_name = "FILE")]
    pub terrain: PathBuf,

    /// Optional CSV of detected movement events
    #[arg(long, value_name = "FILE")]
    pub events: Option<PathBuf>,

    /// Optional Markdown report
    #[arg(long, value_name = "FILE")]
    pub report: Option<PathBuf>,

    /// RSSI change threshold for movement events (dB)
    #[arg(long, value_name = "DB")]
    pub threshold_db: Option<f64>,

    /// Rolling window for movement baselines (minutes)
    #[arg(long, value_name = "MINUTES")]
    pub window_minutes: Option<usize>,

    /// Grid points per axis
    #[arg(long, value_name = "N")]
    pub grid_resolution: Option<usize>,
}

#[derive(clap::Args, Debug, Clone)]
pub struct BgpArgs {
    /// ISO country code (US, CN, RU, etc.)
    #[arg(long, value_name = "ISO2", env = "INFLUENCE_TERRAIN_COUNTRY")]
    pub country: Option<String>,

    /// Number of ASes to sample
    #[arg(long, value_name = "N")]
    pub sample_size: Option<usize>,

    /// Load from cached data if available
    #[arg(long)]
    pub use_cache: bool,

    /// Cache directory
    #[arg(long, value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,

    /// RIPE Stat base URL
    #[arg(long, value_name = "URL", env = "RIPE_STAT_URL")]
    pub ripe_url: Option<String>,

    /// Betweenness percentile for single points of failure
    #[arg(long, value_name = "PCT")]
    pub spof_percentile: Option<f64>,

    /// Simulate removal of the top-K single points of failure
    #[arg(long, default_value = "0", value_name = "K")]
    pub simulate_top: usize,

    /// Output results JSON
    #[arg(
        short,
        long,
        default_value = "bgp_analysis_results.json",
        value_name = "FILE"
    )]
    pub output: PathBuf,

    /// Optional Markdown report
    #[arg(long, value_name = "FILE")]
    pub report: Option<PathBuf>,
}

#[derive(clap::Args, Debug, Clone)]
pub struct IntegrateArgs {
    /// BGP results JSON (macro layer)
    #[arg(long, default_value = "bgp_analysis_results.json", value_name = "FILE")]
    pub bgp_results: PathBuf,

    /// Spatial summary JSON (micro layer)
    #[arg(
        long,
        default_value = "spatial_analysis_summary.json",
        value_name = "FILE"
    )]
    pub ble_results: PathBuf,

    /// Output integrated results JSON
    #[arg(short, long, default_value = "dual_layer_results.json", value_name = "FILE")]
    pub output: PathBuf,

    /// Fail instead of using demonstration data when an input is missing
    #[arg(long)]
    pub strict: bool,

    /// Fail if the terrain level is at or above this level
    ///
    /// Useful for CI pipelines. Exit code 2 when threshold is met.
    /// Values: low, moderate, high
    #[arg(long, value_name = "LEVEL")]
    pub fail_on: Option<FailOnLevel>,

    /// Optional Markdown report
    #[arg(long, value_name = "FILE")]
    pub report: Option<PathBuf>,
}

/// Terrain level for --fail-on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, clap::ValueEnum)]
pub enum FailOnLevel {
    Low,
    Moderate,
    High,
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        match &self.command {
            Command::Capture(c) => {
                if let Some(hours) = c.duration {
                    check_duration(hours)?;
                }
                if let Some(ref replay) = c.replay {
                    check_file(replay)?;
                }
            }
            Command::Analyze(a) => check_file(&a.input)?,
            Command::Spatial(s) => {
                check_file(&s.input)?;
                if let Some(ref positions) = s.positions {
                    check_file(positions)?;
                }
                if let Some(threshold) = s.threshold_db {
                    if !(threshold > 0.0) {
                        return Err("Threshold must be greater than 0 dB".to_string());
                    }
                }
                if s.window_minutes == Some(0) {
                    return Err("Window must be at least 1 minute".to_string());
                }
                if matches!(s.grid_resolution, Some(n) if n < 2) {
                    return Err("Grid resolution must be at least 2".to_string());
                }
            }
            Command::Bgp(b) => {
                if let Some(ref country) = b.country {
                    check_country(country)?;
                }
                if b.sample_size == Some(0) {
                    return Err("Sample size must be at least 1".to_string());
                }
                if let Some(ref url) = b.ripe_url {
                    check_ripe_url(url)?;
                }
                if let Some(pct) = b.spof_percentile {
                    check_percentile(pct)?;
                }
            }
            Command::Integrate(_) | Command::InitConfig => {}
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    ///
    /// `verbose_default` comes from the config file; `--quiet` overrides it.
    pub fn log_level(&self, verbose_default: bool) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose || verbose_default {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}

/// Capture duration in hours, bounded above.
pub fn check_duration(hours: f64) -> Result<(), String> {
    if !(hours > 0.0 && hours <= MAX_DURATION_HOURS) {
        return Err(format!(
            "Duration must be greater than 0 and at most {} hours, got {}",
            MAX_DURATION_HOURS, hours
        ));
    }
    Ok(())
}

/// ISO 3166 alpha-2 code, any case.
pub fn check_country(country: &str) -> Result<(), String> {
    if country.len() != 2 || !country.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(format!(
            "Country must be a 2-letter ISO code, got '{}'",
            country
        ));
    }
    Ok(())
}

pub fn check_ripe_url(url: &str) -> Result<(), String> {
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err("RIPE Stat URL must start with 'http://' or 'https://'".to_string());
    }
    Ok(())
}

pub fn check_percentile(pct: f64) -> Result<(), String> {
    if !(pct > 0.0 && pct <= 100.0) {
        return Err("SPOF percentile must be in (0, 100]".to_string());
    }
    Ok(())
}

fn check_file(path: &Path) -> Result<(), String> {
    if !path.exists() {
        return Err(format!("File does not exist: {}", path.display()));
    }
    if !path.is_file() {
        return Err(format!("Path is not a file: {}", path.display()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_args(command: Command) -> Args {
        Args {
            command,
            config: None,
            verbose: false,
            quiet: false,
        }
    }

    fn bgp_args() -> BgpArgs {
        BgpArgs {
            country: Some("US".to_string()),
            sample_size: Some(50),
            use_cache: false,
            cache_dir: None,
            ripe_url: None,
            spof_percentile: None,
            simulate_top: 0,
            output: PathBuf::from("bgp.json"),
            report: None,
        }
    }

    #[test]
    fn test_parse_subcommands() {
        let args = Args::try_parse_from([
            "influence-terrain",
            "bgp",
            "--country",
            "DE",
            "--sample-size",
            "10",
            "--use-cache",
        ])
        .unwrap();
        match args.command {
            Command::Bgp(b) => {
                assert_eq!(b.country.as_deref(), Some("DE"));
                assert_eq!(b.sample_size, Some(10));
                assert!(b.use_cache);
            }
            other => panic!("unexpected command {:?}", other),
        }

        let args = Args::try_parse_from(["influence-terrain", "integrate", "--fail-on", "moderate", "-v"])
            .unwrap();
        assert!(args.verbose);
        match args.command {
            Command::Integrate(i) => assert_eq!(i.fail_on, Some(FailOnLevel::Moderate)),
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_validation_bad_country() {
        let mut b = bgp_args();
        b.country = Some("USA".to_string());
        assert!(make_args(Command::Bgp(b)).validate().is_err());

        let mut b = bgp_args();
        b.country = Some("u1".to_string());
        assert!(make_args(Command::Bgp(b)).validate().is_err());

        assert!(make_args(Command::Bgp(bgp_args())).validate().is_ok());
    }

    #[test]
    fn test_validation_zero_sample() {
        let mut b = bgp_args();
        b.sample_size = Some(0);
        assert!(make_args(Command::Bgp(b)).validate().is_err());
    }

    #[test]
    fn test_validation_missing_input() {
        let args = make_args(Command::Analyze(AnalyzeArgs {
            input: PathBuf::from("/definitely/not/here.csv"),
            output: PathBuf::from("out.json"),
            report: None,
            rotation_gap_minutes: None,
        }));
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validation_conflicting_options() {
        let mut args = make_args(Command::InitConfig);
        args.verbose = true;
        args.quiet = true;
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validation_capture_duration() {
        let args = make_args(Command::Capture(CaptureArgs {
            duration: Some(0.0),
            airtag_only: false,
            output: None,
            replay: None,
        }));
        assert!(args.validate().is_err());

        for hours in [1e300, f64::INFINITY] {
            let args = make_args(Command::Capture(CaptureArgs {
                duration: Some(hours),
                airtag_only: false,
                output: None,
                replay: None,
            }));
            assert!(args.validate().is_err());
        }
    }

    #[test]
    fn test_log_level() {
        let mut args = make_args(Command::InitConfig);
        assert_eq!(args.log_level(false), tracing::Level::INFO);
        assert_eq!(args.log_level(true), tracing::Level::DEBUG);

        args.verbose = true;
        assert_eq!(args.log_level(false), tracing::Level::DEBUG);

        args.verbose = false;
        args.quiet = true;
        assert_eq!(args.log_level(true), tracing::Level::ERROR);
    }
}
