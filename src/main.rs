//! influence-terrain - dual-layer infrastructure influence analysis
//!
//! Passive BLE/IoT monitoring (micro layer) and BGP/AS topology analysis
//! (macro layer), combined into an influence terrain score.
//!
//! Exit codes:
//!   0 - Success (terrain level below --fail-on, or no --fail-on set)
//!   1 - Runtime error (missing input, network, config, etc.)
//!   2 - Terrain level at or above --fail-on threshold

mod analysis;
mod bgp;
mod ble;
mod cli;
mod config;
mod error;
mod integration;
mod models;
mod report;
mod spatial;
mod stats;

use anyhow::{Context, Result};
use cli::{AnalyzeArgs, Args, BgpArgs, CaptureArgs, Command, FailOnLevel, IntegrateArgs, SpatialArgs};
use config::Config;
use integration::TerrainLevel;
use std::path::PathBuf;
use tracing::{debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle init-config early (no logging needed)
    if matches!(args.command, Command::InitConfig) {
        return handle_init_config();
    }

    // Load configuration before logging so the file can set verbosity
    let (mut config, config_source) = match load_config(&args) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    };
    config.merge_with_args(&args);
    if let Err(e) = config.validate() {
        eprintln!("Error: invalid configuration ({}): {}", config_source, e);
        std::process::exit(1);
    }

    // Initialize logging
    init_logging(&args, &config);

    info!("influence-terrain v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration: {}", config_source);
    debug!("Arguments: {:?}", args);

    match run(args, config).await {
        Ok(exit_code) => {
            std::process::exit(exit_code);
        }
        Err(e) => {
            error!("Run failed: {:#}", e);
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Handle init-config: generate a default .influence-terrain.toml.
fn handle_init_config() -> Result<()> {
    let path = std::path::Path::new(config::CONFIG_FILE_NAME);

    if path.exists() {
        eprintln!(
            "⚠️  {} already exists. Remove it first or edit it manually.",
            config::CONFIG_FILE_NAME
        );
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content)
        .with_context(|| format!("Failed to write {}", config::CONFIG_FILE_NAME))?;

    println!(
        "✅ Created {} with default settings.",
        config::CONFIG_FILE_NAME
    );
    println!("   Edit it to customize path loss, thresholds, country, weights, and more.");
    Ok(())
}

/// Initialize logging based on verbosity settings.
fn init_logging(args: &Args, config: &Config) {
    let level = args.log_level(config.general.verbose);

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }
}

/// Dispatch the selected stage. Returns the exit code (0 or 2).
async fn run(args: Args, config: Config) -> Result<i32> {
    match args.command {
        Command::Capture(ref c) => run_capture(c, &config).await,
        Command::Analyze(ref a) => run_analyze(a, &config),
        Command::Spatial(ref s) => run_spatial(s, &config),
        Command::Bgp(ref b) => run_bgp(b, &config).await,
        Command::Integrate(ref i) => run_integrate(i, &config),
        Command::InitConfig => Ok(0),
    }
}

/// Stage 1: passive BLE capture.
async fn run_capture(args: &CaptureArgs, config: &Config) -> Result<i32> {
    let options = ble::CaptureOptions::try_from(&config.capture)?;
    let output = PathBuf::from(&config.capture.output);

    println!("📡 Starting passive BLE capture");
    println!("   Duration: {} hours", config.capture.duration_hours);
    println!(
        "   Filter: {}",
        if options.airtag_only {
            "AirTags only"
        } else {
            "all devices"
        }
    );
    println!("   Output: {}", output.display());

    let stream = match args.replay {
        Some(ref path) => {
            println!("   Source: replay of {}", path.display());
            ble::source::replay(path).context("Failed to open replay file")?
        }
        None => {
            println!("   Source: Bluetooth adapter (Ctrl+C to stop)");
            ble::source::bluetooth()
                .await
                .context("Failed to start Bluetooth scan")?
        }
    };

    let session = ble::CaptureSession::create(&output, options)
        .with_context(|| format!("Failed to create {}", output.display()))?;
    let summary = session.run(stream, shutdown_signal()).await?;

    println!("\n📊 Capture Summary:");
    println!("   Stopped: {:?}", summary.stop_reason);
    println!("   Packets: {}", summary.total_packets);
    println!("   Unique devices: {}", summary.unique_devices);
    println!("   AirTags: {}", summary.airtags.len());
    for (mac, count) in &summary.airtags {
        println!("     📍 {}: {} packets", models::short_mac(mac), count);
    }
    println!("   Elapsed: {:.1}s", summary.elapsed.as_secs_f64());
    if let Some(ref path) = summary.output {
        println!("\n✅ Capture saved to: {}", path.display());
    }

    Ok(0)
}

/// Resolves on Ctrl+C. If the handler cannot be installed, never resolves.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Cannot listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
}

/// Stage 2a: BLE environment and continuity statistics.
fn run_analyze(args: &AnalyzeArgs, config: &Config) -> Result<i32> {
    println!("🔬 Analyzing capture: {}", args.input.display());

    let dataset = analysis::Dataset::load(&args.input)
        .with_context(|| format!("Failed to load capture {}", args.input.display()))?;
    let model = spatial::PathLossModel::from(config.path_loss);
    let result = analysis::run(&dataset, &config.analysis, &model);

    analysis::export(&result, &args.output)
        .with_context(|| format!("Failed to write {}", args.output.display()))?;

    if let Some(ref path) = args.report {
        let content = report::generate_analysis_report(&result, &args.input);
        report::write_report(&content, path)?;
        info!("Report written to {}", path.display());
    }

    let metrics = &result.key_metrics;
    println!("\n📊 Analysis Summary:");
    println!("   Duration: {:.2} hours", metrics.duration_hours);
    println!("   Packets: {}", metrics.total_packets);
    println!(
        "   AirTags: {} devices, {} packets ({:.1}%)",
        metrics.target_devices, metrics.target_packets, metrics.target_percent
    );
    println!("   Other devices: {}", metrics.noise_devices);
    match metrics.signal_to_noise {
        Some(snr) => println!("   Signal-to-noise: {:.3}", snr),
        None => println!("   Signal-to-noise: no non-target packets"),
    }
    if let Some(ref continuity) = result.continuity {
        println!(
            "   MAC rotations: {} | Logical devices: {}",
            continuity.rotation_events.len(),
            continuity.logical_devices
        );
    }
    println!("\n✅ Analysis saved to: {}", args.output.display());

    Ok(0)
}

/// Stage 2b: positions, movement events and the influence terrain grid.
fn run_spatial(args: &SpatialArgs, config: &Config) -> Result<i32> {
    println!("🗺️  Mapping influence terrain: {}", args.input.display());

    let dataset = analysis::Dataset::load(&args.input)
        .with_context(|| format!("Failed to load capture {}", args.input.display()))?;
    let mut mapper = spatial::InfluenceTerrainMapper::new(
        dataset,
        spatial::PathLossModel::from(config.path_loss),
        config.spatial.clone(),
    )?;

    match args.positions {
        Some(ref path) => {
            let known = spatial::terrain::load_known_positions(path)
                .with_context(|| format!("Failed to load positions {}", path.display()))?;
            mapper.use_known_positions(known)?;
        }
        None => {
            mapper.estimate_positions_mds()?;
        }
    }

    let events = mapper.detect_movement_events();
    info!("Detected {} movement events", events.len());
    if let Some(ref path) = args.events {
        spatial::terrain::write_events_csv(&events, path)
            .with_context(|| format!("Failed to write {}", path.display()))?;
    }

    let grid = mapper.influence_grid()?;
    grid.write_csv(&args.terrain)
        .with_context(|| format!("Failed to write {}", args.terrain.display()))?;

    let summary = mapper.summary(&events);
    report::write_json_report(&summary, &args.output)?;

    if let Some(ref path) = args.report {
        let content = report::generate_spatial_report(&summary, mapper.position_source(), &args.input);
        report::write_report(&content, path)?;
        info!("Report written to {}", path.display());
    }

    println!("\n📊 Spatial Summary:");
    println!("   Devices: {}", mapper.macs().len());
    println!("   AirTag packets: {}", summary.capture_summary.total_packets);
    println!("   Positions: {:?}", mapper.position_source());
    for (mac, pos) in mapper.positions() {
        match mapper.baselines().get(mac) {
            Some(baseline) => println!(
                "     📍 {}: ({:.2}, {:.2}) m, baseline {:.1} dBm",
                mac, pos.x, pos.y, baseline
            ),
            None => println!("     📍 {}: ({:.2}, {:.2}) m", mac, pos.x, pos.y),
        }
    }
    println!("   Movement events: {}", events.len());
    println!("   Terrain grid: {}", args.terrain.display());
    println!("\n✅ Summary saved to: {}", args.output.display());

    Ok(0)
}

/// Stage 3: AS topology for one country.
async fn run_bgp(args: &BgpArgs, config: &Config) -> Result<i32> {
    let bgp_config = &config.bgp;
    let client = bgp::RipeStatClient::new(bgp_config)?;
    let mut analyzer =
        bgp::BgpAnalyzer::new(bgp_config).with_progress(config.general.show_progress);

    println!("🌐 Analyzing AS topology for {}", analyzer.country());
    println!("   Sample size: {}", bgp_config.sample_size);
    println!("   RIPE Stat: {}", bgp_config.ripe_url);
    if args.use_cache {
        println!("   Cache: {}", bgp_config.cache_dir);
    }

    analyzer.build_graph(&client, args.use_cache).await?;
    println!(
        "   Country ASNs: {} | Graph: {} nodes, {} edges",
        analyzer.country_asns().len(),
        analyzer.graph().node_count(),
        analyzer.graph().edge_count()
    );

    let rows = analyzer
        .centrality()
        .context("Centrality analysis failed")?;
    let results = analyzer.results(&rows, args.simulate_top);

    bgp::export_results(&results, &args.output)
        .with_context(|| format!("Failed to write {}", args.output.display()))?;

    if let Some(ref path) = args.report {
        let content = report::generate_bgp_report(&results);
        report::write_report(&content, path)?;
        info!("Report written to {}", path.display());
    }

    println!("\n📊 Topology Summary:");
    println!("   Total ASNs: {}", results.metadata.total_asns);
    println!("   Single points of failure: {}", results.spof_count);
    for row in results.top_critical_ases.iter().take(5) {
        println!(
            "     🔗 AS{}: betweenness {:.4}, degree {:.4}",
            row.asn, row.betweenness, row.degree
        );
    }
    for impact in &results.removal_impacts {
        println!(
            "     ✂️  AS{} removed: {:.1}% connectivity loss, +{} components",
            impact.asn,
            impact.connectivity_loss * 100.0,
            impact.components_created
        );
    }
    println!("\n✅ Results saved to: {}", args.output.display());

    Ok(0)
}

/// Stage 4: dual-layer scoring.
fn run_integrate(args: &IntegrateArgs, config: &Config) -> Result<i32> {
    println!("🧩 Integrating macro and micro layers");

    let inputs = integration::load_inputs(&args.bgp_results, &args.ble_results, args.strict)?;
    let results = integration::integrate(&inputs, &config.integration)?;

    integration::export_results(&results, &args.output)
        .with_context(|| format!("Failed to write {}", args.output.display()))?;

    if let Some(ref path) = args.report {
        let content = report::generate_integration_report(&results);
        report::write_report(&content, path)?;
        info!("Report written to {}", path.display());
    }

    let metrics = &results.influence_metrics;
    let level = results.level();
    println!("\n📊 Influence Metrics:");
    println!(
        "   Macro fragility index: {}",
        metrics.macro_layer.fragility_index
    );
    println!(
        "   Micro stability index: {} dBm",
        metrics.micro_layer.signal_stability_index
    );
    println!(
        "   Composite influence score: {}",
        metrics.integrated.influence_terrain_score
    );
    println!("   {} {}", level.emoji(), metrics.integrated.interpretation);
    println!("\n✅ Integrated results saved to: {}", args.output.display());

    // Check --fail-on threshold
    if let Some(fail_level) = args.fail_on {
        if level >= fail_on_to_level(fail_level) {
            eprintln!(
                "\n⛔ Terrain level {} is at or above {:?}. Failing (exit code 2).",
                level, fail_level
            );
            return Ok(2);
        }
    }

    Ok(0)
}

/// Convert FailOnLevel to TerrainLevel for comparison.
fn fail_on_to_level(level: FailOnLevel) -> TerrainLevel {
    match level {
        FailOnLevel::Low => TerrainLevel::Low,
        FailOnLevel::Moderate => TerrainLevel::Moderate,
        FailOnLevel::High => TerrainLevel::High,
    }
}

/// Load configuration from file or use defaults, with a description of
/// where it came from.
fn load_config(args: &Args) -> Result<(Config, String)> {
    // Try explicit config path
    if let Some(ref config_path) = args.config {
        let config = Config::load(config_path)?;
        return Ok((config, config_path.display().to_string()));
    }

    // Try default location
    match Config::load_default() {
        Ok(Some(config)) => Ok((config, config::CONFIG_FILE_NAME.to_string())),
        Ok(None) => Ok((Config::default(), "built-in defaults".to_string())),
        Err(e) => {
            eprintln!(
                "⚠️  Failed to load {}: {:#}. Using defaults.",
                config::CONFIG_FILE_NAME,
                e
            );
            Ok((Config::default(), "built-in defaults".to_string()))
        }
    }
}
