//! Influence terrain mapping from AirTag RSSI observations.

use super::mds;
use super::path_loss::PathLossModel;
use crate::analysis::dataset::{group_by_mac, seconds_between, Dataset, MacGroup};
use crate::config::SpatialConfig;
use crate::error::{Result, TerrainError};
use crate::models::{
    short_mac, timestamp_format, CaptureRecord, CaptureTotals, Position, RssiStatistics,
    SpatialSummary,
};
use crate::stats::{centered_rolling, mean, median, min_max, sample_std};
use chrono::NaiveDateTime;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info, warn};

/// How device positions were obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionSource {
    Known,
    Mds,
}

/// An RSSI deviation from the rolling baseline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MovementEvent {
    #[serde(with = "timestamp_format")]
    pub timestamp: NaiveDateTime,
    pub mac: String,
    pub rssi: f64,
    pub baseline: f64,
    pub deviation: f64,
}

/// Normalised influence over a regular grid.
#[derive(Debug, Clone)]
pub struct InfluenceGrid {
    pub xs: Vec<f64>,
    pub ys: Vec<f64>,
    /// `values[row][col]`, row indexes `ys`.
    pub values: Vec<Vec<f64>>,
}

#[derive(Serialize)]
struct GridRow {
    x: f64,
    y: f64,
    influence: f64,
}

impl InfluenceGrid {
    /// Write `x,y,influence` rows.
    pub fn write_csv(&self, path: &Path) -> Result<()> {
        let mut writer = csv::Writer::from_path(path)?;
        for (row, y) in self.values.iter().zip(&self.ys) {
            for (influence, x) in row.iter().zip(&self.xs) {
                writer.serialize(GridRow {
                    x: *x,
                    y: *y,
                    influence: *influence,
                })?;
            }
        }
        writer.flush()?;
        Ok(())
    }
}

/// Maps AirTag packets to positions, movement events and a terrain grid.
pub struct InfluenceTerrainMapper {
    airtags: Vec<CaptureRecord>,
    macs: Vec<String>,
    baselines: BTreeMap<String, f64>,
    positions: BTreeMap<String, Position>,
    position_source: PositionSource,
    model: PathLossModel,
    config: SpatialConfig,
}

impl InfluenceTerrainMapper {
    /// Keep only AirTag rows and compute median baselines.
    pub fn new(dataset: Dataset, model: PathLossModel, config: SpatialConfig) -> Result<Self> {
        let airtags: Vec<CaptureRecord> = dataset
            .records
            .into_iter()
            .filter(|r| r.is_airtag)
            .collect();
        if airtags.is_empty() {
            return Err(TerrainError::NoAirTagData);
        }

        let mut baselines = BTreeMap::new();
        for group in group_by_mac(&airtags) {
            if let Some(m) = median(&group.rssi()) {
                baselines.insert(group.mac.to_string(), m);
            }
        }
        let macs: Vec<String> = baselines.keys().cloned().collect();

        info!(
            "Loaded {} AirTag packets from {} devices",
            airtags.len(),
            macs.len()
        );
        for (mac, rssi) in &baselines {
            debug!("Baseline {}: {:.1} dBm", short_mac(mac), rssi);
        }

        Ok(Self {
            airtags,
            macs,
            baselines,
            positions: BTreeMap::new(),
            position_source: PositionSource::Mds,
            model,
            config,
        })
    }

    /// AirTag MACs in ascending order.
    pub fn macs(&self) -> &[String] {
        &self.macs
    }

    pub fn baselines(&self) -> &BTreeMap<String, f64> {
        &self.baselines
    }

    pub fn positions(&self) -> &BTreeMap<String, Position> {
        &self.positions
    }

    pub fn position_source(&self) -> PositionSource {
        self.position_source
    }

    fn groups(&self) -> Vec<MacGroup<'_>> {
        let mut groups = group_by_mac(&self.airtags);
        groups.sort_by(|a, b| a.mac.cmp(b.mac));
        groups
    }

    /// Pairwise dissimilarities: path-loss distance of the weaker baseline.
    pub fn distance_matrix(&self) -> Vec<Vec<f64>> {
        let base: Vec<f64> = self.macs.iter().map(|m| self.baselines[m]).collect();
        let n = base.len();
        (0..n)
            .map(|i| {
                (0..n)
                    .map(|j| {
                        if i == j {
                            0.0
                        } else {
                            self.model.distance(base[i].min(base[j]))
                        }
                    })
                    .collect()
            })
            .collect()
    }

    /// Estimate relative positions with MDS, scaled to the configured extent.
    pub fn estimate_positions_mds(&mut self) -> Result<&BTreeMap<String, Position>> {
        let mut coords = mds::embed(&self.distance_matrix())?;
        mds::normalise_extent(&mut coords, self.config.mds_extent);

        self.positions = self
            .macs
            .iter()
            .zip(coords)
            .map(|(mac, [x, y])| (mac.clone(), Position::new(x, y)))
            .collect();
        self.position_source = PositionSource::Mds;

        for (mac, pos) in &self.positions {
            info!("  {}: ({:.2}, {:.2}) m", short_mac(mac), pos.x, pos.y);
        }
        Ok(&self.positions)
    }

    /// Use surveyed positions; MACs absent from the capture are dropped.
    ///
    /// Falls back to MDS when none of the given MACs were captured.
    pub fn use_known_positions(
        &mut self,
        known: BTreeMap<String, Position>,
    ) -> Result<&BTreeMap<String, Position>> {
        let mut kept = BTreeMap::new();
        for (mac, pos) in known {
            if self.baselines.contains_key(&mac) {
                kept.insert(mac, pos);
            } else {
                warn!("Ignoring known position for {}: not seen in capture", mac);
            }
        }

        if kept.is_empty() {
            warn!("No usable known positions; estimating with MDS");
            return self.estimate_positions_mds();
        }

        self.positions = kept;
        self.position_source = PositionSource::Known;
        Ok(&self.positions)
    }

    /// Packets deviating from the centred rolling median by more than the threshold.
    pub fn detect_movement_events(&self) -> Vec<MovementEvent> {
        let window = self.config.window_minutes * self.config.packets_per_minute;
        let threshold = self.config.threshold_db;
        let mut events = Vec::new();

        for group in self.groups() {
            let rssi = group.rssi();
            let rolling = centered_rolling(&rssi, window, median);
            let before = events.len();

            for ((packet, value), baseline) in group.packets.iter().zip(&rssi).zip(rolling) {
                let Some(baseline) = baseline else { continue };
                let deviation = (value - baseline).abs();
                if deviation > threshold {
                    events.push(MovementEvent {
                        timestamp: packet.timestamp,
                        mac: group.mac.to_string(),
                        rssi: *value,
                        baseline,
                        deviation,
                    });
                }
            }
            info!(
                "  {}: {} events detected",
                short_mac(group.mac),
                events.len() - before
            );
        }
        events
    }

    /// Sum of `1 / (1 + d²)` from each positioned device, normalised to [0, 1].
    pub fn influence_grid(&self) -> Result<InfluenceGrid> {
        if self.positions.is_empty() {
            return Err(TerrainError::InvalidInput(
                "no device positions; estimate or load positions first".to_string(),
            ));
        }
        let resolution = self.config.grid_resolution.max(2);
        let margin = self.config.grid_margin;

        let xs_dev: Vec<f64> = self.positions.values().map(|p| p.x).collect();
        let ys_dev: Vec<f64> = self.positions.values().map(|p| p.y).collect();
        let (x_min, x_max) = min_max(&xs_dev).unwrap_or((0.0, 0.0));
        let (y_min, y_max) = min_max(&ys_dev).unwrap_or((0.0, 0.0));

        let xs = linspace(x_min - margin, x_max + margin, resolution);
        let ys = linspace(y_min - margin, y_max + margin, resolution);

        let mut values: Vec<Vec<f64>> = ys
            .iter()
            .map(|&y| {
                xs.iter()
                    .map(|&x| {
                        let here = Position::new(x, y);
                        self.positions
                            .values()
                            .map(|p| 1.0 / (1.0 + here.distance_to(p).powi(2)))
                            .sum()
                    })
                    .collect()
            })
            .collect();

        let max = values.iter().flatten().copied().fold(0.0, f64::max);
        if max > 0.0 {
            values
                .iter_mut()
                .flatten()
                .for_each(|v| *v /= max);
        }

        Ok(InfluenceGrid { xs, ys, values })
    }

    /// Build the summary document consumed by integration.
    pub fn summary(&self, events: &[MovementEvent]) -> SpatialSummary {
        let first = self.airtags.iter().map(|r| r.timestamp).min();
        let last = self.airtags.iter().map(|r| r.timestamp).max();
        let duration_hours = match (first, last) {
            (Some(a), Some(b)) => seconds_between(a, b) / 3600.0,
            _ => 0.0,
        };

        let mut rssi_statistics = BTreeMap::new();
        for group in self.groups() {
            let rssi = group.rssi();
            let (min, max) = min_max(&rssi).unwrap_or((0.0, 0.0));
            rssi_statistics.insert(
                short_mac(group.mac).to_string(),
                RssiStatistics {
                    mean: mean(&rssi).unwrap_or(0.0),
                    std: sample_std(&rssi).unwrap_or(0.0),
                    min,
                    max,
                },
            );
        }

        let mut movement_events: BTreeMap<String, usize> = self
            .macs
            .iter()
            .map(|m| (short_mac(m).to_string(), 0))
            .collect();
        for event in events {
            *movement_events
                .entry(short_mac(&event.mac).to_string())
                .or_insert(0) += 1;
        }

        SpatialSummary {
            capture_summary: CaptureTotals {
                total_packets: self.airtags.len(),
                n_devices: self.macs.len(),
                duration_hours,
            },
            device_positions: self
                .positions
                .iter()
                .map(|(mac, pos)| (short_mac(mac).to_string(), *pos))
                .collect(),
            rssi_baselines: self
                .baselines
                .iter()
                .map(|(mac, b)| (short_mac(mac).to_string(), *b))
                .collect(),
            rssi_statistics,
            movement_events,
        }
    }
}

fn linspace(start: f64, end: f64, n: usize) -> Vec<f64> {
    if n == 1 {
        return vec![start];
    }
    let step = (end - start) / (n - 1) as f64;
    (0..n).map(|i| start + step * i as f64).collect()
}

/// Read `{"MAC": [x, y], ...}`.
pub fn load_known_positions(path: &Path) -> Result<BTreeMap<String, Position>> {
    let content = std::fs::read_to_string(path)?;
    let raw: BTreeMap<String, [f64; 2]> = serde_json::from_str(&content)?;
    Ok(raw
        .into_iter()
        .map(|(mac, [x, y])| (mac, Position::new(x, y)))
        .collect())
}

/// Read a summary written by the spatial stage.
pub fn load_summary(path: &Path) -> Result<SpatialSummary> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

/// Write movement events as CSV.
pub fn write_events_csv(events: &[MovementEvent], path: &Path) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    for event in events {
        writer.serialize(event)?;
    }
    writer.flush()?;
    Ok(())
}
