//! Capture session: classify advertisements and append them to a CSV file.

use super::classify::{classify, decode_manufacturer_data};
use crate::config::CaptureConfig;
use crate::error::{Result, TerrainError};
use crate::models::{short_mac, Advertisement, CaptureRecord};
use chrono::{Local, NaiveDateTime};
use futures::{Stream, StreamExt};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Column order of capture files.
pub const CSV_HEADER: [&str; 11] = [
    "timestamp",
    "mac_address",
    "rssi",
    "local_name",
    "device_type",
    "manufacturer_id",
    "manufacturer_data_hex",
    "service_uuids",
    "tx_power",
    "is_airtag",
    "airtag_status_byte",
];

/// Settings for one capture run.
#[derive(Debug, Clone)]
pub struct CaptureOptions {
    pub duration: Duration,
    pub airtag_only: bool,
    pub progress_every: usize,
    pub status_interval: Duration,
}

/// Longest accepted capture, in hours.
pub const MAX_DURATION_HOURS: f64 = 24.0 * 366.0;

impl TryFrom<&CaptureConfig> for CaptureOptions {
    type Error = TerrainError;

    fn try_from(config: &CaptureConfig) -> Result<Self> {
        let hours = config.duration_hours;
        if !(hours > 0.0 && hours <= MAX_DURATION_HOURS) {
            return Err(TerrainError::InvalidInput(format!(
                "capture duration must be in (0, {}] hours, got {}",
                MAX_DURATION_HOURS, hours
            )));
        }
        let duration = Duration::try_from_secs_f64(hours * 3600.0).map_err(|e| {
            TerrainError::InvalidInput(format!("capture duration {} hours: {}", hours, e))
        })?;

        Ok(Self {
            duration,
            airtag_only: config.airtag_only,
            progress_every: config.progress_every.max(1),
            status_interval: Duration::from_secs(
                config.status_interval_minutes.max(1).saturating_mul(60),
            ),
        })
    }
}

/// Why a capture stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    DurationElapsed,
    Interrupted,
    SourceEnded,
}

/// Final totals of a capture run.
#[derive(Debug, Clone)]
pub struct CaptureSummary {
    pub total_packets: usize,
    pub unique_devices: usize,
    /// AirTag MACs with their written packet counts.
    pub airtags: BTreeMap<String, usize>,
    pub output: Option<PathBuf>,
    pub stop_reason: StopReason,
    pub elapsed: Duration,
}

/// An in-progress capture writing to `W`.
pub struct CaptureSession<W: Write> {
    writer: csv::Writer<W>,
    options: CaptureOptions,
    output: Option<PathBuf>,
    packet_counts: BTreeMap<String, usize>,
    airtags: BTreeSet<String>,
    total_packets: usize,
    started: Instant,
}

impl CaptureSession<File> {
    /// Create (truncating) the output file and write the header.
    pub fn create(path: &Path, options: CaptureOptions) -> Result<Self> {
        let file = File::create(path)?;
        let mut session = Self::new(file, options)?;
        session.output = Some(path.to_path_buf());
        info!("Writing capture to {}", path.display());
        Ok(session)
    }
}

impl<W: Write> CaptureSession<W> {
    /// Start a session on an arbitrary writer. The header is written immediately.
    pub fn new(writer: W, options: CaptureOptions) -> Result<Self> {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(writer);
        writer.write_record(CSV_HEADER)?;
        writer.flush()?;

        Ok(Self {
            writer,
            options,
            output: None,
            packet_counts: BTreeMap::new(),
            airtags: BTreeSet::new(),
            total_packets: 0,
            started: Instant::now(),
        })
    }

    /// Classify and record one advertisement. Returns whether a row was written.
    pub fn record(&mut self, advert: Advertisement, timestamp: NaiveDateTime) -> Result<bool> {
        let manufacturer = decode_manufacturer_data(&advert.manufacturer_data);
        let class = classify(manufacturer.as_ref(), advert.local_name.as_deref());

        if class.is_airtag() {
            self.airtags.insert(advert.address.clone());
        }
        if self.options.airtag_only && !class.is_airtag() {
            return Ok(false);
        }

        let record = CaptureRecord {
            timestamp,
            mac_address: advert.address,
            rssi: advert.rssi,
            local_name: advert.local_name.unwrap_or_default(),
            device_type: class.kind.clone(),
            manufacturer_id: manufacturer.as_ref().map(|m| m.company_id),
            manufacturer_data_hex: manufacturer.map(|m| m.hex).unwrap_or_default(),
            service_uuids: advert.service_uuids.join(";"),
            tx_power: advert.tx_power,
            is_airtag: class.is_airtag(),
            airtag_status_byte: class.status_hex(),
        };

        self.writer.serialize(&record)?;
        self.writer.flush()?;

        *self
            .packet_counts
            .entry(record.mac_address)
            .or_insert(0) += 1;
        self.total_packets += 1;

        if self.total_packets % self.options.progress_every == 0 {
            info!(
                "Packets: {} | Devices: {} | AirTags: {}",
                self.total_packets,
                self.packet_counts.len(),
                self.airtags.len()
            );
        }

        Ok(true)
    }

    /// Log elapsed time, totals and per-AirTag packet counts.
    pub fn log_status(&self) {
        let hours = self.started.elapsed().as_secs_f64() / 3600.0;
        info!(
            "Status after {:.2}h: {} packets from {} devices",
            hours,
            self.total_packets,
            self.packet_counts.len()
        );
        for mac in &self.airtags {
            let count = self.packet_counts.get(mac).copied().unwrap_or(0);
            info!("  AirTag {}: {} packets", short_mac(mac), count);
        }
    }

    /// Consume advertisements until the duration elapses, `shutdown`
    /// resolves, or the stream ends.
    pub async fn run<S, F>(mut self, stream: S, shutdown: F) -> Result<CaptureSummary>
    where
        S: Stream<Item = Advertisement>,
        F: Future<Output = ()>,
    {
        tokio::pin!(stream);
        tokio::pin!(shutdown);
        let deadline = tokio::time::sleep(self.options.duration);
        tokio::pin!(deadline);

        let mut status = tokio::time::interval(self.options.status_interval);
        status.tick().await;

        let stop_reason = loop {
            tokio::select! {
                next = stream.next() => match next {
                    Some(advert) => {
                        self.record(advert, Local::now().naive_local())?;
                    }
                    None => {
                        info!("Advertisement source ended");
                        break StopReason::SourceEnded;
                    }
                },
                _ = &mut deadline => {
                    info!("Capture duration elapsed");
                    break StopReason::DurationElapsed;
                }
                _ = &mut shutdown => {
                    warn!("Capture interrupted");
                    break StopReason::Interrupted;
                }
                _ = status.tick() => self.log_status(),
            }
        };

        self.finish(stop_reason)
    }

    /// Flush the writer and build the summary.
    pub fn finish(mut self, stop_reason: StopReason) -> Result<CaptureSummary> {
        self.writer.flush()?;

        let airtags = self
            .airtags
            .iter()
            .map(|mac| (mac.clone(), self.packet_counts.get(mac).copied().unwrap_or(0)))
            .collect();

        Ok(CaptureSummary {
            total_packets: self.total_packets,
            unique_devices: self.packet_counts.len(),
            airtags,
            output: self.output,
            stop_reason,
            elapsed: self.started.elapsed(),
        })
    }
}
