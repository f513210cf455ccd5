//! Capture CSV loading and per-device grouping.

use crate::error::{Result, TerrainError};
use crate::models::CaptureRecord;
use chrono::NaiveDateTime;
use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use tracing::{debug, info};

/// A loaded capture file.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub records: Vec<CaptureRecord>,
    start: NaiveDateTime,
    end: NaiveDateTime,
}

/// Packets of one MAC address, sorted by time.
#[derive(Debug, Clone)]
pub struct MacGroup<'a> {
    pub mac: &'a str,
    pub packets: Vec<&'a CaptureRecord>,
}

impl<'a> MacGroup<'a> {
    pub fn rssi(&self) -> Vec<f64> {
        self.packets.iter().map(|p| p.rssi as f64).collect()
    }

    /// Seconds between consecutive packets.
    pub fn intervals(&self) -> Vec<f64> {
        intervals(&self.packets)
    }

    pub fn first_seen(&self) -> Option<NaiveDateTime> {
        self.packets.first().map(|p| p.timestamp)
    }

    pub fn last_seen(&self) -> Option<NaiveDateTime> {
        self.packets.last().map(|p| p.timestamp)
    }
}

impl Dataset {
    /// Load a capture CSV from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        let dataset = Self::from_reader(file)?;
        info!(
            "Loaded {} packets from {} ({:.2} hours)",
            dataset.len(),
            path.display(),
            dataset.duration_hours()
        );
        Ok(dataset)
    }

    /// Parse capture rows from any reader.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut reader = csv::Reader::from_reader(reader);
        let mut records = Vec::new();

        for row in reader.deserialize::<CaptureRecord>() {
            let record = row.map_err(|e| {
                let line = e.position().map(|p| p.line()).unwrap_or(0);
                TerrainError::InvalidRecord {
                    line,
                    reason: e.to_string(),
                }
            })?;
            records.push(record);
        }

        debug!("Parsed {} capture rows", records.len());
        Self::from_records(records)
    }

    /// Build a dataset from records already in memory.
    pub fn from_records(records: Vec<CaptureRecord>) -> Result<Self> {
        let start = records.iter().map(|r| r.timestamp).min();
        let end = records.iter().map(|r| r.timestamp).max();
        match (start, end) {
            (Some(start), Some(end)) => Ok(Self {
                records,
                start,
                end,
            }),
            _ => Err(TerrainError::InvalidInput(
                "capture contains no packets".to_string(),
            )),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn start(&self) -> NaiveDateTime {
        self.start
    }

    pub fn end(&self) -> NaiveDateTime {
        self.end
    }

    /// Hours since the first packet of the capture.
    pub fn elapsed_hours(&self, record: &CaptureRecord) -> f64 {
        seconds_between(self.start, record.timestamp) / 3600.0
    }

    pub fn duration_hours(&self) -> f64 {
        seconds_between(self.start, self.end) / 3600.0
    }

    pub fn airtag_records(&self) -> Vec<&CaptureRecord> {
        self.records.iter().filter(|r| r.is_airtag).collect()
    }

    pub fn unique_macs(&self) -> usize {
        self.records
            .iter()
            .map(|r| r.mac_address.as_str())
            .collect::<std::collections::HashSet<_>>()
            .len()
    }
}

/// Group records by MAC in order of first appearance; each group is sorted by time.
pub fn group_by_mac<'a, I>(records: I) -> Vec<MacGroup<'a>>
where
    I: IntoIterator<Item = &'a CaptureRecord>,
{
    let mut index: HashMap<&'a str, usize> = HashMap::new();
    let mut groups: Vec<MacGroup<'a>> = Vec::new();

    for record in records {
        let mac = record.mac_address.as_str();
        let slot = *index.entry(mac).or_insert_with(|| {
            groups.push(MacGroup {
                mac,
                packets: Vec::new(),
            });
            groups.len() - 1
        });
        groups[slot].packets.push(record);
    }

    for group in &mut groups {
        group.packets.sort_by_key(|p| p.timestamp);
    }
    groups
}

/// Seconds between consecutive packets of a time-sorted slice.
pub fn intervals(packets: &[&CaptureRecord]) -> Vec<f64> {
    packets
        .windows(2)
        .map(|w| seconds_between(w[0].timestamp, w[1].timestamp))
        .collect()
}

/// Signed seconds from `a` to `b`, with microsecond resolution.
pub fn seconds_between(a: NaiveDateTime, b: NaiveDateTime) -> f64 {
    let delta = b - a;
    match delta.num_microseconds() {
        Some(us) => us as f64 / 1e6,
        None => delta.num_milliseconds() as f64 / 1e3,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "timestamp,mac_address,rssi,local_name,device_type,manufacturer_id,manufacturer_data_hex,service_uuids,tx_power,is_airtag,airtag_status_byte\n\
2024-03-01T10:00:00.000000,AA:00:00:00:00:01,-60,,AirTag,76,121900,,,true,0x12\n\
2024-03-01T10:00:10.000000,BB:00:00:00:00:02,-80,Govee_H5075,Govee IoT,,,,,false,\n\
2024-03-01T10:00:05.000000,AA:00:00:00:00:01,-62,,AirTag,76,121900,,,true,0x12\n\
2024-03-01T11:30:00.000000,AA:00:00:00:00:01,-61,,AirTag,76,121900,,,true,0x12\n";

    #[test]
    fn test_load_and_duration() {
        let ds = Dataset::from_reader(SAMPLE.as_bytes()).unwrap();
        assert_eq!(ds.len(), 4);
        assert_eq!(ds.unique_macs(), 2);
        assert!((ds.duration_hours() - 1.5).abs() < 1e-9);
        assert_eq!(ds.airtag_records().len(), 3);
    }

    #[test]
    fn test_group_by_mac_sorts_each_group() {
        let ds = Dataset::from_reader(SAMPLE.as_bytes()).unwrap();
        let groups = group_by_mac(&ds.records);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].mac, "AA:00:00:00:00:01");
        assert_eq!(groups[0].rssi(), vec![-60.0, -62.0, -61.0]);
        assert_eq!(groups[0].intervals(), vec![5.0, 5395.0]);
        assert_eq!(groups[1].packets.len(), 1);
        assert!(groups[1].intervals().is_empty());
    }

    #[test]
    fn test_empty_capture_is_rejected() {
        let header = SAMPLE.lines().next().unwrap();
        let err = Dataset::from_reader(header.as_bytes()).unwrap_err();
        assert!(matches!(err, TerrainError::InvalidInput(_)));
    }

    #[test]
    fn test_bad_row_reports_line() {
        let data = format!("{}not-a-time,AA,-1,,AirTag,,,,,true,\n", SAMPLE);
        match Dataset::from_reader(data.as_bytes()) {
            Err(TerrainError::InvalidRecord { line, .. }) => assert_eq!(line, 6),
            other => panic!("unexpected {:?}", other.map(|d| d.len())),
        }
    }
}
