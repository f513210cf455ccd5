//! Advertisement sources for a capture session.
//!
//! A source is any stream of [`Advertisement`]s. Two are provided: a replay
//! of a JSON-lines file, and a live btleplug central when the crate is built
//! with the `bluetooth` feature.

use crate::error::{Result, TerrainError};
use crate::models::Advertisement;
use futures::stream::{self, BoxStream, StreamExt};
use std::path::Path;
use tracing::{debug, info};

/// Boxed advertisement stream consumed by [`super::CaptureSession`].
pub type AdvertisementStream = BoxStream<'static, Advertisement>;

/// Parse a JSON-lines document of advertisements. Blank lines are skipped.
pub fn parse_replay(content: &str) -> Result<Vec<Advertisement>> {
    let mut adverts = Vec::new();
    for (idx, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let advert: Advertisement =
            serde_json::from_str(line).map_err(|e| TerrainError::InvalidRecord {
                line: idx as u64 + 1,
                reason: e.to_string(),
            })?;
        adverts.push(advert);
    }
    Ok(adverts)
}

/// Replay advertisements recorded in a JSON-lines file.
pub fn replay(path: &Path) -> Result<AdvertisementStream> {
    let content = std::fs::read_to_string(path)?;
    let adverts = parse_replay(&content)?;
    info!(
        "Replaying {} advertisements from {}",
        adverts.len(),
        path.display()
    );
    Ok(stream::iter(adverts).boxed())
}

/// Scan with the first Bluetooth adapter.
#[cfg(feature = "bluetooth")]
pub async fn bluetooth() -> Result<AdvertisementStream> {
    use btleplug::api::{Central, CentralEvent, Manager as _, Peripheral as _, ScanFilter};
    use btleplug::platform::Manager;

    let manager = Manager::new().await?;
    let central = manager
        .adapters()
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| TerrainError::Bluetooth("no Bluetooth adapter found".to_string()))?;

    let events = central.events().await?;
    central.start_scan(ScanFilter::default()).await?;
    info!("Scanning for BLE advertisements");

    let stream = events.filter_map(move |event| {
        let central = central.clone();
        async move {
            let id = match event {
                CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => id,
                _ => return None,
            };
            let peripheral = central.peripheral(&id).await.ok()?;
            let props = peripheral.properties().await.ok()??;
            let Some(rssi) = props.rssi else {
                debug!("Skipping {} without RSSI", props.address);
                return None;
            };

            Some(Advertisement {
                address: props.address.to_string(),
                rssi,
                local_name: props.local_name,
                manufacturer_data: props.manufacturer_data.into_iter().collect(),
                service_uuids: props.services.iter().map(|u| u.to_string()).collect(),
                tx_power: props.tx_power_level,
            })
        }
    });

    Ok(stream.boxed())
}

/// Live scanning needs the `bluetooth` feature.
#[cfg(not(feature = "bluetooth"))]
pub async fn bluetooth() -> Result<AdvertisementStream> {
    debug!("Built without the bluetooth feature");
    Err(TerrainError::Unsupported(
        "live scanning requires building with `--features bluetooth`; use --replay <FILE>"
            .to_string(),
    ))
}
