//! Manufacturer-data decoding and device classification.

use crate::models::{DeviceKind, APPLE_COMPANY_ID};
use std::collections::BTreeMap;

/// AirTag status bytes observed in the first manufacturer-data byte.
pub const AIRTAG_STATUS_BYTES: [u8; 4] = [0x07, 0x12, 0x1C, 0x01];

/// Decoded manufacturer payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManufacturerPayload<'a> {
    pub company_id: u16,
    pub hex: String,
    pub bytes: &'a [u8],
}

/// Result of classifying an advertiser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub kind: DeviceKind,
    /// Status byte for Apple payloads long enough to carry one.
    pub status_byte: Option<u8>,
}

impl Classification {
    fn plain(kind: DeviceKind) -> Self {
        Self {
            kind,
            status_byte: None,
        }
    }

    pub fn is_airtag(&self) -> bool {
        self.kind == DeviceKind::AirTag
    }

    /// Status byte formatted as `0x12`, or empty.
    pub fn status_hex(&self) -> String {
        self.status_byte
            .map(|b| format!("0x{:02x}", b))
            .unwrap_or_default()
    }
}

/// Pick the manufacturer entry with the lowest company id.
pub fn decode_manufacturer_data(data: &BTreeMap<u16, Vec<u8>>) -> Option<ManufacturerPayload<'_>> {
    data.iter().next().map(|(id, bytes)| ManufacturerPayload {
        company_id: *id,
        hex: to_hex(bytes),
        bytes: bytes.as_slice(),
    })
}

/// Lowercase hex encoding.
pub fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn known_manufacturer(company_id: u16) -> Option<DeviceKind> {
    match company_id {
        6 => Some(DeviceKind::Microsoft),
        89 => Some(DeviceKind::Xiaomi),
        224 => Some(DeviceKind::Google),
        117 => Some(DeviceKind::Samsung),
        529 => Some(DeviceKind::Tile),
        34818 | 34819 => Some(DeviceKind::Govee),
        _ => None,
    }
}

/// Classify an advertiser from its manufacturer data and local name.
pub fn classify(
    manufacturer: Option<&ManufacturerPayload<'_>>,
    local_name: Option<&str>,
) -> Classification {
    if let Some(payload) = manufacturer {
        if payload.company_id == APPLE_COMPANY_ID {
            if payload.bytes.len() > 2 {
                let status = payload.bytes[0];
                let kind = if AIRTAG_STATUS_BYTES.contains(&status) {
                    DeviceKind::AirTag
                } else {
                    DeviceKind::AppleOther
                };
                return Classification {
                    kind,
                    status_byte: Some(status),
                };
            }
            return Classification::plain(DeviceKind::AppleUnknown);
        }

        if let Some(kind) = known_manufacturer(payload.company_id) {
            return Classification::plain(kind);
        }
    }

    let name = local_name.unwrap_or("");
    if name.contains("Govee") {
        Classification::plain(DeviceKind::GoveeIot)
    } else if name.contains("DESKTOP") || name.contains("PC") {
        Classification::plain(DeviceKind::WindowsPc)
    } else {
        Classification::plain(DeviceKind::Unknown)
    }
}
