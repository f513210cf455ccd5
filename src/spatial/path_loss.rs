//! Log-distance path-loss model.

use crate::config::PathLossConfig;

/// `d = 10^((rssi_1m - rssi) / (10 n))`, in metres.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PathLossModel {
    /// Reference RSSI at one metre (dBm).
    pub rssi_at_1m: f64,
    /// Path-loss exponent.
    pub exponent: f64,
}

impl Default for PathLossModel {
    fn default() -> Self {
        PathLossConfig::default().into()
    }
}

impl From<PathLossConfig> for PathLossModel {
    fn from(config: PathLossConfig) -> Self {
        Self {
            rssi_at_1m: config.rssi_at_1m,
            exponent: config.exponent,
        }
    }
}

impl PathLossModel {
    /// Estimated distance for a measured RSSI.
    pub fn distance(&self, rssi: f64) -> f64 {
        let exponent = (self.rssi_at_1m - rssi) / (10.0 * self.exponent);
        10.0_f64.powf(exponent)
    }
}
