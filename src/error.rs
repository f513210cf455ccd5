//! Error types shared by the pipeline stages.
//!
//! Stage modules return [`TerrainError`]; the command handlers in `main`
//! wrap these in `anyhow` with additional context.

use thiserror::Error;

/// Errors produced by capture, analysis, topology and integration code.
#[derive(Debug, Error)]
pub enum TerrainError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("request failed: {0}")]
    Request(String),

    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },

    /// A capture row could not be interpreted.
    #[error("invalid record at line {line}: {reason}")]
    InvalidRecord { line: u64, reason: String },

    #[error("no AirTag data found in capture")]
    NoAirTagData,

    #[error("AS graph is empty; fetch relationships or load a cache first")]
    EmptyGraph,

    #[error("{algorithm} failed to converge after {iterations} iterations")]
    Convergence {
        algorithm: &'static str,
        iterations: usize,
    },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("bluetooth error: {0}")]
    #[cfg_attr(not(feature = "bluetooth"), allow(dead_code))]
    Bluetooth(String),

    #[error("unsupported: {0}")]
    Unsupported(String),
}

/// Convenience alias used throughout the stage modules.
pub type Result<T> = std::result::Result<T, TerrainError>;

#[cfg(feature = "bluetooth")]
impl From<btleplug::Error> for TerrainError {
    fn from(e: btleplug::Error) -> Self {
        TerrainError::Bluetooth(e.to_string())
    }
}
