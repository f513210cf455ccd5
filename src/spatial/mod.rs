//! RSSI spatial analysis.
//!
//! Converts AirTag RSSI into distances, relative positions, movement events
//! and an influence terrain grid.

pub mod mds;
pub mod path_loss;
pub mod terrain;

pub use path_loss::PathLossModel;
pub use terrain::{InfluenceTerrainMapper, PositionSource};
