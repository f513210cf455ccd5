//! Macro layer: national AS topology from RIPE Stat.

pub mod analyzer;
pub mod centrality;
pub mod graph;
pub mod ripe;

pub use analyzer::{export_results, load_results, BgpAnalyzer};
pub use ripe::RipeStatClient;
