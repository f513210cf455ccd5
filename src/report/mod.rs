//! Markdown reports for each pipeline stage.

pub mod generator;

pub use generator::{
    generate_analysis_report, generate_bgp_report, generate_integration_report,
    generate_spatial_report, write_json_report, write_report,
};
