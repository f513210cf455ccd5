//! Disruption scenario impact matrix.

use serde::Serialize;
use std::fmt;

/// Network layer a scenario acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Layer {
    Macro,
    Micro,
    Both,
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Layer::Macro => write!(f, "Macro"),
            Layer::Micro => write!(f, "Micro"),
            Layer::Both => write!(f, "Both"),
        }
    }
}

/// One row of the impact matrix. Impacts are in `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Scenario {
    pub name: &'static str,
    pub layer: Layer,
    pub target: &'static str,
    pub impact_connectivity: f64,
    pub impact_observability: f64,
    pub impact_influence: f64,
    pub timeframe: &'static str,
    pub detection_difficulty: &'static str,
}

impl Scenario {
    /// Mean of the three impact dimensions.
    pub fn overall_impact(&self) -> f64 {
        (self.impact_connectivity + self.impact_observability + self.impact_influence) / 3.0
    }
}

/// The fixed scenario set, macro first.
pub fn impact_matrix() -> Vec<Scenario> {
    vec![
        Scenario {
            name: "Critical AS Disruption",
            layer: Layer::Macro,
            target: "Top-3 Transit ASes",
            impact_connectivity: 0.65,
            impact_observability: 0.40,
            impact_influence: 0.75,
            timeframe: "Hours",
            detection_difficulty: "Low",
        },
        Scenario {
            name: "Regional Internet Partition",
            layer: Layer::Macro,
            target: "Submarine Cable Cuts",
            impact_connectivity: 0.85,
            impact_observability: 0.90,
            impact_influence: 0.95,
            timeframe: "Days-Weeks",
            detection_difficulty: "Low",
        },
        Scenario {
            name: "IoT Network Jamming",
            layer: Layer::Micro,
            target: "BLE/UWB Spectrum",
            impact_connectivity: 0.20,
            impact_observability: 0.80,
            impact_influence: 0.35,
            timeframe: "Minutes",
            detection_difficulty: "High",
        },
        Scenario {
            name: "Coordinated Multi-Layer",
            layer: Layer::Both,
            target: "AS + Local RF Disruption",
            impact_connectivity: 0.90,
            impact_observability: 0.95,
            impact_influence: 1.00,
            timeframe: "Hours",
            detection_difficulty: "Medium",
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matrix_shape() {
        let matrix = impact_matrix();
        let names: Vec<&str> = matrix.iter().map(|s| s.name).collect();
        assert_eq!(
            names,
            vec![
                "Critical AS Disruption",
                "Regional Internet Partition",
                "IoT Network Jamming",
                "Coordinated Multi-Layer",
            ]
        );
        for s in &matrix {
            for v in [s.impact_connectivity, s.impact_observability, s.impact_influence] {
                assert!((0.0..=1.0).contains(&v));
            }
        }
        assert_eq!(matrix[2].layer, Layer::Micro);
        assert_eq!(matrix[3].detection_difficulty, "Medium");
    }

    #[test]
    fn test_combined_scenario_is_most_severe() {
        let matrix = impact_matrix();
        let worst = matrix
            .iter()
            .max_by(|a, b| a.overall_impact().total_cmp(&b.overall_impact()))
            .unwrap();
        assert_eq!(worst.name, "Coordinated Multi-Layer");
    }

    #[test]
    fn test_serialized_field_names() {
        let json = serde_json::to_value(&impact_matrix()[0]).unwrap();
        assert_eq!(json["layer"], "Macro");
        assert_eq!(json["impact_influence"], 0.75);
    }
}
