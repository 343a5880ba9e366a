//! Lab configuration.
//!
//! Deserializable from data files (see the `stationlab-data` crate); every
//! field has a default so partial files are valid.

use serde::{Deserialize, Serialize};

use crate::generator::Generator;
use crate::node::ConfigNode;

/// A base flow of the lab itself, e.g. electric charge draw. Same sign
/// convention as [`Generator::add_rate`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateConfig {
    pub resource: String,
    pub per_hour: f64,
}

/// Research produced by the lab itself while active.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchOutput {
    pub subject: String,
    pub value_per_hour: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LabConfig {
    /// Crew needed for the lab to run.
    pub minimum_crew: u32,
    /// Seconds between periodic reactivations while active.
    pub reactivation_interval: f64,
    /// Longest catch-up interval fed to generators in one reactivation.
    /// `None` means unbounded.
    pub max_catch_up: Option<f64>,
    /// Treat every location as qualifying.
    pub ignore_location: bool,
    pub rates: Vec<RateConfig>,
    pub research: Option<ResearchOutput>,
    /// Capability tags of the lab's slots, in order.
    pub slots: Vec<String>,
}

impl Default for LabConfig {
    fn default() -> Self {
        Self {
            minimum_crew: 0,
            reactivation_interval: 1.0,
            max_catch_up: None,
            ignore_location: false,
            rates: Vec::new(),
            research: None,
            slots: Vec::new(),
        }
    }
}

impl LabConfig {
    /// The lab's own generator: base rates plus the optional research flow.
    pub fn generator(&self) -> Generator {
        let mut generator = Generator::new();
        for rate in &self.rates {
            generator.add_rate(&rate.resource, rate.per_hour);
        }
        if let Some(research) = &self.research {
            generator.add_research(&research.subject, research.value_per_hour);
        }
        generator
    }

    /// Write the settings not covered by the `LAB` values.
    pub fn save_into(&self, node: &mut ConfigNode) {
        node.add_value("interval", self.reactivation_interval);
        if let Some(limit) = self.max_catch_up {
            node.add_value("maxCatchUp", limit);
        }
        node.add_value("ignoreLocation", self.ignore_location);
        for rate in &self.rates {
            let mut child = ConfigNode::new("RATE");
            child.add_value("resource", &rate.resource);
            child.add_value("perHour", rate.per_hour);
            node.add_node(child);
        }
        if let Some(research) = &self.research {
            let mut child = ConfigNode::new("RESEARCH");
            child.add_value("subject", &research.subject);
            child.add_value("perHour", research.value_per_hour);
            node.add_node(child);
        }
    }

    /// Read a configuration back from a `LAB` node. Slot tags come from the
    /// `SLOT` children.
    pub fn load_from(node: &ConfigNode) -> Self {
        let defaults = Self::default();
        let interval = node.get_f64("interval");
        Self {
            minimum_crew: node.get_u32("minimumCrew"),
            reactivation_interval: if interval > 0.0 {
                interval
            } else {
                defaults.reactivation_interval
            },
            max_catch_up: node.parse::<f64>("maxCatchUp").ok(),
            ignore_location: node.get_bool("ignoreLocation"),
            rates: node
                .nodes_named("RATE")
                .map(|n| RateConfig {
                    resource: n.get_str("resource").to_string(),
                    per_hour: n.get_f64("perHour"),
                })
                .collect(),
            research: node.node("RESEARCH").map(|n| ResearchOutput {
                subject: n.get_str("subject").to_string(),
                value_per_hour: n.get_f64("perHour"),
            }),
            slots: node
                .nodes_named("SLOT")
                .map(|n| n.get_str("type").to_string())
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::FlowKind;

    #[test]
    fn defaults_fill_missing_fields() {
        let config: LabConfig = serde_json::from_str(r#"{"minimum_crew": 2}"#).unwrap();
        assert_eq!(config.minimum_crew, 2);
        assert_eq!(config.reactivation_interval, 1.0);
        assert!(config.rates.is_empty());
    }

    #[test]
    fn generator_includes_rates_and_research() {
        let config = LabConfig {
            rates: vec![RateConfig {
                resource: "ElectricCharge".to_string(),
                per_hour: 36.0,
            }],
            research: Some(ResearchOutput {
                subject: "station@orbit".to_string(),
                value_per_hour: 1.0,
            }),
            ..LabConfig::default()
        };
        let generator = config.generator();
        assert_eq!(generator.rates().len(), 2);
        assert_eq!(generator.rates()[1].kind, FlowKind::Research);
    }

    #[test]
    fn settings_round_trip_through_node() {
        let config = LabConfig {
            minimum_crew: 2,
            reactivation_interval: 5.0,
            max_catch_up: Some(3600.0),
            ignore_location: true,
            rates: vec![RateConfig {
                resource: "ElectricCharge".to_string(),
                per_hour: 36.0,
            }],
            research: None,
            slots: Vec::new(),
        };
        let mut node = ConfigNode::new("LAB");
        node.add_value("minimumCrew", config.minimum_crew);
        config.save_into(&mut node);
        assert_eq!(LabConfig::load_from(&node), config);
    }
}
