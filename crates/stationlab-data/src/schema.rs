//! Serde data file structs for station content definitions.
//!
//! These structs define the on-disk format for experiments and equipment.
//! They are deserialized from RON, JSON, or TOML data files and then
//! resolved into registry definitions by the loader. The lab file
//! deserializes straight into [`stationlab_core::config::LabConfig`].

use serde::Deserialize;
use stationlab_core::equipment::ProductionDescriptor;
use stationlab_core::registry::{
    EquipmentDefinition, ExperimentDefinition, StepDefinition, StepKind,
};

// ===========================================================================
// Experiments
// ===========================================================================

/// An experiment type definition in a data file.
#[derive(Debug, Clone, Deserialize)]
pub struct ExperimentData {
    #[serde(rename = "type")]
    pub type_tag: String,
    pub name: String,
    /// Defaults to the type tag.
    #[serde(default)]
    pub abbreviation: Option<String>,
    #[serde(default)]
    pub mass: f64,
    #[serde(default)]
    pub cost: f64,
    /// Capability tag of the equipment that hosts this experiment.
    pub capability: String,
    pub steps: Vec<StepData>,
}

/// One step of an experiment.
#[derive(Debug, Clone, Deserialize)]
pub struct StepData {
    pub name: String,
    #[serde(default)]
    pub kind: StepKindData,
    pub resource: String,
    pub amount: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKindData {
    #[default]
    Resource,
    Crew,
}

impl ExperimentData {
    pub fn into_definition(self) -> ExperimentDefinition {
        ExperimentDefinition {
            abbreviation: self.abbreviation.unwrap_or_else(|| self.type_tag.clone()),
            type_tag: self.type_tag,
            name: self.name,
            mass: self.mass,
            cost: self.cost,
            required_capability: self.capability,
            steps: self.steps.into_iter().map(StepData::into_definition).collect(),
        }
    }
}

impl StepData {
    fn into_definition(self) -> StepDefinition {
        StepDefinition {
            name: self.name,
            kind: match self.kind {
                StepKindData::Resource => StepKind::Resource,
                StepKindData::Crew => StepKind::Crew,
            },
            resource: self.resource,
            amount: self.amount,
        }
    }
}

// ===========================================================================
// Equipment
// ===========================================================================

/// An equipment type definition in a data file.
#[derive(Debug, Clone, Deserialize)]
pub struct EquipmentData {
    pub abbreviation: String,
    pub name: String,
    pub capability: String,
    #[serde(default)]
    pub mass: f64,
    #[serde(default)]
    pub cost: f64,
    pub production: ProductionData,
}

/// What the unit makes and what it burns doing so.
#[derive(Debug, Clone, Deserialize)]
pub struct ProductionData {
    pub product: String,
    pub product_per_hour: f64,
    #[serde(default = "default_reactant")]
    pub reactant: String,
    #[serde(default)]
    pub reactant_per_product: f64,
}

fn default_reactant() -> String {
    "ElectricCharge".to_string()
}

impl EquipmentData {
    pub fn into_definition(self) -> EquipmentDefinition {
        EquipmentDefinition {
            abbreviation: self.abbreviation,
            name: self.name,
            capability: self.capability,
            mass: self.mass,
            cost: self.cost,
            production: ProductionDescriptor {
                product: self.production.product,
                product_per_hour: self.production.product_per_hour,
                reactant: self.production.reactant,
                reactant_per_product: self.production.reactant_per_product,
            },
        }
    }
}

// ===========================================================================
// TOML wrappers (TOML does not support top-level arrays)
// ===========================================================================

/// Wrapper for a list of experiments in TOML format.
#[derive(Debug, Clone, Deserialize)]
pub struct TomlExperiments {
    pub experiments: Vec<ExperimentData>,
}

/// Wrapper for a list of equipment in TOML format.
#[derive(Debug, Clone, Deserialize)]
pub struct TomlEquipment {
    pub equipment: Vec<EquipmentData>,
}

// ===========================================================================
// Tests
// ===========================================================================
