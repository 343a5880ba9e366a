use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::equipment::{EquipmentUnit, ProductionDescriptor};
use crate::experiment::ExperimentRecord;
use crate::step::Step;

/// Step variant selected by a definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepKind {
    Resource,
    Crew,
}

/// One step of an experiment definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDefinition {
    pub name: String,
    pub kind: StepKind,
    pub resource: String,
    pub amount: f64,
}

impl StepDefinition {
    pub fn resource(name: &str, resource: &str, amount: f64) -> Self {
        Self {
            name: name.to_string(),
            kind: StepKind::Resource,
            resource: resource.to_string(),
            amount,
        }
    }

    pub fn crew(name: &str, resource: &str, amount: f64) -> Self {
        Self {
            kind: StepKind::Crew,
            ..Self::resource(name, resource, amount)
        }
    }

    /// A fresh step with no crew assignment.
    pub fn to_step(&self) -> Step {
        match self.kind {
            StepKind::Resource => Step::resource(&self.name, &self.resource, self.amount),
            StepKind::Crew => Step::crew(&self.name, &self.resource, self.amount),
        }
    }
}

/// An experiment type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentDefinition {
    pub type_tag: String,
    pub name: String,
    pub abbreviation: String,
    pub mass: f64,
    pub cost: f64,
    /// Capability tag of the equipment that can host it.
    pub required_capability: String,
    pub steps: Vec<StepDefinition>,
}

/// An equipment type, keyed by abbreviation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquipmentDefinition {
    pub abbreviation: String,
    pub name: String,
    pub capability: String,
    pub mass: f64,
    pub cost: f64,
    pub production: ProductionDescriptor,
}

/// Builder for constructing an immutable Registry.
/// Three-phase lifecycle: registration -> mutation -> finalization.
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    experiments: Vec<ExperimentDefinition>,
    experiment_index: HashMap<String, usize>,
    equipment: Vec<EquipmentDefinition>,
    equipment_index: HashMap<String, usize>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Phase 1: Register an experiment type. A second registration of the
    /// same tag replaces the first.
    pub fn register_experiment(&mut self, def: ExperimentDefinition) {
        match self.experiment_index.get(&def.type_tag) {
            Some(&i) => {
                tracing::warn!(tag = %def.type_tag, "experiment registered twice, replacing");
                self.experiments[i] = def;
            }
            None => {
                self.experiment_index
                    .insert(def.type_tag.clone(), self.experiments.len());
                self.experiments.push(def);
            }
        }
    }

    /// Phase 1: Register an equipment type, keyed by abbreviation.
    pub fn register_equipment(&mut self, def: EquipmentDefinition) {
        match self.equipment_index.get(&def.abbreviation) {
            Some(&i) => {
                tracing::warn!(abb = %def.abbreviation, "equipment registered twice, replacing");
                self.equipment[i] = def;
            }
            None => {
                self.equipment_index
                    .insert(def.abbreviation.clone(), self.equipment.len());
                self.equipment.push(def);
            }
        }
    }

    /// Phase 2: Mutate an existing experiment by tag.
    pub fn mutate_experiment<F>(&mut self, tag: &str, f: F) -> Result<(), RegistryError>
    where
        F: FnOnce(&mut ExperimentDefinition),
    {
        let &i = self
            .experiment_index
            .get(tag)
            .ok_or_else(|| RegistryError::NotFound(tag.to_string()))?;
        f(&mut self.experiments[i]);
        Ok(())
    }

    /// Phase 2: Mutate an existing equipment type by abbreviation.
    pub fn mutate_equipment<F>(&mut self, abbreviation: &str, f: F) -> Result<(), RegistryError>
    where
        F: FnOnce(&mut EquipmentDefinition),
    {
        let &i = self
            .equipment_index
            .get(abbreviation)
            .ok_or_else(|| RegistryError::NotFound(abbreviation.to_string()))?;
        f(&mut self.equipment[i]);
        Ok(())
    }

    /// Phase 3: Validate and freeze.
    pub fn build(self) -> Result<Registry, RegistryError> {
        for def in &self.experiments {
            if def.type_tag.is_empty() {
                return Err(RegistryError::EmptyTag);
            }
            if def.steps.is_empty() {
                return Err(RegistryError::NoSteps(def.type_tag.clone()));
            }
            if let Some(step) = def
                .steps
                .iter()
                .find(|s| !s.amount.is_finite() || s.amount <= 0.0 || s.resource.is_empty())
            {
                return Err(RegistryError::InvalidStep {
                    experiment: def.type_tag.clone(),
                    step: step.name.clone(),
                });
            }
        }
        for def in &self.equipment {
            if def.abbreviation.is_empty() {
                return Err(RegistryError::EmptyTag);
            }
            let p = &def.production;
            if !p.product_per_hour.is_finite()
                || p.product_per_hour < 0.0
                || !p.reactant_per_product.is_finite()
                || p.reactant_per_product < 0.0
            {
                return Err(RegistryError::InvalidProduction(def.abbreviation.clone()));
            }
        }

        Ok(Registry {
            experiments: self.experiments,
            experiment_index: self.experiment_index,
            equipment: self.equipment,
            equipment_index: self.equipment_index,
        })
    }
}

/// Immutable registry. Frozen after build() and passed by reference.
#[derive(Debug)]
pub struct Registry {
    experiments: Vec<ExperimentDefinition>,
    experiment_index: HashMap<String, usize>,
    equipment: Vec<EquipmentDefinition>,
    equipment_index: HashMap<String, usize>,
}

impl Registry {
    pub fn experiment(&self, tag: &str) -> Option<&ExperimentDefinition> {
        self.experiment_index.get(tag).map(|&i| &self.experiments[i])
    }

    pub fn equipment(&self, abbreviation: &str) -> Option<&EquipmentDefinition> {
        self.equipment_index
            .get(abbreviation)
            .map(|&i| &self.equipment[i])
    }

    /// A new STORED record of type `tag`, or the empty record when the tag is
    /// unknown.
    pub fn create_experiment(&self, tag: &str) -> ExperimentRecord {
        match self.experiment(tag) {
            Some(def) => ExperimentRecord::from_definition(def),
            None => {
                tracing::warn!(tag, "unknown experiment type");
                ExperimentRecord::empty()
            }
        }
    }

    pub fn create_equipment(&self, abbreviation: &str) -> Option<EquipmentUnit> {
        let unit = self.equipment(abbreviation).map(EquipmentUnit::from_definition);
        if unit.is_none() {
            tracing::warn!(abbreviation, "unknown equipment type");
        }
        unit
    }

    pub fn experiments(&self) -> impl Iterator<Item = &ExperimentDefinition> {
        self.experiments.iter()
    }

    /// Experiment types hostable by equipment of `capability`.
    pub fn experiments_for(&self, capability: &str) -> impl Iterator<Item = &ExperimentDefinition> {
        self.experiments
            .iter()
            .filter(move |d| d.required_capability == capability)
    }

    pub fn experiment_count(&self) -> usize {
        self.experiments.len()
    }

    pub fn equipment_count(&self) -> usize {
        self.equipment.len()
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RegistryError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("definition with an empty type tag")]
    EmptyTag,
    #[error("experiment {0} has no steps")]
    NoSteps(String),
    #[error("experiment {experiment}: step {step} needs a resource and a positive amount")]
    InvalidStep { experiment: String, step: String },
    #[error("equipment {0}: production rates must be finite and non-negative")]
    InvalidProduction(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experiment::ExperimentState;

    fn experiment(tag: &str, steps: Vec<StepDefinition>) -> ExperimentDefinition {
        ExperimentDefinition {
            type_tag: tag.to_string(),
            name: tag.to_string(),
            abbreviation: tag.to_string(),
            mass: 0.1,
            cost: 100.0,
            required_capability: "EXP".to_string(),
            steps,
        }
    }

    fn setup_builder() -> RegistryBuilder {
        let mut b = RegistryBuilder::new();
        b.register_experiment(experiment(
            "KEES",
            vec![StepDefinition::resource("Observe", "LabTime", 50.0)],
        ));
        b.register_equipment(EquipmentDefinition {
            abbreviation: "EXP".to_string(),
            name: "Exposure rack".to_string(),
            capability: "EXP".to_string(),
            mass: 0.5,
            cost: 1000.0,
            production: ProductionDescriptor {
                product: "LabTime".to_string(),
                product_per_hour: 5.0,
                reactant: "ElectricCharge".to_string(),
                reactant_per_product: 10.0,
            },
        });
        b
    }

    #[test]
    fn register_and_build() {
        let reg = setup_builder().build().unwrap();
        assert_eq!(reg.experiment_count(), 1);
        assert_eq!(reg.equipment_count(), 1);
        assert_eq!(reg.experiments_for("EXP").count(), 1);
        assert_eq!(reg.experiments_for("CIR").count(), 0);
    }

    #[test]
    fn created_records_start_stored() {
        let reg = setup_builder().build().unwrap();
        let record = reg.create_experiment("KEES");
        assert_eq!(record.state(), ExperimentState::Stored);
        assert_eq!(record.required_capability, "EXP");
    }

    #[test]
    fn unknown_tag_gives_empty_record() {
        let reg = setup_builder().build().unwrap();
        assert!(reg.create_experiment("nonexistent").is_empty());
        assert!(reg.create_equipment("nonexistent").is_none());
    }

    #[test]
    fn duplicate_registration_replaces() {
        let mut b = setup_builder();
        b.register_experiment(experiment(
            "KEES",
            vec![
                StepDefinition::resource("Prepare", "Setup", 1.0),
                StepDefinition::resource("Observe", "LabTime", 20.0),
            ],
        ));
        let reg = b.build().unwrap();
        assert_eq!(reg.experiment_count(), 1);
        assert_eq!(reg.experiment("KEES").unwrap().steps.len(), 2);
    }

    #[test]
    fn mutate_experiment() {
        let mut b = setup_builder();
        b.mutate_experiment("KEES", |def| def.mass = 2.0).unwrap();
        let reg = b.build().unwrap();
        assert_eq!(reg.experiment("KEES").unwrap().mass, 2.0);
    }

    #[test]
    fn mutate_nonexistent_fails() {
        let mut b = setup_builder();
        assert_eq!(
            b.mutate_equipment("nonexistent", |_| {}),
            Err(RegistryError::NotFound("nonexistent".to_string()))
        );
    }

    #[test]
    fn experiment_without_steps_fails() {
        let mut b = RegistryBuilder::new();
        b.register_experiment(experiment("EMPTY", vec![]));
        assert_eq!(b.build().unwrap_err(), RegistryError::NoSteps("EMPTY".to_string()));
    }

    #[test]
    fn non_positive_step_amount_fails() {
        let mut b = RegistryBuilder::new();
        b.register_experiment(experiment(
            "BAD",
            vec![StepDefinition::resource("Observe", "LabTime", 0.0)],
        ));
        assert!(matches!(b.build(), Err(RegistryError::InvalidStep { .. })));
    }

    #[test]
    fn negative_production_fails() {
        let mut b = setup_builder();
        b.mutate_equipment("EXP", |def| def.production.product_per_hour = -1.0)
            .unwrap();
        assert_eq!(
            b.build().unwrap_err(),
            RegistryError::InvalidProduction("EXP".to_string())
        );
    }
}
