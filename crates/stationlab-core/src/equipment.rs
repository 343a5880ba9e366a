//! Equipment units and their production generators.
//!
//! A unit converts a reactant into a product at a fixed hourly rate. Product
//! routing depends on what the unit hosts: while the hosted experiment is
//! RUNNING, product matching the active step's resource lands in the
//! record's own progress pool; every other flow goes to the vessel pools.
//! Units without a running experiment do not run.

use serde::{Deserialize, Serialize};

use crate::experiment::{ExperimentRecord, ExperimentState, ProgressPool};
use crate::generator::{Generator, GeneratorContext, StepReport};
use crate::node::ConfigNode;
use crate::registry::{EquipmentDefinition, Registry};
use crate::resource::ResourcePools;
use crate::science::SubjectLedger;

/// Product made per hour and reactant used per unit of product.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProductionDescriptor {
    pub product: String,
    pub product_per_hour: f64,
    pub reactant: String,
    pub reactant_per_product: f64,
}

impl ProductionDescriptor {
    /// Reactant consumed per hour at full production.
    pub fn reactant_per_hour(&self) -> f64 {
        self.product_per_hour * self.reactant_per_product
    }

    fn generator(&self) -> Generator {
        let mut generator = Generator::new();
        if !self.product.is_empty() && self.product_per_hour != 0.0 {
            generator.add_rate(&self.product, -self.product_per_hour);
        }
        if !self.reactant.is_empty() && self.reactant_per_hour() != 0.0 {
            generator.add_rate(&self.reactant, self.reactant_per_hour());
        }
        generator
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EquipmentUnit {
    pub abbreviation: String,
    pub name: String,
    pub capability: String,
    pub mass: f64,
    pub cost: f64,
    production: ProductionDescriptor,
    generator: Generator,
    experiment: Option<ExperimentRecord>,
    /// Progress epoch of the hosted record the generator last stepped into.
    served_epoch: Option<u64>,
}

impl EquipmentUnit {
    pub fn from_definition(def: &EquipmentDefinition) -> Self {
        Self {
            abbreviation: def.abbreviation.clone(),
            name: def.name.clone(),
            capability: def.capability.clone(),
            mass: def.mass,
            cost: def.cost,
            production: def.production.clone(),
            generator: def.production.generator(),
            experiment: None,
            served_epoch: None,
        }
    }

    pub fn production(&self) -> &ProductionDescriptor {
        &self.production
    }

    pub fn generator(&self) -> &Generator {
        &self.generator
    }

    pub fn experiment(&self) -> Option<&ExperimentRecord> {
        self.experiment.as_ref()
    }

    pub fn experiment_mut(&mut self) -> Option<&mut ExperimentRecord> {
        self.experiment.as_mut()
    }

    pub fn has_experiment(&self) -> bool {
        self.experiment.is_some()
    }

    /// Most recent step deposited something.
    pub fn is_running(&self) -> bool {
        self.generator.last_output() > 0.0
    }

    /// Product rate per second into the hosted record's progress pool.
    pub fn progress_rate(&self) -> f64 {
        match self.experiment.as_ref().and_then(ExperimentRecord::progress) {
            Some(progress) if progress.resource == self.production.product => {
                self.production.product_per_hour / crate::generator::SECONDS_PER_HOUR
            }
            _ => 0.0,
        }
    }

    pub(crate) fn mark_idle(&mut self) {
        self.generator.mark_idle();
    }

    pub(crate) fn put_experiment(&mut self, record: ExperimentRecord) {
        self.served_epoch = None;
        self.experiment = Some(record);
    }

    pub(crate) fn take_experiment(&mut self) -> Option<ExperimentRecord> {
        self.served_epoch = None;
        self.experiment.take()
    }

    /// Step the generator by `seconds` if the hosted experiment is RUNNING.
    pub fn run(
        &mut self,
        seconds: f64,
        pools: &mut dyn ResourcePools,
        science: &mut SubjectLedger,
        location_multiplier: f64,
    ) -> Option<StepReport> {
        let record = self
            .experiment
            .as_mut()
            .filter(|r| r.state() == ExperimentState::Running);
        let Some(record) = record else {
            self.generator.mark_idle();
            return None;
        };
        // Remainders owed to a previous step's pool do not carry over.
        let epoch = record.progress_epoch();
        if self.served_epoch != Some(epoch) {
            self.generator.reset_owed();
            self.served_epoch = Some(epoch);
        }
        let Some(progress) = record.progress_mut() else {
            self.generator.mark_idle();
            return None;
        };

        let mut overlay = UnitPools {
            vessel: pools,
            progress,
        };
        let mut ctx = GeneratorContext {
            pools: &mut overlay,
            science,
            location_multiplier,
        };
        Some(self.generator.do_time_step(seconds, &mut ctx))
    }

    pub fn save(&self) -> ConfigNode {
        let mut node = ConfigNode::new("EQUIPMENT");
        node.add_value("abb", &self.abbreviation);
        node.add_value("name", &self.name);
        node.add_value("mass", self.mass);
        node.add_value("cost", self.cost);
        node.add_value("type", &self.capability);
        node.add_value("product", &self.production.product);
        node.add_value("productPerHour", self.production.product_per_hour);
        node.add_value("reactant", &self.production.reactant);
        node.add_value("reactantPerProduct", self.production.reactant_per_product);
        if let Some(record) = &self.experiment {
            node.add_node(record.save());
        }
        node
    }

    /// Rebuild a unit from its node. The node is self-describing, so unknown
    /// abbreviations still load; a node without one is skipped.
    pub fn load(node: &ConfigNode, registry: &Registry) -> Option<Self> {
        let abbreviation = node.get_str("abb");
        if abbreviation.is_empty() {
            tracing::warn!("skipping equipment node without an abbreviation");
            return None;
        }
        if registry.equipment(abbreviation).is_none() {
            tracing::debug!(abbreviation, "equipment not in registry, loading from node");
        }

        let production = ProductionDescriptor {
            product: node.get_str("product").to_string(),
            product_per_hour: node.get_f64("productPerHour"),
            reactant: node.get_str("reactant").to_string(),
            reactant_per_product: node.get_f64("reactantPerProduct"),
        };
        let experiment = node
            .node("EXPERIMENT")
            .map(|n| ExperimentRecord::load(n, registry))
            .filter(|record| {
                if record.is_empty() {
                    tracing::warn!(abbreviation, "dropping unknown hosted experiment");
                }
                !record.is_empty()
            });

        Some(Self {
            abbreviation: abbreviation.to_string(),
            name: node.get_str("name").to_string(),
            capability: node.get_str("type").to_string(),
            mass: node.get_f64("mass"),
            cost: node.get_f64("cost"),
            generator: production.generator(),
            production,
            experiment,
            served_epoch: None,
        })
    }
}

/// Routes the progress resource to the hosted record, everything else to
/// the vessel.
struct UnitPools<'a, 'p> {
    vessel: &'a mut dyn ResourcePools,
    progress: &'p mut ProgressPool,
}

impl ResourcePools for UnitPools<'_, '_> {
    fn amount(&self, resource: &str) -> f64 {
        if resource == self.progress.resource {
            self.progress.pool.amount
        } else {
            self.vessel.amount(resource)
        }
    }

    fn capacity(&self, resource: &str) -> f64 {
        if resource == self.progress.resource {
            self.progress.pool.capacity
        } else {
            self.vessel.capacity(resource)
        }
    }

    fn request(&mut self, resource: &str, amount: f64) -> f64 {
        if resource == self.progress.resource {
            self.progress.pool.request(amount)
        } else {
            self.vessel.request(resource, amount)
        }
    }
}
