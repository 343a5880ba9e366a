//! Shared test helpers for unit and integration tests.
//!
//! Gated behind `#[cfg(any(test, feature = "test-utils"))]` so these helpers
//! are available in unit tests and in integration tests (via the
//! `test-utils` feature).

use crate::config::{LabConfig, ResearchOutput};
use crate::equipment::ProductionDescriptor;
use crate::experiment::{ExperimentRecord, StartContext, StepCompletion};
use crate::id::{Holder, LabId};
use crate::lab::Lab;
use crate::registry::{
    EquipmentDefinition, ExperimentDefinition, Registry, RegistryBuilder, StepDefinition,
};
use crate::resource::{Pool, PoolSet};

// ===========================================================================
// Type tags
// ===========================================================================

/// Exposure rack: 3600 LabTime per hour for 0.1 ElectricCharge each.
pub const EXP_EQUIPMENT: &str = "EXP-R";
/// Fluid cell: 360 CirTime per hour for 0.5 ElectricCharge each.
pub const CIR_EQUIPMENT: &str = "CIR-F";

/// One resource step: 50 LabTime.
pub const SINGLE_EXPERIMENT: &str = "KEES-PPMD";
/// Two resource steps on different resources: 1 Setup, then 20 LabTime.
pub const TWO_STEP_EXPERIMENT: &str = "KEES-ODC";
/// Two resource steps on LabTime: 1, then 20.
pub const LAB_TWO_STEP_EXPERIMENT: &str = "KEES-PEC";
/// One crew step: 10 LabTime.
pub const CREW_EXPERIMENT: &str = "KEES-CREW";
/// Two crew steps of 5 LabTime each.
pub const TWO_CREW_EXPERIMENT: &str = "KEES-TWIN";
/// One resource step on CIR equipment: 30 CirTime.
pub const CIR_EXPERIMENT: &str = "CIR-FLUID";

/// Research subject grown by [`test_lab_config`] labs.
pub const LAB_SUBJECT: &str = "station@orbit";

// ===========================================================================
// Registry
// ===========================================================================

pub fn experiment_def(tag: &str, capability: &str, steps: Vec<StepDefinition>) -> ExperimentDefinition {
    ExperimentDefinition {
        type_tag: tag.to_string(),
        name: format!("{tag} experiment"),
        abbreviation: tag.to_string(),
        mass: 0.05,
        cost: 500.0,
        required_capability: capability.to_string(),
        steps,
    }
}

pub fn equipment_def(
    abbreviation: &str,
    capability: &str,
    product: &str,
    product_per_hour: f64,
    reactant_per_product: f64,
) -> EquipmentDefinition {
    EquipmentDefinition {
        abbreviation: abbreviation.to_string(),
        name: format!("{abbreviation} unit"),
        capability: capability.to_string(),
        mass: 0.4,
        cost: 2000.0,
        production: ProductionDescriptor {
            product: product.to_string(),
            product_per_hour,
            reactant: "ElectricCharge".to_string(),
            reactant_per_product,
        },
    }
}

pub fn test_registry() -> Registry {
    let mut b = RegistryBuilder::new();
    b.register_equipment(equipment_def(EXP_EQUIPMENT, "EXP", "LabTime", 3600.0, 0.1));
    b.register_equipment(equipment_def(CIR_EQUIPMENT, "CIR", "CirTime", 360.0, 0.5));

    b.register_experiment(experiment_def(
        SINGLE_EXPERIMENT,
        "EXP",
        vec![StepDefinition::resource("Observe", "LabTime", 50.0)],
    ));
    b.register_experiment(experiment_def(
        TWO_STEP_EXPERIMENT,
        "EXP",
        vec![
            StepDefinition::resource("Prepare", "Setup", 1.0),
            StepDefinition::resource("Observe", "LabTime", 20.0),
        ],
    ));
    b.register_experiment(experiment_def(
        LAB_TWO_STEP_EXPERIMENT,
        "EXP",
        vec![
            StepDefinition::resource("Calibrate", "LabTime", 1.0),
            StepDefinition::resource("Observe", "LabTime", 20.0),
        ],
    ));
    b.register_experiment(experiment_def(
        CREW_EXPERIMENT,
        "EXP",
        vec![StepDefinition::crew("Assist", "LabTime", 10.0)],
    ));
    b.register_experiment(experiment_def(
        TWO_CREW_EXPERIMENT,
        "EXP",
        vec![
            StepDefinition::crew("First shift", "LabTime", 5.0),
            StepDefinition::crew("Second shift", "LabTime", 5.0),
        ],
    ));
    b.register_experiment(experiment_def(
        CIR_EXPERIMENT,
        "CIR",
        vec![StepDefinition::resource("Mix", "CirTime", 30.0)],
    ));
    b.build().expect("test registry is valid")
}

// ===========================================================================
// Labs and pools
// ===========================================================================

/// Two slots (EXP, CIR) and a small research output.
pub fn test_lab_config() -> LabConfig {
    LabConfig {
        slots: vec!["EXP".to_string(), "CIR".to_string()],
        research: Some(ResearchOutput {
            subject: LAB_SUBJECT.to_string(),
            value_per_hour: 1.0,
        }),
        ..LabConfig::default()
    }
}

/// A [`test_lab_config`] lab with both slots equipped.
pub fn equipped_lab(registry: &Registry) -> Lab {
    let mut lab = Lab::new(test_lab_config());
    for (slot, abb) in [EXP_EQUIPMENT, CIR_EQUIPMENT].into_iter().enumerate() {
        let unit = registry.create_equipment(abb).expect("test equipment exists");
        lab.install_equipment(slot, unit)
            .expect("test equipment fits its slot");
    }
    lab.drain_events();
    lab
}

/// A full 1000-unit ElectricCharge pool.
pub fn test_pools() -> PoolSet {
    let mut pools = PoolSet::new();
    pools.insert("ElectricCharge", Pool::new(1000.0, 1000.0));
    pools
}

// ===========================================================================
// Records
// ===========================================================================

/// A lab holder pointing at slot 0 of a lab that is not on a vessel.
pub fn any_lab_holder() -> Holder {
    Holder::Lab {
        lab: LabId::default(),
        slot: 0,
    }
}

pub fn crew(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| n.to_string()).collect()
}

/// Drive a resource-step record of type `tag` to FINISHED, outside any lab.
pub fn finished_record(registry: &Registry, tag: &str) -> ExperimentRecord {
    let mut record = registry.create_experiment(tag);
    record
        .install(any_lab_holder())
        .expect("fresh record installs");
    let ctx = StartContext {
        crew: &[],
        qualifying_location: true,
    };
    loop {
        record.request_start(&ctx).expect("resource step starts");
        let target = record.progress_target();
        record
            .progress_mut()
            .expect("running record has progress")
            .pool
            .request(-target);
        if record.finish_step().expect("target reached") == StepCompletion::Finished {
            break;
        }
    }
    record.leave_lab();
    record
}
