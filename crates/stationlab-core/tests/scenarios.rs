//! End-to-end lab scenarios.
//!
//! Each test drives the public API the way a host would: equipment and
//! experiments are installed, research is started, and simulated time is fed
//! through reactivations.

use stationlab_core::config::LabConfig;
use stationlab_core::event::LabEvent;
use stationlab_core::experiment::{ExperimentState, StartContext, StartOutcome, StepCompletion};
use stationlab_core::host::HostSnapshot;
use stationlab_core::id::Holder;
use stationlab_core::lab::Lab;
use stationlab_core::node::ConfigNode;
use stationlab_core::resource::ResourcePools;
use stationlab_core::science::SubjectLedger;
use stationlab_core::slot::{EquipmentSlot, SlotError};
use stationlab_core::storage::ExperimentStorage;
use stationlab_core::test_utils::*;
use stationlab_core::vessel::Vessel;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn start_ctx(crew: &[String]) -> StartContext<'_> {
    StartContext {
        crew,
        qualifying_location: true,
    }
}

// ===========================================================================
// Scenario 1: single resource step
// ===========================================================================
//
// STORED -> INSTALLED -> RUNNING; 50 units of clamped production finish the
// research; finishing moves RUNNING -> FINISHED.

#[test]
fn scenario_single_resource_step() {
    init_tracing();
    let registry = test_registry();
    let mut slot = EquipmentSlot::new("EXP");
    slot.install(registry.create_equipment(EXP_EQUIPMENT).unwrap())
        .unwrap();

    let record = registry.create_experiment(SINGLE_EXPERIMENT);
    assert_eq!(record.state(), ExperimentState::Stored);
    slot.install_experiment(record, any_lab_holder()).unwrap();
    assert_eq!(slot.experiment().unwrap().state(), ExperimentState::Installed);

    let outcome = slot
        .experiment_mut()
        .unwrap()
        .request_start(&start_ctx(&[]))
        .unwrap();
    assert_eq!(outcome, StartOutcome::Started);
    assert_eq!(slot.experiment().unwrap().state(), ExperimentState::Running);

    let mut pools = test_pools();
    let mut science = SubjectLedger::default();
    // 1 LabTime per second; the second call is clamped at the 50 target.
    slot.run(30.0, &mut pools, &mut science, 1.0).unwrap();
    assert!(!slot.experiment().unwrap().is_research_finished());
    let report = slot.run(30.0, &mut pools, &mut science, 1.0).unwrap();
    assert!((report.elapsed - 20.0).abs() < 1e-9);

    let record = slot.experiment_mut().unwrap();
    assert!((record.progress_amount() - 50.0).abs() < 1e-9);
    assert!(record.is_research_finished());
    assert_eq!(record.finish_step(), Ok(StepCompletion::Finished));
    assert_eq!(record.state(), ExperimentState::Finished);
    assert!(pools.amount("ElectricCharge") < 1000.0);
}

#[test]
fn scenario_single_resource_step_in_lab() {
    init_tracing();
    let registry = test_registry();
    let mut lab = equipped_lab(&registry);
    let mut pools = test_pools();
    let mut science = SubjectLedger::default();
    let host = HostSnapshot::at(100.0);

    lab.install_experiment(0, registry.create_experiment(SINGLE_EXPERIMENT))
        .unwrap();
    lab.start_research(&host).unwrap();
    lab.start_experiment(0, &host).unwrap();

    let report = lab.reactivate(&HostSnapshot::at(125.0), &mut pools, &mut science);
    assert_eq!(report.elapsed, 25.0);
    assert!(report.completed.is_empty());
    assert!(lab.slot(0).unwrap().is_running());

    let report = lab.reactivate(&HostSnapshot::at(160.0), &mut pools, &mut science);
    assert_eq!(report.completed, vec![(0, StepCompletion::Finished)]);
    assert_eq!(lab.experiment(0).unwrap().state(), ExperimentState::Finished);
    assert!(lab.drain_events().iter().any(|e| matches!(
        e,
        LabEvent::ExperimentFinished { slot: 0, .. }
    )));
}

// ===========================================================================
// Scenario 2: two steps
// ===========================================================================

#[test]
fn scenario_two_steps_on_different_resources() {
    let registry = test_registry();
    let mut record = registry.create_experiment(TWO_STEP_EXPERIMENT);
    record.install(any_lab_holder()).unwrap();

    record.request_start(&start_ctx(&[])).unwrap();
    assert_eq!(record.progress().unwrap().resource, "Setup");
    record.progress_mut().unwrap().pool.request(-1.0);
    assert_eq!(
        record.finish_step(),
        Ok(StepCompletion::Advanced { next: 1 })
    );
    assert_eq!(record.active_step_index(), 1);
    assert_eq!(record.state(), ExperimentState::Installed);

    record.request_start(&start_ctx(&[])).unwrap();
    assert_eq!(record.progress().unwrap().resource, "LabTime");
    record.progress_mut().unwrap().pool.request(-20.0);
    assert_eq!(record.finish_step(), Ok(StepCompletion::Finished));
    assert_eq!(record.state(), ExperimentState::Finished);
    assert_eq!(record.active_step_index(), 1);
}

#[test]
fn scenario_two_steps_in_lab() {
    let registry = test_registry();
    let mut lab = equipped_lab(&registry);
    let mut pools = test_pools();
    let mut science = SubjectLedger::default();

    lab.install_experiment(0, registry.create_experiment(LAB_TWO_STEP_EXPERIMENT))
        .unwrap();
    lab.start_research(&HostSnapshot::at(100.0)).unwrap();
    lab.start_experiment(0, &HostSnapshot::at(100.0)).unwrap();

    // The 1-unit calibration step clamps the 10 s interval.
    let report = lab.reactivate(&HostSnapshot::at(110.0), &mut pools, &mut science);
    assert_eq!(report.completed, vec![(0, StepCompletion::Advanced { next: 1 })]);
    let record = lab.experiment(0).unwrap();
    assert_eq!(record.state(), ExperimentState::Installed);
    assert_eq!(record.active_step_index(), 1);

    lab.start_experiment(0, &HostSnapshot::at(110.0)).unwrap();
    let report = lab.reactivate(&HostSnapshot::at(140.0), &mut pools, &mut science);
    assert_eq!(report.completed, vec![(0, StepCompletion::Finished)]);
    let record = lab.experiment(0).unwrap();
    assert_eq!(record.state(), ExperimentState::Finished);
    assert_eq!(record.active_step_index(), 1);
}

// ===========================================================================
// Scenario 3: crew member leaves
// ===========================================================================

#[test]
fn scenario_crew_member_leaves() {
    init_tracing();
    let registry = test_registry();
    let mut lab = equipped_lab(&registry);
    let mut pools = test_pools();
    let mut science = SubjectLedger::default();
    let both = HostSnapshot::at(0.0).with_crew(&["A", "B"]);

    lab.install_experiment(0, registry.create_experiment(CREW_EXPERIMENT))
        .unwrap();
    lab.start_research(&both).unwrap();
    let StartOutcome::AwaitingCrew(request) = lab.start_experiment(0, &both).unwrap() else {
        panic!("crew step should wait for a selection");
    };
    assert_eq!(request.candidates, crew(&["A", "B"]));
    assert_eq!(lab.experiment(0).unwrap().state(), ExperimentState::Installed);

    assert!(lab
        .resolve_crew_selection(0, request.ticket, Some("A"), &both)
        .unwrap());
    let record = lab.experiment(0).unwrap();
    assert_eq!(record.state(), ExperimentState::Running);
    assert_eq!(record.active_step().unwrap().assigned(), Some("A"));
    lab.drain_events();

    let only_b = HostSnapshot::at(2.0).with_crew(&["B"]);
    let report = lab.on_crew_changed(&only_b, &mut pools, &mut science);
    assert!(report.crew_changed);
    assert_eq!(report.aborted, vec![0]);

    let record = lab.experiment(0).unwrap();
    assert_eq!(record.state(), ExperimentState::Installed);
    assert_eq!(record.active_step().unwrap().assigned(), None);
    assert_eq!(record.progress_target(), 0.0);
    assert!(lab.drain_events().contains(&LabEvent::CrewStepAborted {
        slot: 0,
        experiment: CREW_EXPERIMENT.to_string(),
        occupant: "A".to_string(),
    }));
}

// ===========================================================================
// Scenario 4: equipment persistence with activeStep = 1
// ===========================================================================

#[test]
fn scenario_equipment_persistence() {
    let registry = test_registry();
    let mut slot = EquipmentSlot::new("EXP");
    slot.install(registry.create_equipment(EXP_EQUIPMENT).unwrap())
        .unwrap();
    slot.install_experiment(
        registry.create_experiment(TWO_STEP_EXPERIMENT),
        any_lab_holder(),
    )
    .unwrap();
    let record = slot.experiment_mut().unwrap();
    record.request_start(&start_ctx(&[])).unwrap();
    record.progress_mut().unwrap().pool.request(-1.0);
    record.finish_step().unwrap();
    record.request_start(&start_ctx(&[])).unwrap();
    record.progress_mut().unwrap().pool.request(-7.5);

    let saved = slot.save();
    let equipment_node = saved.node("EQUIPMENT").unwrap();
    let experiment_node = equipment_node.node("EXPERIMENT").unwrap();
    assert_eq!(experiment_node.get_usize("activeStep"), 1);

    let loaded = EquipmentSlot::load(&saved, &registry);
    let (before, after) = (slot.unit().unwrap(), loaded.unit().unwrap());
    assert_eq!(after.abbreviation, before.abbreviation);
    assert_eq!(after.name, before.name);
    assert_eq!(after.capability, before.capability);
    assert_eq!(after.mass, before.mass);
    assert_eq!(after.cost, before.cost);
    assert_eq!(after.production(), before.production());

    let (before, after) = (slot.experiment().unwrap(), loaded.experiment().unwrap());
    assert_eq!(after.type_tag, before.type_tag);
    assert_eq!(after.state(), ExperimentState::Running);
    assert_eq!(after.mass, before.mass);
    assert_eq!(after.steps(), before.steps());
    assert_eq!(after.active_step_index(), 1);
    assert_eq!(after.progress(), before.progress());
    assert_eq!(loaded.save(), saved);
}

// ===========================================================================
// Scenario 5: mismatched install
// ===========================================================================

#[test]
fn scenario_mismatched_install() {
    init_tracing();
    let registry = test_registry();
    let mut slot = EquipmentSlot::new("EXP");
    let before = slot.save();

    let rejected = slot
        .install(registry.create_equipment(CIR_EQUIPMENT).unwrap())
        .unwrap_err();
    assert!(matches!(rejected.error, SlotError::CapabilityMismatch { .. }));
    assert_eq!(slot.save(), before);
    assert!(!slot.is_installed());
    assert!(slot.take_diagnostic().is_some());

    let mut lab = Lab::new(test_lab_config());
    let unit = rejected.into_inner();
    assert!(lab.install_equipment(0, unit).is_err());
    assert!(!lab.slot(0).unwrap().is_installed());
    assert!(matches!(
        lab.drain_events().as_slice(),
        [LabEvent::Diagnostic { .. }]
    ));
}

// ===========================================================================
// Vessel flows
// ===========================================================================

#[test]
fn experiment_travels_from_storage_through_lab_and_back() {
    init_tracing();
    let registry = test_registry();
    let config = LabConfig {
        research: Some(stationlab_core::config::ResearchOutput {
            subject: format!("{SINGLE_EXPERIMENT}@orbit"),
            value_per_hour: 3600.0,
        }),
        ..test_lab_config()
    };
    let mut vessel = Vessel::new();
    *vessel.pools_mut() = test_pools();

    let mut lab = Lab::new(config);
    lab.install_equipment(0, registry.create_equipment(EXP_EQUIPMENT).unwrap())
        .unwrap();
    let lab_id = vessel.add_lab(lab);
    let mut locker = ExperimentStorage::new("Locker");
    locker
        .store(
            registry.create_experiment(SINGLE_EXPERIMENT),
            Holder::Storage(Default::default()),
        )
        .unwrap();
    let locker = vessel.add_storage(locker);
    let spare = vessel.add_storage(ExperimentStorage::new("Spare"));
    let in_lab = Holder::Lab {
        lab: lab_id,
        slot: 0,
    };

    let request = vessel.request_move(Holder::Storage(locker)).unwrap();
    assert!(request.destinations.contains(&in_lab));
    assert!(vessel
        .resolve_move(Holder::Storage(locker), Some(in_lab))
        .unwrap());

    let host = HostSnapshot::at(10.0);
    let lab = vessel.lab_mut(lab_id).unwrap();
    lab.start_research(&host).unwrap();
    lab.start_experiment(0, &host).unwrap();
    assert!(vessel.request_move(in_lab).is_err());

    assert!(vessel.update_lab(lab_id, &HostSnapshot::at(10.5)).is_none());
    let report = vessel.update_lab(lab_id, &HostSnapshot::at(100.0)).unwrap();
    assert_eq!(report.completed, vec![(0, StepCompletion::Finished)]);

    let result = vessel.finalize_experiment(lab_id, 0, "orbit").unwrap();
    assert_eq!(result.subject, format!("{SINGLE_EXPERIMENT}@orbit"));
    assert!(result.value > 0.0);
    assert_eq!(result.value, vessel.science().value(&result.subject));
    assert!(vessel.request_move(in_lab).is_err());
    assert!(vessel
        .resolve_move(in_lab, Some(Holder::Storage(spare)))
        .is_err());
    assert_eq!(
        vessel.experiment(in_lab).unwrap().state(),
        ExperimentState::Finalized
    );
}

#[test]
fn catch_up_survives_save_and_reload() {
    let registry = test_registry();
    let mut vessel = Vessel::new();
    *vessel.pools_mut() = test_pools();
    let lab_id = vessel.add_lab(equipped_lab(&registry));
    let lab = vessel.lab_mut(lab_id).unwrap();
    lab.install_experiment(0, registry.create_experiment(SINGLE_EXPERIMENT))
        .unwrap();
    lab.start_research(&HostSnapshot::at(100.0)).unwrap();
    lab.start_experiment(0, &HostSnapshot::at(100.0)).unwrap();

    let data = vessel.serialize().unwrap();
    let mut restored = Vessel::deserialize(&data, &registry).unwrap();
    let (lab_id, lab) = restored.labs().next().unwrap();
    assert_eq!(lab.last_active(), 100.0);

    // Dormant for 30 s while unloaded.
    let report = restored
        .on_crew_changed(lab_id, &HostSnapshot::at(130.0))
        .unwrap();
    assert_eq!(report.elapsed, 30.0);
    let record = restored.lab(lab_id).unwrap().experiment(0).unwrap();
    assert!((record.progress_amount() - 30.0).abs() < 1e-9);

    // A second reactivation at the same time adds nothing.
    let report = restored
        .on_crew_changed(lab_id, &HostSnapshot::at(130.0))
        .unwrap();
    assert_eq!(report.elapsed, 0.0);
}

#[test]
fn research_started_at_time_zero_catches_up() {
    let registry = test_registry();
    let mut lab = equipped_lab(&registry);
    let mut pools = test_pools();
    let mut science = SubjectLedger::default();
    let host = HostSnapshot::at(0.0);

    lab.install_experiment(0, registry.create_experiment(SINGLE_EXPERIMENT))
        .unwrap();
    lab.start_research(&host).unwrap();
    lab.start_experiment(0, &host).unwrap();
    assert_eq!(lab.last_active(), 0.0);

    let report = lab.reactivate(&HostSnapshot::at(30.0), &mut pools, &mut science);
    assert_eq!(report.elapsed, 30.0);
    let record = lab.experiment(0).unwrap();
    assert_eq!(record.state(), ExperimentState::Running);
    assert!((record.progress_amount() - 30.0).abs() < 1e-9);

    let report = lab.reactivate(&HostSnapshot::at(100.0), &mut pools, &mut science);
    assert_eq!(report.completed, vec![(0, StepCompletion::Finished)]);
}

#[test]
fn reloaded_lab_active_since_time_zero_catches_up() {
    let registry = test_registry();
    let mut vessel = Vessel::new();
    *vessel.pools_mut() = test_pools();
    let lab_id = vessel.add_lab(equipped_lab(&registry));
    let lab = vessel.lab_mut(lab_id).unwrap();
    lab.install_experiment(0, registry.create_experiment(SINGLE_EXPERIMENT))
        .unwrap();
    lab.start_research(&HostSnapshot::at(0.0)).unwrap();
    lab.start_experiment(0, &HostSnapshot::at(0.0)).unwrap();

    let data = vessel.serialize().unwrap();
    let mut restored = Vessel::deserialize(&data, &registry).unwrap();
    let (lab_id, lab) = restored.labs().next().unwrap();
    assert!(lab.is_research_active());
    assert_eq!(lab.last_active(), 0.0);

    let report = restored
        .on_crew_changed(lab_id, &HostSnapshot::at(20.0))
        .unwrap();
    assert_eq!(report.elapsed, 20.0);
    let record = restored.lab(lab_id).unwrap().experiment(0).unwrap();
    assert!((record.progress_amount() - 20.0).abs() < 1e-9);
}

#[test]
fn paused_lab_stores_zero_timestamp() {
    let registry = test_registry();
    let mut lab = equipped_lab(&registry);
    lab.start_research(&HostSnapshot::at(5.0)).unwrap();
    lab.stop_research();

    let node: ConfigNode = lab.save();
    assert_eq!(node.get_f64("lastActive"), 0.0);
    assert!(!node.get_bool("researchActive"));
}

#[test]
fn crew_steps_do_not_reuse_occupants() {
    let registry = test_registry();
    let mut lab = equipped_lab(&registry);
    let mut pools = test_pools();
    let mut science = SubjectLedger::default();
    let host = HostSnapshot::at(100.0).with_crew(&["A", "B"]);

    lab.install_experiment(0, registry.create_experiment(TWO_CREW_EXPERIMENT))
        .unwrap();
    lab.start_research(&host).unwrap();
    let StartOutcome::AwaitingCrew(first) = lab.start_experiment(0, &host).unwrap() else {
        panic!("crew step should wait for a selection");
    };
    lab.resolve_crew_selection(0, first.ticket, Some("A"), &host)
        .unwrap();
    lab.reactivate(
        &HostSnapshot::at(110.0).with_crew(&["A", "B"]),
        &mut pools,
        &mut science,
    );
    assert_eq!(lab.experiment(0).unwrap().active_step_index(), 1);

    let StartOutcome::AwaitingCrew(second) = lab.start_experiment(0, &host).unwrap() else {
        panic!("crew step should wait for a selection");
    };
    assert_eq!(second.candidates, crew(&["B"]));
    assert!(lab
        .resolve_crew_selection(0, second.ticket, Some("A"), &host)
        .is_err());
    assert_eq!(lab.experiment(0).unwrap().state(), ExperimentState::Installed);
}
