//! Loads a station from data files and runs a lab built from it.

use std::fs;
use std::path::PathBuf;

use stationlab_core::experiment::ExperimentState;
use stationlab_core::host::HostSnapshot;
use stationlab_core::lab::Lab;
use stationlab_core::resource::{Pool, PoolSet, ResourcePools};
use stationlab_core::science::SubjectLedger;
use stationlab_data::load_station_data;

fn make_test_dir(suffix: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "stationlab_data_it_{suffix}_{}",
        std::process::id()
    ));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    dir
}

#[test]
fn lab_from_mixed_format_files_runs_an_experiment() {
    let dir = make_test_dir("mixed");
    fs::write(
        dir.join("equipment.toml"),
        r#"
[[equipment]]
abbreviation = "EXP-R"
name = "Exposure rack"
capability = "EXP"
mass = 0.4
cost = 2000.0

[equipment.production]
product = "LabTime"
product_per_hour = 3600.0
reactant_per_product = 0.1
"#,
    )
    .unwrap();
    fs::write(
        dir.join("experiments.json"),
        r#"[{"type": "KEES-PPMD", "name": "Detector", "capability": "EXP", "mass": 0.05,
             "steps": [{"name": "Observe", "resource": "LabTime", "amount": 50}]}]"#,
    )
    .unwrap();
    fs::write(
        dir.join("lab.ron"),
        r#"(
            minimum_crew: 1,
            slots: ["EXP"],
            rates: [(resource: "ElectricCharge", per_hour: 36.0)],
        )"#,
    )
    .unwrap();

    let data = load_station_data(&dir).unwrap();
    let mut lab = Lab::new(data.lab_config);
    lab.install_equipment(0, data.registry.create_equipment("EXP-R").unwrap())
        .unwrap();
    lab.install_experiment(0, data.registry.create_experiment("KEES-PPMD"))
        .unwrap();

    let mut pools = PoolSet::new();
    pools.insert("ElectricCharge", Pool::new(100.0, 100.0));
    let mut science = SubjectLedger::default();

    let empty = HostSnapshot::at(10.0);
    assert!(lab.start_research(&empty).is_err());
    let host = HostSnapshot::at(10.0).with_crew(&["Valentina"]);
    lab.start_research(&host).unwrap();
    lab.start_experiment(0, &host).unwrap();

    let later = HostSnapshot::at(70.0).with_crew(&["Valentina"]);
    lab.reactivate(&later, &mut pools, &mut science);
    assert_eq!(lab.experiment(0).unwrap().state(), ExperimentState::Finished);
    // 50 s of rack draw at 0.1/s plus the lab's own 0.01/s base draw.
    assert!((pools.amount("ElectricCharge") - (100.0 - 5.0 - 0.6)).abs() < 1e-6);

    let _ = fs::remove_dir_all(&dir);
}
