//! Resolution pipeline: reads data files, checks cross-references, builds
//! the registry.
//!
//! A data directory holds `experiments`, `equipment` and an optional `lab`
//! file, each in RON, TOML, or JSON. Format is taken from the extension; two
//! formats for the same base name is an error.

use serde::de::DeserializeOwned;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use stationlab_core::config::LabConfig;
use stationlab_core::registry::{Registry, RegistryBuilder, RegistryError};

use crate::schema::{EquipmentData, ExperimentData};

// ===========================================================================
// Errors
// ===========================================================================

#[derive(Debug, thiserror::Error)]
pub enum DataLoadError {
    #[error("no '{file}' data file (.ron, .toml or .json) in {dir}")]
    MissingRequired { file: String, dir: PathBuf },

    #[error("{file}: extension is not ron, toml or json")]
    UnsupportedFormat { file: PathBuf },

    /// Same base name in two formats; neither is picked.
    #[error("both {a} and {b} exist")]
    ConflictingFormats { a: PathBuf, b: PathBuf },

    #[error("{file}: {detail}")]
    Parse { file: PathBuf, detail: String },

    /// A capability named by an experiment or lab slot that no equipment
    /// provides.
    #[error("{file}: unknown {expected_kind} '{name}'")]
    UnresolvedRef {
        file: PathBuf,
        name: String,
        expected_kind: &'static str,
    },

    #[error("{file}: '{name}' defined twice")]
    DuplicateName { file: PathBuf, name: String },

    /// The definitions parsed but failed registry validation.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// An I/O error occurred.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

// ===========================================================================
// Format detection
// ===========================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Ron,
    Toml,
    Json,
}

impl Format {
    /// Probe order for data files.
    pub const ALL: [Format; 3] = [Format::Ron, Format::Toml, Format::Json];

    pub fn extension(self) -> &'static str {
        match self {
            Format::Ron => "ron",
            Format::Toml => "toml",
            Format::Json => "json",
        }
    }
}

pub fn detect_format(path: &Path) -> Result<Format, DataLoadError> {
    let ext = path.extension().and_then(|e| e.to_str());
    Format::ALL
        .into_iter()
        .find(|f| Some(f.extension()) == ext)
        .ok_or_else(|| DataLoadError::UnsupportedFormat {
            file: path.to_path_buf(),
        })
}

// ===========================================================================
// File discovery
// ===========================================================================

/// Find `{base_name}.{ron,toml,json}` in `dir`. More than one match is a
/// [`DataLoadError::ConflictingFormats`].
pub fn find_data_file(dir: &Path, base_name: &str) -> Result<Option<PathBuf>, DataLoadError> {
    let mut present = Format::ALL
        .into_iter()
        .map(|f| dir.join(format!("{base_name}.{}", f.extension())))
        .filter(|p| p.exists());
    let found = present.next();
    match (found, present.next()) {
        (Some(a), Some(b)) => Err(DataLoadError::ConflictingFormats { a, b }),
        (found, _) => Ok(found),
    }
}

/// [`find_data_file`], with absence as an error.
pub fn require_data_file(dir: &Path, base_name: &str) -> Result<PathBuf, DataLoadError> {
    find_data_file(dir, base_name)?.ok_or_else(|| DataLoadError::MissingRequired {
        file: base_name.to_string(),
        dir: dir.to_path_buf(),
    })
}

// ===========================================================================
// Deserialization
// ===========================================================================

fn parse_error(path: &Path, detail: impl ToString) -> DataLoadError {
    DataLoadError::Parse {
        file: path.to_path_buf(),
        detail: detail.to_string(),
    }
}

/// Read and deserialize a file in the format its extension names.
pub fn deserialize_file<T: DeserializeOwned>(path: &Path) -> Result<T, DataLoadError> {
    let format = detect_format(path)?;
    let content = std::fs::read_to_string(path)?;

    match format {
        Format::Ron => ron::from_str(&content).map_err(|e| parse_error(path, e)),
        Format::Json => serde_json::from_str(&content).map_err(|e| parse_error(path, e)),
        Format::Toml => toml::from_str(&content).map_err(|e| parse_error(path, e)),
    }
}

/// Deserialize a list. TOML has no top-level arrays, so there the list sits
/// under `toml_key`; RON and JSON hold it directly.
pub fn deserialize_list<T: DeserializeOwned>(
    path: &Path,
    toml_key: &str,
) -> Result<Vec<T>, DataLoadError> {
    if detect_format(path)? != Format::Toml {
        return deserialize_file(path);
    }
    let content = std::fs::read_to_string(path)?;
    let table: toml::Value = toml::from_str(&content).map_err(|e| parse_error(path, e))?;
    let array = table
        .get(toml_key)
        .ok_or_else(|| parse_error(path, format!("missing key '{toml_key}' in TOML file")))?
        .clone();
    array
        .try_into()
        .map_err(|e: toml::de::Error| parse_error(path, e))
}

// ===========================================================================
// Name resolution helpers
// ===========================================================================

pub fn resolve_name<'a, V>(
    map: &'a HashMap<String, V>,
    name: &str,
    file: &Path,
    expected_kind: &'static str,
) -> Result<&'a V, DataLoadError> {
    map.get(name).ok_or_else(|| DataLoadError::UnresolvedRef {
        file: file.to_path_buf(),
        name: name.to_string(),
        expected_kind,
    })
}

/// Record `name` as seen; a second sighting is a `DuplicateName`.
pub fn claim_name(seen: &mut HashSet<String>, name: &str, file: &Path) -> Result<(), DataLoadError> {
    if seen.insert(name.to_string()) {
        Ok(())
    } else {
        Err(DataLoadError::DuplicateName {
            file: file.to_path_buf(),
            name: name.to_string(),
        })
    }
}

// ===========================================================================
// Pipeline
// ===========================================================================

/// Everything loaded from one data directory.
#[derive(Debug)]
pub struct StationData {
    pub registry: Registry,
    pub lab_config: LabConfig,
}

/// Load `experiments`, `equipment` and the optional `lab` file from `dir`.
///
/// Every experiment's capability and every lab slot must name a capability
/// provided by some equipment type. A missing lab file gives
/// [`LabConfig::default`].
pub fn load_station_data(dir: &Path) -> Result<StationData, DataLoadError> {
    let equipment_path = require_data_file(dir, "equipment")?;
    let experiments_path = require_data_file(dir, "experiments")?;

    // -- Equipment --
    let equipment: Vec<EquipmentData> = deserialize_list(&equipment_path, "equipment")?;
    // Capability tag -> first equipment providing it.
    let mut capabilities: HashMap<String, String> = HashMap::new();
    let mut seen = HashSet::new();
    let mut builder = RegistryBuilder::new();
    for data in equipment {
        claim_name(&mut seen, &data.abbreviation, &equipment_path)?;
        capabilities
            .entry(data.capability.clone())
            .or_insert_with(|| data.abbreviation.clone());
        builder.register_equipment(data.into_definition());
    }

    // -- Experiments --
    let experiments: Vec<ExperimentData> = deserialize_list(&experiments_path, "experiments")?;
    let mut seen = HashSet::new();
    for data in experiments {
        claim_name(&mut seen, &data.type_tag, &experiments_path)?;
        resolve_name(&capabilities, &data.capability, &experiments_path, "capability")?;
        builder.register_experiment(data.into_definition());
    }

    // -- Lab --
    let lab_config = match find_data_file(dir, "lab")? {
        Some(path) => {
            let config: LabConfig = deserialize_file(&path)?;
            for slot in &config.slots {
                resolve_name(&capabilities, slot, &path, "capability")?;
            }
            config
        }
        None => LabConfig::default(),
    };

    let registry = builder.build()?;
    tracing::info!(
        experiments = registry.experiment_count(),
        equipment = registry.equipment_count(),
        slots = lab_config.slots.len(),
        "station data loaded"
    );
    Ok(StationData {
        registry,
        lab_config,
    })
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ExperimentData;
    use std::fs;

    fn make_test_dir(suffix: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "stationlab_data_test_{suffix}_{}",
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn cleanup(dir: &Path) {
        let _ = fs::remove_dir_all(dir);
    }

    const EQUIPMENT_RON: &str = r#"[
        (
            abbreviation: "EXP-R",
            name: "Exposure rack",
            capability: "EXP",
            mass: 0.4,
            production: (product: "LabTime", product_per_hour: 3600.0, reactant_per_product: 0.1),
        ),
    ]"#;

    const EXPERIMENTS_RON: &str = r#"[
        (
            type: "KEES-PPMD",
            name: "Micrometeoroid detector",
            capability: "EXP",
            mass: 0.05,
            steps: [(name: "Observe", resource: "LabTime", amount: 50.0)],
        ),
        (
            type: "KEES-CREW",
            name: "Crew assisted",
            capability: "EXP",
            steps: [(name: "Assist", kind: crew, resource: "LabTime", amount: 10.0)],
        ),
    ]"#;

    fn write_station(dir: &Path) {
        fs::write(dir.join("equipment.ron"), EQUIPMENT_RON).unwrap();
        fs::write(dir.join("experiments.ron"), EXPERIMENTS_RON).unwrap();
    }

    // -----------------------------------------------------------------------
    // detect_format / find_data_file
    // -----------------------------------------------------------------------

    #[test]
    fn detect_format_by_extension() {
        assert_eq!(detect_format(Path::new("lab.ron")).unwrap(), Format::Ron);
        assert_eq!(detect_format(Path::new("lab.toml")).unwrap(), Format::Toml);
        assert_eq!(detect_format(Path::new("lab.json")).unwrap(), Format::Json);
        assert!(matches!(
            detect_format(Path::new("lab.yaml")),
            Err(DataLoadError::UnsupportedFormat { .. })
        ));
        assert!(matches!(
            detect_format(Path::new("lab")),
            Err(DataLoadError::UnsupportedFormat { .. })
        ));
    }

    #[test]
    fn find_data_file_missing_and_found() {
        let dir = make_test_dir("find");
        assert_eq!(find_data_file(&dir, "lab").unwrap(), None);

        fs::write(dir.join("lab.toml"), "").unwrap();
        assert_eq!(find_data_file(&dir, "lab").unwrap(), Some(dir.join("lab.toml")));

        cleanup(&dir);
    }

    #[test]
    fn find_data_file_conflict() {
        let dir = make_test_dir("find_conflict");
        fs::write(dir.join("experiments.ron"), "[]").unwrap();
        fs::write(dir.join("experiments.json"), "[]").unwrap();

        assert!(matches!(
            find_data_file(&dir, "experiments"),
            Err(DataLoadError::ConflictingFormats { .. })
        ));

        cleanup(&dir);
    }

    #[test]
    fn require_data_file_missing() {
        let dir = make_test_dir("require_missing");
        let result = require_data_file(&dir, "equipment");
        assert!(matches!(
            result,
            Err(DataLoadError::MissingRequired { ref file, .. }) if file == "equipment"
        ));
        cleanup(&dir);
    }

    // -----------------------------------------------------------------------
    // deserialize_file / deserialize_list
    // -----------------------------------------------------------------------

    #[test]
    fn deserialize_list_json() {
        let dir = make_test_dir("list_json");
        let path = dir.join("experiments.json");
        fs::write(
            &path,
            r#"[{"type": "A", "name": "a", "capability": "EXP",
                 "steps": [{"name": "s", "resource": "LabTime", "amount": 1}]}]"#,
        )
        .unwrap();

        let list: Vec<ExperimentData> = deserialize_list(&path, "experiments").unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].type_tag, "A");

        cleanup(&dir);
    }

    #[test]
    fn deserialize_list_toml_missing_key() {
        let dir = make_test_dir("list_toml_missing");
        let path = dir.join("experiments.toml");
        fs::write(&path, r#"foo = "bar""#).unwrap();

        let result: Result<Vec<ExperimentData>, _> = deserialize_list(&path, "experiments");
        assert!(matches!(result, Err(DataLoadError::Parse { .. })));

        cleanup(&dir);
    }

    #[test]
    fn deserialize_file_parse_error() {
        let dir = make_test_dir("parse_err");
        let path = dir.join("lab.ron");
        fs::write(&path, "this is not valid RON {{{").unwrap();

        let result: Result<LabConfig, _> = deserialize_file(&path);
        assert!(matches!(result, Err(DataLoadError::Parse { .. })));

        cleanup(&dir);
    }

    // -----------------------------------------------------------------------
    // load_station_data
    // -----------------------------------------------------------------------

    #[test]
    fn load_without_lab_file_uses_default_config() {
        let dir = make_test_dir("load_default");
        write_station(&dir);

        let data = load_station_data(&dir).unwrap();
        assert_eq!(data.registry.experiment_count(), 2);
        assert_eq!(data.registry.equipment_count(), 1);
        assert_eq!(data.lab_config, LabConfig::default());

        let unit = data.registry.create_equipment("EXP-R").unwrap();
        assert_eq!(unit.production().reactant, "ElectricCharge");
        let record = data.registry.create_experiment("KEES-CREW");
        assert!(record.steps().iter().all(|s| s.is_crew()));

        cleanup(&dir);
    }

    #[test]
    fn load_toml_lab_config() {
        let dir = make_test_dir("load_lab_toml");
        write_station(&dir);
        fs::write(
            dir.join("lab.toml"),
            r#"
minimum_crew = 1
slots = ["EXP", "EXP"]
max_catch_up = 21600.0

[[rates]]
resource = "ElectricCharge"
per_hour = 36.0

[research]
subject = "station@orbit"
value_per_hour = 0.5
"#,
        )
        .unwrap();

        let config = load_station_data(&dir).unwrap().lab_config;
        assert_eq!(config.minimum_crew, 1);
        assert_eq!(config.slots.len(), 2);
        assert_eq!(config.reactivation_interval, 1.0);
        assert_eq!(config.max_catch_up, Some(21600.0));
        assert_eq!(config.rates[0].per_hour, 36.0);
        assert_eq!(config.research.unwrap().subject, "station@orbit");

        cleanup(&dir);
    }

    #[test]
    fn unknown_capability_is_unresolved() {
        let dir = make_test_dir("load_unresolved");
        write_station(&dir);
        fs::write(dir.join("lab.json"), r#"{"slots": ["EXP", "CIR"]}"#).unwrap();

        let result = load_station_data(&dir);
        assert!(matches!(
            result,
            Err(DataLoadError::UnresolvedRef { ref name, expected_kind: "capability", .. })
                if name == "CIR"
        ));

        cleanup(&dir);
    }

    #[test]
    fn duplicate_experiment_is_rejected() {
        let dir = make_test_dir("load_duplicate");
        fs::write(dir.join("equipment.ron"), EQUIPMENT_RON).unwrap();
        fs::write(
            dir.join("experiments.json"),
            r#"[
                {"type": "A", "name": "a", "capability": "EXP",
                 "steps": [{"name": "s", "resource": "LabTime", "amount": 1}]},
                {"type": "A", "name": "again", "capability": "EXP",
                 "steps": [{"name": "s", "resource": "LabTime", "amount": 1}]}
            ]"#,
        )
        .unwrap();

        assert!(matches!(
            load_station_data(&dir),
            Err(DataLoadError::DuplicateName { ref name, .. }) if name == "A"
        ));

        cleanup(&dir);
    }

    #[test]
    fn invalid_step_surfaces_registry_error() {
        let dir = make_test_dir("load_invalid_step");
        fs::write(dir.join("equipment.ron"), EQUIPMENT_RON).unwrap();
        fs::write(
            dir.join("experiments.ron"),
            r#"[(type: "A", name: "a", capability: "EXP",
                 steps: [(name: "s", resource: "LabTime", amount: 0.0)])]"#,
        )
        .unwrap();

        assert!(matches!(
            load_station_data(&dir),
            Err(DataLoadError::Registry(RegistryError::InvalidStep { .. }))
        ));

        cleanup(&dir);
    }

    #[test]
    fn missing_experiments_file() {
        let dir = make_test_dir("load_missing");
        fs::write(dir.join("equipment.ron"), EQUIPMENT_RON).unwrap();

        assert!(matches!(
            load_station_data(&dir),
            Err(DataLoadError::MissingRequired { .. })
        ));

        cleanup(&dir);
    }

    #[test]
    fn claim_name_rejects_second_sighting() {
        let mut seen = HashSet::new();
        let file = Path::new("experiments.ron");
        assert!(claim_name(&mut seen, "KEES-PPMD", file).is_ok());
        assert!(claim_name(&mut seen, "KEES-ODC", file).is_ok());
        let err = claim_name(&mut seen, "KEES-PPMD", file).unwrap_err();
        assert_eq!(err.to_string(), "experiments.ron: 'KEES-PPMD' defined twice");
    }
}
