//! Binary vessel snapshots.
//!
//! A snapshot is the vessel's persistence node tree encoded with `bitcode`
//! behind a versioned header. Loading resolves type tags through a
//! [`Registry`], so the same registry (or a compatible one) must be supplied.

use serde::{Deserialize, Serialize};

use crate::node::ConfigNode;
use crate::registry::Registry;
use crate::vessel::Vessel;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Magic number identifying a vessel snapshot.
pub const SNAPSHOT_MAGIC: u32 = 0x5741_4C01;

/// Current format version. Increment when breaking the wire format.
pub const FORMAT_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum SerializeError {
    #[error("bitcode encoding failed: {0}")]
    Encode(String),
}

#[derive(Debug, thiserror::Error)]
pub enum DeserializeError {
    #[error("invalid magic number: expected 0x{:08X}, got 0x{:08X}", SNAPSHOT_MAGIC, .0)]
    InvalidMagic(u32),
    #[error("unsupported format version: expected {}, got {}", FORMAT_VERSION, .0)]
    UnsupportedVersion(u32),
    #[error("snapshot from future version {0} (this build supports up to {FORMAT_VERSION})")]
    FutureVersion(u32),
    #[error("bitcode decoding failed: {0}")]
    Decode(String),
}

// ---------------------------------------------------------------------------
// Snapshot header
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotHeader {
    pub magic: u32,
    pub version: u32,
    /// Vessel composition revision when the snapshot was taken.
    pub revision: u64,
}

impl SnapshotHeader {
    pub fn new(revision: u64) -> Self {
        Self {
            magic: SNAPSHOT_MAGIC,
            version: FORMAT_VERSION,
            revision,
        }
    }

    pub fn validate(&self) -> Result<(), DeserializeError> {
        if self.magic != SNAPSHOT_MAGIC {
            return Err(DeserializeError::InvalidMagic(self.magic));
        }
        if self.version > FORMAT_VERSION {
            return Err(DeserializeError::FutureVersion(self.version));
        }
        if self.version < FORMAT_VERSION {
            return Err(DeserializeError::UnsupportedVersion(self.version));
        }
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct VesselSnapshot {
    header: SnapshotHeader,
    root: ConfigNode,
}

/// Decode only far enough to return the header.
pub fn read_snapshot_header(data: &[u8]) -> Result<SnapshotHeader, DeserializeError> {
    let snapshot: VesselSnapshot =
        bitcode::deserialize(data).map_err(|e| DeserializeError::Decode(e.to_string()))?;
    Ok(snapshot.header)
}

impl Vessel {
    pub fn serialize(&self) -> Result<Vec<u8>, SerializeError> {
        let snapshot = VesselSnapshot {
            header: SnapshotHeader::new(self.revision()),
            root: self.save(),
        };
        bitcode::serialize(&snapshot).map_err(|e| SerializeError::Encode(e.to_string()))
    }

    /// Decode a snapshot, validating the header before rebuilding.
    pub fn deserialize(data: &[u8], registry: &Registry) -> Result<Self, DeserializeError> {
        let snapshot: VesselSnapshot =
            bitcode::deserialize(data).map_err(|e| DeserializeError::Decode(e.to_string()))?;
        snapshot.header.validate()?;
        Ok(Vessel::load(&snapshot.root, registry))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experiment::ExperimentState;
    use crate::id::Holder;
    use crate::storage::ExperimentStorage;
    use crate::test_utils::*;

    #[test]
    fn snapshot_round_trip_keeps_vessel_contents() {
        let registry = test_registry();
        let mut vessel = Vessel::new();
        let lab = vessel.add_lab(equipped_lab(&registry));
        vessel
            .lab_mut(lab)
            .unwrap()
            .install_experiment(0, registry.create_experiment(TWO_STEP_EXPERIMENT))
            .unwrap();
        vessel.add_storage(ExperimentStorage::new("Locker"));
        vessel.science_mut().grow("KEES@orbit", 2.0, 1.0);

        let data = vessel.serialize().unwrap();
        assert_eq!(read_snapshot_header(&data).unwrap().revision, vessel.revision());

        let restored = Vessel::deserialize(&data, &registry).unwrap();
        assert_eq!(restored.science(), vessel.science());
        let (id, lab) = restored.labs().next().unwrap();
        let record = lab.experiment(0).unwrap();
        assert_eq!(record.state(), ExperimentState::Installed);
        assert_eq!(record.holder(), Some(Holder::Lab { lab: id, slot: 0 }));
        assert_eq!(restored.save(), Vessel::load(&vessel.save(), &registry).save());
    }

    #[test]
    fn garbage_is_a_decode_error() {
        let registry = test_registry();
        match Vessel::deserialize(&[0u8; 10], &registry) {
            Err(DeserializeError::Decode(_)) => {}
            Err(other) => panic!("expected Decode error, got: {other}"),
            Ok(_) => panic!("expected error, got Ok"),
        }
    }

    #[test]
    fn header_rejects_wrong_magic_and_versions() {
        let mut header = SnapshotHeader::new(0);
        assert!(header.validate().is_ok());

        header.version = FORMAT_VERSION + 1;
        assert!(matches!(
            header.validate(),
            Err(DeserializeError::FutureVersion(_))
        ));

        header.version = FORMAT_VERSION;
        header.magic = 0xDEAD_BEEF;
        assert!(matches!(
            header.validate(),
            Err(DeserializeError::InvalidMagic(0xDEAD_BEEF))
        ));
    }

    #[test]
    fn future_snapshot_is_refused() {
        let registry = test_registry();
        let snapshot = VesselSnapshot {
            header: SnapshotHeader {
                version: FORMAT_VERSION + 1,
                ..SnapshotHeader::new(0)
            },
            root: Vessel::new().save(),
        };
        let data = bitcode::serialize(&snapshot).unwrap();
        assert!(matches!(
            Vessel::deserialize(&data, &registry),
            Err(DeserializeError::FutureVersion(_))
        ));
    }
}
