//! The vessel: labs, experiment storages, resource pools and research.
//!
//! Records move between holders with a two-phase hand-off.
//! [`Vessel::request_move`] lists the free destinations for a record and
//! [`Vessel::resolve_move`] carries out the player's choice. The hand-off is
//! atomic: the destination is checked first, and a record that cannot be
//! placed goes back to its source.
//!
//! Composition changes (labs or storages added or removed) bump
//! [`Vessel::revision`], which invalidates the cached destination list.

use slotmap::SlotMap;

use crate::experiment::{ExperimentRecord, ExperimentResult, ExperimentState};
use crate::host::LabHost;
use crate::id::{Holder, LabId, StorageId};
use crate::lab::{Lab, LabError, ReactivationReport};
use crate::node::ConfigNode;
use crate::registry::Registry;
use crate::resource::PoolSet;
use crate::science::{DEFAULT_SUBJECT_CAP, SubjectLedger};
use crate::slot::SlotError;
use crate::storage::ExperimentStorage;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MoveError {
    #[error("no holder {0:?} on this vessel")]
    UnknownHolder(Holder),

    #[error("{0:?} holds no experiment")]
    NoExperiment(Holder),

    #[error("a {0} experiment cannot be moved")]
    NotMovable(ExperimentState),

    #[error("{0:?} cannot take this experiment")]
    DestinationUnavailable(Holder),

    #[error(transparent)]
    Slot(#[from] SlotError),

    #[error(transparent)]
    Lab(#[from] LabError),
}

/// Free destinations for one record, answered with
/// [`Vessel::resolve_move`].
#[derive(Debug, Clone, PartialEq)]
pub struct MoveRequest {
    pub from: Holder,
    pub experiment: String,
    pub destinations: Vec<Holder>,
    /// Composition revision the list was computed at.
    pub revision: u64,
}

/// A place a record could go, independent of what it currently holds.
#[derive(Debug, Clone, PartialEq)]
struct Candidate {
    holder: Holder,
    /// Slot capability; `None` for storages.
    capability: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Vessel {
    labs: SlotMap<LabId, Lab>,
    storages: SlotMap<StorageId, ExperimentStorage>,
    pools: PoolSet,
    science: SubjectLedger,
    revision: u64,
    candidates: Option<(u64, Vec<Candidate>)>,
}

impl Vessel {
    pub fn new() -> Self {
        Self::default()
    }

    // -- Composition --

    pub fn add_lab(&mut self, mut lab: Lab) -> LabId {
        self.revision += 1;
        self.labs.insert_with_key(|id| {
            lab.bind(id);
            lab
        })
    }

    pub fn remove_lab(&mut self, id: LabId) -> Option<Lab> {
        let lab = self.labs.remove(id)?;
        self.revision += 1;
        Some(lab)
    }

    pub fn add_storage(&mut self, mut storage: ExperimentStorage) -> StorageId {
        self.revision += 1;
        self.storages.insert_with_key(|id| {
            storage.rebind(Holder::Storage(id));
            storage
        })
    }

    pub fn remove_storage(&mut self, id: StorageId) -> Option<ExperimentStorage> {
        let storage = self.storages.remove(id)?;
        self.revision += 1;
        Some(storage)
    }

    /// Incremented on every composition change.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn lab(&self, id: LabId) -> Option<&Lab> {
        self.labs.get(id)
    }

    pub fn lab_mut(&mut self, id: LabId) -> Option<&mut Lab> {
        self.labs.get_mut(id)
    }

    pub fn labs(&self) -> impl Iterator<Item = (LabId, &Lab)> {
        self.labs.iter()
    }

    pub fn storage(&self, id: StorageId) -> Option<&ExperimentStorage> {
        self.storages.get(id)
    }

    pub fn storage_mut(&mut self, id: StorageId) -> Option<&mut ExperimentStorage> {
        self.storages.get_mut(id)
    }

    pub fn storages(&self) -> impl Iterator<Item = (StorageId, &ExperimentStorage)> {
        self.storages.iter()
    }

    pub fn pools(&self) -> &PoolSet {
        &self.pools
    }

    pub fn pools_mut(&mut self) -> &mut PoolSet {
        &mut self.pools
    }

    pub fn science(&self) -> &SubjectLedger {
        &self.science
    }

    pub fn science_mut(&mut self) -> &mut SubjectLedger {
        &mut self.science
    }

    /// The record at `holder`, if any.
    pub fn experiment(&self, holder: Holder) -> Option<&ExperimentRecord> {
        match holder {
            Holder::Storage(id) => self.storages.get(id)?.experiment(),
            Holder::Lab { lab, slot } => self.labs.get(lab)?.experiment(slot),
        }
    }

    // -- Lab driving --

    /// Periodic update of one lab. Labs that are not due return `None`.
    pub fn update_lab(&mut self, id: LabId, host: &dyn LabHost) -> Option<ReactivationReport> {
        let lab = self.labs.get_mut(id)?;
        lab.update(host, &mut self.pools, &mut self.science)
    }

    /// Periodic update of every lab against the same host state.
    pub fn update(&mut self, host: &dyn LabHost) -> Vec<(LabId, ReactivationReport)> {
        let mut reports = Vec::new();
        for (id, lab) in &mut self.labs {
            if let Some(report) = lab.update(host, &mut self.pools, &mut self.science) {
                reports.push((id, report));
            }
        }
        reports
    }

    pub fn on_crew_changed(&mut self, id: LabId, host: &dyn LabHost) -> Option<ReactivationReport> {
        let lab = self.labs.get_mut(id)?;
        Some(lab.on_crew_changed(host, &mut self.pools, &mut self.science))
    }

    pub fn finalize_experiment(
        &mut self,
        id: LabId,
        slot: usize,
        situation: &str,
    ) -> Result<ExperimentResult, MoveError> {
        let lab = self
            .labs
            .get_mut(id)
            .ok_or(MoveError::UnknownHolder(Holder::Lab { lab: id, slot }))?;
        Ok(lab.finalize_experiment(slot, &self.science, situation)?)
    }

    // -- Moves --

    /// List the free destinations for the record at `from`.
    pub fn request_move(&mut self, from: Holder) -> Result<MoveRequest, MoveError> {
        let departed = departed(self.movable(from)?);

        self.refresh_candidates();
        let destinations = self
            .candidates
            .as_ref()
            .map(|(_, list)| list.as_slice())
            .unwrap_or_default()
            .iter()
            .filter(|c| c.holder != from)
            .filter(|c| {
                c.capability
                    .as_ref()
                    .is_none_or(|tag| *tag == departed.required_capability)
            })
            .map(|c| c.holder)
            .filter(|&to| self.accepts(to, &departed))
            .collect();

        Ok(MoveRequest {
            from,
            experiment: departed.type_tag,
            destinations,
            revision: self.revision,
        })
    }

    /// Move the record at `from` to `to`. `None` cancels and returns
    /// `Ok(false)`.
    pub fn resolve_move(&mut self, from: Holder, to: Option<Holder>) -> Result<bool, MoveError> {
        let Some(to) = to else {
            return Ok(false);
        };
        let departed = departed(self.movable(from)?);
        if to == from || !self.accepts(to, &departed) {
            tracing::warn!(?from, ?to, "move destination unavailable");
            return Err(MoveError::DestinationUnavailable(to));
        }

        let record = self.take(from)?;
        match self.place(to, record) {
            Ok(()) => {
                tracing::debug!(?from, ?to, "experiment moved");
                Ok(true)
            }
            Err((record, err)) => {
                tracing::warn!(?from, ?to, %err, "move failed, restoring experiment");
                self.restore(from, record);
                Err(err)
            }
        }
    }

    fn movable(&self, from: Holder) -> Result<&ExperimentRecord, MoveError> {
        if !self.holder_exists(from) {
            return Err(MoveError::UnknownHolder(from));
        }
        let record = self
            .experiment(from)
            .ok_or(MoveError::NoExperiment(from))?;
        if !record.can_move() {
            return Err(MoveError::NotMovable(record.state()));
        }
        Ok(record)
    }

    fn holder_exists(&self, holder: Holder) -> bool {
        match holder {
            Holder::Storage(id) => self.storages.contains_key(id),
            Holder::Lab { lab, slot } => self
                .labs
                .get(lab)
                .is_some_and(|l| slot < l.slots().len()),
        }
    }

    /// Whether `to` would take `departed`, a record already in the state it
    /// leaves its holder with.
    fn accepts(&self, to: Holder, departed: &ExperimentRecord) -> bool {
        match to {
            Holder::Storage(id) => self.storages.get(id).is_some_and(|s| s.accepts(departed)),
            Holder::Lab { lab, slot } => self
                .labs
                .get(lab)
                .and_then(|l| l.slot(slot))
                .is_some_and(|s| s.accepts(departed)),
        }
    }

    fn take(&mut self, from: Holder) -> Result<ExperimentRecord, MoveError> {
        match from {
            Holder::Storage(id) => Ok(self
                .storages
                .get_mut(id)
                .ok_or(MoveError::UnknownHolder(from))?
                .take()?),
            Holder::Lab { lab, slot } => Ok(self
                .labs
                .get_mut(lab)
                .ok_or(MoveError::UnknownHolder(from))?
                .take_experiment(slot)?),
        }
    }

    fn place(
        &mut self,
        to: Holder,
        record: ExperimentRecord,
    ) -> Result<(), (ExperimentRecord, MoveError)> {
        match to {
            Holder::Storage(id) => match self.storages.get_mut(id) {
                Some(storage) => storage
                    .store(record, to)
                    .map_err(|r| (r.item, MoveError::Slot(r.error))),
                None => Err((record, MoveError::UnknownHolder(to))),
            },
            Holder::Lab { lab, slot } => match self.labs.get_mut(lab) {
                Some(target) => target
                    .install_experiment(slot, record)
                    .map_err(|r| (r.item, MoveError::Slot(r.error))),
                None => Err((record, MoveError::UnknownHolder(to))),
            },
        }
    }

    fn restore(&mut self, from: Holder, mut record: ExperimentRecord) {
        match from {
            Holder::Storage(id) => {
                if let Some(storage) = self.storages.get_mut(id) {
                    record.set_holder(Some(from));
                    storage.restore(record);
                }
            }
            Holder::Lab { lab, slot } => {
                if let Some(target) = self.labs.get_mut(lab) {
                    target.restore_experiment(slot, record);
                }
            }
        }
    }

    fn refresh_candidates(&mut self) {
        if matches!(&self.candidates, Some((rev, _)) if *rev == self.revision) {
            return;
        }
        let mut list: Vec<Candidate> = self
            .storages
            .keys()
            .map(|id| Candidate {
                holder: Holder::Storage(id),
                capability: None,
            })
            .collect();
        for (lab_id, lab) in &self.labs {
            for (index, slot) in lab.slots().iter().enumerate() {
                list.push(Candidate {
                    holder: Holder::Lab {
                        lab: lab_id,
                        slot: index,
                    },
                    capability: Some(slot.capability().to_string()),
                });
            }
        }
        tracing::trace!(revision = self.revision, candidates = list.len(), "destinations rebuilt");
        self.candidates = Some((self.revision, list));
    }

    // -- Persistence --

    pub fn save(&self) -> ConfigNode {
        let mut node = ConfigNode::new("VESSEL");
        node.add_value("revision", self.revision);
        let mut pools = ConfigNode::new("POOLS");
        self.pools.save_into(&mut pools);
        node.add_node(pools);
        let mut science = ConfigNode::new("SCIENCE");
        science.add_value("defaultCap", self.science.default_cap());
        self.science.save_into(&mut science);
        node.add_node(science);
        for lab in self.labs.values() {
            node.add_node(lab.save());
        }
        for storage in self.storages.values() {
            node.add_node(storage.save());
        }
        node
    }

    /// Rebuild a vessel. Labs and storages get fresh ids; hosted records
    /// are pointed at them.
    pub fn load(node: &ConfigNode, registry: &Registry) -> Self {
        let mut vessel = Self::new();
        if let Some(pools) = node.node("POOLS") {
            vessel.pools = PoolSet::load_from(pools);
        }
        if let Some(science) = node.node("SCIENCE") {
            let cap = match science.get_f64("defaultCap") {
                cap if cap > 0.0 => cap,
                _ => DEFAULT_SUBJECT_CAP,
            };
            vessel.science = SubjectLedger::load_from(science, cap);
        }
        for lab in node.nodes_named("LAB") {
            vessel.add_lab(Lab::load(lab, registry));
        }
        for storage in node.nodes_named("STORAGE") {
            vessel.add_storage(ExperimentStorage::load(storage, registry));
        }
        vessel.revision = vessel
            .revision
            .max(node.parse::<u64>("revision").unwrap_or(0));
        vessel
    }
}

/// The record will be STORED after leaving its holder.
/// Copy of `record` as it would look after leaving its holder.
fn departed(record: &ExperimentRecord) -> ExperimentRecord {
    let mut record = record.clone();
    record.leave_lab();
    record
}
