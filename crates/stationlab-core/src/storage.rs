use crate::experiment::{ExperimentRecord, ExperimentState};
use crate::id::Holder;
use crate::node::ConfigNode;
use crate::registry::Registry;
use crate::slot::{Rejected, SlotError};

/// A container holding at most one experiment outside any lab.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExperimentStorage {
    pub name: String,
    experiment: Option<ExperimentRecord>,
}

impl ExperimentStorage {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            experiment: None,
        }
    }

    pub fn is_free(&self) -> bool {
        self.experiment.is_none()
    }

    pub fn experiment(&self) -> Option<&ExperimentRecord> {
        self.experiment.as_ref()
    }

    /// Accept a record. Records still INSTALLED or RUNNING are refused, as
    /// are empty records.
    pub fn store(
        &mut self,
        mut record: ExperimentRecord,
        holder: Holder,
    ) -> Result<(), Rejected<ExperimentRecord>> {
        let error = if self.experiment.is_some() {
            Some(SlotError::ExperimentSlotTaken)
        } else if record.is_empty() {
            Some(SlotError::NoExperiment)
        } else if matches!(
            record.state(),
            ExperimentState::Installed | ExperimentState::Running
        ) {
            Some(SlotError::NotMovable(record.state()))
        } else {
            None
        };
        if let Some(error) = error {
            tracing::warn!(storage = %self.name, %error, "store refused");
            return Err(Rejected { item: record, error });
        }
        record.set_holder(Some(holder));
        self.experiment = Some(record);
        Ok(())
    }

    /// Whether `record` could be stored here right now.
    pub fn accepts(&self, record: &ExperimentRecord) -> bool {
        self.is_free()
            && !record.is_empty()
            && !matches!(
                record.state(),
                ExperimentState::Installed | ExperimentState::Running
            )
    }

    /// Hand the record to a new holder. FINALIZED records stay.
    pub fn take(&mut self) -> Result<ExperimentRecord, SlotError> {
        match self.experiment.as_ref().map(|r| (r.can_move(), r.state())) {
            None => Err(SlotError::NoExperiment),
            Some((false, state)) => Err(SlotError::NotMovable(state)),
            Some((true, _)) => {
                let mut record = self.experiment.take().ok_or(SlotError::NoExperiment)?;
                record.set_holder(None);
                Ok(record)
            }
        }
    }

    /// Detach whatever is stored, e.g. on recovery.
    pub fn remove(&mut self) -> Option<ExperimentRecord> {
        let mut record = self.experiment.take()?;
        record.set_holder(None);
        Some(record)
    }

    pub(crate) fn restore(&mut self, record: ExperimentRecord) {
        self.experiment = Some(record);
    }

    pub(crate) fn rebind(&mut self, holder: Holder) {
        if let Some(record) = self.experiment.as_mut() {
            record.set_holder(Some(holder));
        }
    }

    pub fn save(&self) -> ConfigNode {
        let mut node = ConfigNode::new("STORAGE");
        node.add_value("name", &self.name);
        if let Some(record) = &self.experiment {
            node.add_node(record.save());
        }
        node
    }

    /// Rebuild a storage. A stored record saved as INSTALLED or RUNNING is
    /// demoted to STORED.
    pub fn load(node: &ConfigNode, registry: &Registry) -> Self {
        let mut storage = Self::new(node.get_str("name"));
        let Some(mut record) = node
            .node("EXPERIMENT")
            .map(|n| ExperimentRecord::load(n, registry))
        else {
            return storage;
        };
        if record.is_empty() {
            tracing::warn!(storage = %storage.name, "dropping unknown stored experiment");
            return storage;
        }
        if matches!(
            record.state(),
            ExperimentState::Installed | ExperimentState::Running
        ) {
            tracing::warn!(
                storage = %storage.name,
                state = %record.state(),
                "stored experiment outside a lab, demoting to STORED"
            );
            record.demote_to_stored();
        }
        storage.experiment = Some(record);
        storage
    }
}
