//! Capability-typed equipment slots.
//!
//! A slot accepts one [`EquipmentUnit`] whose capability matches its own, and
//! through it at most one experiment. Rejected installs hand the value back
//! inside [`Rejected`] and leave a diagnostic on the slot; they never panic.

use std::fmt;

use crate::equipment::EquipmentUnit;
use crate::experiment::{ExperimentRecord, ExperimentState, LifecycleError};
use crate::generator::StepReport;
use crate::id::Holder;
use crate::node::ConfigNode;
use crate::registry::Registry;
use crate::resource::ResourcePools;
use crate::science::SubjectLedger;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SlotError {
    #[error("slot accepts {slot} equipment, got {unit}")]
    CapabilityMismatch { slot: String, unit: String },

    #[error("lab has no slot {0}")]
    NoSuchSlot(usize),

    #[error("slot already holds equipment")]
    Occupied,

    #[error("slot holds no equipment")]
    Empty,

    #[error("equipment already hosts an experiment")]
    ExperimentSlotTaken,

    #[error("experiment needs {required} equipment, slot provides {slot}")]
    ExperimentMismatch { required: String, slot: String },

    #[error("only STORED experiments can be installed, got {0}")]
    NotStored(ExperimentState),

    #[error("equipment still hosts an experiment")]
    StillHosting,

    #[error("equipment hosts no experiment")]
    NoExperiment,

    #[error("a {0} experiment cannot be moved")]
    NotMovable(ExperimentState),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

/// A refused hand-over. The caller gets the value back.
#[derive(Debug)]
pub struct Rejected<T> {
    pub item: T,
    pub error: SlotError,
}

impl<T> Rejected<T> {
    pub fn into_inner(self) -> T {
        self.item
    }
}

impl<T> fmt::Display for Rejected<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rejected: {}", self.error)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EquipmentSlot {
    capability: String,
    unit: Option<EquipmentUnit>,
    last_diagnostic: Option<String>,
}

impl EquipmentSlot {
    pub fn new(capability: impl Into<String>) -> Self {
        Self {
            capability: capability.into(),
            unit: None,
            last_diagnostic: None,
        }
    }

    pub fn capability(&self) -> &str {
        &self.capability
    }

    pub fn unit(&self) -> Option<&EquipmentUnit> {
        self.unit.as_ref()
    }

    pub fn unit_mut(&mut self) -> Option<&mut EquipmentUnit> {
        self.unit.as_mut()
    }

    pub fn experiment(&self) -> Option<&ExperimentRecord> {
        self.unit.as_ref().and_then(EquipmentUnit::experiment)
    }

    pub fn experiment_mut(&mut self) -> Option<&mut ExperimentRecord> {
        self.unit.as_mut().and_then(EquipmentUnit::experiment_mut)
    }

    // -- Queries --

    pub fn is_installed(&self) -> bool {
        self.unit.is_some()
    }

    /// The installed unit produced something on its most recent step.
    pub fn is_running(&self) -> bool {
        self.unit.as_ref().is_some_and(EquipmentUnit::is_running)
    }

    /// Equipment is installed and hosts nothing.
    pub fn experiment_slot_free(&self) -> bool {
        self.unit.as_ref().is_some_and(|u| !u.has_experiment())
    }

    /// Whether [`Self::action_string`] names something the player can do now.
    pub fn can_action_run(&self) -> bool {
        matches!(
            self.experiment().map(ExperimentRecord::state),
            Some(ExperimentState::Installed | ExperimentState::Finished)
        )
    }

    /// Label for the slot's context action.
    pub fn action_string(&self) -> String {
        let Some(unit) = &self.unit else {
            return format!("Install {} equipment", self.capability);
        };
        let Some(record) = unit.experiment() else {
            return format!("{}: no experiment", unit.name);
        };
        match record.state() {
            ExperimentState::Installed => match record.active_step() {
                Some(step) if record.steps().is_multi() => {
                    format!("Start {}: {}", record.name, step.name())
                }
                _ => format!("Start {}", record.name),
            },
            ExperimentState::Running => format!("{} running", record.name),
            ExperimentState::Finished => format!("Finalize {}", record.name),
            state => format!("{} {}", record.name, state.as_str().to_lowercase()),
        }
    }

    /// Take the diagnostic left by the most recent refused call.
    pub fn take_diagnostic(&mut self) -> Option<String> {
        self.last_diagnostic.take()
    }

    // -- Equipment --

    pub fn install(&mut self, unit: EquipmentUnit) -> Result<(), Rejected<EquipmentUnit>> {
        let error = if unit.capability != self.capability {
            SlotError::CapabilityMismatch {
                slot: self.capability.clone(),
                unit: unit.capability.clone(),
            }
        } else if self.unit.is_some() {
            SlotError::Occupied
        } else {
            tracing::debug!(slot = %self.capability, unit = %unit.abbreviation, "equipment installed");
            self.unit = Some(unit);
            return Ok(());
        };
        Err(self.reject(unit, error))
    }

    /// Remove the installed unit. Refused while it hosts an experiment.
    pub fn uninstall(&mut self) -> Result<EquipmentUnit, SlotError> {
        match self.unit.as_ref().map(EquipmentUnit::has_experiment) {
            None => Err(self.diagnose(SlotError::Empty)),
            Some(true) => Err(self.diagnose(SlotError::StillHosting)),
            Some(false) => self.unit.take().ok_or(SlotError::Empty),
        }
    }

    // -- Experiments --

    /// Install a STORED record; it becomes INSTALLED with `holder`.
    pub fn install_experiment(
        &mut self,
        mut record: ExperimentRecord,
        holder: Holder,
    ) -> Result<(), Rejected<ExperimentRecord>> {
        if let Err(error) = self.check_experiment(&record) {
            return Err(self.reject(record, error));
        }
        if let Err(error) = record.install(holder) {
            return Err(self.reject(record, error.into()));
        }
        if let Some(unit) = self.unit.as_mut() {
            unit.put_experiment(record);
        }
        Ok(())
    }

    /// Whether `record` could be installed here right now.
    pub fn accepts(&self, record: &ExperimentRecord) -> bool {
        self.check_experiment(record).is_ok()
    }

    fn check_experiment(&self, record: &ExperimentRecord) -> Result<(), SlotError> {
        let unit = self.unit.as_ref().ok_or(SlotError::Empty)?;
        if unit.has_experiment() {
            return Err(SlotError::ExperimentSlotTaken);
        }
        if record.required_capability != self.capability {
            return Err(SlotError::ExperimentMismatch {
                required: record.required_capability.clone(),
                slot: self.capability.clone(),
            });
        }
        if record.state() != ExperimentState::Stored {
            return Err(SlotError::NotStored(record.state()));
        }
        Ok(())
    }

    /// Detach a movable record for a hand-off. INSTALLED records leave as
    /// STORED.
    pub fn move_experiment(&mut self) -> Result<ExperimentRecord, SlotError> {
        let movable = self.experiment().map(|r| (r.can_move(), r.state()));
        match movable {
            None => Err(self.diagnose(SlotError::NoExperiment)),
            Some((false, state)) => Err(self.diagnose(SlotError::NotMovable(state))),
            Some((true, _)) => {
                let mut record = self
                    .unit
                    .as_mut()
                    .and_then(EquipmentUnit::take_experiment)
                    .ok_or(SlotError::NoExperiment)?;
                record.leave_lab();
                Ok(record)
            }
        }
    }

    /// Put a record straight back after a failed hand-off, bypassing the
    /// install checks.
    pub(crate) fn restore_experiment(&mut self, record: ExperimentRecord) {
        if let Some(unit) = self.unit.as_mut() {
            unit.put_experiment(record);
        }
    }

    /// Detach the hosted record whatever its state.
    pub fn remove_experiment_data(&mut self) -> Option<ExperimentRecord> {
        let mut record = self.unit.as_mut()?.take_experiment()?;
        record.leave_lab();
        Some(record)
    }

    /// Step the installed unit's generator.
    pub fn run(
        &mut self,
        seconds: f64,
        pools: &mut dyn ResourcePools,
        science: &mut SubjectLedger,
        location_multiplier: f64,
    ) -> Option<StepReport> {
        self.unit
            .as_mut()?
            .run(seconds, pools, science, location_multiplier)
    }

    pub(crate) fn mark_idle(&mut self) {
        if let Some(unit) = self.unit.as_mut() {
            unit.mark_idle();
        }
    }

    pub(crate) fn rebind(&mut self, holder: Holder) {
        if let Some(record) = self.experiment_mut() {
            record.set_holder(Some(holder));
        }
    }

    fn reject<T>(&mut self, item: T, error: SlotError) -> Rejected<T> {
        let error = self.diagnose(error);
        Rejected { item, error }
    }

    fn diagnose(&mut self, error: SlotError) -> SlotError {
        tracing::warn!(slot = %self.capability, %error, "slot action refused");
        self.last_diagnostic = Some(error.to_string());
        error
    }

    // -- Persistence --

    pub fn save(&self) -> ConfigNode {
        let mut node = ConfigNode::new("SLOT");
        node.add_value("type", &self.capability);
        if let Some(unit) = &self.unit {
            node.add_node(unit.save());
        }
        node
    }

    pub fn load(node: &ConfigNode, registry: &Registry) -> Self {
        let mut slot = Self::new(node.get_str("type"));
        if let Some(unit) = node
            .node("EQUIPMENT")
            .and_then(|n| EquipmentUnit::load(n, registry))
        {
            if let Err(rejected) = slot.install(unit) {
                tracing::warn!(error = %rejected.error, "dropping saved equipment");
            }
        }
        slot
    }
}
