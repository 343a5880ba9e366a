//! The lab orchestrator.
//!
//! A [`Lab`] owns its slots, its own base generator and the research-active
//! flag. Each reactivation runs in a fixed order:
//!
//! 1. **Crew** -- record crew-count changes; falling below the minimum pauses
//!    research. Rising back never resumes it.
//! 2. **Presence** -- abort running crew steps whose occupant left.
//! 3. **Generators** -- if active, staffed and at a qualifying location, feed
//!    the time since `last_active` to every generator.
//! 4. **Completion** -- finish steps that reached their target.
//! 5. **Timestamp** -- store `now` as `last_active`, or zero when inactive,
//!    so catch-up survives a save and reload without double counting.
//!
//! `last_active` is only read while research is active, so zero is a real
//! timestamp for a lab that started at time zero.
//!
//! Reactivation never fails: refusals and recovered errors become
//! [`LabEvent::Diagnostic`]s.

use std::fmt::Display;

use crate::config::LabConfig;
use crate::equipment::EquipmentUnit;
use crate::event::{LabEvent, PauseReason};
use crate::experiment::{
    ExperimentRecord, ExperimentResult, ExperimentState, LifecycleError, StartContext,
    StartOutcome, StepCompletion,
};
use crate::generator::{Generator, GeneratorContext, StepReport};
use crate::host::LabHost;
use crate::id::{Holder, LabId};
use crate::node::ConfigNode;
use crate::registry::Registry;
use crate::resource::ResourcePools;
use crate::science::SubjectLedger;
use crate::slot::{EquipmentSlot, Rejected, SlotError};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LabError {
    #[error(transparent)]
    Slot(#[from] SlotError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error("slot {0} hosts no experiment")]
    NoExperiment(usize),

    #[error("lab needs {minimum} crew, has {crew}")]
    Understaffed { crew: u32, minimum: u32 },
}

/// What a slot's context action did.
#[derive(Debug, Clone, PartialEq)]
pub enum SlotAction {
    Start(StartOutcome),
    Finalized(ExperimentResult),
}

/// Summary of one reactivation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReactivationReport {
    pub now: f64,
    /// Interval fed to every generator. Zero when nothing ran.
    pub elapsed: f64,
    pub crew_changed: bool,
    /// Research was paused by this reactivation.
    pub paused: bool,
    /// Slots whose crew step was aborted.
    pub aborted: Vec<usize>,
    pub completed: Vec<(usize, StepCompletion)>,
    pub slot_reports: Vec<(usize, StepReport)>,
    pub lab_report: Option<StepReport>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Lab {
    id: LabId,
    config: LabConfig,
    slots: Vec<EquipmentSlot>,
    generator: Generator,
    research_active: bool,
    last_active: f64,
    crew_count: u32,
    next_reactivation: f64,
    events: Vec<LabEvent>,
}

impl Lab {
    pub fn new(config: LabConfig) -> Self {
        let slots = config.slots.iter().map(EquipmentSlot::new).collect();
        Self {
            id: LabId::default(),
            generator: config.generator(),
            config,
            slots,
            research_active: false,
            last_active: 0.0,
            crew_count: 0,
            next_reactivation: 0.0,
            events: Vec::new(),
        }
    }

    // -- Queries --

    pub fn id(&self) -> LabId {
        self.id
    }

    pub fn config(&self) -> &LabConfig {
        &self.config
    }

    pub fn slots(&self) -> &[EquipmentSlot] {
        &self.slots
    }

    pub fn slot(&self, index: usize) -> Option<&EquipmentSlot> {
        self.slots.get(index)
    }

    pub fn experiment(&self, slot: usize) -> Option<&ExperimentRecord> {
        self.slots.get(slot).and_then(EquipmentSlot::experiment)
    }

    pub fn generator(&self) -> &Generator {
        &self.generator
    }

    pub fn is_research_active(&self) -> bool {
        self.research_active
    }

    pub fn last_active(&self) -> f64 {
        self.last_active
    }

    pub fn crew_count(&self) -> u32 {
        self.crew_count
    }

    pub fn next_reactivation(&self) -> f64 {
        self.next_reactivation
    }

    pub fn is_staffed(&self, host: &dyn LabHost) -> bool {
        host.crew_count() >= self.config.minimum_crew
    }

    fn qualifies(&self, host: &dyn LabHost) -> bool {
        self.config.ignore_location || host.is_qualifying_location()
    }

    fn holder(&self, slot: usize) -> Holder {
        Holder::Lab { lab: self.id, slot }
    }

    /// Take every event recorded since the last call.
    pub fn drain_events(&mut self) -> Vec<LabEvent> {
        std::mem::take(&mut self.events)
    }

    /// Attach the lab to its id and point hosted records at it.
    pub(crate) fn bind(&mut self, id: LabId) {
        self.id = id;
        for (index, slot) in self.slots.iter_mut().enumerate() {
            slot.rebind(Holder::Lab { lab: id, slot: index });
        }
    }

    // -- Equipment --

    pub fn install_equipment(
        &mut self,
        slot: usize,
        unit: EquipmentUnit,
    ) -> Result<(), Rejected<EquipmentUnit>> {
        let Some(target) = self.slots.get_mut(slot) else {
            let error = self.refuse(SlotError::NoSuchSlot(slot));
            return Err(Rejected { item: unit, error });
        };
        let abbreviation = unit.abbreviation.clone();
        match target.install(unit) {
            Ok(()) => {
                self.events
                    .push(LabEvent::EquipmentInstalled { slot, abbreviation });
                Ok(())
            }
            Err(rejected) => {
                self.events.push(LabEvent::diagnostic(rejected.error.to_string()));
                Err(rejected)
            }
        }
    }

    pub fn remove_equipment(&mut self, slot: usize) -> Result<EquipmentUnit, LabError> {
        let result = self.slot_mut(slot)?.uninstall();
        match result {
            Ok(unit) => {
                self.events.push(LabEvent::EquipmentRemoved {
                    slot,
                    abbreviation: unit.abbreviation.clone(),
                });
                Ok(unit)
            }
            Err(err) => Err(self.refuse(err).into()),
        }
    }

    // -- Experiments --

    pub fn install_experiment(
        &mut self,
        slot: usize,
        record: ExperimentRecord,
    ) -> Result<(), Rejected<ExperimentRecord>> {
        let holder = self.holder(slot);
        let experiment = record.type_tag.clone();
        let Some(target) = self.slots.get_mut(slot) else {
            let error = self.refuse(SlotError::NoSuchSlot(slot));
            return Err(Rejected { item: record, error });
        };
        match target.install_experiment(record, holder) {
            Ok(()) => {
                self.events
                    .push(LabEvent::ExperimentInstalled { slot, experiment });
                Ok(())
            }
            Err(rejected) => {
                self.events.push(LabEvent::diagnostic(rejected.error.to_string()));
                Err(rejected)
            }
        }
    }

    /// Detach the hosted record for a move. Running and finalized records
    /// stay put.
    pub fn take_experiment(&mut self, slot: usize) -> Result<ExperimentRecord, LabError> {
        let result = self.slot_mut(slot)?.move_experiment();
        match result {
            Ok(record) => {
                self.events.push(LabEvent::ExperimentRemoved {
                    slot,
                    experiment: record.type_tag.clone(),
                });
                Ok(record)
            }
            Err(err) => Err(self.refuse(err).into()),
        }
    }

    /// Detach the hosted record whatever its state.
    pub fn remove_experiment(&mut self, slot: usize) -> Option<ExperimentRecord> {
        let record = self.slots.get_mut(slot)?.remove_experiment_data()?;
        self.events.push(LabEvent::ExperimentRemoved {
            slot,
            experiment: record.type_tag.clone(),
        });
        Some(record)
    }

    pub(crate) fn restore_experiment(&mut self, slot: usize, mut record: ExperimentRecord) {
        let holder = self.holder(slot);
        if let Some(target) = self.slots.get_mut(slot) {
            if record.state() == ExperimentState::Stored {
                if let Err(rejected) = target.install_experiment(record, holder) {
                    tracing::warn!(slot, error = %rejected.error, "could not restore experiment");
                }
            } else {
                record.set_holder(Some(holder));
                target.restore_experiment(record);
            }
        }
    }

    /// Start the active step of the hosted experiment.
    ///
    /// Crew steps answer with [`StartOutcome::AwaitingCrew`]; pass the
    /// ticket to [`Self::resolve_crew_selection`].
    pub fn start_experiment(
        &mut self,
        slot: usize,
        host: &dyn LabHost,
    ) -> Result<StartOutcome, LabError> {
        let ctx = StartContext {
            crew: host.crew(),
            qualifying_location: self.qualifies(host),
        };
        let record = self.experiment_mut(slot)?;
        let result = record.request_start(&ctx);
        let experiment = record.type_tag.clone();
        let step = record.active_step_index();
        match result {
            Ok(StartOutcome::Started) => {
                self.events.push(LabEvent::StepStarted {
                    slot,
                    experiment,
                    step,
                });
                Ok(StartOutcome::Started)
            }
            Ok(StartOutcome::AwaitingCrew(request)) => {
                self.events.push(LabEvent::CrewSelectionRequested {
                    slot,
                    ticket: request.ticket,
                    candidates: request.candidates.clone(),
                });
                Ok(StartOutcome::AwaitingCrew(request))
            }
            Err(err) => Err(self.refuse(err).into()),
        }
    }

    /// Answer a crew selection. Returns whether the step started.
    pub fn resolve_crew_selection(
        &mut self,
        slot: usize,
        ticket: u64,
        selection: Option<&str>,
        host: &dyn LabHost,
    ) -> Result<bool, LabError> {
        let record = self.experiment_mut(slot)?;
        let result = record.resolve_start(ticket, selection);
        let experiment = record.type_tag.clone();
        let step = record.active_step_index();
        match result {
            Ok(true) => {
                self.events.push(LabEvent::StepStarted {
                    slot,
                    experiment,
                    step,
                });
                if self.research_active {
                    self.schedule_reminder(slot, host.now());
                }
                Ok(true)
            }
            Ok(false) => Ok(false),
            Err(err) => Err(self.refuse(err).into()),
        }
    }

    /// Complete the active step by hand. Reactivation does this
    /// automatically once the target is reached.
    pub fn finish_step(&mut self, slot: usize) -> Result<StepCompletion, LabError> {
        let record = self.experiment_mut(slot)?;
        let step = record.active_step_index();
        let experiment = record.type_tag.clone();
        match record.finish_step() {
            Ok(done) => {
                self.events
                    .push(completion_event(slot, experiment, step, done));
                Ok(done)
            }
            Err(err) => Err(self.refuse(err).into()),
        }
    }

    pub fn finalize_experiment(
        &mut self,
        slot: usize,
        science: &SubjectLedger,
        situation: &str,
    ) -> Result<ExperimentResult, LabError> {
        let result = self.experiment_mut(slot)?.finalize(science, situation);
        match result {
            Ok(result) => {
                self.events.push(LabEvent::ExperimentFinalized {
                    slot,
                    result: result.clone(),
                });
                Ok(result)
            }
            Err(err) => Err(self.refuse(err).into()),
        }
    }

    /// Run the slot's context action: start an INSTALLED experiment or
    /// finalize a FINISHED one.
    pub fn run_slot_action(
        &mut self,
        slot: usize,
        host: &dyn LabHost,
        science: &SubjectLedger,
    ) -> Result<SlotAction, LabError> {
        match self.experiment(slot).map(ExperimentRecord::state) {
            Some(ExperimentState::Finished) => self
                .finalize_experiment(slot, science, host.situation())
                .map(SlotAction::Finalized),
            Some(_) => self.start_experiment(slot, host).map(SlotAction::Start),
            None => Err(self.refuse(LabError::NoExperiment(slot))),
        }
    }

    // -- Research flag --

    /// Resume research. Needs the minimum crew; already-active labs are left
    /// alone.
    pub fn start_research(&mut self, host: &dyn LabHost) -> Result<(), LabError> {
        if self.research_active {
            return Ok(());
        }
        let crew = host.crew_count();
        if !self.is_staffed(host) {
            return Err(self.refuse(LabError::Understaffed {
                crew,
                minimum: self.config.minimum_crew,
            }));
        }
        let now = host.now();
        self.research_active = true;
        self.crew_count = crew;
        self.last_active = now;
        self.next_reactivation = now + self.config.reactivation_interval;
        tracing::info!(target: "lab", lab = ?self.id, "research started");
        self.events.push(LabEvent::ResearchStarted);

        for slot in 0..self.slots.len() {
            self.schedule_reminder(slot, now);
        }
        Ok(())
    }

    pub fn stop_research(&mut self) {
        if self.research_active {
            self.pause(PauseReason::Requested);
        }
    }

    fn pause(&mut self, reason: PauseReason) {
        self.research_active = false;
        self.last_active = 0.0;
        tracing::info!(target: "lab", lab = ?self.id, ?reason, "research paused");
        self.events.push(LabEvent::ResearchPaused { reason });
        for (slot, target) in self.slots.iter_mut().enumerate() {
            target.mark_idle();
            if target.experiment_mut().is_some_and(ExperimentRecord::clear_reminder) {
                self.events.push(LabEvent::ReminderCleared { slot });
            }
        }
        self.generator.mark_idle();
    }

    fn schedule_reminder(&mut self, slot: usize, now: f64) {
        let Some(unit) = self.slots.get_mut(slot).and_then(EquipmentSlot::unit_mut) else {
            return;
        };
        let rate = unit.progress_rate();
        if let Some(due_at) = unit
            .experiment_mut()
            .and_then(|r| r.schedule_reminder(now, rate))
        {
            self.events.push(LabEvent::ReminderScheduled { slot, due_at });
        }
    }

    // -- Reactivation --

    /// Reactivate if the lab is active and its interval has elapsed.
    pub fn update(
        &mut self,
        host: &dyn LabHost,
        pools: &mut dyn ResourcePools,
        science: &mut SubjectLedger,
    ) -> Option<ReactivationReport> {
        if !self.research_active || host.now() < self.next_reactivation {
            return None;
        }
        Some(self.reactivate(host, pools, science))
    }

    /// Crew entered or left: reactivate now.
    pub fn on_crew_changed(
        &mut self,
        host: &dyn LabHost,
        pools: &mut dyn ResourcePools,
        science: &mut SubjectLedger,
    ) -> ReactivationReport {
        self.reactivate(host, pools, science)
    }

    pub fn reactivate(
        &mut self,
        host: &dyn LabHost,
        pools: &mut dyn ResourcePools,
        science: &mut SubjectLedger,
    ) -> ReactivationReport {
        let now = host.now();
        let mut report = ReactivationReport {
            now,
            ..ReactivationReport::default()
        };

        // 1. Crew
        let crew = host.crew_count();
        if crew != self.crew_count {
            tracing::debug!(target: "lab", from = self.crew_count, to = crew, "crew changed");
            self.crew_count = crew;
            report.crew_changed = true;
        }
        if self.research_active && !self.is_staffed(host) {
            self.pause(PauseReason::Understaffed);
            report.paused = true;
        }

        // 2. Presence
        for (slot, target) in self.slots.iter_mut().enumerate() {
            let Some(record) = target.experiment_mut() else {
                continue;
            };
            if let Some(occupant) = record.check_crew(host.crew()) {
                self.events.push(LabEvent::CrewStepAborted {
                    slot,
                    experiment: record.type_tag.clone(),
                    occupant,
                });
                report.aborted.push(slot);
            }
        }

        // 3. Generators
        if self.research_active && self.qualifies(host) {
            let mut elapsed = (now - self.last_active).max(0.0);
            if let Some(limit) = self.config.max_catch_up {
                elapsed = elapsed.min(limit.max(0.0));
            }
            if elapsed > 0.0 {
                report.elapsed = elapsed;
                let multiplier = host.location_multiplier();
                for (slot, target) in self.slots.iter_mut().enumerate() {
                    if let Some(step) = target.run(elapsed, pools, science, multiplier) {
                        report.slot_reports.push((slot, step));
                    }
                }
                if !self.generator.is_empty() {
                    let mut ctx = GeneratorContext {
                        pools,
                        science,
                        location_multiplier: multiplier,
                    };
                    report.lab_report = Some(self.generator.do_time_step(elapsed, &mut ctx));
                }
                tracing::trace!(target: "lab", elapsed, "generators stepped");
            }
        } else {
            for target in &mut self.slots {
                target.mark_idle();
            }
            self.generator.mark_idle();
        }

        // 4. Completion
        for (slot, target) in self.slots.iter_mut().enumerate() {
            let Some(record) = target.experiment_mut() else {
                continue;
            };
            if !record.is_research_finished() {
                continue;
            }
            let step = record.active_step_index();
            match record.finish_step() {
                Ok(done) => {
                    self.events
                        .push(completion_event(slot, record.type_tag.clone(), step, done));
                    report.completed.push((slot, done));
                }
                Err(err) => {
                    tracing::warn!(target: "lab", slot, %err, "could not finish step");
                    self.events.push(LabEvent::diagnostic(err.to_string()));
                }
            }
        }

        // 5. Timestamp
        self.last_active = if self.research_active { now } else { 0.0 };
        self.next_reactivation = now + self.config.reactivation_interval;
        report
    }

    fn slot_mut(&mut self, slot: usize) -> Result<&mut EquipmentSlot, LabError> {
        if slot >= self.slots.len() {
            return Err(self.refuse(SlotError::NoSuchSlot(slot)).into());
        }
        Ok(&mut self.slots[slot])
    }

    fn experiment_mut(&mut self, slot: usize) -> Result<&mut ExperimentRecord, LabError> {
        let hosted = self.slot_mut(slot)?.experiment().is_some();
        if !hosted {
            return Err(self.refuse(LabError::NoExperiment(slot)));
        }
        self.slots[slot]
            .experiment_mut()
            .ok_or(LabError::NoExperiment(slot))
    }

    fn refuse<E: Display>(&mut self, err: E) -> E {
        tracing::warn!(target: "lab", lab = ?self.id, %err, "lab action refused");
        self.events.push(LabEvent::diagnostic(err.to_string()));
        err
    }

    // -- Persistence --

    pub fn save(&self) -> ConfigNode {
        let mut node = ConfigNode::new("LAB");
        node.add_value("minimumCrew", self.config.minimum_crew);
        node.add_value("researchActive", self.research_active);
        node.add_value("lastActive", self.last_active);
        node.add_value("crewCount", self.crew_count);
        self.config.save_into(&mut node);
        for slot in &self.slots {
            node.add_node(slot.save());
        }
        node
    }

    pub fn load(node: &ConfigNode, registry: &Registry) -> Self {
        let config = LabConfig::load_from(node);
        let mut lab = Self::new(config);
        lab.slots = node
            .nodes_named("SLOT")
            .map(|n| EquipmentSlot::load(n, registry))
            .collect();
        lab.research_active = node.get_bool("researchActive");
        lab.last_active = node.get_f64("lastActive").max(0.0);
        lab.crew_count = node.get_u32("crewCount");
        lab.bind(lab.id);
        lab
    }
}

fn completion_event(slot: usize, experiment: String, step: usize, done: StepCompletion) -> LabEvent {
    match done {
        StepCompletion::Advanced { .. } => LabEvent::StepCompleted {
            slot,
            experiment,
            step,
        },
        StepCompletion::Finished => LabEvent::ExperimentFinished { slot, experiment },
    }
}
