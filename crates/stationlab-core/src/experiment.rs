//! Experiment records and their lifecycle state machine.
//!
//! ```text
//! STORED --install--> INSTALLED --start--> RUNNING --step done--> INSTALLED (next step)
//!                                              |  \--final step done--> FINISHED --finalize--> FINALIZED
//!                                              \--crew member left--> INSTALLED
//! ```
//!
//! Starting a crew step is two-phase: [`ExperimentRecord::request_start`]
//! hands back a [`CrewSelectionRequest`] and the record only runs once
//! [`ExperimentRecord::resolve_start`] receives a valid selection.
//!
//! Leaving a lab demotes INSTALLED back to STORED; moving between holders is
//! done by the owning containers (see [`crate::vessel::Vessel::resolve_move`]).

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::id::Holder;
use crate::node::{ConfigNode, NodeError};
use crate::registry::{ExperimentDefinition, Registry};
use crate::resource::{Pool, load_pool, save_pool};
use crate::science::SubjectLedger;
use crate::step::{Step, StepSequence};

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExperimentState {
    #[default]
    Stored,
    Installed,
    Running,
    Finished,
    Finalized,
    /// Part of the persisted vocabulary only. No transition produces it and
    /// loading maps it to `Finalized`.
    Completed,
}

impl ExperimentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExperimentState::Stored => "STORED",
            ExperimentState::Installed => "INSTALLED",
            ExperimentState::Running => "RUNNING",
            ExperimentState::Finished => "FINISHED",
            ExperimentState::Finalized => "FINALIZED",
            ExperimentState::Completed => "COMPLETED",
        }
    }

    pub fn parse(text: &str) -> Option<Self> {
        match text.trim() {
            "STORED" => Some(ExperimentState::Stored),
            "INSTALLED" => Some(ExperimentState::Installed),
            "RUNNING" => Some(ExperimentState::Running),
            "FINISHED" => Some(ExperimentState::Finished),
            "FINALIZED" => Some(ExperimentState::Finalized),
            "COMPLETED" => Some(ExperimentState::Completed),
            _ => None,
        }
    }
}

impl fmt::Display for ExperimentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LifecycleError {
    #[error("experiment {experiment} is {state}, expected {expected}")]
    InvalidState {
        experiment: String,
        state: ExperimentState,
        expected: ExperimentState,
    },

    #[error("experiment {0} has no steps")]
    NoSteps(String),

    #[error("research is not possible at this location")]
    UnqualifiedLocation,

    #[error("no crew member is available for step {step}")]
    NoCrewAvailable { step: usize },

    #[error("no pending crew selection matches ticket {0}")]
    StaleSelection(u64),

    #[error("{0} is not an available crew member")]
    InvalidSelection(String),

    #[error("step {step} has not reached its target")]
    StepIncomplete { step: usize },
}

// ---------------------------------------------------------------------------
// Supporting types
// ---------------------------------------------------------------------------

/// The pool the active step accumulates into. Lives on the record so
/// progress travels with it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressPool {
    pub resource: String,
    pub pool: Pool,
}

/// What the record needs from its surroundings to start a step.
#[derive(Debug, Clone, Copy)]
pub struct StartContext<'a> {
    /// Crew currently present in the lab.
    pub crew: &'a [String],
    /// Host location predicate, already combined with any debug override.
    pub qualifying_location: bool,
}

/// A pending crew selection. The UI answers it through
/// [`ExperimentRecord::resolve_start`] with the same `ticket`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrewSelectionRequest {
    pub ticket: u64,
    pub step: usize,
    pub candidates: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    /// The step is running.
    Started,
    /// Waiting for the UI to pick a crew member.
    AwaitingCrew(CrewSelectionRequest),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepCompletion {
    /// A non-final step completed; the record is INSTALLED at `next`.
    Advanced { next: usize },
    /// The final step completed; the record is FINISHED.
    Finished,
}

/// Produced when a finished experiment is finalized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentResult {
    pub experiment: String,
    pub subject: String,
    /// Research value of the subject at finalization.
    pub value: f64,
}

// ---------------------------------------------------------------------------
// Record
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct ExperimentRecord {
    pub type_tag: String,
    pub name: String,
    pub abbreviation: String,
    pub mass: f64,
    pub cost: f64,
    pub required_capability: String,
    state: ExperimentState,
    holder: Option<Holder>,
    steps: StepSequence,
    progress: Option<ProgressPool>,
    /// Bumped whenever `progress` is replaced.
    progress_epoch: u64,
    pending: Option<CrewSelectionRequest>,
    next_ticket: u64,
    reminder: Option<f64>,
}

impl ExperimentRecord {
    pub fn from_definition(def: &ExperimentDefinition) -> Self {
        Self {
            type_tag: def.type_tag.clone(),
            name: def.name.clone(),
            abbreviation: def.abbreviation.clone(),
            mass: def.mass,
            cost: def.cost,
            required_capability: def.required_capability.clone(),
            state: ExperimentState::Stored,
            holder: None,
            steps: StepSequence::from_steps(def.steps.iter().map(|s| s.to_step()).collect()),
            progress: None,
            progress_epoch: 0,
            pending: None,
            next_ticket: 0,
            reminder: None,
        }
    }

    /// The inert record returned for unknown type tags.
    pub fn empty() -> Self {
        Self {
            type_tag: String::new(),
            name: String::new(),
            abbreviation: String::new(),
            mass: 0.0,
            cost: 0.0,
            required_capability: String::new(),
            state: ExperimentState::Stored,
            holder: None,
            steps: StepSequence::Empty,
            progress: None,
            progress_epoch: 0,
            pending: None,
            next_ticket: 0,
            reminder: None,
        }
    }

    // -- Queries --

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn state(&self) -> ExperimentState {
        self.state
    }

    pub fn holder(&self) -> Option<Holder> {
        self.holder
    }

    pub fn steps(&self) -> &StepSequence {
        &self.steps
    }

    pub fn active_step(&self) -> Option<&Step> {
        self.steps.active()
    }

    pub fn active_step_index(&self) -> usize {
        self.steps.active_index()
    }

    pub fn progress(&self) -> Option<&ProgressPool> {
        self.progress.as_ref()
    }

    pub fn progress_mut(&mut self) -> Option<&mut ProgressPool> {
        self.progress.as_mut()
    }

    /// Changes each time the progress pool is replaced, so a generator
    /// feeding it can tell a new step from the one it last served.
    pub fn progress_epoch(&self) -> u64 {
        self.progress_epoch
    }

    fn set_progress(&mut self, progress: Option<ProgressPool>) {
        if self.progress != progress {
            self.progress = progress;
            self.progress_epoch += 1;
        }
    }

    /// Capacity of the progress pool, zero when there is none.
    pub fn progress_target(&self) -> f64 {
        self.progress.as_ref().map_or(0.0, |p| p.pool.capacity)
    }

    pub fn progress_amount(&self) -> f64 {
        self.progress.as_ref().map_or(0.0, |p| p.pool.amount)
    }

    pub fn pending_selection(&self) -> Option<&CrewSelectionRequest> {
        self.pending.as_ref()
    }

    /// Due time of the completion reminder, if one is scheduled.
    pub fn reminder(&self) -> Option<f64> {
        self.reminder
    }

    /// Research subject id for this experiment at `situation`.
    pub fn subject_id(&self, situation: &str) -> String {
        format!("{}@{}", self.type_tag, situation)
    }

    /// Whether the record may change holders.
    pub fn can_move(&self) -> bool {
        !self.is_empty()
            && self.pending.is_none()
            && matches!(
                self.state,
                ExperimentState::Stored | ExperimentState::Installed | ExperimentState::Finished
            )
    }

    /// Whether the active step is a crew step that is currently running.
    pub fn is_running_crew_step(&self) -> bool {
        self.state == ExperimentState::Running
            && self.active_step().is_some_and(Step::is_crew)
    }

    /// Accumulated amount reached the target, both rounded to two decimals.
    pub fn is_research_finished(&self) -> bool {
        if self.state != ExperimentState::Running {
            return false;
        }
        let Some(step) = self.active_step() else {
            return false;
        };
        round2(self.progress_amount()) >= round2(step.amount())
    }

    // -- Transitions --

    pub(crate) fn set_holder(&mut self, holder: Option<Holder>) {
        self.holder = holder;
    }

    /// STORED -> INSTALLED.
    pub fn install(&mut self, holder: Holder) -> Result<(), LifecycleError> {
        self.expect_state(ExperimentState::Stored)?;
        if self.is_empty() {
            return Err(LifecycleError::NoSteps(self.type_tag.clone()));
        }
        self.state = ExperimentState::Installed;
        self.holder = Some(holder);
        tracing::debug!(experiment = %self.type_tag, ?holder, "experiment installed");
        Ok(())
    }

    /// INSTALLED -> STORED when the record leaves a lab. Other states are kept.
    pub fn leave_lab(&mut self) {
        self.pending = None;
        if self.state == ExperimentState::Installed {
            self.state = ExperimentState::Stored;
        }
        self.holder = None;
    }

    /// Force INSTALLED or RUNNING back to STORED when a saved record turns
    /// up outside a lab. Progress on the active step is lost.
    pub(crate) fn demote_to_stored(&mut self) {
        self.abort_crew_step();
        self.set_progress(None);
        self.pending = None;
        self.reminder = None;
        self.holder = None;
        self.state = ExperimentState::Stored;
    }

    /// Start the active step, or ask for a crew member if it is a crew step.
    pub fn request_start(&mut self, ctx: &StartContext<'_>) -> Result<StartOutcome, LifecycleError> {
        self.expect_state(ExperimentState::Installed)?;
        if !ctx.qualifying_location {
            return Err(LifecycleError::UnqualifiedLocation);
        }
        let step = self
            .active_step()
            .ok_or_else(|| LifecycleError::NoSteps(self.type_tag.clone()))?;

        if !step.is_crew() {
            self.begin_running();
            return Ok(StartOutcome::Started);
        }

        let active = self.steps.active_index();
        let candidates: Vec<String> = ctx
            .crew
            .iter()
            .filter(|member| !self.assigned_elsewhere(active, member))
            .cloned()
            .collect();
        if candidates.is_empty() {
            return Err(LifecycleError::NoCrewAvailable { step: active });
        }

        let request = CrewSelectionRequest {
            ticket: self.next_ticket,
            step: active,
            candidates,
        };
        self.next_ticket += 1;
        self.pending = Some(request.clone());
        Ok(StartOutcome::AwaitingCrew(request))
    }

    /// Resolve a pending crew selection. `None` declines and leaves the
    /// record INSTALLED. Returns whether the step started.
    pub fn resolve_start(&mut self, ticket: u64, selection: Option<&str>) -> Result<bool, LifecycleError> {
        let pending = self
            .pending
            .take_if(|p| p.ticket == ticket)
            .ok_or(LifecycleError::StaleSelection(ticket))?;
        self.expect_state(ExperimentState::Installed)?;

        let Some(name) = selection else {
            tracing::debug!(experiment = %self.type_tag, "crew selection declined");
            return Ok(false);
        };
        if !pending.candidates.iter().any(|c| c == name) {
            return Err(LifecycleError::InvalidSelection(name.to_string()));
        }
        if let Some(Step::Crew(step)) = self.steps.active_mut() {
            step.subject = Some(name.to_string());
        }
        self.begin_running();
        Ok(true)
    }

    /// Complete the active step once its target is reached.
    pub fn finish_step(&mut self) -> Result<StepCompletion, LifecycleError> {
        self.expect_state(ExperimentState::Running)?;
        if !self.is_research_finished() {
            return Err(LifecycleError::StepIncomplete {
                step: self.steps.active_index(),
            });
        }
        self.set_progress(None);
        self.reminder = None;
        if self.steps.advance() {
            self.state = ExperimentState::Installed;
            let next = self.steps.active_index();
            tracing::debug!(experiment = %self.type_tag, next, "step completed");
            Ok(StepCompletion::Advanced { next })
        } else {
            self.state = ExperimentState::Finished;
            tracing::debug!(experiment = %self.type_tag, "experiment finished");
            Ok(StepCompletion::Finished)
        }
    }

    /// Abort the active crew step: clear its assignment and zero its target.
    ///
    /// Idempotent. A RUNNING record drops back to INSTALLED. Returns the crew
    /// member that was assigned, if any.
    pub fn abort_crew_step(&mut self) -> Option<String> {
        let Some(Step::Crew(step)) = self.steps.active_mut() else {
            return None;
        };
        let previous = step.subject.take();
        let zeroed = ProgressPool {
            resource: step.resource.clone(),
            pool: Pool::new(0.0, 0.0),
        };
        self.set_progress(Some(zeroed));
        self.pending = None;
        self.reminder = None;
        if self.state == ExperimentState::Running {
            self.state = ExperimentState::Installed;
        }
        previous
    }

    /// Abort a running crew step whose assigned member is not in `crew`.
    /// Returns the member who left.
    pub fn check_crew(&mut self, crew: &[String]) -> Option<String> {
        if !self.is_running_crew_step() {
            return None;
        }
        let present = self
            .active_step()
            .and_then(Step::assigned)
            .is_some_and(|name| crew.iter().any(|c| c == name));
        if present {
            return None;
        }
        let previous = self.abort_crew_step();
        tracing::info!(experiment = %self.type_tag, occupant = ?previous, "crew step aborted");
        Some(previous.unwrap_or_default())
    }

    /// FINISHED -> FINALIZED. Irreversible.
    pub fn finalize(
        &mut self,
        science: &SubjectLedger,
        situation: &str,
    ) -> Result<ExperimentResult, LifecycleError> {
        self.expect_state(ExperimentState::Finished)?;
        self.state = ExperimentState::Finalized;
        let subject = self.subject_id(situation);
        let value = science.value(&subject);
        tracing::debug!(experiment = %self.type_tag, %subject, value, "experiment finalized");
        Ok(ExperimentResult {
            experiment: self.type_tag.clone(),
            subject,
            value,
        })
    }

    /// Schedule the completion reminder of a running crew step, given the
    /// production rate feeding it. Returns the due time.
    pub fn schedule_reminder(&mut self, now: f64, rate_per_second: f64) -> Option<f64> {
        if !self.is_running_crew_step() || !(rate_per_second > 0.0) {
            return None;
        }
        let target = self.active_step().map_or(0.0, Step::amount);
        let remaining = (target - self.progress_amount()).max(0.0);
        let due = now + remaining / rate_per_second;
        self.reminder = Some(due);
        Some(due)
    }

    /// Drop the completion reminder. Returns whether one was scheduled.
    pub fn clear_reminder(&mut self) -> bool {
        self.reminder.take().is_some()
    }

    fn begin_running(&mut self) {
        let fresh = self.steps.active().map(|step| ProgressPool {
            resource: step.resource_name().to_string(),
            pool: Pool::new(0.0, step.amount()),
        });
        if fresh.is_some() {
            self.set_progress(fresh);
        }
        self.state = ExperimentState::Running;
        tracing::debug!(
            experiment = %self.type_tag,
            step = self.steps.active_index(),
            "step started"
        );
    }

    fn assigned_elsewhere(&self, active: usize, member: &str) -> bool {
        self.steps
            .iter()
            .enumerate()
            .any(|(i, step)| i != active && step.assigned() == Some(member))
    }

    fn expect_state(&self, expected: ExperimentState) -> Result<(), LifecycleError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(LifecycleError::InvalidState {
                experiment: self.type_tag.clone(),
                state: self.state,
                expected,
            })
        }
    }

    // -- Persistence --

    pub fn save(&self) -> ConfigNode {
        let mut node = ConfigNode::new("EXPERIMENT");
        node.add_value("type", &self.type_tag);
        node.add_value("state", self.state);
        node.add_value("mass", self.mass);
        node.add_value("cost", self.cost);
        if self.steps.is_multi() {
            node.add_value("activeStep", self.steps.active_index());
        }
        for (index, step) in self.steps.iter().enumerate() {
            node.add_node(step.save(index));
        }
        if let Some(progress) = &self.progress {
            node.add_node(save_pool(&progress.resource, &progress.pool));
        }
        node
    }

    /// Rebuild a record. Unknown type tags give the empty record; malformed
    /// fields fall back to zero or STORED.
    pub fn load(node: &ConfigNode, registry: &Registry) -> Self {
        let mut record = registry.create_experiment(node.get_str("type"));
        if record.is_empty() {
            return record;
        }

        record.state = match ExperimentState::parse(node.get_str("state")) {
            Some(ExperimentState::Completed) => ExperimentState::Finalized,
            Some(state) => state,
            None => {
                tracing::warn!(
                    experiment = %record.type_tag,
                    state = node.get_str("state"),
                    "unreadable experiment state, using STORED"
                );
                ExperimentState::Stored
            }
        };
        record.mass = number_or(node, "mass", record.mass);
        record.cost = number_or(node, "cost", record.cost);

        let mut indexed: Vec<(usize, Step)> = node
            .nodes_named("STEP")
            .filter_map(|n| Step::load(n).map(|s| (n.get_usize("index"), s)))
            .collect();
        if !indexed.is_empty() {
            indexed.sort_by_key(|(i, _)| *i);
            let steps = indexed.into_iter().map(|(_, s)| s).collect();
            record.steps = StepSequence::with_active(steps, node.get_usize("activeStep"));
        }

        record.progress = node.node("RESOURCE").map(|n| {
            let (resource, pool) = load_pool(n);
            ProgressPool { resource, pool }
        });

        if record.state == ExperimentState::Running {
            let active = record.active_step().cloned();
            match active {
                Some(Step::Crew(step)) if step.subject.is_none() => {
                    tracing::warn!(
                        experiment = %record.type_tag,
                        "running crew step without an assignment, reverting to INSTALLED"
                    );
                    record.state = ExperimentState::Installed;
                }
                Some(step) if record.progress.is_none() => {
                    record.progress = Some(ProgressPool {
                        resource: step.resource_name().to_string(),
                        pool: Pool::new(0.0, step.amount()),
                    });
                }
                _ => {}
            }
        }
        record
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Missing values keep `fallback`; malformed values become zero.
fn number_or(node: &ConfigNode, key: &str, fallback: f64) -> f64 {
    match node.parse::<f64>(key) {
        Ok(v) => v,
        Err(NodeError::Missing { .. }) => fallback,
        Err(err) => {
            tracing::warn!(%err, "using zero for malformed value");
            0.0
        }
    }
}
