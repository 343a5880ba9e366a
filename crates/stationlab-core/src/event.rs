//! Lab events.
//!
//! Labs record what happened during an action or a reactivation in an
//! internal buffer; the host drains it with [`crate::lab::Lab::drain_events`]
//! for UI messages. Recording never fails and never blocks the tick.

use crate::experiment::ExperimentResult;

/// Why research stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseReason {
    /// The player stopped research.
    Requested,
    /// Crew dropped below the minimum.
    Understaffed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LabEvent {
    // -- Equipment --
    EquipmentInstalled {
        slot: usize,
        abbreviation: String,
    },
    EquipmentRemoved {
        slot: usize,
        abbreviation: String,
    },

    // -- Experiment lifecycle --
    ExperimentInstalled {
        slot: usize,
        experiment: String,
    },
    ExperimentRemoved {
        slot: usize,
        experiment: String,
    },
    CrewSelectionRequested {
        slot: usize,
        ticket: u64,
        candidates: Vec<String>,
    },
    StepStarted {
        slot: usize,
        experiment: String,
        step: usize,
    },
    StepCompleted {
        slot: usize,
        experiment: String,
        step: usize,
    },
    ExperimentFinished {
        slot: usize,
        experiment: String,
    },
    ExperimentFinalized {
        slot: usize,
        result: ExperimentResult,
    },
    CrewStepAborted {
        slot: usize,
        experiment: String,
        occupant: String,
    },

    // -- Lab state --
    ResearchStarted,
    ResearchPaused {
        reason: PauseReason,
    },
    ReminderScheduled {
        slot: usize,
        due_at: f64,
    },
    ReminderCleared {
        slot: usize,
    },

    /// A refused action or a recovered failure.
    Diagnostic {
        message: String,
    },
}

impl LabEvent {
    pub fn diagnostic(message: impl Into<String>) -> Self {
        LabEvent::Diagnostic {
            message: message.into(),
        }
    }
}
