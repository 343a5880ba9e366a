//! Experiment steps.
//!
//! A record owns a [`StepSequence`]: nothing (the inert empty record), one
//! step, or an ordered list with an active index. Steps come in a closed set
//! of variants selected by the `type` tag of their persisted node.

use serde::{Deserialize, Serialize};

use crate::node::ConfigNode;

pub const RESOURCE_STEP_TAG: &str = "ResourceStep";
pub const CREW_STEP_TAG: &str = "CrewStep";

/// A step completed by accumulating `amount` of `resource`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceStep {
    pub name: String,
    pub resource: String,
    pub amount: f64,
}

/// A resource step that also needs a named crew member assigned for its
/// whole run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrewStep {
    pub name: String,
    pub resource: String,
    pub amount: f64,
    /// Crew member recorded against this step. Kept after completion so the
    /// same person cannot be assigned to another step of the record.
    pub subject: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Step {
    Resource(ResourceStep),
    Crew(CrewStep),
}

impl Step {
    pub fn resource(name: &str, resource: &str, amount: f64) -> Self {
        Step::Resource(ResourceStep {
            name: name.to_string(),
            resource: resource.to_string(),
            amount,
        })
    }

    pub fn crew(name: &str, resource: &str, amount: f64) -> Self {
        Step::Crew(CrewStep {
            name: name.to_string(),
            resource: resource.to_string(),
            amount,
            subject: None,
        })
    }

    pub fn name(&self) -> &str {
        match self {
            Step::Resource(s) => &s.name,
            Step::Crew(s) => &s.name,
        }
    }

    /// Resource accumulated by this step.
    pub fn resource_name(&self) -> &str {
        match self {
            Step::Resource(s) => &s.resource,
            Step::Crew(s) => &s.resource,
        }
    }

    /// Target amount of the step's resource.
    pub fn amount(&self) -> f64 {
        match self {
            Step::Resource(s) => s.amount,
            Step::Crew(s) => s.amount,
        }
    }

    pub fn is_crew(&self) -> bool {
        matches!(self, Step::Crew(_))
    }

    /// Crew member recorded against this step, if any.
    pub fn assigned(&self) -> Option<&str> {
        match self {
            Step::Crew(s) => s.subject.as_deref(),
            Step::Resource(_) => None,
        }
    }

    pub fn type_tag(&self) -> &'static str {
        match self {
            Step::Resource(_) => RESOURCE_STEP_TAG,
            Step::Crew(_) => CREW_STEP_TAG,
        }
    }

    pub fn save(&self, index: usize) -> ConfigNode {
        let mut node = ConfigNode::new("STEP");
        node.add_value("type", self.type_tag());
        node.add_value("name", self.name());
        node.add_value("index", index);
        node.add_value("resource", self.resource_name());
        node.add_value("amount", self.amount());
        if let Step::Crew(s) = self {
            node.add_value("subject", s.subject.as_deref().unwrap_or(""));
        }
        node
    }

    /// Rebuild a step from its node. Unknown type tags yield `None`.
    pub fn load(node: &ConfigNode) -> Option<Self> {
        let name = node.get_str("name");
        let resource = node.get_str("resource");
        let amount = node.get_f64("amount");
        match node.get_str("type") {
            RESOURCE_STEP_TAG => Some(Step::resource(name, resource, amount)),
            CREW_STEP_TAG => {
                let subject = Some(node.get_str("subject"))
                    .filter(|s| !s.is_empty())
                    .map(str::to_string);
                Some(Step::Crew(CrewStep {
                    name: name.to_string(),
                    resource: resource.to_string(),
                    amount,
                    subject,
                }))
            }
            other => {
                tracing::warn!(tag = other, "unknown step type");
                None
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Step sequence
// ---------------------------------------------------------------------------

/// The steps of one record.
///
/// For `Multi`, `0 <= active < steps.len()` and `steps.len() >= 2`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum StepSequence {
    /// No steps: an inert record produced by a failed lookup.
    #[default]
    Empty,
    Single(Step),
    Multi { steps: Vec<Step>, active: usize },
}

impl StepSequence {
    /// Build a sequence, picking the variant from the step count.
    pub fn from_steps(mut steps: Vec<Step>) -> Self {
        match steps.len() {
            0 => StepSequence::Empty,
            1 => StepSequence::Single(steps.remove(0)),
            _ => StepSequence::Multi { steps, active: 0 },
        }
    }

    /// Like [`Self::from_steps`] but resuming at `active`, clamped into range.
    pub fn with_active(steps: Vec<Step>, active: usize) -> Self {
        let mut sequence = Self::from_steps(steps);
        if let StepSequence::Multi { steps, active: current } = &mut sequence {
            if active >= steps.len() {
                tracing::warn!(active, len = steps.len(), "active step out of range, clamping");
            }
            *current = active.min(steps.len() - 1);
        }
        sequence
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, StepSequence::Empty)
    }

    pub fn is_multi(&self) -> bool {
        matches!(self, StepSequence::Multi { .. })
    }

    pub fn len(&self) -> usize {
        match self {
            StepSequence::Empty => 0,
            StepSequence::Single(_) => 1,
            StepSequence::Multi { steps, .. } => steps.len(),
        }
    }

    pub fn active_index(&self) -> usize {
        match self {
            StepSequence::Multi { active, .. } => *active,
            _ => 0,
        }
    }

    pub fn active(&self) -> Option<&Step> {
        match self {
            StepSequence::Empty => None,
            StepSequence::Single(step) => Some(step),
            StepSequence::Multi { steps, active } => steps.get(*active),
        }
    }

    pub fn active_mut(&mut self) -> Option<&mut Step> {
        match self {
            StepSequence::Empty => None,
            StepSequence::Single(step) => Some(step),
            StepSequence::Multi { steps, active } => steps.get_mut(*active),
        }
    }

    /// Whether the active step is the last one.
    pub fn is_final(&self) -> bool {
        match self {
            StepSequence::Multi { steps, active } => *active + 1 >= steps.len(),
            _ => true,
        }
    }

    /// Move to the next step. Returns `false` (and stays put) on the final one.
    pub fn advance(&mut self) -> bool {
        match self {
            StepSequence::Multi { steps, active } if *active + 1 < steps.len() => {
                *active += 1;
                true
            }
            _ => false,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Step> {
        let slice: &[Step] = match self {
            StepSequence::Empty => &[],
            StepSequence::Single(step) => std::slice::from_ref(step),
            StepSequence::Multi { steps, .. } => steps,
        };
        slice.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_steps() -> Vec<Step> {
        vec![
            Step::resource("Prepare", "Setup", 1.0),
            Step::resource("Observe", "LabTime", 20.0),
        ]
    }

    #[test]
    fn variant_follows_step_count() {
        assert!(StepSequence::from_steps(vec![]).is_empty());
        assert!(matches!(
            StepSequence::from_steps(vec![Step::resource("a", "LabTime", 1.0)]),
            StepSequence::Single(_)
        ));
        assert!(StepSequence::from_steps(two_steps()).is_multi());
    }

    #[test]
    fn advance_stops_at_final_step() {
        let mut seq = StepSequence::from_steps(two_steps());
        assert!(!seq.is_final());
        assert!(seq.advance());
        assert_eq!(seq.active_index(), 1);
        assert!(seq.is_final());
        assert!(!seq.advance());
        assert_eq!(seq.active_index(), 1);
    }

    #[test]
    fn out_of_range_active_is_clamped() {
        let seq = StepSequence::with_active(two_steps(), 7);
        assert_eq!(seq.active_index(), 1);
    }

    #[test]
    fn empty_sequence_has_no_active_step() {
        let mut seq = StepSequence::Empty;
        assert!(seq.active().is_none());
        assert!(seq.active_mut().is_none());
        assert!(!seq.advance());
        assert_eq!(seq.iter().count(), 0);
    }

    #[test]
    fn crew_step_round_trips_with_subject() {
        let mut step = Step::crew("Assist", "CrewTime", 5.0);
        if let Step::Crew(s) = &mut step {
            s.subject = Some("Valentina".to_string());
        }
        let node = step.save(0);
        assert_eq!(node.get_str("subject"), "Valentina");
        assert_eq!(Step::load(&node), Some(step));
    }

    #[test]
    fn unassigned_crew_step_loads_without_subject() {
        let step = Step::crew("Assist", "CrewTime", 5.0);
        let loaded = Step::load(&step.save(3)).unwrap();
        assert_eq!(loaded.assigned(), None);
    }

    #[test]
    fn resource_step_has_no_subject_value() {
        let node = Step::resource("Observe", "LabTime", 20.0).save(1);
        assert!(!node.has_value("subject"));
        assert_eq!(node.get_usize("index"), 1);
    }

    #[test]
    fn unknown_step_type_is_rejected() {
        let mut node = ConfigNode::new("STEP");
        node.add_value("type", "TestPointStep");
        assert!(Step::load(&node).is_none());
    }
}
