//! Research value with diminishing returns.
//!
//! Each research subject (an experiment type at a situation) holds a value
//! capped at `cap`. Adding `a` units of research with multiplier `k` follows
//!
//! ```text
//! N = C * (1 - (1 - V/C) * b^(a*k)),   b = (C - 1) / C
//! ```
//!
//! so growth is monotonic and approaches the cap without a hard clamp.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::node::ConfigNode;

/// Cap given to subjects the ledger has not seen before.
pub const DEFAULT_SUBJECT_CAP: f64 = 30.0;

/// Apply the diminishing-returns curve.
///
/// `value` is clamped into `[0, cap]` first. Non-positive or non-finite growth
/// leaves the value unchanged. Caps at or below one make the curve base
/// non-positive, so those fall back to linear growth clamped at the cap.
pub fn research_curve(value: f64, cap: f64, amount: f64, multiplier: f64) -> f64 {
    if !cap.is_finite() || cap <= 0.0 {
        return value.max(0.0);
    }
    let value = if value.is_finite() { value.clamp(0.0, cap) } else { 0.0 };
    let exponent = amount * multiplier;
    if exponent.is_nan() || exponent <= 0.0 {
        return value;
    }
    if cap <= 1.0 {
        return (value + exponent).min(cap);
    }
    let base = (cap - 1.0) / cap;
    let grown = cap * (1.0 - (1.0 - value / cap) * base.powf(exponent));
    grown.clamp(value, cap)
}

/// Where the multiplier used for a growth step came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MultiplierSource {
    /// The subject carries its own multiplier.
    Subject,
    /// No subject multiplier; the generic location multiplier was used.
    Location,
}

/// Outcome of one growth step, so callers can compare nominal and effective
/// rates.
#[derive(Debug, Clone, PartialEq)]
pub struct ResearchGrowth {
    pub subject: String,
    /// Research amount offered before the multiplier.
    pub nominal: f64,
    /// Multiplier actually applied.
    pub multiplier: f64,
    pub source: MultiplierSource,
    pub before: f64,
    pub after: f64,
}

impl ResearchGrowth {
    /// Value actually gained.
    pub fn gained(&self) -> f64 {
        self.after - self.before
    }
}

/// A research subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subject {
    pub value: f64,
    pub cap: f64,
    /// Subject-specific multiplier, if one is known.
    pub multiplier: Option<f64>,
}

impl Subject {
    pub fn new(cap: f64) -> Self {
        Self {
            value: 0.0,
            cap,
            multiplier: None,
        }
    }
}

/// Research subjects for one vessel, keyed by subject id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectLedger {
    subjects: BTreeMap<String, Subject>,
    default_cap: f64,
}

impl Default for SubjectLedger {
    fn default() -> Self {
        Self::new(DEFAULT_SUBJECT_CAP)
    }
}

impl SubjectLedger {
    pub fn new(default_cap: f64) -> Self {
        Self {
            subjects: BTreeMap::new(),
            default_cap,
        }
    }

    /// Register or replace a subject.
    pub fn insert(&mut self, id: impl Into<String>, subject: Subject) {
        self.subjects.insert(id.into(), subject);
    }

    pub fn get(&self, id: &str) -> Option<&Subject> {
        self.subjects.get(id)
    }

    /// Cap given to subjects created by [`Self::grow`].
    pub fn default_cap(&self) -> f64 {
        self.default_cap
    }

    /// Current value of a subject, zero if unknown.
    pub fn value(&self, id: &str) -> f64 {
        self.subjects.get(id).map_or(0.0, |s| s.value)
    }

    pub fn len(&self) -> usize {
        self.subjects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subjects.is_empty()
    }

    /// Grow a subject by `amount` along the diminishing-returns curve.
    ///
    /// Unknown subjects are created with the ledger's default cap. The
    /// subject's own multiplier wins; otherwise `location_multiplier` is used.
    pub fn grow(&mut self, id: &str, amount: f64, location_multiplier: f64) -> ResearchGrowth {
        let default_cap = self.default_cap;
        let subject = self
            .subjects
            .entry(id.to_string())
            .or_insert_with(|| Subject::new(default_cap));

        let (multiplier, source) = match subject.multiplier {
            Some(k) if k.is_finite() => (k, MultiplierSource::Subject),
            _ => (location_multiplier, MultiplierSource::Location),
        };

        let before = subject.value;
        subject.value = research_curve(before, subject.cap, amount, multiplier);

        ResearchGrowth {
            subject: id.to_string(),
            nominal: amount,
            multiplier,
            source,
            before,
            after: subject.value,
        }
    }

    pub fn save_into(&self, parent: &mut ConfigNode) {
        for (id, subject) in &self.subjects {
            let mut node = ConfigNode::new("SUBJECT");
            node.add_value("id", id);
            node.add_value("value", subject.value);
            node.add_value("cap", subject.cap);
            if let Some(k) = subject.multiplier {
                node.add_value("multiplier", k);
            }
            parent.add_node(node);
        }
    }

    pub fn load_from(parent: &ConfigNode, default_cap: f64) -> Self {
        let mut ledger = Self::new(default_cap);
        for node in parent.nodes_named("SUBJECT") {
            let id = node.get_str("id");
            if id.is_empty() {
                tracing::warn!("skipping research subject without an id");
                continue;
            }
            let multiplier = node.parse::<f64>("multiplier").ok();
            ledger.insert(
                id,
                Subject {
                    value: node.get_f64("value"),
                    cap: node.get_f64("cap"),
                    multiplier,
                },
            );
        }
        ledger
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn growth_from_zero_matches_closed_form() {
        // C = 10, b = 0.9, a*k = 2 -> 10 * (1 - 0.81) = 1.9
        let n = research_curve(0.0, 10.0, 2.0, 1.0);
        assert!((n - 1.9).abs() < 1e-12, "got {n}");
    }

    #[test]
    fn multiplier_scales_the_exponent() {
        let a = research_curve(0.0, 10.0, 2.0, 1.0);
        let b = research_curve(0.0, 10.0, 1.0, 2.0);
        assert!((a - b).abs() < 1e-12);
    }

    #[test]
    fn huge_amount_approaches_but_never_exceeds_cap() {
        let n = research_curve(5.0, 10.0, 1e9, 1.0);
        assert!(n <= 10.0);
        assert!(n > 9.99);
    }

    #[test]
    fn non_positive_growth_is_ignored() {
        assert_eq!(research_curve(3.0, 10.0, -5.0, 1.0), 3.0);
        assert_eq!(research_curve(3.0, 10.0, 5.0, 0.0), 3.0);
        assert_eq!(research_curve(3.0, 10.0, f64::NAN, 1.0), 3.0);
    }

    #[test]
    fn small_cap_grows_linearly_to_cap() {
        assert_eq!(research_curve(0.25, 1.0, 0.5, 1.0), 0.75);
        assert_eq!(research_curve(0.25, 1.0, 5.0, 1.0), 1.0);
    }

    #[test]
    fn ledger_prefers_subject_multiplier() {
        let mut ledger = SubjectLedger::new(10.0);
        ledger.insert(
            "KEES@orbit",
            Subject {
                value: 0.0,
                cap: 10.0,
                multiplier: Some(2.0),
            },
        );
        let growth = ledger.grow("KEES@orbit", 1.0, 5.0);
        assert_eq!(growth.multiplier, 2.0);
        assert_eq!(growth.source, MultiplierSource::Subject);
        assert!(growth.gained() > 0.0);
    }

    #[test]
    fn ledger_falls_back_to_location_multiplier() {
        let mut ledger = SubjectLedger::new(10.0);
        let growth = ledger.grow("new-subject", 1.0, 1.5);
        assert_eq!(growth.multiplier, 1.5);
        assert_eq!(growth.source, MultiplierSource::Location);
        assert_eq!(ledger.get("new-subject").unwrap().cap, 10.0);
    }

    #[test]
    fn ledger_round_trips_through_nodes() {
        let mut ledger = SubjectLedger::new(10.0);
        ledger.grow("a", 3.0, 1.0);
        ledger.insert(
            "b",
            Subject {
                value: 1.0,
                cap: 20.0,
                multiplier: Some(0.5),
            },
        );
        let mut parent = ConfigNode::new("VESSEL");
        ledger.save_into(&mut parent);
        assert_eq!(SubjectLedger::load_from(&parent, 10.0), ledger);
    }
}
