//! Time-stepped resource generation.
//!
//! A [`Generator`] is a set of signed hourly flow [`Rate`]s. Pool flows use
//! the resource convention of the host: a negative rate produces into the
//! pool, a positive rate consumes from it. Research flows grow a research
//! subject along the diminishing-returns curve in [`crate::science`].
//!
//! # Stepping
//!
//! [`Generator::do_time_step`] first clamps the requested interval to
//! [`Generator::max_step`], the longest interval for which every pool flow
//! stays inside `[0, capacity]`, then asks each flow to move its share. Pools
//! may still deliver slightly less than asked (another generator drained the
//! pool earlier in the same reactivation, or rounding); the difference is
//! carried as an `owed` remainder into the next step.

use serde::{Deserialize, Serialize};

use crate::resource::ResourcePools;
use crate::science::{ResearchGrowth, SubjectLedger};

pub const SECONDS_PER_HOUR: f64 = 3600.0;

// ---------------------------------------------------------------------------
// Rates
// ---------------------------------------------------------------------------

/// What a flow feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowKind {
    /// A capacity-bounded resource pool.
    Pool,
    /// A research subject (positive rate means growth).
    Research,
}

/// A single named flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rate {
    /// Resource name for pool flows, subject id for research flows.
    pub target: String,
    pub per_hour: f64,
    pub kind: FlowKind,
    /// Undelivered amount carried into the next step. Pool flows only.
    /// Bounded by the magnitude of one step's nominal request.
    pub owed: f64,
}

impl Rate {
    pub fn per_second(&self) -> f64 {
        self.per_hour / SECONDS_PER_HOUR
    }

    /// Longest interval this flow can run without leaving pool bounds.
    fn max_step(&self, pools: &dyn ResourcePools) -> f64 {
        let rate = self.per_second();
        if self.kind == FlowKind::Research || rate == 0.0 || !rate.is_finite() {
            return f64::INFINITY;
        }
        let headroom = if rate < 0.0 {
            pools.capacity(&self.target) - pools.amount(&self.target)
        } else {
            pools.amount(&self.target)
        };
        headroom.max(0.0) / rate.abs()
    }
}

// ---------------------------------------------------------------------------
// Step context and report
// ---------------------------------------------------------------------------

/// Everything a generator may touch during one step.
pub struct GeneratorContext<'a> {
    pub pools: &'a mut dyn ResourcePools,
    pub science: &'a mut SubjectLedger,
    /// Generic multiplier for research subjects without their own.
    pub location_multiplier: f64,
}

/// What one pool flow moved.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowDelta {
    pub resource: String,
    /// Nominal amount plus the owed remainder.
    pub requested: f64,
    pub delivered: f64,
}

/// Outcome of [`Generator::do_time_step`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepReport {
    /// Interval the caller asked for, in seconds.
    pub requested: f64,
    /// Interval actually simulated after clamping.
    pub elapsed: f64,
    pub flows: Vec<FlowDelta>,
    pub research: Vec<ResearchGrowth>,
}

impl StepReport {
    /// Signed amount delivered for a resource (negative means produced).
    pub fn delivered(&self, resource: &str) -> f64 {
        self.flows
            .iter()
            .filter(|f| f.resource == resource)
            .map(|f| f.delivered)
            .sum()
    }
}

// ---------------------------------------------------------------------------
// Generator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Generator {
    rates: Vec<Rate>,
    /// Total amount deposited into pools by the most recent step.
    #[serde(skip)]
    last_output: f64,
}

impl Generator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pool flow. Negative produces, positive consumes.
    pub fn add_rate(&mut self, resource: impl Into<String>, per_hour: f64) {
        self.rates.push(Rate {
            target: resource.into(),
            per_hour,
            kind: FlowKind::Pool,
            owed: 0.0,
        });
    }

    /// Register a research flow growing `subject` by `value_per_hour`.
    pub fn add_research(&mut self, subject: impl Into<String>, value_per_hour: f64) {
        self.rates.push(Rate {
            target: subject.into(),
            per_hour: value_per_hour,
            kind: FlowKind::Research,
            owed: 0.0,
        });
    }

    pub fn rates(&self) -> &[Rate] {
        &self.rates
    }

    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }

    /// Amount deposited into pools by the most recent step.
    pub fn last_output(&self) -> f64 {
        self.last_output
    }

    /// Forget the most recent output, e.g. when the generator was skipped.
    pub fn mark_idle(&mut self) {
        self.last_output = 0.0;
    }

    /// Drop every owed remainder, e.g. when the pool a flow fed was replaced.
    pub fn reset_owed(&mut self) {
        for rate in &mut self.rates {
            rate.owed = 0.0;
        }
    }

    /// Largest interval in seconds for which every pool stays in bounds.
    /// Infinite when no flow constrains it.
    pub fn max_step(&self, pools: &dyn ResourcePools) -> f64 {
        self.rates
            .iter()
            .map(|r| r.max_step(pools))
            .fold(f64::INFINITY, f64::min)
    }

    /// Advance every flow by `seconds`, clamped to [`Self::max_step`].
    pub fn do_time_step(&mut self, seconds: f64, ctx: &mut GeneratorContext<'_>) -> StepReport {
        let mut report = StepReport {
            requested: seconds,
            ..StepReport::default()
        };
        self.last_output = 0.0;

        if seconds.is_nan() || seconds <= 0.0 {
            return report;
        }
        let dt = seconds.min(self.max_step(&*ctx.pools));
        if !dt.is_finite() || dt <= 0.0 {
            return report;
        }
        report.elapsed = dt;

        let mut output = 0.0;
        for rate in &mut self.rates {
            let nominal = rate.per_second() * dt;
            match rate.kind {
                FlowKind::Pool => {
                    let requested = nominal + rate.owed;
                    let delivered = ctx.pools.request(&rate.target, requested);
                    let bound = nominal.abs();
                    rate.owed = (requested - delivered).clamp(-bound, bound);
                    if delivered < 0.0 {
                        output -= delivered;
                    }
                    report.flows.push(FlowDelta {
                        resource: rate.target.clone(),
                        requested,
                        delivered,
                    });
                }
                FlowKind::Research => {
                    let growth = ctx
                        .science
                        .grow(&rate.target, nominal, ctx.location_multiplier);
                    report.research.push(growth);
                }
            }
        }
        self.last_output = output;

        tracing::trace!(
            requested = seconds,
            elapsed = dt,
            output,
            "generator stepped"
        );
        report
    }
}
