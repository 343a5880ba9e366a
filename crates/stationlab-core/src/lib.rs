//! Stationlab Core -- science-lab equipment and experiment simulation.
//!
//! Equipment units sit in capability-typed slots inside a lab and convert
//! elapsed simulated time into resource-pool production. Experiments hosted
//! by the equipment accumulate that production through a multi-step research
//! lifecycle.
//!
//! # Layers
//!
//! Leaf to root:
//!
//! 1. **Generators** -- [`generator::Generator`] turns elapsed seconds into
//!    bounded pool deltas; [`science`] grows research subjects along a
//!    diminishing-returns curve.
//! 2. **Slots and units** -- [`slot::EquipmentSlot`] binds one
//!    [`equipment::EquipmentUnit`] of matching capability; the unit owns its
//!    generator and at most one hosted experiment.
//! 3. **Lifecycle** -- [`experiment::ExperimentRecord`] steps through
//!    STORED, INSTALLED, RUNNING, FINISHED and FINALIZED.
//! 4. **Orchestration** -- [`lab::Lab`] enforces crew rules, holds the
//!    research-active flag and drives generators on every reactivation.
//!
//! [`vessel::Vessel`] owns labs, storages, pools and the research ledger,
//! and performs atomic experiment moves.
//!
//! # Two-phase operations
//!
//! Anything waiting on the player is split into a request and a resolve:
//!
//! ```rust,ignore
//! let StartOutcome::AwaitingCrew(request) = lab.start_experiment(slot, &host)? else { .. };
//! // ... UI picks a crew member ...
//! lab.resolve_crew_selection(slot, request.ticket, Some("Valentina"), &host)?;
//! ```
//!
//! # Key Types
//!
//! - [`registry::Registry`] -- Immutable experiment and equipment definitions.
//! - [`node::ConfigNode`] -- Persistence node tree; every entity has
//!   `save`/`load`.
//! - [`host::LabHost`] -- Clock, crew roster and location supplied by the
//!   host simulation.
//! - [`resource::ResourcePools`] -- Vessel-scoped pool access.
//! - [`serialize`] -- Versioned binary vessel snapshots via bitcode.

pub mod config;
pub mod equipment;
pub mod event;
pub mod experiment;
pub mod generator;
pub mod host;
pub mod id;
pub mod lab;
pub mod node;
pub mod registry;
pub mod resource;
pub mod science;
pub mod serialize;
pub mod slot;
pub mod step;
pub mod storage;
pub mod vessel;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
