//! Data-driven station content for stationlab.
//!
//! Reads experiment and equipment definitions plus the lab configuration from
//! RON, TOML, or JSON files and resolves them into a
//! [`stationlab_core::registry::Registry`] and
//! [`stationlab_core::config::LabConfig`].

pub mod loader;
pub mod schema;

pub use loader::{DataLoadError, StationData, load_station_data};
