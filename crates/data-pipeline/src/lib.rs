#![deny(warnings)]

//! Input seam for the simulation: a provider trait over per-entity series,
//! an in-memory snapshot provider, and loaders that put the requested
//! entities onto one date index.

mod loader;
mod provider;

pub use loader::{load_death_table, load_dose_table, DatasetRequest};
pub use provider::{DataProvider, DatedSeries, InMemoryProvider, PipelineError};
