#![deny(warnings)]

//! Immunity simulation: efficacy curves, forward convolution of dose streams,
//! the parallel per-entity batch, age-stratified views and the excess-death
//! counterfactual.

mod convolve;
mod counterfactual;
mod curve;
mod simulator;
mod subgroup;

pub use convolve::{convolve, simulate};
pub use counterfactual::{counterfactual_deaths, cumulative, CounterfactualReport};
pub use curve::EfficacyCurve;
pub use simulator::{BatchReport, EntityResult, EntityState, ImmunitySimulator};
pub use subgroup::{
    population_weighted, stratify_entity, subgroup_immunity, vaccine_share, younger_than,
    Stratified,
};
