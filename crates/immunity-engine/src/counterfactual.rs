//! Excess-death counterfactual between the two dosing regimens.

use crate::simulator::EntityResult;
use immunity_core::{validate_deaths, EntityId, Regimen, SimError};
use serde::{Deserialize, Serialize};

/// Deaths rescaled from the immunity actually reached to the immunity the
/// alternative policy would have reached: `deaths * (1 + actual) / (1 + alternative)`.
pub fn counterfactual_deaths(
    deaths: &[f64],
    actual: &[f64],
    alternative: &[f64],
) -> Result<Vec<f64>, SimError> {
    validate_deaths("deaths", deaths)?;
    for (label, series) in [("actual immunity", actual), ("alternative immunity", alternative)] {
        if series.len() != deaths.len() {
            return Err(SimError::LengthMismatch {
                expected: deaths.len(),
                actual: series.len(),
            });
        }
        if let Some(v) = series.iter().find(|v| !v.is_finite() || **v < 0.0) {
            return Err(SimError::InvalidInput(format!("{label}: {v}")));
        }
    }
    Ok(deaths
        .iter()
        .zip(actual.iter().zip(alternative))
        .map(|(d, (a, b))| d * (1.0 + a) / (1.0 + b))
        .collect())
}

/// Running total.
pub fn cumulative(series: &[f64]) -> Vec<f64> {
    series
        .iter()
        .scan(0.0, |acc, v| {
            *acc += v;
            Some(*acc)
        })
        .collect()
}

/// Observed versus counterfactual deaths for one entity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CounterfactualReport {
    pub entity: EntityId,
    /// Regimen the entity actually followed.
    pub regimen: Regimen,
    pub observed: Vec<f64>,
    /// Deaths had the entity followed `regimen.other()`.
    pub counterfactual: Vec<f64>,
}

impl CounterfactualReport {
    pub fn new(result: &EntityResult, regimen: Regimen, deaths: &[f64]) -> Result<Self, SimError> {
        let counterfactual = counterfactual_deaths(
            deaths,
            result.immunity(regimen),
            result.immunity(regimen.other()),
        )?;
        Ok(Self {
            entity: result.entity.clone(),
            regimen,
            observed: deaths.to_vec(),
            counterfactual,
        })
    }

    pub fn observed_total(&self) -> f64 {
        self.observed.iter().sum()
    }

    pub fn counterfactual_total(&self) -> f64 {
        self.counterfactual.iter().sum()
    }

    /// Deaths the alternative policy would have added (negative: avoided).
    pub fn difference(&self) -> f64 {
        self.counterfactual_total() - self.observed_total()
    }
}
