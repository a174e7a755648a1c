//! Per-entity simulation and the parallel batch driver.

use crate::convolve::simulate;
use crate::curve::EfficacyCurve;
use chrono::NaiveDate;
use immunity_core::{
    validate_config, validate_doses, AgeGroup, EntityId, GroupKey, Regimen, SimConfig, SimError,
    Table,
};
use immunity_dosing::{redistribute, DoseBacklog, Redistribution, RedistributionPolicy, SplitSeries};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Everything needed to simulate one entity, built before any work starts.
/// Each state owns its backlog, so entities share nothing while running.
#[derive(Clone, Debug)]
pub struct EntityState {
    pub entity: EntityId,
    total: Vec<f64>,
    backlog: DoseBacklog,
}

impl EntityState {
    pub fn new(
        entity: EntityId,
        total: Vec<f64>,
        days_between_shots: usize,
    ) -> Result<Self, SimError> {
        validate_doses(&entity.0, &total)?;
        Ok(Self {
            entity,
            total,
            backlog: DoseBacklog::new(days_between_shots)?,
        })
    }

    pub fn days(&self) -> usize {
        self.total.len()
    }

    /// Run the backlog split and both convolutions.
    pub fn run(
        mut self,
        curve: &EfficacyCurve,
        normalization: f64,
    ) -> Result<EntityResult, SimError> {
        let split = self.backlog.run(&self.total)?;
        // A single-shot regimen makes every administered dose a final one.
        let one_dose = simulate(&self.total, curve, Regimen::OneDose, normalization)?;
        let two_dose = simulate(&split.first, curve, Regimen::TwoDose, normalization)?;
        debug!(
            entity = %self.entity,
            days = self.total.len(),
            pending = split.pending,
            "entity simulated"
        );
        Ok(EntityResult {
            entity: self.entity,
            split,
            one_dose,
            two_dose,
        })
    }
}

/// Simulation output for one entity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EntityResult {
    pub entity: EntityId,
    pub split: SplitSeries,
    pub one_dose: Vec<f64>,
    pub two_dose: Vec<f64>,
}

impl EntityResult {
    pub fn immunity(&self, regimen: Regimen) -> &[f64] {
        match regimen {
            Regimen::OneDose => &self.one_dose,
            Regimen::TwoDose => &self.two_dose,
        }
    }
}

/// Batch output: successes and failures are kept apart, one failing entity
/// never stops the rest.
#[derive(Clone, Debug, PartialEq)]
pub struct BatchReport {
    pub start: NaiveDate,
    pub days: usize,
    pub results: BTreeMap<EntityId, EntityResult>,
    pub failures: BTreeMap<EntityId, SimError>,
}

impl BatchReport {
    fn collect_table<F>(&self, pick: F) -> Result<Table<EntityId, f64>, SimError>
    where
        F: Fn(&EntityResult) -> &[f64],
    {
        let mut t = Table::new(self.start, self.days);
        for (id, r) in &self.results {
            t.insert_column(id.clone(), pick(r).to_vec())?;
        }
        Ok(t)
    }

    pub fn immunity_table(&self, regimen: Regimen) -> Result<Table<EntityId, f64>, SimError> {
        self.collect_table(|r| r.immunity(regimen))
    }

    pub fn one_dose_table(&self) -> Result<Table<EntityId, f64>, SimError> {
        self.immunity_table(Regimen::OneDose)
    }

    pub fn two_dose_table(&self) -> Result<Table<EntityId, f64>, SimError> {
        self.immunity_table(Regimen::TwoDose)
    }

    pub fn first_dose_table(&self) -> Result<Table<EntityId, f64>, SimError> {
        self.collect_table(|r| &r.split.first)
    }

    pub fn second_dose_table(&self) -> Result<Table<EntityId, f64>, SimError> {
        self.collect_table(|r| &r.split.second)
    }
}

/// Validated configuration plus the curve built from it.
#[derive(Clone, Debug)]
pub struct ImmunitySimulator {
    config: SimConfig,
    curve: EfficacyCurve,
}

impl ImmunitySimulator {
    pub fn new(config: SimConfig) -> Result<Self, SimError> {
        validate_config(&config)?;
        let curve = EfficacyCurve::from_config(&config.curve)?;
        Ok(Self { config, curve })
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn curve(&self) -> &EfficacyCurve {
        &self.curve
    }

    pub fn simulate_entity(
        &self,
        entity: EntityId,
        total: &[f64],
    ) -> Result<EntityResult, SimError> {
        EntityState::new(entity, total.to_vec(), self.config.days_between_shots)?
            .run(&self.curve, self.config.normalization)
    }

    /// Simulate every column of `doses` in parallel.
    pub fn run_batch(&self, doses: &Table<EntityId, f64>) -> BatchReport {
        info!(
            entities = doses.width(),
            days = doses.days(),
            start = %doses.start(),
            "batch simulation started"
        );
        let mut failures = BTreeMap::new();
        let mut states = Vec::with_capacity(doses.width());
        for (id, col) in doses.columns() {
            match EntityState::new(id.clone(), col.to_vec(), self.config.days_between_shots) {
                Ok(s) => states.push(s),
                Err(e) => {
                    warn!(entity = %id, error = %e, "entity rejected");
                    failures.insert(id.clone(), e);
                }
            }
        }

        let outcomes: Vec<(EntityId, Result<EntityResult, SimError>)> = states
            .into_par_iter()
            .map(|s| {
                let id = s.entity.clone();
                (id, s.run(&self.curve, self.config.normalization))
            })
            .collect();

        let mut results = BTreeMap::new();
        for (id, outcome) in outcomes {
            match outcome {
                Ok(r) => {
                    results.insert(id, r);
                }
                Err(e) => {
                    warn!(entity = %id, error = %e, "entity simulation failed");
                    failures.insert(id, e);
                }
            }
        }
        info!(
            ok = results.len(),
            failed = failures.len(),
            "batch simulation finished"
        );
        BatchReport {
            start: doses.start(),
            days: doses.days(),
            results,
            failures,
        }
    }

    /// Redistribute a stratified dose table using the configured priority
    /// list and policy.
    pub fn redistribute(
        &self,
        doses: &Table<GroupKey, u64>,
        populations: &BTreeMap<AgeGroup, u64>,
    ) -> Result<Redistribution, SimError> {
        let r = &self.config.redistribution;
        redistribute(doses, populations, &r.priority, &RedistributionPolicy::from(r))
    }

    /// Per-age-group immunity for a stratified dose table.
    pub fn subgroup_immunity(
        &self,
        doses: &Table<GroupKey, u64>,
        populations: &BTreeMap<AgeGroup, u64>,
        regimen: Regimen,
    ) -> Result<Table<AgeGroup, f64>, SimError> {
        crate::subgroup::subgroup_immunity(doses, populations, &self.curve, regimen)
    }
}
