//! Priority-driven redistribution of a stratified dose table.
//!
//! The number of doses given on a day is treated as fixed by supply; only
//! who receives them changes. Each (dose, group) pair can absorb at most the
//! group's population, after which it drops out of the priority list and
//! any remaining doses cascade to the next pair.

use crate::priority::PriorityQueue;
use immunity_core::{
    AgeGroup, DoseNumber, GroupKey, OverflowRounding, RedistributionConfig, SimError, Table,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Redistribution switches and the fractional-dose table.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RedistributionPolicy {
    pub distribute_first_doses: bool,
    pub fractional_dosing: bool,
    pub fractional_doses: BTreeMap<AgeGroup, f64>,
    pub rounding: OverflowRounding,
}

impl From<&RedistributionConfig> for RedistributionPolicy {
    fn from(cfg: &RedistributionConfig) -> Self {
        Self {
            distribute_first_doses: cfg.distribute_first_doses,
            fractional_dosing: cfg.fractional_dosing,
            fractional_doses: cfg.fractional_doses.clone(),
            rounding: cfg.overflow_rounding,
        }
    }
}

/// Result of a redistribution run.
#[derive(Clone, Debug, PartialEq)]
pub struct Redistribution {
    /// Physical doses per pair and day; daily totals equal the input's.
    pub doses: Table<GroupKey, u64>,
    /// People credited with a dose per pair and day. Equal to `doses` unless
    /// fractional dosing stretched some doses over more people.
    pub recipients: Table<GroupKey, u64>,
    /// Day on which each pair was fully covered, in order of completion.
    pub covered: Vec<(usize, GroupKey)>,
}

/// Turns the fractional remainder back into whole doses.
struct OverflowRounder {
    mode: OverflowRounding,
    rng: Option<ChaCha8Rng>,
}

impl OverflowRounder {
    fn new(mode: OverflowRounding) -> Self {
        let rng = match mode {
            OverflowRounding::Truncate => None,
            OverflowRounding::Stochastic { seed } => Some(ChaCha8Rng::seed_from_u64(seed)),
        };
        Self { mode, rng }
    }

    fn round(&mut self, x: f64) -> u64 {
        if !(x.is_finite() && x > 0.0) {
            return 0;
        }
        match (self.mode, self.rng.as_mut()) {
            (OverflowRounding::Stochastic { .. }, Some(rng)) => {
                let base = x.floor();
                let u: f64 = rng.gen();
                base as u64 + u64::from(u < x - base)
            }
            _ => x.trunc() as u64,
        }
    }
}

fn population(populations: &BTreeMap<AgeGroup, u64>, group: &AgeGroup) -> Result<u64, SimError> {
    populations
        .get(group)
        .copied()
        .ok_or_else(|| SimError::MissingEntity(format!("population of age group {group}")))
}

/// Redistribute `doses` across pairs following `priority` (highest first).
///
/// Second doses always go to the top of the priority list. First doses stay
/// with their own group while it has people left unless
/// `distribute_first_doses` is set. Columns are processed in key order each
/// day.
pub fn redistribute(
    doses: &Table<GroupKey, u64>,
    populations: &BTreeMap<AgeGroup, u64>,
    priority: &[GroupKey],
    policy: &RedistributionPolicy,
) -> Result<Redistribution, SimError> {
    let mut queue = PriorityQueue::new(priority)?;
    let keys: Vec<GroupKey> = {
        let mut all: Vec<GroupKey> = doses.keys().cloned().collect();
        all.extend(priority.iter().cloned());
        all.sort();
        all.dedup();
        all
    };
    let mut fractions = BTreeMap::new();
    for key in &keys {
        population(populations, &key.group)?;
        if policy.fractional_dosing {
            let f = policy.fractional_doses.get(&key.group).copied().ok_or_else(|| {
                SimError::InvalidConfig(format!("no fractional dose for {}", key.group))
            })?;
            if !f.is_finite() || f <= 0.0 || f > 1.0 {
                return Err(SimError::InvalidConfig(format!(
                    "fractional dose for {} must be in (0,1], got {f}",
                    key.group
                )));
            }
            fractions.insert(key.group.clone(), f);
        }
    }

    let days = doses.days();
    let mut have: BTreeMap<GroupKey, u64> = keys.iter().map(|k| (k.clone(), 0)).collect();
    let mut given: BTreeMap<GroupKey, Vec<u64>> =
        keys.iter().map(|k| (k.clone(), vec![0; days])).collect();
    let mut credited = given.clone();
    let mut covered = Vec::new();
    let mut rounder = OverflowRounder::new(policy.rounding);

    // Pairs that start out with nobody to dose can never absorb anything.
    for key in &keys {
        if population(populations, &key.group)? == 0 && queue.remove(key) {
            covered.push((0, key.clone()));
        }
    }

    info!(
        days,
        pairs = keys.len(),
        distribute_first = policy.distribute_first_doses,
        fractional = policy.fractional_dosing,
        "redistributing doses"
    );

    for day in 0..days {
        for (key, count) in doses.row(day) {
            let mut left = count;
            if left == 0 {
                continue;
            }
            let redirect = key.dose == DoseNumber::Second || policy.distribute_first_doses;
            let mut target = if redirect {
                next_target(&queue, day, left)?
            } else {
                key
            };
            loop {
                let pop = population(populations, &target.group)?;
                let had = have.get(&target).copied().unwrap_or(0);
                let reached = left.min(pop.saturating_sub(had));
                let mut freed = 0;
                if policy.fractional_dosing && reached > 0 {
                    let frac = fractions.get(&target.group).copied().unwrap_or(1.0);
                    // at least one physical dose is used per step
                    freed = rounder
                        .round(reached as f64 * (1.0 - frac))
                        .min(reached - 1);
                }
                let used = reached - freed;
                if reached > 0 {
                    *have.entry(target.clone()).or_insert(0) += reached;
                    if let Some(col) = credited.get_mut(&target) {
                        col[day] += reached;
                    }
                    if let Some(col) = given.get_mut(&target) {
                        col[day] += used;
                    }
                }
                left -= used;
                if had + reached >= pop && queue.remove(&target) {
                    debug!(day, pair = %target, "priority pair covered");
                    covered.push((day, target.clone()));
                }
                if left == 0 {
                    break;
                }
                target = next_target(&queue, day, left)?;
            }
        }

        let expected = doses.row_total(day);
        let actual: u64 = given.values().map(|col| col[day]).sum();
        if actual != expected {
            return Err(SimError::ConservationViolation {
                day,
                expected: expected as f64,
                actual: actual as f64,
            });
        }
    }

    let mut out_doses = Table::new(doses.start(), days);
    let mut out_recipients = Table::new(doses.start(), days);
    for (key, col) in given {
        out_doses.insert_column(key, col)?;
    }
    for (key, col) in credited {
        out_recipients.insert_column(key, col)?;
    }
    Ok(Redistribution {
        doses: out_doses,
        recipients: out_recipients,
        covered,
    })
}

fn next_target(queue: &PriorityQueue, day: usize, residual: u64) -> Result<GroupKey, SimError> {
    queue
        .top()
        .cloned()
        .ok_or(SimError::PriorityExhausted { day, residual })
}
