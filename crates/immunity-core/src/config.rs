//! Simulation configuration and its validation.

use crate::{AgeGroup, GroupKey, SimError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Default interval between first and second shot, in days.
pub const DEFAULT_DAYS_BETWEEN_SHOTS: usize = 21;

/// Dose inputs are expressed per million inhabitants.
pub const PER_MILLION: f64 = 1e6;

/// One (day offset, immunity) knot of an efficacy curve.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ControlPoint {
    /// Days since the first shot.
    pub day: u32,
    /// Expected immunity in [0,1].
    pub immunity: f64,
}

impl ControlPoint {
    pub const fn new(day: u32, immunity: f64) -> Self {
        Self { day, immunity }
    }
}

/// Efficacy control points: a prefix shared by both regimens followed by one
/// tail per regimen. Storing the prefix once keeps both curves identical up
/// to the first-dose plateau.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CurveConfig {
    pub shared: Vec<ControlPoint>,
    pub one_dose: Vec<ControlPoint>,
    pub two_dose: Vec<ControlPoint>,
}

impl Default for CurveConfig {
    fn default() -> Self {
        // 65% three weeks after the first shot; 85% after another five weeks
        // with a single shot, 98% two weeks after the second shot.
        Self {
            shared: vec![ControlPoint::new(0, 0.0), ControlPoint::new(21, 0.65)],
            one_dose: vec![ControlPoint::new(56, 0.85)],
            two_dose: vec![ControlPoint::new(35, 0.98)],
        }
    }
}

/// How the fractional-dosing overflow is turned back into whole doses.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum OverflowRounding {
    /// Round toward zero. Systematically undercounts the freed doses.
    #[default]
    Truncate,
    /// Round down or up with probability equal to the fractional part,
    /// driven by a seeded generator so runs stay reproducible.
    Stochastic { seed: u64 },
}

/// Dose redistribution policy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedistributionConfig {
    /// (dose, group) pairs, highest priority first.
    pub priority: Vec<GroupKey>,
    /// Fraction of a full dose each age group receives under fractional dosing.
    pub fractional_doses: BTreeMap<AgeGroup, f64>,
    /// Also redirect first doses (second doses are always redirected).
    pub distribute_first_doses: bool,
    pub fractional_dosing: bool,
    pub overflow_rounding: OverflowRounding,
}

impl Default for RedistributionConfig {
    fn default() -> Self {
        // Ordered by relative risk of severe outcome per age bracket.
        let priority = vec![
            GroupKey::first("85-99"),
            GroupKey::first("75-84"),
            GroupKey::second("85-99"),
            GroupKey::first("65-74"),
            GroupKey::first("55-64"),
            GroupKey::second("75-84"),
            GroupKey::first("45-54"),
            GroupKey::second("65-74"),
            GroupKey::first("35-44"),
            GroupKey::second("45-54"),
            GroupKey::first("25-34"),
            GroupKey::second("55-64"),
            GroupKey::second("35-44"),
            GroupKey::second("25-34"),
        ];
        let fractional_doses = [
            ("25-34", 0.25),
            ("35-44", 0.25),
            ("45-54", 0.25),
            ("55-64", 0.5),
            ("65-74", 0.75),
            ("75-84", 1.0),
            ("85-99", 1.0),
        ]
        .into_iter()
        .map(|(g, f)| (AgeGroup::from(g), f))
        .collect();
        Self {
            priority,
            fractional_doses,
            distribute_first_doses: false,
            fractional_dosing: false,
            overflow_rounding: OverflowRounding::Truncate,
        }
    }
}

/// Top-level simulation configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Days from first shot until the second shot is due (>= 1).
    pub days_between_shots: usize,
    /// Divisor turning accumulated dose-weighted immunity into a population
    /// fraction (1e6 for per-million inputs).
    pub normalization: f64,
    pub curve: CurveConfig,
    pub redistribution: RedistributionConfig,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            days_between_shots: DEFAULT_DAYS_BETWEEN_SHOTS,
            normalization: PER_MILLION,
            curve: CurveConfig::default(),
            redistribution: RedistributionConfig::default(),
        }
    }
}

/// Validate an ordered run of control points: first day 0, days strictly
/// increasing, immunity finite, within [0,1] and non-decreasing.
pub fn validate_control_points(points: &[ControlPoint]) -> Result<(), SimError> {
    let first = points
        .first()
        .ok_or_else(|| SimError::InvalidCurve("no control points".to_string()))?;
    if first.day != 0 {
        return Err(SimError::InvalidCurve(format!(
            "curve must start at day 0, starts at day {}",
            first.day
        )));
    }
    for p in points {
        if !p.immunity.is_finite() || !(0.0..=1.0).contains(&p.immunity) {
            return Err(SimError::InvalidCurve(format!(
                "immunity {} at day {} is outside [0,1]",
                p.immunity, p.day
            )));
        }
    }
    for w in points.windows(2) {
        if w[1].day <= w[0].day {
            return Err(SimError::InvalidCurve(format!(
                "control days not strictly increasing: {} then {}",
                w[0].day, w[1].day
            )));
        }
        if w[1].immunity < w[0].immunity {
            return Err(SimError::InvalidCurve(format!(
                "immunity decreases between day {} and day {}",
                w[0].day, w[1].day
            )));
        }
    }
    Ok(())
}

/// Validate the whole configuration, including both assembled curves.
pub fn validate_config(cfg: &SimConfig) -> Result<(), SimError> {
    if cfg.days_between_shots == 0 {
        return Err(SimError::InvalidConfig(
            "days_between_shots must be at least 1".to_string(),
        ));
    }
    if !cfg.normalization.is_finite() || cfg.normalization <= 0.0 {
        return Err(SimError::InvalidConfig(format!(
            "normalization must be > 0, got {}",
            cfg.normalization
        )));
    }
    for tail in [&cfg.curve.one_dose, &cfg.curve.two_dose] {
        let full: Vec<ControlPoint> = cfg.curve.shared.iter().chain(tail).copied().collect();
        validate_control_points(&full)?;
    }

    let r = &cfg.redistribution;
    let mut seen = BTreeSet::new();
    for key in &r.priority {
        if !seen.insert(key) {
            return Err(SimError::InvalidConfig(format!(
                "duplicate priority entry {key}"
            )));
        }
    }
    for (group, frac) in &r.fractional_doses {
        if !frac.is_finite() || *frac <= 0.0 || *frac > 1.0 {
            return Err(SimError::InvalidConfig(format!(
                "fractional dose for {group} must be in (0,1], got {frac}"
            )));
        }
    }
    if r.fractional_dosing {
        if let Some(key) = r
            .priority
            .iter()
            .find(|k| !r.fractional_doses.contains_key(&k.group))
        {
            return Err(SimError::InvalidConfig(format!(
                "fractional dosing enabled but no fraction configured for {}",
                key.group
            )));
        }
    }
    Ok(())
}
