//! Age-stratified views: splitting an entity across groups, per-group
//! immunity, and aggregation back into one series.

use crate::convolve::convolve;
use crate::curve::EfficacyCurve;
use chrono::NaiveDate;
use immunity_core::{AgeGroup, DoseNumber, GroupKey, Regimen, SimError, Table};
use immunity_dosing::{split_doses, AgeStratifiedAllocator, SubGroup};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

/// An entity's doses split by (dose, group), plus what no group could take.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Stratified {
    pub doses: Table<GroupKey, u64>,
    pub first_overflow: Vec<u64>,
    pub second_overflow: Vec<u64>,
}

/// Split one entity's whole-number daily totals across `groups` (highest
/// priority first). The backlog decides first versus second shots, then each
/// stream is handed out by its own cascading allocator.
pub fn stratify_entity(
    start: NaiveDate,
    total: &[u64],
    groups: &[SubGroup],
    days_between_shots: usize,
) -> Result<Stratified, SimError> {
    let as_f64: Vec<f64> = total.iter().map(|&v| v as f64).collect();
    let split = split_doses(&as_f64, days_between_shots)?;
    // integral inputs keep every split value integral
    let first: Vec<u64> = split.first.iter().map(|v| v.round() as u64).collect();
    let second: Vec<u64> = split.second.iter().map(|v| v.round() as u64).collect();

    let firsts = AgeStratifiedAllocator::new(groups.to_vec())?.allocate_series(&first)?;
    let seconds = AgeStratifiedAllocator::new(groups.to_vec())?.allocate_series(&second)?;

    let mut doses = firsts.to_table(start, DoseNumber::First)?;
    for (key, col) in seconds.to_table(start, DoseNumber::Second)?.columns() {
        doses.insert_column(key.clone(), col.to_vec())?;
    }
    Ok(Stratified {
        doses,
        first_overflow: firsts.overflow,
        second_overflow: seconds.overflow,
    })
}

/// Immunity per age group: the group's first-dose column convolved with the
/// regimen's curve, as a fraction of the group's population.
///
/// Pass the recipients table of a fractional redistribution to credit every
/// person reached rather than every physical dose.
pub fn subgroup_immunity(
    doses: &Table<GroupKey, u64>,
    populations: &BTreeMap<AgeGroup, u64>,
    curve: &EfficacyCurve,
    regimen: Regimen,
) -> Result<Table<AgeGroup, f64>, SimError> {
    let mut out = Table::new(doses.start(), doses.days());
    for (key, col) in doses.columns() {
        if key.dose != DoseNumber::First {
            continue;
        }
        let pop = populations
            .get(&key.group)
            .copied()
            .ok_or_else(|| {
                SimError::MissingEntity(format!("population of age group {}", key.group))
            })?;
        if pop == 0 {
            return Err(SimError::InvalidInput(format!(
                "age group {} has zero population",
                key.group
            )));
        }
        let stream: Vec<f64> = col.iter().map(|&v| v as f64).collect();
        let mut series = convolve(&stream, |offset| curve.at_day(regimen, offset));
        for v in &mut series {
            *v /= pop as f64;
        }
        out.insert_column(key.group.clone(), series)?;
    }
    debug!(groups = out.width(), %regimen, "sub-group immunity computed");
    Ok(out)
}

/// Weighted mean of every column, day by day. Every column needs a weight;
/// extra weights are ignored.
pub fn population_weighted<K>(
    table: &Table<K, f64>,
    weights: &BTreeMap<K, f64>,
) -> Result<Vec<f64>, SimError>
where
    K: Ord + Clone + fmt::Display,
{
    let mut out = vec![0.0; table.days()];
    let mut total_weight = 0.0;
    for (key, col) in table.columns() {
        let w = weights
            .get(key)
            .copied()
            .ok_or_else(|| SimError::MissingEntity(format!("weight for {key}")))?;
        if !w.is_finite() || w < 0.0 {
            return Err(SimError::InvalidInput(format!("weight for {key} is {w}")));
        }
        total_weight += w;
        for (slot, v) in out.iter_mut().zip(col) {
            *slot += w * v;
        }
    }
    if total_weight <= 0.0 {
        return Err(SimError::InvalidInput(
            "total weight must be positive".to_string(),
        ));
    }
    for v in &mut out {
        *v /= total_weight;
    }
    Ok(out)
}

/// Per day, the share of all doses given so far (both shots) that went to
/// groups matching `selected`. Zero until the first dose is given.
pub fn vaccine_share<P>(doses: &Table<GroupKey, u64>, selected: P) -> Vec<f64>
where
    P: Fn(&AgeGroup) -> bool,
{
    let (mut chosen, mut all) = (0u64, 0u64);
    (0..doses.days())
        .map(|day| {
            for (key, v) in doses.row(day) {
                all += v;
                if selected(&key.group) {
                    chosen += v;
                }
            }
            if all == 0 {
                0.0
            } else {
                chosen as f64 / all as f64
            }
        })
        .collect()
}

/// Age groups whose lower bound is below `age`, for labels like `25-34`.
pub fn younger_than(age: u32) -> impl Fn(&AgeGroup) -> bool {
    move |group| {
        group
            .0
            .split(['-', '+'])
            .next()
            .and_then(|lo| lo.trim().parse::<u32>().ok())
            .is_some_and(|lo| lo < age)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use immunity_core::CurveConfig;
    use proptest::prelude::*;

    fn start() -> NaiveDate {
        NaiveDate::from_ymd_opt(2021, 1, 1).unwrap()
    }

    fn curve() -> EfficacyCurve {
        EfficacyCurve::from_config(&CurveConfig::default()).unwrap()
    }

    #[test]
    fn stratify_fills_oldest_first() {
        let groups = vec![SubGroup::new("85-99", 100), SubGroup::new("75-84", 1_000)];
        let mut total = vec![0u64; 25];
        total[0] = 150;
        total[21] = 200;
        let s = stratify_entity(start(), &total, &groups, 21).unwrap();
        assert_eq!(s.doses.column(&GroupKey::first("85-99")).unwrap()[0], 100);
        assert_eq!(s.doses.column(&GroupKey::first("75-84")).unwrap()[0], 50);
        // 150 second shots on day 21, the oldest get theirs first
        assert_eq!(s.doses.column(&GroupKey::second("85-99")).unwrap()[21], 100);
        assert_eq!(s.doses.column(&GroupKey::second("75-84")).unwrap()[21], 50);
        assert_eq!(s.doses.column(&GroupKey::first("75-84")).unwrap()[21], 50);
        assert!(s.first_overflow.iter().all(|v| *v == 0));
        assert_eq!(s.doses.width(), 4);
    }

    #[test]
    fn stratify_reports_overflow() {
        let groups = vec![SubGroup::new("85-99", 10)];
        let s = stratify_entity(start(), &[25, 0], &groups, 21).unwrap();
        assert_eq!(s.first_overflow, vec![15, 0]);
    }

    #[test]
    fn subgroup_immunity_is_a_population_fraction() {
        let mut doses = Table::new(start(), 60);
        let mut col = vec![0u64; 60];
        col[0] = 50;
        doses.insert_column(GroupKey::first("85-99"), col).unwrap();
        doses.insert_column(GroupKey::second("85-99"), vec![0; 60]).unwrap();
        let pops = BTreeMap::from([(AgeGroup::from("85-99"), 100)]);
        let t = subgroup_immunity(&doses, &pops, &curve(), Regimen::TwoDose).unwrap();
        assert_eq!(t.width(), 1);
        let s = t.column(&AgeGroup::from("85-99")).unwrap();
        assert!((s[59] - 0.5 * 0.98).abs() < 1e-12);
    }

    #[test]
    fn subgroup_immunity_needs_populations() {
        let mut doses = Table::new(start(), 2);
        doses.insert_column(GroupKey::first("85-99"), vec![1, 1]).unwrap();
        assert!(matches!(
            subgroup_immunity(&doses, &BTreeMap::new(), &curve(), Regimen::OneDose),
            Err(SimError::MissingEntity(_))
        ));
        let zero = BTreeMap::from([(AgeGroup::from("85-99"), 0)]);
        assert!(matches!(
            subgroup_immunity(&doses, &zero, &curve(), Regimen::OneDose),
            Err(SimError::InvalidInput(_))
        ));
    }

    #[test]
    fn weighted_mean() {
        let mut t = Table::new(start(), 2);
        t.insert_column(AgeGroup::from("a"), vec![0.2, 0.4]).unwrap();
        t.insert_column(AgeGroup::from("b"), vec![0.6, 0.8]).unwrap();
        let w = BTreeMap::from([(AgeGroup::from("a"), 3.0), (AgeGroup::from("b"), 1.0)]);
        let out = population_weighted(&t, &w).unwrap();
        assert!((out[0] - 0.3).abs() < 1e-12);
        assert!((out[1] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn weighted_mean_rejects_zero_weight() {
        let mut t = Table::new(start(), 1);
        t.insert_column(AgeGroup::from("a"), vec![0.2]).unwrap();
        let w = BTreeMap::from([(AgeGroup::from("a"), 0.0)]);
        assert!(matches!(population_weighted(&t, &w), Err(SimError::InvalidInput(_))));
        assert!(matches!(
            population_weighted(&t, &BTreeMap::new()),
            Err(SimError::MissingEntity(_))
        ));
    }

    #[test]
    fn share_of_doses_to_young() {
        let mut doses = Table::new(start(), 3);
        doses.insert_column(GroupKey::first("25-34"), vec![0, 10, 0]).unwrap();
        doses.insert_column(GroupKey::second("25-34"), vec![0, 0, 10]).unwrap();
        doses.insert_column(GroupKey::first("75-84"), vec![0, 30, 0]).unwrap();
        let share = vaccine_share(&doses, younger_than(55));
        assert_eq!(share, vec![0.0, 0.25, 0.4]);
    }

    #[test]
    fn younger_than_parses_labels() {
        let young = younger_than(55);
        assert!(young(&AgeGroup::from("45-54")));
        assert!(!young(&AgeGroup::from("55-64")));
        assert!(!young(&AgeGroup::from("85+")));
        assert!(!young(&AgeGroup::from("unknown")));
    }

    proptest! {
        #[test]
        fn stratified_doses_add_back_up(total in proptest::collection::vec(0u64..500, 1..60),
                                        caps in proptest::collection::vec(0u64..3_000, 1..5)) {
            let groups: Vec<SubGroup> = caps.iter().enumerate()
                .map(|(i, c)| SubGroup::new(format!("g{i}").as_str(), *c)).collect();
            let s = stratify_entity(start(), &total, &groups, 21).unwrap();
            for (day, t) in total.iter().enumerate() {
                prop_assert_eq!(s.doses.row_total(day) + s.first_overflow[day] + s.second_overflow[day], *t);
            }
        }

        #[test]
        fn share_stays_in_unit_interval(a in proptest::collection::vec(0u64..100, 5), b in proptest::collection::vec(0u64..100, 5)) {
            let mut doses = Table::new(start(), 5);
            doses.insert_column(GroupKey::first("25-34"), a).unwrap();
            doses.insert_column(GroupKey::first("65-74"), b).unwrap();
            for s in vaccine_share(&doses, younger_than(55)) {
                prop_assert!((0.0..=1.0).contains(&s));
            }
        }
    }
}
