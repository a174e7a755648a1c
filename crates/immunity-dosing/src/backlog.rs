//! Second-dose backlog: splits total daily doses into first and second shots.

use immunity_core::{validate_doses, SimError};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Relative slack allowed when re-adding floating point dose counts.
const CONSERVATION_TOLERANCE: f64 = 1e-9;

/// FIFO of second-dose demand for one entity.
///
/// Slot `k` holds the people whose second shot becomes due `k` days from
/// now. The queue always holds exactly `days_between_shots` slots between
/// steps.
#[derive(Clone, Debug, PartialEq)]
pub struct DoseBacklog {
    queue: VecDeque<f64>,
    days_between_shots: usize,
}

/// Outcome of one day: how the day's doses were split.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct DaySplit {
    /// People enrolled today (their second shot is due in `days_between_shots`).
    pub first: f64,
    /// Second shots served today.
    pub second: f64,
}

impl DoseBacklog {
    pub fn new(days_between_shots: usize) -> Result<Self, SimError> {
        if days_between_shots == 0 {
            return Err(SimError::InvalidConfig(
                "days_between_shots must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            queue: VecDeque::from(vec![0.0; days_between_shots]),
            days_between_shots,
        })
    }

    pub fn days_between_shots(&self) -> usize {
        self.days_between_shots
    }

    /// Second-dose demand due on the next step.
    pub fn due_next(&self) -> f64 {
        self.queue.front().copied().unwrap_or(0.0)
    }

    /// Everyone still waiting for a second shot.
    pub fn pending(&self) -> f64 {
        self.queue.iter().sum()
    }

    /// Slots from "due next step" to "due in `days_between_shots` steps".
    pub fn slots(&self) -> impl Iterator<Item = f64> + '_ {
        self.queue.iter().copied()
    }

    /// Advance one day with `total` doses available.
    ///
    /// Due second shots are served before any new enrollment. Demand that
    /// cannot be served stays at the head of the queue and is due again on
    /// the next step.
    pub fn step(&mut self, total: f64) -> DaySplit {
        let demand = self.queue.pop_front().unwrap_or(0.0);
        let (split, carry) = if demand > total {
            (
                DaySplit {
                    first: 0.0,
                    second: total,
                },
                demand - total,
            )
        } else {
            (
                DaySplit {
                    first: total - demand,
                    second: demand,
                },
                0.0,
            )
        };
        self.queue.push_back(split.first);
        if carry > 0.0 {
            // With a one-day interval the head is the slot pushed above.
            if let Some(head) = self.queue.front_mut() {
                *head += carry;
            }
        }
        split
    }

    /// Step through a whole series, checking each day's split against its
    /// total. `pending` is whatever is still queued afterwards.
    pub fn run(&mut self, total: &[f64]) -> Result<SplitSeries, SimError> {
        let mut out = SplitSeries {
            first: Vec::with_capacity(total.len()),
            second: Vec::with_capacity(total.len()),
            pending: 0.0,
        };
        for (day, &t) in total.iter().enumerate() {
            let s = self.step(t);
            check_conservation(day, t, s.first + s.second)?;
            out.first.push(s.first);
            out.second.push(s.second);
        }
        out.pending = self.pending();
        Ok(out)
    }
}

/// First and second shots per day for one entity.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SplitSeries {
    pub first: Vec<f64>,
    pub second: Vec<f64>,
    /// People still waiting for their second shot after the last day.
    pub pending: f64,
}

impl SplitSeries {
    pub fn len(&self) -> usize {
        self.first.len()
    }

    pub fn is_empty(&self) -> bool {
        self.first.is_empty()
    }
}

/// Fail with `ConservationViolation` unless `actual` matches `expected`.
pub fn check_conservation(day: usize, expected: f64, actual: f64) -> Result<(), SimError> {
    let slack = CONSERVATION_TOLERANCE * expected.abs().max(1.0);
    if (expected - actual).abs() > slack {
        return Err(SimError::ConservationViolation {
            day,
            expected,
            actual,
        });
    }
    Ok(())
}

/// Split a total-doses series into first and second shots.
pub fn split_doses(total: &[f64], days_between_shots: usize) -> Result<SplitSeries, SimError> {
    validate_doses("total doses", total)?;
    DoseBacklog::new(days_between_shots)?.run(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn series(len: usize, entries: &[(usize, f64)]) -> Vec<f64> {
        let mut v = vec![0.0; len];
        for (day, n) in entries {
            v[*day] = *n;
        }
        v
    }

    #[test]
    fn zero_interval_rejected() {
        assert!(matches!(
            DoseBacklog::new(0),
            Err(SimError::InvalidConfig(_))
        ));
    }

    #[test]
    fn shortfall_carries_at_head() {
        // 100 first shots on day 0, 60 doses on day 21.
        let total = series(23, &[(0, 100.0), (21, 60.0)]);
        let mut backlog = DoseBacklog::new(21).unwrap();
        let mut splits = Vec::new();
        for (day, t) in total.iter().enumerate() {
            if day == 21 {
                assert_eq!(backlog.due_next(), 100.0);
            }
            splits.push(backlog.step(*t));
            if day == 21 {
                assert_eq!(backlog.due_next(), 40.0);
            }
        }
        assert_eq!(splits[0], DaySplit { first: 100.0, second: 0.0 });
        assert_eq!(splits[21], DaySplit { first: 0.0, second: 60.0 });
        // day 22 has no supply, so the 40 keep waiting
        assert_eq!(splits[22], DaySplit { first: 0.0, second: 0.0 });
        assert_eq!(backlog.due_next(), 40.0);
        assert_eq!(backlog.pending(), 40.0);
    }

    #[test]
    fn second_shots_take_priority() {
        let total = series(30, &[(0, 50.0), (21, 80.0)]);
        let s = split_doses(&total, 21).unwrap();
        assert_eq!(s.second[21], 50.0);
        assert_eq!(s.first[21], 30.0);
        assert_eq!(s.pending, 30.0);
    }

    #[test]
    fn one_day_interval_keeps_queue_length() {
        let mut backlog = DoseBacklog::new(1).unwrap();
        assert_eq!(backlog.step(10.0), DaySplit { first: 10.0, second: 0.0 });
        assert_eq!(backlog.step(4.0), DaySplit { first: 0.0, second: 4.0 });
        assert_eq!(backlog.slots().count(), 1);
        assert_eq!(backlog.due_next(), 6.0);
        assert_eq!(backlog.step(10.0), DaySplit { first: 4.0, second: 6.0 });
        assert_eq!(backlog.due_next(), 4.0);
    }

    #[test]
    fn run_resumes_from_queued_state() {
        let mut backlog = DoseBacklog::new(2).unwrap();
        let head = backlog.run(&[30.0, 0.0]).unwrap();
        assert_eq!(head.first, vec![30.0, 0.0]);
        assert_eq!(head.pending, 30.0);
        // the 30 enrolled on day 0 are served from the next chunk
        let tail = backlog.run(&[20.0, 50.0]).unwrap();
        assert_eq!(tail.second, vec![20.0, 10.0]);
        assert_eq!(tail.first, vec![0.0, 40.0]);
        assert_eq!(tail.pending, 40.0);
        assert_eq!(tail, split_tail(&[30.0, 0.0, 20.0, 50.0], 2));
    }

    fn split_tail(total: &[f64], gap: usize) -> SplitSeries {
        let full = split_doses(total, gap).unwrap();
        SplitSeries {
            first: full.first[2..].to_vec(),
            second: full.second[2..].to_vec(),
            pending: full.pending,
        }
    }

    #[test]
    fn negative_input_rejected() {
        assert!(matches!(
            split_doses(&[1.0, -2.0], 21),
            Err(SimError::InvalidInput(_))
        ));
    }

    #[test]
    fn conservation_check_flags_mismatch() {
        assert!(check_conservation(3, 100.0, 100.0).is_ok());
        assert_eq!(
            check_conservation(3, 100.0, 99.0),
            Err(SimError::ConservationViolation {
                day: 3,
                expected: 100.0,
                actual: 99.0
            })
        );
    }

    proptest! {
        #[test]
        fn split_conserves_daily_totals(total in proptest::collection::vec(0.0f64..10_000.0, 0..120),
                                        gap in 1usize..40) {
            let s = split_doses(&total, gap).unwrap();
            prop_assert_eq!(s.len(), total.len());
            for d in 0..total.len() {
                prop_assert!(s.first[d] >= 0.0 && s.second[d] >= 0.0);
                let diff = (s.first[d] + s.second[d] - total[d]).abs();
                prop_assert!(diff <= 1e-9 * total[d].max(1.0));
            }
        }

        #[test]
        fn lone_first_dose_is_due_exactly_after_interval(day in 0usize..60, gap in 1usize..40) {
            let len = day + gap + 10;
            let mut backlog = DoseBacklog::new(gap).unwrap();
            for d in 0..len {
                let due = backlog.due_next();
                if d == day + gap {
                    prop_assert_eq!(due, 1.0);
                } else {
                    prop_assert_eq!(due, 0.0);
                }
                // Enroll a single person on `day`; nobody else ever shows up,
                // and the due shot is never served so it stays visible.
                let supply = if d == day { 1.0 } else { 0.0 };
                let s = backlog.step(supply);
                prop_assert_eq!(s.second, 0.0);
                if d == day + gap {
                    // carried at the head from here on
                    prop_assert_eq!(backlog.due_next(), 1.0);
                    break;
                }
            }
        }

        #[test]
        fn pending_never_exceeds_enrolled(total in proptest::collection::vec(0.0f64..1_000.0, 1..100),
                                          gap in 1usize..30) {
            let mut backlog = DoseBacklog::new(gap).unwrap();
            let (mut enrolled, mut served) = (0.0, 0.0);
            for t in &total {
                let s = backlog.step(*t);
                enrolled += s.first;
                served += s.second;
                prop_assert!(backlog.pending() + served <= enrolled * (1.0 + 1e-9) + 1e-9);
            }
        }
    }
}
