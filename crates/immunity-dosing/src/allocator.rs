//! Cascading allocation of one dose stream across prioritized sub-groups.

use chrono::NaiveDate;
use immunity_core::{AgeGroup, DoseNumber, GroupKey, SimError, Table};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A sub-population competing for doses.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubGroup {
    pub name: AgeGroup,
    /// Population of the group.
    pub capacity: u64,
    /// People who already received the dose being allocated (<= capacity).
    pub fully_dosed: u64,
}

impl SubGroup {
    pub fn new(name: impl Into<AgeGroup>, capacity: u64) -> Self {
        Self {
            name: name.into(),
            capacity,
            fully_dosed: 0,
        }
    }

    /// People in the group still waiting.
    pub fn needed(&self) -> u64 {
        self.capacity - self.fully_dosed
    }

    pub fn is_finished(&self) -> bool {
        self.fully_dosed == self.capacity
    }
}

/// One day's allocation, index-aligned with the allocator's groups.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Allocation {
    pub assigned: Vec<u64>,
    /// Supply left after every group was satisfied.
    pub overflow: u64,
}

impl Allocation {
    pub fn total(&self) -> u64 {
        self.assigned.iter().sum::<u64>() + self.overflow
    }
}

/// Per-day allocations for a whole series.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AllocationSeries {
    pub groups: Vec<AgeGroup>,
    /// `assigned[g][day]`.
    pub assigned: Vec<Vec<u64>>,
    pub overflow: Vec<u64>,
}

impl AllocationSeries {
    /// Stratified dose table with one `dose/<group>` column per group.
    pub fn to_table(
        &self,
        start: NaiveDate,
        dose: DoseNumber,
    ) -> Result<Table<GroupKey, u64>, SimError> {
        let mut t = Table::new(start, self.overflow.len());
        for (group, values) in self.groups.iter().zip(&self.assigned) {
            t.insert_column(GroupKey::new(dose, group.clone()), values.clone())?;
        }
        Ok(t)
    }
}

/// Fills groups strictly in order: the first unfinished group takes as much
/// as it needs before anything spills into the next one.
#[derive(Clone, Debug)]
pub struct AgeStratifiedAllocator {
    groups: Vec<SubGroup>,
    next: usize,
}

impl AgeStratifiedAllocator {
    /// `groups` ordered highest priority first.
    pub fn new(groups: Vec<SubGroup>) -> Result<Self, SimError> {
        let mut names = BTreeSet::new();
        for g in &groups {
            if g.fully_dosed > g.capacity {
                return Err(SimError::InvalidInput(format!(
                    "group {} has {} dosed but capacity {}",
                    g.name, g.fully_dosed, g.capacity
                )));
            }
            if !names.insert(&g.name) {
                return Err(SimError::InvalidInput(format!(
                    "group {} listed twice",
                    g.name
                )));
            }
        }
        let mut alloc = Self { groups, next: 0 };
        alloc.skip_finished();
        Ok(alloc)
    }

    pub fn groups(&self) -> &[SubGroup] {
        &self.groups
    }

    /// True once every group is satisfied; further supply is all overflow.
    pub fn is_saturated(&self) -> bool {
        self.next >= self.groups.len()
    }

    fn skip_finished(&mut self) {
        while self.next < self.groups.len() && self.groups[self.next].is_finished() {
            self.next += 1;
        }
    }

    /// Allocate one day's supply.
    pub fn allocate_day(&mut self, day: usize, supply: u64) -> Result<Allocation, SimError> {
        let mut assigned = vec![0u64; self.groups.len()];
        let mut left = supply;
        while left > 0 && !self.is_saturated() {
            let g = &mut self.groups[self.next];
            let take = left.min(g.needed());
            g.fully_dosed += take;
            assigned[self.next] += take;
            left -= take;
            self.skip_finished();
        }
        let alloc = Allocation {
            assigned,
            overflow: left,
        };
        if alloc.total() != supply {
            return Err(SimError::ConservationViolation {
                day,
                expected: supply as f64,
                actual: alloc.total() as f64,
            });
        }
        Ok(alloc)
    }

    /// Allocate every day of `supply` in order.
    pub fn allocate_series(&mut self, supply: &[u64]) -> Result<AllocationSeries, SimError> {
        let mut out = AllocationSeries {
            groups: self.groups.iter().map(|g| g.name.clone()).collect(),
            assigned: vec![Vec::with_capacity(supply.len()); self.groups.len()],
            overflow: Vec::with_capacity(supply.len()),
        };
        for (day, &s) in supply.iter().enumerate() {
            let a = self.allocate_day(day, s)?;
            for (col, v) in out.assigned.iter_mut().zip(a.assigned) {
                col.push(v);
            }
            out.overflow.push(a.overflow);
        }
        Ok(out)
    }
}
