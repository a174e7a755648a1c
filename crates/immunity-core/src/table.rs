//! Date-indexed tables with one value column per key.

use crate::SimError;
use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

/// A contiguous daily table: every column holds exactly `days` values, the
/// value at index `i` belonging to `start + i` days.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Table<K: Ord, V> {
    start: NaiveDate,
    days: usize,
    columns: BTreeMap<K, Vec<V>>,
}

impl<K, V> Table<K, V>
where
    K: Ord + Clone + fmt::Display,
    V: Copy,
{
    /// Empty table covering `days` days from `start`.
    pub fn new(start: NaiveDate, days: usize) -> Self {
        Self {
            start,
            days,
            columns: BTreeMap::new(),
        }
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    /// Number of days covered.
    pub fn days(&self) -> usize {
        self.days
    }

    /// Last covered date, `None` for a zero-length table.
    pub fn end(&self) -> Option<NaiveDate> {
        self.days.checked_sub(1).and_then(|last| self.date_at(last))
    }

    pub fn date_at(&self, index: usize) -> Option<NaiveDate> {
        if index >= self.days {
            return None;
        }
        self.start.checked_add_days(Days::new(index as u64))
    }

    pub fn index_of(&self, date: NaiveDate) -> Option<usize> {
        let offset = date.signed_duration_since(self.start).num_days();
        usize::try_from(offset).ok().filter(|i| *i < self.days)
    }

    pub fn dates(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        (0..self.days).filter_map(|i| self.date_at(i))
    }

    /// Add or replace a column. The column must cover exactly the table's days.
    pub fn insert_column(&mut self, key: K, values: Vec<V>) -> Result<(), SimError> {
        if values.len() != self.days {
            return Err(SimError::LengthMismatch {
                expected: self.days,
                actual: values.len(),
            });
        }
        self.columns.insert(key, values);
        Ok(())
    }

    pub fn column(&self, key: &K) -> Result<&[V], SimError> {
        self.columns
            .get(key)
            .map(Vec::as_slice)
            .ok_or_else(|| SimError::MissingEntity(key.to_string()))
    }

    pub fn column_mut(&mut self, key: &K) -> Result<&mut [V], SimError> {
        self.columns
            .get_mut(key)
            .map(Vec::as_mut_slice)
            .ok_or_else(|| SimError::MissingEntity(key.to_string()))
    }

    pub fn contains(&self, key: &K) -> bool {
        self.columns.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.columns.keys()
    }

    /// Columns in key order.
    pub fn columns(&self) -> impl Iterator<Item = (&K, &[V])> {
        self.columns.iter().map(|(k, v)| (k, v.as_slice()))
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    /// Values of every column on one day, in key order.
    pub fn row(&self, index: usize) -> Vec<(K, V)> {
        self.columns
            .iter()
            .filter_map(|(k, v)| v.get(index).map(|x| (k.clone(), *x)))
            .collect()
    }

    /// Check that every column covers the table's days. Tables built through
    /// `insert_column` always pass; deserialized ones may not.
    pub fn validate(&self) -> Result<(), SimError> {
        for values in self.columns.values() {
            if values.len() != self.days {
                return Err(SimError::LengthMismatch {
                    expected: self.days,
                    actual: values.len(),
                });
            }
        }
        Ok(())
    }

    /// Sub-table for the inclusive range `from..=to`. Fails unless the table
    /// covers the whole range; nothing is padded or truncated silently.
    pub fn slice(&self, from: NaiveDate, to: NaiveDate) -> Result<Self, SimError> {
        let misaligned = || SimError::MisalignedRange {
            requested_start: from,
            requested_end: to,
            available_start: self.start,
            available_end: self.end().unwrap_or(self.start),
        };
        if to < from {
            return Err(misaligned());
        }
        let lo = self.index_of(from).ok_or_else(misaligned)?;
        let hi = self.index_of(to).ok_or_else(misaligned)?;
        let columns = self
            .columns
            .iter()
            .map(|(k, v)| (k.clone(), v[lo..=hi].to_vec()))
            .collect();
        Ok(Self {
            start: from,
            days: hi - lo + 1,
            columns,
        })
    }

    /// Append `extra` days to every column; `fill` sees the existing column
    /// and returns the value to append. Opt-in only: nothing else in the
    /// pipeline lengthens a table.
    pub fn extend_by_days<F>(&mut self, extra: usize, fill: F)
    where
        F: Fn(&[V]) -> V,
    {
        for values in self.columns.values_mut() {
            let v = fill(values.as_slice());
            values.extend(std::iter::repeat(v).take(extra));
        }
        self.days += extra;
        debug!(extra, days = self.days, "extended table");
    }

    /// Apply `f` to every value, keeping keys and dates.
    pub fn map_values<W, F>(&self, f: F) -> Table<K, W>
    where
        W: Copy,
        F: Fn(V) -> W,
    {
        Table {
            start: self.start,
            days: self.days,
            columns: self
                .columns
                .iter()
                .map(|(k, v)| (k.clone(), v.iter().map(|x| f(*x)).collect()))
                .collect(),
        }
    }
}

impl<K: Ord + Clone + fmt::Display> Table<K, f64> {
    /// Sum over all columns on one day.
    pub fn row_total(&self, index: usize) -> f64 {
        self.columns.values().filter_map(|v| v.get(index)).sum()
    }
}

impl<K: Ord + Clone + fmt::Display> Table<K, u64> {
    /// Sum over all columns on one day.
    pub fn row_total(&self, index: usize) -> u64 {
        self.columns.values().filter_map(|v| v.get(index)).sum()
    }

    /// Same table with values as floating point counts.
    pub fn to_f64(&self) -> Table<K, f64> {
        self.map_values(|v| v as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EntityId;
    use proptest::prelude::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn sample() -> Table<EntityId, f64> {
        let mut t = Table::new(d(2021, 1, 1), 5);
        t.insert_column("Austria".into(), vec![1.0, 2.0, 3.0, 4.0, 5.0])
            .unwrap();
        t.insert_column("Wien".into(), vec![0.0, 0.0, 1.0, 1.0, 1.0])
            .unwrap();
        t
    }

    #[test]
    fn dates_are_contiguous() {
        let t = sample();
        let dates: Vec<_> = t.dates().collect();
        assert_eq!(dates.len(), 5);
        assert_eq!(dates[0], d(2021, 1, 1));
        assert_eq!(t.end(), Some(d(2021, 1, 5)));
        assert_eq!(t.index_of(d(2021, 1, 3)), Some(2));
        assert_eq!(t.index_of(d(2020, 12, 31)), None);
        assert_eq!(t.index_of(d(2021, 1, 6)), None);
    }

    #[test]
    fn insert_rejects_wrong_length() {
        let mut t = sample();
        let err = t.insert_column("Tirol".into(), vec![1.0]).unwrap_err();
        assert_eq!(
            err,
            SimError::LengthMismatch {
                expected: 5,
                actual: 1
            }
        );
    }

    #[test]
    fn missing_column_is_reported() {
        let t = sample();
        assert_eq!(
            t.column(&"Tirol".into()).unwrap_err(),
            SimError::MissingEntity("Tirol".to_string())
        );
    }

    #[test]
    fn slice_inside_range() {
        let t = sample();
        let s = t.slice(d(2021, 1, 2), d(2021, 1, 4)).unwrap();
        assert_eq!(s.start(), d(2021, 1, 2));
        assert_eq!(s.days(), 3);
        assert_eq!(s.column(&"Austria".into()).unwrap(), &[2.0, 3.0, 4.0]);
    }

    #[test]
    fn slice_outside_range_is_misaligned() {
        let t = sample();
        let err = t.slice(d(2021, 1, 3), d(2021, 1, 9)).unwrap_err();
        assert!(matches!(err, SimError::MisalignedRange { .. }));
        assert!(t.slice(d(2021, 1, 4), d(2021, 1, 2)).is_err());
    }

    #[test]
    fn extend_fills_with_closure() {
        let mut t = sample();
        t.extend_by_days(2, |col| col.last().copied().unwrap_or(0.0));
        assert_eq!(t.days(), 7);
        assert_eq!(
            t.column(&"Austria".into()).unwrap(),
            &[1.0, 2.0, 3.0, 4.0, 5.0, 5.0, 5.0]
        );
        assert_eq!(t.end(), Some(d(2021, 1, 7)));
    }

    #[test]
    fn row_totals() {
        let t = sample();
        assert_eq!(t.row_total(2), 4.0);
        let counts = t.map_values(|v| v as u64);
        assert_eq!(counts.row_total(4), 6);
        assert_eq!(t.row(0).len(), 2);
    }

    #[test]
    fn serde_roundtrip_table() {
        let t = sample();
        let s = serde_json::to_string(&t).unwrap();
        let back: Table<EntityId, f64> = serde_json::from_str(&s).unwrap();
        back.validate().unwrap();
        assert_eq!(back, t);
    }

    #[test]
    fn deserialized_ragged_table_fails_validation() {
        let s = r#"{"start":"2021-01-01","days":3,"columns":{"Austria":[1.0,2.0]}}"#;
        let t: Table<EntityId, f64> = serde_json::from_str(s).unwrap();
        assert!(t.validate().is_err());
    }

    proptest! {
        #[test]
        fn extension_keeps_prefix(values in proptest::collection::vec(0.0f64..1e6, 1..50), extra in 0usize..30) {
            let mut t: Table<EntityId, f64> = Table::new(d(2021, 3, 1), values.len());
            t.insert_column("X".into(), values.clone()).unwrap();
            t.extend_by_days(extra, |_| 0.0);
            let col = t.column(&"X".into()).unwrap();
            prop_assert_eq!(col.len(), values.len() + extra);
            prop_assert_eq!(&col[..values.len()], values.as_slice());
            prop_assert!(col[values.len()..].iter().all(|v| *v == 0.0));
        }
    }
}
