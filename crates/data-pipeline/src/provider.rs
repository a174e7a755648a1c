//! Provider trait and the in-memory snapshot implementation.

use chrono::{Days, NaiveDate};
use immunity_core::{
    validate_deaths, validate_doses, AgeGroup, EntityId, GroupKey, Regimen, SimError, Table,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::info;

/// Errors while reading a snapshot from disk.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("io error: {0}")]
    Io(String),
    #[error("malformed snapshot: {0}")]
    Parse(String),
    #[error(transparent)]
    Sim(#[from] SimError),
}

impl From<std::io::Error> for PipelineError {
    fn from(e: std::io::Error) -> Self {
        PipelineError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(e: serde_json::Error) -> Self {
        PipelineError::Parse(e.to_string())
    }
}

/// A contiguous daily series starting at `start`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DatedSeries {
    pub start: NaiveDate,
    pub values: Vec<f64>,
}

impl DatedSeries {
    pub fn new(start: NaiveDate, values: Vec<f64>) -> Self {
        Self { start, values }
    }

    /// Last covered day, `None` when empty.
    pub fn end(&self) -> Option<NaiveDate> {
        let last = self.values.len().checked_sub(1)?;
        self.start.checked_add_days(Days::new(last as u64))
    }
}

/// Source of the per-entity inputs the engine consumes.
pub trait DataProvider {
    /// Every entity the provider knows about.
    fn entities(&self) -> Vec<EntityId>;
    /// Daily total doses (per million inhabitants).
    fn doses(&self, entity: &EntityId) -> Result<DatedSeries, SimError>;
    /// Daily deaths on the same calendar as the doses.
    fn deaths(&self, entity: &EntityId) -> Result<DatedSeries, SimError>;
    /// Population per age group.
    fn populations(&self, entity: &EntityId) -> Result<BTreeMap<AgeGroup, u64>, SimError>;
    /// Daily doses per (dose, age group).
    fn group_doses(&self, entity: &EntityId) -> Result<Table<GroupKey, u64>, SimError>;
    /// Regimen the entity actually follows.
    fn regimen(&self, _entity: &EntityId) -> Regimen {
        Regimen::TwoDose
    }
}

/// Provider backed by maps, loadable from a JSON snapshot.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InMemoryProvider {
    pub doses: BTreeMap<EntityId, DatedSeries>,
    pub deaths: BTreeMap<EntityId, DatedSeries>,
    pub populations: BTreeMap<EntityId, BTreeMap<AgeGroup, u64>>,
    pub group_doses: BTreeMap<EntityId, Table<GroupKey, u64>>,
    pub regimens: BTreeMap<EntityId, Regimen>,
}

fn missing(what: &str, entity: &EntityId) -> SimError {
    SimError::MissingEntity(format!("{what} for {entity}"))
}

impl InMemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_doses(
        mut self,
        entity: impl Into<EntityId>,
        start: NaiveDate,
        values: Vec<f64>,
    ) -> Self {
        self.doses.insert(entity.into(), DatedSeries::new(start, values));
        self
    }

    pub fn with_deaths(
        mut self,
        entity: impl Into<EntityId>,
        start: NaiveDate,
        values: Vec<f64>,
    ) -> Self {
        self.deaths.insert(entity.into(), DatedSeries::new(start, values));
        self
    }

    pub fn with_population(
        mut self,
        entity: impl Into<EntityId>,
        group: impl Into<AgeGroup>,
        people: u64,
    ) -> Self {
        self.populations
            .entry(entity.into())
            .or_default()
            .insert(group.into(), people);
        self
    }

    pub fn with_group_doses(
        mut self,
        entity: impl Into<EntityId>,
        table: Table<GroupKey, u64>,
    ) -> Self {
        self.group_doses.insert(entity.into(), table);
        self
    }

    pub fn with_regimen(mut self, entity: impl Into<EntityId>, regimen: Regimen) -> Self {
        self.regimens.insert(entity.into(), regimen);
        self
    }

    /// Reject negative or non-finite counts and ragged group tables.
    pub fn validate(&self) -> Result<(), SimError> {
        for (id, s) in &self.doses {
            validate_doses(&id.0, &s.values)?;
        }
        for (id, s) in &self.deaths {
            validate_deaths(&id.0, &s.values)?;
        }
        for t in self.group_doses.values() {
            t.validate()?;
        }
        Ok(())
    }

    pub fn from_json_str(text: &str) -> Result<Self, PipelineError> {
        let p: Self = serde_json::from_str(text)?;
        p.validate()?;
        Ok(p)
    }

    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self, PipelineError> {
        let text = fs::read_to_string(path.as_ref())?;
        let p = Self::from_json_str(&text)?;
        info!(
            path = %path.as_ref().display(),
            entities = p.doses.len(),
            "loaded snapshot"
        );
        Ok(p)
    }

    pub fn to_json_pretty(&self) -> Result<String, PipelineError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl DataProvider for InMemoryProvider {
    fn entities(&self) -> Vec<EntityId> {
        self.doses.keys().cloned().collect()
    }

    fn doses(&self, entity: &EntityId) -> Result<DatedSeries, SimError> {
        self.doses.get(entity).cloned().ok_or_else(|| missing("doses", entity))
    }

    fn deaths(&self, entity: &EntityId) -> Result<DatedSeries, SimError> {
        self.deaths.get(entity).cloned().ok_or_else(|| missing("deaths", entity))
    }

    fn populations(&self, entity: &EntityId) -> Result<BTreeMap<AgeGroup, u64>, SimError> {
        self.populations
            .get(entity)
            .cloned()
            .ok_or_else(|| missing("populations", entity))
    }

    fn group_doses(&self, entity: &EntityId) -> Result<Table<GroupKey, u64>, SimError> {
        self.group_doses
            .get(entity)
            .cloned()
            .ok_or_else(|| missing("group doses", entity))
    }

    fn regimen(&self, entity: &EntityId) -> Regimen {
        self.regimens.get(entity).copied().unwrap_or(Regimen::TwoDose)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2021, m, day).unwrap()
    }

    fn provider() -> InMemoryProvider {
        InMemoryProvider::new()
            .with_doses("Austria", d(1, 1), vec![10.0, 20.0, 30.0])
            .with_deaths("Austria", d(1, 1), vec![5.0, 4.0, 3.0])
            .with_population("Austria", "85-99", 200_000)
            .with_population("Austria", "75-84", 600_000)
            .with_regimen("Austria", Regimen::OneDose)
    }

    #[test]
    fn series_end() {
        assert_eq!(DatedSeries::new(d(1, 1), vec![1.0, 2.0]).end(), Some(d(1, 2)));
        assert_eq!(DatedSeries::new(d(1, 1), vec![]).end(), None);
    }

    #[test]
    fn lookups() {
        let p = provider();
        let at = EntityId::from("Austria");
        assert_eq!(p.entities(), vec![at.clone()]);
        assert_eq!(p.doses(&at).unwrap().values, vec![10.0, 20.0, 30.0]);
        assert_eq!(p.populations(&at).unwrap().len(), 2);
        assert_eq!(p.regimen(&at), Regimen::OneDose);
        assert_eq!(p.regimen(&EntityId::from("Peru")), Regimen::TwoDose);
    }

    #[test]
    fn unknown_entity_is_missing() {
        let p = provider();
        let xx = EntityId::from("Atlantis");
        assert!(matches!(p.doses(&xx), Err(SimError::MissingEntity(_))));
        assert!(matches!(p.deaths(&xx), Err(SimError::MissingEntity(_))));
        assert!(matches!(p.group_doses(&xx), Err(SimError::MissingEntity(_))));
    }

    #[test]
    fn json_snapshot_roundtrip() {
        let mut table = Table::new(d(1, 1), 2);
        table.insert_column(GroupKey::first("85-99"), vec![3, 4]).unwrap();
        let p = provider().with_group_doses("Austria", table);
        let text = p.to_json_pretty().unwrap();
        assert!(text.contains("1D/85-99"));
        let back = InMemoryProvider::from_json_str(&text).unwrap();
        assert_eq!(back, p);
    }

    #[test]
    fn negative_doses_rejected_on_load() {
        let text = r#"{"doses": {"Austria": {"start": "2021-01-01", "values": [1.0, -3.0]}}}"#;
        assert!(matches!(
            InMemoryProvider::from_json_str(text),
            Err(PipelineError::Sim(SimError::InvalidInput(_)))
        ));
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        assert!(matches!(
            InMemoryProvider::from_json_str("{not json"),
            Err(PipelineError::Parse(_))
        ));
    }
}
