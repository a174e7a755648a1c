//! Assemble per-entity series onto one shared date index.

use crate::provider::{DataProvider, DatedSeries};
use chrono::{Days, NaiveDate};
use immunity_core::{validate_deaths, validate_doses, EntityId, SimError, Table};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Which entities and dates to load.
///
/// Unset bounds default to the window every requested entity covers. An
/// empty entity list means every entity the provider knows.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetRequest {
    pub entities: Vec<EntityId>,
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    /// Days appended after `end`. Observed values are kept wherever an
    /// entity has them; only days past its own series are filled, doses
    /// with zero and deaths with the last observed value.
    pub extend_by_days: usize,
}

impl DatasetRequest {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn entity(mut self, id: impl Into<EntityId>) -> Self {
        self.entities.push(id.into());
        self
    }

    pub fn between(mut self, start: NaiveDate, end: NaiveDate) -> Self {
        self.start = Some(start);
        self.end = Some(end);
        self
    }

    pub fn extend_by(mut self, days: usize) -> Self {
        self.extend_by_days = days;
        self
    }

    fn resolve_entities<P: DataProvider + ?Sized>(&self, provider: &P) -> Vec<EntityId> {
        if self.entities.is_empty() {
            provider.entities()
        } else {
            self.entities.clone()
        }
    }
}

fn assemble<F, P>(
    request: &DatasetRequest,
    entities: &[EntityId],
    fetch: F,
    pad: P,
) -> Result<Table<EntityId, f64>, SimError>
where
    F: Fn(&EntityId) -> Result<DatedSeries, SimError>,
    P: Fn(&[f64]) -> f64,
{
    let mut series = Vec::with_capacity(entities.len());
    for id in entities {
        let s = fetch(id)?;
        let own_end = s
            .end()
            .ok_or_else(|| SimError::InvalidInput(format!("{id}: empty series")))?;
        series.push((id.clone(), own_end, s));
    }
    let start = match request.start {
        Some(s) => s,
        None => series
            .iter()
            .map(|(_, _, s)| s.start)
            .max()
            .ok_or_else(|| SimError::InvalidInput("no entities to load".to_string()))?,
    };
    let end = match request.end {
        Some(e) => e,
        None => series
            .iter()
            .map(|(_, own_end, _)| *own_end)
            .min()
            .ok_or_else(|| SimError::InvalidInput("no entities to load".to_string()))?,
    };
    if end < start {
        return Err(SimError::InvalidInput(format!("requested range {start}..{end} is empty")));
    }
    let target = end
        .checked_add_days(Days::new(request.extend_by_days as u64))
        .ok_or_else(|| SimError::InvalidInput(format!("cannot extend past {end}")))?;

    let mut table: Option<Table<EntityId, f64>> = None;
    for (id, own_end, s) in series {
        if request.start.is_none() && s.start < start {
            warn!(
                entity = %id,
                days = start.signed_duration_since(s.start).num_days(),
                "leading days outside the shared window dropped"
            );
        }
        if request.end.is_none() && own_end > target {
            warn!(
                entity = %id,
                days = own_end.signed_duration_since(target).num_days(),
                "trailing days outside the shared window dropped"
            );
        }
        let mut own = Table::new(s.start, s.values.len());
        own.insert_column(id.clone(), s.values)?;
        // observed data reaching into the extension is kept as is
        let upto = if own_end >= end { own_end.min(target) } else { end };
        let mut window = own.slice(start, upto)?;
        let wanted = target.signed_duration_since(start).num_days() as usize + 1;
        if window.days() < wanted {
            window.extend_by_days(wanted - window.days(), &pad);
        }
        let values = window.column(&id)?.to_vec();
        let t = table.get_or_insert_with(|| Table::new(start, wanted));
        t.insert_column(id, values)?;
    }
    table.ok_or_else(|| SimError::InvalidInput("no entities to load".to_string()))
}

/// Daily doses for the requested entities on one date index.
pub fn load_dose_table<P: DataProvider + ?Sized>(
    provider: &P,
    request: &DatasetRequest,
) -> Result<Table<EntityId, f64>, SimError> {
    let entities = request.resolve_entities(provider);
    let t = assemble(
        request,
        &entities,
        |id| {
            let s = provider.doses(id)?;
            validate_doses(&id.0, &s.values)?;
            Ok(s)
        },
        |_| 0.0,
    )?;
    info!(
        entities = t.width(),
        days = t.days(),
        start = %t.start(),
        "dose table loaded"
    );
    Ok(t)
}

/// Daily deaths for the requested entities on one date index.
pub fn load_death_table<P: DataProvider + ?Sized>(
    provider: &P,
    request: &DatasetRequest,
) -> Result<Table<EntityId, f64>, SimError> {
    let entities = request.resolve_entities(provider);
    let t = assemble(
        request,
        &entities,
        |id| {
            let s = provider.deaths(id)?;
            validate_deaths(&id.0, &s.values)?;
            Ok(s)
        },
        |col| col.last().copied().unwrap_or(0.0),
    )?;
    debug!(entities = t.width(), days = t.days(), "death table loaded");
    Ok(t)
}
