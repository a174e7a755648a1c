#![deny(warnings)]

//! Core data model and invariants for the immunity simulation.
//!
//! This crate defines the serializable types shared by the dosing and
//! simulation crates: identifiers, date-indexed tables, configuration and the
//! error taxonomy, together with validation helpers that guard basic
//! invariants before any simulation runs.

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

mod config;
mod table;

pub use config::{
    validate_config, validate_control_points, ControlPoint, CurveConfig, OverflowRounding,
    RedistributionConfig, SimConfig, DEFAULT_DAYS_BETWEEN_SHOTS, PER_MILLION,
};
pub use table::Table;

/// Identifier of an independently tracked population unit (country, region).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityId(pub String);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        EntityId(s.to_string())
    }
}

/// Age bracket label, e.g. "25-34" or "85-99".
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AgeGroup(pub String);

impl fmt::Display for AgeGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AgeGroup {
    fn from(s: &str) -> Self {
        AgeGroup(s.to_string())
    }
}

/// Which shot of a two-shot course a dose is.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DoseNumber {
    /// First shot ("1D").
    #[serde(rename = "1D")]
    First,
    /// Second shot ("2D").
    #[serde(rename = "2D")]
    Second,
}

impl fmt::Display for DoseNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DoseNumber::First => f.write_str("1D"),
            DoseNumber::Second => f.write_str("2D"),
        }
    }
}

impl FromStr for DoseNumber {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "1D" => Ok(DoseNumber::First),
            "2D" => Ok(DoseNumber::Second),
            other => Err(SimError::InvalidInput(format!("unknown dose number {other:?}"))),
        }
    }
}

/// A (dose number, age group) pair: one column of a stratified dose table and
/// one entry of a redistribution priority list.
///
/// Rendered as `"<dose>/<group>"`, e.g. `"2D/75-84"`, so that it can be used
/// as a map key in JSON and YAML documents.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GroupKey {
    pub dose: DoseNumber,
    pub group: AgeGroup,
}

impl GroupKey {
    pub fn new(dose: DoseNumber, group: impl Into<AgeGroup>) -> Self {
        Self {
            dose,
            group: group.into(),
        }
    }

    pub fn first(group: &str) -> Self {
        Self::new(DoseNumber::First, group)
    }

    pub fn second(group: &str) -> Self {
        Self::new(DoseNumber::Second, group)
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.dose, self.group)
    }
}

impl FromStr for GroupKey {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (dose, group) = s
            .split_once('/')
            .ok_or_else(|| SimError::InvalidInput(format!("malformed group key {s:?}")))?;
        let group = group.trim();
        if group.is_empty() {
            return Err(SimError::InvalidInput(format!("empty age group in {s:?}")));
        }
        Ok(GroupKey::new(dose.parse()?, group))
    }
}

impl Serialize for GroupKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for GroupKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// Dosing track an immunity estimate is computed for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Regimen {
    /// Every recipient only ever receives a single (final) shot.
    OneDose,
    /// Full course of two shots, spaced by the configured interval.
    TwoDose,
}

impl Regimen {
    /// The regimen not in use, i.e. the counterfactual policy.
    pub fn other(self) -> Self {
        match self {
            Regimen::OneDose => Regimen::TwoDose,
            Regimen::TwoDose => Regimen::OneDose,
        }
    }
}

impl fmt::Display for Regimen {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Regimen::OneDose => f.write_str("one_dose"),
            Regimen::TwoDose => f.write_str("two_dose"),
        }
    }
}

/// Errors produced anywhere in the simulation pipeline.
///
/// Every variant is fatal for the entity it occurred in; nothing here is a
/// transient condition worth retrying.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SimError {
    /// Malformed efficacy control points.
    #[error("invalid efficacy curve: {0}")]
    InvalidCurve(String),
    /// A dose-accounting step lost or created doses.
    #[error("dose conservation violated on day {day}: expected {expected}, accounted {actual}")]
    ConservationViolation {
        day: usize,
        expected: f64,
        actual: f64,
    },
    /// Doses remained after every priority pair was satisfied.
    #[error("priority list exhausted on day {day} with {residual} doses left to assign")]
    PriorityExhausted { day: usize, residual: u64 },
    /// An input table lacks a requested entity or column.
    #[error("entity not found: {0}")]
    MissingEntity(String),
    /// An input does not cover the requested date range.
    #[error(
        "requested range {requested_start}..={requested_end} is not covered by \
         {available_start}..={available_end}"
    )]
    MisalignedRange {
        requested_start: chrono::NaiveDate,
        requested_end: chrono::NaiveDate,
        available_start: chrono::NaiveDate,
        available_end: chrono::NaiveDate,
    },
    /// Two series that must share a date index have different lengths.
    #[error("series length mismatch: expected {expected} days, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },
    /// Input values outside their domain (negative or non-finite counts).
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Configuration values outside their domain.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Validate a daily dose series: every value finite and non-negative.
pub fn validate_doses(label: &str, values: &[f64]) -> Result<(), SimError> {
    for (day, v) in values.iter().enumerate() {
        if !v.is_finite() {
            return Err(SimError::InvalidInput(format!(
                "{label}: non-finite dose count on day {day}"
            )));
        }
        if *v < 0.0 {
            return Err(SimError::InvalidInput(format!(
                "{label}: negative dose count {v} on day {day}"
            )));
        }
    }
    Ok(())
}

/// Validate a daily death series: finite and non-negative, like doses.
pub fn validate_deaths(label: &str, values: &[f64]) -> Result<(), SimError> {
    if let Some((day, v)) = values
        .iter()
        .enumerate()
        .find(|(_, v)| !v.is_finite() || **v < 0.0)
    {
        return Err(SimError::InvalidInput(format!(
            "{label}: invalid death count {v} on day {day}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn group_key_display_and_parse() {
        let k = GroupKey::second("75-84");
        assert_eq!(k.to_string(), "2D/75-84");
        assert_eq!("2D/75-84".parse::<GroupKey>().unwrap(), k);
        assert_eq!("1D/85-99".parse::<GroupKey>().unwrap(), GroupKey::first("85-99"));
        assert!("3D/25-34".parse::<GroupKey>().is_err());
        assert!("2D".parse::<GroupKey>().is_err());
        assert!("2D/".parse::<GroupKey>().is_err());
    }

    #[test]
    fn group_key_is_a_json_map_key() {
        let mut m = std::collections::BTreeMap::new();
        m.insert(GroupKey::first("25-34"), 3u64);
        m.insert(GroupKey::second("25-34"), 4u64);
        let s = serde_json::to_string(&m).unwrap();
        assert_eq!(s, r#"{"1D/25-34":3,"2D/25-34":4}"#);
        let back: std::collections::BTreeMap<GroupKey, u64> = serde_json::from_str(&s).unwrap();
        assert_eq!(back, m);
    }

    #[test]
    fn first_doses_order_before_second_doses() {
        assert!(GroupKey::first("85-99") < GroupKey::second("25-34"));
    }

    #[test]
    fn regimen_other_flips() {
        assert_eq!(Regimen::OneDose.other(), Regimen::TwoDose);
        assert_eq!(Regimen::TwoDose.other(), Regimen::OneDose);
    }

    #[test]
    fn dose_validation_rejects_negative_and_nan() {
        assert!(validate_doses("x", &[0.0, 1.5, 10.0]).is_ok());
        assert!(matches!(
            validate_doses("x", &[0.0, -1.0]),
            Err(SimError::InvalidInput(_))
        ));
        assert!(validate_doses("x", &[f64::NAN]).is_err());
        assert!(validate_deaths("x", &[f64::INFINITY]).is_err());
    }

    proptest! {
        #[test]
        fn group_key_roundtrips_through_text(group in "[0-9]{1,2}-[0-9]{1,2}", second in any::<bool>()) {
            let dose = if second { DoseNumber::Second } else { DoseNumber::First };
            let k = GroupKey::new(dose, group.as_str());
            prop_assert_eq!(k.to_string().parse::<GroupKey>().unwrap(), k);
        }
    }
}
