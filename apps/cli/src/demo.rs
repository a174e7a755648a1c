//! Built-in demo dataset used when no snapshot is given.

use anyhow::Result;
use chrono::NaiveDate;
use data_pipeline::InMemoryProvider;
use immunity_core::{AgeGroup, Regimen};
use immunity_dosing::SubGroup;
use immunity_engine::stratify_entity;

const DAYS: usize = 150;

/// Age brackets of the demo entity with their population, oldest first.
const AUSTRIA_GROUPS: [(&str, u64); 7] = [
    ("85-99", 220_000),
    ("75-84", 620_000),
    ("65-74", 860_000),
    ("55-64", 1_300_000),
    ("45-54", 1_400_000),
    ("35-44", 1_200_000),
    ("25-34", 1_200_000),
];

fn ramp(base: f64, slope: f64, cap: f64) -> Vec<f64> {
    (0..DAYS).map(|d| (base + slope * d as f64).min(cap)).collect()
}

fn wave(peak: f64, center: f64, width: f64) -> Vec<f64> {
    (0..DAYS)
        .map(|d| {
            let x = (d as f64 - center) / width;
            peak * (-x * x).exp()
        })
        .collect()
}

/// Three entities on a shared calendar, one of which also carries
/// age-stratified doses for redistribution.
pub fn demo_provider() -> Result<InMemoryProvider> {
    let start = NaiveDate::from_ymd_opt(2021, 1, 1)
        .ok_or_else(|| anyhow::anyhow!("invalid demo start date"))?;

    // whole-number doses for the stratified entity, ~9M inhabitants
    let absolute: Vec<u64> = (0..DAYS)
        .map(|d| (5_000 + 400 * d as u64).min(60_000))
        .collect();
    let groups: Vec<SubGroup> = AUSTRIA_GROUPS
        .iter()
        .map(|(g, n)| SubGroup::new(*g, *n))
        .collect();
    let stratified = stratify_entity(start, &absolute, &groups, 21)?;
    let per_million: Vec<f64> = absolute.iter().map(|v| *v as f64 / 8.9).collect();

    let mut p = InMemoryProvider::new()
        .with_doses("Austria", start, per_million)
        .with_deaths("Austria", start, wave(60.0, 20.0, 25.0))
        .with_group_doses("Austria", stratified.doses)
        .with_regimen("Austria", Regimen::TwoDose)
        .with_doses("United Kingdom", start, ramp(4_000.0, 60.0, 9_000.0))
        .with_deaths("United Kingdom", start, wave(1_200.0, 15.0, 20.0))
        .with_regimen("United Kingdom", Regimen::OneDose)
        .with_doses("United States", start, ramp(2_500.0, 40.0, 8_000.0))
        .with_deaths("United States", start, wave(3_300.0, 12.0, 30.0))
        .with_regimen("United States", Regimen::TwoDose);
    for (group, people) in AUSTRIA_GROUPS {
        p = p.with_population("Austria", AgeGroup::from(group), people);
    }
    Ok(p)
}
