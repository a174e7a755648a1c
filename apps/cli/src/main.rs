#![deny(warnings)]

//! Headless CLI: run the immunity simulation over a snapshot or the demo
//! dataset and print per-entity summaries.

mod demo;

use anyhow::{Context, Result};
use data_pipeline::{
    load_death_table, load_dose_table, DataProvider, DatasetRequest, InMemoryProvider,
};
use immunity_core::{validate_config, AgeGroup, EntityId, Regimen, SimConfig};
use immunity_engine::{
    cumulative, population_weighted, vaccine_share, younger_than, CounterfactualReport,
    ImmunitySimulator,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{info, warn, Level};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Default)]
struct Args {
    config: Option<PathBuf>,
    input: Option<PathBuf>,
    entities: Vec<String>,
    extend: usize,
    output: Option<PathBuf>,
}

fn parse_args() -> Result<Args> {
    let mut args = Args::default();
    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--config" => args.config = it.next().map(PathBuf::from),
            "--input" => args.input = it.next().map(PathBuf::from),
            "--entity" => args.entities.extend(it.next()),
            "--extend" => {
                let v = it.next().context("--extend needs a number of days")?;
                args.extend = v.parse().with_context(|| format!("bad --extend value {v}"))?;
            }
            "--output" => args.output = it.next().map(PathBuf::from),
            other => warn!(arg = other, "ignoring unknown argument"),
        }
    }
    Ok(args)
}

fn load_config(path: Option<&PathBuf>) -> Result<SimConfig> {
    let cfg = match path {
        Some(p) => {
            let text = std::fs::read_to_string(p)
                .with_context(|| format!("reading config {}", p.display()))?;
            serde_yaml::from_str(&text).with_context(|| format!("parsing config {}", p.display()))?
        }
        None => SimConfig::default(),
    };
    validate_config(&cfg)?;
    Ok(cfg)
}

/// Redistribution effect for an entity with age-stratified data.
#[derive(Debug, Serialize)]
struct GroupSummary {
    young_share_before: f64,
    young_share_after: f64,
    weighted_immunity_before: f64,
    weighted_immunity_after: f64,
}

#[derive(Debug, Serialize)]
struct EntitySummary {
    regimen: Regimen,
    one_dose: Vec<f64>,
    two_dose: Vec<f64>,
    counterfactual: CounterfactualReport,
    cumulative_observed: Vec<f64>,
    cumulative_counterfactual: Vec<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    groups: Option<GroupSummary>,
}

#[derive(Debug, Serialize)]
struct RunReport {
    config: SimConfig,
    start: chrono::NaiveDate,
    days: usize,
    entities: BTreeMap<EntityId, EntitySummary>,
    failures: BTreeMap<EntityId, String>,
}

fn last(series: &[f64]) -> f64 {
    series.last().copied().unwrap_or(0.0)
}

fn group_summary<P: DataProvider>(
    sim: &ImmunitySimulator,
    provider: &P,
    entity: &EntityId,
    regimen: Regimen,
) -> Result<Option<GroupSummary>> {
    let (Ok(doses), Ok(populations)) = (provider.group_doses(entity), provider.populations(entity))
    else {
        return Ok(None);
    };
    let redistributed = sim.redistribute(&doses, &populations)?;
    let weights: BTreeMap<AgeGroup, f64> = populations
        .iter()
        .map(|(g, n)| (g.clone(), *n as f64))
        .collect();
    let before = sim.subgroup_immunity(&doses, &populations, regimen)?;
    let after = sim.subgroup_immunity(&redistributed.recipients, &populations, regimen)?;
    let young = younger_than(55);
    Ok(Some(GroupSummary {
        young_share_before: last(&vaccine_share(&doses, &young)),
        young_share_after: last(&vaccine_share(&redistributed.doses, &young)),
        weighted_immunity_before: last(&population_weighted(&before, &weights)?),
        weighted_immunity_after: last(&population_weighted(&after, &weights)?),
    }))
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_max_level(Level::INFO)
        .init();

    let args = parse_args()?;
    info!(?args, "starting CLI");

    let config = load_config(args.config.as_ref())?;
    let provider = match &args.input {
        Some(p) => InMemoryProvider::load_json(p)
            .with_context(|| format!("loading snapshot {}", p.display()))?,
        None => demo::demo_provider()?,
    };

    let mut request = DatasetRequest::all();
    for e in &args.entities {
        request = request.entity(e.as_str());
    }
    // deaths are read on the window the dose series share
    let window = load_dose_table(&provider, &request)?;
    let end = window.end().context("dose table is empty")?;
    let request = request.between(window.start(), end).extend_by(args.extend);
    let doses = load_dose_table(&provider, &request)?;
    let deaths = load_death_table(&provider, &request)?;

    let sim = ImmunitySimulator::new(config.clone())?;
    let batch = sim.run_batch(&doses);

    let mut entities = BTreeMap::new();
    for (id, result) in &batch.results {
        let regimen = provider.regimen(id);
        let observed = deaths.column(id)?;
        let counterfactual = CounterfactualReport::new(result, regimen, observed)?;
        let groups = group_summary(&sim, &provider, id, regimen)?;

        println!(
            "{id} | regimen: {regimen} | immunity 1D: {:.1}% | 2D: {:.1}% | deaths: {:.0} | if {}: {:.0} ({:+.0})",
            last(&result.one_dose) * 100.0,
            last(&result.two_dose) * 100.0,
            counterfactual.observed_total(),
            regimen.other(),
            counterfactual.counterfactual_total(),
            counterfactual.difference(),
        );
        if let Some(g) = &groups {
            println!(
                "{id} | young share: {:.1}% -> {:.1}% | weighted immunity: {:.1}% -> {:.1}%",
                g.young_share_before * 100.0,
                g.young_share_after * 100.0,
                g.weighted_immunity_before * 100.0,
                g.weighted_immunity_after * 100.0,
            );
        }

        entities.insert(
            id.clone(),
            EntitySummary {
                regimen,
                one_dose: result.one_dose.clone(),
                two_dose: result.two_dose.clone(),
                cumulative_observed: cumulative(&counterfactual.observed),
                cumulative_counterfactual: cumulative(&counterfactual.counterfactual),
                counterfactual,
                groups,
            },
        );
    }
    for (id, err) in &batch.failures {
        println!("{id} | FAILED: {err}");
    }

    if let Some(path) = &args.output {
        let report = RunReport {
            config,
            start: batch.start,
            days: batch.days,
            entities,
            failures: batch
                .failures
                .iter()
                .map(|(id, e)| (id.clone(), e.to_string()))
                .collect(),
        };
        let json = serde_json::to_string_pretty(&report)?;
        std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
        info!(path = %path.display(), "report written");
    }

    Ok(())
}
