mod batch;
mod cli;
mod config;
mod cost;
mod daily;
mod error;
mod graph;
mod input;
mod normalize;
mod output;
mod pricing;
mod search;
mod simulate;
mod storage;
mod types;

use std::io::Write;

use anyhow::{bail, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cli::{Cli, Command, OutputFormat};
use config::Settings;
use cost::ResolvedScheme;
use search::{SweepParams, SweepRange};
use types::{CapacityConfig, MinuteDemand, Request};

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .init();
}

fn load_requests(cli: &Cli) -> Result<Vec<Request>> {
    if cli.inputs.is_empty() {
        bail!("no input given; pass --input <CSV file or directory>");
    }
    let files = input::discover_inputs(&cli.inputs)?;
    info!(files = files.len(), "discovered inputs");

    let mut store = storage::default_storage(!cli.no_cache);

    let show_progress = !cli.cli;
    let progress_cb = |current: usize, total: usize| {
        eprint!("\x1b[2K\rReading inputs... {current}/{total}");
        let _ = std::io::stderr().flush();
    };
    let loaded = input::load_inputs(
        &files,
        store.as_mut(),
        if show_progress {
            Some(&progress_cb)
        } else {
            None
        },
    )?;
    if show_progress {
        eprint!("\x1b[2K\r");
        let _ = std::io::stderr().flush();
    }
    store.flush();

    output::print_report(&loaded.report);
    Ok(loaded.requests)
}

fn load_demand(cli: &Cli) -> Result<Vec<MinuteDemand>> {
    let demand = simulate::bucket_requests(&load_requests(cli)?)?;
    info!(
        minutes = demand.len(),
        first = %demand[0].minute,
        last = %demand[demand.len() - 1].minute,
        "bucketed requests"
    );
    Ok(demand)
}

/// Resolve every selected scheme; a broken scheme is reported and skipped.
fn resolve_schemes(settings: &Settings, cli: &Cli) -> Result<Vec<ResolvedScheme>> {
    let tiers = pricing::paygo_tiers(&settings.paygo, cli.model.as_deref(), cli.offline)?;

    let (resolved, failed) = cost::resolve_schemes(
        &settings.schemes,
        &tiers,
        &settings.paygo_tier,
        settings.discount_pct,
    );
    for e in &failed {
        error!("{e}");
    }
    if resolved.is_empty() {
        bail!("no usable pricing scheme");
    }
    Ok(resolved)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let mode = cli.effective_command();

    let config = config::load_config(cli.config.as_deref())?;
    let settings = Settings::resolve(config, &cli.overrides())?;
    let schemes = resolve_schemes(&settings, &cli)?;
    let primary = &schemes[0];

    match mode {
        Command::Schemes => match cli.format {
            OutputFormat::Json => output::print_json(&schemes),
            OutputFormat::Table => output::print_schemes(&schemes),
        },
        Command::Sweep => {
            let demand = load_demand(&cli)?;
            let range = SweepRange {
                min_units: settings.min_units,
                max_units: settings.max_units,
                step: settings.step,
            };

            let mut outcomes = Vec::new();
            for scheme in &schemes {
                let params = SweepParams {
                    range,
                    unit_tpm: settings.unit_tpm,
                    output_weight: settings.output_weight_for(&scheme.paygo),
                    horizon: settings.horizon,
                };
                match search::sweep(&demand, scheme, &params) {
                    Ok(outcome) => outcomes.push(outcome),
                    Err(e) => error!(scheme = %scheme.name, "{e}"),
                }
            }
            if outcomes.is_empty() {
                bail!("every scheme failed to evaluate");
            }

            match cli.format {
                OutputFormat::Json => output::print_json(&outcomes),
                OutputFormat::Table => {
                    let columns = cli::resolve_columns(cli.columns.clone());
                    for outcome in &outcomes {
                        output::print_sweep_table(outcome, &columns);
                    }
                }
            }
        }
        Command::Simulate { units } => {
            let demand = load_demand(&cli)?;
            let weight = settings.output_weight_for(&primary.paygo);
            let capacity = CapacityConfig::new(units, settings.unit_tpm, weight);
            let sim = simulate::simulate_demand(&demand, capacity)?;
            let factor = settings.horizon.factor(sim.period_minutes() as f64);
            let cost = cost::price(&sim.buckets, primary, &capacity).scaled(factor);

            match cli.format {
                OutputFormat::Json => output::print_json(&serde_json::json!({
                    "scheme": primary.name,
                    "horizon": settings.horizon,
                    "config": capacity,
                    "mean_utilization_pct": sim.mean_utilization_pct(),
                    "totals": sim.totals(),
                    "cost": cost,
                    "buckets": sim.buckets,
                })),
                OutputFormat::Table => {
                    output::print_simulation(&sim, primary, &cost, settings.horizon.label())
                }
            }
        }
        Command::Daily { units } => {
            let demand = load_demand(&cli)?;
            let weight = settings.output_weight_for(&primary.paygo);
            let capacity = units.map(|u| CapacityConfig::new(u, settings.unit_tpm, weight).capacity_tpm);
            let stats = daily::daily_stats(&demand, weight, capacity);

            match cli.format {
                OutputFormat::Json => output::print_json(&stats),
                OutputFormat::Table => output::print_daily(&stats),
            }
        }
        Command::Batch { min_requests } => {
            let requests = load_requests(&cli)?;
            let groups = batch::group_by_model(&requests)?;
            info!(models = groups.len(), "grouped requests by model");

            let models: Vec<String> = groups.iter().map(|g| g.model.clone()).collect();
            let tiers = pricing::model_tiers(&settings.paygo, &models, cli.offline);
            let Some(scheme) = settings.schemes.iter().find(|s| s.name == primary.name) else {
                bail!("scheme '{}' is not configured", primary.name);
            };

            let summary = batch::run_batch(&groups, scheme, &tiers, &settings, min_requests);
            if summary.rows.is_empty() {
                bail!("no model could be evaluated");
            }
            match cli.format {
                OutputFormat::Json => output::print_json(&summary),
                OutputFormat::Table => output::print_batch(&summary),
            }
        }
        Command::Plot { units } => {
            let demand = load_demand(&cli)?;
            let weight = settings.output_weight_for(&primary.paygo);
            let capacity = CapacityConfig::new(units, settings.unit_tpm, weight);
            let sim = simulate::simulate_demand(&demand, capacity)?;
            graph::render(&sim.buckets, capacity.capacity_tpm)?;
        }
    }

    Ok(())
}
