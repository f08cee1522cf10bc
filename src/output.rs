use comfy_table::{presets::UTF8_FULL_CONDENSED, Cell, CellAlignment, ContentArrangement, Table};
use serde::Serialize;

use crate::batch::BatchSummary;
use crate::cost::{CostBreakdown, ResolvedScheme};
use crate::daily::DailyStats;
use crate::normalize::NormalizeReport;
use crate::search::SweepOutcome;
use crate::simulate::Simulation;
use crate::types::EvaluationRow;

fn format_tokens(n: f64) -> String {
    if n >= 1_000_000_000.0 {
        format!("{:.1}B", n / 1_000_000_000.0)
    } else if n >= 1_000_000.0 {
        format!("{:.1}M", n / 1_000_000.0)
    } else if n >= 1_000.0 {
        format!("{:.1}K", n / 1_000.0)
    } else {
        format!("{n:.0}")
    }
}

fn format_cost(cost: f64) -> String {
    if cost < 0.0 {
        format!("-${:.2}", -cost)
    } else {
        format!("${cost:.2}")
    }
}

fn format_delta(delta: f64) -> String {
    if delta >= 0.0 {
        format!("+{}", format_cost(delta))
    } else {
        format_cost(delta)
    }
}

fn format_pct(p: f64) -> String {
    format!("{p:.1}%")
}

fn column_header(col: &str) -> &str {
    match col {
        "units" => "Units",
        "capacity" => "Capacity TPM",
        "reserved" => "Reserved",
        "paygo" => "PAYGO",
        "total" => "Total",
        "delta" => "vs PAYGO",
        "delta_pct" => "vs PAYGO %",
        "utilization" => "Utilization",
        "served" => "Served",
        "spilled" => "Spilled",
        other => other,
    }
}

fn row_cell(col: &str, row: &EvaluationRow) -> Cell {
    match col {
        "units" if row.optimal => Cell::new(format!("{} *", row.units)),
        "units" => Cell::new(row.units),
        "capacity" => Cell::new(format_tokens(row.capacity_tpm)),
        "reserved" => Cell::new(format_cost(row.reserved_cost)),
        "paygo" => Cell::new(format_cost(row.paygo_cost)),
        "total" => Cell::new(format_cost(row.total_cost)),
        "delta" => Cell::new(format_delta(row.cost_delta)),
        "delta_pct" => Cell::new(format!("{:+.1}%", row.cost_delta_pct)),
        "utilization" => Cell::new(format_pct(row.utilization_pct)),
        "served" => Cell::new(format_pct(row.served_pct)),
        "spilled" => Cell::new(format_pct(row.spilled_pct)),
        _ => Cell::new(""),
    }
}

fn baseline_cell(col: &str, baseline: &CostBreakdown) -> Cell {
    match col {
        "units" => Cell::new("PAYGO"),
        "capacity" => Cell::new("0"),
        "reserved" => Cell::new(format_cost(0.0)),
        "paygo" | "total" => Cell::new(format_cost(baseline.total_cost)),
        "delta" => Cell::new(format_delta(0.0)),
        "delta_pct" => Cell::new("+0.0%"),
        "spilled" => Cell::new(format_pct(100.0)),
        "served" | "utilization" => Cell::new(format_pct(0.0)),
        _ => Cell::new(""),
    }
}

fn new_table() -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table
}

pub fn print_report(report: &NormalizeReport) {
    if report.rejected_total() == 0 {
        eprintln!("Loaded {} requests.", report.accepted);
    } else {
        eprintln!(
            "Loaded {} requests, skipped {} rows ({}).",
            report.accepted,
            report.rejected_total(),
            report.summary()
        );
    }
}

pub fn print_sweep_table(outcome: &SweepOutcome, columns: &[String]) {
    let mut table = new_table();
    table.set_header(columns.iter().map(|c| Cell::new(column_header(c))));

    table.add_row(columns.iter().map(|c| baseline_cell(c, &outcome.baseline)));
    for row in &outcome.rows {
        table.add_row(columns.iter().map(|c| row_cell(c, row)));
    }

    println!(
        "Scheme: {} (costs {}, {} observed minutes)",
        outcome.scheme,
        outcome.horizon.label(),
        outcome.period_minutes
    );
    println!("{table}");

    if let Some(best) = outcome.optimal() {
        let verdict = if best.cost_delta >= 0.0 {
            "closest at or above PAYGO"
        } else {
            "cheapest, below PAYGO"
        };
        println!(
            "* Recommended: {} units ({} TPM): {} {}, {} of tokens on reserved capacity, {}",
            best.units,
            format_tokens(best.capacity_tpm),
            format_cost(best.total_cost),
            outcome.horizon.label(),
            format_pct(best.served_pct),
            verdict
        );
    }
    println!();
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) {
    println!(
        "{}",
        serde_json::to_string_pretty(value).expect("JSON serialization failed")
    );
}

pub fn print_simulation(sim: &Simulation, scheme: &ResolvedScheme, cost: &CostBreakdown, horizon_label: &str) {
    let mut table = new_table();
    table.set_header(vec![
        "Minute (UTC)",
        "Input",
        "Output",
        "Demand",
        "Served",
        "Spilled",
        "Utilization",
    ]);

    for b in &sim.buckets {
        table.add_row(vec![
            Cell::new(b.minute.format("%Y-%m-%d %H:%M")),
            Cell::new(format_tokens(b.input_tokens as f64)),
            Cell::new(format_tokens(b.output_tokens as f64)),
            Cell::new(format_tokens(b.weighted_demand)),
            Cell::new(format_tokens(b.served_weighted)),
            Cell::new(format_tokens(b.spilled_weighted)),
            Cell::new(format_pct(b.utilization_pct)).set_alignment(CellAlignment::Right),
        ]);
    }

    let totals = sim.totals();
    println!("{table}");
    println!(
        "{} units, {} TPM, output weight {:.2}: mean utilization {}",
        sim.config.units,
        format_tokens(sim.config.capacity_tpm),
        sim.config.output_weight,
        format_pct(sim.mean_utilization_pct())
    );
    println!(
        "Served {} input / {} output tokens, spilled {} input / {} output tokens",
        format_tokens(totals.served_input),
        format_tokens(totals.served_output),
        format_tokens(totals.spilled_input),
        format_tokens(totals.spilled_output)
    );
    println!(
        "{} ({}): reserved {} + PAYGO {} = {}",
        scheme.name,
        horizon_label,
        format_cost(cost.reserved_cost),
        format_cost(cost.paygo_cost),
        format_cost(cost.total_cost)
    );
}

pub fn print_daily(stats: &[DailyStats]) {
    let with_capacity = stats.iter().any(|s| s.minutes_over_capacity.is_some());

    let mut table = new_table();
    let mut header = vec![
        "Date", "Requests", "Input", "Output", "Max TPM", "Median TPM", "Mean TPM", "Min TPM",
    ];
    if with_capacity {
        header.push("Minutes over");
    }
    table.set_header(header);

    for s in stats {
        let mut cells = vec![
            Cell::new(s.date),
            Cell::new(s.requests),
            Cell::new(format_tokens(s.input_tokens as f64)),
            Cell::new(format_tokens(s.output_tokens as f64)),
            Cell::new(format_tokens(s.max_tpm)),
            Cell::new(format_tokens(s.median_tpm)),
            Cell::new(format_tokens(s.mean_tpm)),
            Cell::new(format_tokens(s.min_tpm)),
        ];
        if let Some(over) = s.minutes_over_capacity {
            cells.push(Cell::new(format!("{over}/{}", s.minutes)));
        }
        table.add_row(cells);
    }

    println!("{table}");
}

pub fn print_batch(summary: &BatchSummary) {
    let mut table = new_table();
    table.set_header(vec![
        "Model",
        "PAYGO tier",
        "Requests",
        "Peak TPM",
        "Mean TPM",
        "Units",
        "Utilization",
        "Served",
        "PAYGO",
        "Optimal",
        "vs PAYGO %",
    ]);
    for r in &summary.rows {
        table.add_row(vec![
            Cell::new(&r.model),
            Cell::new(&r.paygo_tier),
            Cell::new(r.requests),
            Cell::new(format_tokens(r.peak_tpm)),
            Cell::new(format_tokens(r.mean_tpm)),
            Cell::new(r.units),
            Cell::new(format_pct(r.utilization_pct)),
            Cell::new(format_pct(r.served_pct)),
            Cell::new(format_cost(r.paygo_cost)),
            Cell::new(format_cost(r.optimal_cost)),
            Cell::new(format!("{:+.1}%", r.cost_delta_pct)),
        ]);
    }

    println!(
        "Scheme: {} (costs {}), one sweep per model",
        summary.scheme,
        summary.horizon.label()
    );
    println!("{table}");
    println!(
        "Total: {} units, PAYGO {}, optimal {} ({:+.1}%)",
        summary.total_units,
        format_cost(summary.total_paygo_cost),
        format_cost(summary.total_optimal_cost),
        summary.total_delta_pct()
    );
    if !summary.skipped.is_empty() {
        eprintln!(
            "Skipped {} models below the request threshold: {}",
            summary.skipped.len(),
            summary.skipped.join(", ")
        );
    }
    for (model, reason) in &summary.failed {
        eprintln!("Failed {model}: {reason}");
    }
}

pub fn print_schemes(schemes: &[ResolvedScheme]) {
    let mut table = new_table();
    table.set_header(vec![
        "Scheme",
        "List price",
        "Price",
        "Per",
        "PAYGO tier",
        "Input / 1K",
        "Output / 1K",
    ]);
    for s in schemes {
        table.add_row(vec![
            Cell::new(&s.name),
            Cell::new(format_cost(s.list_unit_price)),
            Cell::new(format_cost(s.unit_price)),
            Cell::new(s.period.label()),
            Cell::new(&s.paygo_tier),
            Cell::new(format!("${:.4}", s.paygo.input_cost_per_token * 1000.0)),
            Cell::new(format!("${:.4}", s.paygo.output_cost_per_token * 1000.0)),
        ]);
    }
    println!("{table}");
}
