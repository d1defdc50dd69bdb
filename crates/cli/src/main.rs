// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

mod demos;
mod target;

use clap::{Parser, Subcommand};
use regbench_core::metrics::PerformanceMetrics;
use regbench_hal::WaitPolicy;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::info;

use crate::demos::{Demo, DemoOutcome};
use crate::target::Target;

const EXIT_PASS: u8 = 0;
const EXIT_ASSERT_FAIL: u8 = 1;
const EXIT_CONFIG_ERROR: u8 = 2;
const EXIT_RUNTIME_ERROR: u8 = 3;

const REPORT_SCHEMA_VERSION: &str = "1.0";

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Register-level driver demos on a simulated STM32",
    long_about = None
)]
struct Cli {
    /// Enable debug logging of driver and peripheral activity
    #[arg(short, long, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List the available demos.
    List,
    /// Run one demo against a board and report whether it behaved.
    Run(RunArgs),
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Demo name (see `list`)
    demo: String,

    /// Builtin board name, `builtin:<name>` or path to a board manifest (YAML)
    #[arg(short, long, default_value = "bluepill")]
    board: String,

    /// Override the board's chip descriptor (YAML)
    #[arg(long)]
    chip: Option<PathBuf>,

    /// Bound on every busy-wait, in machine steps
    #[arg(long, default_value = "2000000")]
    max_steps: u64,

    /// Print a JSON report instead of a summary
    #[arg(long)]
    json: bool,

    /// Write a machine snapshot (JSON) after the run
    #[arg(long)]
    snapshot: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
struct RunReport {
    report_schema_version: &'static str,
    demo: String,
    board: String,
    chip: String,
    status: &'static str,
    detail: String,
    steps: u64,
    cycles: u64,
    dispatched: BTreeMap<u32, u64>,
    blocking_in_handler: u64,
    gate_violations: u64,
    flash_violations: u64,
    register_writes: u64,
    peripheral_cycles: u64,
    steps_per_second: f64,
    uart: BTreeMap<String, String>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Logs go to stderr so `--json` output stays parseable.
    let level = if cli.trace {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::List => {
            list_demos();
            ExitCode::from(EXIT_PASS)
        }
        Commands::Run(args) => run_demo(args),
    }
}

fn list_demos() {
    let width = demos::DEMOS.iter().map(|d| d.name.len()).max().unwrap_or(0);
    for demo in demos::DEMOS {
        println!("{:width$}  {}", demo.name, demo.summary, width = width);
    }
}

fn run_demo(args: RunArgs) -> ExitCode {
    let Some(demo) = demos::find(&args.demo) else {
        tracing::error!("Unknown demo '{}'; try `list`", args.demo);
        return ExitCode::from(EXIT_CONFIG_ERROR);
    };

    let mut target = match Target::load(&args.board, args.chip.as_deref(), demo.cycles_per_step) {
        Ok(target) => target.with_policy(WaitPolicy::Bounded(args.max_steps)),
        Err(e) => {
            tracing::error!("{:#}", e);
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };
    if let Some(missing) = demo.missing_requirement(&target) {
        tracing::error!("Demo '{}' cannot run: {}", demo.name, missing);
        return ExitCode::from(EXIT_CONFIG_ERROR);
    }

    let metrics = Arc::new(PerformanceMetrics::new());
    target.machine.add_observer(metrics.clone());

    info!("Running demo '{}' on board '{}'", demo.name, target.board.name);
    let outcome = match (demo.run)(&mut target) {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::error!("Demo '{}' failed: {:#}", demo.name, e);
            write_snapshot(&target, args.snapshot.as_ref());
            return ExitCode::from(EXIT_RUNTIME_ERROR);
        }
    };

    let report = build_report(demo, &target, &outcome, &metrics);
    if args.json {
        match serde_json::to_string_pretty(&report) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                tracing::error!("Failed to serialize report: {}", e);
                return ExitCode::from(EXIT_RUNTIME_ERROR);
            }
        }
    } else {
        print_summary(&report);
    }
    write_snapshot(&target, args.snapshot.as_ref());

    if outcome.passed {
        ExitCode::from(EXIT_PASS)
    } else {
        ExitCode::from(EXIT_ASSERT_FAIL)
    }
}

fn build_report(
    demo: &Demo,
    target: &Target,
    outcome: &DemoOutcome,
    metrics: &PerformanceMetrics,
) -> RunReport {
    let machine = &target.machine;
    let stats = machine.stats();
    RunReport {
        report_schema_version: REPORT_SCHEMA_VERSION,
        demo: demo.name.to_string(),
        board: target.board.name.clone(),
        chip: target.chip.name.clone(),
        status: if outcome.passed { "pass" } else { "fail" },
        detail: outcome.detail.clone(),
        steps: machine.steps(),
        cycles: machine.total_cycles(),
        dispatched: stats.dispatched.clone(),
        blocking_in_handler: stats.blocking_in_handler,
        gate_violations: machine.bus.gate_violations(),
        flash_violations: machine.bus.clocks.flash_violations(),
        register_writes: metrics.get_register_writes(),
        peripheral_cycles: metrics.get_peripheral_cycles_total(),
        steps_per_second: metrics.get_steps_per_second(),
        uart: target
            .serial_output()
            .into_iter()
            .map(|(id, bytes)| (id, String::from_utf8_lossy(&bytes).into_owned()))
            .collect(),
    }
}

fn print_summary(report: &RunReport) {
    println!(
        "{} {} on {} ({}): {}",
        report.status.to_uppercase(),
        report.demo,
        report.board,
        report.chip,
        report.detail
    );
    println!(
        "  {} steps ({:.0}/s), {} cycles, {} register writes",
        report.steps, report.steps_per_second, report.cycles, report.register_writes
    );
    for (vector, count) in &report.dispatched {
        println!("  vector {:>3}: {} dispatches", vector, count);
    }
    if report.gate_violations > 0 {
        println!("  {} accesses to clock-gated blocks", report.gate_violations);
    }
    if report.flash_violations > 0 {
        println!("  {} clock switches with too few flash wait states", report.flash_violations);
    }
    if report.blocking_in_handler > 0 {
        println!("  {} busy-waits inside interrupt handlers", report.blocking_in_handler);
    }
    for (id, text) in &report.uart {
        println!("  {} tx: {:?}", id, text);
    }
}

fn write_snapshot(target: &Target, path: Option<&PathBuf>) {
    let Some(path) = path else {
        return;
    };
    let json = match target.machine.snapshot().to_json_pretty() {
        Ok(json) => json,
        Err(e) => {
            tracing::error!("Failed to serialize snapshot: {}", e);
            return;
        }
    };
    match std::fs::write(path, json) {
        Ok(()) => info!("Snapshot written to {:?}", path),
        Err(e) => tracing::error!("Failed to write snapshot {:?}: {}", path, e),
    }
}
