#![deny(warnings)]

//! Headless CLI: run a palm oil market scenario to its horizon, either in one
//! pass or timer-driven, and print the period table and KPI summary.

mod config;

use anyhow::{bail, Context, Result};
use serde::Serialize;
use sim_core::{Cycle, Event, ParamId, Parameter, Preset, SimulationConfig, StepResult};
use sim_runtime::{RunStatus, RunSummary, Scheduler, Simulation};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

use config::ScenarioFile;

#[derive(Debug, Default)]
struct Args {
    scenario: Option<PathBuf>,
    preset: Option<Preset>,
    steps: Option<u32>,
    cycle: Option<Cycle>,
    seed: Option<u64>,
    interval_ms: Option<u64>,
    sets: Vec<(ParamId, f64)>,
    live: bool,
    json: bool,
    list_params: bool,
}

fn parse_args() -> Result<Args> {
    let mut args = Args::default();
    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        let mut value = |flag: &str| it.next().with_context(|| format!("{flag} expects a value"));
        match arg.as_str() {
            "--scenario" => args.scenario = Some(PathBuf::from(value("--scenario")?)),
            "--preset" => args.preset = Some(value("--preset")?.parse()?),
            "--steps" => args.steps = Some(value("--steps")?.parse()?),
            "--cycle" => args.cycle = Some(value("--cycle")?.parse()?),
            "--seed" => args.seed = Some(value("--seed")?.parse()?),
            "--interval-ms" => args.interval_ms = Some(value("--interval-ms")?.parse()?),
            "--set" => {
                let pair = value("--set")?;
                let Some((id, v)) = pair.split_once('=') else {
                    bail!("--set expects id=value, got {pair}");
                };
                args.sets.push((id.parse()?, v.trim().parse()?));
            }
            "--live" => args.live = true,
            "--json" => args.json = true,
            "--list-params" => args.list_params = true,
            other => bail!("unknown argument: {other}"),
        }
    }
    Ok(args)
}

/// Everything a finished run produced, for `--json`.
#[derive(Serialize)]
struct RunExport<'a> {
    config: &'a SimulationConfig,
    parameters: Vec<&'a Parameter>,
    summary: RunSummary,
    history: Vec<StepResult>,
    events: Vec<Event>,
}

fn print_params(sim: &Simulation) {
    for p in sim.params().iter() {
        let marker = if sim.params().is_selected(p.id) { "*" } else { " " };
        println!(
            "{marker} {:<22} {:>10.2} {:<10} [{} .. {}] {}",
            p.id.as_str(),
            p.current_value,
            p.unit,
            p.min,
            p.max,
            p.name
        );
    }
}

fn print_row(r: &StepResult) {
    println!(
        "{:>9} | area {:>9.0} ha | sentiment {:.2} | CPO {:>10} | FFB {:>9} | BE {:>8} | zones {}/{}/{}/{} | {}",
        r.label,
        r.total_area,
        r.avg_sentiment,
        r.cpo_price,
        r.ffb_price,
        r.adjusted_breakeven,
        r.zones.healthy,
        r.zones.at_risk,
        r.zones.abandoned,
        r.zones.recovering,
        if r.profitable { "profitable" } else { "loss" }
    );
}

fn print_summary(summary: &RunSummary, events: &[Event]) {
    for e in events {
        println!("event | {} | {} | {}", e.period, e.kind.as_str(), e.description);
    }
    let counts: Vec<String> = summary
        .events_by_kind
        .iter()
        .map(|(k, n)| format!("{}={n}", k.as_str()))
        .collect();
    println!(
        "KPI | steps: {}/{} | last: {} | area: {:.0} -> {:.0} ha ({:+.1}%) | sentiment: {:.2} | profitable: {} | events: [{}]",
        summary.steps_run,
        summary.total_steps,
        summary.last_period.as_deref().unwrap_or("-"),
        summary.initial_area,
        summary.final_area,
        summary.area_change_pct,
        summary.final_sentiment,
        summary.profitable_steps,
        counts.join(", ")
    );
}

async fn run_live(sim: Simulation) -> Result<Simulation> {
    let config = sim.config().clone();
    let poll = Duration::from_millis(config.tick_interval_ms);
    let mut scheduler = Scheduler::new(sim);
    scheduler.start(config)?;
    let mut printed = 0;
    loop {
        tokio::time::sleep(poll).await;
        let last = scheduler.with_simulation(|s| s.step_index());
        if last > printed {
            for r in scheduler.history().iter().filter(|r| r.step_index > printed) {
                print_row(r);
            }
            printed = last;
        }
        if scheduler.status() == RunStatus::Idle {
            break;
        }
    }
    Ok(scheduler.with_simulation(|s| s.clone()))
}

fn main() -> Result<()> {
    // Logging setup
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_max_level(Level::DEBUG)
        .with_writer(std::io::stderr)
        .init();

    let args = parse_args()?;
    info!(scenario = ?args.scenario, preset = ?args.preset, live = args.live, "starting CLI");

    let mut scenario = match &args.scenario {
        Some(path) => ScenarioFile::load(path)?,
        None => ScenarioFile::default(),
    };
    if args.preset.is_some() {
        scenario.preset = args.preset;
    }
    if let Some(steps) = args.steps {
        scenario.run.total_steps = steps;
    }
    if let Some(cycle) = args.cycle {
        scenario.run.cycle = cycle;
    }
    if let Some(seed) = args.seed {
        scenario.run.seed = seed;
    }
    if let Some(ms) = args.interval_ms {
        scenario.run.tick_interval_ms = ms;
    }

    let mut space = scenario.parameter_space()?;
    for &(id, value) in &args.sets {
        space.set(id, value)?;
    }
    scenario.run.validate()?;
    let constants = scenario.constants()?;
    let mut sim = Simulation::new(space, scenario.run.clone()).with_constants(constants);

    if args.list_params {
        print_params(&sim);
        return Ok(());
    }

    if args.live {
        let runtime = tokio::runtime::Runtime::new()?;
        sim = runtime.block_on(run_live(sim))?;
    } else {
        sim.run_to_completion()?;
        if !args.json {
            for r in sim.history().iter() {
                print_row(r);
            }
        }
    }

    let summary = sim.summary();
    if args.json {
        let export = RunExport {
            config: sim.config(),
            parameters: sim.params().iter().collect(),
            summary,
            history: sim.history().to_vec(),
            events: sim.events().to_vec(),
        };
        println!("{}", serde_json::to_string_pretty(&export)?);
    } else {
        print_summary(&summary, &sim.events().to_vec());
    }
    Ok(())
}
