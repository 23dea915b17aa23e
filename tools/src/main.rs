//! attribution-runner: headless Markov attribution run.
//!
//! Usage:
//!   attribution-runner --db events.db --policy both --out ./out
//!   attribution-runner --events touches.jsonl --import --db events.db
//!     (--import replaces whatever events the database already holds)
//!   attribution-runner --synthetic 20000 --seed 7 --conversions 1500

use anyhow::{Context, Result};
use markov_attribution_core::{
    config::AttributionConfig,
    engine::{AttributionEngine, AttributionReport},
    event::TouchEvent,
    removal::RemovalPolicy,
    source::{
        ConversionTotal, DistinctConverters, EventSource, FixedConversionTotal,
        JsonLinesEventSource, MemoryEventSource,
    },
    store::EventStore,
    synth::{demo_matrix, JourneySimulator},
};
use std::env;
use std::path::Path;

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let seed = parse_arg(&args, "--seed", 42u64);
    let synthetic = parse_arg(&args, "--synthetic", 0usize);
    let conversions: Option<u64> = flag_value(&args, "--conversions")
        .map(|v| v.parse::<u64>().with_context(|| format!("--conversions expects an integer, got {v}")))
        .transpose()?;
    let import = args.iter().any(|a| a == "--import");
    let db = flag_value(&args, "--db");
    let events = flag_value(&args, "--events");
    let out = flag_value(&args, "--out");
    let data_dir = flag_value(&args, "--data-dir").unwrap_or("./data");
    let policy_arg = flag_value(&args, "--policy");

    let config = AttributionConfig::load(data_dir)?;
    let policies = match policy_arg {
        None => vec![config.removal_policy],
        Some("both") => RemovalPolicy::ALL.to_vec(),
        Some(p) => vec![p.parse::<RemovalPolicy>()?],
    };

    println!("Markov attribution — attribution-runner");
    println!("  data_dir:  {data_dir}");
    println!("  policies:  {}", join_policies(&policies));
    println!();

    let reports = if synthetic > 0 {
        println!("  input:     synthetic customers={synthetic} seed={seed}");
        let simulator = JourneySimulator::new(demo_matrix()?)?.with_repeat_probability(0.1)?;
        let source = MemoryEventSource::new(simulator.generate(synthetic, seed));
        match conversions {
            Some(n) => run(config, &source, FixedConversionTotal(n), &policies)?,
            None => run(config, &source, DistinctConverters(&source), &policies)?,
        }
    } else if let (Some(events), Some(db), true) = (events, db, import) {
        let store = EventStore::open(db)?;
        store.migrate()?;
        let incoming = read_events(events)?;
        let replaced = store.clear_events()?;
        if replaced > 0 {
            log::info!("runner: replacing {replaced} stored events in {db}");
        }
        let inserted = store.insert_events(&incoming)?;
        println!("  input:     imported {inserted} events from {events} into {db} (replaced {replaced})");
        run_store(config, &store, conversions, &policies)?
    } else if let Some(events) = events {
        println!("  input:     {events}");
        let source = JsonLinesEventSource::new(events);
        match conversions {
            Some(n) => run(config, &source, FixedConversionTotal(n), &policies)?,
            None => run(config, &source, DistinctConverters(&source), &policies)?,
        }
    } else if let Some(db) = db {
        println!("  input:     {db}");
        let store = EventStore::open(db)?;
        store.migrate()?;
        run_store(config, &store, conversions, &policies)?
    } else {
        anyhow::bail!("no input: pass --db, --events or --synthetic N");
    };

    if let Some(out) = out {
        write_reports(Path::new(out), &reports)?;
    }
    print_summary(&reports);
    Ok(())
}

fn run<S: EventSource, C: ConversionTotal>(
    config: AttributionConfig,
    source: S,
    conversions: C,
    policies: &[RemovalPolicy],
) -> Result<Vec<AttributionReport>> {
    let engine = AttributionEngine::new(config, source, conversions);
    Ok(engine.run_policies(policies)?)
}

fn run_store(
    config: AttributionConfig,
    store: &EventStore,
    conversions: Option<u64>,
    policies: &[RemovalPolicy],
) -> Result<Vec<AttributionReport>> {
    match conversions {
        Some(n) => run(config, store, FixedConversionTotal(n), policies),
        None => run(config, store, store, policies),
    }
}

fn read_events(path: &str) -> Result<Vec<TouchEvent>> {
    let source = JsonLinesEventSource::new(path);
    let events = source
        .events()?
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("Cannot read events from {path}"))?;
    Ok(events)
}

fn write_reports(dir: &Path, reports: &[AttributionReport]) -> Result<()> {
    std::fs::create_dir_all(dir)
        .map_err(|e| anyhow::anyhow!("Cannot create {}: {e}", dir.display()))?;

    if let Some(first) = reports.first() {
        let path = dir.join("transition_matrix.json");
        std::fs::write(&path, serde_json::to_string_pretty(&first.matrix)?)
            .map_err(|e| anyhow::anyhow!("Cannot write {}: {e}", path.display()))?;
        log::info!("runner: wrote {}", path.display());
    }
    for report in reports {
        let path = dir.join(format!("attribution_{}.json", report.attribution.policy));
        std::fs::write(&path, serde_json::to_string_pretty(report)?)
            .map_err(|e| anyhow::anyhow!("Cannot write {}: {e}", path.display()))?;
        log::info!("runner: wrote {}", path.display());
    }
    Ok(())
}

fn print_summary(reports: &[AttributionReport]) {
    let Some(first) = reports.first() else {
        return;
    };

    println!();
    println!("=== MODEL ===");
    println!("  events:            {}", first.events);
    println!("  customers:         {}", first.customers);
    println!("  states:            {}", first.matrix.len());
    println!("  base conv. rate:   {:.4}", first.base_conversion_rate);
    if let Some(steps) = first.expected_touches {
        println!("  expected touches:  {steps:.2}");
    }

    for report in reports {
        let table = &report.attribution;
        println!();
        println!(
            "=== ATTRIBUTION ({}) — {} observed conversions ===",
            table.policy, table.total_observed_conversions
        );
        for r in &table.records {
            match (r.removal_effect, r.proportion, r.conversions_attributed) {
                (Some(effect), Some(share), Some(conv)) => println!(
                    "  {:<20} effect {effect:+.4} | share {:>6.1}% | conv {conv:>9.1}",
                    r.channel,
                    share * 100.0
                ),
                _ => println!(
                    "  {:<20} undefined ({})",
                    r.channel,
                    r.failure.as_deref().unwrap_or("no result")
                ),
            }
        }

        if let Some(econ) = &report.economics {
            println!("  -- economics --");
            for row in &econ.channels {
                let cpc = row
                    .cost_per_conversion
                    .map(|v| format!("{v:.2}"))
                    .unwrap_or_else(|| "n/a".into());
                let roi = row
                    .roi
                    .map(|v| format!("{:.1}%", v * 100.0))
                    .unwrap_or_else(|| "n/a".into());
                println!(
                    "  {:<20} cost ${:.0} | revenue ${:.0} | CPA {cpc} | ROI {roi}",
                    row.channel, row.cost, row.revenue
                );
            }
            for s in &econ.scenarios {
                println!(
                    "  scenario {:<20} cost ${:.0} | conv {:.1} | net ${:.0}",
                    s.name, s.total_cost, s.total_conversions, s.net_return
                );
            }
        }
    }

    if !first.top_paths.is_empty() {
        println!();
        println!("=== TOP PATHS ===");
        for p in &first.top_paths {
            println!("  {:>7}  {}", p.count, p.path);
        }
    }
}

fn join_policies(policies: &[RemovalPolicy]) -> String {
    policies
        .iter()
        .map(RemovalPolicy::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2)
        .find(|w| w[0] == flag)
        .map(|w| w[1].as_str())
}

fn parse_arg<T: std::str::FromStr + Copy>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}
