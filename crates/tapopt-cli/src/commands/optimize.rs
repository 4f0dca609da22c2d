use std::time::Instant;

use anyhow::{Context, Result};
use tapopt_algo::{ObjectiveEvaluator, PollinationEngine};
use tapopt_cli::{OptimizeArgs, RunConfig};
use tapopt_io::{RunContext, RunReport};
use tracing::{info, warn};

/// Event log of the replayed best day, next to the report files.
pub const BEST_EVENT_LOG: &str = "eventlog_best.txt";

pub fn handle(args: &OptimizeArgs) -> Result<()> {
    let mut config = RunConfig::load(&args.config)?;
    if let Some(seed) = args.seed {
        config.fpa.seed = seed;
    }
    if let Some(flowers) = args.flowers {
        config.fpa.flowers = flowers;
    }
    if let Some(iterations) = args.iterations {
        config.fpa.iterations = iterations;
    }
    if let Some(out) = &args.out {
        config.output_dir = out.clone();
    }
    config.validate()?;

    let start = Instant::now();
    let mut evaluator = ObjectiveEvaluator::new(config.build_driver()?, config.objective())?;
    let info = evaluator
        .compile(&config.model)
        .with_context(|| format!("compiling model '{}'", config.model.display()))?
        .clone();
    info!(
        engine = config.engine.as_str(),
        model = %info.name,
        pvs = info.pv_count(),
        budget = config.fpa.evaluation_budget(),
        "starting pollination search"
    );

    let outcome = PollinationEngine::new(config.fpa.clone(), &mut evaluator)?.run()?;
    let stats = evaluator.stats();
    info!(
        evaluations = stats.evaluations,
        simulations = stats.simulations,
        engine_failures = stats.engine_failures,
        degraded_runs = stats.degraded_runs,
        elapsed_s = start.elapsed().as_secs_f64(),
        "search finished"
    );

    let report = RunReport::from_outcome(&info.pv_names, &outcome, config.penalty)?.with_context(
        RunContext {
            model: info.name.clone(),
            engine: config.engine.as_str().to_string(),
            fpa: config.fpa.clone(),
            bounds: config.bounds,
            regulators: evaluator
                .filter()
                .map(|filter| filter.names().map(str::to_string).collect())
                .unwrap_or_default(),
        },
    );
    let paths = report
        .write_all(&config.output_dir)
        .with_context(|| format!("writing report to {}", config.output_dir.display()))?;

    let replay = evaluator
        .replay(&outcome.incumbent.position)
        .context("replaying the best PF vector")?;
    if let Some(warning) = replay.simulation.warning() {
        warn!(%warning, "best-vector replay degraded");
    }
    let log_path = config.output_dir.join(BEST_EVENT_LOG);
    replay
        .log
        .write(&log_path)
        .with_context(|| format!("writing {}", log_path.display()))?;

    println!("Baseline tap operations: {}", outcome.baseline_taps);
    match report.best_taps() {
        Some(taps) => println!("Best tap operations:     {taps}"),
        None => println!("Best tap operations:     none below baseline (penalty {})", config.penalty),
    }
    println!("Replayed best vector:    {} tap operations", replay.taps);
    println!("Power factors:");
    for record in report.records() {
        let marker = if record.at_bound { "  (at bound)" } else { "" };
        println!(
            "  {:<16} raw {:>9.5}  applied {:>8.5}{marker}",
            record.pv_name, record.raw_pf, record.sanitized_pf
        );
    }
    println!("Wrote {}", paths.pf_table.display());
    println!("Wrote {}", paths.trace.display());
    println!("Wrote {}", paths.summary.display());
    println!("Wrote {}", log_path.display());
    Ok(())
}
