use std::path::Path;

use anyhow::{Context, Result};
use tapopt_algo::ObjectiveEvaluator;
use tapopt_cli::RunConfig;
use tapopt_core::PfVector;
use tracing::{info, warn};

pub fn handle(config_path: &Path) -> Result<()> {
    let config = RunConfig::load(config_path)?;
    config.validate()?;

    let mut evaluator = ObjectiveEvaluator::new(config.build_driver()?, config.objective())?;
    let pv_count = evaluator
        .compile(&config.model)
        .with_context(|| format!("compiling model '{}'", config.model.display()))?
        .pv_count();
    info!(engine = config.engine.as_str(), pv_count, "running unity-PF day");

    let replay = evaluator.replay(&PfVector::unity(pv_count))?;
    if let Some(warning) = replay.simulation.warning() {
        warn!(%warning, "baseline run degraded");
    }
    let filter = evaluator
        .filter()
        .context("regulator filter missing after compile")?;
    for (regulator, count) in replay.log.tally(filter) {
        println!("{regulator}: {count}");
    }
    println!("baseline: {}", replay.taps);
    Ok(())
}
