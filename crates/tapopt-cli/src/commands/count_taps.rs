use std::path::Path;

use anyhow::{Context, Result};
use tapopt_sim::{EventLog, RegulatorFilter};

pub fn handle(log: &Path, regulators: &[String]) -> Result<()> {
    let filter = RegulatorFilter::new(regulators)?;
    let log = EventLog::read(log).with_context(|| format!("counting taps in '{}'", log.display()))?;
    let tally = log.tally(&filter);
    for (regulator, count) in &tally {
        println!("{regulator}: {count}");
    }
    println!("total: {}", tally.values().sum::<u32>());
    Ok(())
}
