use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "tapopt", author, version, about, long_about = None)]
pub struct Cli {
    /// Log level used when neither TAPOPT_LOG nor RUST_LOG is set
    #[arg(long, default_value = "info", global = true)]
    pub log_level: tracing::Level,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Search PV power factors that minimise regulator tap operations
    Optimize(OptimizeArgs),
    /// Tap operations per regulator with every PV at unity power factor
    Baseline {
        /// Run configuration (TOML, YAML or JSON)
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Count tap-change events in an exported event log
    CountTaps {
        /// Event log file
        log: PathBuf,
        /// Regulator to count (repeatable, case-insensitive)
        #[arg(short, long = "regulator", required = true)]
        regulators: Vec<String>,
    },
    /// Write a commented run configuration template
    InitConfig {
        /// Destination file; prints to stdout when omitted
        #[arg(short, long)]
        out: Option<PathBuf>,
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Args, Debug, Clone, Default)]
pub struct OptimizeArgs {
    /// Run configuration (TOML, YAML or JSON)
    #[arg(short, long)]
    pub config: PathBuf,
    /// Override the random seed
    #[arg(long)]
    pub seed: Option<u64>,
    /// Override the population size
    #[arg(long)]
    pub flowers: Option<usize>,
    /// Override the iteration budget
    #[arg(long)]
    pub iterations: Option<usize>,
    /// Override the output directory
    #[arg(short, long)]
    pub out: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_optimize_overrides() {
        let cli = Cli::try_parse_from([
            "tapopt",
            "--log-level",
            "debug",
            "optimize",
            "--config",
            "run.toml",
            "--seed",
            "9",
            "--iterations",
            "4",
        ])
        .unwrap();
        assert_eq!(cli.log_level, tracing::Level::DEBUG);
        let Commands::Optimize(args) = cli.command else {
            panic!("expected optimize");
        };
        assert_eq!(args.seed, Some(9));
        assert_eq!(args.iterations, Some(4));
        assert_eq!(args.flowers, None);
    }

    #[test]
    fn count_taps_needs_a_regulator() {
        assert!(Cli::try_parse_from(["tapopt", "count-taps", "log.csv"]).is_err());
    }
}
