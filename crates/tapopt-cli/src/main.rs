use clap::Parser;
use tapopt_cli::logging::init_logging;
use tapopt_cli::{Cli, Commands};

mod commands;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_level);

    match cli.command {
        Commands::Optimize(args) => commands::optimize::handle(&args),
        Commands::Baseline { config } => commands::baseline::handle(&config),
        Commands::CountTaps { log, regulators } => commands::count_taps::handle(&log, &regulators),
        Commands::InitConfig { out, force } => commands::init_config::handle(out.as_deref(), force),
    }
}
