pub mod cli;
pub mod config;
pub mod logging;

pub use cli::{Cli, Commands, OptimizeArgs};
pub use config::{EngineKind, RunConfig, TEMPLATE};
