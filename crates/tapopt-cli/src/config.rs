//! Run configuration, loaded from TOML, YAML or JSON by file extension.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tapopt_algo::{FpaConfig, ObjectiveConfig, DEFAULT_MAX_ENGINE_FAILURES, DEFAULT_PENALTY};
use tapopt_core::PfBounds;
use tapopt_sim::{OpenDssDriver, OpenDssOptions, SimulationDriver, SyntheticFeeder};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// Built-in quasi-static feeder (YAML model).
    #[default]
    Synthetic,
    /// OpenDSS command-line engine (DSS model).
    OpenDss,
}

impl EngineKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineKind::Synthetic => "synthetic",
            EngineKind::OpenDss => "opendss",
        }
    }
}

fn default_penalty() -> f64 {
    DEFAULT_PENALTY
}

fn default_max_engine_failures() -> u32 {
    DEFAULT_MAX_ENGINE_FAILURES
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("tapopt-out")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    /// Network model; relative paths are taken from the config file's directory.
    pub model: PathBuf,
    #[serde(default)]
    pub engine: EngineKind,
    #[serde(default)]
    pub opendss: OpenDssOptions,
    #[serde(default)]
    pub fpa: FpaConfig,
    #[serde(default)]
    pub bounds: PfBounds,
    /// Regulators whose taps are counted; empty means all of them.
    #[serde(default)]
    pub regulators: Vec<String>,
    #[serde(default = "default_penalty")]
    pub penalty: f64,
    #[serde(default = "default_max_engine_failures")]
    pub max_engine_failures: u32,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

impl RunConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)
            .with_context(|| format!("reading run config '{}'", path.display()))?;
        let mut config = Self::parse(&data, path.extension().and_then(|ext| ext.to_str()))
            .with_context(|| format!("parsing run config '{}'", path.display()))?;
        if config.model.is_relative() {
            if let Some(dir) = path.parent() {
                config.model = dir.join(&config.model);
            }
        }
        Ok(config)
    }

    pub fn parse(data: &str, extension: Option<&str>) -> Result<Self> {
        match extension {
            Some(ext) if ext.eq_ignore_ascii_case("toml") => {
                toml::from_str(data).context("parsing toml")
            }
            Some(ext) if ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml") => {
                serde_yaml::from_str(data).context("parsing yaml")
            }
            Some(ext) if ext.eq_ignore_ascii_case("json") => {
                serde_json::from_str(data).context("parsing json")
            }
            _ => toml::from_str(data)
                .or_else(|_| serde_yaml::from_str(data))
                .context("parsing run config as toml or yaml"),
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.fpa.validate()?;
        self.objective().validate()?;
        Ok(())
    }

    pub fn objective(&self) -> ObjectiveConfig {
        ObjectiveConfig {
            bounds: self.bounds,
            regulators: self.regulators.clone(),
            penalty: self.penalty,
            max_engine_failures: self.max_engine_failures,
        }
    }

    pub fn build_driver(&self) -> Result<Box<dyn SimulationDriver>> {
        Ok(match self.engine {
            EngineKind::Synthetic => Box::new(SyntheticFeeder::new()),
            EngineKind::OpenDss => Box::new(
                OpenDssDriver::new(self.opendss.clone()).context("preparing OpenDSS driver")?,
            ),
        })
    }
}

/// Written by `tapopt init-config`.
pub const TEMPLATE: &str = r#"# tapopt run configuration

# Network model. A YAML feeder for the synthetic engine, or the master DSS
# file for OpenDSS. Relative paths start at this file's directory.
model = "feeder.yaml"

# "synthetic" or "opendss"
engine = "synthetic"

# Regulators whose tap operations are counted. Empty counts all of them.
regulators = ["Reg1"]

# Fitness of any candidate with more taps than the unity-PF baseline.
penalty = 1e9

# Consecutive engine failures that abort the run; earlier ones are penalised.
max_engine_failures = 3

output_dir = "tapopt-out"

[fpa]
flowers = 100
iterations = 100
gamma = 0.1
lambda = 1.5
p = 0.75
seed = 0

# Feasible PF domain. Positive PF injects reactive power, negative absorbs.
# Set pf_min = -1.0 and min_magnitude = 0.9 for [-1, -0.9] U [0.9, 1].
[bounds]
pf_min = 0.9
pf_max = 1.0

[opendss]
# binary = "/opt/opendss/bin/opendsscmd"
voltage_bases = [115.0, 4.16, 0.48]
steps = 2880
step_seconds = 30.0
"#;
