//! OpenDSS command-line driver.
//!
//! Each daily run is a fresh subprocess: the driver renders a script that
//! recompiles the circuit, applies the PV power factors, solves the daily
//! time series with static control mode and exports the event log into a
//! private work directory. Recompiling per run resets tap positions and
//! control timers, so identical PF vectors give identical logs.

use std::collections::HashSet;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use serde::{Deserialize, Serialize};
use tapopt_core::{PfVector, TapOptError, TapOptResult};
use tempfile::TempDir;
use tracing::{debug, warn};

use crate::eventlog::EventLog;
use crate::{check_power_factors, ModelInfo, SimulationDriver, SimulationResult, DAILY_STEPS};

/// Executable name searched for when no binary is configured.
pub const OPENDSS_BINARY: &str = "opendsscmd";

const EVENT_LOG_FILE: &str = "eventlog.csv";
const SCRIPT_FILE: &str = "daily_run.dss";

fn default_steps() -> usize {
    DAILY_STEPS
}

fn default_step_seconds() -> f64 {
    30.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenDssOptions {
    /// Explicit engine executable; otherwise `~/.tapopt/bin` then `PATH`.
    #[serde(default)]
    pub binary: Option<PathBuf>,
    /// kV bases passed to `Set VoltageBases`; skipped when empty.
    #[serde(default)]
    pub voltage_bases: Vec<f64>,
    #[serde(default = "default_steps")]
    pub steps: usize,
    #[serde(default = "default_step_seconds")]
    pub step_seconds: f64,
}

impl Default for OpenDssOptions {
    fn default() -> Self {
        Self {
            binary: None,
            voltage_bases: Vec::new(),
            steps: default_steps(),
            step_seconds: default_step_seconds(),
        }
    }
}

pub struct OpenDssDriver {
    options: OpenDssOptions,
    binary: Option<PathBuf>,
    model_path: Option<PathBuf>,
    info: Option<ModelInfo>,
    pf: Option<PfVector>,
    last_log: Option<EventLog>,
    workdir: TempDir,
}

impl OpenDssDriver {
    pub fn new(options: OpenDssOptions) -> TapOptResult<Self> {
        if options.steps == 0 || options.step_seconds.is_nan() || options.step_seconds <= 0.0 {
            return Err(TapOptError::Config(
                "OpenDSS daily run needs steps >= 1 and step_seconds > 0".to_string(),
            ));
        }
        Ok(Self {
            options,
            binary: None,
            model_path: None,
            info: None,
            pf: None,
            last_log: None,
            workdir: tempfile::Builder::new().prefix("tapopt-dss").tempdir()?,
        })
    }

    /// Locate the engine executable.
    ///
    /// Search order:
    /// 1. `options.binary`
    /// 2. `~/.tapopt/bin/opendsscmd`
    /// 3. System PATH
    pub fn find_binary(options: &OpenDssOptions) -> TapOptResult<PathBuf> {
        if let Some(path) = &options.binary {
            if path.exists() {
                return Ok(path.clone());
            }
            return Err(TapOptError::Engine(format!(
                "configured OpenDSS binary '{}' does not exist",
                path.display()
            )));
        }
        if let Some(home) = dirs::home_dir() {
            let local = home.join(".tapopt").join("bin").join(OPENDSS_BINARY);
            if local.exists() {
                return Ok(local);
            }
        }
        which::which(OPENDSS_BINARY).map_err(|_| {
            TapOptError::Engine(format!(
                "{OPENDSS_BINARY} not found; install OpenDSS or set opendss.binary"
            ))
        })
    }

    pub fn workdir(&self) -> &Path {
        self.workdir.path()
    }

    fn render_script(&self, model: &Path, pf: &[f64]) -> String {
        render_script(&self.options, model, self.info.as_ref(), pf, &self.event_log_path())
    }

    fn event_log_path(&self) -> PathBuf {
        self.workdir.path().join(EVENT_LOG_FILE)
    }
}

/// Daily-run script for one PF assignment.
pub fn render_script(
    options: &OpenDssOptions,
    model: &Path,
    info: Option<&ModelInfo>,
    pf: &[f64],
    event_log: &Path,
) -> String {
    let mut script = String::new();
    let _ = writeln!(script, "Clear");
    let _ = writeln!(script, "Compile [{}]", model.display());
    if !options.voltage_bases.is_empty() {
        let bases: Vec<String> = options.voltage_bases.iter().map(f64::to_string).collect();
        let _ = writeln!(script, "Set VoltageBases=[{}]", bases.join(", "));
    }
    let _ = writeln!(script, "CalcVoltageBases");
    let _ = writeln!(script, "Set ControlMode=Static");
    if let Some(info) = info {
        for (name, value) in info.pv_names.iter().zip(pf) {
            let _ = writeln!(script, "Edit PVSystem.{name} pf={value}");
        }
    }
    let _ = writeln!(
        script,
        "Set Mode=Daily Number={} Stepsize={}s",
        options.steps, options.step_seconds
    );
    let _ = writeln!(script, "Solve");
    let _ = writeln!(script, "Export EventLog [{}]", event_log.display());
    script
}

/// Collect `New PVSystem.*` and `New RegControl.*` definitions in file order,
/// following `Redirect` and `Compile` includes relative to the including file.
pub fn scan_model(path: &Path) -> TapOptResult<ModelInfo> {
    let mut info = ModelInfo {
        name: path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default(),
        ..ModelInfo::default()
    };
    let mut visited = HashSet::new();
    scan_file(path, &mut info, &mut visited)?;
    Ok(info)
}

fn scan_file(path: &Path, info: &mut ModelInfo, visited: &mut HashSet<PathBuf>) -> TapOptResult<()> {
    let canonical = path.canonicalize().map_err(|err| {
        TapOptError::Model(format!("opening DSS file '{}': {err}", path.display()))
    })?;
    if !visited.insert(canonical.clone()) {
        return Ok(());
    }
    let text = fs::read_to_string(&canonical).map_err(|err| {
        TapOptError::Model(format!("reading DSS file '{}': {err}", path.display()))
    })?;
    let base = canonical.parent().map(Path::to_path_buf).unwrap_or_default();

    for raw in text.lines() {
        let line = strip_comment(raw).trim();
        let mut words = line.split_whitespace();
        let Some(command) = words.next() else {
            continue;
        };
        match command.to_ascii_lowercase().as_str() {
            "new" => {
                let Some(object) = words.next() else {
                    continue;
                };
                let object = object
                    .strip_prefix("object=")
                    .or_else(|| object.strip_prefix("Object="))
                    .unwrap_or(object);
                let Some((class, name)) = object.split_once('.') else {
                    continue;
                };
                match class.to_ascii_lowercase().as_str() {
                    "pvsystem" => info.pv_names.push(name.to_string()),
                    "regcontrol" => info.regulator_names.push(name.to_string()),
                    _ => {}
                }
            }
            "redirect" | "compile" => {
                let target: String = words.collect::<Vec<_>>().join(" ");
                let target = target.trim_matches(|c| matches!(c, '[' | ']' | '"' | '\'' | '(' | ')'));
                if !target.is_empty() {
                    scan_file(&base.join(target), info, visited)?;
                }
            }
            _ => {}
        }
    }
    Ok(())
}

fn strip_comment(line: &str) -> &str {
    let cut = [line.find('!'), line.find("//")]
        .into_iter()
        .flatten()
        .min()
        .unwrap_or(line.len());
    &line[..cut]
}

impl SimulationDriver for OpenDssDriver {
    fn compile(&mut self, model: &Path) -> TapOptResult<&ModelInfo> {
        let info = scan_model(model)?;
        if info.pv_names.is_empty() {
            return Err(TapOptError::Model(format!(
                "no PVSystem definitions found in '{}'",
                model.display()
            )));
        }
        let binary = Self::find_binary(&self.options)?;
        debug!(
            model = %model.display(),
            binary = %binary.display(),
            pvs = info.pv_count(),
            regulators = info.regulator_names.len(),
            "compiled OpenDSS model"
        );
        self.binary = Some(binary);
        self.model_path = Some(model.canonicalize()?);
        self.pf = None;
        self.last_log = None;
        Ok(self.info.insert(info))
    }

    fn model(&self) -> Option<&ModelInfo> {
        self.info.as_ref()
    }

    fn set_power_factors(&mut self, pf: &PfVector) -> TapOptResult<()> {
        check_power_factors(self.model(), pf)?;
        self.pf = Some(pf.clone());
        Ok(())
    }

    fn run_daily(&mut self) -> TapOptResult<SimulationResult> {
        let (Some(binary), Some(model)) = (self.binary.clone(), self.model_path.clone()) else {
            return Err(TapOptError::Engine("no OpenDSS model compiled".to_string()));
        };
        let pf = self
            .pf
            .clone()
            .unwrap_or_else(|| PfVector::unity(self.info.as_ref().map_or(0, ModelInfo::pv_count)));

        let log_path = self.event_log_path();
        if log_path.exists() {
            fs::remove_file(&log_path)?;
        }
        let script_path = self.workdir.path().join(SCRIPT_FILE);
        fs::write(&script_path, self.render_script(&model, &pf))?;

        self.last_log = None;
        let output = Command::new(&binary)
            .arg(&script_path)
            .current_dir(self.workdir.path())
            .output()
            .map_err(|err| {
                TapOptError::Engine(format!("starting {}: {err}", binary.display()))
            })?;
        if !output.status.success() {
            return Err(TapOptError::Engine(format!(
                "OpenDSS exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let console = format!(
            "{}\n{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );
        let nonconverged = console
            .lines()
            .filter(|line| line.to_ascii_lowercase().contains("not converge"))
            .count();
        if nonconverged > 0 {
            warn!(nonconverged, "OpenDSS reported non-converged steps");
        }

        if !log_path.exists() {
            return Err(TapOptError::Engine(format!(
                "OpenDSS run produced no event log at '{}'",
                log_path.display()
            )));
        }
        self.last_log = Some(EventLog::read(&log_path)?);
        Ok(SimulationResult {
            steps: self.options.steps,
            nonconverged_steps: nonconverged,
        })
    }

    fn event_log(&self) -> TapOptResult<EventLog> {
        self.last_log
            .clone()
            .ok_or_else(|| TapOptError::Engine("no daily run has completed".to_string()))
    }
}
