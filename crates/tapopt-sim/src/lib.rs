//! # tapopt-sim: daily power-flow drivers
//!
//! The optimiser never talks to a power-flow engine directly. Everything it
//! needs goes through [`SimulationDriver`]:
//!
//! | Operation | Purpose |
//! |-----------|---------|
//! | [`SimulationDriver::compile`] | load the network model once per run |
//! | [`SimulationDriver::set_power_factors`] | apply one PF per PV unit |
//! | [`SimulationDriver::run_daily`] | run the daily time series with tap control |
//! | [`SimulationDriver::get_tap_operations`] | count tap events in the run's log |
//!
//! Two engines implement the trait:
//!
//! - [`OpenDssDriver`] runs the OpenDSS command-line engine as a subprocess
//!   and parses its exported event log.
//! - [`SyntheticFeeder`] is a deterministic quasi-static feeder with
//!   bandwidth/time-delay regulator controls, used for tests and demos.
//!
//! Engine instances are stateful and not re-entrant: one evaluation at a time.

pub mod eventlog;
pub mod opendss;
pub mod profile;
pub mod synthetic;

use std::path::Path;

use tapopt_core::{PfVector, TapOptError, TapOptResult};

pub use eventlog::{EventLog, RegulatorFilter, TapEvent, TAP_MARKER};
pub use opendss::{OpenDssDriver, OpenDssOptions};
pub use profile::DailyProfile;
pub use synthetic::{FeederModel, PvSpec, RegulatorSpec, SyntheticFeeder};

/// Steps in one daily run (24 h).
pub const DAILY_STEPS: usize = 2880;

/// Identifiers discovered when a model is compiled, in engine order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelInfo {
    pub name: String,
    pub pv_names: Vec<String>,
    pub regulator_names: Vec<String>,
}

impl ModelInfo {
    pub fn pv_count(&self) -> usize {
        self.pv_names.len()
    }
}

/// Outcome of one daily run; discarded once the tap count is extracted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimulationResult {
    pub steps: usize,
    pub nonconverged_steps: usize,
}

impl SimulationResult {
    pub fn converged(&self) -> bool {
        self.nonconverged_steps == 0
    }

    pub fn warning(&self) -> Option<ConvergenceWarning> {
        (!self.converged()).then_some(ConvergenceWarning {
            nonconverged_steps: self.nonconverged_steps,
            steps: self.steps,
        })
    }
}

/// Some steps of a daily run failed to converge. Never fatal: the taps
/// logged during the run are still counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvergenceWarning {
    pub nonconverged_steps: usize,
    pub steps: usize,
}

impl std::fmt::Display for ConvergenceWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} of {} steps did not converge",
            self.nonconverged_steps, self.steps
        )
    }
}

/// Narrow seam over a stateful daily power-flow engine.
pub trait SimulationDriver {
    /// Load the static topology and fix the PV / regulator order.
    fn compile(&mut self, model: &Path) -> TapOptResult<&ModelInfo>;

    /// The compiled model, if any.
    fn model(&self) -> Option<&ModelInfo>;

    /// Apply one PF per PV unit, in [`ModelInfo::pv_names`] order.
    fn set_power_factors(&mut self, pf: &PfVector) -> TapOptResult<()>;

    /// Run the full daily time series with tap control enabled.
    fn run_daily(&mut self) -> TapOptResult<SimulationResult>;

    /// Control log of the last completed run.
    fn event_log(&self) -> TapOptResult<EventLog>;

    /// Tap-change events of the last run for the filtered regulators.
    fn get_tap_operations(&self, filter: &RegulatorFilter) -> TapOptResult<u32> {
        Ok(self.event_log()?.count_taps(filter))
    }
}

/// Lets callers choose the engine at runtime (`Box<dyn SimulationDriver>`).
impl<T: SimulationDriver + ?Sized> SimulationDriver for Box<T> {
    fn compile(&mut self, model: &Path) -> TapOptResult<&ModelInfo> {
        (**self).compile(model)
    }

    fn model(&self) -> Option<&ModelInfo> {
        (**self).model()
    }

    fn set_power_factors(&mut self, pf: &PfVector) -> TapOptResult<()> {
        (**self).set_power_factors(pf)
    }

    fn run_daily(&mut self) -> TapOptResult<SimulationResult> {
        (**self).run_daily()
    }

    fn event_log(&self) -> TapOptResult<EventLog> {
        (**self).event_log()
    }

    fn get_tap_operations(&self, filter: &RegulatorFilter) -> TapOptResult<u32> {
        (**self).get_tap_operations(filter)
    }
}

/// Shared checks for [`SimulationDriver::set_power_factors`].
pub(crate) fn check_power_factors(model: Option<&ModelInfo>, pf: &PfVector) -> TapOptResult<()> {
    let model = model.ok_or_else(|| {
        TapOptError::Model("no model compiled; call compile() first".to_string())
    })?;
    if pf.len() != model.pv_count() {
        return Err(TapOptError::Validation(format!(
            "PF vector has {} elements, model '{}' has {} PV units",
            pf.len(),
            model.name,
            model.pv_count()
        )));
    }
    if let Some((idx, value)) = pf
        .iter()
        .enumerate()
        .find(|(_, v)| **v == 0.0 || v.abs() > 1.0)
    {
        return Err(TapOptError::Validation(format!(
            "PF for {} must satisfy 0 < |pf| <= 1, got {value}",
            model.pv_names[idx]
        )));
    }
    Ok(())
}
