//! Deterministic quasi-static feeder engine.
//!
//! Each regulator zone is reduced to a Thevenin path from a stiff source: the
//! regulated voltage is
//!
//! ```text
//! v = v_src + tap * step - (r * P_net + x * Q_net) / S_base
//! ```
//!
//! where `P_net`/`Q_net` are the zone's share of the feeder load minus the
//! output of its PV units. This is the linearised DistFlow voltage drop of
//! Baran & Wu (doi:10.1109/61.19265) collapsed to one equivalent branch per
//! zone. Every step runs a bandwidth + time-delay controller per regulator,
//! mirroring the standard line-drop-free LTC control loop, and appends
//! event lines in the layout of an OpenDSS event log.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tapopt_core::{PfVector, TapOptError, TapOptResult};
use tracing::debug;

use crate::eventlog::EventLog;
use crate::profile::DailyProfile;
use crate::{check_power_factors, ModelInfo, SimulationDriver, SimulationResult, DAILY_STEPS};

/// Regulated voltages outside this range are treated as a failed solution.
const SOLVABLE_PU: (f64, f64) = (0.8, 1.2);

const STC_TEMPERATURE_C: f64 = 25.0;

fn default_steps() -> usize {
    DAILY_STEPS
}

fn default_base_kva() -> f64 {
    1000.0
}

fn default_unity() -> f64 {
    1.0
}

fn default_load_pf() -> f64 {
    0.95
}

fn default_band() -> f64 {
    0.02
}

fn default_tap_step() -> f64 {
    0.00625
}

fn default_max_tap() -> i32 {
    16
}

fn default_delay() -> f64 {
    30.0
}

fn default_temp_coeff() -> f64 {
    -0.004
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadSpec {
    pub peak_kw: f64,
    #[serde(default = "default_load_pf")]
    pub power_factor: f64,
    /// Multiplier of `peak_kw` over the day.
    pub shape: DailyProfile,
}

/// Seeded irradiance variability applied on top of the clear-sky shape.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CloudSpec {
    /// Largest fractional irradiance loss, in `[0, 1]`.
    pub variability: f64,
    #[serde(default)]
    pub seed: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegulatorSpec {
    pub name: String,
    #[serde(default = "default_unity")]
    pub vreg_pu: f64,
    /// Full bandwidth around `vreg_pu`.
    #[serde(default = "default_band")]
    pub band_pu: f64,
    #[serde(default = "default_tap_step")]
    pub tap_step_pu: f64,
    #[serde(default = "default_max_tap")]
    pub max_tap: i32,
    #[serde(default = "default_delay")]
    pub delay_s: f64,
    pub r_pu: f64,
    pub x_pu: f64,
    /// Fraction of the feeder load served through this regulator.
    #[serde(default = "default_unity")]
    pub load_share: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PvSpec {
    pub name: String,
    pub kva: f64,
    pub pmpp_kw: f64,
    /// Regulator zone the unit is connected in.
    pub regulator: String,
    /// Fractional power change per degree above 25 °C.
    #[serde(default = "default_temp_coeff")]
    pub temp_coeff: f64,
}

/// Feeder description loaded by [`SyntheticFeeder::compile`] (YAML).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeederModel {
    pub name: String,
    #[serde(default = "default_steps")]
    pub steps: usize,
    #[serde(default = "default_base_kva")]
    pub base_kva: f64,
    #[serde(default = "default_unity")]
    pub source_pu: f64,
    pub load: LoadSpec,
    /// Plane-of-array irradiance as a fraction of STC.
    pub irradiance: DailyProfile,
    /// Cell temperature in °C; STC when absent.
    #[serde(default)]
    pub temperature: Option<DailyProfile>,
    #[serde(default)]
    pub clouds: Option<CloudSpec>,
    pub regulators: Vec<RegulatorSpec>,
    pub pvs: Vec<PvSpec>,
}

impl FeederModel {
    pub fn from_yaml(text: &str) -> TapOptResult<Self> {
        serde_yaml::from_str(text)
            .map_err(|err| TapOptError::Model(format!("parsing feeder model: {err}")))
    }

    pub fn to_yaml(&self) -> TapOptResult<String> {
        serde_yaml::to_string(self)
            .map_err(|err| TapOptError::Model(format!("serializing feeder model: {err}")))
    }

    pub fn validate(&self) -> TapOptResult<()> {
        let fail = |msg: String| Err(TapOptError::Model(format!("feeder '{}': {msg}", self.name)));

        if self.steps == 0 {
            return fail("steps must be at least 1".into());
        }
        if !(self.base_kva > 0.0) || !self.source_pu.is_finite() {
            return fail("base_kva must be positive and source_pu finite".into());
        }
        if self.load.peak_kw < 0.0 || !(self.load.power_factor > 0.0 && self.load.power_factor <= 1.0)
        {
            return fail("load needs peak_kw >= 0 and 0 < power_factor <= 1".into());
        }
        self.load.shape.validate("load shape")?;
        self.irradiance.validate("irradiance")?;
        if let Some(temperature) = &self.temperature {
            temperature.validate("temperature")?;
        }
        if let Some(clouds) = &self.clouds {
            if !(0.0..=1.0).contains(&clouds.variability) {
                return fail("cloud variability must be within [0, 1]".into());
            }
        }
        if self.regulators.is_empty() {
            return fail("at least one regulator is required".into());
        }
        if self.pvs.is_empty() {
            return fail("at least one PV unit is required".into());
        }

        let mut names = HashSet::new();
        for reg in &self.regulators {
            if !names.insert(reg.name.to_ascii_uppercase()) {
                return fail(format!("duplicate element name '{}'", reg.name));
            }
            if !(reg.band_pu > 0.0) || !(reg.tap_step_pu > 0.0) || reg.max_tap < 0 {
                return fail(format!(
                    "regulator '{}' needs band_pu > 0, tap_step_pu > 0 and max_tap >= 0",
                    reg.name
                ));
            }
            if !(reg.delay_s >= 0.0) || !reg.r_pu.is_finite() || !reg.x_pu.is_finite() {
                return fail(format!("regulator '{}' has invalid delay or impedance", reg.name));
            }
        }
        for pv in &self.pvs {
            if !names.insert(pv.name.to_ascii_uppercase()) {
                return fail(format!("duplicate element name '{}'", pv.name));
            }
            if !(pv.kva > 0.0) || pv.pmpp_kw < 0.0 {
                return fail(format!("PV '{}' needs kva > 0 and pmpp_kw >= 0", pv.name));
            }
            if self.zone_of(&pv.regulator).is_none() {
                return fail(format!(
                    "PV '{}' references unknown regulator '{}'",
                    pv.name, pv.regulator
                ));
            }
        }
        Ok(())
    }

    fn zone_of(&self, regulator: &str) -> Option<usize> {
        self.regulators
            .iter()
            .position(|reg| reg.name.eq_ignore_ascii_case(regulator))
    }

    fn info(&self) -> ModelInfo {
        ModelInfo {
            name: self.name.clone(),
            pv_names: self.pvs.iter().map(|pv| pv.name.clone()).collect(),
            regulator_names: self.regulators.iter().map(|reg| reg.name.clone()).collect(),
        }
    }
}

/// Compiled form of a [`FeederModel`] with per-run constants resolved.
#[derive(Debug, Clone)]
struct CompiledFeeder {
    model: FeederModel,
    info: ModelInfo,
    /// Regulator index for each PV unit.
    zones: Vec<usize>,
    /// Per-step irradiance multiplier from the cloud model.
    clouds: Vec<f64>,
    load_tan_phi: f64,
}

impl CompiledFeeder {
    fn new(model: FeederModel) -> TapOptResult<Self> {
        model.validate()?;
        let zones = model
            .pvs
            .iter()
            .map(|pv| model.zone_of(&pv.regulator).unwrap_or_default())
            .collect();
        let clouds = cloud_series(model.steps, model.clouds.as_ref());
        let load_tan_phi = model.load.power_factor.acos().tan();
        Ok(Self {
            info: model.info(),
            model,
            zones,
            clouds,
            load_tan_phi,
        })
    }

    fn pv_output(&self, idx: usize, pf: f64, seconds: f64, step: usize) -> (f64, f64) {
        let pv = &self.model.pvs[idx];
        let irradiance = self.model.irradiance.at(seconds).max(0.0) * self.clouds[step];
        let derate = match &self.model.temperature {
            Some(profile) => 1.0 + pv.temp_coeff * (profile.at(seconds) - STC_TEMPERATURE_C),
            None => 1.0,
        };
        let p = (pv.pmpp_kw * irradiance * derate).clamp(0.0, pv.kva);
        let q_limit = (pv.kva * pv.kva - p * p).max(0.0).sqrt();
        let q = (p * pf.abs().acos().tan()).min(q_limit);
        (p, q.copysign(pf))
    }
}

fn cloud_series(steps: usize, clouds: Option<&CloudSpec>) -> Vec<f64> {
    let Some(spec) = clouds else {
        return vec![1.0; steps];
    };
    let mut rng = StdRng::seed_from_u64(spec.seed);
    let mut level = 1.0;
    (0..steps)
        .map(|_| {
            let target = 1.0 - spec.variability * rng.gen::<f64>();
            level = 0.9 * level + 0.1 * target;
            level
        })
        .collect()
}

#[derive(Debug, Clone, Copy, Default)]
struct ControllerState {
    tap: i32,
    pending: i32,
    timer: f64,
}

/// In-process daily engine over a [`FeederModel`].
#[derive(Debug, Clone, Default)]
pub struct SyntheticFeeder {
    compiled: Option<CompiledFeeder>,
    pf: Option<PfVector>,
    last_log: Option<EventLog>,
}

impl SyntheticFeeder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile an in-memory model; [`SimulationDriver::compile`] reads one from YAML.
    pub fn compile_model(&mut self, model: FeederModel) -> TapOptResult<&ModelInfo> {
        let compiled = CompiledFeeder::new(model)?;
        debug!(
            feeder = %compiled.info.name,
            pvs = compiled.info.pv_count(),
            regulators = compiled.info.regulator_names.len(),
            "compiled synthetic feeder"
        );
        self.pf = None;
        self.last_log = None;
        Ok(&self.compiled.insert(compiled).info)
    }

    fn simulate(&self, compiled: &CompiledFeeder, pf: &[f64]) -> (SimulationResult, EventLog) {
        let model = &compiled.model;
        let dt = 86_400.0 / model.steps as f64;
        let mut states = vec![ControllerState::default(); model.regulators.len()];
        let mut lines = Vec::new();
        let mut nonconverged = 0;

        for step in 0..model.steps {
            let seconds = step as f64 * dt;
            let hour = (seconds / 3600.0).floor() as u32;
            let sec = (seconds - hour as f64 * 3600.0).round() as u32;
            let load_p = model.load.peak_kw * model.load.shape.at(seconds).max(0.0);
            let load_q = load_p * compiled.load_tan_phi;

            let mut net: Vec<(f64, f64)> = model
                .regulators
                .iter()
                .map(|reg| (reg.load_share * load_p, reg.load_share * load_q))
                .collect();
            for (idx, &zone) in compiled.zones.iter().enumerate() {
                let (p, q) = compiled.pv_output(idx, pf[idx], seconds, step);
                net[zone].0 -= p;
                net[zone].1 -= q;
            }

            let voltages: Vec<f64> = model
                .regulators
                .iter()
                .zip(&states)
                .zip(&net)
                .map(|((reg, state), &(p, q))| {
                    model.source_pu + f64::from(state.tap) * reg.tap_step_pu
                        - (reg.r_pu * p + reg.x_pu * q) / model.base_kva
                })
                .collect();

            if voltages
                .iter()
                .any(|v| !(SOLVABLE_PU.0..=SOLVABLE_PU.1).contains(v))
            {
                nonconverged += 1;
                lines.push(format!(
                    "Hour={hour}, Sec={sec}, ControlIter=1, Element=Solution, Action=SOLUTION DID NOT CONVERGE"
                ));
                continue;
            }

            for ((reg, state), v) in model.regulators.iter().zip(states.iter_mut()).zip(voltages) {
                let deviation = v - reg.vreg_pu;
                if deviation.abs() <= reg.band_pu / 2.0 {
                    state.pending = 0;
                    state.timer = 0.0;
                    continue;
                }
                let direction = if deviation < 0.0 { 1 } else { -1 };
                if state.pending == direction {
                    state.timer += dt;
                } else {
                    state.pending = direction;
                    state.timer = 0.0;
                }
                if state.timer < reg.delay_s {
                    continue;
                }
                state.pending = 0;
                state.timer = 0.0;
                let target = state.tap + direction;
                if target.abs() > reg.max_tap {
                    lines.push(format!(
                        "Hour={hour}, Sec={sec}, ControlIter=1, Element=RegControl.{}, Action=LIMIT REACHED AT {}",
                        reg.name, state.tap
                    ));
                    continue;
                }
                state.tap = target;
                lines.push(format!(
                    "Hour={hour}, Sec={sec}, ControlIter=1, Element=RegControl.{}, Action= TAP CHANGED TO {} ({})",
                    reg.name,
                    target,
                    if direction > 0 { "UP" } else { "DOWN" }
                ));
            }
        }

        (
            SimulationResult {
                steps: model.steps,
                nonconverged_steps: nonconverged,
            },
            EventLog::from_lines(lines),
        )
    }
}

impl SimulationDriver for SyntheticFeeder {
    fn compile(&mut self, model: &Path) -> TapOptResult<&ModelInfo> {
        let text = fs::read_to_string(model).map_err(|err| {
            TapOptError::Model(format!("reading feeder model '{}': {err}", model.display()))
        })?;
        self.compile_model(FeederModel::from_yaml(&text)?)
    }

    fn model(&self) -> Option<&ModelInfo> {
        self.compiled.as_ref().map(|compiled| &compiled.info)
    }

    fn set_power_factors(&mut self, pf: &PfVector) -> TapOptResult<()> {
        check_power_factors(self.model(), pf)?;
        self.pf = Some(pf.clone());
        Ok(())
    }

    fn run_daily(&mut self) -> TapOptResult<SimulationResult> {
        let compiled = self
            .compiled
            .as_ref()
            .ok_or_else(|| TapOptError::Engine("no feeder compiled".to_string()))?;
        let unity;
        let pf = match &self.pf {
            Some(pf) => pf.as_slice(),
            None => {
                unity = vec![1.0; compiled.info.pv_count()];
                unity.as_slice()
            }
        };
        let (result, log) = self.simulate(compiled, pf);
        self.last_log = Some(log);
        Ok(result)
    }

    fn event_log(&self) -> TapOptResult<EventLog> {
        self.last_log
            .clone()
            .ok_or_else(|| TapOptError::Engine("no daily run has completed".to_string()))
    }
}
