//! Tap-count objective with a cached unity-PF baseline.
//!
//! Fitness is the number of tap operations of a daily run, except that any
//! candidate doing worse than leaving every inverter at unity PF is given a
//! fixed penalty. The baseline is simulated once per run and cached.

use std::path::Path;

use tapopt_core::{PfBounds, PfSanitizer, PfVector, TapOptError, TapOptResult};
use tapopt_sim::{EventLog, ModelInfo, RegulatorFilter, SimulationDriver, SimulationResult};
use tracing::{debug, info, warn};

pub const DEFAULT_PENALTY: f64 = 1e9;
pub const DEFAULT_MAX_ENGINE_FAILURES: u32 = 3;

#[derive(Debug, Clone, PartialEq)]
pub struct ObjectiveConfig {
    pub bounds: PfBounds,
    /// Regulators whose taps are counted; empty counts every model regulator.
    pub regulators: Vec<String>,
    /// Fitness of a candidate that regresses against the baseline.
    pub penalty: f64,
    /// Consecutive engine failures that abort the run; earlier ones are penalised.
    pub max_engine_failures: u32,
}

impl Default for ObjectiveConfig {
    fn default() -> Self {
        Self {
            bounds: PfBounds::default(),
            regulators: Vec::new(),
            penalty: DEFAULT_PENALTY,
            max_engine_failures: DEFAULT_MAX_ENGINE_FAILURES,
        }
    }
}

impl ObjectiveConfig {
    pub fn validate(&self) -> TapOptResult<()> {
        self.bounds.validate()?;
        if !self.penalty.is_finite() || self.penalty <= 0.0 {
            return Err(TapOptError::Config(format!(
                "penalty must be a positive finite number, got {}",
                self.penalty
            )));
        }
        if self.max_engine_failures == 0 {
            return Err(TapOptError::Config(
                "max_engine_failures must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Taps did not exceed the baseline; fitness is the tap count.
    Accepted,
    /// Taps exceeded the baseline; fitness is the penalty.
    Regressed,
    /// The engine failed; fitness is the penalty.
    EngineFailed,
}

/// Result of one objective evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    /// Sanitized PF vector that was simulated.
    pub position: PfVector,
    pub taps: Option<u32>,
    pub fitness: f64,
    pub outcome: Outcome,
    /// Some steps of the run did not converge.
    pub degraded: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvaluatorStats {
    /// Candidate evaluations (baseline excluded).
    pub evaluations: u64,
    /// Daily runs started, baseline and replays included.
    pub simulations: u64,
    pub engine_failures: u64,
    pub degraded_runs: u64,
}

/// A daily run outside the search loop, kept with its full event log.
#[derive(Debug, Clone)]
pub struct Replay {
    pub taps: u32,
    pub simulation: SimulationResult,
    pub log: EventLog,
}

pub struct ObjectiveEvaluator<D> {
    driver: D,
    config: ObjectiveConfig,
    filter: Option<RegulatorFilter>,
    sanitizer: Option<PfSanitizer>,
    baseline: Option<u32>,
    consecutive_failures: u32,
    stats: EvaluatorStats,
}

impl<D: SimulationDriver> ObjectiveEvaluator<D> {
    pub fn new(driver: D, config: ObjectiveConfig) -> TapOptResult<Self> {
        config.validate()?;
        Ok(Self {
            driver,
            config,
            filter: None,
            sanitizer: None,
            baseline: None,
            consecutive_failures: 0,
            stats: EvaluatorStats::default(),
        })
    }

    /// Compile the model and resolve the regulator filter against it.
    pub fn compile(&mut self, model: &Path) -> TapOptResult<&ModelInfo> {
        let info = self.driver.compile(model)?.clone();
        let filter = resolve_filter(&self.config.regulators, &info)?;
        self.sanitizer = Some(PfSanitizer::new(self.config.bounds, info.pv_count())?);
        info!(
            model = %info.name,
            pvs = info.pv_count(),
            regulators = ?filter.names().collect::<Vec<_>>(),
            "model compiled"
        );
        self.filter = Some(filter);
        self.baseline = None;
        self.consecutive_failures = 0;
        self.stats = EvaluatorStats::default();
        self.model()
            .ok_or_else(|| TapOptError::Model("driver lost its compiled model".to_string()))
    }

    pub fn model(&self) -> Option<&ModelInfo> {
        self.driver.model()
    }

    pub fn sanitizer(&self) -> TapOptResult<&PfSanitizer> {
        self.sanitizer
            .as_ref()
            .ok_or_else(|| TapOptError::Model("no model compiled; call compile() first".to_string()))
    }

    pub fn filter(&self) -> Option<&RegulatorFilter> {
        self.filter.as_ref()
    }

    pub fn config(&self) -> &ObjectiveConfig {
        &self.config
    }

    pub fn penalty(&self) -> f64 {
        self.config.penalty
    }

    pub fn stats(&self) -> EvaluatorStats {
        self.stats
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn into_driver(self) -> D {
        self.driver
    }

    /// Forget the cached baseline; the next evaluation recomputes it.
    pub fn reset_baseline(&mut self) {
        self.baseline = None;
        self.consecutive_failures = 0;
    }

    /// Tap count with every PF at unity, simulated at most once per run.
    ///
    /// Any failure here is fatal: without a baseline no candidate can be judged.
    pub fn baseline_taps(&mut self) -> TapOptResult<u32> {
        if let Some(taps) = self.baseline {
            return Ok(taps);
        }
        let unity = PfVector::unity(self.sanitizer()?.len());
        let (taps, degraded) = self.simulate(&unity)?;
        if f64::from(taps) >= self.config.penalty {
            return Err(TapOptError::Config(format!(
                "penalty {} must exceed the baseline of {taps} tap operations",
                self.config.penalty
            )));
        }
        info!(baseline_taps = taps, degraded, "baseline established");
        self.baseline = Some(taps);
        Ok(taps)
    }

    /// Fitness of a raw PF vector: the tap count, or the penalty.
    pub fn evaluate(&mut self, raw: &[f64]) -> TapOptResult<f64> {
        Ok(self.assess(raw)?.fitness)
    }

    /// Like [`evaluate`](Self::evaluate) but keeps the details.
    pub fn assess(&mut self, raw: &[f64]) -> TapOptResult<Evaluation> {
        let position = self.sanitizer()?.sanitize(raw)?;
        let baseline = self.baseline_taps()?;
        self.stats.evaluations += 1;

        match self.simulate(&position) {
            Ok((taps, degraded)) => {
                self.consecutive_failures = 0;
                let (fitness, outcome) = if taps > baseline {
                    (self.config.penalty, Outcome::Regressed)
                } else {
                    (f64::from(taps), Outcome::Accepted)
                };
                debug!(
                    pf = ?position.as_slice(),
                    taps,
                    baseline,
                    fitness,
                    "candidate evaluated"
                );
                Ok(Evaluation {
                    position,
                    taps: Some(taps),
                    fitness,
                    outcome,
                    degraded,
                })
            }
            Err(err) if err.is_engine() => {
                self.stats.engine_failures += 1;
                self.consecutive_failures += 1;
                if self.consecutive_failures >= self.config.max_engine_failures {
                    return Err(TapOptError::Engine(format!(
                        "{} consecutive engine failures, last: {err}",
                        self.consecutive_failures
                    )));
                }
                warn!(error = %err, pf = ?position.as_slice(), "engine failed, candidate penalised");
                Ok(Evaluation {
                    position,
                    taps: None,
                    fitness: self.config.penalty,
                    outcome: Outcome::EngineFailed,
                    degraded: false,
                })
            }
            Err(err) => Err(err),
        }
    }

    /// Run one day with an already sanitized vector and keep its event log.
    pub fn replay(&mut self, position: &PfVector) -> TapOptResult<Replay> {
        self.driver.set_power_factors(position)?;
        self.stats.simulations += 1;
        let simulation = self.driver.run_daily()?;
        let filter = self
            .filter
            .as_ref()
            .ok_or_else(|| TapOptError::Model("no model compiled; call compile() first".to_string()))?;
        let log = self.driver.event_log()?;
        Ok(Replay {
            taps: log.count_taps(filter),
            simulation,
            log,
        })
    }

    fn simulate(&mut self, pf: &PfVector) -> TapOptResult<(u32, bool)> {
        self.driver.set_power_factors(pf)?;
        self.stats.simulations += 1;
        let result = self.driver.run_daily()?;
        let degraded = match result.warning() {
            Some(warning) => {
                self.stats.degraded_runs += 1;
                warn!(%warning, "daily run degraded");
                true
            }
            None => false,
        };
        let filter = self
            .filter
            .as_ref()
            .ok_or_else(|| TapOptError::Model("no model compiled; call compile() first".to_string()))?;
        let taps = self.driver.get_tap_operations(filter)?;
        Ok((taps, degraded))
    }
}

fn resolve_filter(configured: &[String], info: &ModelInfo) -> TapOptResult<RegulatorFilter> {
    if configured.is_empty() {
        if info.regulator_names.is_empty() {
            return Err(TapOptError::Model(format!(
                "model '{}' defines no regulators",
                info.name
            )));
        }
        return RegulatorFilter::new(&info.regulator_names);
    }
    let filter = RegulatorFilter::new(configured)?;
    let unknown: Vec<&str> = filter
        .names()
        .filter(|name| {
            !info
                .regulator_names
                .iter()
                .any(|reg| reg.eq_ignore_ascii_case(name))
        })
        .collect();
    if !unknown.is_empty() {
        return Err(TapOptError::Model(format!(
            "regulators {unknown:?} not found in model '{}' (has {:?})",
            info.name, info.regulator_names
        )));
    }
    Ok(filter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::path::PathBuf;

    /// Unity PFs give `baseline` taps; other vectors pop scripted results.
    struct ScriptedDriver {
        info: Option<ModelInfo>,
        baseline: TapOptResult<u32>,
        script: VecDeque<TapOptResult<u32>>,
        pf: Option<PfVector>,
        last: Option<u32>,
        unity_runs: u32,
        degraded: bool,
    }

    impl ScriptedDriver {
        fn new(baseline: u32, script: Vec<TapOptResult<u32>>) -> Self {
            Self {
                info: None,
                baseline: Ok(baseline),
                script: script.into(),
                pf: None,
                last: None,
                unity_runs: 0,
                degraded: false,
            }
        }
    }

    fn clone_result(result: &TapOptResult<u32>) -> TapOptResult<u32> {
        match result {
            Ok(taps) => Ok(*taps),
            Err(err) => Err(TapOptError::Engine(err.to_string())),
        }
    }

    impl SimulationDriver for ScriptedDriver {
        fn compile(&mut self, _model: &Path) -> TapOptResult<&ModelInfo> {
            Ok(self.info.insert(ModelInfo {
                name: "scripted".into(),
                pv_names: vec!["pv1".into(), "pv2".into()],
                regulator_names: vec!["Reg1".into(), "Reg2".into()],
            }))
        }

        fn model(&self) -> Option<&ModelInfo> {
            self.info.as_ref()
        }

        fn set_power_factors(&mut self, pf: &PfVector) -> TapOptResult<()> {
            self.pf = Some(pf.clone());
            Ok(())
        }

        fn run_daily(&mut self) -> TapOptResult<SimulationResult> {
            let unity = self
                .pf
                .as_ref()
                .map_or(true, |pf| pf.iter().all(|v| *v == 1.0));
            let taps = if unity {
                self.unity_runs += 1;
                clone_result(&self.baseline)
            } else {
                self.script.pop_front().unwrap_or(Ok(0))
            };
            self.last = None;
            self.last = Some(taps?);
            Ok(SimulationResult {
                steps: 2880,
                nonconverged_steps: usize::from(self.degraded),
            })
        }

        fn event_log(&self) -> TapOptResult<EventLog> {
            let taps = self
                .last
                .ok_or_else(|| TapOptError::Engine("no run".to_string()))?;
            Ok(EventLog::from_lines(
                (0..taps).map(|_| "Element=RegControl.Reg1, Action= TAP CHANGED"),
            ))
        }
    }

    fn evaluator(driver: ScriptedDriver) -> ObjectiveEvaluator<ScriptedDriver> {
        let mut evaluator = ObjectiveEvaluator::new(
            driver,
            ObjectiveConfig {
                bounds: PfBounds::new(0.9, 1.0).unwrap(),
                ..ObjectiveConfig::default()
            },
        )
        .unwrap();
        evaluator.compile(&PathBuf::from("scripted.dss")).unwrap();
        evaluator
    }

    #[test]
    fn baseline_is_simulated_once() {
        let mut eval = evaluator(ScriptedDriver::new(10, vec![Ok(4), Ok(6), Ok(8)]));
        assert_eq!(eval.evaluate(&[0.95, 0.95]).unwrap(), 4.0);
        assert_eq!(eval.evaluate(&[0.92, 0.99]).unwrap(), 6.0);
        assert_eq!(eval.evaluate(&[0.91, 0.93]).unwrap(), 8.0);
        assert_eq!(eval.driver().unity_runs, 1);
        assert_eq!(eval.baseline_taps().unwrap(), 10);
        assert_eq!(eval.driver().unity_runs, 1);
        assert_eq!(eval.stats().evaluations, 3);
        assert_eq!(eval.stats().simulations, 4);
    }

    #[test]
    fn reset_forces_a_new_baseline() {
        let mut eval = evaluator(ScriptedDriver::new(10, vec![Ok(4), Ok(4)]));
        eval.evaluate(&[0.95, 0.95]).unwrap();
        eval.reset_baseline();
        eval.evaluate(&[0.95, 0.95]).unwrap();
        assert_eq!(eval.driver().unity_runs, 2);
    }

    #[test]
    fn regression_returns_penalty_not_taps() {
        let mut eval = evaluator(ScriptedDriver::new(10, vec![Ok(12), Ok(10)]));
        let regressed = eval.assess(&[0.95, 0.95]).unwrap();
        assert_eq!(regressed.fitness, DEFAULT_PENALTY);
        assert_eq!(regressed.taps, Some(12));
        assert_eq!(regressed.outcome, Outcome::Regressed);

        let tie = eval.assess(&[0.95, 0.95]).unwrap();
        assert_eq!(tie.fitness, 10.0);
        assert_eq!(tie.outcome, Outcome::Accepted);
    }

    #[test]
    fn simulates_the_sanitized_vector() {
        let mut eval = evaluator(ScriptedDriver::new(3, vec![Ok(1)]));
        let evaluation = eval.assess(&[0.5, 1.7]).unwrap();
        assert_eq!(evaluation.position.as_slice(), &[0.9, 1.0]);
        assert_eq!(
            eval.driver().pf.as_ref().map(|pf| pf.as_slice().to_vec()),
            Some(vec![0.9, 1.0])
        );
    }

    #[test]
    fn non_finite_input_is_a_validation_error() {
        let mut eval = evaluator(ScriptedDriver::new(3, vec![]));
        let err = eval.evaluate(&[f64::NAN, 0.95]).unwrap_err();
        assert!(matches!(err, TapOptError::Validation(_)));
        assert!(matches!(
            eval.evaluate(&[0.95]),
            Err(TapOptError::Validation(_))
        ));
    }

    #[test]
    fn engine_failure_is_penalised_then_aborts() {
        let boom = || Err(TapOptError::Engine("solver crashed".into()));
        let mut eval = evaluator(ScriptedDriver::new(
            5,
            vec![boom(), Ok(2), boom(), boom(), boom()],
        ));
        let failed = eval.assess(&[0.95, 0.95]).unwrap();
        assert_eq!(failed.outcome, Outcome::EngineFailed);
        assert_eq!(failed.fitness, DEFAULT_PENALTY);
        assert_eq!(failed.taps, None);

        assert_eq!(eval.evaluate(&[0.95, 0.95]).unwrap(), 2.0);
        assert!(eval.evaluate(&[0.95, 0.95]).is_ok());
        assert!(eval.evaluate(&[0.95, 0.95]).is_ok());
        let err = eval.evaluate(&[0.95, 0.95]).unwrap_err();
        assert!(err.is_engine());
        assert!(err.to_string().contains("3 consecutive engine failures"));
        assert_eq!(eval.stats().engine_failures, 4);
    }

    #[test]
    fn baseline_failure_is_fatal() {
        let mut driver = ScriptedDriver::new(0, vec![Ok(1)]);
        driver.baseline = Err(TapOptError::Engine("no license".into()));
        let mut eval = evaluator(driver);
        assert!(eval.evaluate(&[0.95, 0.95]).unwrap_err().is_engine());
    }

    #[test]
    fn penalty_must_exceed_baseline() {
        let mut eval = ObjectiveEvaluator::new(
            ScriptedDriver::new(10, vec![]),
            ObjectiveConfig {
                penalty: 10.0,
                ..ObjectiveConfig::default()
            },
        )
        .unwrap();
        eval.compile(Path::new("scripted.dss")).unwrap();
        assert!(matches!(eval.baseline_taps(), Err(TapOptError::Config(_))));
    }

    #[test]
    fn degraded_runs_still_count_taps() {
        let mut driver = ScriptedDriver::new(4, vec![Ok(3)]);
        driver.degraded = true;
        let mut eval = evaluator(driver);
        let evaluation = eval.assess(&[0.95, 0.95]).unwrap();
        assert!(evaluation.degraded);
        assert_eq!(evaluation.fitness, 3.0);
        assert_eq!(eval.stats().degraded_runs, 2);
    }

    #[test]
    fn regulator_filter_resolution() {
        let info = ModelInfo {
            name: "m".into(),
            pv_names: vec!["pv1".into()],
            regulator_names: vec!["Reg1".into(), "Reg2".into()],
        };
        let all = resolve_filter(&[], &info).unwrap();
        assert_eq!(all.names().collect::<Vec<_>>(), vec!["REG1", "REG2"]);

        let one = resolve_filter(&["reg2".to_string()], &info).unwrap();
        assert_eq!(one.len(), 1);

        assert!(matches!(
            resolve_filter(&["Reg9".to_string()], &info),
            Err(TapOptError::Model(_))
        ));
        let bare = ModelInfo {
            regulator_names: vec![],
            ..info
        };
        assert!(matches!(
            resolve_filter(&[], &bare),
            Err(TapOptError::Model(_))
        ));
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = ObjectiveConfig {
            max_engine_failures: 0,
            ..ObjectiveConfig::default()
        };
        assert!(ObjectiveEvaluator::new(ScriptedDriver::new(1, vec![]), config).is_err());
        let config = ObjectiveConfig {
            penalty: f64::INFINITY,
            ..ObjectiveConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
