//! Flower pollination search over PV power factors.
//!
//! Every pass visits each flower once and proposes either a global move (a
//! Lévy-distributed step towards the live incumbent) or a local move (a random
//! fraction of the difference between two other flowers). Proposals are
//! sanitized and evaluated; a flower adopts its proposal when the fitness is
//! not worse, and the incumbent moves only on strict improvement.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tapopt_core::{PfVector, TapOptError, TapOptResult};
use tapopt_sim::SimulationDriver;
use tracing::{debug, info};

use crate::levy::LevyFlight;
use crate::objective::ObjectiveEvaluator;
use crate::trace::ConvergenceTrace;

/// Search parameters. Missing fields take the defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FpaConfig {
    /// Population size.
    pub flowers: usize,
    /// Full passes over the population.
    pub iterations: usize,
    /// Global step scale.
    pub gamma: f64,
    /// Lévy exponent.
    #[serde(alias = "lamb")]
    pub lambda: f64,
    /// Probability of a global move.
    pub p: f64,
    pub seed: u64,
}

impl Default for FpaConfig {
    fn default() -> Self {
        Self {
            flowers: 100,
            iterations: 100,
            gamma: 0.1,
            lambda: 1.5,
            p: 0.75,
            seed: 0,
        }
    }
}

impl FpaConfig {
    pub fn validate(&self) -> TapOptResult<()> {
        let fail = |msg: String| Err(TapOptError::Config(msg));
        if self.flowers < 3 {
            return fail(format!(
                "flowers must be at least 3 for local pollination, got {}",
                self.flowers
            ));
        }
        if self.iterations == 0 {
            return fail("iterations must be at least 1".to_string());
        }
        if !(0.0..=1.0).contains(&self.p) {
            return fail(format!("p must lie in [0, 1], got {}", self.p));
        }
        if !self.gamma.is_finite() || self.gamma <= 0.0 {
            return fail(format!("gamma must be positive and finite, got {}", self.gamma));
        }
        if !(self.lambda > 0.0 && self.lambda < 2.0) {
            return fail(format!("lambda must lie in (0, 2), got {}", self.lambda));
        }
        Ok(())
    }

    /// Upper bound on objective evaluations, baseline excluded.
    pub fn evaluation_budget(&self) -> usize {
        self.flowers * (self.iterations + 1)
    }
}

/// One flower: the raw vector of its last accepted move and its sanitized position.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub raw: Vec<f64>,
    pub position: PfVector,
    pub fitness: f64,
}

/// Best flower seen so far.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Incumbent {
    pub raw: Vec<f64>,
    pub position: PfVector,
    pub fitness: f64,
}

impl From<&Candidate> for Incumbent {
    fn from(candidate: &Candidate) -> Self {
        Self {
            raw: candidate.raw.clone(),
            position: candidate.position.clone(),
            fitness: candidate.fitness,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Init,
    Iterating { completed: usize },
    Terminated,
}

/// Final state of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct FpaOutcome {
    pub incumbent: Incumbent,
    pub trace: ConvergenceTrace,
    pub baseline_taps: u32,
    pub evaluations: u64,
}

/// Per-pass bookkeeping, logged at the end of each iteration.
#[derive(Debug, Default)]
struct PassStats {
    global: usize,
    local: usize,
    replaced: usize,
    discarded: usize,
    improved: bool,
}

pub struct PollinationEngine<'e, D: SimulationDriver> {
    config: FpaConfig,
    evaluator: &'e mut ObjectiveEvaluator<D>,
    levy: LevyFlight,
    rng: StdRng,
    population: Vec<Candidate>,
    incumbent: Option<Incumbent>,
    trace: ConvergenceTrace,
    baseline_taps: Option<u32>,
    /// Evaluator counter when this run started; earlier runs are not ours.
    evaluations_at_start: u64,
    state: EngineState,
}

impl<'e, D: SimulationDriver> PollinationEngine<'e, D> {
    /// The evaluator must already have a compiled model.
    pub fn new(config: FpaConfig, evaluator: &'e mut ObjectiveEvaluator<D>) -> TapOptResult<Self> {
        config.validate()?;
        evaluator.sanitizer()?;
        Ok(Self {
            levy: LevyFlight::new(config.lambda)?,
            rng: StdRng::seed_from_u64(config.seed),
            population: Vec::with_capacity(config.flowers),
            incumbent: None,
            trace: ConvergenceTrace::new(),
            baseline_taps: None,
            evaluations_at_start: 0,
            state: EngineState::Init,
            config,
            evaluator,
        })
    }

    pub fn config(&self) -> &FpaConfig {
        &self.config
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn population(&self) -> &[Candidate] {
        &self.population
    }

    pub fn incumbent(&self) -> Option<&Incumbent> {
        self.incumbent.as_ref()
    }

    pub fn trace(&self) -> &ConvergenceTrace {
        &self.trace
    }

    /// Seed the population uniformly inside the bounds and evaluate it.
    pub fn initialize(&mut self) -> TapOptResult<()> {
        if self.state != EngineState::Init {
            return Err(TapOptError::Config(
                "pollination engine is already initialised".to_string(),
            ));
        }
        self.evaluator.reset_baseline();
        self.evaluations_at_start = self.evaluator.stats().evaluations;
        let baseline = self.evaluator.baseline_taps()?;
        self.baseline_taps = Some(baseline);

        let sanitizer = *self.evaluator.sanitizer()?;
        let bounds = *sanitizer.bounds();
        for _ in 0..self.config.flowers {
            let raw: Vec<f64> = (0..sanitizer.len())
                .map(|_| self.rng.gen_range(bounds.pf_min..=bounds.pf_max))
                .collect();
            let evaluation = self.evaluator.assess(&raw)?;
            self.population.push(Candidate {
                raw,
                position: evaluation.position,
                fitness: evaluation.fitness,
            });
        }

        let mut best = &self.population[0];
        for candidate in &self.population[1..] {
            if candidate.fitness < best.fitness {
                best = candidate;
            }
        }
        let incumbent = Incumbent::from(best);
        self.trace.record(0, incumbent.fitness, self.evaluations());
        info!(
            flowers = self.config.flowers,
            baseline_taps = baseline,
            best_fitness = incumbent.fitness,
            "population initialised"
        );
        self.incumbent = Some(incumbent);
        self.state = EngineState::Iterating { completed: 0 };
        Ok(())
    }

    /// One full pass over the population. A no-op once terminated.
    pub fn iterate(&mut self) -> TapOptResult<EngineState> {
        let completed = match self.state {
            EngineState::Init => {
                return Err(TapOptError::Config(
                    "call initialize() before iterate()".to_string(),
                ))
            }
            EngineState::Terminated => return Ok(EngineState::Terminated),
            EngineState::Iterating { completed } => completed,
        };

        let mut pass = PassStats::default();
        for i in 0..self.population.len() {
            let raw = self.propose(i, &mut pass)?;
            if raw.iter().any(|v| !v.is_finite()) {
                pass.discarded += 1;
                debug!(flower = i, "non-finite move discarded");
                continue;
            }
            let evaluation = match self.evaluator.assess(&raw) {
                Ok(evaluation) => evaluation,
                Err(TapOptError::Validation(msg)) => {
                    pass.discarded += 1;
                    debug!(flower = i, %msg, "invalid move discarded");
                    continue;
                }
                Err(err) => return Err(err),
            };

            let candidate = &mut self.population[i];
            if evaluation.fitness <= candidate.fitness {
                candidate.raw = raw;
                candidate.position = evaluation.position;
                candidate.fitness = evaluation.fitness;
                pass.replaced += 1;

                if let Some(incumbent) = self.incumbent.as_mut() {
                    if candidate.fitness < incumbent.fitness {
                        *incumbent = Incumbent::from(&*candidate);
                        pass.improved = true;
                    }
                }
            }
        }

        let completed = completed + 1;
        let best_fitness = self.best_fitness()?;
        self.trace.record(completed, best_fitness, self.evaluations());
        info!(
            iteration = completed,
            best_fitness,
            improved = pass.improved,
            global = pass.global,
            local = pass.local,
            replaced = pass.replaced,
            discarded = pass.discarded,
            "pollination pass complete"
        );

        self.state = if completed >= self.config.iterations {
            EngineState::Terminated
        } else {
            EngineState::Iterating { completed }
        };
        Ok(self.state)
    }

    /// Initialise if needed and iterate until the budget is spent.
    pub fn run(&mut self) -> TapOptResult<FpaOutcome> {
        if self.state == EngineState::Init {
            self.initialize()?;
        }
        while self.iterate()? != EngineState::Terminated {}
        self.outcome()
    }

    pub fn outcome(&self) -> TapOptResult<FpaOutcome> {
        let (Some(incumbent), Some(baseline_taps)) = (&self.incumbent, self.baseline_taps) else {
            return Err(TapOptError::Config(
                "pollination engine has not been initialised".to_string(),
            ));
        };
        Ok(FpaOutcome {
            incumbent: incumbent.clone(),
            trace: self.trace.clone(),
            baseline_taps,
            evaluations: self.evaluations(),
        })
    }

    /// Candidate evaluations made by this run.
    pub fn evaluations(&self) -> u64 {
        self.evaluator
            .stats()
            .evaluations
            .saturating_sub(self.evaluations_at_start)
    }

    fn best_fitness(&self) -> TapOptResult<f64> {
        self.incumbent
            .as_ref()
            .map(|incumbent| incumbent.fitness)
            .ok_or_else(|| TapOptError::Config("no incumbent".to_string()))
    }

    /// Raw proposal for flower `i`. Draw order: branch, then either one Lévy
    /// step or the two partners followed by the mixing fraction.
    fn propose(&mut self, i: usize, pass: &mut PassStats) -> TapOptResult<Vec<f64>> {
        let r: f64 = self.rng.gen();
        if r < self.config.p {
            pass.global += 1;
            let step = self.levy.sample(&mut self.rng);
            let best = self
                .incumbent
                .as_ref()
                .ok_or_else(|| TapOptError::Config("no incumbent".to_string()))?;
            let scale = self.config.gamma * step;
            Ok(self.population[i]
                .position
                .iter()
                .zip(best.position.iter())
                .map(|(x, b)| x + scale * (b - x))
                .collect())
        } else {
            pass.local += 1;
            let (j, k) = self.pick_partners(i);
            let eps: f64 = self.rng.gen();
            let (xi, xj, xk) = (
                &self.population[i].position,
                &self.population[j].position,
                &self.population[k].position,
            );
            Ok(xi
                .iter()
                .zip(xj.iter().zip(xk.iter()))
                .map(|(x, (a, b))| x + eps * (a - b))
                .collect())
        }
    }

    /// Two distinct partners, both different from `i`.
    fn pick_partners(&mut self, i: usize) -> (usize, usize) {
        let n = self.population.len();
        let j = loop {
            let j = self.rng.gen_range(0..n);
            if j != i {
                break j;
            }
        };
        let k = loop {
            let k = self.rng.gen_range(0..n);
            if k != i && k != j {
                break k;
            }
        };
        (j, k)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objective::ObjectiveConfig;
    use std::collections::VecDeque;
    use std::path::Path;
    use tapopt_core::PfBounds;
    use tapopt_sim::{EventLog, ModelInfo, SimulationResult};

    /// Taps fall as the mean PF drops below unity, floored at zero.
    struct BowlDriver {
        info: Option<ModelInfo>,
        pf: Vec<f64>,
        taps: u32,
    }

    impl BowlDriver {
        fn new() -> Self {
            Self {
                info: None,
                pf: Vec::new(),
                taps: 0,
            }
        }
    }

    impl SimulationDriver for BowlDriver {
        fn compile(&mut self, _model: &Path) -> TapOptResult<&ModelInfo> {
            Ok(self.info.insert(ModelInfo {
                name: "bowl".into(),
                pv_names: vec!["a".into(), "b".into(), "c".into()],
                regulator_names: vec!["Reg1".into()],
            }))
        }

        fn model(&self) -> Option<&ModelInfo> {
            self.info.as_ref()
        }

        fn set_power_factors(&mut self, pf: &PfVector) -> TapOptResult<()> {
            self.pf = pf.to_vec();
            Ok(())
        }

        fn run_daily(&mut self) -> TapOptResult<SimulationResult> {
            let mean = self.pf.iter().sum::<f64>() / self.pf.len() as f64;
            self.taps = ((mean - 0.9) * 200.0).round().max(0.0) as u32;
            Ok(SimulationResult {
                steps: 2880,
                nonconverged_steps: 0,
            })
        }

        fn event_log(&self) -> TapOptResult<EventLog> {
            Ok(EventLog::from_lines(
                (0..self.taps).map(|_| "Element=RegControl.Reg1, Action= TAP CHANGED"),
            ))
        }
    }

    /// Two PV units; tap counts are served in call order, the baseline first.
    struct QueueDriver {
        info: Option<ModelInfo>,
        script: VecDeque<u32>,
        fallback: u32,
        taps: u32,
        seen: Vec<Vec<f64>>,
    }

    impl QueueDriver {
        fn new(script: &[u32], fallback: u32) -> Self {
            Self {
                info: None,
                script: script.iter().copied().collect(),
                fallback,
                taps: 0,
                seen: Vec::new(),
            }
        }
    }

    impl SimulationDriver for QueueDriver {
        fn compile(&mut self, _model: &Path) -> TapOptResult<&ModelInfo> {
            Ok(self.info.insert(ModelInfo {
                name: "queue".into(),
                pv_names: vec!["a".into(), "b".into()],
                regulator_names: vec!["Reg1".into()],
            }))
        }

        fn model(&self) -> Option<&ModelInfo> {
            self.info.as_ref()
        }

        fn set_power_factors(&mut self, pf: &PfVector) -> TapOptResult<()> {
            self.seen.push(pf.to_vec());
            Ok(())
        }

        fn run_daily(&mut self) -> TapOptResult<SimulationResult> {
            self.taps = self.script.pop_front().unwrap_or(self.fallback);
            Ok(SimulationResult {
                steps: 2880,
                nonconverged_steps: 0,
            })
        }

        fn event_log(&self) -> TapOptResult<EventLog> {
            Ok(EventLog::from_lines(
                (0..self.taps).map(|_| "Element=RegControl.Reg1, Action= TAP CHANGED"),
            ))
        }
    }

    fn queue_evaluator(driver: QueueDriver, bounds: PfBounds) -> ObjectiveEvaluator<QueueDriver> {
        let mut evaluator = ObjectiveEvaluator::new(
            driver,
            ObjectiveConfig {
                bounds,
                ..ObjectiveConfig::default()
            },
        )
        .unwrap();
        evaluator.compile(Path::new("queue")).unwrap();
        evaluator
    }

    /// Sine of the angle between `a - origin` and `b - origin`.
    fn sine(origin: &[f64], a: &[f64], b: &[f64]) -> f64 {
        let (a0, a1) = (a[0] - origin[0], a[1] - origin[1]);
        let (b0, b1) = (b[0] - origin[0], b[1] - origin[1]);
        (a0 * b1 - a1 * b0).abs() / (a0.hypot(a1) * b0.hypot(b1))
    }

    fn evaluator() -> ObjectiveEvaluator<BowlDriver> {
        let mut evaluator = ObjectiveEvaluator::new(
            BowlDriver::new(),
            ObjectiveConfig {
                bounds: PfBounds::new(0.9, 1.0).unwrap(),
                ..ObjectiveConfig::default()
            },
        )
        .unwrap();
        evaluator.compile(Path::new("bowl")).unwrap();
        evaluator
    }

    fn small() -> FpaConfig {
        FpaConfig {
            flowers: 6,
            iterations: 8,
            seed: 42,
            ..FpaConfig::default()
        }
    }

    #[test]
    fn config_validation() {
        assert!(FpaConfig::default().validate().is_ok());
        let bad = [
            FpaConfig {
                flowers: 2,
                ..FpaConfig::default()
            },
            FpaConfig {
                iterations: 0,
                ..FpaConfig::default()
            },
            FpaConfig {
                p: 1.5,
                ..FpaConfig::default()
            },
            FpaConfig {
                gamma: 0.0,
                ..FpaConfig::default()
            },
            FpaConfig {
                lambda: 2.0,
                ..FpaConfig::default()
            },
        ];
        for config in bad {
            assert!(
                matches!(config.validate(), Err(TapOptError::Config(_))),
                "{config:?}"
            );
        }
        assert_eq!(FpaConfig::default().evaluation_budget(), 10_100);
    }

    #[test]
    fn state_machine_runs_to_termination() {
        let mut eval = evaluator();
        let mut engine = PollinationEngine::new(small(), &mut eval).unwrap();
        assert_eq!(engine.state(), EngineState::Init);
        assert!(engine.iterate().is_err());

        engine.initialize().unwrap();
        assert_eq!(engine.state(), EngineState::Iterating { completed: 0 });
        assert_eq!(engine.population().len(), 6);
        assert!(engine.initialize().is_err());

        let outcome = engine.run().unwrap();
        assert_eq!(engine.state(), EngineState::Terminated);
        assert_eq!(engine.iterate().unwrap(), EngineState::Terminated);
        assert_eq!(outcome.trace.len(), 9);
        assert_eq!(outcome.evaluations, 6 * 9);
        assert_eq!(outcome.baseline_taps, 20);
    }

    #[test]
    fn population_and_incumbent_invariants() {
        let mut eval = evaluator();
        let mut engine = PollinationEngine::new(small(), &mut eval).unwrap();
        let outcome = engine.run().unwrap();

        assert_eq!(engine.population().len(), 6);
        for candidate in engine.population() {
            assert_eq!(candidate.position.len(), 3);
            assert!(candidate.position.iter().all(|v| (0.9..=1.0).contains(v)));
            assert!(candidate.fitness >= outcome.incumbent.fitness);
        }
        assert!(outcome.trace.is_non_increasing());
        assert!(outcome.incumbent.fitness <= 20.0);
        assert_eq!(
            outcome.trace.last().map(|p| p.best_fitness),
            Some(outcome.incumbent.fitness)
        );
    }

    #[test]
    fn fixed_seed_reproduces_run() {
        let run = || {
            let mut eval = evaluator();
            let mut engine = PollinationEngine::new(small(), &mut eval).unwrap();
            engine.run().unwrap()
        };
        let (a, b) = (run(), run());
        assert_eq!(a.incumbent, b.incumbent);
        assert_eq!(a.trace, b.trace);

        let mut eval = evaluator();
        let reseeded = FpaConfig {
            seed: 43,
            ..small()
        };
        let mut engine = PollinationEngine::new(reseeded, &mut eval).unwrap();
        engine.initialize().unwrap();
        let other: Vec<_> = engine.population().iter().map(|c| c.raw.clone()).collect();
        let mut eval = evaluator();
        let mut engine = PollinationEngine::new(small(), &mut eval).unwrap();
        engine.initialize().unwrap();
        let first: Vec<_> = engine.population().iter().map(|c| c.raw.clone()).collect();
        assert_ne!(first, other);
    }

    #[test]
    fn local_only_search_still_converges() {
        let mut eval = evaluator();
        let config = FpaConfig {
            p: 0.0,
            ..small()
        };
        let mut engine = PollinationEngine::new(config, &mut eval).unwrap();
        let outcome = engine.run().unwrap();
        assert!(outcome.trace.is_non_increasing());
    }

    #[test]
    fn partners_are_distinct() {
        let mut eval = evaluator();
        let mut engine = PollinationEngine::new(
            FpaConfig {
                flowers: 3,
                ..small()
            },
            &mut eval,
        )
        .unwrap();
        engine.initialize().unwrap();
        for i in 0..3 {
            for _ in 0..50 {
                let (j, k) = engine.pick_partners(i);
                assert!(j != i && k != i && j != k);
            }
        }
    }

    #[test]
    fn requires_compiled_model() {
        let mut eval =
            ObjectiveEvaluator::new(BowlDriver::new(), ObjectiveConfig::default()).unwrap();
        assert!(matches!(
            PollinationEngine::new(small(), &mut eval),
            Err(TapOptError::Model(_))
        ));
    }

    #[test]
    fn reused_evaluator_reproduces_trace() {
        let mut eval = evaluator();
        let a = PollinationEngine::new(small(), &mut eval).unwrap().run().unwrap();
        let b = PollinationEngine::new(small(), &mut eval).unwrap().run().unwrap();

        assert_eq!(a.incumbent, b.incumbent);
        assert_eq!(a.trace, b.trace);
        assert_eq!(a.evaluations, 6 * 9);
        assert_eq!(b.evaluations, 6 * 9);
        assert_eq!(b.trace.points()[0].evaluations, 6);
        assert_eq!(eval.stats().evaluations, 2 * 6 * 9);
    }

    #[test]
    fn tied_move_replaces_flower_but_keeps_first_incumbent() {
        let mut eval = queue_evaluator(QueueDriver::new(&[], 5), PfBounds::default());
        let config = FpaConfig {
            flowers: 3,
            iterations: 1,
            p: 1.0,
            seed: 7,
            ..FpaConfig::default()
        };
        let mut engine = PollinationEngine::new(config, &mut eval).unwrap();
        engine.initialize().unwrap();
        let before = engine.population().to_vec();
        let first = engine.incumbent().cloned().unwrap();
        assert_eq!(first, Incumbent::from(&before[0]));

        assert_eq!(engine.iterate().unwrap(), EngineState::Terminated);
        assert_ne!(engine.population()[1].position, before[1].position);
        assert_eq!(engine.population()[1].fitness, 5.0);
        assert_eq!(engine.incumbent(), Some(&first));
    }

    #[test]
    fn improvement_steers_the_next_flower_in_the_same_pass() {
        // baseline, three initial flowers (flower 2 best), then one pass
        let script = [10, 8, 9, 7, 2, 9, 9];
        let bounds = PfBounds::new(0.1, 1.0).unwrap();
        let mut eval = queue_evaluator(QueueDriver::new(&script, 9), bounds);
        let config = FpaConfig {
            flowers: 3,
            iterations: 1,
            p: 1.0,
            gamma: 1e-3,
            seed: 11,
            ..FpaConfig::default()
        };
        let mut engine = PollinationEngine::new(config, &mut eval).unwrap();
        let outcome = engine.run().unwrap();
        assert_eq!(outcome.incumbent.fitness, 2.0);
        drop(engine);

        let seen = &eval.driver().seen;
        assert_eq!(seen.len(), 7);
        let (x1, x2) = (&seen[2], &seen[3]);
        let (moved0, proposal1) = (&seen[4], &seen[5]);
        assert_eq!(outcome.incumbent.position.as_slice(), moved0.as_slice());
        assert!(sine(x1, proposal1, moved0) < 1e-6);
        assert!(sine(x1, proposal1, x2) > 1e-3);
    }
}
