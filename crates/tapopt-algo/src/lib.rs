//! # tapopt-algo: tap-operation search
//!
//! - [`ObjectiveEvaluator`] turns a raw PF vector into a fitness: tap
//!   operations of one daily run, or a fixed penalty when the run does worse
//!   than the cached unity-PF baseline.
//! - [`PollinationEngine`] is the flower pollination search that drives it.
//! - [`LevyFlight`] samples the heavy-tailed global step (Mantegna).
//!
//! ```no_run
//! use std::path::Path;
//! use tapopt_algo::{FpaConfig, ObjectiveConfig, ObjectiveEvaluator, PollinationEngine};
//! use tapopt_sim::SyntheticFeeder;
//!
//! # fn main() -> tapopt_core::TapOptResult<()> {
//! let mut evaluator = ObjectiveEvaluator::new(SyntheticFeeder::new(), ObjectiveConfig::default())?;
//! evaluator.compile(Path::new("data/feeder.yaml"))?;
//! let outcome = PollinationEngine::new(FpaConfig::default(), &mut evaluator)?.run()?;
//! println!("{} -> {}", outcome.baseline_taps, outcome.incumbent.fitness);
//! # Ok(())
//! # }
//! ```

pub mod levy;
pub mod objective;
pub mod pollination;
pub mod trace;

pub use levy::LevyFlight;
pub use objective::{
    Evaluation, EvaluatorStats, ObjectiveConfig, ObjectiveEvaluator, Outcome, Replay,
    DEFAULT_MAX_ENGINE_FAILURES, DEFAULT_PENALTY,
};
pub use pollination::{Candidate, EngineState, FpaConfig, FpaOutcome, Incumbent, PollinationEngine};
pub use trace::{ConvergenceTrace, TracePoint};
