use serde::Serialize;

/// Incumbent fitness after one completed pass (iteration 0 is initialisation).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TracePoint {
    pub iteration: usize,
    pub best_fitness: f64,
    /// Objective evaluations performed so far, baseline excluded.
    pub evaluations: u64,
}

/// Append-only convergence history of one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ConvergenceTrace {
    points: Vec<TracePoint>,
}

impl ConvergenceTrace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, iteration: usize, best_fitness: f64, evaluations: u64) {
        self.points.push(TracePoint {
            iteration,
            best_fitness,
            evaluations,
        });
    }

    pub fn points(&self) -> &[TracePoint] {
        &self.points
    }

    pub fn last(&self) -> Option<&TracePoint> {
        self.points.last()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn is_non_increasing(&self) -> bool {
        self.points
            .windows(2)
            .all(|pair| pair[1].best_fitness <= pair[0].best_fitness)
    }
}
