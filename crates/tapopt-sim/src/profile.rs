use serde::{Deserialize, Serialize};
use tapopt_core::{TapOptError, TapOptResult};

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Evenly spaced samples covering one day, linearly interpolated and wrapped
/// at midnight. Twenty-four points give an hourly shape; 2880 points give one
/// sample per 30 s step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DailyProfile(Vec<f64>);

impl DailyProfile {
    pub fn new(points: Vec<f64>) -> TapOptResult<Self> {
        let profile = DailyProfile(points);
        profile.validate("profile")?;
        Ok(profile)
    }

    pub fn constant(value: f64) -> Self {
        DailyProfile(vec![value])
    }

    pub fn validate(&self, label: &str) -> TapOptResult<()> {
        if self.0.is_empty() {
            return Err(TapOptError::Model(format!("{label} has no samples")));
        }
        if self.0.iter().any(|v| !v.is_finite()) {
            return Err(TapOptError::Model(format!(
                "{label} contains non-finite samples"
            )));
        }
        Ok(())
    }

    pub fn points(&self) -> &[f64] {
        &self.0
    }

    /// Value at `seconds` after midnight.
    pub fn at(&self, seconds: f64) -> f64 {
        let n = self.0.len();
        if n == 1 {
            return self.0[0];
        }
        let spacing = SECONDS_PER_DAY / n as f64;
        let pos = seconds.rem_euclid(SECONDS_PER_DAY) / spacing;
        let lo = (pos.floor() as usize) % n;
        let hi = (lo + 1) % n;
        let frac = pos - pos.floor();
        self.0[lo] + (self.0[hi] - self.0[lo]) * frac
    }
}
