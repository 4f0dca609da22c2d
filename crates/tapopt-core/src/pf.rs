use crate::error::{TapOptError, TapOptResult};
use serde::{Deserialize, Serialize};
use std::ops::Deref;

/// One power factor per PV unit, ordered like the compiled model's PV list.
///
/// A `PfVector` handed out by [`crate::PfSanitizer`] is always finite and
/// inside the configured bounds; raw pollination output stays a plain
/// `Vec<f64>` until it has been sanitized.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct PfVector(Vec<f64>);

impl PfVector {
    /// All units at unity power factor; the baseline operating point.
    pub fn unity(n: usize) -> Self {
        PfVector(vec![1.0; n])
    }

    /// Wrap values that are already known to be valid power factors.
    ///
    /// Only checks that every element is finite and within `[-1, 1]`; use
    /// [`crate::PfSanitizer`] to project onto a configured domain.
    pub fn new(values: Vec<f64>) -> TapOptResult<Self> {
        if let Some((idx, value)) = values
            .iter()
            .enumerate()
            .find(|(_, v)| !v.is_finite() || v.abs() > 1.0)
        {
            return Err(TapOptError::Validation(format!(
                "power factor at index {idx} is not a valid PF: {value}"
            )));
        }
        Ok(PfVector(values))
    }

    pub(crate) fn from_sanitized(values: Vec<f64>) -> Self {
        PfVector(values)
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn into_inner(self) -> Vec<f64> {
        self.0
    }
}

impl Deref for PfVector {
    type Target = [f64];

    fn deref(&self) -> &[f64] {
        &self.0
    }
}

fn default_pf_min() -> f64 {
    0.9
}

fn default_pf_max() -> f64 {
    1.0
}

/// Feasible PF domain for every inverter.
///
/// The sign convention is the engine's: positive values inject reactive power
/// alongside active power, negative values absorb it. `min_magnitude` carves
/// a dead zone around zero so that a signed domain such as
/// `[-1, -0.9] ∪ [0.9, 1]` can be expressed with `pf_min = -1`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PfBounds {
    #[serde(default = "default_pf_min")]
    pub pf_min: f64,
    #[serde(default = "default_pf_max")]
    pub pf_max: f64,
    #[serde(default)]
    pub min_magnitude: Option<f64>,
}

impl Default for PfBounds {
    fn default() -> Self {
        Self {
            pf_min: default_pf_min(),
            pf_max: default_pf_max(),
            min_magnitude: None,
        }
    }
}

impl PfBounds {
    pub fn new(pf_min: f64, pf_max: f64) -> TapOptResult<Self> {
        let bounds = Self {
            pf_min,
            pf_max,
            min_magnitude: None,
        };
        bounds.validate()?;
        Ok(bounds)
    }

    pub fn with_min_magnitude(mut self, magnitude: f64) -> TapOptResult<Self> {
        self.min_magnitude = Some(magnitude);
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> TapOptResult<()> {
        if !self.pf_min.is_finite() || !self.pf_max.is_finite() {
            return Err(TapOptError::Config(format!(
                "PF bounds must be finite, got [{}, {}]",
                self.pf_min, self.pf_max
            )));
        }
        if self.pf_min < -1.0 || self.pf_max > 1.0 {
            return Err(TapOptError::Config(format!(
                "PF bounds [{}, {}] leave the range [-1, 1]",
                self.pf_min, self.pf_max
            )));
        }
        if self.pf_min >= self.pf_max {
            return Err(TapOptError::Config(format!(
                "pf_min ({}) must be below pf_max ({})",
                self.pf_min, self.pf_max
            )));
        }
        if let Some(mag) = self.min_magnitude {
            if !(0.0..=1.0).contains(&mag) {
                return Err(TapOptError::Config(format!(
                    "min_magnitude must be within [0, 1], got {mag}"
                )));
            }
        }
        Ok(())
    }

    pub fn width(&self) -> f64 {
        self.pf_max - self.pf_min
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.pf_min && value <= self.pf_max
    }
}
