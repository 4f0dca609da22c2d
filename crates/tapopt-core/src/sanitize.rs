//! Projection of raw pollination output onto the feasible PF domain.
//!
//! Pollination arithmetic is unconstrained, so a move can leave the bounds or
//! (with an extreme Lévy step) overflow to infinity. Out-of-bound values are
//! clamped; non-finite values are rejected because the engine would accept
//! them and silently produce garbage.

use crate::error::{TapOptError, TapOptResult};
use crate::pf::{PfBounds, PfVector};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PfSanitizer {
    bounds: PfBounds,
    len: usize,
}

impl PfSanitizer {
    pub fn new(bounds: PfBounds, len: usize) -> TapOptResult<Self> {
        bounds.validate()?;
        Ok(Self { bounds, len })
    }

    pub fn bounds(&self) -> &PfBounds {
        &self.bounds
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Validate length and finiteness, then project every element.
    pub fn sanitize(&self, raw: &[f64]) -> TapOptResult<PfVector> {
        if raw.len() != self.len {
            return Err(TapOptError::Validation(format!(
                "PF vector has {} elements, model has {} PV units",
                raw.len(),
                self.len
            )));
        }
        if let Some((idx, value)) = raw.iter().enumerate().find(|(_, v)| !v.is_finite()) {
            return Err(TapOptError::Validation(format!(
                "PF element {idx} is not finite ({value})"
            )));
        }
        Ok(PfVector::from_sanitized(
            raw.iter().map(|&v| self.project(v)).collect(),
        ))
    }

    /// Project a single finite value: clamp, leave the dead zone, clamp again.
    ///
    /// The first clamp keeps the dead-zone push on the same side as the
    /// bounds, which is what makes the projection idempotent.
    pub fn project(&self, value: f64) -> f64 {
        let clamped = value.clamp(self.bounds.pf_min, self.bounds.pf_max);
        match self.bounds.min_magnitude {
            Some(mag) if clamped.abs() < mag => {
                let pushed = if clamped < 0.0 { -mag } else { mag };
                pushed.clamp(self.bounds.pf_min, self.bounds.pf_max)
            }
            _ => clamped,
        }
    }

    /// Indices whose raw value was moved by sanitization.
    ///
    /// A non-empty result means the search is pressing against the PF bounds.
    pub fn pressed_indices(&self, raw: &[f64], sanitized: &PfVector) -> Vec<usize> {
        raw.iter()
            .zip(sanitized.iter())
            .enumerate()
            .filter(|(_, (r, s))| r != s)
            .map(|(idx, _)| idx)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sanitizer(min: f64, max: f64, n: usize) -> PfSanitizer {
        PfSanitizer::new(PfBounds::new(min, max).unwrap(), n).unwrap()
    }

    #[test]
    fn clamps_into_bounds() {
        let s = sanitizer(0.9, 1.0, 4);
        let v = s.sanitize(&[0.5, 0.95, 1.7, -3.0]).unwrap();
        assert_eq!(v.as_slice(), &[0.9, 0.95, 1.0, 0.9]);
    }

    #[test]
    fn rejects_wrong_length() {
        let s = sanitizer(0.9, 1.0, 3);
        let err = s.sanitize(&[0.95, 0.95]).unwrap_err();
        assert!(matches!(err, TapOptError::Validation(_)));
    }

    #[test]
    fn rejects_nan_and_infinity() {
        let s = sanitizer(0.9, 1.0, 2);
        assert!(matches!(
            s.sanitize(&[f64::NAN, 0.95]),
            Err(TapOptError::Validation(_))
        ));
        assert!(matches!(
            s.sanitize(&[0.95, f64::NEG_INFINITY]),
            Err(TapOptError::Validation(_))
        ));
    }

    #[test]
    fn sanitize_is_idempotent() {
        let s = sanitizer(0.9, 1.0, 5);
        let raw = [0.2, 0.93, 1.4, -0.99, 0.999];
        let once = s.sanitize(&raw).unwrap();
        let twice = s.sanitize(&once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn dead_zone_preserves_sign() {
        let bounds = PfBounds::new(-1.0, 1.0)
            .unwrap()
            .with_min_magnitude(0.9)
            .unwrap();
        let s = PfSanitizer::new(bounds, 5).unwrap();
        let v = s.sanitize(&[0.3, -0.3, 0.0, -0.95, 1.3]).unwrap();
        assert_eq!(v.as_slice(), &[0.9, -0.9, 0.9, -0.95, 1.0]);
    }

    #[test]
    fn dead_zone_projection_is_idempotent_when_band_exceeds_bounds() {
        let bounds = PfBounds::new(-1.0, -0.95)
            .unwrap()
            .with_min_magnitude(0.97)
            .unwrap();
        let s = PfSanitizer::new(bounds, 4).unwrap();
        let raw = [0.5, -0.3, -0.96, 0.0];
        let once = s.sanitize(&raw).unwrap();
        assert!(once.iter().all(|&v| bounds.contains(v)));
        assert_eq!(s.sanitize(&once).unwrap(), once);
    }

    #[test]
    fn every_element_lands_inside_bounds() {
        let s = sanitizer(-0.95, 0.98, 64);
        let raw: Vec<f64> = (0..64).map(|i| (i as f64 - 32.0) * 0.173).collect();
        let v = s.sanitize(&raw).unwrap();
        assert_eq!(v.len(), 64);
        assert!(v.iter().all(|&pf| (-0.95..=0.98).contains(&pf)));
    }

    #[test]
    fn reports_pressed_indices() {
        let s = sanitizer(0.9, 1.0, 3);
        let raw = [0.85, 0.95, 1.05];
        let v = s.sanitize(&raw).unwrap();
        assert_eq!(s.pressed_indices(&raw, &v), vec![0, 2]);
    }
}
