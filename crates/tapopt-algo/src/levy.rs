//! Mantegna's generator for Lévy-stable step lengths.
//!
//! R. N. Mantegna, "Fast, accurate algorithm for numerical simulation of Lévy
//! stable stochastic processes", Phys. Rev. E 49 (1994).

use std::f64::consts::PI;

use rand::Rng;
use rand_distr::{Distribution, Normal};
use statrs::function::gamma::gamma;
use tapopt_core::{TapOptError, TapOptResult};

/// Heavy-tailed step sampler with stability exponent `beta` in `(0, 2)`.
#[derive(Debug, Clone, Copy)]
pub struct LevyFlight {
    beta: f64,
    sigma_u: f64,
    u: Normal<f64>,
    v: Normal<f64>,
}

impl LevyFlight {
    pub fn new(beta: f64) -> TapOptResult<Self> {
        if !(beta > 0.0 && beta < 2.0) {
            return Err(TapOptError::Config(format!(
                "Lévy exponent must lie in (0, 2), got {beta}"
            )));
        }
        let sigma_u = mantegna_sigma(beta);
        let u = Normal::new(0.0, sigma_u)
            .map_err(|err| TapOptError::Config(format!("Lévy numerator scale: {err}")))?;
        let v = Normal::new(0.0, 1.0)
            .map_err(|err| TapOptError::Config(format!("Lévy denominator scale: {err}")))?;
        Ok(Self { beta, sigma_u, u, v })
    }

    pub fn beta(&self) -> f64 {
        self.beta
    }

    pub fn sigma_u(&self) -> f64 {
        self.sigma_u
    }

    /// One signed step `u / |v|^(1/beta)`. Consumes exactly two normal draws.
    ///
    /// A zero `v` yields an infinite step; callers discard non-finite moves.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        let u = self.u.sample(rng);
        let v = self.v.sample(rng);
        u / v.abs().powf(1.0 / self.beta)
    }
}

/// Standard deviation of the numerator normal in Mantegna's algorithm.
pub fn mantegna_sigma(beta: f64) -> f64 {
    let numerator = gamma(1.0 + beta) * (PI * beta / 2.0).sin();
    let denominator = gamma((1.0 + beta) / 2.0) * beta * 2f64.powf((beta - 1.0) / 2.0);
    (numerator / denominator).powf(1.0 / beta)
}
