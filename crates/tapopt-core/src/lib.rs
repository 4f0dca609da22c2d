//! # tapopt-core: power-factor domain types
//!
//! Shared vocabulary for the tap-operation optimiser:
//!
//! - [`PfVector`] - one power factor per PV inverter, in model order
//! - [`PfBounds`] - the configured feasible domain (`pf_min`, `pf_max`, optional dead zone)
//! - [`PfSanitizer`] - validation and projection of raw search output onto the domain
//! - [`TapOptError`] - error taxonomy shared by the simulation, search and I/O crates
//!
//! ## Quick Start
//!
//! ```rust
//! use tapopt_core::{PfBounds, PfSanitizer};
//!
//! let bounds = PfBounds::new(0.9, 1.0).unwrap();
//! let sanitizer = PfSanitizer::new(bounds, 3).unwrap();
//! let pf = sanitizer.sanitize(&[0.85, 0.97, 1.2]).unwrap();
//! assert_eq!(pf.as_slice(), &[0.9, 0.97, 1.0]);
//! ```

pub mod error;
pub mod pf;
pub mod sanitize;

pub use error::{TapOptError, TapOptResult};
pub use pf::{PfBounds, PfVector};
pub use sanitize::PfSanitizer;
