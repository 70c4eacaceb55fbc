//! Adiabatic Coordinate Calculators
//!
//! Fast (X2, X3) invariant coordinates for radiation-belt flux mapping:
//! equatorial pitch angle and Lm, K and Φ, K and Hmin. Inputs come from one
//! field-line trace per position ([`geomag_field::MagField`]); Φ and Hmin
//! are approximated by small two-layer networks instead of drift-shell
//! tracing.

pub mod calculators;
pub mod coordinate_set;
pub mod network;
pub mod store;

pub use calculators::{
    lstar_from_phi, AlphaLm, Bounds, CoordCalculator, CoordInputs, CoordPair, KHmin, KPhi,
    SurrogateLimits,
};
pub use coordinate_set::{CoordinateModel, CoordinateSet};
pub use network::{Activation, Network, SurrogateModel};
pub use store::{SurrogateStore, K_HMIN_TABLE, K_PHI_TABLE};
