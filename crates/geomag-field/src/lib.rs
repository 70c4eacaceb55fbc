//! Geomagnetic Field Engine
//!
//! Main-field (IGRF full/fast, tilted and offset dipole) and external-field
//! (Olson-Pfitzer 1977 quiet, Tsyganenko 1989c disturbed) evaluation, a
//! 28-identifier coordinate transform fabric hubbed on GEI, adaptive
//! field-line tracing and adiabatic invariants (L, Lm, I, K, Bmirror, Bmin).
//!
//! # Layers
//!
//! ```text
//! CoefficientStore -> TimeCache -> MainFieldModel + ExternalField
//!                                       |
//!                  FrameRotations -> tracer -> invariants -> MagField
//! ```
//!
//! The working frame for tracing is GSM in Earth radii. Public positions are
//! tagged [`Position`] values in any [`CoordSys`].

pub mod coeffs;
pub mod config;
pub mod coords;
pub mod engine;
pub mod error;
pub mod external;
pub mod invariants;
pub mod main_field;
pub mod time;
pub mod tracer;

pub use coeffs::{CoefficientSet, CoefficientStore, DipoleParameters};
pub use config::{FieldModelConfig, LSearchConfig, ShellMode, TiltMode, TraceDirection, TracerConfig};
pub use coords::{CoordSys, FrameRotations, Position};
pub use engine::{BOutputs, FieldLine, FieldValue, Footprint, LBBeq, MagField};
pub use error::{MagFieldError, Result};
pub use external::{ExternalFieldKind, KpSchedule, KpSpec};
pub use invariants::{AdiabaticInvariantSet, PitchAngleInvariants};
pub use main_field::{MainFieldKind, MainFieldModel};
pub use time::{TimeValue, UpdateRates};
pub use tracer::{FieldLineTrace, FieldSource, TraceStatus};

/// Geomagnetic reference radius (IGRF), km
pub const EARTH_RADIUS_KM: f64 = 6371.2;
