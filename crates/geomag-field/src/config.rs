//! Field model configuration
//!
//! Everything an engine instance needs to know about which models to combine
//! and how to trace. Deserializable from JSON; `validate` enforces the
//! option combinations the tracer supports.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{MagFieldError, Result};
use crate::external::{ExternalFieldKind, KpSpec};
use crate::main_field::MainFieldKind;
use crate::time::UpdateRates;
use crate::EARTH_RADIUS_KM;

/// Lowest trace altitude accepted with the IGRF main fields.
pub const MIN_IGRF_TRACE_ALTITUDE_KM: f64 = -100.0;

/// Radial threshold for Lm traces, Re.
pub const LM_THRESHOLD_RE: f64 = 0.9;
/// Legacy threshold used in compatibility mode.
pub const LM_THRESHOLD_COMPAT_RE: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TraceDirection {
    /// Follow +B (toward the northern footprint)
    North,
    /// Follow -B
    South,
    #[default]
    NorthAndSouth,
    /// Stop at the first local minimum of |B|
    GsmEquator,
}

impl fmt::Display for TraceDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TraceDirection::North => "North",
            TraceDirection::South => "South",
            TraceDirection::NorthAndSouth => "NorthAndSouth",
            TraceDirection::GsmEquator => "GsmEquator",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for TraceDirection {
    type Err = MagFieldError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "north" | "n" => Ok(TraceDirection::North),
            "south" | "s" => Ok(TraceDirection::South),
            "northandsouth" | "both" | "ns" => Ok(TraceDirection::NorthAndSouth),
            "gsmequator" | "equator" | "eq" => Ok(TraceDirection::GsmEquator),
            other => Err(MagFieldError::UnsupportedOption(format!(
                "trace direction {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ShellMode {
    /// r / cos²(mlat) of the model dipole
    Dipole,
    /// Lm from a traced (I, Bmirror) pair
    #[default]
    McIlwain,
}

impl fmt::Display for ShellMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShellMode::Dipole => write!(f, "Dipole"),
            ShellMode::McIlwain => write!(f, "McIlwain"),
        }
    }
}

impl FromStr for ShellMode {
    type Err = MagFieldError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "dipole" | "d" | "ldip" => Ok(ShellMode::Dipole),
            "mcilwain" | "m" | "lm" => Ok(ShellMode::McIlwain),
            other => Err(MagFieldError::UnsupportedOption(format!("shell mode {}", other))),
        }
    }
}

/// Dipole tilt source for the external models.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TiltMode {
    /// From the dipole axis and Sun direction at the rotation epoch
    #[default]
    Computed,
    /// Fixed tilt in degrees
    Fixed(f64),
}

// ============================================================================
// Numerical tuning
// ============================================================================

/// Adaptive field-line integrator settings. Lengths in Earth radii.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TracerConfig {
    /// Step ceiling per direction
    pub max_steps: usize,
    /// Local truncation error target per step
    pub tolerance: f64,
    pub initial_step_re: f64,
    pub min_step_re: f64,
    /// Upper step bound as a fraction of geocentric distance
    pub max_step_fraction: f64,
    /// Traces reaching this distance are open
    pub max_radius_re: f64,
    /// Arc-length resolution of the Bmin refinement
    pub bmin_tolerance_re: f64,
}

impl Default for TracerConfig {
    fn default() -> Self {
        Self {
            max_steps: 20_000,
            tolerance: 1.0e-7,
            initial_step_re: 0.01,
            min_step_re: 1.0e-4,
            max_step_fraction: 0.1,
            max_radius_re: 60.0,
            bmin_tolerance_re: 1.0e-5,
        }
    }
}

/// Lm search settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LSearchConfig {
    /// Convergence on the dipole mirror latitude, radians
    pub tolerance: f64,
    pub max_iterations: usize,
    /// Gauss-Legendre nodes of the dipole I integral
    pub quadrature_points: usize,
}

impl Default for LSearchConfig {
    fn default() -> Self {
        Self {
            tolerance: 1.0e-10,
            max_iterations: 100,
            quadrature_points: 32,
        }
    }
}

// ============================================================================
// Model configuration
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldModelConfig {
    pub main_field: MainFieldKind,
    pub external_field: ExternalFieldKind,
    pub trace_direction: TraceDirection,
    pub shell_mode: ShellMode,
    pub kp: KpSpec,
    pub tilt: TiltMode,
    /// Field-line trace and footprint altitude
    pub trace_altitude_km: f64,
    /// Use the legacy 1.0 Re Lm threshold instead of 0.9 Re.
    /// Deprecated, retained for reproducing older runs.
    pub compat_mode: bool,
    /// IGRF evaluations below this radius are out of range
    pub min_field_radius_re: f64,
    /// Replace the year of every input time with this one
    pub override_year: Option<i32>,
    pub rates: UpdateRates,
    pub tracer: TracerConfig,
    pub l_search: LSearchConfig,
    /// Coefficient table (JSON); the embedded IGRF-13 table when unset
    pub coefficient_file: Option<PathBuf>,
}

impl Default for FieldModelConfig {
    fn default() -> Self {
        Self {
            main_field: MainFieldKind::Igrf,
            external_field: ExternalFieldKind::None,
            trace_direction: TraceDirection::NorthAndSouth,
            shell_mode: ShellMode::McIlwain,
            kp: KpSpec::default(),
            tilt: TiltMode::Computed,
            trace_altitude_km: 100.0,
            compat_mode: false,
            min_field_radius_re: 0.5,
            override_year: None,
            rates: UpdateRates::default(),
            tracer: TracerConfig::default(),
            l_search: LSearchConfig::default(),
            coefficient_file: None,
        }
    }
}

impl FieldModelConfig {
    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Reject option combinations the engine cannot honour.
    pub fn validate(&self) -> Result<()> {
        if self.main_field.is_dipole() && self.external_field != ExternalFieldKind::None {
            return Err(MagFieldError::UnsupportedOption(format!(
                "{} main field cannot be combined with {} external field",
                self.main_field, self.external_field
            )));
        }
        if self.main_field == MainFieldKind::OffsetDipole && self.shell_mode == ShellMode::McIlwain
        {
            return Err(MagFieldError::UnsupportedOption(
                "McIlwain shell mode is not available with the offset dipole".into(),
            ));
        }
        if self.main_field.is_dipole() && self.trace_direction == TraceDirection::GsmEquator {
            return Err(MagFieldError::UnsupportedOption(
                "dipole main fields cannot trace to the GSM equator".into(),
            ));
        }
        if !self.main_field.is_dipole() && self.trace_altitude_km < MIN_IGRF_TRACE_ALTITUDE_KM {
            return Err(MagFieldError::UnsupportedOption(format!(
                "trace altitude {} km below {} km for IGRF",
                self.trace_altitude_km, MIN_IGRF_TRACE_ALTITUDE_KM
            )));
        }
        if !self.trace_altitude_km.is_finite() || self.trace_radius_km() <= 0.0 {
            return Err(MagFieldError::OutOfRange(format!(
                "trace altitude {} km",
                self.trace_altitude_km
            )));
        }
        self.kp.bin()?;
        if let TiltMode::Fixed(deg) = self.tilt {
            if !(-90.0..=90.0).contains(&deg) {
                return Err(MagFieldError::OutOfRange(format!("tilt {} deg", deg)));
            }
        }
        let t = &self.tracer;
        if t.max_steps == 0
            || t.tolerance <= 0.0
            || t.min_step_re <= 0.0
            || t.initial_step_re < t.min_step_re
            || t.max_step_fraction <= 0.0
            || t.max_radius_re <= 1.0
            || t.bmin_tolerance_re <= 0.0
        {
            return Err(MagFieldError::OutOfRange(format!("tracer settings {:?}", t)));
        }
        if self.l_search.tolerance <= 0.0
            || self.l_search.max_iterations == 0
            || self.l_search.quadrature_points < 2
        {
            return Err(MagFieldError::OutOfRange(format!(
                "L search settings {:?}",
                self.l_search
            )));
        }
        if self.min_field_radius_re <= 0.0 {
            return Err(MagFieldError::OutOfRange(format!(
                "minimum field radius {} Re",
                self.min_field_radius_re
            )));
        }
        Ok(())
    }

    /// Geocentric radius of the trace sphere, km
    pub fn trace_radius_km(&self) -> f64 {
        EARTH_RADIUS_KM + self.trace_altitude_km
    }

    /// Radius the Lm traces stop at, Re
    pub fn lm_threshold_re(&self) -> f64 {
        if self.compat_mode {
            LM_THRESHOLD_COMPAT_RE
        } else {
            LM_THRESHOLD_RE
        }
    }
}
