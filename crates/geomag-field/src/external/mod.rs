//! External (magnetospheric) field models
//!
//! Quiet-time Olson-Pfitzer and disturbed-time Tsyganenko 89c, selected by
//! [`ExternalFieldKind`]. Both work in GSM Earth radii and return GSM nT.

pub mod olson_pfitzer;
pub mod t89;

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

use crate::error::{MagFieldError, Result};
use crate::time::TimeValue;

pub use olson_pfitzer::OlsonPfitzer;
pub use t89::{kp_bin, Tsyganenko89, KP_BINS, MAX_KP};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ExternalFieldKind {
    #[default]
    None,
    /// Olson-Pfitzer 1977
    Quiet,
    /// Tsyganenko 1989c
    Disturbed,
}

impl fmt::Display for ExternalFieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExternalFieldKind::None => "None",
            ExternalFieldKind::Quiet => "OlsonPfitzer",
            ExternalFieldKind::Disturbed => "Tsyganenko89",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for ExternalFieldKind {
    type Err = MagFieldError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(ExternalFieldKind::None),
            "quiet" | "olsonpfitzer" | "op" | "op77" => Ok(ExternalFieldKind::Quiet),
            "disturbed" | "tsyganenko89" | "t89" | "t89c" => Ok(ExternalFieldKind::Disturbed),
            other => Err(MagFieldError::UnsupportedFieldModel(other.to_string())),
        }
    }
}

/// Geomagnetic activity as a continuous Kp or an explicit T89 bin (1..=7).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KpSpec {
    Value(f64),
    Bin(usize),
}

impl Default for KpSpec {
    fn default() -> Self {
        KpSpec::Value(0.0)
    }
}

impl KpSpec {
    pub fn bin(&self) -> Result<usize> {
        match *self {
            KpSpec::Value(kp) => kp_bin(kp),
            KpSpec::Bin(bin) if (1..=KP_BINS).contains(&bin) => Ok(bin),
            KpSpec::Bin(bin) => Err(MagFieldError::BadKpValue(bin as f64)),
        }
    }
}

// ============================================================================
// Kp schedule
// ============================================================================

/// Three-hourly Kp values starting at 00:00 GMT of a reference day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KpSchedule {
    pub reference: TimeValue,
    pub values: Vec<f64>,
}

/// Kp values per day
const KP_PER_DAY: f64 = 8.0;

impl KpSchedule {
    pub fn new(reference: TimeValue, values: Vec<f64>) -> Result<Self> {
        // Reference must sit on a day boundary (one second of slack for float MJD).
        let sod = reference.seconds_of_day();
        if sod > 1.0 && sod < 86_399.0 {
            return Err(MagFieldError::BadInputCoordinate(format!(
                "Kp reference time must be 00:00 GMT, got {:.1} s of day",
                sod
            )));
        }
        if values.is_empty() {
            return Err(MagFieldError::NotInitialized("empty Kp schedule".into()));
        }
        if let Some(bad) = values.iter().find(|kp| !(0.0..=MAX_KP).contains(*kp)) {
            return Err(MagFieldError::BadKpValue(*bad));
        }
        Ok(Self {
            reference: TimeValue::from_mjd(reference.mjd.round()),
            values,
        })
    }

    /// End of the last 3-hour interval covered.
    pub fn end(&self) -> TimeValue {
        self.reference
            .add_days(self.values.len() as f64 / KP_PER_DAY)
    }

    pub fn kp_at(&self, time: &TimeValue) -> Result<f64> {
        let slot = ((time.mjd - self.reference.mjd) * KP_PER_DAY).floor();
        if slot < 0.0 || slot >= self.values.len() as f64 {
            return Err(MagFieldError::OutOfRange(format!(
                "MJD {:.4} outside Kp schedule {:.4}..{:.4}",
                time.mjd,
                self.reference.mjd,
                self.end().mjd
            )));
        }
        Ok(self.values[slot as usize])
    }
}

// ============================================================================
// Selected model
// ============================================================================

/// The active external field with its tilt/activity-dependent state.
#[derive(Debug, Clone)]
pub struct ExternalField {
    kind: ExternalFieldKind,
    tilt: f64,
    quiet: OlsonPfitzer,
    disturbed: Tsyganenko89,
}

impl Default for ExternalField {
    fn default() -> Self {
        Self::new(ExternalFieldKind::None)
    }
}

impl ExternalField {
    pub fn new(kind: ExternalFieldKind) -> Self {
        Self {
            kind,
            tilt: 0.0,
            quiet: OlsonPfitzer::default(),
            disturbed: Tsyganenko89::default(),
        }
    }

    pub fn kind(&self) -> ExternalFieldKind {
        self.kind
    }

    /// Dipole tilt in radians
    pub fn tilt(&self) -> f64 {
        self.tilt
    }

    pub fn set_tilt(&mut self, tilt_rad: f64) {
        if tilt_rad != self.tilt {
            debug!(tilt_deg = tilt_rad.to_degrees(), "external field tilt updated");
        }
        self.tilt = tilt_rad;
        if self.kind == ExternalFieldKind::Quiet {
            self.quiet.set_tilt(tilt_rad);
        }
    }

    pub fn kp_bin(&self) -> usize {
        self.disturbed.bin()
    }

    pub fn set_activity(&mut self, kp: KpSpec) -> Result<()> {
        let bin = kp.bin()?;
        if bin != self.disturbed.bin() {
            debug!(bin, "T89 parameter set selected");
            self.disturbed.set_bin(bin)?;
        }
        Ok(())
    }

    /// Whether a GSM position (Re) is inside the model's validity region.
    pub fn in_bounds(&self, gsm_re: &Vector3<f64>) -> bool {
        match self.kind {
            ExternalFieldKind::None => true,
            ExternalFieldKind::Quiet => !OlsonPfitzer::out_of_range(gsm_re),
            ExternalFieldKind::Disturbed => !Tsyganenko89::out_of_range(gsm_re),
        }
    }

    pub fn field_gsm(&self, gsm_re: &Vector3<f64>) -> Result<Vector3<f64>> {
        match self.kind {
            ExternalFieldKind::None => Ok(Vector3::zeros()),
            ExternalFieldKind::Quiet => self.quiet.field_gsm(gsm_re),
            ExternalFieldKind::Disturbed => self.disturbed.field_gsm(self.tilt, gsm_re),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_parse() {
        assert_eq!("T89".parse::<ExternalFieldKind>().unwrap(), ExternalFieldKind::Disturbed);
        assert_eq!("op77".parse::<ExternalFieldKind>().unwrap(), ExternalFieldKind::Quiet);
        assert_eq!("None".parse::<ExternalFieldKind>().unwrap(), ExternalFieldKind::None);
        assert!("t96".parse::<ExternalFieldKind>().is_err());
        let shown = ExternalFieldKind::Quiet.to_string();
        assert_eq!(shown.parse::<ExternalFieldKind>().unwrap(), ExternalFieldKind::Quiet);
    }

    #[test]
    fn test_kp_spec_bins() {
        assert_eq!(KpSpec::Value(3.0).bin().unwrap(), 4);
        assert_eq!(KpSpec::Bin(7).bin().unwrap(), 7);
        assert!(matches!(KpSpec::Bin(0).bin(), Err(MagFieldError::BadKpValue(_))));
        assert!(matches!(KpSpec::Value(9.1).bin(), Err(MagFieldError::BadKpValue(_))));
    }

    #[test]
    fn test_kp_spec_serde() {
        let json = serde_json::to_string(&KpSpec::Bin(3)).unwrap();
        assert_eq!(json, r#"{"bin":3}"#);
        let back: KpSpec = serde_json::from_str(r#"{"value":4.5}"#).unwrap();
        assert_eq!(back, KpSpec::Value(4.5));
    }

    #[test]
    fn test_kp_schedule_lookup() {
        let day = TimeValue::from_mjd(58849.0);
        let schedule = KpSchedule::new(day, vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(schedule.kp_at(&day).unwrap(), 1.0);
        assert_eq!(schedule.kp_at(&day.add_days(0.126)).unwrap(), 2.0);
        assert_eq!(schedule.kp_at(&day.add_days(0.49)).unwrap(), 4.0);
        assert!(schedule.kp_at(&day.add_days(0.5)).is_err());
        assert!(schedule.kp_at(&day.add_days(-0.01)).is_err());
        assert!((schedule.end().mjd - 58849.5).abs() < 1e-12);
    }

    #[test]
    fn test_kp_schedule_validation() {
        let noon = TimeValue::from_mjd(58849.5);
        assert!(KpSchedule::new(noon, vec![1.0]).is_err());
        let day = TimeValue::from_mjd(58849.0);
        assert!(matches!(
            KpSchedule::new(day, vec![1.0, 12.0]),
            Err(MagFieldError::BadKpValue(_))
        ));
        assert!(KpSchedule::new(day, vec![]).is_err());
    }

    #[test]
    fn test_none_is_zero_everywhere() {
        let field = ExternalField::default();
        let b = field.field_gsm(&Vector3::new(-100.0, 0.0, 0.0)).unwrap();
        assert_eq!(b, Vector3::zeros());
        assert!(field.in_bounds(&Vector3::new(500.0, 0.0, 0.0)));
    }

    #[test]
    fn test_disturbed_activity_switch() {
        let mut field = ExternalField::new(ExternalFieldKind::Disturbed);
        field.set_tilt(0.1);
        let p = Vector3::new(-6.0, 1.0, 0.5);
        let quiet = field.field_gsm(&p).unwrap();
        field.set_activity(KpSpec::Value(6.0)).unwrap();
        assert_eq!(field.kp_bin(), 7);
        let storm = field.field_gsm(&p).unwrap();
        assert!((quiet - storm).norm() > 1.0);
        assert!(!field.in_bounds(&Vector3::new(-75.0, 0.0, 0.0)));
    }

    #[test]
    fn test_quiet_follows_tilt() {
        let mut field = ExternalField::new(ExternalFieldKind::Quiet);
        let p = Vector3::new(3.0, 0.0, 2.0);
        field.set_tilt(0.0);
        let b0 = field.field_gsm(&p).unwrap();
        field.set_tilt(0.4);
        let b1 = field.field_gsm(&p).unwrap();
        assert!((b0 - b1).norm() > 1e-3);
        assert!(field.field_gsm(&Vector3::new(0.0, 0.0, 20.0)).is_err());
    }
}
