//! Spherical-harmonic coefficient store
//!
//! Holds Gauss coefficient tables keyed by epoch year. Tables are immutable
//! once loaded and shared between engine instances through `Arc`.

use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use tracing::{debug, info};

use crate::error::{MagFieldError, Result};

/// Embedded IGRF-13 table: definitive epochs 1900-2015 every five years plus
/// the 2020 epoch with its 2020-2025 secular variation.
const IGRF13_JSON: &str = include_str!("../data/igrf13.json");

/// Secular variation is not applied beyond this many years past the last epoch.
pub const MAX_EXTRAPOLATION_YEARS: f64 = 5.0;

/// Index of (n, m) in the flattened triangular layout.
#[inline]
pub fn index(n: usize, m: usize) -> usize {
    n * (n + 1) / 2 + m
}

fn triangle_len(max_degree: usize) -> usize {
    (max_degree + 1) * (max_degree + 2) / 2
}

// ============================================================================
// Wire format
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelFile {
    pub model: String,
    pub reference_radius_km: f64,
    pub epochs: Vec<EpochRecord>,
}

/// `terms` rows are `[n, m, g, h]`; `secular_variation` rows are `[n, m, dg/dt, dh/dt]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpochRecord {
    pub year: i32,
    pub max_degree: usize,
    pub terms: Vec<(usize, usize, f64, f64)>,
    #[serde(default)]
    pub secular_variation: Vec<(usize, usize, f64, f64)>,
}

// ============================================================================
// Coefficient sets
// ============================================================================

/// Schmidt semi-normalized Gauss coefficients for one epoch, in nT.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoefficientSet {
    pub epoch: f64,
    pub max_degree: usize,
    pub g: Vec<f64>,
    pub h: Vec<f64>,
    /// Per-year rates, same layout as `g`/`h`.
    pub secular_variation: Option<(Vec<f64>, Vec<f64>)>,
}

impl CoefficientSet {
    pub fn from_record(record: &EpochRecord) -> Result<Self> {
        let len = triangle_len(record.max_degree);
        let mut g = vec![0.0; len];
        let mut h = vec![0.0; len];
        for &(n, m, gv, hv) in &record.terms {
            if n == 0 || n > record.max_degree || m > n {
                return Err(MagFieldError::OutOfRange(format!(
                    "term ({}, {}) in epoch {}",
                    n, m, record.year
                )));
            }
            g[index(n, m)] = gv;
            h[index(n, m)] = hv;
        }

        let secular_variation = if record.secular_variation.is_empty() {
            None
        } else {
            let mut gd = vec![0.0; len];
            let mut hd = vec![0.0; len];
            for &(n, m, gv, hv) in &record.secular_variation {
                if n == 0 || n > record.max_degree || m > n {
                    return Err(MagFieldError::OutOfRange(format!(
                        "secular term ({}, {}) in epoch {}",
                        n, m, record.year
                    )));
                }
                gd[index(n, m)] = gv;
                hd[index(n, m)] = hv;
            }
            Some((gd, hd))
        };

        Ok(Self {
            epoch: f64::from(record.year),
            max_degree: record.max_degree,
            g,
            h,
            secular_variation,
        })
    }

    pub fn g(&self, n: usize, m: usize) -> f64 {
        if n > self.max_degree {
            return 0.0;
        }
        self.g[index(n, m)]
    }

    pub fn h(&self, n: usize, m: usize) -> f64 {
        if n > self.max_degree {
            return 0.0;
        }
        self.h[index(n, m)]
    }

    /// Linear blend between two epochs; missing degrees count as zero.
    fn interpolate(a: &CoefficientSet, b: &CoefficientSet, year: f64) -> CoefficientSet {
        let max_degree = a.max_degree.max(b.max_degree);
        let len = triangle_len(max_degree);
        let w = (year - a.epoch) / (b.epoch - a.epoch);
        let mut g = vec![0.0; len];
        let mut h = vec![0.0; len];
        for n in 1..=max_degree {
            for m in 0..=n {
                let i = index(n, m);
                g[i] = a.g(n, m) + w * (b.g(n, m) - a.g(n, m));
                h[i] = a.h(n, m) + w * (b.h(n, m) - a.h(n, m));
            }
        }
        CoefficientSet {
            epoch: year,
            max_degree,
            g,
            h,
            secular_variation: None,
        }
    }

    fn extrapolate(&self, year: f64) -> CoefficientSet {
        let dt = year - self.epoch;
        let mut out = self.clone();
        out.epoch = year;
        if let Some((gd, hd)) = &self.secular_variation {
            for i in 0..out.g.len() {
                out.g[i] += gd[i] * dt;
                out.h[i] += hd[i] * dt;
            }
        }
        out
    }

    /// Dipole moment, axis and eccentric centre derived from degrees 1 and 2.
    pub fn dipole(&self, reference_radius_km: f64) -> DipoleParameters {
        let g10 = self.g(1, 0);
        let g11 = self.g(1, 1);
        let h11 = self.h(1, 1);
        let b0_sq = g10 * g10 + g11 * g11 + h11 * h11;
        let b0 = b0_sq.sqrt();

        let pole_colatitude = (-g10 / b0).acos();
        let pole_longitude = (-h11).atan2(-g11);
        let axis_geo = Vector3::new(
            pole_colatitude.sin() * pole_longitude.cos(),
            pole_colatitude.sin() * pole_longitude.sin(),
            pole_colatitude.cos(),
        );

        let sqrt3 = 3.0_f64.sqrt();
        let (g20, g21, h21, g22, h22) = (
            self.g(2, 0),
            self.g(2, 1),
            self.h(2, 1),
            self.g(2, 2),
            self.h(2, 2),
        );
        let l0 = 2.0 * g10 * g20 + sqrt3 * (g11 * g21 + h11 * h21);
        let l1 = -g11 * g20 + sqrt3 * (g10 * g21 + g11 * g22 + h11 * h22);
        let l2 = -h11 * g20 + sqrt3 * (g10 * h21 - h11 * g22 + g11 * h22);
        let e = (l0 * g10 + l1 * g11 + l2 * h11) / (4.0 * b0_sq);
        let center_geo_km = Vector3::new(
            reference_radius_km * (l1 - g11 * e) / (3.0 * b0_sq),
            reference_radius_km * (l2 - h11 * e) / (3.0 * b0_sq),
            reference_radius_km * (l0 - g10 * e) / (3.0 * b0_sq),
        );

        DipoleParameters {
            moment_nt: b0,
            pole_colatitude,
            pole_longitude,
            axis_geo,
            center_geo_km,
        }
    }
}

/// Geocentric dipole description; angles in radians.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DipoleParameters {
    /// Equatorial surface field of the dipole, sqrt(g10² + g11² + h11²).
    pub moment_nt: f64,
    /// Colatitude of the boreal geomagnetic pole.
    pub pole_colatitude: f64,
    pub pole_longitude: f64,
    /// Unit vector toward the boreal pole, GEO.
    pub axis_geo: Vector3<f64>,
    /// Eccentric dipole centre, GEO km.
    pub center_geo_km: Vector3<f64>,
}

impl DipoleParameters {
    /// Rows are the MAG axes expressed in GEO.
    pub fn geo_to_mag(&self) -> Matrix3<f64> {
        let (st, ct) = self.pole_colatitude.sin_cos();
        let (sp, cp) = self.pole_longitude.sin_cos();
        Matrix3::new(ct * cp, ct * sp, -st, -sp, cp, 0.0, st * cp, st * sp, ct)
    }
}

// ============================================================================
// Store
// ============================================================================

#[derive(Debug, Clone)]
pub struct CoefficientStore {
    pub model: String,
    pub reference_radius_km: f64,
    sets: BTreeMap<i32, CoefficientSet>,
}

impl CoefficientStore {
    pub fn from_model_file(file: ModelFile) -> Result<Self> {
        if file.epochs.is_empty() {
            return Err(MagFieldError::NoDatabase);
        }
        let mut sets = BTreeMap::new();
        for record in &file.epochs {
            sets.insert(record.year, CoefficientSet::from_record(record)?);
        }
        info!(
            "Loaded {} coefficient epochs for {} ({}-{})",
            sets.len(),
            file.model,
            sets.keys().next().copied().unwrap_or_default(),
            sets.keys().next_back().copied().unwrap_or_default()
        );
        Ok(Self {
            model: file.model,
            reference_radius_km: file.reference_radius_km,
            sets,
        })
    }

    pub fn from_json_reader<R: Read>(reader: R) -> Result<Self> {
        let file: ModelFile = serde_json::from_reader(reader)?;
        Self::from_model_file(file)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading coefficient tables from {}", path.display());
        let file = File::open(path)?;
        Self::from_json_reader(BufReader::new(file))
    }

    /// The built-in IGRF-13 table.
    pub fn igrf13() -> Result<Self> {
        let file: ModelFile = serde_json::from_str(IGRF13_JSON)?;
        Self::from_model_file(file)
    }

    pub fn years(&self) -> Vec<i32> {
        self.sets.keys().copied().collect()
    }

    pub fn load_year_table(&self, year: i32) -> Result<&CoefficientSet> {
        self.sets
            .get(&year)
            .ok_or_else(|| MagFieldError::NotFound(format!("coefficient table for {}", year)))
    }

    /// Coefficients for a decimal year: interpolated inside the table,
    /// extrapolated with secular variation for a limited span after it.
    pub fn coefficients_at(&self, year: f64) -> Result<CoefficientSet> {
        let (first, first_set) = self.sets.iter().next().ok_or(MagFieldError::NoDatabase)?;
        let (last, last_set) = self.sets.iter().next_back().ok_or(MagFieldError::NoDatabase)?;

        if year < f64::from(*first) {
            return Err(MagFieldError::NotInitialized(format!(
                "year {:.3} precedes coefficient coverage ({})",
                year, first
            )));
        }
        if year >= f64::from(*last) {
            let span = year - f64::from(*last);
            if span > 0.0
                && (last_set.secular_variation.is_none() || span > MAX_EXTRAPOLATION_YEARS)
            {
                return Err(MagFieldError::NotInitialized(format!(
                    "year {:.3} beyond coefficient coverage ({})",
                    year, last
                )));
            }
            debug!("Extrapolating {} coefficients to {:.3}", self.model, year);
            return Ok(last_set.extrapolate(year));
        }

        let lower = year.floor() as i32;
        let (_, a) = self
            .sets
            .range(..=lower)
            .next_back()
            .unwrap_or((first, first_set));
        let (_, b) = self
            .sets
            .range(lower + 1..)
            .next()
            .unwrap_or((last, last_set));
        if (year - a.epoch).abs() < f64::EPSILON {
            return Ok(a.clone());
        }
        Ok(CoefficientSet::interpolate(a, b, year))
    }
}
