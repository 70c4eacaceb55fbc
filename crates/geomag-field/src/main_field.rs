//! Internal (main) field evaluators
//!
//! Spherical-harmonic IGRF synthesis in two variants plus the centred
//! (tilted) and eccentric (offset) dipole approximations. All evaluators
//! take GEO Cartesian km and return GEO Cartesian nT.

use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::coeffs::{index, CoefficientSet, DipoleParameters};
use crate::error::{MagFieldError, Result};

/// Below this cos²(mlat) a position counts as on the dipole axis.
const MIN_COS2_MLAT: f64 = 1e-12;

/// Highest degree used by the fast evaluator.
pub const FAST_MAX_DEGREE: usize = 10;

/// Smallest sin(colatitude) used by the series; keeps the 1/sinθ terms finite on the axis.
const MIN_SIN_THETA: f64 = 1.0e-12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MainFieldKind {
    Igrf,
    FastIgrf,
    OffsetDipole,
    TiltedDipole,
}

impl MainFieldKind {
    pub fn is_dipole(self) -> bool {
        matches!(self, MainFieldKind::OffsetDipole | MainFieldKind::TiltedDipole)
    }
}

impl fmt::Display for MainFieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MainFieldKind::Igrf => "IGRF",
            MainFieldKind::FastIgrf => "FastIGRF",
            MainFieldKind::OffsetDipole => "OffsetDipole",
            MainFieldKind::TiltedDipole => "TiltedDipole",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for MainFieldKind {
    type Err = MagFieldError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "igrf" => Ok(MainFieldKind::Igrf),
            "fastigrf" | "fast" => Ok(MainFieldKind::FastIgrf),
            "offsetdipole" | "offset" => Ok(MainFieldKind::OffsetDipole),
            "tilteddipole" | "dipole" | "tilted" => Ok(MainFieldKind::TiltedDipole),
            other => Err(MagFieldError::UnsupportedFieldModel(other.to_string())),
        }
    }
}

// ============================================================================
// Dipoles
// ============================================================================

/// Centred dipole field for a position in Earth radii in the dipole's own
/// Cartesian frame (Z toward the boreal pole).
pub fn dipole_field(moment_nt: f64, v_re: &Vector3<f64>) -> Vector3<f64> {
    let r2 = v_re.norm_squared();
    let r5 = r2 * r2 * r2.sqrt();
    let z = v_re.z;
    Vector3::new(
        -3.0 * moment_nt * v_re.x * z / r5,
        -3.0 * moment_nt * v_re.y * z / r5,
        moment_nt * (r2 - 3.0 * z * z) / r5,
    )
}

// ============================================================================
// Spherical-harmonic synthesis
// ============================================================================

/// Gauss-normalized coefficients and recursion constants for the fast series.
#[derive(Debug, Clone, PartialEq)]
struct FastCoefficients {
    degree: usize,
    g: Vec<f64>,
    h: Vec<f64>,
    k: Vec<f64>,
}

impl FastCoefficients {
    fn prepare(set: &CoefficientSet) -> Self {
        let degree = set.max_degree.min(FAST_MAX_DEGREE);
        let len = index(degree, degree) + 1;
        let mut schmidt = vec![0.0; len];
        let mut g = vec![0.0; len];
        let mut h = vec![0.0; len];
        let mut k = vec![0.0; len];

        schmidt[0] = 1.0;
        for n in 1..=degree {
            schmidt[index(n, 0)] = schmidt[index(n - 1, 0)] * (2 * n - 1) as f64 / n as f64;
            for m in 1..=n {
                let delta = if m == 1 { 2.0 } else { 1.0 };
                schmidt[index(n, m)] = schmidt[index(n, m - 1)]
                    * (((n - m + 1) as f64 * delta) / (n + m) as f64).sqrt();
            }
        }
        for n in 1..=degree {
            for m in 0..=n {
                let i = index(n, m);
                g[i] = schmidt[i] * set.g(n, m);
                h[i] = schmidt[i] * set.h(n, m);
                if n > 1 {
                    let (nf, mf) = (n as f64, m as f64);
                    k[i] = ((nf - 1.0).powi(2) - mf * mf) / ((2.0 * nf - 1.0) * (2.0 * nf - 3.0));
                }
            }
        }
        Self { degree, g, h, k }
    }
}

/// Spherical GEO angles of a Cartesian position.
struct SphericalPoint {
    r: f64,
    sin_theta: f64,
    cos_theta: f64,
    phi: f64,
}

impl SphericalPoint {
    fn new(v: &Vector3<f64>) -> Self {
        let r = v.norm();
        let rho = (v.x * v.x + v.y * v.y).sqrt();
        let theta = rho.atan2(v.z);
        Self {
            r,
            sin_theta: theta.sin().max(MIN_SIN_THETA),
            cos_theta: theta.cos(),
            phi: v.y.atan2(v.x),
        }
    }

    /// (Br, Bθ, Bφ) to GEO Cartesian.
    fn to_cartesian(&self, br: f64, bt: f64, bp: f64) -> Vector3<f64> {
        let (sp, cp) = self.phi.sin_cos();
        let horizontal = br * self.sin_theta + bt * self.cos_theta;
        Vector3::new(
            horizontal * cp - bp * sp,
            horizontal * sp + bp * cp,
            br * self.cos_theta - bt * self.sin_theta,
        )
    }
}

/// Full-degree synthesis with Schmidt semi-normalized Legendre recursion.
fn synthesize_full(set: &CoefficientSet, a_km: f64, v: &Vector3<f64>) -> Vector3<f64> {
    let p = SphericalPoint::new(v);
    let (st, ct) = (p.sin_theta, p.cos_theta);
    let nmax = set.max_degree;
    let len = index(nmax, nmax) + 1;
    let mut pnm = vec![0.0; len];
    let mut dpnm = vec![0.0; len];
    pnm[0] = 1.0;

    for n in 1..=nmax {
        for m in 0..=n {
            let i = index(n, m);
            if n == m {
                if n == 1 {
                    pnm[i] = st;
                    dpnm[i] = ct;
                } else {
                    let k = ((2 * n - 1) as f64 / (2 * n) as f64).sqrt();
                    let j = index(n - 1, n - 1);
                    pnm[i] = k * st * pnm[j];
                    dpnm[i] = k * (ct * pnm[j] + st * dpnm[j]);
                }
            } else {
                let j = index(n - 1, m);
                let s = ((n * n - m * m) as f64).sqrt();
                let (p2, d2, c) = if n >= m + 2 {
                    let l = index(n - 2, m);
                    (pnm[l], dpnm[l], (((n - 1) * (n - 1) - m * m) as f64).sqrt())
                } else {
                    (0.0, 0.0, 0.0)
                };
                let two_n = (2 * n - 1) as f64;
                pnm[i] = (two_n * ct * pnm[j] - c * p2) / s;
                dpnm[i] = (two_n * (ct * dpnm[j] - st * pnm[j]) - c * d2) / s;
            }
        }
    }

    let (mut br, mut bt, mut bp) = (0.0, 0.0, 0.0);
    let ratio = a_km / p.r;
    let mut scale = ratio * ratio;
    for n in 1..=nmax {
        scale *= ratio;
        for m in 0..=n {
            let i = index(n, m);
            let (sm, cm) = (m as f64 * p.phi).sin_cos();
            let (g, h) = (set.g[i], set.h[i]);
            let gh = g * cm + h * sm;
            br += (n + 1) as f64 * scale * gh * pnm[i];
            bt -= scale * gh * dpnm[i];
            bp += scale * m as f64 * (g * sm - h * cm) * pnm[i] / st;
        }
    }
    p.to_cartesian(br, bt, bp)
}

/// Truncated synthesis on prepared Gauss-normalized coefficients.
fn synthesize_fast(fast: &FastCoefficients, a_km: f64, v: &Vector3<f64>) -> Vector3<f64> {
    let p = SphericalPoint::new(v);
    let (st, ct) = (p.sin_theta, p.cos_theta);
    let nmax = fast.degree;
    let len = index(nmax, nmax) + 1;
    let mut pnm = vec![0.0; len];
    let mut dpnm = vec![0.0; len];
    pnm[0] = 1.0;

    let mut cos_m = vec![1.0; nmax + 1];
    let mut sin_m = vec![0.0; nmax + 1];
    let (s1, c1) = p.phi.sin_cos();
    for m in 1..=nmax {
        cos_m[m] = cos_m[m - 1] * c1 - sin_m[m - 1] * s1;
        sin_m[m] = sin_m[m - 1] * c1 + cos_m[m - 1] * s1;
    }

    let (mut br, mut bt, mut bp) = (0.0, 0.0, 0.0);
    let ratio = a_km / p.r;
    let mut scale = ratio * ratio;
    for n in 1..=nmax {
        scale *= ratio;
        for m in 0..=n {
            let i = index(n, m);
            if n == m {
                let j = index(n - 1, n - 1);
                pnm[i] = st * pnm[j];
                dpnm[i] = st * dpnm[j] + ct * pnm[j];
            } else {
                let j = index(n - 1, m);
                let (p2, d2) = if n >= m + 2 {
                    let l = index(n - 2, m);
                    (pnm[l], dpnm[l])
                } else {
                    (0.0, 0.0)
                };
                pnm[i] = ct * pnm[j] - fast.k[i] * p2;
                dpnm[i] = ct * dpnm[j] - st * pnm[j] - fast.k[i] * d2;
            }
            let gh = fast.g[i] * cos_m[m] + fast.h[i] * sin_m[m];
            br += (n + 1) as f64 * scale * gh * pnm[i];
            bt -= scale * gh * dpnm[i];
            bp += scale * m as f64 * (fast.g[i] * sin_m[m] - fast.h[i] * cos_m[m]) * pnm[i] / st;
        }
    }
    p.to_cartesian(br, bt, bp)
}

// ============================================================================
// Model
// ============================================================================

/// Main field for one coefficient epoch.
#[derive(Debug, Clone, PartialEq)]
pub struct MainFieldModel {
    pub kind: MainFieldKind,
    pub coefficients: CoefficientSet,
    pub dipole: DipoleParameters,
    reference_radius_km: f64,
    min_radius_km: f64,
    geo_to_mag: Matrix3<f64>,
    fast: Option<FastCoefficients>,
}

impl MainFieldModel {
    pub fn new(
        kind: MainFieldKind,
        coefficients: CoefficientSet,
        reference_radius_km: f64,
        min_radius_km: f64,
    ) -> Self {
        let dipole = coefficients.dipole(reference_radius_km);
        let fast = match kind {
            MainFieldKind::FastIgrf => Some(FastCoefficients::prepare(&coefficients)),
            _ => None,
        };
        Self {
            kind,
            geo_to_mag: dipole.geo_to_mag(),
            coefficients,
            dipole,
            reference_radius_km,
            min_radius_km,
            fast,
        }
    }

    /// Field at a GEO position [km], GEO components [nT].
    pub fn field_geo(&self, geo_km: &Vector3<f64>) -> Result<Vector3<f64>> {
        let r = geo_km.norm();
        if !r.is_finite() || r == 0.0 {
            return Err(MagFieldError::BadInputCoordinate(format!("{:?}", geo_km)));
        }
        match self.kind {
            MainFieldKind::Igrf | MainFieldKind::FastIgrf if r < self.min_radius_km => {
                Err(MagFieldError::OutOfRange(format!(
                    "radius {:.1} km below model minimum {:.1} km",
                    r, self.min_radius_km
                )))
            }
            MainFieldKind::Igrf => Ok(synthesize_full(
                &self.coefficients,
                self.reference_radius_km,
                geo_km,
            )),
            MainFieldKind::FastIgrf => {
                let fast = self
                    .fast
                    .as_ref()
                    .ok_or_else(|| MagFieldError::NotInitialized("fast coefficients".into()))?;
                Ok(synthesize_fast(fast, self.reference_radius_km, geo_km))
            }
            MainFieldKind::TiltedDipole => Ok(self.dipole_in_geo(geo_km)),
            MainFieldKind::OffsetDipole => {
                Ok(self.dipole_in_geo(&(geo_km - self.dipole.center_geo_km)))
            }
        }
    }

    fn dipole_in_geo(&self, rel_geo_km: &Vector3<f64>) -> Vector3<f64> {
        let mag_re = self.geo_to_mag * rel_geo_km / self.reference_radius_km;
        self.geo_to_mag.transpose() * dipole_field(self.dipole.moment_nt, &mag_re)
    }

    /// Dipole-frame position [Re] for the shell parameter of this model.
    pub fn dipole_frame_re(&self, geo_km: &Vector3<f64>) -> Vector3<f64> {
        let rel = match self.kind {
            MainFieldKind::OffsetDipole => geo_km - self.dipole.center_geo_km,
            _ => *geo_km,
        };
        self.geo_to_mag * rel / self.reference_radius_km
    }

    /// Dipole shell parameter r / cos²(mlat). Undefined on the dipole axis
    /// and at the dipole center.
    pub fn dipole_l(&self, geo_km: &Vector3<f64>) -> Result<f64> {
        let v = self.dipole_frame_re(geo_km);
        let r = v.norm();
        let cos2 = if r > 0.0 { (v.x * v.x + v.y * v.y) / (r * r) } else { 0.0 };
        if cos2 < MIN_COS2_MLAT || !cos2.is_finite() {
            return Err(MagFieldError::OutOfRange(format!(
                "dipole L undefined at {:.1} {:.1} {:.1} km (on the dipole axis)",
                geo_km.x, geo_km.y, geo_km.z
            )));
        }
        Ok(r / cos2)
    }
}
