//! Adiabatic invariants along a traced field line
//!
//! Mirror field, bounce points, the second invariant I and McIlwain's Lm.
//! Everything here works on a finished [`FieldLineTrace`] plus the field
//! source that produced it, so intermediate positions are reached by
//! re-integrating from the nearest stored sample.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::f64::consts::FRAC_PI_2;

use crate::config::LSearchConfig;
use crate::error::{MagFieldError, Result};
use crate::tracer::{illinois, FieldLineTrace, FieldSource, Stepper, TracePoint};

/// nT to Gauss
const NT_TO_GAUSS: f64 = 1.0e-5;

/// Mirror fields this close to Bmin give I = 0.
const BMIRROR_AT_MINIMUM: f64 = 1.0e-12;

/// Upper limit of the dipole mirror latitude bracket, radians
const MAX_MIRROR_LATITUDE: f64 = FRAC_PI_2 - 1.0e-6;

const GAUSS_LEGENDRE_END_POINTS: usize = 12;

/// Whole segments next to each mirror point handled by the end quadrature
const END_SEGMENTS: usize = 2;

// ============================================================================
// Results
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PitchAngleInvariants {
    /// Equatorial pitch angle, degrees
    pub pitch_angle: f64,
    pub lm: f64,
    /// Second invariant, Re
    pub i: f64,
    /// I·sqrt(Bmirror), Re·G^½
    pub k: f64,
    /// nT
    pub bmirror: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdiabaticInvariantSet {
    /// One entry per requested pitch angle, in request order
    pub pitch: Vec<PitchAngleInvariants>,
    /// nT
    pub bmin: f64,
    /// GEO km
    pub bmin_position: Vector3<f64>,
    /// Local field, GEO nT
    pub b_vector: Vector3<f64>,
    pub b_local: f64,
    /// Magnetic local time of the seed, hours
    pub mlt: f64,
    pub shabansky: bool,
}

// ============================================================================
// Pitch angles
// ============================================================================

/// Sine of each pitch angle in degrees; only the open interval (0, 180) is valid.
pub fn pitch_angle_sines(angles_deg: &[f64]) -> Result<Vec<f64>> {
    angles_deg
        .iter()
        .map(|&a| {
            if a.is_finite() && a > 0.0 && a < 180.0 {
                Ok(a.to_radians().sin())
            } else {
                Err(MagFieldError::BadPitchAngle(a))
            }
        })
        .collect()
}

/// Indices ordered by descending sine, i.e. from 90° outward.
pub fn processing_order(sines: &[f64]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..sines.len()).collect();
    order.sort_by(|&a, &b| sines[b].total_cmp(&sines[a]));
    order
}

/// Mirror field of an equatorial pitch angle with sine `sin_alpha`.
pub fn mirror_field(bmin: f64, sin_alpha: f64) -> f64 {
    bmin / (sin_alpha * sin_alpha)
}

/// Local pitch angle [deg] of a look direction relative to the field.
pub fn local_pitch_angle(direction: &Vector3<f64>, b: &Vector3<f64>) -> Result<f64> {
    let (dn, bn) = (direction.norm(), b.norm());
    if !(dn > 0.0 && bn > 0.0 && dn.is_finite() && bn.is_finite()) {
        return Err(MagFieldError::BadInputCoordinate(format!(
            "look direction {:?}",
            direction
        )));
    }
    Ok((direction.dot(b) / (dn * bn)).clamp(-1.0, 1.0).acos().to_degrees())
}

// ============================================================================
// Field along a stored line
// ============================================================================

/// |B| anywhere on a traced line, addressed by arc length.
pub struct LinePath<'a, S: FieldSource + ?Sized> {
    trace: &'a FieldLineTrace,
    stepper: Stepper<'a, S>,
}

impl<'a, S: FieldSource + ?Sized> LinePath<'a, S> {
    pub fn new(trace: &'a FieldLineTrace, source: &'a S) -> Self {
        Self {
            trace,
            stepper: Stepper::new(source, 1.0),
        }
    }

    fn points(&self) -> &[TracePoint] {
        &self.trace.points
    }

    /// Index of the stored sample closest to `s`.
    fn anchor(&self, s: f64) -> usize {
        let pts = self.points();
        let i = pts.partition_point(|p| p.s <= s);
        if i == 0 {
            0
        } else if i == pts.len() || s - pts[i - 1].s <= pts[i].s - s {
            i - 1
        } else {
            i
        }
    }

    pub fn position_at(&self, s: f64) -> Result<Vector3<f64>> {
        let a = self.points()[self.anchor(s)];
        self.stepper.advance_from(&a.position, s - a.s)
    }

    pub fn b_at(&self, s: f64) -> Result<f64> {
        let pts = self.points();
        let a = pts[self.anchor(s)];
        if s == a.s {
            return Ok(a.b);
        }
        self.stepper.magnitude(&self.position_at(s)?)
    }

    /// Arc length between `from_s` (|B| ≥ bm) and `to_s` where |B| = bm.
    fn crossing(&self, from_s: f64, to_s: f64, bm: f64) -> Result<f64> {
        let g = |s: f64| -> Result<f64> { Ok(self.b_at(s)? / bm - 1.0) };
        let ga = g(from_s)?;
        let gb = g(to_s)?;
        if ga * gb > 0.0 {
            return Ok(if ga.abs() < gb.abs() { from_s } else { to_s });
        }
        illinois(g, from_s, to_s, ga, gb)
    }
}

/// Walks both branches of a line outward from Bmin, remembering where the
/// previous mirror point was found. Mirror fields must be supplied in
/// non-decreasing order.
pub struct BounceFinder<'a, S: FieldSource + ?Sized> {
    path: &'a LinePath<'a, S>,
    south_cursor: usize,
    north_cursor: usize,
}

impl<'a, S: FieldSource + ?Sized> BounceFinder<'a, S> {
    pub fn new(path: &'a LinePath<'a, S>) -> Self {
        let pts = path.points();
        let s_min = path.trace.bmin.s;
        let north = pts.partition_point(|p| p.s < s_min).min(pts.len() - 1);
        let south = pts.partition_point(|p| p.s <= s_min).saturating_sub(1);
        Self {
            path,
            south_cursor: south,
            north_cursor: north,
        }
    }

    /// Southern and northern mirror arc lengths for mirror field `bm`.
    pub fn bounce_points(&mut self, bm: f64) -> Result<(f64, f64)> {
        let pts = self.path.points();
        let s_min = self.path.trace.bmin.s;

        let mut j = self.south_cursor;
        while pts[j].b < bm {
            if j == 0 {
                return Err(below_threshold(bm));
            }
            j -= 1;
        }
        self.south_cursor = j;
        let upper = if j + 1 < pts.len() && pts[j + 1].s < s_min {
            pts[j + 1].s
        } else {
            s_min
        };
        let south = self.path.crossing(pts[j].s, upper, bm)?;

        let mut k = self.north_cursor;
        while pts[k].b < bm {
            if k + 1 == pts.len() {
                return Err(below_threshold(bm));
            }
            k += 1;
        }
        self.north_cursor = k;
        let lower = if k > 0 && pts[k - 1].s > s_min {
            pts[k - 1].s
        } else {
            s_min
        };
        let north = self.path.crossing(pts[k].s, lower, bm)?;
        Ok((south, north))
    }
}

fn below_threshold(bm: f64) -> MagFieldError {
    MagFieldError::FieldLineInsideEarthSphere(format!(
        "mirror point for {:.2} nT lies below the trace sphere",
        bm
    ))
}

// ============================================================================
// Second invariant
// ============================================================================

/// Gauss-Legendre nodes and weights on [0, 1].
pub fn gauss_legendre(n: usize) -> Vec<(f64, f64)> {
    let mut out = Vec::with_capacity(n);
    for i in 0..n {
        let mut x = (std::f64::consts::PI * (i as f64 + 0.75) / (n as f64 + 0.5)).cos();
        let mut dp = 1.0;
        for _ in 0..100 {
            let (mut p0, mut p1) = (1.0, x);
            for k in 2..=n {
                let kf = k as f64;
                let p2 = ((2.0 * kf - 1.0) * x * p1 - (kf - 1.0) * p0) / kf;
                p0 = p1;
                p1 = p2;
            }
            dp = n as f64 * (x * p1 - p0) / (x * x - 1.0);
            let dx = p1 / dp;
            x -= dx;
            if dx.abs() < 1.0e-15 {
                break;
            }
        }
        let w = 2.0 / ((1.0 - x * x) * dp * dp);
        out.push((0.5 * (1.0 - x), 0.5 * w));
    }
    out
}

fn integrand(b: f64, bm: f64) -> f64 {
    (1.0 - b / bm).max(0.0).sqrt()
}

/// ∫ sqrt(1 - B/bm) ds from a mirror point `s_bounce` to `s_far`, with the
/// substitution s = s_bounce + d·v² that removes the square-root edge.
fn end_piece<S: FieldSource + ?Sized>(
    path: &LinePath<'_, S>,
    nodes: &[(f64, f64)],
    s_bounce: f64,
    s_far: f64,
    bm: f64,
) -> Result<f64> {
    let d = s_far - s_bounce;
    if d == 0.0 {
        return Ok(0.0);
    }
    let mut sum = 0.0;
    for &(v, w) in nodes {
        let s = s_bounce + d * v * v;
        sum += w * integrand(path.b_at(s)?, bm) * 2.0 * v;
    }
    Ok((sum * d).abs())
}

/// Second invariant I [Re] between mirror points `s_a < s_b`.
pub fn second_invariant<S: FieldSource + ?Sized>(
    path: &LinePath<'_, S>,
    s_a: f64,
    s_b: f64,
    bm: f64,
) -> Result<f64> {
    if s_b <= s_a {
        return Ok(0.0);
    }
    let nodes = gauss_legendre(GAUSS_LEGENDRE_END_POINTS);
    let pts = path.points();
    let first = pts.partition_point(|p| p.s <= s_a);
    let last = pts.partition_point(|p| p.s < s_b);
    // Samples strictly inside the mirror points are first..last.
    if last < first + 2 * END_SEGMENTS + 2 {
        let s_min = path.trace.bmin.s.clamp(s_a, s_b);
        return Ok(end_piece(path, &nodes, s_a, s_min, bm)?
            + end_piece(path, &nodes, s_b, s_min, bm)?);
    }

    let inner_a = first + END_SEGMENTS;
    let inner_b = last - 1 - END_SEGMENTS;
    let mut total = end_piece(path, &nodes, s_a, pts[inner_a].s, bm)?
        + end_piece(path, &nodes, s_b, pts[inner_b].s, bm)?;
    let mids = &path.trace.segment_mid_b;
    for i in inner_a..inner_b {
        let h = pts[i + 1].s - pts[i].s;
        total += h / 6.0
            * (integrand(pts[i].b, bm) + 4.0 * integrand(mids[i], bm) + integrand(pts[i + 1].b, bm));
    }
    Ok(total)
}

/// I for one mirror field; zero when the mirror field equals Bmin.
pub fn invariant_for_mirror<S: FieldSource + ?Sized>(
    finder: &mut BounceFinder<'_, S>,
    bm: f64,
) -> Result<f64> {
    if bm <= finder.path.trace.bmin.b * (1.0 + BMIRROR_AT_MINIMUM) {
        return Ok(0.0);
    }
    let (s_a, s_b) = finder.bounce_points(bm)?;
    second_invariant(finder.path, s_a, s_b, bm)
}

/// K = I·sqrt(Bmirror) with Bmirror in Gauss.
pub fn k_from(i: f64, bm_nt: f64) -> f64 {
    i * (bm_nt * NT_TO_GAUSS).sqrt()
}

// ============================================================================
// McIlwain Lm
// ============================================================================

/// Dimensionless dipole field along a line, B·L³/B0 at latitude λ.
fn dipole_b_ratio(lat: f64) -> f64 {
    let (s, c) = lat.sin_cos();
    (1.0 + 3.0 * s * s).sqrt() / c.powi(6)
}

/// I/L for a dipole particle mirroring at latitude `lat_m`.
fn dipole_i_over_l(lat_m: f64, nodes: &[(f64, f64)]) -> f64 {
    let bm = dipole_b_ratio(lat_m);
    let mut sum = 0.0;
    for &(v, w) in nodes {
        let lat = lat_m * (1.0 - v * v);
        let (s, c) = lat.sin_cos();
        let g = integrand(dipole_b_ratio(lat), bm) * c * (1.0 + 3.0 * s * s).sqrt();
        sum += w * g * 2.0 * lat_m * v;
    }
    2.0 * sum
}

/// Shell of a centred dipole of moment `b0` holding a particle with the given I and Bmirror.
fn dipole_shell(b0: f64, lat_m: f64, bm: f64) -> f64 {
    (b0 * dipole_b_ratio(lat_m) / bm).cbrt()
}

/// McIlwain Lm from (I, Bmirror): the dipole shell with the same two values.
pub fn mcilwain_lm(b0: f64, i: f64, bm: f64, config: &LSearchConfig) -> Result<f64> {
    if !(bm > 0.0 && b0 > 0.0 && i >= 0.0) {
        return Err(MagFieldError::OutOfRange(format!(
            "Lm inputs I={} Bm={} B0={}",
            i, bm, b0
        )));
    }
    if i == 0.0 {
        return Ok((b0 / bm).cbrt());
    }
    let nodes = gauss_legendre(config.quadrature_points);
    let mismatch = |lat: f64| dipole_shell(b0, lat, bm) * dipole_i_over_l(lat, &nodes) - i;

    let (mut lo, mut hi) = (0.0, 1.0);
    let mut expansions = 0;
    while mismatch(hi) < 0.0 {
        lo = hi;
        hi = 0.5 * (hi + MAX_MIRROR_LATITUDE);
        expansions += 1;
        if expansions > config.max_iterations {
            return Err(MagFieldError::OutOfRange(format!(
                "no dipole shell matches I={:.4} Re",
                i
            )));
        }
    }
    for _ in 0..config.max_iterations {
        if hi - lo <= config.tolerance {
            break;
        }
        let mid = 0.5 * (lo + hi);
        if mismatch(mid) < 0.0 {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    Ok(dipole_shell(b0, 0.5 * (lo + hi), bm))
}
