//! Field-line tracer
//!
//! Integrates the unit field direction along arc length with an embedded
//! Cash-Karp Runge-Kutta 4(5) pair. Positions are GSM in Earth radii. Sphere
//! crossings are refined by re-integrating the last step, and the
//! minimum-field point by golden-section search over re-integrated sub-steps.
//!
//! Pure dipoles skip the integrator: [`dipole_trace`] samples `r = L cos²λ`
//! directly.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::config::{TraceDirection, TracerConfig};
use crate::error::{MagFieldError, Result};

/// A secondary |B| minimum must sit this far (relative) below the hump between minima.
const SECONDARY_MINIMUM_DEPTH: f64 = 1.0e-3;

/// Latitude spacing of closed-form dipole samples, radians
const DIPOLE_STEP_RAD: f64 = 0.005;

const ROOT_TOLERANCE: f64 = 1.0e-11;
const ROOT_MAX_ITER: usize = 60;
const GOLDEN_MAX_ITER: usize = 200;
const INV_GOLDEN: f64 = 0.618_033_988_749_894_9;

/// Slack when comparing a seed radius against the floor sphere, Re
const FLOOR_SLACK_RE: f64 = 1.0e-9;

// Cash-Karp tableau
const B21: f64 = 1.0 / 5.0;
const B31: f64 = 3.0 / 40.0;
const B32: f64 = 9.0 / 40.0;
const B41: f64 = 3.0 / 10.0;
const B42: f64 = -9.0 / 10.0;
const B43: f64 = 6.0 / 5.0;
const B51: f64 = -11.0 / 54.0;
const B52: f64 = 5.0 / 2.0;
const B53: f64 = -70.0 / 27.0;
const B54: f64 = 35.0 / 27.0;
const B61: f64 = 1631.0 / 55296.0;
const B62: f64 = 175.0 / 512.0;
const B63: f64 = 575.0 / 13824.0;
const B64: f64 = 44275.0 / 110592.0;
const B65: f64 = 253.0 / 4096.0;
const C1: f64 = 37.0 / 378.0;
const C3: f64 = 250.0 / 621.0;
const C4: f64 = 125.0 / 594.0;
const C6: f64 = 512.0 / 1771.0;
const DC1: f64 = C1 - 2825.0 / 27648.0;
const DC3: f64 = C3 - 18575.0 / 48384.0;
const DC4: f64 = C4 - 13525.0 / 55296.0;
const DC5: f64 = -277.0 / 14336.0;
const DC6: f64 = C6 - 0.25;

/// Anything that can produce the total field in the working frame.
pub trait FieldSource {
    /// Field at a GSM position [Re], GSM components [nT].
    fn field_gsm(&self, gsm_re: &Vector3<f64>) -> Result<Vector3<f64>>;
}

// ============================================================================
// Trace result
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TracePoint {
    /// GSM, Re
    pub position: Vector3<f64>,
    /// |B|, nT
    pub b: f64,
    /// Arc length from the first point, Re
    pub s: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TraceStatus {
    Closed,
    Open,
}

/// How one direction of a trace ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BranchEnd {
    /// Crossed the target sphere
    Footprint,
    /// Left the model bounds or passed the maximum radius
    Open,
    /// Stopped at a local |B| minimum
    Minimum,
    NotTraced,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldLineTrace {
    /// Samples ordered along +B, so the southern end comes first
    pub points: Vec<TracePoint>,
    /// |B| at the Hermite midpoint of each segment
    pub segment_mid_b: Vec<f64>,
    pub seed_index: usize,
    pub south_end: BranchEnd,
    pub north_end: BranchEnd,
    pub status: TraceStatus,
    /// Sample with the smallest |B|
    pub bmin_index: usize,
    /// Minimum-field point refined between samples
    pub bmin: TracePoint,
    pub shabansky: bool,
}

impl FieldLineTrace {
    pub fn is_closed(&self) -> bool {
        self.status == TraceStatus::Closed
    }

    pub fn south_footprint(&self) -> Option<&TracePoint> {
        match self.south_end {
            BranchEnd::Footprint => self.points.first(),
            _ => None,
        }
    }

    pub fn north_footprint(&self) -> Option<&TracePoint> {
        match self.north_end {
            BranchEnd::Footprint => self.points.last(),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn total_length(&self) -> f64 {
        self.points.last().map(|p| p.s).unwrap_or(0.0)
    }
}

// ============================================================================
// Integrator
// ============================================================================

#[derive(Debug, Clone, Copy)]
struct Node {
    p: Vector3<f64>,
    /// Unit integration direction, sigma * B / |B|
    d: Vector3<f64>,
    b: f64,
    s: f64,
}

impl Node {
    fn point(&self) -> TracePoint {
        TracePoint {
            position: self.p,
            b: self.b,
            s: self.s,
        }
    }
}

/// Integrates along `sigma * B̂`; sigma = +1 follows the field toward the north.
pub(crate) struct Stepper<'a, S: FieldSource + ?Sized> {
    source: &'a S,
    sigma: f64,
}

impl<'a, S: FieldSource + ?Sized> Stepper<'a, S> {
    pub(crate) fn new(source: &'a S, sigma: f64) -> Self {
        Self { source, sigma }
    }

    fn direction(&self, p: &Vector3<f64>) -> Result<(Vector3<f64>, f64)> {
        let b = self.source.field_gsm(p)?;
        let mag = b.norm();
        if !(mag.is_finite() && mag > 0.0) {
            return Err(MagFieldError::OutOfRange(format!(
                "null field at {:.3} {:.3} {:.3} Re",
                p.x, p.y, p.z
            )));
        }
        Ok((b * (self.sigma / mag), mag))
    }

    pub(crate) fn magnitude(&self, p: &Vector3<f64>) -> Result<f64> {
        Ok(self.direction(p)?.1)
    }

    fn node(&self, p: Vector3<f64>, s: f64) -> Result<Node> {
        let (d, b) = self.direction(&p)?;
        Ok(Node { p, d, b, s })
    }

    /// Fifth-order position after arc length `h` and the embedded error estimate.
    fn cash_karp(&self, p: &Vector3<f64>, k1: &Vector3<f64>, h: f64) -> Result<(Vector3<f64>, f64)> {
        let k2 = self.direction(&(p + k1 * (B21 * h)))?.0;
        let k3 = self.direction(&(p + (k1 * B31 + k2 * B32) * h))?.0;
        let k4 = self.direction(&(p + (k1 * B41 + k2 * B42 + k3 * B43) * h))?.0;
        let k5 = self.direction(&(p + (k1 * B51 + k2 * B52 + k3 * B53 + k4 * B54) * h))?.0;
        let k6 = self
            .direction(&(p + (k1 * B61 + k2 * B62 + k3 * B63 + k4 * B64 + k5 * B65) * h))?
            .0;
        let y = p + (k1 * C1 + k3 * C3 + k4 * C4 + k6 * C6) * h;
        let err = ((k1 * DC1 + k3 * DC3 + k4 * DC4 + k5 * DC5 + k6 * DC6) * h).norm();
        Ok((y, err))
    }

    /// Position reached from a sample after arc length `h` (single step).
    pub(crate) fn advance_from(&self, p: &Vector3<f64>, h: f64) -> Result<Vector3<f64>> {
        if h == 0.0 {
            return Ok(*p);
        }
        let (d, _) = self.direction(p)?;
        Ok(self.cash_karp(p, &d, h)?.0)
    }

    fn advance(&self, from: &Node, h: f64) -> Result<Vector3<f64>> {
        Ok(self.cash_karp(&from.p, &from.d, h)?.0)
    }

    fn hermite_mid_b(&self, a: &Node, b: &Node, h: f64) -> Result<f64> {
        let mid = (a.p + b.p) * 0.5 + (a.d - b.d) * (h / 8.0);
        self.magnitude(&mid)
    }

    /// Arc length in (0, h] at which the step from `from` meets the floor sphere.
    fn sphere_crossing(&self, from: &Node, h: f64, floor_re: f64) -> Result<f64> {
        let fa = from.p.norm() - floor_re;
        let fb = self.advance(from, h)?.norm() - floor_re;
        illinois(
            |t| Ok(self.advance(from, t)?.norm() - floor_re),
            0.0,
            h,
            fa,
            fb,
        )
    }
}

/// Regula falsi with the Illinois modification on a sign-changing bracket.
pub(crate) fn illinois<F>(mut f: F, mut a: f64, mut b: f64, mut fa: f64, mut fb: f64) -> Result<f64>
where
    F: FnMut(f64) -> Result<f64>,
{
    if fa == 0.0 {
        return Ok(a);
    }
    if fb == 0.0 {
        return Ok(b);
    }
    let mut side = 0i8;
    for _ in 0..ROOT_MAX_ITER {
        let c = (a * fb - b * fa) / (fb - fa);
        let fc = f(c)?;
        if fc.abs() < ROOT_TOLERANCE || (b - a).abs() < ROOT_TOLERANCE {
            return Ok(c);
        }
        if fc * fb > 0.0 {
            b = c;
            fb = fc;
            if side == -1 {
                fa *= 0.5;
            }
            side = -1;
        } else {
            a = c;
            fa = fc;
            if side == 1 {
                fb *= 0.5;
            }
            side = 1;
        }
    }
    Ok((a * fb - b * fa) / (fb - fa))
}

struct Branch {
    nodes: Vec<Node>,
    mids: Vec<f64>,
    end: BranchEnd,
}

fn trace_branch<S: FieldSource + ?Sized>(
    stepper: &Stepper<'_, S>,
    seed: Node,
    floor_re: f64,
    stop_at_minimum: bool,
    config: &TracerConfig,
) -> Result<Branch> {
    let mut nodes = Vec::new();
    let mut mids = Vec::new();
    let mut cur = seed;
    let mut h = config.initial_step_re;

    for _ in 0..config.max_steps {
        let h_max = (config.max_step_fraction * cur.p.norm()).max(config.min_step_re);
        h = h.clamp(config.min_step_re, h_max);

        let (next_p, err) = match stepper.cash_karp(&cur.p, &cur.d, h) {
            Ok(step) => step,
            Err(MagFieldError::OutOfRange(_)) if h > config.min_step_re => {
                h = (0.5 * h).max(config.min_step_re);
                continue;
            }
            Err(MagFieldError::OutOfRange(msg)) => {
                trace!(%msg, "trace left model bounds");
                return Ok(Branch { nodes, mids, end: BranchEnd::Open });
            }
            Err(e) => return Err(e),
        };

        if err > config.tolerance && h > config.min_step_re {
            let shrink = (0.9 * (config.tolerance / err).powf(0.25)).max(0.1);
            h = (h * shrink).max(config.min_step_re);
            continue;
        }

        if next_p.norm() < floor_re {
            let t = stepper.sphere_crossing(&cur, h, floor_re)?;
            if t > 0.0 {
                let p = stepper.advance(&cur, t)?;
                let node = stepper.node(p, cur.s + stepper.sigma * t)?;
                mids.push(stepper.hermite_mid_b(&cur, &node, t)?);
                nodes.push(node);
            }
            return Ok(Branch {
                nodes,
                mids,
                end: BranchEnd::Footprint,
            });
        }

        let sampled = stepper
            .node(next_p, cur.s + stepper.sigma * h)
            .and_then(|node| Ok((stepper.hermite_mid_b(&cur, &node, h)?, node)));
        let (mid, next) = match sampled {
            Ok(pair) => pair,
            Err(MagFieldError::OutOfRange(msg)) => {
                trace!(%msg, "trace left model bounds");
                return Ok(Branch { nodes, mids, end: BranchEnd::Open });
            }
            Err(e) => return Err(e),
        };
        let rising = next.b > cur.b;
        mids.push(mid);
        nodes.push(next);

        if next.p.norm() > config.max_radius_re {
            return Ok(Branch { nodes, mids, end: BranchEnd::Open });
        }
        if stop_at_minimum && rising {
            return Ok(Branch {
                nodes,
                mids,
                end: BranchEnd::Minimum,
            });
        }

        cur = next;
        let grow = if err > 0.0 {
            (0.9 * (config.tolerance / err).powf(0.2)).min(5.0)
        } else {
            5.0
        };
        h *= grow.max(1.0);
    }
    Err(MagFieldError::TraceLimitExceeded(config.max_steps))
}

/// +1 or -1 for the direction in which |B| falls from the seed, 0 at a minimum.
fn descent_direction<S: FieldSource + ?Sized>(
    source: &S,
    seed: &Vector3<f64>,
    config: &TracerConfig,
) -> Result<f64> {
    let north = Stepper::new(source, 1.0);
    let south = Stepper::new(source, -1.0);
    let b0 = north.magnitude(seed)?;
    let first_step = config.initial_step_re;
    let bn = north.magnitude(&north.advance_from(seed, first_step)?)?;
    let bs = south.magnitude(&south.advance_from(seed, first_step)?)?;
    Ok(if bn < b0 && bn <= bs {
        1.0
    } else if bs < b0 {
        -1.0
    } else {
        0.0
    })
}

/// Trace the field line through `seed` until the requested terminations.
///
/// `floor_re` is the geocentric radius of the target sphere. Seeds below it
/// are rejected with `FieldLineInsideEarthSphere`.
pub fn trace_field_line<S: FieldSource + ?Sized>(
    source: &S,
    seed: &Vector3<f64>,
    direction: TraceDirection,
    floor_re: f64,
    config: &TracerConfig,
) -> Result<FieldLineTrace> {
    let r0 = seed.norm();
    if !r0.is_finite() {
        return Err(MagFieldError::BadInputCoordinate(format!("{:?}", seed)));
    }
    if r0 < floor_re - FLOOR_SLACK_RE {
        return Err(MagFieldError::FieldLineInsideEarthSphere(format!(
            "seed radius {:.4} Re below trace sphere {:.4} Re",
            r0, floor_re
        )));
    }

    let north = Stepper::new(source, 1.0);
    let south = Stepper::new(source, -1.0);
    let seed_node = match north.node(*seed, 0.0) {
        Ok(node) => node,
        Err(MagFieldError::OutOfRange(msg)) => {
            return Err(MagFieldError::FieldLineOutsideModelBounds(msg))
        }
        Err(e) => return Err(e),
    };
    let south_seed = Node {
        d: -seed_node.d,
        ..seed_node
    };

    let (south_branch, north_branch) = match direction {
        TraceDirection::North => (
            None,
            Some(trace_branch(&north, seed_node, floor_re, false, config)?),
        ),
        TraceDirection::South => (
            Some(trace_branch(&south, south_seed, floor_re, false, config)?),
            None,
        ),
        TraceDirection::NorthAndSouth => (
            Some(trace_branch(&south, south_seed, floor_re, false, config)?),
            Some(trace_branch(&north, seed_node, floor_re, false, config)?),
        ),
        TraceDirection::GsmEquator => {
            let sigma = descent_direction(source, seed, config)?;
            if sigma > 0.0 {
                (None, Some(trace_branch(&north, seed_node, floor_re, true, config)?))
            } else if sigma < 0.0 {
                (Some(trace_branch(&south, south_seed, floor_re, true, config)?), None)
            } else {
                (None, None)
            }
        }
    };

    let mut points = Vec::new();
    let mut mids = Vec::new();
    let south_end = south_branch
        .as_ref()
        .map(|b| b.end)
        .unwrap_or(BranchEnd::NotTraced);
    let north_end = north_branch
        .as_ref()
        .map(|b| b.end)
        .unwrap_or(BranchEnd::NotTraced);
    if let Some(branch) = &south_branch {
        points.extend(branch.nodes.iter().rev().map(Node::point));
        mids.extend(branch.mids.iter().rev());
    }
    let seed_index = points.len();
    points.push(seed_node.point());
    if let Some(branch) = &north_branch {
        points.extend(branch.nodes.iter().map(Node::point));
        mids.extend(branch.mids.iter());
    }
    let s0 = points[0].s;
    for p in points.iter_mut() {
        p.s -= s0;
    }

    let status = match direction {
        TraceDirection::NorthAndSouth
            if south_end == BranchEnd::Footprint && north_end == BranchEnd::Footprint =>
        {
            TraceStatus::Closed
        }
        TraceDirection::North if north_end == BranchEnd::Footprint => TraceStatus::Closed,
        TraceDirection::South if south_end == BranchEnd::Footprint => TraceStatus::Closed,
        TraceDirection::GsmEquator
            if south_end != BranchEnd::Open && north_end != BranchEnd::Open =>
        {
            TraceStatus::Closed
        }
        _ => TraceStatus::Open,
    };

    let bmin_index = argmin_b(&points);
    let bmin = refine_minimum(&north, &points, bmin_index, config.bmin_tolerance_re)?;
    let shabansky = has_secondary_minimum(&points);
    debug!(
        points = points.len(),
        ?status,
        bmin = bmin.b,
        "field line traced"
    );

    Ok(FieldLineTrace {
        points,
        segment_mid_b: mids,
        seed_index,
        south_end,
        north_end,
        status,
        bmin_index,
        bmin,
        shabansky,
    })
}

fn argmin_b(points: &[TracePoint]) -> usize {
    points
        .iter()
        .enumerate()
        .fold((0, f64::INFINITY), |(best, bmin), (i, p)| {
            if p.b < bmin {
                (i, p.b)
            } else {
                (best, bmin)
            }
        })
        .0
}

/// Golden-section search for min |B| over the two segments around sample `k`.
fn refine_minimum<S: FieldSource + ?Sized>(
    stepper: &Stepper<'_, S>,
    points: &[TracePoint],
    k: usize,
    tolerance: f64,
) -> Result<TracePoint> {
    if k == 0 || k + 1 >= points.len() {
        return Ok(points[k]);
    }
    let (before, at, after) = (points[k - 1], points[k], points[k + 1]);
    let split = at.s - before.s;
    let eval = |u: f64| -> Result<(Vector3<f64>, f64)> {
        let p = if u <= split {
            stepper.advance_from(&before.position, u)?
        } else {
            stepper.advance_from(&at.position, u - split)?
        };
        Ok((p, stepper.magnitude(&p)?))
    };

    let (mut lo, mut hi) = (0.0, after.s - before.s);
    let mut x1 = hi - INV_GOLDEN * (hi - lo);
    let mut x2 = lo + INV_GOLDEN * (hi - lo);
    let mut f1 = eval(x1)?.1;
    let mut f2 = eval(x2)?.1;
    for _ in 0..GOLDEN_MAX_ITER {
        if hi - lo <= tolerance {
            break;
        }
        if f1 < f2 {
            hi = x2;
            x2 = x1;
            f2 = f1;
            x1 = hi - INV_GOLDEN * (hi - lo);
            f1 = eval(x1)?.1;
        } else {
            lo = x1;
            x1 = x2;
            f1 = f2;
            x2 = lo + INV_GOLDEN * (hi - lo);
            f2 = eval(x2)?.1;
        }
    }
    let u = 0.5 * (lo + hi);
    let (position, b) = eval(u)?;
    if b < at.b {
        Ok(TracePoint {
            position,
            b,
            s: before.s + u,
        })
    } else {
        Ok(at)
    }
}

/// More than one interior |B| minimum separated by a real hump.
fn has_secondary_minimum(points: &[TracePoint]) -> bool {
    if points.len() < 3 {
        return false;
    }
    let minima: Vec<usize> = (1..points.len() - 1)
        .filter(|&i| points[i].b <= points[i - 1].b && points[i].b < points[i + 1].b)
        .collect();
    minima.windows(2).any(|w| {
        let peak = points[w[0]..=w[1]]
            .iter()
            .map(|p| p.b)
            .fold(f64::NEG_INFINITY, f64::max);
        peak > (1.0 + SECONDARY_MINIMUM_DEPTH) * points[w[0]].b.max(points[w[1]].b)
    })
}

// ============================================================================
// Closed-form dipole line
// ============================================================================

/// One centred-dipole field line, `r = L cos²λ`, in the dipole's own axes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DipoleLine {
    pub moment_nt: f64,
    pub l: f64,
    /// Dipole-frame longitude, radians
    pub longitude: f64,
}

impl DipoleLine {
    /// Line through a dipole-frame position in Earth radii.
    pub fn through(moment_nt: f64, p: &Vector3<f64>) -> Result<(Self, f64)> {
        let rho = p.x.hypot(p.y);
        let lat = p.z.atan2(rho);
        let cos = lat.cos();
        if cos < 1.0e-9 {
            return Err(MagFieldError::FieldLineOutsideModelBounds(
                "point on the dipole axis".into(),
            ));
        }
        let line = Self {
            moment_nt,
            l: p.norm() / (cos * cos),
            longitude: p.y.atan2(p.x),
        };
        Ok((line, lat))
    }

    pub fn position(&self, lat: f64) -> Vector3<f64> {
        let (sl, cl) = lat.sin_cos();
        let r = self.l * cl * cl;
        let (so, co) = self.longitude.sin_cos();
        Vector3::new(r * cl * co, r * cl * so, r * sl)
    }

    pub fn b(&self, lat: f64) -> f64 {
        let (sl, cl) = lat.sin_cos();
        let r = self.l * cl * cl;
        self.moment_nt / (r * r * r) * (1.0 + 3.0 * sl * sl).sqrt()
    }

    /// Arc length from the equator, signed, Re
    pub fn arc(&self, lat: f64) -> f64 {
        let x = lat.sin();
        let q = (1.0 + 3.0 * x * x).sqrt();
        let r3 = 3.0_f64.sqrt();
        self.l * (0.5 * x * q + (r3 * x).asinh() / (2.0 * r3))
    }

    fn arc_rate(&self, lat: f64) -> f64 {
        let (sl, cl) = lat.sin_cos();
        self.l * cl * (1.0 + 3.0 * sl * sl).sqrt()
    }

    /// Latitude of the point half-way in arc length between two latitudes.
    fn arc_midpoint(&self, lat_a: f64, lat_b: f64) -> f64 {
        let target = 0.5 * (self.arc(lat_a) + self.arc(lat_b));
        let mut lat = 0.5 * (lat_a + lat_b);
        for _ in 0..4 {
            lat -= (self.arc(lat) - target) / self.arc_rate(lat);
        }
        lat
    }
}

/// Latitude between `from` and `to` where the geocentric radius meets `floor_re`.
fn dipole_footprint_lat(
    line: &DipoleLine,
    center: &Vector3<f64>,
    floor_re: f64,
    from: f64,
    to: f64,
) -> f64 {
    let g = |lat: f64| (center + line.position(lat)).norm() - floor_re;
    let (mut inside, mut outside) = (to, from);
    if g(inside) > 0.0 {
        return to;
    }
    for _ in 0..100 {
        let mid = 0.5 * (inside + outside);
        if g(mid) > 0.0 {
            outside = mid;
        } else {
            inside = mid;
        }
    }
    0.5 * (inside + outside)
}

fn ramp(a: f64, b: f64) -> Vec<f64> {
    let n = ((b - a).abs() / DIPOLE_STEP_RAD).ceil().max(1.0) as usize;
    (0..=n).map(|i| a + (b - a) * i as f64 / n as f64).collect()
}

/// Closed-form trace of a dipole line.
///
/// `seed_re` is relative to the dipole centre, `center_re` is the
/// geocentric position of that centre, both in the dipole's axes and Earth
/// radii. Returned positions are geocentric in the same axes.
pub fn dipole_trace(
    moment_nt: f64,
    center_re: &Vector3<f64>,
    seed_re: &Vector3<f64>,
    direction: TraceDirection,
    floor_re: f64,
    config: &TracerConfig,
) -> Result<FieldLineTrace> {
    let r0 = (center_re + seed_re).norm();
    if !r0.is_finite() {
        return Err(MagFieldError::BadInputCoordinate(format!("{:?}", seed_re)));
    }
    if r0 < floor_re - FLOOR_SLACK_RE {
        return Err(MagFieldError::FieldLineInsideEarthSphere(format!(
            "seed radius {:.4} Re below trace sphere {:.4} Re",
            r0, floor_re
        )));
    }
    let (line, lat0) = DipoleLine::through(moment_nt, seed_re)?;
    let half_pi = std::f64::consts::FRAC_PI_2;

    let (go_south, go_north) = match direction {
        TraceDirection::North => (false, true),
        TraceDirection::South => (true, false),
        TraceDirection::NorthAndSouth => (true, true),
        TraceDirection::GsmEquator => {
            return Err(MagFieldError::UnsupportedOption(
                "dipole lines cannot stop at the GSM equator".into(),
            ))
        }
    };
    let lat_s = if go_south {
        dipole_footprint_lat(&line, center_re, floor_re, lat0, -half_pi)
    } else {
        lat0
    };
    let lat_n = if go_north {
        dipole_footprint_lat(&line, center_re, floor_re, lat0, half_pi)
    } else {
        lat0
    };

    let mut lats = ramp(lat_s, lat0);
    let seed_index = lats.len() - 1;
    lats.extend(ramp(lat0, lat_n).into_iter().skip(1));

    let s0 = line.arc(lats[0]);
    let sample = |lat: f64| TracePoint {
        position: center_re + line.position(lat),
        b: line.b(lat),
        s: line.arc(lat) - s0,
    };
    let points: Vec<TracePoint> = lats.iter().map(|&lat| sample(lat)).collect();
    let mids = lats
        .windows(2)
        .map(|w| line.b(line.arc_midpoint(w[0], w[1])))
        .collect();

    let bmin_index = argmin_b(&points);
    let first = lats[0];
    let last = lats[lats.len() - 1];
    let bmin = if first <= 0.0 && last >= 0.0 {
        sample(0.0)
    } else {
        points[bmin_index]
    };

    let end = |traced: bool| {
        if traced {
            BranchEnd::Footprint
        } else {
            BranchEnd::NotTraced
        }
    };
    let status = if line.l > config.max_radius_re {
        TraceStatus::Open
    } else {
        TraceStatus::Closed
    };

    Ok(FieldLineTrace {
        points,
        segment_mid_b: mids,
        seed_index,
        south_end: end(go_south),
        north_end: end(go_north),
        status,
        bmin_index,
        bmin,
        shabansky: false,
    })
}

// ============================================================================
// Re-use of finished traces
// ============================================================================

/// Points where a stored line crosses the surface of radius `radius_of(p)`,
/// interpolated between consecutive samples and projected radially onto it.
pub fn line_crossings<F>(points: &[Vector3<f64>], radius_of: F) -> Vec<Vector3<f64>>
where
    F: Fn(&Vector3<f64>) -> f64,
{
    let mut out = Vec::new();
    for w in points.windows(2) {
        let ga = w[0].norm() - radius_of(&w[0]);
        let gb = w[1].norm() - radius_of(&w[1]);
        if ga == 0.0 {
            out.push(w[0]);
        } else if ga * gb < 0.0 {
            let t = ga / (ga - gb);
            let p = w[0] + (w[1] - w[0]) * t;
            out.push(p * (radius_of(&p) / p.norm()));
        }
    }
    if let Some(last) = points.last() {
        if last.norm() == radius_of(last) {
            out.push(*last);
        }
    }
    out
}
