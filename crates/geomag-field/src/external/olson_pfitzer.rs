//! Olson-Pfitzer 1977 quiet-time magnetospheric field
//!
//! The field is evaluated in solar-magnetic coordinates as a polynomial in
//! `x^i y^j z^k` (Re) plus a second polynomial weighted by
//! `exp(-0.06 r^2)`. Terms run with x outermost, then y, then z; each power
//! is at most 4 (5 for y) and the total degree at most 5. Bx and Bz share
//! the 32 even-in-y monomials, By uses the 22 odd-in-y ones.
//!
//! Every coefficient is a 2-term series in the dipole tilt `T` (degrees):
//! `c0 + c1 T^2` for terms even in tilt, `c0 T + c1 T^3` for odd ones. The
//! parity tables below select which. The blended set is cached and only
//! recomputed when the tilt changes.

use nalgebra::Vector3;

use crate::error::{MagFieldError, Result};

/// Validity limit on each GSM component, Re
pub const OP_LIMIT_RE: f64 = 15.0;

/// Width of the Gaussian weight, per Re^2
const GAUSS_WIDTH: f64 = 0.06;

const XZ_TERMS: usize = 32;
const Y_TERMS: usize = 22;
const MAX_DEGREE: usize = 5;

// 1 = even in tilt, 2 = odd in tilt

#[rustfmt::skip]
const TILT_PARITY_X: [usize; XZ_TERMS] = [
    2, 1, 2, 1, 2, 2, 1, 2, 1, 2, 1, 2, 1, 2, 1, 2, 2, 1, 2, 2, 2, 1, 2, 1, 2, 1, 2, 1, 2, 2, 2, 1,
];

#[rustfmt::skip]
const TILT_PARITY_Y: [usize; Y_TERMS] = [
    2, 1, 2, 1, 2, 2, 1, 2, 2, 2, 1, 2, 1, 2, 1, 2, 1, 2, 2, 2, 1, 2,
];

#[rustfmt::skip]
const TILT_PARITY_Z: [usize; XZ_TERMS] = [
    1, 2, 1, 2, 1, 1, 2, 1, 2, 1, 2, 1, 2, 1, 2, 1, 1, 2, 1, 1, 1, 2, 1, 2, 1, 2, 1, 2, 1, 1, 1, 2,
];

#[rustfmt::skip]
const BX_POLY: [f64; 64] = [
    -2.26836e-2, -1.01863e-4, 3.42986, -3.12195e-4,
    9.50629e-3, -2.91512e-6, -1.57317e-3, 8.62856e-8,
    -4.26478e-5, 1.62924e-8, -1.27549e-4, 1.90732e-6,
    -1.65983e-2, 8.46680e-9, -5.55850e-5, 1.37404e-8,
    9.91815e-5, 1.59296e-8, 4.52864e-7, -7.17669e-9,
    4.98627e-5, 3.33662e-10, -5.97620e-2, 1.60669e-5,
    -2.29457e-1, -1.43777e-4, 1.09403e-3, -9.15606e-7,
    1.60658e-3, -4.01198e-7, -3.15064e-6, 2.03125e-9,
    4.92887e-4, -1.80676e-7, -1.12022e-3, 5.98568e-7,
    -5.90009e-6, 5.16504e-9, -1.48737e-6, 4.83477e-10,
    -7.44379e-4, 3.82472e-6, 7.41737e-4, -1.31468e-5,
    -1.24729e-4, 1.92930e-8, -1.91764e-4, -5.30371e-8,
    1.38186e-5, -2.81594e-8, 7.46386e-6, 2.64404e-8,
    2.45049e-4, -1.81802e-7, -1.00278e-3, 1.98742e-6,
    -1.16425e-5, 1.17556e-8, -2.46079e-6, -3.45831e-10,
    1.02440e-5, -1.90716e-8, -4.00855e-5, 1.25818e-7,
];

#[rustfmt::skip]
const BX_GAUSS: [f64; 64] = [
    9.47753e-2, 1.45981e-4, -1.82933, 5.54882e-4,
    5.03665e-3, -2.07698e-6, 1.10959e-1, -3.45837e-5,
    -4.40075e-5, 5.06464e-7, -1.20112e-3, 3.64911e-6,
    1.49849e-1, -7.44929e-5, 2.46382e-4, 9.65870e-7,
    -9.54881e-4, 2.43647e-7, 3.06520e-4, 3.07836e-7,
    6.48301e-3, 1.26251e-6, -7.09548e-3, -1.55596e-5,
    3.06465, -7.84893e-5, 4.95145e-3, 3.71921e-6,
    -1.52002e-1, 6.81988e-6, -8.55686e-5, -9.01230e-8,
    -3.71458e-4, 1.30476e-7, -1.82971e-1, 1.51390e-5,
    -1.45912e-4, -2.22778e-7, 6.49278e-5, -3.72758e-8,
    -1.59932e-3, 8.04921e-6, 5.38012e-1, -1.43182e-4,
    1.50000e-4, 5.88020e-7, -1.59000e-2, 1.60744e-6,
    3.17837e-4, 1.78959e-7, -8.93794e-3, 6.37549e-6,
    1.27887e-3, -2.45878e-7, -1.93210e-1, 6.91233e-6,
    -2.80637e-4, -2.57073e-7, 5.78343e-5, 4.52128e-10,
    1.89621e-4, -4.84911e-8, -1.50058e-2, 6.21772e-6,
];

#[rustfmt::skip]
const BY_POLY: [f64; 44] = [
    -1.88177e-2, -1.92493e-6, -2.89064e-1, -8.49439e-5,
    -4.76380e-4, -4.52998e-8, 1.61086e-3, 3.18728e-7,
    1.29159e-6, 5.52259e-10, 3.95543e-5, 5.61209e-8,
    1.38287e-3, 5.74237e-7, 1.86489e-6, 7.10175e-10,
    1.45243e-7, -2.97591e-10, -2.43029e-3, -6.70000e-7,
    -2.30624e-2, -6.22193e-6, -2.40815e-5, 2.01689e-8,
    1.76721e-4, 3.78689e-8, 9.88496e-6, 7.33820e-9,
    7.32126e-5, 8.43986e-8, 8.82449e-6, -6.11708e-8,
    1.78881e-4, 8.62589e-7, 3.43724e-6, 2.53783e-9,
    -2.04239e-7, 8.16641e-10, 1.68075e-5, 7.62815e-9,
    2.26026e-4, 3.66341e-8, 3.44637e-7, 2.25531e-10,
];

#[rustfmt::skip]
const BY_GAUSS: [f64; 44] = [
    2.50143e-3, 1.01200e-6, 3.23821, 1.08589e-5,
    -3.39199e-5, -5.27052e-7, -9.46161e-2, -1.95413e-9,
    -4.23614e-6, 1.43153e-8, -2.62948e-4, 1.05138e-7,
    -2.15784e-1, -2.20717e-7, -2.65687e-5, 1.26370e-8,
    5.88917e-7, -1.13658e-8, 1.64385e-3, 1.44263e-6,
    -1.66045e-1, -1.46096e-5, 1.22811e-4, 3.43922e-8,
    9.66760e-5, -6.32150e-7, -4.97400e-5, -2.78578e-8,
    1.77366e-2, 2.05401e-7, -1.91756e-3, -9.49392e-7,
    -1.99488e-1, -2.07170e-6, -5.40443e-5, 1.59289e-8,
    7.30914e-5, 3.38786e-8, -1.59537e-4, -1.65504e-7,
    1.90940e-2, 2.03238e-6, 1.01148e-4, 5.20815e-8,
];

#[rustfmt::skip]
const BZ_POLY: [f64; 64] = [
    -2.77924e1, -1.01457e-3, 9.21436e-2, -8.52177e-6,
    5.19106e-1, 8.28881e-5, -5.59651e-4, 1.16736e-7,
    -2.11206e-3, -5.35469e-7, 4.41990e-1, -1.33679e-5,
    -7.18642e-4, 6.17358e-8, -3.51990e-3, -5.29070e-7,
    1.88443e-6, -6.60696e-10, -1.34708e-3, 1.02160e-7,
    1.58219e-6, 2.05040e-10, 1.18039, 1.58903e-4,
    1.86944e-2, -4.46477e-6, 5.49869e-2, 4.94690e-6,
    -1.18335e-4, 6.95684e-9, -2.73839e-4, -9.17883e-8,
    2.79126e-2, -1.02567e-5, -1.25427e-4, 3.07143e-8,
    -5.31826e-4, -2.98476e-8, -4.89899e-5, 4.91480e-8,
    3.85563e-1, 4.16966e-5, 6.74744e-4, -2.08736e-7,
    -3.42654e-3, -3.13957e-6, -6.31361e-6, -2.92981e-9,
    -2.63883e-3, -1.32235e-7, -6.19406e-6, 3.54334e-9,
    6.65986e-3, -5.81949e-6, -1.88809e-4, 3.62055e-8,
    -4.64380e-4, -2.21159e-7, -1.77496e-4, 4.95560e-8,
    -3.18867e-4, -3.17697e-7, -1.05815e-5, 2.22220e-9,
];

#[rustfmt::skip]
const BZ_GAUSS: [f64; 64] = [
    -5.07092, 4.71960e-3, -3.79851e-3, -3.67309e-6,
    -6.02439e-1, 1.08490e-4, 5.09287e-4, 5.62210e-7,
    7.05718e-2, 5.13160e-6, -2.85571, -4.31728e-5,
    1.03185e-3, 1.05332e-7, 1.04106e-2, 1.60749e-5,
    4.18031e-5, 3.32759e-8, 1.20113e-1, 1.40486e-5,
    -3.37993e-5, 5.48340e-9, 9.10815e-2, -4.00608e-4,
    3.75393e-3, -4.69939e-7, -2.48561e-2, 1.31836e-4,
    -2.67755e-4, -7.60285e-8, 3.04443e-3, -3.28956e-6,
    5.82367e-1, 5.39496e-6, -6.15261e-4, 4.05316e-8,
    1.13546e-2, -4.26493e-6, -2.72007e-2, 5.72523e-8,
    -2.98576, 3.07325e-5, 1.51645e-3, 1.25098e-6,
    4.07213e-2, 1.05964e-5, 1.04232e-4, 1.77381e-8,
    1.92781e-1, 2.15734e-5, -1.65741e-5, -1.88683e-9,
    2.44803e-1, 1.51316e-5, -3.01157e-4, 8.47006e-8,
    1.86971e-2, -6.94074e-6, 9.13198e-3, -2.38052e-7,
    1.28552e-1, 6.92595e-6, -8.36792e-5, -6.10021e-8,
];

// ============================================================================
// Model
// ============================================================================

/// Olson-Pfitzer quiet external field with its tilt-blended coefficients.
#[derive(Debug, Clone)]
pub struct OlsonPfitzer {
    tilt_deg: f64,
    bx_poly: [f64; XZ_TERMS],
    bx_gauss: [f64; XZ_TERMS],
    by_poly: [f64; Y_TERMS],
    by_gauss: [f64; Y_TERMS],
    bz_poly: [f64; XZ_TERMS],
    bz_gauss: [f64; XZ_TERMS],
}

impl Default for OlsonPfitzer {
    fn default() -> Self {
        let mut model = Self {
            tilt_deg: f64::NAN,
            bx_poly: [0.0; XZ_TERMS],
            bx_gauss: [0.0; XZ_TERMS],
            by_poly: [0.0; Y_TERMS],
            by_gauss: [0.0; Y_TERMS],
            bz_poly: [0.0; XZ_TERMS],
            bz_gauss: [0.0; XZ_TERMS],
        };
        model.set_tilt(0.0);
        model
    }
}

fn blend<const N: usize>(table: &[f64], parity: &[usize; N], tilt_deg: f64) -> [f64; N] {
    let powers = [1.0, tilt_deg, tilt_deg * tilt_deg, tilt_deg.powi(3)];
    let mut out = [0.0; N];
    for (n, coef) in out.iter_mut().enumerate() {
        let p = parity[n] - 1;
        *coef = table[2 * n] * powers[p] + table[2 * n + 1] * powers[p + 2];
    }
    out
}

/// Visits the exponents `(i, j, k)` in table order, y powers starting at
/// `j_start` and stepping by two.
fn for_each_term(j_start: usize, mut visit: impl FnMut(usize, usize, usize)) {
    for i in 0..=4 {
        for j in (j_start..=MAX_DEGREE - i).step_by(2) {
            for k in 0..=(4.min(MAX_DEGREE - i - j)) {
                visit(i, j, k);
            }
        }
    }
}

fn powers<const N: usize>(v: f64) -> [f64; N] {
    let mut out = [1.0; N];
    for n in 1..N {
        out[n] = out[n - 1] * v;
    }
    out
}

impl OlsonPfitzer {
    pub fn new(tilt_rad: f64) -> Self {
        let mut model = Self::default();
        model.set_tilt(tilt_rad);
        model
    }

    /// Dipole tilt the coefficients are blended for, degrees
    pub fn tilt_deg(&self) -> f64 {
        self.tilt_deg
    }

    /// Re-blend coefficients for a new tilt. No-op when the tilt is unchanged.
    pub fn set_tilt(&mut self, tilt_rad: f64) {
        let t = tilt_rad.to_degrees();
        if t == self.tilt_deg {
            return;
        }
        self.tilt_deg = t;
        self.bx_poly = blend(&BX_POLY, &TILT_PARITY_X, t);
        self.bx_gauss = blend(&BX_GAUSS, &TILT_PARITY_X, t);
        self.by_poly = blend(&BY_POLY, &TILT_PARITY_Y, t);
        self.by_gauss = blend(&BY_GAUSS, &TILT_PARITY_Y, t);
        self.bz_poly = blend(&BZ_POLY, &TILT_PARITY_Z, t);
        self.bz_gauss = blend(&BZ_GAUSS, &TILT_PARITY_Z, t);
    }

    pub fn out_of_range(gsm_re: &Vector3<f64>) -> bool {
        gsm_re.iter().any(|c| !c.is_finite() || c.abs() > OP_LIMIT_RE)
    }

    /// Field in SM coordinates at an SM position, both untilted frames.
    fn field_sm(&self, x: f64, y: f64, z: f64) -> Vector3<f64> {
        let gauss = (-GAUSS_WIDTH * (x * x + y * y + z * z)).exp();
        let xp: [f64; 5] = powers(x);
        let yp: [f64; 6] = powers(y);
        let zp: [f64; 5] = powers(z);

        let (mut bx, mut bz, mut n) = (0.0, 0.0, 0);
        for_each_term(0, |i, j, k| {
            let m = xp[i] * yp[j] * zp[k];
            bx += (self.bx_poly[n] + self.bx_gauss[n] * gauss) * m;
            bz += (self.bz_poly[n] + self.bz_gauss[n] * gauss) * m;
            n += 1;
        });

        let (mut by, mut n) = (0.0, 0);
        for_each_term(1, |i, j, k| {
            let m = xp[i] * yp[j] * zp[k];
            by += (self.by_poly[n] + self.by_gauss[n] * gauss) * m;
            n += 1;
        });
        Vector3::new(bx, by, bz)
    }

    /// External field at a GSM position (Re), nT in GSM.
    pub fn field_gsm(&self, gsm_re: &Vector3<f64>) -> Result<Vector3<f64>> {
        if Self::out_of_range(gsm_re) {
            return Err(MagFieldError::OutOfRange(format!(
                "Olson-Pfitzer position {:.2} {:.2} {:.2} Re",
                gsm_re.x, gsm_re.y, gsm_re.z
            )));
        }
        let (sin_t, cos_t) = self.tilt_deg.to_radians().sin_cos();

        // GSM -> SM
        let xsm = gsm_re.x * cos_t - gsm_re.z * sin_t;
        let zsm = gsm_re.x * sin_t + gsm_re.z * cos_t;
        let b = self.field_sm(xsm, gsm_re.y, zsm);

        // SM -> GSM
        Ok(Vector3::new(
            b.x * cos_t + b.z * sin_t,
            b.y,
            -b.x * sin_t + b.z * cos_t,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(b: Vector3<f64>, expected: [f64; 3]) {
        for (got, want) in b.iter().zip(expected) {
            assert!((got - want).abs() < 0.01, "{:?} vs {:?}", b, expected);
        }
    }

    #[test]
    fn test_term_layout_matches_parity_tables() {
        // Tilt-even terms of Bx and By are odd in z at zero tilt
        let mut seen = Vec::new();
        for_each_term(0, |i, j, k| seen.push((i, j, k)));
        assert_eq!(seen.len(), XZ_TERMS);
        assert_eq!(seen[1], (0, 0, 1));
        assert_eq!(seen[XZ_TERMS - 1], (4, 0, 1));
        for (n, (_, j, k)) in seen.iter().enumerate() {
            assert_eq!(j % 2, 0);
            assert_eq!(k % 2 == 1, TILT_PARITY_X[n] == 1, "term {}", n);
            assert_ne!(TILT_PARITY_X[n], TILT_PARITY_Z[n]);
        }

        let mut seen = Vec::new();
        for_each_term(1, |i, j, k| seen.push((i, j, k)));
        assert_eq!(seen.len(), Y_TERMS);
        assert!(seen.contains(&(0, 5, 0)));
        for (n, (_, j, k)) in seen.iter().enumerate() {
            assert_eq!(j % 2, 1);
            assert_eq!(k % 2 == 1, TILT_PARITY_Y[n] == 1, "term {}", n);
        }
    }

    #[test]
    fn test_noon_midnight_reference_values() {
        let model = OlsonPfitzer::new(0.0);
        let at = |x, y, z| model.field_gsm(&Vector3::new(x, y, z)).unwrap();
        // Dayside compression, nightside stretching, ring current at the center
        assert_close(at(6.6, 0.0, 0.0), [0.0, 0.0, 11.275]);
        assert_close(at(-6.6, 0.0, 0.0), [0.0, 0.0, -18.537]);
        assert_close(at(10.0, 0.0, 0.0), [0.0, 0.0, 29.082]);
        assert_close(at(-10.0, 0.0, 0.0), [0.0, 0.0, -9.064]);
        assert_close(at(0.0, 0.0, 0.0), [0.0, 0.0, -32.863]);
        assert_close(at(0.0, 0.0, 6.0), [21.738, 0.0, -4.380]);
        // Tail lobes point earthward in the north and tailward in the south
        assert_close(at(-10.0, 0.0, 3.0), [18.489, 0.0, -9.146]);
        assert_close(at(-10.0, 0.0, -3.0), [-18.489, 0.0, -9.146]);
        assert_close(at(-5.0, 4.0, 1.5), [9.808, -4.836, -21.056]);
    }

    #[test]
    fn test_tilted_reference_values() {
        let model = OlsonPfitzer::new(0.3);
        let at = |x, y, z| model.field_gsm(&Vector3::new(x, y, z)).unwrap();
        assert_close(at(6.6, 0.0, 0.0), [-2.202, 0.0, 16.981]);
        assert_close(at(-10.0, 0.0, 0.0), [-14.156, 0.0, -8.115]);
        assert_close(at(0.0, 0.0, 0.0), [-7.990, 0.0, -30.782]);
        assert_close(at(-10.0, 0.0, 3.0), [4.051, 0.0, -8.367]);
    }

    #[test]
    fn test_north_south_mirror_with_tilt_reversed() {
        let north = OlsonPfitzer::new(0.3);
        let south = OlsonPfitzer::new(-0.3);
        for p in [[-10.0, 0.0, 3.0], [-5.0, 4.0, 1.5], [4.0, -2.0, 6.0]] {
            let a = north.field_gsm(&Vector3::new(p[0], p[1], p[2])).unwrap();
            let b = south.field_gsm(&Vector3::new(p[0], p[1], -p[2])).unwrap();
            assert!((a.x + b.x).abs() < 1e-9);
            assert!((a.y + b.y).abs() < 1e-9);
            assert!((a.z - b.z).abs() < 1e-9);
        }
    }

    #[test]
    fn test_dawn_dusk_mirror() {
        let model = OlsonPfitzer::new(0.2);
        let dusk = model.field_gsm(&Vector3::new(-5.0, 4.0, 1.5)).unwrap();
        let dawn = model.field_gsm(&Vector3::new(-5.0, -4.0, 1.5)).unwrap();
        assert!((dusk.x - dawn.x).abs() < 1e-9);
        assert!((dusk.y + dawn.y).abs() < 1e-9);
        assert!((dusk.z - dawn.z).abs() < 1e-9);
    }

    #[test]
    fn test_tilt_reblend() {
        let mut model = OlsonPfitzer::new(0.0);
        let p = Vector3::new(4.0, 1.0, 2.0);
        let b0 = model.field_gsm(&p).unwrap();
        model.set_tilt(0.3);
        assert!((model.tilt_deg() - 0.3f64.to_degrees()).abs() < 1e-12);
        let b1 = model.field_gsm(&p).unwrap();
        assert!((b0 - b1).norm() > 1e-3);
        model.set_tilt(0.0);
        let b2 = model.field_gsm(&p).unwrap();
        assert!((b0 - b2).norm() < 1e-12);
    }

    #[test]
    fn test_out_of_range() {
        let model = OlsonPfitzer::default();
        assert!(matches!(
            model.field_gsm(&Vector3::new(16.0, 0.0, 0.0)),
            Err(MagFieldError::OutOfRange(_))
        ));
        assert!(model.field_gsm(&Vector3::new(0.0, -15.5, 0.0)).is_err());
        assert!(model.field_gsm(&Vector3::new(15.0, 15.0, 15.0)).is_ok());
    }
}
