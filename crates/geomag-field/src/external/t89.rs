//! Tsyganenko 1989c disturbed-time magnetospheric field
//!
//! Tail, ring and closure current systems plus the Chapman-Ferraro
//! magnetopause terms. One of seven parameter sets is selected by Kp bin.
//! Positions are GSM in Earth radii, tilt in radians, output GSM nT.

use nalgebra::Vector3;

use crate::error::{MagFieldError, Result};

/// Number of Kp-binned parameter sets
pub const KP_BINS: usize = 7;

/// Upper Kp edge of bins 1..6; anything above is bin 7.
const KP_BIN_EDGES: [f64; 6] = [0.33, 1.33, 2.33, 3.33, 4.33, 5.33];

pub const MAX_KP: f64 = 9.0;

/// Validity box, GSM Re
const X_MIN: f64 = -70.0;
const X_MAX: f64 = 20.0;
const YZ_MAX: f64 = 40.0;

#[rustfmt::skip]
const PARAMS: [[f64; 30]; KP_BINS] = [
    [-116.53, -10719.0, 42.375, 59.753, -11363.0, 1.7844, 30.268, -0.35372e-01, -0.66832e-01,
     0.16456e-01, -1.3024, 0.16529e-02, 0.20293e-02, 20.289, -0.25203e-01, 224.91, -9234.8,
     22.788, 7.8813, 1.8362, -0.27228, 8.8184, 2.8714, 14.468, 32.177, 0.01, 0.0, 7.0459,
     4.0, 20.0],
    [-55.553, -13198.0, 60.647, 61.072, -16064.0, 2.2534, 34.407, -0.38887e-01, -0.94571e-01,
     0.27154e-01, -1.3901, 0.13460e-02, 0.13238e-02, 23.005, -0.30565e-01, 55.047, -3875.7,
     20.178, 7.9693, 1.4575, 0.89471, 9.4039, 3.5215, 14.474, 36.555, 0.01, 0.0, 7.0787,
     4.0, 20.0],
    [-101.34, -13480.0, 111.35, 12.386, -24699.0, 2.6459, 38.948, -0.34080e-01, -0.12404,
     0.29702e-01, -1.4052, 0.12103e-02, 0.16381e-02, 24.49, -0.37705e-01, -298.32, 4400.9,
     18.692, 7.9064, 1.3047, 2.4541, 9.7012, 7.1624, 14.288, 33.822, 0.01, 0.0, 6.7442,
     4.0, 20.0],
    [-181.69, -12320.0, 173.79, -96.664, -39051.0, 3.2633, 44.968, -0.46377e-01, -0.16686,
     0.048298, -1.5473, 0.10277e-02, 0.31632e-02, 27.341, -0.50655e-01, -514.10, 12482.0,
     16.257, 8.5834, 1.0194, 3.6148, 8.6042, 5.5057, 13.778, 32.373, 0.01, 0.0, 7.3195,
     4.0, 20.0],
    [-436.54, -9001.0, 323.66, -410.08, -50340.0, 3.9932, 58.524, -0.38519e-01, -0.26822,
     0.74528e-01, -1.4268, -0.10985e-02, 0.96613e-02, 27.557, -0.56522e-01, -867.03, 20652.0,
     14.101, 8.3501, 0.72996, 3.8149, 9.2908, 6.4674, 13.729, 28.353, 0.01, 0.0, 7.4237,
     4.0, 20.0],
    [-707.77, -4471.9, 432.81, -435.51, -60400.0, 4.6229, 68.178, -0.88245e-01, -0.21002,
     0.11846, -2.6711, 0.22305e-02, 0.10910e-01, 27.547, -0.54080e-01, -424.23, 1100.2,
     13.954, 7.5337, 0.89714, 3.7813, 8.2945, 5.174, 14.213, 25.237, 0.01, 0.0, 7.0037,
     4.0, 20.0],
    [-1190.4, 2749.9, 742.56, -1110.3, -77193.0, 7.6727, 102.05, -0.96015e-01, -0.74507,
     0.11214, -1.3614, 0.15157e-02, 0.22283e-01, 23.164, -0.74146e-01, -2219.1, 48253.0,
     12.714, 7.6777, 0.57138, 2.9633, 9.3909, 9.7263, 11.123, 21.558, 0.01, 0.0, 4.4518,
     4.0, 20.0],
];

// Fixed model constants
const A02: f64 = 25.0;
const XLW2: f64 = 170.0;
const RT: f64 = 30.0;
const XD: f64 = 0.0;
const XLD2: f64 = 40.0;
const SXC: f64 = 4.0;
const XLWC2: f64 = 50.0;

/// Kp value to bin number 1..=7.
pub fn kp_bin(kp: f64) -> Result<usize> {
    if !(0.0..=MAX_KP).contains(&kp) {
        return Err(MagFieldError::BadKpValue(kp));
    }
    Ok(KP_BIN_EDGES.iter().take_while(|edge| kp > **edge).count() + 1)
}

#[derive(Debug, Clone, PartialEq)]
pub struct Tsyganenko89 {
    bin: usize,
    a: [f64; 30],
}

impl Default for Tsyganenko89 {
    fn default() -> Self {
        Self {
            bin: 1,
            a: PARAMS[0],
        }
    }
}

impl Tsyganenko89 {
    pub fn new(bin: usize) -> Result<Self> {
        let mut model = Self::default();
        model.set_bin(bin)?;
        Ok(model)
    }

    pub fn bin(&self) -> usize {
        self.bin
    }

    pub fn set_bin(&mut self, bin: usize) -> Result<()> {
        if !(1..=KP_BINS).contains(&bin) {
            return Err(MagFieldError::BadKpValue(bin as f64));
        }
        if bin != self.bin {
            self.bin = bin;
            self.a = PARAMS[bin - 1];
        }
        Ok(())
    }

    pub fn set_kp(&mut self, kp: f64) -> Result<()> {
        self.set_bin(kp_bin(kp)?)
    }

    pub fn out_of_range(gsm_re: &Vector3<f64>) -> bool {
        gsm_re.x < X_MIN || gsm_re.x > X_MAX || gsm_re.y.abs() > YZ_MAX || gsm_re.z.abs() > YZ_MAX
    }

    /// External field at a GSM position [Re] for dipole tilt `tilt` [rad].
    pub fn field_gsm(&self, tilt: f64, gsm_re: &Vector3<f64>) -> Result<Vector3<f64>> {
        if Self::out_of_range(gsm_re) {
            return Err(MagFieldError::OutOfRange(format!(
                "T89 position {:.2} {:.2} {:.2} Re",
                gsm_re.x, gsm_re.y, gsm_re.z
            )));
        }
        Ok(self.evaluate(tilt, gsm_re.x, gsm_re.y, gsm_re.z))
    }

    #[allow(clippy::many_single_char_names)]
    fn evaluate(&self, tilt: f64, x: f64, y: f64, z: f64) -> Vector3<f64> {
        let a = &self.a;
        let (ak1, ak2, ak3, ak4, ak5) = (a[0], a[1], a[2], a[3], a[4]);
        let (ak6, ak7, ak8, ak9) = (a[5], a[6], a[7], a[8]);
        let (ak10, ak11, ak12, ak13) = (a[9], a[10], a[11], a[12]);
        let (ak14, ak15, ak16, ak17) = (a[13], a[14], a[15], a[16]);
        let dx = a[17];
        let adr = a[18];
        let d0 = a[19];
        let dd = a[20];
        let rc = a[21];
        let g = a[22];
        let at = a[23];
        let p = a[24];
        let del = a[25];
        let q = a[26];
        let sx = a[27];
        let gam = a[28];
        let dyc = a[29];

        let rdyc2 = 1.0 / (dyc * dyc);
        let ha02 = 0.5 * A02;
        let hlwc2m = -0.5 * XLWC2;
        let drdyc2 = -2.0 * rdyc2;
        let hxlw2m = -0.5 * XLW2;
        let hxld2m = -0.5 * XLD2;
        let w1 = -0.5 / dx;
        let w2 = w1 * 2.0;
        let w4 = -1.0 / 3.0;
        let w3 = w4 / dx;
        let w5 = -0.5;
        let w6 = -3.0;
        let ak610 = ak6 * w1 + ak10 * w5;
        let ak711 = ak7 * w2 - ak11;
        let ak812 = ak8 * w2 + ak12 * w6;
        let ak913 = ak9 * w3 + ak13 * w4;

        let tlt2 = tilt * tilt;
        let sps = tilt.sin();
        let cps = (1.0 - sps * sps).sqrt();
        let (y2, z2) = (y * y, z * z);
        let tps = sps / cps;
        let htp = tps * 0.5;
        let xsm = x * cps - z * sps;
        let zsm = x * sps + z * cps;

        // Tail current sheet shape and its derivatives
        let xrc = xsm + rc;
        let sxrc = (xrc * xrc + 16.0).sqrt();
        let y4 = y2 * y2;
        let y410 = y4 + 1.0e4;
        let sy4 = sps / y410;
        let gsy4 = g * sy4;
        let zs1 = htp * (xrc - sxrc);
        let dzsx = -zs1 / sxrc;
        let zs = zs1 - gsy4 * y4;
        let d2zsgy = -sy4 / y410 * 4.0e4 * y2 * y;
        let dzsy = g * d2zsgy;

        // Ring current
        let xsm2 = xsm * xsm;
        let dsqt = (xsm2 + A02).sqrt();
        let fa0 = 0.5 * (1.0 + xsm / dsqt);
        let ddr = d0 + dd * fa0;
        let dfa0 = ha02 / dsqt.powi(3);
        let zr = zsm - zs;
        let tr = (zr * zr + ddr * ddr).sqrt();
        let rtr = 1.0 / tr;
        let ro2 = xsm2 + y2;
        let adrt = adr + tr;
        let adrt2 = adrt * adrt;
        let fk = 1.0 / (adrt2 + ro2);
        let dsfc = fk.sqrt();
        let fc = fk * fk * dsfc;
        let facxy = 3.0 * adrt * fc * rtr;
        let xzr = xsm * zr;
        let yzr = y * zr;
        let dbxdp = facxy * xzr;
        let ring_y = facxy * yzr;
        let xzyz = xsm * dzsx + y * dzsy;
        let faq = zr * xzyz - ddr * dd * dfa0 * xsm;
        let dbzdp = fc * (2.0 * adrt2 - ro2) + facxy * faq;
        let ring = Vector3::new(
            dbxdp * cps + dbzdp * sps,
            ring_y,
            dbzdp * cps - dbxdp * sps,
        );

        // Tail current sheet
        let dt = d0;
        let mut d = dt + del * y2;
        let mut adsl = 0.0;
        if gam.abs() >= 1.0e-6 {
            let xxd = xsm - XD;
            let rqd = 1.0 / (xxd * xxd + XLD2);
            let rqds = rqd.sqrt();
            let h = 0.5 * (1.0 + xxd * rqds);
            let hs = -hxld2m * rqd * rqds;
            d += gam * h;
            let xghs = xsm * gam * hs;
            adsl = -d * xghs;
        }
        let d2 = d * d;
        let t = (zr * zr + d2).sqrt();
        let xsmx = xsm - sx;
        let rdsq2 = 1.0 / (xsmx * xsmx + XLW2);
        let rdsq = rdsq2.sqrt();
        let v = 0.5 * (1.0 - xsmx * rdsq);
        let dvx = hxlw2m * rdsq * rdsq2;
        let om = ((xsm2 + 16.0).sqrt() - xsm).sqrt();
        let oms = -om / (om * om + xsm) * 0.5;
        let rdy = 1.0 / (p + q * om);
        let omsv = oms * v;
        let rdy2 = rdy * rdy;
        let fy = 1.0 / (1.0 + y2 * rdy2);
        let w = v * fy;
        let yfy1 = 2.0 * fy * y2 * rdy2;
        let fypr = yfy1 * rdy;
        let fydy = fypr * fy;
        let dwx = dvx * fy + fydy * q * omsv;
        let ydwy = -v * yfy1 * fy;
        let ddy = 2.0 * del * y;
        let att = at + t;
        let s1 = (att * att + ro2).sqrt();
        let f5 = 1.0 / s1;
        let f7 = 1.0 / (s1 + att);
        let f1 = f5 * f7;
        let f3 = f5.powi(3);
        let f9 = att * f3;
        let fs = zr * xzyz - d * y * ddy + adsl;
        let xdwx = xsm * dwx + ydwy;
        let rtt = 1.0 / t;
        let wt = w * rtt;
        let brrz1 = wt * f1;
        let brrz2 = wt * f3;
        let dbxc1 = brrz1 * xzr;
        let dbxc2 = brrz2 * xzr;
        let wtfs = wt * fs;
        let dbzc1 = w * f5 + xdwx * f7 + wtfs * f1;
        let dbzc2 = w * f9 + xdwx * f1 + wtfs * f3;
        let tail1 = Vector3::new(
            dbxc1 * cps + dbzc1 * sps,
            brrz1 * yzr,
            dbzc1 * cps - dbxc1 * sps,
        );
        let tail2 = Vector3::new(
            dbxc2 * cps + dbzc2 * sps,
            brrz2 * yzr,
            dbzc2 * cps - dbxc2 * sps,
        );

        // Closure currents
        let zpl = z + RT;
        let zmn = z - RT;
        let rogsm2 = x * x + y2;
        let spl = (zpl * zpl + rogsm2).sqrt();
        let smn = (zmn * zmn + rogsm2).sqrt();
        let xsxc = x - SXC;
        let rqc2 = 1.0 / (xsxc * xsxc + XLWC2);
        let rqc = rqc2.sqrt();
        let fyc = 1.0 / (1.0 + y2 * rdyc2);
        let wc = 0.5 * (1.0 - xsxc * rqc) * fyc;
        let dwcx = hlwc2m * rqc2 * rqc * fyc;
        let dwcy = drdyc2 * wc * fyc * y;
        let szrp = 1.0 / (spl + zpl);
        let szrm = 1.0 / (smn - zmn);
        let xywc = x * dwcx + y * dwcy;
        let wcsp = wc / spl;
        let wcsm = wc / smn;
        let fxyp = wcsp * szrp;
        let fxym = wcsm * szrm;
        let fxpl = x * fxyp;
        let fxmn = -x * fxym;
        let fypl = y * fxyp;
        let fymn = -y * fxym;
        let fzpl = wcsp + xywc * szrp;
        let fzmn = wcsm + xywc * szrm;
        let closure = Vector3::new(
            ak3 * (fxpl + fxmn) + ak4 * (fxpl - fxmn) * sps,
            ak3 * (fypl + fymn) + ak4 * (fypl - fymn) * sps,
            ak3 * (fzpl + fzmn) + ak4 * (fzpl - fzmn) * sps,
        );

        // Chapman-Ferraro and remaining terms
        let ex = (x / dx).exp();
        let ec = ex * cps;
        let es = ex * sps;
        let ecz = ec * z;
        let esz = es * z;
        let eszy2 = esz * y2;
        let eszz2 = esz * z2;
        let ecz2 = ecz * z;
        let esy = es * y;
        let cf = Vector3::new(
            ak6 * ecz + ak7 * es + ak8 * esy * y + ak9 * esz * z,
            ak10 * ecz * y + ak11 * esy + ak12 * esy * y2 + ak13 * esy * z2,
            ak14 * ec + ak15 * ec * y2 + ak610 * ecz2 + ak711 * esz + ak812 * eszy2
                + ak913 * eszz2,
        );

        let tail = tail1 * (ak1 + ak16 * tlt2) + tail2 * (ak2 + ak17 * tlt2);
        tail + closure + ring * ak5 + cf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kp_bins() {
        assert_eq!(kp_bin(0.0).unwrap(), 1);
        assert_eq!(kp_bin(0.33).unwrap(), 1);
        assert_eq!(kp_bin(0.67).unwrap(), 2);
        assert_eq!(kp_bin(2.0).unwrap(), 3);
        assert_eq!(kp_bin(5.33).unwrap(), 6);
        assert_eq!(kp_bin(5.67).unwrap(), 7);
        assert_eq!(kp_bin(9.0).unwrap(), 7);
        assert!(matches!(kp_bin(-0.1), Err(MagFieldError::BadKpValue(_))));
        assert!(matches!(kp_bin(9.5), Err(MagFieldError::BadKpValue(_))));
    }

    #[test]
    fn test_bad_bin_rejected() {
        assert!(Tsyganenko89::new(0).is_err());
        assert!(Tsyganenko89::new(8).is_err());
        assert_eq!(Tsyganenko89::new(4).unwrap().bin(), 4);
    }

    #[test]
    fn test_noon_meridian_symmetry_without_tilt() {
        let model = Tsyganenko89::new(3).unwrap();
        let north = model.field_gsm(0.0, &Vector3::new(-8.0, 0.0, 2.0)).unwrap();
        let south = model.field_gsm(0.0, &Vector3::new(-8.0, 0.0, -2.0)).unwrap();
        assert!((north.x + south.x).abs() < 1e-9);
        assert!((north.z - south.z).abs() < 1e-9);
        assert!(north.y.abs() < 1e-12);
    }

    #[test]
    fn test_tail_field_points_sunward_north_of_sheet() {
        let model = Tsyganenko89::new(2).unwrap();
        let b = model.field_gsm(0.0, &Vector3::new(-15.0, 0.0, 3.0)).unwrap();
        assert!(b.x > 0.0);
        let b = model.field_gsm(0.0, &Vector3::new(-15.0, 0.0, -3.0)).unwrap();
        assert!(b.x < 0.0);
    }

    #[test]
    fn test_activity_strengthens_near_earth_depression() {
        let quiet = Tsyganenko89::new(1).unwrap();
        let storm = Tsyganenko89::new(7).unwrap();
        let p = Vector3::new(-5.0, 0.0, 0.0);
        let bq = quiet.field_gsm(0.0, &p).unwrap();
        let bs = storm.field_gsm(0.0, &p).unwrap();
        assert!(bs.z < bq.z);
        assert!(bq.norm() < 200.0);
    }

    #[test]
    fn test_out_of_range() {
        let model = Tsyganenko89::default();
        assert!(model.field_gsm(0.0, &Vector3::new(-80.0, 0.0, 0.0)).is_err());
        assert!(model.field_gsm(0.0, &Vector3::new(0.0, 0.0, 45.0)).is_err());
    }
}
