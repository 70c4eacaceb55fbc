//! Coordinate systems and time-dependent frame rotations
//!
//! Supports every frame/unit identifier of the field engine. Inertial and
//! solar frames are routed through GEI; Earth-fixed frames (GEO, MAG, offset
//! dipole, geodetic) convert directly through GEO.

use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::coeffs::DipoleParameters;
use crate::error::{MagFieldError, Result};
use crate::time::{SolarGeometry, TimeValue};
use crate::EARTH_RADIUS_KM;

/// WGS84 equatorial radius
pub const WGS84_A_KM: f64 = 6378.137;
pub const WGS84_FLATTENING: f64 = 1.0 / 298.257223563;

/// Inclination of the solar equator to the ecliptic
const SOLAR_EQUATOR_INCLINATION_DEG: f64 = 7.25;

// ============================================================================
// Identifiers
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CoordSys {
    SphInRe,
    GsmInRe,
    SmInRe,
    GeiInRe,
    GeoInRe,
    MllInRe,
    MagInRe,
    MagsInRe,
    GseInRe,
    GseqInRe,
    OdxInRe,
    OdsInRe,
    OdxInKm,
    OdsInKm,
    SphInKm,
    GsmInKm,
    SmInKm,
    GeiInKm,
    GeoInKm,
    MllInKm,
    MagInKm,
    MagsInKm,
    GseInKm,
    GseqInKm,
    GeodInKm,
    GdzInKm,
    RllInRe,
    RllInKm,
}

/// Underlying Cartesian frame of an identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frame {
    Gei,
    Geo,
    Gsm,
    Sm,
    Gse,
    Gseq,
    Mag,
    OffsetDipole,
}

impl Frame {
    pub fn is_earth_fixed(self) -> bool {
        matches!(self, Frame::Geo | Frame::Mag | Frame::OffsetDipole)
    }
}

/// How the three components are laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Form {
    Cartesian,
    /// radius, colatitude [deg], longitude [deg]
    Spherical,
    /// radius, latitude [deg], longitude [deg]
    LatLon,
    /// radius, magnetic latitude [deg], magnetic local time [h]
    LocalTime,
    /// WGS84 altitude [km], latitude [deg], longitude [deg]
    Geodetic,
}

const NAMES: [(CoordSys, &str); 28] = [
    (CoordSys::SphInRe, "SPHinRE"),
    (CoordSys::GsmInRe, "GSMinRE"),
    (CoordSys::SmInRe, "SMinRE"),
    (CoordSys::GeiInRe, "GEIinRE"),
    (CoordSys::GeoInRe, "GEOinRE"),
    (CoordSys::MllInRe, "MLLinRE"),
    (CoordSys::MagInRe, "MAGinRE"),
    (CoordSys::MagsInRe, "MAGSinRE"),
    (CoordSys::GseInRe, "GSEinRE"),
    (CoordSys::GseqInRe, "GSEQinRE"),
    (CoordSys::OdxInRe, "ODXinRE"),
    (CoordSys::OdsInRe, "ODSinRE"),
    (CoordSys::OdxInKm, "ODXinKM"),
    (CoordSys::OdsInKm, "ODSinKM"),
    (CoordSys::SphInKm, "SPHinKM"),
    (CoordSys::GsmInKm, "GSMinKM"),
    (CoordSys::SmInKm, "SMinKM"),
    (CoordSys::GeiInKm, "GEIinKM"),
    (CoordSys::GeoInKm, "GEOinKM"),
    (CoordSys::MllInKm, "MLLinKM"),
    (CoordSys::MagInKm, "MAGinKM"),
    (CoordSys::MagsInKm, "MAGSinKM"),
    (CoordSys::GseInKm, "GSEinKM"),
    (CoordSys::GseqInKm, "GSEQinKM"),
    (CoordSys::GeodInKm, "GEODinKM"),
    (CoordSys::GdzInKm, "GDZinKM"),
    (CoordSys::RllInRe, "RLLinRE"),
    (CoordSys::RllInKm, "RLLinKM"),
];

impl CoordSys {
    pub const ALL: [CoordSys; 28] = [
        CoordSys::SphInRe,
        CoordSys::GsmInRe,
        CoordSys::SmInRe,
        CoordSys::GeiInRe,
        CoordSys::GeoInRe,
        CoordSys::MllInRe,
        CoordSys::MagInRe,
        CoordSys::MagsInRe,
        CoordSys::GseInRe,
        CoordSys::GseqInRe,
        CoordSys::OdxInRe,
        CoordSys::OdsInRe,
        CoordSys::OdxInKm,
        CoordSys::OdsInKm,
        CoordSys::SphInKm,
        CoordSys::GsmInKm,
        CoordSys::SmInKm,
        CoordSys::GeiInKm,
        CoordSys::GeoInKm,
        CoordSys::MllInKm,
        CoordSys::MagInKm,
        CoordSys::MagsInKm,
        CoordSys::GseInKm,
        CoordSys::GseqInKm,
        CoordSys::GeodInKm,
        CoordSys::GdzInKm,
        CoordSys::RllInRe,
        CoordSys::RllInKm,
    ];

    pub fn name(self) -> &'static str {
        NAMES
            .iter()
            .find(|(c, _)| *c == self)
            .map(|(_, n)| *n)
            .unwrap_or("UNKNOWN")
    }

    pub fn frame(self) -> Frame {
        use CoordSys::*;
        match self {
            GeiInRe | GeiInKm => Frame::Gei,
            SphInRe | SphInKm | GeoInRe | GeoInKm | GeodInKm | GdzInKm | RllInRe | RllInKm => {
                Frame::Geo
            }
            GsmInRe | GsmInKm => Frame::Gsm,
            SmInRe | SmInKm | MllInRe | MllInKm => Frame::Sm,
            GseInRe | GseInKm => Frame::Gse,
            GseqInRe | GseqInKm => Frame::Gseq,
            MagInRe | MagInKm | MagsInRe | MagsInKm => Frame::Mag,
            OdxInRe | OdxInKm | OdsInRe | OdsInKm => Frame::OffsetDipole,
        }
    }

    pub fn form(self) -> Form {
        use CoordSys::*;
        match self {
            SphInRe | SphInKm => Form::Spherical,
            MagsInRe | MagsInKm | OdsInRe | OdsInKm | RllInRe | RllInKm => Form::LatLon,
            MllInRe | MllInKm => Form::LocalTime,
            GeodInKm | GdzInKm => Form::Geodetic,
            _ => Form::Cartesian,
        }
    }

    /// Kilometres per length unit of the identifier.
    pub fn unit_km(self) -> f64 {
        use CoordSys::*;
        match self {
            SphInRe | GsmInRe | SmInRe | GeiInRe | GeoInRe | MllInRe | MagInRe | MagsInRe
            | GseInRe | GseqInRe | OdxInRe | OdsInRe | RllInRe => EARTH_RADIUS_KM,
            _ => 1.0,
        }
    }

    pub fn is_cartesian(self) -> bool {
        self.form() == Form::Cartesian
    }
}

impl fmt::Display for CoordSys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for CoordSys {
    type Err = MagFieldError;

    fn from_str(s: &str) -> Result<Self> {
        NAMES
            .iter()
            .find(|(_, n)| n.eq_ignore_ascii_case(s.trim()))
            .map(|(c, _)| *c)
            .ok_or_else(|| MagFieldError::BadInputCoordinate(format!("unknown system '{}'", s)))
    }
}

/// A position tagged with its coordinate system.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub coords: [f64; 3],
    pub sys: CoordSys,
}

impl Position {
    pub fn new(sys: CoordSys, a: f64, b: f64, c: f64) -> Self {
        Self {
            coords: [a, b, c],
            sys,
        }
    }

    pub fn vector(&self) -> Vector3<f64> {
        Vector3::from(self.coords)
    }
}

// ============================================================================
// Representation codecs
// ============================================================================

fn from_lat_lon(r: f64, lat_deg: f64, lon_deg: f64) -> Vector3<f64> {
    let (lat, lon) = (lat_deg.to_radians(), lon_deg.to_radians());
    Vector3::new(r * lat.cos() * lon.cos(), r * lat.cos() * lon.sin(), r * lat.sin())
}

fn to_lat_lon(v: &Vector3<f64>) -> [f64; 3] {
    let r = v.norm();
    if r == 0.0 {
        return [0.0, 0.0, 0.0];
    }
    let lat = v.z.atan2((v.x * v.x + v.y * v.y).sqrt()).to_degrees();
    let lon = v.y.atan2(v.x).to_degrees();
    [r, lat, lon]
}

/// WGS84 geodetic (alt km, lat deg, lon deg) to GEO km.
pub fn geodetic_to_geo(alt_km: f64, lat_deg: f64, lon_deg: f64) -> Vector3<f64> {
    let (lat, lon) = (lat_deg.to_radians(), lon_deg.to_radians());
    let e2 = 2.0 * WGS84_FLATTENING - WGS84_FLATTENING * WGS84_FLATTENING;
    let n = WGS84_A_KM / (1.0 - e2 * lat.sin().powi(2)).sqrt();
    Vector3::new(
        (n + alt_km) * lat.cos() * lon.cos(),
        (n + alt_km) * lat.cos() * lon.sin(),
        (n * (1.0 - e2) + alt_km) * lat.sin(),
    )
}

/// GEO km to WGS84 geodetic (alt km, lat deg, lon deg), iterated to 1e-12 rad.
pub fn geo_to_geodetic(v: &Vector3<f64>) -> [f64; 3] {
    let e2 = 2.0 * WGS84_FLATTENING - WGS84_FLATTENING * WGS84_FLATTENING;
    let p = (v.x * v.x + v.y * v.y).sqrt();
    let lon = v.y.atan2(v.x);
    let mut lat = v.z.atan2(p * (1.0 - e2));
    for _ in 0..20 {
        let n = WGS84_A_KM / (1.0 - e2 * lat.sin().powi(2)).sqrt();
        let alt = p * lat.cos() + v.z * lat.sin() - WGS84_A_KM * WGS84_A_KM / n;
        let next = v.z.atan2(p * (1.0 - e2 * n / (n + alt)));
        let done = (next - lat).abs() < 1e-12;
        lat = next;
        if done {
            break;
        }
    }
    let n = WGS84_A_KM / (1.0 - e2 * lat.sin().powi(2)).sqrt();
    let alt = p * lat.cos() + v.z * lat.sin() - WGS84_A_KM * WGS84_A_KM / n;
    [alt, lat.to_degrees(), lon.to_degrees()]
}

/// Radius of the WGS84 surface beneath a GEO position, km.
pub fn oblate_radius_km(geo_km: &Vector3<f64>) -> f64 {
    let [_, lat, lon] = geo_to_geodetic(geo_km);
    geodetic_to_geo(0.0, lat, lon).norm()
}

/// Decode a tagged position into Cartesian km in its frame.
pub fn decode(sys: CoordSys, c: [f64; 3]) -> Vector3<f64> {
    let unit = sys.unit_km();
    match sys.form() {
        Form::Cartesian => Vector3::new(c[0], c[1], c[2]) * unit,
        Form::Spherical => {
            let (theta, phi) = (c[1].to_radians(), c[2].to_radians());
            let r = c[0] * unit;
            Vector3::new(
                r * theta.sin() * phi.cos(),
                r * theta.sin() * phi.sin(),
                r * theta.cos(),
            )
        }
        Form::LatLon => from_lat_lon(c[0] * unit, c[1], c[2]),
        Form::LocalTime => from_lat_lon(c[0] * unit, c[1], (c[2] - 12.0) * 15.0),
        Form::Geodetic => geodetic_to_geo(c[0], c[1], c[2]),
    }
}

/// Encode Cartesian km in the identifier's frame into its representation.
pub fn encode(sys: CoordSys, v: &Vector3<f64>) -> [f64; 3] {
    let unit = sys.unit_km();
    match sys.form() {
        Form::Cartesian => [v.x / unit, v.y / unit, v.z / unit],
        Form::Spherical => {
            let [r, lat, lon] = to_lat_lon(v);
            [r / unit, 90.0 - lat, lon.rem_euclid(360.0)]
        }
        Form::LatLon => {
            let [r, lat, lon] = to_lat_lon(v);
            [r / unit, lat, lon]
        }
        Form::LocalTime => {
            let [r, lat, lon] = to_lat_lon(v);
            [r / unit, lat, (12.0 + lon / 15.0).rem_euclid(24.0)]
        }
        Form::Geodetic => geo_to_geodetic(v),
    }
}

// ============================================================================
// Frame rotations
// ============================================================================

fn rows(x: Vector3<f64>, y: Vector3<f64>, z: Vector3<f64>) -> Matrix3<f64> {
    Matrix3::from_rows(&[x.transpose(), y.transpose(), z.transpose()])
}

/// Axes of a frame whose X is the Sun line and whose XZ plane contains `pole`.
fn sun_aligned(sun: &Vector3<f64>, pole: &Vector3<f64>) -> Matrix3<f64> {
    let y = pole.cross(sun).normalize();
    let z = sun.cross(&y);
    rows(*sun, y, z)
}

/// All rotations for one rotation epoch. Matrices map GEI (or GEO) Cartesian
/// vectors into the named frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameRotations {
    pub time: TimeValue,
    pub sun: SolarGeometry,
    pub dipole: DipoleParameters,
    /// Dipole tilt toward the Sun, radians.
    pub tilt: f64,
    pub sun_gei: Vector3<f64>,
    pub dipole_gei: Vector3<f64>,
    pub gei_to_geo: Matrix3<f64>,
    pub gei_to_gse: Matrix3<f64>,
    pub gei_to_gseq: Matrix3<f64>,
    pub gei_to_gsm: Matrix3<f64>,
    pub gei_to_sm: Matrix3<f64>,
    pub geo_to_mag: Matrix3<f64>,
}

impl FrameRotations {
    pub fn new(time: TimeValue, dipole: DipoleParameters) -> Self {
        let sun = SolarGeometry::at(&time);
        let (sg, cg) = sun.gst.sin_cos();
        let gei_to_geo = Matrix3::new(cg, sg, 0.0, -sg, cg, 0.0, 0.0, 0.0, 1.0);

        let sun_gei = Vector3::new(
            sun.right_ascension.cos() * sun.declination.cos(),
            sun.right_ascension.sin() * sun.declination.cos(),
            sun.declination.sin(),
        );
        let dipole_gei = gei_to_geo.transpose() * dipole.axis_geo;

        let (se, ce) = sun.obliquity.sin_cos();
        let ecliptic_pole = Vector3::new(0.0, -se, ce);
        let gei_to_gse = sun_aligned(&sun_gei, &ecliptic_pole);
        let gei_to_gsm = sun_aligned(&sun_gei, &dipole_gei);

        let y_sm = dipole_gei.cross(&sun_gei).normalize();
        let gei_to_sm = rows(y_sm.cross(&dipole_gei), y_sm, dipole_gei);

        let node =
            (73.6667 + 0.013958 * (time.mjd + 3242.0) / 365.25).to_radians();
        let inc = SOLAR_EQUATOR_INCLINATION_DEG.to_radians();
        let axis_ecl = Vector3::new(inc.sin() * node.sin(), -inc.sin() * node.cos(), inc.cos());
        let solar_axis = Vector3::new(
            axis_ecl.x,
            axis_ecl.y * ce - axis_ecl.z * se,
            axis_ecl.y * se + axis_ecl.z * ce,
        );
        let gei_to_gseq = sun_aligned(&sun_gei, &solar_axis);

        let geo_to_mag = dipole.geo_to_mag();

        let tilt = dipole_gei.dot(&sun_gei).clamp(-1.0, 1.0).asin();

        Self {
            time,
            sun,
            dipole,
            tilt,
            sun_gei,
            dipole_gei,
            gei_to_geo,
            gei_to_gse,
            gei_to_gseq,
            gei_to_gsm,
            gei_to_sm,
            geo_to_mag,
        }
    }

    pub fn geo_to_gsm(&self) -> Matrix3<f64> {
        self.gei_to_gsm * self.gei_to_geo.transpose()
    }

    /// Rotation from GEI into an inertial or solar frame (Earth-fixed frames via GEO).
    fn gei_to(&self, frame: Frame) -> Matrix3<f64> {
        match frame {
            Frame::Gei => Matrix3::identity(),
            Frame::Geo => self.gei_to_geo,
            Frame::Gsm => self.gei_to_gsm,
            Frame::Sm => self.gei_to_sm,
            Frame::Gse => self.gei_to_gse,
            Frame::Gseq => self.gei_to_gseq,
            Frame::Mag | Frame::OffsetDipole => self.geo_to_mag * self.gei_to_geo,
        }
    }

    fn earth_fixed_to_geo(&self, frame: Frame, v: &Vector3<f64>) -> Vector3<f64> {
        match frame {
            Frame::Mag => self.geo_to_mag.transpose() * v,
            Frame::OffsetDipole => self.geo_to_mag.transpose() * v + self.dipole.center_geo_km,
            _ => *v,
        }
    }

    fn geo_to_earth_fixed(&self, frame: Frame, v: &Vector3<f64>) -> Vector3<f64> {
        match frame {
            Frame::Mag => self.geo_to_mag * v,
            Frame::OffsetDipole => self.geo_to_mag * (v - self.dipole.center_geo_km),
            _ => *v,
        }
    }

    /// Cartesian km between frames.
    pub fn convert_cartesian(&self, from: Frame, to: Frame, v: &Vector3<f64>) -> Vector3<f64> {
        if from == to {
            return *v;
        }
        if from.is_earth_fixed() && to.is_earth_fixed() {
            let geo = self.earth_fixed_to_geo(from, v);
            return self.geo_to_earth_fixed(to, &geo);
        }
        let gei = if from.is_earth_fixed() {
            self.gei_to_geo.transpose() * self.earth_fixed_to_geo(from, v)
        } else {
            self.gei_to(from).transpose() * v
        };
        if to.is_earth_fixed() {
            self.geo_to_earth_fixed(to, &(self.gei_to_geo * gei))
        } else {
            self.gei_to(to) * gei
        }
    }

    /// Convert a tagged position between any two identifiers.
    pub fn convert(&self, from: CoordSys, to: CoordSys, coords: [f64; 3]) -> Result<[f64; 3]> {
        if coords.iter().any(|c| !c.is_finite()) {
            return Err(MagFieldError::BadInputCoordinate(format!(
                "{:?} in {}",
                coords, from
            )));
        }
        if from == to {
            return Ok(coords);
        }
        let v = decode(from, coords);
        let w = self.convert_cartesian(from.frame(), to.frame(), &v);
        Ok(encode(to, &w))
    }

    pub fn convert_position(&self, position: &Position, to: CoordSys) -> Result<Position> {
        Ok(Position {
            coords: self.convert(position.sys, to, position.coords)?,
            sys: to,
        })
    }

    /// Convert many positions sharing this rotation epoch; failures become NaN.
    pub fn convert_batch(&self, from: CoordSys, to: CoordSys, coords: &[[f64; 3]]) -> Vec<[f64; 3]> {
        coords
            .iter()
            .map(|c| self.convert(from, to, *c).unwrap_or([f64::NAN; 3]))
            .collect()
    }

    /// Rotate a free vector (no origin shift, no scaling) between Cartesian frames.
    pub fn convert_vector(
        &self,
        from: CoordSys,
        to: CoordSys,
        v: &Vector3<f64>,
    ) -> Result<Vector3<f64>> {
        if !from.is_cartesian() || !to.is_cartesian() {
            return Err(MagFieldError::UnsupportedConversion(format!(
                "vector rotation {} -> {}",
                from, to
            )));
        }
        let rot = self.gei_to(to.frame()) * self.gei_to(from.frame()).transpose();
        Ok(rot * v)
    }

    /// GEO km position to GSM in Earth radii.
    pub fn geo_km_to_gsm_re(&self, geo_km: &Vector3<f64>) -> Vector3<f64> {
        self.geo_to_gsm() * geo_km / EARTH_RADIUS_KM
    }

    pub fn gsm_re_to_geo_km(&self, gsm_re: &Vector3<f64>) -> Vector3<f64> {
        self.geo_to_gsm().transpose() * gsm_re * EARTH_RADIUS_KM
    }

    /// Magnetic latitude [deg] and local time [h] of a GEO position.
    pub fn mlat_mlt(&self, geo_km: &Vector3<f64>) -> (f64, f64) {
        let sm = self.gei_to_sm * (self.gei_to_geo.transpose() * geo_km);
        let [_, lat, mlt] = encode(CoordSys::MllInKm, &sm);
        (lat, mlt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coeffs::CoefficientStore;
    use chrono::{TimeZone, Utc};
    use proptest::prelude::*;

    fn rotations() -> FrameRotations {
        let store = CoefficientStore::igrf13().unwrap();
        let dipole = store
            .load_year_table(2020)
            .unwrap()
            .dipole(store.reference_radius_km);
        let time = TimeValue::from_datetime(Utc.with_ymd_and_hms(2020, 3, 15, 6, 30, 0).unwrap());
        FrameRotations::new(time, dipole)
    }

    fn wrapped(delta: f64, period: f64) -> f64 {
        let d = delta.rem_euclid(period);
        d.min(period - d)
    }

    fn close(sys: CoordSys, a: [f64; 3], b: [f64; 3]) -> bool {
        let scale = a[0].abs().max(1.0);
        match sys.form() {
            Form::Cartesian => {
                let da = Vector3::from(a) - Vector3::from(b);
                da.norm() <= 1e-6 * Vector3::from(a).norm().max(1.0)
            }
            Form::LocalTime => {
                (a[0] - b[0]).abs() <= 1e-6 * scale
                    && (a[1] - b[1]).abs() < 1e-6
                    && wrapped(a[2] - b[2], 24.0) < 1e-6
            }
            _ => {
                (a[0] - b[0]).abs() <= 1e-6 * scale
                    && wrapped(a[1] - b[1], 360.0) < 1e-6
                    && wrapped(a[2] - b[2], 360.0) < 1e-6
            }
        }
    }

    #[test]
    fn test_name_codec() {
        for sys in CoordSys::ALL {
            assert_eq!(sys.name().parse::<CoordSys>().unwrap(), sys);
        }
        assert_eq!("geoinkm".parse::<CoordSys>().unwrap(), CoordSys::GeoInKm);
        assert!("XYZinKM".parse::<CoordSys>().is_err());
        assert_eq!(CoordSys::GseqInRe.to_string(), "GSEQinRE");
    }

    #[test]
    fn test_rotations_are_orthonormal() {
        let rot = rotations();
        for m in [
            rot.gei_to_geo,
            rot.gei_to_gse,
            rot.gei_to_gseq,
            rot.gei_to_gsm,
            rot.gei_to_sm,
            rot.geo_to_mag,
        ] {
            let err = (m * m.transpose() - Matrix3::identity()).norm();
            assert!(err < 1e-12);
            assert!((m.determinant() - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_gsm_sm_share_y_axis_and_tilt() {
        let rot = rotations();
        let y = Vector3::new(0.0, 1.0, 0.0);
        let gsm_y = rot.gei_to_gsm.transpose() * y;
        let sm_y = rot.gei_to_sm.transpose() * y;
        assert!((gsm_y - sm_y).norm() < 1e-12);
        // SM is GSM rotated about Y by the tilt
        let sm_x_in_gsm = rot.gei_to_gsm * (rot.gei_to_sm.transpose() * Vector3::x());
        assert!((sm_x_in_gsm.z.atan2(sm_x_in_gsm.x) + rot.tilt).abs() < 1e-12);
    }

    #[test]
    fn test_geodetic_round_trip_and_equator() {
        let v = geodetic_to_geo(0.0, 0.0, 0.0);
        assert!((v.x - WGS84_A_KM).abs() < 1e-9);
        let back = geo_to_geodetic(&geodetic_to_geo(450.0, 63.2, -120.5));
        assert!((back[0] - 450.0).abs() < 1e-6);
        assert!((back[1] - 63.2).abs() < 1e-9);
        assert!((back[2] + 120.5).abs() < 1e-9);
        let pole = geo_to_geodetic(&Vector3::new(0.0, 0.0, 7000.0));
        assert!((pole[1] - 90.0).abs() < 1e-9);
    }

    #[test]
    fn test_oblate_radius() {
        let equator = oblate_radius_km(&Vector3::new(7000.0, 0.0, 0.0));
        let pole = oblate_radius_km(&Vector3::new(0.0, 0.0, 7000.0));
        assert!((equator - WGS84_A_KM).abs() < 1e-6);
        assert!((pole - 6356.752).abs() < 1e-3);
    }

    #[test]
    fn test_mll_of_subsolar_point_is_noon() {
        let rot = rotations();
        let sun_geo = rot.gei_to_geo * rot.sun_gei * 7000.0;
        let (_, mlt) = rot.mlat_mlt(&sun_geo);
        assert!((mlt - 12.0).abs() < 1e-9);
    }

    #[test]
    fn test_offset_dipole_origin() {
        let rot = rotations();
        let center = rot.dipole.center_geo_km;
        let od = rot
            .convert(CoordSys::GeoInKm, CoordSys::OdxInKm, [center.x, center.y, center.z])
            .unwrap();
        assert!(Vector3::from(od).norm() < 1e-9);
    }

    #[test]
    fn test_vector_conversion_rejects_angles() {
        let rot = rotations();
        let v = Vector3::new(1.0, 2.0, 3.0);
        assert!(matches!(
            rot.convert_vector(CoordSys::GeoInKm, CoordSys::MllInKm, &v),
            Err(MagFieldError::UnsupportedConversion(_))
        ));
        let w = rot
            .convert_vector(CoordSys::GeoInKm, CoordSys::OdxInRe, &v)
            .unwrap();
        assert!((w.norm() - v.norm()).abs() < 1e-12);
    }

    #[test]
    fn test_batch_marks_bad_points() {
        let rot = rotations();
        let out = rot.convert_batch(
            CoordSys::GeoInKm,
            CoordSys::GsmInRe,
            &[[7000.0, 0.0, 0.0], [f64::NAN, 0.0, 0.0]],
        );
        assert!(out[0][0].is_finite());
        assert!(out[1][0].is_nan());
    }

    proptest! {
        #[test]
        fn test_round_trip_all_pairs(
            r in 6600.0f64..60000.0,
            lat in -80.0f64..80.0,
            lon in -179.0f64..179.0,
        ) {
            let rot = rotations();
            let geo = decode(CoordSys::RllInKm, [r, lat, lon]);
            for a in CoordSys::ALL {
                let pa = rot.convert(CoordSys::GeoInKm, a, [geo.x, geo.y, geo.z]).unwrap();
                for b in CoordSys::ALL {
                    let pb = rot.convert(a, b, pa).unwrap();
                    let back = rot.convert(b, a, pb).unwrap();
                    prop_assert!(close(a, pa, back), "{} -> {} -> {}: {:?} vs {:?}", a, b, a, pa, back);
                }
            }
        }
    }
}
