//! Magnetic field engine
//!
//! [`MagField`] owns the per-instance state (time cache, main-field epoch,
//! frame rotations, external-field activity) and exposes the canonical
//! operations on [`TimeValue`]/[`Position`] values. Every operation that can
//! trigger a lazy update takes `&mut self`.

use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::coeffs::{CoefficientStore, DipoleParameters};
use crate::config::{FieldModelConfig, ShellMode, TiltMode, TraceDirection};
use crate::coords::{decode, encode, oblate_radius_km, CoordSys, FrameRotations, Position};
use crate::error::{MagFieldError, Result};
use crate::external::{ExternalField, ExternalFieldKind, KpSchedule, KpSpec};
use crate::invariants::{
    invariant_for_mirror, k_from, local_pitch_angle, mcilwain_lm, mirror_field,
    pitch_angle_sines, processing_order, AdiabaticInvariantSet, BounceFinder, LinePath,
    PitchAngleInvariants,
};
use crate::main_field::{MainFieldKind, MainFieldModel};
use crate::time::{TimeCache, TimeValue, UpdatePlan};
use crate::tracer::{
    dipole_trace, line_crossings, trace_field_line, FieldLineTrace, FieldSource, TraceStatus,
};
use crate::EARTH_RADIUS_KM;

/// Dayside MLT window [h] and latitude [deg] for the Bmin-position Shabansky test
const SHABANSKY_MLT_H: (f64, f64) = (8.0, 16.0);
const SHABANSKY_MIN_MLAT_DEG: f64 = 15.0;

// ============================================================================
// Results
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FieldValue {
    /// GEO components, nT
    pub geo: Vector3<f64>,
    /// GSM components, nT
    pub gsm: Vector3<f64>,
    pub magnitude: f64,
}

impl FieldValue {
    pub fn nan() -> Self {
        let v = Vector3::repeat(f64::NAN);
        Self {
            geo: v,
            gsm: v,
            magnitude: f64::NAN,
        }
    }
}

/// A traced line in GEO kilometres.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldLine {
    pub points: Vec<Vector3<f64>>,
    /// |B| per point, nT
    pub b: Vec<f64>,
    /// Arc length per point, Re
    pub s: Vec<f64>,
    pub status: TraceStatus,
    pub bmin: f64,
    pub bmin_position: Vector3<f64>,
    pub south_footprint: Option<Vector3<f64>>,
    pub north_footprint: Option<Vector3<f64>>,
    pub shabansky: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Footprint {
    /// GEO km
    pub position: Vector3<f64>,
    pub b: f64,
}

/// Lm with the local and equatorial field magnitudes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LBBeq {
    pub lm: f64,
    pub b_local: f64,
    pub b_eq: f64,
}

impl LBBeq {
    pub fn b_over_beq(&self) -> f64 {
        self.b_local / self.b_eq
    }
}

/// Field quantities of one line without pitch-angle dependent values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BOutputs {
    /// GEO nT
    pub b_vector: Vector3<f64>,
    pub b_local: f64,
    pub bmin: f64,
    /// GEO km
    pub bmin_position: Vector3<f64>,
    pub mlt: f64,
    pub shabansky: bool,
}

// ============================================================================
// Combined field
// ============================================================================

/// Main plus external field in the working frame (GSM, Re).
pub struct CombinedField<'a> {
    main: &'a MainFieldModel,
    external: &'a ExternalField,
    geo_to_gsm: Matrix3<f64>,
}

impl<'a> CombinedField<'a> {
    pub fn new(
        main: &'a MainFieldModel,
        rotations: &FrameRotations,
        external: &'a ExternalField,
    ) -> Self {
        Self {
            main,
            external,
            geo_to_gsm: rotations.geo_to_gsm(),
        }
    }
}

impl FieldSource for CombinedField<'_> {
    fn field_gsm(&self, gsm_re: &Vector3<f64>) -> Result<Vector3<f64>> {
        let geo_km = self.geo_to_gsm.transpose() * gsm_re * EARTH_RADIUS_KM;
        let main = self.geo_to_gsm * self.main.field_geo(&geo_km)?;
        Ok(main + self.external.field_gsm(gsm_re)?)
    }
}

// ============================================================================
// Engine
// ============================================================================

#[derive(Debug, Clone)]
pub struct MagField {
    store: Arc<CoefficientStore>,
    config: FieldModelConfig,
    cache: TimeCache,
    main: Option<MainFieldModel>,
    rotations: Option<FrameRotations>,
    external: ExternalField,
    kp_schedule: Option<KpSchedule>,
}

fn load_store(config: &FieldModelConfig) -> Result<Arc<CoefficientStore>> {
    let store = match &config.coefficient_file {
        Some(path) => CoefficientStore::from_json_file(path)?,
        None => CoefficientStore::igrf13()?,
    };
    Ok(Arc::new(store))
}

impl MagField {
    pub fn new(config: FieldModelConfig) -> Result<Self> {
        let store = load_store(&config)?;
        Self::with_store(store, config)
    }

    /// Engine over an already loaded, shared coefficient store.
    pub fn with_store(store: Arc<CoefficientStore>, config: FieldModelConfig) -> Result<Self> {
        config.validate()?;
        let mut external = ExternalField::new(config.external_field);
        external.set_activity(config.kp)?;
        info!(
            "Magnetic field engine: {} main field, {} external field, {} shell",
            config.main_field, config.external_field, config.shell_mode
        );
        Ok(Self {
            store,
            cache: TimeCache::new(config.rates),
            config,
            main: None,
            rotations: None,
            external,
            kp_schedule: None,
        })
    }

    pub fn config(&self) -> &FieldModelConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<CoefficientStore> {
        &self.store
    }

    /// Replace the configuration; cached epochs are dropped.
    pub fn set_config(&mut self, config: FieldModelConfig) -> Result<()> {
        config.validate()?;
        if config.coefficient_file != self.config.coefficient_file {
            self.store = load_store(&config)?;
        }
        let mut external = ExternalField::new(config.external_field);
        external.set_activity(config.kp)?;
        self.external = external;
        self.cache = TimeCache::new(config.rates);
        self.main = None;
        self.rotations = None;
        self.config = config;
        Ok(())
    }

    pub fn main_field(&self) -> Option<&MainFieldModel> {
        self.main.as_ref()
    }

    pub fn rotations(&self) -> Option<&FrameRotations> {
        self.rotations.as_ref()
    }

    pub fn time_cache(&self) -> &TimeCache {
        &self.cache
    }

    pub fn external_kind(&self) -> ExternalFieldKind {
        self.external.kind()
    }

    /// Tilt used by the external field, radians.
    pub fn tilt(&self) -> Result<f64> {
        self.rotations
            .as_ref()
            .map(|_| self.external.tilt())
            .ok_or_else(|| MagFieldError::NotInitialized("no rotation epoch".into()))
    }

    pub fn dipole(&self) -> Result<DipoleParameters> {
        self.main
            .as_ref()
            .map(|m| m.dipole)
            .ok_or_else(|| MagFieldError::NotInitialized("no main field epoch".into()))
    }

    pub fn kp_bin(&self) -> usize {
        self.external.kp_bin()
    }

    // ------------------------------------------------------------------------
    // Time and activity
    // ------------------------------------------------------------------------

    /// Rate-checked refresh of the main-field epoch and, unless `main_only`,
    /// the rotation epoch.
    pub fn update_time(&mut self, time: &TimeValue, main_only: bool) -> Result<()> {
        let plan = self.cache.plan(time, main_only);
        self.apply(time, plan)
    }

    pub fn force_set_time(&mut self, time: &TimeValue) -> Result<()> {
        let plan = self.cache.plan_forced();
        self.apply(time, plan)
    }

    pub fn force_update_rotation(&mut self, time: &TimeValue, check_main: bool) -> Result<()> {
        let plan = self.cache.plan_forced_rotation(time, check_main);
        self.apply(time, plan)
    }

    fn apply(&mut self, time: &TimeValue, plan: UpdatePlan) -> Result<()> {
        if !plan.any() {
            return Ok(());
        }
        if plan.main_field {
            let coefficients = match self.config.override_year {
                Some(year) => self.store.load_year_table(year)?.clone(),
                None => self.store.coefficients_at(time.decimal_year()?)?,
            };
            debug!(
                epoch = coefficients.epoch,
                kind = %self.config.main_field,
                "main field coefficients reloaded"
            );
            self.main = Some(MainFieldModel::new(
                self.config.main_field,
                coefficients,
                self.store.reference_radius_km,
                self.config.min_field_radius_re * EARTH_RADIUS_KM,
            ));
        }
        if plan.rotation {
            let dipole = self.dipole()?;
            let rotations = FrameRotations::new(*time, dipole);
            let tilt = match self.config.tilt {
                TiltMode::Computed => rotations.tilt,
                TiltMode::Fixed(deg) => deg.to_radians(),
            };
            debug!(mjd = time.mjd, tilt_deg = tilt.to_degrees(), "frame rotations refreshed");
            self.external.set_tilt(tilt);
            self.rotations = Some(rotations);
        }
        self.cache.commit(*time, plan);
        Ok(())
    }

    /// Single continuous Kp for all later calls.
    pub fn set_kp_value(&mut self, kp: f64) -> Result<()> {
        self.set_kp(KpSpec::Value(kp))
    }

    pub fn set_kp_bin(&mut self, bin: usize) -> Result<()> {
        self.set_kp(KpSpec::Bin(bin))
    }

    fn set_kp(&mut self, kp: KpSpec) -> Result<()> {
        self.external.set_activity(kp)?;
        self.config.kp = kp;
        self.kp_schedule = None;
        Ok(())
    }

    /// Three-hourly Kp values from 00:00 GMT of `reference`.
    pub fn set_kp_values(&mut self, reference: TimeValue, values: Vec<f64>) -> Result<()> {
        self.kp_schedule = Some(KpSchedule::new(reference, values)?);
        Ok(())
    }

    fn refresh_activity(&mut self, time: &TimeValue) -> Result<()> {
        let kp = match &self.kp_schedule {
            Some(schedule) => KpSpec::Value(schedule.kp_at(time)?),
            None => self.config.kp,
        };
        self.external.set_activity(kp)
    }

    fn prepare(&mut self, time: &TimeValue) -> Result<()> {
        self.update_time(time, false)?;
        self.refresh_activity(time)
    }

    fn state(&self) -> Result<(&MainFieldModel, &FrameRotations)> {
        match (&self.main, &self.rotations) {
            (Some(main), Some(rotations)) => Ok((main, rotations)),
            _ => Err(MagFieldError::NotInitialized("time not set".into())),
        }
    }

    fn source(&self) -> Result<CombinedField<'_>> {
        let (main, rotations) = self.state()?;
        Ok(CombinedField::new(main, rotations, &self.external))
    }

    fn geo_km(&self, position: &Position) -> Result<Vector3<f64>> {
        let (_, rotations) = self.state()?;
        Ok(Vector3::from(rotations.convert(
            position.sys,
            CoordSys::GeoInKm,
            position.coords,
        )?))
    }

    // ------------------------------------------------------------------------
    // Coordinates
    // ------------------------------------------------------------------------

    pub fn convert(
        &mut self,
        time: &TimeValue,
        from: CoordSys,
        to: CoordSys,
        coords: [f64; 3],
    ) -> Result<[f64; 3]> {
        if from.frame() == to.frame() {
            if coords.iter().any(|c| !c.is_finite()) {
                return Err(MagFieldError::BadInputCoordinate(format!("{:?} in {}", coords, from)));
            }
            return Ok(encode(to, &decode(from, coords)));
        }
        self.prepare(time)?;
        self.state()?.1.convert(from, to, coords)
    }

    pub fn convert_position(
        &mut self,
        time: &TimeValue,
        position: &Position,
        to: CoordSys,
    ) -> Result<Position> {
        Ok(Position {
            coords: self.convert(time, position.sys, to, position.coords)?,
            sys: to,
        })
    }

    /// Positions sharing one time; failing elements are NaN.
    pub fn convert_batch(
        &mut self,
        time: &TimeValue,
        from: CoordSys,
        to: CoordSys,
        coords: &[[f64; 3]],
    ) -> Result<Vec<[f64; 3]>> {
        self.prepare(time)?;
        Ok(self.state()?.1.convert_batch(from, to, coords))
    }

    pub fn convert_vector(
        &mut self,
        time: &TimeValue,
        from: CoordSys,
        to: CoordSys,
        v: &Vector3<f64>,
    ) -> Result<Vector3<f64>> {
        self.prepare(time)?;
        self.state()?.1.convert_vector(from, to, v)
    }

    /// WGS84 surface radius [km] under a position.
    pub fn oblate_radius(&mut self, time: &TimeValue, position: &Position) -> Result<f64> {
        let geo = self.convert(time, position.sys, CoordSys::GeoInKm, position.coords)?;
        Ok(oblate_radius_km(&Vector3::from(geo)))
    }

    // ------------------------------------------------------------------------
    // Field
    // ------------------------------------------------------------------------

    pub fn compute_bfield(&mut self, time: &TimeValue, position: &Position) -> Result<FieldValue> {
        self.prepare(time)?;
        let geo_km = self.geo_km(position)?;
        self.field_at_geo(&geo_km)
    }

    fn field_at_geo(&self, geo_km: &Vector3<f64>) -> Result<FieldValue> {
        let (main, rotations) = self.state()?;
        let geo_to_gsm = rotations.geo_to_gsm();
        let mut gsm = geo_to_gsm * main.field_geo(geo_km)?;
        if self.external.kind() != ExternalFieldKind::None {
            gsm += self.external.field_gsm(&(geo_to_gsm * geo_km / EARTH_RADIUS_KM))?;
        }
        Ok(FieldValue {
            geo: geo_to_gsm.transpose() * gsm,
            gsm,
            magnitude: gsm.norm(),
        })
    }

    /// One time per position, or a single time for all of them. Failing
    /// elements are NaN.
    pub fn compute_bfield_batch(
        &mut self,
        times: &[TimeValue],
        positions: &[Position],
    ) -> Result<Vec<FieldValue>> {
        check_times(times, positions.len())?;
        Ok(positions
            .iter()
            .enumerate()
            .map(|(i, p)| {
                let time = times[i.min(times.len() - 1)];
                self.compute_bfield(&time, p).unwrap_or_else(|_| FieldValue::nan())
            })
            .collect())
    }

    /// Dipole shell r/cos²λ in the model's dipole frame.
    pub fn compute_ldip(&mut self, time: &TimeValue, position: &Position) -> Result<f64> {
        self.prepare(time)?;
        let geo_km = self.geo_km(position)?;
        self.state()?.0.dipole_l(&geo_km)
    }

    /// L for a particle mirroring at the position (local pitch angle 90°).
    pub fn compute_lm(&mut self, time: &TimeValue, position: &Position) -> Result<f64> {
        Ok(self.compute_lbbeq(time, position)?.lm)
    }

    pub fn compute_lbbeq(&mut self, time: &TimeValue, position: &Position) -> Result<LBBeq> {
        self.prepare(time)?;
        let geo_km = self.geo_km(position)?;
        let b_local = self.field_at_geo(&geo_km)?.magnitude;
        let (main, _) = self.state()?;
        let source = self.source()?;
        let trace = self.invariant_trace(&source, &geo_km)?;
        let lm = match self.config.shell_mode {
            ShellMode::Dipole => main.dipole_l(&geo_km)?,
            ShellMode::McIlwain => {
                let path = LinePath::new(&trace, &source);
                let mut finder = BounceFinder::new(&path);
                let i = invariant_for_mirror(&mut finder, b_local)?;
                mcilwain_lm(main.dipole.moment_nt, i, b_local, &self.config.l_search)?
            }
        };
        Ok(LBBeq {
            lm,
            b_local,
            b_eq: trace.bmin.b,
        })
    }

    pub fn compute_all_bout(&mut self, time: &TimeValue, position: &Position) -> Result<BOutputs> {
        self.prepare(time)?;
        let geo_km = self.geo_km(position)?;
        let b_vector = self.field_at_geo(&geo_km)?.geo;
        let source = self.source()?;
        let trace = self.invariant_trace(&source, &geo_km)?;
        let (_, rotations) = self.state()?;
        let bmin_position = rotations.gsm_re_to_geo_km(&trace.bmin.position);
        Ok(BOutputs {
            b_vector,
            b_local: b_vector.norm(),
            bmin: trace.bmin.b,
            bmin_position,
            mlt: rotations.mlat_mlt(&geo_km).1,
            shabansky: self.is_shabansky(&trace, &bmin_position)?,
        })
    }

    // ------------------------------------------------------------------------
    // Field lines
    // ------------------------------------------------------------------------

    fn trace_floor_re(&self) -> f64 {
        self.config.trace_radius_km() / EARTH_RADIUS_KM
    }

    fn uses_dipole_shortcut(&self) -> bool {
        self.config.main_field.is_dipole() && self.external.kind() == ExternalFieldKind::None
    }

    fn is_shabansky(&self, trace: &FieldLineTrace, bmin_geo_km: &Vector3<f64>) -> Result<bool> {
        let (_, rotations) = self.state()?;
        let (mlat, mlt) = rotations.mlat_mlt(bmin_geo_km);
        let dayside = (SHABANSKY_MLT_H.0..=SHABANSKY_MLT_H.1).contains(&mlt);
        let flagged = trace.shabansky || (dayside && mlat.abs() > SHABANSKY_MIN_MLAT_DEG);
        if flagged {
            warn!(mlt, mlat, "Shabansky orbit suspected");
        }
        Ok(flagged)
    }

    /// Trace through a GEO position toward the sphere `floor_re`.
    fn trace_geo(
        &self,
        geo_km: &Vector3<f64>,
        direction: TraceDirection,
        floor_re: f64,
    ) -> Result<FieldLine> {
        let (main, rotations) = self.state()?;
        if self.uses_dipole_shortcut() {
            let geo_to_mag = main.dipole.geo_to_mag();
            let center = match self.config.main_field {
                MainFieldKind::OffsetDipole => {
                    geo_to_mag * main.dipole.center_geo_km / EARTH_RADIUS_KM
                }
                _ => Vector3::zeros(),
            };
            let seed = main.dipole_frame_re(geo_km);
            let trace = dipole_trace(
                main.dipole.moment_nt,
                &center,
                &seed,
                direction,
                floor_re,
                &self.config.tracer,
            )?;
            let to_geo = |p: &Vector3<f64>| geo_to_mag.transpose() * p * EARTH_RADIUS_KM;
            return Ok(self.field_line_from(&trace, to_geo, false));
        }

        let source = self.source()?;
        let seed = rotations.geo_km_to_gsm_re(geo_km);
        if !self.external.in_bounds(&seed) {
            return Err(MagFieldError::FieldLineOutsideModelBounds(format!(
                "seed {:.2} {:.2} {:.2} Re outside the {} field",
                seed.x,
                seed.y,
                seed.z,
                self.external.kind()
            )));
        }
        let trace = trace_field_line(&source, &seed, direction, floor_re, &self.config.tracer)?;
        let bmin_geo = rotations.gsm_re_to_geo_km(&trace.bmin.position);
        let shabansky = self.is_shabansky(&trace, &bmin_geo)?;
        Ok(self.field_line_from(&trace, |p| rotations.gsm_re_to_geo_km(p), shabansky))
    }

    fn field_line_from<F>(&self, trace: &FieldLineTrace, to_geo: F, shabansky: bool) -> FieldLine
    where
        F: Fn(&Vector3<f64>) -> Vector3<f64>,
    {
        FieldLine {
            points: trace.points.iter().map(|p| to_geo(&p.position)).collect(),
            b: trace.points.iter().map(|p| p.b).collect(),
            s: trace.points.iter().map(|p| p.s).collect(),
            status: trace.status,
            bmin: trace.bmin.b,
            bmin_position: to_geo(&trace.bmin.position),
            south_footprint: trace.south_footprint().map(|p| to_geo(&p.position)),
            north_footprint: trace.north_footprint().map(|p| to_geo(&p.position)),
            shabansky,
        }
    }

    /// Trace with the configured direction down to the configured altitude.
    pub fn compute_field_line(&mut self, time: &TimeValue, position: &Position) -> Result<FieldLine> {
        self.prepare(time)?;
        let geo_km = self.geo_km(position)?;
        self.trace_geo(&geo_km, self.config.trace_direction, self.trace_floor_re())
    }

    /// Footprint of the line through `position` at `altitude_km` in one hemisphere.
    pub fn compute_footprint(
        &mut self,
        time: &TimeValue,
        position: &Position,
        altitude_km: f64,
        hemisphere: TraceDirection,
    ) -> Result<Footprint> {
        if !matches!(hemisphere, TraceDirection::North | TraceDirection::South) {
            return Err(MagFieldError::UnsupportedOption(format!(
                "footprint hemisphere {}",
                hemisphere
            )));
        }
        let floor_re = (EARTH_RADIUS_KM + altitude_km) / EARTH_RADIUS_KM;
        if !(floor_re > 0.0) {
            return Err(MagFieldError::OutOfRange(format!("footprint altitude {} km", altitude_km)));
        }
        self.prepare(time)?;
        let geo_km = self.geo_km(position)?;
        let line = self.trace_geo(&geo_km, hemisphere, floor_re)?;
        let (foot, b) = match hemisphere {
            TraceDirection::North => (line.north_footprint, line.b.last()),
            _ => (line.south_footprint, line.b.first()),
        };
        match (foot, b) {
            (Some(position), Some(&b)) => Ok(Footprint { position, b }),
            _ => Err(MagFieldError::FieldLineOutsideModelBounds(format!(
                "line does not reach {} km in the {} hemisphere",
                altitude_km, hemisphere
            ))),
        }
    }

    /// Points where an existing line crosses `altitude_km`; a negative
    /// altitude selects the WGS84 surface.
    pub fn field_line_location(line: &FieldLine, altitude_km: f64) -> Vec<Vector3<f64>> {
        if altitude_km < 0.0 {
            line_crossings(&line.points, oblate_radius_km)
        } else {
            line_crossings(&line.points, |_| EARTH_RADIUS_KM + altitude_km)
        }
    }

    /// Whether two positions lie on the same shell within `tolerance` in L.
    pub fn compute_is_conjugate(
        &mut self,
        time: &TimeValue,
        a: &Position,
        b: &Position,
        tolerance: f64,
    ) -> Result<bool> {
        let la = self.compute_lm(time, a)?;
        let lb = self.compute_lm(time, b)?;
        Ok((la - lb).abs() <= tolerance)
    }

    /// Lines seeded at the trace altitude on an MLT × magnetic-latitude grid.
    pub fn compute_field_line_family(
        &mut self,
        time: &TimeValue,
        mlts_h: &[f64],
        mlats_deg: &[f64],
    ) -> Result<Vec<Result<FieldLine>>> {
        self.prepare(time)?;
        let radius = self.config.trace_radius_km();
        let mut lines = Vec::with_capacity(mlts_h.len() * mlats_deg.len());
        for &mlt in mlts_h {
            for &mlat in mlats_deg {
                let seed = Position::new(CoordSys::MllInKm, radius, mlat, mlt);
                lines.push(self.compute_field_line(time, &seed));
            }
        }
        Ok(lines)
    }

    /// The line through `center` followed by `count` lines seeded on a circle
    /// of `radius_km` perpendicular to the local field.
    pub fn compute_flux_tube(
        &mut self,
        time: &TimeValue,
        center: &Position,
        radius_km: f64,
        count: usize,
    ) -> Result<Vec<Result<FieldLine>>> {
        self.prepare(time)?;
        let geo_km = self.geo_km(center)?;
        let b = self.field_at_geo(&geo_km)?.geo.normalize();
        let reference = if b.z.abs() < 0.9 { Vector3::z() } else { Vector3::x() };
        let e1 = b.cross(&reference).normalize();
        let e2 = b.cross(&e1);

        let mut seeds = vec![geo_km];
        for k in 0..count {
            let angle = std::f64::consts::TAU * k as f64 / count as f64;
            seeds.push(geo_km + (e1 * angle.cos() + e2 * angle.sin()) * radius_km);
        }
        let direction = self.config.trace_direction;
        let floor_re = self.trace_floor_re();
        Ok(seeds
            .iter()
            .map(|seed| self.trace_geo(seed, direction, floor_re))
            .collect())
    }

    // ------------------------------------------------------------------------
    // Adiabatic invariants
    // ------------------------------------------------------------------------

    fn invariant_trace(
        &self,
        source: &CombinedField<'_>,
        geo_km: &Vector3<f64>,
    ) -> Result<FieldLineTrace> {
        let (_, rotations) = self.state()?;
        let threshold = self.config.lm_threshold_re();
        let r = geo_km.norm() / EARTH_RADIUS_KM;
        if r < threshold {
            return Err(MagFieldError::PointsInsideSphere(format!(
                "{:.4} Re inside the {:.2} Re invariant sphere",
                r, threshold
            )));
        }
        let seed = rotations.geo_km_to_gsm_re(geo_km);
        let trace = trace_field_line(
            source,
            &seed,
            TraceDirection::NorthAndSouth,
            threshold,
            &self.config.tracer,
        )
        .map_err(|e| match e {
            MagFieldError::FieldLineOutsideModelBounds(msg) => MagFieldError::PointsOutsideSphere(msg),
            MagFieldError::FieldLineInsideEarthSphere(msg) => MagFieldError::PointsInsideSphere(msg),
            other => other,
        })?;
        if !trace.is_closed() {
            return Err(MagFieldError::PointsOutsideSphere(format!(
                "open field line through {:.1} {:.1} {:.1} km",
                geo_km.x, geo_km.y, geo_km.z
            )));
        }
        Ok(trace)
    }

    /// Lm, I, K and Bmirror for equatorial pitch angles in degrees.
    pub fn compute_ad_invariants(
        &mut self,
        time: &TimeValue,
        position: &Position,
        pitch_angles_deg: &[f64],
    ) -> Result<AdiabaticInvariantSet> {
        let sines = pitch_angle_sines(pitch_angles_deg)?;
        self.prepare(time)?;
        let geo_km = self.geo_km(position)?;
        let b_vector = self.field_at_geo(&geo_km)?.geo;
        let (main, rotations) = self.state()?;
        let source = self.source()?;
        let trace = self.invariant_trace(&source, &geo_km)?;
        let bmin = trace.bmin.b;
        let bmin_position = rotations.gsm_re_to_geo_km(&trace.bmin.position);
        let shabansky = self.is_shabansky(&trace, &bmin_position)?;

        let path = LinePath::new(&trace, &source);
        let mut finder = BounceFinder::new(&path);
        let mut pitch = vec![None; sines.len()];
        for idx in processing_order(&sines) {
            let bmirror = mirror_field(bmin, sines[idx]);
            let i = invariant_for_mirror(&mut finder, bmirror)?;
            let lm = match self.config.shell_mode {
                ShellMode::Dipole => main.dipole_l(&geo_km)?,
                ShellMode::McIlwain => {
                    mcilwain_lm(main.dipole.moment_nt, i, bmirror, &self.config.l_search)?
                }
            };
            pitch[idx] = Some(PitchAngleInvariants {
                pitch_angle: pitch_angles_deg[idx],
                lm,
                i,
                k: k_from(i, bmirror),
                bmirror,
            });
        }

        Ok(AdiabaticInvariantSet {
            pitch: pitch.into_iter().flatten().collect(),
            bmin,
            bmin_position,
            b_vector,
            b_local: b_vector.norm(),
            mlt: rotations.mlat_mlt(&geo_km).1,
            shabansky,
        })
    }

    /// Invariants per position; each element carries its own result.
    pub fn compute_ad_invariants_batch(
        &mut self,
        times: &[TimeValue],
        positions: &[Position],
        pitch_angles_deg: &[f64],
    ) -> Result<Vec<Result<AdiabaticInvariantSet>>> {
        check_times(times, positions.len())?;
        Ok(positions
            .iter()
            .enumerate()
            .map(|(i, p)| {
                let time = times[i.min(times.len() - 1)];
                self.compute_ad_invariants(&time, p, pitch_angles_deg)
            })
            .collect())
    }

    /// Local pitch angles [deg] of look directions given as Cartesian vectors in `frame`.
    pub fn compute_direction_pitch_angles(
        &mut self,
        time: &TimeValue,
        position: &Position,
        directions: &[Vector3<f64>],
        frame: CoordSys,
    ) -> Result<Vec<f64>> {
        self.prepare(time)?;
        let geo_km = self.geo_km(position)?;
        let b_geo = self.field_at_geo(&geo_km)?.geo;
        let b = self
            .state()?
            .1
            .convert_vector(CoordSys::GeoInKm, frame, &b_geo)?;
        directions.iter().map(|d| local_pitch_angle(d, &b)).collect()
    }

    // ------------------------------------------------------------------------
    // MJD adapters
    // ------------------------------------------------------------------------

    pub fn compute_bfield_mjd(&mut self, mjd: f64, sys: CoordSys, coords: [f64; 3]) -> Result<FieldValue> {
        self.compute_bfield(&TimeValue::from_mjd(mjd), &Position { coords, sys })
    }

    pub fn compute_lm_mjd(&mut self, mjd: f64, sys: CoordSys, coords: [f64; 3]) -> Result<f64> {
        self.compute_lm(&TimeValue::from_mjd(mjd), &Position { coords, sys })
    }

    pub fn convert_mjd(
        &mut self,
        mjd: f64,
        from: CoordSys,
        to: CoordSys,
        coords: [f64; 3],
    ) -> Result<[f64; 3]> {
        self.convert(&TimeValue::from_mjd(mjd), from, to, coords)
    }

    pub fn compute_ad_invariants_mjd(
        &mut self,
        mjd: f64,
        sys: CoordSys,
        coords: [f64; 3],
        pitch_angles_deg: &[f64],
    ) -> Result<AdiabaticInvariantSet> {
        self.compute_ad_invariants(&TimeValue::from_mjd(mjd), &Position { coords, sys }, pitch_angles_deg)
    }
}

fn check_times(times: &[TimeValue], positions: usize) -> Result<()> {
    if times.len() == 1 || times.len() == positions {
        Ok(())
    } else {
        Err(MagFieldError::InsufficientStorage {
            needed: positions,
            available: times.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracer::{BranchEnd, TracePoint};
    use chrono::{TimeZone, Utc};

    fn t2020() -> TimeValue {
        TimeValue::from_datetime(Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap())
    }

    fn engine(main_field: MainFieldKind) -> MagField {
        let shell_mode = match main_field {
            MainFieldKind::OffsetDipole => ShellMode::Dipole,
            _ => ShellMode::McIlwain,
        };
        MagField::new(FieldModelConfig {
            main_field,
            shell_mode,
            ..Default::default()
        })
        .unwrap()
    }

    fn geo(x: f64, y: f64, z: f64) -> Position {
        Position::new(CoordSys::GeoInKm, x, y, z)
    }

    fn flat_trace(secondary_minimum: bool) -> FieldLineTrace {
        let point = TracePoint {
            position: Vector3::new(-9.0, 0.0, 0.0),
            b: 40.0,
            s: 0.0,
        };
        FieldLineTrace {
            points: vec![point],
            segment_mid_b: Vec::new(),
            seed_index: 0,
            south_end: BranchEnd::Footprint,
            north_end: BranchEnd::Footprint,
            status: TraceStatus::Closed,
            bmin_index: 0,
            bmin: point,
            shabansky: secondary_minimum,
        }
    }

    #[test]
    fn test_disturbed_with_offset_dipole_rejected() {
        let err = MagField::new(FieldModelConfig {
            main_field: MainFieldKind::OffsetDipole,
            shell_mode: ShellMode::Dipole,
            external_field: ExternalFieldKind::Disturbed,
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(err, MagFieldError::UnsupportedOption(_)));
    }

    #[test]
    fn test_operations_need_coverage() {
        let mut field = engine(MainFieldKind::Igrf);
        let early = TimeValue::from_datetime(Utc.with_ymd_and_hms(1890, 1, 1, 0, 0, 0).unwrap());
        let err = field.compute_bfield(&early, &geo(7000.0, 0.0, 0.0)).unwrap_err();
        assert!(matches!(err, MagFieldError::NotInitialized(_)));
        assert!(field.tilt().is_err());
    }

    #[test]
    fn test_historical_dates_evaluate() {
        let mut field = engine(MainFieldKind::Igrf);
        let p = geo(7000.0, 0.0, 0.0);
        let at = |year| TimeValue::from_datetime(Utc.with_ymd_and_hms(year, 6, 1, 0, 0, 0).unwrap());
        let now = field.compute_bfield(&at(2020), &p).unwrap().magnitude;
        for year in [1950, 1995, 2000, 2015, 2019] {
            let b = field.compute_bfield(&at(year), &p).unwrap().magnitude;
            assert!(b.is_finite(), "{}", year);
            assert!((b - now).abs() / now < 0.2, "{}: {} vs {}", year, b, now);
        }
    }

    #[test]
    fn test_update_rates_respected() {
        let mut field = engine(MainFieldKind::Igrf);
        let t0 = t2020();
        field.update_time(&t0, false).unwrap();
        field.update_time(&t0.add_days(0.5), false).unwrap();
        assert_eq!(field.time_cache().main_time(), Some(t0));
        field.update_time(&t0.add_days(1.0), false).unwrap();
        assert_eq!(field.time_cache().main_time(), Some(t0.add_days(1.0)));

        field.force_update_rotation(&t0.add_days(1.2), true).unwrap();
        assert_eq!(field.time_cache().main_time(), Some(t0.add_days(1.0)));
        assert_eq!(field.time_cache().rotation_time(), Some(t0.add_days(1.2)));
        field.force_set_time(&t0.add_days(1.3)).unwrap();
        assert_eq!(field.time_cache().main_time(), Some(t0.add_days(1.3)));
    }

    #[test]
    fn test_fixed_tilt_reaches_external_field() {
        let mut field = MagField::new(FieldModelConfig {
            external_field: ExternalFieldKind::Disturbed,
            tilt: TiltMode::Fixed(10.0),
            ..Default::default()
        })
        .unwrap();
        field.update_time(&t2020(), false).unwrap();
        assert!((field.tilt().unwrap() - 10.0_f64.to_radians()).abs() < 1e-12);
    }

    #[test]
    fn test_kp_schedule_drives_bin() {
        let mut field = MagField::new(FieldModelConfig {
            external_field: ExternalFieldKind::Disturbed,
            ..Default::default()
        })
        .unwrap();
        let day = TimeValue::from_mjd(t2020().mjd.floor());
        field.set_kp_values(day, vec![0.0, 6.0]).unwrap();
        let p = geo(-30000.0, 0.0, 0.0);
        field.compute_bfield(&day.add_days(0.05), &p).unwrap();
        assert_eq!(field.kp_bin(), 1);
        field.compute_bfield(&day.add_days(0.2), &p).unwrap();
        assert_eq!(field.kp_bin(), 7);
        assert!(field.compute_bfield(&day.add_days(0.3), &p).is_err());

        field.set_kp_value(2.0).unwrap();
        field.compute_bfield(&day.add_days(3.0), &p).unwrap();
        assert_eq!(field.kp_bin(), 3);
        assert!(matches!(field.set_kp_bin(9), Err(MagFieldError::BadKpValue(_))));
    }

    #[test]
    fn test_bfield_frames_agree() {
        let mut field = engine(MainFieldKind::Igrf);
        let value = field.compute_bfield(&t2020(), &geo(0.0, 0.0, 6600.0)).unwrap();
        assert!((value.magnitude - 51312.69).abs() / 51312.69 < 0.01);
        assert!((value.geo.norm() - value.magnitude).abs() < 1e-6);
        let rotated = field
            .convert_vector(&t2020(), CoordSys::GeoInKm, CoordSys::GsmInKm, &value.geo)
            .unwrap();
        assert!((rotated - value.gsm).norm() < 1e-6);
        let fv = FieldValue::nan();
        assert!(fv.magnitude.is_nan());
    }

    #[test]
    fn test_batch_storage_and_nan() {
        let mut field = engine(MainFieldKind::Igrf);
        let positions = vec![geo(7000.0, 0.0, 0.0), geo(100.0, 0.0, 0.0)];
        let times = vec![t2020(), t2020(), t2020()];
        assert!(matches!(
            field.compute_bfield_batch(&times, &positions),
            Err(MagFieldError::InsufficientStorage { needed: 2, available: 3 })
        ));
        let out = field.compute_bfield_batch(&[t2020()], &positions).unwrap();
        assert!(out[0].magnitude.is_finite());
        assert!(out[1].magnitude.is_nan());
    }

    #[test]
    fn test_pure_reparameterization_needs_no_time() {
        let mut field = engine(MainFieldKind::Igrf);
        let far_past = TimeValue::from_mjd(0.0);
        let out = field
            .convert(&far_past, CoordSys::GeoInKm, CoordSys::GeoInRe, [EARTH_RADIUS_KM, 0.0, 0.0])
            .unwrap();
        assert!((out[0] - 1.0).abs() < 1e-12);
        assert!(field.main_field().is_none());
    }

    #[test]
    fn test_tilted_dipole_ldip() {
        let mut field = engine(MainFieldKind::TiltedDipole);
        let l = field.compute_ldip(&t2020(), &geo(6600.0, 0.0, 0.0)).unwrap();
        assert!((l - 1.037).abs() < 0.01, "L = {}", l);
    }

    #[test]
    fn test_ldip_undefined_on_dipole_axis() {
        let mut field = engine(MainFieldKind::TiltedDipole);
        field.update_time(&t2020(), false).unwrap();
        let axis = field.dipole().unwrap().geo_to_mag().transpose()
            * Vector3::new(0.0, 0.0, 3.0 * EARTH_RADIUS_KM);
        let err = field
            .compute_ldip(&t2020(), &geo(axis.x, axis.y, axis.z))
            .unwrap_err();
        assert!(matches!(err, MagFieldError::OutOfRange(_)));
        assert!(field.compute_ldip(&t2020(), &geo(0.0, 0.0, 0.0)).is_err());
    }

    #[test]
    fn test_shabansky_dayside_rule() {
        let mut field = engine(MainFieldKind::Igrf);
        let t = t2020();
        let mut bmin_at = |mlat: f64, mlt: f64| {
            let c = field
                .convert(&t, CoordSys::MllInKm, CoordSys::GeoInKm, [9.0 * EARTH_RADIUS_KM, mlat, mlt])
                .unwrap();
            Vector3::new(c[0], c[1], c[2])
        };
        let noon_high = bmin_at(30.0, 12.0);
        let morning_high = bmin_at(-20.0, 9.0);
        let noon_low = bmin_at(5.0, 12.0);
        let midnight_high = bmin_at(30.0, 0.0);

        let single = flat_trace(false);
        assert!(field.is_shabansky(&single, &noon_high).unwrap());
        assert!(field.is_shabansky(&single, &morning_high).unwrap());
        assert!(!field.is_shabansky(&single, &noon_low).unwrap());
        assert!(!field.is_shabansky(&single, &midnight_high).unwrap());
        // A secondary minimum found by the tracer flags any local time
        assert!(field.is_shabansky(&flat_trace(true), &midnight_high).unwrap());
    }

    #[test]
    fn test_seed_outside_external_model_rejected() {
        let mut field = MagField::new(FieldModelConfig {
            external_field: ExternalFieldKind::Quiet,
            ..Default::default()
        })
        .unwrap();
        let far = geo(30.0 * EARTH_RADIUS_KM, 0.0, 0.0);
        assert!(matches!(
            field.compute_field_line(&t2020(), &far).unwrap_err(),
            MagFieldError::FieldLineOutsideModelBounds(_)
        ));
        assert!(matches!(
            field.compute_ad_invariants(&t2020(), &far, &[90.0]).unwrap_err(),
            MagFieldError::OutOfRange(_)
        ));
        let line = field
            .compute_field_line(&t2020(), &geo(20000.0, 0.0, 0.0))
            .unwrap();
        assert_eq!(line.status, TraceStatus::Closed);
    }

    #[test]
    fn test_invariants_seed_checks() {
        let mut field = engine(MainFieldKind::Igrf);
        let err = field
            .compute_ad_invariants(&t2020(), &geo(5000.0, 0.0, 0.0), &[90.0])
            .unwrap_err();
        assert!(matches!(err, MagFieldError::PointsInsideSphere(_)));
        let err = field
            .compute_ad_invariants(&t2020(), &geo(20000.0, 0.0, 0.0), &[0.0])
            .unwrap_err();
        assert!(matches!(err, MagFieldError::BadPitchAngle(_)));
    }

    #[test]
    fn test_invariants_keep_input_order() {
        let mut field = engine(MainFieldKind::Igrf);
        let angles = [30.0, 90.0, 60.0];
        let set = field
            .compute_ad_invariants(&t2020(), &geo(20000.0, 5000.0, 2000.0), &angles)
            .unwrap();
        assert_eq!(set.pitch.len(), 3);
        for (p, a) in set.pitch.iter().zip(angles) {
            assert_eq!(p.pitch_angle, a);
            assert!(p.bmirror >= set.bmin);
        }
        assert!(set.pitch[1].i.abs() < 1e-12);
        assert!(set.pitch[0].bmirror > set.pitch[2].bmirror);
        assert!(set.pitch[0].i > set.pitch[2].i);
        assert!(set.bmin <= set.b_local);
        assert!((0.0..24.0).contains(&set.mlt));
    }

    #[test]
    fn test_dipole_shortcut_footprints() {
        let mut field = engine(MainFieldKind::TiltedDipole);
        let seed = geo(15000.0, 8000.0, 3000.0);
        let line = field.compute_field_line(&t2020(), &seed).unwrap();
        assert_eq!(line.status, TraceStatus::Closed);
        let floor = field.config().trace_radius_km();
        let north = line.north_footprint.unwrap();
        let south = line.south_footprint.unwrap();
        assert!((north.norm() - floor).abs() < 1e-6);
        assert!((south.norm() - floor).abs() < 1e-6);

        let foot = field
            .compute_footprint(&t2020(), &seed, 100.0, TraceDirection::North)
            .unwrap();
        assert!((foot.position - north).norm() < 1e-3);
        assert!(field
            .compute_footprint(&t2020(), &seed, 100.0, TraceDirection::GsmEquator)
            .is_err());

        let hits = MagField::field_line_location(&line, 1000.0);
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|p| (p.norm() - EARTH_RADIUS_KM - 1000.0).abs() < 1e-6));
    }

    #[test]
    fn test_direction_pitch_angles() {
        let mut field = engine(MainFieldKind::Igrf);
        let p = geo(12000.0, 0.0, 0.0);
        let b = field.compute_bfield(&t2020(), &p).unwrap();
        let angles = field
            .compute_direction_pitch_angles(&t2020(), &p, &[b.gsm, -b.gsm], CoordSys::GsmInKm)
            .unwrap();
        assert!(angles[0].abs() < 1e-6);
        assert!((angles[1] - 180.0).abs() < 1e-6);
    }

    #[test]
    fn test_flux_tube_and_family_sizes() {
        let mut field = engine(MainFieldKind::Igrf);
        let tube = field
            .compute_flux_tube(&t2020(), &geo(15000.0, 0.0, 0.0), 200.0, 4)
            .unwrap();
        assert_eq!(tube.len(), 5);
        assert!(tube.iter().all(|l| l.as_ref().map(|l| l.status == TraceStatus::Closed).unwrap_or(false)));

        let family = field
            .compute_field_line_family(&t2020(), &[0.0, 12.0], &[50.0, 60.0, 70.0])
            .unwrap();
        assert_eq!(family.len(), 6);
        assert!(family.iter().all(|l| l.is_ok()));
    }

    #[test]
    fn test_set_config_resets_epochs() {
        let mut field = engine(MainFieldKind::Igrf);
        field.update_time(&t2020(), false).unwrap();
        assert!(field.main_field().is_some());
        field
            .set_config(FieldModelConfig {
                main_field: MainFieldKind::FastIgrf,
                ..Default::default()
            })
            .unwrap();
        assert!(field.main_field().is_none());
        let bad = FieldModelConfig {
            main_field: MainFieldKind::TiltedDipole,
            external_field: ExternalFieldKind::Quiet,
            ..Default::default()
        };
        assert!(field.set_config(bad).is_err());
        assert_eq!(field.config().main_field, MainFieldKind::FastIgrf);
    }
}
