//! Coordinate sets traced through the field engine

use adiabatic_coords::{
    lstar_from_phi, AlphaLm, CoordCalculator, CoordInputs, CoordinateModel, KHmin, KPhi, Network, SurrogateLimits, SurrogateModel,
    SurrogateStore, K_HMIN_TABLE, K_PHI_TABLE,
};
use chrono::{TimeZone, Utc};
use geomag_field::{
    CoordSys, FieldModelConfig, MagField, MagFieldError, MainFieldKind, Position, ShellMode,
    TimeValue, EARTH_RADIUS_KM,
};
use nalgebra::Vector3;
use proptest::prelude::*;
use std::sync::Arc;

fn jan_2020() -> TimeValue {
    TimeValue::from_datetime(Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap())
}

/// Output fixed at `value` whatever the inputs.
fn constant_table(nx: usize, value: f64) -> SurrogateModel {
    SurrogateModel {
        name: String::new(),
        x_bar: vec![0.0; nx],
        sx: vec![1.0; nx],
        y_bar: vec![value],
        sy: vec![1.0],
        w: vec![vec![0.0; nx]],
        w0: vec![0.0],
        v: vec![vec![1.0]],
        v0: vec![0.0],
        activation: Default::default(),
        poly_log10_b: Vec::new(),
    }
}

fn dipole_field() -> MagField {
    MagField::new(FieldModelConfig {
        main_field: MainFieldKind::TiltedDipole,
        shell_mode: ShellMode::McIlwain,
        ..Default::default()
    })
    .unwrap()
}

/// A point on the dipole equator at `r_re`.
fn equatorial_seed(field: &mut MagField, r_re: f64) -> Position {
    field.update_time(&jan_2020(), false).unwrap();
    let axis = field.dipole().unwrap().axis_geo;
    let p = Vector3::z().cross(&axis).normalize() * r_re * EARTH_RADIUS_KM;
    Position::new(CoordSys::GeoInKm, p.x, p.y, p.z)
}

fn full_model(field: MagField) -> CoordinateModel {
    let limits = SurrogateLimits::default();
    let phi = Arc::new(Network::from_model(constant_table(3, 0.5)).unwrap());
    let hmin = Arc::new(Network::from_model(constant_table(4, 1200.0)).unwrap());
    CoordinateModel::new(field, limits)
        .with_k_phi(KPhi::new(phi, limits).unwrap())
        .with_k_hmin(KHmin::new(hmin, limits).unwrap())
}

#[test]
fn test_alpha_lm_on_dipole_equator() {
    let mut field = dipole_field();
    let seed = equatorial_seed(&mut field, 3.0);
    let mut model = full_model(field);

    let sets = model
        .compute_coordinate_set(&[jan_2020()], &[seed], &[90.0, 45.0, 30.0])
        .unwrap();
    assert_eq!(sets.len(), 1);
    let set = &sets[0];
    // Seed sits at Bmin, so the equatorial pitch angle is the requested one.
    for (alpha, requested) in set.alpha.iter().zip(&set.pitch_angles) {
        assert!((alpha - requested).abs() < 1e-6, "{} vs {}", alpha, requested);
    }
    assert!((set.lm[0] - 3.0).abs() < 3e-4);
    assert!(set.k[0].abs() < 1e-9);
    assert!(set.k[2] > set.k[1]);
    assert!(set.phi.iter().all(|p| *p == 0.5));
    assert!(set.hmin.iter().all(|h| *h == 1200.0));

    let b0 = model.field().dipole().unwrap().moment_nt;
    assert!((set.lstar[0] - lstar_from_phi(0.5, b0)).abs() < 1e-12);
}

#[test]
fn test_untraceable_position_is_nan() {
    let mut field = dipole_field();
    let seed = equatorial_seed(&mut field, 3.0);
    let mut model = full_model(field);
    let inside = Position::new(CoordSys::GeoInKm, 3000.0, 0.0, 0.0);

    let sets = model
        .compute_coordinate_set(&[jan_2020()], &[inside, seed], &[60.0])
        .unwrap();
    assert!(sets[0].alpha[0].is_nan() && sets[0].lm[0].is_nan() && sets[0].phi[0].is_nan());
    assert!(!sets[1].alpha[0].is_nan());
}

#[test]
fn test_out_of_range_surrogate_is_nan() {
    let mut field = dipole_field();
    let seed = equatorial_seed(&mut field, 3.0);
    let limits = SurrogateLimits::default();
    // Φ = 3 exceeds the default upper bound of 2.
    let phi = Arc::new(Network::from_model(constant_table(3, 3.0)).unwrap());
    let mut model = CoordinateModel::new(field, limits).with_k_phi(KPhi::new(phi, limits).unwrap());

    let sets = model
        .compute_coordinate_set(&[jan_2020()], &[seed], &[70.0])
        .unwrap();
    assert!(sets[0].phi[0].is_nan() && sets[0].lstar[0].is_nan());
    assert!(!sets[0].alpha[0].is_nan() && !sets[0].k[0].is_nan());
    // No K-Hmin table attached.
    assert!(sets[0].hmin[0].is_nan());
}

#[test]
fn test_var_pitch_and_validation() {
    let mut field = dipole_field();
    let a = equatorial_seed(&mut field, 3.0);
    let b = equatorial_seed(&mut field, 4.0);
    let mut model = CoordinateModel::new(field, SurrogateLimits::default());

    let sets = model
        .compute_coordinate_set_var_pitch(
            &[jan_2020()],
            &[a, b],
            &[vec![90.0], vec![80.0, 40.0]],
        )
        .unwrap();
    assert_eq!((sets[0].len(), sets[1].len()), (1, 2));
    assert!((sets[1].lm[0] - 4.0).abs() < 4e-4);
    assert!(sets[1].phi[0].is_nan());

    let err = model
        .compute_coordinate_set(&[jan_2020()], &[a], &[0.0])
        .unwrap_err();
    assert!(matches!(err, MagFieldError::BadPitchAngle(_)));
    let err = model
        .compute_coordinate_set_var_pitch(&[jan_2020()], &[a, b], &[vec![90.0]])
        .unwrap_err();
    assert!(matches!(err, MagFieldError::InsufficientStorage { .. }));
}

#[test]
fn test_model_from_store_directory() {
    let dir = tempfile::tempdir().unwrap();
    let phi = serde_json::to_string(&constant_table(3, 1.0)).unwrap();
    std::fs::write(dir.path().join(format!("{}.json", K_PHI_TABLE)), phi).unwrap();
    let store = SurrogateStore::from_dir(dir.path()).unwrap();
    assert!(store.load_surrogate(K_HMIN_TABLE).is_err());

    let mut field = dipole_field();
    let seed = equatorial_seed(&mut field, 3.0);
    let mut model = CoordinateModel::from_store(field, &store, SurrogateLimits::default()).unwrap();
    let sets = model
        .compute_coordinate_set(&[jan_2020()], &[seed], &[90.0])
        .unwrap();
    assert_eq!(sets[0].phi[0], 1.0);
    assert!(sets[0].hmin[0].is_nan());
}

proptest! {
    #[test]
    fn test_alpha_recovers_equatorial_pitch(alpha in 0.5f64..89.5, bmin in 10.0f64..50000.0) {
        let s = alpha.to_radians().sin();
        let inputs = CoordInputs {
            bmin,
            i: 0.1,
            bmirror: bmin / (s * s),
            lm: 2.0,
        };
        let pair = AlphaLm::default().calculate(&inputs).unwrap();
        prop_assert!((pair.x2 - alpha).abs() < 1e-8);
        prop_assert_eq!(pair.x3, 2.0);
    }
}
