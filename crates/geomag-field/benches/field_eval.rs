//! Field evaluation and tracing benchmarks
//!
//! Run with: cargo bench -p geomag-field --bench field_eval

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use geomag_field::{
    CoordSys, ExternalFieldKind, FieldModelConfig, MagField, MainFieldKind, Position, TimeValue,
};

fn engine(main_field: MainFieldKind, external_field: ExternalFieldKind) -> MagField {
    MagField::new(FieldModelConfig {
        main_field,
        external_field,
        ..Default::default()
    })
    .expect("valid benchmark configuration")
}

fn epoch() -> TimeValue {
    TimeValue::from_mjd(58849.25)
}

// ============================================================================
// Main and external field
// ============================================================================

fn bench_bfield(c: &mut Criterion) {
    let mut group = c.benchmark_group("bfield");
    let position = Position::new(CoordSys::GeoInKm, 12000.0, 4000.0, 3000.0);

    for (name, main, external) in [
        ("igrf", MainFieldKind::Igrf, ExternalFieldKind::None),
        ("fast_igrf", MainFieldKind::FastIgrf, ExternalFieldKind::None),
        ("tilted_dipole", MainFieldKind::TiltedDipole, ExternalFieldKind::None),
        ("igrf_op77", MainFieldKind::Igrf, ExternalFieldKind::Quiet),
        ("igrf_t89", MainFieldKind::Igrf, ExternalFieldKind::Disturbed),
    ] {
        let mut field = engine(main, external);
        field.update_time(&epoch(), false).expect("time in coverage");
        group.bench_with_input(BenchmarkId::new("compute_bfield", name), &position, |b, p| {
            b.iter(|| field.compute_bfield(&epoch(), black_box(p)))
        });
    }

    group.finish();
}

fn bench_convert(c: &mut Criterion) {
    let mut field = engine(MainFieldKind::Igrf, ExternalFieldKind::None);
    let coords: Vec<[f64; 3]> = (0..256)
        .map(|i| [7000.0 + 10.0 * i as f64, 100.0 * i as f64, -3000.0])
        .collect();

    c.bench_function("convert_batch_geo_to_sm", |b| {
        b.iter(|| field.convert_batch(&epoch(), CoordSys::GeoInKm, CoordSys::SmInRe, black_box(&coords)))
    });
}

// ============================================================================
// Tracing and invariants
// ============================================================================

fn bench_trace(c: &mut Criterion) {
    let mut group = c.benchmark_group("trace");
    group.sample_size(20);
    let seed = Position::new(CoordSys::GeoInKm, 25000.0, 0.0, 0.0);

    for (name, main, external) in [
        ("igrf", MainFieldKind::Igrf, ExternalFieldKind::None),
        ("igrf_t89", MainFieldKind::Igrf, ExternalFieldKind::Disturbed),
        ("dipole_closed_form", MainFieldKind::TiltedDipole, ExternalFieldKind::None),
    ] {
        let mut field = engine(main, external);
        group.bench_with_input(BenchmarkId::new("field_line", name), &seed, |b, p| {
            b.iter(|| field.compute_field_line(&epoch(), black_box(p)))
        });
    }

    let mut field = engine(MainFieldKind::Igrf, ExternalFieldKind::None);
    let angles = [90.0, 70.0, 50.0, 30.0];
    group.bench_function("ad_invariants_igrf", |b| {
        b.iter(|| field.compute_ad_invariants(&epoch(), black_box(&seed), &angles))
    });

    group.finish();
}

criterion_group!(benches, bench_bfield, bench_convert, bench_trace);
criterion_main!(benches);
