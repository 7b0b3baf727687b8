use criterion::{black_box, criterion_group, criterion_main, Criterion};
use ndarray::Array2;
use spectral_stats::processing::indices::{IndexCalculator, NDI, SAVI};
use spectral_stats::processing::{composite, compute_index, CompositeMode, ZonalReducer};
use spectral_stats::raster::{GeoTransform, RasterStack, SpatialRef};
use spectral_stats::region::{PixelInclusion, Region};

const SIZE: (usize, usize) = (1024, 1024);

/// Synthetic NIR/RED stack in digital numbers
fn synthetic_stack(offset: f32) -> RasterStack {
    let spatial = SpatialRef::new(
        "EPSG:32630",
        GeoTransform::new(500000.0, 4_000_000.0, 10.0, -10.0),
    );
    let nir = Array2::from_shape_fn(SIZE, |(r, c)| 5000.0 + ((r * SIZE.1 + c) % 100) as f32 + offset);
    let red = Array2::from_shape_fn(SIZE, |(r, c)| 2500.0 + ((r * SIZE.1 + c) % 50) as f32);
    RasterStack::new(spatial, SIZE.0, SIZE.1)
        .with_band("B8", nir)
        .and_then(|s| s.with_band("B4", red))
        .unwrap()
}

/// Benchmark the core NDI evaluation in isolation
fn benchmark_ndi_calculation(c: &mut Criterion) {
    let stack = synthetic_stack(0.0);
    let ndi = NDI::new("B8", "B4", None);

    c.bench_function("ndi_core_calculation", |b| {
        b.iter(|| ndi.calculate(black_box(&stack)))
    });
}

/// SAVI with reflectance scaling applied to the inputs
fn benchmark_savi_scaled(c: &mut Criterion) {
    let stack = synthetic_stack(0.0);
    let savi = SAVI::new("B8", "B4", 0.5, None);

    c.bench_function("savi_scaled_calculation", |b| {
        b.iter(|| compute_index(&savi, black_box(&stack), Some(10000.0)))
    });
}

fn benchmark_median_composite(c: &mut Criterion) {
    let stacks: Vec<RasterStack> = (0..5).map(|i| synthetic_stack(i as f32 * 10.0)).collect();

    c.bench_function("median_composite_5_scenes", |b| {
        b.iter(|| composite(black_box(&stacks), CompositeMode::Median))
    });
}

fn benchmark_zonal_reduce(c: &mut Criterion) {
    let stack = synthetic_stack(0.0);
    let ndvi = NDI::new("B8", "B4", None).calculate(&stack).unwrap();
    let extent = stack.spatial().transform.extent(SIZE.0, SIZE.1);
    let region = Region::from_rect(extent, "EPSG:32630").unwrap();
    let percentiles = [10.0, 25.0, 50.0, 75.0, 90.0];

    let mut group = c.benchmark_group("zonal_reduce");
    group.sample_size(20);
    for inclusion in [PixelInclusion::Centroid, PixelInclusion::Footprint] {
        let reducer = ZonalReducer::new(inclusion);
        group.bench_function(format!("{inclusion:?}"), |b| {
            b.iter(|| reducer.reduce_band(black_box(&ndvi), &region, &percentiles))
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    benchmark_ndi_calculation,
    benchmark_savi_scaled,
    benchmark_median_composite,
    benchmark_zonal_reduce
);
criterion_main!(benches);
