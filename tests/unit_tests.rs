// tests/unit_tests.rs
use std::collections::HashMap;

use approx::assert_relative_eq;
use geo::{coord, Rect};
use ndarray::{array, Array2};
use proptest::prelude::*;

use spectral_stats::processing::indices::{IndexCalculator, SaviForm, NDI, SAVI};
use spectral_stats::processing::{
    composite, compute_index, normalized_difference, BandMathExpression, Binding, CompositeMode,
    ZonalReducer,
};
use spectral_stats::raster::{BandRaster, GeoTransform, RasterStack, SpatialRef, NODATA};
use spectral_stats::region::Region;
use spectral_stats::Error;

const CRS: &str = "EPSG:32630";

/// Helper function to create a stack with specific dimensions; values repeat
/// when shorter than the grid
fn create_test_stack(rows: usize, cols: usize, bands: &[(&str, &[f32])]) -> RasterStack {
    let spatial = SpatialRef::new(CRS, GeoTransform::new(0.0, rows as f64, 1.0, -1.0));
    let mut stack = RasterStack::new(spatial, rows, cols);
    for (name, values) in bands {
        let data = Array2::from_shape_fn((rows, cols), |(r, c)| values[(r * cols + c) % values.len()]);
        stack.add_band(*name, data).unwrap();
    }
    stack
}

/// Region covering the whole grid of a stack
fn full_region(stack: &RasterStack) -> Region {
    Region::from_rect(
        stack.spatial().transform.extent(stack.rows(), stack.cols()),
        CRS,
    )
    .unwrap()
}

/// Helper function to extract row-major results, `None` where masked
fn get_results(result: &BandRaster) -> Vec<Option<f32>> {
    let (rows, cols) = result.shape();
    (0..rows)
        .flat_map(|r| (0..cols).map(move |c| (r, c)))
        .map(|(r, c)| result.get(r, c))
        .collect()
}

/// Test NDI calculation with known values
#[test]
fn test_ndi_calculation() {
    let test_cases = [
        // NIR, RED, Expected NDVI
        (5000.0, 2500.0, Some(0.33333)), // (5000-2500)/(5000+2500)
        (3000.0, 3000.0, Some(0.0)),
        (1000.0, 500.0, Some(0.33333)),
        (0.0, 0.0, None), // divide by zero
    ];

    let nir_values: Vec<f32> = test_cases.iter().map(|(nir, _, _)| *nir).collect();
    let red_values: Vec<f32> = test_cases.iter().map(|(_, red, _)| *red).collect();
    let stack = create_test_stack(2, 2, &[("B8", &nir_values), ("B4", &red_values)]);

    let ndi = NDI::new("B8", "B4", None);
    let result_values = get_results(&ndi.calculate(&stack).unwrap());

    for (i, (_, _, expected)) in test_cases.iter().enumerate() {
        match expected {
            None => assert_eq!(result_values[i], None),
            Some(expected) => {
                let got = result_values[i].unwrap();
                assert!(
                    (got - expected).abs() < 0.0001,
                    "Expected {}, got {} at index {}",
                    expected,
                    got,
                    i
                );
            }
        }
    }
}

/// Test SAVI calculation with known reflectance values
#[test]
fn test_savi_calculation() {
    // SAVI = (1 + L) * (NIR - RED) / (NIR + RED + L), L = 0.5
    let test_cases = [
        (0.5, 0.25, 0.3),
        (0.3, 0.3, 0.0), // NIR = RED, so numerator is 0
        (0.4, 0.1, 0.45),
        (0.0, 0.0, 0.0), // denominator is L, still valid
    ];

    let nir_values: Vec<f32> = test_cases.iter().map(|(nir, _, _)| *nir).collect();
    let red_values: Vec<f32> = test_cases.iter().map(|(_, red, _)| *red).collect();
    let stack = create_test_stack(2, 2, &[("B8", &nir_values), ("B4", &red_values)]);

    let savi = SAVI::new("B8", "B4", 0.5, None);
    let result_values = get_results(&savi.calculate(&stack).unwrap());

    for (i, (_, _, expected)) in test_cases.iter().enumerate() {
        let got = result_values[i].expect("SAVI pixel should be valid");
        assert!(
            (got - expected).abs() < 0.0001,
            "Expected {}, got {} at index {}",
            expected,
            got,
            i
        );
    }
}

/// Test SAVI calculation with different soil factors
#[test]
fn test_savi_with_different_soil_factors() {
    let stack = create_test_stack(1, 1, &[("B8", &[0.5]), ("B4", &[0.25])]);

    let factors_and_expected = [
        (0.0, 0.33333), // L=0: SAVI = NDVI
        (0.5, 0.3),     // Standard L value
        (1.0, 0.28571), // High L value
    ];

    for (soil_factor, expected) in factors_and_expected {
        let savi = SAVI::new("B8", "B4", soil_factor, None);
        let result = savi.calculate(&stack).unwrap();
        let got = result.get(0, 0).unwrap();
        assert!(
            (got - expected).abs() < 0.0001,
            "With soil factor {}, expected {}, got {}",
            soil_factor,
            expected,
            got
        );
    }
}

/// Both SAVI arrangements agree, also when fed digital numbers with a scale
#[test]
fn test_savi_forms_agree() {
    let stack = create_test_stack(
        2,
        3,
        &[
            ("B8", &[3000.0, 4500.0, 1200.0, 800.0, 0.0, 6000.0]),
            ("B4", &[1000.0, 500.0, 1100.0, 900.0, 0.0, 200.0]),
        ],
    );
    let standard = SAVI::new("B8", "B4", 0.5, None);
    let simplified = SAVI::new("B8", "B4", 0.5, None).with_form(SaviForm::Simplified);

    let a = compute_index(&standard, &stack, Some(10000.0)).unwrap();
    let b = compute_index(&simplified, &stack, Some(10000.0)).unwrap();
    assert_eq!(a.mask(), b.mask());
    for (x, y) in a.values().iter().zip(b.values()) {
        assert_relative_eq!(*x, *y, epsilon = 1e-6);
    }
}

/// Test NDI with no-data inputs and a stack mask
#[test]
fn test_ndi_with_nodata() {
    let nir_values = [5000.0, 0.0, 5000.0, NODATA];
    let red_values = [2500.0, 0.0, NODATA, 2500.0];
    let stack = create_test_stack(2, 2, &[("B8", &nir_values), ("B4", &red_values)])
        .with_mask(array![[true, true], [true, true]])
        .unwrap();

    let result = normalized_difference(&stack, "B8", "B4").unwrap();
    let result_values = get_results(&result);

    assert!((result_values[0].unwrap() - 0.33333).abs() < 0.0001);
    assert_eq!(result_values[1], None); // 0/0 case
    assert_eq!(result_values[2], None);
    assert_eq!(result_values[3], None);
    assert_eq!(result.valid_count(), 1);
}

/// Test that custom names are properly set
#[test]
fn test_custom_index_names() {
    let custom_name = "Custom NDI Name";
    let ndi = NDI::new("B8", "B4", Some(custom_name.to_string()));
    assert_eq!(ndi.name(), custom_name);

    let custom_savi_name = "Custom SAVI Name";
    let savi = SAVI::new("B8", "B4", 0.5, Some(custom_savi_name.to_string()));
    assert_eq!(savi.name(), custom_savi_name);

    let stack = create_test_stack(1, 1, &[("B8", &[0.5]), ("B4", &[0.25])]);
    assert_eq!(savi.calculate(&stack).unwrap().name(), custom_savi_name);
}

/// Test that required_bands lists the referenced bands
#[test]
fn test_required_bands() {
    let ndi = NDI::new("B3", "B11", None);
    assert_eq!(ndi.required_bands(), vec!["B11", "B3"]);

    let savi = SAVI::new("B8", "B4", 0.5, None);
    assert_eq!(savi.required_bands(), vec!["B4", "B8"]);

    let stack = create_test_stack(1, 1, &[("B8", &[0.5])]);
    assert!(matches!(savi.calculate(&stack), Err(Error::MissingBand(b)) if b == "B4"));
}

#[test]
fn test_ndwi_calculation() {
    // NDWI = (GREEN - NIR) / (GREEN + NIR)
    let test_cases = [
        (3000.0, 5000.0, Some(-0.25)),
        (2000.0, 2000.0, Some(0.0)),
        (5000.0, 3000.0, Some(0.25)),
        (0.0, 0.0, None), // divide by zero
    ];

    let green_values: Vec<f32> = test_cases.iter().map(|(green, _, _)| *green).collect();
    let nir_values: Vec<f32> = test_cases.iter().map(|(_, nir, _)| *nir).collect();
    let stack = create_test_stack(2, 2, &[("B3", &green_values), ("B8", &nir_values)]);

    let ndwi = NDI::ndwi(&Default::default());
    let result_values = get_results(&ndwi.calculate(&stack).unwrap());

    for (i, (_, _, expected)) in test_cases.iter().enumerate() {
        match expected {
            None => assert_eq!(result_values[i], None),
            Some(expected) => assert!((result_values[i].unwrap() - expected).abs() < 0.01),
        }
    }
}

#[test]
fn test_formula_with_bindings() {
    let bindings: HashMap<String, Binding> = [
        ("NIR".to_string(), Binding::Band("B8".into())),
        ("RED".to_string(), Binding::Band("B4".into())),
        ("L".to_string(), Binding::Constant(0.5)),
    ]
    .into_iter()
    .collect();
    let expr = BandMathExpression::parse(
        "SAVI",
        "(1 + L) * (NIR - RED) / (NIR + RED + L)",
        &bindings,
    )
    .unwrap();
    let stack = create_test_stack(1, 1, &[("B8", &[0.5]), ("B4", &[0.25])]);
    let result = spectral_stats::processing::evaluate(&stack, &expr).unwrap();
    assert_eq!(result.name(), "SAVI");
    assert_relative_eq!(result.get(0, 0).unwrap(), 0.3, epsilon = 1e-6);

    assert!(matches!(
        BandMathExpression::parse("X", "(B8 - ", &bindings),
        Err(Error::InvalidExpression(_))
    ));
}

/// 2x2 raster [[0.1, 0.3], [0.5, no-data]] with bucket width 0.2
#[test]
fn test_histogram_scenario() {
    let stack = create_test_stack(2, 2, &[("NDVI", &[0.1, 0.3, 0.5, NODATA])]);
    let raster = stack.select("NDVI").unwrap();
    let mask = array![[true, true], [true, false]];

    let reducer = ZonalReducer::default();
    let hist = reducer
        .histogram(&raster, &mask, &full_region(&stack), 0.2)
        .unwrap();

    let counts: Vec<usize> = hist.buckets.iter().map(|b| b.count).collect();
    assert_eq!(counts, vec![1, 1, 1]);
    assert_relative_eq!(hist.buckets[0].lower, 0.0);
    assert_relative_eq!(hist.buckets[2].lower, 0.4, epsilon = 1e-9);
    assert_eq!(hist.total(), 3);

    let stats = reducer
        .reduce(&raster, &mask, &full_region(&stack), &[50.0])
        .unwrap();
    assert_eq!(stats.pixel_count, 3);
    assert_relative_eq!(stats.percentile(50.0).unwrap(), 0.3, epsilon = 1e-6);
}

#[test]
fn test_reduce_without_pixels_is_absent_not_zero() {
    let stack = create_test_stack(2, 2, &[("NDVI", &[0.2])]);
    let raster = stack.select("NDVI").unwrap();
    let stats = ZonalReducer::default()
        .reduce(
            &raster,
            &Array2::from_elem((2, 2), false),
            &full_region(&stack),
            &[10.0, 90.0],
        )
        .unwrap();
    assert_eq!(stats.pixel_count, 0);
    assert!(stats.min.is_none() && stats.max.is_none() && stats.mean.is_none());
    assert!(stats.percentiles.iter().all(|p| p.value.is_none()));
}

#[test]
fn test_mosaic_first_valid_wins() {
    let a = create_test_stack(1, 2, &[("B4", &[1.0, 2.0])])
        .with_mask(array![[false, true]])
        .unwrap();
    let b = create_test_stack(1, 2, &[("B4", &[5.0, 6.0])]);

    let out = composite(&[a, b], CompositeMode::Mosaic).unwrap();
    let band = out.select("B4").unwrap();
    assert_eq!(band.get(0, 0), Some(5.0));
    assert_eq!(band.get(0, 1), Some(2.0));
}

#[test]
fn test_median_of_single_stack_is_identity() {
    let s = create_test_stack(2, 2, &[("B4", &[0.1, 0.2, 0.3, 0.4]), ("B8", &[0.5, NODATA])])
        .with_mask(array![[true, false], [true, true]])
        .unwrap();
    let out = composite(&[s.clone()], CompositeMode::Median).unwrap();
    for name in ["B4", "B8"] {
        let before = s.select(name).unwrap();
        let after = out.select(name).unwrap();
        assert_eq!(before.mask(), after.mask());
        assert_eq!(get_results(&before), get_results(&after));
    }
}

#[test]
fn test_composite_shape_mismatch() {
    let a = create_test_stack(1, 2, &[("B4", &[1.0])]);
    let b = create_test_stack(2, 2, &[("B4", &[1.0])]);
    assert!(matches!(
        composite(&[a, b], CompositeMode::Median),
        Err(Error::ShapeMismatch(_))
    ));
}

fn pair_stack(pairs: &[(f32, f32)]) -> RasterStack {
    let a: Vec<f32> = pairs.iter().map(|p| p.0).collect();
    let b: Vec<f32> = pairs.iter().map(|p| p.1).collect();
    create_test_stack(1, pairs.len(), &[("A", &a), ("B", &b)])
}

proptest! {
    #[test]
    fn prop_normalized_difference_is_antisymmetric(
        pairs in prop::collection::vec((-10000.0f32..10000.0, -10000.0f32..10000.0), 1..64)
    ) {
        let stack = pair_stack(&pairs);
        let ab = normalized_difference(&stack, "A", "B").unwrap();
        let ba = normalized_difference(&stack, "B", "A").unwrap();
        prop_assert_eq!(ab.mask(), ba.mask());
        for c in 0..pairs.len() {
            if let (Some(x), Some(y)) = (ab.get(0, c), ba.get(0, c)) {
                prop_assert_eq!(x, -y);
            }
        }
    }

    #[test]
    fn prop_valid_pixels_are_finite(
        pairs in prop::collection::vec((-3i32..3, -3i32..3), 1..64)
    ) {
        // small integers make a + b == 0 frequent
        let pairs: Vec<(f32, f32)> = pairs.iter().map(|&(a, b)| (a as f32, b as f32)).collect();
        let stack = pair_stack(&pairs);
        let nd = normalized_difference(&stack, "A", "B").unwrap();
        for (c, (a, b)) in pairs.iter().enumerate() {
            match nd.get(0, c) {
                Some(v) => prop_assert!(v.is_finite()),
                None => prop_assert_eq!(a + b, 0.0),
            }
        }
    }

    #[test]
    fn prop_percentiles_are_monotonic(
        values in prop::collection::vec(-1.0f32..1.0, 1..100)
    ) {
        let stack = create_test_stack(1, values.len(), &[("NDVI", &values)]);
        let raster = stack.select("NDVI").unwrap();
        let ps: Vec<f64> = (0..=10).map(|i| i as f64 * 10.0).collect();
        let stats = ZonalReducer::default()
            .reduce_band(&raster, &full_region(&stack), &ps)
            .unwrap();
        let vals: Vec<f64> = stats.percentiles.iter().map(|p| p.value.unwrap()).collect();
        for w in vals.windows(2) {
            prop_assert!(w[0] <= w[1]);
        }
        prop_assert_eq!(vals[0], stats.min.unwrap());
        prop_assert_eq!(vals[10], stats.max.unwrap());
    }

    #[test]
    fn prop_histogram_counts_sum_to_pixel_count(
        values in prop::collection::vec(-1.0f32..1.0, 1..100),
        width in 0.001f64..1.0,
    ) {
        let stack = create_test_stack(1, values.len(), &[("NDVI", &values)]);
        let raster = stack.select("NDVI").unwrap();
        let region = full_region(&stack);
        let reducer = ZonalReducer::default();
        let stats = reducer.reduce_band(&raster, &region, &[]).unwrap();
        let hist = reducer.histogram(&raster, raster.mask(), &region, width).unwrap();
        prop_assert_eq!(hist.total(), stats.pixel_count);
        for w in hist.buckets.windows(2) {
            prop_assert!(w[0].lower < w[1].lower);
        }
    }
}

#[test]
fn test_region_must_share_crs() {
    let stack = create_test_stack(1, 1, &[("NDVI", &[0.2])]);
    let raster = stack.select("NDVI").unwrap();
    let region = Region::from_rect(
        Rect::new(coord! { x: 0.0, y: 0.0 }, coord! { x: 1.0, y: 1.0 }),
        "EPSG:4326",
    )
    .unwrap();
    assert!(matches!(
        ZonalReducer::default().reduce_band(&raster, &region, &[]),
        Err(Error::CrsMismatch(..))
    ));
}

fn rust_sources(dir: &std::path::Path, out: &mut Vec<std::path::PathBuf>) {
    for entry in std::fs::read_dir(dir).unwrap() {
        let path = entry.unwrap().path();
        if path.is_dir() {
            rust_sources(&path, out);
        } else if path.extension().is_some_and(|e| e == "rs") {
            out.push(path);
        }
    }
}

#[test]
fn test_source_files_start_with_their_path() {
    let root = std::path::Path::new(env!("CARGO_MANIFEST_DIR"));
    let mut files = Vec::new();
    rust_sources(&root.join("src"), &mut files);
    assert!(!files.is_empty());
    for file in files {
        let relative = file.strip_prefix(root).unwrap().to_string_lossy().replace('\\', "/");
        let text = std::fs::read_to_string(&file).unwrap();
        assert_eq!(text.lines().next(), Some(format!("// {relative}").as_str()));
        assert!(!text.lines().any(|l| l.starts_with("//!")), "{relative} has inner docs");
    }
}
