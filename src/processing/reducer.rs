// src/processing/reducer.rs
use log::{debug, warn};
use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::raster::BandRaster;
use crate::region::{PixelInclusion, Region};

/// Upper limit on histogram buckets, guards against tiny widths
pub const MAX_HISTOGRAM_BUCKETS: usize = 1 << 20;

/// Fraction of a bucket width under which a maximum counts as on the edge
const EDGE_TOLERANCE: f64 = 1e-9;

/// Value of one requested percentile
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PercentileValue {
    pub percentile: f64,
    pub value: Option<f64>,
}

/// Summary statistics of one band over a region
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZonalStatistics {
    pub band: String,
    pub pixel_count: usize,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub mean: Option<f64>,
    /// Sample standard deviation (n - 1); absent below two pixels
    pub std_dev: Option<f64>,
    pub percentiles: Vec<PercentileValue>,
}

impl ZonalStatistics {
    fn empty(band: &str, percentiles: &[f64]) -> Self {
        Self {
            band: band.to_string(),
            pixel_count: 0,
            min: None,
            max: None,
            mean: None,
            std_dev: None,
            percentiles: percentiles
                .iter()
                .map(|&p| PercentileValue {
                    percentile: p,
                    value: None,
                })
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pixel_count == 0
    }

    /// Value for a requested percentile
    pub fn percentile(&self, p: f64) -> Option<f64> {
        self.percentiles
            .iter()
            .find(|pv| (pv.percentile - p).abs() < 1e-9)
            .and_then(|pv| pv.value)
    }
}

/// One histogram bucket, `[lower, lower + width)`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HistogramBucket {
    pub lower: f64,
    pub count: usize,
}

/// Fixed-width histogram. The final bucket is closed on both ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Histogram {
    pub band: String,
    pub bucket_width: f64,
    pub buckets: Vec<HistogramBucket>,
}

impl Histogram {
    pub fn total(&self) -> usize {
        self.buckets.iter().map(|b| b.count).sum()
    }

    /// Upper edge of the last bucket
    pub fn upper_bound(&self) -> Option<f64> {
        self.buckets.last().map(|b| b.lower + self.bucket_width)
    }
}

/// Reduces single-band rasters over regions into statistics and histograms
///
/// A pixel takes part in a reduction when
/// - the caller's mask is `true` at that pixel,
/// - the raster's own mask is `true` and the value is finite,
/// - the region covers the pixel under the reducer's [`PixelInclusion`] rule.
///
/// Reductions over zero pixels are not errors: statistics come back with a
/// pixel count of 0 and every field absent. Histograms cannot place buckets
/// without a minimum and report [`Error::EmptyRegion`] instead.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZonalReducer {
    pub inclusion: PixelInclusion,
}

impl ZonalReducer {
    pub fn new(inclusion: PixelInclusion) -> Self {
        Self { inclusion }
    }

    /// Statistics with percentiles in `[0, 100]`, returned in request order.
    pub fn reduce(
        &self,
        raster: &BandRaster,
        mask: &Array2<bool>,
        region: &Region,
        percentiles: &[f64],
    ) -> Result<ZonalStatistics> {
        validate_percentiles(percentiles)?;
        let mut values = self.included_values(raster, mask, region)?;
        if values.is_empty() {
            warn!("no valid pixels of `{}` inside region", raster.name());
            return Ok(ZonalStatistics::empty(raster.name(), percentiles));
        }
        Ok(summarize(raster.name(), &mut values, percentiles))
    }

    /// [`ZonalReducer::reduce`] using the raster's own mask
    pub fn reduce_band(
        &self,
        raster: &BandRaster,
        region: &Region,
        percentiles: &[f64],
    ) -> Result<ZonalStatistics> {
        self.reduce(raster, raster.mask(), region, percentiles)
    }

    /// Histogram with buckets starting at `floor(min / width) * width`.
    pub fn histogram(
        &self,
        raster: &BandRaster,
        mask: &Array2<bool>,
        region: &Region,
        bucket_width: f64,
    ) -> Result<Histogram> {
        let values = self.included_values(raster, mask, region)?;
        build_histogram(raster.name(), &values, bucket_width)
    }

    /// Histogram whose width starts at `min_bucket_width` and doubles until
    /// at most `max_buckets` buckets are needed.
    pub fn auto_histogram(
        &self,
        raster: &BandRaster,
        mask: &Array2<bool>,
        region: &Region,
        min_bucket_width: f64,
        max_buckets: usize,
    ) -> Result<Histogram> {
        let values = self.included_values(raster, mask, region)?;
        let width = auto_bucket_width(&values, min_bucket_width, max_buckets)?;
        build_histogram(raster.name(), &values, width)
    }

    /// Values of all pixels taking part in a reduction, row-major order
    pub fn included_values(
        &self,
        raster: &BandRaster,
        mask: &Array2<bool>,
        region: &Region,
    ) -> Result<Vec<f64>> {
        if mask.dim() != raster.shape() {
            return Err(Error::ShapeMismatch(format!(
                "mask {:?} vs raster `{}` {:?}",
                mask.dim(),
                raster.name(),
                raster.shape()
            )));
        }
        let coverage = region.coverage(raster.spatial(), raster.shape(), self.inclusion)?;

        let mut values = Vec::new();
        Zip::from(raster.values())
            .and(raster.mask())
            .and(mask)
            .and(&coverage)
            .for_each(|&v, &valid, &m, &inside| {
                if valid && m && inside && v.is_finite() {
                    values.push(v as f64);
                }
            });
        debug!(
            "`{}`: {} pixels inside region ({:?})",
            raster.name(),
            values.len(),
            self.inclusion
        );
        Ok(values)
    }
}

fn validate_percentiles(percentiles: &[f64]) -> Result<()> {
    for &p in percentiles {
        if !(0.0..=100.0).contains(&p) {
            return Err(Error::invalid_parameter(
                "percentile",
                p,
                "must lie in [0, 100]",
            ));
        }
    }
    Ok(())
}

/// Statistics of a non-empty sample. Sorts `values` in place.
fn summarize(band: &str, values: &mut [f64], percentiles: &[f64]) -> ZonalStatistics {
    values.sort_unstable_by(|a, b| a.total_cmp(b));
    let n = values.len();

    // Two passes: mean, then squared deviations
    let mean = values.iter().sum::<f64>() / n as f64;
    let std_dev = (n > 1).then(|| {
        let ss: f64 = values.iter().map(|v| (v - mean) * (v - mean)).sum();
        (ss / (n - 1) as f64).sqrt()
    });

    ZonalStatistics {
        band: band.to_string(),
        pixel_count: n,
        min: values.first().copied(),
        max: values.last().copied(),
        mean: Some(mean),
        std_dev,
        percentiles: percentiles
            .iter()
            .map(|&p| PercentileValue {
                percentile: p,
                value: Some(percentile_linear(values, p)),
            })
            .collect(),
    }
}

/// Linear interpolation between order statistics of a sorted, non-empty
/// sample: rank `p / 100 * (n - 1)`.
pub(crate) fn percentile_linear(sorted: &[f64], p: f64) -> f64 {
    let rank = p / 100.0 * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        return sorted[lo];
    }
    let frac = rank - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

fn check_width(bucket_width: f64) -> Result<()> {
    if !(bucket_width.is_finite() && bucket_width > 0.0) {
        return Err(Error::invalid_parameter(
            "bucket_width",
            bucket_width,
            "must be finite and > 0",
        ));
    }
    Ok(())
}

fn lower_bound(start: f64, width: f64, i: usize) -> f64 {
    start + i as f64 * width
}

/// Last bucket whose reported lower bound is <= `v`, capped past the bucket limit
fn bucket_of(v: f64, start: f64, width: f64) -> usize {
    let cap = MAX_HISTOGRAM_BUCKETS + 1;
    let mut idx = ((v - start) / width).floor().clamp(0.0, cap as f64) as usize;
    while idx > 0 && v < lower_bound(start, width, idx) {
        idx -= 1;
    }
    while idx < cap && v >= lower_bound(start, width, idx + 1) {
        idx += 1;
    }
    idx
}

fn bucket_count(min: f64, max: f64, width: f64) -> (f64, usize) {
    let mut start = (min / width).floor() * width;
    if start > min {
        start -= width;
    }
    let last = bucket_of(max, start, width);
    // a max sitting on a bucket edge closes the previous bucket
    let edge = last > 0 && max - lower_bound(start, width, last) <= width * EDGE_TOLERANCE;
    (start, if edge { last } else { last + 1 })
}

fn min_max(values: &[f64]) -> Option<(f64, f64)> {
    values.iter().fold(None, |acc, &v| match acc {
        None => Some((v, v)),
        Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
    })
}

fn build_histogram(band: &str, values: &[f64], bucket_width: f64) -> Result<Histogram> {
    check_width(bucket_width)?;
    let (min, max) = min_max(values).ok_or(Error::EmptyRegion)?;
    let (start, n) = bucket_count(min, max, bucket_width);
    if n > MAX_HISTOGRAM_BUCKETS {
        return Err(Error::invalid_parameter(
            "bucket_width",
            bucket_width,
            format!("needs {n} buckets, limit is {MAX_HISTOGRAM_BUCKETS}"),
        ));
    }

    let mut counts = vec![0usize; n];
    for &v in values {
        counts[bucket_of(v, start, bucket_width).min(n - 1)] += 1;
    }

    Ok(Histogram {
        band: band.to_string(),
        bucket_width,
        buckets: counts
            .into_iter()
            .enumerate()
            .map(|(i, count)| HistogramBucket {
                lower: lower_bound(start, bucket_width, i),
                count,
            })
            .collect(),
    })
}

fn auto_bucket_width(values: &[f64], min_bucket_width: f64, max_buckets: usize) -> Result<f64> {
    check_width(min_bucket_width)?;
    if max_buckets == 0 {
        return Err(Error::invalid_parameter(
            "max_buckets",
            max_buckets,
            "must be at least 1",
        ));
    }
    let (min, max) = min_max(values).ok_or(Error::EmptyRegion)?;
    let mut width = min_bucket_width;
    while bucket_count(min, max, width).1 > max_buckets {
        width *= 2.0;
    }
    Ok(width)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::{GeoTransform, SpatialRef, NODATA};
    use approx::assert_relative_eq;
    use geo::{coord, Rect};
    use ndarray::array;

    fn spatial() -> SpatialRef {
        SpatialRef::new("EPSG:32630", GeoTransform::new(0.0, 2.0, 1.0, -1.0))
    }

    fn full_region() -> Region {
        Region::from_rect(
            Rect::new(coord! { x: 0.0, y: 0.0 }, coord! { x: 2.0, y: 2.0 }),
            "EPSG:32630",
        )
        .unwrap()
    }

    fn raster(values: Array2<f32>, mask: Array2<bool>) -> BandRaster {
        BandRaster::new("NDVI", values, mask, spatial()).unwrap()
    }

    #[test]
    fn test_histogram_scenario() {
        let r = raster(
            array![[0.1, 0.3], [0.5, NODATA]],
            array![[true, true], [true, false]],
        );
        let mask = array![[true, true], [true, false]];
        let hist = ZonalReducer::default()
            .histogram(&r, &mask, &full_region(), 0.2)
            .unwrap();

        assert_eq!(hist.buckets.len(), 3);
        let counts: Vec<usize> = hist.buckets.iter().map(|b| b.count).collect();
        assert_eq!(counts, vec![1, 1, 1]);
        assert_relative_eq!(hist.buckets[0].lower, 0.0);
        assert_relative_eq!(hist.buckets[1].lower, 0.2, epsilon = 1e-12);
        assert_relative_eq!(hist.buckets[2].lower, 0.4, epsilon = 1e-12);
        assert_eq!(hist.total(), 3);
    }

    #[test]
    fn test_max_on_bucket_edge_lands_in_last_bucket() {
        let values = [0.0, 0.5, 1.0];
        let hist = build_histogram("x", &values, 0.5).unwrap();
        let counts: Vec<usize> = hist.buckets.iter().map(|b| b.count).collect();
        assert_eq!(counts, vec![1, 2]);
    }

    #[test]
    fn test_bucket_bounds_hold_their_values() {
        let values = [-0.9, 0.9, 3.0];
        let width = 0.3;
        let hist = build_histogram("x", &values, width).unwrap();
        let last = hist.buckets.last().unwrap();
        assert!(last.lower <= 3.0, "last lower bound {} above max", last.lower);

        // counts agree with the lower bounds the histogram reports
        let mut expected = vec![0usize; hist.buckets.len()];
        for &v in &values {
            let idx = hist.buckets.iter().rposition(|b| b.lower <= v).unwrap();
            assert!(v <= hist.buckets[idx].lower + width + 1e-9);
            expected[idx] += 1;
        }
        let counts: Vec<usize> = hist.buckets.iter().map(|b| b.count).collect();
        assert_eq!(counts, expected);
        assert_eq!(hist.total(), 3);
    }

    #[test]
    fn test_single_value_histogram() {
        let hist = build_histogram("x", &[3.0, 3.0], 1.0).unwrap();
        assert_eq!(hist.buckets.len(), 1);
        assert_eq!(hist.buckets[0].lower, 3.0);
        assert_eq!(hist.total(), 2);
    }

    #[test]
    fn test_negative_values_bucket_start() {
        let hist = build_histogram("x", &[-0.35, 0.05], 0.1).unwrap();
        assert_relative_eq!(hist.buckets[0].lower, -0.4, epsilon = 1e-12);
        assert_eq!(hist.total(), 2);
    }

    #[test]
    fn test_invalid_bucket_width() {
        for w in [0.0, -1.0, f64::NAN] {
            assert!(matches!(
                build_histogram("x", &[1.0], w),
                Err(Error::InvalidParameter { .. })
            ));
        }
    }

    #[test]
    fn test_empty_histogram_is_empty_region() {
        assert!(matches!(
            build_histogram("x", &[], 0.1),
            Err(Error::EmptyRegion)
        ));
    }

    #[test]
    fn test_auto_bucket_width_doubles() {
        let values: Vec<f64> = (0..=100).map(|i| i as f64 / 100.0).collect();
        let width = auto_bucket_width(&values, 0.01, 30).unwrap();
        assert_relative_eq!(width, 0.04);
        let hist = build_histogram("x", &values, width).unwrap();
        assert!(hist.buckets.len() <= 30);
        assert_eq!(hist.total(), values.len());
    }

    #[test]
    fn test_reduce_statistics_match_two_pass_reference() {
        let r = raster(
            array![[0.1, 0.2], [0.4, 0.8]],
            Array2::from_elem((2, 2), true),
        );
        let stats = ZonalReducer::default()
            .reduce_band(&r, &full_region(), &[0.0, 50.0, 100.0])
            .unwrap();

        let xs = [0.1f32, 0.2, 0.4, 0.8].map(|v| v as f64);
        let mean = xs.iter().sum::<f64>() / 4.0;
        let var = xs.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / 3.0;

        assert_eq!(stats.pixel_count, 4);
        assert_relative_eq!(stats.mean.unwrap(), mean, epsilon = 1e-12);
        assert_relative_eq!(stats.std_dev.unwrap(), var.sqrt(), epsilon = 1e-12);
        assert_eq!(stats.min, Some(xs[0]));
        assert_eq!(stats.max, Some(xs[3]));
        assert_eq!(stats.percentile(0.0), Some(xs[0]));
        assert_relative_eq!(stats.percentile(50.0).unwrap(), (xs[1] + xs[2]) / 2.0);
        assert_eq!(stats.percentile(100.0), Some(xs[3]));
    }

    #[test]
    fn test_percentile_linear_interpolation() {
        let sorted = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_relative_eq!(percentile_linear(&sorted, 10.0), 1.4);
        assert_relative_eq!(percentile_linear(&sorted, 25.0), 2.0);
        assert_relative_eq!(percentile_linear(&sorted, 90.0), 4.6);
    }

    #[test]
    fn test_zero_pixels_gives_absent_statistics() {
        let r = raster(array![[0.0, 0.0], [0.0, 0.0]], Array2::from_elem((2, 2), true));
        let none = Array2::from_elem((2, 2), false);
        let stats = ZonalReducer::default()
            .reduce(&r, &none, &full_region(), &[50.0])
            .unwrap();
        assert!(stats.is_empty());
        assert_eq!(stats.mean, None);
        assert_eq!(stats.min, None);
        assert_eq!(stats.std_dev, None);
        assert_eq!(stats.percentile(50.0), None);
    }

    #[test]
    fn test_single_pixel_has_no_sample_std_dev() {
        let r = raster(array![[0.25, 0.0]], array![[true, false]]);
        let region = Region::from_rect(
            Rect::new(coord! { x: 0.0, y: 1.0 }, coord! { x: 2.0, y: 2.0 }),
            "EPSG:32630",
        )
        .unwrap();
        let stats = ZonalReducer::default()
            .reduce_band(&r, &region, &[])
            .unwrap();
        assert_eq!(stats.pixel_count, 1);
        assert_eq!(stats.mean, Some(0.25));
        assert_eq!(stats.std_dev, None);
    }

    #[test]
    fn test_region_restricts_pixels() {
        let r = raster(array![[1.0, 2.0], [3.0, 4.0]], Array2::from_elem((2, 2), true));
        // left column only
        let region = Region::from_rect(
            Rect::new(coord! { x: 0.0, y: 0.0 }, coord! { x: 1.0, y: 2.0 }),
            "EPSG:32630",
        )
        .unwrap();
        let stats = ZonalReducer::new(PixelInclusion::Centroid)
            .reduce_band(&r, &region, &[])
            .unwrap();
        assert_eq!(stats.pixel_count, 2);
        assert_eq!(stats.mean, Some(2.0));
    }

    #[test]
    fn test_percentile_out_of_range() {
        let r = raster(array![[1.0]], array![[true]]);
        assert!(matches!(
            ZonalReducer::default().reduce_band(&r, &full_region(), &[101.0]),
            Err(Error::InvalidParameter { .. })
        ));
    }
}
