// src/processing/composite.rs
use log::{debug, info};
use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::raster::{RasterStack, NODATA};

/// How a temporal sequence of stacks collapses into one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum CompositeMode {
    /// Per-pixel median over valid observations
    #[default]
    Median,
    /// First valid observation in sequence order wins
    Mosaic,
}

/// Composite `stacks` into a single stack on the first stack's grid.
///
/// All stacks must share dimensions and band set. Band order follows the
/// first stack.
pub fn composite(stacks: &[RasterStack], mode: CompositeMode) -> Result<RasterStack> {
    let first = stacks.first().ok_or(Error::EmptyCollection)?;
    for other in &stacks[1..] {
        first.same_layout(other)?;
    }
    info!(
        "compositing {} stacks ({:?}), bands [{}]",
        stacks.len(),
        mode,
        first.band_names().join(", ")
    );

    let masks: Vec<Array2<bool>> = stacks.iter().map(RasterStack::validity).collect();
    let (rows, cols) = first.shape();
    let mut output = RasterStack::new(first.spatial().clone(), rows, cols);

    match mode {
        CompositeMode::Median => {
            // valid where some band found a finite observation
            let mut any_valid = Array2::from_elem((rows, cols), false);
            for name in first.band_names() {
                let sources = stacks
                    .iter()
                    .map(|s| s.band(name).map(|b| b.data()))
                    .collect::<Result<Vec<_>>>()?;
                let medians = median_band(&sources, &masks, (rows, cols));
                Zip::from(&mut any_valid)
                    .and(&medians)
                    .for_each(|valid, m| *valid |= m.is_finite());
                output.add_band(name, medians)?;
            }
            output.narrow_mask(&any_valid)?;
        }
        CompositeMode::Mosaic => {
            let mut source = Array2::<Option<usize>>::from_elem((rows, cols), None);
            Zip::indexed(&mut source).par_for_each(|(r, c), src| {
                *src = masks.iter().position(|m| m[[r, c]]);
            });
            for name in first.band_names() {
                let sources = stacks
                    .iter()
                    .map(|s| s.band(name).map(|b| b.data()))
                    .collect::<Result<Vec<_>>>()?;
                let mut values = Array2::from_elem((rows, cols), NODATA);
                Zip::indexed(&mut values)
                    .and(&source)
                    .par_for_each(|(r, c), v, src| {
                        if let Some(i) = *src {
                            *v = sources[i][[r, c]];
                        }
                    });
                output.add_band(name, values)?;
            }
            output.narrow_mask(&source.mapv(|s| s.is_some()))?;
        }
    }

    debug!(
        "composite has {} valid pixels of {}",
        output.metadata().valid_pixels,
        rows * cols
    );
    Ok(output)
}

fn median_band(
    sources: &[&Array2<f32>],
    masks: &[Array2<bool>],
    shape: (usize, usize),
) -> Array2<f32> {
    let mut values = Array2::from_elem(shape, NODATA);
    Zip::indexed(&mut values).par_for_each(|(r, c), v| {
        let mut samples: Vec<f32> = sources
            .iter()
            .zip(masks)
            .filter(|(_, m)| m[[r, c]])
            .map(|(b, _)| b[[r, c]])
            .filter(|x| x.is_finite())
            .collect();
        if let Some(m) = median(&mut samples) {
            *v = m;
        }
    });
    values
}

/// Median of finite samples; even counts average the two middle values.
pub(crate) fn median(samples: &mut [f32]) -> Option<f32> {
    if samples.is_empty() {
        return None;
    }
    samples.sort_unstable_by(|a, b| a.total_cmp(b));
    let mid = samples.len() / 2;
    if samples.len() % 2 == 1 {
        Some(samples[mid])
    } else {
        Some(((samples[mid - 1] as f64 + samples[mid] as f64) / 2.0) as f32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::{GeoTransform, SpatialRef};
    use ndarray::array;

    fn spatial() -> SpatialRef {
        SpatialRef::new("EPSG:32630", GeoTransform::new(0.0, 0.0, 10.0, -10.0))
    }

    fn stack(b4: Array2<f32>, mask: Array2<bool>) -> RasterStack {
        let (rows, cols) = b4.dim();
        RasterStack::new(spatial(), rows, cols)
            .with_band("B4", b4.clone())
            .unwrap()
            .with_band("B8", b4.mapv(|v| v * 2.0))
            .unwrap()
            .with_mask(mask)
            .unwrap()
    }

    #[test]
    fn test_median_skips_invalid_observations() {
        let a = stack(array![[1.0, 5.0]], array![[true, false]]);
        let b = stack(array![[3.0, 7.0]], array![[true, false]]);
        let c = stack(array![[100.0, 9.0]], array![[false, false]]);
        let out = composite(&[a, b, c], CompositeMode::Median).unwrap();

        assert_eq!(out.band("B4").unwrap().data()[[0, 0]], 2.0);
        assert_eq!(out.band("B8").unwrap().data()[[0, 0]], 4.0);
        assert!(out.is_valid(0, 0));
        // invalid everywhere -> invalid, no-data value
        assert!(!out.is_valid(0, 1));
        assert!(out.band("B4").unwrap().data()[[0, 1]].is_nan());
    }

    #[test]
    fn test_median_of_only_nan_observations_is_invalid() {
        let a = stack(array![[NODATA, 2.0]], array![[true, true]]);
        let b = stack(array![[5.0, 4.0]], array![[false, true]]);
        let out = composite(&[a, b], CompositeMode::Median).unwrap();

        assert!(!out.is_valid(0, 0));
        assert!(out.band("B4").unwrap().data()[[0, 0]].is_nan());
        assert!(out.is_valid(0, 1));
        assert_eq!(out.metadata().valid_pixels, 1);
    }

    #[test]
    fn test_median_odd_count() {
        let stacks: Vec<_> = [4.0, 1.0, 9.0]
            .iter()
            .map(|v| stack(array![[*v]], array![[true]]))
            .collect();
        let out = composite(&stacks, CompositeMode::Median).unwrap();
        assert_eq!(out.band("B4").unwrap().data()[[0, 0]], 4.0);
    }

    #[test]
    fn test_mosaic_first_valid_wins() {
        let a = stack(array![[1.0, 2.0]], array![[false, true]]);
        let b = stack(array![[10.0, 20.0]], array![[true, true]]);
        let out = composite(&[a, b], CompositeMode::Mosaic).unwrap();
        let b4 = out.band("B4").unwrap().data();
        assert_eq!(b4[[0, 0]], 10.0);
        assert_eq!(b4[[0, 1]], 2.0);
        assert!(out.is_valid(0, 0));
        assert!(out.is_valid(0, 1));
    }

    #[test]
    fn test_mosaic_no_supplier_is_invalid() {
        let a = stack(array![[1.0]], array![[false]]);
        let b = stack(array![[2.0]], array![[false]]);
        let out = composite(&[a, b], CompositeMode::Mosaic).unwrap();
        assert!(!out.is_valid(0, 0));
    }

    #[test]
    fn test_shape_and_band_mismatch() {
        let a = stack(array![[1.0, 2.0]], array![[true, true]]);
        let b = stack(array![[1.0], [2.0]], array![[true], [true]]);
        assert!(matches!(
            composite(&[a.clone(), b], CompositeMode::Median),
            Err(Error::ShapeMismatch(_))
        ));

        let c = RasterStack::new(spatial(), 1, 2)
            .with_band("B4", array![[1.0, 2.0]])
            .unwrap();
        assert!(matches!(
            composite(&[a, c], CompositeMode::Mosaic),
            Err(Error::ShapeMismatch(_))
        ));
    }

    #[test]
    fn test_empty_input() {
        assert!(matches!(
            composite(&[], CompositeMode::Median),
            Err(Error::EmptyCollection)
        ));
    }
}
