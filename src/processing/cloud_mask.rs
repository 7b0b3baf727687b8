// src/processing/cloud_mask.rs
use std::collections::BTreeSet;

use log::debug;
use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::raster::RasterStack;

/// Sentinel-2 scene classification (SCL) codes
pub mod scl {
    pub const NO_DATA: i32 = 0;
    pub const SATURATED: i32 = 1;
    pub const CLOUD_SHADOW: i32 = 3;
    pub const VEGETATION: i32 = 4;
    pub const WATER: i32 = 6;
    pub const CLOUD_MEDIUM_PROBABILITY: i32 = 8;
    pub const CLOUD_HIGH_PROBABILITY: i32 = 9;
    pub const THIN_CIRRUS: i32 = 10;
    pub const SNOW: i32 = 11;
}

/// Derives validity from a classification band by excluding class codes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudMask {
    /// Name of the classification band
    pub band: String,
    /// Class codes whose pixels become invalid
    pub excluded_classes: BTreeSet<i32>,
}

impl CloudMask {
    pub fn new(band: impl Into<String>, excluded_classes: impl IntoIterator<Item = i32>) -> Self {
        Self {
            band: band.into(),
            excluded_classes: excluded_classes.into_iter().collect(),
        }
    }

    /// Cloud shadow, medium/high probability cloud and thin cirrus on the `SCL` band
    pub fn sentinel2_scl() -> Self {
        Self::new(
            "SCL",
            [
                scl::CLOUD_SHADOW,
                scl::CLOUD_MEDIUM_PROBABILITY,
                scl::CLOUD_HIGH_PROBABILITY,
                scl::THIN_CIRRUS,
            ],
        )
    }

    /// See [`derive_mask`]
    pub fn derive(&self, stack: &RasterStack) -> Result<Array2<bool>> {
        derive_mask(stack, &self.band, &self.excluded_classes)
    }

    /// New stack whose mask is narrowed by the derived mask
    pub fn apply(&self, stack: &RasterStack) -> Result<RasterStack> {
        let mask = self.derive(stack)?;
        let mut masked = stack.clone();
        masked.narrow_mask(&mask)?;
        debug!(
            "cloud mask on `{}`: {} of {} pixels valid",
            self.band,
            masked.metadata().valid_pixels,
            mask.len()
        );
        Ok(masked)
    }
}

impl Default for CloudMask {
    fn default() -> Self {
        Self::sentinel2_scl()
    }
}

/// Mask that is `false` exactly where the classification value is one of
/// `excluded_classes`.
///
/// Class values are rounded to the nearest integer before comparison;
/// non-finite values never match a class.
pub fn derive_mask(
    stack: &RasterStack,
    classification_band: &str,
    excluded_classes: &BTreeSet<i32>,
) -> Result<Array2<bool>> {
    let classes = stack.band(classification_band)?.data();
    let mut mask = Array2::from_elem(classes.dim(), true);

    Zip::from(&mut mask).and(classes).par_for_each(|m, &value| {
        if value.is_finite() {
            *m = !excluded_classes.contains(&(value.round() as i32));
        }
    });

    Ok(mask)
}
