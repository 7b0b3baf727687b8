// src/processing/indices/ndi.rs
use super::{BandMapping, IndexCalculator};
use crate::processing::expression::{BandMathExpression, Expression};

/// Normalized Difference Index (NDI) calculator: `(A - B) / (A + B)`
pub struct NDI {
    band_a: String,
    band_b: String,
    name: String,
}

impl NDI {
    pub fn new(band_a: impl Into<String>, band_b: impl Into<String>, name: Option<String>) -> Self {
        Self {
            band_a: band_a.into(),
            band_b: band_b.into(),
            name: name.unwrap_or_else(|| "NDI".to_string()),
        }
    }

    /// (NIR - RED) / (NIR + RED)
    pub fn ndvi(bands: &BandMapping) -> Self {
        Self::new(bands.nir.clone(), bands.red.clone(), Some("NDVI".into()))
    }

    /// (GREEN - NIR) / (GREEN + NIR)
    pub fn ndwi(bands: &BandMapping) -> Self {
        Self::new(bands.green.clone(), bands.nir.clone(), Some("NDWI".into()))
    }

    /// (GREEN - SWIR) / (GREEN + SWIR)
    pub fn mndwi(bands: &BandMapping) -> Self {
        Self::new(bands.green.clone(), bands.swir1.clone(), Some("MNDWI".into()))
    }

    /// (SWIR - NIR) / (SWIR + NIR)
    pub fn ndbi(bands: &BandMapping) -> Self {
        Self::new(bands.swir1.clone(), bands.nir.clone(), Some("NDBI".into()))
    }

    pub fn bands(&self) -> (&str, &str) {
        (&self.band_a, &self.band_b)
    }
}

impl IndexCalculator for NDI {
    fn expression(&self) -> BandMathExpression {
        BandMathExpression {
            output: self.name.clone(),
            formula: Expression::normalized_difference(&self.band_a, &self.band_b),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}
