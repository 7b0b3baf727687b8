// src/processing/indices/mod.rs
pub mod ndi;
pub mod savi;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::calculator::evaluate;
use super::expression::{BandMathExpression, Binding, Expression};
use crate::error::Result;
use crate::raster::{BandRaster, RasterStack};

// Re-export indices
pub use ndi::NDI;
pub use savi::{SaviForm, SAVI};

/// Trait for spectral index calculators
pub trait IndexCalculator: Send + Sync {
    /// Band-math formula producing the index
    fn expression(&self) -> BandMathExpression;

    /// Return the name of the index (the output band name)
    fn name(&self) -> &str;

    /// Bands the formula reads
    fn required_bands(&self) -> Vec<String> {
        self.expression()
            .referenced_bands()
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    /// Return true if this index requires input scaling for proper results.
    /// Indices with additive constants (SAVI) need reflectance in [0, 1];
    /// pure ratio indices are scale invariant.
    fn needs_input_scaling(&self) -> bool {
        false
    }

    /// Evaluate against a stack without modifying it
    fn calculate(&self, stack: &RasterStack) -> Result<BandRaster> {
        evaluate(stack, &self.expression())
    }
}

/// Arbitrary formula as an index
pub struct CustomIndex {
    expression: BandMathExpression,
    needs_input_scaling: bool,
}

impl CustomIndex {
    pub fn new(expression: BandMathExpression) -> Self {
        let needs_input_scaling = has_additive_constant(&expression.formula);
        Self {
            expression,
            needs_input_scaling,
        }
    }
}

impl IndexCalculator for CustomIndex {
    fn expression(&self) -> BandMathExpression {
        self.expression.clone()
    }

    fn name(&self) -> &str {
        &self.expression.output
    }

    fn needs_input_scaling(&self) -> bool {
        self.needs_input_scaling
    }
}

/// A constant added to or subtracted from a band term makes the formula
/// depend on the input scale.
fn has_additive_constant(expr: &Expression) -> bool {
    match expr {
        Expression::Band { .. } | Expression::Constant { .. } => false,
        Expression::Add { left, right } | Expression::Subtract { left, right } => {
            let mixes = |a: &Expression, b: &Expression| {
                matches!(a, Expression::Constant { .. }) && !b.referenced_bands().is_empty()
            };
            mixes(left, right)
                || mixes(right, left)
                || has_additive_constant(left)
                || has_additive_constant(right)
        }
        Expression::Multiply { left, right } | Expression::Divide { left, right } => {
            has_additive_constant(left) || has_additive_constant(right)
        }
        Expression::Negate { expr } => has_additive_constant(expr),
    }
}

/// Sensor band names used by the index presets. Defaults are Sentinel-2.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BandMapping {
    pub blue: String,
    pub green: String,
    pub red: String,
    pub nir: String,
    pub swir1: String,
    pub swir2: String,
}

impl Default for BandMapping {
    fn default() -> Self {
        Self {
            blue: "B2".into(),
            green: "B3".into(),
            red: "B4".into(),
            nir: "B8".into(),
            swir1: "B11".into(),
            swir2: "B12".into(),
        }
    }
}

fn default_soil_factor() -> f64 {
    savi::DEFAULT_SOIL_FACTOR
}

/// Declarative index selection, as found in batch configs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum IndexSpec {
    Ndvi,
    Ndwi,
    Mndwi,
    Ndbi,
    Savi {
        #[serde(default = "default_soil_factor")]
        l: f64,
        #[serde(default)]
        form: SaviForm,
    },
    Ndi {
        a: String,
        b: String,
        name: Option<String>,
    },
    Expression {
        name: String,
        formula: String,
        #[serde(default)]
        bindings: HashMap<String, Binding>,
    },
}

impl IndexSpec {
    pub fn calculator(&self, bands: &BandMapping) -> Result<Box<dyn IndexCalculator>> {
        Ok(match self {
            IndexSpec::Ndvi => Box::new(NDI::ndvi(bands)),
            IndexSpec::Ndwi => Box::new(NDI::ndwi(bands)),
            IndexSpec::Mndwi => Box::new(NDI::mndwi(bands)),
            IndexSpec::Ndbi => Box::new(NDI::ndbi(bands)),
            IndexSpec::Savi { l, form } => Box::new(
                SAVI::new(bands.nir.clone(), bands.red.clone(), *l, None).with_form(*form),
            ),
            IndexSpec::Ndi { a, b, name } => Box::new(NDI::new(a.clone(), b.clone(), name.clone())),
            IndexSpec::Expression {
                name,
                formula,
                bindings,
            } => Box::new(CustomIndex::new(BandMathExpression::parse(
                name.clone(),
                formula,
                bindings,
            )?)),
        })
    }
}
