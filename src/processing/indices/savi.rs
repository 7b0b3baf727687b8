// src/processing/indices/savi.rs
use serde::{Deserialize, Serialize};

use super::IndexCalculator;
use crate::processing::expression::{BandMathExpression, Expression};

/// Soil brightness correction factor for mixed vegetation/soil cover
pub const DEFAULT_SOIL_FACTOR: f64 = 0.5;

/// Algebraic arrangement of the SAVI formula. Both give the same values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SaviForm {
    /// `(1 + L) * (NIR - RED) / (NIR + RED + L)`
    #[default]
    Standard,
    /// `(NIR - RED) / (NIR + RED + L) * (1 + L)`
    Simplified,
}

/// Soil Adjusted Vegetation Index (SAVI) calculator
pub struct SAVI {
    nir: String,
    red: String,
    soil_factor: f64,
    form: SaviForm,
    name: String,
}

impl SAVI {
    pub fn new(
        nir: impl Into<String>,
        red: impl Into<String>,
        soil_factor: f64,
        name: Option<String>,
    ) -> Self {
        Self {
            nir: nir.into(),
            red: red.into(),
            soil_factor,
            form: SaviForm::Standard,
            name: name.unwrap_or_else(|| "SAVI".to_string()),
        }
    }

    pub fn with_form(mut self, form: SaviForm) -> Self {
        self.form = form;
        self
    }

    pub fn soil_factor(&self) -> f64 {
        self.soil_factor
    }
}

impl IndexCalculator for SAVI {
    fn expression(&self) -> BandMathExpression {
        let nir = Expression::band(self.nir.clone());
        let red = Expression::band(self.red.clone());
        let l = self.soil_factor;

        let formula = match self.form {
            SaviForm::Standard => {
                (Expression::constant(1.0) + l) * (nir.clone() - red.clone()) / (nir + red + l)
            }
            SaviForm::Simplified => (nir.clone() - red.clone()) / (nir + red + l) * (1.0 + l),
        };

        BandMathExpression {
            output: self.name.clone(),
            formula,
        }
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn needs_input_scaling(&self) -> bool {
        true // soil factor L assumes reflectance values in [0, 1]
    }
}
