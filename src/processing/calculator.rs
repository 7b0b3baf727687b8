// src/processing/calculator.rs
use std::collections::HashMap;

use log::debug;
use ndarray::{Array2, Zip};

use super::expression::{BandMathExpression, Expression};
use crate::error::Result;
use crate::raster::{BandRaster, RasterStack, NODATA};

/// Expression tree with band references resolved to their arrays
enum Node<'a> {
    Band(&'a Array2<f32>),
    Constant(f64),
    Add(Box<Node<'a>>, Box<Node<'a>>),
    Subtract(Box<Node<'a>>, Box<Node<'a>>),
    Multiply(Box<Node<'a>>, Box<Node<'a>>),
    Divide(Box<Node<'a>>, Box<Node<'a>>),
    Negate(Box<Node<'a>>),
}

impl<'a> Node<'a> {
    fn resolve(expr: &Expression, bands: &HashMap<&str, &'a Array2<f32>>) -> Node<'a> {
        let node = |e: &Expression| Box::new(Node::resolve(e, bands));
        match expr {
            // every referenced band was looked up before resolving
            Expression::Band { name } => match bands.get(name.as_str()) {
                Some(data) => Node::Band(data),
                None => Node::Constant(f64::NAN),
            },
            Expression::Constant { value } => Node::Constant(*value),
            Expression::Add { left, right } => Node::Add(node(left), node(right)),
            Expression::Subtract { left, right } => Node::Subtract(node(left), node(right)),
            Expression::Multiply { left, right } => Node::Multiply(node(left), node(right)),
            Expression::Divide { left, right } => Node::Divide(node(left), node(right)),
            Expression::Negate { expr } => Node::Negate(node(expr)),
        }
    }

    /// `None` marks the pixel invalid: a non-finite input or a zero denominator.
    fn eval(&self, row: usize, col: usize) -> Option<f64> {
        match self {
            Node::Band(data) => {
                let v = data[[row, col]];
                v.is_finite().then_some(v as f64)
            }
            Node::Constant(v) => v.is_finite().then_some(*v),
            Node::Add(l, r) => Some(l.eval(row, col)? + r.eval(row, col)?),
            Node::Subtract(l, r) => Some(l.eval(row, col)? - r.eval(row, col)?),
            Node::Multiply(l, r) => Some(l.eval(row, col)? * r.eval(row, col)?),
            Node::Divide(l, r) => {
                let num = l.eval(row, col)?;
                let den = r.eval(row, col)?;
                if den == 0.0 {
                    None
                } else {
                    Some(num / den)
                }
            }
            Node::Negate(e) => Some(-e.eval(row, col)?),
        }
    }
}

/// Evaluate `expr` on every pixel of `stack`.
///
/// The result is valid where the stack is valid, every referenced input is
/// finite, no denominator is exactly zero and the result fits a finite `f32`.
/// Invalid pixels hold [`NODATA`]. The input stack is not modified.
pub fn evaluate(stack: &RasterStack, expr: &BandMathExpression) -> Result<BandRaster> {
    expr.formula.validate()?;

    let mut bands = HashMap::new();
    for name in expr.referenced_bands() {
        bands.insert(name, stack.band(name)?.data());
    }
    let root = Node::resolve(&expr.formula, &bands);

    let shape = stack.shape();
    let validity = stack.validity();
    let mut values = Array2::from_elem(shape, NODATA);
    let mut mask = Array2::from_elem(shape, false);

    Zip::indexed(&mut values)
        .and(&mut mask)
        .and(&validity)
        .par_for_each(|(row, col), value, valid, &stack_valid| {
            if !stack_valid {
                return;
            }
            if let Some(result) = root.eval(row, col) {
                let result = result as f32;
                if result.is_finite() {
                    *value = result;
                    *valid = true;
                }
            }
        });

    debug!(
        "evaluated {}: {} of {} pixels valid",
        expr,
        mask.iter().filter(|v| **v).count(),
        mask.len()
    );
    BandRaster::new(expr.output.clone(), values, mask, stack.spatial().clone())
}

/// `(a - b) / (a + b)` through [`evaluate`], output band named `nd`.
pub fn normalized_difference(stack: &RasterStack, band_a: &str, band_b: &str) -> Result<BandRaster> {
    let expr = BandMathExpression::new("nd", Expression::normalized_difference(band_a, band_b))?;
    evaluate(stack, &expr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::raster::{GeoTransform, SpatialRef};
    use ndarray::array;

    fn stack() -> RasterStack {
        RasterStack::new(SpatialRef::new("EPSG:32630", GeoTransform::default()), 2, 2)
            .with_band("B8", array![[0.5, 0.0], [0.3, -0.2]])
            .unwrap()
            .with_band("B4", array![[0.1, 0.0], [0.3, 0.2]])
            .unwrap()
    }

    #[test]
    fn test_normalized_difference_values() {
        let nd = normalized_difference(&stack(), "B8", "B4").unwrap();
        assert_eq!(nd.name(), "nd");
        approx::assert_relative_eq!(nd.get(0, 0).unwrap(), 0.4 / 0.6, epsilon = 1e-6);
        assert_eq!(nd.get(1, 0), Some(0.0));
    }

    #[test]
    fn test_zero_denominator_is_masked_not_nan() {
        let nd = normalized_difference(&stack(), "B8", "B4").unwrap();
        // 0 + 0 and -0.2 + 0.2
        assert_eq!(nd.get(0, 1), None);
        assert_eq!(nd.get(1, 1), None);
        for (v, m) in nd.values().iter().zip(nd.mask()) {
            if *m {
                assert!(v.is_finite());
            }
        }
    }

    #[test]
    fn test_stack_mask_and_nodata_inputs_propagate() {
        let input = RasterStack::new(SpatialRef::new("EPSG:32630", GeoTransform::default()), 1, 3)
            .with_band("A", array![[1.0, f32::NAN, 2.0]])
            .unwrap()
            .with_mask(array![[true, true, false]])
            .unwrap();
        let expr = BandMathExpression::new("X", Expression::band("A") * 2.0).unwrap();
        let out = evaluate(&input, &expr).unwrap();
        assert_eq!(out.get(0, 0), Some(2.0));
        assert_eq!(out.get(0, 1), None);
        assert_eq!(out.get(0, 2), None);
    }

    #[test]
    fn test_missing_band() {
        let expr = BandMathExpression::new("X", Expression::parse("B8 - B11").unwrap()).unwrap();
        assert!(matches!(evaluate(&stack(), &expr), Err(Error::MissingBand(b)) if b == "B11"));
    }

    #[test]
    fn test_input_stack_is_not_modified() {
        let input = stack();
        let before = input.clone();
        let _ = normalized_difference(&input, "B8", "B4").unwrap();
        assert_eq!(input, before);
    }
}
