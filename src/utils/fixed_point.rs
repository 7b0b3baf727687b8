// src/utils/fixed_point.rs
use ndarray::{Array2, Zip};

/// Scale floats to `i16`. Invalid or non-finite pixels become `nodata_value`;
/// valid values never collide with it.
pub fn to_fixed_point(
    data: &Array2<f32>,
    mask: &Array2<bool>,
    scale_factor: i32,
    nodata_value: i16,
) -> Vec<i16> {
    let scale = scale_factor as f32;
    let mut out = Vec::with_capacity(data.len());
    Zip::from(data).and(mask).for_each(|&value, &valid| {
        if !valid || !value.is_finite() {
            out.push(nodata_value);
            return;
        }
        // Clamp to avoid overflow and scale
        let scaled = (value * scale)
            .round()
            .clamp(i16::MIN as f32, i16::MAX as f32) as i16;
        out.push(if scaled != nodata_value {
            scaled
        } else if nodata_value < 0 {
            nodata_value + 1
        } else {
            nodata_value - 1
        });
    });
    out
}

/// Inverse of [`to_fixed_point`]; no-data comes back as `None`
pub fn from_fixed_point(data: &[i16], scale_factor: i32, nodata_value: i16) -> Vec<Option<f32>> {
    data.iter()
        .map(|&v| (v != nodata_value).then(|| v as f32 / scale_factor as f32))
        .collect()
}
