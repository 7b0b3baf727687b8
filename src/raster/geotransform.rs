// src/raster/geotransform.rs
use geo::{coord, Point, Rect};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Affine transform for a north-up raster.
///
/// ```text
/// x = origin_x + col * pixel_width
/// y = origin_y + row * pixel_height
/// ```
///
/// `pixel_height` is usually negative (rows grow southwards).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub origin_x: f64,
    pub origin_y: f64,
    pub pixel_width: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    pub fn new(origin_x: f64, origin_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self {
            origin_x,
            origin_y,
            pixel_width,
            pixel_height,
        }
    }

    /// Build from a GDAL coefficient array
    /// `[origin_x, pixel_width, row_rotation, origin_y, col_rotation, pixel_height]`.
    ///
    /// Rotated grids are rejected.
    pub fn from_gdal(coeffs: [f64; 6]) -> Result<Self> {
        if coeffs[2] != 0.0 || coeffs[4] != 0.0 {
            return Err(Error::invalid_parameter(
                "geo_transform",
                format!("{coeffs:?}"),
                "rotated rasters are not supported",
            ));
        }
        Ok(Self::new(coeffs[0], coeffs[3], coeffs[1], coeffs[5]))
    }

    pub fn to_gdal(&self) -> [f64; 6] {
        [
            self.origin_x,
            self.pixel_width,
            0.0,
            self.origin_y,
            0.0,
            self.pixel_height,
        ]
    }

    /// Geographic coordinates of the pixel center
    pub fn pixel_center(&self, row: usize, col: usize) -> Point<f64> {
        Point::new(
            self.origin_x + (col as f64 + 0.5) * self.pixel_width,
            self.origin_y + (row as f64 + 0.5) * self.pixel_height,
        )
    }

    /// Axis-aligned footprint of one pixel
    pub fn pixel_footprint(&self, row: usize, col: usize) -> Rect<f64> {
        let x0 = self.origin_x + col as f64 * self.pixel_width;
        let y0 = self.origin_y + row as f64 * self.pixel_height;
        Rect::new(
            coord! { x: x0, y: y0 },
            coord! { x: x0 + self.pixel_width, y: y0 + self.pixel_height },
        )
    }

    /// Footprint of a `rows x cols` grid
    pub fn extent(&self, rows: usize, cols: usize) -> Rect<f64> {
        Rect::new(
            coord! { x: self.origin_x, y: self.origin_y },
            coord! {
                x: self.origin_x + cols as f64 * self.pixel_width,
                y: self.origin_y + rows as f64 * self.pixel_height,
            },
        )
    }

    /// Fractional (row, col) for a geographic coordinate
    pub fn geo_to_pixel(&self, x: f64, y: f64) -> (f64, f64) {
        (
            (y - self.origin_y) / self.pixel_height,
            (x - self.origin_x) / self.pixel_width,
        )
    }

    /// Ground resolution (pixel width in CRS units)
    pub fn resolution(&self) -> f64 {
        self.pixel_width.abs()
    }
}

impl Default for GeoTransform {
    fn default() -> Self {
        Self::new(0.0, 0.0, 1.0, -1.0)
    }
}

/// CRS identifier plus grid transform shared by every band of a stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpatialRef {
    /// CRS identifier, e.g. `EPSG:32630`
    pub crs: String,
    pub transform: GeoTransform,
}

impl SpatialRef {
    pub fn new(crs: impl Into<String>, transform: GeoTransform) -> Self {
        Self {
            crs: crs.into(),
            transform,
        }
    }

    pub fn resolution(&self) -> f64 {
        self.transform.resolution()
    }

    /// CRS identifiers are reconcilable when they name the same authority code,
    /// ignoring case and surrounding whitespace.
    pub fn same_crs(&self, other: &str) -> bool {
        crs_eq(&self.crs, other)
    }
}

pub(crate) fn crs_eq(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}
