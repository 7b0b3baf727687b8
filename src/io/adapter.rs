// src/io/adapter.rs
use std::path::PathBuf;

use chrono::NaiveDate;
use log::debug;
use ndarray::{s, Array2, Zip};
use serde::{Deserialize, Serialize};

use super::render::Rgb;
use crate::error::{Error, Result};
use crate::processing::ZonalStatistics;
use crate::raster::geotransform::crs_eq;
use crate::raster::{BandRaster, GeoTransform, RasterStack, SpatialRef, NODATA};
use crate::region::{PixelInclusion, Region};

/// Produces the scenes that feed the compositor
pub trait ImageSource {
    /// Scenes acquired inside `dates` whose footprint intersects `region`
    /// and whose cloudy-pixel percentage is strictly below
    /// `max_cloud_percent`.
    fn fetch_images(
        &self,
        region: &Region,
        dates: &DateRange,
        max_cloud_percent: f64,
    ) -> Result<Vec<RasterStack>>;
}

/// Persists a single-band raster
pub trait Exporter {
    /// Returns the location written
    fn export_raster(
        &self,
        raster: &BandRaster,
        region: &Region,
        request: &ExportRequest,
    ) -> Result<PathBuf>;
}

/// Draws a single-band raster as a styled layer
pub trait Visualizer {
    fn render_layer(&self, raster: &BandRaster, style: &LayerStyle) -> Result<PathBuf>;
}

/// Half-open acquisition window `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawDateRange")]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// Unchecked form of [`DateRange`] as read from configs
#[derive(Deserialize)]
struct RawDateRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl TryFrom<RawDateRange> for DateRange {
    type Error = Error;

    fn try_from(raw: RawDateRange) -> Result<Self> {
        DateRange::new(raw.start, raw.end)
    }
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if end <= start {
            return Err(Error::invalid_parameter(
                "date_range",
                format!("{start}..{end}"),
                "end must be after start",
            ));
        }
        Ok(Self { start, end })
    }

    /// Parse two `YYYY-MM-DD` dates
    pub fn parse(start: &str, end: &str) -> Result<Self> {
        let parse = |s: &str| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .map_err(|e| Error::invalid_parameter("date", s, e.to_string()))
        };
        Self::new(parse(start)?, parse(end)?)
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date < self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Json,
    GeoTiff,
}

/// Sample encoding of exported rasters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RasterEncoding {
    #[default]
    Float32,
    /// `round(value * scale_factor)`, no-data written as `INT16_NODATA`
    Int16,
}

pub const INT16_NODATA: i16 = -10000;
pub const DEFAULT_SCALE_FACTOR: i32 = 10000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportRequest {
    pub description: String,
    /// Must equal the raster's pixel size; nothing is resampled
    pub resolution_m: f64,
    /// Must equal the raster's CRS; nothing is reprojected
    pub crs: String,
    #[serde(default)]
    pub format: ExportFormat,
    #[serde(default)]
    pub encoding: RasterEncoding,
    #[serde(default = "default_scale_factor")]
    pub scale_factor: i32,
    #[serde(default)]
    pub inclusion: PixelInclusion,
}

fn default_scale_factor() -> i32 {
    DEFAULT_SCALE_FACTOR
}

impl ExportRequest {
    /// Float32 request matching the raster's own grid
    pub fn for_raster(description: impl Into<String>, raster: &BandRaster) -> Self {
        Self {
            description: description.into(),
            resolution_m: raster.spatial().resolution(),
            crs: raster.spatial().crs.clone(),
            format: ExportFormat::default(),
            encoding: RasterEncoding::default(),
            scale_factor: DEFAULT_SCALE_FACTOR,
            inclusion: PixelInclusion::default(),
        }
    }

    /// Checks the request against the raster, then crops and masks the
    /// raster to the region.
    pub fn prepare(&self, raster: &BandRaster, region: &Region) -> Result<BandRaster> {
        let spatial = raster.spatial();
        if !crs_eq(&self.crs, &spatial.crs) {
            return Err(Error::CrsMismatch(self.crs.clone(), spatial.crs.clone()));
        }
        let native = spatial.resolution();
        if !(self.resolution_m.is_finite()
            && (self.resolution_m - native).abs() <= native.abs() * 1e-6)
        {
            return Err(Error::invalid_parameter(
                "resolution_m",
                self.resolution_m,
                format!("raster resolution is {native}; resampling is not supported"),
            ));
        }
        if self.encoding == RasterEncoding::Int16 && self.scale_factor <= 0 {
            return Err(Error::invalid_parameter(
                "scale_factor",
                self.scale_factor,
                "must be > 0",
            ));
        }
        clip_to_region(raster, region, self.inclusion)
    }
}

/// Crop to the window of covered pixels; pixels outside the region become
/// no-data. Fails with `EmptyRegion` when nothing is covered.
pub fn clip_to_region(
    raster: &BandRaster,
    region: &Region,
    rule: PixelInclusion,
) -> Result<BandRaster> {
    let coverage = region.coverage(raster.spatial(), raster.shape(), rule)?;

    let window = coverage
        .indexed_iter()
        .filter(|(_, inside)| **inside)
        .fold(None, |acc: Option<(usize, usize, usize, usize)>, ((r, c), _)| {
            Some(match acc {
                None => (r, r, c, c),
                Some((r0, r1, c0, c1)) => (r0.min(r), r1.max(r), c0.min(c), c1.max(c)),
            })
        });
    let (r0, r1, c0, c1) = window.ok_or(Error::EmptyRegion)?;

    let mut values = raster.values().slice(s![r0..=r1, c0..=c1]).to_owned();
    let mut mask: Array2<bool> = raster.mask().slice(s![r0..=r1, c0..=c1]).to_owned();
    Zip::from(&mut values)
        .and(&mut mask)
        .and(coverage.slice(s![r0..=r1, c0..=c1]))
        .for_each(|v, m, &inside| {
            if !inside || !*m {
                *v = NODATA;
                *m = false;
            }
        });

    let t = raster.spatial().transform;
    let transform = GeoTransform::new(
        t.origin_x + c0 as f64 * t.pixel_width,
        t.origin_y + r0 as f64 * t.pixel_height,
        t.pixel_width,
        t.pixel_height,
    );
    debug!(
        "clipped `{}` to rows {r0}..={r1}, cols {c0}..={c1}",
        raster.name()
    );
    BandRaster::new(
        raster.name(),
        values,
        mask,
        SpatialRef::new(raster.spatial().crs.clone(), transform),
    )
}

/// Color range of a rendered layer
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum VisBounds {
    Fixed { min: f64, max: f64 },
    /// Observed min/max of the reduced pixels
    Statistics,
}

impl Default for VisBounds {
    fn default() -> Self {
        VisBounds::Fixed { min: -1.0, max: 1.0 }
    }
}

impl VisBounds {
    /// Statistics without pixels fall back to `[-1, 1]`
    pub fn resolve(&self, stats: Option<&ZonalStatistics>) -> (f64, f64) {
        match self {
            VisBounds::Fixed { min, max } => (*min, *max),
            VisBounds::Statistics => match stats.and_then(|s| s.min.zip(s.max)) {
                Some(bounds) => bounds,
                None => (-1.0, 1.0),
            },
        }
    }
}

/// Everything a visualizer needs to draw one layer
#[derive(Debug, Clone, PartialEq)]
pub struct LayerStyle {
    pub name: String,
    pub min: f64,
    pub max: f64,
    pub palette: Vec<Rgb>,
}
