// src/raster/stack.rs
use itertools::Itertools;
use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};

use super::geotransform::SpatialRef;
use crate::error::{Error, Result};

/// Value stored in invalid pixels of derived rasters
pub const NODATA: f32 = f32::NAN;

/// One named band of a stack
#[derive(Debug, Clone, PartialEq)]
pub struct Band {
    name: String,
    data: Array2<f32>,
}

impl Band {
    pub fn new(name: impl Into<String>, data: Array2<f32>) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data(&self) -> &Array2<f32> {
        &self.data
    }
}

/// In-memory multi-band raster sharing one grid, one spatial reference
/// and an optional validity mask (`true` = valid).
#[derive(Debug, Clone, PartialEq)]
pub struct RasterStack {
    bands: Vec<Band>,
    mask: Option<Array2<bool>>,
    spatial: SpatialRef,
    shape: (usize, usize),
}

impl RasterStack {
    /// Empty stack with a fixed `(rows, cols)` grid
    pub fn new(spatial: SpatialRef, rows: usize, cols: usize) -> Self {
        Self {
            bands: Vec::new(),
            mask: None,
            spatial,
            shape: (rows, cols),
        }
    }

    /// Builder-style [`RasterStack::add_band`]
    pub fn with_band(mut self, name: impl Into<String>, data: Array2<f32>) -> Result<Self> {
        self.add_band(name, data)?;
        Ok(self)
    }

    /// Builder-style [`RasterStack::narrow_mask`]
    pub fn with_mask(mut self, mask: Array2<bool>) -> Result<Self> {
        self.narrow_mask(&mask)?;
        Ok(self)
    }

    /// Append a band. Name must be unique and the grid must match.
    pub fn add_band(&mut self, name: impl Into<String>, data: Array2<f32>) -> Result<()> {
        let name = name.into();
        if self.contains(&name) {
            return Err(Error::DuplicateBand(name));
        }
        self.check_shape(data.dim(), &name)?;
        self.bands.push(Band::new(name, data));
        Ok(())
    }

    /// Intersect the validity mask with `mask`. Pixels can only become invalid.
    pub fn narrow_mask(&mut self, mask: &Array2<bool>) -> Result<()> {
        self.check_shape(mask.dim(), "mask")?;
        match &mut self.mask {
            Some(current) => {
                Zip::from(current).and(mask).for_each(|c, &m| *c = *c && m);
            }
            None => self.mask = Some(mask.clone()),
        }
        Ok(())
    }

    /// New stack with `raster` appended as a band; its invalid pixels narrow the mask.
    ///
    /// `self` is left untouched.
    pub fn append(&self, raster: &BandRaster) -> Result<RasterStack> {
        if !self.spatial.same_crs(&raster.spatial.crs) {
            return Err(Error::CrsMismatch(
                self.spatial.crs.clone(),
                raster.spatial.crs.clone(),
            ));
        }
        let mut stack = self.clone();
        stack.add_band(raster.name.clone(), raster.values.clone())?;
        stack.narrow_mask(&raster.mask)?;
        Ok(stack)
    }

    pub fn band(&self, name: &str) -> Result<&Band> {
        self.bands
            .iter()
            .find(|b| b.name == name)
            .ok_or_else(|| Error::MissingBand(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.bands.iter().any(|b| b.name == name)
    }

    pub fn bands(&self) -> &[Band] {
        &self.bands
    }

    pub fn band_names(&self) -> Vec<&str> {
        self.bands.iter().map(|b| b.name.as_str()).collect()
    }

    pub fn mask(&self) -> Option<&Array2<bool>> {
        self.mask.as_ref()
    }

    /// Validity mask with a missing mask treated as all-valid
    pub fn validity(&self) -> Array2<bool> {
        self.mask
            .clone()
            .unwrap_or_else(|| Array2::from_elem(self.shape, true))
    }

    pub fn is_valid(&self, row: usize, col: usize) -> bool {
        self.mask
            .as_ref()
            .map_or(true, |m| m.get((row, col)).copied().unwrap_or(false))
    }

    pub fn spatial(&self) -> &SpatialRef {
        &self.spatial
    }

    /// `(rows, cols)`
    pub fn shape(&self) -> (usize, usize) {
        self.shape
    }

    pub fn rows(&self) -> usize {
        self.shape.0
    }

    pub fn cols(&self) -> usize {
        self.shape.1
    }

    /// Extract one band as a single-band raster. Pixels invalid in the stack
    /// mask or holding a non-finite value are invalid.
    pub fn select(&self, name: &str) -> Result<BandRaster> {
        let band = self.band(name)?;
        let mut mask = self.validity();
        Zip::from(&mut mask)
            .and(&band.data)
            .for_each(|m, &v| *m = *m && v.is_finite());
        BandRaster::new(name, band.data.clone(), mask, self.spatial.clone())
    }

    pub fn metadata(&self) -> StackMetadata {
        StackMetadata {
            bands: self.bands.iter().map(|b| b.name.clone()).collect(),
            crs: self.spatial.crs.clone(),
            resolution: self.spatial.resolution(),
            transform: self.spatial.transform.to_gdal(),
            rows: self.shape.0,
            cols: self.shape.1,
            valid_pixels: self
                .mask
                .as_ref()
                .map_or(self.shape.0 * self.shape.1, |m| m.iter().filter(|v| **v).count()),
        }
    }

    /// Fails unless `other` has the same grid and the same band set (in any order)
    pub(crate) fn same_layout(&self, other: &RasterStack) -> Result<()> {
        if self.shape != other.shape {
            return Err(Error::ShapeMismatch(format!(
                "expected {}x{}, got {}x{}",
                self.shape.0, self.shape.1, other.shape.0, other.shape.1
            )));
        }
        let ours = self.band_names().into_iter().sorted().collect::<Vec<_>>();
        let theirs = other.band_names().into_iter().sorted().collect::<Vec<_>>();
        if ours != theirs {
            return Err(Error::ShapeMismatch(format!(
                "band sets differ: [{}] vs [{}]",
                ours.iter().join(", "),
                theirs.iter().join(", ")
            )));
        }
        Ok(())
    }

    fn check_shape(&self, dim: (usize, usize), what: &str) -> Result<()> {
        if dim != self.shape {
            return Err(Error::ShapeMismatch(format!(
                "{what}: expected {}x{}, got {}x{}",
                self.shape.0, self.shape.1, dim.0, dim.1
            )));
        }
        Ok(())
    }
}

/// Small metadata record describing a stack
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackMetadata {
    pub bands: Vec<String>,
    pub crs: String,
    pub resolution: f64,
    pub transform: [f64; 6],
    pub rows: usize,
    pub cols: usize,
    pub valid_pixels: usize,
}

/// Single-band raster with its own validity mask, as produced by band math.
#[derive(Debug, Clone, PartialEq)]
pub struct BandRaster {
    name: String,
    values: Array2<f32>,
    mask: Array2<bool>,
    spatial: SpatialRef,
}

impl BandRaster {
    pub fn new(
        name: impl Into<String>,
        values: Array2<f32>,
        mask: Array2<bool>,
        spatial: SpatialRef,
    ) -> Result<Self> {
        let name = name.into();
        if values.dim() != mask.dim() {
            return Err(Error::ShapeMismatch(format!(
                "{name}: values {:?} vs mask {:?}",
                values.dim(),
                mask.dim()
            )));
        }
        Ok(Self {
            name,
            values,
            mask,
            spatial,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn values(&self) -> &Array2<f32> {
        &self.values
    }

    pub fn mask(&self) -> &Array2<bool> {
        &self.mask
    }

    pub fn spatial(&self) -> &SpatialRef {
        &self.spatial
    }

    pub fn shape(&self) -> (usize, usize) {
        self.values.dim()
    }

    /// Value at a pixel, `None` when masked
    pub fn get(&self, row: usize, col: usize) -> Option<f32> {
        match self.mask.get((row, col)) {
            Some(true) => self.values.get((row, col)).copied(),
            _ => None,
        }
    }

    pub fn valid_count(&self) -> usize {
        self.mask.iter().filter(|v| **v).count()
    }

    pub fn renamed(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// One-band stack holding this raster; its mask becomes the stack mask
    pub fn to_stack(&self) -> Result<RasterStack> {
        let (rows, cols) = self.shape();
        RasterStack::new(self.spatial.clone(), rows, cols)
            .with_band(self.name.clone(), self.values.clone())?
            .with_mask(self.mask.clone())
    }
}
