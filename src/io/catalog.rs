// src/io/catalog.rs
use std::path::{Path, PathBuf};

use itertools::Itertools;
use log::{debug, info, warn};

use super::adapter::{DateRange, ImageSource};
use super::reader::{read_scenes_parallel, Scene};
use crate::error::{Error, Result};
use crate::raster::geotransform::crs_eq;
use crate::raster::RasterStack;
use crate::region::Region;

/// Collection of scenes answering [`ImageSource`] queries.
///
/// Results are ordered newest first (acquisition date, then scene id, both
/// descending). A mosaic over them keeps the most recent valid pixel.
#[derive(Debug, Clone, Default)]
pub struct SceneCatalog {
    scenes: Vec<Scene>,
    bands: Option<Vec<String>>,
}

impl SceneCatalog {
    pub fn new(scenes: Vec<Scene>) -> Self {
        let scenes = scenes
            .into_iter()
            .sorted_by(|a, b| b.date.cmp(&a.date).then_with(|| b.id.cmp(&a.id)))
            .collect();
        Self {
            scenes,
            bands: None,
        }
    }

    pub fn from_paths(paths: &[PathBuf]) -> Result<Self> {
        let catalog = Self::new(read_scenes_parallel(paths)?);
        info!("loaded {} scenes", catalog.len());
        Ok(catalog)
    }

    /// Every `*.json` file directly inside `dir`
    pub fn from_dir(dir: &Path) -> Result<Self> {
        let mut paths = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|e| e == "json") {
                paths.push(path);
            }
        }
        paths.sort();
        Self::from_paths(&paths)
    }

    /// Restrict fetched stacks to these bands, in this order
    pub fn select_bands<I, S>(mut self, bands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.bands = Some(bands.into_iter().map(Into::into).collect());
        self
    }

    pub fn scenes(&self) -> &[Scene] {
        &self.scenes
    }

    pub fn len(&self) -> usize {
        self.scenes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenes.is_empty()
    }

    fn matches(&self, scene: &Scene, region: &Region, dates: &DateRange, max_cloud: f64) -> bool {
        if !dates.contains(scene.date) {
            return false;
        }
        if !(scene.cloudy_pixel_percentage < max_cloud) {
            return false;
        }
        let spatial = scene.stack.spatial();
        if !crs_eq(&spatial.crs, region.crs()) {
            warn!(
                "scene {} is in {}, region in {}; skipped",
                scene.id,
                spatial.crs,
                region.crs()
            );
            return false;
        }
        let extent = spatial
            .transform
            .extent(scene.stack.rows(), scene.stack.cols());
        region.intersects_rect(&extent)
    }

    fn project(&self, stack: &RasterStack) -> Result<RasterStack> {
        let Some(bands) = &self.bands else {
            return Ok(stack.clone());
        };
        let mut selected = RasterStack::new(stack.spatial().clone(), stack.rows(), stack.cols());
        for name in bands {
            selected.add_band(name.clone(), stack.band(name)?.data().clone())?;
        }
        if let Some(mask) = stack.mask() {
            selected.narrow_mask(mask)?;
        }
        Ok(selected)
    }
}

impl ImageSource for SceneCatalog {
    fn fetch_images(
        &self,
        region: &Region,
        dates: &DateRange,
        max_cloud_percent: f64,
    ) -> Result<Vec<RasterStack>> {
        if !max_cloud_percent.is_finite() {
            return Err(Error::invalid_parameter(
                "max_cloud_percent",
                max_cloud_percent,
                "must be finite",
            ));
        }
        let stacks = self
            .scenes
            .iter()
            .filter(|s| self.matches(s, region, dates, max_cloud_percent))
            .inspect(|s| debug!("selected scene {} ({})", s.id, s.date))
            .map(|s| self.project(&s.stack))
            .collect::<Result<Vec<_>>>()?;
        info!(
            "{} of {} scenes match {}..{} with cloud < {}%",
            stacks.len(),
            self.scenes.len(),
            dates.start,
            dates.end,
            max_cloud_percent
        );
        Ok(stacks)
    }
}
