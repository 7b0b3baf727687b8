// src/io/reader.rs
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use log::debug;
use ndarray::Array2;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::raster::{GeoTransform, RasterStack, SpatialRef, NODATA};

/// One acquisition: scene metadata plus its bands
#[derive(Debug, Clone)]
pub struct Scene {
    pub id: String,
    pub date: NaiveDate,
    pub cloudy_pixel_percentage: f64,
    pub stack: RasterStack,
}

/// On-disk scene layout. Band values are row-major; `null` is no-data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneFile {
    pub id: String,
    pub date: NaiveDate,
    #[serde(default)]
    pub cloudy_pixel_percentage: f64,
    pub crs: String,
    pub transform: GeoTransform,
    pub rows: usize,
    pub cols: usize,
    pub bands: Vec<BandFile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mask: Option<Vec<bool>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BandFile {
    pub name: String,
    pub values: Vec<Option<f32>>,
}

fn to_grid<T>(what: &str, rows: usize, cols: usize, data: Vec<T>) -> Result<Array2<T>> {
    let len = data.len();
    Array2::from_shape_vec((rows, cols), data).map_err(|_| {
        Error::ShapeMismatch(format!("{what}: {len} values for a {rows}x{cols} grid"))
    })
}

impl TryFrom<SceneFile> for Scene {
    type Error = Error;

    fn try_from(file: SceneFile) -> Result<Self> {
        let spatial = SpatialRef::new(file.crs, file.transform);
        let mut stack = RasterStack::new(spatial, file.rows, file.cols);
        for band in file.bands {
            let values = band
                .values
                .into_iter()
                .map(|v| v.unwrap_or(NODATA))
                .collect();
            let data = to_grid(&band.name, file.rows, file.cols, values)?;
            stack.add_band(band.name, data)?;
        }
        if let Some(mask) = file.mask {
            stack.narrow_mask(&to_grid("mask", file.rows, file.cols, mask)?)?;
        }
        Ok(Scene {
            id: file.id,
            date: file.date,
            cloudy_pixel_percentage: file.cloudy_pixel_percentage,
            stack,
        })
    }
}

impl From<&Scene> for SceneFile {
    fn from(scene: &Scene) -> Self {
        let stack = &scene.stack;
        SceneFile {
            id: scene.id.clone(),
            date: scene.date,
            cloudy_pixel_percentage: scene.cloudy_pixel_percentage,
            crs: stack.spatial().crs.clone(),
            transform: stack.spatial().transform,
            rows: stack.rows(),
            cols: stack.cols(),
            bands: stack
                .bands()
                .iter()
                .map(|b| BandFile {
                    name: b.name().to_string(),
                    values: b
                        .data()
                        .iter()
                        .map(|&v| v.is_finite().then_some(v))
                        .collect(),
                })
                .collect(),
            mask: stack.mask().map(|m| m.iter().copied().collect()),
        }
    }
}

pub fn read_scene(path: &Path) -> Result<Scene> {
    let file: SceneFile = serde_json::from_reader(BufReader::new(File::open(path)?))?;
    debug!(
        "read scene {} ({} bands, {}x{}) from {}",
        file.id,
        file.bands.len(),
        file.rows,
        file.cols,
        path.display()
    );
    Scene::try_from(file)
}

/// Read scenes concurrently, keeping the order of `paths`
pub fn read_scenes_parallel(paths: &[PathBuf]) -> Result<Vec<Scene>> {
    paths.par_iter().map(|p| read_scene(p)).collect()
}
