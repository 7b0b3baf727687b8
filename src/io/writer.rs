// src/io/writer.rs
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use log::info;
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use super::adapter::{ExportFormat, ExportRequest, Exporter, RasterEncoding, INT16_NODATA};
use super::reader::{Scene, SceneFile};
use crate::error::{Error, Result};
use crate::raster::{BandRaster, GeoTransform, SpatialRef, NODATA};
use crate::region::Region;
use crate::utils::fixed_point::{from_fixed_point, to_fixed_point};

/// Exported raster plus the metadata needed to read it back
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportedRaster {
    pub description: String,
    pub band: String,
    pub crs: String,
    pub resolution_m: f64,
    pub transform: GeoTransform,
    pub rows: usize,
    pub cols: usize,
    pub encoding: RasterEncoding,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale_factor: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nodata: Option<i16>,
    pub values: ExportedValues,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExportedValues {
    Int16(Vec<i16>),
    /// `null` marks no-data
    Float32(Vec<Option<f32>>),
}

impl ExportedRaster {
    pub fn encode(raster: &BandRaster, request: &ExportRequest) -> Self {
        let (rows, cols) = raster.shape();
        let (values, scale_factor, nodata) = match request.encoding {
            RasterEncoding::Float32 => (
                ExportedValues::Float32(
                    raster
                        .values()
                        .iter()
                        .zip(raster.mask().iter())
                        .map(|(&v, &valid)| (valid && v.is_finite()).then_some(v))
                        .collect(),
                ),
                None,
                None,
            ),
            RasterEncoding::Int16 => (
                ExportedValues::Int16(to_fixed_point(
                    raster.values(),
                    raster.mask(),
                    request.scale_factor,
                    INT16_NODATA,
                )),
                Some(request.scale_factor),
                Some(INT16_NODATA),
            ),
        };
        Self {
            description: request.description.clone(),
            band: raster.name().to_string(),
            crs: raster.spatial().crs.clone(),
            resolution_m: raster.spatial().resolution(),
            transform: raster.spatial().transform,
            rows,
            cols,
            encoding: request.encoding,
            scale_factor,
            nodata,
            values,
        }
    }

    /// Decode back into a raster; int16 values are unscaled
    pub fn into_band_raster(self) -> Result<BandRaster> {
        let values: Vec<Option<f32>> = match self.values {
            ExportedValues::Float32(v) => v,
            ExportedValues::Int16(v) => from_fixed_point(
                &v,
                self.scale_factor.unwrap_or(1),
                self.nodata.unwrap_or(INT16_NODATA),
            ),
        };
        let shape = (self.rows, self.cols);
        let mask = Array2::from_shape_vec(shape, values.iter().map(Option::is_some).collect())
            .map_err(|e| Error::ShapeMismatch(format!("{}: {e}", self.band)))?;
        let data = Array2::from_shape_vec(
            shape,
            values.into_iter().map(|v| v.unwrap_or(NODATA)).collect(),
        )
        .map_err(|e| Error::ShapeMismatch(format!("{}: {e}", self.band)))?;
        BandRaster::new(self.band, data, mask, SpatialRef::new(self.crs, self.transform))
    }
}

/// Writes exports as `<dir>/<description>.json`
#[derive(Debug, Clone)]
pub struct JsonExporter {
    output_dir: PathBuf,
    pretty: bool,
}

impl JsonExporter {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            pretty: false,
        }
    }

    pub fn pretty(mut self, pretty: bool) -> Self {
        self.pretty = pretty;
        self
    }
}

impl Exporter for JsonExporter {
    fn export_raster(
        &self,
        raster: &BandRaster,
        region: &Region,
        request: &ExportRequest,
    ) -> Result<PathBuf> {
        if request.format != ExportFormat::Json {
            return Err(Error::invalid_parameter(
                "format",
                format!("{:?}", request.format),
                "JSON exporter only writes json",
            ));
        }
        let clipped = request.prepare(raster, region)?;
        let exported = ExportedRaster::encode(&clipped, request);

        std::fs::create_dir_all(&self.output_dir)?;
        let path = self.output_dir.join(format!("{}.json", request.description));
        write_json(&path, &exported, self.pretty)?;

        let (rows, cols) = clipped.shape();
        info!(
            "exported `{}` ({rows}x{cols}, {:?}) to {}",
            raster.name(),
            request.encoding,
            path.display()
        );
        Ok(path)
    }
}

/// Serialize any value to a JSON file
pub fn write_json<T: Serialize>(path: &Path, value: &T, pretty: bool) -> Result<()> {
    let writer = BufWriter::new(File::create(path)?);
    if pretty {
        serde_json::to_writer_pretty(writer, value)?;
    } else {
        serde_json::to_writer(writer, value)?;
    }
    Ok(())
}

pub fn write_scene(path: &Path, scene: &Scene) -> Result<()> {
    write_json(path, &SceneFile::from(scene), false)
}
