// src/io/gdal_io.rs
use std::path::{Path, PathBuf};

use gdal::raster::{Buffer, RasterBand, RasterCreationOptions};
use gdal::spatial_ref::SpatialRef as GdalSpatialRef;
use gdal::{Dataset, DriverManager, Metadata};
use log::{debug, info};
use ndarray::Array2;
use rayon::prelude::*;

use super::adapter::{ExportFormat, ExportRequest, Exporter, RasterEncoding, INT16_NODATA};
use crate::error::{Error, Result};
use crate::raster::{BandRaster, GeoTransform, RasterStack, SpatialRef, NODATA};
use crate::region::Region;
use crate::utils::fixed_point::to_fixed_point;

/// `AUTHORITY:CODE` when GDAL knows it, WKT otherwise
fn crs_identifier(dataset: &Dataset) -> String {
    match dataset.spatial_ref() {
        Ok(srs) => match (srs.auth_name(), srs.auth_code()) {
            (Ok(name), Ok(code)) => format!("{name}:{code}"),
            _ => dataset.projection(),
        },
        Err(_) => dataset.projection(),
    }
}

fn metadata_f64(band: &RasterBand, key: &str) -> Option<f64> {
    band.metadata_item(key, "")
        .and_then(|v| v.trim().parse::<f64>().ok())
}

struct BandRead {
    name: String,
    spatial: SpatialRef,
    data: Array2<f32>,
}

fn read_band(name: &str, path: &Path) -> Result<BandRead> {
    let dataset = Dataset::open(path)?;
    let (width, height) = dataset.raster_size();
    let transform = GeoTransform::from_gdal(dataset.geo_transform()?)?;
    let spatial = SpatialRef::new(crs_identifier(&dataset), transform);

    let band = dataset.rasterband(1)?;
    let nodata = band.no_data_value();
    // int16 exports carry their unscaling as band metadata
    let scale = metadata_f64(&band, "SCALE").unwrap_or(1.0);
    let offset = metadata_f64(&band, "OFFSET").unwrap_or(0.0);
    let buffer: Buffer<f32> =
        band.read_as::<f32>((0, 0), (width, height), (width, height), None)?;
    let values = buffer
        .data()
        .iter()
        .map(|&v| match nodata {
            Some(nd) if v as f64 == nd => NODATA,
            _ => (v as f64 * scale + offset) as f32,
        })
        .collect();
    let data = Array2::from_shape_vec((height, width), values)
        .map_err(|e| Error::ShapeMismatch(format!("{name}: {e}")))?;

    debug!("read {name} ({width}x{height}) from {}", path.display());
    Ok(BandRead {
        name: name.to_string(),
        spatial,
        data,
    })
}

/// Single-band GeoTIFFs as one stack, band `name` read from `path`. Every
/// file must share the first one's grid and CRS. No-data becomes [`NODATA`]
/// and `SCALE`/`OFFSET` metadata is applied.
pub fn read_stack(bands: &[(String, PathBuf)]) -> Result<RasterStack> {
    let reads = bands
        .par_iter()
        .map(|(name, path)| read_band(name, path))
        .collect::<Result<Vec<_>>>()?;

    let Some(first) = reads.first() else {
        return Err(Error::EmptyCollection);
    };
    let (rows, cols) = first.data.dim();
    let mut stack = RasterStack::new(first.spatial.clone(), rows, cols);
    for read in reads {
        if !stack.spatial().same_crs(&read.spatial.crs)
            || stack.spatial().transform != read.spatial.transform
        {
            return Err(Error::ShapeMismatch(format!(
                "{} is not on the grid of the first band",
                read.name
            )));
        }
        stack.add_band(read.name, read.data)?;
    }
    Ok(stack)
}

/// Writes exports as `<dir>/<description>.tif`
#[derive(Debug, Clone)]
pub struct GeoTiffExporter {
    output_dir: PathBuf,
    compress: String,
    tiled: bool,
}

impl GeoTiffExporter {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            compress: "DEFLATE".to_string(),
            tiled: true,
        }
    }

    pub fn with_compression(mut self, compress: impl Into<String>, tiled: bool) -> Self {
        self.compress = compress.into();
        self.tiled = tiled;
        self
    }
}

impl Exporter for GeoTiffExporter {
    fn export_raster(
        &self,
        raster: &BandRaster,
        region: &Region,
        request: &ExportRequest,
    ) -> Result<PathBuf> {
        if request.format != ExportFormat::GeoTiff {
            return Err(Error::invalid_parameter(
                "format",
                format!("{:?}", request.format),
                "GeoTIFF exporter only writes geotiff",
            ));
        }
        let clipped = request.prepare(raster, region)?;
        let (height, width) = clipped.shape();

        std::fs::create_dir_all(&self.output_dir)?;
        let output_path = self.output_dir.join(format!("{}.tif", request.description));

        let driver = DriverManager::get_driver_by_name("GTiff")?;
        let creation_options = RasterCreationOptions::from_iter([
            format!("COMPRESS={}", self.compress),
            format!("TILED={}", if self.tiled { "YES" } else { "NO" }),
            "NUM_THREADS=ALL_CPUS".to_string(),
        ]);
        let projection = GdalSpatialRef::from_definition(&clipped.spatial().crs)?.to_wkt()?;
        let geo_transform = clipped.spatial().transform.to_gdal();

        match request.encoding {
            RasterEncoding::Int16 => {
                let mut out_ds = driver.create_with_band_type_with_options::<i16, _>(
                    &output_path,
                    width,
                    height,
                    1,
                    &creation_options,
                )?;
                out_ds.set_projection(&projection)?;
                out_ds.set_geo_transform(&geo_transform)?;

                let mut band = out_ds.rasterband(1)?;
                band.set_no_data_value(Some(INT16_NODATA as f64))?;
                band.set_metadata_item(
                    "SCALE",
                    &format!("{}", 1.0 / request.scale_factor as f64),
                    "",
                )?;
                band.set_metadata_item("OFFSET", "0", "")?;
                band.set_description(&format!("{} (scaled)", clipped.name()))?;

                let fixed = to_fixed_point(
                    clipped.values(),
                    clipped.mask(),
                    request.scale_factor,
                    INT16_NODATA,
                );
                let mut buffer = Buffer::new((width, height), fixed);
                band.write((0, 0), (width, height), &mut buffer)?;
                out_ds.flush_cache()?;
            }
            RasterEncoding::Float32 => {
                let mut out_ds = driver.create_with_band_type_with_options::<f32, _>(
                    &output_path,
                    width,
                    height,
                    1,
                    &creation_options,
                )?;
                out_ds.set_projection(&projection)?;
                out_ds.set_geo_transform(&geo_transform)?;

                let mut band = out_ds.rasterband(1)?;
                band.set_no_data_value(Some(NODATA as f64))?;
                band.set_description(clipped.name())?;

                let data = clipped
                    .values()
                    .iter()
                    .zip(clipped.mask().iter())
                    .map(|(&v, &valid)| if valid { v } else { NODATA })
                    .collect();
                let mut buffer = Buffer::new((width, height), data);
                band.write((0, 0), (width, height), &mut buffer)?;
                out_ds.flush_cache()?;
            }
        }

        info!(
            "exported `{}` ({width}x{height}, {:?}) to {}",
            raster.name(),
            request.encoding,
            output_path.display()
        );
        Ok(output_path)
    }
}
