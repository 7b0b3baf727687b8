// src/raster/mod.rs
pub mod geotransform;
pub mod stack;

pub use geotransform::{GeoTransform, SpatialRef};
pub use stack::{Band, BandRaster, RasterStack, StackMetadata, NODATA};
